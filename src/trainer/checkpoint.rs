//! Checkpoint save/load.
//!
//! A checkpoint is a directory holding:
//! - `model.safetensors`: model parameters (F32)
//! - `training_state.json`: epoch, lr, version, free-form metadata
//!
//! Each file is written to a temporary sibling first and renamed into
//! place, so a reader never sees a half-written checkpoint file.

use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::{Path, PathBuf};

use safetensors::SafeTensors;
use safetensors::tensor::{Dtype, TensorView};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::tensor::Tensor;

/// Current checkpoint format version.
pub const CHECKPOINT_VERSION: u32 = 1;

pub const MODEL_FILE: &str = "model.safetensors";
pub const STATE_FILE: &str = "training_state.json";

fn default_version() -> u32 {
    1
}

/// Training metadata saved alongside model state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainingState {
    #[serde(default = "default_version")]
    pub version: u32,
    pub epoch: u64,
    #[serde(default)]
    pub learning_rate: f64,
    /// Arbitrary key-value metadata (world size, loss, ...)
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

impl TrainingState {
    pub fn new(epoch: u64, learning_rate: f64) -> Self {
        Self {
            version: CHECKPOINT_VERSION,
            epoch,
            learning_rate,
            metadata: HashMap::new(),
        }
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl ToString) -> Self {
        self.metadata.insert(key.into(), value.to_string());
        self
    }
}

/// Save a checkpoint to a directory, creating it if needed.
///
/// Returns the path of the model file.
pub fn save_checkpoint<P: AsRef<Path>>(
    dir: P,
    model_state: &BTreeMap<String, Tensor>,
    training_state: &TrainingState,
) -> Result<PathBuf> {
    let dir = dir.as_ref();
    fs::create_dir_all(dir).map_err(|e| Error::CheckpointError {
        reason: format!("failed to create checkpoint dir {}: {e}", dir.display()),
    })?;

    let bytes: Vec<(&str, Vec<u8>, Vec<usize>)> = model_state
        .iter()
        .map(|(name, t)| {
            let data: Vec<u8> = bytemuck::cast_slice(t.as_slice()).to_vec();
            (name.as_str(), data, t.shape().to_vec())
        })
        .collect();

    let mut views = Vec::with_capacity(bytes.len());
    for (name, data, shape) in &bytes {
        let view = TensorView::new(Dtype::F32, shape.clone(), data).map_err(|e| {
            Error::CheckpointError {
                reason: format!("invalid tensor '{name}': {e}"),
            }
        })?;
        views.push((*name, view));
    }

    let mut header = HashMap::new();
    header.insert("format".to_string(), "pt".to_string());
    header.insert("epoch".to_string(), training_state.epoch.to_string());

    let serialized = safetensors::serialize(views, Some(header)).map_err(|e| {
        Error::CheckpointError {
            reason: format!("safetensors serialization failed: {e}"),
        }
    })?;

    let model_path = dir.join(MODEL_FILE);
    write_atomic(&model_path, &serialized)?;

    let mut state = training_state.clone();
    state.version = CHECKPOINT_VERSION;
    let json = serde_json::to_string_pretty(&state)?;
    write_atomic(&dir.join(STATE_FILE), json.as_bytes())?;

    Ok(model_path)
}

/// Load a checkpoint directory written by [`save_checkpoint`].
pub fn load_checkpoint<P: AsRef<Path>>(
    dir: P,
) -> Result<(BTreeMap<String, Tensor>, TrainingState)> {
    let dir = dir.as_ref();

    let model_path = dir.join(MODEL_FILE);
    let raw = fs::read(&model_path).map_err(|e| Error::CheckpointError {
        reason: format!("failed to read {}: {e}", model_path.display()),
    })?;
    let st = SafeTensors::deserialize(&raw).map_err(|e| Error::CheckpointError {
        reason: format!("failed to parse {}: {e}", model_path.display()),
    })?;

    let mut model_state = BTreeMap::new();
    for (name, view) in st.tensors() {
        if view.dtype() != Dtype::F32 {
            return Err(Error::CheckpointError {
                reason: format!("tensor '{name}' has dtype {:?}, expected F32", view.dtype()),
            });
        }
        let data: Vec<f32> = bytemuck::pod_collect_to_vec(view.data());
        model_state.insert(name, Tensor::from_vec(data, view.shape())?);
    }

    let state_path = dir.join(STATE_FILE);
    let json = fs::read_to_string(&state_path).map_err(|e| Error::CheckpointError {
        reason: format!("failed to read {}: {e}", state_path.display()),
    })?;
    let training_state: TrainingState = serde_json::from_str(&json)?;

    Ok((model_state, training_state))
}

fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);
    fs::write(&tmp, bytes).map_err(|e| Error::CheckpointError {
        reason: format!("failed to write {}: {e}", tmp.display()),
    })?;
    fs::rename(&tmp, path).map_err(|e| Error::CheckpointError {
        reason: format!("failed to move checkpoint into {}: {e}", path.display()),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn make_model_state() -> BTreeMap<String, Tensor> {
        let mut state = BTreeMap::new();
        state.insert(
            "weight".to_string(),
            Tensor::from_slice(&[1.0, 2.0, 3.0, 4.0], &[2, 2]).unwrap(),
        );
        state.insert(
            "bias".to_string(),
            Tensor::from_slice(&[0.1, 0.2], &[2]).unwrap(),
        );
        state
    }

    #[test]
    fn test_save_and_load_checkpoint() {
        let dir = TempDir::new().unwrap();
        let model_state = make_model_state();
        let training_state = TrainingState::new(5, 1e-3).with_metadata("world_size", 4);

        let path = save_checkpoint(dir.path(), &model_state, &training_state).unwrap();
        assert_eq!(path, dir.path().join(MODEL_FILE));
        assert!(dir.path().join(STATE_FILE).exists());
        assert!(!dir.path().join("model.safetensors.tmp").exists());

        let (loaded, state) = load_checkpoint(dir.path()).unwrap();
        assert_eq!(loaded, model_state);
        assert_eq!(state.epoch, 5);
        assert_eq!(state.metadata["world_size"], "4");
    }

    #[test]
    fn test_overwrite_keeps_latest() {
        let dir = TempDir::new().unwrap();
        let mut model_state = make_model_state();
        save_checkpoint(dir.path(), &model_state, &TrainingState::new(0, 1e-3)).unwrap();

        model_state.insert("bias".to_string(), Tensor::from_slice(&[9.0, 9.0], &[2]).unwrap());
        save_checkpoint(dir.path(), &model_state, &TrainingState::new(5, 1e-3)).unwrap();

        let (loaded, state) = load_checkpoint(dir.path()).unwrap();
        assert_eq!(state.epoch, 5);
        assert_eq!(loaded["bias"].as_slice(), &[9.0, 9.0]);
    }

    #[test]
    fn test_state_without_version_defaults() {
        let dir = TempDir::new().unwrap();
        save_checkpoint(dir.path(), &make_model_state(), &TrainingState::new(1, 0.1)).unwrap();

        let json = r#"{"epoch": 3}"#;
        fs::write(dir.path().join(STATE_FILE), json).unwrap();

        let (_, loaded) = load_checkpoint(dir.path()).unwrap();
        assert_eq!(loaded.version, 1);
        assert_eq!(loaded.epoch, 3);
        assert!(loaded.metadata.is_empty());
    }

    #[test]
    fn test_missing_checkpoint() {
        let dir = TempDir::new().unwrap();
        assert!(load_checkpoint(dir.path().join("nope")).is_err());
    }
}
