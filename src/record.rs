//! Failure reports for the launcher.
//!
//! torchrun-compatible launchers pass each worker a path in
//! `TORCHELASTIC_ERROR_FILE`. A worker that fails writes a JSON report
//! there so the launcher can show the root cause instead of just an exit
//! code.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use crate::error::Result;

pub const ERROR_FILE_ENV: &str = "TORCHELASTIC_ERROR_FILE";

/// What a failed worker leaves behind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorReport {
    pub message: String,
    pub rank: Option<usize>,
    /// Seconds since the Unix epoch.
    pub timestamp: u64,
}

impl ErrorReport {
    pub fn new(message: impl Into<String>, rank: Option<usize>) -> Self {
        let timestamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);
        Self {
            message: message.into(),
            rank,
            timestamp,
        }
    }

    pub fn write_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        fs::write(path, serde_json::to_vec_pretty(self)?)?;
        Ok(())
    }
}

/// Write `message` to the launcher's error file, if one was requested.
///
/// Returns the path written, or `None` when the variable is unset.
pub fn record_error(message: &str, rank: Option<usize>) -> Result<Option<PathBuf>> {
    let Some(path) = std::env::var_os(ERROR_FILE_ENV).map(PathBuf::from) else {
        return Ok(None);
    };
    ErrorReport::new(message, rank).write_to(&path)?;
    Ok(Some(path))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_report_written_as_json() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("error.json");
        ErrorReport::new("rank 1 could not reach 10.0.0.1:29500", Some(1))
            .write_to(&path)
            .unwrap();

        let loaded: ErrorReport =
            serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(loaded.rank, Some(1));
        assert!(loaded.message.contains("could not reach"));
        assert!(loaded.timestamp > 0);
    }
}
