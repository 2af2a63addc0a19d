//! Training configuration and metrics

use std::path::PathBuf;

use crate::error::{Error, Result};
use crate::nn::Loss;

/// Training configuration
#[derive(Debug, Clone)]
pub struct TrainingConfig {
    pub total_epochs: u64,
    /// Checkpoint every `save_every` epochs, starting at epoch 0.
    pub save_every: u64,
    /// Per-rank batch size.
    pub batch_size: usize,
    pub learning_rate: f64,
    pub dataset_size: usize,
    pub in_features: usize,
    pub out_features: usize,
    /// Seeds the dataset, the model init and the sampler shuffle.
    pub seed: u64,
    pub shuffle: bool,
    pub loss: Loss,
    pub checkpoint_dir: PathBuf,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            total_epochs: 10,
            save_every: 5,
            batch_size: 32,
            learning_rate: 1e-3,
            dataset_size: 2048,
            in_features: 20,
            out_features: 1,
            seed: 0,
            shuffle: true,
            loss: Loss::CrossEntropy,
            checkpoint_dir: PathBuf::from("checkpoint"),
        }
    }
}

impl TrainingConfig {
    pub fn with_total_epochs(mut self, epochs: u64) -> Self {
        self.total_epochs = epochs;
        self
    }

    pub fn with_save_every(mut self, every: u64) -> Self {
        self.save_every = every;
        self
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    pub fn with_lr(mut self, lr: f64) -> Self {
        self.learning_rate = lr;
        self
    }

    pub fn with_dataset_size(mut self, size: usize) -> Self {
        self.dataset_size = size;
        self
    }

    pub fn with_features(mut self, in_features: usize, out_features: usize) -> Self {
        self.in_features = in_features;
        self.out_features = out_features;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    pub fn with_shuffle(mut self, shuffle: bool) -> Self {
        self.shuffle = shuffle;
        self
    }

    pub fn with_loss(mut self, loss: Loss) -> Self {
        self.loss = loss;
        self
    }

    pub fn with_checkpoint_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.checkpoint_dir = dir.into();
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.save_every == 0 {
            return Err(Error::ConfigError {
                reason: "save_every must be >= 1".to_string(),
            });
        }
        if self.batch_size == 0 {
            return Err(Error::ConfigError {
                reason: "batch_size must be >= 1".to_string(),
            });
        }
        if self.dataset_size == 0 {
            return Err(Error::ConfigError {
                reason: "dataset_size must be >= 1".to_string(),
            });
        }
        if !(self.learning_rate >= 0.0 && self.learning_rate.is_finite()) {
            return Err(Error::ConfigError {
                reason: format!("learning rate must be finite and >= 0, got {}", self.learning_rate),
            });
        }
        Ok(())
    }
}

/// Metrics from one epoch on one rank, with the loss averaged over ranks.
#[derive(Debug, Clone)]
pub struct EpochMetrics {
    pub epoch: u64,
    pub steps: usize,
    pub batch_size: usize,
    /// Mean batch loss, averaged across all ranks.
    pub loss: f64,
}
