//! Dataset trait, sample/batch types and the toy regression dataset.

use rand::SeedableRng;
use rand::rngs::StdRng;

use crate::error::{Error, Result};
use crate::tensor::Tensor;

/// One unbatched training example.
#[derive(Debug, Clone)]
pub struct Sample {
    pub input: Tensor,
    pub target: Tensor,
}

/// A batch of training data with a leading batch dimension.
///
/// `inputs` is `[batch, in_features]`, `targets` is `[batch, out_features]`.
#[derive(Debug, Clone)]
pub struct Batch {
    pub inputs: Tensor,
    pub targets: Tensor,
}

impl Batch {
    /// Number of samples in this batch.
    pub fn len(&self) -> usize {
        self.inputs.shape().first().copied().unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Trait for indexable datasets.
///
/// Samples are returned unbatched; the `DataLoader` handles collation.
pub trait Dataset: Send + Sync {
    /// Number of samples in the dataset.
    fn len(&self) -> usize;

    /// Whether the dataset is empty.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Get a single sample by index.
    fn get(&self, idx: usize) -> Result<Sample>;
}

/// Random `(input, target)` pairs materialized once at construction.
///
/// Inputs and targets are drawn uniformly from `[0, 1)`. The generator is
/// seeded, so every rank that builds the dataset with the same arguments
/// holds the same samples and the sampler's partition is meaningful.
#[derive(Debug, Clone)]
pub struct RandomRegressionDataset {
    samples: Vec<Sample>,
    in_features: usize,
    out_features: usize,
}

impl RandomRegressionDataset {
    pub fn new(size: usize, in_features: usize, out_features: usize, seed: u64) -> Result<Self> {
        if in_features == 0 || out_features == 0 {
            return Err(Error::DataError {
                reason: format!(
                    "feature sizes must be > 0, got in={in_features} out={out_features}"
                ),
            });
        }
        let mut rng = StdRng::seed_from_u64(seed);
        let samples = (0..size)
            .map(|_| Sample {
                input: Tensor::rand(&[in_features], &mut rng),
                target: Tensor::rand(&[out_features], &mut rng),
            })
            .collect();
        Ok(Self {
            samples,
            in_features,
            out_features,
        })
    }

    pub fn in_features(&self) -> usize {
        self.in_features
    }

    pub fn out_features(&self) -> usize {
        self.out_features
    }
}

impl Dataset for RandomRegressionDataset {
    fn len(&self) -> usize {
        self.samples.len()
    }

    fn get(&self, idx: usize) -> Result<Sample> {
        self.samples
            .get(idx)
            .cloned()
            .ok_or_else(|| Error::DataError {
                reason: format!(
                    "index {idx} out of bounds for dataset of size {}",
                    self.samples.len()
                ),
            })
    }
}
