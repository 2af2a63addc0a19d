//! Distributed sampler for data-parallel training.
//!
//! Each rank draws a disjoint, equally sized slice of the dataset indices.
//! The index list is padded by wrapping around so that every rank runs
//! the same number of steps per epoch, which keeps collective calls in
//! lockstep.

use crate::error::{Error, Result};

/// Sampler configuration.
#[derive(Debug, Clone)]
pub struct SamplerConfig {
    pub rank: usize,
    pub world_size: usize,
    pub shuffle: bool,
    pub seed: u64,
}

impl Default for SamplerConfig {
    fn default() -> Self {
        Self {
            rank: 0,
            world_size: 1,
            shuffle: true,
            seed: 0,
        }
    }
}

impl SamplerConfig {
    pub fn with_rank(mut self, rank: usize, world_size: usize) -> Self {
        self.rank = rank;
        self.world_size = world_size;
        self
    }

    pub fn with_shuffle(mut self, shuffle: bool) -> Self {
        self.shuffle = shuffle;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }
}

/// Partitions `0..dataset_len` across ranks.
///
/// Rank `r` of `W` takes positions `r, r+W, r+2W, ...` of the (optionally
/// shuffled, then padded) index list. The shuffle is seeded by
/// `seed + epoch`, so call [`DistributedSampler::set_epoch`] before each
/// epoch or every epoch yields the same order.
#[derive(Debug, Clone)]
pub struct DistributedSampler {
    dataset_len: usize,
    config: SamplerConfig,
    epoch: u64,
    num_samples: usize,
}

impl DistributedSampler {
    pub fn new(dataset_len: usize, config: SamplerConfig) -> Result<Self> {
        if config.world_size == 0 {
            return Err(Error::DataError {
                reason: "world_size must be > 0".to_string(),
            });
        }
        if config.rank >= config.world_size {
            return Err(Error::DataError {
                reason: format!(
                    "rank {} >= world_size {}",
                    config.rank, config.world_size
                ),
            });
        }
        let num_samples = dataset_len.div_ceil(config.world_size);
        Ok(Self {
            dataset_len,
            config,
            epoch: 0,
            num_samples,
        })
    }

    /// Select the permutation used by the next call to [`indices`](Self::indices).
    pub fn set_epoch(&mut self, epoch: u64) {
        self.epoch = epoch;
    }

    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    /// Samples this rank yields per epoch.
    pub fn num_samples(&self) -> usize {
        self.num_samples
    }

    /// Padded index count across all ranks.
    pub fn total_size(&self) -> usize {
        self.num_samples * self.config.world_size
    }

    pub fn rank(&self) -> usize {
        self.config.rank
    }

    pub fn world_size(&self) -> usize {
        self.config.world_size
    }

    /// This rank's dataset indices for the current epoch.
    pub fn indices(&self) -> Vec<usize> {
        if self.dataset_len == 0 {
            return Vec::new();
        }

        let mut indices = if self.config.shuffle {
            shuffled_indices(
                self.dataset_len,
                self.config.seed.wrapping_add(self.epoch),
            )
        } else {
            (0..self.dataset_len).collect()
        };

        let total_size = self.total_size();
        let mut i = 0;
        while indices.len() < total_size {
            indices.push(indices[i]);
            i += 1;
        }

        indices
            .into_iter()
            .skip(self.config.rank)
            .step_by(self.config.world_size)
            .collect()
    }
}

/// Generate shuffled indices `[0..len)` deterministically from a seed.
///
/// Uses splitmix64 PRNG + Fisher-Yates shuffle for uniform permutation
/// reproducible across platforms.
///
/// Kept independent of `rand`: every rank must derive the identical
/// permutation, and `SliceRandom::shuffle` output may change between
/// `rand` releases.
pub(crate) fn shuffled_indices(len: usize, seed: u64) -> Vec<usize> {
    let mut indices: Vec<usize> = (0..len).collect();
    if len <= 1 {
        return indices;
    }

    let mut state = seed;
    let mut next_u64 = move || -> u64 {
        state = state.wrapping_add(0x9e3779b97f4a7c15);
        let mut z = state;
        z = (z ^ (z >> 30)).wrapping_mul(0xbf58476d1ce4e5b9);
        z = (z ^ (z >> 27)).wrapping_mul(0x94d049bb133111eb);
        z ^ (z >> 31)
    };

    for i in (1..len).rev() {
        let j = (next_u64() as usize) % (i + 1);
        indices.swap(i, j);
    }

    indices
}
