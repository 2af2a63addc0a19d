//! DataLoader driven by a [`DistributedSampler`].
//!
//! Iterates this rank's share of a `Dataset` in order given by the
//! sampler, producing collated `Batch` tensors with a leading batch
//! dimension. The last partial batch is kept.

use crate::data::collate::collate_batch;
use crate::data::dataset::{Batch, Dataset};
use crate::data::sampler::DistributedSampler;
use crate::error::{Error, Result};

/// DataLoader over one rank's shard of a dataset.
///
/// # Lifecycle
///
/// ```ignore
/// let mut loader = DataLoader::new(dataset, batch_size, sampler)?;
/// for epoch in 0..num_epochs {
///     loader.sampler_mut().set_epoch(epoch);
///     for batch in loader.iter() {
///         let batch = batch?;
///         // batch.inputs: [batch_size, ...]
///         // batch.targets: [batch_size, ...]
///     }
/// }
/// ```
pub struct DataLoader<D> {
    dataset: D,
    batch_size: usize,
    sampler: DistributedSampler,
}

impl<D: Dataset> DataLoader<D> {
    /// Create a new DataLoader.
    ///
    /// # Arguments
    /// * `dataset` - The dataset to iterate
    /// * `batch_size` - Number of samples per batch (per rank)
    /// * `sampler` - Decides which indices this rank visits each epoch
    pub fn new(dataset: D, batch_size: usize, sampler: DistributedSampler) -> Result<Self> {
        if batch_size == 0 {
            return Err(Error::DataError {
                reason: "batch_size must be > 0".to_string(),
            });
        }
        Ok(Self {
            dataset,
            batch_size,
            sampler,
        })
    }

    /// Number of batches per epoch, counting a trailing partial batch.
    pub fn len(&self) -> usize {
        self.sampler.num_samples().div_ceil(self.batch_size)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// The underlying dataset.
    pub fn dataset(&self) -> &D {
        &self.dataset
    }

    pub fn sampler(&self) -> &DistributedSampler {
        &self.sampler
    }

    pub fn sampler_mut(&mut self) -> &mut DistributedSampler {
        &mut self.sampler
    }

    /// Iterate the current epoch's batches.
    pub fn iter(&self) -> DataLoaderIter<'_, D> {
        DataLoaderIter {
            loader: self,
            indices: self.sampler.indices(),
            position: 0,
        }
    }
}

/// Iterator over batches in one epoch.
///
/// Implements `Iterator<Item = Result<Batch>>`.
pub struct DataLoaderIter<'a, D> {
    loader: &'a DataLoader<D>,
    indices: Vec<usize>,
    position: usize,
}

impl<D: Dataset> DataLoaderIter<'_, D> {
    /// Number of batches remaining in this epoch.
    pub fn remaining(&self) -> usize {
        (self.indices.len() - self.position).div_ceil(self.loader.batch_size)
    }
}

impl<D: Dataset> Iterator for DataLoaderIter<'_, D> {
    type Item = Result<Batch>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.position >= self.indices.len() {
            return None;
        }
        let end = (self.position + self.loader.batch_size).min(self.indices.len());
        let batch_indices = &self.indices[self.position..end];
        self.position = end;
        Some(collate_batch(&self.loader.dataset, batch_indices))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self.remaining();
        (remaining, Some(remaining))
    }
}

impl<D: Dataset> ExactSizeIterator for DataLoaderIter<'_, D> {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::dataset::RandomRegressionDataset;
    use crate::data::sampler::SamplerConfig;

    fn loader(len: usize, batch: usize, rank: usize, world: usize) -> DataLoader<RandomRegressionDataset> {
        let ds = RandomRegressionDataset::new(len, 4, 1, 0).unwrap();
        let sampler =
            DistributedSampler::new(len, SamplerConfig::default().with_rank(rank, world)).unwrap();
        DataLoader::new(ds, batch, sampler).unwrap()
    }

    #[test]
    fn test_len_counts_partial_batch() {
        // 2048 samples, 4 ranks: 512 per rank, 16 full batches of 32
        assert_eq!(loader(2048, 32, 0, 4).len(), 16);
        // 100 samples, 3 ranks: 34 per rank -> 32 + 2
        let l = loader(100, 32, 2, 3);
        assert_eq!(l.len(), 2);
        let sizes: Vec<usize> = l.iter().map(|b| b.unwrap().len()).collect();
        assert_eq!(sizes, vec![32, 2]);
    }

    #[test]
    fn test_batches_follow_sampler() {
        let l = loader(10, 3, 1, 2);
        let indices = l.sampler().indices();
        let first = l.iter().next().unwrap().unwrap();
        let expected = l.dataset().get(indices[0]).unwrap();
        assert_eq!(first.inputs.row(0).unwrap(), expected.input.as_slice());
        assert_eq!(first.inputs.shape(), &[3, 4]);
        assert_eq!(first.targets.shape(), &[3, 1]);
    }

    #[test]
    fn test_iter_exact_size() {
        let l = loader(64, 10, 0, 1);
        let mut it = l.iter();
        assert_eq!(it.len(), 7);
        it.next();
        assert_eq!(it.len(), 6);
    }

    #[test]
    fn test_zero_batch_size() {
        let ds = RandomRegressionDataset::new(4, 2, 1, 0).unwrap();
        let sampler = DistributedSampler::new(4, SamplerConfig::default()).unwrap();
        assert!(DataLoader::new(ds, 0, sampler).is_err());
    }
}
