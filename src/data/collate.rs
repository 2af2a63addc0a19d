//! Batch collation.

use crate::data::dataset::{Batch, Dataset};
use crate::error::{Error, Result};
use crate::tensor::Tensor;

/// Collate individual samples into a batched tensor pair.
///
/// Fetches each sample from the dataset, then stacks inputs and targets
/// along a new leading batch dimension: `[batch_size, ...]`.
pub(crate) fn collate_batch<D: Dataset + ?Sized>(dataset: &D, indices: &[usize]) -> Result<Batch> {
    if indices.is_empty() {
        return Err(Error::DataError {
            reason: "empty batch indices".to_string(),
        });
    }

    let mut all_input_data: Vec<f32> = Vec::new();
    let mut all_target_data: Vec<f32> = Vec::new();
    let mut shapes: Option<(Vec<usize>, Vec<usize>)> = None;

    for &idx in indices {
        let sample = dataset.get(idx)?;

        match shapes {
            Some((ref input_shape, ref target_shape)) => {
                if sample.input.shape() != input_shape.as_slice()
                    || sample.target.shape() != target_shape.as_slice()
                {
                    return Err(Error::DataError {
                        reason: format!(
                            "inconsistent sample shapes: expected {:?}/{:?}, got {:?}/{:?}",
                            input_shape,
                            target_shape,
                            sample.input.shape(),
                            sample.target.shape()
                        ),
                    });
                }
            }
            None => {
                shapes = Some((sample.input.shape().to_vec(), sample.target.shape().to_vec()));
            }
        }

        all_input_data.extend_from_slice(sample.input.as_slice());
        all_target_data.extend_from_slice(sample.target.as_slice());
    }

    let (input_shape, target_shape) = shapes.ok_or_else(|| Error::DataError {
        reason: "no samples produced during collation".to_string(),
    })?;

    let inputs = Tensor::from_vec(all_input_data, &batched(indices.len(), &input_shape))?;
    let targets = Tensor::from_vec(all_target_data, &batched(indices.len(), &target_shape))?;

    Ok(Batch { inputs, targets })
}

fn batched(batch: usize, sample_shape: &[usize]) -> Vec<usize> {
    let mut shape = Vec::with_capacity(sample_shape.len() + 1);
    shape.push(batch);
    shape.extend_from_slice(sample_shape);
    shape
}
