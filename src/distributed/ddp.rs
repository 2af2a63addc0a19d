//! Data-parallel model wrapper.
//!
//! Wraps a [`Module`] so that every rank starts from rank 0's parameters
//! and every backward pass ends with gradients averaged across ranks.
//! After each optimizer step the replicas therefore stay identical.

use std::sync::Arc;

use tracing::debug;

use crate::distributed::communicator::Communicator;
use crate::distributed::grad_sync::{all_reduce_grads, broadcast_params};
use crate::error::Result;
use crate::nn::{Module, Parameter};
use crate::tensor::Tensor;

/// Data-parallel wrapper around a single-device module.
///
/// # Usage
///
/// ```ignore
/// let comm = init_process_group(&env, Backend::Tcp, timeout)?;
/// let mut model = DistributedDataParallel::new(Linear::new(20, 1, &mut rng)?, comm)?;
///
/// model.zero_grad();
/// let output = model.forward(&batch.inputs)?;
/// let (loss, grad) = loss_fn.compute(&output, &batch.targets)?;
/// model.backward(&batch.inputs, &grad)?; // gradients now averaged across ranks
/// optimizer.step(&mut model)?;
/// ```
pub struct DistributedDataParallel<M> {
    module: M,
    comm: Arc<dyn Communicator>,
}

impl<M: Module> DistributedDataParallel<M> {
    /// Wrap `module`, overwriting its parameters with rank 0's.
    ///
    /// Collective: every rank must call this.
    pub fn new(mut module: M, comm: Arc<dyn Communicator>) -> Result<Self> {
        broadcast_params(comm.as_ref(), &mut module, 0)?;
        debug!(
            rank = comm.rank(),
            parameters = module.num_parameters(),
            "parameters synchronized from rank 0"
        );
        Ok(Self { module, comm })
    }

    /// The wrapped single-device module.
    pub fn module(&self) -> &M {
        &self.module
    }

    pub fn module_mut(&mut self) -> &mut M {
        &mut self.module
    }

    /// Unwrap, returning the module.
    pub fn into_inner(self) -> M {
        self.module
    }

    /// Reference to the underlying communicator.
    pub fn communicator(&self) -> &dyn Communicator {
        self.comm.as_ref()
    }
}

impl<M: Module> Module for DistributedDataParallel<M> {
    fn parameters(&self) -> Vec<(String, &Parameter)> {
        self.module.parameters()
    }

    fn parameters_mut(&mut self) -> Vec<(String, &mut Parameter)> {
        self.module.parameters_mut()
    }

    fn forward(&self, input: &Tensor) -> Result<Tensor> {
        self.module.forward(input)
    }

    /// Local backward followed by a gradient all-reduce.
    ///
    /// Collective: every rank must call this once per step.
    fn backward(&mut self, input: &Tensor, grad_output: &Tensor) -> Result<Tensor> {
        let grad_input = self.module.backward(input, grad_output)?;
        all_reduce_grads(self.comm.as_ref(), &mut self.module)?;
        Ok(grad_input)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::distributed::communicator::LocalCommunicator;
    use crate::nn::Linear;

    #[test]
    fn test_single_rank_matches_inner() {
        let layer = Linear::from_tensors(
            Tensor::from_slice(&[1.0, -1.0], &[1, 2]).unwrap(),
            Tensor::from_slice(&[0.5], &[1]).unwrap(),
        )
        .unwrap();
        let mut reference = layer.clone();
        let mut ddp = DistributedDataParallel::new(layer, Arc::new(LocalCommunicator)).unwrap();

        let x = Tensor::from_slice(&[2.0, 1.0], &[1, 2]).unwrap();
        let g = Tensor::from_slice(&[1.0], &[1, 1]).unwrap();
        assert_eq!(ddp.forward(&x).unwrap(), reference.forward(&x).unwrap());

        ddp.backward(&x, &g).unwrap();
        reference.backward(&x, &g).unwrap();
        assert_eq!(ddp.module().weight().grad, reference.weight().grad);
        assert_eq!(ddp.state_dict(), reference.state_dict());
    }
}
