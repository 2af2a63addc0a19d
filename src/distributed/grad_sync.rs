//! Gradient synchronization and parameter broadcasting over a
//! [`Communicator`].
//!
//! Both helpers walk the module's parameters in name order, so every rank
//! issues the same sequence of collectives.

use crate::distributed::communicator::{Communicator, ReduceOp};
use crate::error::Result;
use crate::nn::Module;

/// AllReduce every parameter gradient (in-place sum, then average by world_size).
///
/// No-op when the group has a single rank.
pub fn all_reduce_grads<M: Module + ?Sized>(comm: &dyn Communicator, module: &mut M) -> Result<()> {
    let world_size = comm.world_size();
    if world_size <= 1 {
        return Ok(());
    }

    let scale = 1.0 / world_size as f32;
    for (_, param) in module.parameters_mut() {
        comm.all_reduce(param.grad.as_mut_slice(), ReduceOp::Sum)?;
        param.grad.scale(scale);
    }

    Ok(())
}

/// Broadcast all parameters from the root rank to all other ranks.
///
/// Ensures all ranks start with identical parameters before training begins.
pub fn broadcast_params<M: Module + ?Sized>(
    comm: &dyn Communicator,
    module: &mut M,
    root: usize,
) -> Result<()> {
    if comm.world_size() <= 1 {
        return Ok(());
    }

    for (_, param) in module.parameters_mut() {
        comm.broadcast(param.value.as_mut_slice(), root)?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::distributed::communicator::LocalCommunicator;
    use crate::nn::Linear;
    use crate::tensor::Tensor;

    fn layer() -> Linear {
        Linear::from_tensors(
            Tensor::from_slice(&[2.0, 4.0], &[1, 2]).unwrap(),
            Tensor::from_slice(&[6.0], &[1]).unwrap(),
        )
        .unwrap()
    }

    #[test]
    fn test_all_reduce_grads_noop_single_rank() {
        let mut l = layer();
        for (_, p) in l.parameters_mut() {
            p.grad.fill(3.0);
        }

        // world_size=1 -> early return, grads unchanged
        all_reduce_grads(&LocalCommunicator, &mut l).unwrap();
        assert_eq!(l.weight().grad.as_slice(), &[3.0, 3.0]);
        assert_eq!(l.bias().grad.as_slice(), &[3.0]);
    }

    #[test]
    fn test_broadcast_params_noop() {
        let mut l = layer();
        broadcast_params(&LocalCommunicator, &mut l, 0).unwrap();
        assert_eq!(l.weight().value.as_slice(), &[2.0, 4.0]);
    }
}
