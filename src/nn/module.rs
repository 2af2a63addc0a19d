//! Module trait for parameter access, gradients and serialization.

use std::collections::BTreeMap;

use crate::error::{Error, Result};
use crate::tensor::Tensor;

/// A trainable tensor and its accumulated gradient.
#[derive(Debug, Clone)]
pub struct Parameter {
    pub value: Tensor,
    pub grad: Tensor,
}

impl Parameter {
    pub fn new(value: Tensor) -> Self {
        let grad = Tensor::zeros(value.shape());
        Self { value, grad }
    }
}

/// Core trait for differentiable modules.
///
/// Parameters are always enumerated in name order. Every rank walks the
/// same list, which is what lets gradient all-reduce and parameter
/// broadcast pair buffers up by position.
pub trait Module: Send {
    /// Named parameters, sorted by name.
    fn parameters(&self) -> Vec<(String, &Parameter)>;

    /// Mutable named parameters, sorted by name.
    fn parameters_mut(&mut self) -> Vec<(String, &mut Parameter)>;

    /// `input: [batch, ...]` to `output: [batch, ...]`.
    fn forward(&self, input: &Tensor) -> Result<Tensor>;

    /// Accumulate parameter gradients for `forward(input)` given the loss
    /// gradient w.r.t. its output. Returns the gradient w.r.t. `input`.
    fn backward(&mut self, input: &Tensor, grad_output: &Tensor) -> Result<Tensor>;

    fn zero_grad(&mut self) {
        for (_, p) in self.parameters_mut() {
            p.grad.fill(0.0);
        }
    }

    /// Total number of scalar parameters.
    fn num_parameters(&self) -> usize {
        self.parameters().iter().map(|(_, p)| p.value.numel()).sum()
    }

    /// Export model state as name→tensor map.
    fn state_dict(&self) -> BTreeMap<String, Tensor> {
        self.parameters()
            .into_iter()
            .map(|(name, p)| (name, p.value.clone()))
            .collect()
    }

    /// Load state from a name→tensor map.
    ///
    /// Every parameter must be present with a matching shape; extra keys
    /// are rejected too.
    fn load_state_dict(&mut self, state: &BTreeMap<String, Tensor>) -> Result<()> {
        let mut params = self.parameters_mut();
        if let Some(extra) = state
            .keys()
            .find(|k| !params.iter().any(|(name, _)| name == *k))
        {
            return Err(Error::InvalidArgument {
                arg: "state",
                reason: format!("unexpected key '{extra}'"),
            });
        }
        for (name, p) in params.iter_mut() {
            let tensor = state.get(name.as_str()).ok_or_else(|| Error::InvalidArgument {
                arg: "state",
                reason: format!("missing key '{name}'"),
            })?;
            p.value.check_same_shape(tensor)?;
            p.value = tensor.clone();
        }
        Ok(())
    }
}
