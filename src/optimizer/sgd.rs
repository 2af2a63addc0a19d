//! SGD optimizer with momentum
//!
//! Implements stochastic gradient descent with optional momentum and weight decay.
//! Follows PyTorch's SGD semantics with Nesterov momentum support.

use std::collections::HashMap;
use std::collections::hash_map::Entry;

use crate::error::{Error, Result};
use crate::nn::Module;
use crate::optimizer::traits::Optimizer;
use crate::tensor::Tensor;

/// SGD configuration
#[derive(Debug, Clone)]
pub struct SgdConfig {
    pub lr: f64,
    pub momentum: f64,
    pub weight_decay: f64,
    pub dampening: f64,
    pub nesterov: bool,
}

impl Default for SgdConfig {
    fn default() -> Self {
        Self {
            lr: 0.01,
            momentum: 0.0,
            weight_decay: 0.0,
            dampening: 0.0,
            nesterov: false,
        }
    }
}

impl SgdConfig {
    pub fn with_lr(mut self, lr: f64) -> Self {
        self.lr = lr;
        self
    }

    pub fn with_momentum(mut self, momentum: f64) -> Self {
        self.momentum = momentum;
        self
    }

    pub fn with_weight_decay(mut self, wd: f64) -> Self {
        self.weight_decay = wd;
        self
    }

    pub fn with_nesterov(mut self, nesterov: bool) -> Self {
        self.nesterov = nesterov;
        self
    }
}

/// SGD optimizer with optional momentum
///
/// When `momentum > 0`, maintains a velocity buffer per named parameter.
///
/// Update rules (following PyTorch):
/// - L2 weight decay: `grad = grad + weight_decay * param`
/// - Momentum: `buf = momentum * buf + (1 - dampening) * grad`
///   (the first step initializes `buf = grad`)
/// - Nesterov: `update = grad + momentum * buf`
/// - Standard: `update = buf`
/// - Parameter: `param = param - lr * update`
pub struct Sgd {
    config: SgdConfig,
    velocity: HashMap<String, Tensor>,
}

impl Sgd {
    pub fn new(config: SgdConfig) -> Result<Self> {
        if config.lr < 0.0 {
            return Err(Error::TrainingError {
                reason: format!("learning rate must be >= 0, got {}", config.lr),
            });
        }
        if config.nesterov && (config.momentum <= 0.0 || config.dampening != 0.0) {
            return Err(Error::TrainingError {
                reason: "nesterov momentum requires momentum > 0 and zero dampening".to_string(),
            });
        }
        Ok(Self {
            config,
            velocity: HashMap::new(),
        })
    }

    pub fn config(&self) -> &SgdConfig {
        &self.config
    }
}

impl Optimizer for Sgd {
    fn step<M: Module + ?Sized>(&mut self, module: &mut M) -> Result<()> {
        let lr = self.config.lr as f32;
        let momentum = self.config.momentum as f32;
        let wd = self.config.weight_decay as f32;
        let dampening = self.config.dampening as f32;
        let nesterov = self.config.nesterov;

        for (name, param) in module.parameters_mut() {
            let mut update = param.grad.clone();
            if wd != 0.0 {
                update.axpy(wd, &param.value)?;
            }

            if momentum > 0.0 {
                let buf = match self.velocity.entry(name) {
                    Entry::Occupied(entry) => {
                        let buf = entry.into_mut();
                        buf.scale(momentum);
                        buf.axpy(1.0 - dampening, &update)?;
                        buf
                    }
                    Entry::Vacant(entry) => entry.insert(update.clone()),
                };
                if nesterov {
                    update.axpy(momentum, buf)?;
                } else {
                    update = buf.clone();
                }
            }

            param.value.axpy(-lr, &update)?;
        }

        Ok(())
    }

    fn set_lr(&mut self, lr: f64) {
        self.config.lr = lr;
    }

    fn lr(&self) -> f64 {
        self.config.lr
    }

    fn reset(&mut self) {
        self.velocity.clear();
    }
}
