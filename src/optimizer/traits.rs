//! Optimizer trait abstraction
//!
//! Defines a common interface for optimizers so the trainer does not
//! hardcode a specific one.

use crate::error::Result;
use crate::nn::Module;

/// Trait for parameter optimizers.
pub trait Optimizer {
    /// Perform one optimization step.
    ///
    /// Updates every parameter of `module` from its accumulated gradient.
    /// Clearing gradients is the caller's job (`Module::zero_grad`).
    fn step<M: Module + ?Sized>(&mut self, module: &mut M) -> Result<()>;

    /// Set the learning rate.
    fn set_lr(&mut self, lr: f64);

    /// Get the current learning rate.
    fn lr(&self) -> f64;

    /// Reset all optimizer state (velocities).
    fn reset(&mut self);
}
