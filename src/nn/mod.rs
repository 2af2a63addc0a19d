pub mod linear;
pub mod loss;
pub mod module;

pub use linear::Linear;
pub use loss::{Loss, cross_entropy_loss, mse_loss};
pub use module::{Module, Parameter};
