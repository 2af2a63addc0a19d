pub mod sgd;
pub mod traits;

pub use sgd::{Sgd, SgdConfig};
pub use traits::Optimizer;
