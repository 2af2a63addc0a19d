pub mod checkpoint;
pub mod config;
pub mod runner;

pub use checkpoint::{TrainingState, load_checkpoint, save_checkpoint};
pub use config::{EpochMetrics, TrainingConfig};
pub use runner::{Trainer, build_trainer, load_train_objs, prepare_dataloader};
