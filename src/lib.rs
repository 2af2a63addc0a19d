//! # ddptrain
//!
//! **Data-parallel training of a small model across processes.**
//!
//! Every process (rank) holds a full replica of the model and trains on its
//! own shard of the dataset. After each backward pass the gradients are
//! averaged over all ranks, so the replicas stay identical step by step.
//!
//! ```text
//! ┌────────────────────────────────────────────────────────────┐
//! │  cli / launch      torchrun env, local launcher, @record   │
//! ├────────────────────────────────────────────────────────────┤
//! │  trainer           epoch loop, rank-0 checkpoints          │
//! ├──────────────────────────┬─────────────────────────────────┤
//! │  data                    │  distributed                    │
//! │  dataset, sampler,       │  process group, all-reduce,     │
//! │  loader                  │  broadcast, DDP wrapper         │
//! ├──────────────────────────┴─────────────────────────────────┤
//! │  nn / optimizer / tensor   Linear, losses, SGD             │
//! └────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Design
//!
//! - **Lockstep collectives**: parameters are visited in name order and every
//!   shard has the same number of batches, so all ranks issue the same
//!   sequence of all-reduces.
//! - **Star process group**: rank 0 binds `MASTER_ADDR:MASTER_PORT`, the
//!   other ranks connect to it. Reductions are summed in rank order, so every
//!   rank sees bit-identical results.
//! - **Rank-0 side effects**: only rank 0 logs the epoch banner and writes
//!   checkpoints.

pub mod cli;
pub mod data;
pub mod distributed;
pub mod error;
pub mod launch;
pub mod nn;
pub mod optimizer;
pub mod record;
pub mod tensor;
pub mod trainer;

pub use error::{Error, Result};
pub use tensor::Tensor;
