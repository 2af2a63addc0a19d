//! Collective communication interface.

use std::fmt;
use std::str::FromStr;

use crate::error::{Error, Result};

/// Element-wise reduction applied by `all_reduce`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReduceOp {
    Sum,
    Max,
    Min,
}

impl ReduceOp {
    /// Fold `src` into `acc` element-wise.
    pub fn apply(&self, acc: &mut [f32], src: &[f32]) {
        for (a, &s) in acc.iter_mut().zip(src) {
            *a = match self {
                ReduceOp::Sum => *a + s,
                ReduceOp::Max => a.max(s),
                ReduceOp::Min => a.min(s),
            };
        }
    }

    pub(crate) fn code(&self) -> u32 {
        match self {
            ReduceOp::Sum => 0,
            ReduceOp::Max => 1,
            ReduceOp::Min => 2,
        }
    }
}

/// Collective operations over a fixed group of ranks.
///
/// Every rank must issue the same collectives in the same order with
/// buffers of the same length; implementations detect and report a
/// mismatch instead of silently pairing unrelated buffers.
pub trait Communicator: Send + Sync {
    /// This process's rank in `0..world_size()`.
    fn rank(&self) -> usize;

    fn world_size(&self) -> usize;

    /// Reduce `data` across all ranks; every rank ends with the result.
    fn all_reduce(&self, data: &mut [f32], op: ReduceOp) -> Result<()>;

    /// Overwrite `data` on every rank with `root`'s buffer.
    fn broadcast(&self, data: &mut [f32], root: usize) -> Result<()>;

    /// Block until every rank has reached the barrier.
    fn barrier(&self) -> Result<()> {
        let mut token = [0.0f32];
        self.all_reduce(&mut token, ReduceOp::Sum)
    }

    /// Tear down the group. Later collectives fail.
    fn shutdown(&self) -> Result<()>;
}

/// Single-process group: every collective is the identity.
#[derive(Debug, Default, Clone, Copy)]
pub struct LocalCommunicator;

impl Communicator for LocalCommunicator {
    fn rank(&self) -> usize {
        0
    }

    fn world_size(&self) -> usize {
        1
    }

    fn all_reduce(&self, _data: &mut [f32], _op: ReduceOp) -> Result<()> {
        Ok(())
    }

    fn broadcast(&self, _data: &mut [f32], root: usize) -> Result<()> {
        if root != 0 {
            return Err(Error::distributed(format!(
                "broadcast root {root} out of range for world size 1"
            )));
        }
        Ok(())
    }

    fn shutdown(&self) -> Result<()> {
        Ok(())
    }
}

/// Which process-group implementation to start.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Backend {
    /// Star topology over TCP, rendezvous at `MASTER_ADDR:MASTER_PORT`.
    #[default]
    Tcp,
    /// In-process identity group; requires `WORLD_SIZE == 1`.
    Local,
}

impl fmt::Display for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Backend::Tcp => f.write_str("tcp"),
            Backend::Local => f.write_str("local"),
        }
    }
}

impl FromStr for Backend {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "tcp" => Ok(Backend::Tcp),
            "local" => Ok(Backend::Local),
            other => Err(Error::InvalidArgument {
                arg: "backend",
                reason: format!("unknown backend '{other}', expected 'tcp' or 'local'"),
            }),
        }
    }
}
