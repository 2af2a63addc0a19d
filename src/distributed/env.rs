//! Worker topology from the launcher's environment.
//!
//! Workers are started by a torchrun-compatible launcher (or by this
//! crate's own local launcher) that exports rank and rendezvous
//! information as environment variables.

use std::fmt;
use std::str::FromStr;

use crate::error::{Error, Result};

pub const LOCAL_RANK: &str = "LOCAL_RANK";
pub const LOCAL_WORLD_SIZE: &str = "LOCAL_WORLD_SIZE";
pub const RANK: &str = "RANK";
pub const WORLD_SIZE: &str = "WORLD_SIZE";
pub const MASTER_ADDR: &str = "MASTER_ADDR";
pub const MASTER_PORT: &str = "MASTER_PORT";
pub const NODE_NAME: &str = "SLURMD_NODENAME";

/// Where this worker sits in the job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerEnv {
    pub node_name: Option<String>,
    pub local_rank: usize,
    pub local_world_size: usize,
    pub rank: usize,
    pub world_size: usize,
    pub master_addr: String,
    pub master_port: u16,
}

impl WorkerEnv {
    /// Read the worker environment of the current process.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = Self {
            node_name: lookup(NODE_NAME),
            local_rank: required(&lookup, LOCAL_RANK)?,
            local_world_size: required(&lookup, LOCAL_WORLD_SIZE)?,
            rank: required(&lookup, RANK)?,
            world_size: required(&lookup, WORLD_SIZE)?,
            master_addr: required(&lookup, MASTER_ADDR)?,
            master_port: required(&lookup, MASTER_PORT)?,
        };
        env.validate()?;
        Ok(env)
    }

    pub fn validate(&self) -> Result<()> {
        if self.world_size == 0 || self.local_world_size == 0 {
            return Err(Error::ConfigError {
                reason: format!(
                    "{WORLD_SIZE} and {LOCAL_WORLD_SIZE} must be > 0, got {} and {}",
                    self.world_size, self.local_world_size
                ),
            });
        }
        if self.rank >= self.world_size {
            return Err(Error::ConfigError {
                reason: format!("{RANK} {} >= {WORLD_SIZE} {}", self.rank, self.world_size),
            });
        }
        if self.local_rank >= self.local_world_size {
            return Err(Error::ConfigError {
                reason: format!(
                    "{LOCAL_RANK} {} >= {LOCAL_WORLD_SIZE} {}",
                    self.local_rank, self.local_world_size
                ),
            });
        }
        if self.local_world_size > self.world_size {
            return Err(Error::ConfigError {
                reason: format!(
                    "{LOCAL_WORLD_SIZE} {} > {WORLD_SIZE} {}",
                    self.local_world_size, self.world_size
                ),
            });
        }
        Ok(())
    }

    /// Whether this worker owns checkpointing and progress output.
    pub fn is_primary(&self) -> bool {
        self.rank == 0
    }

    /// `host:port` of the rendezvous endpoint.
    pub fn master_endpoint(&self) -> String {
        format!("{}:{}", self.master_addr, self.master_port)
    }
}

fn required<F, T>(lookup: &F, key: &str) -> Result<T>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: fmt::Display,
{
    let raw = lookup(key).ok_or_else(|| Error::ConfigError {
        reason: format!("environment variable {key} is not set"),
    })?;
    raw.trim().parse().map_err(|e| Error::ConfigError {
        reason: format!("environment variable {key}={raw:?} is invalid: {e}"),
    })
}

impl fmt::Display for WorkerEnv {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "### Worker info ###")?;
        match &self.node_name {
            Some(name) => writeln!(f, "node name: {name}")?,
            None => writeln!(f, "node name: None")?,
        }
        writeln!(f, "local rank: {}", self.local_rank)?;
        writeln!(f, "local world size: {}", self.local_world_size)?;
        writeln!(f, "rank: {}", self.rank)?;
        writeln!(f, "world size: {}", self.world_size)?;
        writeln!(f, "master address: {}", self.master_addr)?;
        write!(f, "master port: {}", self.master_port)
    }
}
