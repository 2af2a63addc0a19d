//! Single-node launcher.
//!
//! Spawns one worker process per local rank with the rendezvous
//! environment a torchrun-style launcher would export, then waits for all
//! of them. The first worker to fail takes the rest down, and its error
//! report (if it wrote one) becomes the launcher's error.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Child, Command};
use std::thread;
use std::time::Duration;

use tempfile::TempDir;
use tracing::{error, info, warn};

use crate::distributed::env;
use crate::error::{Error, Result};
use crate::record::{ERROR_FILE_ENV, ErrorReport};

const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// How to start the local workers.
#[derive(Debug, Clone)]
pub struct LaunchConfig {
    pub nproc_per_node: usize,
    pub master_addr: String,
    pub master_port: u16,
    /// Worker executable.
    pub program: PathBuf,
    /// Arguments passed to every worker.
    pub args: Vec<String>,
    /// Where workers drop their error reports. `None` uses a scratch
    /// directory that is removed when the launch ends.
    pub error_dir: Option<PathBuf>,
}

impl LaunchConfig {
    pub fn new(nproc_per_node: usize, program: impl Into<PathBuf>) -> Self {
        Self {
            nproc_per_node,
            master_addr: "127.0.0.1".to_string(),
            master_port: 29500,
            program: program.into(),
            args: Vec::new(),
            error_dir: None,
        }
    }

    pub fn with_master(mut self, addr: impl Into<String>, port: u16) -> Self {
        self.master_addr = addr.into();
        self.master_port = port;
        self
    }

    pub fn with_args(mut self, args: Vec<String>) -> Self {
        self.args = args;
        self
    }

    pub fn with_error_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.error_dir = Some(dir.into());
        self
    }

    /// Environment for the worker with local rank `local_rank`, reporting
    /// failures under `error_dir`.
    pub fn worker_env(&self, local_rank: usize, error_dir: &Path) -> Vec<(String, String)> {
        let n = self.nproc_per_node.to_string();
        vec![
            (env::LOCAL_RANK.to_string(), local_rank.to_string()),
            (env::LOCAL_WORLD_SIZE.to_string(), n.clone()),
            (env::RANK.to_string(), local_rank.to_string()),
            (env::WORLD_SIZE.to_string(), n),
            (env::MASTER_ADDR.to_string(), self.master_addr.clone()),
            (env::MASTER_PORT.to_string(), self.master_port.to_string()),
            (
                ERROR_FILE_ENV.to_string(),
                error_file(error_dir, local_rank).display().to_string(),
            ),
        ]
    }
}

/// Run `nproc_per_node` workers to completion.
pub fn launch_local(config: &LaunchConfig) -> Result<()> {
    if config.nproc_per_node == 0 {
        return Err(Error::ConfigError {
            reason: "nproc_per_node must be >= 1".to_string(),
        });
    }
    let scratch: TempDir;
    let error_dir: &Path = match &config.error_dir {
        Some(dir) => {
            fs::create_dir_all(dir)?;
            dir
        }
        None => {
            scratch = tempfile::Builder::new().prefix("ddptrain-").tempdir()?;
            scratch.path()
        }
    };
    info!(
        nproc = config.nproc_per_node,
        master = %format!("{}:{}", config.master_addr, config.master_port),
        program = %config.program.display(),
        "launching workers"
    );

    let mut children: Vec<Option<Child>> = Vec::with_capacity(config.nproc_per_node);
    for rank in 0..config.nproc_per_node {
        let _ = fs::remove_file(error_file(error_dir, rank));
        let spawned = Command::new(&config.program)
            .args(&config.args)
            .envs(config.worker_env(rank, error_dir))
            .spawn();
        match spawned {
            Ok(child) => children.push(Some(child)),
            Err(e) => {
                terminate(&mut children);
                return Err(Error::ConfigError {
                    reason: format!("failed to spawn rank {rank}: {e}"),
                });
            }
        }
    }

    let mut running = config.nproc_per_node;
    while running > 0 {
        for rank in 0..children.len() {
            let Some(child) = children[rank].as_mut() else {
                continue;
            };
            let Some(status) = child.try_wait()? else {
                continue;
            };
            children[rank] = None;
            running -= 1;
            if status.success() {
                info!(rank, "worker finished");
                continue;
            }

            error!(rank, %status, "worker failed, stopping the others");
            terminate(&mut children);
            let cause = match read_report(error_dir, rank) {
                Some(report) => report.message,
                None => format!("exited with {status}"),
            };
            return Err(Error::TrainingError {
                reason: format!("rank {rank} failed: {cause}"),
            });
        }
        if running > 0 {
            thread::sleep(POLL_INTERVAL);
        }
    }

    Ok(())
}

fn error_file(dir: &Path, rank: usize) -> PathBuf {
    dir.join(format!("rank_{rank}.json"))
}

fn read_report(dir: &Path, rank: usize) -> Option<ErrorReport> {
    let raw = fs::read_to_string(error_file(dir, rank)).ok()?;
    serde_json::from_str(&raw).ok()
}

fn terminate(children: &mut [Option<Child>]) {
    for (rank, slot) in children.iter_mut().enumerate() {
        if let Some(mut child) = slot.take() {
            if let Err(e) = child.kill() {
                warn!(rank, error = %e, "kill failed");
            }
            let _ = child.wait();
        }
    }
}
