//! Command-line entry points for the `ddptrain` binary.
//!
//! Without `--nproc-per-node` the process is a worker: it reads its place in
//! the job from the torchrun environment variables and trains. With it, the
//! process becomes a launcher that starts that many workers on this host.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use crate::distributed::{self, Backend, Communicator, WorkerEnv};
use crate::launch::{LaunchConfig, launch_local};
use crate::nn::Loss;
use crate::record::record_error;
use crate::trainer::{TrainingConfig, build_trainer};

/// Data-parallel training of a toy linear model.
#[derive(Parser, Debug, Clone, PartialEq)]
#[command(name = "ddptrain", version, about)]
pub struct Cli {
    /// Total epochs to train the model
    #[arg(long, alias = "total_epochs", default_value_t = 10)]
    pub total_epochs: u64,

    /// How often to save a snapshot, in epochs
    #[arg(long, alias = "save_every", default_value_t = 5)]
    pub save_every: u64,

    /// Input batch size on each device
    #[arg(long, alias = "batch_size", default_value_t = 32)]
    pub batch_size: usize,

    /// SGD learning rate
    #[arg(long, default_value_t = 1e-3)]
    pub lr: f64,

    /// Number of samples in the synthetic dataset
    #[arg(long, alias = "dataset_size", default_value_t = 2048)]
    pub dataset_size: usize,

    /// Seed for the dataset, model init and shuffling
    #[arg(long, default_value_t = 0)]
    pub seed: u64,

    /// Loss function: cross-entropy or mse
    #[arg(long, default_value = "cross-entropy")]
    pub loss: Loss,

    /// Directory checkpoints are written to
    #[arg(long, alias = "checkpoint_dir", default_value = "checkpoint")]
    pub checkpoint_dir: PathBuf,

    /// Process-group backend: tcp or local
    #[arg(long, default_value = "tcp")]
    pub backend: Backend,

    /// Visit each shard in a fixed order
    #[arg(long)]
    pub no_shuffle: bool,

    /// Seconds to wait for all ranks to join
    #[arg(long, default_value_t = 60)]
    pub connect_timeout_secs: u64,

    /// Spawn this many workers on the local host instead of training
    #[arg(long, alias = "nproc_per_node")]
    pub nproc_per_node: Option<usize>,

    /// Rendezvous address used by the local launcher
    #[arg(long, default_value = "127.0.0.1")]
    pub master_addr: String,

    /// Rendezvous port used by the local launcher
    #[arg(long, default_value_t = 29500)]
    pub master_port: u16,
}

impl Cli {
    pub fn to_training_config(&self) -> TrainingConfig {
        TrainingConfig::default()
            .with_total_epochs(self.total_epochs)
            .with_save_every(self.save_every)
            .with_batch_size(self.batch_size)
            .with_lr(self.lr)
            .with_dataset_size(self.dataset_size)
            .with_seed(self.seed)
            .with_shuffle(!self.no_shuffle)
            .with_loss(self.loss)
            .with_checkpoint_dir(&self.checkpoint_dir)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    /// Flags forwarded to each worker spawned by the launcher.
    pub fn worker_args(&self) -> Vec<String> {
        let mut args = vec![
            "--total-epochs".to_string(),
            self.total_epochs.to_string(),
            "--save-every".to_string(),
            self.save_every.to_string(),
            "--batch-size".to_string(),
            self.batch_size.to_string(),
            "--lr".to_string(),
            self.lr.to_string(),
            "--dataset-size".to_string(),
            self.dataset_size.to_string(),
            "--seed".to_string(),
            self.seed.to_string(),
            "--loss".to_string(),
            self.loss.to_string(),
            "--checkpoint-dir".to_string(),
            self.checkpoint_dir.display().to_string(),
            "--backend".to_string(),
            self.backend.to_string(),
            "--connect-timeout-secs".to_string(),
            self.connect_timeout_secs.to_string(),
        ];
        if self.no_shuffle {
            args.push("--no-shuffle".to_string());
        }
        args
    }
}

/// Install the global tracing subscriber. `RUST_LOG` overrides the
/// default `info` filter.
pub fn init_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .try_init();
}

/// Dispatch to the launcher or the worker.
pub fn run_command(cli: Cli) -> anyhow::Result<()> {
    match cli.nproc_per_node {
        Some(nproc) => run_launcher(&cli, nproc),
        None => run_worker(&cli),
    }
}

fn run_launcher(cli: &Cli, nproc: usize) -> anyhow::Result<()> {
    let program = std::env::current_exe().context("cannot locate the worker executable")?;
    let config = LaunchConfig::new(nproc, program)
        .with_master(cli.master_addr.clone(), cli.master_port)
        .with_args(cli.worker_args());
    launch_local(&config)?;
    Ok(())
}

/// Train as one rank of the job described by the environment.
///
/// A failure is also written to `TORCHELASTIC_ERROR_FILE` when the
/// launcher asked for one.
pub fn run_worker(cli: &Cli) -> anyhow::Result<()> {
    let mut rank = None;
    let result = train_worker(cli, &mut rank);
    if let Err(e) = &result {
        let message = format!("{e:#}");
        error!(rank = ?rank, "worker failed: {message}");
        if let Err(write_err) = record_error(&message, rank) {
            error!(error = %write_err, "could not write error file");
        }
    }
    result
}

fn train_worker(cli: &Cli, rank: &mut Option<usize>) -> anyhow::Result<()> {
    let env = WorkerEnv::from_env().context("reading worker environment")?;
    *rank = Some(env.rank);
    info!("{env}");

    let comm: Arc<dyn Communicator> =
        distributed::init_process_group(&env, cli.backend, cli.connect_timeout())
            .context("initializing process group")?;

    let config = cli.to_training_config();
    let mut trainer = build_trainer(&config, Arc::clone(&comm), env.local_rank)?;
    let history = trainer.train(config.total_epochs)?;
    if let Some(last) = history.last() {
        info!(rank = env.rank, epoch = last.epoch, loss = last.loss, "training finished");
    }

    distributed::destroy_process_group(comm.as_ref())?;
    Ok(())
}
