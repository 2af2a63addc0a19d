//! ddptrain CLI
//!
//! # Usage
//!
//! ```bash
//! # One worker per process, topology from the torchrun environment
//! torchrun --nproc_per_node=4 ddptrain --total-epochs 10 --save-every 5
//!
//! # Built-in launcher on a single host
//! ddptrain --nproc-per-node 4 --total-epochs 10 --batch-size 32
//!
//! # Single process, no networking
//! RANK=0 LOCAL_RANK=0 WORLD_SIZE=1 LOCAL_WORLD_SIZE=1 \
//!   MASTER_ADDR=127.0.0.1 MASTER_PORT=29500 ddptrain --backend local
//! ```

use clap::Parser;
use ddptrain::cli::{Cli, init_logging, run_command};
use std::process::ExitCode;

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging();

    match run_command(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e:#}");
            ExitCode::FAILURE
        }
    }
}
