pub mod communicator;
pub mod ddp;
pub mod env;
pub mod grad_sync;
pub mod tcp;

use std::net::TcpListener;
use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use crate::error::{Error, Result};

pub use communicator::{Backend, Communicator, LocalCommunicator, ReduceOp};
pub use ddp::DistributedDataParallel;
pub use env::WorkerEnv;
pub use grad_sync::{all_reduce_grads, broadcast_params};
pub use tcp::TcpCommunicator;

/// Join the process group described by `env`.
///
/// With [`Backend::Tcp`], rank 0 binds `MASTER_ADDR:MASTER_PORT` and the
/// call returns on every rank only once all `WORLD_SIZE` ranks have joined
/// (or `timeout` expires).
pub fn init_process_group(
    env: &WorkerEnv,
    backend: Backend,
    timeout: Duration,
) -> Result<Arc<dyn Communicator>> {
    info!(
        rank = env.rank,
        world_size = env.world_size,
        %backend,
        endpoint = %env.master_endpoint(),
        "initializing process group"
    );
    match backend {
        Backend::Local => {
            if env.world_size != 1 {
                return Err(Error::ConfigError {
                    reason: format!(
                        "backend 'local' supports a single process, WORLD_SIZE is {}",
                        env.world_size
                    ),
                });
            }
            Ok(Arc::new(LocalCommunicator))
        }
        Backend::Tcp if env.rank == 0 => {
            let listener = TcpListener::bind((env.master_addr.as_str(), env.master_port))
                .map_err(|e| {
                    Error::distributed(format!("bind {}: {e}", env.master_endpoint()))
                })?;
            Ok(Arc::new(TcpCommunicator::host(
                listener,
                env.world_size,
                timeout,
            )?))
        }
        Backend::Tcp => Ok(Arc::new(TcpCommunicator::connect(
            (env.master_addr.as_str(), env.master_port),
            env.rank,
            env.world_size,
            timeout,
        )?)),
    }
}

/// Leave the process group. Collectives on `comm` fail afterwards.
pub fn destroy_process_group(comm: &dyn Communicator) -> Result<()> {
    comm.shutdown()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn single(port: u16) -> WorkerEnv {
        WorkerEnv {
            node_name: None,
            local_rank: 0,
            local_world_size: 1,
            rank: 0,
            world_size: 1,
            master_addr: "127.0.0.1".to_string(),
            master_port: port,
        }
    }

    #[test]
    fn test_local_backend_single_process_only() {
        let comm = init_process_group(&single(0), Backend::Local, Duration::from_secs(1)).unwrap();
        assert_eq!((comm.rank(), comm.world_size()), (0, 1));
        destroy_process_group(comm.as_ref()).unwrap();

        let mut env = single(0);
        env.world_size = 2;
        env.local_world_size = 2;
        assert!(init_process_group(&env, Backend::Local, Duration::from_secs(1)).is_err());
    }

    #[test]
    fn test_tcp_single_rank_binds_and_runs() {
        // Port 0 lets the OS pick a free port.
        let comm = init_process_group(&single(0), Backend::Tcp, Duration::from_secs(1)).unwrap();
        let mut data = [1.5f32];
        comm.all_reduce(&mut data, ReduceOp::Max).unwrap();
        assert_eq!(data, [1.5]);
        destroy_process_group(comm.as_ref()).unwrap();
        assert!(comm.barrier().is_err());
    }
}
