//! Multi-rank tests over loopback TCP. Each rank runs on its own thread.

use std::net::TcpListener;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use ddptrain::distributed::{
    Communicator, DistributedDataParallel, ReduceOp, TcpCommunicator, all_reduce_grads,
};
use ddptrain::nn::{Linear, Module};
use ddptrain::tensor::Tensor;
use ddptrain::trainer::{TrainingConfig, build_trainer, load_checkpoint};
use rand::SeedableRng;
use rand::rngs::StdRng;
use tempfile::TempDir;

const TIMEOUT: Duration = Duration::from_secs(10);

/// Run `f` once per rank of a fresh `world_size` group and collect the
/// results in rank order.
fn run_ranks<T, F>(world_size: usize, f: F) -> Vec<T>
where
    T: Send,
    F: Fn(Arc<dyn Communicator>) -> T + Sync,
{
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    let f = &f;

    thread::scope(|s| {
        let mut handles = Vec::with_capacity(world_size);
        handles.push(s.spawn(move || {
            let comm = TcpCommunicator::host(listener, world_size, TIMEOUT).unwrap();
            f(Arc::new(comm))
        }));
        for rank in 1..world_size {
            handles.push(s.spawn(move || {
                let comm = TcpCommunicator::connect(addr, rank, world_size, TIMEOUT).unwrap();
                f(Arc::new(comm))
            }));
        }
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    })
}

#[test]
fn test_all_reduce_sum_and_max() {
    let results = run_ranks(3, |comm| {
        let r = comm.rank() as f32;
        let mut sum = [r, 10.0 * r, 1.0];
        comm.all_reduce(&mut sum, ReduceOp::Sum).unwrap();
        let mut max = [r, -r];
        comm.all_reduce(&mut max, ReduceOp::Max).unwrap();
        let mut min = [r + 1.0];
        comm.all_reduce(&mut min, ReduceOp::Min).unwrap();
        (sum, max, min)
    });

    for (sum, max, min) in results {
        assert_eq!(sum, [3.0, 30.0, 3.0]);
        assert_eq!(max, [2.0, 0.0]);
        assert_eq!(min, [1.0]);
    }
}

#[test]
fn test_broadcast_from_non_zero_root() {
    let results = run_ranks(3, |comm| {
        let mut data = if comm.rank() == 2 {
            vec![7.0, 8.0, 9.0]
        } else {
            vec![0.0; 3]
        };
        comm.broadcast(&mut data, 2).unwrap();
        comm.barrier().unwrap();
        data
    });
    for data in results {
        assert_eq!(data, vec![7.0, 8.0, 9.0]);
    }
}

#[test]
fn test_mismatched_collectives_fail() {
    let results = run_ranks(2, |comm| {
        let len = if comm.rank() == 0 { 3 } else { 2 };
        let mut data = vec![1.0; len];
        let result = comm.all_reduce(&mut data, ReduceOp::Sum);
        // Closing here unblocks the peer if it is still waiting.
        comm.shutdown().unwrap();
        result.map_err(|e| e.to_string())
    });

    let err = results[0].as_ref().unwrap_err();
    assert!(err.contains("collective mismatch"), "{err}");
    assert!(results[1].is_err());
}

#[test]
fn test_ddp_keeps_replicas_identical() {
    let states = run_ranks(2, |comm| {
        // Different init on each rank; construction broadcasts rank 0's.
        let mut rng = StdRng::seed_from_u64(100 + comm.rank() as u64);
        let model = Linear::new(3, 2, &mut rng).unwrap();
        let mut ddp = DistributedDataParallel::new(model, comm.clone()).unwrap();
        let after_init = ddp.state_dict();

        // Each rank sees different data.
        let r = comm.rank() as f32 + 1.0;
        let input = Tensor::from_slice(&[r, 0.5 * r, -r, 1.0, 2.0, r], &[2, 3]).unwrap();
        let grad_out = Tensor::from_slice(&[r, -r, 0.5, 1.0], &[2, 2]).unwrap();
        ddp.zero_grad();
        ddp.forward(&input).unwrap();
        ddp.backward(&input, &grad_out).unwrap();

        let grads: Vec<Tensor> = ddp
            .parameters()
            .into_iter()
            .map(|(_, p)| p.grad.clone())
            .collect();
        (after_init, grads)
    });

    assert_eq!(states[0].0, states[1].0);
    assert_eq!(states[0].1, states[1].1);
}

#[test]
fn test_all_reduce_grads_averages() {
    let grads = run_ranks(2, |comm| {
        let mut rng = StdRng::seed_from_u64(0);
        let mut model = Linear::new(2, 1, &mut rng).unwrap();
        let g = comm.rank() as f32 * 2.0 + 1.0;
        for (_, p) in model.parameters_mut() {
            p.grad.fill(g);
        }
        all_reduce_grads(comm.as_ref(), &mut model).unwrap();
        model.weight().grad.to_vec()
    });
    // (1 + 3) / 2
    for g in grads {
        assert_eq!(g, vec![2.0, 2.0]);
    }
}

#[test]
fn test_two_rank_training_and_checkpoint() {
    let dir = TempDir::new().unwrap();
    let config = TrainingConfig::default()
        .with_dataset_size(50)
        .with_batch_size(8)
        .with_save_every(1)
        .with_loss(ddptrain::nn::Loss::Mse)
        .with_lr(0.01)
        .with_checkpoint_dir(dir.path());

    let results = run_ranks(2, |comm| {
        let mut trainer = build_trainer(&config, comm.clone(), comm.rank()).unwrap();
        // 50 samples over 2 ranks pads to 25 each: 4 batches of <= 8.
        assert_eq!(trainer.train_data().sampler().num_samples(), 25);
        assert_eq!(trainer.train_data().len(), 4);

        let history = trainer.train(2).unwrap();
        let save = trainer.save_checkpoint(9).map_err(|e| e.to_string());
        (history, trainer.model().module().state_dict(), save)
    });

    let (h0, w0, save0) = &results[0];
    let (h1, w1, save1) = &results[1];
    assert_eq!(w0, w1);
    assert_eq!(h0.len(), 2);
    assert_eq!(h0[1].loss, h1[1].loss);
    assert!(save0.is_ok());
    assert!(save1.as_ref().unwrap_err().contains("rank 0"));

    let (state, meta) = load_checkpoint(dir.path()).unwrap();
    assert_eq!(meta.epoch, 9);
    assert_eq!(meta.metadata["world_size"], "2");
    assert_eq!(&state, w0);
}
