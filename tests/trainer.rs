use std::collections::HashSet;
use std::sync::Arc;

use ddptrain::data::{DistributedSampler, SamplerConfig};
use ddptrain::distributed::LocalCommunicator;
use ddptrain::nn::{Linear, Loss, Module};
use ddptrain::tensor::Tensor;
use ddptrain::trainer::{TrainingConfig, build_trainer, load_checkpoint};
use rand::SeedableRng;
use rand::rngs::StdRng;
use tempfile::TempDir;

fn config(dir: &TempDir) -> TrainingConfig {
    TrainingConfig::default()
        .with_dataset_size(96)
        .with_batch_size(32)
        .with_checkpoint_dir(dir.path().join("ckpt"))
}

#[test]
fn test_single_process_run_writes_checkpoints() {
    let dir = TempDir::new().unwrap();
    let config = config(&dir).with_save_every(5);
    let mut trainer = build_trainer(&config, Arc::new(LocalCommunicator), 0).unwrap();

    let history = trainer.train(config.total_epochs).unwrap();
    assert_eq!(history.len(), 10);
    assert!(history.iter().all(|m| m.steps == 3 && m.batch_size == 32));

    // Epochs 0 and 5 were saved.
    let (state, meta) = load_checkpoint(&config.checkpoint_dir).unwrap();
    assert_eq!(meta.epoch, 5);
    assert_eq!(meta.metadata["loss"], "cross-entropy");
    assert_eq!(state["weight"].shape(), &[1, 20]);
    assert_eq!(state["bias"].shape(), &[1]);
}

#[test]
fn test_checkpoint_restores_into_fresh_model() {
    let dir = TempDir::new().unwrap();
    let config = config(&dir).with_loss(Loss::Mse).with_lr(0.02).with_save_every(1);
    let mut trainer = build_trainer(&config, Arc::new(LocalCommunicator), 0).unwrap();
    trainer.train(3).unwrap();

    let (state, _) = load_checkpoint(&config.checkpoint_dir).unwrap();
    let mut rng = StdRng::seed_from_u64(42);
    let mut fresh = Linear::new(20, 1, &mut rng).unwrap();
    fresh.load_state_dict(&state).unwrap();
    assert_eq!(fresh.state_dict(), trainer.model().module().state_dict());

    let x = Tensor::from_vec(vec![0.25; 40], &[2, 20]).unwrap();
    assert_eq!(
        fresh.forward(&x).unwrap(),
        trainer.model().forward(&x).unwrap()
    );
}

#[test]
fn test_same_seed_same_weights() {
    let dir_a = TempDir::new().unwrap();
    let dir_b = TempDir::new().unwrap();
    let run = |dir: &TempDir| {
        let config = config(dir).with_loss(Loss::Mse).with_seed(7);
        let mut trainer = build_trainer(&config, Arc::new(LocalCommunicator), 0).unwrap();
        trainer.train(2).unwrap();
        trainer.model().module().state_dict()
    };
    assert_eq!(run(&dir_a), run(&dir_b));
}

#[test]
fn test_shards_cover_dataset_each_epoch() {
    let world_size = 4;
    for epoch in [0, 1, 7] {
        let mut seen = HashSet::new();
        for rank in 0..world_size {
            let mut sampler = DistributedSampler::new(
                103,
                SamplerConfig::default().with_rank(rank, world_size),
            )
            .unwrap();
            sampler.set_epoch(epoch);
            let indices = sampler.indices();
            assert_eq!(indices.len(), 26);
            seen.extend(indices);
        }
        assert_eq!(seen.len(), 103);
    }
}

#[test]
fn test_invalid_config_rejected() {
    let dir = TempDir::new().unwrap();
    let config = config(&dir).with_save_every(0);
    assert!(build_trainer(&config, Arc::new(LocalCommunicator), 0).is_err());
}
