//! Epoch loop for data-parallel training.
//!
//! Every rank runs the same loop over its own shard of the data. Ranks stay
//! in lockstep through the collectives inside `DistributedDataParallel`;
//! only rank 0 prints the epoch banner and writes checkpoints.

use std::path::PathBuf;
use std::sync::Arc;

use rand::SeedableRng;
use rand::rngs::StdRng;
use tracing::{debug, info};

use crate::data::{
    Batch, DataLoader, Dataset, DistributedSampler, RandomRegressionDataset, SamplerConfig,
};
use crate::distributed::{Communicator, DistributedDataParallel, ReduceOp};
use crate::error::{Error, Result};
use crate::nn::{Linear, Loss, Module};
use crate::optimizer::{Optimizer, Sgd, SgdConfig};
use crate::trainer::checkpoint::{TrainingState, save_checkpoint};
use crate::trainer::config::{EpochMetrics, TrainingConfig};

/// Build the dataset, model and optimizer.
///
/// The dataset is seeded from `config.seed` alone, so it is identical on
/// every rank. The model init also mixes in `rank`; wrapping the model in
/// `DistributedDataParallel` replaces every replica with rank 0's weights.
pub fn load_train_objs(
    config: &TrainingConfig,
    rank: usize,
) -> Result<(RandomRegressionDataset, Linear, Sgd)> {
    let dataset = RandomRegressionDataset::new(
        config.dataset_size,
        config.in_features,
        config.out_features,
        config.seed,
    )?;
    let mut rng = StdRng::seed_from_u64(config.seed.wrapping_add(1 + rank as u64));
    let model = Linear::new(config.in_features, config.out_features, &mut rng)?;
    let optimizer = Sgd::new(SgdConfig::default().with_lr(config.learning_rate))?;
    Ok((dataset, model, optimizer))
}

/// Wrap `dataset` in a loader that visits only this rank's shard.
pub fn prepare_dataloader<D: Dataset>(
    dataset: D,
    batch_size: usize,
    sampler: SamplerConfig,
) -> Result<DataLoader<D>> {
    let sampler = DistributedSampler::new(dataset.len(), sampler)?;
    DataLoader::new(dataset, batch_size, sampler)
}

/// Data-parallel trainer.
pub struct Trainer<M, D> {
    model: DistributedDataParallel<M>,
    train_data: DataLoader<D>,
    optimizer: Sgd,
    loss: Loss,
    local_rank: usize,
    rank: usize,
    save_every: u64,
    checkpoint_dir: PathBuf,
}

impl<M: Module, D: Dataset> Trainer<M, D> {
    /// Wrap `model` for gradient synchronization over `comm`.
    ///
    /// Collective: broadcasts rank 0's parameters.
    pub fn new(
        model: M,
        train_data: DataLoader<D>,
        optimizer: Sgd,
        comm: Arc<dyn Communicator>,
        local_rank: usize,
        config: &TrainingConfig,
    ) -> Result<Self> {
        config.validate()?;
        let rank = comm.rank();
        let model = DistributedDataParallel::new(model, comm)?;
        Ok(Self {
            model,
            train_data,
            optimizer,
            loss: config.loss,
            local_rank,
            rank,
            save_every: config.save_every,
            checkpoint_dir: config.checkpoint_dir.clone(),
        })
    }

    pub fn model(&self) -> &DistributedDataParallel<M> {
        &self.model
    }

    pub fn train_data(&self) -> &DataLoader<D> {
        &self.train_data
    }

    pub fn rank(&self) -> usize {
        self.rank
    }

    pub fn local_rank(&self) -> usize {
        self.local_rank
    }

    /// One optimizer step on `batch`. Returns the local batch loss.
    pub fn run_batch(&mut self, batch: &Batch) -> Result<f64> {
        step_batch(&mut self.model, &mut self.optimizer, self.loss, batch)
    }

    /// One pass over this rank's shard.
    ///
    /// Reshuffles the shard for `epoch` first. The returned loss is the
    /// mean batch loss averaged over all ranks.
    pub fn run_epoch(&mut self, epoch: u64) -> Result<EpochMetrics> {
        let batch_size = self
            .train_data
            .batch_size()
            .min(self.train_data.sampler().num_samples());
        let steps = self.train_data.len();
        if self.rank == 0 {
            info!(
                "[GPU{}] Epoch {} | Batchsize: {} | Steps: {}",
                self.rank, epoch, batch_size, steps
            );
        }

        self.train_data.sampler_mut().set_epoch(epoch);

        let mut loss_sum = 0.0f64;
        for batch in self.train_data.iter() {
            let batch = batch?;
            loss_sum += step_batch(&mut self.model, &mut self.optimizer, self.loss, &batch)?;
        }

        let mut totals = [loss_sum as f32, steps as f32];
        self.model
            .communicator()
            .all_reduce(&mut totals, ReduceOp::Sum)?;
        let loss = if totals[1] > 0.0 {
            (totals[0] / totals[1]) as f64
        } else {
            0.0
        };
        debug!(rank = self.rank, epoch, loss, "epoch finished");

        Ok(EpochMetrics {
            epoch,
            steps,
            batch_size,
            loss,
        })
    }

    /// Write the unwrapped model's weights. Rank 0 only.
    pub fn save_checkpoint(&self, epoch: u64) -> Result<PathBuf> {
        if self.rank != 0 {
            return Err(Error::TrainingError {
                reason: format!(
                    "checkpoint must only be saved on rank 0, called on rank {}",
                    self.rank
                ),
            });
        }
        let state = TrainingState::new(epoch, self.optimizer.lr())
            .with_metadata("world_size", self.model.communicator().world_size())
            .with_metadata("loss", self.loss);
        let path = save_checkpoint(
            &self.checkpoint_dir,
            &self.model.module().state_dict(),
            &state,
        )?;
        info!("Epoch {} | Training checkpoint saved at {}", epoch, path.display());
        Ok(path)
    }

    /// Run `max_epochs` epochs, checkpointing on rank 0 every
    /// `save_every` epochs (epoch 0 included).
    pub fn train(&mut self, max_epochs: u64) -> Result<Vec<EpochMetrics>> {
        let mut history = Vec::new();
        for epoch in 0..max_epochs {
            let metrics = self.run_epoch(epoch)?;
            if self.rank == 0 && epoch % self.save_every == 0 {
                self.save_checkpoint(epoch)?;
            }
            history.push(metrics);
        }
        Ok(history)
    }
}

fn step_batch<M: Module>(
    model: &mut DistributedDataParallel<M>,
    optimizer: &mut Sgd,
    loss_fn: Loss,
    batch: &Batch,
) -> Result<f64> {
    model.zero_grad();
    let output = model.forward(&batch.inputs)?;
    let (loss, grad_output) = loss_fn.compute(&output, &batch.targets)?;
    model.backward(&batch.inputs, &grad_output)?;
    optimizer.step(model)?;
    Ok(loss)
}

/// Assemble the default job: toy dataset, linear model, SGD and a loader
/// over this rank's shard.
pub fn build_trainer(
    config: &TrainingConfig,
    comm: Arc<dyn Communicator>,
    local_rank: usize,
) -> Result<Trainer<Linear, RandomRegressionDataset>> {
    config.validate()?;
    let (dataset, model, optimizer) = load_train_objs(config, comm.rank())?;
    let sampler = SamplerConfig::default()
        .with_rank(comm.rank(), comm.world_size())
        .with_shuffle(config.shuffle)
        .with_seed(config.seed);
    let train_data = prepare_dataloader(dataset, config.batch_size, sampler)?;
    Trainer::new(model, train_data, optimizer, comm, local_rank, config)
}
