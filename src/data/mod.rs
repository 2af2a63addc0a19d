pub mod collate;
pub mod dataset;
pub mod loader;
pub mod sampler;

pub use dataset::{Batch, Dataset, RandomRegressionDataset, Sample};
pub use loader::DataLoader;
pub use sampler::{DistributedSampler, SamplerConfig};
