//! ddptrain error types

/// ddptrain result type
pub type Result<T> = std::result::Result<T, Error>;

/// ddptrain errors
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Tensor shape does not match what an operation expects
    #[error("shape mismatch: expected {expected:?}, got {got:?}")]
    ShapeMismatch {
        /// Expected shape
        expected: Vec<usize>,
        /// Actual shape
        got: Vec<usize>,
    },

    /// Invalid argument to an operation
    #[error("invalid argument '{arg}': {reason}")]
    InvalidArgument {
        /// Argument name
        arg: &'static str,
        /// Why it's invalid
        reason: String,
    },

    /// Worker environment or CLI configuration error
    #[error("config error: {reason}")]
    ConfigError {
        /// Description of what went wrong
        reason: String,
    },

    /// Dataset, sampler or loader error
    #[error("data error: {reason}")]
    DataError {
        /// Description of what went wrong
        reason: String,
    },

    /// Training/optimizer error
    #[error("training error: {reason}")]
    TrainingError {
        /// Description of what went wrong
        reason: String,
    },

    /// Checkpoint save/load error
    #[error("checkpoint error: {reason}")]
    CheckpointError {
        /// Description of what went wrong
        reason: String,
    },

    /// Distributed communication error
    #[error("distributed error: {reason}")]
    DistributedError {
        /// Description of what went wrong
        reason: String,
    },

    /// I/O error
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// JSON (de)serialization error
    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl Error {
    pub(crate) fn distributed(reason: impl Into<String>) -> Self {
        Error::DistributedError {
            reason: reason.into(),
        }
    }
}
