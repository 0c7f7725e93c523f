//! Error handling primitives shared across the crate.

use std::path::PathBuf;

use thiserror::Error;

/// Stable error codes used for structured logs and the process exit status.
#[repr(u32)]
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum ErrorCode {
    /// Success code used as a sentinel.
    Ok = 0,
    /// Startup configuration was rejected.
    InvalidConfig = 1,
    /// Dataset could not be located or loaded.
    Dataset = 2,
    /// Checkpoint listing or restore failed.
    Checkpoint = 3,
    /// Network selection or forward pass failed.
    Model = 4,
    /// Preprocessing selection or execution failed.
    Preprocess = 5,
    /// Filesystem or serialisation failure.
    Io = 6,
    /// Catch-all for bugs and worker failures.
    Internal = 7,
}

/// Canonical error type for the crate.
#[derive(Error, Debug)]
pub enum EvalError {
    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("unknown dataset '{0}'")]
    UnknownDataset(String),

    #[error("dataset error: {0}")]
    Dataset(String),

    #[error("dataset is empty but {0} batches were requested")]
    EmptyDataset(usize),

    #[error("checkpoint '{path}': {reason}")]
    Checkpoint { path: PathBuf, reason: String },

    #[error("unknown network '{0}'")]
    UnknownNetwork(String),

    #[error("checkpoint is missing variable '{0}'")]
    MissingVariable(String),

    #[error("shape mismatch for '{name}': expected {expected:?}, found {found:?}")]
    Shape {
        name: String,
        expected: Vec<usize>,
        found: Vec<usize>,
    },

    #[error("unknown preprocessing '{0}'")]
    UnknownPreprocessing(String),

    #[error("failed to decode image '{path}': {source}")]
    Image {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("internal error: {0}")]
    Internal(String),
}

/// Result alias used throughout the crate.
pub type EvalResult<T> = Result<T, EvalError>;

impl EvalError {
    /// Validation helper.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Checkpoint helper.
    pub fn checkpoint(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Self::Checkpoint {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// Internal error helper.
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Machine readable code for this error.
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::Config(_) => ErrorCode::InvalidConfig,
            Self::UnknownDataset(_) | Self::Dataset(_) | Self::EmptyDataset(_) => {
                ErrorCode::Dataset
            }
            Self::Checkpoint { .. } | Self::MissingVariable(_) => ErrorCode::Checkpoint,
            Self::UnknownNetwork(_) | Self::Shape { .. } => ErrorCode::Model,
            Self::UnknownPreprocessing(_) | Self::Image { .. } => ErrorCode::Preprocess,
            Self::Io(_) | Self::Serialization(_) => ErrorCode::Io,
            Self::Internal(_) => ErrorCode::Internal,
        }
    }
}
