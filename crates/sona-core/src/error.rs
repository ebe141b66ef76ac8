//! Error types for the spreading engine

use thiserror::Error;

/// Spreading engine error types
#[derive(Error, Debug)]
pub enum SpreadError {
    /// Invalid channel count
    #[error("Invalid channel count: expected {expected}, got {got}")]
    InvalidChannelCount { expected: usize, got: usize },

    /// Measurement set failed validation
    #[error("Invalid measurement set: {0}")]
    InvalidMeasurementSet(String),

    /// Invalid source index
    #[error("Invalid source index: {0}")]
    InvalidSourceIndex(usize),

    /// Unsupported configuration
    #[error("Unsupported configuration: {0}")]
    UnsupportedConfiguration(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Measurement file decode error
    #[error("Measurement decode error: {0}")]
    Decode(#[from] serde_json::Error),
}

/// Result type for spreading operations
pub type SpreadResult<T> = Result<T, SpreadError>;
