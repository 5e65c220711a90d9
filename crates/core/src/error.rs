//! Core error types

use thiserror::Error;

/// Core error type for Tracekeep
#[derive(Debug, Error)]
pub enum CoreError {
    /// Configuration could not be parsed or failed validation
    #[error("Configuration error: {0}")]
    Config(String),

    /// Epoch clock parameters are inconsistent
    #[error("Invalid epoch clock: {0}")]
    EpochClock(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for core operations.
pub type CoreResult<T> = Result<T, CoreError>;
