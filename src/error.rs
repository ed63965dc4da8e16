//! Error types for the Botthrottle service.

use thiserror::Error;

/// Main error type for Botthrottle operations.
///
/// Only configuration loading and server startup can fail; request
/// evaluation always produces a decision.
#[derive(Error, Debug)]
pub enum BotThrottleError {
    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// A quota override that is not a non-negative integer
    #[error("Invalid quota for {identity}: {value:?}")]
    InvalidQuota { identity: String, value: String },

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<config::ConfigError> for BotThrottleError {
    fn from(err: config::ConfigError) -> Self {
        BotThrottleError::Config(err.to_string())
    }
}

/// Result type alias for Botthrottle operations.
pub type Result<T> = std::result::Result<T, BotThrottleError>;
