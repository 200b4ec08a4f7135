//! Error types for the flagfeed pipeline
//!
//! This module provides error handling using thiserror for structured error
//! definitions and anyhow for error propagation at the binary edge.

use std::time::Duration;
use thiserror::Error;

/// Main error type for flagfeed operations
#[derive(Error, Debug)]
pub enum FlagfeedError {
    /// Caller supplied an empty name or an unusable declaration
    #[error("Validation error: {0}")]
    Validation(String),

    /// Durable storage broke its conflict-insert visibility guarantee
    #[error("Invariant violation: {0}")]
    InvariantViolation(String),

    /// A storage call did not complete in time
    #[error("Storage call timed out after {0:?}")]
    Timeout(Duration),

    /// Database operation failed
    #[error("Database error: {0}")]
    Database(String),

    /// Schema migration failed
    #[error("Migration error: {0}")]
    Migration(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Generic error with context
    #[error("{0}")]
    Other(String),
}

impl FlagfeedError {
    /// Whether the sender may retry the operation later
    pub fn is_transient(&self) -> bool {
        matches!(self, FlagfeedError::Timeout(_) | FlagfeedError::Database(_))
    }
}

/// Result type alias for flagfeed operations
pub type Result<T> = std::result::Result<T, FlagfeedError>;

impl From<libsql::Error> for FlagfeedError {
    fn from(err: libsql::Error) -> Self {
        FlagfeedError::Database(err.to_string())
    }
}

/// Convert anyhow::Error to FlagfeedError
impl From<anyhow::Error> for FlagfeedError {
    fn from(err: anyhow::Error) -> Self {
        FlagfeedError::Other(err.to_string())
    }
}
