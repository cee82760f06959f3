//! Core error types for the Amanah screening pipeline.
//!
//! This module defines storage-agnostic error types. Storage-specific errors
//! (from Diesel, SQLite, etc.) are converted to these types by the storage layer.
//!
//! Entity-level failures never show up here: they are recovered inside the
//! pipeline and turned into a classification status. Only failures that
//! invalidate the whole run do.

use thiserror::Error;

/// Type alias for Result using our Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Root error type for the screening pipeline.
#[derive(Error, Debug)]
pub enum Error {
    /// The cache store cannot be read or written. Aborts the run.
    #[error("Cache store unavailable: {0}")]
    CacheUnavailable(String),

    #[error("Invalid configuration: {0}")]
    Config(#[from] ConfigError),

    /// The caller cancelled the run.
    #[error("Run cancelled after {processed} of {total} entities")]
    Cancelled { processed: usize, total: usize },

    #[error("Unexpected error: {0}")]
    Unexpected(String),
}

/// Validation errors for pipeline and classifier configuration.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConfigError {
    #[error("Invalid value for '{field}': {reason}")]
    InvalidValue { field: &'static str, reason: String },

    #[error("Required field '{0}' is missing")]
    MissingField(&'static str),
}

impl ConfigError {
    pub fn invalid(field: &'static str, reason: impl Into<String>) -> Self {
        ConfigError::InvalidValue {
            field,
            reason: reason.into(),
        }
    }
}

impl Error {
    /// Whether this error was caused by caller cancellation.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Error::Cancelled { .. })
    }
}
