//! Storage-specific error types for SQLite operations.
//!
//! This module wraps Diesel, r2d2 and payload (de)serialization errors and
//! converts them to the storage-agnostic error type defined in `amanah_core`.
//! Any storage failure surfaces as [`Error::CacheUnavailable`], which aborts
//! a screening run.

use diesel::result::Error as DieselError;
use thiserror::Error;

use amanah_core::errors::Error;

/// Storage-specific errors that wrap Diesel and r2d2 types.
///
/// These errors are internal to the storage layer and are converted to
/// `amanah_core::Error` before being returned to callers.
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Database connection failed: {0}")]
    ConnectionFailed(#[from] diesel::ConnectionError),

    #[error("Connection pool error: {0}")]
    PoolError(#[from] r2d2::Error),

    #[error("Query execution failed: {0}")]
    QueryFailed(#[from] DieselError),

    #[error("Migration failed: {0}")]
    MigrationFailed(String),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("Corrupt cache row '{key}': {reason}")]
    CorruptRow { key: String, reason: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<StorageError> for Error {
    fn from(err: StorageError) -> Self {
        Error::CacheUnavailable(err.to_string())
    }
}

/// Extension trait for converting Diesel and r2d2 Results to core Results.
///
/// Orphan rules forbid `From<DieselError> for amanah_core::Error`, so the
/// conversion goes through [`StorageError`].
pub trait IntoCore<T> {
    fn into_core(self) -> amanah_core::Result<T>;
}

impl<T> IntoCore<T> for std::result::Result<T, DieselError> {
    fn into_core(self) -> amanah_core::Result<T> {
        self.map_err(|e| StorageError::from(e).into())
    }
}

impl<T> IntoCore<T> for std::result::Result<T, r2d2::Error> {
    fn into_core(self) -> amanah_core::Result<T> {
        self.map_err(|e| StorageError::from(e).into())
    }
}
