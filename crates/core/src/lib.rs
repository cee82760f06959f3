//! Amanah Core - Screening domain, classifier and pipeline orchestration.
//!
//! This crate contains the business logic for compliance screening.
//! It is storage-agnostic and defines the cache store trait that is
//! implemented by the `storage-sqlite` crate.

pub mod errors;
pub mod screening;

// Re-export error types
pub use errors::ConfigError;
pub use errors::Error;
pub use errors::Result;
