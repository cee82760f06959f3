//! SQLite storage implementation for Amanah.
//!
//! This crate provides the durable classification cache using Diesel ORM with SQLite.
//! It implements the `CacheStore` trait defined in `amanah-core` and contains:
//! - Database connection pooling and management
//! - Diesel migrations
//! - The `screening_cache` repository
//! - Database-specific model types (with Diesel derives)
//!
//! # Architecture
//!
//! This crate is the only place in the workspace where Diesel dependencies exist.
//! The screening pipeline in `core` is database-agnostic and works with the trait.
//!
//! ```text
//!      core (CacheStore)
//!              │
//!              ▼
//!  storage-sqlite (this crate)
//!              │
//!              ▼
//!          SQLite DB
//! ```

pub mod db;
pub mod errors;
pub mod schema;

// Repository implementations
pub mod screening_cache;

// Re-export database utilities
pub use db::{
    create_pool, get_connection, init, open, run_migrations, DbConnection, DbPool,
};

// Re-export storage errors and conversion helpers
pub use errors::{IntoCore, StorageError};

pub use screening_cache::SqliteCacheStore;

// Re-export from amanah-core for convenience
pub use amanah_core::errors::{Error, Result};
