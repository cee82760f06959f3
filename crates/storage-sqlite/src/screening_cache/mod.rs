//! SQLite-backed cache of classification results.

mod model;
mod repository;

pub use model::ScreeningCacheDB;
pub use repository::SqliteCacheStore;
