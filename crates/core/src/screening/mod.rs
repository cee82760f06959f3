//! Compliance screening module.
//!
//! This module turns a universe of entities and an unreliable upstream into a
//! classified, cached result set:
//!
//! - [`model`] - Classification results and their status/confidence/source enums
//! - [`config`] - Typed pipeline and classifier configuration
//! - [`classifier`] - Pure rule-based classifier
//! - [`cache`] - Cache store contract and an in-memory store
//! - [`orchestrator`] - Batched run driver
//! - [`stats`] - Run statistics and the partitioned report
//! - [`progress`] - Progress reporting trait
//!
//! # Architecture
//!
//! ```text
//! ScreeningPipeline → CacheStore (get) → CircuitBreaker → BatchFetcher → Classifier
//!        ↓                                                                  ↓
//! ScreeningReport ← BatchRunStats                               CacheStore (put)
//! ```

pub mod cache;
pub mod classifier;
pub mod config;
pub mod model;
pub mod orchestrator;
pub mod progress;
pub mod stats;

#[cfg(test)]
mod orchestrator_tests;

pub use cache::{CacheEntry, CacheStats, CacheStore, MemoryCacheStore};
pub use classifier::{estimated_debt_ratio, ClassificationError, Classifier};
pub use config::{ClassifierConfig, PipelineConfig, DEFAULT_CACHE_TTL};
pub use model::{CheckOutcome, ClassificationResult, ComplianceStatus, Confidence, DataSource};
pub use orchestrator::{ScreeningPipeline, ScreeningPipelineBuilder, BREAKER_OPEN_NO_CACHE};
pub use progress::{
    BatchProgress, LogProgressReporter, NoopProgressReporter, ScreeningProgressReporter,
};
pub use stats::{BatchRunStats, RunState, ScreeningReport};
