//! Amanah Market Data Crate
//!
//! This crate fetches the attributes a screening run needs (sector, industry,
//! market capitalization, debt-to-equity) from a rate-limited upstream, and
//! provides the resilience primitives that keep request pressure bounded.
//!
//! # Overview
//!
//! - Provider-agnostic [`AttributeSource`] trait, with a Yahoo Finance implementation
//! - A three-way failure taxonomy (rate limited, not found, transient)
//! - Retry policy with pluggable backoff
//! - A process-wide circuit breaker
//! - Clock and sleep abstractions so every delay can be observed in tests
//!
//! # Architecture
//!
//! ```text
//! +------------------+     +------------------+     +------------------+
//! |  BatchFetcher    | --> |  AttributeSource |  -> |  Upstream (HTTP) |
//! |  (RetryPolicy)   |     |  (Yahoo, ...)    |     |                  |
//! +------------------+     +------------------+     +------------------+
//!          |
//!          v
//!  FetchReport { outcome, attempts, rate_limited }
//!          |
//!          v
//! +------------------+
//! |  CircuitBreaker  |  (fed by the caller, shared by all batches)
//! +------------------+
//! ```
//!
//! # Core Types
//!
//! - [`Entity`] - The unit being screened
//! - [`FetchedAttributes`] - Possibly sparse attributes fetched upstream
//! - [`MarketDataError`] - Upstream failure, classified via [`FailureKind`] and [`RetryClass`]
//! - [`CircuitBreaker`] - CLOSED / OPEN / HALF_OPEN gate over fresh fetches
//! - [`BatchFetcher`] - Fetch with bounded retries

pub mod clock;
pub mod errors;
pub mod fetcher;
pub mod models;
pub mod provider;
pub mod resilience;

pub use clock::{
    Clock, ManualClock, RecordingSleeper, SharedClock, SharedSleeper, Sleeper, SystemClock,
    TokioSleeper,
};
pub use errors::{FailureKind, MarketDataError, RetryClass};
pub use fetcher::{BatchFetcher, FetchReport};
pub use models::{Entity, EntityId, FetchedAttributes};
pub use provider::yahoo::YahooAttributeSource;
pub use provider::AttributeSource;
pub use resilience::{
    Admission, Backoff, CircuitBreaker, CircuitBreakerConfig, CircuitSnapshot, CircuitState,
    RetryPolicy,
};
