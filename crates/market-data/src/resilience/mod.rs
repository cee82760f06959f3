//! Resilience primitives for talking to a flaky, rate-limited upstream.
//!
//! - Circuit breaking shared by every batch of a scan
//! - Retry policy with pluggable backoff

mod circuit_breaker;
mod retry_policy;

pub use circuit_breaker::{
    Admission, CircuitBreaker, CircuitBreakerConfig, CircuitSnapshot, CircuitState,
    DEFAULT_COOLDOWN, DEFAULT_FAILURE_THRESHOLD,
};
pub use retry_policy::{Backoff, RetryPolicy, DEFAULT_MAX_RETRIES};
