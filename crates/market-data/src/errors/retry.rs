/// Classification for retry policy.
///
/// Used by the batch fetcher to decide whether to retry an upstream error and
/// by the circuit breaker to decide whether the error says anything about
/// upstream health.
///
/// # Behavior Summary
///
/// | Class | Retry? | Record Circuit Breaker Failure? |
/// |-------|--------|--------------------------------|
/// | `Never` | No | No |
/// | `WithBackoff` | Yes, up to the policy limit | Yes, once the retries are exhausted |
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum RetryClass {
    /// Never retry - unknown symbol or otherwise entity-specific failure.
    /// Retrying won't help and the upstream itself is healthy.
    Never,

    /// Retry with backoff.
    ///
    /// Used for rate limiting (429), timeouts and other transient upstream
    /// failures. A terminal failure of this class counts toward the circuit
    /// breaker threshold.
    WithBackoff,
}

impl RetryClass {
    /// Whether a terminal failure of this class is an upstream-health signal.
    pub fn affects_circuit(self) -> bool {
        matches!(self, Self::WithBackoff)
    }
}

/// Failure taxonomy every attribute source must map its errors into.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum FailureKind {
    /// The upstream throttled the request.
    RateLimited,
    /// The entity does not exist upstream.
    NotFound,
    /// Any other retryable upstream failure.
    Transient,
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::RateLimited => write!(f, "rate_limited"),
            Self::NotFound => write!(f, "not_found"),
            Self::Transient => write!(f, "transient"),
        }
    }
}
