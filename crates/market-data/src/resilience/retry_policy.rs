//! Retry policy for upstream fetches.
//!
//! The policy only decides *how long* to wait and *how often* to retry; the
//! actual waiting is done by a [`Sleeper`](crate::clock::Sleeper) so that
//! tests never block on real delays.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::errors::{MarketDataError, RetryClass};

/// Default number of retries after the first attempt.
pub const DEFAULT_MAX_RETRIES: u32 = 2;

/// Default base delay between attempts.
pub const DEFAULT_BASE_DELAY: Duration = Duration::from_secs(1);

/// Upper bound on any single backoff wait.
pub const DEFAULT_MAX_DELAY: Duration = Duration::from_secs(30);

/// Backoff function between attempts.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", tag = "kind")]
pub enum Backoff {
    /// Same delay before every retry.
    Fixed { delay: Duration },
    /// `base * factor^(retry - 1)`, capped at `max`.
    Exponential {
        base: Duration,
        factor: f64,
        max: Duration,
    },
}

impl Backoff {
    /// Delay before the given retry (1 for the first retry).
    pub fn delay_for(&self, retry: u32) -> Duration {
        match self {
            Self::Fixed { delay } => *delay,
            Self::Exponential { base, factor, max } => {
                let exponent = retry.saturating_sub(1) as i32;
                let secs = base.as_secs_f64() * factor.max(1.0).powi(exponent);
                if !secs.is_finite() || secs >= max.as_secs_f64() {
                    *max
                } else {
                    Duration::from_secs_f64(secs)
                }
            }
        }
    }

    /// Largest delay this backoff can produce.
    pub fn max_delay(&self) -> Duration {
        match self {
            Self::Fixed { delay } => *delay,
            Self::Exponential { max, .. } => *max,
        }
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Self::Exponential {
            base: DEFAULT_BASE_DELAY,
            factor: 2.0,
            max: DEFAULT_MAX_DELAY,
        }
    }
}

/// How many times to retry a retryable upstream error and how long to wait.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RetryPolicy {
    /// Retries after the first attempt.
    pub max_retries: u32,
    /// Delay function between attempts.
    pub backoff: Backoff,
}

impl RetryPolicy {
    pub fn new(max_retries: u32, backoff: Backoff) -> Self {
        Self {
            max_retries,
            backoff,
        }
    }

    /// A policy that never retries.
    pub fn no_retry() -> Self {
        Self {
            max_retries: 0,
            backoff: Backoff::Fixed {
                delay: Duration::ZERO,
            },
        }
    }

    /// Total attempts including the first one.
    pub fn max_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }

    /// Whether `error` should be retried after `attempt` attempts have been made.
    pub fn should_retry(&self, error: &MarketDataError, attempt: u32) -> bool {
        error.retry_class() == RetryClass::WithBackoff && attempt < self.max_attempts()
    }

    /// Delay before `retry`, honouring a provider `Retry-After` hint up to
    /// the backoff's maximum.
    pub fn delay_for(&self, retry: u32, error: &MarketDataError) -> Duration {
        let base = self.backoff.delay_for(retry);
        match error.retry_after() {
            Some(hint) if hint > base => hint.min(self.backoff.max_delay().max(base)),
            _ => base,
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_RETRIES, Backoff::default())
    }
}
