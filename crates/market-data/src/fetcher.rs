//! Batch fetcher: one entity's attributes, retried under a [`RetryPolicy`].

use std::sync::Arc;

use log::{debug, warn};

use crate::clock::{SharedSleeper, TokioSleeper};
use crate::errors::{FailureKind, MarketDataError};
use crate::models::{Entity, FetchedAttributes};
use crate::provider::AttributeSource;
use crate::resilience::RetryPolicy;

/// Outcome of fetching one entity, including every retry.
#[derive(Debug)]
pub struct FetchReport {
    /// Attributes on success, or the error of the last attempt.
    pub outcome: Result<FetchedAttributes, MarketDataError>,
    /// Attempts made, including the first one.
    pub attempts: u32,
    /// Whether any attempt was rate limited, even if a later one succeeded.
    pub rate_limited: bool,
}

impl FetchReport {
    pub fn is_success(&self) -> bool {
        self.outcome.is_ok()
    }

    /// Taxonomy of the terminal failure, if the fetch failed.
    pub fn failure_kind(&self) -> Option<FailureKind> {
        self.outcome.as_ref().err().map(MarketDataError::kind)
    }
}

/// Fetches attributes from an [`AttributeSource`] with bounded retries.
///
/// The fetcher knows nothing about the circuit breaker or the cache; it
/// surfaces a terminal outcome and lets the caller route it.
pub struct BatchFetcher {
    source: Arc<dyn AttributeSource>,
    policy: RetryPolicy,
    sleeper: SharedSleeper,
}

impl BatchFetcher {
    pub fn new(source: Arc<dyn AttributeSource>, policy: RetryPolicy) -> Self {
        Self {
            source,
            policy,
            sleeper: Arc::new(TokioSleeper),
        }
    }

    /// Replace the sleeper used for backoff waits.
    pub fn with_sleeper(mut self, sleeper: SharedSleeper) -> Self {
        self.sleeper = sleeper;
        self
    }

    pub fn source_id(&self) -> &'static str {
        self.source.id()
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Fetch one entity, retrying retryable errors with backoff.
    ///
    /// Not-found errors are returned after a single attempt.
    pub async fn fetch(&self, entity: &Entity) -> FetchReport {
        let mut attempts = 0;
        let mut rate_limited = false;

        loop {
            attempts += 1;
            let error = match self.source.fetch_attributes(entity).await {
                Ok(attrs) => {
                    debug!(
                        "Fetched attributes for {} from {} after {} attempt(s)",
                        entity.id,
                        self.source.id(),
                        attempts
                    );
                    return FetchReport {
                        outcome: Ok(attrs),
                        attempts,
                        rate_limited,
                    };
                }
                Err(e) => e,
            };

            rate_limited |= error.is_rate_limit();

            if !self.policy.should_retry(&error, attempts) {
                if error.kind() != FailureKind::NotFound {
                    warn!(
                        "Giving up on {} after {} attempt(s): {}",
                        entity.id, attempts, error
                    );
                }
                return FetchReport {
                    outcome: Err(error),
                    attempts,
                    rate_limited,
                };
            }

            let delay = self.policy.delay_for(attempts, &error);
            debug!(
                "Attempt {} for {} failed ({}), retrying in {:?}",
                attempts,
                entity.id,
                error.kind(),
                delay
            );
            self.sleeper.sleep(delay).await;
        }
    }
}
