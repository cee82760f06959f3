//! Error types and retry classification for the market data crate.
//!
//! This module provides:
//! - [`MarketDataError`]: The error enum for all upstream attribute fetches
//! - [`RetryClass`]: Classification for determining retry behavior
//! - [`FailureKind`]: The three-way failure taxonomy used for routing

mod retry;

pub use retry::{FailureKind, RetryClass};

use std::time::Duration;

use thiserror::Error;

/// Errors that can occur while fetching entity attributes.
///
/// Each variant is classified into a [`RetryClass`] via [`retry_class`](Self::retry_class)
/// and into a [`FailureKind`] via [`kind`](Self::kind).
#[derive(Error, Debug)]
pub enum MarketDataError {
    /// The requested symbol was not found by the provider.
    /// This is a terminal error - retrying won't help.
    #[error("Symbol not found: {0}")]
    SymbolNotFound(String),

    /// The provider rate limited the request (HTTP 429).
    #[error("Rate limited: {provider}")]
    RateLimited {
        /// The provider that rate limited the request
        provider: String,
        /// Server-suggested wait before the next attempt, if any
        retry_after: Option<Duration>,
    },

    /// The request to the provider timed out.
    #[error("Timeout: {provider}")]
    Timeout {
        /// The provider that timed out
        provider: String,
    },

    /// A provider-specific error occurred (5xx, auth expiry, bad payload).
    #[error("Provider error: {provider} - {message}")]
    ProviderError {
        /// The provider that returned the error
        provider: String,
        /// The error message from the provider
        message: String,
    },

    /// A network error occurred while communicating with a provider.
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),
}

impl MarketDataError {
    /// Convenience constructor for a rate limit without a retry hint.
    pub fn rate_limited(provider: impl Into<String>) -> Self {
        Self::RateLimited {
            provider: provider.into(),
            retry_after: None,
        }
    }

    /// Convenience constructor for a generic provider failure.
    pub fn provider(provider: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ProviderError {
            provider: provider.into(),
            message: message.into(),
        }
    }

    /// Returns the failure kind used by the orchestrator's routing.
    pub fn kind(&self) -> FailureKind {
        match self {
            Self::SymbolNotFound(_) => FailureKind::NotFound,
            Self::RateLimited { .. } => FailureKind::RateLimited,
            Self::Timeout { .. } | Self::ProviderError { .. } | Self::Network(_) => {
                FailureKind::Transient
            }
        }
    }

    /// Returns the retry classification for this error.
    ///
    /// # Examples
    ///
    /// ```
    /// use amanah_market_data::errors::{MarketDataError, RetryClass};
    ///
    /// let error = MarketDataError::rate_limited("YAHOO");
    /// assert_eq!(error.retry_class(), RetryClass::WithBackoff);
    ///
    /// let error = MarketDataError::SymbolNotFound("INVALID".to_string());
    /// assert_eq!(error.retry_class(), RetryClass::Never);
    /// ```
    pub fn retry_class(&self) -> RetryClass {
        match self.kind() {
            FailureKind::NotFound => RetryClass::Never,
            FailureKind::RateLimited | FailureKind::Transient => RetryClass::WithBackoff,
        }
    }

    /// Whether this error is a rate-limit signal.
    pub fn is_rate_limit(&self) -> bool {
        self.kind() == FailureKind::RateLimited
    }

    /// Server-suggested delay before retrying, when the provider sent one.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::RateLimited { retry_after, .. } => *retry_after,
            _ => None,
        }
    }
}
