//! Typed configuration for the classifier and the screening pipeline.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use amanah_market_data::{Backoff, CircuitBreakerConfig, RetryPolicy};

use crate::errors::ConfigError;

// =============================================================================
// Constants
// =============================================================================

pub const DEFAULT_BATCH_SIZE: usize = 50;
pub const DEFAULT_DELAY_BETWEEN_ITEMS: Duration = Duration::from_secs(1);
pub const DEFAULT_DELAY_BETWEEN_BATCHES: Duration = Duration::from_secs(20);
pub const DEFAULT_RATE_LIMIT_DELAY: Duration = Duration::from_secs(45);
pub const DEFAULT_MAX_RETRIES: u32 = 2;
pub const DEFAULT_BREAKER_THRESHOLD: u32 = 3;
pub const DEFAULT_BREAKER_COOLDOWN: Duration = Duration::from_secs(5 * 60);
pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(90 * 24 * 60 * 60);
pub const DEFAULT_MAX_CONCURRENT_BATCHES: usize = 1;
pub const DEFAULT_MAX_DEBT_RATIO: f64 = 0.33;

/// Upper bound on any configured delay. Keeps every run bounded in time.
pub const MAX_CONFIGURED_DELAY: Duration = Duration::from_secs(10 * 60);

/// Cap on a single exponential backoff wait when none is configured.
pub const DEFAULT_MAX_BACKOFF: Duration = Duration::from_secs(30);

/// Activities an entity must not be primarily engaged in.
pub const DEFAULT_PROHIBITED_KEYWORDS: &[&str] = &[
    "bank",
    "insurance",
    "mortgage",
    "credit services",
    "gambling",
    "casino",
    "betting",
    "lottery",
    "alcohol",
    "brewer",
    "wineries",
    "distiller",
    "tobacco",
    "weapon",
    "firearm",
    "defense",
    "adult entertainment",
    "pork",
];

/// Name keywords marking financial institutions that operate under a compliant model.
pub const DEFAULT_ALLOW_OVERRIDE_KEYWORDS: &[&str] =
    &["islamic", "takaful", "shariah", "sharia", "sukuk"];

// =============================================================================
// Classifier Config
// =============================================================================

/// Rules used by the [`Classifier`](super::Classifier).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClassifierConfig {
    pub prohibited_keywords: Vec<String>,
    pub allow_override_keywords: Vec<String>,
    /// Largest acceptable `debt / (debt + equity)`.
    pub max_debt_ratio: f64,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            prohibited_keywords: to_strings(DEFAULT_PROHIBITED_KEYWORDS),
            allow_override_keywords: to_strings(DEFAULT_ALLOW_OVERRIDE_KEYWORDS),
            max_debt_ratio: DEFAULT_MAX_DEBT_RATIO,
        }
    }
}

impl ClassifierConfig {
    pub fn with_max_debt_ratio(mut self, max_debt_ratio: f64) -> Self {
        self.max_debt_ratio = max_debt_ratio;
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.max_debt_ratio > 0.0 && self.max_debt_ratio < 1.0) {
            return Err(ConfigError::invalid(
                "max_debt_ratio",
                format!("must lie in (0, 1), got {}", self.max_debt_ratio),
            ));
        }
        if self
            .prohibited_keywords
            .iter()
            .all(|k| k.trim().is_empty())
        {
            return Err(ConfigError::MissingField("prohibited_keywords"));
        }
        Ok(())
    }
}

fn to_strings(values: &[&str]) -> Vec<String> {
    values.iter().map(|v| v.to_string()).collect()
}

// =============================================================================
// Pipeline Config
// =============================================================================

/// Options recognised by the screening pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineConfig {
    pub batch_size: usize,
    pub delay_between_items: Duration,
    pub delay_between_batches: Duration,
    /// Replaces `delay_between_batches` after a batch that was rate limited.
    pub rate_limit_delay: Duration,
    pub max_retries: u32,
    pub circuit_breaker_threshold: u32,
    pub circuit_breaker_cooldown: Duration,
    pub cache_ttl: Duration,
    /// Skip the TTL-respecting cache lookup and always try a fresh fetch.
    pub force_refresh: bool,
    pub max_concurrent_batches: usize,
    /// Backoff between retries. `None` means exponential from `delay_between_items`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub backoff: Option<Backoff>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            delay_between_items: DEFAULT_DELAY_BETWEEN_ITEMS,
            delay_between_batches: DEFAULT_DELAY_BETWEEN_BATCHES,
            rate_limit_delay: DEFAULT_RATE_LIMIT_DELAY,
            max_retries: DEFAULT_MAX_RETRIES,
            circuit_breaker_threshold: DEFAULT_BREAKER_THRESHOLD,
            circuit_breaker_cooldown: DEFAULT_BREAKER_COOLDOWN,
            cache_ttl: DEFAULT_CACHE_TTL,
            force_refresh: false,
            max_concurrent_batches: DEFAULT_MAX_CONCURRENT_BATCHES,
            backoff: None,
        }
    }
}

impl PipelineConfig {
    /// Configuration without any delays. Useful for offline or test runs.
    pub fn without_delays() -> Self {
        Self {
            delay_between_items: Duration::ZERO,
            delay_between_batches: Duration::ZERO,
            rate_limit_delay: Duration::ZERO,
            backoff: Some(Backoff::Fixed {
                delay: Duration::ZERO,
            }),
            ..Self::default()
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.batch_size == 0 {
            return Err(ConfigError::invalid("batch_size", "must be at least 1"));
        }
        if self.max_concurrent_batches == 0 {
            return Err(ConfigError::invalid(
                "max_concurrent_batches",
                "must be at least 1",
            ));
        }
        if self.circuit_breaker_threshold == 0 {
            return Err(ConfigError::invalid(
                "circuit_breaker_threshold",
                "must be at least 1",
            ));
        }
        if self.cache_ttl.is_zero() {
            return Err(ConfigError::invalid("cache_ttl", "must be positive"));
        }

        let delays = [
            ("delay_between_items", self.delay_between_items),
            ("delay_between_batches", self.delay_between_batches),
            ("rate_limit_delay", self.rate_limit_delay),
            ("backoff", self.backoff().max_delay()),
        ];
        for (field, delay) in delays {
            if delay > MAX_CONFIGURED_DELAY {
                return Err(ConfigError::invalid(
                    field,
                    format!(
                        "{:?} exceeds the maximum of {:?}",
                        delay, MAX_CONFIGURED_DELAY
                    ),
                ));
            }
        }
        Ok(())
    }

    /// Backoff between retries, defaulting to exponential from `delay_between_items`.
    pub fn backoff(&self) -> Backoff {
        self.backoff.clone().unwrap_or(Backoff::Exponential {
            base: self.delay_between_items,
            factor: 2.0,
            max: DEFAULT_MAX_BACKOFF.max(self.delay_between_items),
        })
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.max_retries, self.backoff())
    }

    pub fn breaker_config(&self) -> CircuitBreakerConfig {
        CircuitBreakerConfig {
            failure_threshold: self.circuit_breaker_threshold,
            cooldown: self.circuit_breaker_cooldown,
        }
    }
}
