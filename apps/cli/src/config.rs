use std::str::FromStr;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use amanah_core::screening::{ClassifierConfig, PipelineConfig};

const DEFAULT_DB_PATH: &str = "./db/amanah.db";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Text,
    Json,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub db_path: String,
    pub log_format: LogFormat,
    pub pipeline: PipelineConfig,
    pub classifier: ClassifierConfig,
}

impl Config {
    /// Read `.env` and the `AMANAH_*` environment variables.
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let db_path = lookup("AMANAH_DB_PATH").unwrap_or_else(|| DEFAULT_DB_PATH.into());
        let log_format = match lookup("AMANAH_LOG_FORMAT") {
            Some(v) if v.eq_ignore_ascii_case("json") => LogFormat::Json,
            _ => LogFormat::Text,
        };

        let mut pipeline = PipelineConfig::default();
        if let Some(v) = parse(&lookup, "AMANAH_BATCH_SIZE")? {
            pipeline.batch_size = v;
        }
        if let Some(v) = parse(&lookup, "AMANAH_DELAY_BETWEEN_ITEMS_MS")? {
            pipeline.delay_between_items = Duration::from_millis(v);
        }
        if let Some(v) = parse(&lookup, "AMANAH_DELAY_BETWEEN_BATCHES_SECS")? {
            pipeline.delay_between_batches = Duration::from_secs(v);
        }
        if let Some(v) = parse(&lookup, "AMANAH_RATE_LIMIT_DELAY_SECS")? {
            pipeline.rate_limit_delay = Duration::from_secs(v);
        }
        if let Some(v) = parse(&lookup, "AMANAH_MAX_RETRIES")? {
            pipeline.max_retries = v;
        }
        if let Some(v) = parse(&lookup, "AMANAH_BREAKER_THRESHOLD")? {
            pipeline.circuit_breaker_threshold = v;
        }
        if let Some(v) = parse(&lookup, "AMANAH_BREAKER_COOLDOWN_SECS")? {
            pipeline.circuit_breaker_cooldown = Duration::from_secs(v);
        }
        if let Some(days) = parse::<u64, _>(&lookup, "AMANAH_CACHE_TTL_DAYS")? {
            pipeline.cache_ttl = Duration::from_secs(days.saturating_mul(86_400));
        }
        if let Some(v) = parse(&lookup, "AMANAH_MAX_CONCURRENT_BATCHES")? {
            pipeline.max_concurrent_batches = v;
        }

        let mut classifier = ClassifierConfig::default();
        if let Some(v) = parse(&lookup, "AMANAH_MAX_DEBT_RATIO")? {
            classifier = classifier.with_max_debt_ratio(v);
        }

        Ok(Self {
            db_path,
            log_format,
            pipeline,
            classifier,
        })
    }
}

fn parse<T, F>(lookup: &F, key: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::fmt::Display,
    F: Fn(&str) -> Option<String>,
{
    let Some(raw) = lookup(key) else {
        return Ok(None);
    };
    let raw = raw.trim();
    if raw.is_empty() {
        return Ok(None);
    }
    raw.parse::<T>()
        .map(Some)
        .map_err(|e| anyhow!("{}", e))
        .with_context(|| format!("Invalid {}: '{}'", key, raw))
}
