//! Database model for cached classification results.

use chrono::{DateTime, SecondsFormat, Utc};
use diesel::prelude::*;
use std::time::Duration;

use amanah_core::screening::{CacheEntry, ClassificationResult};

use crate::errors::StorageError;

/// One row of `screening_cache`. The classification is stored as a JSON payload
/// and the TTL in whole milliseconds, rounded up.
#[derive(Queryable, Identifiable, Selectable, Insertable, AsChangeset, Debug, Clone, PartialEq)]
#[diesel(table_name = crate::schema::screening_cache)]
#[diesel(primary_key(cache_key))]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct ScreeningCacheDB {
    pub cache_key: String,
    pub payload: String,
    pub written_at: String,
    pub ttl_millis: i64,
}

impl ScreeningCacheDB {
    pub fn from_result(
        key: &str,
        value: &ClassificationResult,
        ttl: Duration,
    ) -> Result<Self, StorageError> {
        Ok(Self {
            cache_key: key.to_string(),
            payload: serde_json::to_string(value)?,
            written_at: format_timestamp(value.checked_at),
            ttl_millis: ttl_to_millis(ttl),
        })
    }

    pub fn written_at(&self) -> Result<DateTime<Utc>, StorageError> {
        DateTime::parse_from_rfc3339(&self.written_at)
            .map(|dt| dt.with_timezone(&Utc))
            .map_err(|e| self.corrupt(format!("invalid written_at: {}", e)))
    }

    pub fn ttl(&self) -> Result<Duration, StorageError> {
        millis_to_ttl(self.ttl_millis)
            .ok_or_else(|| self.corrupt(format!("negative ttl_millis {}", self.ttl_millis)))
    }

    fn corrupt(&self, reason: String) -> StorageError {
        StorageError::CorruptRow {
            key: self.cache_key.clone(),
            reason,
        }
    }
}

impl TryFrom<ScreeningCacheDB> for CacheEntry {
    type Error = StorageError;

    fn try_from(row: ScreeningCacheDB) -> Result<Self, Self::Error> {
        let written_at = row.written_at()?;
        let ttl = row.ttl()?;
        let value: ClassificationResult = serde_json::from_str(&row.payload)?;
        Ok(CacheEntry {
            key: row.cache_key,
            value,
            written_at,
            ttl,
        })
    }
}

/// Whole milliseconds, rounded up so a sub-millisecond TTL never becomes zero.
pub fn ttl_to_millis(ttl: Duration) -> i64 {
    i64::try_from(ttl.as_nanos().div_ceil(1_000_000)).unwrap_or(i64::MAX)
}

pub fn millis_to_ttl(millis: i64) -> Option<Duration> {
    u64::try_from(millis).ok().map(Duration::from_millis)
}

/// Fixed-width RFC 3339 in UTC, so text ordering in SQLite matches time ordering.
pub fn format_timestamp(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Nanos, true)
}
