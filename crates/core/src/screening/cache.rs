//! Classification cache contract and an in-memory implementation.
//!
//! The durable implementation lives in the `storage-sqlite` crate.

use std::collections::HashMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;

use chrono::{DateTime, Utc};
use log::warn;
use serde::{Deserialize, Serialize};

use amanah_market_data::{Clock, SystemClock};

use super::model::ClassificationResult;
use crate::errors::Result;

/// Cached classification of one entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheEntry {
    pub key: String,
    pub value: ClassificationResult,
    pub written_at: DateTime<Utc>,
    pub ttl: Duration,
}

impl CacheEntry {
    /// Build an entry for `value`, stamped with the time it was checked.
    pub fn new(key: impl Into<String>, value: ClassificationResult, ttl: Duration) -> Self {
        Self {
            key: key.into(),
            written_at: value.checked_at,
            value,
            ttl,
        }
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        is_expired(self.written_at, self.ttl, now)
    }

    pub fn age(&self, now: DateTime<Utc>) -> chrono::Duration {
        now.signed_duration_since(self.written_at)
    }
}

/// `now - written_at > ttl`. A TTL too large to represent never expires.
pub fn is_expired(written_at: DateTime<Utc>, ttl: Duration, now: DateTime<Utc>) -> bool {
    match chrono::Duration::from_std(ttl) {
        Ok(ttl) => now.signed_duration_since(written_at) > ttl,
        Err(_) => false,
    }
}

/// Cache size and health.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheStats {
    pub count: usize,
    /// Approximate payload size in bytes.
    pub bytes: u64,
    pub expired_count: usize,
}

/// Key/value store for classification results with per-entry TTL.
///
/// Implementations must make `put` atomic per key (readers see the old or
/// the new entry, never a mix) and must allow concurrent readers. Any error
/// means the store itself is unusable and aborts the run.
pub trait CacheStore: Send + Sync {
    /// Look up an entry. Expired entries are a miss unless `ignore_ttl` is set.
    fn get(&self, key: &str, ignore_ttl: bool) -> Result<Option<CacheEntry>>;

    /// Store `value` under `key`, overwriting any previous entry.
    ///
    /// The entry's `written_at` is the result's `checked_at`.
    fn put(&self, key: &str, value: &ClassificationResult, ttl: Duration) -> Result<CacheEntry>;

    fn stats(&self) -> Result<CacheStats>;

    /// Remove one entry. Returns whether it existed.
    fn invalidate(&self, key: &str) -> Result<bool>;

    /// Remove every expired entry. Returns how many were removed.
    fn purge_expired(&self) -> Result<usize>;
}

/// In-memory [`CacheStore`], lost when the process exits.
pub struct MemoryCacheStore {
    entries: RwLock<HashMap<String, CacheEntry>>,
    clock: Arc<dyn Clock>,
}

impl Default for MemoryCacheStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryCacheStore {
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            clock,
        }
    }

    /// Insert an entry as-is, bypassing `put`'s timestamping.
    pub fn insert_entry(&self, entry: CacheEntry) {
        self.write().insert(entry.key.clone(), entry);
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<String, CacheEntry>> {
        self.entries.read().unwrap_or_else(|poisoned| {
            warn!("Memory cache lock was poisoned, recovering");
            poisoned.into_inner()
        })
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<String, CacheEntry>> {
        self.entries.write().unwrap_or_else(|poisoned| {
            warn!("Memory cache lock was poisoned, recovering");
            poisoned.into_inner()
        })
    }
}

impl CacheStore for MemoryCacheStore {
    fn get(&self, key: &str, ignore_ttl: bool) -> Result<Option<CacheEntry>> {
        let now = self.clock.now();
        Ok(self
            .read()
            .get(key)
            .filter(|entry| ignore_ttl || !entry.is_expired(now))
            .cloned())
    }

    fn put(&self, key: &str, value: &ClassificationResult, ttl: Duration) -> Result<CacheEntry> {
        let entry = CacheEntry::new(key, value.clone(), ttl);
        self.write().insert(key.to_string(), entry.clone());
        Ok(entry)
    }

    fn stats(&self) -> Result<CacheStats> {
        let now = self.clock.now();
        let entries = self.read();
        let bytes = entries
            .values()
            .map(|e| serde_json::to_vec(&e.value).map(|v| v.len() as u64).unwrap_or(0))
            .sum();
        Ok(CacheStats {
            count: entries.len(),
            bytes,
            expired_count: entries.values().filter(|e| e.is_expired(now)).count(),
        })
    }

    fn invalidate(&self, key: &str) -> Result<bool> {
        Ok(self.write().remove(key).is_some())
    }

    fn purge_expired(&self) -> Result<usize> {
        let now = self.clock.now();
        let mut entries = self.write();
        let before = entries.len();
        entries.retain(|_, e| !e.is_expired(now));
        Ok(before - entries.len())
    }
}
