use chrono::{DateTime, Utc};
use diesel::prelude::*;
use log::{debug, warn};
use std::sync::Arc;
use std::time::Duration;

use amanah_core::screening::{
    cache::is_expired, CacheEntry, CacheStats, CacheStore, ClassificationResult,
};
use amanah_core::Result;
use amanah_market_data::{Clock, SystemClock};

use super::model::{millis_to_ttl, ScreeningCacheDB};
use crate::db::{get_connection, DbPool};
use crate::errors::{IntoCore, StorageError};
use crate::schema::screening_cache;
use crate::schema::screening_cache::dsl as sc_dsl;

/// Keeps `IN (...)` lists well below SQLite's bound-parameter limit.
const DELETE_CHUNK_SIZE: usize = 500;

/// Durable [`CacheStore`] backed by the `screening_cache` table.
///
/// Writes go through `REPLACE INTO`, so a key is overwritten in a single
/// statement. WAL mode lets pooled readers proceed while a write is in flight.
pub struct SqliteCacheStore {
    pool: Arc<DbPool>,
    clock: Arc<dyn Clock>,
}

impl SqliteCacheStore {
    pub fn new(pool: Arc<DbPool>) -> Self {
        Self::with_clock(pool, Arc::new(SystemClock))
    }

    pub fn with_clock(pool: Arc<DbPool>, clock: Arc<dyn Clock>) -> Self {
        Self { pool, clock }
    }

    /// Key, timestamp and TTL of every row, without the payloads.
    fn load_headers(&self) -> Result<Vec<(String, String, i64)>> {
        let mut conn = get_connection(&self.pool)?;
        sc_dsl::screening_cache
            .select((sc_dsl::cache_key, sc_dsl::written_at, sc_dsl::ttl_millis))
            .load::<(String, String, i64)>(&mut conn)
            .into_core()
    }
}

/// Whether a row header is past its TTL. Unparseable rows count as expired.
fn header_expired(key: &str, written_at: &str, ttl_millis: i64, now: DateTime<Utc>) -> bool {
    let written_at = DateTime::parse_from_rfc3339(written_at).map(|dt| dt.with_timezone(&Utc));
    match (written_at, millis_to_ttl(ttl_millis)) {
        (Ok(written_at), Some(ttl)) => is_expired(written_at, ttl, now),
        _ => {
            warn!("Cache row '{}' has an invalid header, treating as expired", key);
            true
        }
    }
}

impl CacheStore for SqliteCacheStore {
    fn get(&self, key: &str, ignore_ttl: bool) -> Result<Option<CacheEntry>> {
        let mut conn = get_connection(&self.pool)?;

        let row = sc_dsl::screening_cache
            .find(key)
            .select(ScreeningCacheDB::as_select())
            .first::<ScreeningCacheDB>(&mut conn)
            .optional()
            .into_core()?;

        let Some(row) = row else {
            return Ok(None);
        };

        let entry = match CacheEntry::try_from(row) {
            Ok(entry) => entry,
            Err(e) => {
                warn!("Ignoring unreadable cache entry '{}': {}", key, e);
                return Ok(None);
            }
        };

        if !ignore_ttl && entry.is_expired(self.clock.now()) {
            debug!("Cache entry '{}' expired", key);
            return Ok(None);
        }

        Ok(Some(entry))
    }

    fn put(&self, key: &str, value: &ClassificationResult, ttl: Duration) -> Result<CacheEntry> {
        let row = ScreeningCacheDB::from_result(key, value, ttl)?;
        let mut conn = get_connection(&self.pool)?;

        diesel::replace_into(screening_cache::table)
            .values(&row)
            .execute(&mut conn)
            .into_core()?;

        Ok(CacheEntry::new(key, value.clone(), ttl))
    }

    fn stats(&self) -> Result<CacheStats> {
        use diesel::dsl::{count_star, sql};
        use diesel::sql_types::{BigInt, Nullable};

        let now = self.clock.now();
        let mut conn = get_connection(&self.pool)?;

        let (count, bytes): (i64, Option<i64>) = sc_dsl::screening_cache
            .select((
                count_star(),
                sql::<Nullable<BigInt>>("SUM(LENGTH(CAST(payload AS BLOB)))"),
            ))
            .first(&mut conn)
            .into_core()?;
        drop(conn);

        let expired_count = self
            .load_headers()?
            .iter()
            .filter(|(key, written_at, ttl)| header_expired(key, written_at, *ttl, now))
            .count();

        Ok(CacheStats {
            count: usize::try_from(count).unwrap_or(0),
            bytes: bytes.and_then(|b| u64::try_from(b).ok()).unwrap_or(0),
            expired_count,
        })
    }

    fn invalidate(&self, key: &str) -> Result<bool> {
        let mut conn = get_connection(&self.pool)?;
        let deleted = diesel::delete(sc_dsl::screening_cache.find(key))
            .execute(&mut conn)
            .into_core()?;
        Ok(deleted > 0)
    }

    fn purge_expired(&self) -> Result<usize> {
        let now = self.clock.now();
        let expired: Vec<String> = self
            .load_headers()?
            .into_iter()
            .filter(|(key, written_at, ttl)| header_expired(key, written_at, *ttl, now))
            .map(|(key, _, _)| key)
            .collect();

        if expired.is_empty() {
            return Ok(0);
        }

        let mut conn = get_connection(&self.pool)?;
        let removed = conn
            .transaction::<usize, StorageError, _>(|conn| {
                let mut removed = 0;
                for chunk in expired.chunks(DELETE_CHUNK_SIZE) {
                    removed += diesel::delete(
                        sc_dsl::screening_cache.filter(sc_dsl::cache_key.eq_any(chunk)),
                    )
                    .execute(conn)?;
                }
                Ok(removed)
            })?;

        debug!("Purged {} expired cache entries", removed);
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;
    use amanah_core::screening::{Classifier, ClassifierConfig, ComplianceStatus};
    use amanah_market_data::{Entity, FetchedAttributes, ManualClock};
    use chrono::TimeZone;
    use tempfile::TempDir;

    const DAY: Duration = Duration::from_secs(86_400);

    fn start() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 1, 10, 0, 0, 0).unwrap()
    }

    fn setup() -> (TempDir, Arc<ManualClock>, SqliteCacheStore) {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("amanah.db");
        let pool = db::open(db_path.to_str().unwrap()).unwrap();
        let clock = Arc::new(ManualClock::new(start()));
        let store = SqliteCacheStore::with_clock(pool, clock.clone());
        (dir, clock, store)
    }

    fn result(id: &str, status: ComplianceStatus, checked_at: DateTime<Utc>) -> ClassificationResult {
        ClassificationResult::unresolved(id, status, "test", checked_at)
    }

    #[test]
    fn put_then_get_returns_entry() {
        let (_dir, _clock, store) = setup();
        let value = result("AAPL", ComplianceStatus::Compliant, start());

        let written = store.put("AAPL", &value, DAY).unwrap();
        assert_eq!(written.written_at, start());

        let entry = store.get("AAPL", false).unwrap().unwrap();
        assert_eq!(entry.value, value);
        assert_eq!(entry.written_at, value.checked_at);
        assert_eq!(entry.ttl, DAY);
        assert!(store.get("MSFT", false).unwrap().is_none());
    }

    #[test]
    fn expired_entries_are_a_miss_unless_ttl_ignored() {
        let (_dir, clock, store) = setup();
        store
            .put("AAPL", &result("AAPL", ComplianceStatus::Compliant, start()), DAY)
            .unwrap();

        clock.advance(DAY);
        assert!(store.get("AAPL", false).unwrap().is_some());

        clock.advance(Duration::from_secs(1));
        assert!(store.get("AAPL", false).unwrap().is_none());
        assert!(store.get("AAPL", true).unwrap().is_some());
    }

    #[test]
    fn sub_second_ttl_expires_on_time() {
        let (_dir, clock, store) = setup();
        let ttl = Duration::from_millis(1500);
        store
            .put("AAPL", &result("AAPL", ComplianceStatus::Compliant, start()), ttl)
            .unwrap();

        assert_eq!(store.get("AAPL", false).unwrap().unwrap().ttl, ttl);

        clock.advance(Duration::from_millis(1500));
        assert!(store.get("AAPL", false).unwrap().is_some());
        assert_eq!(store.stats().unwrap().expired_count, 0);

        clock.advance(Duration::from_millis(1));
        assert!(store.get("AAPL", false).unwrap().is_none());
        assert_eq!(store.stats().unwrap().expired_count, 1);
    }

    #[test]
    fn classified_result_reads_back_unchanged() {
        let (_dir, _clock, store) = setup();
        let checked_at = start() + chrono::Duration::nanoseconds(123_456_789);
        let entity = Entity::new("NVDA", "NVIDIA Corporation");
        let attrs = FetchedAttributes::new("NVDA", checked_at)
            .sector("Technology")
            .industry("Semiconductors")
            .market_cap(2_718_281_828_459.045)
            .debt_to_equity(0.230_850_287_315_875_17);
        let value = Classifier::new(ClassifierConfig::default())
            .unwrap()
            .classify(&entity, &attrs, checked_at)
            .unwrap();

        store.put("NVDA", &value, DAY).unwrap();

        let entry = store.get("NVDA", false).unwrap().unwrap();
        assert_eq!(entry.value, value);
        assert_eq!(entry.written_at, checked_at);
    }

    #[test]
    fn put_overwrites_previous_entry() {
        let (_dir, clock, store) = setup();
        store
            .put("AAPL", &result("AAPL", ComplianceStatus::Unknown, start()), DAY)
            .unwrap();
        clock.advance(DAY);
        let newer = result("AAPL", ComplianceStatus::Compliant, clock.now());
        store.put("AAPL", &newer, DAY).unwrap();

        let entry = store.get("AAPL", false).unwrap().unwrap();
        assert_eq!(entry.value.status, ComplianceStatus::Compliant);
        assert_eq!(entry.written_at, clock.now());
        assert_eq!(store.stats().unwrap().count, 1);
    }

    #[test]
    fn invalidate_and_purge_expired() {
        let (_dir, clock, store) = setup();
        store
            .put("OLD1", &result("OLD1", ComplianceStatus::Compliant, start()), DAY)
            .unwrap();
        store
            .put("OLD2", &result("OLD2", ComplianceStatus::Compliant, start()), DAY)
            .unwrap();
        clock.advance(DAY * 2);
        store
            .put("NEW", &result("NEW", ComplianceStatus::Compliant, clock.now()), DAY)
            .unwrap();

        let stats = store.stats().unwrap();
        assert_eq!(stats.count, 3);
        assert_eq!(stats.expired_count, 2);
        assert!(stats.bytes > 0);

        assert!(store.invalidate("OLD1").unwrap());
        assert!(!store.invalidate("OLD1").unwrap());

        assert_eq!(store.purge_expired().unwrap(), 1);
        assert_eq!(store.purge_expired().unwrap(), 0);
        let stats = store.stats().unwrap();
        assert_eq!(stats.count, 1);
        assert_eq!(stats.expired_count, 0);
    }

    #[test]
    fn empty_store_stats() {
        let (_dir, _clock, store) = setup();
        assert_eq!(store.stats().unwrap(), CacheStats::default());
    }

    #[test]
    fn unreadable_payload_is_a_miss() {
        let (_dir, _clock, store) = setup();
        let mut conn = get_connection(&store.pool).unwrap();
        diesel::insert_into(screening_cache::table)
            .values(&ScreeningCacheDB {
                cache_key: "BROKEN".to_string(),
                payload: "not json".to_string(),
                written_at: "2026-01-10T00:00:00Z".to_string(),
                ttl_millis: 86_400_000,
            })
            .execute(&mut conn)
            .unwrap();
        drop(conn);

        assert!(store.get("BROKEN", true).unwrap().is_none());
    }

    #[test]
    fn entries_survive_reopening_the_database() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("amanah.db");
        let clock = Arc::new(ManualClock::new(start()));
        let value = result("AAPL", ComplianceStatus::NonCompliant, start());

        {
            let pool = db::open(db_path.to_str().unwrap()).unwrap();
            SqliteCacheStore::with_clock(pool, clock.clone())
                .put("AAPL", &value, DAY)
                .unwrap();
        }

        let pool = db::open(db_path.to_str().unwrap()).unwrap();
        let store = SqliteCacheStore::with_clock(pool, clock);
        assert_eq!(store.get("AAPL", false).unwrap().unwrap().value, value);
    }

    #[test]
    fn concurrent_writers_and_readers() {
        let (_dir, _clock, store) = setup();
        let store = Arc::new(store);

        let handles: Vec<_> = (0..4)
            .map(|t| {
                let store = store.clone();
                std::thread::spawn(move || {
                    for i in 0..10 {
                        let key = format!("T{}-{}", t, i);
                        store
                            .put(&key, &result(&key, ComplianceStatus::Compliant, start()), DAY)
                            .unwrap();
                        assert!(store.get(&key, false).unwrap().is_some());
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(store.stats().unwrap().count, 40);
    }
}
