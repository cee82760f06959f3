//! Tests for ScreeningPipeline contracts and edge cases.
//!
//! # Critical Contract Points
//!
//! 1. Coverage: every input entity ends with exactly one result
//! 2. Cache: fresh results are written with `written_at == checked_at` and served on the next run
//! 3. Breaker: consecutive rate limits open it, not-found errors never do
//! 4. Fallback: an open breaker or failed fetch degrades to stale cache, then UNKNOWN/ERROR
//! 5. Delays: item/batch/rate-limit delays follow upstream calls only
//! 6. Aborts: cache failures and cancellation stop the run, cached work stays

#[cfg(test)]
mod tests {
    use crate::errors::{Error, Result};
    use crate::screening::{
        CacheEntry, CacheStats, CacheStore, ClassificationResult, Classifier, ClassifierConfig,
        ComplianceStatus, DataSource, MemoryCacheStore, PipelineConfig, RunState,
        ScreeningPipeline, ScreeningProgressReporter, ScreeningReport, BREAKER_OPEN_NO_CACHE,
    };
    use crate::screening::progress::BatchProgress;
    use amanah_market_data::{
        Admission, AttributeSource, Backoff, CircuitBreaker, CircuitState, Clock, Entity,
        FetchedAttributes, ManualClock, MarketDataError, RecordingSleeper,
    };
    use async_trait::async_trait;
    use chrono::{DateTime, TimeZone, Utc};
    use proptest::prelude::*;
    use std::collections::{HashMap, VecDeque};
    use std::sync::{Arc, Mutex};
    use std::time::Duration;
    use tokio_util::sync::CancellationToken;

    const DAY: Duration = Duration::from_secs(86_400);

    // =========================================================================
    // Mock AttributeSource
    // =========================================================================

    #[derive(Clone, Copy, Debug)]
    enum Step {
        Healthy,
        Bank,
        Sparse,
        Malformed,
        RateLimited,
        Transient,
        NotFound,
    }

    #[derive(Default)]
    struct MockSource {
        scripts: Mutex<HashMap<String, VecDeque<Step>>>,
        calls: Mutex<Vec<String>>,
        cancel_on_call: Mutex<Option<(usize, CancellationToken)>>,
        clock: Mutex<Option<Arc<ManualClock>>>,
    }

    impl MockSource {
        fn new() -> Self {
            Self::default()
        }

        /// Outcomes for `id`, one per call. Once exhausted, the last step repeats.
        fn script(&self, id: &str, steps: &[Step]) {
            self.scripts
                .lock()
                .unwrap()
                .insert(id.to_string(), steps.iter().copied().collect());
        }

        fn cancel_on_call(&self, call: usize, token: CancellationToken) {
            *self.cancel_on_call.lock().unwrap() = Some((call, token));
        }

        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }

        fn next_step(&self, id: &str) -> Step {
            let mut scripts = self.scripts.lock().unwrap();
            match scripts.get_mut(id) {
                Some(steps) if steps.len() > 1 => steps.pop_front().unwrap(),
                Some(steps) => steps.front().copied().unwrap_or(Step::Healthy),
                None => Step::Healthy,
            }
        }

        fn now(&self) -> DateTime<Utc> {
            match self.clock.lock().unwrap().as_ref() {
                Some(clock) => clock.now(),
                None => start(),
            }
        }
    }

    #[async_trait]
    impl AttributeSource for MockSource {
        fn id(&self) -> &'static str {
            "MOCK"
        }

        async fn fetch_attributes(
            &self,
            entity: &Entity,
        ) -> std::result::Result<FetchedAttributes, MarketDataError> {
            let call_number = {
                let mut calls = self.calls.lock().unwrap();
                calls.push(entity.id.clone());
                calls.len()
            };
            if let Some((at, token)) = self.cancel_on_call.lock().unwrap().as_ref() {
                if *at == call_number {
                    token.cancel();
                }
            }

            let base = FetchedAttributes::new(entity.id.clone(), self.now()).source("MOCK");
            match self.next_step(&entity.id) {
                Step::Healthy => Ok(base
                    .sector("Technology")
                    .industry("Software - Infrastructure")
                    .market_cap(5e9)
                    .debt_to_equity(0.1)),
                Step::Bank => Ok(base
                    .sector("Financial Services")
                    .industry("Banks - Diversified")
                    .name(format!("{} Bank", entity.id))
                    .market_cap(1e10)
                    .debt_to_equity(2.0)),
                Step::Sparse => Ok(base.sector("Technology")),
                Step::Malformed => Ok(base.market_cap(f64::NAN).debt_to_equity(0.1)),
                Step::RateLimited => Err(MarketDataError::rate_limited("MOCK")),
                Step::Transient => Err(MarketDataError::provider("MOCK", "HTTP 503")),
                Step::NotFound => Err(MarketDataError::SymbolNotFound(entity.id.clone())),
            }
        }
    }

    // =========================================================================
    // Mock CacheStore and reporter
    // =========================================================================

    struct UnavailableCache;

    impl CacheStore for UnavailableCache {
        fn get(&self, _key: &str, _ignore_ttl: bool) -> Result<Option<CacheEntry>> {
            Err(Error::CacheUnavailable("database is locked".into()))
        }

        fn put(
            &self,
            _key: &str,
            _value: &ClassificationResult,
            _ttl: Duration,
        ) -> Result<CacheEntry> {
            Err(Error::CacheUnavailable("database is locked".into()))
        }

        fn stats(&self) -> Result<CacheStats> {
            Err(Error::CacheUnavailable("database is locked".into()))
        }

        fn invalidate(&self, _key: &str) -> Result<bool> {
            Err(Error::CacheUnavailable("database is locked".into()))
        }

        fn purge_expired(&self) -> Result<usize> {
            Err(Error::CacheUnavailable("database is locked".into()))
        }
    }

    #[derive(Default)]
    struct RecordingReporter {
        events: Mutex<Vec<String>>,
    }

    impl RecordingReporter {
        fn events(&self) -> Vec<String> {
            self.events.lock().unwrap().clone()
        }
    }

    impl ScreeningProgressReporter for RecordingReporter {
        fn run_started(&self, total_entities: usize, total_batches: usize) {
            self.events
                .lock()
                .unwrap()
                .push(format!("started {} {}", total_entities, total_batches));
        }

        fn batch_completed(&self, progress: &BatchProgress) {
            self.events.lock().unwrap().push(format!(
                "batch {} {}/{}",
                progress.batch_index, progress.processed, progress.total_entities
            ));
        }

        fn run_completed(&self, report: &ScreeningReport) {
            self.events
                .lock()
                .unwrap()
                .push(format!("completed {}", report.total()));
        }

        fn run_aborted(&self, processed: usize, total_entities: usize, _reason: &str) {
            self.events
                .lock()
                .unwrap()
                .push(format!("aborted {}/{}", processed, total_entities));
        }
    }

    // =========================================================================
    // Fixture
    // =========================================================================

    fn start() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 6, 1, 9, 0, 0).unwrap()
    }

    struct Fixture {
        clock: Arc<ManualClock>,
        sleeper: Arc<RecordingSleeper>,
        cache: Arc<MemoryCacheStore>,
        source: Arc<MockSource>,
    }

    impl Fixture {
        fn new() -> Self {
            let clock = Arc::new(ManualClock::new(start()));
            let source = Arc::new(MockSource::new());
            *source.clock.lock().unwrap() = Some(clock.clone());
            Self {
                sleeper: Arc::new(RecordingSleeper::with_clock(clock.clone())),
                cache: Arc::new(MemoryCacheStore::with_clock(clock.clone())),
                source,
                clock,
            }
        }

        fn pipeline(&self, config: PipelineConfig) -> ScreeningPipeline {
            ScreeningPipeline::builder(self.source.clone(), self.cache.clone())
                .config(config)
                .clock(self.clock.clone())
                .sleeper(self.sleeper.clone())
                .build()
                .unwrap()
        }

        /// Put a compliant result for `id` in the cache, checked `age` ago.
        fn seed_cache(&self, id: &str, age: Duration, ttl: Duration) -> ClassificationResult {
            let checked_at = self.clock.now() - chrono::Duration::from_std(age).unwrap();
            let entity = entity(id);
            let attrs = FetchedAttributes::new(id, checked_at)
                .sector("Technology")
                .industry("Semiconductors")
                .market_cap(8e9)
                .debt_to_equity(0.2);
            let value = Classifier::new(ClassifierConfig::default())
                .unwrap()
                .classify(&entity, &attrs, checked_at)
                .unwrap();
            self.cache
                .insert_entry(CacheEntry::new(id, value.clone(), ttl));
            value
        }
    }

    fn entity(id: &str) -> Entity {
        Entity::new(id, format!("{} Holdings", id))
    }

    fn universe(n: usize) -> Vec<Entity> {
        (0..n).map(|i| entity(&format!("E{:02}", i))).collect()
    }

    /// No delays, no retries, breaker threshold 3.
    fn instant_config() -> PipelineConfig {
        PipelineConfig {
            max_retries: 0,
            ..PipelineConfig::without_delays()
        }
    }

    /// Small batches with distinct, observable delays.
    fn timed_config() -> PipelineConfig {
        PipelineConfig {
            batch_size: 2,
            delay_between_items: Duration::from_secs(1),
            delay_between_batches: Duration::from_secs(20),
            rate_limit_delay: Duration::from_secs(45),
            max_retries: 2,
            backoff: Some(Backoff::Fixed {
                delay: Duration::from_secs(3),
            }),
            ..PipelineConfig::default()
        }
    }

    fn assert_covers(report: &ScreeningReport, entities: &[Entity]) {
        assert_eq!(report.total(), entities.len());
        for entity in entities {
            let count = report
                .results()
                .filter(|r| r.entity_id == entity.id)
                .count();
            assert_eq!(count, 1, "{} should appear exactly once", entity.id);
        }
    }

    // =========================================================================
    // Coverage and classification routing
    // =========================================================================

    #[tokio::test]
    async fn test_every_entity_gets_exactly_one_result() {
        let fx = Fixture::new();
        fx.source.script("E01", &[Step::Bank]);
        fx.source.script("E02", &[Step::Sparse]);
        fx.source.script("E03", &[Step::NotFound]);
        fx.source.script("E04", &[Step::Transient]);
        let entities = universe(6);

        let report = fx
            .pipeline(instant_config())
            .run(&entities, &CancellationToken::new())
            .await
            .unwrap();

        assert_covers(&report, &entities);
        assert_eq!(report.compliant.len(), 2);
        assert_eq!(report.non_compliant.len(), 1);
        assert_eq!(report.unknown.len(), 1);
        assert_eq!(report.error.len(), 2);
        assert_eq!(report.run_state, RunState::Completed);

        let stats = &report.stats;
        assert_eq!(stats.total_processed, 6);
        assert_eq!(stats.compliant_count, 2);
        assert_eq!(stats.non_compliant_count, 1);
        assert_eq!(stats.unknown_count, 1);
        assert_eq!(stats.error_count, 2);
        assert!((stats.success_rate - 4.0 / 6.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_report_keeps_input_order_within_partitions() {
        let fx = Fixture::new();
        let entities = universe(7);
        let config = PipelineConfig {
            batch_size: 2,
            ..instant_config()
        };

        let report = fx
            .pipeline(config)
            .run(&entities, &CancellationToken::new())
            .await
            .unwrap();

        let ids: Vec<_> = report.compliant.iter().map(|r| r.entity_id.clone()).collect();
        let expected: Vec<_> = entities.iter().map(|e| e.id.clone()).collect();
        assert_eq!(ids, expected);
        assert_eq!(report.stats.total_batches, 4);
    }

    #[tokio::test]
    async fn test_empty_universe_completes() {
        let fx = Fixture::new();
        let pipeline = fx.pipeline(instant_config());

        let report = pipeline.run(&[], &CancellationToken::new()).await.unwrap();

        assert_eq!(report.total(), 0);
        assert_eq!(report.stats.total_batches, 0);
        assert_eq!(pipeline.state(), RunState::Completed);
    }

    #[tokio::test]
    async fn test_not_found_is_error_with_no_source() {
        let fx = Fixture::new();
        fx.source.script("GONE", &[Step::NotFound]);

        let report = fx
            .pipeline(instant_config())
            .run(&[entity("GONE")], &CancellationToken::new())
            .await
            .unwrap();

        let result = report.find("GONE").unwrap();
        assert_eq!(result.status, ComplianceStatus::Error);
        assert_eq!(result.source_of_data, DataSource::None);
        assert!(result.reasons[0].contains("not found"));
    }

    #[tokio::test]
    async fn test_malformed_attributes_become_error_and_are_not_cached() {
        let fx = Fixture::new();
        fx.source.script("BAD", &[Step::Malformed]);
        let pipeline = fx.pipeline(instant_config());

        let report = pipeline
            .run(&[entity("BAD")], &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(report.error.len(), 1);
        assert!(fx.cache.get("BAD", true).unwrap().is_none());
        // Upstream answered, so this is not a breaker failure
        assert_eq!(pipeline.circuit_breaker().failure_count(), 0);
    }

    // =========================================================================
    // Cache behaviour
    // =========================================================================

    #[tokio::test]
    async fn test_fresh_result_is_cached_with_written_at_equal_checked_at() {
        let fx = Fixture::new();

        let report = fx
            .pipeline(instant_config())
            .run(&[entity("AAA")], &CancellationToken::new())
            .await
            .unwrap();

        let result = report.find("AAA").unwrap();
        assert_eq!(result.source_of_data, DataSource::Fresh);
        let entry = fx.cache.get("AAA", false).unwrap().unwrap();
        assert_eq!(entry.written_at, result.checked_at);
        assert_eq!(entry.value, *result);
        assert_eq!(entry.ttl, 90 * DAY);
    }

    #[tokio::test]
    async fn test_second_run_is_served_from_cache_without_delays() {
        let fx = Fixture::new();
        let entities = universe(4);
        let pipeline = fx.pipeline(timed_config());

        pipeline
            .run(&entities, &CancellationToken::new())
            .await
            .unwrap();
        let calls_after_first = fx.source.calls().len();
        let sleeps_after_first = fx.sleeper.calls().len();

        let report = pipeline
            .run(&entities, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(fx.source.calls().len(), calls_after_first);
        assert_eq!(fx.sleeper.calls().len(), sleeps_after_first);
        assert!(report
            .results()
            .all(|r| r.source_of_data == DataSource::Cache));
        assert_eq!(report.stats.cache_used_count, 4);
        assert!((report.stats.cache_usage_rate - 1.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_force_refresh_bypasses_fresh_cache() {
        let fx = Fixture::new();
        fx.seed_cache("AAA", DAY, 90 * DAY);
        let config = PipelineConfig {
            force_refresh: true,
            ..instant_config()
        };

        let report = fx
            .pipeline(config)
            .run(&[entity("AAA")], &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(fx.source.calls(), vec!["AAA".to_string()]);
        assert_eq!(
            report.find("AAA").unwrap().source_of_data,
            DataSource::Fresh
        );
        assert_eq!(
            fx.cache.get("AAA", false).unwrap().unwrap().written_at,
            fx.clock.now()
        );
    }

    #[tokio::test]
    async fn test_expired_entry_is_refetched() {
        let fx = Fixture::new();
        fx.seed_cache("OLD", 95 * DAY, 90 * DAY);

        let report = fx
            .pipeline(instant_config())
            .run(&[entity("OLD")], &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(fx.source.calls().len(), 1);
        assert_eq!(
            report.find("OLD").unwrap().source_of_data,
            DataSource::Fresh
        );
    }

    #[tokio::test]
    async fn test_failed_fetch_falls_back_to_stale_cache() {
        let fx = Fixture::new();
        let cached = fx.seed_cache("FLAKY", 120 * DAY, 90 * DAY);
        fx.source.script("FLAKY", &[Step::Transient]);

        let report = fx
            .pipeline(instant_config())
            .run(&[entity("FLAKY")], &CancellationToken::new())
            .await
            .unwrap();

        let result = report.find("FLAKY").unwrap();
        assert_eq!(result.source_of_data, DataSource::StaleCacheFallback);
        assert_eq!(result.status, cached.status);
        assert_eq!(result.checked_at, cached.checked_at);
        assert!(result.reasons.last().unwrap().contains("fetch failed"));
        assert_eq!(report.stats.stale_fallback_count, 1);
        // The cached entry itself is untouched
        assert_eq!(
            fx.cache.get("FLAKY", true).unwrap().unwrap().value,
            cached
        );
    }

    #[tokio::test]
    async fn test_cache_failure_aborts_run() {
        let fx = Fixture::new();
        let reporter = Arc::new(RecordingReporter::default());
        let pipeline = ScreeningPipeline::builder(fx.source.clone(), Arc::new(UnavailableCache))
            .config(instant_config())
            .clock(fx.clock.clone())
            .sleeper(fx.sleeper.clone())
            .progress_reporter(reporter.clone())
            .build()
            .unwrap();

        let err = pipeline
            .run(&universe(3), &CancellationToken::new())
            .await
            .unwrap_err();

        assert!(matches!(err, Error::CacheUnavailable(_)));
        assert_eq!(pipeline.state(), RunState::Aborted);
        assert!(fx.source.calls().is_empty());
        assert_eq!(reporter.events().last().unwrap(), "aborted 0/3");
    }

    // =========================================================================
    // Circuit breaker
    // =========================================================================

    #[tokio::test]
    async fn test_breaker_trips_after_three_rate_limits() {
        let fx = Fixture::new();
        for id in ["R1", "R2", "R3"] {
            fx.source.script(id, &[Step::RateLimited]);
        }
        // Expired, so only the ignore-TTL lookup finds it
        fx.seed_cache("STALE", 95 * DAY, 90 * DAY);
        let entities: Vec<Entity> = ["R1", "R2", "R3", "STALE", "NONE"]
            .iter()
            .map(|id| entity(id))
            .collect();
        let pipeline = fx.pipeline(instant_config());

        let report = pipeline
            .run(&entities, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(fx.source.calls(), vec!["R1", "R2", "R3"]);
        assert_eq!(pipeline.circuit_breaker().state(), CircuitState::Open);
        assert!(pipeline.circuit_breaker().allow_fresh_fetch().is_none());

        let stale = report.find("STALE").unwrap();
        assert_eq!(stale.source_of_data, DataSource::StaleCacheFallback);
        assert_eq!(stale.status, ComplianceStatus::Compliant);

        let none = report.find("NONE").unwrap();
        assert_eq!(none.status, ComplianceStatus::Unknown);
        assert_eq!(none.source_of_data, DataSource::None);
        assert_eq!(none.reasons, vec![BREAKER_OPEN_NO_CACHE.to_string()]);

        for id in ["R1", "R2", "R3"] {
            assert_eq!(report.find(id).unwrap().status, ComplianceStatus::Error);
        }
        assert_eq!(report.stats.rate_limited_count, 3);
        assert_eq!(report.stats.circuit_breaker_activations, 1);
        assert_covers(&report, &entities);
    }

    #[tokio::test]
    async fn test_not_found_never_opens_breaker() {
        let fx = Fixture::new();
        let entities = universe(50);
        for e in &entities {
            fx.source.script(&e.id, &[Step::NotFound]);
        }
        let pipeline = fx.pipeline(instant_config());

        let report = pipeline
            .run(&entities, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(fx.source.calls().len(), 50);
        assert_eq!(report.error.len(), 50);
        assert_eq!(pipeline.circuit_breaker().state(), CircuitState::Closed);
        assert_eq!(pipeline.circuit_breaker().failure_count(), 0);
        assert_eq!(report.stats.circuit_breaker_activations, 0);
    }

    #[tokio::test]
    async fn test_open_breaker_serves_95_day_old_entry() {
        let fx = Fixture::new();
        let breaker = Arc::new(CircuitBreaker::with_clock(
            instant_config().breaker_config(),
            fx.clock.clone(),
        ));
        for _ in 0..3 {
            breaker.record_failure(Admission::Normal, true);
        }
        fx.seed_cache("OLD", 95 * DAY, 90 * DAY);
        let pipeline = ScreeningPipeline::builder(fx.source.clone(), fx.cache.clone())
            .config(instant_config())
            .circuit_breaker(breaker.clone())
            .clock(fx.clock.clone())
            .sleeper(fx.sleeper.clone())
            .build()
            .unwrap();

        let report = pipeline
            .run(&[entity("OLD")], &CancellationToken::new())
            .await
            .unwrap();

        let result = report.find("OLD").unwrap();
        assert_eq!(result.source_of_data, DataSource::StaleCacheFallback);
        assert!(fx.source.calls().is_empty());
        assert!(result.reasons.last().unwrap().contains("95 days old"));
    }

    #[tokio::test]
    async fn test_half_open_probe_closes_breaker_after_cooldown() {
        let fx = Fixture::new();
        fx.source.script("A", &[Step::Transient]);
        let config = PipelineConfig {
            batch_size: 1,
            circuit_breaker_threshold: 1,
            circuit_breaker_cooldown: Duration::from_secs(300),
            delay_between_batches: Duration::from_secs(301),
            ..instant_config()
        };
        let entities: Vec<Entity> = ["A", "B", "C"].iter().map(|id| entity(id)).collect();
        let pipeline = fx.pipeline(config);

        let report = pipeline
            .run(&entities, &CancellationToken::new())
            .await
            .unwrap();

        // A opens the circuit; the batch delay outlasts the cooldown so B is the probe
        assert_eq!(fx.source.calls(), vec!["A", "B", "C"]);
        assert_eq!(pipeline.circuit_breaker().state(), CircuitState::Closed);
        assert_eq!(report.stats.circuit_breaker_activations, 1);
        assert_eq!(report.find("B").unwrap().source_of_data, DataSource::Fresh);
    }

    #[tokio::test]
    async fn test_breaker_is_shared_across_runs() {
        let fx = Fixture::new();
        for id in ["R1", "R2", "R3"] {
            fx.source.script(id, &[Step::RateLimited]);
        }
        let pipeline = fx.pipeline(instant_config());
        let first: Vec<Entity> = ["R1", "R2", "R3"].iter().map(|id| entity(id)).collect();
        pipeline
            .run(&first, &CancellationToken::new())
            .await
            .unwrap();

        let report = pipeline
            .run(&[entity("LATER")], &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(fx.source.calls().len(), 3);
        assert_eq!(report.find("LATER").unwrap().status, ComplianceStatus::Unknown);
        assert_eq!(report.stats.circuit_breaker_activations, 0);
    }

    // =========================================================================
    // Delays
    // =========================================================================

    #[tokio::test]
    async fn test_rate_limited_batch_uses_extended_delay() {
        let fx = Fixture::new();
        fx.source.script("E00", &[Step::RateLimited, Step::Healthy]);
        let entities = universe(4);

        let report = fx
            .pipeline(timed_config())
            .run(&entities, &CancellationToken::new())
            .await
            .unwrap();

        // backoff, item delay, rate-limit delay, item delay; nothing after the last batch
        assert_eq!(
            fx.sleeper.calls(),
            vec![
                Duration::from_secs(3),
                Duration::from_secs(1),
                Duration::from_secs(45),
                Duration::from_secs(1),
            ]
        );
        assert_eq!(report.compliant.len(), 4);
        assert_eq!(report.stats.rate_limited_count, 1);
        assert_eq!(report.stats.total_batches, 2);
        // 4s for the first batch, 1s for the second; batch delays are not counted
        assert!((report.stats.average_batch_duration_ms - 2500.0).abs() < 1e-6);
    }

    #[tokio::test]
    async fn test_regular_batches_use_batch_delay() {
        let fx = Fixture::new();

        fx.pipeline(timed_config())
            .run(&universe(5), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(
            fx.sleeper.calls(),
            vec![
                Duration::from_secs(1),
                Duration::from_secs(20),
                Duration::from_secs(1),
                Duration::from_secs(20),
            ]
        );
    }

    // =========================================================================
    // Cancellation and concurrency
    // =========================================================================

    #[tokio::test]
    async fn test_cancellation_stops_run_and_keeps_cached_work() {
        let fx = Fixture::new();
        let cancel = CancellationToken::new();
        fx.source.cancel_on_call(3, cancel.clone());
        let reporter = Arc::new(RecordingReporter::default());
        let pipeline = ScreeningPipeline::builder(fx.source.clone(), fx.cache.clone())
            .config(PipelineConfig {
                batch_size: 2,
                ..instant_config()
            })
            .clock(fx.clock.clone())
            .sleeper(fx.sleeper.clone())
            .progress_reporter(reporter.clone())
            .build()
            .unwrap();

        let err = pipeline.run(&universe(5), &cancel).await.unwrap_err();

        match err {
            Error::Cancelled { processed, total } => {
                assert_eq!(processed, 3);
                assert_eq!(total, 5);
            }
            other => panic!("expected cancellation, got {other}"),
        }
        assert_eq!(pipeline.state(), RunState::Aborted);
        assert_eq!(fx.cache.len(), 3);
        assert_eq!(reporter.events().last().unwrap(), "aborted 3/5");
    }

    #[tokio::test]
    async fn test_pre_cancelled_run_processes_nothing() {
        let fx = Fixture::new();
        let cancel = CancellationToken::new();
        cancel.cancel();
        let pipeline = fx.pipeline(instant_config());

        let err = pipeline.run(&universe(2), &cancel).await.unwrap_err();

        assert!(err.is_cancelled());
        assert!(fx.source.calls().is_empty());
        assert!(pipeline.circuit_breaker().allow_fresh_fetch().is_some());
    }

    /// Source whose fetch never completes.
    struct HangingSource;

    #[async_trait]
    impl AttributeSource for HangingSource {
        fn id(&self) -> &'static str {
            "HANGING"
        }

        async fn fetch_attributes(
            &self,
            _entity: &Entity,
        ) -> std::result::Result<FetchedAttributes, MarketDataError> {
            std::future::pending().await
        }
    }

    #[tokio::test]
    async fn test_cancel_during_probe_releases_half_open_slot() {
        let fx = Fixture::new();
        let config = PipelineConfig {
            circuit_breaker_threshold: 1,
            ..instant_config()
        };
        let breaker = Arc::new(CircuitBreaker::with_clock(
            config.breaker_config(),
            fx.clock.clone(),
        ));
        breaker.record_failure(Admission::Normal, false);
        fx.clock.advance(Duration::from_secs(301));
        let pipeline = ScreeningPipeline::builder(Arc::new(HangingSource), fx.cache.clone())
            .config(config)
            .circuit_breaker(breaker.clone())
            .clock(fx.clock.clone())
            .sleeper(fx.sleeper.clone())
            .build()
            .unwrap();
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::task::yield_now().await;
            trigger.cancel();
        });

        let err = pipeline.run(&[entity("PROBE")], &cancel).await.unwrap_err();

        assert!(err.is_cancelled());
        assert_eq!(breaker.state(), CircuitState::HalfOpen);
        // The slot is free again for the next caller
        assert!(breaker.allow_fresh_fetch().is_some_and(|a| a.is_probe()));
    }

    /// Source that lets an older fetch finish while its own fetch is running.
    struct OverlappingSource {
        breaker: Arc<CircuitBreaker>,
        late: Admission,
        observed: Mutex<Vec<(CircuitState, bool)>>,
    }

    #[async_trait]
    impl AttributeSource for OverlappingSource {
        fn id(&self) -> &'static str {
            "OVERLAP"
        }

        async fn fetch_attributes(
            &self,
            entity: &Entity,
        ) -> std::result::Result<FetchedAttributes, MarketDataError> {
            self.breaker
                .record_error(self.late, &MarketDataError::SymbolNotFound("LATE".to_string()));
            self.breaker.record_success(self.late);
            self.observed.lock().unwrap().push((
                self.breaker.state(),
                self.breaker.allow_fresh_fetch().is_some(),
            ));
            Ok(FetchedAttributes::new(entity.id.clone(), start())
                .sector("Technology")
                .industry("Software - Infrastructure")
                .market_cap(5e9)
                .debt_to_equity(0.1))
        }
    }

    #[tokio::test]
    async fn test_late_closed_outcome_cannot_resolve_half_open_breaker() {
        let fx = Fixture::new();
        let config = PipelineConfig {
            circuit_breaker_threshold: 1,
            ..instant_config()
        };
        let breaker = Arc::new(CircuitBreaker::with_clock(
            config.breaker_config(),
            fx.clock.clone(),
        ));
        let late = breaker.allow_fresh_fetch().unwrap();
        let tripping = breaker.allow_fresh_fetch().unwrap();
        assert!(breaker.record_failure(tripping, true));
        fx.clock.advance(Duration::from_secs(301));

        let source = Arc::new(OverlappingSource {
            breaker: breaker.clone(),
            late,
            observed: Mutex::new(Vec::new()),
        });
        let pipeline = ScreeningPipeline::builder(source.clone(), fx.cache.clone())
            .config(config)
            .circuit_breaker(breaker.clone())
            .clock(fx.clock.clone())
            .sleeper(fx.sleeper.clone())
            .build()
            .unwrap();

        let report = pipeline
            .run(&[entity("HALF")], &CancellationToken::new())
            .await
            .unwrap();

        // While the HalfOpen fetch ran, the late outcome changed nothing.
        assert_eq!(
            *source.observed.lock().unwrap(),
            vec![(CircuitState::HalfOpen, false)]
        );
        assert_eq!(report.find("HALF").unwrap().status, ComplianceStatus::Compliant);
        assert_eq!(breaker.state(), CircuitState::Closed);
    }

    #[tokio::test]
    async fn test_concurrent_batches_cover_everything() {
        let fx = Fixture::new();
        let entities = universe(20);
        fx.source.script("E07", &[Step::NotFound]);
        let config = PipelineConfig {
            batch_size: 3,
            max_concurrent_batches: 4,
            ..instant_config()
        };

        let report = fx
            .pipeline(config)
            .run(&entities, &CancellationToken::new())
            .await
            .unwrap();

        assert_covers(&report, &entities);
        assert_eq!(report.stats.total_batches, 7);
        assert_eq!(fx.source.calls().len(), 20);
        assert_eq!(report.error.len(), 1);
    }

    #[tokio::test]
    async fn test_progress_reporter_sees_every_batch() {
        let fx = Fixture::new();
        let reporter = Arc::new(RecordingReporter::default());
        let pipeline = ScreeningPipeline::builder(fx.source.clone(), fx.cache.clone())
            .config(PipelineConfig {
                batch_size: 2,
                ..instant_config()
            })
            .clock(fx.clock.clone())
            .sleeper(fx.sleeper.clone())
            .progress_reporter(reporter.clone())
            .build()
            .unwrap();

        pipeline
            .run(&universe(3), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(
            reporter.events(),
            vec!["started 3 2", "batch 0 2/3", "batch 1 3/3", "completed 3"]
        );
    }

    #[test]
    fn test_invalid_config_is_rejected_at_build() {
        let fx = Fixture::new();
        let result = ScreeningPipeline::builder(fx.source.clone(), fx.cache.clone())
            .config(PipelineConfig {
                batch_size: 0,
                ..PipelineConfig::default()
            })
            .build();

        assert!(matches!(result, Err(Error::Config(_))));
    }

    // =========================================================================
    // Properties
    // =========================================================================

    fn arb_step() -> impl Strategy<Value = Step> {
        prop_oneof![
            4 => Just(Step::Healthy),
            1 => Just(Step::Bank),
            1 => Just(Step::Sparse),
            1 => Just(Step::RateLimited),
            1 => Just(Step::Transient),
            1 => Just(Step::NotFound),
        ]
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(48))]

        #[test]
        fn prop_report_covers_every_entity_exactly_once(
            steps in prop::collection::vec(arb_step(), 0..40),
            batch_size in 1usize..8,
            concurrency in 1usize..4,
            cached in prop::collection::vec(any::<bool>(), 40),
        ) {
            let fx = Fixture::new();
            let entities = universe(steps.len());
            for (i, (e, step)) in entities.iter().zip(&steps).enumerate() {
                fx.source.script(&e.id, &[*step]);
                if cached[i] {
                    fx.seed_cache(&e.id, 100 * DAY, 90 * DAY);
                }
            }
            let config = PipelineConfig {
                batch_size,
                max_concurrent_batches: concurrency,
                ..instant_config()
            };

            let runtime = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
                .unwrap();
            let report = runtime
                .block_on(fx.pipeline(config).run(&entities, &CancellationToken::new()))
                .unwrap();

            prop_assert_eq!(report.total(), entities.len());
            prop_assert_eq!(report.stats.total_processed, entities.len());
            for e in &entities {
                prop_assert_eq!(report.results().filter(|r| r.entity_id == e.id).count(), 1);
            }
            for r in report.results() {
                prop_assert!(r.source_of_data != DataSource::None || r.status != ComplianceStatus::Compliant);
            }
        }
    }
}
