//! Screening pipeline orchestrator.
//!
//! Splits the universe into batches and drives, per entity:
//! cache lookup -> circuit breaker -> batch fetcher -> classifier -> cache write.
//!
//! Entities inside a batch are processed sequentially; that is what bounds
//! the request rate. Whole batches may run concurrently when
//! `max_concurrent_batches > 1`, sharing one circuit breaker.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use log::{debug, error, info, warn};
use tokio_util::sync::CancellationToken;

use amanah_market_data::{
    Admission, AttributeSource, BatchFetcher, CircuitBreaker, Entity, FailureKind, FetchReport,
    SharedClock, SharedSleeper, SystemClock, TokioSleeper,
};

use super::cache::CacheStore;
use super::classifier::Classifier;
use super::config::{ClassifierConfig, PipelineConfig};
use super::model::{ClassificationResult, ComplianceStatus, DataSource};
use super::progress::{BatchProgress, NoopProgressReporter, ScreeningProgressReporter};
use super::stats::{BatchRunStats, RunState, ScreeningReport};
use crate::errors::{Error, Result};

/// Reason recorded when the breaker blocks a fetch and nothing is cached.
pub const BREAKER_OPEN_NO_CACHE: &str = "breaker open, no cache available";

/// Why a run stopped before processing every entity.
enum Halt {
    Cancelled,
    Failed(Error),
}

impl From<Error> for Halt {
    fn from(err: Error) -> Self {
        Halt::Failed(err)
    }
}

/// Final result of one entity plus what it cost upstream.
struct EntityOutcome {
    result: ClassificationResult,
    called_upstream: bool,
    rate_limited: bool,
}

/// Everything one batch produced.
struct BatchOutcome {
    index: usize,
    results: Vec<ClassificationResult>,
    rate_limited_entities: usize,
    duration: Duration,
}

/// Counters shared by the batch workers of one run.
struct RunProgress {
    processed: AtomicUsize,
    total_entities: usize,
    total_batches: usize,
}

/// Builder for [`ScreeningPipeline`].
pub struct ScreeningPipelineBuilder {
    source: Arc<dyn AttributeSource>,
    cache: Arc<dyn CacheStore>,
    config: PipelineConfig,
    classifier_config: ClassifierConfig,
    breaker: Option<Arc<CircuitBreaker>>,
    clock: SharedClock,
    sleeper: SharedSleeper,
    reporter: Arc<dyn ScreeningProgressReporter>,
}

impl ScreeningPipelineBuilder {
    pub fn config(mut self, config: PipelineConfig) -> Self {
        self.config = config;
        self
    }

    pub fn classifier_config(mut self, config: ClassifierConfig) -> Self {
        self.classifier_config = config;
        self
    }

    /// Share an existing breaker, e.g. across runs of a long-lived process.
    ///
    /// Without one, the pipeline builds its own from the config.
    pub fn circuit_breaker(mut self, breaker: Arc<CircuitBreaker>) -> Self {
        self.breaker = Some(breaker);
        self
    }

    pub fn clock(mut self, clock: SharedClock) -> Self {
        self.clock = clock;
        self
    }

    pub fn sleeper(mut self, sleeper: SharedSleeper) -> Self {
        self.sleeper = sleeper;
        self
    }

    pub fn progress_reporter(mut self, reporter: Arc<dyn ScreeningProgressReporter>) -> Self {
        self.reporter = reporter;
        self
    }

    /// Validate the configuration and assemble the pipeline.
    pub fn build(self) -> Result<ScreeningPipeline> {
        self.config.validate()?;
        let classifier = Classifier::new(self.classifier_config)?;

        let breaker = match self.breaker {
            Some(breaker) => breaker,
            None => Arc::new(CircuitBreaker::with_clock(
                self.config.breaker_config(),
                self.clock.clone(),
            )),
        };
        let fetcher = BatchFetcher::new(self.source, self.config.retry_policy())
            .with_sleeper(self.sleeper.clone());

        Ok(ScreeningPipeline {
            cache: self.cache,
            breaker,
            fetcher,
            classifier,
            config: self.config,
            clock: self.clock,
            sleeper: self.sleeper,
            reporter: self.reporter,
            state: Mutex::new(RunState::Pending),
        })
    }
}

/// Orchestrates a screening run over a universe of entities.
///
/// # Example
///
/// ```ignore
/// let pipeline = ScreeningPipeline::builder(source, cache)
///     .config(PipelineConfig::default())
///     .progress_reporter(Arc::new(LogProgressReporter))
///     .build()?;
/// let report = pipeline.run(&entities, &CancellationToken::new()).await?;
/// println!("{}", report.summary());
/// ```
pub struct ScreeningPipeline {
    cache: Arc<dyn CacheStore>,
    breaker: Arc<CircuitBreaker>,
    fetcher: BatchFetcher,
    classifier: Classifier,
    config: PipelineConfig,
    clock: SharedClock,
    sleeper: SharedSleeper,
    reporter: Arc<dyn ScreeningProgressReporter>,
    state: Mutex<RunState>,
}

impl ScreeningPipeline {
    pub fn builder(
        source: Arc<dyn AttributeSource>,
        cache: Arc<dyn CacheStore>,
    ) -> ScreeningPipelineBuilder {
        ScreeningPipelineBuilder {
            source,
            cache,
            config: PipelineConfig::default(),
            classifier_config: ClassifierConfig::default(),
            breaker: None,
            clock: Arc::new(SystemClock),
            sleeper: Arc::new(TokioSleeper),
            reporter: Arc::new(NoopProgressReporter),
        }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn circuit_breaker(&self) -> &Arc<CircuitBreaker> {
        &self.breaker
    }

    pub fn classifier(&self) -> &Classifier {
        &self.classifier
    }

    /// State of the current or most recent run.
    pub fn state(&self) -> RunState {
        *self.lock_state()
    }

    fn lock_state(&self) -> MutexGuard<'_, RunState> {
        self.state.lock().unwrap_or_else(|poisoned| {
            warn!("Run state mutex was poisoned, recovering");
            poisoned.into_inner()
        })
    }

    fn set_state(&self, state: RunState) {
        *self.lock_state() = state;
    }

    /// Screen every entity exactly once.
    ///
    /// Entity-level failures become a classification status and never abort
    /// the run. The run aborts only when the cache store fails or `cancel`
    /// fires; results already written to the cache stay there.
    pub async fn run(
        &self,
        entities: &[Entity],
        cancel: &CancellationToken,
    ) -> Result<ScreeningReport> {
        let total_entities = entities.len();
        let batches: Vec<&[Entity]> = entities.chunks(self.config.batch_size).collect();
        let progress = RunProgress {
            processed: AtomicUsize::new(0),
            total_entities,
            total_batches: batches.len(),
        };

        let started_at = self.clock.now();
        let activations_before = self.breaker.activations();

        info!(
            "Starting screening run: {} entities in {} batches (batch size {}, {} concurrent)",
            total_entities,
            progress.total_batches,
            self.config.batch_size,
            self.config.max_concurrent_batches
        );
        self.set_state(RunState::Running { batch: 0 });
        self.reporter
            .run_started(total_entities, progress.total_batches);

        // Own token so a failing batch can stop its siblings.
        let run_cancel = cancel.child_token();
        let mut pending = stream::iter(batches.into_iter().enumerate())
            .map(|(index, batch)| self.run_batch(index, batch, &progress, &run_cancel))
            .buffer_unordered(self.config.max_concurrent_batches);

        let mut outcomes = Vec::with_capacity(progress.total_batches);
        let mut halt: Option<Halt> = None;
        while let Some(outcome) = pending.next().await {
            match outcome {
                Ok(batch) => outcomes.push(batch),
                Err(Halt::Failed(err)) => {
                    run_cancel.cancel();
                    if !matches!(halt, Some(Halt::Failed(_))) {
                        halt = Some(Halt::Failed(err));
                    }
                }
                Err(Halt::Cancelled) => {
                    if halt.is_none() {
                        halt = Some(Halt::Cancelled);
                    }
                }
            }
        }
        drop(pending);

        let processed = progress.processed.load(Ordering::SeqCst);
        match halt {
            Some(Halt::Cancelled) => {
                self.set_state(RunState::Aborted);
                self.reporter
                    .run_aborted(processed, total_entities, "cancelled");
                info!(
                    "Screening run cancelled after {}/{} entities",
                    processed, total_entities
                );
                return Err(Error::Cancelled {
                    processed,
                    total: total_entities,
                });
            }
            Some(Halt::Failed(err)) => {
                self.set_state(RunState::Aborted);
                self.reporter
                    .run_aborted(processed, total_entities, &err.to_string());
                error!(
                    "Screening run aborted after {}/{} entities: {}",
                    processed, total_entities, err
                );
                return Err(err);
            }
            None => {}
        }

        outcomes.sort_by_key(|batch| batch.index);
        let mut stats = BatchRunStats::new(started_at);
        let mut results = Vec::with_capacity(total_entities);
        for batch in outcomes {
            stats.record_batch(batch.duration);
            for _ in 0..batch.rate_limited_entities {
                stats.record_rate_limited();
            }
            for result in &batch.results {
                stats.record_result(result);
            }
            results.extend(batch.results);
        }
        stats.finish(
            self.breaker
                .activations()
                .saturating_sub(activations_before),
            self.clock.now(),
        );

        let report = ScreeningReport::from_results(results, stats, RunState::Completed);
        debug_assert_eq!(report.total(), total_entities);

        self.set_state(RunState::Completed);
        self.reporter.run_completed(&report);
        info!("Screening run completed: {}", report.summary());
        Ok(report)
    }

    /// Process one batch sequentially, honouring the per-batch delays.
    async fn run_batch(
        &self,
        index: usize,
        batch: &[Entity],
        progress: &RunProgress,
        cancel: &CancellationToken,
    ) -> std::result::Result<BatchOutcome, Halt> {
        if cancel.is_cancelled() {
            return Err(Halt::Cancelled);
        }
        self.set_state(RunState::Running { batch: index });
        debug!(
            "Batch {}/{}: {} entities",
            index + 1,
            progress.total_batches,
            batch.len()
        );

        let started = self.clock.now();
        let mut results = Vec::with_capacity(batch.len());
        let mut rate_limited_entities = 0;
        let mut called_upstream = false;

        for (position, entity) in batch.iter().enumerate() {
            if cancel.is_cancelled() {
                return Err(Halt::Cancelled);
            }

            let outcome = self.process_entity(entity, cancel).await?;
            progress.processed.fetch_add(1, Ordering::SeqCst);
            debug!(
                "{}: {} ({:?}, score {:.2})",
                entity.id,
                outcome.result.status,
                outcome.result.source_of_data,
                outcome.result.score
            );

            if outcome.rate_limited {
                rate_limited_entities += 1;
            }
            called_upstream |= outcome.called_upstream;
            let pause_after = outcome.called_upstream && position + 1 < batch.len();
            results.push(outcome.result);

            if pause_after {
                self.pause(self.config.delay_between_items, cancel).await?;
            }
        }

        let duration = elapsed(started, self.clock.now());
        let rate_limited = rate_limited_entities > 0;
        self.reporter.batch_completed(&BatchProgress {
            batch_index: index,
            total_batches: progress.total_batches,
            entities_in_batch: batch.len(),
            processed: progress.processed.load(Ordering::SeqCst),
            total_entities: progress.total_entities,
            rate_limited,
            duration,
        });

        if called_upstream && index + 1 < progress.total_batches {
            let delay = if rate_limited {
                info!(
                    "Batch {} was rate limited, waiting {:?} before the next batch",
                    index + 1,
                    self.config.rate_limit_delay
                );
                self.config.rate_limit_delay
            } else {
                self.config.delay_between_batches
            };
            self.pause(delay, cancel).await?;
        }

        Ok(BatchOutcome {
            index,
            results,
            rate_limited_entities,
            duration,
        })
    }

    /// Resolve one entity to exactly one classification result.
    async fn process_entity(
        &self,
        entity: &Entity,
        cancel: &CancellationToken,
    ) -> std::result::Result<EntityOutcome, Halt> {
        let key = entity.cache_key();

        if !self.config.force_refresh {
            if let Some(entry) = self.cache.get(key, false)? {
                return Ok(EntityOutcome {
                    result: entry.value.with_source(DataSource::Cache),
                    called_upstream: false,
                    rate_limited: false,
                });
            }
        }

        let Some(admission) = self.breaker.allow_fresh_fetch() else {
            let result = match self.stale_fallback(entity, "circuit breaker open")? {
                Some(result) => result,
                None => ClassificationResult::unresolved(
                    &entity.id,
                    ComplianceStatus::Unknown,
                    BREAKER_OPEN_NO_CACHE,
                    self.clock.now(),
                ),
            };
            return Ok(EntityOutcome {
                result,
                called_upstream: false,
                rate_limited: false,
            });
        };

        let report = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                self.breaker.release_probe(admission);
                return Err(Halt::Cancelled);
            }
            report = self.fetcher.fetch(entity) => report,
        };

        let result = self.resolve_fetch(entity, &report, admission)?;
        Ok(EntityOutcome {
            result,
            called_upstream: true,
            rate_limited: report.rate_limited,
        })
    }

    /// Route a fetch outcome through classifier, cache and breaker.
    fn resolve_fetch(
        &self,
        entity: &Entity,
        report: &FetchReport,
        admission: Admission,
    ) -> Result<ClassificationResult> {
        let error = match &report.outcome {
            Ok(attrs) => {
                self.breaker.record_success(admission);
                let checked_at = self.clock.now();
                return match self.classifier.classify(entity, attrs, checked_at) {
                    Ok(result) => {
                        self.cache
                            .put(entity.cache_key(), &result, self.config.cache_ttl)?;
                        Ok(result)
                    }
                    Err(err) => {
                        error!("Classifier rejected attributes for {}: {}", entity.id, err);
                        Ok(ClassificationResult::unresolved(
                            &entity.id,
                            ComplianceStatus::Error,
                            err.to_string(),
                            checked_at,
                        ))
                    }
                };
            }
            Err(error) => error,
        };

        if self.breaker.record_error(admission, error) {
            warn!(
                "Circuit breaker opened after fetching {} ({})",
                entity.id,
                error.kind()
            );
        }

        if error.kind() == FailureKind::NotFound {
            debug!("{} not found upstream", entity.id);
            return Ok(ClassificationResult::unresolved(
                &entity.id,
                ComplianceStatus::Error,
                format!("entity not found upstream: {}", error),
                self.clock.now(),
            ));
        }

        let reason = format!(
            "fetch failed after {} attempt(s) ({}): {}",
            report.attempts,
            error.kind(),
            error
        );
        match self.stale_fallback(entity, &reason)? {
            Some(result) => Ok(result),
            None => Ok(ClassificationResult::unresolved(
                &entity.id,
                ComplianceStatus::Error,
                format!("{}; no cache available", reason),
                self.clock.now(),
            )),
        }
    }

    /// Serve a cached result regardless of its age.
    fn stale_fallback(&self, entity: &Entity, reason: &str) -> Result<Option<ClassificationResult>> {
        let Some(entry) = self.cache.get(entity.cache_key(), true)? else {
            return Ok(None);
        };
        let now = self.clock.now();
        let age_days = entry.age(now).num_days();
        if entry.is_expired(now) {
            warn!(
                "{}: {}, using cached result from {} ({} days old, past TTL)",
                entity.id, reason, entry.written_at, age_days
            );
        } else {
            debug!("{}: {}, using cached result", entity.id, reason);
        }
        Ok(Some(
            entry
                .value
                .with_source(DataSource::StaleCacheFallback)
                .with_reason(format!(
                    "{}; using cached result from {} ({} days old)",
                    reason,
                    entry.written_at.to_rfc3339(),
                    age_days
                )),
        ))
    }

    /// Sleep for `delay` unless the run is cancelled first.
    async fn pause(
        &self,
        delay: Duration,
        cancel: &CancellationToken,
    ) -> std::result::Result<(), Halt> {
        if delay.is_zero() {
            return Ok(());
        }
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(Halt::Cancelled),
            _ = self.sleeper.sleep(delay) => Ok(()),
        }
    }
}

fn elapsed(from: DateTime<Utc>, to: DateTime<Utc>) -> Duration {
    to.signed_duration_since(from)
        .to_std()
        .unwrap_or(Duration::ZERO)
}
