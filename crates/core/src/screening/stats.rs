//! Run statistics and the final screening report.

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::model::{ClassificationResult, ComplianceStatus, DataSource};

// =============================================================================
// Run State
// =============================================================================

/// Lifecycle of one orchestrator run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE", tag = "state")]
pub enum RunState {
    Pending,
    /// Processing; `batch` is the most recently started batch (0-indexed).
    Running { batch: usize },
    Completed,
    Aborted,
}

impl RunState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, RunState::Completed | RunState::Aborted)
    }
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunState::Pending => write!(f, "PENDING"),
            RunState::Running { batch } => write!(f, "RUNNING(batch {})", batch),
            RunState::Completed => write!(f, "COMPLETED"),
            RunState::Aborted => write!(f, "ABORTED"),
        }
    }
}

// =============================================================================
// Batch Run Stats
// =============================================================================

/// Aggregate statistics for one orchestrator run.
///
/// Built fresh for every run and read-only once the run has completed.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchRunStats {
    pub total_processed: usize,
    pub compliant_count: usize,
    pub non_compliant_count: usize,
    pub unknown_count: usize,
    pub error_count: usize,
    /// Entities for which at least one upstream attempt was rate limited.
    pub rate_limited_count: usize,
    /// Entities served from the cache, fresh or stale.
    pub cache_used_count: usize,
    pub stale_fallback_count: usize,
    pub fresh_count: usize,
    pub total_batches: usize,
    pub average_batch_duration_ms: f64,
    /// Transitions of the circuit breaker into OPEN during the run.
    pub circuit_breaker_activations: u64,
    pub cache_usage_rate: f64,
    /// Share of entities that did not end in `ERROR`.
    pub success_rate: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
    #[serde(skip)]
    batch_duration_total: Duration,
}

impl BatchRunStats {
    pub fn new(started_at: DateTime<Utc>) -> Self {
        Self {
            started_at: Some(started_at),
            ..Self::default()
        }
    }

    /// Count one entity's final result.
    pub fn record_result(&mut self, result: &ClassificationResult) {
        self.total_processed += 1;
        match result.status {
            ComplianceStatus::Compliant => self.compliant_count += 1,
            ComplianceStatus::NonCompliant => self.non_compliant_count += 1,
            ComplianceStatus::Unknown => self.unknown_count += 1,
            ComplianceStatus::Error => self.error_count += 1,
        }
        match result.source_of_data {
            DataSource::Fresh => self.fresh_count += 1,
            DataSource::Cache => self.cache_used_count += 1,
            DataSource::StaleCacheFallback => {
                self.cache_used_count += 1;
                self.stale_fallback_count += 1;
            }
            DataSource::None => {}
        }
    }

    pub fn record_rate_limited(&mut self) {
        self.rate_limited_count += 1;
    }

    pub fn record_batch(&mut self, duration: Duration) {
        self.total_batches += 1;
        self.batch_duration_total += duration;
        self.average_batch_duration_ms =
            self.batch_duration_total.as_secs_f64() * 1000.0 / self.total_batches as f64;
    }

    /// Compute the derived rates and stamp the end of the run.
    pub fn finish(&mut self, breaker_activations: u64, finished_at: DateTime<Utc>) {
        self.circuit_breaker_activations = breaker_activations;
        self.finished_at = Some(finished_at);
        if self.total_processed == 0 {
            self.cache_usage_rate = 0.0;
            self.success_rate = 0.0;
        } else {
            let total = self.total_processed as f64;
            self.cache_usage_rate = self.cache_used_count as f64 / total;
            self.success_rate = (self.total_processed - self.error_count) as f64 / total;
        }
    }
}

// =============================================================================
// Screening Report
// =============================================================================

/// Results of a run, partitioned by status, with the run's statistics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScreeningReport {
    pub compliant: Vec<ClassificationResult>,
    pub non_compliant: Vec<ClassificationResult>,
    pub unknown: Vec<ClassificationResult>,
    pub error: Vec<ClassificationResult>,
    pub stats: BatchRunStats,
    pub run_state: RunState,
}

impl ScreeningReport {
    /// Partition `results` by status, keeping their order within each partition.
    pub fn from_results(
        results: Vec<ClassificationResult>,
        stats: BatchRunStats,
        run_state: RunState,
    ) -> Self {
        let mut report = Self {
            compliant: Vec::new(),
            non_compliant: Vec::new(),
            unknown: Vec::new(),
            error: Vec::new(),
            stats,
            run_state,
        };
        for result in results {
            match result.status {
                ComplianceStatus::Compliant => report.compliant.push(result),
                ComplianceStatus::NonCompliant => report.non_compliant.push(result),
                ComplianceStatus::Unknown => report.unknown.push(result),
                ComplianceStatus::Error => report.error.push(result),
            }
        }
        report
    }

    /// Number of results across all partitions.
    pub fn total(&self) -> usize {
        self.compliant.len() + self.non_compliant.len() + self.unknown.len() + self.error.len()
    }

    pub fn results(&self) -> impl Iterator<Item = &ClassificationResult> {
        self.compliant
            .iter()
            .chain(&self.non_compliant)
            .chain(&self.unknown)
            .chain(&self.error)
    }

    pub fn find(&self, entity_id: &str) -> Option<&ClassificationResult> {
        self.results().find(|r| r.entity_id == entity_id)
    }

    /// One-line human-readable summary.
    pub fn summary(&self) -> String {
        let s = &self.stats;
        format!(
            "{}: {} processed ({} compliant, {} non-compliant, {} unknown, {} error) in {} batches; \
             cache usage {:.1}%, success {:.1}%, rate limited {}, breaker activations {}",
            self.run_state,
            s.total_processed,
            s.compliant_count,
            s.non_compliant_count,
            s.unknown_count,
            s.error_count,
            s.total_batches,
            s.cache_usage_rate * 100.0,
            s.success_rate * 100.0,
            s.rate_limited_count,
            s.circuit_breaker_activations
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 2, 2, 0, 0, 0).unwrap()
    }

    fn result(id: &str, status: ComplianceStatus, source: DataSource) -> ClassificationResult {
        ClassificationResult::unresolved(id, status, "test", at()).with_source(source)
    }

    #[test]
    fn test_rates_and_counts() {
        let mut stats = BatchRunStats::new(at());
        stats.record_result(&result("A", ComplianceStatus::Compliant, DataSource::Fresh));
        stats.record_result(&result("B", ComplianceStatus::Unknown, DataSource::Cache));
        stats.record_result(&result(
            "C",
            ComplianceStatus::NonCompliant,
            DataSource::StaleCacheFallback,
        ));
        stats.record_result(&result("D", ComplianceStatus::Error, DataSource::None));
        stats.record_rate_limited();
        stats.record_batch(Duration::from_millis(100));
        stats.record_batch(Duration::from_millis(300));
        stats.finish(2, at());

        assert_eq!(stats.total_processed, 4);
        assert_eq!(stats.cache_used_count, 2);
        assert_eq!(stats.stale_fallback_count, 1);
        assert_eq!(stats.fresh_count, 1);
        assert_eq!(stats.rate_limited_count, 1);
        assert_eq!(stats.total_batches, 2);
        assert!((stats.average_batch_duration_ms - 200.0).abs() < 1e-9);
        assert!((stats.cache_usage_rate - 0.5).abs() < 1e-9);
        assert!((stats.success_rate - 0.75).abs() < 1e-9);
        assert_eq!(stats.circuit_breaker_activations, 2);
    }

    #[test]
    fn test_empty_run_has_zero_rates() {
        let mut stats = BatchRunStats::new(at());
        stats.finish(0, at());
        assert_eq!(stats.cache_usage_rate, 0.0);
        assert_eq!(stats.success_rate, 0.0);
        assert_eq!(stats.average_batch_duration_ms, 0.0);
    }

    #[test]
    fn test_report_partitions_every_result_once() {
        let results = vec![
            result("A", ComplianceStatus::Compliant, DataSource::Fresh),
            result("B", ComplianceStatus::Error, DataSource::None),
            result("C", ComplianceStatus::Compliant, DataSource::Cache),
            result("D", ComplianceStatus::NonCompliant, DataSource::Fresh),
        ];
        let report =
            ScreeningReport::from_results(results, BatchRunStats::default(), RunState::Completed);

        assert_eq!(report.total(), 4);
        assert_eq!(report.compliant.len(), 2);
        assert_eq!(report.compliant[1].entity_id, "C");
        assert_eq!(report.find("B").unwrap().status, ComplianceStatus::Error);
        assert!(report.summary().starts_with("COMPLETED: 0 processed"));
    }

    #[test]
    fn test_run_state_serialization() {
        let json = serde_json::to_string(&RunState::Running { batch: 3 }).unwrap();
        assert_eq!(json, r#"{"state":"RUNNING","batch":3}"#);
        assert!(RunState::Aborted.is_terminal());
        assert!(!RunState::Pending.is_terminal());
    }
}
