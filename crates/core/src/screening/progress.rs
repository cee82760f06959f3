//! Progress reporting for screening runs.
//!
//! Lets callers observe a long universe scan without polling. The CLI logs
//! progress; tests use the no-op reporter.

use std::time::Duration;

use log::{info, warn};
use serde::{Deserialize, Serialize};

use super::stats::ScreeningReport;

/// Summary of one finished batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchProgress {
    /// 0-indexed batch number.
    pub batch_index: usize,
    pub total_batches: usize,
    pub entities_in_batch: usize,
    /// Entities processed so far across all batches.
    pub processed: usize,
    pub total_entities: usize,
    pub rate_limited: bool,
    pub duration: Duration,
}

/// Trait for reporting screening progress.
pub trait ScreeningProgressReporter: Send + Sync {
    /// Report that a run is starting.
    fn run_started(&self, total_entities: usize, total_batches: usize);

    /// Report that a batch finished.
    fn batch_completed(&self, progress: &BatchProgress);

    /// Report that a run completed.
    fn run_completed(&self, report: &ScreeningReport);

    /// Report that a run was aborted before completing.
    fn run_aborted(&self, processed: usize, total_entities: usize, reason: &str);
}

/// A no-op progress reporter for contexts where progress reporting is not needed.
#[derive(Debug, Clone, Default)]
pub struct NoopProgressReporter;

impl ScreeningProgressReporter for NoopProgressReporter {
    fn run_started(&self, _total_entities: usize, _total_batches: usize) {}

    fn batch_completed(&self, _progress: &BatchProgress) {}

    fn run_completed(&self, _report: &ScreeningReport) {}

    fn run_aborted(&self, _processed: usize, _total_entities: usize, _reason: &str) {}
}

/// Reporter that writes progress to the log.
#[derive(Debug, Clone, Default)]
pub struct LogProgressReporter;

impl ScreeningProgressReporter for LogProgressReporter {
    fn run_started(&self, total_entities: usize, total_batches: usize) {
        info!(
            "Screening {} entities in {} batches",
            total_entities, total_batches
        );
    }

    fn batch_completed(&self, progress: &BatchProgress) {
        info!(
            "Batch {}/{} done in {:?} ({} entities, {}/{} processed{})",
            progress.batch_index + 1,
            progress.total_batches,
            progress.duration,
            progress.entities_in_batch,
            progress.processed,
            progress.total_entities,
            if progress.rate_limited {
                ", rate limited"
            } else {
                ""
            }
        );
    }

    fn run_completed(&self, report: &ScreeningReport) {
        info!("{}", report.summary());
    }

    fn run_aborted(&self, processed: usize, total_entities: usize, reason: &str) {
        warn!(
            "Screening aborted after {}/{} entities: {}",
            processed, total_entities, reason
        );
    }
}
