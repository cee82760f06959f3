//! Screening domain models.
//!
//! This module contains the classification result produced for every entity
//! in a run, along with the enums describing its status, confidence and the
//! origin of the data it was computed from.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// =============================================================================
// Compliance Status
// =============================================================================

/// Composite status of a classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ComplianceStatus {
    /// Business activity and financial ratio checks both pass.
    Compliant,
    /// Business activity check failed, or the debt ratio exceeds the limit.
    NonCompliant,
    /// Not enough data to decide. Needs human review.
    Unknown,
    /// The entity could not be resolved at all.
    Error,
}

impl ComplianceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ComplianceStatus::Compliant => "COMPLIANT",
            ComplianceStatus::NonCompliant => "NON_COMPLIANT",
            ComplianceStatus::Unknown => "UNKNOWN",
            ComplianceStatus::Error => "ERROR",
        }
    }
}

impl fmt::Display for ComplianceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// Confidence
// =============================================================================

/// How much of the input the classification could rely on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Confidence {
    Low,
    Medium,
    High,
}

// =============================================================================
// Data Source
// =============================================================================

/// Where the data behind a classification came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum DataSource {
    /// Fetched from the upstream during this run.
    Fresh,
    /// Read from an unexpired cache entry.
    Cache,
    /// Read from a cache entry past its TTL because no fresh data could be obtained.
    StaleCacheFallback,
    /// Neither a fetch nor a cache entry backs this result.
    None,
}

impl DataSource {
    pub fn is_cached(&self) -> bool {
        matches!(self, DataSource::Cache | DataSource::StaleCacheFallback)
    }
}

// =============================================================================
// Check Outcome
// =============================================================================

/// Outcome of one sub-check of the classifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CheckOutcome {
    Pass,
    Fail,
    /// Could not be computed from the available data.
    Unknown,
}

impl CheckOutcome {
    pub fn is_resolved(&self) -> bool {
        !matches!(self, CheckOutcome::Unknown)
    }
}

// =============================================================================
// Classification Result
// =============================================================================

/// Result of screening one entity.
///
/// Results are immutable once produced. A later run supersedes a result with
/// a new value; cached results are re-labelled by producing a copy via
/// [`with_source`](Self::with_source).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClassificationResult {
    pub entity_id: String,
    pub status: ComplianceStatus,
    pub confidence: Confidence,
    /// Compliance score in `[0, 1]`.
    pub score: f64,
    pub reasons: Vec<String>,
    pub checked_at: DateTime<Utc>,
    pub source_of_data: DataSource,
    pub business_check: CheckOutcome,
    pub ratio_check: CheckOutcome,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub estimated_debt_ratio: Option<f64>,
}

impl ClassificationResult {
    /// A result that no fetched or cached data backs.
    pub fn unresolved(
        entity_id: impl Into<String>,
        status: ComplianceStatus,
        reason: impl Into<String>,
        checked_at: DateTime<Utc>,
    ) -> Self {
        Self {
            entity_id: entity_id.into(),
            status,
            confidence: Confidence::Low,
            score: 0.0,
            reasons: vec![reason.into()],
            checked_at,
            source_of_data: DataSource::None,
            business_check: CheckOutcome::Unknown,
            ratio_check: CheckOutcome::Unknown,
            estimated_debt_ratio: None,
        }
    }

    /// Copy of this result attributed to a different data source.
    pub fn with_source(&self, source: DataSource) -> Self {
        Self {
            source_of_data: source,
            ..self.clone()
        }
    }

    /// Copy of this result with one more reason appended.
    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reasons.push(reason.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_status_serializes_screaming_snake_case() {
        let json = serde_json::to_string(&ComplianceStatus::NonCompliant).unwrap();
        assert_eq!(json, "\"NON_COMPLIANT\"");
        assert_eq!(ComplianceStatus::NonCompliant.to_string(), "NON_COMPLIANT");
    }

    #[test]
    fn test_data_source_serializes_camel_case() {
        let json = serde_json::to_string(&DataSource::StaleCacheFallback).unwrap();
        assert_eq!(json, "\"staleCacheFallback\"");
        assert!(DataSource::Cache.is_cached());
        assert!(!DataSource::None.is_cached());
    }

    #[test]
    fn test_with_source_leaves_original_untouched() {
        let checked_at = Utc.with_ymd_and_hms(2026, 3, 1, 9, 0, 0).unwrap();
        let original = ClassificationResult::unresolved(
            "2222.SR",
            ComplianceStatus::Unknown,
            "missing debt-to-equity",
            checked_at,
        );

        let relabelled = original.with_source(DataSource::StaleCacheFallback);

        assert_eq!(original.source_of_data, DataSource::None);
        assert_eq!(relabelled.source_of_data, DataSource::StaleCacheFallback);
        assert_eq!(relabelled.checked_at, checked_at);
        assert_eq!(relabelled.reasons, original.reasons);
    }
}
