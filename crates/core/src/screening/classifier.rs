//! Rule-based compliance classifier.
//!
//! Pure: the same entity, attributes and timestamp always produce the same
//! result. Missing fields never make the classifier fail; they only lower
//! the confidence or turn the status into [`ComplianceStatus::Unknown`].

use chrono::{DateTime, Utc};
use thiserror::Error;

use amanah_market_data::{Entity, FetchedAttributes};

use super::config::ClassifierConfig;
use super::model::{CheckOutcome, ClassificationResult, ComplianceStatus, Confidence, DataSource};
use crate::errors::ConfigError;

/// Largest score deduction for an excessive debt ratio.
const MAX_RATIO_PENALTY: f64 = 0.5;

/// Input the classifier refuses to interpret.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ClassificationError {
    #[error("Malformed input for {entity_id}: {reason}")]
    MalformedInput { entity_id: String, reason: String },
}

/// Result of the business activity check.
#[derive(Debug, Clone, PartialEq)]
struct BusinessCheck {
    outcome: CheckOutcome,
    reason: String,
}

/// Result of the financial ratio check.
#[derive(Debug, Clone, PartialEq)]
struct RatioCheck {
    outcome: CheckOutcome,
    ratio: Option<f64>,
    reason: String,
}

/// Classifies entities against a [`ClassifierConfig`].
#[derive(Debug, Clone)]
pub struct Classifier {
    prohibited: Vec<String>,
    allow_overrides: Vec<String>,
    max_debt_ratio: f64,
}

impl Classifier {
    pub fn new(config: ClassifierConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            prohibited: normalize(&config.prohibited_keywords),
            allow_overrides: normalize(&config.allow_override_keywords),
            max_debt_ratio: config.max_debt_ratio,
        })
    }

    pub fn max_debt_ratio(&self) -> f64 {
        self.max_debt_ratio
    }

    /// Classify one entity from its fetched attributes.
    ///
    /// The result is attributed to [`DataSource::Fresh`]; callers relabel it
    /// when it is served from the cache.
    pub fn classify(
        &self,
        entity: &Entity,
        attrs: &FetchedAttributes,
        checked_at: DateTime<Utc>,
    ) -> Result<ClassificationResult, ClassificationError> {
        validate_input(entity, attrs)?;

        let business = self.business_check(entity, attrs);
        let ratio = self.ratio_check(attrs);

        let status = match (business.outcome, ratio.outcome) {
            (CheckOutcome::Fail, _) => ComplianceStatus::NonCompliant,
            (_, CheckOutcome::Unknown) => ComplianceStatus::Unknown,
            (_, CheckOutcome::Fail) => ComplianceStatus::NonCompliant,
            _ => ComplianceStatus::Compliant,
        };

        let score = if business.outcome == CheckOutcome::Fail {
            0.0
        } else {
            match (ratio.outcome, ratio.ratio) {
                (CheckOutcome::Fail, Some(r)) => {
                    let penalty = (2.0 * (r - self.max_debt_ratio)).min(MAX_RATIO_PENALTY);
                    (1.0 - penalty).max(0.0)
                }
                _ => 1.0,
            }
        };

        let confidence = confidence(&business, &ratio, attrs);

        let mut reasons = vec![business.reason];
        if business.outcome != CheckOutcome::Fail || ratio.outcome.is_resolved() {
            reasons.push(ratio.reason);
        }
        if status == ComplianceStatus::Unknown {
            reasons.push("requires manual review".to_string());
        }

        Ok(ClassificationResult {
            entity_id: entity.id.clone(),
            status,
            confidence,
            score,
            reasons,
            checked_at,
            source_of_data: DataSource::Fresh,
            business_check: business.outcome,
            ratio_check: ratio.outcome,
            estimated_debt_ratio: ratio.ratio,
        })
    }

    fn business_check(&self, entity: &Entity, attrs: &FetchedAttributes) -> BusinessCheck {
        let names: Vec<String> = [Some(entity.display_name.as_str()), attrs.name.as_deref()]
            .into_iter()
            .flatten()
            .map(str::to_lowercase)
            .collect();

        let fields = [
            ("sector", attrs.sector.as_deref().map(str::to_lowercase)),
            ("industry", attrs.industry.as_deref().map(str::to_lowercase)),
        ]
        .into_iter()
        .filter_map(|(field, value)| value.map(|v| (field, v)))
        .chain(names.iter().map(|n| ("name", n.clone())));

        let mut hit = None;
        for (field, value) in fields {
            if let Some(keyword) = self.prohibited.iter().find(|k| value.contains(k.as_str())) {
                hit = Some((field, keyword.clone()));
                break;
            }
        }

        let Some((field, keyword)) = hit else {
            return BusinessCheck {
                outcome: CheckOutcome::Pass,
                reason: "no prohibited business activity found".to_string(),
            };
        };

        let override_keyword = self
            .allow_overrides
            .iter()
            .find(|k| names.iter().any(|n| n.contains(k.as_str())));

        match override_keyword {
            Some(allowed) => BusinessCheck {
                outcome: CheckOutcome::Pass,
                reason: format!(
                    "{} matches '{}' but name matches allowed model '{}'",
                    field, keyword, allowed
                ),
            },
            None => BusinessCheck {
                outcome: CheckOutcome::Fail,
                reason: format!("prohibited business activity: {} matches '{}'", field, keyword),
            },
        }
    }

    fn ratio_check(&self, attrs: &FetchedAttributes) -> RatioCheck {
        match attrs.market_cap {
            Some(cap) if cap > 0.0 => {}
            _ => {
                return RatioCheck {
                    outcome: CheckOutcome::Unknown,
                    ratio: None,
                    reason: "market cap unavailable, debt ratio cannot be computed".to_string(),
                }
            }
        }

        let Some(debt_to_equity) = attrs.debt_to_equity else {
            return RatioCheck {
                outcome: CheckOutcome::Unknown,
                ratio: None,
                reason: "debt-to-equity unavailable, debt ratio cannot be computed".to_string(),
            };
        };

        let ratio = estimated_debt_ratio(debt_to_equity);
        if ratio <= self.max_debt_ratio {
            RatioCheck {
                outcome: CheckOutcome::Pass,
                ratio: Some(ratio),
                reason: format!(
                    "estimated debt ratio {:.4} within limit {:.2}",
                    ratio, self.max_debt_ratio
                ),
            }
        } else {
            RatioCheck {
                outcome: CheckOutcome::Fail,
                ratio: Some(ratio),
                reason: format!(
                    "estimated debt ratio {:.4} exceeds limit {:.2}",
                    ratio, self.max_debt_ratio
                ),
            }
        }
    }
}

/// `debt / (debt + equity)` from a debt-to-equity ratio. Zero when `d <= 0`.
pub fn estimated_debt_ratio(debt_to_equity: f64) -> f64 {
    if debt_to_equity <= 0.0 {
        0.0
    } else {
        debt_to_equity / (1.0 + debt_to_equity)
    }
}

fn confidence(business: &BusinessCheck, ratio: &RatioCheck, attrs: &FetchedAttributes) -> Confidence {
    if business.outcome == CheckOutcome::Fail {
        return Confidence::High;
    }
    let has_profile = attrs.sector.is_some() && attrs.industry.is_some();
    match (ratio.outcome.is_resolved(), has_profile) {
        (true, true) => Confidence::High,
        (true, false) | (false, true) => Confidence::Medium,
        (false, false) => Confidence::Low,
    }
}

fn validate_input(entity: &Entity, attrs: &FetchedAttributes) -> Result<(), ClassificationError> {
    let malformed = |reason: String| ClassificationError::MalformedInput {
        entity_id: entity.id.clone(),
        reason,
    };

    if attrs.entity_id != entity.id {
        return Err(malformed(format!(
            "attributes belong to '{}'",
            attrs.entity_id
        )));
    }
    for (field, value) in [
        ("marketCap", attrs.market_cap),
        ("debtToEquity", attrs.debt_to_equity),
    ] {
        if let Some(v) = value {
            if !v.is_finite() {
                return Err(malformed(format!("{} is not a finite number ({})", field, v)));
            }
        }
    }
    Ok(())
}

fn normalize(keywords: &[String]) -> Vec<String> {
    keywords
        .iter()
        .map(|k| k.trim().to_lowercase())
        .filter(|k| !k.is_empty())
        .collect()
}
