use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Attributes fetched from an upstream source for one entity.
///
/// Every field except the identity and timestamp may be missing; sources
/// return whatever they have rather than inventing defaults.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FetchedAttributes {
    /// Entity these attributes belong to
    pub entity_id: String,

    /// Provider that supplied the attributes (e.g., "YAHOO")
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,

    /// Upstream company name, when it differs from the caller's display name
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// Business sector (e.g., "Financial Services")
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sector: Option<String>,

    /// Industry within sector (e.g., "Banks - Regional")
    #[serde(skip_serializing_if = "Option::is_none")]
    pub industry: Option<String>,

    /// Market capitalization
    #[serde(skip_serializing_if = "Option::is_none")]
    pub market_cap: Option<f64>,

    /// Debt-to-equity as a plain ratio (0.5 means debt is half of equity)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub debt_to_equity: Option<f64>,

    /// When the attributes were fetched
    pub fetched_at: DateTime<Utc>,
}

impl FetchedAttributes {
    /// Create an empty attribute set for an entity.
    pub fn new(entity_id: impl Into<String>, fetched_at: DateTime<Utc>) -> Self {
        Self {
            entity_id: entity_id.into(),
            source: None,
            name: None,
            sector: None,
            industry: None,
            market_cap: None,
            debt_to_equity: None,
            fetched_at,
        }
    }

    /// Set the sector
    pub fn sector(mut self, sector: impl Into<String>) -> Self {
        self.sector = Some(sector.into());
        self
    }

    /// Set the industry
    pub fn industry(mut self, industry: impl Into<String>) -> Self {
        self.industry = Some(industry.into());
        self
    }

    /// Set the upstream name
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Set the market capitalization
    pub fn market_cap(mut self, market_cap: f64) -> Self {
        self.market_cap = Some(market_cap);
        self
    }

    /// Set the debt-to-equity ratio
    pub fn debt_to_equity(mut self, debt_to_equity: f64) -> Self {
        self.debt_to_equity = Some(debt_to_equity);
        self
    }

    /// Set the source provider
    pub fn source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }

    /// True when no descriptive or financial field was returned.
    pub fn is_empty(&self) -> bool {
        self.sector.is_none()
            && self.industry.is_none()
            && self.market_cap.is_none()
            && self.debt_to_equity.is_none()
    }
}
