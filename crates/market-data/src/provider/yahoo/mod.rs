//! Yahoo Finance attribute source.
//!
//! Uses the quoteSummary endpoint to fetch the sector, industry, market
//! capitalization and debt-to-equity of a listed security.

mod models;

use std::sync::{Arc, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use log::{debug, warn};
use reqwest::{header, StatusCode};
use urlencoding::encode;

use crate::clock::{Clock, SystemClock};
use crate::errors::MarketDataError;
use crate::models::{Entity, FetchedAttributes};
use crate::provider::AttributeSource;

use models::{YahooQuoteSummaryResponse, YahooQuoteSummaryResult};

const PROVIDER_ID: &str = "YAHOO";

const USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36";

const QUOTE_SUMMARY_URL: &str = "https://query1.finance.yahoo.com/v10/finance/quoteSummary";

const QUOTE_SUMMARY_MODULES: &str = "price,summaryProfile,summaryDetail,financialData";

/// Default per-request timeout.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(15);

// ============================================================================
// Crumb/Cookie Authentication
// ============================================================================

/// Cached Yahoo authentication data
#[derive(Debug, Clone)]
struct CrumbData {
    cookie: String,
    crumb: String,
}

// ============================================================================
// Yahoo Attribute Source
// ============================================================================

/// Yahoo Finance attribute source.
pub struct YahooAttributeSource {
    client: reqwest::Client,
    crumb: RwLock<Option<CrumbData>>,
    clock: Arc<dyn Clock>,
}

impl YahooAttributeSource {
    /// Create a new Yahoo Finance source with the default request timeout.
    pub fn new() -> Result<Self, MarketDataError> {
        Self::with_timeout(DEFAULT_REQUEST_TIMEOUT)
    }

    /// Create a new Yahoo Finance source with a custom request timeout.
    pub fn with_timeout(timeout: Duration) -> Result<Self, MarketDataError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(USER_AGENT)
            .build()?;
        Ok(Self {
            client,
            crumb: RwLock::new(None),
            clock: Arc::new(SystemClock),
        })
    }

    /// Replace the clock used to stamp `fetched_at`.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    // ========================================================================
    // Crumb/Cookie Authentication
    // ========================================================================

    fn cached_crumb(&self) -> Option<CrumbData> {
        match self.crumb.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    fn store_crumb(&self, value: Option<CrumbData>) {
        match self.crumb.write() {
            Ok(mut guard) => *guard = value,
            Err(poisoned) => *poisoned.into_inner() = value,
        }
    }

    /// Ensure we have a valid Yahoo authentication crumb.
    async fn ensure_crumb(&self) -> Result<CrumbData, MarketDataError> {
        if let Some(crumb) = self.cached_crumb() {
            return Ok(crumb);
        }
        self.fetch_crumb().await
    }

    /// Fetch a new Yahoo authentication crumb.
    async fn fetch_crumb(&self) -> Result<CrumbData, MarketDataError> {
        // Step 1: Get cookie from fc.yahoo.com
        let response = self
            .client
            .get("https://fc.yahoo.com")
            .send()
            .await
            .map_err(map_request_error)?;

        if response.status() == StatusCode::TOO_MANY_REQUESTS {
            return Err(rate_limited(response.headers()));
        }

        let cookie = response
            .headers()
            .get(header::SET_COOKIE)
            .and_then(|h| h.to_str().ok())
            .and_then(|s| s.split_once(';').map(|(v, _)| v.to_string()))
            .ok_or_else(|| MarketDataError::provider(PROVIDER_ID, "Failed to parse Yahoo cookie"))?;

        // Step 2: Get crumb using cookie
        let response = self
            .client
            .get("https://query1.finance.yahoo.com/v1/test/getcrumb")
            .header(header::COOKIE, &cookie)
            .send()
            .await
            .map_err(map_request_error)?;

        if response.status() == StatusCode::TOO_MANY_REQUESTS {
            return Err(rate_limited(response.headers()));
        }

        let crumb = response
            .text()
            .await
            .map_err(|e| MarketDataError::provider(PROVIDER_ID, format!("Failed to read crumb: {}", e)))?;

        let crumb_data = CrumbData { cookie, crumb };
        self.store_crumb(Some(crumb_data.clone()));

        Ok(crumb_data)
    }

    /// Clear the cached crumb (used when authentication fails)
    fn clear_crumb(&self) {
        self.store_crumb(None);
    }

    // ========================================================================
    // Attribute Fetching
    // ========================================================================

    async fn fetch_quote_summary(
        &self,
        symbol: &str,
    ) -> Result<YahooQuoteSummaryResult, MarketDataError> {
        let crumb = self.ensure_crumb().await?;

        let url = format!(
            "{}/{}?modules={}&crumb={}",
            QUOTE_SUMMARY_URL,
            encode(symbol),
            QUOTE_SUMMARY_MODULES,
            encode(&crumb.crumb)
        );

        let response = self
            .client
            .get(&url)
            .header(header::COOKIE, &crumb.cookie)
            .send()
            .await
            .map_err(map_request_error)?;

        let status = response.status();
        match status {
            StatusCode::TOO_MANY_REQUESTS => return Err(rate_limited(response.headers())),
            StatusCode::NOT_FOUND => return Err(MarketDataError::SymbolNotFound(symbol.to_string())),
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                self.clear_crumb();
                return Err(MarketDataError::provider(
                    PROVIDER_ID,
                    "Yahoo authentication expired",
                ));
            }
            s if !s.is_success() => {
                return Err(MarketDataError::provider(
                    PROVIDER_ID,
                    format!("Unexpected HTTP status {}", s),
                ));
            }
            _ => {}
        }

        let data: YahooQuoteSummaryResponse = response.json().await.map_err(|e| {
            MarketDataError::provider(PROVIDER_ID, format!("Failed to parse profile response: {}", e))
        })?;

        if let Some(error) = data.quote_summary.error {
            if error.is_not_found() {
                return Err(MarketDataError::SymbolNotFound(symbol.to_string()));
            }
            return Err(MarketDataError::provider(
                PROVIDER_ID,
                error
                    .description
                    .unwrap_or_else(|| "quoteSummary returned an error".to_string()),
            ));
        }

        data.quote_summary
            .result
            .unwrap_or_default()
            .into_iter()
            .next()
            .ok_or_else(|| MarketDataError::SymbolNotFound(symbol.to_string()))
    }
}

#[async_trait]
impl AttributeSource for YahooAttributeSource {
    fn id(&self) -> &'static str {
        PROVIDER_ID
    }

    async fn fetch_attributes(
        &self,
        entity: &Entity,
    ) -> Result<FetchedAttributes, MarketDataError> {
        debug!("Fetching attributes for {} from Yahoo", entity.id);
        let result = self.fetch_quote_summary(&entity.id).await?;
        Ok(map_quote_summary(&entity.id, &result, self.clock.now()))
    }
}

// ============================================================================
// Helper Functions
// ============================================================================

/// Map quoteSummary result to fetched attributes.
fn map_quote_summary(
    symbol: &str,
    result: &YahooQuoteSummaryResult,
    fetched_at: DateTime<Utc>,
) -> FetchedAttributes {
    let price = result.price.as_ref();
    let profile = result.summary_profile.as_ref();

    let market_cap = result
        .summary_detail
        .as_ref()
        .and_then(|d| d.market_cap)
        .and_then(|v| v.raw)
        .or_else(|| price.and_then(|p| p.market_cap).and_then(|v| v.raw));

    // Yahoo reports debt-to-equity in percent
    let debt_to_equity = result
        .financial_data
        .as_ref()
        .and_then(|f| f.debt_to_equity)
        .and_then(|v| v.raw)
        .map(|pct| pct / 100.0);

    let name = price.and_then(|p| p.long_name.clone().or_else(|| p.short_name.clone()));

    FetchedAttributes {
        entity_id: symbol.to_string(),
        source: Some(PROVIDER_ID.to_string()),
        name,
        sector: profile
            .and_then(|s| s.sector.as_deref())
            .map(format_sector),
        industry: profile.and_then(|s| s.industry.clone()),
        market_cap,
        debt_to_equity,
        fetched_at,
    }
}

/// Convert snake_case sector to Title Case.
fn format_sector(sector: &str) -> String {
    sector
        .split('_')
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                None => String::new(),
                Some(first) => first.to_uppercase().chain(chars).collect(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

/// Parse a `Retry-After` header given in seconds.
fn parse_retry_after(headers: &header::HeaderMap) -> Option<Duration> {
    headers
        .get(header::RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<u64>().ok())
        .map(Duration::from_secs)
}

fn rate_limited(headers: &header::HeaderMap) -> MarketDataError {
    let retry_after = parse_retry_after(headers);
    warn!("Yahoo rate limited the request (retry after {:?})", retry_after);
    MarketDataError::RateLimited {
        provider: PROVIDER_ID.to_string(),
        retry_after,
    }
}

fn map_request_error(e: reqwest::Error) -> MarketDataError {
    if e.is_timeout() {
        MarketDataError::Timeout {
            provider: PROVIDER_ID.to_string(),
        }
    } else {
        MarketDataError::Network(e)
    }
}
