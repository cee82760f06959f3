//! Attribute source trait definition.

use async_trait::async_trait;

use crate::errors::MarketDataError;
use crate::models::{Entity, FetchedAttributes};

/// Trait for upstream attribute sources.
///
/// Implement this trait to add support for a new data source.
///
/// # Example
///
/// ```ignore
/// use async_trait::async_trait;
/// use amanah_market_data::provider::AttributeSource;
///
/// struct CsvSnapshotSource { /* ... */ }
///
/// #[async_trait]
/// impl AttributeSource for CsvSnapshotSource {
///     fn id(&self) -> &'static str {
///         "CSV_SNAPSHOT"
///     }
///
///     async fn fetch_attributes(&self, entity: &Entity) -> Result<FetchedAttributes, MarketDataError> {
///         // ...
///     }
/// }
/// ```
#[async_trait]
pub trait AttributeSource: Send + Sync {
    /// Unique identifier for this source.
    ///
    /// Should be a constant string like "YAHOO". Used for logging and as
    /// the `source` stamp on fetched attributes.
    fn id(&self) -> &'static str;

    /// Fetch the attributes of one entity.
    ///
    /// # Returns
    ///
    /// Whatever attributes the upstream has (possibly sparse), or a
    /// `MarketDataError` classified as rate-limited, not-found or transient.
    async fn fetch_attributes(&self, entity: &Entity)
        -> Result<FetchedAttributes, MarketDataError>;
}
