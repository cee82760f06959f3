use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Unique entity identifier (a ticker symbol such as "AAPL" or "2222.SR").
pub type EntityId = String;

/// An entity to screen. Immutable input supplied by the caller.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Entity {
    /// Unique symbol.
    pub id: EntityId,

    /// Human-readable name (e.g., "Apple Inc.").
    pub display_name: String,

    /// Caller-supplied metadata such as exchange or country.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub static_attributes: BTreeMap<String, String>,
}

impl Entity {
    /// Create an entity with no static attributes.
    pub fn new(id: impl Into<String>, display_name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            display_name: display_name.into(),
            static_attributes: BTreeMap::new(),
        }
    }

    /// Attach a static attribute.
    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.static_attributes.insert(key.into(), value.into());
        self
    }

    /// Cache key for this entity's classification.
    pub fn cache_key(&self) -> &str {
        &self.id
    }
}
