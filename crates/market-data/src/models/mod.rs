//! Market data models
//!
//! This module contains the core data types for attribute fetching:
//! - `entity` - The unit being screened (Entity) and its static metadata
//! - `attributes` - Attributes fetched from an upstream source (FetchedAttributes)

mod attributes;
mod entity;

pub use attributes::FetchedAttributes;
pub use entity::{Entity, EntityId};
