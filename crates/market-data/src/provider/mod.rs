//! Upstream attribute sources.
//!
//! This module contains:
//! - The `AttributeSource` trait every upstream implements
//! - Concrete source implementations (Yahoo Finance)
//!
//! Sources are responsible for one thing beyond fetching: mapping their own
//! failures into the [`FailureKind`](crate::errors::FailureKind) taxonomy via
//! [`MarketDataError`](crate::errors::MarketDataError), because the pipeline
//! routes retries, circuit breaking and batch delays on that taxonomy.

mod traits;

pub mod yahoo;

pub use traits::AttributeSource;
