//! Type definitions for Strata.
//!
//! This module contains the core type definitions shared across the store.

mod ids;
mod schema;
mod version;

pub use ids::{Block, DocumentId};
pub use schema::{is_identifier, LayerType, MetaSchema, MetaType};
pub use version::CollectionVersion;
