//! # strata-common
//!
//! Common types, errors, and configuration for Strata.
//!
//! This crate provides the foundational types shared by every Strata
//! component. It includes:
//!
//! - **Types**: identifiers (`DocumentId`, `Block`), collection versions and
//!   metadata column types
//! - **Errors**: the store-wide error taxonomy with `StrataError` and `ErrorCode`
//! - **Config**: store configuration structures
//! - **Constants**: defaults and limits shared by the store and its tools
//!
//! ## Example
//!
//! ```rust
//! use strata_common::error::{StrataError, StrataResult};
//! use strata_common::types::{Block, DocumentId};
//!
//! fn owner(block: Block, id: DocumentId) -> StrataResult<bool> {
//!     Ok(block.contains(id))
//! }
//!
//! let block = Block::new(2, 1).unwrap();
//! assert!(owner(block, DocumentId::new(3)).unwrap());
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod config;
pub mod constants;
pub mod error;
pub mod types;

// Re-export commonly used items at the crate root
pub use constants::*;
pub use error::{ErrorCode, StrataError, StrataResult};
pub use types::{Block, CollectionVersion, DocumentId, LayerType, MetaSchema, MetaType};
