//! Error handling for Strata.
//!
//! This module provides the error taxonomy and result alias used
//! across all Strata components.

mod store;

pub use store::{ErrorCode, StrataError};

/// Result type alias for Strata operations.
pub type StrataResult<T> = std::result::Result<T, StrataError>;
