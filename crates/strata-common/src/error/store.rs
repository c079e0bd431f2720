//! Store error types.
//!
//! Provides the error taxonomy shared by the model, the store and its tools.

use std::fmt;
use thiserror::Error;

use crate::types::CollectionVersion;

/// Error codes for categorizing errors.
///
/// These codes can be used for programmatic error handling and
/// are stable across versions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum ErrorCode {
    // General errors (0x0000 - 0x00FF)
    /// Unknown or unspecified error.
    Unknown = 0x0000,
    /// Internal error (bug).
    Internal = 0x0001,
    /// Operation not supported.
    NotSupported = 0x0002,
    /// Invalid argument provided.
    InvalidArgument = 0x0003,
    /// Invalid configuration.
    InvalidConfig = 0x0004,

    // Structure errors (0x0100 - 0x01FF)
    /// Collection does not exist.
    CollectionNotFound = 0x0100,
    /// Collection already exists.
    CollectionExists = 0x0101,
    /// Layer already exists, does not exist, or has the wrong type.
    StructureConflict = 0x0102,
    /// Layer dependencies prevent the operation.
    DependencyConflict = 0x0103,
    /// Feature requires a newer collection version.
    SchemaVersionUnsupported = 0x0104,
    /// Row layers differ from the declared structure.
    RowShapeMismatch = 0x0105,

    // Concurrency errors (0x0200 - 0x02FF)
    /// Lock contention or structure changed between check and commit.
    ConcurrentModification = 0x0200,

    // Ingestion errors (0x0300 - 0x03FF)
    /// Bulk ingestion or annotation stopped on a failing document.
    IngestionFailed = 0x0300,
    /// Tagger failed to produce a layer.
    TaggerFailed = 0x0301,

    // Codec errors (0x0400 - 0x04FF)
    /// Encoding or decoding failed.
    Codec = 0x0400,

    // Backend errors (0x0500 - 0x05FF)
    /// Relational backend error.
    Backend = 0x0500,
    /// Primary key or uniqueness violation in the backend.
    DuplicateKey = 0x0501,
}

impl ErrorCode {
    /// Returns the numeric code.
    #[inline]
    #[must_use]
    pub const fn as_u16(self) -> u16 {
        self as u16
    }

    /// Returns the error category name.
    #[must_use]
    pub const fn category(&self) -> &'static str {
        match (*self as u16) >> 8 {
            0x00 => "General",
            0x01 => "Structure",
            0x02 => "Concurrency",
            0x03 => "Ingestion",
            0x04 => "Codec",
            0x05 => "Backend",
            _ => "Unknown",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{self:?}")
    }
}

/// The main error type for Strata.
///
/// Every variant carries enough context to tell which collection or layer
/// an operation failed on.
///
/// # Example
///
/// ```rust
/// use strata_common::error::{ErrorCode, StrataError, StrataResult};
///
/// fn declare(layer: &str) -> StrataResult<()> {
///     Err(StrataError::structure_conflict("corpus", layer, "layer already exists"))
/// }
///
/// assert_eq!(declare("words").unwrap_err().code(), ErrorCode::StructureConflict);
/// ```
#[derive(Debug, Error)]
pub enum StrataError {
    // ==========================================================================
    // General Errors
    // ==========================================================================
    /// Internal error - this indicates a bug.
    #[error("internal error: {message}")]
    Internal {
        /// Error message.
        message: String,
    },

    /// Operation not supported.
    #[error("operation not supported: {operation}")]
    NotSupported {
        /// The unsupported operation.
        operation: String,
    },

    /// Invalid argument provided.
    #[error("invalid argument: {message}")]
    InvalidArgument {
        /// Error message.
        message: String,
    },

    /// Invalid configuration.
    #[error("invalid configuration: {message}")]
    InvalidConfig {
        /// Error message.
        message: String,
    },

    // ==========================================================================
    // Collection Errors
    // ==========================================================================
    /// Collection does not exist.
    #[error("collection '{collection}' does not exist")]
    CollectionNotFound {
        /// The missing collection.
        collection: String,
    },

    /// Collection already exists.
    #[error("collection '{collection}' already exists")]
    CollectionExists {
        /// The existing collection.
        collection: String,
    },

    // ==========================================================================
    // Structure Errors
    // ==========================================================================
    /// Layer already exists, does not exist, or has the wrong type.
    #[error("structure conflict on layer '{layer}' of collection '{collection}': {reason}")]
    StructureConflict {
        /// Collection name.
        collection: String,
        /// Layer name.
        layer: String,
        /// What conflicted.
        reason: String,
    },

    /// Layer dependencies prevent the operation.
    #[error("dependency conflict on layer '{layer}': {reason} (dependents: {dependents:?})")]
    DependencyConflict {
        /// Layer the operation targeted.
        layer: String,
        /// What conflicted.
        reason: String,
        /// Layers involved in the conflict.
        dependents: Vec<String>,
    },

    /// Feature requires a newer collection version.
    #[error("{feature} requires collection version {required} or newer, collection '{collection}' has version {actual}")]
    SchemaVersionUnsupported {
        /// Collection name.
        collection: String,
        /// The unsupported feature.
        feature: String,
        /// Minimum version supporting the feature.
        required: CollectionVersion,
        /// The collection's version.
        actual: CollectionVersion,
    },

    /// Row layers differ from the declared structure.
    #[error("row shape mismatch on layer '{layer}': {reason}")]
    RowShapeMismatch {
        /// Layer whose shape differs.
        layer: String,
        /// How it differs.
        reason: String,
    },

    // ==========================================================================
    // Concurrency Errors
    // ==========================================================================
    /// Lock contention or structure changed between check and commit.
    #[error("concurrent modification: {reason}")]
    ConcurrentModification {
        /// What was contended.
        reason: String,
    },

    // ==========================================================================
    // Codec and Tagger Errors
    // ==========================================================================
    /// Encoding or decoding failed.
    #[error("codec error: {message}")]
    Codec {
        /// Error message.
        message: String,
    },

    /// Tagger failed to produce a layer.
    #[error("tagger for layer '{layer}' failed: {message}")]
    Tagger {
        /// The layer the tagger produces.
        layer: String,
        /// Error message.
        message: String,
    },
}

impl StrataError {
    /// Returns the error code for this error.
    #[must_use]
    pub const fn code(&self) -> ErrorCode {
        match self {
            Self::Internal { .. } => ErrorCode::Internal,
            Self::NotSupported { .. } => ErrorCode::NotSupported,
            Self::InvalidArgument { .. } => ErrorCode::InvalidArgument,
            Self::InvalidConfig { .. } => ErrorCode::InvalidConfig,
            Self::CollectionNotFound { .. } => ErrorCode::CollectionNotFound,
            Self::CollectionExists { .. } => ErrorCode::CollectionExists,
            Self::StructureConflict { .. } => ErrorCode::StructureConflict,
            Self::DependencyConflict { .. } => ErrorCode::DependencyConflict,
            Self::SchemaVersionUnsupported { .. } => ErrorCode::SchemaVersionUnsupported,
            Self::RowShapeMismatch { .. } => ErrorCode::RowShapeMismatch,
            Self::ConcurrentModification { .. } => ErrorCode::ConcurrentModification,
            Self::Codec { .. } => ErrorCode::Codec,
            Self::Tagger { .. } => ErrorCode::TaggerFailed,
        }
    }

    /// Returns true if retrying the operation may succeed.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::ConcurrentModification { .. })
    }

    /// Returns true if this error describes a structure or dependency conflict.
    #[must_use]
    pub const fn is_conflict(&self) -> bool {
        matches!(
            self,
            Self::StructureConflict { .. } | Self::DependencyConflict { .. } | Self::CollectionExists { .. }
        )
    }

    /// Creates an internal error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Creates an invalid argument error.
    #[must_use]
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::InvalidArgument {
            message: message.into(),
        }
    }

    /// Creates a codec error.
    #[must_use]
    pub fn codec(message: impl Into<String>) -> Self {
        Self::Codec {
            message: message.into(),
        }
    }

    /// Creates a structure conflict error.
    #[must_use]
    pub fn structure_conflict(
        collection: impl Into<String>,
        layer: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self::StructureConflict {
            collection: collection.into(),
            layer: layer.into(),
            reason: reason.into(),
        }
    }

    /// Creates a row shape mismatch error.
    #[must_use]
    pub fn row_shape_mismatch(layer: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::RowShapeMismatch {
            layer: layer.into(),
            reason: reason.into(),
        }
    }

    /// Creates a concurrent modification error.
    #[must_use]
    pub fn concurrent_modification(reason: impl Into<String>) -> Self {
        Self::ConcurrentModification {
            reason: reason.into(),
        }
    }
}

impl From<serde_json::Error> for StrataError {
    fn from(err: serde_json::Error) -> Self {
        Self::codec(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_code() {
        let err = StrataError::structure_conflict("corpus", "words", "layer already exists");
        assert_eq!(err.code(), ErrorCode::StructureConflict);
        assert_eq!(err.code().category(), "Structure");
        assert_eq!(ErrorCode::ConcurrentModification.category(), "Concurrency");
        assert_eq!(ErrorCode::Backend.as_u16(), 0x0500);
    }

    #[test]
    fn test_error_display() {
        let err = StrataError::DependencyConflict {
            layer: "words".to_string(),
            reason: "layer has dependents".to_string(),
            dependents: vec!["morph".to_string()],
        };
        assert_eq!(
            err.to_string(),
            "dependency conflict on layer 'words': layer has dependents (dependents: [\"morph\"])"
        );

        let err = StrataError::SchemaVersionUnsupported {
            collection: "corpus".to_string(),
            feature: "sparse layers".to_string(),
            required: CollectionVersion::V3,
            actual: CollectionVersion::V1,
        };
        assert_eq!(
            err.to_string(),
            "sparse layers requires collection version 3.0 or newer, collection 'corpus' has version 1.0"
        );
    }

    #[test]
    fn test_retryable() {
        assert!(StrataError::concurrent_modification("busy").is_retryable());
        assert!(!StrataError::codec("bad json").is_retryable());
    }

    #[test]
    fn test_conflict() {
        assert!(StrataError::structure_conflict("c", "l", "exists").is_conflict());
        assert!(!StrataError::row_shape_mismatch("l", "attributes differ").is_conflict());
    }

    #[test]
    fn test_json_error_from() {
        let json_err = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
        let err: StrataError = json_err.into();
        assert_eq!(err.code(), ErrorCode::Codec);
    }
}
