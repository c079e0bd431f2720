//! System-wide constants for Strata.
//!
//! Defaults used by the store configuration and the relational naming scheme.

// =============================================================================
// Ingestion Constants
// =============================================================================

/// Default number of rows buffered before a flush.
pub const DEFAULT_BUFFER_SIZE: usize = 10_000;

/// Default soft limit on the encoded length of a buffered batch (characters).
///
/// The limit can be exceeded by the length of the last buffered row.
pub const DEFAULT_QUERY_LENGTH_LIMIT: usize = 5_000_000;

/// Maximum number of bound parameters in one SQLite statement.
pub const MAX_BIND_PARAMETERS: usize = 32_766;

/// Number of individually logged occurrences of a repeated warning.
///
/// Further occurrences are only counted and reported in one summary line.
pub const DEFAULT_WARNING_LIMIT: usize = 5;

// =============================================================================
// Selection Constants
// =============================================================================

/// Default number of documents fetched per round trip while iterating.
pub const DEFAULT_ITERSIZE: usize = 100;

// =============================================================================
// Lock Constants
// =============================================================================

/// Default time to wait for a contended write lock, in milliseconds.
pub const DEFAULT_BUSY_TIMEOUT_MS: u64 = 5_000;

// =============================================================================
// Naming Constants
// =============================================================================

/// Name of the table listing the collections of a database.
pub const REGISTRY_TABLE: &str = "__collections";

/// Suffix of a collection's structure table.
pub const STRUCTURE_SUFFIX: &str = "__structure";

/// Suffix of a detached layer table.
pub const LAYER_SUFFIX: &str = "__layer";

/// Suffix of a fragmented layer table.
pub const FRAGMENT_SUFFIX: &str = "__fragment";

/// Suffix of a layer export table.
pub const EXPORT_SUFFIX: &str = "__export";

/// Suffix of an n-gram index column.
pub const NGRAM_COLUMN_SUFFIX: &str = "_ngram";

/// Separator between n-gram tokens in a fingerprint.
pub const NGRAM_SEPARATOR: &str = "-";

/// Column names reserved by the store.
pub const RESERVED_COLUMNS: &[&str] = &["id", "data", "text_id", "parent_id", "hidden"];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reserved_columns() {
        assert!(RESERVED_COLUMNS.contains(&"text_id"));
        assert!(!RESERVED_COLUMNS.contains(&"author"));
    }

    #[test]
    fn test_defaults_are_sane() {
        assert!(DEFAULT_BUFFER_SIZE > 0);
        assert!(DEFAULT_QUERY_LENGTH_LIMIT > DEFAULT_BUFFER_SIZE);
        assert!(MAX_BIND_PARAMETERS < 32_767);
    }
}
