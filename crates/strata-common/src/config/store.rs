//! Store configuration structures.
//!
//! These structures define all configurable aspects of a Strata store
//! connection.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::constants::{
    DEFAULT_BUFFER_SIZE, DEFAULT_BUSY_TIMEOUT_MS, DEFAULT_ITERSIZE, DEFAULT_QUERY_LENGTH_LIMIT,
    DEFAULT_WARNING_LIMIT,
};
use crate::types::CollectionVersion;

/// Main store configuration.
///
/// # Example
///
/// ```rust
/// use strata_common::config::StoreConfig;
///
/// let config = StoreConfig::default();
/// assert_eq!(config.insert.buffer_size, 10_000);
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// How long a writer waits for a contended lock before giving up.
    /// Default: 5s
    #[serde(with = "humantime_serde")]
    pub busy_timeout: Duration,

    /// SQLite journal mode.
    /// Default: wal
    pub journal_mode: JournalMode,

    /// Version given to new collections.
    /// Default: 4.0
    pub default_version: CollectionVersion,

    /// Buffered insert configuration.
    pub insert: InsertConfig,

    /// Selection configuration.
    pub select: SelectConfig,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            busy_timeout: Duration::from_millis(DEFAULT_BUSY_TIMEOUT_MS),
            journal_mode: JournalMode::Wal,
            default_version: CollectionVersion::LATEST,
            insert: InsertConfig::default(),
            select: SelectConfig::default(),
        }
    }
}

impl StoreConfig {
    /// Creates a configuration with small buffers for tests.
    #[must_use]
    pub fn for_testing() -> Self {
        Self {
            busy_timeout: Duration::from_millis(200),
            insert: InsertConfig {
                buffer_size: 4,
                query_length_limit: 4096,
                ..Default::default()
            },
            select: SelectConfig { itersize: 3 },
            ..Default::default()
        }
    }

    /// Sets the busy timeout.
    #[must_use]
    pub fn with_busy_timeout(mut self, timeout: Duration) -> Self {
        self.busy_timeout = timeout;
        self
    }

    /// Sets the journal mode.
    #[must_use]
    pub fn with_journal_mode(mut self, mode: JournalMode) -> Self {
        self.journal_mode = mode;
        self
    }

    /// Sets the version given to new collections.
    #[must_use]
    pub fn with_default_version(mut self, version: CollectionVersion) -> Self {
        self.default_version = version;
        self
    }

    /// Sets the buffered insert row threshold.
    #[must_use]
    pub fn with_buffer_size(mut self, rows: usize) -> Self {
        self.insert.buffer_size = rows;
        self
    }

    /// Sets the buffered insert length threshold.
    #[must_use]
    pub fn with_query_length_limit(mut self, limit: usize) -> Self {
        self.insert.query_length_limit = limit;
        self
    }

    /// Sets the number of documents fetched per round trip.
    #[must_use]
    pub fn with_itersize(mut self, itersize: usize) -> Self {
        self.select.itersize = itersize;
        self
    }

    /// Validates the configuration and returns an error if invalid.
    pub fn validate(&self) -> Result<(), String> {
        if self.insert.buffer_size == 0 {
            return Err("insert.buffer_size must be at least 1".to_string());
        }

        if self.insert.query_length_limit == 0 {
            return Err("insert.query_length_limit must be at least 1".to_string());
        }

        if self.select.itersize == 0 {
            return Err("select.itersize must be at least 1".to_string());
        }

        Ok(())
    }
}

/// SQLite journal mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JournalMode {
    /// Write-ahead logging; readers do not block the writer.
    Wal,
    /// Rollback journal.
    Delete,
}

impl JournalMode {
    /// Returns the pragma value.
    #[must_use]
    pub const fn as_pragma(self) -> &'static str {
        match self {
            Self::Wal => "WAL",
            Self::Delete => "DELETE",
        }
    }
}

/// Buffered insert configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct InsertConfig {
    /// Number of buffered rows that triggers a flush.
    /// Default: 10000
    pub buffer_size: usize,

    /// Approximate encoded length of buffered rows that triggers a flush.
    /// Default: 5000000
    pub query_length_limit: usize,

    /// Number of repeated warnings logged individually before summarising.
    /// Default: 5
    pub warning_limit: usize,
}

impl Default for InsertConfig {
    fn default() -> Self {
        Self {
            buffer_size: DEFAULT_BUFFER_SIZE,
            query_length_limit: DEFAULT_QUERY_LENGTH_LIMIT,
            warning_limit: DEFAULT_WARNING_LIMIT,
        }
    }
}

/// Selection configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SelectConfig {
    /// Documents fetched per round trip while iterating.
    /// Default: 100
    pub itersize: usize,
}

impl Default for SelectConfig {
    fn default() -> Self {
        Self {
            itersize: DEFAULT_ITERSIZE,
        }
    }
}

/// Serde helper for Duration using humantime format.
mod humantime_serde {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let s = humantime::format_duration(*duration).to_string();
        s.serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        humantime::parse_duration(&s).map_err(serde::de::Error::custom)
    }
}
