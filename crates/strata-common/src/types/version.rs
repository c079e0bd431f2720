//! Collection schema versions.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::StrataError;

/// Schema version of a collection.
///
/// Versions are monotonically richer: every feature of a version is
/// available in all newer versions.
///
/// | version | adds |
/// |---------|------|
/// | V0 | attached and detached layers |
/// | V1 | fragmented layers |
/// | V2 | serialisation tags |
/// | V3 | sparse layers |
/// | V4 | relation layers, hidden documents |
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum CollectionVersion {
    /// Attached and detached layers only.
    V0,
    /// Fragmented layers.
    V1,
    /// Serialisation tag per layer.
    V2,
    /// Sparse layers.
    V3,
    /// Relation layers and the hidden flag.
    V4,
}

impl CollectionVersion {
    /// The newest version, used for new collections by default.
    pub const LATEST: Self = Self::V4;

    /// All versions, oldest first.
    pub const ALL: [Self; 5] = [Self::V0, Self::V1, Self::V2, Self::V3, Self::V4];

    /// Returns the version string stored in the registry.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::V0 => "0.0",
            Self::V1 => "1.0",
            Self::V2 => "2.0",
            Self::V3 => "3.0",
            Self::V4 => "4.0",
        }
    }

    /// Whether fragmented layers are supported.
    #[must_use]
    pub fn supports_fragmented_layers(self) -> bool {
        self >= Self::V1
    }

    /// Whether layers may carry a serialisation tag.
    #[must_use]
    pub fn supports_serialisation_tags(self) -> bool {
        self >= Self::V2
    }

    /// Whether sparse layers are supported.
    #[must_use]
    pub fn supports_sparse_layers(self) -> bool {
        self >= Self::V3
    }

    /// Whether relation layers (named spans) are supported.
    #[must_use]
    pub fn supports_relation_layers(self) -> bool {
        self >= Self::V4
    }

    /// Whether documents carry the hidden flag.
    #[must_use]
    pub fn supports_hidden_documents(self) -> bool {
        self >= Self::V4
    }
}

impl Default for CollectionVersion {
    fn default() -> Self {
        Self::LATEST
    }
}

impl fmt::Display for CollectionVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CollectionVersion {
    type Err = StrataError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "0" | "0.0" => Ok(Self::V0),
            "1" | "1.0" => Ok(Self::V1),
            "2" | "2.0" => Ok(Self::V2),
            "3" | "3.0" => Ok(Self::V3),
            "4" | "4.0" => Ok(Self::V4),
            other => Err(StrataError::invalid_argument(format!(
                "unknown collection version '{other}'"
            ))),
        }
    }
}

impl TryFrom<String> for CollectionVersion {
    type Error = StrataError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<CollectionVersion> for String {
    fn from(version: CollectionVersion) -> Self {
        version.as_str().to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version_parse() {
        assert_eq!("3.0".parse::<CollectionVersion>().unwrap(), CollectionVersion::V3);
        assert_eq!("4".parse::<CollectionVersion>().unwrap(), CollectionVersion::V4);
        assert!("5.0".parse::<CollectionVersion>().is_err());
    }

    #[test]
    fn test_version_features() {
        assert!(!CollectionVersion::V0.supports_fragmented_layers());
        assert!(CollectionVersion::V1.supports_fragmented_layers());
        assert!(!CollectionVersion::V2.supports_sparse_layers());
        assert!(CollectionVersion::V3.supports_sparse_layers());
        assert!(!CollectionVersion::V3.supports_relation_layers());
        assert!(CollectionVersion::V4.supports_hidden_documents());
    }

    #[test]
    fn test_version_serde() {
        let json = serde_json::to_string(&CollectionVersion::V2).unwrap();
        assert_eq!(json, "\"2.0\"");
        let back: CollectionVersion = serde_json::from_str(&json).unwrap();
        assert_eq!(back, CollectionVersion::V2);
    }
}
