//! Layer types and metadata column schemas.

use serde::de::{MapAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

use crate::constants::RESERVED_COLUMNS;
use crate::error::{StrataError, StrataResult};

/// Where the instances of a layer are stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LayerType {
    /// Stored inline with the document payload.
    Attached,
    /// Stored in its own table, one row per document.
    Detached,
    /// Stored in its own table, rows reference a parent layer instance.
    Fragmented,
}

impl LayerType {
    /// Returns the name stored in the structure table.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Attached => "attached",
            Self::Detached => "detached",
            Self::Fragmented => "fragmented",
        }
    }

    /// Whether instances live in a separate table.
    #[must_use]
    pub const fn is_tabled(self) -> bool {
        matches!(self, Self::Detached | Self::Fragmented)
    }
}

impl fmt::Display for LayerType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LayerType {
    type Err = StrataError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "attached" => Ok(Self::Attached),
            "detached" => Ok(Self::Detached),
            "fragmented" => Ok(Self::Fragmented),
            other => Err(StrataError::codec(format!("unknown layer type '{other}'"))),
        }
    }
}

/// Type of a metadata column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MetaType {
    /// 32-bit integer.
    Int,
    /// 64-bit integer.
    BigInt,
    /// Floating point number.
    Float,
    /// Text.
    Str,
    /// Timestamp stored as ISO-8601 text.
    DateTime,
    /// Boolean stored as 0/1.
    Bool,
}

impl MetaType {
    /// Returns the SQLite column type.
    #[must_use]
    pub const fn sql_type(self) -> &'static str {
        match self {
            Self::Int | Self::BigInt | Self::Bool => "INTEGER",
            Self::Float => "REAL",
            Self::Str | Self::DateTime => "TEXT",
        }
    }

    /// Returns the name used in schemas.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Int => "int",
            Self::BigInt => "bigint",
            Self::Float => "float",
            Self::Str => "str",
            Self::DateTime => "datetime",
            Self::Bool => "bool",
        }
    }
}

impl fmt::Display for MetaType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MetaType {
    type Err = StrataError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "int" => Ok(Self::Int),
            "bigint" => Ok(Self::BigInt),
            "float" => Ok(Self::Float),
            "str" => Ok(Self::Str),
            "datetime" => Ok(Self::DateTime),
            "bool" => Ok(Self::Bool),
            other => Err(StrataError::invalid_argument(format!(
                "unknown meta type '{other}'"
            ))),
        }
    }
}

/// Returns true for `[a-z_][a-z0-9_]*` names.
#[must_use]
pub fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_lowercase() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_')
}

/// Ordered metadata column schema (column name to type).
///
/// Column order is the order of declaration and is kept through
/// serialization.
///
/// # Example
///
/// ```rust
/// use strata_common::types::{MetaSchema, MetaType};
///
/// let schema = MetaSchema::new()
///     .with_column("author", MetaType::Str)
///     .with_column("year", MetaType::Int);
/// assert_eq!(schema.names().collect::<Vec<_>>(), vec!["author", "year"]);
/// assert!(schema.validate().is_ok());
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MetaSchema {
    columns: Vec<(String, MetaType)>,
}

impl MetaSchema {
    /// Creates an empty schema.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a column.
    #[must_use]
    pub fn with_column(mut self, name: impl Into<String>, meta_type: MetaType) -> Self {
        self.columns.push((name.into(), meta_type));
        self
    }

    /// Returns true if there are no columns.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    /// Returns the number of columns.
    #[must_use]
    pub fn len(&self) -> usize {
        self.columns.len()
    }

    /// Iterates over `(name, type)` pairs in declaration order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, MetaType)> {
        self.columns.iter().map(|(n, t)| (n.as_str(), *t))
    }

    /// Iterates over column names in declaration order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.columns.iter().map(|(n, _)| n.as_str())
    }

    /// Returns the type of a column.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<MetaType> {
        self.columns.iter().find(|(n, _)| n == name).map(|(_, t)| *t)
    }

    /// Checks names are identifiers, unique, and not reserved.
    pub fn validate(&self) -> StrataResult<()> {
        for (i, (name, _)) in self.columns.iter().enumerate() {
            if !is_identifier(name) {
                return Err(StrataError::invalid_argument(format!(
                    "meta column name '{name}' is not a lowercase identifier"
                )));
            }
            if RESERVED_COLUMNS.contains(&name.as_str()) {
                return Err(StrataError::invalid_argument(format!(
                    "meta column name '{name}' is reserved"
                )));
            }
            if self.columns[..i].iter().any(|(n, _)| n == name) {
                return Err(StrataError::invalid_argument(format!(
                    "duplicate meta column '{name}'"
                )));
            }
        }
        Ok(())
    }
}

impl Serialize for MetaSchema {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.columns.len()))?;
        for (name, meta_type) in &self.columns {
            map.serialize_entry(name, meta_type)?;
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for MetaSchema {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct SchemaVisitor;

        impl<'de> Visitor<'de> for SchemaVisitor {
            type Value = MetaSchema;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a map of column names to meta types")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<Self::Value, A::Error> {
                let mut columns = Vec::with_capacity(access.size_hint().unwrap_or(0));
                while let Some((name, meta_type)) = access.next_entry::<String, MetaType>()? {
                    columns.push((name, meta_type));
                }
                Ok(MetaSchema { columns })
            }
        }

        deserializer.deserialize_map(SchemaVisitor)
    }
}

impl FromIterator<(String, MetaType)> for MetaSchema {
    fn from_iter<I: IntoIterator<Item = (String, MetaType)>>(iter: I) -> Self {
        Self {
            columns: iter.into_iter().collect(),
        }
    }
}
