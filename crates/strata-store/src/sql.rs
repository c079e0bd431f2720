//! SQL naming and value conversion helpers.
//!
//! Every table name is schema-qualified: persistent collections live in
//! `main`, temporary ones in `temp`.

use std::fmt;

use rusqlite::types::{Value as SqlValue, ValueRef};
use rusqlite::{Connection, OptionalExtension};
use serde_json::Value;

use strata_common::constants::{
    EXPORT_SUFFIX, FRAGMENT_SUFFIX, LAYER_SUFFIX, REGISTRY_TABLE, STRUCTURE_SUFFIX,
};
use strata_common::error::StrataError;
use strata_common::types::{is_identifier, LayerType, MetaType};

use crate::error::StoreResult;

// =============================================================================
// Names
// =============================================================================

/// Quotes an SQL identifier.
pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Database schema a table lives in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Schema {
    /// The persistent database.
    Main,
    /// The connection-local temporary database.
    Temp,
}

impl Schema {
    /// Returns the schema name.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Main => "main",
            Self::Temp => "temp",
        }
    }

    /// Schema for a collection.
    pub const fn for_collection(temporary: bool) -> Self {
        if temporary {
            Self::Temp
        } else {
            Self::Main
        }
    }
}

/// A schema-qualified table name.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TableName {
    schema: Schema,
    name: String,
}

impl TableName {
    /// Creates a table name.
    pub fn new(schema: Schema, name: impl Into<String>) -> Self {
        Self {
            schema,
            name: name.into(),
        }
    }

    /// The collection registry in a schema.
    pub fn registry(schema: Schema) -> Self {
        Self::new(schema, REGISTRY_TABLE)
    }

    /// A collection's document table.
    pub fn collection(schema: Schema, collection: &str) -> Self {
        Self::new(schema, collection)
    }

    /// A collection's structure table.
    pub fn structure(schema: Schema, collection: &str) -> Self {
        Self::new(schema, format!("{collection}{STRUCTURE_SUFFIX}"))
    }

    /// The table holding a tabled layer.
    pub fn layer(schema: Schema, collection: &str, layer: &str, layer_type: LayerType) -> Self {
        let suffix = match layer_type {
            LayerType::Fragmented => FRAGMENT_SUFFIX,
            LayerType::Attached | LayerType::Detached => LAYER_SUFFIX,
        };
        Self::new(schema, format!("{collection}__{layer}{suffix}"))
    }

    /// The default export table of a layer.
    pub fn export(schema: Schema, collection: &str, layer: &str) -> Self {
        Self::new(schema, format!("{collection}__{layer}{EXPORT_SUFFIX}"))
    }

    /// Schema part.
    pub fn schema(&self) -> Schema {
        self.schema
    }

    /// Unqualified table name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Qualified name of an index on this table.
    pub fn index(&self, column: &str) -> String {
        format!(
            "{}.{}",
            quote_ident(self.schema.as_str()),
            quote_ident(&self.index_name(column))
        )
    }

    /// Unqualified name of an index on this table.
    pub fn index_name(&self, column: &str) -> String {
        format!("idx_{}_{column}", self.name)
    }
}

impl fmt::Display for TableName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}.{}",
            quote_ident(self.schema.as_str()),
            quote_ident(&self.name)
        )
    }
}

/// Validates a collection name.
pub fn validate_collection_name(name: &str) -> StoreResult<()> {
    if !is_identifier(name) || name.contains("__") {
        return Err(StrataError::invalid_argument(format!(
            "collection name '{name}' must match [a-z_][a-z0-9_]* without '__'"
        ))
        .into());
    }
    Ok(())
}

// =============================================================================
// Catalog queries
// =============================================================================

/// Whether a table exists.
pub fn table_exists(conn: &Connection, table: &TableName) -> StoreResult<bool> {
    let sql = format!(
        "SELECT 1 FROM {}.sqlite_master WHERE type = 'table' AND name = ?1",
        quote_ident(table.schema().as_str())
    );
    Ok(conn
        .query_row(&sql, [table.name()], |_| Ok(()))
        .optional()?
        .is_some())
}

/// Checks whether the index of `table` on `column` exists.
pub fn index_exists(conn: &Connection, table: &TableName, column: &str) -> StoreResult<bool> {
    let sql = format!(
        "SELECT 1 FROM {}.sqlite_master WHERE type = 'index' AND name = ?1",
        quote_ident(table.schema().as_str())
    );
    Ok(conn
        .query_row(&sql, [table.index_name(column)], |_| Ok(()))
        .optional()?
        .is_some())
}

/// Column names of a table in declaration order.
pub fn table_columns(conn: &Connection, table: &TableName) -> StoreResult<Vec<String>> {
    let mut stmt = conn.prepare("SELECT name FROM pragma_table_info(?1, ?2) ORDER BY cid")?;
    let columns = stmt
        .query_map([table.name(), table.schema().as_str()], |row| row.get(0))?
        .collect::<Result<Vec<String>, _>>()?;
    Ok(columns)
}

/// Number of rows in a table.
pub fn count_rows(conn: &Connection, table: &TableName) -> StoreResult<u64> {
    let count: i64 = conn.query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |row| row.get(0))?;
    Ok(u64::try_from(count).unwrap_or_default())
}

/// Next free id of a table: `max(id) + 1`, or 0 for an empty table.
/// `None` when `max(id)` is `i64::MAX`.
pub fn next_id(conn: &Connection, table: &TableName) -> StoreResult<Option<i64>> {
    let max: Option<i64> = conn.query_row(&format!("SELECT MAX(id) FROM {table}"), [], |row| row.get(0))?;
    Ok(match max {
        Some(max) => max.checked_add(1),
        None => Some(0),
    })
}

// =============================================================================
// Values
// =============================================================================

/// Converts a JSON value into an SQL value for a typed meta column.
pub fn meta_to_sql(column: &str, meta_type: MetaType, value: &Value) -> StoreResult<SqlValue> {
    let mismatch = || -> crate::error::StoreError {
        StrataError::invalid_argument(format!(
            "value {value} does not fit meta column '{column}' of type {meta_type}"
        ))
        .into()
    };
    let converted = match (meta_type, value) {
        (_, Value::Null) => SqlValue::Null,
        (MetaType::Int | MetaType::BigInt, Value::Number(n)) => {
            SqlValue::Integer(n.as_i64().ok_or_else(mismatch)?)
        }
        (MetaType::Float, Value::Number(n)) => SqlValue::Real(n.as_f64().ok_or_else(mismatch)?),
        (MetaType::Str | MetaType::DateTime, Value::String(s)) => SqlValue::Text(s.clone()),
        (MetaType::Bool, Value::Bool(b)) => SqlValue::Integer(i64::from(*b)),
        _ => return Err(mismatch()),
    };
    Ok(converted)
}

/// Reads a typed meta column back into JSON.
pub fn sql_to_meta(meta_type: MetaType, value: ValueRef<'_>) -> Value {
    match (meta_type, value) {
        (_, ValueRef::Null) => Value::Null,
        (MetaType::Bool, ValueRef::Integer(i)) => Value::Bool(i != 0),
        (_, ValueRef::Integer(i)) => Value::from(i),
        (_, ValueRef::Real(f)) => serde_json::Number::from_f64(f).map_or(Value::Null, Value::Number),
        (_, ValueRef::Text(bytes)) => Value::String(String::from_utf8_lossy(bytes).into_owned()),
        (_, ValueRef::Blob(bytes)) => Value::String(String::from_utf8_lossy(bytes).into_owned()),
    }
}

/// Converts a scalar JSON value into an SQL parameter.
///
/// Arrays and objects become their JSON text.
pub fn json_to_sql(value: &Value) -> SqlValue {
    match value {
        Value::Null => SqlValue::Null,
        Value::Bool(b) => SqlValue::Integer(i64::from(*b)),
        Value::Number(n) => n
            .as_i64()
            .map(SqlValue::Integer)
            .or_else(|| n.as_f64().map(SqlValue::Real))
            .unwrap_or(SqlValue::Null),
        Value::String(s) => SqlValue::Text(s.clone()),
        other => SqlValue::Text(other.to_string()),
    }
}

/// Approximate rendered length of a value inside an INSERT statement.
pub fn rendered_len(value: &SqlValue) -> usize {
    match value {
        SqlValue::Null => 4,
        SqlValue::Integer(_) => 20,
        SqlValue::Real(_) => 24,
        SqlValue::Text(s) => s.len() + 3,
        SqlValue::Blob(b) => b.len() * 2 + 3,
    }
}

/// Quoted column list.
pub fn column_list<S: AsRef<str>>(columns: &[S]) -> String {
    columns
        .iter()
        .map(|c| quote_ident(c.as_ref()))
        .collect::<Vec<_>>()
        .join(", ")
}

/// `?, ?, ...` with `n` placeholders.
pub fn placeholders(n: usize) -> String {
    vec!["?"; n].join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_table_names() {
        let table = TableName::layer(Schema::Main, "corpus", "morph", LayerType::Detached);
        assert_eq!(table.to_string(), r#""main"."corpus__morph__layer""#);
        let fragments = TableName::layer(Schema::Temp, "corpus", "parts", LayerType::Fragmented);
        assert_eq!(fragments.name(), "corpus__parts__fragment");
        assert_eq!(
            TableName::structure(Schema::Main, "corpus").name(),
            "corpus__structure"
        );
        assert_eq!(table.index("text_id"), r#""main"."idx_corpus__morph__layer_text_id""#);
    }

    #[test]
    fn test_quote_ident_escapes() {
        assert_eq!(quote_ident(r#"a"b"#), r#""a""b""#);
    }

    #[test]
    fn test_validate_collection_name() {
        assert!(validate_collection_name("corpus_2024").is_ok());
        assert!(validate_collection_name("Corpus").is_err());
        assert!(validate_collection_name("a__b").is_err());
        assert!(validate_collection_name("").is_err());
    }

    #[test]
    fn test_meta_conversion() {
        assert_eq!(
            meta_to_sql("n", MetaType::Int, &json!(3)).unwrap(),
            SqlValue::Integer(3)
        );
        assert_eq!(
            meta_to_sql("flag", MetaType::Bool, &json!(true)).unwrap(),
            SqlValue::Integer(1)
        );
        assert_eq!(meta_to_sql("s", MetaType::Str, &Value::Null).unwrap(), SqlValue::Null);
        assert!(meta_to_sql("n", MetaType::Int, &json!("three")).is_err());
        assert!(meta_to_sql("n", MetaType::Int, &json!(1.5)).is_err());

        assert_eq!(sql_to_meta(MetaType::Bool, ValueRef::Integer(0)), json!(false));
        assert_eq!(sql_to_meta(MetaType::Float, ValueRef::Real(0.5)), json!(0.5));
        assert_eq!(sql_to_meta(MetaType::Str, ValueRef::Text(b"x")), json!("x"));
    }

    #[test]
    fn test_catalog_queries() {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(
            "CREATE TABLE t (id INTEGER PRIMARY KEY, data TEXT); INSERT INTO t VALUES (4, 'x');",
        )
        .unwrap();
        let table = TableName::new(Schema::Main, "t");
        assert!(table_exists(&conn, &table).unwrap());
        assert!(!table_exists(&conn, &TableName::new(Schema::Temp, "t")).unwrap());
        assert_eq!(table_columns(&conn, &table).unwrap(), vec!["id", "data"]);
        assert_eq!(count_rows(&conn, &table).unwrap(), 1);
        assert_eq!(next_id(&conn, &table).unwrap(), Some(5));
    }

    #[test]
    fn test_next_id_exhausted() {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch("CREATE TABLE t (id INTEGER PRIMARY KEY, data TEXT)").unwrap();
        let table = TableName::new(Schema::Main, "t");
        assert_eq!(next_id(&conn, &table).unwrap(), Some(0));
        conn.execute("INSERT INTO t VALUES (?1, 'x')", [i64::MAX]).unwrap();
        assert_eq!(next_id(&conn, &table).unwrap(), None);
    }
}
