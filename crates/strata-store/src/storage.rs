//! Storage: one connection to a database holding collections.
//!
//! The collection registry lists every collection with its version,
//! meta schema and description. Persistent collections are registered in
//! `main.__collections`, temporary ones in `temp.__collections`; names are
//! unique across both.

use std::path::{Path, PathBuf};

use rusqlite::{params, Connection, OptionalExtension};
use tracing::{debug, info};

use strata_common::config::StoreConfig;
use strata_common::error::StrataError;
use strata_common::types::{CollectionVersion, MetaSchema};

use crate::collection::Collection;
use crate::error::StoreResult;
use crate::lock::WriteLock;
use crate::sql::{quote_ident, table_exists, validate_collection_name, Schema, TableName};
use crate::structure::StructureRegistry;

// =============================================================================
// Collection Info
// =============================================================================

/// Registry entry of a collection.
#[derive(Debug, Clone, PartialEq)]
pub struct CollectionInfo {
    /// Collection name.
    pub name: String,
    /// Storage layout version, fixed at creation.
    pub version: CollectionVersion,
    /// Typed metadata columns of the document table.
    pub meta: MetaSchema,
    /// Free-form description.
    pub description: Option<String>,
    /// Whether the collection lives in the connection's temporary schema.
    pub temporary: bool,
}

impl CollectionInfo {
    /// Schema holding the collection's tables.
    pub fn schema(&self) -> Schema {
        Schema::for_collection(self.temporary)
    }

    /// The document table.
    pub fn table(&self) -> TableName {
        TableName::collection(self.schema(), &self.name)
    }

    /// The structure registry.
    pub fn structure_registry(&self) -> StructureRegistry {
        StructureRegistry::new(&self.name, self.schema(), self.version)
    }
}

/// Options for creating a collection.
#[derive(Debug, Clone, Default)]
pub struct CollectionOptions {
    /// Document meta columns.
    pub meta: MetaSchema,
    /// Free-form description.
    pub description: Option<String>,
    /// Create in the temporary schema.
    pub temporary: bool,
    /// Storage version; defaults to the configured version.
    pub version: Option<CollectionVersion>,
}

impl CollectionOptions {
    /// Default options.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the document meta columns.
    #[must_use]
    pub fn meta(mut self, meta: MetaSchema) -> Self {
        self.meta = meta;
        self
    }

    /// Sets the description.
    #[must_use]
    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Creates a temporary collection.
    #[must_use]
    pub fn temporary(mut self, temporary: bool) -> Self {
        self.temporary = temporary;
        self
    }

    /// Pins the storage version.
    #[must_use]
    pub fn version(mut self, version: CollectionVersion) -> Self {
        self.version = Some(version);
        self
    }
}

// =============================================================================
// Storage
// =============================================================================

/// A connection to a collection database.
///
/// # Example
///
/// ```rust
/// use strata_common::config::StoreConfig;
/// use strata_store::{CollectionOptions, Storage};
///
/// let storage = Storage::open_in_memory(StoreConfig::default()).unwrap();
/// storage.create_collection("corpus", CollectionOptions::new()).unwrap();
/// assert!(storage.has_collection("corpus").unwrap());
/// ```
#[derive(Debug)]
pub struct Storage {
    conn: Connection,
    config: StoreConfig,
    path: Option<PathBuf>,
}

impl Storage {
    /// Opens or creates a database file.
    pub fn open(path: impl AsRef<Path>, config: StoreConfig) -> StoreResult<Self> {
        let path = path.as_ref().to_path_buf();
        let conn = Connection::open(&path)?;
        let storage = Self::init(conn, config, Some(path))?;
        info!(path = ?storage.path, "storage opened");
        Ok(storage)
    }

    /// Opens a private in-memory database.
    pub fn open_in_memory(config: StoreConfig) -> StoreResult<Self> {
        Self::init(Connection::open_in_memory()?, config, None)
    }

    fn init(conn: Connection, config: StoreConfig, path: Option<PathBuf>) -> StoreResult<Self> {
        config
            .validate()
            .map_err(|message| StrataError::InvalidConfig { message })?;
        conn.busy_timeout(config.busy_timeout)?;
        if path.is_some() {
            let mode: String = conn.pragma_update_and_check(
                None,
                "journal_mode",
                config.journal_mode.as_pragma(),
                |row| row.get(0),
            )?;
            debug!(journal_mode = %mode, "journal mode set");
        }
        for schema in [Schema::Main, Schema::Temp] {
            conn.execute_batch(&format!(
                "CREATE TABLE IF NOT EXISTS {} (
                    name TEXT PRIMARY KEY,
                    version TEXT NOT NULL,
                    meta TEXT NOT NULL,
                    description TEXT,
                    created_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
                )",
                TableName::registry(schema)
            ))?;
        }
        Ok(Self { conn, config, path })
    }

    /// The underlying connection.
    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    /// Store configuration.
    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    /// Database file path, or `None` for an in-memory database.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    // =========================================================================
    // Collections
    // =========================================================================

    /// Looks up a collection's registry entry.
    pub fn collection_info(&self, name: &str) -> StoreResult<Option<CollectionInfo>> {
        for schema in [Schema::Temp, Schema::Main] {
            if let Some(info) = self.registry_entry(schema, name)? {
                return Ok(Some(info));
            }
        }
        Ok(None)
    }

    fn registry_entry(&self, schema: Schema, name: &str) -> StoreResult<Option<CollectionInfo>> {
        let sql = format!(
            "SELECT name, version, meta, description FROM {} WHERE name = ?1",
            TableName::registry(schema)
        );
        let row = self
            .conn
            .query_row(&sql, params![name], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, Option<String>>(3)?,
                ))
            })
            .optional()?;
        let Some((name, version, meta, description)) = row else {
            return Ok(None);
        };
        Ok(Some(CollectionInfo {
            name,
            version: version.parse()?,
            meta: serde_json::from_str(&meta)?,
            description,
            temporary: schema == Schema::Temp,
        }))
    }

    /// Whether a collection is registered.
    pub fn has_collection(&self, name: &str) -> StoreResult<bool> {
        Ok(self.collection_info(name)?.is_some())
    }

    /// Opens a handle to an existing collection.
    pub fn collection(&self, name: &str) -> StoreResult<Collection<'_>> {
        let info = self
            .collection_info(name)?
            .ok_or_else(|| StrataError::CollectionNotFound {
                collection: name.to_string(),
            })?;
        Ok(Collection::new(self, info))
    }

    /// Lists registered collections, temporary ones first, each group by name.
    pub fn collections(&self) -> StoreResult<Vec<CollectionInfo>> {
        let mut result = Vec::new();
        for schema in [Schema::Temp, Schema::Main] {
            let sql = format!("SELECT name FROM {} ORDER BY name", TableName::registry(schema));
            let mut stmt = self.conn.prepare(&sql)?;
            let names = stmt
                .query_map([], |row| row.get::<_, String>(0))?
                .collect::<Result<Vec<_>, _>>()?;
            for name in names {
                if let Some(info) = self.registry_entry(schema, &name)? {
                    result.push(info);
                }
            }
        }
        Ok(result)
    }

    /// Creates a collection with its document and structure tables.
    pub fn create_collection(&self, name: &str, options: CollectionOptions) -> StoreResult<Collection<'_>> {
        validate_collection_name(name)?;
        options.meta.validate()?;
        let info = CollectionInfo {
            name: name.to_string(),
            version: options.version.unwrap_or(self.config.default_version),
            meta: options.meta,
            description: options.description,
            temporary: options.temporary,
        };

        let lock = WriteLock::acquire(&self.conn)?;
        let table = info.table();
        let registry = info.structure_registry();
        if self.collection_info(name)?.is_some()
            || table_exists(&lock, &table)?
            || table_exists(&lock, registry.table())?
        {
            return Err(StrataError::CollectionExists {
                collection: name.to_string(),
            }
            .into());
        }

        let mut columns = vec!["id INTEGER PRIMARY KEY".to_string(), "data TEXT NOT NULL".to_string()];
        if info.version.supports_hidden_documents() {
            columns.push("hidden INTEGER NOT NULL DEFAULT 0".to_string());
        }
        for (column, meta_type) in info.meta.iter() {
            columns.push(format!("{} {}", quote_ident(column), meta_type.sql_type()));
        }
        lock.execute_batch(&format!("CREATE TABLE {table} ({})", columns.join(", ")))?;
        registry.create_table(&lock)?;
        lock.execute(
            &format!(
                "INSERT INTO {} (name, version, meta, description) VALUES (?1, ?2, ?3, ?4)",
                TableName::registry(info.schema())
            ),
            params![
                info.name,
                info.version.as_str(),
                serde_json::to_string(&info.meta)?,
                info.description
            ],
        )?;
        lock.commit()?;

        info!(collection = name, version = %info.version, temporary = info.temporary, "collection created");
        Ok(Collection::new(self, info))
    }

    /// Drops a collection with all its tables.
    pub fn delete_collection(&self, name: &str) -> StoreResult<()> {
        let lock = WriteLock::acquire(&self.conn)?;
        let info = self
            .collection_info(name)?
            .ok_or_else(|| StrataError::CollectionNotFound {
                collection: name.to_string(),
            })?;
        let registry = info.structure_registry();
        let structure = registry.load(&lock)?;
        for descriptor in structure.layers().iter().rev() {
            if descriptor.layer_type.is_tabled() {
                let table = TableName::layer(info.schema(), name, &descriptor.name, descriptor.layer_type);
                lock.execute_batch(&format!("DROP TABLE IF EXISTS {table}"))?;
            }
        }
        lock.execute_batch(&format!(
            "DROP TABLE IF EXISTS {}; DROP TABLE IF EXISTS {};",
            registry.table(),
            info.table()
        ))?;
        lock.execute(
            &format!("DELETE FROM {} WHERE name = ?1", TableName::registry(info.schema())),
            params![name],
        )?;
        lock.commit()?;
        info!(collection = name, "collection deleted");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use strata_common::error::ErrorCode;
    use strata_common::types::MetaType;

    fn storage() -> Storage {
        Storage::open_in_memory(StoreConfig::for_testing()).unwrap()
    }

    #[test]
    fn test_create_and_list() {
        let storage = storage();
        let meta = MetaSchema::new().with_column("author", MetaType::Str);
        storage
            .create_collection("b_corpus", CollectionOptions::new().meta(meta.clone()).description("news"))
            .unwrap();
        storage
            .create_collection("a_scratch", CollectionOptions::new().temporary(true))
            .unwrap();

        let infos = storage.collections().unwrap();
        let names: Vec<&str> = infos.iter().map(|i| i.name.as_str()).collect();
        assert_eq!(names, vec!["a_scratch", "b_corpus"]);
        assert!(infos[0].temporary);
        assert_eq!(infos[1].meta, meta);
        assert_eq!(infos[1].description.as_deref(), Some("news"));
        assert_eq!(infos[1].version, CollectionVersion::LATEST);
    }

    #[test]
    fn test_create_duplicate() {
        let storage = storage();
        storage.create_collection("corpus", CollectionOptions::new()).unwrap();
        let err = storage
            .create_collection("corpus", CollectionOptions::new().temporary(true))
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::CollectionExists);
    }

    #[test]
    fn test_missing_collection() {
        let storage = storage();
        assert_eq!(
            storage.collection("nope").unwrap_err().code(),
            ErrorCode::CollectionNotFound
        );
        assert_eq!(
            storage.delete_collection("nope").unwrap_err().code(),
            ErrorCode::CollectionNotFound
        );
    }

    #[test]
    fn test_delete_collection_drops_tables() {
        let storage = storage();
        let collection = storage.create_collection("corpus", CollectionOptions::new()).unwrap();
        let table = collection.info().table();
        storage.delete_collection("corpus").unwrap();
        assert!(!table_exists(storage.connection(), &table).unwrap());
        assert!(!storage.has_collection("corpus").unwrap());
    }

    #[test]
    fn test_version_columns() {
        let storage = storage();
        let old = storage
            .create_collection("old", CollectionOptions::new().version(CollectionVersion::V0))
            .unwrap();
        let columns = crate::sql::table_columns(storage.connection(), &old.info().table()).unwrap();
        assert_eq!(columns, vec!["id", "data"]);
        let new = storage.create_collection("new", CollectionOptions::new()).unwrap();
        let columns = crate::sql::table_columns(storage.connection(), &new.info().table()).unwrap();
        assert_eq!(columns, vec!["id", "data", "hidden"]);
    }

    #[test]
    fn test_invalid_name() {
        let storage = storage();
        let err = storage
            .create_collection("Bad-Name", CollectionOptions::new())
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::InvalidArgument);
    }
}
