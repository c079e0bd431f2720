//! Collection handle: document ingestion, reads and row-level maintenance.
//!
//! Layer lifecycle operations live in [`crate::lifecycle`].

use std::collections::{BTreeMap, BTreeSet};

use rusqlite::types::Value as SqlValue;
use rusqlite::{params, params_from_iter, Connection};
use serde_json::Value;
use tracing::info;

use strata_common::config::StoreConfig;
use strata_common::error::StrataError;
use strata_common::types::{CollectionVersion, DocumentId, LayerType, MetaType};
use strata_model::{CodecRegistry, Document, Layer};

use crate::error::StoreResult;
use crate::inserter::{BufferedInsert, DocumentInserter, DocumentRow, InsertSummary};
use crate::lock::WriteLock;
use crate::query::Query;
use crate::selection::Selection;
use crate::sql::{count_rows, meta_to_sql, next_id, quote_ident, sql_to_meta, table_exists, TableName};
use crate::storage::{CollectionInfo, Storage};
use crate::structure::{CollectionState, CollectionStructure, LayerDescriptor};

/// Meta values of one layer table row.
#[derive(Debug, Clone, PartialEq)]
pub struct LayerMetaRow {
    /// Row id.
    pub id: i64,
    /// Document the row belongs to.
    pub text_id: DocumentId,
    /// Meta column values.
    pub meta: BTreeMap<String, Value>,
}

/// One stored fragment.
#[derive(Debug, Clone, PartialEq)]
pub struct FragmentRow {
    /// Row id.
    pub id: i64,
    /// Document the fragment belongs to.
    pub text_id: DocumentId,
    /// Parent layer instance id.
    pub parent_id: i64,
    /// Fragment content.
    pub layer: Layer,
}

/// Whether an export creates its table or adds to it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExportMode {
    /// The export table must not exist.
    #[default]
    New,
    /// The export table must exist.
    Append,
}

/// Options for [`Collection::export_layer`].
#[derive(Debug, Clone, Default)]
pub struct ExportOptions {
    /// Target table name; defaults to `{collection}__{layer}__export`.
    pub table: Option<String>,
    /// Attributes to export; defaults to all.
    pub attributes: Option<Vec<String>>,
    /// Collection meta columns copied to every row.
    pub collection_meta: Vec<String>,
    /// Documents to export; defaults to all.
    pub query: Option<Query>,
    /// Create or append.
    pub mode: ExportMode,
}

/// Handle to one collection.
#[derive(Debug, Clone)]
pub struct Collection<'s> {
    storage: &'s Storage,
    info: CollectionInfo,
}

impl<'s> Collection<'s> {
    pub(crate) fn new(storage: &'s Storage, info: CollectionInfo) -> Self {
        Self { storage, info }
    }

    /// Collection name.
    pub fn name(&self) -> &str {
        &self.info.name
    }

    /// Registry entry.
    pub fn info(&self) -> &CollectionInfo {
        &self.info
    }

    /// Storage version.
    pub fn version(&self) -> CollectionVersion {
        self.info.version
    }

    /// The owning storage.
    pub fn storage(&self) -> &'s Storage {
        self.storage
    }

    pub(crate) fn connection(&self) -> &'s Connection {
        self.storage.connection()
    }

    pub(crate) fn config(&self) -> &'s StoreConfig {
        self.storage.config()
    }

    pub(crate) fn layer_table(&self, descriptor: &LayerDescriptor) -> TableName {
        TableName::layer(self.info.schema(), &self.info.name, &descriptor.name, descriptor.layer_type)
    }

    pub(crate) fn require_version(&self, feature: &str, required: CollectionVersion) -> StoreResult<()> {
        if self.info.version >= required {
            return Ok(());
        }
        Err(StrataError::SchemaVersionUnsupported {
            collection: self.info.name.clone(),
            feature: feature.to_string(),
            required,
            actual: self.info.version,
        }
        .into())
    }

    /// Reads the current structure. Every call re-reads the registry.
    pub fn structure(&self) -> StoreResult<CollectionStructure> {
        self.info.structure_registry().load(self.connection())
    }

    /// Whether the collection is still registered.
    pub fn exists(&self) -> StoreResult<bool> {
        self.storage.has_collection(&self.info.name)
    }

    /// Number of stored documents, hidden ones included.
    pub fn len(&self) -> StoreResult<u64> {
        count_rows(self.connection(), &self.info.table())
    }

    /// Whether the collection holds no documents.
    pub fn is_empty(&self) -> StoreResult<bool> {
        Ok(self.len()? == 0)
    }

    /// Whether a layer is registered.
    pub fn has_layer(&self, name: &str) -> StoreResult<bool> {
        Ok(self.structure()?.contains(name))
    }

    /// Current lifecycle state.
    pub fn state(&self) -> StoreResult<CollectionState> {
        Ok(self.structure()?.state(!self.is_empty()?))
    }

    // =========================================================================
    // Documents
    // =========================================================================

    /// Opens a document inserter. The last batch is committed by `close`,
    /// or by dropping the inserter.
    pub fn insert(&self) -> StoreResult<DocumentInserter<'_>> {
        DocumentInserter::open(self)
    }

    /// Inserts documents, closing the inserter on success.
    ///
    /// On failure, documents of completed flushes stay committed and the
    /// returned ingestion error reports how many and which document was
    /// being inserted. When a flush failed, the error also carries the id
    /// range of that batch, since any of its rows may be the culprit.
    pub fn insert_documents<I>(&self, rows: I) -> StoreResult<InsertSummary>
    where
        I: IntoIterator,
        I::Item: Into<DocumentRow>,
    {
        let mut inserter = self.insert()?;
        for row in rows {
            let row = row.into();
            let attempted = row.key.or_else(|| inserter.next_id());
            if let Err(err) = inserter.insert(row) {
                let flushed = inserter.flushed_rows();
                let batch = inserter.failed_batch();
                inserter.discard();
                return Err(err.ingestion(flushed, attempted).with_failed_batch(batch));
            }
        }
        let flushed = inserter.flushed_rows();
        let pending = inserter.pending_batch();
        inserter
            .close()
            .map_err(|err| err.ingestion(flushed, None).with_failed_batch(pending))
    }

    /// Copies every document of `other` into this collection, keeping ids,
    /// metadata and hidden flags.
    ///
    /// Both collections must have the same meta columns, and this
    /// collection must either have the same attached layers or be empty.
    /// Collections with detached or fragmented layers cannot be extended.
    /// A document id present in both collections fails the copy with a
    /// duplicate key; documents of completed flushes stay committed.
    pub fn extend(&self, other: &Collection<'_>) -> StoreResult<InsertSummary> {
        let same_database = match (self.storage().path(), other.storage().path()) {
            (Some(a), Some(b)) => a == b,
            _ => std::ptr::eq(self.storage(), other.storage()),
        };
        if same_database && self.info.schema() == other.info.schema() && self.name() == other.name() {
            return Err(StrataError::invalid_argument(format!(
                "collection '{}' cannot be extended with itself",
                self.name()
            ))
            .into());
        }
        if self.info.meta != other.info.meta {
            return Err(StrataError::structure_conflict(
                self.name(),
                "*",
                format!("meta columns differ from those of collection '{}'", other.name()),
            )
            .into());
        }
        let source = other.structure()?;
        let target = self.structure()?;
        if source.has_tabled_layers() || target.has_tabled_layers() {
            return Err(StrataError::structure_conflict(
                self.name(),
                "*",
                "collections with detached or fragmented layers cannot be extended",
            )
            .into());
        }
        let target_empty = target.is_empty() && self.is_empty()?;
        if !target_empty && target.layers() != source.layers() {
            return Err(StrataError::structure_conflict(
                self.name(),
                "*",
                format!("attached layers differ from those of collection '{}'", other.name()),
            )
            .into());
        }

        let hidden = if other.version().supports_hidden_documents() {
            let visible: BTreeSet<DocumentId> = other.select().ids()?.into_iter().collect();
            other
                .select()
                .include_hidden(true)
                .ids()?
                .into_iter()
                .filter(|id| !visible.contains(id))
                .collect()
        } else {
            Vec::new()
        };

        let selection = other
            .select()
            .include_hidden(true)
            .collection_meta(other.info.meta.names().map(str::to_string));
        let mut inserter = self.insert()?;
        let mut current: Option<DocumentId> = None;
        let result = (|| -> StoreResult<()> {
            for selected in selection.iter()? {
                let selected = selected?;
                current = Some(selected.id);
                let mut row = DocumentRow::new(selected.document).with_key(selected.id);
                row.meta = selected.meta;
                inserter.insert(row)?;
            }
            Ok(())
        })();
        if let Err(err) = result {
            let flushed = inserter.flushed_rows();
            let batch = inserter.failed_batch();
            inserter.discard();
            return Err(err.ingestion(flushed, current).with_failed_batch(batch));
        }
        let flushed = inserter.flushed_rows();
        let pending = inserter.pending_batch();
        let summary = inserter
            .close()
            .map_err(|err| err.ingestion(flushed, None).with_failed_batch(pending))?;

        if !hidden.is_empty() && self.version().supports_hidden_documents() {
            self.hide_documents(&hidden)?;
        }
        info!(
            collection = %self.name(),
            source = %other.name(),
            documents = summary.inserted,
            "collection extended"
        );
        Ok(summary)
    }

    /// Reads one document with its attached layers.
    pub fn get(&self, id: DocumentId) -> StoreResult<Option<Document>> {
        let mut documents = self
            .select()
            .query(Query::keys([id]))
            .include_hidden(true)
            .to_vec()?;
        Ok(documents.pop().map(|selected| selected.document))
    }

    /// Starts a selection.
    pub fn select(&self) -> Selection<'_> {
        Selection::new(self)
    }

    /// Hides documents from selections.
    pub fn hide_documents(&self, ids: &[DocumentId]) -> StoreResult<usize> {
        self.set_hidden(ids, true)
    }

    /// Makes hidden documents selectable again.
    pub fn unhide_documents(&self, ids: &[DocumentId]) -> StoreResult<usize> {
        self.set_hidden(ids, false)
    }

    fn set_hidden(&self, ids: &[DocumentId], hidden: bool) -> StoreResult<usize> {
        self.require_version("hidden documents", CollectionVersion::V4)?;
        let lock = WriteLock::acquire(self.connection())?;
        let changed = lock.execute(
            &format!(
                "UPDATE {} SET hidden = ?1 WHERE id IN (SELECT value FROM json_each(?2))",
                self.info.table()
            ),
            params![hidden, id_list(ids)?],
        )?;
        lock.commit()?;
        info!(collection = %self.info.name, documents = changed, hidden, "document visibility changed");
        Ok(changed)
    }

    /// Deletes documents together with their rows in every layer table.
    pub fn delete_documents(&self, ids: &[DocumentId]) -> StoreResult<usize> {
        let list = id_list(ids)?;
        let lock = WriteLock::acquire(self.connection())?;
        let structure = self.info.structure_registry().load(&lock)?;
        for descriptor in structure.layers().iter().filter(|d| d.layer_type.is_tabled()) {
            lock.execute(
                &format!(
                    "DELETE FROM {} WHERE text_id IN (SELECT value FROM json_each(?1))",
                    self.layer_table(descriptor)
                ),
                params![list],
            )?;
        }
        let deleted = lock.execute(
            &format!(
                "DELETE FROM {} WHERE id IN (SELECT value FROM json_each(?1))",
                self.info.table()
            ),
            params![list],
        )?;
        lock.commit()?;
        info!(collection = %self.info.name, documents = deleted, "documents deleted");
        Ok(deleted)
    }

    // =========================================================================
    // Layer reads
    // =========================================================================

    /// Reads the meta columns of a detached or fragmented layer.
    pub fn layer_meta(&self, layer: &str) -> StoreResult<Vec<LayerMetaRow>> {
        let structure = self.structure()?;
        let descriptor = structure.require(layer)?;
        if descriptor.layer_type == LayerType::Attached {
            return Err(StrataError::structure_conflict(&self.info.name, layer, "attached layers have no table").into());
        }
        let columns: Vec<(&str, MetaType)> = descriptor.meta.iter().collect();
        let mut select = vec!["id".to_string(), "text_id".to_string()];
        select.extend(columns.iter().map(|(name, _)| quote_ident(name)));
        let sql = format!(
            "SELECT {} FROM {} ORDER BY id",
            select.join(", "),
            self.layer_table(descriptor)
        );
        let mut stmt = self.connection().prepare(&sql)?;
        let rows = stmt
            .query_map([], |row| {
                let mut meta = BTreeMap::new();
                for (i, (name, meta_type)) in columns.iter().enumerate() {
                    meta.insert((*name).to_string(), sql_to_meta(*meta_type, row.get_ref(2 + i)?));
                }
                Ok(LayerMetaRow {
                    id: row.get(0)?,
                    text_id: DocumentId::new(row.get(1)?),
                    meta,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Counts the values of one attribute across selected documents.
    pub fn count_values(&self, layer: &str, attribute: &str, query: Option<Query>) -> StoreResult<BTreeMap<String, usize>> {
        let structure = self.structure()?;
        let descriptor = structure.require(layer)?;
        let mut counts = BTreeMap::new();
        let mut merge = |partial: BTreeMap<String, usize>| {
            for (value, n) in partial {
                *counts.entry(value).or_insert(0) += n;
            }
        };
        if descriptor.layer_type == LayerType::Fragmented {
            for fragment in self.select_fragments(layer, query)? {
                merge(fragment.layer.count_values(attribute)?);
            }
            return Ok(counts);
        }
        let mut selection = self.select().layers([layer]);
        if let Some(query) = query {
            selection = selection.query(query);
        }
        for selected in selection.iter()? {
            let selected = selected?;
            if let Some(found) = selected.document.layer(layer) {
                merge(found.count_values(attribute)?);
            }
        }
        Ok(counts)
    }

    /// Reads the fragments of a fragmented layer, optionally only for
    /// documents matching `query`.
    pub fn select_fragments(&self, layer: &str, query: Option<Query>) -> StoreResult<Vec<FragmentRow>> {
        let structure = self.structure()?;
        let descriptor = structure.require(layer)?;
        if descriptor.layer_type != LayerType::Fragmented {
            return Err(StrataError::structure_conflict(&self.info.name, layer, "layer is not fragmented").into());
        }
        let mut sql = format!(
            "SELECT id, text_id, parent_id, data FROM {}",
            self.layer_table(descriptor)
        );
        let mut params = Vec::new();
        if let Some(query) = query {
            let ids = self.select().query(query).ids()?;
            sql.push_str(" WHERE text_id IN (SELECT value FROM json_each(?))");
            params.push(SqlValue::Text(id_list(&ids)?));
        }
        sql.push_str(" ORDER BY id");

        let mut stmt = self.connection().prepare(&sql)?;
        let raw = stmt
            .query_map(params_from_iter(params.iter()), |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, i64>(1)?,
                    row.get::<_, i64>(2)?,
                    row.get::<_, String>(3)?,
                ))
            })?
            .collect::<Result<Vec<_>, _>>()?;
        raw.into_iter()
            .map(|(id, text_id, parent_id, data)| {
                Ok(FragmentRow {
                    id,
                    text_id: DocumentId::new(text_id),
                    parent_id,
                    layer: CodecRegistry::global().decode_layer(&data)?,
                })
            })
            .collect()
    }

    // =========================================================================
    // Export
    // =========================================================================

    /// Writes one row per annotation of `layer` into a flat table.
    ///
    /// Returns the number of rows written.
    pub fn export_layer(&self, layer: &str, options: ExportOptions) -> StoreResult<usize> {
        let structure = self.structure()?;
        let descriptor = structure.require(layer)?;
        if descriptor.layer_type == LayerType::Fragmented {
            return Err(StrataError::structure_conflict(&self.info.name, layer, "fragmented layers cannot be exported").into());
        }
        let attributes = match &options.attributes {
            Some(selected) => {
                if let Some(unknown) = selected.iter().find(|a| !descriptor.attributes.contains(a)) {
                    return Err(StrataError::invalid_argument(format!(
                        "layer '{layer}' has no attribute '{unknown}'"
                    ))
                    .into());
                }
                selected.clone()
            }
            None => descriptor.attributes.clone(),
        };
        let mut meta_columns = Vec::with_capacity(options.collection_meta.len());
        for column in &options.collection_meta {
            let meta_type = self.info.meta.get(column).ok_or_else(|| {
                StrataError::invalid_argument(format!(
                    "collection '{}' has no meta column '{column}'",
                    self.info.name
                ))
            })?;
            meta_columns.push((column.clone(), meta_type));
        }

        let fixed = ["id", "text_id", "span_nr", "span_start", "span_end"];
        let mut columns: Vec<String> = fixed.iter().map(|c| (*c).to_string()).collect();
        for name in attributes.iter().chain(meta_columns.iter().map(|(n, _)| n)) {
            if columns.contains(name) {
                return Err(StrataError::invalid_argument(format!("export column '{name}' is used twice")).into());
            }
            columns.push(name.clone());
        }

        let table = TableName::new(
            self.info.schema(),
            options
                .table
                .clone()
                .unwrap_or_else(|| TableName::export(self.info.schema(), &self.info.name, layer).name().to_string()),
        );
        let conn = self.connection();
        {
            let lock = WriteLock::acquire(conn)?;
            let exists = table_exists(&lock, &table)?;
            match (options.mode, exists) {
                (ExportMode::New, true) => {
                    return Err(StrataError::structure_conflict(
                        &self.info.name,
                        layer,
                        format!("export table {table} already exists"),
                    )
                    .into())
                }
                (ExportMode::Append, false) => {
                    return Err(StrataError::structure_conflict(
                        &self.info.name,
                        layer,
                        format!("export table {table} does not exist"),
                    )
                    .into())
                }
                (ExportMode::New, false) => {
                    let mut definitions = vec![
                        "id INTEGER PRIMARY KEY".to_string(),
                        "text_id INTEGER NOT NULL".to_string(),
                        "span_nr INTEGER NOT NULL".to_string(),
                        "span_start INTEGER NOT NULL".to_string(),
                        "span_end INTEGER NOT NULL".to_string(),
                    ];
                    definitions.extend(attributes.iter().map(|a| format!("{} TEXT", quote_ident(a))));
                    definitions.extend(
                        meta_columns
                            .iter()
                            .map(|(n, t)| format!("{} {}", quote_ident(n), t.sql_type())),
                    );
                    lock.execute_batch(&format!("CREATE TABLE {table} ({})", definitions.join(", ")))?;
                }
                (ExportMode::Append, true) => {}
            }
            lock.commit()?;
        }

        let mut row_id = next_id(conn, &table)?
            .ok_or_else(|| StrataError::invalid_argument(format!("table {table} has no free ids left")))?;
        let mut selection = self
            .select()
            .layers([layer])
            .collection_meta(meta_columns.iter().map(|(n, _)| n.clone()));
        if let Some(query) = options.query.clone() {
            selection = selection.query(query);
        }

        let written = BufferedInsert::scoped(conn, table.clone(), columns, &self.config().insert, |inserter| {
            let mut written = 0;
            for selected in selection.iter()? {
                let selected = selected?;
                let Some(found) = selected.document.layer(layer) else {
                    continue;
                };
                for (span_nr, span) in found.spans().iter().enumerate() {
                    for annotation in span.annotations() {
                        let mut row = vec![
                            SqlValue::Integer(row_id),
                            SqlValue::Integer(selected.id.as_i64()),
                            SqlValue::Integer(i64::try_from(span_nr).unwrap_or(i64::MAX)),
                            SqlValue::Integer(i64::try_from(span.start()).unwrap_or(i64::MAX)),
                            SqlValue::Integer(i64::try_from(span.end()).unwrap_or(i64::MAX)),
                        ];
                        for attribute in &attributes {
                            row.push(match found.value(annotation, attribute) {
                                None | Some(Value::Null) => SqlValue::Null,
                                Some(Value::String(s)) => SqlValue::Text(s.clone()),
                                Some(other) => SqlValue::Text(other.to_string()),
                            });
                        }
                        for (name, meta_type) in &meta_columns {
                            let value = selected.meta.get(name).unwrap_or(&Value::Null);
                            row.push(meta_to_sql(name, *meta_type, value)?);
                        }
                        inserter.insert(row)?;
                        row_id = row_id.saturating_add(1);
                        written += 1;
                    }
                }
            }
            Ok(written)
        })?;
        info!(collection = %self.info.name, layer, table = %table, rows = written, "layer exported");
        Ok(written)
    }
}

/// JSON array of ids for `json_each` parameters.
pub(crate) fn id_list(ids: &[DocumentId]) -> StoreResult<String> {
    Ok(serde_json::to_string(&ids.iter().map(|id| id.as_i64()).collect::<Vec<_>>())?)
}
