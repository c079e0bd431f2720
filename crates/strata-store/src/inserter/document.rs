//! Document ingestion.

use std::collections::BTreeMap;

use rusqlite::types::Value as SqlValue;
use rusqlite::Connection;
use serde_json::Value;
use tracing::{debug, info, warn};

use strata_common::error::StrataError;
use strata_common::types::{DocumentId, LayerType, MetaSchema};
use strata_model::{CodecRegistry, Document, Layer};

use crate::collection::Collection;
use crate::error::{StoreError, StoreResult};
use crate::inserter::{BoundedWarning, BufferedInsert};
use crate::sql::{count_rows, meta_to_sql, next_id};
use crate::storage::CollectionInfo;
use crate::structure::{LayerDescriptor, StructureRegistry};

/// A document queued for insertion.
#[derive(Debug, Clone, PartialEq)]
pub struct DocumentRow {
    /// Explicit id; the next free id is used when absent.
    pub key: Option<DocumentId>,
    /// The document with its attached layers.
    pub document: Document,
    /// Values for the collection's meta columns.
    pub meta: BTreeMap<String, Value>,
}

impl DocumentRow {
    /// A row without key or metadata.
    pub fn new(document: Document) -> Self {
        Self {
            key: None,
            document,
            meta: BTreeMap::new(),
        }
    }

    /// Sets an explicit id.
    #[must_use]
    pub fn with_key(mut self, key: impl Into<DocumentId>) -> Self {
        self.key = Some(key.into());
        self
    }

    /// Adds a meta column value.
    #[must_use]
    pub fn with_meta(mut self, column: impl Into<String>, value: Value) -> Self {
        self.meta.insert(column.into(), value);
        self
    }
}

impl From<Document> for DocumentRow {
    fn from(document: Document) -> Self {
        Self::new(document)
    }
}

/// Outcome of a closed document inserter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct InsertSummary {
    /// Documents committed.
    pub inserted: usize,
    /// Relation layers left out because the collection predates them.
    pub dropped_relation_layers: usize,
}

/// Inserts documents with their attached layers.
///
/// The first document of an empty collection fixes the attached layer
/// set: its layer descriptors are registered in the same transaction as
/// the first flush. Every later document must carry exactly that set with
/// identical shapes.
///
/// Queued documents are committed by [`close`](Self::close) or, when the
/// inserter goes out of scope unclosed, by its `Drop`. Only
/// [`discard`](Self::discard) drops them.
pub struct DocumentInserter<'a> {
    info: &'a CollectionInfo,
    registry: StructureRegistry,
    buffer: BufferedInsert<'a>,
    meta: MetaSchema,
    frozen: Option<Vec<Layer>>,
    pending_structure: Option<Vec<LayerDescriptor>>,
    next_id: Option<i64>,
    batch: Option<(i64, i64)>,
    failed_batch: Option<(i64, i64)>,
    relation_warning: BoundedWarning,
    closed: bool,
}

impl<'a> DocumentInserter<'a> {
    pub(crate) fn open(collection: &'a Collection<'a>) -> StoreResult<Self> {
        let info = collection.info();
        let conn = collection.connection();
        let registry = info.structure_registry();
        let structure = registry.load(conn)?;
        if structure.has_tabled_layers() {
            return Err(StrataError::structure_conflict(
                &info.name,
                structure
                    .layers()
                    .iter()
                    .find(|d| d.layer_type.is_tabled())
                    .map_or("", |d| d.name.as_str()),
                "documents cannot be inserted after detached layers were added",
            )
            .into());
        }
        let table = info.table();
        let frozen = if count_rows(conn, &table)? > 0 {
            Some(
                structure
                    .attached()
                    .map(LayerDescriptor::template)
                    .collect::<StoreResult<Vec<_>>>()?,
            )
        } else {
            None
        };

        let mut columns = vec!["id".to_string(), "data".to_string()];
        if info.version.supports_hidden_documents() {
            columns.push("hidden".to_string());
        }
        columns.extend(info.meta.names().map(str::to_string));
        let config = collection.config();

        Ok(Self {
            info,
            registry,
            next_id: next_id(conn, &table)?,
            buffer: BufferedInsert::new(conn, table, columns, &config.insert),
            meta: info.meta.clone(),
            frozen,
            pending_structure: None,
            batch: None,
            failed_batch: None,
            relation_warning: BoundedWarning::new(
                "relation layer not stored, collection version predates relation layers",
                config.insert.warning_limit,
            ),
            closed: false,
        })
    }

    /// Rows committed so far.
    pub fn flushed_rows(&self) -> usize {
        self.buffer.flushed_rows()
    }

    /// Id the next document without a key receives, `None` once an id of
    /// `i64::MAX` was used.
    pub fn next_id(&self) -> Option<DocumentId> {
        self.next_id.map(DocumentId::new)
    }

    /// Smallest and largest id of the queued documents.
    pub fn pending_batch(&self) -> Option<(DocumentId, DocumentId)> {
        self.batch
            .map(|(first, last)| (DocumentId::new(first), DocumentId::new(last)))
    }

    /// Smallest and largest id of the last batch whose flush failed.
    pub fn failed_batch(&self) -> Option<(DocumentId, DocumentId)> {
        self.failed_batch
            .map(|(first, last)| (DocumentId::new(first), DocumentId::new(last)))
    }

    /// Queues a document. Returns the id it is stored under.
    pub fn insert(&mut self, row: DocumentRow) -> StoreResult<DocumentId> {
        let DocumentRow {
            key,
            mut document,
            meta,
        } = row;
        if let Some(unknown) = meta.keys().find(|k| self.meta.get(k).is_none()) {
            return Err(StrataError::invalid_argument(format!(
                "collection '{}' has no meta column '{unknown}'",
                self.info.name
            ))
            .into());
        }
        let meta_values = self
            .meta
            .iter()
            .map(|(column, meta_type)| meta_to_sql(column, meta_type, meta.get(column).unwrap_or(&Value::Null)))
            .collect::<StoreResult<Vec<_>>>()?;

        self.drop_unsupported_layers(&mut document)?;
        self.check_shape(&document)?;
        let data = CodecRegistry::global().encode_document(&document)?;

        let id = match key {
            Some(key) => key.as_i64(),
            None => self.next_id.ok_or_else(|| {
                StrataError::invalid_argument(format!(
                    "collection '{}' has no free document ids left, give an explicit key",
                    self.info.name
                ))
            })?,
        };
        self.next_id = self
            .next_id
            .and_then(|next| id.checked_add(1).map(|after| next.max(after)));

        let mut values = vec![SqlValue::Integer(id), SqlValue::Text(data)];
        if self.info.version.supports_hidden_documents() {
            values.push(SqlValue::Integer(0));
        }
        values.extend(meta_values);

        let due = self.buffer.push(values)?;
        self.batch = Some(match self.batch {
            Some((first, last)) => (first.min(id), last.max(id)),
            None => (id, id),
        });
        if due {
            self.flush()?;
        }
        Ok(DocumentId::new(id))
    }

    fn drop_unsupported_layers(&mut self, document: &mut Document) -> StoreResult<()> {
        if self.info.version.supports_relation_layers() {
            return Ok(());
        }
        let relation_layers: Vec<String> = document
            .layers()
            .iter()
            .filter(|layer| layer.is_relation_layer())
            .map(|layer| layer.name().to_string())
            .collect();
        for name in relation_layers {
            document.remove_layer(&name)?;
            self.relation_warning.note(format_args!("layer '{name}' of collection '{}'", self.info.name));
        }
        Ok(())
    }

    fn check_shape(&mut self, document: &Document) -> StoreResult<()> {
        let Some(frozen) = &self.frozen else {
            let mut descriptors = Vec::with_capacity(document.layers().len());
            for layer in document.layers() {
                let descriptor = LayerDescriptor::from_layer(layer, LayerType::Attached, false, MetaSchema::new());
                if descriptor.serialisation_module.is_some() && !self.info.version.supports_serialisation_tags() {
                    return Err(StrataError::SchemaVersionUnsupported {
                        collection: self.info.name.clone(),
                        feature: "serialisation tags".to_string(),
                        required: strata_common::types::CollectionVersion::V2,
                        actual: self.info.version,
                    }
                    .into());
                }
                descriptors.push(descriptor);
            }
            self.frozen = Some(document.layers().iter().map(Layer::template).collect());
            self.pending_structure = Some(descriptors);
            return Ok(());
        };

        if frozen.len() != document.layers().len() {
            return Err(StrataError::row_shape_mismatch(
                "*",
                format!(
                    "document has layers {:?}, collection has {:?}",
                    document.layer_names(),
                    frozen.iter().map(Layer::name).collect::<Vec<_>>()
                ),
            )
            .into());
        }
        for expected in frozen {
            let Some(layer) = document.layer(expected.name()) else {
                return Err(StrataError::row_shape_mismatch(
                    expected.name(),
                    "document does not have the layer",
                )
                .into());
            };
            if let Some(reason) = expected.shape_difference(&layer.template()) {
                return Err(StrataError::row_shape_mismatch(expected.name(), reason).into());
            }
        }
        Ok(())
    }

    /// Writes and commits queued documents.
    pub fn flush(&mut self) -> StoreResult<usize> {
        let info = self.info;
        let registry = &self.registry;
        let pending = self.pending_structure.as_deref();
        let frozen = self.frozen.as_deref();
        match self
            .buffer
            .flush_with(|conn| register_structure(conn, info, registry, pending, frozen))
        {
            Ok(written) => {
                if written > 0 {
                    self.pending_structure = None;
                }
                self.batch = None;
                Ok(written)
            }
            Err(err) => {
                self.failed_batch = self.batch.take();
                Err(err)
            }
        }
    }

    /// Flushes queued documents and reports the totals.
    pub fn close(mut self) -> StoreResult<InsertSummary> {
        self.closed = true;
        self.flush()?;
        self.relation_warning.finish();
        let summary = InsertSummary {
            inserted: self.buffer.flushed_rows(),
            dropped_relation_layers: self.relation_warning.count(),
        };
        info!(collection = %self.info.name, documents = summary.inserted, "documents inserted");
        Ok(summary)
    }

    /// Drops queued documents.
    pub fn discard(mut self) -> usize {
        self.closed = true;
        self.buffer.clear()
    }
}

impl Drop for DocumentInserter<'_> {
    fn drop(&mut self) {
        if self.closed || self.buffer.pending() == 0 {
            return;
        }
        let pending = self.buffer.pending();
        match self.flush() {
            Ok(written) => debug!(collection = %self.info.name, documents = written, "flushed on drop"),
            Err(err) => warn!(
                collection = %self.info.name,
                documents = pending,
                error = %err,
                "flush on drop failed, queued documents lost"
            ),
        }
        self.relation_warning.finish();
    }
}

/// Registers or re-validates the attached structure under the write lock.
fn register_structure(
    conn: &Connection,
    info: &CollectionInfo,
    registry: &StructureRegistry,
    pending: Option<&[LayerDescriptor]>,
    frozen: Option<&[Layer]>,
) -> StoreResult<()> {
    let fresh = registry.load(conn)?;
    if fresh.has_tabled_layers() {
        return Err(StrataError::concurrent_modification(format!(
            "a detached layer was added to collection '{}' during insertion",
            info.name
        ))
        .into());
    }
    let registered: Vec<&LayerDescriptor> = fresh.attached().collect();

    if let Some(pending) = pending {
        if registered.is_empty() && count_rows(conn, &info.table())? == 0 {
            for descriptor in pending {
                registry.insert(conn, descriptor)?;
            }
            return Ok(());
        }
        let same = registered.len() == pending.len()
            && registered.iter().zip(pending).all(|(a, b)| *a == b);
        if !same {
            return Err(concurrent_structure(info));
        }
        return Ok(());
    }

    let frozen = frozen.unwrap_or_default();
    let same = registered.len() == frozen.len()
        && registered.iter().all(|descriptor| {
            frozen.iter().any(|layer| {
                matches!(descriptor.shape_difference(layer), Ok(None))
            })
        });
    if same {
        Ok(())
    } else {
        Err(concurrent_structure(info))
    }
}

fn concurrent_structure(info: &CollectionInfo) -> StoreError {
    StrataError::concurrent_modification(format!(
        "attached layers of collection '{}' changed during insertion",
        info.name
    ))
    .into()
}
