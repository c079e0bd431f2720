//! Layer lifecycle: declaring, populating and deleting tabled layers.
//!
//! Every structure change takes the write lock, re-reads the registry and
//! validates against that fresh snapshot before writing. Population reads
//! input documents in chunks and writes layer rows through a buffered
//! inserter; rows of completed flushes stay committed when a later
//! document fails.

use std::collections::{BTreeMap, BTreeSet};

use rusqlite::Connection;
use serde_json::Value;
use tracing::info;

use strata_common::constants::NGRAM_COLUMN_SUFFIX;
use strata_common::error::StrataError;
use strata_common::types::{Block, DocumentId, LayerType, MetaSchema};
use strata_model::{Document, Fragment, Layer, RowMapperRecord, Tagger};

use crate::collection::Collection;
use crate::error::StoreResult;
use crate::inserter::{ngram_column, BoundedWarning, LayerInserter};
use crate::lock::WriteLock;
use crate::query::Query;
use crate::sql::{count_rows, index_exists, quote_ident, table_columns, table_exists, TableName};
use crate::structure::{CollectionStructure, LayerDescriptor};

// =============================================================================
// Options
// =============================================================================

/// How layer creation treats an existing layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CreateMode {
    /// The layer must not exist.
    #[default]
    New,
    /// The layer must exist; only documents without a row are processed.
    Append,
    /// An existing layer is deleted with its dependents first.
    Overwrite,
}

/// Options for creating a tabled layer.
#[derive(Debug, Clone, Default)]
pub struct LayerOptions {
    /// Treatment of an existing layer.
    pub mode: CreateMode,
    /// Whether documents may lack a row; empty produced layers are not stored.
    pub sparse: bool,
    /// Typed meta columns of the layer table.
    pub meta: MetaSchema,
    /// Attributes with an n-gram index, and the maximal gram size.
    pub ngram_index: Vec<(String, usize)>,
    /// Whether the meta and n-gram columns of a new layer table are indexed.
    pub index: bool,
}

impl LayerOptions {
    /// Default options: new, dense, no meta columns.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the creation mode.
    #[must_use]
    pub fn mode(mut self, mode: CreateMode) -> Self {
        self.mode = mode;
        self
    }

    /// Marks the layer sparse.
    #[must_use]
    pub fn sparse(mut self, sparse: bool) -> Self {
        self.sparse = sparse;
        self
    }

    /// Sets the meta columns.
    #[must_use]
    pub fn meta(mut self, meta: MetaSchema) -> Self {
        self.meta = meta;
        self
    }

    /// Indexes n-grams of an attribute up to size `n`.
    #[must_use]
    pub fn ngram_index(mut self, attribute: impl Into<String>, n: usize) -> Self {
        self.ngram_index.push((attribute.into(), n));
        self
    }

    /// Indexes the meta and n-gram columns when the table is created.
    #[must_use]
    pub fn index(mut self, index: bool) -> Self {
        self.index = index;
        self
    }
}

/// Outcome of populating a layer.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct LayerCreationReport {
    /// Layer name.
    pub layer: String,
    /// Rows committed.
    pub inserted: usize,
    /// Empty layers of a sparse layer that were not stored.
    pub skipped_empty: usize,
    /// Rows whose metadata could not be stored.
    pub metadata_lost: usize,
}

/// A produced row before it is written.
struct ProducedRow {
    parent_id: Option<i64>,
    layer: Layer,
    meta: BTreeMap<String, Value>,
}

impl From<RowMapperRecord> for ProducedRow {
    fn from(record: RowMapperRecord) -> Self {
        Self {
            parent_id: None,
            layer: record.layer,
            meta: record.meta,
        }
    }
}

impl From<Fragment> for ProducedRow {
    fn from(fragment: Fragment) -> Self {
        Self {
            parent_id: Some(fragment.parent_id),
            layer: fragment.layer,
            meta: fragment.meta,
        }
    }
}

// =============================================================================
// Lifecycle operations
// =============================================================================

impl Collection<'_> {
    /// Registers an empty detached layer and creates its table.
    ///
    /// The collection must hold documents; the layer and its table must
    /// not exist.
    pub fn add_layer(&self, template: &Layer, options: &LayerOptions) -> StoreResult<()> {
        self.declare(template, LayerType::Detached, options, false)?;
        Ok(())
    }

    /// Creates a detached layer by running a tagger over every document.
    pub fn create_layer(&self, tagger: &dyn Tagger, options: &LayerOptions) -> StoreResult<LayerCreationReport> {
        let template = tagger_template(tagger)?;
        self.create_layer_with(&template, tagger.input_layers(), |_, document| Ok(tagger.make_record(document)?), options)
    }

    /// Creates a detached layer from a row mapper.
    ///
    /// The mapper receives each document carrying `input_layers` and
    /// returns the layer and its meta values. Every produced layer must
    /// have the shape of `template`.
    pub fn create_layer_with<F>(
        &self,
        template: &Layer,
        input_layers: &[String],
        mut mapper: F,
        options: &LayerOptions,
    ) -> StoreResult<LayerCreationReport>
    where
        F: FnMut(DocumentId, &Document) -> StoreResult<RowMapperRecord>,
    {
        let filter = self.prepare_layer(template, LayerType::Detached, options)?;
        self.populate(
            template.name(),
            input_layers,
            |id, document| Ok(vec![mapper(id, document)?.into()]),
            options,
            filter,
        )
    }

    /// Runs a tagger over one block of documents.
    ///
    /// Several workers may call this concurrently with disjoint blocks
    /// partitioning the id space. The first caller declares the layer;
    /// later callers find an identical declaration and continue. In
    /// append mode only documents without a row are processed, so a
    /// failed block can be re-run.
    pub fn create_layer_block(
        &self,
        tagger: &dyn Tagger,
        block: Block,
        options: &LayerOptions,
    ) -> StoreResult<LayerCreationReport> {
        if options.mode == CreateMode::Overwrite {
            return Err(StrataError::invalid_argument(
                "block creation cannot overwrite, other blocks may be populating the layer",
            )
            .into());
        }
        let template = tagger_template(tagger)?;
        let created = self.declare(&template, LayerType::Detached, options, true)?;
        let descriptor = self.structure()?.require(template.name())?.clone();
        self.check_shape(&descriptor, &template)?;
        self.check_ngram_columns(&descriptor, &options.ngram_index)?;

        let mut filter = Query::block(block);
        if options.mode == CreateMode::Append {
            filter = filter & Query::missing_layer(template.name());
        }
        info!(
            collection = %self.name(),
            layer = template.name(),
            block = %block,
            declared = created,
            "populating layer block"
        );
        self.populate(
            template.name(),
            tagger.input_layers(),
            |_, document| Ok(vec![tagger.make_record(document)?.into()]),
            options,
            Some(filter),
        )
    }

    /// Creates a fragmented layer: the tagger's layer for each document is
    /// split into fragments, each stored as its own row.
    pub fn create_fragmented_layer<F>(
        &self,
        tagger: &dyn Tagger,
        mut fragmenter: F,
        options: &LayerOptions,
    ) -> StoreResult<LayerCreationReport>
    where
        F: FnMut(DocumentId, Layer) -> StoreResult<Vec<Fragment>>,
    {
        let template = tagger_template(tagger)?;
        let filter = self.prepare_layer(&template, LayerType::Fragmented, options)?;
        self.populate(
            template.name(),
            tagger.input_layers(),
            |id, document| {
                let record = tagger.make_record(document)?;
                Ok(fragmenter(id, record.layer)?.into_iter().map(ProducedRow::from).collect())
            },
            options,
            filter,
        )
    }

    /// Deletes a tabled layer.
    ///
    /// Without `cascade`, fails if other layers depend on it. With
    /// `cascade`, dependents are deleted too. Returns the deleted layers.
    pub fn delete_layer(&self, name: &str, cascade: bool) -> StoreResult<Vec<String>> {
        let lock = WriteLock::acquire(self.connection())?;
        let registry = self.info().structure_registry();
        let fresh = registry.load(&lock)?;
        let descriptor = fresh.require(name)?;
        if descriptor.layer_type == LayerType::Attached {
            return Err(StrataError::structure_conflict(self.name(), name, "attached layers cannot be deleted").into());
        }
        let dependents = fresh.dependents(name);
        if !dependents.is_empty() && !cascade {
            return Err(StrataError::DependencyConflict {
                layer: name.to_string(),
                reason: "other layers depend on it".to_string(),
                dependents,
            }
            .into());
        }

        let mut removed = vec![name.to_string()];
        removed.extend(dependents);
        for layer in removed.iter().rev() {
            let descriptor = fresh.require(layer)?;
            lock.execute_batch(&format!("DROP TABLE IF EXISTS {}", self.layer_table(descriptor)))?;
            registry.delete(&lock, layer)?;
        }
        lock.commit()?;
        info!(collection = %self.name(), layers = ?removed, "layers deleted");
        Ok(removed)
    }

    // =========================================================================
    // Indexes
    // =========================================================================

    /// Indexes the meta columns of the document table and the meta and
    /// n-gram columns of every tabled layer. Existing indexes are kept.
    /// Returns the names of the indexes created.
    pub fn create_index(&self) -> StoreResult<Vec<String>> {
        let lock = WriteLock::acquire(self.connection())?;
        let fresh = self.info().structure_registry().load(&lock)?;
        let mut created = Vec::new();
        for (table, column) in self.indexable_columns(&lock, &fresh)? {
            if !index_exists(&lock, &table, &column)? {
                create_column_index(&lock, &table, &column)?;
                created.push(table.index_name(&column));
            }
        }
        lock.commit()?;
        info!(collection = %self.name(), indexes = created.len(), "indexes created");
        Ok(created)
    }

    /// Drops the indexes [`create_index`](Self::create_index) creates.
    /// Returns how many existed.
    pub fn drop_index(&self) -> StoreResult<usize> {
        let lock = WriteLock::acquire(self.connection())?;
        let fresh = self.info().structure_registry().load(&lock)?;
        let mut dropped = 0;
        for (table, column) in self.indexable_columns(&lock, &fresh)? {
            if index_exists(&lock, &table, &column)? {
                lock.execute_batch(&format!("DROP INDEX {}", table.index(&column)))?;
                dropped += 1;
            }
        }
        lock.commit()?;
        info!(collection = %self.name(), indexes = dropped, "indexes dropped");
        Ok(dropped)
    }

    fn indexable_columns(
        &self,
        conn: &Connection,
        structure: &CollectionStructure,
    ) -> StoreResult<Vec<(TableName, String)>> {
        let documents = self.info().table();
        let mut columns: Vec<(TableName, String)> = self
            .info()
            .meta
            .names()
            .map(|column| (documents.clone(), column.to_string()))
            .collect();
        for descriptor in structure.layers().iter().filter(|d| d.layer_type.is_tabled()) {
            let table = self.layer_table(descriptor);
            columns.extend(descriptor.meta.names().map(|column| (table.clone(), column.to_string())));
            columns.extend(
                table_columns(conn, &table)?
                    .into_iter()
                    .filter(|column| column.ends_with(NGRAM_COLUMN_SUFFIX))
                    .map(|column| (table.clone(), column)),
            );
        }
        Ok(columns)
    }

    // =========================================================================
    // Internals
    // =========================================================================

    /// Applies the creation mode and returns the input filter.
    fn prepare_layer(&self, template: &Layer, layer_type: LayerType, options: &LayerOptions) -> StoreResult<Option<Query>> {
        let name = template.name();
        let filter = match options.mode {
            CreateMode::New => {
                self.declare(template, layer_type, options, false)?;
                None
            }
            CreateMode::Append => {
                let structure = self.structure()?;
                let descriptor = structure.require(name)?;
                if descriptor.layer_type != layer_type {
                    return Err(StrataError::structure_conflict(
                        self.name(),
                        name,
                        format!("layer is {}, not {}", descriptor.layer_type, layer_type),
                    )
                    .into());
                }
                self.check_shape(descriptor, template)?;
                Some(Query::missing_layer(name))
            }
            CreateMode::Overwrite => {
                if self.structure()?.contains(name) {
                    self.delete_layer(name, true)?;
                }
                self.declare(template, layer_type, options, false)?;
                None
            }
        };
        let descriptor = self.structure()?.require(name)?.clone();
        self.check_ngram_columns(&descriptor, &options.ngram_index)?;
        Ok(filter)
    }

    /// Registers a tabled layer and creates its table under the write lock.
    ///
    /// With `tolerate_identical`, an existing identical declaration is
    /// accepted and `false` returned.
    fn declare(&self, template: &Layer, layer_type: LayerType, options: &LayerOptions, tolerate_identical: bool) -> StoreResult<bool> {
        let name = template.name();
        let descriptor = LayerDescriptor::from_layer(template, layer_type, options.sparse, options.meta.clone());
        for (attribute, n) in &options.ngram_index {
            if !descriptor.attributes.contains(attribute) || *n == 0 {
                return Err(StrataError::invalid_argument(format!(
                    "n-gram index ({attribute}, {n}) does not fit layer '{name}'"
                ))
                .into());
            }
        }

        let lock = WriteLock::acquire(self.connection())?;
        let registry = self.info().structure_registry();
        let fresh = registry.load(&lock)?;
        if count_rows(&lock, &self.info().table())? == 0 {
            return Err(StrataError::structure_conflict(self.name(), name, "collection has no documents").into());
        }
        if let Some(existing) = fresh.get(name) {
            if tolerate_identical && *existing == descriptor {
                lock.rollback()?;
                return Ok(false);
            }
            return Err(StrataError::structure_conflict(self.name(), name, "layer already exists").into());
        }
        let table = self.layer_table(&descriptor);
        if table_exists(&lock, &table)? {
            return Err(StrataError::structure_conflict(self.name(), name, format!("table {table} already exists")).into());
        }
        fresh.check_insertable(&descriptor)?;

        let mut columns = vec!["id INTEGER PRIMARY KEY".to_string(), "text_id INTEGER NOT NULL".to_string()];
        if layer_type == LayerType::Fragmented {
            columns.push("parent_id INTEGER NOT NULL".to_string());
        }
        columns.push("data TEXT NOT NULL".to_string());
        for (column, meta_type) in descriptor.meta.iter() {
            columns.push(format!("{} {}", quote_ident(column), meta_type.sql_type()));
        }
        for (attribute, _) in &options.ngram_index {
            columns.push(format!("{} TEXT", quote_ident(&ngram_column(attribute))));
        }
        lock.execute_batch(&format!(
            "CREATE TABLE {table} ({}); CREATE INDEX {} ON {} (text_id);",
            columns.join(", "),
            table.index("text_id"),
            quote_ident(table.name())
        ))?;
        if options.index {
            let indexed = descriptor
                .meta
                .names()
                .map(str::to_string)
                .chain(options.ngram_index.iter().map(|(attribute, _)| ngram_column(attribute)));
            for column in indexed {
                create_column_index(&lock, &table, &column)?;
            }
        }
        registry.insert(&lock, &descriptor)?;
        lock.commit()?;

        info!(
            collection = %self.name(),
            layer = name,
            layer_type = %layer_type,
            sparse = options.sparse,
            "layer declared"
        );
        Ok(true)
    }

    fn check_shape(&self, descriptor: &LayerDescriptor, template: &Layer) -> StoreResult<()> {
        match descriptor.shape_difference(template)? {
            Some(reason) => Err(StrataError::row_shape_mismatch(&descriptor.name, reason).into()),
            None => Ok(()),
        }
    }

    /// The table's n-gram columns must be exactly the requested ones.
    fn check_ngram_columns(&self, descriptor: &LayerDescriptor, ngram_index: &[(String, usize)]) -> StoreResult<()> {
        let existing: BTreeSet<String> = table_columns(self.connection(), &self.layer_table(descriptor))?
            .into_iter()
            .filter_map(|c| c.strip_suffix(NGRAM_COLUMN_SUFFIX).map(str::to_string))
            .filter(|attribute| descriptor.attributes.contains(attribute))
            .collect();
        let requested: BTreeSet<String> = ngram_index.iter().map(|(a, _)| a.clone()).collect();
        if existing != requested {
            return Err(StrataError::structure_conflict(
                self.name(),
                &descriptor.name,
                format!("n-gram index {requested:?} differs from the table's {existing:?}"),
            )
            .into());
        }
        Ok(())
    }

    /// Runs `produce` over the selected input documents and writes the rows.
    fn populate<F>(
        &self,
        layer: &str,
        input_layers: &[String],
        mut produce: F,
        options: &LayerOptions,
        filter: Option<Query>,
    ) -> StoreResult<LayerCreationReport>
    where
        F: FnMut(DocumentId, &Document) -> StoreResult<Vec<ProducedRow>>,
    {
        let descriptor = self.structure()?.require(layer)?.clone();
        let table = self.layer_table(&descriptor);
        let config = self.config();
        let mut inserter = LayerInserter::new(self.connection(), table, &descriptor, &options.ngram_index, &config.insert);

        let mut selection = self.select().layers(input_layers.iter().cloned()).include_hidden(true);
        if let Some(filter) = filter {
            selection = selection.query(filter);
        }

        let mut report = LayerCreationReport {
            layer: layer.to_string(),
            ..LayerCreationReport::default()
        };
        let mut lost = BoundedWarning::new("row metadata not stored", config.insert.warning_limit);
        let mut current: Option<DocumentId> = None;

        let result = (|| -> StoreResult<()> {
            for selected in selection.iter()? {
                let selected = selected?;
                current = Some(selected.id);
                for row in produce(selected.id, &selected.document)? {
                    if let Some(reason) = descriptor.shape_difference(&row.layer)? {
                        return Err(StrataError::row_shape_mismatch(layer, reason).into());
                    }
                    if descriptor.sparse && row.layer.is_empty() {
                        report.skipped_empty += 1;
                        if !row.meta.is_empty() {
                            lost.note(format_args!("document {}: layer is empty and sparse", selected.id));
                        }
                        continue;
                    }
                    let (meta, dropped): (BTreeMap<_, _>, BTreeMap<_, _>) = row
                        .meta
                        .into_iter()
                        .partition(|(key, _)| descriptor.meta.get(key).is_some());
                    if !dropped.is_empty() {
                        lost.note(format_args!(
                            "document {}: no meta columns for {:?}",
                            selected.id,
                            dropped.keys().collect::<Vec<_>>()
                        ));
                    }
                    match row.parent_id {
                        Some(parent_id) => inserter.insert_fragment(selected.id, parent_id, &row.layer, &meta)?,
                        None => inserter.insert(selected.id, &row.layer, &meta)?,
                    }
                }
            }
            Ok(())
        })();

        if let Err(err) = result {
            let flushed = inserter.flushed_rows();
            inserter.discard();
            return Err(err.ingestion(flushed, current));
        }
        let flushed = inserter.flushed_rows();
        report.inserted = inserter
            .close()
            .map_err(|err| err.ingestion(flushed, None))?;
        lost.finish();
        report.metadata_lost = lost.count();

        info!(
            collection = %self.name(),
            layer,
            inserted = report.inserted,
            skipped_empty = report.skipped_empty,
            metadata_lost = report.metadata_lost,
            "layer populated"
        );
        Ok(report)
    }
}

fn create_column_index(conn: &Connection, table: &TableName, column: &str) -> StoreResult<()> {
    conn.execute_batch(&format!(
        "CREATE INDEX {} ON {} ({})",
        table.index(column),
        quote_ident(table.name()),
        quote_ident(column)
    ))?;
    Ok(())
}

fn tagger_template(tagger: &dyn Tagger) -> StoreResult<Layer> {
    let template = tagger.layer_template();
    if template.name() != tagger.output_layer() {
        return Err(StrataError::invalid_argument(format!(
            "tagger declares output layer '{}' but its template is named '{}'",
            tagger.output_layer(),
            template.name()
        ))
        .into());
    }
    Ok(template)
}
