//! Layer table rows: detached layers and fragments.

use std::collections::BTreeMap;

use rusqlite::types::Value as SqlValue;
use rusqlite::Connection;
use serde_json::Value;

use strata_common::config::InsertConfig;
use strata_common::constants::NGRAM_COLUMN_SUFFIX;
use strata_common::error::StrataError;
use strata_common::types::{DocumentId, LayerType, MetaSchema};
use strata_model::{ngram_fingerprint, CodecRegistry, Layer};

use crate::error::StoreResult;
use crate::inserter::BufferedInsert;
use crate::sql::{meta_to_sql, TableName};
use crate::structure::LayerDescriptor;

/// Buffers rows of one layer table.
///
/// Detached layer rows use the document id as their own id, so a second
/// row for the same document fails with a duplicate key. Fragment rows get
/// ids assigned by the database.
#[derive(Debug)]
pub struct LayerInserter<'c> {
    buffer: BufferedInsert<'c>,
    layer_type: LayerType,
    meta: MetaSchema,
    ngram_index: Vec<(String, usize)>,
}

impl<'c> LayerInserter<'c> {
    /// Creates an inserter for the table of `descriptor`.
    pub fn new(
        conn: &'c Connection,
        table: TableName,
        descriptor: &LayerDescriptor,
        ngram_index: &[(String, usize)],
        config: &InsertConfig,
    ) -> Self {
        let mut columns = match descriptor.layer_type {
            LayerType::Fragmented => vec!["text_id".to_string(), "parent_id".to_string()],
            LayerType::Attached | LayerType::Detached => vec!["id".to_string(), "text_id".to_string()],
        };
        columns.push("data".to_string());
        columns.extend(descriptor.meta.names().map(str::to_string));
        columns.extend(ngram_index.iter().map(|(attr, _)| ngram_column(attr)));
        Self {
            buffer: BufferedInsert::new(conn, table, columns, config),
            layer_type: descriptor.layer_type,
            meta: descriptor.meta.clone(),
            ngram_index: ngram_index.to_vec(),
        }
    }

    /// Rows committed so far.
    pub fn flushed_rows(&self) -> usize {
        self.buffer.flushed_rows()
    }

    /// Queues a detached layer row for a document.
    pub fn insert(&mut self, text_id: DocumentId, layer: &Layer, meta: &BTreeMap<String, Value>) -> StoreResult<()> {
        let mut row = vec![SqlValue::Integer(text_id.as_i64()), SqlValue::Integer(text_id.as_i64())];
        self.extend_row(&mut row, layer, meta)?;
        self.buffer.insert(row)
    }

    /// Queues a fragment row.
    pub fn insert_fragment(
        &mut self,
        text_id: DocumentId,
        parent_id: i64,
        layer: &Layer,
        meta: &BTreeMap<String, Value>,
    ) -> StoreResult<()> {
        debug_assert_eq!(self.layer_type, LayerType::Fragmented);
        let mut row = vec![SqlValue::Integer(text_id.as_i64()), SqlValue::Integer(parent_id)];
        self.extend_row(&mut row, layer, meta)?;
        self.buffer.insert(row)
    }

    fn extend_row(&self, row: &mut Vec<SqlValue>, layer: &Layer, meta: &BTreeMap<String, Value>) -> StoreResult<()> {
        if let Some(unknown) = meta.keys().find(|k| self.meta.get(k).is_none()) {
            return Err(StrataError::invalid_argument(format!(
                "layer '{}' has no meta column '{unknown}'",
                layer.name()
            ))
            .into());
        }
        row.push(SqlValue::Text(CodecRegistry::global().encode_layer(layer)?));
        for (column, meta_type) in self.meta.iter() {
            row.push(meta_to_sql(column, meta_type, meta.get(column).unwrap_or(&Value::Null))?);
        }
        for (attribute, n) in &self.ngram_index {
            let grams = ngram_fingerprint(layer, attribute, *n)?;
            row.push(SqlValue::Text(serde_json::to_string(&grams)?));
        }
        Ok(())
    }

    /// Flushes pending rows and returns the number of rows committed in total.
    pub fn close(self) -> StoreResult<usize> {
        self.buffer.close()
    }

    /// Drops pending rows.
    pub fn discard(self) -> usize {
        self.buffer.discard()
    }
}

/// Name of the n-gram column of an attribute.
pub(crate) fn ngram_column(attribute: &str) -> String {
    format!("{attribute}{NGRAM_COLUMN_SUFFIX}")
}
