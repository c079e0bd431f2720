//! Tagger contract used during bulk annotation.

use serde_json::Value;
use std::collections::BTreeMap;

use strata_common::error::StrataResult;

use crate::document::Document;
use crate::layer::Layer;

/// Produces one layer for a document from the document's input layers.
pub trait Tagger {
    /// Name of the produced layer.
    fn output_layer(&self) -> &str;

    /// Layers that must be present on the input document.
    fn input_layers(&self) -> &[String];

    /// An empty layer with the shape every produced layer has.
    fn layer_template(&self) -> Layer;

    /// Produces the layer for one document.
    fn make_layer(&self, document: &Document) -> StrataResult<Layer>;

    /// Produces the layer together with per-row metadata.
    ///
    /// The default implementation attaches no metadata.
    fn make_record(&self, document: &Document) -> StrataResult<RowMapperRecord> {
        Ok(RowMapperRecord::new(self.make_layer(document)?))
    }
}

/// A produced layer and the meta column values stored with it.
#[derive(Debug, Clone, PartialEq)]
pub struct RowMapperRecord {
    /// The produced layer.
    pub layer: Layer,
    /// Values for the layer table's meta columns.
    pub meta: BTreeMap<String, Value>,
}

impl RowMapperRecord {
    /// Creates a record without metadata.
    #[must_use]
    pub fn new(layer: Layer) -> Self {
        Self {
            layer,
            meta: BTreeMap::new(),
        }
    }

    /// Adds a meta value.
    #[must_use]
    pub fn with_meta(mut self, key: impl Into<String>, value: Value) -> Self {
        self.meta.insert(key.into(), value);
        self
    }
}

/// One piece of a fragmented layer.
#[derive(Debug, Clone, PartialEq)]
pub struct Fragment {
    /// Id of the parent layer instance the fragment belongs to.
    pub parent_id: i64,
    /// The fragment content.
    pub layer: Layer,
    /// Values for the fragment table's meta columns.
    pub meta: BTreeMap<String, Value>,
}

impl Fragment {
    /// Creates a fragment without metadata.
    #[must_use]
    pub fn new(parent_id: i64, layer: Layer) -> Self {
        Self {
            parent_id,
            layer,
            meta: BTreeMap::new(),
        }
    }
}
