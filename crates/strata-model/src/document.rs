//! Documents: a text with metadata and annotation layers.

use serde_json::Value;
use std::collections::BTreeMap;

use strata_common::error::{StrataError, StrataResult};

use crate::layer::Layer;

/// A text together with its metadata and layers.
///
/// Layers are kept in the order they were added. A layer can only be added
/// after the layers it depends on, so that order is always topological.
///
/// # Example
///
/// ```rust
/// use strata_model::{Document, Layer};
///
/// let mut doc = Document::new("Dog runs.");
/// doc.add_layer(Layer::builder("words").build().unwrap()).unwrap();
/// let morph = Layer::builder("morph").parent("words").build().unwrap();
/// doc.add_layer(morph).unwrap();
/// assert_eq!(doc.layer_names(), vec!["words", "morph"]);
/// ```
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Document {
    text: String,
    meta: BTreeMap<String, Value>,
    layers: Vec<Layer>,
}

impl Document {
    /// Creates a document without layers.
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            meta: BTreeMap::new(),
            layers: Vec::new(),
        }
    }

    /// Adds a metadata entry.
    #[must_use]
    pub fn with_meta(mut self, key: impl Into<String>, value: Value) -> Self {
        self.meta.insert(key.into(), value);
        self
    }

    /// Returns the text.
    #[must_use]
    pub fn text(&self) -> &str {
        &self.text
    }

    /// Returns the metadata.
    #[must_use]
    pub fn meta(&self) -> &BTreeMap<String, Value> {
        &self.meta
    }

    /// Returns the metadata for modification.
    pub fn meta_mut(&mut self) -> &mut BTreeMap<String, Value> {
        &mut self.meta
    }

    /// Returns the layers in insertion order.
    #[must_use]
    pub fn layers(&self) -> &[Layer] {
        &self.layers
    }

    /// Returns the layer names in insertion order.
    #[must_use]
    pub fn layer_names(&self) -> Vec<&str> {
        self.layers.iter().map(Layer::name).collect()
    }

    /// Returns a layer by name.
    #[must_use]
    pub fn layer(&self, name: &str) -> Option<&Layer> {
        self.layers.iter().find(|layer| layer.name() == name)
    }

    /// Whether the document has a layer.
    #[must_use]
    pub fn has_layer(&self, name: &str) -> bool {
        self.layer(name).is_some()
    }

    /// Adds a layer.
    ///
    /// Fails if a layer with that name exists, or if the layer's parent or
    /// enveloped layer is missing.
    pub fn add_layer(&mut self, layer: Layer) -> StrataResult<()> {
        if self.has_layer(layer.name()) {
            return Err(StrataError::invalid_argument(format!(
                "document already has layer '{}'",
                layer.name()
            )));
        }
        let missing: Vec<String> = layer
            .dependencies()
            .filter(|dependency| !self.has_layer(dependency))
            .map(str::to_string)
            .collect();
        if !missing.is_empty() {
            return Err(StrataError::DependencyConflict {
                layer: layer.name().to_string(),
                reason: "layer depends on layers missing from the document".to_string(),
                dependents: missing,
            });
        }
        self.layers.push(layer);
        Ok(())
    }

    /// Removes a layer and returns it.
    ///
    /// Fails if another layer of the document depends on it.
    pub fn remove_layer(&mut self, name: &str) -> StrataResult<Layer> {
        let dependents: Vec<String> = self
            .layers
            .iter()
            .filter(|layer| layer.dependencies().any(|d| d == name))
            .map(|layer| layer.name().to_string())
            .collect();
        if !dependents.is_empty() {
            return Err(StrataError::DependencyConflict {
                layer: name.to_string(),
                reason: "other layers of the document depend on it".to_string(),
                dependents,
            });
        }
        let position = self
            .layers
            .iter()
            .position(|layer| layer.name() == name)
            .ok_or_else(|| {
                StrataError::invalid_argument(format!("document has no layer '{name}'"))
            })?;
        Ok(self.layers.remove(position))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use strata_common::ErrorCode;

    #[test]
    fn test_missing_dependency() {
        let mut doc = Document::new("Dog runs.");
        let morph = Layer::builder("morph").parent("words").build().unwrap();
        let err = doc.add_layer(morph).unwrap_err();
        assert_eq!(err.code(), ErrorCode::DependencyConflict);
        assert!(doc.layers().is_empty());
    }

    #[test]
    fn test_duplicate_layer() {
        let mut doc = Document::new("Dog runs.");
        doc.add_layer(Layer::builder("words").build().unwrap()).unwrap();
        assert!(doc.add_layer(Layer::builder("words").build().unwrap()).is_err());
    }

    #[test]
    fn test_remove_layer() {
        let mut doc = Document::new("Dog runs.");
        doc.add_layer(Layer::builder("words").build().unwrap()).unwrap();
        doc.add_layer(Layer::builder("sentences").enveloping("words").build().unwrap())
            .unwrap();
        assert!(doc.remove_layer("words").is_err());
        doc.remove_layer("sentences").unwrap();
        doc.remove_layer("words").unwrap();
        assert!(doc.remove_layer("words").is_err());
    }
}
