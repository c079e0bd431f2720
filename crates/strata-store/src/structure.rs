//! Collection structure registry.
//!
//! Each collection keeps one descriptor row per layer in its structure
//! table. The registry is the authority: a [`CollectionStructure`] is a
//! snapshot of it, read fresh whenever a decision depends on it and
//! re-read under the write lock before any structure change.
//!
//! Descriptors are kept in insertion order. Dependencies must be
//! registered before their dependents, so insertion order is also a
//! topological order.

use std::collections::{BTreeSet, HashSet};

use rusqlite::{params, Connection, Row};

use strata_common::error::StrataError;
use strata_common::types::{CollectionVersion, LayerType, MetaSchema};
use strata_model::Layer;

use crate::error::StoreResult;
use crate::sql::{Schema, TableName};

// =============================================================================
// Layer Descriptor
// =============================================================================

/// Registry entry describing one layer.
#[derive(Debug, Clone, PartialEq)]
pub struct LayerDescriptor {
    /// Layer name.
    pub name: String,
    /// Where the layer's rows are stored.
    pub layer_type: LayerType,
    /// Declared attribute names.
    pub attributes: Vec<String>,
    /// Whether spans may carry several annotations.
    pub ambiguous: bool,
    /// Parent layer, if any.
    pub parent: Option<String>,
    /// Enveloped layer, if any.
    pub enveloping: Option<String>,
    /// Meta columns of the layer table.
    pub meta: MetaSchema,
    /// Codec tag of the layer's encoding.
    pub serialisation_module: Option<String>,
    /// Whether documents may lack a row for this layer.
    pub sparse: bool,
    /// Span names of a relation layer.
    pub span_names: Option<Vec<String>>,
}

impl LayerDescriptor {
    /// Describes a layer's shape.
    pub fn from_layer(layer: &Layer, layer_type: LayerType, sparse: bool, meta: MetaSchema) -> Self {
        Self {
            name: layer.name().to_string(),
            layer_type,
            attributes: layer.attributes().names().to_vec(),
            ambiguous: layer.ambiguous(),
            parent: layer.parent().map(str::to_string),
            enveloping: layer.enveloping().map(str::to_string),
            meta,
            serialisation_module: layer.serialisation_module().map(str::to_string),
            sparse,
            span_names: layer.span_names().map(<[String]>::to_vec),
        }
    }

    /// Builds an empty layer with the described shape.
    pub fn template(&self) -> StoreResult<Layer> {
        let mut builder = Layer::builder(&self.name)
            .attributes(self.attributes.iter().cloned())
            .ambiguous(self.ambiguous);
        if let Some(parent) = &self.parent {
            builder = builder.parent(parent);
        }
        if let Some(enveloping) = &self.enveloping {
            builder = builder.enveloping(enveloping);
        }
        if let Some(module) = &self.serialisation_module {
            builder = builder.serialisation_module(module);
        }
        if let Some(names) = &self.span_names {
            builder = builder.span_names(names.iter().cloned());
        }
        Ok(builder.build()?)
    }

    /// Describes how `layer`'s shape differs from this descriptor, if it does.
    pub fn shape_difference(&self, layer: &Layer) -> StoreResult<Option<String>> {
        Ok(self.template()?.shape_difference(&layer.template()))
    }

    /// Dependencies of this layer.
    pub fn dependencies(&self) -> impl Iterator<Item = &str> {
        self.parent.iter().chain(self.enveloping.iter()).map(String::as_str)
    }

    fn from_row(row: &Row<'_>, version: CollectionVersion) -> rusqlite::Result<RawDescriptor> {
        Ok(RawDescriptor {
            name: row.get(0)?,
            layer_type: row.get(1)?,
            attributes: row.get(2)?,
            ambiguous: row.get(3)?,
            parent: row.get(4)?,
            enveloping: row.get(5)?,
            meta: row.get(6)?,
            serialisation_module: if version.supports_serialisation_tags() {
                row.get(7)?
            } else {
                None
            },
            sparse: if version.supports_sparse_layers() {
                row.get(8)?
            } else {
                false
            },
            span_names: if version.supports_relation_layers() {
                row.get(9)?
            } else {
                None
            },
        })
    }
}

struct RawDescriptor {
    name: String,
    layer_type: String,
    attributes: String,
    ambiguous: bool,
    parent: Option<String>,
    enveloping: Option<String>,
    meta: String,
    serialisation_module: Option<String>,
    sparse: bool,
    span_names: Option<String>,
}

impl RawDescriptor {
    fn decode(self) -> StoreResult<LayerDescriptor> {
        Ok(LayerDescriptor {
            layer_type: self.layer_type.parse()?,
            attributes: serde_json::from_str(&self.attributes)?,
            ambiguous: self.ambiguous,
            parent: self.parent,
            enveloping: self.enveloping,
            meta: serde_json::from_str(&self.meta)?,
            serialisation_module: self.serialisation_module,
            sparse: self.sparse,
            span_names: self
                .span_names
                .as_deref()
                .map(serde_json::from_str)
                .transpose()?,
            name: self.name,
        })
    }
}

// =============================================================================
// Structure Snapshot
// =============================================================================

/// Lifecycle state of a collection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CollectionState {
    /// No documents; the attached layer set is not yet fixed.
    Empty,
    /// Documents present; the attached layer set is frozen.
    AttachedFrozen,
    /// At least one tabled layer exists; documents can no longer be inserted.
    DetachedPresent,
}

/// A point-in-time view of a collection's registered layers.
#[derive(Debug, Clone, PartialEq)]
pub struct CollectionStructure {
    collection: String,
    version: CollectionVersion,
    layers: Vec<LayerDescriptor>,
}

impl CollectionStructure {
    /// Creates a snapshot from descriptors in insertion order.
    pub fn new(collection: impl Into<String>, version: CollectionVersion, layers: Vec<LayerDescriptor>) -> Self {
        Self {
            collection: collection.into(),
            version,
            layers,
        }
    }

    /// Collection name.
    pub fn collection(&self) -> &str {
        &self.collection
    }

    /// Collection version.
    pub fn version(&self) -> CollectionVersion {
        self.version
    }

    /// Descriptors in insertion order.
    pub fn layers(&self) -> &[LayerDescriptor] {
        &self.layers
    }

    /// Layer names in insertion order.
    pub fn names(&self) -> Vec<&str> {
        self.layers.iter().map(|d| d.name.as_str()).collect()
    }

    /// Looks up a descriptor.
    pub fn get(&self, name: &str) -> Option<&LayerDescriptor> {
        self.layers.iter().find(|d| d.name == name)
    }

    /// Whether a layer is registered.
    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// Whether no layers are registered.
    pub fn is_empty(&self) -> bool {
        self.layers.is_empty()
    }

    /// Attached layer descriptors.
    pub fn attached(&self) -> impl Iterator<Item = &LayerDescriptor> {
        self.layers
            .iter()
            .filter(|d| d.layer_type == LayerType::Attached)
    }

    /// Whether any detached or fragmented layer exists.
    pub fn has_tabled_layers(&self) -> bool {
        self.layers.iter().any(|d| d.layer_type.is_tabled())
    }

    /// Lifecycle state given whether the collection holds documents.
    pub fn state(&self, has_documents: bool) -> CollectionState {
        if self.has_tabled_layers() {
            CollectionState::DetachedPresent
        } else if has_documents {
            CollectionState::AttachedFrozen
        } else {
            CollectionState::Empty
        }
    }

    /// Looks up a descriptor, failing with a structure conflict when absent.
    pub fn require(&self, name: &str) -> StoreResult<&LayerDescriptor> {
        self.get(name).ok_or_else(|| {
            StrataError::structure_conflict(&self.collection, name, "layer does not exist").into()
        })
    }

    /// All layers the given layers transitively depend on, plus the layers
    /// themselves, in topological order.
    pub fn dependent_layers<S: AsRef<str>>(&self, requested: &[S]) -> StoreResult<Vec<String>> {
        let mut needed: HashSet<&str> = HashSet::new();
        let mut stack: Vec<&str> = Vec::new();
        for name in requested {
            stack.push(self.require(name.as_ref())?.name.as_str());
        }
        while let Some(name) = stack.pop() {
            if !needed.insert(name) {
                continue;
            }
            let descriptor = self.require(name)?;
            for dependency in descriptor.dependencies() {
                let Some(found) = self.get(dependency) else {
                    return Err(StrataError::DependencyConflict {
                        layer: name.to_string(),
                        reason: format!("ancestor layer '{dependency}' is not registered"),
                        dependents: vec![name.to_string()],
                    }
                    .into());
                };
                stack.push(found.name.as_str());
            }
        }
        Ok(self
            .layers
            .iter()
            .filter(|d| needed.contains(d.name.as_str()))
            .map(|d| d.name.clone())
            .collect())
    }

    /// Layers that transitively depend on `name`, in insertion order.
    pub fn dependents(&self, name: &str) -> Vec<String> {
        let mut affected: BTreeSet<&str> = BTreeSet::new();
        affected.insert(name);
        let mut result = Vec::new();
        for descriptor in &self.layers {
            if descriptor.name == name {
                continue;
            }
            if descriptor.dependencies().any(|d| affected.contains(d)) {
                affected.insert(descriptor.name.as_str());
                result.push(descriptor.name.clone());
            }
        }
        result
    }

    /// Checks that a descriptor may be registered in this snapshot.
    pub fn check_insertable(&self, descriptor: &LayerDescriptor) -> StoreResult<()> {
        let conflict = |reason: &str| -> StoreResult<()> {
            Err(StrataError::structure_conflict(&self.collection, &descriptor.name, reason).into())
        };
        if self.contains(&descriptor.name) {
            return conflict("layer already exists");
        }
        for dependency in descriptor.dependencies() {
            if !self.contains(dependency) {
                return Err(StrataError::DependencyConflict {
                    layer: descriptor.name.clone(),
                    reason: format!("layer '{dependency}' it depends on is not registered"),
                    dependents: vec![descriptor.name.clone()],
                }
                .into());
            }
        }
        if descriptor.layer_type == LayerType::Fragmented {
            self.require_feature("fragmented layers", CollectionVersion::V1, self.version.supports_fragmented_layers())?;
        }
        if descriptor.serialisation_module.is_some() {
            self.require_feature("serialisation tags", CollectionVersion::V2, self.version.supports_serialisation_tags())?;
        }
        if descriptor.sparse {
            self.require_feature("sparse layers", CollectionVersion::V3, self.version.supports_sparse_layers())?;
        }
        if descriptor.span_names.is_some() {
            self.require_feature("relation layers", CollectionVersion::V4, self.version.supports_relation_layers())?;
        }
        descriptor.meta.validate()?;
        Ok(())
    }

    /// Fails unless the collection's version supports a feature.
    pub fn require_feature(&self, feature: &str, required: CollectionVersion, supported: bool) -> StoreResult<()> {
        if supported {
            return Ok(());
        }
        Err(StrataError::SchemaVersionUnsupported {
            collection: self.collection.clone(),
            feature: feature.to_string(),
            required,
            actual: self.version,
        }
        .into())
    }
}

// =============================================================================
// Structure Registry
// =============================================================================

/// Reads and writes a collection's structure table.
#[derive(Debug, Clone)]
pub struct StructureRegistry {
    collection: String,
    version: CollectionVersion,
    table: TableName,
}

impl StructureRegistry {
    /// Registry of a collection.
    pub fn new(collection: impl Into<String>, schema: Schema, version: CollectionVersion) -> Self {
        let collection = collection.into();
        let table = TableName::structure(schema, &collection);
        Self {
            collection,
            version,
            table,
        }
    }

    /// The structure table.
    pub fn table(&self) -> &TableName {
        &self.table
    }

    /// Creates the structure table with the columns of the collection's version.
    pub fn create_table(&self, conn: &Connection) -> StoreResult<()> {
        let mut columns = vec![
            "layer_name TEXT PRIMARY KEY",
            "layer_type TEXT NOT NULL",
            "attributes TEXT NOT NULL",
            "ambiguous INTEGER NOT NULL",
            "parent TEXT",
            "enveloping TEXT",
            "meta TEXT NOT NULL",
        ];
        if self.version.supports_serialisation_tags() {
            columns.push("serialisation_module TEXT");
        }
        if self.version.supports_sparse_layers() {
            columns.push("sparse INTEGER NOT NULL DEFAULT 0");
        }
        if self.version.supports_relation_layers() {
            columns.push("span_names TEXT");
        }
        conn.execute_batch(&format!("CREATE TABLE {} ({})", self.table, columns.join(", ")))?;
        Ok(())
    }

    /// Reads a fresh snapshot.
    pub fn load(&self, conn: &Connection) -> StoreResult<CollectionStructure> {
        let mut select = vec![
            "layer_name",
            "layer_type",
            "attributes",
            "ambiguous",
            "parent",
            "enveloping",
            "meta",
        ];
        select.push(if self.version.supports_serialisation_tags() { "serialisation_module" } else { "NULL" });
        select.push(if self.version.supports_sparse_layers() { "sparse" } else { "0" });
        select.push(if self.version.supports_relation_layers() { "span_names" } else { "NULL" });

        let sql = format!("SELECT {} FROM {} ORDER BY rowid", select.join(", "), self.table);
        let mut stmt = conn.prepare(&sql)?;
        let raw = stmt
            .query_map([], |row| LayerDescriptor::from_row(row, self.version))?
            .collect::<Result<Vec<_>, _>>()?;
        let layers = raw
            .into_iter()
            .map(RawDescriptor::decode)
            .collect::<StoreResult<Vec<_>>>()?;
        Ok(CollectionStructure::new(&self.collection, self.version, layers))
    }

    /// Writes a descriptor row. Callers validate against a fresh snapshot first.
    pub fn insert(&self, conn: &Connection, descriptor: &LayerDescriptor) -> StoreResult<()> {
        let attributes = serde_json::to_string(&descriptor.attributes)?;
        let meta = serde_json::to_string(&descriptor.meta)?;
        let span_names = descriptor
            .span_names
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;

        let mut columns = vec![
            "layer_name",
            "layer_type",
            "attributes",
            "ambiguous",
            "parent",
            "enveloping",
            "meta",
        ];
        let mut values: Vec<rusqlite::types::Value> = vec![
            descriptor.name.clone().into(),
            descriptor.layer_type.as_str().to_string().into(),
            attributes.into(),
            descriptor.ambiguous.into(),
            descriptor.parent.clone().into(),
            descriptor.enveloping.clone().into(),
            meta.into(),
        ];
        if self.version.supports_serialisation_tags() {
            columns.push("serialisation_module");
            values.push(descriptor.serialisation_module.clone().into());
        }
        if self.version.supports_sparse_layers() {
            columns.push("sparse");
            values.push(descriptor.sparse.into());
        }
        if self.version.supports_relation_layers() {
            columns.push("span_names");
            values.push(span_names.into());
        }
        let sql = format!(
            "INSERT INTO {} ({}) VALUES ({})",
            self.table,
            columns.join(", "),
            crate::sql::placeholders(columns.len())
        );
        conn.execute(&sql, rusqlite::params_from_iter(values))?;
        Ok(())
    }

    /// Removes a descriptor row.
    pub fn delete(&self, conn: &Connection, name: &str) -> StoreResult<bool> {
        let sql = format!("DELETE FROM {} WHERE layer_name = ?1", self.table);
        Ok(conn.execute(&sql, params![name])? > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use strata_common::error::ErrorCode;
    use strata_common::types::MetaType;

    fn descriptor(layer: Layer, layer_type: LayerType) -> LayerDescriptor {
        LayerDescriptor::from_layer(&layer, layer_type, false, MetaSchema::new())
    }

    fn sample() -> CollectionStructure {
        let words = Layer::builder("words").build().unwrap();
        let sentences = Layer::builder("sentences").enveloping("words").build().unwrap();
        let morph = Layer::builder("morph")
            .attributes(["lemma"])
            .parent("words")
            .build()
            .unwrap();
        let syntax = Layer::builder("syntax")
            .attributes(["head"])
            .parent("morph")
            .build()
            .unwrap();
        CollectionStructure::new(
            "corpus",
            CollectionVersion::V4,
            vec![
                descriptor(words, LayerType::Attached),
                descriptor(sentences, LayerType::Attached),
                descriptor(morph, LayerType::Detached),
                descriptor(syntax, LayerType::Detached),
            ],
        )
    }

    #[test]
    fn test_dependent_layers_topological() {
        let structure = sample();
        assert_eq!(
            structure.dependent_layers(&["syntax"]).unwrap(),
            vec!["words", "morph", "syntax"]
        );
        assert_eq!(structure.dependent_layers(&["sentences"]).unwrap(), vec!["words", "sentences"]);
        let err = structure.dependent_layers(&["missing"]).unwrap_err();
        assert_eq!(err.code(), ErrorCode::StructureConflict);
    }

    #[test]
    fn test_dependents() {
        let structure = sample();
        assert_eq!(structure.dependents("morph"), vec!["syntax"]);
        assert_eq!(structure.dependents("words"), vec!["sentences", "morph", "syntax"]);
        assert!(structure.dependents("syntax").is_empty());
    }

    #[test]
    fn test_state() {
        let structure = sample();
        assert_eq!(structure.state(true), CollectionState::DetachedPresent);
        let empty = CollectionStructure::new("corpus", CollectionVersion::V4, Vec::new());
        assert_eq!(empty.state(false), CollectionState::Empty);
        assert_eq!(empty.state(true), CollectionState::AttachedFrozen);
    }

    #[test]
    fn test_check_insertable_versions() {
        let layer = Layer::builder("fragments").build().unwrap();
        let old = CollectionStructure::new("old", CollectionVersion::V0, Vec::new());
        let err = old
            .check_insertable(&descriptor(layer.clone(), LayerType::Fragmented))
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::SchemaVersionUnsupported);

        let mut sparse = descriptor(layer, LayerType::Detached);
        sparse.sparse = true;
        let v2 = CollectionStructure::new("v2", CollectionVersion::V2, Vec::new());
        assert_eq!(
            v2.check_insertable(&sparse).unwrap_err().code(),
            ErrorCode::SchemaVersionUnsupported
        );
    }

    #[test]
    fn test_check_insertable_dependencies() {
        let structure = sample();
        let orphan = Layer::builder("chunks").parent("phrases").build().unwrap();
        let err = structure
            .check_insertable(&descriptor(orphan, LayerType::Detached))
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::DependencyConflict);

        let duplicate = Layer::builder("morph").build().unwrap();
        let err = structure
            .check_insertable(&descriptor(duplicate, LayerType::Detached))
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::StructureConflict);
    }

    #[test]
    fn test_registry_round_trip() {
        for version in CollectionVersion::ALL {
            let conn = Connection::open_in_memory().unwrap();
            let registry = StructureRegistry::new("corpus", Schema::Main, version);
            registry.create_table(&conn).unwrap();

            let words = Layer::builder("words").attributes(["normal"]).build().unwrap();
            let morph = Layer::builder("morph")
                .attributes(["lemma", "pos"])
                .ambiguous(true)
                .parent("words")
                .build()
                .unwrap();
            let meta = MetaSchema::new().with_column("score", MetaType::Float);
            let first = descriptor(words, LayerType::Attached);
            let second = LayerDescriptor::from_layer(&morph, LayerType::Detached, false, meta);
            registry.insert(&conn, &first).unwrap();
            registry.insert(&conn, &second).unwrap();

            let loaded = registry.load(&conn).unwrap();
            assert_eq!(loaded.layers(), &[first.clone(), second.clone()]);
            assert!(registry.delete(&conn, "morph").unwrap());
            assert!(!registry.delete(&conn, "morph").unwrap());
            assert_eq!(registry.load(&conn).unwrap().names(), vec!["words"]);
        }
    }

    #[test]
    fn test_shape_difference() {
        let morph = Layer::builder("morph").attributes(["lemma"]).build().unwrap();
        let described = descriptor(morph.clone(), LayerType::Detached);
        assert!(described.shape_difference(&morph).unwrap().is_none());
        let other = Layer::builder("morph").attributes(["pos"]).build().unwrap();
        assert!(described.shape_difference(&other).unwrap().is_some());
    }
}
