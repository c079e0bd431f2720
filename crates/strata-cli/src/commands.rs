//! Subcommand implementations.
//!
//! Every command works on an open [`Storage`] and returns [`Rows`] for the
//! formatter, so commands can be tested without a terminal.

use anyhow::{anyhow, bail, Context, Result};
use serde_json::{json, Value};

use strata_common::types::{CollectionVersion, MetaSchema, MetaType};
use strata_store::{CollectionOptions, ExportMode, ExportOptions, Query, Storage};

use crate::formatter::Rows;

/// Lists collections.
pub fn collections(storage: &Storage) -> Result<Rows> {
    let mut rows = Rows::new(["name", "version", "documents", "layers", "description"]);
    for info in storage.collections()? {
        let collection = storage.collection(&info.name)?;
        rows.push(vec![
            json!(info.name),
            json!(info.version.to_string()),
            json!(collection.len()?),
            json!(collection.structure()?.layers().len()),
            info.description.map_or(Value::Null, Value::String),
        ]);
    }
    Ok(rows)
}

/// Creates a collection. `meta` entries are `name:type`.
pub fn create(
    storage: &Storage,
    name: &str,
    meta: &[String],
    version: Option<&str>,
    description: Option<&str>,
) -> Result<Rows> {
    let mut options = CollectionOptions::new().meta(parse_meta_schema(meta)?);
    if let Some(version) = version {
        options = options.version(version.parse::<CollectionVersion>()?);
    }
    if let Some(description) = description {
        options = options.description(description);
    }
    let collection = storage.create_collection(name, options)?;
    let mut rows = Rows::new(["name", "version"]);
    rows.push(vec![json!(collection.name()), json!(collection.version().to_string())]);
    Ok(rows)
}

/// Drops a collection.
pub fn drop_collection(storage: &Storage, name: &str) -> Result<Rows> {
    storage.delete_collection(name)?;
    let mut rows = Rows::new(["dropped"]);
    rows.push(vec![json!(name)]);
    Ok(rows)
}

/// Describes a collection's structure.
pub fn info(storage: &Storage, name: &str) -> Result<Rows> {
    let collection = storage.collection(name)?;
    let structure = collection.structure()?;
    let mut rows = Rows::new(["layer", "type", "attributes", "parent", "enveloping", "sparse", "meta"]);
    for descriptor in structure.layers() {
        rows.push(vec![
            json!(descriptor.name),
            json!(descriptor.layer_type.to_string()),
            json!(descriptor.attributes.join(", ")),
            descriptor.parent.clone().map_or(Value::Null, Value::String),
            descriptor.enveloping.clone().map_or(Value::Null, Value::String),
            json!(descriptor.sparse),
            json!(descriptor
                .meta
                .iter()
                .map(|(column, meta_type)| format!("{column}:{meta_type}"))
                .collect::<Vec<_>>()
                .join(", ")),
        ]);
    }
    Ok(rows)
}

/// Counts documents matching the filters.
pub fn count(storage: &Storage, name: &str, filters: &[String]) -> Result<Rows> {
    let collection = storage.collection(name)?;
    let mut selection = collection.select();
    if let Some(query) = parse_filters(filters)? {
        selection = selection.query(query);
    }
    let mut rows = Rows::new(["collection", "documents"]);
    rows.push(vec![json!(name), json!(selection.count()?)]);
    Ok(rows)
}

/// Options of the `select` command.
#[derive(Debug, Clone, Default)]
pub struct SelectArgs {
    /// Detached layers to attach.
    pub layers: Vec<String>,
    /// Document ids; all when empty.
    pub ids: Vec<i64>,
    /// `layer.attribute=value` filters.
    pub filters: Vec<String>,
    /// Maximal number of documents.
    pub limit: Option<u64>,
    /// Drop documents lacking a requested sparse layer.
    pub only_annotated: bool,
}

/// Selects documents. Each row holds the id, the text and the layer
/// contents as JSON.
pub fn select(storage: &Storage, name: &str, args: &SelectArgs) -> Result<Rows> {
    let collection = storage.collection(name)?;
    let mut selection = collection
        .select()
        .layers(args.layers.iter().cloned())
        .keep_all_documents(!args.only_annotated);
    if !args.ids.is_empty() {
        selection = selection.query(Query::keys(args.ids.iter().copied()));
    }
    if let Some(query) = parse_filters(&args.filters)? {
        selection = selection.query(query);
    }
    if let Some(limit) = args.limit {
        selection = selection.limit(limit);
    }

    let mut rows = Rows::new(["id", "text", "layers"]);
    for selected in selection.iter()? {
        let selected = selected?;
        let mut layers = serde_json::Map::new();
        for layer in selected.document.layers() {
            let annotations: Vec<Value> = layer
                .spans()
                .iter()
                .flat_map(|span| {
                    span.annotations().iter().map(move |annotation| {
                        let mut object = layer.annotation_object(annotation);
                        object.insert("start".to_string(), json!(span.start()));
                        object.insert("end".to_string(), json!(span.end()));
                        Value::Object(object)
                    })
                })
                .collect();
            layers.insert(layer.name().to_string(), Value::Array(annotations));
        }
        rows.push(vec![
            json!(selected.id.as_i64()),
            json!(selected.document.text()),
            Value::Object(layers),
        ]);
    }
    Ok(rows)
}

/// Deletes a tabled layer.
pub fn delete_layer(storage: &Storage, name: &str, layer: &str, cascade: bool) -> Result<Rows> {
    let collection = storage.collection(name)?;
    let mut rows = Rows::new(["deleted"]);
    for removed in collection.delete_layer(layer, cascade)? {
        rows.push(vec![json!(removed)]);
    }
    Ok(rows)
}

/// Options of the `export-layer` command.
#[derive(Debug, Clone, Default)]
pub struct ExportArgs {
    /// Target table.
    pub table: Option<String>,
    /// Attributes to export; all when empty.
    pub attributes: Vec<String>,
    /// Collection meta columns copied to each row.
    pub meta: Vec<String>,
    /// `layer.attribute=value` filters.
    pub filters: Vec<String>,
    /// Append to an existing table.
    pub append: bool,
}

/// Exports a layer into a flat table.
pub fn export_layer(storage: &Storage, name: &str, layer: &str, args: &ExportArgs) -> Result<Rows> {
    let collection = storage.collection(name)?;
    let options = ExportOptions {
        table: args.table.clone(),
        attributes: (!args.attributes.is_empty()).then(|| args.attributes.clone()),
        collection_meta: args.meta.clone(),
        query: parse_filters(&args.filters)?,
        mode: if args.append { ExportMode::Append } else { ExportMode::New },
    };
    let written = collection.export_layer(layer, options)?;
    let mut rows = Rows::new(["layer", "rows"]);
    rows.push(vec![json!(layer), json!(written)]);
    Ok(rows)
}

// =============================================================================
// Argument parsing
// =============================================================================

/// Parses `name:type` meta column declarations.
pub fn parse_meta_schema(entries: &[String]) -> Result<MetaSchema> {
    let mut schema = MetaSchema::new();
    for entry in entries {
        let (column, meta_type) = entry
            .split_once(':')
            .ok_or_else(|| anyhow!("meta column '{entry}' is not of the form name:type"))?;
        schema = schema.with_column(column.trim(), meta_type.trim().parse::<MetaType>()?);
    }
    Ok(schema)
}

/// Parses `layer.attribute=value` filters into a conjunction.
///
/// Values are read as JSON when they parse, as plain strings otherwise.
pub fn parse_filters(filters: &[String]) -> Result<Option<Query>> {
    let mut query: Option<Query> = None;
    for filter in filters {
        let (target, value) = filter
            .split_once('=')
            .ok_or_else(|| anyhow!("filter '{filter}' is not of the form layer.attribute=value"))?;
        let (layer, attribute) = target
            .split_once('.')
            .ok_or_else(|| anyhow!("filter target '{target}' is not of the form layer.attribute"))?;
        if layer.is_empty() || attribute.is_empty() {
            bail!("filter '{filter}' names no layer or attribute");
        }
        let value = serde_json::from_str(value).unwrap_or_else(|_| Value::String(value.to_string()));
        let part = Query::layer_attribute(layer, [(attribute, value)]);
        query = Some(match query {
            Some(existing) => existing & part,
            None => part,
        });
    }
    Ok(query)
}

/// Parses a comma-separated id list.
pub fn parse_ids(list: &str) -> Result<Vec<i64>> {
    list.split(',')
        .filter(|s| !s.trim().is_empty())
        .map(|s| {
            s.trim()
                .parse::<i64>()
                .with_context(|| format!("invalid document id '{s}'"))
        })
        .collect()
}
