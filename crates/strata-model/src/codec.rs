//! JSON encoding of documents and layers.
//!
//! Layers are encoded by a [`LayerCodec`] chosen by the layer's
//! serialisation tag. Untagged layers use [`DictCodec`], which writes each
//! annotation as an object keyed by attribute name in declared order.
//! [`CompactCodec`] (tag `compact`) writes annotations as value arrays.
//!
//! Encoding is deterministic: document metadata is sorted by key and
//! annotation objects follow the declared attribute order, so
//! encode, decode, encode yields identical bytes.

use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, OnceLock};

use strata_common::error::{StrataError, StrataResult};

use crate::document::Document;
use crate::layer::{Layer, LayerBuilder};
use crate::span::{Annotation, BaseSpan, Span, SpanBase};

/// Tag of the compact codec.
pub const COMPACT_TAG: &str = "compact";

/// Encodes and decodes one layer representation.
pub trait LayerCodec: Send + Sync {
    /// Encodes a layer.
    fn encode(&self, layer: &Layer) -> StrataResult<Value>;

    /// Decodes a layer.
    fn decode(&self, value: &Value) -> StrataResult<Layer>;
}

// =============================================================================
// Codecs
// =============================================================================

/// Default codec: annotations as `{attribute: value}` objects.
#[derive(Debug, Default, Clone, Copy)]
pub struct DictCodec;

impl LayerCodec for DictCodec {
    fn encode(&self, layer: &Layer) -> StrataResult<Value> {
        encode_with(layer, |annotation| {
            Value::Object(layer.annotation_object(annotation))
        })
    }

    fn decode(&self, value: &Value) -> StrataResult<Layer> {
        decode_with(value, |layer, raw| {
            let object = raw
                .as_object()
                .ok_or_else(|| StrataError::codec("annotation must be an object"))?;
            if let Some(unknown) = object
                .keys()
                .find(|key| layer.attributes().position(key).is_none())
            {
                return Err(StrataError::codec(format!(
                    "annotation attribute '{unknown}' is not declared by layer '{}'",
                    layer.name()
                )));
            }
            let values = layer
                .attributes()
                .names()
                .iter()
                .map(|name| object.get(name).cloned().unwrap_or(Value::Null))
                .collect();
            Ok(Annotation::from_values(values))
        })
    }
}

/// Compact codec: annotations as value arrays in declared attribute order.
#[derive(Debug, Default, Clone, Copy)]
pub struct CompactCodec;

impl LayerCodec for CompactCodec {
    fn encode(&self, layer: &Layer) -> StrataResult<Value> {
        encode_with(layer, |annotation| Value::Array(annotation.values().to_vec()))
    }

    fn decode(&self, value: &Value) -> StrataResult<Layer> {
        decode_with(value, |layer, raw| {
            let values = raw
                .as_array()
                .ok_or_else(|| StrataError::codec("compact annotation must be an array"))?;
            if values.len() != layer.attributes().len() {
                return Err(StrataError::codec(format!(
                    "compact annotation has {} values, layer '{}' declares {} attributes",
                    values.len(),
                    layer.name(),
                    layer.attributes().len()
                )));
            }
            Ok(Annotation::from_values(values.clone()))
        })
    }
}

// =============================================================================
// Registry
// =============================================================================

/// Maps serialisation tags to codecs.
#[derive(Clone)]
pub struct CodecRegistry {
    default: Arc<dyn LayerCodec>,
    tagged: HashMap<String, Arc<dyn LayerCodec>>,
}

impl Default for CodecRegistry {
    fn default() -> Self {
        let mut registry = Self {
            default: Arc::new(DictCodec),
            tagged: HashMap::new(),
        };
        registry.register(COMPACT_TAG, CompactCodec);
        registry
    }
}

impl std::fmt::Debug for CodecRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut tags: Vec<&String> = self.tagged.keys().collect();
        tags.sort();
        f.debug_struct("CodecRegistry").field("tags", &tags).finish()
    }
}

impl CodecRegistry {
    /// Returns the process-wide registry with the built-in codecs.
    pub fn global() -> &'static CodecRegistry {
        static REGISTRY: OnceLock<CodecRegistry> = OnceLock::new();
        REGISTRY.get_or_init(CodecRegistry::default)
    }

    /// Registers a codec under a tag, replacing any previous one.
    pub fn register(&mut self, tag: impl Into<String>, codec: impl LayerCodec + 'static) {
        self.tagged.insert(tag.into(), Arc::new(codec));
    }

    /// Whether a tag is known.
    #[must_use]
    pub fn contains(&self, tag: &str) -> bool {
        self.tagged.contains_key(tag)
    }

    fn codec(&self, tag: Option<&str>) -> StrataResult<&dyn LayerCodec> {
        match tag {
            None => Ok(self.default.as_ref()),
            Some(tag) => self
                .tagged
                .get(tag)
                .map(|codec| codec.as_ref())
                .ok_or_else(|| StrataError::codec(format!("unknown serialisation module '{tag}'"))),
        }
    }

    /// Encodes a layer to a JSON value.
    pub fn layer_to_value(&self, layer: &Layer) -> StrataResult<Value> {
        self.codec(layer.serialisation_module())?.encode(layer)
    }

    /// Decodes a layer from a JSON value.
    pub fn layer_from_value(&self, value: &Value) -> StrataResult<Layer> {
        let tag = match value.get("serialisation_module") {
            None | Some(Value::Null) => None,
            Some(Value::String(tag)) => Some(tag.as_str()),
            Some(other) => {
                return Err(StrataError::codec(format!(
                    "serialisation_module must be a string, got {other}"
                )))
            }
        };
        self.codec(tag)?.decode(value)
    }

    /// Encodes a layer to JSON text.
    pub fn encode_layer(&self, layer: &Layer) -> StrataResult<String> {
        Ok(serde_json::to_string(&self.layer_to_value(layer)?)?)
    }

    /// Decodes a layer from JSON text.
    pub fn decode_layer(&self, text: &str) -> StrataResult<Layer> {
        self.layer_from_value(&serde_json::from_str(text)?)
    }

    /// Encodes a document to a JSON value.
    pub fn document_to_value(&self, document: &Document) -> StrataResult<Value> {
        let mut object = Map::new();
        object.insert("text".into(), Value::String(document.text().to_string()));
        object.insert("meta".into(), meta_to_value(document.meta()));
        let layers = document
            .layers()
            .iter()
            .map(|layer| self.layer_to_value(layer))
            .collect::<StrataResult<Vec<_>>>()?;
        object.insert("layers".into(), Value::Array(layers));
        Ok(Value::Object(object))
    }

    /// Decodes a document from a JSON value.
    pub fn document_from_value(&self, value: &Value) -> StrataResult<Document> {
        let object = value
            .as_object()
            .ok_or_else(|| StrataError::codec("document must be an object"))?;
        let text = object
            .get("text")
            .and_then(Value::as_str)
            .ok_or_else(|| StrataError::codec("document text must be a string"))?;
        let mut document = Document::new(text);
        *document.meta_mut() = meta_from_value(object.get("meta"))?;
        if let Some(layers) = object.get("layers") {
            let layers = layers
                .as_array()
                .ok_or_else(|| StrataError::codec("document layers must be an array"))?;
            for layer in layers {
                document.add_layer(self.layer_from_value(layer)?)?;
            }
        }
        Ok(document)
    }

    /// Encodes a document to JSON text.
    pub fn encode_document(&self, document: &Document) -> StrataResult<String> {
        Ok(serde_json::to_string(&self.document_to_value(document)?)?)
    }

    /// Decodes a document from JSON text.
    pub fn decode_document(&self, text: &str) -> StrataResult<Document> {
        self.document_from_value(&serde_json::from_str(text)?)
    }
}

/// Encodes a document with the built-in codecs.
pub fn encode_document(document: &Document) -> StrataResult<String> {
    CodecRegistry::global().encode_document(document)
}

/// Decodes a document with the built-in codecs.
pub fn decode_document(text: &str) -> StrataResult<Document> {
    CodecRegistry::global().decode_document(text)
}

/// Encodes a layer with the built-in codecs.
pub fn encode_layer(layer: &Layer) -> StrataResult<String> {
    CodecRegistry::global().encode_layer(layer)
}

/// Decodes a layer with the built-in codecs.
pub fn decode_layer(text: &str) -> StrataResult<Layer> {
    CodecRegistry::global().decode_layer(text)
}

// =============================================================================
// Shared encoding
// =============================================================================

fn encode_with(layer: &Layer, annotation: impl Fn(&Annotation) -> Value) -> StrataResult<Value> {
    let mut object = Map::new();
    object.insert("name".into(), Value::String(layer.name().to_string()));
    object.insert(
        "attributes".into(),
        Value::Array(
            layer
                .attributes()
                .names()
                .iter()
                .map(|a| Value::String(a.clone()))
                .collect(),
        ),
    );
    object.insert("ambiguous".into(), Value::Bool(layer.ambiguous()));
    object.insert("parent".into(), optional_string(layer.parent()));
    object.insert("enveloping".into(), optional_string(layer.enveloping()));
    object.insert(
        "serialisation_module".into(),
        optional_string(layer.serialisation_module()),
    );
    if let Some(span_names) = layer.span_names() {
        object.insert(
            "span_names".into(),
            Value::Array(span_names.iter().map(|n| Value::String(n.clone())).collect()),
        );
    }
    object.insert("meta".into(), meta_to_value(layer.meta()));
    let spans = layer
        .spans()
        .iter()
        .map(|span| {
            let mut encoded = Map::new();
            encoded.insert("base_span".into(), span_base_to_value(span.base()));
            encoded.insert(
                "annotations".into(),
                Value::Array(span.annotations().iter().map(&annotation).collect()),
            );
            Value::Object(encoded)
        })
        .collect();
    object.insert("spans".into(), Value::Array(spans));
    Ok(Value::Object(object))
}

fn decode_with(
    value: &Value,
    annotation: impl Fn(&Layer, &Value) -> StrataResult<Annotation>,
) -> StrataResult<Layer> {
    let object = value
        .as_object()
        .ok_or_else(|| StrataError::codec("layer must be an object"))?;
    let name = required_str(object, "name")?;
    let mut builder = LayerBuilder::new(name)
        .attributes(string_list(object.get("attributes"), "attributes")?)
        .ambiguous(object.get("ambiguous").and_then(Value::as_bool).unwrap_or(false));
    if let Some(parent) = optional_str(object, "parent")? {
        builder = builder.parent(parent);
    }
    if let Some(enveloping) = optional_str(object, "enveloping")? {
        builder = builder.enveloping(enveloping);
    }
    if let Some(module) = optional_str(object, "serialisation_module")? {
        builder = builder.serialisation_module(module);
    }
    if let Some(names) = object.get("span_names").filter(|v| !v.is_null()) {
        builder = builder.span_names(string_list(Some(names), "span_names")?);
    }
    for (key, value) in meta_from_value(object.get("meta"))? {
        builder = builder.meta(key, value);
    }
    let mut layer = builder.build()?;

    let spans = object
        .get("spans")
        .and_then(Value::as_array)
        .ok_or_else(|| StrataError::codec(format!("layer '{name}' has no span list")))?;
    for raw in spans {
        let base = raw
            .get("base_span")
            .ok_or_else(|| StrataError::codec("span has no base_span"))?;
        let base = span_base_from_value(base, layer.span_names())?;
        let mut span = Span::new(base);
        let annotations = raw
            .get("annotations")
            .and_then(Value::as_array)
            .ok_or_else(|| StrataError::codec("span has no annotation list"))?;
        for encoded in annotations {
            span.push(annotation(&layer, encoded)?);
        }
        layer.push_span(span);
    }
    Ok(layer)
}

fn span_base_to_value(base: &SpanBase) -> Value {
    match base {
        SpanBase::Single(base) => base_span_to_value(base),
        SpanBase::Named(named) => Value::Object(
            named
                .iter()
                .map(|(name, base)| (name.clone(), base_span_to_value(base)))
                .collect(),
        ),
    }
}

fn base_span_to_value(base: &BaseSpan) -> Value {
    match base {
        BaseSpan::Elementary { start, end } => Value::Array(vec![(*start).into(), (*end).into()]),
        BaseSpan::Enveloping(spans) => Value::Array(spans.iter().map(base_span_to_value).collect()),
    }
}

fn span_base_from_value(value: &Value, span_names: Option<&[String]>) -> StrataResult<SpanBase> {
    match (value, span_names) {
        (Value::Object(named), Some(names)) => {
            let mut ordered = Vec::with_capacity(named.len());
            for name in names {
                if let Some(base) = named.get(name) {
                    ordered.push((name.clone(), base_span_from_value(base)?));
                }
            }
            if ordered.len() != named.len() {
                return Err(StrataError::codec("relation span has undeclared span names"));
            }
            Ok(SpanBase::Named(ordered))
        }
        (Value::Object(_), None) => Err(StrataError::codec(
            "named base span in a layer without span names",
        )),
        (other, _) => Ok(SpanBase::Single(base_span_from_value(other)?)),
    }
}

fn base_span_from_value(value: &Value) -> StrataResult<BaseSpan> {
    let items = value
        .as_array()
        .ok_or_else(|| StrataError::codec(format!("invalid base span {value}")))?;
    match items.as_slice() {
        [Value::Number(start), Value::Number(end)] => {
            let start = offset(start.as_u64())?;
            let end = offset(end.as_u64())?;
            if start > end {
                return Err(StrataError::codec(format!(
                    "span start {start} is after end {end}"
                )));
            }
            Ok(BaseSpan::new(start, end))
        }
        spans if spans.iter().all(Value::is_array) && !spans.is_empty() => Ok(BaseSpan::Enveloping(
            spans
                .iter()
                .map(base_span_from_value)
                .collect::<StrataResult<Vec<_>>>()?,
        )),
        _ => Err(StrataError::codec(format!("invalid base span {value}"))),
    }
}

fn offset(raw: Option<u64>) -> StrataResult<usize> {
    raw.and_then(|v| usize::try_from(v).ok())
        .ok_or_else(|| StrataError::codec("span offsets must be non-negative integers"))
}

fn meta_to_value(meta: &BTreeMap<String, Value>) -> Value {
    Value::Object(meta.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
}

fn meta_from_value(value: Option<&Value>) -> StrataResult<BTreeMap<String, Value>> {
    match value {
        None | Some(Value::Null) => Ok(BTreeMap::new()),
        Some(Value::Object(map)) => Ok(map.iter().map(|(k, v)| (k.clone(), v.clone())).collect()),
        Some(other) => Err(StrataError::codec(format!("meta must be an object, got {other}"))),
    }
}

fn optional_string(value: Option<&str>) -> Value {
    value.map_or(Value::Null, |v| Value::String(v.to_string()))
}

fn required_str<'a>(object: &'a Map<String, Value>, key: &str) -> StrataResult<&'a str> {
    object
        .get(key)
        .and_then(Value::as_str)
        .ok_or_else(|| StrataError::codec(format!("missing string field '{key}'")))
}

fn optional_str<'a>(object: &'a Map<String, Value>, key: &str) -> StrataResult<Option<&'a str>> {
    match object.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => Ok(Some(s)),
        Some(other) => Err(StrataError::codec(format!(
            "field '{key}' must be a string or null, got {other}"
        ))),
    }
}

fn string_list(value: Option<&Value>, key: &str) -> StrataResult<Vec<String>> {
    let items = value
        .and_then(Value::as_array)
        .ok_or_else(|| StrataError::codec(format!("field '{key}' must be a list")))?;
    items
        .iter()
        .map(|item| {
            item.as_str()
                .map(str::to_string)
                .ok_or_else(|| StrataError::codec(format!("field '{key}' must list strings")))
        })
        .collect()
}
