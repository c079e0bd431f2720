//! Annotation layers.
//!
//! A [`Layer`] has a fixed, declared attribute list. Attribute values are
//! stored positionally in each [`Annotation`]; name lookups go through the
//! layer's [`AttributeList`], which maps each declared name to its position.

use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashMap};

use strata_common::error::{StrataError, StrataResult};
use strata_common::types::is_identifier;

use crate::span::{Annotation, BaseSpan, Span, SpanBase};

// =============================================================================
// Attribute List
// =============================================================================

/// The declared attribute names of a layer and their positions.
#[derive(Debug, Clone, Default)]
pub struct AttributeList {
    names: Vec<String>,
    index: HashMap<String, usize>,
}

impl AttributeList {
    /// Creates an attribute list, rejecting empty and duplicate names.
    pub fn new<I, S>(names: I) -> StrataResult<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let names: Vec<String> = names.into_iter().map(Into::into).collect();
        let mut index = HashMap::with_capacity(names.len());
        for (position, name) in names.iter().enumerate() {
            if name.is_empty() {
                return Err(StrataError::invalid_argument("attribute name is empty"));
            }
            if index.insert(name.clone(), position).is_some() {
                return Err(StrataError::invalid_argument(format!(
                    "duplicate attribute '{name}'"
                )));
            }
        }
        Ok(Self { names, index })
    }

    /// Returns the position of an attribute.
    #[must_use]
    pub fn position(&self, name: &str) -> Option<usize> {
        self.index.get(name).copied()
    }

    /// Returns the names in declared order.
    #[must_use]
    pub fn names(&self) -> &[String] {
        &self.names
    }

    /// Returns the number of attributes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.names.len()
    }

    /// Returns true if no attributes are declared.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}

impl PartialEq for AttributeList {
    fn eq(&self, other: &Self) -> bool {
        self.names == other.names
    }
}

// =============================================================================
// Layer
// =============================================================================

/// An annotation layer over a document's text.
#[derive(Debug, Clone, PartialEq)]
pub struct Layer {
    name: String,
    attributes: AttributeList,
    ambiguous: bool,
    parent: Option<String>,
    enveloping: Option<String>,
    serialisation_module: Option<String>,
    span_names: Option<Vec<String>>,
    meta: BTreeMap<String, Value>,
    spans: Vec<Span>,
}

impl Layer {
    /// Starts building a layer.
    pub fn builder(name: impl Into<String>) -> LayerBuilder {
        LayerBuilder::new(name)
    }

    /// Returns the layer name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the declared attribute list.
    #[must_use]
    pub fn attributes(&self) -> &AttributeList {
        &self.attributes
    }

    /// Whether a span may have more than one annotation.
    #[must_use]
    pub fn ambiguous(&self) -> bool {
        self.ambiguous
    }

    /// Name of the layer whose spans this layer annotates one-to-one.
    #[must_use]
    pub fn parent(&self) -> Option<&str> {
        self.parent.as_deref()
    }

    /// Name of the layer whose spans this layer groups.
    #[must_use]
    pub fn enveloping(&self) -> Option<&str> {
        self.enveloping.as_deref()
    }

    /// Serialisation tag selecting the layer codec.
    #[must_use]
    pub fn serialisation_module(&self) -> Option<&str> {
        self.serialisation_module.as_deref()
    }

    /// Span names of a relation layer.
    #[must_use]
    pub fn span_names(&self) -> Option<&[String]> {
        self.span_names.as_deref()
    }

    /// Whether this is a relation layer.
    #[must_use]
    pub fn is_relation_layer(&self) -> bool {
        self.span_names.is_some()
    }

    /// Layer-level metadata.
    #[must_use]
    pub fn meta(&self) -> &BTreeMap<String, Value> {
        &self.meta
    }

    /// Mutable layer-level metadata.
    pub fn meta_mut(&mut self) -> &mut BTreeMap<String, Value> {
        &mut self.meta
    }

    /// Returns the spans, ordered by base span.
    #[must_use]
    pub fn spans(&self) -> &[Span] {
        &self.spans
    }

    /// Returns the number of spans.
    #[must_use]
    pub fn len(&self) -> usize {
        self.spans.len()
    }

    /// Returns true if the layer has no spans.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.spans.is_empty()
    }

    /// Names of the layers this layer depends on.
    pub fn dependencies(&self) -> impl Iterator<Item = &str> {
        self.parent.iter().chain(self.enveloping.iter()).map(String::as_str)
    }

    /// Returns a copy with the same shape and no spans.
    #[must_use]
    pub fn template(&self) -> Self {
        Self {
            spans: Vec::new(),
            meta: BTreeMap::new(),
            ..self.clone()
        }
    }

    /// Looks up an annotation value by attribute name.
    #[must_use]
    pub fn value<'a>(&self, annotation: &'a Annotation, attribute: &str) -> Option<&'a Value> {
        self.attributes
            .position(attribute)
            .and_then(|position| annotation.get(position))
    }

    /// Collects the values of one attribute over all annotations.
    pub fn values(&self, attribute: &str) -> StrataResult<Vec<&Value>> {
        let position = self.position(attribute)?;
        Ok(self
            .spans
            .iter()
            .flat_map(|span| span.annotations().iter())
            .filter_map(|annotation| annotation.get(position))
            .collect())
    }

    /// Counts the values of one attribute over all annotations.
    ///
    /// String values are counted by their content, other values by their
    /// JSON text.
    pub fn count_values(&self, attribute: &str) -> StrataResult<BTreeMap<String, usize>> {
        let mut counts = BTreeMap::new();
        for value in self.values(attribute)? {
            *counts.entry(value_key(value)).or_insert(0) += 1;
        }
        Ok(counts)
    }

    /// Adds an annotation to the span at `base`, creating the span if needed.
    ///
    /// Attributes not listed get `null`; unknown attribute names are rejected.
    pub fn add_annotation<I, K>(&mut self, base: impl Into<BaseSpan>, values: I) -> StrataResult<()>
    where
        I: IntoIterator<Item = (K, Value)>,
        K: AsRef<str>,
    {
        if self.is_relation_layer() {
            return Err(StrataError::invalid_argument(format!(
                "layer '{}' is a relation layer, use add_relation",
                self.name
            )));
        }
        let annotation = self.annotation(values)?;
        self.insert_annotation(SpanBase::Single(base.into()), annotation)
    }

    /// Adds an annotation to a relation span made of named base spans.
    pub fn add_relation<I, K>(
        &mut self,
        named: Vec<(String, BaseSpan)>,
        values: I,
    ) -> StrataResult<()>
    where
        I: IntoIterator<Item = (K, Value)>,
        K: AsRef<str>,
    {
        let Some(span_names) = &self.span_names else {
            return Err(StrataError::invalid_argument(format!(
                "layer '{}' has no span names",
                self.name
            )));
        };
        let mut ordered = Vec::with_capacity(named.len());
        for (name, base) in named {
            if !span_names.contains(&name) {
                return Err(StrataError::invalid_argument(format!(
                    "unknown span name '{name}' in layer '{}'",
                    self.name
                )));
            }
            ordered.push((name, base));
        }
        ordered.sort_by_key(|(name, _)| span_names.iter().position(|n| n == name));
        let annotation = self.annotation(values)?;
        self.insert_annotation(SpanBase::Named(ordered), annotation)
    }

    /// Builds a positional annotation from named values.
    pub fn annotation<I, K>(&self, values: I) -> StrataResult<Annotation>
    where
        I: IntoIterator<Item = (K, Value)>,
        K: AsRef<str>,
    {
        let mut positional = vec![Value::Null; self.attributes.len()];
        for (name, value) in values {
            positional[self.position(name.as_ref())?] = value;
        }
        Ok(Annotation::from_values(positional))
    }

    pub(crate) fn insert_annotation(
        &mut self,
        base: SpanBase,
        annotation: Annotation,
    ) -> StrataResult<()> {
        if annotation.values().len() != self.attributes.len() {
            return Err(StrataError::invalid_argument(format!(
                "annotation has {} values, layer '{}' declares {} attributes",
                annotation.values().len(),
                self.name,
                self.attributes.len()
            )));
        }
        match self.spans.binary_search_by(|span| span.base().cmp(&base)) {
            Ok(i) => {
                let span = &mut self.spans[i];
                if !self.ambiguous && !span.annotations().is_empty() {
                    return Err(StrataError::invalid_argument(format!(
                        "layer '{}' is not ambiguous, span {:?} already has an annotation",
                        self.name,
                        span.base()
                    )));
                }
                span.push(annotation);
            }
            Err(i) => {
                let mut span = Span::new(base);
                span.push(annotation);
                self.spans.insert(i, span);
            }
        }
        Ok(())
    }

    pub(crate) fn push_span(&mut self, span: Span) {
        self.spans.push(span);
    }

    /// Describes the first shape difference to `other`, if any.
    ///
    /// The shape is the name, attribute list, ambiguity, parent and
    /// enveloping links, span names and serialisation tag.
    #[must_use]
    pub fn shape_difference(&self, other: &Layer) -> Option<String> {
        if self.name != other.name {
            return Some(format!("name '{}' != '{}'", self.name, other.name));
        }
        if self.attributes != other.attributes {
            return Some(format!(
                "attributes {:?} != {:?}",
                self.attributes.names(),
                other.attributes.names()
            ));
        }
        if self.ambiguous != other.ambiguous {
            return Some(format!("ambiguous {} != {}", self.ambiguous, other.ambiguous));
        }
        if self.parent != other.parent {
            return Some(format!("parent {:?} != {:?}", self.parent, other.parent));
        }
        if self.enveloping != other.enveloping {
            return Some(format!(
                "enveloping {:?} != {:?}",
                self.enveloping, other.enveloping
            ));
        }
        if self.span_names != other.span_names {
            return Some(format!(
                "span names {:?} != {:?}",
                self.span_names, other.span_names
            ));
        }
        if self.serialisation_module != other.serialisation_module {
            return Some(format!(
                "serialisation module {:?} != {:?}",
                self.serialisation_module, other.serialisation_module
            ));
        }
        None
    }

    fn position(&self, attribute: &str) -> StrataResult<usize> {
        self.attributes.position(attribute).ok_or_else(|| {
            StrataError::invalid_argument(format!(
                "layer '{}' has no attribute '{attribute}'",
                self.name
            ))
        })
    }

    /// Returns an annotation as a name-to-value object in declared order.
    #[must_use]
    pub fn annotation_object(&self, annotation: &Annotation) -> Map<String, Value> {
        self.attributes
            .names()
            .iter()
            .cloned()
            .zip(annotation.values().iter().cloned())
            .collect()
    }
}

/// Key used to count a value.
pub(crate) fn value_key(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

// =============================================================================
// Layer Builder
// =============================================================================

/// Builder for [`Layer`].
///
/// # Example
///
/// ```rust
/// use strata_model::Layer;
///
/// let morph = Layer::builder("morph")
///     .attributes(["lemma", "pos"])
///     .ambiguous(true)
///     .parent("words")
///     .build()
///     .unwrap();
/// assert_eq!(morph.parent(), Some("words"));
/// ```
#[derive(Debug, Clone)]
pub struct LayerBuilder {
    name: String,
    attributes: Vec<String>,
    ambiguous: bool,
    parent: Option<String>,
    enveloping: Option<String>,
    serialisation_module: Option<String>,
    span_names: Option<Vec<String>>,
    meta: BTreeMap<String, Value>,
}

impl LayerBuilder {
    /// Creates a builder for a layer without attributes.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            attributes: Vec::new(),
            ambiguous: false,
            parent: None,
            enveloping: None,
            serialisation_module: None,
            span_names: None,
            meta: BTreeMap::new(),
        }
    }

    /// Sets the attribute names.
    #[must_use]
    pub fn attributes<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.attributes = names.into_iter().map(Into::into).collect();
        self
    }

    /// Sets whether spans may have several annotations.
    #[must_use]
    pub fn ambiguous(mut self, ambiguous: bool) -> Self {
        self.ambiguous = ambiguous;
        self
    }

    /// Sets the parent layer.
    #[must_use]
    pub fn parent(mut self, parent: impl Into<String>) -> Self {
        self.parent = Some(parent.into());
        self
    }

    /// Sets the enveloped layer.
    #[must_use]
    pub fn enveloping(mut self, enveloping: impl Into<String>) -> Self {
        self.enveloping = Some(enveloping.into());
        self
    }

    /// Sets the serialisation tag.
    #[must_use]
    pub fn serialisation_module(mut self, module: impl Into<String>) -> Self {
        self.serialisation_module = Some(module.into());
        self
    }

    /// Makes this a relation layer with the given span names.
    #[must_use]
    pub fn span_names<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.span_names = Some(names.into_iter().map(Into::into).collect());
        self
    }

    /// Adds a layer metadata entry.
    #[must_use]
    pub fn meta(mut self, key: impl Into<String>, value: Value) -> Self {
        self.meta.insert(key.into(), value);
        self
    }

    /// Builds the layer.
    pub fn build(self) -> StrataResult<Layer> {
        if !is_identifier(&self.name) {
            return Err(StrataError::invalid_argument(format!(
                "layer name '{}' is not a lowercase identifier",
                self.name
            )));
        }
        if self.name.contains("__") {
            return Err(StrataError::invalid_argument(format!(
                "layer name '{}' must not contain '__'",
                self.name
            )));
        }
        if self.parent.is_some() && self.enveloping.is_some() {
            return Err(StrataError::invalid_argument(format!(
                "layer '{}' cannot have both a parent and an enveloped layer",
                self.name
            )));
        }
        if self.parent.as_deref() == Some(self.name.as_str())
            || self.enveloping.as_deref() == Some(self.name.as_str())
        {
            return Err(StrataError::invalid_argument(format!(
                "layer '{}' cannot depend on itself",
                self.name
            )));
        }
        if let Some(span_names) = &self.span_names {
            if span_names.is_empty() {
                return Err(StrataError::invalid_argument(format!(
                    "relation layer '{}' needs at least one span name",
                    self.name
                )));
            }
            let mut seen = span_names.clone();
            seen.sort();
            seen.dedup();
            if seen.len() != span_names.len() {
                return Err(StrataError::invalid_argument(format!(
                    "duplicate span name in layer '{}'",
                    self.name
                )));
            }
        }
        Ok(Layer {
            attributes: AttributeList::new(self.attributes)?,
            name: self.name,
            ambiguous: self.ambiguous,
            parent: self.parent,
            enveloping: self.enveloping,
            serialisation_module: self.serialisation_module,
            span_names: self.span_names,
            meta: self.meta,
            spans: Vec::new(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn words() -> Layer {
        Layer::builder("words").attributes(["normal"]).build().unwrap()
    }

    #[test]
    fn test_builder_validation() {
        assert!(Layer::builder("Words").build().is_err());
        assert!(Layer::builder("a__b").build().is_err());
        assert!(Layer::builder("x").parent("a").enveloping("b").build().is_err());
        assert!(Layer::builder("x").parent("x").build().is_err());
        assert!(Layer::builder("x").attributes(["a", "a"]).build().is_err());
        assert!(Layer::builder("x").span_names(Vec::<String>::new()).build().is_err());
    }

    #[test]
    fn test_add_annotation_by_name() {
        let mut layer = Layer::builder("morph")
            .attributes(["lemma", "pos"])
            .ambiguous(true)
            .build()
            .unwrap();
        layer
            .add_annotation((0, 3), [("pos", json!("S")), ("lemma", json!("dog"))])
            .unwrap();
        layer.add_annotation((0, 3), [("lemma", json!("dogs"))]).unwrap();

        let span = &layer.spans()[0];
        assert_eq!(span.annotations().len(), 2);
        assert_eq!(layer.value(&span.annotations()[0], "lemma"), Some(&json!("dog")));
        assert_eq!(layer.value(&span.annotations()[1], "pos"), Some(&Value::Null));
        assert_eq!(layer.value(&span.annotations()[0], "unknown"), None);
    }

    #[test]
    fn test_unknown_attribute_rejected() {
        let mut layer = words();
        assert!(layer.add_annotation((0, 3), [("lemma", json!("x"))]).is_err());
        assert!(layer.is_empty());
    }

    #[test]
    fn test_non_ambiguous_layer_rejects_second_annotation() {
        let mut layer = words();
        layer.add_annotation((0, 3), [("normal", json!("dog"))]).unwrap();
        assert!(layer.add_annotation((0, 3), [("normal", json!("dog"))]).is_err());
    }

    #[test]
    fn test_spans_kept_sorted() {
        let mut layer = words();
        layer.add_annotation((4, 8), [("normal", json!("runs"))]).unwrap();
        layer.add_annotation((0, 3), [("normal", json!("dog"))]).unwrap();
        let starts: Vec<usize> = layer.spans().iter().map(Span::start).collect();
        assert_eq!(starts, vec![0, 4]);
    }

    #[test]
    fn test_relation_layer() {
        let mut layer = Layer::builder("coref")
            .attributes(["kind"])
            .span_names(["mention", "entity"])
            .build()
            .unwrap();
        assert!(layer.add_annotation((0, 3), [("kind", json!("x"))]).is_err());
        layer
            .add_relation(
                vec![
                    ("entity".to_string(), BaseSpan::new(10, 12)),
                    ("mention".to_string(), BaseSpan::new(0, 3)),
                ],
                [("kind", json!("pronoun"))],
            )
            .unwrap();
        match layer.spans()[0].base() {
            SpanBase::Named(named) => assert_eq!(named[0].0, "mention"),
            SpanBase::Single(_) => panic!("expected named span"),
        }
    }

    #[test]
    fn test_count_values() {
        let mut layer = words();
        layer.add_annotation((0, 3), [("normal", json!("dog"))]).unwrap();
        layer.add_annotation((4, 7), [("normal", json!("dog"))]).unwrap();
        layer.add_annotation((8, 9), [("normal", json!(1))]).unwrap();
        let counts = layer.count_values("normal").unwrap();
        assert_eq!(counts.get("dog"), Some(&2));
        assert_eq!(counts.get("1"), Some(&1));
        assert!(layer.count_values("lemma").is_err());
    }

    #[test]
    fn test_shape_difference() {
        let a = words();
        let b = Layer::builder("words").attributes(["normal", "lemma"]).build().unwrap();
        assert!(a.shape_difference(&a.template()).is_none());
        assert!(a.shape_difference(&b).unwrap().starts_with("attributes"));
    }
}
