//! Spans and annotations.
//!
//! A span locates a piece of text, either directly by character offsets or
//! by grouping the spans of another layer. Annotations hold attribute values
//! positionally, aligned with the owning layer's declared attribute list.

use serde_json::Value;
use std::fmt;

/// Location of a span in the text.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum BaseSpan {
    /// A contiguous character range `[start, end)`.
    Elementary {
        /// Start offset.
        start: usize,
        /// End offset (exclusive).
        end: usize,
    },
    /// A grouping of other spans, e.g. a sentence over words.
    Enveloping(Vec<BaseSpan>),
}

impl BaseSpan {
    /// Creates an elementary span.
    #[must_use]
    pub const fn new(start: usize, end: usize) -> Self {
        Self::Elementary { start, end }
    }

    /// Start offset of the first covered character.
    #[must_use]
    pub fn start(&self) -> usize {
        match self {
            Self::Elementary { start, .. } => *start,
            Self::Enveloping(spans) => spans.iter().map(Self::start).min().unwrap_or(0),
        }
    }

    /// End offset of the last covered character.
    #[must_use]
    pub fn end(&self) -> usize {
        match self {
            Self::Elementary { end, .. } => *end,
            Self::Enveloping(spans) => spans.iter().map(Self::end).max().unwrap_or(0),
        }
    }

    /// Nesting depth: 0 for elementary spans.
    #[must_use]
    pub fn level(&self) -> usize {
        match self {
            Self::Elementary { .. } => 0,
            Self::Enveloping(spans) => 1 + spans.iter().map(Self::level).max().unwrap_or(0),
        }
    }
}

impl From<(usize, usize)> for BaseSpan {
    fn from((start, end): (usize, usize)) -> Self {
        Self::new(start, end)
    }
}

impl fmt::Display for BaseSpan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Elementary { start, end } => write!(f, "({start}, {end})"),
            Self::Enveloping(spans) => {
                f.write_str("[")?;
                for (i, span) in spans.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{span}")?;
                }
                f.write_str("]")
            }
        }
    }
}

/// What a span refers to: one base span, or several named ones for
/// relation layers.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum SpanBase {
    /// A single base span.
    Single(BaseSpan),
    /// Named base spans, in the layer's `span_names` order.
    Named(Vec<(String, BaseSpan)>),
}

impl SpanBase {
    /// Start offset over all referenced spans.
    #[must_use]
    pub fn start(&self) -> usize {
        match self {
            Self::Single(base) => base.start(),
            Self::Named(named) => named.iter().map(|(_, b)| b.start()).min().unwrap_or(0),
        }
    }

    /// End offset over all referenced spans.
    #[must_use]
    pub fn end(&self) -> usize {
        match self {
            Self::Single(base) => base.end(),
            Self::Named(named) => named.iter().map(|(_, b)| b.end()).max().unwrap_or(0),
        }
    }
}

/// One annotation of a span.
///
/// Values are aligned with the attribute list of the layer the annotation
/// belongs to; use [`crate::Layer::value`] for access by name.
#[derive(Debug, Clone, PartialEq)]
pub struct Annotation {
    values: Vec<Value>,
}

impl Annotation {
    pub(crate) fn from_values(values: Vec<Value>) -> Self {
        Self { values }
    }

    /// Returns the values in declared attribute order.
    #[must_use]
    pub fn values(&self) -> &[Value] {
        &self.values
    }

    /// Returns the value at an attribute position.
    #[must_use]
    pub fn get(&self, position: usize) -> Option<&Value> {
        self.values.get(position)
    }
}

/// A span of a layer together with its annotations.
#[derive(Debug, Clone, PartialEq)]
pub struct Span {
    base: SpanBase,
    annotations: Vec<Annotation>,
}

impl Span {
    pub(crate) fn new(base: SpanBase) -> Self {
        Self {
            base,
            annotations: Vec::new(),
        }
    }

    pub(crate) fn push(&mut self, annotation: Annotation) {
        self.annotations.push(annotation);
    }

    /// Returns what the span refers to.
    #[must_use]
    pub fn base(&self) -> &SpanBase {
        &self.base
    }

    /// Returns the annotations.
    #[must_use]
    pub fn annotations(&self) -> &[Annotation] {
        &self.annotations
    }

    /// Start offset.
    #[must_use]
    pub fn start(&self) -> usize {
        self.base.start()
    }

    /// End offset.
    #[must_use]
    pub fn end(&self) -> usize {
        self.base.end()
    }

    /// Returns the covered text, if the offsets lie within `text`.
    #[must_use]
    pub fn text<'t>(&self, text: &'t str) -> Option<&'t str> {
        let chars: Vec<(usize, char)> = text.char_indices().collect();
        let byte_at = |offset: usize| {
            if offset == chars.len() {
                Some(text.len())
            } else {
                chars.get(offset).map(|(b, _)| *b)
            }
        };
        let start = byte_at(self.start())?;
        let end = byte_at(self.end())?;
        text.get(start..end)
    }
}
