//! # strata-model
//!
//! Documents, layers, and the tagger contract for Strata.
//!
//! The store treats these values as plain data: it encodes them for
//! storage, decodes them on selection, and compares layer shapes for
//! structural validation.
//!
//! ```text
//!   Document ── text, meta
//!      │
//!      └── Layer ── name, attributes, ambiguous, parent | enveloping
//!            │
//!            └── Span ── base span (offsets, grouping, or named spans)
//!                  │
//!                  └── Annotation ── values in declared attribute order
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod codec;
pub mod document;
pub mod layer;
pub mod ngram;
pub mod span;
pub mod tagger;

pub use codec::{decode_document, decode_layer, encode_document, encode_layer, CodecRegistry, LayerCodec};
pub use document::Document;
pub use layer::{AttributeList, Layer, LayerBuilder};
pub use ngram::{ngram_fingerprint, ngram_key};
pub use span::{Annotation, BaseSpan, Span, SpanBase};
pub use tagger::{Fragment, RowMapperRecord, Tagger};
