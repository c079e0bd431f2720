//! Selection predicates.
//!
//! A [`Query`] is a tree of predicates over documents. Predicates combine
//! with `&` and `|`; nested conjunctions and disjunctions are flattened.
//! Before translation a query is lowered: disjunctions of attribute
//! constraints on the same layer become one predicate with several
//! alternatives, so each layer is scanned once.
//!
//! ```rust
//! use serde_json::json;
//! use strata_store::Query;
//!
//! let query = Query::layer_attribute("morph", [("lemma", json!("kass"))])
//!     | Query::layer_attribute("morph", [("lemma", json!("koer"))]);
//! assert_eq!(query.lower(), Query::LayerAttribute {
//!     layer: "morph".into(),
//!     alternatives: vec![
//!         vec![("lemma".into(), json!("kass"))],
//!         vec![("lemma".into(), json!("koer"))],
//!     ],
//! });
//! ```

mod translate;

pub(crate) use translate::{QueryContext, SqlFragment};

use std::collections::BTreeSet;
use std::ops::{BitAnd, BitOr};

use serde_json::Value;

use strata_common::types::{Block, DocumentId};
use strata_model::ngram_key;

/// Where a metadata predicate looks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetaScope {
    /// A typed meta column of the collection table.
    Column,
    /// A key of the document's own metadata.
    Text,
}

/// A predicate over documents.
#[derive(Debug, Clone, PartialEq)]
pub enum Query {
    /// Documents with one of the given ids.
    Keys(Vec<DocumentId>),
    /// Documents with `start <= id < stop`.
    Slice {
        /// Inclusive lower bound.
        start: Option<i64>,
        /// Exclusive upper bound.
        stop: Option<i64>,
    },
    /// Documents with an annotation of `layer` matching any alternative,
    /// each alternative a conjunction of attribute equalities.
    LayerAttribute {
        /// Layer to search.
        layer: String,
        /// Disjunction of conjunctions.
        alternatives: Vec<Vec<(String, Value)>>,
    },
    /// Documents whose metadata value is one of `values`.
    Metadata {
        /// Column or document metadata.
        scope: MetaScope,
        /// Column or key name.
        column: String,
        /// Accepted values.
        values: Vec<Value>,
    },
    /// Documents without a row in a detached or fragmented layer.
    MissingLayer(String),
    /// Documents whose id falls in a block.
    Block(Block),
    /// Documents whose text contains a substring.
    Substring(String),
    /// Documents whose n-gram index contains every gram of any alternative.
    LayerNgram {
        /// Indexed layer.
        layer: String,
        /// Indexed attribute.
        attribute: String,
        /// Disjunction of gram conjunctions; grams are joined keys.
        alternatives: Vec<Vec<String>>,
    },
    /// All sub-predicates hold.
    And(Vec<Query>),
    /// At least one sub-predicate holds.
    Or(Vec<Query>),
}

impl Query {
    /// Documents with one of the given ids.
    pub fn keys<I, K>(ids: I) -> Self
    where
        I: IntoIterator<Item = K>,
        K: Into<DocumentId>,
    {
        Self::Keys(ids.into_iter().map(Into::into).collect())
    }

    /// Documents with `start <= id < stop`.
    pub fn slice(start: Option<i64>, stop: Option<i64>) -> Self {
        Self::Slice { start, stop }
    }

    /// Documents with an annotation of `layer` matching all constraints.
    pub fn layer_attribute<I, K>(layer: impl Into<String>, constraints: I) -> Self
    where
        I: IntoIterator<Item = (K, Value)>,
        K: Into<String>,
    {
        Self::LayerAttribute {
            layer: layer.into(),
            alternatives: vec![constraints.into_iter().map(|(k, v)| (k.into(), v)).collect()],
        }
    }

    /// Documents whose meta column holds one of `values`.
    pub fn metadata(column: impl Into<String>, values: impl IntoIterator<Item = Value>) -> Self {
        Self::Metadata {
            scope: MetaScope::Column,
            column: column.into(),
            values: values.into_iter().collect(),
        }
    }

    /// Documents whose own metadata key holds one of `values`.
    pub fn text_metadata(key: impl Into<String>, values: impl IntoIterator<Item = Value>) -> Self {
        Self::Metadata {
            scope: MetaScope::Text,
            column: key.into(),
            values: values.into_iter().collect(),
        }
    }

    /// Documents without a row in `layer`.
    pub fn missing_layer(layer: impl Into<String>) -> Self {
        Self::MissingLayer(layer.into())
    }

    /// Documents whose id falls in `block`.
    pub fn block(block: Block) -> Self {
        Self::Block(block)
    }

    /// Documents whose text contains `needle`.
    pub fn substring(needle: impl Into<String>) -> Self {
        Self::Substring(needle.into())
    }

    /// Documents containing all n-grams, each given as its tokens.
    pub fn layer_ngram<S: AsRef<str>>(
        layer: impl Into<String>,
        attribute: impl Into<String>,
        grams: &[Vec<S>],
    ) -> Self {
        Self::LayerNgram {
            layer: layer.into(),
            attribute: attribute.into(),
            alternatives: vec![grams.iter().map(|tokens| ngram_key(tokens)).collect()],
        }
    }

    /// Conjunction, flattening nested conjunctions.
    #[must_use]
    pub fn and(self, other: Query) -> Self {
        let mut parts = match self {
            Self::And(parts) => parts,
            single => vec![single],
        };
        match other {
            Self::And(more) => parts.extend(more),
            single => parts.push(single),
        }
        Self::And(parts)
    }

    /// Disjunction, flattening nested disjunctions.
    #[must_use]
    pub fn or(self, other: Query) -> Self {
        let mut parts = match self {
            Self::Or(parts) => parts,
            single => vec![single],
        };
        match other {
            Self::Or(more) => parts.extend(more),
            single => parts.push(single),
        }
        Self::Or(parts)
    }

    /// Layers this query refers to.
    pub fn referenced_layers(&self) -> BTreeSet<String> {
        let mut layers = BTreeSet::new();
        self.collect_layers(&mut layers);
        layers
    }

    fn collect_layers(&self, layers: &mut BTreeSet<String>) {
        match self {
            Self::LayerAttribute { layer, .. } | Self::LayerNgram { layer, .. } | Self::MissingLayer(layer) => {
                layers.insert(layer.clone());
            }
            Self::And(parts) | Self::Or(parts) => {
                for part in parts {
                    part.collect_layers(layers);
                }
            }
            Self::Keys(_) | Self::Slice { .. } | Self::Metadata { .. } | Self::Block(_) | Self::Substring(_) => {}
        }
    }

    /// Layers whose rows must be joined to evaluate the query: those
    /// searched by attribute or n-gram. Missing-layer predicates use a
    /// correlated subquery instead.
    pub fn joined_layers(&self) -> BTreeSet<String> {
        let mut layers = BTreeSet::new();
        self.collect_joined(&mut layers);
        layers
    }

    fn collect_joined(&self, layers: &mut BTreeSet<String>) {
        match self {
            Self::LayerAttribute { layer, .. } | Self::LayerNgram { layer, .. } => {
                layers.insert(layer.clone());
            }
            Self::And(parts) | Self::Or(parts) => {
                for part in parts {
                    part.collect_joined(layers);
                }
            }
            _ => {}
        }
    }

    /// Flattens nested connectives and merges same-layer alternatives
    /// inside disjunctions.
    #[must_use]
    pub fn lower(self) -> Self {
        match self {
            Self::And(parts) => {
                let mut flat = Vec::with_capacity(parts.len());
                for part in parts {
                    match part.lower() {
                        Self::And(inner) => flat.extend(inner),
                        other => flat.push(other),
                    }
                }
                if flat.len() == 1 {
                    flat.pop().unwrap_or(Self::And(Vec::new()))
                } else {
                    Self::And(flat)
                }
            }
            Self::Or(parts) => {
                let mut merged: Vec<Query> = Vec::with_capacity(parts.len());
                let mut flat = Vec::with_capacity(parts.len());
                for part in parts {
                    match part.lower() {
                        Self::Or(inner) => flat.extend(inner),
                        other => flat.push(other),
                    }
                }
                for part in flat {
                    merge_alternative(&mut merged, part);
                }
                if merged.len() == 1 {
                    merged.pop().unwrap_or(Self::Or(Vec::new()))
                } else {
                    Self::Or(merged)
                }
            }
            other => other,
        }
    }
}

fn merge_alternative(merged: &mut Vec<Query>, part: Query) {
    match part {
        Query::LayerAttribute { layer, alternatives } => {
            let existing = merged.iter_mut().find_map(|q| match q {
                Query::LayerAttribute {
                    layer: l,
                    alternatives: a,
                } if *l == layer => Some(a),
                _ => None,
            });
            match existing {
                Some(target) => target.extend(alternatives),
                None => merged.push(Query::LayerAttribute { layer, alternatives }),
            }
        }
        Query::LayerNgram {
            layer,
            attribute,
            alternatives,
        } => {
            let existing = merged.iter_mut().find_map(|q| match q {
                Query::LayerNgram {
                    layer: l,
                    attribute: at,
                    alternatives: a,
                } if *l == layer && *at == attribute => Some(a),
                _ => None,
            });
            match existing {
                Some(target) => target.extend(alternatives),
                None => merged.push(Query::LayerNgram {
                    layer,
                    attribute,
                    alternatives,
                }),
            }
        }
        other => merged.push(other),
    }
}

impl BitAnd for Query {
    type Output = Query;

    fn bitand(self, rhs: Query) -> Query {
        self.and(rhs)
    }
}

impl BitOr for Query {
    type Output = Query;

    fn bitor(self, rhs: Query) -> Query {
        self.or(rhs)
    }
}
