//! Document selection.
//!
//! A [`Selection`] describes which documents to read and which layers to
//! attach to them. Planning reads a fresh structure snapshot, expands the
//! requested layers with their dependencies, joins the tables of detached
//! layers and translates the query. Results are ordered by document id and
//! fetched in keyset-paginated chunks, so no statement stays open between
//! chunks.
//!
//! # Join rule
//!
//! ```text
//!   layer kind                  keep_all_documents   join
//!   ─────────────────────────── ──────────────────── ──────────
//!   detached, sparse            true                 LEFT
//!   detached, sparse            false                INNER
//!   detached, not sparse        any                  INNER
//! ```
//!
//! A document without a row in a left-joined layer gets an empty layer of
//! the declared shape.
//!
//! # Sampling
//!
//! [`Selection::sample`] keeps a document when a seeded hash of its id
//! falls below the requested share of the hash range. The hash is computed
//! in SQL, so counting, paging and iteration see the same sample, and a
//! seed always selects the same documents.

use std::collections::{BTreeMap, HashMap, VecDeque};

use rusqlite::types::Value as SqlValue;
use rusqlite::{params_from_iter, Connection};
use serde_json::Value;
use tracing::debug;

use strata_common::error::StrataError;
use strata_common::types::{DocumentId, LayerType, MetaType};
use strata_model::{CodecRegistry, Document, Layer};

use crate::collection::Collection;
use crate::error::StoreResult;
use crate::query::{Query, QueryContext, SqlFragment};
use crate::sql::{quote_ident, sql_to_meta, TableName};

const SAMPLE_MODULUS: i64 = 2_147_483_647;
const SAMPLE_MULTIPLIER: i64 = 48_271;

/// Hash bucket of a document id in `[0, SAMPLE_MODULUS)`. The sampling
/// clause computes the same expression in SQL.
pub(crate) fn sample_bucket(id: i64, seed: u64) -> i64 {
    let seed = (seed % SAMPLE_MODULUS as u64) as i64;
    let mixed = (id.rem_euclid(SAMPLE_MODULUS) * SAMPLE_MULTIPLIER + seed) % SAMPLE_MODULUS;
    mixed * mixed % SAMPLE_MODULUS
}

fn sample_clause(percent: f64, seed: u64) -> StoreResult<SqlFragment> {
    if !(0.0..=100.0).contains(&percent) {
        return Err(StrataError::invalid_argument(format!(
            "sample percentage must be in [0, 100], got {percent}"
        ))
        .into());
    }
    let threshold = (percent / 100.0 * SAMPLE_MODULUS as f64).round() as i64;
    let p = SAMPLE_MODULUS;
    Ok(SqlFragment {
        sql: format!(
            "(((c.id % {p}) + {p}) % {p} * {SAMPLE_MULTIPLIER} + ?) % {p} \
             * ((((c.id % {p}) + {p}) % {p} * {SAMPLE_MULTIPLIER} + ?) % {p}) % {p} < ?"
        ),
        params: vec![
            SqlValue::Integer((seed % p as u64) as i64),
            SqlValue::Integer((seed % p as u64) as i64),
            SqlValue::Integer(threshold),
        ],
    })
}

/// A selected document with its id and requested collection metadata.
#[derive(Debug, Clone, PartialEq)]
pub struct SelectedDocument {
    /// Document id.
    pub id: DocumentId,
    /// The document with attached and requested layers.
    pub document: Document,
    /// Requested meta column values.
    pub meta: BTreeMap<String, Value>,
}

// =============================================================================
// Selection
// =============================================================================

/// Builder for reading documents.
#[derive(Debug, Clone)]
pub struct Selection<'a> {
    collection: &'a Collection<'a>,
    query: Option<Query>,
    layers: Vec<String>,
    keep_all_documents: bool,
    collection_meta: Vec<String>,
    include_hidden: bool,
    skip: u64,
    limit: Option<u64>,
    itersize: usize,
    sample: Option<(f64, u64)>,
}

impl<'a> Selection<'a> {
    pub(crate) fn new(collection: &'a Collection<'a>) -> Self {
        Self {
            collection,
            query: None,
            layers: Vec::new(),
            keep_all_documents: true,
            collection_meta: Vec::new(),
            include_hidden: false,
            skip: 0,
            limit: None,
            itersize: collection.config().select.itersize,
            sample: None,
        }
    }

    /// Filters documents.
    #[must_use]
    pub fn query(mut self, query: Query) -> Self {
        self.query = Some(match self.query.take() {
            Some(existing) => existing & query,
            None => query,
        });
        self
    }

    /// Detached layers to attach, in addition to attached layers.
    #[must_use]
    pub fn layers<I, S>(mut self, layers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.layers.extend(layers.into_iter().map(Into::into));
        self
    }

    /// Whether documents lacking a requested sparse layer are kept.
    /// Default: true.
    #[must_use]
    pub fn keep_all_documents(mut self, keep: bool) -> Self {
        self.keep_all_documents = keep;
        self
    }

    /// Collection meta columns to return with each document.
    #[must_use]
    pub fn collection_meta<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.collection_meta.extend(columns.into_iter().map(Into::into));
        self
    }

    /// Whether hidden documents are returned. Default: false.
    #[must_use]
    pub fn include_hidden(mut self, include: bool) -> Self {
        self.include_hidden = include;
        self
    }

    /// Skips the first `n` matching documents.
    #[must_use]
    pub fn skip(mut self, n: u64) -> Self {
        self.skip = n;
        self
    }

    /// Returns at most `n` documents.
    #[must_use]
    pub fn limit(mut self, n: u64) -> Self {
        self.limit = Some(n);
        self
    }

    /// Keeps about `percent` percent of the matching documents. The same
    /// seed selects the same documents; `percent` must be in `[0, 100]`.
    #[must_use]
    pub fn sample(mut self, percent: f64, seed: u64) -> Self {
        self.sample = Some((percent, seed));
        self
    }

    /// Documents fetched per round trip.
    #[must_use]
    pub fn itersize(mut self, itersize: usize) -> Self {
        self.itersize = itersize.max(1);
        self
    }

    /// Number of matching documents.
    pub fn count(&self) -> StoreResult<u64> {
        let plan = self.plan()?;
        let (sql, params) = plan.sql("c.id", None, self.limit, self.skip);
        let count: i64 = self.collection.connection().query_row(
            &format!("SELECT COUNT(*) FROM ({sql})"),
            params_from_iter(params.iter()),
            |row| row.get(0),
        )?;
        Ok(u64::try_from(count).unwrap_or_default())
    }

    /// Ids of matching documents in ascending order.
    pub fn ids(&self) -> StoreResult<Vec<DocumentId>> {
        let plan = self.plan()?;
        let (sql, params) = plan.sql("c.id", None, self.limit, self.skip);
        let mut stmt = self.collection.connection().prepare(&sql)?;
        let ids = stmt
            .query_map(params_from_iter(params.iter()), |row| row.get::<_, i64>(0))?
            .map(|id| id.map(DocumentId::new))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(ids)
    }

    /// Iterates matching documents in id order.
    pub fn iter(&self) -> StoreResult<SelectionIter<'a>> {
        let plan = self.plan()?;
        Ok(SelectionIter {
            conn: self.collection.connection(),
            plan,
            buffer: VecDeque::new(),
            last_id: None,
            remaining: self.limit,
            skip: self.skip,
            itersize: self.itersize,
            done: false,
        })
    }

    /// Collects all matching documents.
    pub fn to_vec(&self) -> StoreResult<Vec<SelectedDocument>> {
        self.iter()?.collect()
    }

    fn plan(&self) -> StoreResult<SelectPlan> {
        let info = self.collection.info();
        let structure = self.collection.structure()?;

        for name in &self.layers {
            if structure.require(name)?.layer_type == LayerType::Fragmented {
                return Err(StrataError::structure_conflict(
                    &info.name,
                    name,
                    "fragmented layers are read with select_fragments",
                )
                .into());
            }
        }
        let mut requested: Vec<String> = structure.attached().map(|d| d.name.clone()).collect();
        requested.extend(self.layers.iter().cloned());
        let output_names = structure.dependent_layers(&requested)?;

        let query = self.query.clone().map(Query::lower);
        let query_joined = query.as_ref().map(Query::joined_layers).unwrap_or_default();
        let mut join_names: Vec<String> = Vec::new();
        for descriptor in structure.layers() {
            let wanted = output_names.contains(&descriptor.name) || query_joined.contains(&descriptor.name);
            if wanted && descriptor.layer_type == LayerType::Detached {
                join_names.push(descriptor.name.clone());
            }
        }

        let mut joins = Vec::with_capacity(join_names.len());
        let mut aliases = HashMap::new();
        for (i, name) in join_names.iter().enumerate() {
            let descriptor = structure.require(name)?;
            let alias = format!("l{i}");
            aliases.insert(name.clone(), alias.clone());
            joins.push(PlannedJoin {
                alias,
                table: TableName::layer(info.schema(), &info.name, name, LayerType::Detached),
                left: descriptor.sparse && self.keep_all_documents,
            });
        }

        let mut output = Vec::with_capacity(output_names.len());
        for name in &output_names {
            let descriptor = structure.require(name)?;
            output.push(match descriptor.layer_type {
                LayerType::Attached => OutputLayer::Attached(name.clone()),
                LayerType::Detached => OutputLayer::Detached {
                    alias: aliases.get(name).cloned().unwrap_or_default(),
                    template: descriptor.template()?,
                },
                LayerType::Fragmented => {
                    return Err(StrataError::structure_conflict(
                        &info.name,
                        name,
                        "fragmented layers cannot be attached to documents",
                    )
                    .into())
                }
            });
        }

        let mut meta = Vec::with_capacity(self.collection_meta.len());
        for column in &self.collection_meta {
            let meta_type = info.meta.get(column).ok_or_else(|| {
                StrataError::invalid_argument(format!(
                    "collection '{}' has no meta column '{column}'",
                    info.name
                ))
            })?;
            meta.push((column.clone(), meta_type));
        }

        let mut clauses = Vec::new();
        if let Some(query) = &query {
            let ctx = QueryContext {
                conn: self.collection.connection(),
                info,
                structure: &structure,
                aliases: &aliases,
            };
            clauses.push(query.to_sql(&ctx)?);
        }
        if let Some((percent, seed)) = self.sample {
            clauses.push(sample_clause(percent, seed)?);
        }
        if info.version.supports_hidden_documents() && !self.include_hidden {
            clauses.push(SqlFragment {
                sql: "c.hidden = 0".to_string(),
                params: Vec::new(),
            });
        }

        debug!(
            collection = %info.name,
            layers = ?output_names,
            joins = joins.len(),
            "selection planned"
        );
        Ok(SelectPlan {
            table: info.table(),
            joins,
            output,
            meta,
            clauses,
        })
    }
}

// =============================================================================
// Plan
// =============================================================================

#[derive(Debug)]
struct PlannedJoin {
    alias: String,
    table: TableName,
    left: bool,
}

#[derive(Debug)]
enum OutputLayer {
    Attached(String),
    Detached { alias: String, template: Layer },
}

#[derive(Debug)]
struct SelectPlan {
    table: TableName,
    joins: Vec<PlannedJoin>,
    output: Vec<OutputLayer>,
    meta: Vec<(String, MetaType)>,
    clauses: Vec<SqlFragment>,
}

impl SelectPlan {
    fn columns(&self) -> String {
        let mut columns = vec!["c.id".to_string(), "c.data".to_string()];
        columns.extend(self.meta.iter().map(|(name, _)| format!("c.{}", quote_ident(name))));
        for layer in &self.output {
            if let OutputLayer::Detached { alias, .. } = layer {
                columns.push(format!("{alias}.data"));
            }
        }
        columns.join(", ")
    }

    fn sql(&self, columns: &str, after: Option<i64>, limit: Option<u64>, offset: u64) -> (String, Vec<SqlValue>) {
        let mut sql = format!("SELECT {columns} FROM {} AS c", self.table);
        for join in &self.joins {
            sql.push_str(&format!(
                " {} JOIN {} AS {alias} ON {alias}.text_id = c.id",
                if join.left { "LEFT" } else { "INNER" },
                join.table,
                alias = join.alias
            ));
        }
        let mut conditions = Vec::new();
        let mut params = Vec::new();
        for clause in &self.clauses {
            conditions.push(format!("({})", clause.sql));
            params.extend(clause.params.iter().cloned());
        }
        if let Some(after) = after {
            conditions.push("c.id > ?".to_string());
            params.push(SqlValue::Integer(after));
        }
        if !conditions.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&conditions.join(" AND "));
        }
        sql.push_str(" ORDER BY c.id LIMIT ? OFFSET ?");
        params.push(SqlValue::Integer(limit.map_or(-1, |n| i64::try_from(n).unwrap_or(i64::MAX))));
        params.push(SqlValue::Integer(i64::try_from(offset).unwrap_or(i64::MAX)));
        (sql, params)
    }

    fn fetch(&self, conn: &Connection, after: Option<i64>, limit: u64, offset: u64) -> StoreResult<Vec<RawRow>> {
        let (sql, params) = self.sql(&self.columns(), after, Some(limit), offset);
        let meta_count = self.meta.len();
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
            .query_map(params_from_iter(params.iter()), |row| {
                let mut meta = Vec::with_capacity(meta_count);
                for (i, (_, meta_type)) in self.meta.iter().enumerate() {
                    meta.push(sql_to_meta(*meta_type, row.get_ref(2 + i)?));
                }
                let mut layers = Vec::new();
                let mut index = 2 + meta_count;
                for layer in &self.output {
                    if matches!(layer, OutputLayer::Detached { .. }) {
                        layers.push(row.get::<_, Option<String>>(index)?);
                        index += 1;
                    }
                }
                Ok(RawRow {
                    id: row.get(0)?,
                    data: row.get(1)?,
                    meta,
                    layers,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    fn assemble(&self, raw: RawRow) -> StoreResult<SelectedDocument> {
        let codec = CodecRegistry::global();
        let stored = codec.decode_document(&raw.data)?;
        let mut document = Document::new(stored.text());
        *document.meta_mut() = stored.meta().clone();

        let mut layer_data = raw.layers.into_iter();
        for layer in &self.output {
            match layer {
                OutputLayer::Attached(name) => {
                    let layer = stored.layer(name).ok_or_else(|| {
                        StrataError::codec(format!("document {} lacks attached layer '{name}'", raw.id))
                    })?;
                    document.add_layer(layer.clone())?;
                }
                OutputLayer::Detached { template, .. } => {
                    let layer = match layer_data.next().flatten() {
                        Some(data) => codec.decode_layer(&data)?,
                        None => template.clone(),
                    };
                    document.add_layer(layer)?;
                }
            }
        }

        let meta = self
            .meta
            .iter()
            .map(|(name, _)| name.clone())
            .zip(raw.meta)
            .collect();
        Ok(SelectedDocument {
            id: DocumentId::new(raw.id),
            document,
            meta,
        })
    }
}

struct RawRow {
    id: i64,
    data: String,
    meta: Vec<Value>,
    layers: Vec<Option<String>>,
}

// =============================================================================
// Iterator
// =============================================================================

/// Iterator over selected documents.
#[derive(Debug)]
pub struct SelectionIter<'a> {
    conn: &'a Connection,
    plan: SelectPlan,
    buffer: VecDeque<SelectedDocument>,
    last_id: Option<i64>,
    remaining: Option<u64>,
    skip: u64,
    itersize: usize,
    done: bool,
}

impl SelectionIter<'_> {
    fn fetch_chunk(&mut self) -> StoreResult<()> {
        let chunk = self.itersize as u64;
        let limit = self.remaining.map_or(chunk, |remaining| remaining.min(chunk));
        if limit == 0 {
            self.done = true;
            return Ok(());
        }
        let offset = if self.last_id.is_none() { self.skip } else { 0 };
        let rows = self.plan.fetch(self.conn, self.last_id, limit, offset)?;
        if (rows.len() as u64) < limit {
            self.done = true;
        }
        if let Some(remaining) = self.remaining.as_mut() {
            *remaining -= rows.len() as u64;
        }
        for raw in rows {
            self.last_id = Some(raw.id);
            let selected = self.plan.assemble(raw)?;
            self.buffer.push_back(selected);
        }
        Ok(())
    }
}

impl Iterator for SelectionIter<'_> {
    type Item = StoreResult<SelectedDocument>;

    fn next(&mut self) -> Option<Self::Item> {
        if let Some(document) = self.buffer.pop_front() {
            return Some(Ok(document));
        }
        if self.done {
            return None;
        }
        if let Err(err) = self.fetch_chunk() {
            self.done = true;
            return Some(Err(err));
        }
        self.buffer.pop_front().map(Ok)
    }
}
