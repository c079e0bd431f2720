//! Translation of predicates into SQL.
//!
//! Annotations are searched with SQLite's JSON functions. The document
//! table is aliased `c`; joined layer tables use the aliases the planner
//! assigns.

use std::collections::HashMap;

use rusqlite::types::Value as SqlValue;
use rusqlite::Connection;
use serde_json::Value;

use strata_common::error::StrataError;
use strata_common::types::{LayerType, MetaType};
use strata_model::codec::COMPACT_TAG;

use super::{MetaScope, Query};
use crate::error::StoreResult;
use crate::inserter::ngram_column;
use crate::sql::{json_to_sql, meta_to_sql, quote_ident, table_columns, TableName};
use crate::storage::CollectionInfo;
use crate::structure::{CollectionStructure, LayerDescriptor};

/// A WHERE-clause fragment with its positional parameters.
#[derive(Debug, Clone, PartialEq, Default)]
pub(crate) struct SqlFragment {
    pub sql: String,
    pub params: Vec<SqlValue>,
}

impl SqlFragment {
    fn new(sql: impl Into<String>, params: Vec<SqlValue>) -> Self {
        Self {
            sql: sql.into(),
            params,
        }
    }

    fn constant(holds: bool) -> Self {
        Self::new(if holds { "1" } else { "0" }, Vec::new())
    }

    fn join(parts: Vec<SqlFragment>, connective: &str) -> Self {
        let mut params = Vec::new();
        let sql = parts
            .into_iter()
            .map(|part| {
                params.extend(part.params);
                format!("({})", part.sql)
            })
            .collect::<Vec<_>>()
            .join(connective);
        Self { sql, params }
    }
}

/// What a predicate is translated against.
pub(crate) struct QueryContext<'a> {
    pub conn: &'a Connection,
    pub info: &'a CollectionInfo,
    pub structure: &'a CollectionStructure,
    /// Aliases of joined layer tables.
    pub aliases: &'a HashMap<String, String>,
}

impl QueryContext<'_> {
    fn descriptor(&self, layer: &str) -> StoreResult<&LayerDescriptor> {
        self.structure.require(layer)
    }

    fn layer_table(&self, descriptor: &LayerDescriptor) -> TableName {
        TableName::layer(self.info.schema(), &self.info.name, &descriptor.name, descriptor.layer_type)
    }

    fn alias(&self, layer: &str) -> StoreResult<&str> {
        self.aliases
            .get(layer)
            .map(String::as_str)
            .ok_or_else(|| StrataError::internal(format!("layer '{layer}' is not joined")).into())
    }

    fn conflict(&self, layer: &str, reason: impl Into<String>) -> crate::error::StoreError {
        StrataError::structure_conflict(&self.info.name, layer, reason).into()
    }
}

impl Query {
    /// Translates the query into a boolean SQL expression.
    pub(crate) fn to_sql(&self, ctx: &QueryContext<'_>) -> StoreResult<SqlFragment> {
        match self {
            Self::Keys(ids) => {
                if ids.is_empty() {
                    return Ok(SqlFragment::constant(false));
                }
                let list = serde_json::to_string(&ids.iter().map(|id| id.as_i64()).collect::<Vec<_>>())?;
                Ok(SqlFragment::new(
                    "c.id IN (SELECT value FROM json_each(?))",
                    vec![SqlValue::Text(list)],
                ))
            }
            Self::Slice { start, stop } => {
                let mut parts = Vec::new();
                if let Some(start) = start {
                    parts.push(SqlFragment::new("c.id >= ?", vec![SqlValue::Integer(*start)]));
                }
                if let Some(stop) = stop {
                    parts.push(SqlFragment::new("c.id < ?", vec![SqlValue::Integer(*stop)]));
                }
                if parts.is_empty() {
                    Ok(SqlFragment::constant(true))
                } else {
                    Ok(SqlFragment::join(parts, " AND "))
                }
            }
            Self::LayerAttribute { layer, alternatives } => layer_attribute(ctx, layer, alternatives),
            Self::Metadata { scope, column, values } => metadata(ctx, *scope, column, values),
            Self::MissingLayer(layer) => {
                let descriptor = ctx.descriptor(layer)?;
                if descriptor.layer_type == LayerType::Attached {
                    return Err(ctx.conflict(layer, "attached layers are never missing"));
                }
                Ok(SqlFragment::new(
                    format!(
                        "NOT EXISTS (SELECT 1 FROM {} AS m WHERE m.text_id = c.id)",
                        ctx.layer_table(descriptor)
                    ),
                    Vec::new(),
                ))
            }
            Self::Block(block) => Ok(SqlFragment::new(
                "((c.id % ?) + ?) % ? = ?",
                vec![
                    SqlValue::Integer(block.modulus()),
                    SqlValue::Integer(block.modulus()),
                    SqlValue::Integer(block.modulus()),
                    SqlValue::Integer(block.remainder()),
                ],
            )),
            Self::Substring(needle) => Ok(SqlFragment::new(
                "instr(json_extract(c.data, '$.text'), ?) > 0",
                vec![SqlValue::Text(needle.clone())],
            )),
            Self::LayerNgram {
                layer,
                attribute,
                alternatives,
            } => layer_ngram(ctx, layer, attribute, alternatives),
            Self::And(parts) => {
                if parts.is_empty() {
                    return Ok(SqlFragment::constant(true));
                }
                let parts = parts.iter().map(|p| p.to_sql(ctx)).collect::<StoreResult<Vec<_>>>()?;
                Ok(SqlFragment::join(parts, " AND "))
            }
            Self::Or(parts) => {
                if parts.is_empty() {
                    return Ok(SqlFragment::constant(false));
                }
                let parts = parts.iter().map(|p| p.to_sql(ctx)).collect::<StoreResult<Vec<_>>>()?;
                Ok(SqlFragment::join(parts, " OR "))
            }
        }
    }
}

fn layer_attribute(
    ctx: &QueryContext<'_>,
    layer: &str,
    alternatives: &[Vec<(String, Value)>],
) -> StoreResult<SqlFragment> {
    let descriptor = ctx.descriptor(layer)?;
    let compact = descriptor.serialisation_module.as_deref() == Some(COMPACT_TAG);

    let mut params = Vec::new();
    let (source, mut conditions) = match descriptor.layer_type {
        LayerType::Attached => {
            params.push(SqlValue::Text(layer.to_string()));
            (
                "json_each(c.data, '$.layers') AS ly, json_each(ly.value, '$.spans') AS s, \
                 json_each(s.value, '$.annotations') AS a"
                    .to_string(),
                vec!["json_extract(ly.value, '$.name') = ?".to_string()],
            )
        }
        LayerType::Detached => (
            format!(
                "json_each({}.data, '$.spans') AS s, json_each(s.value, '$.annotations') AS a",
                ctx.alias(layer)?
            ),
            Vec::new(),
        ),
        LayerType::Fragmented => (
            format!(
                "{} AS f, json_each(f.data, '$.spans') AS s, json_each(s.value, '$.annotations') AS a",
                ctx.layer_table(descriptor)
            ),
            vec!["f.text_id = c.id".to_string()],
        ),
    };

    let mut disjuncts = Vec::with_capacity(alternatives.len());
    for conjunction in alternatives {
        let mut terms = Vec::with_capacity(conjunction.len());
        for (attribute, value) in conjunction {
            let position = descriptor
                .attributes
                .iter()
                .position(|a| a == attribute)
                .ok_or_else(|| ctx.conflict(layer, format!("layer has no attribute '{attribute}'")))?;
            let path = if compact {
                format!("$[{position}]")
            } else {
                format!("$.\"{}\"", attribute.replace('"', "\\\""))
            };
            terms.push(value_condition("a.value", path, value, &mut params));
        }
        if terms.is_empty() {
            disjuncts.push("1".to_string());
        } else {
            disjuncts.push(terms.join(" AND "));
        }
    }
    if !disjuncts.is_empty() {
        conditions.push(format!(
            "({})",
            disjuncts.iter().map(|d| format!("({d})")).collect::<Vec<_>>().join(" OR ")
        ));
    }
    let filter = if conditions.is_empty() {
        String::new()
    } else {
        format!(" WHERE {}", conditions.join(" AND "))
    };
    Ok(SqlFragment::new(format!("EXISTS (SELECT 1 FROM {source}{filter})"), params))
}

/// Equality of a JSON path below `target` with `value`.
fn value_condition(target: &str, path: String, value: &Value, params: &mut Vec<SqlValue>) -> String {
    match value {
        Value::Null => {
            params.push(SqlValue::Text(path));
            format!("json_type({target}, ?) = 'null'")
        }
        Value::Bool(b) => {
            params.push(SqlValue::Text(path));
            params.push(SqlValue::Text(if *b { "true" } else { "false" }.to_string()));
            format!("json_type({target}, ?) = ?")
        }
        Value::Array(_) | Value::Object(_) => {
            params.push(SqlValue::Text(path));
            params.push(SqlValue::Text(value.to_string()));
            format!("json_extract({target}, ?) = json(?)")
        }
        Value::Number(_) | Value::String(_) => {
            params.push(SqlValue::Text(path.clone()));
            params.push(SqlValue::Text(path));
            params.push(json_to_sql(value));
            let kind = if value.is_string() { "'text'" } else { "'integer', 'real'" };
            format!("(json_type({target}, ?) IN ({kind}) AND json_extract({target}, ?) = ?)")
        }
    }
}

fn metadata(ctx: &QueryContext<'_>, scope: MetaScope, column: &str, values: &[Value]) -> StoreResult<SqlFragment> {
    if values.is_empty() {
        return Ok(SqlFragment::constant(false));
    }
    match scope {
        MetaScope::Column => {
            let meta_type = ctx.info.meta.get(column).ok_or_else(|| {
                StrataError::invalid_argument(format!(
                    "collection '{}' has no meta column '{column}'",
                    ctx.info.name
                ))
            })?;
            let target = format!("c.{}", quote_ident(column));
            let mut parts = Vec::new();
            let mut params = Vec::new();
            if values.iter().any(Value::is_null) {
                parts.push(format!("{target} IS NULL"));
            }
            let concrete: Vec<&Value> = values.iter().filter(|v| !v.is_null()).collect();
            if !concrete.is_empty() {
                for value in &concrete {
                    params.push(meta_to_sql(column, meta_type, value)?);
                }
                parts.push(format!("{target} IN ({})", crate::sql::placeholders(concrete.len())));
            }
            Ok(SqlFragment::new(parts.join(" OR "), params))
        }
        MetaScope::Text => {
            let path = format!("$.meta.\"{}\"", column.replace('"', "\\\""));
            let mut params = Vec::new();
            let parts = values
                .iter()
                .map(|value| value_condition("c.data", path.clone(), value, &mut params))
                .collect::<Vec<_>>();
            Ok(SqlFragment::new(parts.join(" OR "), params))
        }
    }
}

fn layer_ngram(
    ctx: &QueryContext<'_>,
    layer: &str,
    attribute: &str,
    alternatives: &[Vec<String>],
) -> StoreResult<SqlFragment> {
    let descriptor = ctx.descriptor(layer)?;
    if descriptor.layer_type == LayerType::Attached {
        return Err(ctx.conflict(layer, "attached layers have no n-gram index"));
    }
    let table = ctx.layer_table(descriptor);
    let column = ngram_column(attribute);
    if !table_columns(ctx.conn, &table)?.contains(&column) {
        return Err(ctx.conflict(layer, format!("no n-gram index for attribute '{attribute}'")));
    }
    let column = quote_ident(&column);

    let (source, correlation) = match descriptor.layer_type {
        LayerType::Fragmented => (Some(table.to_string()), "f.text_id = c.id AND "),
        _ => (None, ""),
    };
    let owner = match &source {
        Some(_) => "f".to_string(),
        None => ctx.alias(layer)?.to_string(),
    };

    let mut params = Vec::new();
    let mut disjuncts = Vec::with_capacity(alternatives.len());
    for grams in alternatives {
        let terms: Vec<String> = grams
            .iter()
            .map(|gram| {
                params.push(SqlValue::Text(gram.clone()));
                format!("EXISTS (SELECT 1 FROM json_each({owner}.{column}) AS g WHERE g.value = ?)")
            })
            .collect();
        disjuncts.push(if terms.is_empty() { "1".to_string() } else { terms.join(" AND ") });
    }
    let condition = disjuncts.iter().map(|d| format!("({d})")).collect::<Vec<_>>().join(" OR ");
    let sql = match source {
        Some(table) => format!("EXISTS (SELECT 1 FROM {table} AS f WHERE {correlation}({condition}))"),
        None => format!("({condition})"),
    };
    Ok(SqlFragment::new(sql, params))
}
