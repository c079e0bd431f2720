//! Output formatting for command results.
//!
//! Supports table, JSON, and CSV output formats.

use comfy_table::{Cell, ContentArrangement, Table};
use serde_json::Value;

/// Output format options.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    /// Formatted table output.
    Table,
    /// One JSON object per line.
    Json,
    /// CSV output.
    Csv,
}

impl std::str::FromStr for OutputFormat {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "table" => Ok(Self::Table),
            "json" => Ok(Self::Json),
            "csv" => Ok(Self::Csv),
            other => Err(anyhow::anyhow!("unknown output format '{other}'")),
        }
    }
}

/// Rows of a command result.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Rows {
    /// Column names.
    pub columns: Vec<String>,
    /// Row values, one per column.
    pub rows: Vec<Vec<Value>>,
}

impl Rows {
    /// Creates an empty result with the given columns.
    pub fn new<I, S>(columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            columns: columns.into_iter().map(Into::into).collect(),
            rows: Vec::new(),
        }
    }

    /// Appends a row.
    pub fn push(&mut self, row: Vec<Value>) {
        self.rows.push(row);
    }
}

/// Formats rows according to the specified format.
pub fn format_rows(rows: &Rows, format: OutputFormat) -> String {
    match format {
        OutputFormat::Table => format_table(rows),
        OutputFormat::Json => format_json(rows),
        OutputFormat::Csv => format_csv(rows),
    }
}

/// Renders a value as cell text; strings are shown without quotes.
fn cell_text(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn format_table(rows: &Rows) -> String {
    let mut table = Table::new();

    table
        .set_content_arrangement(ContentArrangement::Dynamic)
        .load_preset(comfy_table::presets::UTF8_FULL)
        .apply_modifier(comfy_table::modifiers::UTF8_ROUND_CORNERS);

    if !rows.columns.is_empty() {
        table.set_header(rows.columns.iter().map(Cell::new));
    }
    for row in &rows.rows {
        table.add_row(row.iter().map(|v| Cell::new(cell_text(v))));
    }

    table.to_string()
}

fn format_json(rows: &Rows) -> String {
    let mut output = String::new();
    for row in &rows.rows {
        let mut object = serde_json::Map::new();
        for (i, value) in row.iter().enumerate() {
            let column = rows
                .columns
                .get(i)
                .cloned()
                .unwrap_or_else(|| format!("column_{i}"));
            object.insert(column, value.clone());
        }
        output.push_str(&Value::Object(object).to_string());
        output.push('\n');
    }
    output
}

fn format_csv(rows: &Rows) -> String {
    let mut output = String::new();

    if !rows.columns.is_empty() {
        let header: Vec<String> = rows.columns.iter().map(|c| escape_csv(c)).collect();
        output.push_str(&header.join(","));
        output.push('\n');
    }
    for row in &rows.rows {
        let values: Vec<String> = row.iter().map(|v| escape_csv(&cell_text(v))).collect();
        output.push_str(&values.join(","));
        output.push('\n');
    }

    output
}

/// Escapes a value for CSV output.
fn escape_csv(value: &str) -> String {
    if value.contains(',') || value.contains('"') || value.contains('\n') || value.contains('\r') {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}
