//! Buffered row insertion.
//!
//! Rows are buffered in memory and written in batches. A batch is flushed
//! when it reaches the configured row count or approximate statement
//! length, and on close. Each flush runs under the write lock and commits
//! on its own: a flush is all-or-nothing, rows of earlier flushes stay
//! committed when a later one fails.

mod buffered;
mod document;
mod layer;

pub use buffered::BufferedInsert;
pub use document::{DocumentInserter, DocumentRow, InsertSummary};
pub use layer::LayerInserter;
pub(crate) use layer::ngram_column;

use std::fmt::Display;

use tracing::warn;

/// Logs the first few occurrences of a repeated warning, then a summary.
#[derive(Debug)]
pub(crate) struct BoundedWarning {
    what: &'static str,
    limit: usize,
    count: usize,
}

impl BoundedWarning {
    pub(crate) fn new(what: &'static str, limit: usize) -> Self {
        Self {
            what,
            limit,
            count: 0,
        }
    }

    /// Records one occurrence.
    pub(crate) fn note(&mut self, detail: impl Display) {
        self.count += 1;
        if self.count <= self.limit {
            warn!("{}: {}", self.what, detail);
        }
    }

    /// Number of occurrences so far.
    pub(crate) fn count(&self) -> usize {
        self.count
    }

    /// Logs the number of suppressed occurrences, if any.
    pub(crate) fn finish(&self) {
        if self.count > self.limit {
            warn!(
                "{}: {} further occurrences not shown, {} in total",
                self.what,
                self.count - self.limit,
                self.count
            );
        }
    }
}
