//! Buffered multi-row INSERT into one table.

use std::mem;

use rusqlite::types::Value as SqlValue;
use rusqlite::{params_from_iter, Connection};
use tracing::{debug, warn};

use strata_common::config::InsertConfig;
use strata_common::constants::MAX_BIND_PARAMETERS;
use strata_common::error::StrataError;

use crate::error::StoreResult;
use crate::lock::WriteLock;
use crate::sql::{column_list, placeholders, rendered_len, TableName};

/// Buffers rows for one table and writes them in multi-row INSERTs.
///
/// Pending rows are written by [`close`](Self::close) and dropped by
/// [`discard`](Self::discard). An inserter going out of scope without
/// either flushes its pending rows; a failure of that flush is logged.
#[derive(Debug)]
pub struct BufferedInsert<'c> {
    conn: &'c Connection,
    table: TableName,
    columns: Vec<String>,
    buffer: Vec<Vec<SqlValue>>,
    buffered_len: usize,
    buffer_size: usize,
    query_length_limit: usize,
    flushed_rows: usize,
    closed: bool,
}

impl<'c> BufferedInsert<'c> {
    /// Creates an inserter for `columns` of `table`.
    pub fn new(conn: &'c Connection, table: TableName, columns: Vec<String>, config: &InsertConfig) -> Self {
        Self {
            conn,
            table,
            columns,
            buffer: Vec::new(),
            buffered_len: 0,
            buffer_size: config.buffer_size.max(1),
            query_length_limit: config.query_length_limit,
            flushed_rows: 0,
            closed: false,
        }
    }

    /// Runs `body` with a fresh inserter, flushing on success and
    /// discarding pending rows on failure.
    pub fn scoped<T>(
        conn: &'c Connection,
        table: TableName,
        columns: Vec<String>,
        config: &InsertConfig,
        body: impl FnOnce(&mut Self) -> StoreResult<T>,
    ) -> StoreResult<T> {
        let mut inserter = Self::new(conn, table, columns, config);
        match body(&mut inserter) {
            Ok(value) => {
                inserter.close()?;
                Ok(value)
            }
            Err(err) => {
                inserter.discard();
                Err(err)
            }
        }
    }

    /// The target table.
    pub fn table(&self) -> &TableName {
        &self.table
    }

    /// Rows waiting for the next flush.
    pub fn pending(&self) -> usize {
        self.buffer.len()
    }

    /// Rows committed so far.
    pub fn flushed_rows(&self) -> usize {
        self.flushed_rows
    }

    /// Buffers a row and reports whether a flush is due.
    pub fn push(&mut self, row: Vec<SqlValue>) -> StoreResult<bool> {
        if row.len() != self.columns.len() {
            return Err(StrataError::internal(format!(
                "row has {} values, table {} expects {}",
                row.len(),
                self.table,
                self.columns.len()
            ))
            .into());
        }
        self.buffered_len += row.iter().map(rendered_len).sum::<usize>() + 4;
        self.buffer.push(row);
        Ok(self.buffer.len() >= self.buffer_size || self.buffered_len >= self.query_length_limit)
    }

    /// Buffers a row, flushing when a threshold is reached.
    pub fn insert(&mut self, row: Vec<SqlValue>) -> StoreResult<()> {
        if self.push(row)? {
            self.flush()?;
        }
        Ok(())
    }

    /// Writes and commits pending rows.
    pub fn flush(&mut self) -> StoreResult<usize> {
        self.flush_with(|_| Ok(()))
    }

    /// Writes and commits pending rows after running `before` under the
    /// same write lock. Nothing is committed if `before` fails.
    pub fn flush_with(&mut self, before: impl FnOnce(&Connection) -> StoreResult<()>) -> StoreResult<usize> {
        if self.buffer.is_empty() {
            return Ok(0);
        }
        let rows = mem::take(&mut self.buffer);
        self.buffered_len = 0;

        let lock = WriteLock::acquire(self.conn)?;
        before(&lock)?;
        let written = self.write(&lock, &rows)?;
        lock.commit()?;

        self.flushed_rows += written;
        debug!(table = %self.table, rows = written, total = self.flushed_rows, "flushed rows");
        Ok(written)
    }

    fn write(&self, conn: &Connection, rows: &[Vec<SqlValue>]) -> StoreResult<usize> {
        let per_statement = (MAX_BIND_PARAMETERS / self.columns.len().max(1)).max(1);
        let row_placeholders = format!("({})", placeholders(self.columns.len()));
        let mut written = 0;
        for chunk in rows.chunks(per_statement) {
            let sql = format!(
                "INSERT INTO {} ({}) VALUES {}",
                self.table,
                column_list(&self.columns),
                vec![row_placeholders.as_str(); chunk.len()].join(", ")
            );
            written += conn.execute(&sql, params_from_iter(chunk.iter().flatten()))?;
        }
        Ok(written)
    }

    /// Flushes pending rows and returns the number of rows committed in total.
    pub fn close(mut self) -> StoreResult<usize> {
        self.flush()?;
        self.closed = true;
        Ok(self.flushed_rows)
    }

    /// Drops pending rows and returns how many were dropped.
    pub fn discard(mut self) -> usize {
        self.clear()
    }

    /// Drops pending rows and marks the inserter closed.
    pub(crate) fn clear(&mut self) -> usize {
        self.closed = true;
        self.buffered_len = 0;
        let dropped = self.buffer.len();
        self.buffer.clear();
        dropped
    }
}

impl Drop for BufferedInsert<'_> {
    fn drop(&mut self) {
        if self.closed || self.buffer.is_empty() {
            return;
        }
        let rows = self.buffer.len();
        if let Err(err) = self.flush() {
            warn!(table = %self.table, rows, error = %err, "flush on drop failed, pending rows lost");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sql::Schema;
    use strata_common::error::ErrorCode;

    fn setup() -> (Connection, TableName) {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch("CREATE TABLE t (id INTEGER PRIMARY KEY, data TEXT NOT NULL)")
            .unwrap();
        (conn, TableName::new(Schema::Main, "t"))
    }

    fn config(buffer_size: usize) -> InsertConfig {
        InsertConfig {
            buffer_size,
            ..InsertConfig::default()
        }
    }

    fn row(id: i64) -> Vec<SqlValue> {
        vec![SqlValue::Integer(id), SqlValue::Text(format!("row {id}"))]
    }

    fn count(conn: &Connection) -> i64 {
        conn.query_row("SELECT COUNT(*) FROM t", [], |r| r.get(0)).unwrap()
    }

    #[test]
    fn test_flush_on_buffer_size() {
        let (conn, table) = setup();
        let mut inserter = BufferedInsert::new(&conn, table, vec!["id".into(), "data".into()], &config(3));
        for id in 0..7 {
            inserter.insert(row(id)).unwrap();
        }
        assert_eq!(inserter.flushed_rows(), 6);
        assert_eq!(inserter.pending(), 1);
        assert_eq!(count(&conn), 6);
        assert_eq!(inserter.close().unwrap(), 7);
        assert_eq!(count(&conn), 7);
    }

    #[test]
    fn test_flush_on_query_length() {
        let (conn, table) = setup();
        let config = InsertConfig {
            buffer_size: 1000,
            query_length_limit: 60,
            ..InsertConfig::default()
        };
        let mut inserter = BufferedInsert::new(&conn, table, vec!["id".into(), "data".into()], &config);
        inserter.insert(row(1)).unwrap();
        assert_eq!(inserter.flushed_rows(), 0);
        inserter.insert(row(2)).unwrap();
        assert_eq!(inserter.flushed_rows(), 2);
        inserter.close().unwrap();
    }

    #[test]
    fn test_failed_flush_is_atomic() {
        let (conn, table) = setup();
        let mut inserter = BufferedInsert::new(&conn, table, vec!["id".into(), "data".into()], &config(2));
        inserter.insert(row(1)).unwrap();
        inserter.insert(row(2)).unwrap();
        inserter.insert(row(3)).unwrap();
        let err = inserter.insert(row(3)).unwrap_err();
        assert_eq!(err.code(), ErrorCode::DuplicateKey);
        assert_eq!(inserter.flushed_rows(), 2);
        assert_eq!(count(&conn), 2);
        assert!(conn.is_autocommit());
    }

    #[test]
    fn test_scoped_discards_on_error() {
        let (conn, table) = setup();
        let result: StoreResult<()> = BufferedInsert::scoped(
            &conn,
            table,
            vec!["id".into(), "data".into()],
            &config(10),
            |inserter| {
                inserter.insert(row(1))?;
                Err(StrataError::internal("mapper failed").into())
            },
        );
        assert!(result.is_err());
        assert_eq!(count(&conn), 0);
    }

    #[test]
    fn test_many_rows_split_by_parameter_limit() {
        let (conn, table) = setup();
        let rows = (MAX_BIND_PARAMETERS / 2 + 10) as i64;
        let mut inserter = BufferedInsert::new(
            &conn,
            table,
            vec!["id".into(), "data".into()],
            &config(usize::MAX),
        );
        for id in 0..rows {
            inserter.push(row(id)).unwrap();
        }
        assert_eq!(inserter.close().unwrap() as i64, rows);
        assert_eq!(count(&conn), rows);
    }

    #[test]
    fn test_drop_flushes_pending_rows() {
        let (conn, table) = setup();
        {
            let mut inserter = BufferedInsert::new(&conn, table, vec!["id".into(), "data".into()], &config(10));
            inserter.insert(row(1)).unwrap();
            inserter.insert(row(2)).unwrap();
            assert_eq!(count(&conn), 0);
        }
        assert_eq!(count(&conn), 2);
    }

    #[test]
    fn test_discard_skips_drop_flush() {
        let (conn, table) = setup();
        let mut inserter = BufferedInsert::new(&conn, table, vec!["id".into(), "data".into()], &config(10));
        inserter.insert(row(1)).unwrap();
        assert_eq!(inserter.discard(), 1);
        assert_eq!(count(&conn), 0);
    }

    #[test]
    fn test_arity_checked() {
        let (conn, table) = setup();
        let mut inserter = BufferedInsert::new(&conn, table, vec!["id".into(), "data".into()], &config(10));
        assert!(inserter.push(vec![SqlValue::Integer(1)]).is_err());
        inserter.discard();
    }
}
