//! Write locking.
//!
//! All structure changes and row flushes run inside a [`WriteLock`]. At
//! the outermost level it is an immediate transaction, which takes the
//! database's reserved lock up front: concurrent writers on other
//! connections wait up to the busy timeout and then fail with a
//! concurrent-modification error. Nested inside an open transaction it
//! is a savepoint, so a nested section can roll back alone.
//!
//! # Lock Compatibility
//!
//! ```text
//!               │ reader │ writer │
//! ──────────────┼────────┼────────┤
//!     reader    │   ✓    │   ✓    │   (WAL journal)
//!     writer    │   ✓    │   ✗    │
//! ```
//!
//! Dropping a lock without committing rolls back everything done under it.

use std::ops::Deref;

use rusqlite::Connection;
use tracing::warn;

use crate::error::StoreResult;

const SAVEPOINT: &str = "strata_write";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Scope {
    Transaction,
    Savepoint,
}

/// An exclusive write section on a connection.
#[derive(Debug)]
pub struct WriteLock<'c> {
    conn: &'c Connection,
    scope: Scope,
    finished: bool,
}

impl<'c> WriteLock<'c> {
    /// Acquires the write lock, waiting up to the connection's busy timeout.
    pub fn acquire(conn: &'c Connection) -> StoreResult<Self> {
        let scope = if conn.is_autocommit() {
            conn.execute_batch("BEGIN IMMEDIATE")?;
            Scope::Transaction
        } else {
            conn.execute_batch(&format!("SAVEPOINT {SAVEPOINT}"))?;
            Scope::Savepoint
        };
        Ok(Self {
            conn,
            scope,
            finished: false,
        })
    }

    /// Whether this lock is nested inside an outer transaction.
    pub fn is_nested(&self) -> bool {
        self.scope == Scope::Savepoint
    }

    /// Commits everything done under the lock and releases it.
    pub fn commit(mut self) -> StoreResult<()> {
        self.finished = true;
        let sql = match self.scope {
            Scope::Transaction => "COMMIT".to_string(),
            Scope::Savepoint => format!("RELEASE {SAVEPOINT}"),
        };
        if let Err(err) = self.conn.execute_batch(&sql) {
            self.finished = false;
            return Err(err.into());
        }
        Ok(())
    }

    /// Discards everything done under the lock and releases it.
    pub fn rollback(mut self) -> StoreResult<()> {
        self.finished = true;
        self.conn.execute_batch(&self.rollback_sql())?;
        Ok(())
    }

    fn rollback_sql(&self) -> String {
        match self.scope {
            Scope::Transaction => "ROLLBACK".to_string(),
            Scope::Savepoint => format!("ROLLBACK TO {SAVEPOINT}; RELEASE {SAVEPOINT}"),
        }
    }
}

impl Deref for WriteLock<'_> {
    type Target = Connection;

    fn deref(&self) -> &Connection {
        self.conn
    }
}

impl Drop for WriteLock<'_> {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        // A failed COMMIT may already have ended the transaction.
        if self.scope == Scope::Transaction && self.conn.is_autocommit() {
            return;
        }
        if let Err(err) = self.conn.execute_batch(&self.rollback_sql()) {
            warn!(error = %err, "failed to roll back write lock");
        }
    }
}
