//! Store error types.

use thiserror::Error;

use strata_common::error::{ErrorCode, StrataError};
use strata_common::types::DocumentId;

/// Errors returned by store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// A structural, dependency, or validation error.
    #[error(transparent)]
    Strata(#[from] StrataError),

    /// An error reported by SQLite.
    #[error("sqlite error: {0}")]
    Sqlite(rusqlite::Error),

    /// Bulk ingestion or annotation stopped on a failing document.
    #[error(
        "ingestion failed at document {document_id:?}{} after {flushed} flushed rows: {source}",
        batch_note(.failed_batch)
    )]
    Ingestion {
        /// Rows committed before the failure.
        flushed: usize,
        /// The document being processed when the failure occurred.
        document_id: Option<DocumentId>,
        /// Smallest and largest id of a batch whose flush failed. Any row
        /// of it may have caused the failure.
        failed_batch: Option<(DocumentId, DocumentId)>,
        /// The underlying error.
        #[source]
        source: Box<StoreError>,
    },
}

impl StoreError {
    /// Returns the error code for this error.
    #[must_use]
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::Strata(err) => err.code(),
            Self::Sqlite(err) if is_duplicate_key(err) => ErrorCode::DuplicateKey,
            Self::Sqlite(_) => ErrorCode::Backend,
            Self::Ingestion { .. } => ErrorCode::IngestionFailed,
        }
    }

    /// Returns the innermost error, looking through ingestion wrappers.
    #[must_use]
    pub fn root(&self) -> &StoreError {
        match self {
            Self::Ingestion { source, .. } => source.root(),
            other => other,
        }
    }

    /// Returns the code of the innermost error.
    #[must_use]
    pub fn root_code(&self) -> ErrorCode {
        self.root().code()
    }

    /// Returns true if retrying the operation may succeed.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self.root(), Self::Strata(err) if err.is_retryable())
    }

    /// Wraps an error with ingestion progress.
    pub(crate) fn ingestion(self, flushed: usize, document_id: Option<DocumentId>) -> Self {
        Self::Ingestion {
            flushed,
            document_id,
            failed_batch: None,
            source: Box::new(self),
        }
    }

    /// Records the id range of the batch whose flush failed.
    pub(crate) fn with_failed_batch(mut self, batch: Option<(DocumentId, DocumentId)>) -> Self {
        if let Self::Ingestion { failed_batch, .. } = &mut self {
            *failed_batch = batch;
        }
        self
    }
}

fn batch_note(batch: &Option<(DocumentId, DocumentId)>) -> String {
    match batch {
        Some((first, last)) => format!(" (failed batch of ids {first}..={last})"),
        None => String::new(),
    }
}

impl From<rusqlite::Error> for StoreError {
    fn from(err: rusqlite::Error) -> Self {
        match err.sqlite_error_code() {
            Some(rusqlite::ErrorCode::DatabaseBusy | rusqlite::ErrorCode::DatabaseLocked) => {
                Self::Strata(StrataError::concurrent_modification(err.to_string()))
            }
            _ => Self::Sqlite(err),
        }
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        Self::Strata(err.into())
    }
}

fn is_duplicate_key(err: &rusqlite::Error) -> bool {
    match err {
        rusqlite::Error::SqliteFailure(failure, _) => matches!(
            failure.extended_code,
            rusqlite::ffi::SQLITE_CONSTRAINT_PRIMARYKEY | rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE
        ),
        _ => false,
    }
}

/// Result type alias for store operations.
pub type StoreResult<T> = std::result::Result<T, StoreError>;

#[cfg(test)]
mod tests {
    use super::*;
    use rusqlite::Connection;

    #[test]
    fn test_duplicate_key_code() {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch("CREATE TABLE t (id INTEGER PRIMARY KEY); INSERT INTO t VALUES (1);")
            .unwrap();
        let err: StoreError = conn.execute("INSERT INTO t VALUES (1)", []).unwrap_err().into();
        assert_eq!(err.code(), ErrorCode::DuplicateKey);
        assert_eq!(err.code().category(), "Backend");
    }

    #[test]
    fn test_ingestion_root() {
        let inner = StoreError::from(StrataError::row_shape_mismatch("words", "attributes differ"));
        let err = inner.ingestion(8, Some(DocumentId::new(9)));
        assert_eq!(err.code(), ErrorCode::IngestionFailed);
        assert_eq!(err.root_code(), ErrorCode::RowShapeMismatch);
        assert!(err.to_string().contains("after 8 flushed rows"));
        match err {
            StoreError::Ingestion {
                flushed,
                document_id,
                ..
            } => {
                assert_eq!(flushed, 8);
                assert_eq!(document_id, Some(DocumentId::new(9)));
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn test_ingestion_failed_batch_in_message() {
        let inner = StoreError::from(StrataError::internal("constraint failed"));
        let err = inner
            .ingestion(2, Some(DocumentId::new(7)))
            .with_failed_batch(Some((DocumentId::new(4), DocumentId::new(7))));
        assert!(err.to_string().contains("failed batch of ids 4..=7"));
    }

    #[test]
    fn test_retryable_through_wrapper() {
        let err = StoreError::from(StrataError::concurrent_modification("busy")).ingestion(0, None);
        assert!(err.is_retryable());
    }
}
