//! Error types for cm-db

use cm_core::MigrateError;
use thiserror::Error;

/// DuckDB operation errors
#[derive(Error, Debug)]
pub enum DbError {
    /// Connection error (D001)
    #[error("[D001] Database connection failed: {0}")]
    ConnectionError(String),

    /// Query execution error (D002)
    #[error("[D002] SQL execution failed: {0}")]
    ExecutionError(String),

    /// Table not found (D003)
    #[error("[D003] Table or view not found: {0}")]
    TableNotFound(String),

    /// Key constraint or write-write conflict (D004)
    #[error("[D004] Write conflict: {0}")]
    Conflict(String),
}

/// Result type alias for DbError
pub type DbResult<T> = Result<T, DbError>;

impl DbError {
    /// Convert into the migration error of the failing operation
    pub fn into_migrate(self, kind: fn(String) -> MigrateError) -> MigrateError {
        kind(self.to_string())
    }

    /// Classify a DuckDB error message.
    ///
    /// Concurrent writers can be rejected at commit time ("Failed to commit:
    /// PRIMARY KEY or UNIQUE constraint violation", "write-write conflict"),
    /// and those are conflicts too.
    pub fn classify(msg: String) -> Self {
        let lower = msg.to_ascii_lowercase();
        if lower.contains("table with name")
            || lower.contains("table or view with name")
            || (lower.contains("catalog error")
                && lower.contains("table")
                && lower.contains("not found"))
        {
            DbError::TableNotFound(msg)
        } else if lower.contains("constraint error")
            || lower.contains("constraint violation")
            || lower.contains("duplicate key")
            || lower.contains("conflict")
        {
            DbError::Conflict(msg)
        } else {
            DbError::ExecutionError(msg)
        }
    }

    /// Whether retrying the statement may succeed
    pub fn is_conflict(&self) -> bool {
        matches!(self, DbError::Conflict(_))
    }
}

impl From<duckdb::Error> for DbError {
    fn from(err: duckdb::Error) -> Self {
        // duckdb::Error does not expose structured variants, so the message
        // is the only thing to classify on.
        DbError::classify(err.to_string())
    }
}
