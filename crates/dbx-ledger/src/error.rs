//! Ledger error type.

use rusqlite::ErrorCode;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("sqlite: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// A stored value could not be decoded into its domain type.
    #[error("corrupt value in {table}.{column}: {reason}")]
    Corrupt { table: &'static str, column: &'static str, reason: String },

    /// The requested operation does not apply to the given table/field.
    #[error("invalid ledger operation: {0}")]
    Invalid(String),

    #[error("ledger worker failed: {0}")]
    Worker(String),
}

impl LedgerError {
    /// Transient lock contention; the same statement may succeed on retry.
    pub fn is_busy(&self) -> bool {
        match self {
            Self::Sqlite(rusqlite::Error::SqliteFailure(e, _)) => {
                matches!(e.code, ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked)
            }
            _ => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, LedgerError>;
