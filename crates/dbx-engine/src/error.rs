use dbx_core::bus::BusError;
use dbx_core::error::DbxError;
use dbx_ledger::LedgerError;
use thiserror::Error;

/// Failure while processing one stream entry or one reconciliation step.
#[derive(Debug, Error)]
pub enum EngineError {
    /// The entry can never be processed; it is dropped, not retried.
    #[error("malformed: {0}")]
    Malformed(String),

    #[error(transparent)]
    Ledger(#[from] LedgerError),

    #[error(transparent)]
    Bus(#[from] BusError),

    #[error(transparent)]
    Exchange(#[from] DbxError),
}

impl EngineError {
    pub fn is_malformed(&self) -> bool {
        matches!(self, Self::Malformed(_))
    }
}

pub type Result<T> = std::result::Result<T, EngineError>;
