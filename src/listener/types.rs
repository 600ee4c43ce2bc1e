use crate::ledger::LedgerError;
use crate::store::StoreError;

/// Errors that fail a whole listener cycle
#[derive(Debug, thiserror::Error)]
pub enum ListenerError {
	#[error("Ledger error: {0}")]
	LedgerError(#[from] LedgerError),

	#[error("Store error: {0}")]
	StoreError(#[from] StoreError),

	#[error("Persistence error: {0}")]
	PersistenceError(String),

	#[error("IO error: {0}")]
	IoError(#[from] std::io::Error),
}
