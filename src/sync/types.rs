use crate::ledger::LedgerError;
use crate::persistence::RepositoryError;

/// Error types for channel synchronization
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
	#[error("Ledger error: {0}")]
	Ledger(#[from] LedgerError),

	#[error("Repository error: {0}")]
	Repository(#[from] RepositoryError),

	#[error("Channel {name} already exists with a different genesis hash than {genesis_hash}")]
	DuplicateChannel { name: String, genesis_hash: String },

	#[error("Malformed block: {0}")]
	MalformedBlock(String),

	#[error("Unknown channel: {0}")]
	UnknownChannel(String),
}
