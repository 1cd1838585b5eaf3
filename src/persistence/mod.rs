//! Relational mirror persistence.
//!
//! `MirrorRepository` is the boundary the sync core writes through. Saves are idempotent: an
//! existing block or transaction is left untouched, and topology rows are upserted.

/// In-memory mirror with duplicate-ignoring saves
mod memory;
/// JSON snapshot of the in-memory mirror on disk
mod file;
/// Row types
mod rows;

pub use file::FileMirrorRepository;
pub use memory::InMemoryMirrorRepository;
pub use rows::*;

/// Repository for the mirrored channels, topology, blocks and transactions
#[async_trait::async_trait]
pub trait MirrorRepository: Send + Sync {
	/// Number of channel rows stored under `name`, across all genesis hashes.
	async fn channel_exists(&self, name: &str) -> Result<u64, RepositoryError>;

	async fn get_channel(
		&self,
		name: &str,
		genesis_hash: &str,
	) -> Result<Option<ChannelRow>, RepositoryError>;

	async fn save_channel(&self, row: ChannelRow) -> Result<(), RepositoryError>;

	async fn save_peer(&self, row: PeerRow) -> Result<(), RepositoryError>;

	async fn save_peer_channel_ref(&self, row: PeerChannelRef) -> Result<(), RepositoryError>;

	async fn save_chaincode(&self, row: ChaincodeRow) -> Result<(), RepositoryError>;

	async fn save_chaincode_peer_ref(&self, row: ChaincodePeerRef)
	-> Result<(), RepositoryError>;

	/// Store a block. Returns `false` when the block was already stored.
	async fn save_block(&self, row: BlockRow) -> Result<bool, RepositoryError>;

	async fn save_transaction(&self, row: TransactionRow) -> Result<(), RepositoryError>;

	async fn last_block_number(&self, genesis_hash: &str) -> Result<Option<u64>, RepositoryError>;

	/// Block numbers in `0..=max_block` with no stored block, ascending.
	async fn find_missing_block_numbers(
		&self,
		genesis_hash: &str,
		max_block: u64,
	) -> Result<Vec<u64>, RepositoryError>;
}

/// Error types for mirror persistence
#[derive(Debug, thiserror::Error)]
pub enum RepositoryError {
	#[error("IO error: {0}")]
	Io(#[from] std::io::Error),

	#[error("Serialization error: {0}")]
	Json(#[from] serde_json::Error),
}
