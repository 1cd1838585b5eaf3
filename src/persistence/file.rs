use super::memory::{InMemoryMirrorRepository, MirrorSnapshot};
use super::rows::*;
use super::{MirrorRepository, RepositoryError};

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

const SNAPSHOT_FILE: &str = "mirror.json";
const METADATA_FILE: &str = "mirror.meta.json";
const JOURNAL_FILE: &str = "mirror.journal";

/// One saved row, as appended to the journal.
#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "table", content = "row", rename_all = "snake_case")]
enum JournalRecord {
	Channel(ChannelRow),
	Peer(PeerRow),
	PeerRef(PeerChannelRef),
	Chaincode(ChaincodeRow),
	ChaincodeRef(ChaincodePeerRef),
	Block(BlockRow),
	Transaction(TransactionRow),
}

struct Journal {
	file: File,
	/// Records appended since the last compaction.
	records: usize,
}

/// File-based implementation of MirrorRepository
///
/// Rows live in an `InMemoryMirrorRepository`. Every save appends one JSON line to
/// `mirror.journal`; once `compact_every` records have accumulated the whole mirror is written to
/// `mirror.json` and the journal is truncated. Opening loads the snapshot and replays the journal.
pub struct FileMirrorRepository {
	data_dir: PathBuf,
	inner: InMemoryMirrorRepository,
	journal: Mutex<Journal>,
	compact_every: usize,
}

impl FileMirrorRepository {
	/// Open the mirror in `data_dir`, loading an existing snapshot and journal if present.
	pub async fn open(data_dir: PathBuf, compact_every: usize) -> Result<Self, RepositoryError> {
		tokio::fs::create_dir_all(&data_dir).await?;

		let filename = data_dir.join(SNAPSHOT_FILE);
		let inner = match tokio::fs::read_to_string(&filename).await {
			Ok(content) => {
				let snapshot: MirrorSnapshot = serde_json::from_str(&content)?;
				info!(
					"Loaded mirror from {:?}: {} channels, {} blocks, {} transactions",
					filename,
					snapshot.channels.len(),
					snapshot.blocks.len(),
					snapshot.transactions.len()
				);
				InMemoryMirrorRepository::from_snapshot(snapshot)
			}
			Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
				info!("No mirror found in {:?}, starting empty", data_dir);
				InMemoryMirrorRepository::new()
			}
			Err(e) => return Err(e.into()),
		};

		let replayed = replay_journal(&data_dir.join(JOURNAL_FILE), &inner).await?;
		if replayed > 0 {
			info!("Replayed {} journal records", replayed);
			write_snapshot(&data_dir, &inner).await?;
		}

		let file = OpenOptions::new()
			.create(true)
			.append(true)
			.open(data_dir.join(JOURNAL_FILE))
			.await?;
		if replayed > 0 {
			file.set_len(0).await?;
		}

		Ok(Self {
			data_dir,
			inner,
			journal: Mutex::new(Journal { file, records: 0 }),
			compact_every: compact_every.max(1),
		})
	}

	/// Append a record, compacting once the journal is long enough.
	///
	/// The row is already in `inner`, so any record still in the journal at compaction time is
	/// covered by the snapshot.
	async fn append(&self, record: JournalRecord) -> Result<(), RepositoryError> {
		let mut line = serde_json::to_vec(&record)?;
		line.push(b'\n');

		let mut journal = self.journal.lock().await;
		journal.file.write_all(&line).await?;
		journal.file.flush().await?;
		journal.records += 1;

		if journal.records >= self.compact_every {
			write_snapshot(&self.data_dir, &self.inner).await?;
			journal.file.set_len(0).await?;
			journal.records = 0;
		}
		Ok(())
	}
}

async fn replay_journal(
	path: &Path,
	inner: &InMemoryMirrorRepository,
) -> Result<usize, RepositoryError> {
	let content = match tokio::fs::read_to_string(path).await {
		Ok(content) => content,
		Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
		Err(e) => return Err(e.into()),
	};

	let lines: Vec<&str> = content.lines().filter(|line| !line.is_empty()).collect();
	let mut replayed = 0;
	for (index, line) in lines.iter().enumerate() {
		let record: JournalRecord = match serde_json::from_str(line) {
			Ok(record) => record,
			Err(e) if index + 1 == lines.len() => {
				warn!("Dropping torn journal record: {}", e);
				break;
			}
			Err(e) => return Err(e.into()),
		};
		match record {
			JournalRecord::Channel(row) => inner.save_channel(row).await?,
			JournalRecord::Peer(row) => inner.save_peer(row).await?,
			JournalRecord::PeerRef(row) => inner.save_peer_channel_ref(row).await?,
			JournalRecord::Chaincode(row) => inner.save_chaincode(row).await?,
			JournalRecord::ChaincodeRef(row) => inner.save_chaincode_peer_ref(row).await?,
			JournalRecord::Block(row) => {
				inner.save_block(row).await?;
			}
			JournalRecord::Transaction(row) => inner.save_transaction(row).await?,
		}
		replayed += 1;
	}
	Ok(replayed)
}

async fn write_snapshot(
	data_dir: &Path,
	inner: &InMemoryMirrorRepository,
) -> Result<(), RepositoryError> {
	let snapshot = inner.snapshot().await;

	// Create metadata
	let metadata = serde_json::json!({
		"channels": snapshot.channels.len(),
		"blocks": snapshot.blocks.len(),
		"timestamp": chrono::Utc::now().to_rfc3339(),
	});

	let filename = data_dir.join(SNAPSHOT_FILE);
	let staging = data_dir.join(format!("{}.tmp", SNAPSHOT_FILE));
	tokio::fs::write(&staging, serde_json::to_vec(&snapshot)?).await?;
	tokio::fs::rename(&staging, &filename).await?;

	tokio::fs::write(
		data_dir.join(METADATA_FILE),
		serde_json::to_string_pretty(&metadata)?,
	)
	.await?;

	debug!("Compacted mirror into {:?}", filename);
	Ok(())
}

#[async_trait::async_trait]
impl MirrorRepository for FileMirrorRepository {
	async fn channel_exists(&self, name: &str) -> Result<u64, RepositoryError> {
		self.inner.channel_exists(name).await
	}

	async fn get_channel(
		&self,
		name: &str,
		genesis_hash: &str,
	) -> Result<Option<ChannelRow>, RepositoryError> {
		self.inner.get_channel(name, genesis_hash).await
	}

	async fn save_channel(&self, row: ChannelRow) -> Result<(), RepositoryError> {
		self.inner.save_channel(row.clone()).await?;
		self.append(JournalRecord::Channel(row)).await
	}

	async fn save_peer(&self, row: PeerRow) -> Result<(), RepositoryError> {
		self.inner.save_peer(row.clone()).await?;
		self.append(JournalRecord::Peer(row)).await
	}

	async fn save_peer_channel_ref(&self, row: PeerChannelRef) -> Result<(), RepositoryError> {
		self.inner.save_peer_channel_ref(row.clone()).await?;
		self.append(JournalRecord::PeerRef(row)).await
	}

	async fn save_chaincode(&self, row: ChaincodeRow) -> Result<(), RepositoryError> {
		self.inner.save_chaincode(row.clone()).await?;
		self.append(JournalRecord::Chaincode(row)).await
	}

	async fn save_chaincode_peer_ref(
		&self,
		row: ChaincodePeerRef,
	) -> Result<(), RepositoryError> {
		self.inner.save_chaincode_peer_ref(row.clone()).await?;
		self.append(JournalRecord::ChaincodeRef(row)).await
	}

	async fn save_block(&self, row: BlockRow) -> Result<bool, RepositoryError> {
		let inserted = self.inner.save_block(row.clone()).await?;
		if inserted {
			self.append(JournalRecord::Block(row)).await?;
		}
		Ok(inserted)
	}

	async fn save_transaction(&self, row: TransactionRow) -> Result<(), RepositoryError> {
		self.inner.save_transaction(row.clone()).await?;
		self.append(JournalRecord::Transaction(row)).await
	}

	async fn last_block_number(&self, genesis_hash: &str) -> Result<Option<u64>, RepositoryError> {
		self.inner.last_block_number(genesis_hash).await
	}

	async fn find_missing_block_numbers(
		&self,
		genesis_hash: &str,
		max_block: u64,
	) -> Result<Vec<u64>, RepositoryError> {
		self.inner
			.find_missing_block_numbers(genesis_hash, max_block)
			.await
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn channel() -> ChannelRow {
		ChannelRow {
			name: "mychannel".to_string(),
			genesis_block_hash: "gen".to_string(),
			channel_hash: String::new(),
			create_date: Some("2024-01-01T00:00:00Z".to_string()),
			channel_version: 1,
			blocks: 0,
			trans: 0,
		}
	}

	fn block(number: u64) -> BlockRow {
		BlockRow {
			blocknum: number,
			datahash: "data".to_string(),
			prehash: "prev".to_string(),
			txcount: 0,
			blockhash: format!("hash{}", number),
			channel_genesis_hash: "gen".to_string(),
			createdt: None,
		}
	}

	async fn journal_lines(dir: &Path) -> usize {
		tokio::fs::read_to_string(dir.join(JOURNAL_FILE))
			.await
			.unwrap()
			.lines()
			.count()
	}

	async fn open(dir: &Path, compact_every: usize) -> FileMirrorRepository {
		FileMirrorRepository::open(dir.to_path_buf(), compact_every)
			.await
			.unwrap()
	}

	#[tokio::test]
	async fn reopening_restores_saved_rows() {
		let dir = tempfile::tempdir().unwrap();

		let repo = open(dir.path(), 1000).await;
		repo.save_channel(channel()).await.unwrap();
		repo.save_block(block(0)).await.unwrap();
		repo.save_block(block(1)).await.unwrap();
		drop(repo);

		let reopened = open(dir.path(), 1000).await;
		assert_eq!(reopened.channel_exists("mychannel").await.unwrap(), 1);
		assert_eq!(reopened.last_block_number("gen").await.unwrap(), Some(1));
		assert_eq!(
			reopened
				.get_channel("mychannel", "gen")
				.await
				.unwrap()
				.map(|row| row.blocks),
			Some(2)
		);
		assert!(dir.path().join(SNAPSHOT_FILE).exists());
		assert!(dir.path().join(METADATA_FILE).exists());
		assert_eq!(journal_lines(dir.path()).await, 0);
	}

	#[tokio::test]
	async fn saves_are_journaled_until_the_compaction_threshold() {
		let dir = tempfile::tempdir().unwrap();
		let repo = open(dir.path(), 4).await;

		repo.save_channel(channel()).await.unwrap();
		repo.save_block(block(0)).await.unwrap();
		repo.save_block(block(1)).await.unwrap();
		assert_eq!(journal_lines(dir.path()).await, 3);
		assert!(!dir.path().join(SNAPSHOT_FILE).exists());

		repo.save_block(block(1)).await.unwrap();
		assert_eq!(journal_lines(dir.path()).await, 3);

		repo.save_block(block(2)).await.unwrap();
		assert_eq!(journal_lines(dir.path()).await, 0);
		assert!(dir.path().join(SNAPSHOT_FILE).exists());

		repo.save_block(block(3)).await.unwrap();
		drop(repo);

		let reopened = open(dir.path(), 4).await;
		assert_eq!(reopened.last_block_number("gen").await.unwrap(), Some(3));
		assert_eq!(
			reopened.find_missing_block_numbers("gen", 3).await.unwrap(),
			Vec::<u64>::new()
		);
	}

	#[tokio::test]
	async fn torn_tail_records_are_dropped() {
		let dir = tempfile::tempdir().unwrap();
		let repo = open(dir.path(), 1000).await;
		repo.save_channel(channel()).await.unwrap();
		repo.save_block(block(0)).await.unwrap();
		drop(repo);

		let mut journal = OpenOptions::new()
			.append(true)
			.open(dir.path().join(JOURNAL_FILE))
			.await
			.unwrap();
		journal
			.write_all(br#"{"table":"block","row":{"blocknum":1"#)
			.await
			.unwrap();
		journal.flush().await.unwrap();
		drop(journal);

		let reopened = open(dir.path(), 1000).await;
		assert_eq!(reopened.last_block_number("gen").await.unwrap(), Some(0));
	}

	#[tokio::test]
	async fn opening_an_empty_directory_starts_empty() {
		let dir = tempfile::tempdir().unwrap();
		let repo = open(&dir.path().join("nested"), 1000).await;
		assert_eq!(
			repo.find_missing_block_numbers("gen", 2).await.unwrap(),
			vec![0, 1, 2]
		);
	}
}
