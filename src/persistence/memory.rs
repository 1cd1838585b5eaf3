use super::rows::*;
use super::{MirrorRepository, RepositoryError};

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use tokio::sync::RwLock;
use tracing::debug;

type ChannelKey = (String, String);
type NodeKey = (String, String);
type ChaincodeKey = (String, String, String);
type BlockKey = (String, u64);
type TransactionKey = (String, u64, String);

#[derive(Debug, Default)]
struct MirrorTables {
	channels: BTreeMap<ChannelKey, ChannelRow>,
	peers: BTreeMap<NodeKey, PeerRow>,
	peer_refs: BTreeSet<PeerChannelRef>,
	chaincodes: BTreeMap<ChaincodeKey, ChaincodeRow>,
	chaincode_refs: BTreeSet<ChaincodePeerRef>,
	blocks: BTreeMap<BlockKey, BlockRow>,
	transactions: BTreeMap<TransactionKey, TransactionRow>,
}

/// Flat, serializable copy of every table.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MirrorSnapshot {
	pub channels: Vec<ChannelRow>,
	pub peers: Vec<PeerRow>,
	pub peer_refs: Vec<PeerChannelRef>,
	pub chaincodes: Vec<ChaincodeRow>,
	pub chaincode_refs: Vec<ChaincodePeerRef>,
	pub blocks: Vec<BlockRow>,
	pub transactions: Vec<TransactionRow>,
}

/// Mirror kept in process memory.
///
/// Blocks and transactions are write-once; a second save of the same identity is ignored. Peer and
/// chaincode rows are upserted, keeping the chaincode's transaction count.
#[derive(Debug, Default)]
pub struct InMemoryMirrorRepository {
	tables: RwLock<MirrorTables>,
}

impl InMemoryMirrorRepository {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn from_snapshot(snapshot: MirrorSnapshot) -> Self {
		let mut tables = MirrorTables::default();
		for row in snapshot.channels {
			tables
				.channels
				.insert((row.name.clone(), row.genesis_block_hash.clone()), row);
		}
		for row in snapshot.peers {
			tables.peers.insert(
				(row.server_hostname.clone(), row.channel_genesis_hash.clone()),
				row,
			);
		}
		tables.peer_refs.extend(snapshot.peer_refs);
		for row in snapshot.chaincodes {
			tables.chaincodes.insert(
				(
					row.name.clone(),
					row.version.clone(),
					row.channel_genesis_hash.clone(),
				),
				row,
			);
		}
		tables.chaincode_refs.extend(snapshot.chaincode_refs);
		for row in snapshot.blocks {
			tables
				.blocks
				.insert((row.channel_genesis_hash.clone(), row.blocknum), row);
		}
		for row in snapshot.transactions {
			tables.transactions.insert(
				(
					row.channel_genesis_hash.clone(),
					row.blockid,
					row.txhash.clone(),
				),
				row,
			);
		}
		Self {
			tables: RwLock::new(tables),
		}
	}

	pub async fn snapshot(&self) -> MirrorSnapshot {
		let tables = self.tables.read().await;
		MirrorSnapshot {
			channels: tables.channels.values().cloned().collect(),
			peers: tables.peers.values().cloned().collect(),
			peer_refs: tables.peer_refs.iter().cloned().collect(),
			chaincodes: tables.chaincodes.values().cloned().collect(),
			chaincode_refs: tables.chaincode_refs.iter().cloned().collect(),
			blocks: tables.blocks.values().cloned().collect(),
			transactions: tables.transactions.values().cloned().collect(),
		}
	}

	/// Stored blocks of a channel in block-number order.
	#[cfg(test)]
	pub async fn blocks(&self, genesis_hash: &str) -> Vec<BlockRow> {
		self.tables
			.read()
			.await
			.blocks
			.values()
			.filter(|row| row.channel_genesis_hash == genesis_hash)
			.cloned()
			.collect()
	}

	#[cfg(test)]
	pub async fn transactions(&self, genesis_hash: &str) -> Vec<TransactionRow> {
		self.tables
			.read()
			.await
			.transactions
			.values()
			.filter(|row| row.channel_genesis_hash == genesis_hash)
			.cloned()
			.collect()
	}

	#[cfg(test)]
	pub async fn channels(&self) -> Vec<ChannelRow> {
		self.tables.read().await.channels.values().cloned().collect()
	}
}

#[async_trait::async_trait]
impl MirrorRepository for InMemoryMirrorRepository {
	async fn channel_exists(&self, name: &str) -> Result<u64, RepositoryError> {
		let tables = self.tables.read().await;
		Ok(tables.channels.keys().filter(|(n, _)| n == name).count() as u64)
	}

	async fn get_channel(
		&self,
		name: &str,
		genesis_hash: &str,
	) -> Result<Option<ChannelRow>, RepositoryError> {
		let tables = self.tables.read().await;
		Ok(tables
			.channels
			.get(&(name.to_string(), genesis_hash.to_string()))
			.cloned())
	}

	async fn save_channel(&self, row: ChannelRow) -> Result<(), RepositoryError> {
		let mut tables = self.tables.write().await;
		tables
			.channels
			.entry((row.name.clone(), row.genesis_block_hash.clone()))
			.or_insert(row);
		Ok(())
	}

	async fn save_peer(&self, row: PeerRow) -> Result<(), RepositoryError> {
		let mut tables = self.tables.write().await;
		tables.peers.insert(
			(row.server_hostname.clone(), row.channel_genesis_hash.clone()),
			row,
		);
		Ok(())
	}

	async fn save_peer_channel_ref(&self, row: PeerChannelRef) -> Result<(), RepositoryError> {
		self.tables.write().await.peer_refs.insert(row);
		Ok(())
	}

	async fn save_chaincode(&self, row: ChaincodeRow) -> Result<(), RepositoryError> {
		let mut tables = self.tables.write().await;
		let key = (
			row.name.clone(),
			row.version.clone(),
			row.channel_genesis_hash.clone(),
		);
		match tables.chaincodes.get_mut(&key) {
			Some(existing) => existing.path = row.path,
			None => {
				tables.chaincodes.insert(key, row);
			}
		}
		Ok(())
	}

	async fn save_chaincode_peer_ref(
		&self,
		row: ChaincodePeerRef,
	) -> Result<(), RepositoryError> {
		self.tables.write().await.chaincode_refs.insert(row);
		Ok(())
	}

	async fn save_block(&self, row: BlockRow) -> Result<bool, RepositoryError> {
		let mut tables = self.tables.write().await;
		let key = (row.channel_genesis_hash.clone(), row.blocknum);
		if tables.blocks.contains_key(&key) {
			debug!(
				"Block {} of {} already stored",
				row.blocknum, row.channel_genesis_hash
			);
			return Ok(false);
		}

		if let Some(channel) = tables
			.channels
			.values_mut()
			.find(|channel| channel.genesis_block_hash == row.channel_genesis_hash)
		{
			channel.blocks += 1;
		}
		tables.blocks.insert(key, row);
		Ok(true)
	}

	async fn save_transaction(&self, row: TransactionRow) -> Result<(), RepositoryError> {
		let mut tables = self.tables.write().await;
		let key = (
			row.channel_genesis_hash.clone(),
			row.blockid,
			row.txhash.clone(),
		);
		if tables.transactions.contains_key(&key) {
			return Ok(());
		}

		if let Some(channel) = tables
			.channels
			.values_mut()
			.find(|channel| channel.genesis_block_hash == row.channel_genesis_hash)
		{
			channel.trans += 1;
		}
		let (name, version) = row
			.chaincode_id
			.split_once(':')
			.unwrap_or((row.chaincodename.as_str(), ""));
		if let Some(chaincode) = tables.chaincodes.get_mut(&(
			name.to_string(),
			version.to_string(),
			row.channel_genesis_hash.clone(),
		)) {
			chaincode.txcount += 1;
		}
		tables.transactions.insert(key, row);
		Ok(())
	}

	async fn last_block_number(&self, genesis_hash: &str) -> Result<Option<u64>, RepositoryError> {
		let tables = self.tables.read().await;
		Ok(tables
			.blocks
			.range((genesis_hash.to_string(), 0)..=(genesis_hash.to_string(), u64::MAX))
			.next_back()
			.map(|((_, number), _)| *number))
	}

	async fn find_missing_block_numbers(
		&self,
		genesis_hash: &str,
		max_block: u64,
	) -> Result<Vec<u64>, RepositoryError> {
		let tables = self.tables.read().await;
		Ok((0..=max_block)
			.filter(|number| {
				!tables
					.blocks
					.contains_key(&(genesis_hash.to_string(), *number))
			})
			.collect())
	}
}
