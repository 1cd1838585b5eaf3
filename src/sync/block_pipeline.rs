//! Block ingestion.
//!
//! `BlockIngestionPipeline` turns one delivered or fetched block into channel, transaction and
//! block rows. Push delivery and backfill both route through it; the per-block in-flight guard and
//! the repository's duplicate-ignoring saves make a second ingestion of the same block a no-op.
//!
//! Topology side effects (a channel seen for the first time, a configuration block, a chaincode
//! deployment) are handed to the `DeferredScheduler` and run once the ledger has settled.

use crate::ledger::{Block, LedgerClient};
use crate::persistence::{BlockRow, MirrorRepository};
use crate::sync::discovery::TopologyReconciler;
use crate::sync::events::{BlockNotice, NotificationDispatcher, NotificationKind};
use crate::sync::in_flight::{BlockKey, InFlightSet};
use crate::sync::scheduler::DeferredScheduler;
use crate::sync::transaction_decoder::TransactionDecoder;
use crate::sync::types::SyncError;

use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info};

/// What an ingestion attempt did with its block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngestOutcome {
	/// Rows were written and a block notification was sent.
	Persisted { transactions: usize },
	/// The block row already existed.
	AlreadyPersisted,
	/// Another task is ingesting the same block.
	InProgress,
	/// The channel is not registered yet; its initialization was scheduled and the block is left
	/// for backfill.
	Deferred,
}

pub struct BlockIngestionPipeline {
	client: Arc<dyn LedgerClient>,
	repository: Arc<dyn MirrorRepository>,
	reconciler: Arc<TopologyReconciler>,
	notifier: Arc<NotificationDispatcher>,
	scheduler: Arc<DeferredScheduler>,
	decoder: TransactionDecoder,
	in_flight: InFlightSet<BlockKey>,
	/// Unregistered channels with an initialization already scheduled.
	pending_channels: InFlightSet<String>,
	discovery_delay: Duration,
}

impl BlockIngestionPipeline {
	pub fn new(
		client: Arc<dyn LedgerClient>,
		repository: Arc<dyn MirrorRepository>,
		reconciler: Arc<TopologyReconciler>,
		notifier: Arc<NotificationDispatcher>,
		scheduler: Arc<DeferredScheduler>,
		discovery_delay: Duration,
	) -> Self {
		Self {
			client,
			repository,
			reconciler,
			notifier,
			scheduler,
			decoder: TransactionDecoder::new(),
			in_flight: InFlightSet::new(),
			pending_channels: InFlightSet::new(),
			discovery_delay,
		}
	}

	/// Ingest one block.
	///
	/// Repository failures abort the attempt and propagate; the in-flight claim is released on
	/// every path so a later backfill can retry the block.
	pub async fn ingest(&self, block: &Block) -> Result<IngestOutcome, SyncError> {
		let number = block.header.number;
		let channel = block
			.channel_id()
			.ok_or_else(|| SyncError::MalformedBlock(format!("block {} has no envelopes", number)))?
			.to_string();
		let blockhash = block.header.hash().map_err(|e| {
			SyncError::MalformedBlock(format!("block {} of {}: {}", number, channel, e))
		})?;

		let Some(_guard) = self.in_flight.try_claim(BlockKey {
			channel: channel.clone(),
			number,
		}) else {
			debug!("Block {} of {} is already being ingested", number, channel);
			return Ok(IngestOutcome::InProgress);
		};

		let Some(genesis_hash) = self.client.channel_genesis_hash(&channel) else {
			info!(
				"Block {} belongs to unregistered channel {}, scheduling its initialization",
				number, channel
			);
			self.schedule_channel_initialization(&channel);
			return Ok(IngestOutcome::Deferred);
		};

		if block.is_config() {
			self.schedule_refresh(&channel, &genesis_hash, NotificationKind::UpdateChannel);
		}

		let decoded = self.decoder.decode_block(block, &genesis_hash);
		let transactions = decoded.len();
		for transaction in decoded {
			if transaction.deploys_chaincode {
				self.schedule_refresh(&channel, &genesis_hash, NotificationKind::Chaincode);
			}
			self.repository.save_transaction(transaction.row).await?;
		}

		let block_time = block
			.first_envelope()
			.and_then(|envelope| envelope.payload.header.channel_header.timestamp.clone());
		let row = BlockRow {
			blocknum: number,
			datahash: block.header.data_hash.clone(),
			prehash: block.header.previous_hash.clone(),
			txcount: block.tx_count() as u64,
			blockhash,
			channel_genesis_hash: genesis_hash,
			createdt: block_time.clone(),
		};

		if !self.repository.save_block(row).await? {
			debug!("Block {} of {} was already persisted", number, channel);
			return Ok(IngestOutcome::AlreadyPersisted);
		}

		let mut notification = self.notifier.notification(NotificationKind::Block, &channel);
		notification.block = Some(BlockNotice::new(
			&channel,
			number,
			block.tx_count() as u64,
			block.header.data_hash.clone(),
			block_time,
		));
		self.notifier.dispatch(notification).await;

		debug!(
			"Persisted block {} of {} with {} transactions",
			number, channel, transactions
		);
		Ok(IngestOutcome::Persisted { transactions })
	}

	fn schedule_channel_initialization(&self, channel: &str) {
		let Some(pending) = self.pending_channels.try_claim(channel.to_string()) else {
			debug!("Initialization of {} is already scheduled", channel);
			return;
		};
		let reconciler = self.reconciler.clone();
		let channel = channel.to_string();
		self.scheduler.schedule(
			format!("initialize channel {}", channel),
			self.discovery_delay,
			async move {
				let _pending = pending;
				if let Err(e) = reconciler.initialize_channel(&channel).await {
					error!("Failed to initialize channel {}: {}", channel, e);
				}
			},
		);
	}

	fn schedule_refresh(&self, channel: &str, genesis_hash: &str, kind: NotificationKind) {
		let reconciler = self.reconciler.clone();
		let notifier = self.notifier.clone();
		let channel = channel.to_string();
		let genesis_hash = genesis_hash.to_string();
		self.scheduler.schedule(
			format!("{:?} refresh of {}", kind, channel),
			self.discovery_delay,
			async move {
				match reconciler.refresh(&channel, &genesis_hash).await {
					Ok(()) => notifier.notify(kind, &channel).await,
					Err(e) => error!("Failed to refresh topology of {}: {}", channel, e),
				}
			},
		);
	}
}
