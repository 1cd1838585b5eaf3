//! Gap-closing backfill.
//!
//! The `BackfillScanner` compares the live ledger height of a channel with the stored block rows
//! and ingests every missing block, strictly in ascending order. One scan per client and channel
//! runs at a time; a second request while one is running is dropped.

use crate::ledger::LedgerClient;
use crate::persistence::MirrorRepository;
use crate::sync::block_pipeline::{BlockIngestionPipeline, IngestOutcome};
use crate::sync::in_flight::{BackfillKey, InFlightSet};
use crate::sync::progress_tracker::{BackfillProgressTracker, BackfillStats};
use crate::sync::types::SyncError;

use std::sync::Arc;
use tracing::{debug, info, warn};

pub struct BackfillScanner {
	client: Arc<dyn LedgerClient>,
	repository: Arc<dyn MirrorRepository>,
	pipeline: Arc<BlockIngestionPipeline>,
	in_flight: InFlightSet<BackfillKey>,
}

impl BackfillScanner {
	pub fn new(
		client: Arc<dyn LedgerClient>,
		repository: Arc<dyn MirrorRepository>,
		pipeline: Arc<BlockIngestionPipeline>,
	) -> Self {
		Self {
			client,
			repository,
			pipeline,
			in_flight: InFlightSet::new(),
		}
	}

	/// Ingest every block of `channel` below the ledger height that is not stored yet.
	///
	/// Returns `None` when a scan of the channel is already running. A failed fetch or ingestion
	/// stops the pass; the remaining blocks stay missing for the next one.
	pub async fn scan(&self, channel: &str) -> Result<Option<BackfillStats>, SyncError> {
		let Some(_guard) = self.in_flight.try_claim(BackfillKey {
			client: self.client.client_name().to_string(),
			channel: channel.to_string(),
		}) else {
			info!("Backfill of {} is already running", channel);
			return Ok(None);
		};

		let genesis_hash = self
			.client
			.channel_genesis_hash(channel)
			.ok_or_else(|| SyncError::UnknownChannel(channel.to_string()))?;
		let info = self.client.query_channel_info(channel).await?;
		if info.height == 0 {
			debug!("Channel {} has no blocks", channel);
			return Ok(Some(BackfillProgressTracker::new(channel, &[]).get_stats()));
		}

		let missing = self
			.repository
			.find_missing_block_numbers(&genesis_hash, info.height - 1)
			.await?;
		let mut tracker = BackfillProgressTracker::new(channel, &missing);
		if missing.is_empty() {
			debug!("Channel {} is caught up at height {}", channel, info.height);
			return Ok(Some(tracker.get_stats()));
		}

		info!(
			"Backfilling {} missing blocks of {} below height {}",
			missing.len(),
			channel,
			info.height
		);

		for number in missing {
			let result = match self.client.query_block_by_number(channel, number).await {
				Ok(block) => self.pipeline.ingest(&block).await,
				Err(e) => Err(e.into()),
			};

			match result {
				Ok(IngestOutcome::Persisted { transactions }) => {
					tracker.record_ingested(number, transactions);
				}
				Ok(IngestOutcome::AlreadyPersisted) | Ok(IngestOutcome::InProgress) => {
					tracker.record_already_present(number);
				}
				Ok(IngestOutcome::Deferred) => {
					tracker.record_failure(number);
					warn!("Block {} of {} was deferred during backfill", number, channel);
				}
				Err(e) => {
					tracker.record_failure(number);
					tracker.log_progress(true);
					warn!("Backfill of {} stopped at block {}: {}", channel, number, e);
					return Err(e);
				}
			}
			tracker.log_progress(false);
		}

		let stats = tracker.get_stats();
		info!("{}", stats.summary());
		Ok(Some(stats))
	}

	#[cfg(test)]
	pub fn is_running(&self, channel: &str) -> bool {
		self.in_flight.contains(&BackfillKey {
			client: self.client.client_name().to_string(),
			channel: channel.to_string(),
		})
	}
}
