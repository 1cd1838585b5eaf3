//! Sync engine for one network/client pair.
//!
//! `SyncEngine::start` wires the reconciler, pipeline, backfill scanner and coordinator around a
//! ledger client and a repository, mirrors the network configuration, subscribes every channel and
//! spawns the periodic driver. `destroy` stops the driver and disconnects the subscriptions.

use crate::config::AppConfig;
use crate::ledger::LedgerClient;
use crate::persistence::MirrorRepository;
use crate::sync::backfill::BackfillScanner;
use crate::sync::block_pipeline::BlockIngestionPipeline;
use crate::sync::coordinator::ChannelSyncCoordinator;
use crate::sync::discovery::TopologyReconciler;
use crate::sync::events::NotificationDispatcher;
use crate::sync::scheduler::{DeferredScheduler, TokioClock};
use crate::sync::types::SyncError;

use rand::Rng;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{info, warn};

/// Random tag that tells overlapping engine instances apart in the logs.
fn instance_tag() -> String {
	let mut tag = [0u8; 4];
	rand::rng().fill(&mut tag);
	hex::encode(tag)
}

pub struct SyncEngine {
	tag: String,
	coordinator: Arc<ChannelSyncCoordinator>,
	scheduler: Arc<DeferredScheduler>,
	shutdown: watch::Sender<bool>,
	driver: Mutex<Option<JoinHandle<()>>>,
	destroyed: AtomicBool,
}

impl SyncEngine {
	/// Build and start an engine.
	///
	/// Fails when the network configuration cannot be mirrored, in particular on a channel
	/// conflict; nothing is subscribed in that case.
	pub async fn start(
		config: &AppConfig,
		client: Arc<dyn LedgerClient>,
		repository: Arc<dyn MirrorRepository>,
		notifier: Arc<NotificationDispatcher>,
	) -> Result<Self, SyncError> {
		let tag = instance_tag();
		info!(
			"[{}] Starting sync engine for {} as {}",
			tag, config.network_name, config.client_name
		);

		let scheduler = Arc::new(DeferredScheduler::new(Arc::new(TokioClock)));
		let reconciler = Arc::new(TopologyReconciler::new(
			client.clone(),
			repository.clone(),
			notifier.clone(),
			config.endpoints.clone(),
		));
		let pipeline = Arc::new(BlockIngestionPipeline::new(
			client.clone(),
			repository.clone(),
			reconciler.clone(),
			notifier,
			scheduler.clone(),
			config.sync.discovery_delay,
		));
		let backfill = Arc::new(BackfillScanner::new(
			client.clone(),
			repository.clone(),
			pipeline.clone(),
		));
		let coordinator = Arc::new(ChannelSyncCoordinator::new(
			tag.clone(),
			client.clone(),
			reconciler.clone(),
			pipeline,
			backfill,
			scheduler.clone(),
			config.sync.settle_delay,
		));

		reconciler.sync_network_config().await?;

		let mut start_blocks = HashMap::new();
		for channel in client.channels() {
			let Some(genesis_hash) = client.channel_genesis_hash(&channel) else {
				continue;
			};
			if let Some(last) = repository.last_block_number(&genesis_hash).await? {
				start_blocks.insert(channel, last);
			}
		}
		coordinator.initialize(start_blocks).await;

		let (shutdown, shutdown_rx) = watch::channel(false);
		let driver = tokio::spawn(drive(
			coordinator.clone(),
			config.sync.initial_check_delay,
			config.sync.backfill_interval,
			shutdown_rx,
		));

		info!("[{}] Sync engine started", tag);
		Ok(Self {
			tag,
			coordinator,
			scheduler,
			shutdown,
			driver: Mutex::new(Some(driver)),
			destroyed: AtomicBool::new(false),
		})
	}

	#[cfg(test)]
	pub fn coordinator(&self) -> &Arc<ChannelSyncCoordinator> {
		&self.coordinator
	}

	/// Deferred tasks not yet reaped.
	pub fn pending_tasks(&self) -> usize {
		self.scheduler.pending()
	}

	/// Stop the periodic driver and disconnect every subscription. Safe to call more than once.
	pub fn destroy(&self) {
		if self.destroyed.swap(true, Ordering::SeqCst) {
			return;
		}
		info!("[{}] Destroying sync engine", self.tag);

		if self.shutdown.send(true).is_err() {
			warn!("[{}] Periodic driver already stopped", self.tag);
		}
		if let Some(driver) = self
			.driver
			.lock()
			.unwrap_or_else(|poisoned| poisoned.into_inner())
			.take()
		{
			driver.abort();
		}
		self.coordinator.shutdown();
	}
}

impl Drop for SyncEngine {
	fn drop(&mut self) {
		self.destroy();
	}
}

/// Connection check after `initial_delay`, then a periodic pass every `interval`.
async fn drive(
	coordinator: Arc<ChannelSyncCoordinator>,
	initial_delay: Duration,
	interval: Duration,
	mut shutdown: watch::Receiver<bool>,
) {
	tokio::select! {
		_ = tokio::time::sleep(initial_delay) => {}
		_ = shutdown.changed() => return,
	}
	coordinator.check_connections().await;

	let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
	ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
	loop {
		tokio::select! {
			_ = ticker.tick() => coordinator.run_periodic_pass().await,
			_ = shutdown.changed() => break,
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::ledger::BlockSubscription;
	use crate::persistence::{ChannelRow, InMemoryMirrorRepository};
	use crate::sync::coordinator::SubscriptionState;
	use crate::sync::events::NotificationKind;
	use crate::sync::test_support::{MockLedgerClient, RecordingNotifier, genesis_hash_of};

	fn config() -> AppConfig {
		AppConfig::from_json(
			r#"{
				"network_name": "net",
				"client_name": "admin",
				"gateway": { "http_url": "http://localhost:8080", "ws_url": "ws://localhost:8080/ws" }
			}"#,
		)
		.unwrap()
	}

	struct Fixture {
		client: Arc<MockLedgerClient>,
		repository: Arc<InMemoryMirrorRepository>,
		notifier: Arc<RecordingNotifier>,
		dispatcher: Arc<NotificationDispatcher>,
	}

	fn fixture(height: u64) -> Fixture {
		let client = Arc::new(MockLedgerClient::new("admin"));
		client.add_channel("mychannel", height);
		client.register("mychannel");

		let notifier = Arc::new(RecordingNotifier::default());
		let mut dispatcher = NotificationDispatcher::new("net".to_string(), "admin".to_string());
		dispatcher.register_handler(notifier.clone());
		Fixture {
			client,
			repository: Arc::new(InMemoryMirrorRepository::new()),
			notifier,
			dispatcher: Arc::new(dispatcher),
		}
	}

	async fn start(f: &Fixture) -> Result<SyncEngine, SyncError> {
		SyncEngine::start(
			&config(),
			f.client.clone(),
			f.repository.clone(),
			f.dispatcher.clone(),
		)
		.await
	}

	async fn stored(f: &Fixture) -> Vec<u64> {
		f.repository
			.blocks(&genesis_hash_of("mychannel"))
			.await
			.iter()
			.map(|b| b.blocknum)
			.collect()
	}

	#[tokio::test(start_paused = true)]
	async fn engine_catches_up_and_keeps_up() {
		let f = fixture(5);
		let engine = start(&f).await.unwrap();
		assert_eq!(f.repository.channels().await.len(), 1);

		tokio::time::sleep(Duration::from_secs(2)).await;
		assert_eq!(stored(&f).await, vec![0, 1, 2, 3, 4]);
		assert_eq!(
			engine.coordinator().state("mychannel"),
			SubscriptionState::Connecting
		);

		f.client.grow("mychannel", 8);
		tokio::time::sleep(Duration::from_secs(60)).await;
		assert_eq!(stored(&f).await, (0..8).collect::<Vec<_>>());
		assert_eq!(
			engine.coordinator().state("mychannel"),
			SubscriptionState::Connected
		);
		assert_eq!(f.notifier.count(NotificationKind::Block), 8);

		engine.destroy();
	}

	#[tokio::test(start_paused = true)]
	async fn subscriptions_resume_after_the_last_persisted_block() {
		let f = fixture(5);
		let first = start(&f).await.unwrap();
		assert_eq!(f.client.subscriptions("mychannel")[0].0, None);
		tokio::time::sleep(Duration::from_secs(2)).await;
		first.destroy();

		let _second = start(&f).await.unwrap();
		assert_eq!(f.client.subscriptions("mychannel")[1].0, Some(4));
	}

	#[tokio::test(start_paused = true)]
	async fn channel_conflicts_abort_start() {
		let f = fixture(3);
		f.repository
			.save_channel(ChannelRow {
				name: "mychannel".to_string(),
				genesis_block_hash: "old-genesis".to_string(),
				channel_hash: String::new(),
				create_date: None,
				channel_version: 1,
				blocks: 0,
				trans: 0,
			})
			.await
			.unwrap();

		let result = start(&f).await;
		assert!(matches!(result, Err(SyncError::DuplicateChannel { .. })));
		assert!(f.client.subscriptions("mychannel").is_empty());
		assert_eq!(f.notifier.count(NotificationKind::ExistingChannelConflict), 1);
	}

	#[tokio::test(start_paused = true)]
	async fn destroy_is_idempotent_and_stops_the_driver() {
		let f = fixture(3);
		let engine = start(&f).await.unwrap();
		let (_, subscription) = f.client.subscriptions("mychannel").remove(0);

		engine.destroy();
		engine.destroy();
		assert!(!subscription.is_connected());

		tokio::time::sleep(Duration::from_secs(120)).await;
		assert!(stored(&f).await.is_empty());
		assert!(f.client.fetched("mychannel").is_empty());
		assert!(f.client.channel_genesis_hash("mychannel").is_some());
	}
}
