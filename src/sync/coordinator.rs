//! Per-channel subscription lifecycle.
//!
//! The `ChannelSyncCoordinator` owns one block-event subscription per channel and moves it through
//! `Unsubscribed -> Connecting -> Connected -> (Disconnected -> Connecting)*`. Delivered blocks go
//! straight to the ingestion pipeline. The first backfill of a channel runs a settle delay after
//! its connect; after that, the periodic pass backfills connected channels and reconnects or
//! resubscribes the rest, so a dropped subscription is always retried on the next pass.

use crate::ledger::{BlockStream, BlockSubscription, LedgerClient};
use crate::sync::backfill::BackfillScanner;
use crate::sync::block_pipeline::BlockIngestionPipeline;
use crate::sync::discovery::TopologyReconciler;
use crate::sync::scheduler::DeferredScheduler;
use crate::sync::types::SyncError;

use futures::StreamExt;
use futures::future::join_all;
use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Connection state of a channel's subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscriptionState {
	Unsubscribed,
	Connecting,
	Connected,
	Disconnected,
}

struct ChannelSlot {
	subscription: Arc<dyn BlockSubscription>,
	state: SubscriptionState,
	/// Connect attempt the slot belongs to; stale delivery and settle tasks compare against it.
	generation: u64,
	delivery: Option<JoinHandle<()>>,
}

enum PassAction {
	Backfill,
	Reconnect(Arc<dyn BlockSubscription>),
	Subscribe,
}

pub struct ChannelSyncCoordinator {
	tag: String,
	client: Arc<dyn LedgerClient>,
	reconciler: Arc<TopologyReconciler>,
	pipeline: Arc<BlockIngestionPipeline>,
	backfill: Arc<BackfillScanner>,
	scheduler: Arc<DeferredScheduler>,
	settle_delay: Duration,
	slots: Mutex<HashMap<String, ChannelSlot>>,
	start_blocks: Mutex<HashMap<String, u64>>,
	connects: AtomicU64,
	shut_down: AtomicBool,
}

impl ChannelSyncCoordinator {
	pub fn new(
		tag: String,
		client: Arc<dyn LedgerClient>,
		reconciler: Arc<TopologyReconciler>,
		pipeline: Arc<BlockIngestionPipeline>,
		backfill: Arc<BackfillScanner>,
		scheduler: Arc<DeferredScheduler>,
		settle_delay: Duration,
	) -> Self {
		Self {
			tag,
			client,
			reconciler,
			pipeline,
			backfill,
			scheduler,
			settle_delay,
			slots: Mutex::new(HashMap::new()),
			start_blocks: Mutex::new(HashMap::new()),
			connects: AtomicU64::new(0),
			shut_down: AtomicBool::new(false),
		}
	}

	fn slots(&self) -> MutexGuard<'_, HashMap<String, ChannelSlot>> {
		self.slots.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
	}

	/// Subscribe every channel of the client context.
	///
	/// `start_blocks` holds the last persisted block per channel; channels without an entry are
	/// delivered from genesis.
	pub async fn initialize(self: &Arc<Self>, start_blocks: HashMap<String, u64>) {
		*self
			.start_blocks
			.lock()
			.unwrap_or_else(|poisoned| poisoned.into_inner()) = start_blocks;

		let mut channels = self.client.channels();
		channels.sort();
		for channel in channels {
			if let Err(e) = self.subscribe(&channel).await {
				error!("[{}] Failed to subscribe to {}: {}", self.tag, channel, e);
			}
		}
	}

	/// Create the channel's subscription and connect it.
	pub async fn subscribe(self: &Arc<Self>, channel: &str) -> Result<(), SyncError> {
		if self.shut_down.load(Ordering::SeqCst) {
			return Ok(());
		}

		let start_block = self
			.start_blocks
			.lock()
			.unwrap_or_else(|poisoned| poisoned.into_inner())
			.get(channel)
			.copied();
		let subscription = self
			.client
			.subscribe_block_events(channel, start_block)
			.await?;
		info!(
			"[{}] Subscribed to {} from block {:?}",
			self.tag, channel, start_block
		);

		if let Some(previous) = self.slots().insert(
			channel.to_string(),
			ChannelSlot {
				subscription: subscription.clone(),
				state: SubscriptionState::Unsubscribed,
				generation: 0,
				delivery: None,
			},
		) {
			previous.subscription.disconnect();
			if let Some(delivery) = previous.delivery {
				delivery.abort();
			}
		}

		self.connect(channel, subscription).await
	}

	/// Connect (or reconnect) a channel's subscription and schedule its settle-time backfill.
	async fn connect(
		self: &Arc<Self>,
		channel: &str,
		subscription: Arc<dyn BlockSubscription>,
	) -> Result<(), SyncError> {
		let generation = {
			let mut slots = self.slots();
			let Some(slot) = slots.get_mut(channel) else {
				return Ok(());
			};
			slot.state = SubscriptionState::Connecting;
			slot.generation = self.connects.fetch_add(1, Ordering::SeqCst) + 1;
			if let Some(delivery) = slot.delivery.take() {
				delivery.abort();
			}
			slot.generation
		};

		let stream = match subscription.connect().await {
			Ok(stream) => stream,
			Err(e) => {
				self.set_state(channel, generation, SubscriptionState::Disconnected);
				return Err(e.into());
			}
		};
		info!("[{}] Connecting to block events of {}", self.tag, channel);

		let delivery = tokio::spawn(deliver(
			Arc::downgrade(self),
			channel.to_string(),
			generation,
			stream,
		));
		match self.slots().get_mut(channel) {
			Some(slot) if slot.generation == generation => slot.delivery = Some(delivery),
			_ => delivery.abort(),
		}

		let coordinator = Arc::downgrade(self);
		let settled_channel = channel.to_string();
		self.scheduler.schedule(
			format!("settle {}", channel),
			self.settle_delay,
			async move {
				if let Some(coordinator) = coordinator.upgrade() {
					coordinator.settle(&settled_channel, generation).await;
				}
			},
		);
		Ok(())
	}

	async fn settle(&self, channel: &str, generation: u64) {
		if self.shut_down.load(Ordering::SeqCst) {
			return;
		}
		let subscription = match self.slots().get(channel) {
			Some(slot) if slot.generation == generation => slot.subscription.clone(),
			_ => return,
		};

		if !subscription.is_connected() {
			warn!(
				"[{}] Subscription of {} did not connect, retrying on the next pass",
				self.tag, channel
			);
			self.set_state(channel, generation, SubscriptionState::Disconnected);
			return;
		}

		self.set_state(channel, generation, SubscriptionState::Connected);
		self.run_backfill(channel).await;
	}

	fn set_state(&self, channel: &str, generation: u64, state: SubscriptionState) {
		if let Some(slot) = self.slots().get_mut(channel) {
			if slot.generation == generation {
				debug!("[{}] {} is {:?}", self.tag, channel, state);
				slot.state = state;
			}
		}
	}

	async fn run_backfill(&self, channel: &str) {
		match self.backfill.scan(channel).await {
			Ok(Some(stats)) => debug!("[{}] {}", self.tag, stats.summary()),
			Ok(None) => {}
			Err(e) => error!("[{}] Backfill of {} failed: {}", self.tag, channel, e),
		}
	}

	async fn reconnect(self: &Arc<Self>, channel: &str, subscription: Arc<dyn BlockSubscription>) {
		info!("[{}] Reconnecting to {}", self.tag, channel);
		if let Err(e) = self.connect(channel, subscription).await {
			error!("[{}] Failed to reconnect to {}: {}", self.tag, channel, e);
		}
	}

	/// Backfill every connected channel and reconnect the others.
	pub async fn check_connections(self: &Arc<Self>) {
		let subscriptions: Vec<(String, Arc<dyn BlockSubscription>)> = self
			.slots()
			.iter()
			.map(|(channel, slot)| (channel.clone(), slot.subscription.clone()))
			.collect();

		join_all(subscriptions.into_iter().map(|(channel, subscription)| async move {
			if subscription.is_connected() {
				self.run_backfill(&channel).await;
			} else {
				self.reconnect(&channel, subscription).await;
			}
		}))
		.await;
	}

	/// One pass of the periodic driver.
	///
	/// Channels the peer has joined but the client does not know are initialized first. Then each
	/// known channel is backfilled when connected, reconnected when its subscription dropped, and
	/// subscribed when it has no subscription.
	pub async fn run_periodic_pass(self: &Arc<Self>) {
		if self.shut_down.load(Ordering::SeqCst) {
			return;
		}

		let known: BTreeSet<String> = self.client.channels().into_iter().collect();
		match self.client.query_channels().await {
			Ok(live) => {
				for channel in live.into_iter().filter(|c| !known.contains(c)) {
					info!("[{}] Initializing newly joined channel {}", self.tag, channel);
					if let Err(e) = self.reconciler.initialize_channel(&channel).await {
						error!("[{}] Failed to initialize {}: {}", self.tag, channel, e);
					}
				}
			}
			Err(e) => warn!("[{}] Failed to list joined channels: {}", self.tag, e),
		}

		let mut channels = self.client.channels();
		channels.sort();
		let actions: Vec<(String, PassAction)> = {
			let slots = self.slots();
			channels
				.into_iter()
				.map(|channel| {
					let action = match slots.get(&channel) {
						Some(slot) if slot.subscription.is_connected() => PassAction::Backfill,
						Some(slot) => PassAction::Reconnect(slot.subscription.clone()),
						None => PassAction::Subscribe,
					};
					(channel, action)
				})
				.collect()
		};

		join_all(actions.into_iter().map(|(channel, action)| async move {
			match action {
				PassAction::Backfill => self.run_backfill(&channel).await,
				PassAction::Reconnect(subscription) => self.reconnect(&channel, subscription).await,
				PassAction::Subscribe => {
					if let Err(e) = self.subscribe(&channel).await {
						error!("[{}] Failed to subscribe to {}: {}", self.tag, channel, e);
					}
				}
			}
		}))
		.await;
	}

	/// Disconnect every connected subscription. Safe to call more than once.
	pub fn shutdown(&self) {
		if self.shut_down.swap(true, Ordering::SeqCst) {
			return;
		}

		let mut slots = self.slots();
		for (channel, slot) in slots.iter_mut() {
			if slot.subscription.is_connected() {
				info!("[{}] Disconnecting from {}", self.tag, channel);
				slot.subscription.disconnect();
			}
			if let Some(delivery) = slot.delivery.take() {
				delivery.abort();
			}
			slot.state = SubscriptionState::Disconnected;
		}
	}

	#[cfg(test)]
	pub fn state(&self, channel: &str) -> SubscriptionState {
		self.slots()
			.get(channel)
			.map(|slot| slot.state)
			.unwrap_or(SubscriptionState::Unsubscribed)
	}

	/// Mark a channel disconnected once its delivery stream ended.
	fn stream_ended(&self, channel: &str, generation: u64) {
		warn!("[{}] Block events of {} stopped", self.tag, channel);
		self.set_state(channel, generation, SubscriptionState::Disconnected);
	}
}

/// Feed delivered blocks to the pipeline until the stream ends or the coordinator is gone.
async fn deliver(
	coordinator: Weak<ChannelSyncCoordinator>,
	channel: String,
	generation: u64,
	mut stream: BlockStream,
) {
	while let Some(item) = stream.next().await {
		let Some(coordinator) = coordinator.upgrade() else {
			return;
		};
		match item {
			Ok(block) => {
				let number = block.header.number;
				match coordinator.pipeline.ingest(&block).await {
					Ok(outcome) => debug!("Delivered block {} of {}: {:?}", number, channel, outcome),
					Err(e) => error!("Failed to ingest block {} of {}: {}", number, channel, e),
				}
			}
			Err(e) => warn!("Block event error on {}: {}", channel, e),
		}
	}

	if let Some(coordinator) = coordinator.upgrade() {
		coordinator.stream_ended(&channel, generation);
	}
}
