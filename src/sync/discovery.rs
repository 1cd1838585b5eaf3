//! Topology discovery reconciliation.
//!
//! This module provides the `TopologyReconciler`, which mirrors a channel's membership (peers,
//! orderers, instantiated chaincodes) into persistence. It is also the only writer of channel
//! rows, and enforces that a channel name is never reused under a different genesis hash.
//!
//! Statically configured endpoints take precedence over the endpoints discovery reports.
//!
//! A channel seen for the first time is only registered with the ledger client once its channel
//! row is in place, so a conflicting channel never reaches the subscription or ingestion paths.

use crate::config::NetworkEndpoints;
use crate::ledger::{
	Block, DiscoveredPeer, DiscoveryResults, LedgerClient, OrdererEndpoint,
};
use crate::persistence::{
	ChaincodePeerRef, ChaincodeRow, ChannelRow, MirrorRepository, NodeRole, PeerChannelRef,
	PeerRow,
};
use crate::sync::events::{NotificationDispatcher, NotificationKind};
use crate::sync::in_flight::InFlightSet;
use crate::sync::types::SyncError;

use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use tracing::{debug, error, info};

/// Service that writes channel rows and reconciles topology.
pub struct TopologyReconciler {
	client: Arc<dyn LedgerClient>,
	repository: Arc<dyn MirrorRepository>,
	notifier: Arc<NotificationDispatcher>,
	endpoints: NetworkEndpoints,
	/// Channels whose first-time initialization is running.
	initializing: InFlightSet<String>,
	/// Channels whose conflict was already reported.
	conflicts: Mutex<HashSet<String>>,
}

impl TopologyReconciler {
	pub fn new(
		client: Arc<dyn LedgerClient>,
		repository: Arc<dyn MirrorRepository>,
		notifier: Arc<NotificationDispatcher>,
		endpoints: NetworkEndpoints,
	) -> Self {
		Self {
			client,
			repository,
			notifier,
			endpoints,
			initializing: InFlightSet::new(),
			conflicts: Mutex::new(HashSet::new()),
		}
	}

	/// Mirror every channel of the client context. Stops at the first channel conflict.
	pub async fn sync_network_config(&self) -> Result<(), SyncError> {
		let mut channels = self.client.channels();
		channels.sort();

		for channel in channels {
			let genesis_hash = self
				.client
				.channel_genesis_hash(&channel)
				.ok_or_else(|| SyncError::UnknownChannel(channel.clone()))?;
			self.reconcile(&channel, &genesis_hash).await?;
		}

		info!("Network configuration synchronized");
		Ok(())
	}

	/// Make sure the channel row exists, then mirror the channel's discovered topology.
	pub async fn reconcile(&self, channel: &str, genesis_hash: &str) -> Result<(), SyncError> {
		let genesis = self.client.genesis_block(channel).await?;
		self.insert_new_channel(channel, &genesis, genesis_hash)
			.await?;

		let results = self.client.discover_topology(channel).await?;
		self.apply_discovery(channel, genesis_hash, &results).await
	}

	/// Re-run discovery for a channel whose configuration changed.
	pub async fn refresh(&self, channel: &str, genesis_hash: &str) -> Result<(), SyncError> {
		let results = self
			.client
			.initialize_channel_from_discovery(channel)
			.await?;
		self.apply_discovery(channel, genesis_hash, &results).await
	}

	/// Register a channel seen for the first time, mirror it and announce it.
	///
	/// Returns the genesis hash when this call registered the channel, and `None` when the
	/// channel is already registered or another task is initializing it. A conflicting channel
	/// fails before it is registered with the client.
	pub async fn initialize_channel(&self, channel: &str) -> Result<Option<String>, SyncError> {
		if self.client.channel_genesis_hash(channel).is_some() {
			debug!("Channel {} is already initialized", channel);
			return Ok(None);
		}
		let Some(_guard) = self.initializing.try_claim(channel.to_string()) else {
			debug!("Channel {} is already being initialized", channel);
			return Ok(None);
		};
		if self.client.channel_genesis_hash(channel).is_some() {
			return Ok(None);
		}

		let genesis = self.client.genesis_block(channel).await?;
		let genesis_hash = genesis.header.hash()?;
		self.insert_new_channel(channel, &genesis, &genesis_hash)
			.await?;
		self.client.initialize_new_channel(channel).await?;

		let results = self.client.discover_topology(channel).await?;
		self.apply_discovery(channel, &genesis_hash, &results)
			.await?;
		self.notifier
			.notify(NotificationKind::NewChannel, channel)
			.await;
		Ok(Some(genesis_hash))
	}

	/// Insert the channel row unless it exists.
	///
	/// A stored channel of the same name with another genesis hash is a conflict: it is reported
	/// once as a notification and the insert fails.
	pub async fn insert_new_channel(
		&self,
		channel: &str,
		genesis: &Block,
		genesis_hash: &str,
	) -> Result<(), SyncError> {
		if self
			.repository
			.get_channel(channel, genesis_hash)
			.await?
			.is_some()
		{
			return Ok(());
		}

		if self.repository.channel_exists(channel).await? > 0 {
			let first_report = self
				.conflicts
				.lock()
				.unwrap_or_else(|poisoned| poisoned.into_inner())
				.insert(channel.to_string());
			if first_report {
				error!(
					"Channel {} already exists under another genesis hash than {}",
					channel, genesis_hash
				);
				self.notifier
					.notify(NotificationKind::ExistingChannelConflict, channel)
					.await;
			} else {
				debug!("Channel {} is still in conflict", channel);
			}
			return Err(SyncError::DuplicateChannel {
				name: channel.to_string(),
				genesis_hash: genesis_hash.to_string(),
			});
		}

		let Some(first) = genesis.first_envelope() else {
			debug!("Genesis block of {} carries no envelope", channel);
			return Ok(());
		};
		let channel_header = &first.payload.header.channel_header;

		self.repository
			.save_channel(ChannelRow {
				name: channel.to_string(),
				genesis_block_hash: genesis_hash.to_string(),
				channel_hash: String::new(),
				create_date: channel_header.timestamp.clone(),
				channel_version: channel_header.version,
				blocks: 0,
				trans: 0,
			})
			.await?;
		info!("Inserted channel {} ({})", channel, genesis_hash);
		Ok(())
	}

	async fn apply_discovery(
		&self,
		channel: &str,
		genesis_hash: &str,
		results: &DiscoveryResults,
	) -> Result<(), SyncError> {
		for peer in results.peers() {
			self.save_peer(peer, genesis_hash).await?;
		}

		for (org_name, org) in &results.orderers {
			for orderer in &org.endpoints {
				self.save_orderer(org_name, orderer, genesis_hash).await?;
			}
		}

		let chaincodes = self.client.query_instantiated_chaincodes(channel).await?;
		for chaincode in chaincodes {
			self.repository
				.save_chaincode(ChaincodeRow {
					name: chaincode.name.clone(),
					version: chaincode.version.clone(),
					path: chaincode.path.clone(),
					txcount: 0,
					createdt: chrono::Utc::now().to_rfc3339(),
					channel_genesis_hash: genesis_hash.to_string(),
				})
				.await?;

			for peer in results.peers() {
				let installed = peer
					.chaincodes
					.iter()
					.any(|c| c.name == chaincode.name && c.version == chaincode.version);
				if installed {
					self.repository
						.save_chaincode_peer_ref(ChaincodePeerRef {
							chaincodeid: chaincode.name.clone(),
							cc_version: chaincode.version.clone(),
							peerid: peer.host().to_string(),
							channelid: genesis_hash.to_string(),
						})
						.await?;
				}
			}
		}

		debug!(
			"Reconciled topology of {}: {} peers, {} orderer organizations",
			channel,
			results.peers().count(),
			results.orderers.len()
		);
		Ok(())
	}

	async fn save_peer(&self, peer: &DiscoveredPeer, genesis_hash: &str) -> Result<(), SyncError> {
		let host = peer.host();
		let configured = self.endpoints.peers.get(host);

		let requests = configured
			.map(|endpoint| endpoint.url.as_str())
			.filter(|url| !url.is_empty())
			.unwrap_or(&peer.endpoint)
			.to_string();
		let events = configured
			.map(|endpoint| endpoint.event_url.clone())
			.unwrap_or_default();

		self.repository
			.save_peer(PeerRow {
				mspid: peer.mspid.clone(),
				requests,
				events,
				server_hostname: host.to_string(),
				peer_type: NodeRole::Peer,
				channel_genesis_hash: genesis_hash.to_string(),
			})
			.await?;
		self.repository
			.save_peer_channel_ref(PeerChannelRef {
				peerid: host.to_string(),
				channelid: genesis_hash.to_string(),
				peer_type: NodeRole::Peer,
			})
			.await?;
		Ok(())
	}

	async fn save_orderer(
		&self,
		org_name: &str,
		orderer: &OrdererEndpoint,
		genesis_hash: &str,
	) -> Result<(), SyncError> {
		let requests = self
			.endpoints
			.orderers
			.get(&orderer.host)
			.map(|endpoint| endpoint.url.clone())
			.filter(|url| !url.is_empty())
			.unwrap_or_else(|| format!("{}:{}", orderer.host, orderer.port));

		self.repository
			.save_peer(PeerRow {
				mspid: org_name.to_string(),
				requests,
				events: String::new(),
				server_hostname: orderer.host.clone(),
				peer_type: NodeRole::Orderer,
				channel_genesis_hash: genesis_hash.to_string(),
			})
			.await?;
		self.repository
			.save_peer_channel_ref(PeerChannelRef {
				peerid: orderer.host.clone(),
				channelid: genesis_hash.to_string(),
				peer_type: NodeRole::Orderer,
			})
			.await?;
		Ok(())
	}
}
