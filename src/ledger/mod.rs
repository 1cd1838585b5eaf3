//! Ledger client integration for the mirror.
//!
//! This module defines the capability interface the sync core consumes from the ledger client
//! library (channel registry, block and channel-info queries, service discovery and block-event
//! subscriptions) together with the decoded ledger types, and provides a client for a ledger REST
//! gateway that implements it.

/// HTTP/WebSocket client for the ledger gateway
mod client;
/// Block header hashing
mod hash;
/// Type definitions for decoded ledger data
mod types;

pub use client::{GatewayLedgerClient, GatewaySubscription};
pub use types::*;

use async_trait::async_trait;
use futures_util::Stream;
use std::pin::Pin;
use std::sync::Arc;

/// Stream of blocks delivered by a connected subscription.
pub type BlockStream = Pin<Box<dyn Stream<Item = Result<Block, LedgerError>> + Send>>;

/// Capabilities of a ledger client bound to one network/client identity.
///
/// The client keeps its own registry of channels it has initialized locally; `channels` and
/// `channel_genesis_hash` read that registry and never touch the network.
#[async_trait]
pub trait LedgerClient: Send + Sync {
	/// Name of the client identity, used as part of backfill keys and notifications.
	fn client_name(&self) -> &str;

	/// Channels initialized in the client context.
	fn channels(&self) -> Vec<String>;

	/// Genesis hash of a channel initialized in the client context.
	fn channel_genesis_hash(&self, channel: &str) -> Option<String>;

	/// Channels the client's default peer has joined, as reported by the ledger.
	async fn query_channels(&self) -> Result<Vec<String>, LedgerError>;

	async fn genesis_block(&self, channel: &str) -> Result<Block, LedgerError>;

	async fn query_channel_info(&self, channel: &str) -> Result<ChannelInfo, LedgerError>;

	async fn query_block_by_number(&self, channel: &str, number: u64)
	-> Result<Block, LedgerError>;

	async fn query_instantiated_chaincodes(
		&self,
		channel: &str,
	) -> Result<Vec<ChaincodeInfo>, LedgerError>;

	/// Organization-grouped peers and orderers of a channel.
	async fn discover_topology(&self, channel: &str) -> Result<DiscoveryResults, LedgerError>;

	/// Register a channel the client has not seen before.
	async fn initialize_new_channel(&self, channel: &str) -> Result<(), LedgerError>;

	/// Refresh the client's view of a channel from discovery after a configuration change.
	async fn initialize_channel_from_discovery(
		&self,
		channel: &str,
	) -> Result<DiscoveryResults, LedgerError>;

	/// Create a block-event subscription. `start_block` of `None` lets the ledger deliver from
	/// the genesis block.
	async fn subscribe_block_events(
		&self,
		channel: &str,
		start_block: Option<u64>,
	) -> Result<Arc<dyn BlockSubscription>, LedgerError>;
}

/// Handle of a push subscription to a channel's block events.
#[async_trait]
pub trait BlockSubscription: Send + Sync {
	/// Open the transport and return the stream of delivered blocks. Calling it again after a
	/// disconnect reconnects.
	async fn connect(&self) -> Result<BlockStream, LedgerError>;

	/// Close the transport; the stream returned by `connect` ends.
	fn disconnect(&self);

	fn is_connected(&self) -> bool;
}
