//! Test doubles for the ledger client and notification sinks, and block fixtures.

use crate::ledger::{
	Block, BlockHeader, BlockStream, BlockSubscription, ChaincodeInfo, ChannelInfo, DiscoveredChaincode,
	DiscoveredOrdererOrg, DiscoveredPeer, DiscoveredPeerOrg, DiscoveryResults, LedgerClient,
	LedgerError, OrdererEndpoint,
};
use crate::sync::events::{Notification, NotificationError, NotificationHandler, NotificationKind};

use async_trait::async_trait;
use futures::channel::mpsc;
use serde_json::{Value, json};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub const TIMESTAMP: &str = "2024-03-01T12:00:00.000Z";

fn header(channel: &str, number: u64) -> BlockHeader {
	BlockHeader {
		number,
		previous_hash: if number == 0 {
			String::new()
		} else {
			block_hash(channel, number - 1)
		},
		data_hash: data_hash(channel, number),
	}
}

pub fn data_hash(channel: &str, number: u64) -> String {
	hex::encode(format!("{}-data-{}", channel, number))
}

/// Hash of the fixture block `number` of `channel`.
pub fn block_hash(channel: &str, number: u64) -> String {
	header(channel, number).hash().unwrap()
}

pub fn genesis_hash_of(channel: &str) -> String {
	block_hash(channel, 0)
}

pub fn envelope_json(
	channel: &str,
	tx_id: &str,
	header_type: &str,
	action: Option<Value>,
) -> Value {
	let data = match action {
		Some(action) => json!({ "actions": [action] }),
		None => json!({}),
	};
	json!({
		"signature": [10, 11],
		"payload": {
			"header": {
				"channel_header": {
					"header_type": header_type,
					"version": 1,
					"timestamp": TIMESTAMP,
					"channel_id": channel,
					"tx_id": tx_id,
					"extension": [1, 2]
				},
				"signature_header": {
					"creator": { "mspid": "Org1MSP", "id_bytes": "creator-cert" },
					"nonce": [5, 6]
				}
			},
			"data": data
		}
	})
}

fn transfer_action(chaincode: &str) -> Value {
	let balance_log = json!({
		"type": 2,
		"@balance_log": "alice",
		"rid": "bob",
		"diff": "-150000000"
	});
	json!({
		"payload": {
			"chaincode_proposal_payload": {
				"input": { "chaincode_spec": { "input": { "args": [
					[116, 114, 97, 110, 115, 102, 101, 114],
					[1]
				] } } }
			},
			"action": {
				"proposal_response_payload": {
					"proposal_hash": "proposal-hash",
					"extension": {
						"chaincode_id": { "name": chaincode, "version": "1.0", "path": "" },
						"response": { "status": 200 },
						"results": { "ns_rwset": [{
							"namespace": "kiesnet-token",
							"rwset": {
								"reads": [{ "key": "BLC_alice", "version": { "block_num": 1, "tx_num": 0 } }],
								"writes": [{ "key": "BLOG_alice_1", "is_delete": false, "value": balance_log.to_string() }]
							}
						}] }
					}
				},
				"endorsements": [{
					"endorser": { "mspid": "Org1MSP", "id_bytes": "endorser-cert" },
					"signature": [3, 4]
				}]
			}
		}
	})
}

fn block_json(channel: &str, number: u64, envelopes: Vec<Value>) -> Value {
	let codes: Vec<Value> = envelopes.iter().map(|_| json!(0)).collect();
	json!({
		"header": header(channel, number),
		"data": { "data": envelopes },
		"metadata": { "metadata": [[], [], codes] }
	})
}

/// Block of endorser transactions invoking `chaincode`, one per tx id.
pub fn endorser_block(channel: &str, number: u64, tx_ids: &[&str], chaincode: &str) -> Block {
	let envelopes = tx_ids
		.iter()
		.map(|tx_id| {
			envelope_json(
				channel,
				tx_id,
				"ENDORSER_TRANSACTION",
				Some(transfer_action(chaincode)),
			)
		})
		.collect();
	serde_json::from_value(block_json(channel, number, envelopes)).unwrap()
}

/// Block carrying a single configuration envelope.
pub fn config_block(channel: &str, number: u64) -> Block {
	let envelope = envelope_json(channel, "", "CONFIG", None);
	serde_json::from_value(block_json(channel, number, vec![envelope])).unwrap()
}

fn default_discovery() -> DiscoveryResults {
	let mut results = DiscoveryResults::default();
	results.peers_by_org.insert(
		"Org1MSP".to_string(),
		DiscoveredPeerOrg {
			peers: vec![DiscoveredPeer {
				mspid: "Org1MSP".to_string(),
				endpoint: "peer0.org1.example.com:7051".to_string(),
				chaincodes: vec![DiscoveredChaincode {
					name: "mycc".to_string(),
					version: "1.0".to_string(),
				}],
			}],
		},
	);
	results.orderers.insert(
		"OrdererMSP".to_string(),
		DiscoveredOrdererOrg {
			endpoints: vec![OrdererEndpoint {
				host: "orderer.example.com".to_string(),
				port: 7050,
			}],
		},
	);
	results
}

#[derive(Default)]
struct MockChannel {
	blocks: BTreeMap<u64, Block>,
}

#[derive(Default)]
struct MockState {
	ledger: BTreeMap<String, MockChannel>,
	registered: BTreeSet<String>,
	fetched: Vec<(String, u64)>,
	subscriptions: Vec<(String, Option<u64>, Arc<MockSubscription>)>,
	discovery_refreshes: usize,
}

/// In-memory ledger with a client-side channel registry.
pub struct MockLedgerClient {
	name: String,
	state: Mutex<MockState>,
	info_delay: Mutex<Option<Duration>>,
}

impl MockLedgerClient {
	pub fn new(name: &str) -> Self {
		Self {
			name: name.to_string(),
			state: Mutex::new(MockState::default()),
			info_delay: Mutex::new(None),
		}
	}

	fn state(&self) -> std::sync::MutexGuard<'_, MockState> {
		self.state.lock().unwrap()
	}

	/// Add a channel to the ledger with blocks `0..height`; block 0 is a config block.
	pub fn add_channel(&self, channel: &str, height: u64) {
		let mut state = self.state();
		let entry = state.ledger.entry(channel.to_string()).or_default();
		for number in 0..height {
			let block = if number == 0 {
				config_block(channel, 0)
			} else {
				endorser_block(channel, number, &[&format!("{}-tx-{}", channel, number)], "mycc")
			};
			entry.blocks.insert(number, block);
		}
	}

	/// Append blocks to the ledger up to `height`.
	pub fn grow(&self, channel: &str, height: u64) {
		let start = self
			.state()
			.ledger
			.get(channel)
			.map(|c| c.blocks.len() as u64)
			.unwrap_or(0);
		let mut state = self.state();
		let entry = state.ledger.entry(channel.to_string()).or_default();
		for number in start..height {
			entry.blocks.insert(
				number,
				endorser_block(channel, number, &[&format!("{}-tx-{}", channel, number)], "mycc"),
			);
		}
	}

	/// Mark a ledger channel as initialized in the client context.
	pub fn register(&self, channel: &str) {
		self.state().registered.insert(channel.to_string());
	}

	pub fn block(&self, channel: &str, number: u64) -> Block {
		self.state().ledger[channel].blocks[&number].clone()
	}

	/// Delay channel-info queries, so concurrent callers overlap.
	pub fn delay_channel_info(&self, delay: Duration) {
		*self.info_delay.lock().unwrap() = Some(delay);
	}

	/// Block numbers fetched by number, in request order.
	pub fn fetched(&self, channel: &str) -> Vec<u64> {
		self.state()
			.fetched
			.iter()
			.filter(|(c, _)| c == channel)
			.map(|(_, n)| *n)
			.collect()
	}

	pub fn subscriptions(&self, channel: &str) -> Vec<(Option<u64>, Arc<MockSubscription>)> {
		self.state()
			.subscriptions
			.iter()
			.filter(|(c, _, _)| c == channel)
			.map(|(_, start, sub)| (*start, sub.clone()))
			.collect()
	}

	pub fn discovery_refreshes(&self) -> usize {
		self.state().discovery_refreshes
	}

	fn ledger_block(&self, channel: &str, number: u64) -> Result<Block, LedgerError> {
		self.state()
			.ledger
			.get(channel)
			.and_then(|c| c.blocks.get(&number))
			.cloned()
			.ok_or(LedgerError::NoData)
	}
}

#[async_trait]
impl LedgerClient for MockLedgerClient {
	fn client_name(&self) -> &str {
		&self.name
	}

	fn channels(&self) -> Vec<String> {
		self.state().registered.iter().cloned().collect()
	}

	fn channel_genesis_hash(&self, channel: &str) -> Option<String> {
		self.state()
			.registered
			.contains(channel)
			.then(|| genesis_hash_of(channel))
	}

	async fn query_channels(&self) -> Result<Vec<String>, LedgerError> {
		Ok(self.state().ledger.keys().cloned().collect())
	}

	async fn genesis_block(&self, channel: &str) -> Result<Block, LedgerError> {
		self.ledger_block(channel, 0)
	}

	async fn query_channel_info(&self, channel: &str) -> Result<ChannelInfo, LedgerError> {
		let delay = *self.info_delay.lock().unwrap();
		if let Some(delay) = delay {
			tokio::time::sleep(delay).await;
		}
		let height = self
			.state()
			.ledger
			.get(channel)
			.map(|c| c.blocks.len() as u64)
			.ok_or_else(|| LedgerError::UnknownChannel(channel.to_string()))?;
		Ok(ChannelInfo {
			height,
			current_block_hash: None,
			previous_block_hash: None,
		})
	}

	async fn query_block_by_number(
		&self,
		channel: &str,
		number: u64,
	) -> Result<Block, LedgerError> {
		self.state().fetched.push((channel.to_string(), number));
		self.ledger_block(channel, number)
	}

	async fn query_instantiated_chaincodes(
		&self,
		_channel: &str,
	) -> Result<Vec<ChaincodeInfo>, LedgerError> {
		Ok(vec![ChaincodeInfo {
			name: "mycc".to_string(),
			version: "1.0".to_string(),
			path: "github.com/mycc".to_string(),
		}])
	}

	async fn discover_topology(&self, _channel: &str) -> Result<DiscoveryResults, LedgerError> {
		Ok(default_discovery())
	}

	async fn initialize_new_channel(&self, channel: &str) -> Result<(), LedgerError> {
		let mut state = self.state();
		if !state.ledger.contains_key(channel) {
			return Err(LedgerError::UnknownChannel(channel.to_string()));
		}
		state.registered.insert(channel.to_string());
		Ok(())
	}

	async fn initialize_channel_from_discovery(
		&self,
		_channel: &str,
	) -> Result<DiscoveryResults, LedgerError> {
		self.state().discovery_refreshes += 1;
		Ok(default_discovery())
	}

	async fn subscribe_block_events(
		&self,
		channel: &str,
		start_block: Option<u64>,
	) -> Result<Arc<dyn BlockSubscription>, LedgerError> {
		let subscription = Arc::new(MockSubscription::default());
		self.state()
			.subscriptions
			.push((channel.to_string(), start_block, subscription.clone()));
		Ok(subscription)
	}
}

/// Subscription fed by the test through `deliver`.
#[derive(Default)]
pub struct MockSubscription {
	connected: AtomicBool,
	connects: AtomicUsize,
	sender: Mutex<Option<mpsc::UnboundedSender<Result<Block, LedgerError>>>>,
}

impl MockSubscription {
	pub fn connects(&self) -> usize {
		self.connects.load(Ordering::SeqCst)
	}

	pub fn deliver(&self, block: Block) {
		if let Some(sender) = self.sender.lock().unwrap().as_ref() {
			sender.unbounded_send(Ok(block)).unwrap();
		}
	}

	/// Simulate the transport dropping.
	pub fn drop_connection(&self) {
		self.connected.store(false, Ordering::SeqCst);
		self.sender.lock().unwrap().take();
	}
}

#[async_trait]
impl BlockSubscription for MockSubscription {
	async fn connect(&self) -> Result<BlockStream, LedgerError> {
		let (sender, receiver) = mpsc::unbounded();
		*self.sender.lock().unwrap() = Some(sender);
		self.connected.store(true, Ordering::SeqCst);
		self.connects.fetch_add(1, Ordering::SeqCst);
		Ok(Box::pin(receiver))
	}

	fn disconnect(&self) {
		self.drop_connection();
	}

	fn is_connected(&self) -> bool {
		self.connected.load(Ordering::SeqCst)
	}
}

/// Sink that keeps every notification.
#[derive(Default)]
pub struct RecordingNotifier {
	seen: Mutex<Vec<Notification>>,
}

impl RecordingNotifier {
	pub fn notifications(&self) -> Vec<Notification> {
		self.seen.lock().unwrap().clone()
	}

	pub fn kinds(&self) -> Vec<NotificationKind> {
		self.notifications().iter().map(|n| n.kind).collect()
	}

	pub fn count(&self, kind: NotificationKind) -> usize {
		self.kinds().into_iter().filter(|k| *k == kind).count()
	}
}

#[async_trait]
impl NotificationHandler for RecordingNotifier {
	async fn handle(&self, notification: &Notification) -> Result<(), NotificationError> {
		self.seen.lock().unwrap().push(notification.clone());
		Ok(())
	}

	fn name(&self) -> &'static str {
		"recording"
	}
}
