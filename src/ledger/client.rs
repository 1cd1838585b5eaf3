//!
//! Client for a ledger REST gateway.
//!
//! The gateway fronts the ledger's peers and orderers: it performs TLS/gRPC transport, discovery
//! and block decoding, and exposes the results as JSON over HTTP. Block events are pushed over a
//! WebSocket per channel. All methods are async and designed for use with Tokio.

use super::types::*;
use super::{BlockStream, BlockSubscription, LedgerClient};
use crate::config::GatewayConfig;

use async_trait::async_trait;
use backoff::{ExponentialBackoff, future::retry};
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde_json::json;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::oneshot;
use tokio_tungstenite::{
	MaybeTlsStream, WebSocketStream, connect_async,
	tungstenite::{Message, client::IntoClientRequest},
};
use tracing::{debug, error, info, warn};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Ledger gateway client
pub struct GatewayLedgerClient {
	/// The underlying HTTP client for queries.
	http_client: Client,
	/// Base URL of the gateway HTTP API.
	http_url: String,
	/// Base URL of the gateway WebSocket API.
	ws_url: String,
	client_name: String,
	/// Maximum time spent retrying a single query.
	retry_budget: Duration,
	/// Channel name -> genesis hash for every channel initialized in this client.
	registry: RwLock<HashMap<String, String>>,
}

#[derive(serde::Deserialize)]
struct ChannelList {
	channels: Vec<String>,
}

impl GatewayLedgerClient {
	/// Create a new gateway client.
	///
	/// # Arguments
	/// * `client_name` - The client identity this process syncs as.
	/// * `config` - Gateway endpoints and request timeout.
	pub fn new(client_name: String, config: &GatewayConfig) -> Result<Self, LedgerError> {
		let http_client = Client::builder()
			.timeout(Duration::from_secs(config.request_timeout_secs))
			.build()?;

		Ok(Self {
			http_client,
			http_url: config.http_url.trim_end_matches('/').to_string(),
			ws_url: config.ws_url.trim_end_matches('/').to_string(),
			client_name,
			retry_budget: Duration::from_secs(config.request_timeout_secs * 2),
			registry: RwLock::new(HashMap::new()),
		})
	}

	/// Initialize every channel the default peer has joined.
	pub async fn initialize(&self) -> Result<(), LedgerError> {
		for channel in self.query_channels().await? {
			self.initialize_new_channel(&channel).await?;
		}
		info!(
			"Gateway client {} initialized with {} channels",
			self.client_name,
			self.channels().len()
		);
		Ok(())
	}

	/// GET a gateway resource, retrying transport failures and server errors.
	async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, LedgerError> {
		let url = format!("{}{}", self.http_url, path);
		let policy = ExponentialBackoff {
			max_elapsed_time: Some(self.retry_budget),
			..ExponentialBackoff::default()
		};

		retry(policy, || async {
			let response = self.http_client.get(&url).send().await.map_err(|e| {
				warn!("Gateway request to {} failed: {}", url, e);
				backoff::Error::transient(LedgerError::from(e))
			})?;

			let status = response.status();
			if status.is_server_error() {
				return Err(backoff::Error::transient(LedgerError::Gateway(format!(
					"HTTP error: {}",
					status
				))));
			}
			if !status.is_success() {
				return Err(backoff::Error::permanent(LedgerError::Gateway(format!(
					"HTTP error: {} for {}",
					status, url
				))));
			}

			response
				.json::<T>()
				.await
				.map_err(|e| backoff::Error::permanent(LedgerError::from(e)))
		})
		.await
	}

	fn register_channel(&self, channel: &str, genesis_hash: String) {
		self.registry
			.write()
			.unwrap_or_else(|poisoned| poisoned.into_inner())
			.insert(channel.to_string(), genesis_hash);
	}
}

#[async_trait]
impl LedgerClient for GatewayLedgerClient {
	fn client_name(&self) -> &str {
		&self.client_name
	}

	fn channels(&self) -> Vec<String> {
		self.registry
			.read()
			.unwrap_or_else(|poisoned| poisoned.into_inner())
			.keys()
			.cloned()
			.collect()
	}

	fn channel_genesis_hash(&self, channel: &str) -> Option<String> {
		self.registry
			.read()
			.unwrap_or_else(|poisoned| poisoned.into_inner())
			.get(channel)
			.cloned()
	}

	async fn query_channels(&self) -> Result<Vec<String>, LedgerError> {
		let list: ChannelList = self.get_json("/channels").await?;
		Ok(list.channels)
	}

	async fn genesis_block(&self, channel: &str) -> Result<Block, LedgerError> {
		self.query_block_by_number(channel, 0).await
	}

	async fn query_channel_info(&self, channel: &str) -> Result<ChannelInfo, LedgerError> {
		self.get_json(&format!("/channels/{}/info", channel)).await
	}

	async fn query_block_by_number(
		&self,
		channel: &str,
		number: u64,
	) -> Result<Block, LedgerError> {
		self.get_json(&format!("/channels/{}/blocks/{}", channel, number))
			.await
	}

	async fn query_instantiated_chaincodes(
		&self,
		channel: &str,
	) -> Result<Vec<ChaincodeInfo>, LedgerError> {
		self.get_json(&format!("/channels/{}/chaincodes", channel))
			.await
	}

	async fn discover_topology(&self, channel: &str) -> Result<DiscoveryResults, LedgerError> {
		self.get_json(&format!("/channels/{}/discovery", channel))
			.await
	}

	async fn initialize_new_channel(&self, channel: &str) -> Result<(), LedgerError> {
		let genesis = self.genesis_block(channel).await?;
		let genesis_hash = genesis.header.hash()?;
		debug!("Channel {} has genesis hash {}", channel, genesis_hash);
		self.register_channel(channel, genesis_hash);
		Ok(())
	}

	async fn initialize_channel_from_discovery(
		&self,
		channel: &str,
	) -> Result<DiscoveryResults, LedgerError> {
		if self.channel_genesis_hash(channel).is_none() {
			self.initialize_new_channel(channel).await?;
		}
		self.discover_topology(channel).await
	}

	async fn subscribe_block_events(
		&self,
		channel: &str,
		start_block: Option<u64>,
	) -> Result<Arc<dyn BlockSubscription>, LedgerError> {
		if self.channel_genesis_hash(channel).is_none() {
			return Err(LedgerError::UnknownChannel(channel.to_string()));
		}
		Ok(Arc::new(GatewaySubscription::new(
			format!("{}/channels/{}/blocks", self.ws_url, channel),
			channel.to_string(),
			start_block,
		)))
	}
}

/// Block-event subscription over a gateway WebSocket.
///
/// The subscription remembers the last block it delivered so that a reconnect resumes after it
/// instead of replaying from the original start block.
pub struct GatewaySubscription {
	url: String,
	channel: String,
	next_block: Arc<Mutex<Option<u64>>>,
	connected: Arc<AtomicBool>,
	stop: Mutex<Option<oneshot::Sender<()>>>,
}

impl GatewaySubscription {
	pub fn new(url: String, channel: String, start_block: Option<u64>) -> Self {
		Self {
			url,
			channel,
			next_block: Arc::new(Mutex::new(start_block)),
			connected: Arc::new(AtomicBool::new(false)),
			stop: Mutex::new(None),
		}
	}

	async fn handshake(&self) -> Result<WsStream, LedgerError> {
		debug!("Attempting WebSocket connection to: {}", self.url);
		let request = self.url.clone().into_client_request()?;
		let (mut ws_stream, response) = connect_async(request).await?;
		debug!(
			"WebSocket connection established, response status: {}",
			response.status()
		);

		ws_stream
			.send(Message::Text(json!({ "type": "connection_init" }).to_string()))
			.await?;

		match ws_stream.next().await {
			Some(msg) => match msg? {
				Message::Text(text) => {
					let parsed: serde_json::Value = serde_json::from_str(&text)?;
					if parsed.get("type").and_then(|t| t.as_str()) != Some("connection_ack") {
						return Err(LedgerError::Subscription(
							"Connection not acknowledged".to_string(),
						));
					}
				}
				_ => {
					return Err(LedgerError::Subscription(
						"Unexpected message type during handshake".to_string(),
					));
				}
			},
			None => {
				return Err(LedgerError::Subscription(
					"Connection closed during handshake".to_string(),
				));
			}
		}

		let mut payload = json!({ "channel": self.channel });
		if let Some(start) = self.next_block.lock().ok().and_then(|next| *next) {
			payload["start_block"] = json!(start);
		}
		ws_stream
			.send(Message::Text(
				json!({ "type": "subscribe", "payload": payload }).to_string(),
			))
			.await?;

		Ok(ws_stream)
	}
}

struct DeliveryState {
	_sender: SplitSink<WsStream, Message>,
	receiver: SplitStream<WsStream>,
	stop: oneshot::Receiver<()>,
	connected: Arc<AtomicBool>,
	next_block: Arc<Mutex<Option<u64>>>,
	channel: String,
}

/// Parse one gateway frame. `Ok(None)` means the frame carries no block.
fn parse_block_message(text: &str) -> Result<Option<Block>, LedgerError> {
	let parsed: serde_json::Value = serde_json::from_str(text)?;
	match parsed.get("type").and_then(|t| t.as_str()) {
		Some("block") => {
			let payload = parsed.get("payload").cloned().ok_or(LedgerError::NoData)?;
			Ok(Some(serde_json::from_value(payload)?))
		}
		Some("error") => {
			let message = parsed
				.get("payload")
				.and_then(|p| p.get("message"))
				.and_then(|m| m.as_str())
				.unwrap_or("Unknown subscription error");
			Err(LedgerError::Subscription(message.to_string()))
		}
		Some(other) => {
			debug!("Ignoring message type: {}", other);
			Ok(None)
		}
		None => Err(LedgerError::Subscription(
			"Message missing type field".to_string(),
		)),
	}
}

#[async_trait]
impl BlockSubscription for GatewaySubscription {
	async fn connect(&self) -> Result<BlockStream, LedgerError> {
		let ws_stream = self.handshake().await?;
		let (sender, receiver) = ws_stream.split();

		let (stop_tx, stop_rx) = oneshot::channel();
		if let Ok(mut stop) = self.stop.lock() {
			*stop = Some(stop_tx);
		}
		self.connected.store(true, Ordering::SeqCst);
		info!("Subscribed to block events of channel {}", self.channel);

		let state = DeliveryState {
			_sender: sender,
			receiver,
			stop: stop_rx,
			connected: self.connected.clone(),
			next_block: self.next_block.clone(),
			channel: self.channel.clone(),
		};

		let stream = futures_util::stream::unfold(state, |mut state| async move {
			loop {
				tokio::select! {
					_ = &mut state.stop => {
						state.connected.store(false, Ordering::SeqCst);
						return None;
					}
					msg = state.receiver.next() => match msg {
						Some(Ok(Message::Text(text))) => match parse_block_message(&text) {
							Ok(Some(block)) => {
								if let Ok(mut next) = state.next_block.lock() {
									*next = Some(block.header.number + 1);
								}
								return Some((Ok(block), state));
							}
							Ok(None) => continue,
							Err(e) => return Some((Err(e), state)),
						},
						Some(Ok(Message::Close(_))) | None => {
							info!("Block event stream of channel {} closed", state.channel);
							state.connected.store(false, Ordering::SeqCst);
							return None;
						}
						Some(Ok(_)) => continue,
						Some(Err(e)) => {
							error!("Error in block subscription of {}: {}", state.channel, e);
							state.connected.store(false, Ordering::SeqCst);
							return Some((Err(LedgerError::from(e)), state));
						}
					}
				}
			}
		});

		Ok(Box::pin(stream))
	}

	fn disconnect(&self) {
		if let Some(stop) = self.stop.lock().ok().and_then(|mut stop| stop.take()) {
			let _ = stop.send(());
		}
		self.connected.store(false, Ordering::SeqCst);
	}

	fn is_connected(&self) -> bool {
		self.connected.load(Ordering::SeqCst)
	}
}
