//! Types for decoded ledger blocks, channel queries and discovery results

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Namespaces of the system chaincodes that deploy and upgrade chaincode.
pub const LIFECYCLE_NAMESPACES: [&str; 2] = ["lscc", "_lifecycle"];

/// A decoded ledger block as delivered by the ledger client.
///
/// The shape follows the ledger's own protobuf layout after decoding: a header carrying the
/// hash chain, the ordered list of transaction envelopes, and the metadata vector whose last
/// entry holds the per-transaction validation codes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Block {
	pub header: BlockHeader,
	#[serde(default)]
	pub data: BlockData,
	#[serde(default)]
	pub metadata: BlockMetadata,
}

impl Block {
	/// First envelope of the block; its header names the channel.
	pub fn first_envelope(&self) -> Option<&Envelope> {
		self.data.data.first()
	}

	/// Channel id taken from the first transaction's channel header.
	pub fn channel_id(&self) -> Option<&str> {
		self.first_envelope()
			.map(|envelope| envelope.payload.header.channel_header.channel_id.as_str())
	}

	/// Whether the block carries a channel configuration transaction.
	pub fn is_config(&self) -> bool {
		self.first_envelope()
			.map(|envelope| envelope.payload.header.channel_header.header_type == HeaderType::Config)
			.unwrap_or(false)
	}

	pub fn tx_count(&self) -> usize {
		self.data.data.len()
	}

	/// Raw validation-code vector stored in the last metadata slot.
	pub fn validation_codes(&self) -> Option<&Vec<serde_json::Value>> {
		self.metadata.metadata.last().and_then(|entry| entry.as_array())
	}
}

/// Block header with the hex-encoded hash chain fields.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlockHeader {
	pub number: u64,
	#[serde(default)]
	pub previous_hash: String,
	#[serde(default)]
	pub data_hash: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BlockData {
	#[serde(default)]
	pub data: Vec<Envelope>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BlockMetadata {
	#[serde(default)]
	pub metadata: Vec<serde_json::Value>,
}

/// A signed transaction envelope.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
	#[serde(default)]
	pub signature: Option<Vec<u8>>,
	pub payload: Payload,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Payload {
	pub header: PayloadHeader,
	#[serde(default)]
	pub data: PayloadData,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PayloadHeader {
	pub channel_header: ChannelHeader,
	#[serde(default)]
	pub signature_header: SignatureHeader,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelHeader {
	#[serde(default)]
	pub header_type: HeaderType,
	#[serde(default)]
	pub version: i32,
	/// RFC 3339 timestamp set by the transaction creator.
	#[serde(default)]
	pub timestamp: Option<String>,
	pub channel_id: String,
	#[serde(default)]
	pub tx_id: String,
	#[serde(default)]
	pub extension: Option<Vec<u8>>,
}

/// Envelope header types known to the ledger.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum HeaderType {
	Message,
	Config,
	ConfigUpdate,
	EndorserTransaction,
	OrdererTransaction,
	DeliverSeekInfo,
	ChaincodePackage,
	#[default]
	#[serde(other)]
	Unknown,
}

impl HeaderType {
	pub fn as_str(&self) -> &'static str {
		match self {
			HeaderType::Message => "MESSAGE",
			HeaderType::Config => "CONFIG",
			HeaderType::ConfigUpdate => "CONFIG_UPDATE",
			HeaderType::EndorserTransaction => "ENDORSER_TRANSACTION",
			HeaderType::OrdererTransaction => "ORDERER_TRANSACTION",
			HeaderType::DeliverSeekInfo => "DELIVER_SEEK_INFO",
			HeaderType::ChaincodePackage => "CHAINCODE_PACKAGE",
			HeaderType::Unknown => "UNKNOWN",
		}
	}
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SignatureHeader {
	#[serde(default)]
	pub creator: Identity,
	#[serde(default)]
	pub nonce: Option<Vec<u8>>,
}

/// Serialized identity of a transaction creator or endorser.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Identity {
	#[serde(default)]
	pub mspid: String,
	#[serde(default)]
	pub id_bytes: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PayloadData {
	#[serde(default)]
	pub actions: Option<Vec<TransactionAction>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransactionAction {
	pub payload: ChaincodeActionPayload,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChaincodeActionPayload {
	#[serde(default)]
	pub chaincode_proposal_payload: ChaincodeProposalPayload,
	pub action: ChaincodeEndorsedAction,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChaincodeProposalPayload {
	#[serde(default)]
	pub input: Option<ChaincodeInvocationSpec>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChaincodeInvocationSpec {
	pub chaincode_spec: ChaincodeSpec,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChaincodeSpec {
	#[serde(default)]
	pub input: ChaincodeInput,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChaincodeInput {
	#[serde(default)]
	pub args: Option<Vec<Vec<u8>>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChaincodeEndorsedAction {
	pub proposal_response_payload: ProposalResponsePayload,
	#[serde(default)]
	pub endorsements: Vec<Endorsement>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProposalResponsePayload {
	#[serde(default)]
	pub proposal_hash: String,
	pub extension: ChaincodeAction,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChaincodeAction {
	#[serde(default)]
	pub chaincode_id: ChaincodeId,
	#[serde(default)]
	pub response: ChaincodeResponse,
	#[serde(default)]
	pub results: TxReadWriteSet,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChaincodeId {
	#[serde(default)]
	pub name: String,
	#[serde(default)]
	pub version: String,
	#[serde(default)]
	pub path: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChaincodeResponse {
	#[serde(default)]
	pub status: i32,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TxReadWriteSet {
	#[serde(default)]
	pub ns_rwset: Vec<NsReadWriteSet>,
}

impl TxReadWriteSet {
	/// Reads grouped by chaincode namespace, in ledger order.
	pub fn read_set(&self) -> Vec<NamespaceReads> {
		self.ns_rwset
			.iter()
			.map(|ns| NamespaceReads {
				chaincode: ns.namespace.clone(),
				set: ns.rwset.reads.clone(),
			})
			.collect()
	}

	/// Writes grouped by chaincode namespace, in ledger order.
	pub fn write_set(&self) -> Vec<NamespaceWrites> {
		self.ns_rwset
			.iter()
			.map(|ns| NamespaceWrites {
				chaincode: ns.namespace.clone(),
				set: ns.rwset.writes.clone(),
			})
			.collect()
	}
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NsReadWriteSet {
	pub namespace: String,
	#[serde(default)]
	pub rwset: KvRwSet,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct KvRwSet {
	#[serde(default)]
	pub reads: Vec<KvRead>,
	#[serde(default)]
	pub writes: Vec<KvWrite>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KvRead {
	pub key: String,
	#[serde(default)]
	pub version: Option<KvVersion>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KvVersion {
	pub block_num: u64,
	pub tx_num: u64,
}

/// A single key write. `value` is the UTF-8 text the chaincode stored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KvWrite {
	pub key: String,
	#[serde(default)]
	pub is_delete: bool,
	#[serde(default)]
	pub value: String,
}

/// Reads of one chaincode namespace, as stored in the transaction row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NamespaceReads {
	pub chaincode: String,
	pub set: Vec<KvRead>,
}

/// Writes of one chaincode namespace, as stored in the transaction row and fed to the
/// write-set classifier.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NamespaceWrites {
	pub chaincode: String,
	pub set: Vec<KvWrite>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Endorsement {
	#[serde(default)]
	pub endorser: Identity,
	#[serde(default)]
	pub signature: Option<Vec<u8>>,
}

/// Result of a channel-info query.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelInfo {
	/// Number of blocks on the peer's ledger; the highest block is `height - 1`.
	pub height: u64,
	#[serde(default)]
	pub current_block_hash: Option<String>,
	#[serde(default)]
	pub previous_block_hash: Option<String>,
}

/// A chaincode instantiated on a channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChaincodeInfo {
	pub name: String,
	pub version: String,
	#[serde(default)]
	pub path: String,
}

/// Chaincode reference reported by discovery for one peer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiscoveredChaincode {
	pub name: String,
	pub version: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscoveredPeer {
	pub mspid: String,
	/// `host:port` the peer advertises.
	pub endpoint: String,
	#[serde(default)]
	pub chaincodes: Vec<DiscoveredChaincode>,
}

impl DiscoveredPeer {
	pub fn host(&self) -> &str {
		host_of(&self.endpoint)
	}
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DiscoveredPeerOrg {
	#[serde(default)]
	pub peers: Vec<DiscoveredPeer>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrdererEndpoint {
	pub host: String,
	pub port: u16,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DiscoveredOrdererOrg {
	#[serde(default)]
	pub endpoints: Vec<OrdererEndpoint>,
}

/// Organization-grouped topology returned by service discovery.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DiscoveryResults {
	#[serde(default)]
	pub peers_by_org: BTreeMap<String, DiscoveredPeerOrg>,
	#[serde(default)]
	pub orderers: BTreeMap<String, DiscoveredOrdererOrg>,
}

impl DiscoveryResults {
	pub fn peers(&self) -> impl Iterator<Item = &DiscoveredPeer> {
		self.peers_by_org.values().flat_map(|org| org.peers.iter())
	}
}

/// Host part of a `host:port` endpoint.
pub fn host_of(endpoint: &str) -> &str {
	endpoint.split(':').next().unwrap_or(endpoint)
}

/// Error types for ledger client operations
#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
	#[error("Gateway error: {0}")]
	Gateway(String),

	#[error("No data returned")]
	NoData,

	#[error("Invalid block header: {0}")]
	InvalidHeader(String),

	#[error("Unknown channel: {0}")]
	UnknownChannel(String),

	#[error("Subscription error: {0}")]
	Subscription(String),

	#[error("WebSocket error: {0}")]
	WebSocketError(#[from] tokio_tungstenite::tungstenite::Error),

	#[error("HTTP error: {0}")]
	HttpError(#[from] reqwest::Error),

	#[error("JSON parse error: {0}")]
	JsonError(#[from] serde_json::Error),
}
