//! Row types submitted to the mirror repository.
//!
//! Every row names its channel by genesis hash, never by the channel's human name.

use crate::classifier::ClassifiedArguments;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelRow {
	pub name: String,
	pub genesis_block_hash: String,
	#[serde(default)]
	pub channel_hash: String,
	/// Timestamp of the genesis block's first envelope.
	pub create_date: Option<String>,
	pub channel_version: i32,
	pub blocks: u64,
	pub trans: u64,
}

/// Role tag of a network node row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum NodeRole {
	Peer,
	Orderer,
}

impl NodeRole {
	pub fn as_str(&self) -> &'static str {
		match self {
			NodeRole::Peer => "PEER",
			NodeRole::Orderer => "ORDERER",
		}
	}
}

/// A peer or orderer of a channel. Identity is `(server_hostname, channel_genesis_hash)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerRow {
	pub mspid: String,
	pub requests: String,
	pub events: String,
	pub server_hostname: String,
	pub peer_type: NodeRole,
	pub channel_genesis_hash: String,
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PeerChannelRef {
	pub peerid: String,
	pub channelid: String,
	pub peer_type: NodeRole,
}

/// Identity is `(name, version, channel_genesis_hash)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChaincodeRow {
	pub name: String,
	pub version: String,
	pub path: String,
	pub txcount: u64,
	pub createdt: String,
	pub channel_genesis_hash: String,
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ChaincodePeerRef {
	pub chaincodeid: String,
	pub cc_version: String,
	pub peerid: String,
	pub channelid: String,
}

/// Identity is `(blocknum, channel_genesis_hash)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockRow {
	pub blocknum: u64,
	pub datahash: String,
	pub prehash: String,
	pub txcount: u64,
	pub blockhash: String,
	pub channel_genesis_hash: String,
	/// Timestamp of the block's first envelope.
	pub createdt: Option<String>,
}

/// Identity is `(txhash, blockid, channel_genesis_hash)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransactionRow {
	pub blockid: u64,
	pub txhash: String,
	pub createdt: Option<String>,
	pub chaincodename: String,
	/// `name:version` of the invoked chaincode.
	pub chaincode_id: String,
	pub status: i32,
	pub creator_msp_id: String,
	pub endorser_msp_id: Vec<String>,
	/// Header type name of the envelope, e.g. `ENDORSER_TRANSACTION`.
	pub tx_type: String,
	pub read_set: String,
	pub write_set: String,
	pub channel_genesis_hash: String,
	pub validation_code: String,
	pub envelope_signature: String,
	pub payload_extension: String,
	pub creator_nonce: String,
	pub chaincode_proposal_input: String,
	pub endorser_signature: String,
	pub creator_id_bytes: String,
	pub payload_proposal_hash: String,
	pub endorser_id_bytes: String,
	pub operation: String,
	pub arguments: ClassifiedArguments,
}
