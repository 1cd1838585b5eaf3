use crate::classifier;
use crate::ledger::{Block, Envelope, HeaderType, LIFECYCLE_NAMESPACES};
use crate::persistence::TransactionRow;
use crate::utils::{hex_or_empty, join_hex_args};

use serde_json::Value;
use tracing::{debug, warn};

/// Names of the ledger's transaction validation codes, indexed by code.
const VALIDATION_CODES: [&str; 26] = [
	"VALID",
	"NIL_ENVELOPE",
	"BAD_PAYLOAD",
	"BAD_COMMON_HEADER",
	"BAD_CREATOR_SIGNATURE",
	"INVALID_ENDORSER_TRANSACTION",
	"INVALID_CONFIG_TRANSACTION",
	"UNSUPPORTED_TX_PAYLOAD",
	"BAD_PROPOSAL_TXID",
	"DUPLICATE_TXID",
	"ENDORSEMENT_POLICY_FAILURE",
	"MVCC_READ_CONFLICT",
	"PHANTOM_READ_CONFLICT",
	"UNKNOWN_TX_TYPE",
	"TARGET_CHAIN_NOT_FOUND",
	"MARSHAL_TX_ERROR",
	"NIL_TXACTION",
	"EXPIRED_CHAINCODE",
	"CHAINCODE_VERSION_CONFLICT",
	"BAD_HEADER_EXTENSION",
	"BAD_CHANNEL_HEADER",
	"BAD_RESPONSE_PAYLOAD",
	"BAD_RWSET",
	"ILLEGAL_WRITESET",
	"INVALID_WRITESET",
	"INVALID_CHAINCODE",
];

/// Name of a numeric validation code.
pub fn validation_code_name(code: u64) -> Option<&'static str> {
	match code {
		254 => Some("NOT_VALIDATED"),
		255 => Some("INVALID_OTHER_REASON"),
		code => VALIDATION_CODES.get(code as usize).copied(),
	}
}

/// A decoded transaction ready to persist.
#[derive(Debug, Clone)]
pub struct DecodedTransaction {
	pub row: TransactionRow,
	/// The transaction deployed or upgraded a chaincode.
	pub deploys_chaincode: bool,
}

/// Turns block envelopes into transaction rows.
///
/// Fields that cannot be coerced are logged and left empty; decoding never fails.
#[derive(Debug, Clone, Default)]
pub struct TransactionDecoder;

impl TransactionDecoder {
	pub fn new() -> Self {
		Self
	}

	/// Decode every envelope of a block, in block order.
	pub fn decode_block(&self, block: &Block, genesis_hash: &str) -> Vec<DecodedTransaction> {
		let block_time = block
			.first_envelope()
			.and_then(|envelope| envelope.payload.header.channel_header.timestamp.clone());

		block
			.data
			.data
			.iter()
			.enumerate()
			.map(|(index, envelope)| {
				self.decode(block, index, envelope, genesis_hash, block_time.as_deref())
			})
			.collect()
	}

	fn decode(
		&self,
		block: &Block,
		index: usize,
		envelope: &Envelope,
		genesis_hash: &str,
		block_time: Option<&str>,
	) -> DecodedTransaction {
		let header = &envelope.payload.header;
		let channel_header = &header.channel_header;
		let tx_id = channel_header.tx_id.clone();

		let validation_code = if tx_id.is_empty() {
			String::new()
		} else {
			self.validation_code(block, index)
		};

		let mut row = TransactionRow {
			blockid: block.header.number,
			txhash: tx_id,
			createdt: channel_header
				.timestamp
				.clone()
				.or_else(|| block_time.map(str::to_string)),
			chaincodename: String::new(),
			chaincode_id: String::new(),
			status: 0,
			creator_msp_id: header.signature_header.creator.mspid.clone(),
			endorser_msp_id: Vec::new(),
			tx_type: channel_header.header_type.as_str().to_string(),
			read_set: String::new(),
			write_set: String::new(),
			channel_genesis_hash: genesis_hash.to_string(),
			validation_code,
			envelope_signature: hex_or_empty(envelope.signature.as_deref()),
			payload_extension: hex_or_empty(channel_header.extension.as_deref()),
			creator_nonce: hex_or_empty(header.signature_header.nonce.as_deref()),
			chaincode_proposal_input: String::new(),
			endorser_signature: String::new(),
			creator_id_bytes: header.signature_header.creator.id_bytes.clone(),
			payload_proposal_hash: String::new(),
			endorser_id_bytes: String::new(),
			operation: String::new(),
			arguments: Default::default(),
		};

		let action = envelope
			.payload
			.data
			.actions
			.as_ref()
			.and_then(|actions| actions.first());

		let mut deploys_chaincode = false;
		if let Some(action) = action {
			let endorsed = &action.payload.action;
			let extension = &endorsed.proposal_response_payload.extension;
			let chaincode_id = &extension.chaincode_id;

			row.chaincodename = chaincode_id.name.clone();
			row.chaincode_id = format!("{}:{}", chaincode_id.name, chaincode_id.version);
			row.status = extension.response.status;
			row.endorser_msp_id = endorsed
				.endorsements
				.iter()
				.map(|endorsement| endorsement.endorser.mspid.clone())
				.collect();
			row.payload_proposal_hash = endorsed.proposal_response_payload.proposal_hash.clone();

			if let Some(first) = endorsed.endorsements.first() {
				row.endorser_signature = hex_or_empty(first.signature.as_deref());
				row.endorser_id_bytes = first.endorser.id_bytes.clone();
			}

			if let Some(args) = action
				.payload
				.chaincode_proposal_payload
				.input
				.as_ref()
				.and_then(|input| input.chaincode_spec.input.args.as_ref())
			{
				row.chaincode_proposal_input = join_hex_args(args);
			}

			let read_set = extension.results.read_set();
			let write_set = extension.results.write_set();
			row.read_set = to_text(&read_set, "read set");
			row.write_set = to_text(&write_set, "write set");

			let classification = classifier::classify(&write_set);
			row.operation = classification.operation.to_string();
			row.arguments = classification.arguments;

			deploys_chaincode = channel_header.header_type == HeaderType::EndorserTransaction
				&& LIFECYCLE_NAMESPACES.contains(&chaincode_id.name.as_str());
		}

		debug!(
			"Decoded tx {} of block {}: {} {:?}",
			row.txhash, row.blockid, row.operation, row.arguments
		);

		DecodedTransaction {
			row,
			deploys_chaincode,
		}
	}

	/// Validation code of the transaction at `index`, from the block's last metadata entry.
	fn validation_code(&self, block: &Block, index: usize) -> String {
		let code = block.validation_codes().and_then(|codes| codes.get(index));
		match code {
			Some(Value::String(name)) => name.clone(),
			Some(Value::Number(number)) => {
				match number.as_u64().and_then(validation_code_name) {
					Some(name) => name.to_string(),
					None => {
						warn!(
							"Unknown validation code {} for tx {} of block {}",
							number, index, block.header.number
						);
						String::new()
					}
				}
			}
			other => {
				warn!(
					"Missing validation code for tx {} of block {}: {:?}",
					index, block.header.number, other
				);
				String::new()
			}
		}
	}
}

fn to_text<T: serde::Serialize>(value: &T, what: &str) -> String {
	serde_json::to_string_pretty(value).unwrap_or_else(|e| {
		warn!("Failed to serialize {}: {}", what, e);
		String::new()
	})
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::sync::test_support::{config_block, endorser_block, envelope_json};
	use serde_json::json;

	#[test]
	fn validation_codes_are_named() {
		assert_eq!(validation_code_name(0), Some("VALID"));
		assert_eq!(validation_code_name(11), Some("MVCC_READ_CONFLICT"));
		assert_eq!(validation_code_name(255), Some("INVALID_OTHER_REASON"));
		assert_eq!(validation_code_name(99), None);
	}

	#[test]
	fn endorser_transactions_are_fully_decoded() {
		let block = endorser_block("mychannel", 4, &["tx-a"], "mycc");
		let decoded = TransactionDecoder::new().decode_block(&block, "gen");

		assert_eq!(decoded.len(), 1);
		let row = &decoded[0].row;
		assert_eq!(row.blockid, 4);
		assert_eq!(row.txhash, "tx-a");
		assert_eq!(row.chaincodename, "mycc");
		assert_eq!(row.chaincode_id, "mycc:1.0");
		assert_eq!(row.validation_code, "VALID");
		assert_eq!(row.tx_type, "ENDORSER_TRANSACTION");
		assert_eq!(row.endorser_msp_id, vec!["Org1MSP".to_string()]);
		assert_eq!(row.creator_msp_id, "Org1MSP");
		assert_eq!(row.chaincode_proposal_input, "7472616e73666572,01");
		assert_eq!(row.envelope_signature, "0a0b");
		assert_eq!(row.operation, "transfer");
		assert_eq!(row.arguments.amount.as_deref(), Some("1.5"));
		assert!(row.write_set.contains("kiesnet-token"));
		assert!(!decoded[0].deploys_chaincode);
	}

	#[test]
	fn lifecycle_transactions_are_flagged() {
		let block = endorser_block("mychannel", 5, &["deploy"], "lscc");
		let decoded = TransactionDecoder::new().decode_block(&block, "gen");
		assert!(decoded[0].deploys_chaincode);
	}

	#[test]
	fn config_transactions_have_no_validation_code_without_tx_id() {
		let block = config_block("mychannel", 0);
		let decoded = TransactionDecoder::new().decode_block(&block, "gen");

		let row = &decoded[0].row;
		assert_eq!(row.validation_code, "");
		assert_eq!(row.tx_type, "CONFIG");
		assert_eq!(row.chaincodename, "");
		assert_eq!(row.operation, "");
	}

	#[test]
	fn bad_validation_codes_leave_the_field_empty() {
		let mut block = endorser_block("mychannel", 6, &["a", "b", "c"], "mycc");
		block.metadata.metadata = vec![json!([]), json!(["VALID", 77])];

		let decoded = TransactionDecoder::new().decode_block(&block, "gen");
		assert_eq!(decoded[0].row.validation_code, "VALID");
		assert_eq!(decoded[1].row.validation_code, "");
		assert_eq!(decoded[2].row.validation_code, "");
		assert_eq!(decoded[2].row.txhash, "c");
	}

	#[test]
	fn envelopes_without_actions_keep_empty_derived_fields() {
		let envelope: Envelope =
			serde_json::from_value(envelope_json("mychannel", "tx-x", "ENDORSER_TRANSACTION", None))
				.unwrap();
		let mut block = endorser_block("mychannel", 8, &[], "mycc");
		block.data.data.push(envelope);
		block.metadata.metadata = vec![json!([0])];

		let decoded = TransactionDecoder::new().decode_block(&block, "gen");
		assert_eq!(decoded[0].row.chaincode_id, "");
		assert_eq!(decoded[0].row.read_set, "");
		assert_eq!(decoded[0].row.validation_code, "VALID");
	}
}
