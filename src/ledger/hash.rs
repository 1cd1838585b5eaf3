//! Block header hashing.
//!
//! The ledger chains blocks by the SHA-256 of the DER encoding of
//! `SEQUENCE { INTEGER number, OCTET STRING previous_hash, OCTET STRING data_hash }`.
//! Header hash fields travel hex encoded.

use super::types::{BlockHeader, LedgerError};

use sha2::{Digest, Sha256};

impl BlockHeader {
	/// Hex-encoded hash of this header.
	pub fn hash(&self) -> Result<String, LedgerError> {
		let previous_hash = decode_field("previous_hash", &self.previous_hash)?;
		let data_hash = decode_field("data_hash", &self.data_hash)?;

		let mut body = Vec::with_capacity(previous_hash.len() + data_hash.len() + 16);
		push_integer(&mut body, self.number);
		push_tlv(&mut body, 0x04, &previous_hash);
		push_tlv(&mut body, 0x04, &data_hash);

		let mut encoded = Vec::with_capacity(body.len() + 4);
		push_tlv(&mut encoded, 0x30, &body);

		Ok(hex::encode(Sha256::digest(&encoded)))
	}
}

fn decode_field(name: &str, value: &str) -> Result<Vec<u8>, LedgerError> {
	hex::decode(value)
		.map_err(|e| LedgerError::InvalidHeader(format!("{} is not hex: {}", name, e)))
}

fn push_length(out: &mut Vec<u8>, len: usize) {
	if len < 0x80 {
		out.push(len as u8);
		return;
	}
	let bytes = len.to_be_bytes();
	let skip = bytes.iter().take_while(|b| **b == 0).count();
	out.push(0x80 | (bytes.len() - skip) as u8);
	out.extend_from_slice(&bytes[skip..]);
}

fn push_tlv(out: &mut Vec<u8>, tag: u8, content: &[u8]) {
	out.push(tag);
	push_length(out, content.len());
	out.extend_from_slice(content);
}

/// Minimal two's-complement encoding of a non-negative integer.
fn push_integer(out: &mut Vec<u8>, value: u64) {
	let bytes = value.to_be_bytes();
	let skip = bytes
		.iter()
		.take_while(|b| **b == 0)
		.count()
		.min(bytes.len() - 1);
	let mut content = Vec::with_capacity(9);
	if bytes[skip] & 0x80 != 0 {
		content.push(0);
	}
	content.extend_from_slice(&bytes[skip..]);
	push_tlv(out, 0x02, &content);
}
