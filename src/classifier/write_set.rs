//! Grouping of a transaction's writes into typed record buckets.

use crate::ledger::NamespaceWrites;

use serde_json::Value;
use std::collections::BTreeMap;
use tracing::warn;

const IGNORED_NAMESPACE: &str = "lscc";
const NAMESPACE_PREFIX: &str = "kiesnet-cc-";
const NORMALIZED_PREFIX: &str = "kiesnet-";

/// Record types the classifier understands, keyed by `<namespace>.<record type>`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub enum RecordKind {
	/// `kiesnet-token.BLOG`
	BalanceLog,
	/// `kiesnet-token.ACC`
	Account,
	/// `kiesnet-token.HLD`
	Holder,
	/// `kiesnet-token.BLC`
	Balance,
	/// `kiesnet-token.PBLC`
	PendingBalance,
	/// `kiesnet-token.PAY`
	Payment,
	/// `kiesnet-token.FEE`
	Fee,
	/// `kiesnet-id.CERT`
	Certificate,
	/// `kiesnet-contract.CTR`
	Contract,
	Other(String),
}

impl RecordKind {
	fn from_bucket(namespace: &str, record_type: &str) -> Self {
		match (namespace, record_type) {
			("kiesnet-token", "BLOG") => RecordKind::BalanceLog,
			("kiesnet-token", "ACC") => RecordKind::Account,
			("kiesnet-token", "HLD") => RecordKind::Holder,
			("kiesnet-token", "BLC") => RecordKind::Balance,
			("kiesnet-token", "PBLC") => RecordKind::PendingBalance,
			("kiesnet-token", "PAY") => RecordKind::Payment,
			("kiesnet-token", "FEE") => RecordKind::Fee,
			("kiesnet-id", "CERT") => RecordKind::Certificate,
			("kiesnet-contract", "CTR") => RecordKind::Contract,
			_ => RecordKind::Other(format!("{}.{}", namespace, record_type)),
		}
	}
}

/// One decoded write.
#[derive(Debug, Clone, PartialEq)]
pub enum RecordValue {
	Record(Value),
	/// Empty value written as a delete.
	Deleted,
	/// Empty or undecodable value.
	Null,
}

impl RecordValue {
	pub fn as_record(&self) -> Option<&Value> {
		match self {
			RecordValue::Record(value) => Some(value),
			_ => None,
		}
	}

	pub fn is_deleted(&self) -> bool {
		matches!(self, RecordValue::Deleted)
	}

	/// String field of a record.
	pub fn text(&self, field: &str) -> Option<String> {
		self.as_record()
			.and_then(|record| record.get(field))
			.and_then(value_text)
	}

	pub fn integer(&self, field: &str) -> Option<i64> {
		self.as_record()
			.and_then(|record| record.get(field))
			.and_then(Value::as_i64)
	}

	pub fn is_truthy(&self, field: &str) -> bool {
		match self.as_record().and_then(|record| record.get(field)) {
			None | Some(Value::Null) => false,
			Some(Value::Bool(flag)) => *flag,
			Some(Value::Number(number)) => number.as_f64().map(|n| n != 0.0).unwrap_or(true),
			Some(Value::String(text)) => !text.is_empty(),
			Some(_) => true,
		}
	}
}

/// Text form of a scalar JSON value; numbers render without quotes.
pub fn value_text(value: &Value) -> Option<String> {
	match value {
		Value::String(text) => Some(text.clone()),
		Value::Number(number) => Some(number.to_string()),
		Value::Bool(flag) => Some(flag.to_string()),
		_ => None,
	}
}

/// Writes grouped by record kind, each bucket in write order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RecordTable {
	buckets: BTreeMap<RecordKind, Vec<RecordValue>>,
}

impl RecordTable {
	pub fn from_write_set(write_set: &[NamespaceWrites]) -> Self {
		let mut table = Self::default();

		for namespace in write_set {
			if namespace.chaincode == IGNORED_NAMESPACE {
				continue;
			}
			let chaincode = namespace.chaincode.replace(NAMESPACE_PREFIX, NORMALIZED_PREFIX);

			for write in &namespace.set {
				let record_type = match write.key.split_once('_') {
					Some((prefix, _)) if !prefix.is_empty() => prefix,
					_ => continue,
				};
				let kind = RecordKind::from_bucket(&chaincode, record_type);

				let value = if !write.value.is_empty() {
					decode_record(&kind, &write.value)
				} else if write.is_delete {
					RecordValue::Deleted
				} else {
					RecordValue::Null
				};

				match table.buckets.get_mut(&kind) {
					Some(bucket) => bucket.push(value),
					None => {
						// A bucket opened by an empty write starts empty.
						let bucket = match value {
							RecordValue::Null => Vec::new(),
							value => vec![value],
						};
						table.buckets.insert(kind, bucket);
					}
				}
			}
		}

		table
	}

	pub fn contains(&self, kind: &RecordKind) -> bool {
		self.buckets.contains_key(kind)
	}

	pub fn get(&self, kind: &RecordKind) -> Option<&[RecordValue]> {
		self.buckets.get(kind).map(Vec::as_slice)
	}

	pub fn first(&self, kind: &RecordKind) -> Option<&RecordValue> {
		self.buckets.get(kind).and_then(|bucket| bucket.first())
	}

	/// Number of distinct buckets, including unrecognized ones.
	pub fn len(&self) -> usize {
		self.buckets.len()
	}

	pub fn is_empty(&self) -> bool {
		self.buckets.is_empty()
	}
}

fn decode_record(kind: &RecordKind, raw: &str) -> RecordValue {
	let mut value: Value = match serde_json::from_str(raw) {
		Ok(value) => value,
		Err(e) => {
			warn!("Undecodable write-set value ({}): {}", e, raw);
			return RecordValue::Null;
		}
	};

	if *kind == RecordKind::Contract {
		if let Some(document) = value.get_mut("document") {
			match document.as_str().map(serde_json::from_str::<Value>) {
				Some(Ok(decoded)) => *document = decoded,
				Some(Err(e)) => warn!("Undecodable contract document ({}): {}", e, raw),
				None => {}
			}
		}
	}

	RecordValue::Record(value)
}
