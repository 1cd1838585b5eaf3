//! Write-set classification.
//!
//! Reconstructs the business operation a transaction performed (a transfer, an account change, a
//! contract step) from the records its chaincodes wrote. Classification is a pure function of the
//! write-set: the same writes always produce the same operation and arguments, and write-sets
//! outside the known vocabulary classify as `Operation::Unrecognized`.

/// Decision procedure over grouped records
mod rules;
/// Grouping of writes into record buckets
mod write_set;

pub use rules::{BalanceLogType, TOKEN_DECIMALS};
pub use write_set::{RecordKind, RecordTable, RecordValue};

use crate::ledger::NamespaceWrites;

use serde::{Deserialize, Serialize};
use std::fmt;

/// Step of a multi-signature contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContractAction {
	Create,
	Approve,
	Execute,
	Cancel,
}

impl ContractAction {
	pub fn as_str(&self) -> &'static str {
		match self {
			ContractAction::Create => "create",
			ContractAction::Approve => "approve",
			ContractAction::Execute => "execute",
			ContractAction::Cancel => "cancel",
		}
	}
}

/// Recognized operations.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum Operation {
	TokenCreate,
	TokenMint,
	TokenBurn,
	Transfer,
	Withdraw,
	Pay,
	Refund,
	PayPrune,
	FeePrune,
	AccountCreate,
	AccountSuspend,
	AccountUnsuspend,
	AccountHolderAdd,
	AccountHolderRemove,
	Register,
	Contract {
		action: ContractAction,
		document_type: Option<String>,
	},
	/// Renders as the empty string.
	#[default]
	Unrecognized,
}

impl fmt::Display for Operation {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		let name = match self {
			Operation::TokenCreate => "token/create",
			Operation::TokenMint => "token/mint",
			Operation::TokenBurn => "token/burn",
			Operation::Transfer => "transfer",
			Operation::Withdraw => "withdraw",
			Operation::Pay => "pay",
			Operation::Refund => "refund",
			Operation::PayPrune => "pay/prune",
			Operation::FeePrune => "fee/prune",
			Operation::AccountCreate => "account/create",
			Operation::AccountSuspend => "account/suspend",
			Operation::AccountUnsuspend => "account/unsuspend",
			Operation::AccountHolderAdd => "account/holder/add",
			Operation::AccountHolderRemove => "account/holder/remove",
			Operation::Register => "register",
			Operation::Contract {
				action,
				document_type: Some(document_type),
			} => return write!(f, "contract/{} ({})", action.as_str(), document_type),
			Operation::Contract {
				action,
				document_type: None,
			} => return write!(f, "contract/{}", action.as_str()),
			Operation::Unrecognized => "",
		};
		f.write_str(name)
	}
}

/// Named arguments of a classified operation. Amount and fee are already formatted.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassifiedArguments {
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub from: Option<String>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub to: Option<String>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub amount: Option<String>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub fee: Option<String>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub address: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Classification {
	pub operation: Operation,
	pub arguments: ClassifiedArguments,
}

impl Classification {
	pub fn new(operation: Operation) -> Self {
		Self {
			operation,
			arguments: ClassifiedArguments::default(),
		}
	}
}

/// Classify a transaction's write-set.
pub fn classify(write_set: &[NamespaceWrites]) -> Classification {
	rules::classify_table(&RecordTable::from_write_set(write_set))
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::ledger::KvWrite;
	use serde_json::json;

	fn ns(chaincode: &str, writes: &[(&str, serde_json::Value)]) -> NamespaceWrites {
		NamespaceWrites {
			chaincode: chaincode.to_string(),
			set: writes
				.iter()
				.map(|(key, value)| KvWrite {
					key: key.to_string(),
					is_delete: false,
					value: value.to_string(),
				})
				.collect(),
		}
	}

	fn deleted(chaincode: &str, key: &str) -> NamespaceWrites {
		NamespaceWrites {
			chaincode: chaincode.to_string(),
			set: vec![KvWrite {
				key: key.to_string(),
				is_delete: true,
				value: String::new(),
			}],
		}
	}

	#[test]
	fn single_transfer_log() {
		let result = classify(&[ns(
			"kiesnet-cc-token",
			&[(
				"BLOG_1",
				json!({"type": 2, "@balance_log": "alice", "rid": "bob", "diff": "-150000000"}),
			)],
		)]);

		assert_eq!(result.operation, Operation::Transfer);
		assert_eq!(result.operation.to_string(), "transfer");
		assert_eq!(result.arguments.from.as_deref(), Some("alice"));
		assert_eq!(result.arguments.to.as_deref(), Some("bob"));
		assert_eq!(result.arguments.amount.as_deref(), Some("1.5"));
		assert_eq!(result.arguments.fee.as_deref(), Some("0"));
	}

	#[test]
	fn paired_transfer_logs() {
		let result = classify(&[ns(
			"kiesnet-token",
			&[
				("BLOG_1", json!({"type": 2, "@balance_log": "alice", "diff": -5})),
				("BLOG_2", json!({"type": 3, "@balance_log": "bob", "diff": 123456789012i64})),
			],
		)]);

		assert_eq!(result.operation, Operation::Transfer);
		assert_eq!(result.arguments.from.as_deref(), Some("alice"));
		assert_eq!(result.arguments.to.as_deref(), Some("bob"));
		assert_eq!(result.arguments.amount.as_deref(), Some("1,234.5678 9012"));
	}

	#[test]
	fn mint_with_new_account_is_token_create() {
		let result = classify(&[ns(
			"kiesnet-token",
			&[
				("ACC_1", json!({"@account": "a1"})),
				("HLD_1", json!({"holder": "h"})),
				("BLOG_1", json!({"type": 0, "@balance_log": "a1", "diff": "100000000"})),
			],
		)]);
		assert_eq!(result.operation, Operation::TokenCreate);
		assert_eq!(result.arguments.to.as_deref(), Some("a1"));
		assert_eq!(result.arguments.amount.as_deref(), Some("1"));

		let mint = classify(&[ns(
			"kiesnet-token",
			&[("BLOG_1", json!({"type": 0, "@balance_log": "a1", "diff": "0"}))],
		)]);
		assert_eq!(mint.operation.to_string(), "token/mint");
		assert_eq!(mint.arguments.amount.as_deref(), Some("0"));
	}

	#[test]
	fn received_transfer_is_an_executed_transfer_contract() {
		let result = classify(&[ns(
			"kiesnet-token",
			&[("BLOG_1", json!({"type": 3, "@balance_log": "bob", "rid": "alice", "diff": 5}))],
		)]);
		assert_eq!(result.operation.to_string(), "contract/execute (transfer)");
		assert_eq!(result.arguments.from.as_deref(), Some("alice"));
		assert_eq!(result.arguments.to.as_deref(), Some("bob"));
	}

	#[test]
	fn pay_takes_the_amount_from_the_payment_record() {
		let result = classify(&[ns(
			"kiesnet-token",
			&[
				("BLOG_1", json!({"type": 6, "@balance_log": "alice", "rid": "shop", "diff": -7})),
				("PAY_1", json!({"amount": "250000000"})),
			],
		)]);
		assert_eq!(result.operation, Operation::Pay);
		assert_eq!(result.arguments.amount.as_deref(), Some("2.5"));
	}

	#[test]
	fn fee_record_supplies_the_fee() {
		let result = classify(&[ns(
			"kiesnet-token",
			&[
				("BLOG_1", json!({"type": 2, "@balance_log": "alice", "rid": "bob", "diff": -100})),
				("FEE_1", json!({"amount": 1000000})),
			],
		)]);
		assert_eq!(result.arguments.fee.as_deref(), Some("0.01"));
	}

	#[test]
	fn prune_and_withdraw_carry_no_parties() {
		let withdraw = classify(&[ns("kiesnet-token", &[("BLOG_1", json!({"type": 5}))])]);
		assert_eq!(withdraw.operation, Operation::Withdraw);
		assert_eq!(withdraw.arguments, ClassifiedArguments::default());

		let pay_prune = classify(&[ns("kiesnet-token", &[("BLOG_1", json!({"type": 8}))])]);
		assert_eq!(pay_prune.operation.to_string(), "pay/prune");
		assert_eq!(pay_prune.arguments.fee.as_deref(), Some("0"));

		let fee_prune = classify(&[ns("kiesnet-token", &[("BLOG_1", json!({"type": 9}))])]);
		assert_eq!(fee_prune.operation.to_string(), "fee/prune");
	}

	#[test]
	fn account_operations() {
		let suspend = classify(&[ns(
			"kiesnet-token",
			&[("ACC_1", json!({"@account": "a1", "suspended_time": "2024-01-01"}))],
		)]);
		assert_eq!(suspend.operation, Operation::AccountSuspend);
		assert_eq!(suspend.arguments.address.as_deref(), Some("a1"));

		let unsuspend = classify(&[ns(
			"kiesnet-token",
			&[("ACC_1", json!({"@account": "a1", "suspended_time": ""}))],
		)]);
		assert_eq!(unsuspend.operation.to_string(), "account/unsuspend");

		let create = classify(&[ns(
			"kiesnet-token",
			&[
				("ACC_1", json!({"@account": "a1"})),
				("BLC_1", json!({"amount": 0})),
				("HLD_1", json!({"holder": "h"})),
			],
		)]);
		assert_eq!(create.operation, Operation::AccountCreate);

		let add = classify(&[ns(
			"kiesnet-token",
			&[("ACC_1", json!({"@account": "a1"})), ("HLD_2", json!({"holder": "h2"}))],
		)]);
		assert_eq!(add.operation, Operation::AccountHolderAdd);

		let remove = classify(&[
			ns("kiesnet-token", &[("ACC_1", json!({"@account": "a1"}))]),
			deleted("kiesnet-token", "HLD_2"),
		]);
		assert_eq!(remove.operation.to_string(), "account/holder/remove");
	}

	#[test]
	fn certificate_alone_is_register() {
		let result = classify(&[ns("kiesnet-cc-id", &[("CERT_1", json!({"sn": "1"}))])]);
		assert_eq!(result.operation, Operation::Register);
	}

	#[test]
	fn contract_steps_carry_the_document_type() {
		let contract = |record: serde_json::Value| {
			let mut record = record;
			record["document"] = json!(json!(["transfer", "payload"]).to_string());
			ns("kiesnet-contract", &[("CTR_1", record)])
		};

		let create = classify(&[contract(json!({"approved_count": 1, "signers_count": 2}))]);
		assert_eq!(create.operation.to_string(), "contract/create (transfer)");

		let approve = classify(&[contract(json!({"approved_count": 2, "signers_count": 3}))]);
		assert_eq!(approve.operation.to_string(), "contract/approve (transfer)");

		let cancel = classify(&[contract(
			json!({"approved_count": 1, "signers_count": 2, "canceled_time": "t"}),
		)]);
		assert_eq!(cancel.operation.to_string(), "contract/cancel (transfer)");
	}

	#[test]
	fn executed_contract_fills_parties_from_pending_balances() {
		let mut record = json!({"approved_count": 2, "signers_count": 2});
		record["document"] = json!(json!(["transfer"]).to_string());

		let result = classify(&[
			ns("kiesnet-contract", &[("CTR_1", record)]),
			deleted("kiesnet-token", "PBLC_1"),
			ns(
				"kiesnet-token",
				&[(
					"PBLC_2",
					json!({"rid": "alice", "account": "bob", "amount": "300000000"}),
				)],
			),
		]);

		assert_eq!(result.operation.to_string(), "contract/execute (transfer)");
		assert_eq!(result.arguments.from.as_deref(), Some("alice"));
		assert_eq!(result.arguments.to.as_deref(), Some("bob"));
		assert_eq!(result.arguments.amount.as_deref(), Some("3"));
	}

	#[test]
	fn executed_contract_keeps_parties_of_the_base_operation() {
		let mut record = json!({"approved_count": 2, "signers_count": 2});
		record["document"] = json!(json!(["pay"]).to_string());

		let result = classify(&[
			ns(
				"kiesnet-token",
				&[("BLOG_1", json!({"type": 3, "@balance_log": "bob", "rid": "alice", "diff": 5}))],
			),
			ns("kiesnet-token", &[("PAY_1", json!({"rid": "carol", "@pay": "p1", "amount": 9}))]),
			ns("kiesnet-contract", &[("CTR_1", record)]),
		]);

		assert_eq!(result.operation.to_string(), "contract/execute (pay)");
		assert_eq!(result.arguments.from.as_deref(), Some("alice"));
		assert_eq!(result.arguments.to.as_deref(), Some("bob"));
		assert_eq!(result.arguments.amount.as_deref(), Some("0.0000 0005"));
	}

	#[test]
	fn unknown_shapes_are_unrecognized() {
		let result = classify(&[ns("marbles", &[("MRB_1", json!({"color": "red"}))])]);
		assert_eq!(result, Classification::default());
		assert_eq!(result.operation.to_string(), "");

		let unknown_log = classify(&[ns("kiesnet-token", &[("BLOG_1", json!({"type": 4}))])]);
		assert_eq!(unknown_log.operation, Operation::Unrecognized);

		assert_eq!(classify(&[]), Classification::default());
	}

	#[test]
	fn classification_is_deterministic() {
		let write_set = vec![
			ns(
				"kiesnet-token",
				&[
					("BLOG_1", json!({"type": 2, "@balance_log": "alice", "diff": -5})),
					("BLOG_2", json!({"type": 3, "@balance_log": "bob", "diff": 5})),
				],
			),
			ns("kiesnet-token", &[("FEE_1", json!({"amount": 10}))]),
		];

		let first = classify(&write_set);
		for _ in 0..3 {
			assert_eq!(classify(&write_set), first);
		}
		let _ = classify(&[ns("kiesnet-token", &[("BLOG_1", json!({"type": 5}))])]);
		assert_eq!(classify(&write_set), first);
	}
}
