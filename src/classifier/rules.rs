//! Decision procedure over a `RecordTable`.
//!
//! A base operation is chosen from the token balance log, the account records or the identity
//! certificate. A contract record then renames the operation and may supply the transferred
//! parties and amount, and a fee record supplies the fee.

use super::write_set::{RecordKind, RecordTable, RecordValue};
use super::{ClassifiedArguments, Classification, ContractAction, Operation};
use crate::utils::format_amount_text;

use serde_json::Value;

/// Decimals of token amounts and fees.
pub const TOKEN_DECIMALS: u32 = 8;

/// Discriminant of a balance-log record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BalanceLogType {
	Mint,
	Burn,
	TransferSent,
	TransferReceived,
	Withdraw,
	Pay,
	Refund,
	PayPrune,
	FeePrune,
	Unknown(i64),
}

impl BalanceLogType {
	pub fn from_code(code: i64) -> Self {
		match code {
			0 => BalanceLogType::Mint,
			1 => BalanceLogType::Burn,
			2 => BalanceLogType::TransferSent,
			3 => BalanceLogType::TransferReceived,
			5 => BalanceLogType::Withdraw,
			6 => BalanceLogType::Pay,
			7 => BalanceLogType::Refund,
			8 => BalanceLogType::PayPrune,
			9 => BalanceLogType::FeePrune,
			other => BalanceLogType::Unknown(other),
		}
	}
}

fn log_type(record: &RecordValue) -> Option<BalanceLogType> {
	record.integer("type").map(BalanceLogType::from_code)
}

fn zero_fee() -> Option<String> {
	Some("0".to_string())
}

fn absolute(amount: Option<String>) -> Option<String> {
	amount.map(|text| text.trim_start_matches('-').to_string())
}

pub(super) fn classify_table(table: &RecordTable) -> Classification {
	let mut result = if let Some(logs) = table.get(&RecordKind::BalanceLog) {
		classify_balance_logs(table, logs)
	} else if let Some(account) = table.first(&RecordKind::Account) {
		classify_account(table, account)
	} else if table.contains(&RecordKind::Certificate) && table.len() == 1 {
		Classification::new(Operation::Register)
	} else {
		Classification::default()
	};

	if let Some(contract) = table.first(&RecordKind::Contract) {
		apply_contract(table, contract, &mut result);
	}

	if table.contains(&RecordKind::Fee) {
		result.arguments.fee = table
			.first(&RecordKind::Fee)
			.and_then(|fee| fee.text("amount"));
	}

	result.arguments.amount = result
		.arguments
		.amount
		.map(|amount| format_amount_text(&amount, TOKEN_DECIMALS));
	result.arguments.fee = result
		.arguments
		.fee
		.map(|fee| format_amount_text(&fee, TOKEN_DECIMALS));

	result
}

fn classify_balance_logs(table: &RecordTable, logs: &[RecordValue]) -> Classification {
	match logs {
		[log] => classify_single_log(table, log),
		[_, _] => {
			let mut arguments = ClassifiedArguments {
				fee: zero_fee(),
				..Default::default()
			};
			for log in logs {
				match log_type(log) {
					Some(BalanceLogType::TransferSent) => {
						arguments.from = log.text("@balance_log");
					}
					Some(BalanceLogType::TransferReceived) => {
						arguments.amount = log.text("diff");
						arguments.to = log.text("@balance_log");
					}
					_ => {}
				}
			}
			Classification {
				operation: Operation::Transfer,
				arguments,
			}
		}
		_ => Classification::default(),
	}
}

fn classify_single_log(table: &RecordTable, log: &RecordValue) -> Classification {
	let owner = log.text("@balance_log");
	let counterpart = log.text("rid");
	let diff = log.text("diff");

	let (operation, arguments) = match log_type(log) {
		Some(BalanceLogType::Mint) => {
			let operation = if table.contains(&RecordKind::Account)
				&& table.contains(&RecordKind::Holder)
			{
				Operation::TokenCreate
			} else {
				Operation::TokenMint
			};
			(
				operation,
				ClassifiedArguments {
					to: owner,
					amount: diff,
					..Default::default()
				},
			)
		}
		Some(BalanceLogType::Burn) => (
			Operation::TokenBurn,
			ClassifiedArguments {
				to: owner,
				amount: diff,
				..Default::default()
			},
		),
		Some(BalanceLogType::TransferSent) => (
			Operation::Transfer,
			ClassifiedArguments {
				from: owner,
				to: counterpart,
				amount: absolute(diff),
				fee: zero_fee(),
				..Default::default()
			},
		),
		Some(BalanceLogType::TransferReceived) => (
			Operation::Contract {
				action: ContractAction::Execute,
				document_type: Some("transfer".to_string()),
			},
			ClassifiedArguments {
				from: counterpart,
				to: owner,
				amount: diff,
				fee: zero_fee(),
				..Default::default()
			},
		),
		Some(BalanceLogType::Withdraw) => (Operation::Withdraw, ClassifiedArguments::default()),
		Some(BalanceLogType::Pay) => (
			Operation::Pay,
			ClassifiedArguments {
				from: owner,
				to: counterpart,
				amount: table
					.first(&RecordKind::Payment)
					.and_then(|pay| pay.text("amount")),
				..Default::default()
			},
		),
		Some(BalanceLogType::Refund) => (
			Operation::Refund,
			ClassifiedArguments {
				from: counterpart,
				to: owner,
				amount: diff,
				..Default::default()
			},
		),
		Some(BalanceLogType::PayPrune) => (
			Operation::PayPrune,
			ClassifiedArguments {
				fee: zero_fee(),
				..Default::default()
			},
		),
		Some(BalanceLogType::FeePrune) => (Operation::FeePrune, ClassifiedArguments::default()),
		Some(BalanceLogType::Unknown(_)) | None => {
			(Operation::Unrecognized, ClassifiedArguments::default())
		}
	};

	Classification {
		operation,
		arguments,
	}
}

fn classify_account(table: &RecordTable, account: &RecordValue) -> Classification {
	let mut result = Classification::default();
	result.arguments.address = account.text("@account");

	result.operation = if table.len() == 1 {
		if account.is_truthy("suspended_time") {
			Operation::AccountSuspend
		} else {
			Operation::AccountUnsuspend
		}
	} else if table.contains(&RecordKind::Balance) {
		if table.contains(&RecordKind::Holder) {
			Operation::AccountCreate
		} else {
			Operation::Unrecognized
		}
	} else {
		match table.first(&RecordKind::Holder) {
			Some(holder) if holder.is_deleted() => Operation::AccountHolderRemove,
			Some(_) => Operation::AccountHolderAdd,
			None => Operation::Unrecognized,
		}
	};

	result
}

fn document_type(contract: &RecordValue) -> Option<String> {
	match contract.as_record()?.get("document")? {
		Value::Array(items) => items.first().and_then(super::write_set::value_text),
		_ => None,
	}
}

fn apply_contract(table: &RecordTable, contract: &RecordValue, result: &mut Classification) {
	let document_type = document_type(contract);

	let action = if contract.is_truthy("canceled_time") {
		ContractAction::Cancel
	} else {
		let approved = contract.integer("approved_count");
		if approved == Some(1) {
			ContractAction::Create
		} else if approved == contract.integer("signers_count") {
			ContractAction::Execute
		} else {
			ContractAction::Approve
		}
	};

	if action == ContractAction::Execute {
		let transferred = match table.get(&RecordKind::PendingBalance) {
			Some(pending) if pending.len() == 2 => pending
				.iter()
				.find(|entry| entry.as_record().is_some())
				.map(|entry| (entry.text("rid"), entry.text("account"), entry.text("amount"))),
			_ => table
				.first(&RecordKind::Payment)
				.map(|pay| (pay.text("rid"), pay.text("@pay"), pay.text("amount"))),
		};

		if let Some((from, to, amount)) = transferred {
			let arguments = &mut result.arguments;
			arguments.from = arguments.from.take().or(from);
			arguments.to = arguments.to.take().or(to);
			arguments.amount = arguments.amount.take().or(amount);
		}
	}

	result.operation = Operation::Contract {
		action,
		document_type,
	};
}
