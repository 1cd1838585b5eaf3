use itertools::Itertools;

/// Fraction digits shown before the fraction is split with a space.
const FRACTION_GROUP: usize = 4;

/// Render a fixed-point integer amount with `decimals` fraction digits.
///
/// The integer part is grouped by thousands, trailing zero fraction digits are dropped and a
/// fraction longer than four digits is split with a space after the fourth, e.g.
/// `123456789012` with 8 decimals renders as `1,234.5678 9012`.
pub fn format_amount(amount: i128, decimals: u32) -> String {
	if amount == 0 {
		return "0".to_string();
	}

	let sign = if amount < 0 { "-" } else { "" };
	let digits = amount.unsigned_abs().to_string();
	let decimals = decimals as usize;

	let (integer, fraction) = if digits.len() > decimals {
		let (integer, fraction) = digits.split_at(digits.len() - decimals);
		(integer.to_string(), fraction.to_string())
	} else {
		("0".to_string(), format!("{:0>width$}", digits, width = decimals))
	};

	let integer = group_thousands(&integer);
	let fraction = fraction.trim_end_matches('0');

	if fraction.is_empty() {
		format!("{}{}", sign, integer)
	} else if fraction.len() > FRACTION_GROUP {
		let (head, tail) = fraction.split_at(FRACTION_GROUP);
		format!("{}{}.{} {}", sign, integer, head, tail)
	} else {
		format!("{}{}.{}", sign, integer, fraction)
	}
}

/// Format an amount given as decimal text. Text that is not an integer is returned unchanged.
pub fn format_amount_text(text: &str, decimals: u32) -> String {
	match text.trim().parse::<i128>() {
		Ok(amount) => format_amount(amount, decimals),
		Err(_) => text.to_string(),
	}
}

fn group_thousands(digits: &str) -> String {
	let bytes = digits.as_bytes();
	let head = bytes.len() % 3;
	let mut groups = Vec::new();
	if head > 0 {
		groups.push(&digits[..head]);
	}
	groups.extend(bytes[head..].chunks(3).filter_map(|chunk| std::str::from_utf8(chunk).ok()));
	groups.join(",")
}

/// Lowercase hex of an optional byte field; absent fields encode as the empty string.
pub fn hex_or_empty(bytes: Option<&[u8]>) -> String {
	bytes.map(hex::encode).unwrap_or_default()
}

/// Hex-encode each argument and join them with commas.
pub fn join_hex_args(args: &[Vec<u8>]) -> String {
	args.iter().map(hex::encode).join(",")
}
