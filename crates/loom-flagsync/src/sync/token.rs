// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Connection token passed on the streaming URL.
//!
//! The token is the SDK key (trailing `=` stripped) with the current
//! millisecond timestamp spliced in at a random position. Digits are written
//! with a letter alphabet. The output is
//! `enc(start, 3) + enc(len(ts), 2) + key[..start] + ts + key[start..]`.

use chrono::Utc;

const ALPHABET: [char; 10] = ['Q', 'B', 'W', 'S', 'P', 'H', 'D', 'X', 'Z', 'U'];
const PAD_WIDTH: usize = 12;

/// Writes the last `width` decimal digits of `value` (zero padded) with the
/// token alphabet.
fn encode_number(value: u64, width: usize) -> String {
	let padded = format!("{value:0>pad$}", pad = PAD_WIDTH);
	let digits = &padded[padded.len().saturating_sub(width)..];
	digits
		.bytes()
		.map(|b| ALPHABET[usize::from(b - b'0')])
		.collect()
}

/// Token for `sdk_key` at the current time.
pub fn connection_token(sdk_key: &str) -> String {
	connection_token_at(sdk_key, Utc::now().timestamp_millis(), fastrand::f64())
}

/// Token for `sdk_key` at `timestamp_ms`, with `random` in `[0, 1)` choosing
/// the splice position.
pub fn connection_token_at(sdk_key: &str, timestamp_ms: i64, random: f64) -> String {
	let text = sdk_key.trim_end_matches('=');
	let timestamp = timestamp_ms.max(0) as u64;
	let timestamp_code = encode_number(timestamp, timestamp.to_string().len());

	let start = ((random * text.len() as f64).floor() as usize).max(2);
	let mut split = start.min(text.len());
	while !text.is_char_boundary(split) {
		split -= 1;
	}

	format!(
		"{}{}{}{}{}",
		encode_number(start as u64, 3),
		encode_number(timestamp_code.len() as u64, 2),
		&text[..split],
		timestamp_code,
		&text[split..]
	)
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_encode_number_pads_and_maps() {
		assert_eq!(encode_number(3, 3), "QQS");
		assert_eq!(encode_number(13, 2), "BS");
		assert_eq!(encode_number(1234567890, 10), "BWSPHDXZUQ");
	}

	#[test]
	fn test_encode_number_keeps_last_digits() {
		assert_eq!(encode_number(1234, 3), "WSP");
	}

	#[test]
	fn test_token_layout() {
		let token = connection_token_at("abcdef==", 1_700_000_000_000, 0.5);
		assert_eq!(token, "QQSBSabcBXQQQQQQQQQQQdef");
	}

	#[test]
	fn test_start_is_at_least_two() {
		let token = connection_token_at("abcdef", 5, 0.0);
		// start 2, timestamp "5" -> "H", length 1
		assert_eq!(token, "QQWQBabHcdef");
	}

	#[test]
	fn test_short_key_does_not_panic() {
		let token = connection_token_at("a", 5, 0.9);
		assert_eq!(token, "QQWQBaH");
	}

	#[test]
	fn test_live_token_contains_key_parts() {
		let token = connection_token("sdk-key-value");
		assert!(token.len() > "sdk-key-value".len() + 5);
		assert!(token.chars().take(5).all(|c| ALPHABET.contains(&c)));
	}
}
