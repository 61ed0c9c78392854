// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights
// reserved. SPDX-License-Identifier: Proprietary

//! Classification of HTTP failures.
//!
//! Client errors are terminal except for `400`, `408` and `429`. Everything
//! else (server errors, I/O failures) is worth another attempt.

/// Returns true if a request that failed with `status` may be retried.
pub fn is_http_recoverable(status: u16) -> bool {
	if (400..500).contains(&status) {
		return matches!(status, 400 | 408 | 429);
	}
	true
}

/// Builds the log line for a failed request.
///
/// `status` is `None` for I/O failures, in which case `io_message` describes
/// the failure. Without a `retry_message` the action reads
/// "giving up permanently".
pub fn http_error_message(
	status: Option<u16>,
	io_message: &str,
	context: &str,
	retry_message: Option<&str>,
) -> String {
	let desc = match status {
		Some(401) => "error 401 (invalid SDK key)".to_string(),
		Some(code) => format!("error {code}"),
		None => format!("I/O error ({io_message})"),
	};
	let action = retry_message.unwrap_or("giving up permanently");
	format!("Received {desc} for {context} - {action}")
}

#[cfg(test)]
mod tests {
	use super::*;
	use proptest::prelude::*;

	#[test]
	fn test_recoverable_client_errors() {
		for status in [400, 408, 429] {
			assert!(is_http_recoverable(status), "status {status} should be recoverable");
		}
	}

	#[test]
	fn test_terminal_client_errors() {
		for status in [401, 403, 404, 405, 422] {
			assert!(
				!is_http_recoverable(status),
				"status {status} should not be recoverable"
			);
		}
	}

	#[test]
	fn test_server_errors_are_recoverable() {
		for status in [500, 502, 503, 504] {
			assert!(is_http_recoverable(status));
		}
	}

	#[test]
	fn test_message_flags_invalid_sdk_key() {
		let msg = http_error_message(Some(401), "", "polling request", None);
		assert_eq!(
			msg,
			"Received error 401 (invalid SDK key) for polling request - giving up permanently"
		);
	}

	#[test]
	fn test_message_for_io_failure_with_retry() {
		let msg = http_error_message(None, "connection refused", "event posting", Some("will retry"));
		assert_eq!(
			msg,
			"Received I/O error (connection refused) for event posting - will retry"
		);
	}

	proptest! {
		#[test]
		fn test_non_client_errors_always_recoverable(status in prop_oneof![100u16..400, 500u16..600]) {
			prop_assert!(is_http_recoverable(status));
		}
	}
}
