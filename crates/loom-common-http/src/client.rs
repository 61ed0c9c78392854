// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights
// reserved. SPDX-License-Identifier: Proprietary

//! Shared HTTP client with consistent User-Agent header.

use reqwest::{Client, ClientBuilder};

/// Name reported in the User-Agent of every SDK request.
pub const SDK_NAME: &str = "loom-flagsync";

/// Returns the SDK version baked in at compile time.
pub fn sdk_version() -> &'static str {
	env!("CARGO_PKG_VERSION")
}

/// Creates a new HTTP client builder with the standard SDK User-Agent header.
///
/// Use this when you need to customize the client (e.g., set timeout).
///
/// # Example
/// ```ignore
/// let client = loom_common_http::builder()
///     .timeout(Duration::from_secs(30))
///     .build()?;
/// ```
pub fn builder() -> ClientBuilder {
	Client::builder().user_agent(user_agent())
}

/// Returns the standard SDK User-Agent string.
///
/// Format: `loom-flagsync/{version}`
pub fn user_agent() -> String {
	format!("{}/{}", SDK_NAME, sdk_version())
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_user_agent_has_correct_format() {
		let ua = user_agent();
		let parts: Vec<&str> = ua.split('/').collect();
		assert_eq!(parts.len(), 2);
		assert_eq!(parts[0], "loom-flagsync");
		assert_eq!(parts[1], sdk_version());
	}

	#[test]
	fn test_default_builder_builds() {
		assert!(builder().build().is_ok());
	}
}
