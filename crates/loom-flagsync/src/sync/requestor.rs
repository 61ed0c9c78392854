// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use std::sync::Arc;

use loom_flagsync_core::User;
use tracing::debug;

use crate::error::{FlagsError, Result};
use crate::platform::{HttpRequest, HttpTransport};

/// Fetches the current user's flags from the polling endpoint.
#[derive(Clone)]
pub struct Requestor {
	transport: Arc<dyn HttpTransport>,
	url: String,
	sdk_key: String,
}

impl Requestor {
	pub fn new(transport: Arc<dyn HttpTransport>, url: impl Into<String>, sdk_key: impl Into<String>) -> Self {
		Self {
			transport,
			url: url.into(),
			sdk_key: sdk_key.into(),
		}
	}

	/// Posts `user` with the store watermark.
	///
	/// Returns the body on `200`, `None` on `304`, and an error for any other
	/// status.
	pub async fn request_data(&self, timestamp: i64, user: &User) -> Result<Option<String>> {
		let url = format!("{}?timestamp={timestamp}", self.url);
		let body = serde_json::to_string(user)?;

		debug!(url = %url, "Requesting flag data");
		let response = self
			.transport
			.send(HttpRequest::post_json(url, &self.sdk_key, body))
			.await?;

		match response.status {
			200 => Ok(Some(response.body)),
			304 => Ok(None),
			status => Err(FlagsError::from_status(
				status,
				format!("Unexpected status code: {status}"),
			)),
		}
	}
}

impl std::fmt::Debug for Requestor {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("Requestor").field("url", &self.url).finish()
	}
}
