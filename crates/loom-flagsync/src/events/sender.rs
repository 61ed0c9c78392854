// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use loom_common_http::{http_error_message, is_http_recoverable};
use tracing::{debug, warn};

use crate::error::FlagsError;
use crate::platform::{HttpRequest, HttpTransport};

/// Wait before the single retry of a failed delivery.
pub const RETRY_DELAY: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryStatus {
	Succeeded,
	/// Dropped; later deliveries may still work.
	Failed,
	/// The service refused the SDK; stop sending for good.
	FailedAndMustShutDown,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DeliveryResult {
	pub status: DeliveryStatus,
	pub error: Option<FlagsError>,
}

impl DeliveryResult {
	pub fn succeeded() -> Self {
		Self {
			status: DeliveryStatus::Succeeded,
			error: None,
		}
	}

	fn failed(status: DeliveryStatus, error: FlagsError) -> Self {
		Self {
			status,
			error: Some(error),
		}
	}
}

/// Delivers serialized event batches.
#[async_trait]
pub trait EventSender: Send + Sync {
	/// Posts `payload`. With `retry`, a recoverable failure is retried once.
	async fn send(&self, payload: &str, retry: bool) -> DeliveryResult;
}

/// [`EventSender`] posting to the events endpoint.
pub struct HttpEventSender {
	transport: Arc<dyn HttpTransport>,
	events_uri: String,
	sdk_key: String,
	retry_delay: Duration,
}

impl HttpEventSender {
	pub fn new(transport: Arc<dyn HttpTransport>, events_uri: impl Into<String>, sdk_key: impl Into<String>) -> Self {
		Self {
			transport,
			events_uri: events_uri.into(),
			sdk_key: sdk_key.into(),
			retry_delay: RETRY_DELAY,
		}
	}

	pub fn with_retry_delay(mut self, delay: Duration) -> Self {
		self.retry_delay = delay;
		self
	}
}

impl std::fmt::Debug for HttpEventSender {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("HttpEventSender")
			.field("events_uri", &self.events_uri)
			.field("retry_delay", &self.retry_delay)
			.finish_non_exhaustive()
	}
}

#[async_trait]
impl EventSender for HttpEventSender {
	async fn send(&self, payload: &str, retry: bool) -> DeliveryResult {
		let mut retry = retry;

		loop {
			let request = HttpRequest::post_json(&self.events_uri, &self.sdk_key, payload.to_string());
			let error = match self.transport.send(request).await {
				Ok(response) if response.is_success() => {
					debug!(status = response.status, "Delivered events");
					return DeliveryResult::succeeded();
				}
				Ok(response) => {
					let message = http_error_message(
						Some(response.status),
						"",
						"event posting",
						Some("some events were dropped"),
					);
					let error = FlagsError::from_status(response.status, message);
					if !is_http_recoverable(response.status) {
						return DeliveryResult::failed(DeliveryStatus::FailedAndMustShutDown, error);
					}
					error
				}
				Err(error) => error,
			};

			if !retry {
				return DeliveryResult::failed(DeliveryStatus::Failed, error);
			}

			warn!(
				error = %error,
				delay_ms = self.retry_delay.as_millis() as u64,
				"Event delivery failed, retrying once"
			);
			tokio::time::sleep(self.retry_delay).await;
			retry = false;
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::platform::ReqwestTransport;
	use wiremock::matchers::{body_string, header, method, path};
	use wiremock::{Mock, MockServer, ResponseTemplate};

	const TRACK_PATH: &str = "/api/public/insight/track";

	fn sender_for(server: &MockServer) -> HttpEventSender {
		HttpEventSender::new(
			Arc::new(ReqwestTransport::new().unwrap()),
			format!("{}{TRACK_PATH}", server.uri()),
			"sdk-key",
		)
		.with_retry_delay(Duration::from_millis(10))
	}

	#[tokio::test]
	async fn test_2xx_succeeds() {
		let server = MockServer::start().await;
		Mock::given(method("POST"))
			.and(path(TRACK_PATH))
			.and(header("Authorization", "sdk-key"))
			.and(header("Content-Type", "application/json"))
			.and(body_string("[]"))
			.respond_with(ResponseTemplate::new(200))
			.expect(1)
			.mount(&server)
			.await;

		let result = sender_for(&server).send("[]", true).await;
		assert_eq!(result, DeliveryResult::succeeded());
	}

	#[tokio::test]
	async fn test_recoverable_failure_retries_exactly_once() {
		let server = MockServer::start().await;
		Mock::given(method("POST"))
			.respond_with(ResponseTemplate::new(503))
			.expect(2)
			.mount(&server)
			.await;

		let result = sender_for(&server).send("[]", true).await;
		assert_eq!(result.status, DeliveryStatus::Failed);
		assert_eq!(result.error.and_then(|e| e.status()), Some(503));
	}

	#[tokio::test]
	async fn test_retry_can_succeed() {
		let server = MockServer::start().await;
		Mock::given(method("POST"))
			.respond_with(ResponseTemplate::new(500))
			.up_to_n_times(1)
			.mount(&server)
			.await;
		Mock::given(method("POST"))
			.respond_with(ResponseTemplate::new(202))
			.mount(&server)
			.await;

		let result = sender_for(&server).send("[]", true).await;
		assert_eq!(result.status, DeliveryStatus::Succeeded);
	}

	#[tokio::test]
	async fn test_no_retry_when_not_allowed() {
		let server = MockServer::start().await;
		Mock::given(method("POST"))
			.respond_with(ResponseTemplate::new(429))
			.expect(1)
			.mount(&server)
			.await;

		let result = sender_for(&server).send("[]", false).await;
		assert_eq!(result.status, DeliveryStatus::Failed);
	}

	#[tokio::test]
	async fn test_unrecoverable_status_must_shut_down() {
		let server = MockServer::start().await;
		Mock::given(method("POST"))
			.respond_with(ResponseTemplate::new(401))
			.expect(1)
			.mount(&server)
			.await;

		let result = sender_for(&server).send("[]", true).await;
		assert_eq!(result.status, DeliveryStatus::FailedAndMustShutDown);
		assert_eq!(result.error, Some(FlagsError::AuthenticationFailed));
	}
}
