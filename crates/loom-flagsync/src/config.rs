// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Client configuration and builder.

use std::sync::Arc;
use std::time::Duration;

use loom_flagsync_core::{User, WireFlag};
use tracing::{error, warn};

use crate::bootstrap::JsonBootstrapProvider;
use crate::events::{EventProcessorConfig, DEFAULT_FLUSH_INTERVAL, DEFAULT_MAX_EVENTS_IN_QUEUE};
use crate::platform::{HttpTransport, Persistence, SocketConnector};
use crate::sync::{
	DataSyncMode, PollingConfig, StreamingConfig, TestData, DEFAULT_PING_INTERVAL, DEFAULT_POLLING_INTERVAL,
	DEFAULT_RECONNECT_INTERVALS, MIN_PING_INTERVAL,
};

pub const DEFAULT_START_WAIT_TIME: Duration = Duration::from_secs(5);

pub const STREAMING_PATH: &str = "/streaming";
pub const POLLING_PATH: &str = "/api/public/sdk/client/latest-all";
pub const EVENTS_PATH: &str = "/api/public/insight/track";

/// Configuration for the flags client.
///
/// URL fields hold service base URLs; the endpoint accessors append the
/// fixed paths.
#[derive(Debug, Clone)]
pub struct ClientConfig {
	pub sdk_key: String,
	pub streaming_url: String,
	pub polling_url: String,
	pub events_url: String,
	pub data_sync_mode: DataSyncMode,
	/// How long construction waits for the first sync before failing.
	pub start_wait_time: Duration,
	pub ping_interval: Duration,
	pub reconnect_intervals: Vec<Duration>,
	pub polling_interval: Duration,
	pub flush_interval: Duration,
	pub max_events_in_queue: usize,
	/// No network at all: bootstrap data only.
	pub offline: bool,
}

impl Default for ClientConfig {
	fn default() -> Self {
		Self {
			sdk_key: String::new(),
			streaming_url: String::new(),
			polling_url: String::new(),
			events_url: String::new(),
			data_sync_mode: DataSyncMode::Streaming,
			start_wait_time: DEFAULT_START_WAIT_TIME,
			ping_interval: DEFAULT_PING_INTERVAL,
			reconnect_intervals: DEFAULT_RECONNECT_INTERVALS.to_vec(),
			polling_interval: DEFAULT_POLLING_INTERVAL,
			flush_interval: DEFAULT_FLUSH_INTERVAL,
			max_events_in_queue: DEFAULT_MAX_EVENTS_IN_QUEUE,
			offline: false,
		}
	}
}

fn endpoint(base: &str, path: &str) -> String {
	format!("{}{path}", base.trim_end_matches('/'))
}

impl ClientConfig {
	pub fn streaming_uri(&self) -> String {
		endpoint(&self.streaming_url, STREAMING_PATH)
	}

	pub fn polling_uri(&self) -> String {
		endpoint(&self.polling_url, POLLING_PATH)
	}

	pub fn events_uri(&self) -> String {
		endpoint(&self.events_url, EVENTS_PATH)
	}

	/// Names the endpoints that are required but unset. Empty when offline.
	pub fn missing_endpoints(&self) -> Vec<&'static str> {
		let streaming_missing = self.streaming_url.trim().is_empty();
		let polling_missing = self.polling_url.trim().is_empty();
		let events_missing = self.events_url.trim().is_empty();

		let mut missing = Vec::new();
		if self.offline || !(events_missing || (streaming_missing && polling_missing)) {
			return missing;
		}
		if events_missing {
			missing.push("events_url");
		}
		match self.data_sync_mode {
			DataSyncMode::Streaming if streaming_missing => missing.push("streaming_url"),
			DataSyncMode::Polling if polling_missing => missing.push("polling_url"),
			_ => {}
		}
		missing
	}

	pub(crate) fn log_missing_endpoints(&self) {
		for name in self.missing_endpoints() {
			error!(option = name, "Partial endpoint configuration: {name} is not set");
		}
	}

	pub fn streaming_config(&self) -> StreamingConfig {
		StreamingConfig {
			streaming_uri: self.streaming_uri(),
			sdk_key: self.sdk_key.clone(),
			ping_interval: self.ping_interval,
			reconnect_intervals: self.reconnect_intervals.clone(),
		}
	}

	pub fn polling_config(&self) -> PollingConfig {
		PollingConfig {
			interval: self.polling_interval,
		}
	}

	pub fn event_processor_config(&self) -> EventProcessorConfig {
		EventProcessorConfig {
			flush_interval: self.flush_interval,
			max_events_in_queue: self.max_events_in_queue,
		}
	}
}

/// Builder for [`crate::FlagsClient`].
pub struct FlagsClientBuilder {
	pub(crate) config: ClientConfig,
	pub(crate) user: Option<User>,
	pub(crate) bootstrap: Option<JsonBootstrapProvider>,
	pub(crate) http_transport: Option<Arc<dyn HttpTransport>>,
	pub(crate) socket_connector: Option<Arc<dyn SocketConnector>>,
	pub(crate) persistence: Option<Arc<dyn Persistence>>,
	pub(crate) test_data: Option<TestData>,
}

impl FlagsClientBuilder {
	pub fn new() -> Self {
		Self {
			config: ClientConfig::default(),
			user: None,
			bootstrap: None,
			http_transport: None,
			socket_connector: None,
			persistence: None,
			test_data: None,
		}
	}

	pub fn sdk_key(mut self, key: impl Into<String>) -> Self {
		self.config.sdk_key = key.into();
		self
	}

	pub fn user(mut self, user: User) -> Self {
		self.user = Some(user);
		self
	}

	/// Sets the streaming, polling and events base URLs at once.
	///
	/// Example: `https://flags.example.com`
	pub fn base_url(self, url: impl Into<String>) -> Self {
		let url = url.into();
		self
			.streaming_url(url.clone())
			.polling_url(url.clone())
			.events_url(url)
	}

	pub fn streaming_url(mut self, url: impl Into<String>) -> Self {
		self.config.streaming_url = url.into();
		self
	}

	pub fn polling_url(mut self, url: impl Into<String>) -> Self {
		self.config.polling_url = url.into();
		self
	}

	pub fn events_url(mut self, url: impl Into<String>) -> Self {
		self.config.events_url = url.into();
		self
	}

	pub fn data_sync_mode(mut self, mode: DataSyncMode) -> Self {
		self.config.data_sync_mode = mode;
		self
	}

	pub fn start_wait_time(mut self, wait: Duration) -> Self {
		self.config.start_wait_time = wait;
		self
	}

	/// Raised to [`MIN_PING_INTERVAL`] when shorter.
	pub fn ping_interval(mut self, interval: Duration) -> Self {
		if interval < MIN_PING_INTERVAL {
			warn!(
				requested_ms = interval.as_millis() as u64,
				"Ping interval below minimum, using {}s",
				MIN_PING_INTERVAL.as_secs()
			);
		}
		self.config.ping_interval = interval.max(MIN_PING_INTERVAL);
		self
	}

	/// Backoff sequence for stream reconnects; the last entry repeats.
	pub fn reconnect_intervals(mut self, intervals: Vec<Duration>) -> Self {
		if !intervals.is_empty() {
			self.config.reconnect_intervals = intervals;
		}
		self
	}

	pub fn polling_interval(mut self, interval: Duration) -> Self {
		self.config.polling_interval = interval;
		self
	}

	pub fn flush_interval(mut self, interval: Duration) -> Self {
		self.config.flush_interval = interval;
		self
	}

	pub fn max_events_in_queue(mut self, max: usize) -> Self {
		self.config.max_events_in_queue = max;
		self
	}

	pub fn offline(mut self, offline: bool) -> Self {
		self.config.offline = offline;
		self
	}

	/// Seeds the store with static flags before (or instead of) the first sync.
	pub fn bootstrap(mut self, flags: Vec<WireFlag>) -> Self {
		self.bootstrap = Some(JsonBootstrapProvider::new(flags));
		self
	}

	pub fn bootstrap_provider(mut self, provider: JsonBootstrapProvider) -> Self {
		self.bootstrap = Some(provider);
		self
	}

	pub fn http_transport(mut self, transport: Arc<dyn HttpTransport>) -> Self {
		self.http_transport = Some(transport);
		self
	}

	pub fn socket_connector(mut self, connector: Arc<dyn SocketConnector>) -> Self {
		self.socket_connector = Some(connector);
		self
	}

	pub fn persistence(mut self, persistence: Arc<dyn Persistence>) -> Self {
		self.persistence = Some(persistence);
		self
	}

	/// Serves flags from `data` instead of the flag service. No SDK key or
	/// endpoints are needed and no events are sent.
	pub fn test_data(mut self, data: TestData) -> Self {
		self.test_data = Some(data);
		self
	}

	pub fn config(&self) -> &ClientConfig {
		&self.config
	}
}

impl Default for FlagsClientBuilder {
	fn default() -> Self {
		Self::new()
	}
}

impl std::fmt::Debug for FlagsClientBuilder {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("FlagsClientBuilder")
			.field("config", &self.config)
			.field("user", &self.user)
			.field("bootstrap", &self.bootstrap.as_ref().map(JsonBootstrapProvider::len))
			.field("test_data", &self.test_data.is_some())
			.finish_non_exhaustive()
	}
}
