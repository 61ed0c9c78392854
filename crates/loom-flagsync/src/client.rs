// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! The flags client.
//!
//! Wires the store, mediator, synchronizer and event pipeline together and
//! tracks initialization. Evaluation never fails: problems are reported
//! through logs and [`ClientEvent`]s and the caller's default is returned.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use loom_flagsync_core::{Namespace, User};
use parking_lot::Mutex;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::bootstrap::JsonBootstrapProvider;
use crate::config::{ClientConfig, FlagsClientBuilder};
use crate::emitter::{ClientEvent, Emitter};
use crate::error::{FlagsError, Result};
use crate::evaluation::{EvalDetail, EvalResult, Evaluator, FromVariation, ReasonKind};
use crate::events::{
	DefaultEventProcessor, Event, EventProcessor, HttpEventSender, MetricEvent, NullEventProcessor,
};
use crate::platform::{HttpTransport, MemoryPersistence, ReqwestTransport, WebSocketConnector};
use crate::store::FlagStore;
use crate::sync::{
	DataSyncMode, DataSynchronizer, NullDataSynchronizer, PollingDataSynchronizer, Requestor,
	StreamingDataSynchronizer, UpdateSink,
};
use crate::updates::DataSourceUpdates;

/// Metric value recorded by [`FlagsClient::track`] when none is given.
pub const DEFAULT_METRIC_VALUE: f64 = 1.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientState {
	Initializing,
	Initialized,
	Failed,
}

#[derive(Debug)]
struct TrackerInner {
	state: ClientState,
	reason: Option<FlagsError>,
	observed: bool,
}

/// Initialization state plus the outcome seen by waiters.
///
/// The outcome is settled at most once, and only after someone asked for it:
/// a waiter arriving after a late success sees success, one that arrived while
/// the client had failed keeps seeing that failure.
#[derive(Debug)]
struct InitTracker {
	inner: Mutex<TrackerInner>,
	outcome: watch::Sender<Option<Result<()>>>,
}

impl InitTracker {
	fn new() -> Self {
		let (outcome, _) = watch::channel(None);
		Self {
			inner: Mutex::new(TrackerInner {
				state: ClientState::Initializing,
				reason: None,
				observed: false,
			}),
			outcome,
		}
	}

	fn state(&self) -> ClientState {
		self.inner.lock().state
	}

	/// Moves to `Initialized`. Returns true on the transition.
	fn succeed(&self) -> bool {
		let mut inner = self.inner.lock();
		if inner.state == ClientState::Initialized {
			return false;
		}
		inner.state = ClientState::Initialized;
		if inner.observed {
			self.settle(Ok(()));
		}
		true
	}

	/// Moves to `Failed` unless already initialized.
	fn fail(&self, error: FlagsError) -> bool {
		let mut inner = self.inner.lock();
		if inner.state == ClientState::Initialized {
			return false;
		}
		inner.state = ClientState::Failed;
		inner.reason = Some(error.clone());
		if inner.observed {
			self.settle(Err(error));
		}
		true
	}

	fn settle(&self, result: Result<()>) {
		self.outcome.send_if_modified(|outcome| {
			if outcome.is_some() {
				return false;
			}
			*outcome = Some(result);
			true
		});
	}

	async fn wait(&self) -> Result<()> {
		let mut rx = self.outcome.subscribe();
		{
			let mut inner = self.inner.lock();
			if !inner.observed {
				inner.observed = true;
				match inner.state {
					ClientState::Initialized => self.settle(Ok(())),
					ClientState::Failed => {
						let reason = inner.reason.clone().unwrap_or(FlagsError::ClientClosed);
						self.settle(Err(reason));
					}
					ClientState::Initializing => {}
				}
			}
		}

		let outcome = rx
			.wait_for(Option::is_some)
			.await
			.map_err(|_| FlagsError::ClientClosed)?
			.clone();
		outcome.unwrap_or(Ok(()))
	}
}

fn mark_ready(tracker: &InitTracker, emitter: &Emitter<ClientEvent>) {
	if tracker.succeed() {
		info!("Flags client initialized");
		emitter.emit(ClientEvent::Ready);
	}
}

fn data_source_failed(tracker: &InitTracker, emitter: &Emitter<ClientEvent>, error: FlagsError) {
	error!(error = %error, "Data synchronization failed");
	emitter.emit(ClientEvent::Error(error.clone()));
	emitter.emit(ClientEvent::Failed(error.clone()));
	tracker.fail(error);
}

struct ClientInner {
	config: ClientConfig,
	store: FlagStore,
	updates: DataSourceUpdates,
	emitter: Emitter<ClientEvent>,
	evaluator: Evaluator,
	bootstrap: Option<JsonBootstrapProvider>,
	synchronizer: Arc<dyn DataSynchronizer>,
	processor: Arc<dyn EventProcessor>,
	tracker: Arc<InitTracker>,
	start_timer: Mutex<Option<JoinHandle<()>>>,
	closed: AtomicBool,
}

impl Drop for ClientInner {
	fn drop(&mut self) {
		if let Some(handle) = self.start_timer.lock().take() {
			handle.abort();
		}
	}
}

/// Client-side feature flag SDK.
///
/// Cheap to clone; clones share one store, synchronizer and event pipeline.
#[derive(Clone)]
pub struct FlagsClient {
	inner: Arc<ClientInner>,
}

impl FlagsClientBuilder {
	/// Builds the client and starts synchronizing.
	///
	/// Returns once synchronization has started, not once it has completed;
	/// use [`FlagsClient::wait_for_initialization`] for that. Must run inside a
	/// tokio runtime.
	pub async fn build(self) -> Result<FlagsClient> {
		let config = self.config;
		let test_data = self.test_data;
		if config.sdk_key.trim().is_empty() && !config.offline && test_data.is_none() {
			return Err(FlagsError::MissingSdkKey);
		}
		let user = self.user.ok_or(FlagsError::MissingUser)?;
		if !user.is_valid() {
			return Err(FlagsError::InvalidUser("key id must not be empty".to_string()));
		}
		if test_data.is_none() {
			config.log_missing_endpoints();
		}

		let persistence = self
			.persistence
			.unwrap_or_else(|| Arc::new(MemoryPersistence::new()));
		let store = FlagStore::new(persistence);
		store.identify(user.clone())?;

		let emitter = Emitter::new();
		let updates = DataSourceUpdates::new(store.clone(), emitter.clone());
		let bootstrap = self.bootstrap.filter(|b| !b.is_empty());
		if let Some(bootstrap) = &bootstrap {
			debug!(flags = bootstrap.len(), "Populating store from bootstrap");
			bootstrap.populate(&user.key_id, &updates);
		}

		let tracker = Arc::new(InitTracker::new());

		let sink = {
			let (ready_tracker, ready_emitter) = (tracker.clone(), emitter.clone());
			let (error_tracker, error_emitter) = (tracker.clone(), emitter.clone());
			UpdateSink::new(
				updates.clone(),
				Arc::new(move || mark_ready(&ready_tracker, &ready_emitter)),
				Arc::new(move |e| data_source_failed(&error_tracker, &error_emitter, e)),
			)
		};

		let (synchronizer, processor): (Arc<dyn DataSynchronizer>, Arc<dyn EventProcessor>) = if config.offline
		{
			(Arc::new(NullDataSynchronizer), Arc::new(NullEventProcessor))
		} else if let Some(test_data) = test_data {
			debug!(flags = test_data.flags().len(), "Serving flags from test data");
			(
				Arc::new(test_data.synchronizer(store.clone(), sink)),
				Arc::new(NullEventProcessor),
			)
		} else {
			let transport: Arc<dyn HttpTransport> = match self.http_transport {
				Some(transport) => transport,
				None => Arc::new(ReqwestTransport::new()?),
			};

			let sender = HttpEventSender::new(transport.clone(), config.events_uri(), config.sdk_key.clone());
			let processor: Arc<dyn EventProcessor> = Arc::new(DefaultEventProcessor::start(
				config.event_processor_config(),
				Arc::new(sender),
			));

			let synchronizer: Arc<dyn DataSynchronizer> = match config.data_sync_mode {
				DataSyncMode::Streaming => {
					let connector = self
						.socket_connector
						.unwrap_or_else(|| Arc::new(WebSocketConnector::new()));
					Arc::new(StreamingDataSynchronizer::new(
						config.streaming_config(),
						connector,
						store.clone(),
						sink,
					))
				}
				DataSyncMode::Polling => {
					let requestor = Requestor::new(transport, config.polling_uri(), config.sdk_key.clone());
					Arc::new(PollingDataSynchronizer::new(
						config.polling_config(),
						requestor,
						store.clone(),
						sink,
					))
				}
			};
			(synchronizer, processor)
		};

		let inner = Arc::new(ClientInner {
			evaluator: Evaluator::new(store.clone()),
			config,
			store,
			updates,
			emitter,
			bootstrap,
			synchronizer,
			processor,
			tracker,
			start_timer: Mutex::new(None),
			closed: AtomicBool::new(false),
		});

		let client = FlagsClient { inner };
		client.start().await;

		info!(
			user_key_id = %user.key_id,
			offline = client.inner.config.offline,
			mode = ?client.inner.config.data_sync_mode,
			"Flags client built"
		);
		Ok(client)
	}
}

impl FlagsClient {
	pub fn builder() -> FlagsClientBuilder {
		FlagsClientBuilder::new()
	}

	async fn start(&self) {
		let inner = &self.inner;
		if inner.config.offline {
			mark_ready(&inner.tracker, &inner.emitter);
			return;
		}

		inner.synchronizer.start().await;

		let wait = inner.config.start_wait_time;
		let tracker = inner.tracker.clone();
		let timer = tokio::spawn(async move {
			tokio::time::sleep(wait).await;
			if tracker.state() != ClientState::Initialized {
				let error = FlagsError::InitializationTimeout(wait.as_millis() as u64);
				warn!(error = %error, "Flags client did not initialize in time");
				tracker.fail(error);
			}
		});
		*inner.start_timer.lock() = Some(timer);
	}

	pub fn initialized(&self) -> bool {
		self.state() == ClientState::Initialized
	}

	pub fn state(&self) -> ClientState {
		self.inner.tracker.state()
	}

	/// Resolves once the client is initialized, or with the error that failed
	/// initialization.
	pub async fn wait_for_initialization(&self) -> Result<()> {
		self.inner.tracker.wait().await
	}

	pub fn subscribe(&self) -> broadcast::Receiver<ClientEvent> {
		self.inner.emitter.subscribe()
	}

	/// The currently identified user.
	pub fn user(&self) -> User {
		self.inner.store.user()
	}

	pub fn config(&self) -> &ClientConfig {
		&self.inner.config
	}

	/// Switches to `user`.
	///
	/// Waits (at most the start wait time) for the synchronizer to deliver the
	/// new user's data, then reports changed keys. An invalid user is logged
	/// and ignored.
	pub async fn identify(&self, user: User) -> Result<()> {
		if self.is_closed() {
			return Err(FlagsError::ClientClosed);
		}
		if !user.is_valid() {
			warn!("Ignoring identify with an empty user key id");
			return Ok(());
		}

		let inner = &self.inner;
		let old = inner.store.snapshot();
		inner.store.identify(user.clone())?;

		let wait = inner.config.start_wait_time;
		match tokio::time::timeout(wait, inner.synchronizer.identify(user.clone())).await {
			Ok(Ok(())) => {}
			Ok(Err(e)) => warn!(error = %e, user_key_id = %user.key_id, "Identify sync failed"),
			Err(_) => warn!(
				wait_ms = wait.as_millis() as u64,
				user_key_id = %user.key_id,
				"Timed out waiting for flag data after identify"
			),
		}

		let new = inner.store.snapshot();
		if new.is_empty() {
			if let Some(bootstrap) = &inner.bootstrap {
				bootstrap.populate(&user.key_id, &inner.updates);
			}
		} else {
			inner.updates.check_updates(&old, &new);
		}
		Ok(())
	}

	pub fn bool_variation(&self, flag_key: &str, default: bool) -> bool {
		self.evaluate(flag_key, default).value
	}

	pub fn bool_variation_detail(&self, flag_key: &str, default: bool) -> EvalDetail<bool> {
		self.evaluate(flag_key, default)
	}

	pub fn number_variation(&self, flag_key: &str, default: f64) -> f64 {
		self.evaluate(flag_key, default).value
	}

	pub fn number_variation_detail(&self, flag_key: &str, default: f64) -> EvalDetail<f64> {
		self.evaluate(flag_key, default)
	}

	pub fn string_variation(&self, flag_key: &str, default: &str) -> String {
		self.evaluate(flag_key, default.to_string()).value
	}

	pub fn string_variation_detail(&self, flag_key: &str, default: &str) -> EvalDetail<String> {
		self.evaluate(flag_key, default.to_string())
	}

	pub fn json_variation(&self, flag_key: &str, default: serde_json::Value) -> serde_json::Value {
		self.evaluate(flag_key, default).value
	}

	pub fn json_variation_detail(&self, flag_key: &str, default: serde_json::Value) -> EvalDetail<serde_json::Value> {
		self.evaluate(flag_key, default)
	}

	/// Untyped variation: the served string as is.
	pub fn variation(&self, flag_key: &str, default: &str) -> String {
		self.string_variation(flag_key, default)
	}

	pub fn variation_detail(&self, flag_key: &str, default: &str) -> EvalDetail<String> {
		self.string_variation_detail(flag_key, default)
	}

	/// Every flag held for the current user, sorted by key. Records no
	/// telemetry.
	pub fn get_all_variations(&self) -> Vec<EvalDetail<String>> {
		let user = self.inner.store.user();
		if !user.is_valid() {
			self.report_invalid_user();
			return Vec::new();
		}

		let (flags, _) = self.inner.store.all(Namespace::Flags);
		let mut keys: Vec<&String> = flags.keys().collect();
		keys.sort();
		keys
			.into_iter()
			.map(|key| {
				let result = self.inner.evaluator.evaluate(key);
				let value = result.entry().map(|e| e.variation.clone()).unwrap_or_default();
				EvalDetail::new(key.clone(), result.kind(), result.reason(), value)
			})
			.collect()
	}

	/// Records a custom metric for the current user. Returns false when the
	/// event was not queued.
	pub fn track(&self, event_name: &str, numeric_value: Option<f64>) -> bool {
		let event = MetricEvent::new(
			self.inner.store.user(),
			event_name,
			numeric_value.unwrap_or(DEFAULT_METRIC_VALUE),
		);
		self.inner.processor.record(Event::Metric(event))
	}

	/// Waits until queued telemetry has been handed to the sender.
	pub async fn flush(&self) -> bool {
		self.inner.processor.flush().await;
		true
	}

	/// Drains telemetry, stops synchronization and closes the store.
	/// Idempotent.
	pub async fn close(&self) {
		if self.inner.closed.swap(true, Ordering::SeqCst) {
			return;
		}
		if let Some(handle) = self.inner.start_timer.lock().take() {
			handle.abort();
		}

		self.inner.processor.close().await;
		self.inner.synchronizer.close().await;
		self.inner.store.close();
		info!("Flags client closed");
	}

	pub fn is_closed(&self) -> bool {
		self.inner.closed.load(Ordering::SeqCst)
	}

	fn report_invalid_user(&self) -> FlagsError {
		let error = FlagsError::InvalidUser("key id must not be empty".to_string());
		warn!(error = %error, "Returning default value");
		self.inner.emitter.emit(ClientEvent::Error(error.clone()));
		error
	}

	fn evaluate<T: FromVariation>(&self, flag_key: &str, default: T) -> EvalDetail<T> {
		let user = self.inner.store.user();
		if !user.is_valid() {
			let error = self.report_invalid_user();
			return EvalDetail::new(
				flag_key,
				ReasonKind::Error,
				format!("{error}; returning default value"),
				default,
			);
		}

		let result = self.inner.evaluator.evaluate(flag_key);
		if let EvalResult::FlagNotFound(key) = &result {
			debug!(flag_key = %key, "Flag not found, returning default value");
			self
				.inner
				.emitter
				.emit(ClientEvent::Error(FlagsError::FlagNotFound(key.clone())));
			return result.convert(flag_key, default);
		}

		let mut detail = result.convert(flag_key, default);
		if !self.initialized() {
			warn!(
				flag_key,
				"Variation called before the flags client finished initializing"
			);
			// the value is still served; only the reason reflects readiness
			if detail.is_match() {
				detail.kind = ReasonKind::ClientNotReady;
			}
		} else if detail.is_match() {
			if let Some(event) = result.to_eval_event(&user) {
				self.inner.processor.record(Event::Eval(event));
			}
		} else {
			debug!(flag_key, kind = %detail.kind, "Returning default value");
		}
		detail
	}
}

impl std::fmt::Debug for FlagsClient {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("FlagsClient")
			.field("state", &self.state())
			.field("user_key_id", &self.inner.store.user_key_id())
			.field("closed", &self.is_closed())
			.finish_non_exhaustive()
	}
}
