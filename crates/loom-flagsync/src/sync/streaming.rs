// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Streaming synchronizer.
//!
//! Holds a socket to the flag service open, asks for data on every open, keeps
//! the socket alive with pings and reconnects after unintentional closes using
//! a fixed backoff sequence.

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use loom_flagsync_core::{parse_message, OutboundMessage, User};
use parking_lot::Mutex;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};
use url::Url;

use super::token::connection_token;
use super::{DataSynchronizer, UpdateSink};
use crate::error::{FlagsError, Result};
use crate::platform::{SocketCommand, SocketConnection, SocketConnector, SocketEvent};
use crate::store::FlagStore;

pub const DEFAULT_RECONNECT_INTERVALS: [Duration; 8] = [
	Duration::from_secs(1),
	Duration::from_secs(3),
	Duration::from_secs(5),
	Duration::from_secs(7),
	Duration::from_secs(11),
	Duration::from_secs(13),
	Duration::from_secs(30),
	Duration::from_secs(60),
];

pub const DEFAULT_PING_INTERVAL: Duration = Duration::from_secs(18);
/// Shorter ping intervals, zero included, are raised to this.
pub const MIN_PING_INTERVAL: Duration = Duration::from_secs(1);

/// Close code meaning "closed on purpose, do not reconnect".
pub const CLOSED_BY_CLIENT_CODE: u16 = 4003;
pub const CLOSED_BY_CLIENT_REASON: &str = "The client is closed by user";

/// Backoff for the `counter`-th consecutive failure, clamped to the last
/// interval.
pub fn reconnect_delay(intervals: &[Duration], counter: usize) -> Duration {
	intervals
		.get(counter)
		.or_else(|| intervals.last())
		.copied()
		.unwrap_or(DEFAULT_RECONNECT_INTERVALS[0])
}

/// Socket URL for `base`: `http`/`https` become `ws`/`wss`, and the client type
/// and a fresh connection token are appended.
pub fn streaming_url(base: &str, sdk_key: &str) -> Result<Url> {
	let mut url = Url::parse(base)
		.map_err(|e| FlagsError::ConnectionFailed(format!("invalid streaming url {base}: {e}")))?;

	let scheme = match url.scheme() {
		"http" => Some("ws"),
		"https" => Some("wss"),
		_ => None,
	};
	if let Some(scheme) = scheme {
		url
			.set_scheme(scheme)
			.map_err(|()| FlagsError::ConnectionFailed(format!("cannot use {scheme} for {base}")))?;
	}

	url
		.query_pairs_mut()
		.append_pair("type", "client")
		.append_pair("token", &connection_token(sdk_key));
	Ok(url)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamState {
	Idle,
	Connecting,
	Open,
	Closed,
}

impl StreamState {
	fn as_u8(self) -> u8 {
		match self {
			Self::Idle => 0,
			Self::Connecting => 1,
			Self::Open => 2,
			Self::Closed => 3,
		}
	}

	fn from_u8(value: u8) -> Self {
		match value {
			1 => Self::Connecting,
			2 => Self::Open,
			3 => Self::Closed,
			_ => Self::Idle,
		}
	}
}

#[derive(Debug, Clone)]
pub struct StreamingConfig {
	/// Full streaming endpoint, e.g. `https://flags.example.com/streaming`.
	pub streaming_uri: String,
	pub sdk_key: String,
	pub ping_interval: Duration,
	pub reconnect_intervals: Vec<Duration>,
}

impl StreamingConfig {
	pub fn new(streaming_uri: impl Into<String>, sdk_key: impl Into<String>) -> Self {
		Self {
			streaming_uri: streaming_uri.into(),
			sdk_key: sdk_key.into(),
			ping_interval: DEFAULT_PING_INTERVAL,
			reconnect_intervals: DEFAULT_RECONNECT_INTERVALS.to_vec(),
		}
	}
}

#[derive(Debug)]
enum StreamCommand {
	Identify { user: User, ack: oneshot::Sender<()> },
	Stop,
}

/// An identify waiting for the first update addressed to its user.
#[derive(Debug)]
struct PendingIdentify {
	user_key_id: String,
	ack: oneshot::Sender<()>,
}

impl PendingIdentify {
	fn resolve_if(pending: &mut Option<Self>, user_key_id: &str) {
		if pending.as_ref().is_some_and(|p| p.user_key_id == user_key_id) {
			if let Some(p) = pending.take() {
				let _ = p.ack.send(());
			}
		}
	}
}

#[derive(Debug)]
enum ConnectionOutcome {
	Lost,
	ClosedByServer,
	Stopped,
}

#[derive(Debug)]
struct Worker {
	commands: mpsc::UnboundedSender<StreamCommand>,
	handle: JoinHandle<()>,
}

#[derive(Clone)]
struct StreamContext {
	config: StreamingConfig,
	connector: Arc<dyn SocketConnector>,
	store: FlagStore,
	sink: UpdateSink,
	state: Arc<AtomicU8>,
	reconnect_attempts: Arc<AtomicU64>,
	messages_received: Arc<AtomicU64>,
}

impl StreamContext {
	fn set_state(&self, state: StreamState) {
		self.state.store(state.as_u8(), Ordering::SeqCst);
	}
}

/// Keeps the store current over a socket to the flag service.
pub struct StreamingDataSynchronizer {
	context: StreamContext,
	stopped: AtomicBool,
	worker: Mutex<Option<Worker>>,
}

impl StreamingDataSynchronizer {
	pub fn new(
		config: StreamingConfig,
		connector: Arc<dyn SocketConnector>,
		store: FlagStore,
		sink: UpdateSink,
	) -> Self {
		Self {
			context: StreamContext {
				config,
				connector,
				store,
				sink,
				state: Arc::new(AtomicU8::new(StreamState::Idle.as_u8())),
				reconnect_attempts: Arc::new(AtomicU64::new(0)),
				messages_received: Arc::new(AtomicU64::new(0)),
			},
			stopped: AtomicBool::new(false),
			worker: Mutex::new(None),
		}
	}

	pub fn state(&self) -> StreamState {
		StreamState::from_u8(self.context.state.load(Ordering::SeqCst))
	}

	/// Total reconnects scheduled since start.
	pub fn reconnect_attempts(&self) -> u64 {
		self.context.reconnect_attempts.load(Ordering::SeqCst)
	}

	pub fn messages_received(&self) -> u64 {
		self.context.messages_received.load(Ordering::SeqCst)
	}
}

impl std::fmt::Debug for StreamingDataSynchronizer {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("StreamingDataSynchronizer")
			.field("streaming_uri", &self.context.config.streaming_uri)
			.field("state", &self.state())
			.finish_non_exhaustive()
	}
}

#[async_trait]
impl DataSynchronizer for StreamingDataSynchronizer {
	async fn start(&self) {
		if self.stopped.load(Ordering::SeqCst) {
			debug!("Streaming was stopped, not restarting");
			return;
		}

		let mut worker = self.worker.lock();
		if worker.is_some() {
			debug!("Streaming already started");
			return;
		}

		let (tx, rx) = mpsc::unbounded_channel();
		let context = self.context.clone();
		let handle = tokio::spawn(async move {
			run_stream_loop(context, rx).await;
		});

		*worker = Some(Worker {
			commands: tx,
			handle,
		});
	}

	async fn identify(&self, user: User) -> Result<()> {
		let commands = self.worker.lock().as_ref().map(|w| w.commands.clone());
		let Some(commands) = commands else {
			return Ok(());
		};

		let (ack, done) = oneshot::channel();
		if commands.send(StreamCommand::Identify { user, ack }).is_err() {
			return Ok(());
		}
		if done.await.is_err() {
			debug!("Streaming closed before identify completed");
		}
		Ok(())
	}

	async fn stop(&self) {
		self.stopped.store(true, Ordering::SeqCst);
		let worker = self.worker.lock().take();
		let Some(worker) = worker else {
			return;
		};

		// The loop sends the 4003 close itself; give it the chance before aborting.
		if worker.commands.send(StreamCommand::Stop).is_ok() {
			let mut handle = worker.handle;
			if tokio::time::timeout(Duration::from_secs(1), &mut handle)
				.await
				.is_err()
			{
				handle.abort();
			}
		} else {
			worker.handle.abort();
		}

		self.context.set_state(StreamState::Closed);
		info!("Streaming stopped");
	}
}

impl Drop for StreamingDataSynchronizer {
	fn drop(&mut self) {
		if let Some(worker) = self.worker.lock().take() {
			worker.handle.abort();
		}
	}
}

async fn run_stream_loop(context: StreamContext, mut control: mpsc::UnboundedReceiver<StreamCommand>) {
	let mut failures: usize = 0;
	let mut pending: Option<PendingIdentify> = None;

	loop {
		context.set_state(StreamState::Connecting);

		let url = match streaming_url(&context.config.streaming_uri, &context.config.sdk_key) {
			Ok(url) => url,
			Err(e) => {
				error!(error = %e, "Cannot build streaming url");
				context.sink.error(e);
				break;
			}
		};

		let started = Instant::now();
		info!(url = %context.config.streaming_uri, "Connecting to flag stream");

		let outcome = match context.connector.connect(url.as_str()).await {
			Ok(connection) => {
				info!(
					connect_ms = started.elapsed().as_millis() as u64,
					"Flag stream connected"
				);
				failures = 0;
				context.set_state(StreamState::Open);
				run_connection(&context, connection, &mut control, &mut pending).await
			}
			Err(e) => {
				warn!(error = %e, "Flag stream connection failed");
				ConnectionOutcome::Lost
			}
		};

		context.set_state(StreamState::Closed);
		match outcome {
			ConnectionOutcome::Stopped => break,
			ConnectionOutcome::ClosedByServer => {
				info!(code = CLOSED_BY_CLIENT_CODE, "Flag stream closed, not reconnecting");
				break;
			}
			ConnectionOutcome::Lost => {}
		}

		let delay = reconnect_delay(&context.config.reconnect_intervals, failures);
		failures += 1;
		context.reconnect_attempts.fetch_add(1, Ordering::SeqCst);
		warn!(
			delay_ms = delay.as_millis() as u64,
			attempts = failures,
			"Flag stream closed, reconnecting; flag values may be stale until then"
		);

		let deadline = Instant::now() + delay;
		loop {
			tokio::select! {
				_ = tokio::time::sleep_until(deadline) => break,
				command = control.recv() => match command {
					Some(StreamCommand::Identify { user, ack }) => {
						// The request for this user goes out with the next open.
						debug!(user_key_id = %user.key_id, "Identify queued until reconnect");
						pending = Some(PendingIdentify {
							user_key_id: user.key_id,
							ack,
						});
					}
					Some(StreamCommand::Stop) | None => {
						debug!("Flag stream stopped during reconnect wait");
						return;
					}
				},
			}
		}
	}

	debug!("Flag stream loop finished");
}

async fn run_connection(
	context: &StreamContext,
	connection: SocketConnection,
	control: &mut mpsc::UnboundedReceiver<StreamCommand>,
	pending: &mut Option<PendingIdentify>,
) -> ConnectionOutcome {
	let SocketConnection {
		commands: socket,
		mut events,
	} = connection;

	if !request_data(&socket, &context.store, context.store.user()) {
		return ConnectionOutcome::Lost;
	}

	let ping_interval = context.config.ping_interval.max(MIN_PING_INTERVAL);
	let mut ping = tokio::time::interval_at(Instant::now() + ping_interval, ping_interval);
	ping.set_missed_tick_behavior(MissedTickBehavior::Delay);

	loop {
		tokio::select! {
			_ = ping.tick() => {
				if !send_message(&socket, &OutboundMessage::ping()) {
					return ConnectionOutcome::Lost;
				}
				debug!("Sent ping");
			}
			event = events.recv() => match event {
				Some(SocketEvent::Message(text)) => {
					context.messages_received.fetch_add(1, Ordering::SeqCst);
					handle_message(context, &text, pending);
				}
				Some(SocketEvent::Error(e)) => debug!(error = %e, "Flag stream error"),
				Some(SocketEvent::Closed { code }) => {
					return if code == Some(CLOSED_BY_CLIENT_CODE) {
						ConnectionOutcome::ClosedByServer
					} else {
						debug!(code = ?code, "Flag stream closed");
						ConnectionOutcome::Lost
					};
				}
				None => return ConnectionOutcome::Lost,
			},
			command = control.recv() => match command {
				Some(StreamCommand::Identify { user, ack }) => {
					let user_key_id = user.key_id.clone();
					if !request_data(&socket, &context.store, user) {
						*pending = Some(PendingIdentify { user_key_id, ack });
						return ConnectionOutcome::Lost;
					}
					*pending = Some(PendingIdentify { user_key_id, ack });
				}
				Some(StreamCommand::Stop) | None => {
					let _ = socket.send(SocketCommand::Close {
						code: CLOSED_BY_CLIENT_CODE,
						reason: CLOSED_BY_CLIENT_REASON.to_string(),
					});
					return ConnectionOutcome::Stopped;
				}
			},
		}
	}
}

fn request_data(
	socket: &mpsc::UnboundedSender<SocketCommand>,
	store: &FlagStore,
	user: User,
) -> bool {
	debug!(user_key_id = %user.key_id, "Requesting flag data");
	send_message(socket, &OutboundMessage::data_sync(store.version(), user))
}

fn send_message(socket: &mpsc::UnboundedSender<SocketCommand>, message: &OutboundMessage) -> bool {
	match message.to_json() {
		Ok(text) => socket.send(SocketCommand::Send(text)).is_ok(),
		Err(e) => {
			error!(error = %e, "Failed to encode outbound message");
			true
		}
	}
}

fn handle_message(context: &StreamContext, text: &str, pending: &mut Option<PendingIdentify>) {
	let message = match parse_message(text) {
		Ok(message) => message,
		Err(e) => {
			warn!(error = %e, "Ignoring malformed stream message");
			return;
		}
	};

	if !message.is_data_sync() {
		debug!(message_type = message.message_type.as_str(), "Ignoring stream message");
		return;
	}

	let update = match message.into_update(&context.store.user_key_id()) {
		Ok(update) => update,
		Err(e) => {
			warn!(error = %e, "Ignoring stream message");
			return;
		}
	};

	let user_key_id = update.user_key_id.clone();
	context.sink.apply(update);
	PendingIdentify::resolve_if(pending, &user_key_id);
}
