// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Polling synchronizer.
//!
//! One request per interval, measured from the start of the previous request.
//! Non-recoverable failures stop the loop for good; everything else is logged
//! and retried on the next tick.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use loom_common_http::http_error_message;
use loom_flagsync_core::{parse_message, AddressedUpdate, DataUpdate, User};
use parking_lot::Mutex;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use super::requestor::Requestor;
use super::{DataSynchronizer, UpdateSink};
use crate::error::Result;
use crate::store::FlagStore;

pub const DEFAULT_POLLING_INTERVAL: Duration = Duration::from_secs(30);

#[derive(Debug, Clone)]
pub struct PollingConfig {
	pub interval: Duration,
}

impl Default for PollingConfig {
	fn default() -> Self {
		Self {
			interval: DEFAULT_POLLING_INTERVAL,
		}
	}
}

#[derive(Debug)]
enum PollCommand {
	Identify { user: User, ack: oneshot::Sender<()> },
	Stop,
}

#[derive(Debug)]
struct Worker {
	commands: mpsc::UnboundedSender<PollCommand>,
	handle: JoinHandle<()>,
}

#[derive(Debug, Clone)]
struct PollContext {
	interval: Duration,
	requestor: Requestor,
	store: FlagStore,
	sink: UpdateSink,
	stopped: Arc<AtomicBool>,
	polls: Arc<AtomicU64>,
}

/// Keeps the store current by polling the flag service.
#[derive(Debug)]
pub struct PollingDataSynchronizer {
	context: PollContext,
	worker: Mutex<Option<Worker>>,
}

impl PollingDataSynchronizer {
	pub fn new(config: PollingConfig, requestor: Requestor, store: FlagStore, sink: UpdateSink) -> Self {
		Self {
			context: PollContext {
				interval: config.interval,
				requestor,
				store,
				sink,
				stopped: Arc::new(AtomicBool::new(false)),
				polls: Arc::new(AtomicU64::new(0)),
			},
			worker: Mutex::new(None),
		}
	}

	/// Number of completed poll requests.
	pub fn polls(&self) -> u64 {
		self.context.polls.load(Ordering::SeqCst)
	}

	pub fn is_running(&self) -> bool {
		self
			.worker
			.lock()
			.as_ref()
			.is_some_and(|w| !w.handle.is_finished())
	}
}

#[async_trait]
impl DataSynchronizer for PollingDataSynchronizer {
	async fn start(&self) {
		let mut worker = self.worker.lock();
		if worker.is_some() {
			debug!("Polling already started");
			return;
		}

		self.context.stopped.store(false, Ordering::SeqCst);
		let (tx, rx) = mpsc::unbounded_channel();
		let context = self.context.clone();
		let handle = tokio::spawn(async move {
			run_poll_loop(context, rx).await;
		});

		info!(interval_ms = self.context.interval.as_millis() as u64, "Polling started");
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
		if commands.send(PollCommand::Identify { user, ack }).is_err() {
			return Ok(());
		}
		if done.await.is_err() {
			debug!("Polling stopped before identify completed");
		}
		Ok(())
	}

	async fn stop(&self) {
		self.context.stopped.store(true, Ordering::SeqCst);
		let worker = self.worker.lock().take();
		if let Some(worker) = worker {
			let _ = worker.commands.send(PollCommand::Stop);
			worker.handle.abort();
			let _ = worker.handle.await;
			info!("Polling stopped");
		}
	}
}

impl Drop for PollingDataSynchronizer {
	fn drop(&mut self) {
		if let Some(worker) = self.worker.lock().take() {
			worker.handle.abort();
		}
	}
}

async fn run_poll_loop(context: PollContext, mut commands: mpsc::UnboundedReceiver<PollCommand>) {
	let mut user = context.store.user();
	let mut pending_ack: Option<oneshot::Sender<()>> = None;

	loop {
		if context.stopped.load(Ordering::SeqCst) {
			break;
		}

		let started = Instant::now();
		debug!(user_key_id = %user.key_id, "Polling for feature flag updates");
		let result = context
			.requestor
			.request_data(context.store.version(), &user)
			.await;

		if context.stopped.load(Ordering::SeqCst) {
			debug!("Discarding poll result received after stop");
			break;
		}
		context.polls.fetch_add(1, Ordering::SeqCst);

		let elapsed = started.elapsed();
		let sleep_for = context.interval.saturating_sub(elapsed);
		debug!(
			elapsed_ms = elapsed.as_millis() as u64,
			sleep_ms = sleep_for.as_millis() as u64,
			"Poll finished"
		);

		match result {
			Ok(body) => apply_poll_body(body, &user.key_id, &context.sink),
			Err(e) if !e.is_recoverable() => {
				let message = http_error_message(e.status(), &e.to_string(), "polling request", None);
				error!("{message}");
				context.sink.error(e);
				break;
			}
			Err(e) => {
				let message = http_error_message(
					e.status(),
					&e.to_string(),
					"polling request",
					Some("will retry"),
				);
				warn!("{message}");
			}
		}

		if let Some(ack) = pending_ack.take() {
			let _ = ack.send(());
		}

		tokio::select! {
			_ = tokio::time::sleep_until(started + elapsed + sleep_for) => {}
			command = commands.recv() => match command {
				Some(PollCommand::Identify { user: next, ack }) => {
					debug!(user_key_id = %next.key_id, "Polling immediately for identified user");
					user = next;
					pending_ack = Some(ack);
				}
				Some(PollCommand::Stop) | None => break,
			},
		}
	}

	debug!("Polling loop finished");
}

/// Routes a poll response to the sink.
///
/// No body (304) and non-`data-sync` bodies count as an empty patch.
fn apply_poll_body(body: Option<String>, user_key_id: &str, sink: &UpdateSink) {
	let empty = || AddressedUpdate::new(user_key_id, DataUpdate::Patch(Vec::new()));

	let update = match body.as_deref().map(str::trim) {
		None | Some("") => empty(),
		Some(raw) => match parse_message(raw) {
			Ok(message) if message.is_data_sync() => match message.into_update(user_key_id) {
				Ok(update) => update,
				Err(e) => {
					warn!(error = %e, "Ignoring polling response");
					return;
				}
			},
			Ok(_) => empty(),
			Err(e) => {
				warn!(error = %e, "Failed to parse polling response");
				return;
			}
		},
	};

	sink.apply(update);
}
