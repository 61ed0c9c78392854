// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Single consumer of the event queue.
//!
//! Payload events are buffered until a flush. A flush snapshots the buffer,
//! drops duplicates, and sends the rest in batches, one batch at a time.

use std::collections::HashSet;
use std::sync::Arc;

use tracing::{debug, error, warn};

use super::event::{Completion, Event};
use super::queue::{EventQueue, SharedEventQueue};
use super::sender::{DeliveryStatus, EventSender};
use super::serializer::serialize_events;

pub const MAX_EVENTS_PER_REQUEST: usize = 50;

pub struct EventDispatcher {
	buffer: EventQueue,
	sender: Arc<dyn EventSender>,
	max_events_per_request: usize,
	stopped: bool,
}

impl EventDispatcher {
	pub fn new(capacity: usize, sender: Arc<dyn EventSender>) -> Self {
		Self {
			buffer: EventQueue::new(capacity),
			sender,
			max_events_per_request: MAX_EVENTS_PER_REQUEST,
			stopped: false,
		}
	}

	/// Consumes `queue` until a shutdown event has been handled.
	pub async fn run(mut self, queue: SharedEventQueue) {
		debug!("Event dispatch loop started");
		loop {
			let event = queue.next().await;
			if !self.dispatch(event).await {
				break;
			}
		}
		debug!("Event dispatch loop finished");
	}

	/// Handles one event. Returns false once the loop should end.
	pub async fn dispatch(&mut self, event: Event) -> bool {
		match event {
			Event::Metric(_) | Event::Eval(_) => {
				self.buffer_event(event);
				true
			}
			Event::Flush(completion) => {
				self.flush(completion).await;
				true
			}
			Event::Shutdown(completion) => {
				self.flush(completion).await;
				self.stopped = true;
				false
			}
		}
	}

	/// True after a shutdown or a terminal delivery failure.
	pub fn is_stopped(&self) -> bool {
		self.stopped
	}

	pub fn buffered(&self) -> usize {
		self.buffer.len()
	}

	fn buffer_event(&mut self, event: Event) {
		if self.stopped {
			return;
		}
		if self.buffer.add_event(event).is_err() {
			warn!("Exceeded event buffer capacity, event dropped. Increase max_events_in_queue to avoid dropping events");
		}
	}

	async fn flush(&mut self, completion: Completion) {
		if self.stopped || self.buffer.is_empty() {
			completion.complete();
			return;
		}

		let snapshot = self.buffer.take_all();
		let count = snapshot.len();
		self.send_events(snapshot).await;
		debug!(count, "Flushed events");
		completion.complete();
	}

	async fn send_events(&mut self, events: Vec<Event>) {
		let events = unique_events(events);

		for batch in events.chunks(self.max_events_per_request) {
			let payload = match serialize_events(batch) {
				Ok(payload) => payload,
				Err(e) => {
					error!(error = %e, "Failed to serialize events");
					continue;
				}
			};

			let result = self.sender.send(&payload, true).await;
			match result.status {
				DeliveryStatus::Succeeded => {}
				DeliveryStatus::Failed => {
					warn!(error = ?result.error, events = batch.len(), "Dropped events after failed delivery");
				}
				DeliveryStatus::FailedAndMustShutDown => {
					error!(error = ?result.error, "Event delivery refused, no further events will be sent");
					self.stopped = true;
					break;
				}
			}
		}
	}
}

impl std::fmt::Debug for EventDispatcher {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("EventDispatcher")
			.field("buffered", &self.buffer.len())
			.field("stopped", &self.stopped)
			.finish_non_exhaustive()
	}
}

/// Drops events whose hash was already seen. First occurrence wins and order
/// is kept.
pub fn unique_events(events: Vec<Event>) -> Vec<Event> {
	let mut seen = HashSet::new();
	events
		.into_iter()
		.filter(|event| match event.hash() {
			Some(hash) => seen.insert(hash),
			None => true,
		})
		.collect()
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::events::event::{EvalEvent, MetricEvent};
	use crate::events::sender::DeliveryResult;
	use crate::error::FlagsError;
	use async_trait::async_trait;
	use loom_flagsync_core::{User, Variation};
	use parking_lot::Mutex;
	use proptest::prelude::*;

	struct MockSender {
		batches: Mutex<Vec<serde_json::Value>>,
		status: Mutex<DeliveryStatus>,
	}

	impl MockSender {
		fn new() -> Self {
			Self {
				batches: Mutex::new(Vec::new()),
				status: Mutex::new(DeliveryStatus::Succeeded),
			}
		}

		fn set_status(&self, status: DeliveryStatus) {
			*self.status.lock() = status;
		}

		fn batch_sizes(&self) -> Vec<usize> {
			self
				.batches
				.lock()
				.iter()
				.map(|b| b.as_array().map(Vec::len).unwrap_or(0))
				.collect()
		}

		fn event_names(&self) -> Vec<String> {
			self
				.batches
				.lock()
				.iter()
				.flat_map(|b| b.as_array().cloned().unwrap_or_default())
				.map(|p| p["metrics"][0]["eventName"].as_str().unwrap_or("").to_string())
				.collect()
		}
	}

	#[async_trait]
	impl EventSender for MockSender {
		async fn send(&self, payload: &str, _retry: bool) -> DeliveryResult {
			self.batches.lock().push(serde_json::from_str(payload).unwrap());
			let status = *self.status.lock();
			DeliveryResult {
				status,
				error: (status != DeliveryStatus::Succeeded).then_some(FlagsError::AuthenticationFailed),
			}
		}
	}

	fn metric(name: &str) -> Event {
		Event::from(MetricEvent::new(User::builder("u").build(), name, 1.0))
	}

	async fn flush(dispatcher: &mut EventDispatcher) {
		let (event, done) = Event::flush();
		assert!(dispatcher.dispatch(event).await);
		done.await.unwrap();
	}

	#[tokio::test]
	async fn test_duplicates_are_sent_once() {
		let sender = Arc::new(MockSender::new());
		let mut dispatcher = EventDispatcher::new(100, sender.clone());

		for name in ["a", "b", "a", "c", "b"] {
			dispatcher.dispatch(metric(name)).await;
		}
		flush(&mut dispatcher).await;

		assert_eq!(sender.event_names(), vec!["a", "b", "c"]);
	}

	#[tokio::test]
	async fn test_evaluations_differing_only_in_timestamp_are_sent_once() {
		let sender = Arc::new(MockSender::new());
		let mut dispatcher = EventDispatcher::new(100, sender.clone());

		let first = EvalEvent::new(User::builder("u").build(), "beta", Variation::new(Some(2), "on"), false);
		let second = EvalEvent {
			timestamp: first.timestamp + 5_000,
			..first.clone()
		};
		let other_flag = EvalEvent {
			flag_key: "gamma".to_string(),
			..first.clone()
		};
		dispatcher.dispatch(Event::from(first.clone())).await;
		dispatcher.dispatch(Event::from(second)).await;
		dispatcher.dispatch(Event::from(other_flag)).await;
		flush(&mut dispatcher).await;

		let payloads: Vec<serde_json::Value> = sender
			.batches
			.lock()
			.iter()
			.flat_map(|b| b.as_array().cloned().unwrap_or_default())
			.collect();
		let keys: Vec<&str> = payloads
			.iter()
			.map(|p| p["variations"][0]["featureFlagKey"].as_str().unwrap_or(""))
			.collect();
		assert_eq!(keys, vec!["beta", "gamma"]);
		assert_eq!(payloads[0]["variations"][0]["timestamp"], first.timestamp);
	}

	#[tokio::test]
	async fn test_batches_hold_at_most_fifty() {
		let sender = Arc::new(MockSender::new());
		let mut dispatcher = EventDispatcher::new(1000, sender.clone());

		for i in 0..120 {
			dispatcher.dispatch(metric(&format!("e{i}"))).await;
		}
		flush(&mut dispatcher).await;

		assert_eq!(sender.batch_sizes(), vec![50, 50, 20]);
		let names = sender.event_names();
		assert_eq!(names.first().map(String::as_str), Some("e0"));
		assert_eq!(names.last().map(String::as_str), Some("e119"));
		assert_eq!(dispatcher.buffered(), 0);
	}

	#[tokio::test]
	async fn test_empty_flush_completes_without_sending() {
		let sender = Arc::new(MockSender::new());
		let mut dispatcher = EventDispatcher::new(10, sender.clone());
		flush(&mut dispatcher).await;
		assert!(sender.batches.lock().is_empty());
	}

	#[tokio::test]
	async fn test_buffer_overflow_drops_newest() {
		let sender = Arc::new(MockSender::new());
		let mut dispatcher = EventDispatcher::new(2, sender.clone());

		for name in ["a", "b", "c"] {
			dispatcher.dispatch(metric(name)).await;
		}
		assert_eq!(dispatcher.buffered(), 2);
		flush(&mut dispatcher).await;

		assert_eq!(sender.event_names(), vec!["a", "b"]);
	}

	#[tokio::test]
	async fn test_terminal_failure_stops_sending() {
		let sender = Arc::new(MockSender::new());
		sender.set_status(DeliveryStatus::FailedAndMustShutDown);
		let mut dispatcher = EventDispatcher::new(1000, sender.clone());

		for i in 0..120 {
			dispatcher.dispatch(metric(&format!("e{i}"))).await;
		}
		flush(&mut dispatcher).await;

		// remaining batches of that flush are abandoned
		assert_eq!(sender.batch_sizes(), vec![50]);
		assert!(dispatcher.is_stopped());

		dispatcher.dispatch(metric("after")).await;
		assert_eq!(dispatcher.buffered(), 0);
		flush(&mut dispatcher).await;
		assert_eq!(sender.batch_sizes(), vec![50]);
	}

	#[tokio::test]
	async fn test_recoverable_failure_keeps_sending() {
		let sender = Arc::new(MockSender::new());
		sender.set_status(DeliveryStatus::Failed);
		let mut dispatcher = EventDispatcher::new(1000, sender.clone());

		for i in 0..60 {
			dispatcher.dispatch(metric(&format!("e{i}"))).await;
		}
		flush(&mut dispatcher).await;

		assert_eq!(sender.batch_sizes(), vec![50, 10]);
		assert!(!dispatcher.is_stopped());
	}

	#[tokio::test]
	async fn test_shutdown_flushes_then_ends_loop() {
		let sender = Arc::new(MockSender::new());
		let queue = SharedEventQueue::new(100);
		let dispatcher = EventDispatcher::new(100, sender.clone());
		let task = tokio::spawn(dispatcher.run(queue.clone()));

		queue.push(metric("a")).unwrap();
		let (shutdown, done) = Event::shutdown();
		queue.push(shutdown).unwrap();

		done.await.unwrap();
		task.await.unwrap();
		assert_eq!(sender.event_names(), vec!["a"]);
	}

	proptest! {
		#[test]
		fn test_unique_events_keeps_first_of_each(names in prop::collection::vec("[a-d]", 0..40)) {
			let events: Vec<Event> = names.iter().map(|n| metric(n)).collect();
			let kept: Vec<String> = unique_events(events)
				.iter()
				.map(|e| match e {
					Event::Metric(m) => m.event_name.clone(),
					_ => String::new(),
				})
				.collect();

			let mut expected: Vec<String> = Vec::new();
			for name in &names {
				if !expected.contains(name) {
					expected.push(name.clone());
				}
			}
			prop_assert_eq!(kept, expected);
		}
	}
}
