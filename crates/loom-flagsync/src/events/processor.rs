// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use super::dispatcher::EventDispatcher;
use super::event::Event;
use super::queue::SharedEventQueue;
use super::sender::EventSender;

pub const DEFAULT_FLUSH_INTERVAL: Duration = Duration::from_secs(2);
pub const DEFAULT_MAX_EVENTS_IN_QUEUE: usize = 10_000;

/// Front door of the event pipeline.
#[async_trait]
pub trait EventProcessor: Send + Sync {
	/// Queues `event`. Returns false when it was rejected.
	fn record(&self, event: Event) -> bool;

	/// Waits until everything recorded so far has been handed to the sender.
	async fn flush(&self);

	/// Flushes and stops the pipeline. Idempotent.
	async fn close(&self);
}

#[derive(Debug, Clone)]
pub struct EventProcessorConfig {
	pub flush_interval: Duration,
	pub max_events_in_queue: usize,
}

impl Default for EventProcessorConfig {
	fn default() -> Self {
		Self {
			flush_interval: DEFAULT_FLUSH_INTERVAL,
			max_events_in_queue: DEFAULT_MAX_EVENTS_IN_QUEUE,
		}
	}
}

/// Queue plus dispatcher task plus periodic flush task.
#[derive(Debug)]
pub struct DefaultEventProcessor {
	queue: SharedEventQueue,
	closed: AtomicBool,
	dispatcher: Mutex<Option<JoinHandle<()>>>,
	flush_loop: Mutex<Option<JoinHandle<()>>>,
}

impl DefaultEventProcessor {
	/// Spawns the dispatcher and the flush loop. Requires a tokio runtime.
	pub fn start(config: EventProcessorConfig, sender: Arc<dyn EventSender>) -> Self {
		let queue = SharedEventQueue::new(config.max_events_in_queue);

		let dispatcher = EventDispatcher::new(config.max_events_in_queue, sender);
		let dispatcher = tokio::spawn(dispatcher.run(queue.clone()));

		let flush_queue = queue.clone();
		let interval = config.flush_interval;
		let flush_loop = tokio::spawn(async move {
			loop {
				tokio::time::sleep(interval).await;
				let (event, done) = Event::flush();
				if let Err(rejected) = flush_queue.push(event) {
					rejected.complete();
					continue;
				}
				let _ = done.await;
			}
		});

		info!(
			flush_interval_ms = interval.as_millis() as u64,
			max_events_in_queue = config.max_events_in_queue,
			"Event processor started"
		);

		Self {
			queue,
			closed: AtomicBool::new(false),
			dispatcher: Mutex::new(Some(dispatcher)),
			flush_loop: Mutex::new(Some(flush_loop)),
		}
	}

	pub fn is_closed(&self) -> bool {
		self.closed.load(Ordering::SeqCst)
	}

	pub fn queued(&self) -> usize {
		self.queue.len()
	}
}

#[async_trait]
impl EventProcessor for DefaultEventProcessor {
	fn record(&self, event: Event) -> bool {
		match self.queue.push(event) {
			Ok(()) => true,
			Err(rejected) => {
				rejected.complete();
				false
			}
		}
	}

	async fn flush(&self) {
		let (event, done) = Event::flush();
		if self.record(event) {
			let _ = done.await;
		}
	}

	async fn close(&self) {
		if self.closed.swap(true, Ordering::SeqCst) {
			return;
		}

		if let Some(handle) = self.flush_loop.lock().take() {
			handle.abort();
		}

		let (event, done) = Event::shutdown();
		let accepted = self.record(event);
		if accepted && done.await.is_err() {
			error!("Event processor shut down before the final flush completed");
		}
		self.queue.close();

		let dispatcher = self.dispatcher.lock().take();
		if let Some(handle) = dispatcher {
			if accepted {
				let _ = handle.await;
			} else {
				handle.abort();
			}
		}
		debug!("Event processor closed");
	}
}

impl Drop for DefaultEventProcessor {
	fn drop(&mut self) {
		if let Some(handle) = self.flush_loop.lock().take() {
			handle.abort();
		}
		if let Some(handle) = self.dispatcher.lock().take() {
			handle.abort();
		}
	}
}

/// Processor for offline clients: accepts nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullEventProcessor;

#[async_trait]
impl EventProcessor for NullEventProcessor {
	fn record(&self, event: Event) -> bool {
		event.complete();
		false
	}

	async fn flush(&self) {}

	async fn close(&self) {}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::events::event::MetricEvent;
	use crate::events::sender::{DeliveryResult, DeliveryStatus};
	use loom_flagsync_core::User;
	use tokio::sync::Mutex as AsyncMutex;

	struct MockSender {
		payloads: AsyncMutex<Vec<serde_json::Value>>,
	}

	impl MockSender {
		fn new() -> Self {
			Self {
				payloads: AsyncMutex::new(Vec::new()),
			}
		}

		async fn sent_events(&self) -> usize {
			self
				.payloads
				.lock()
				.await
				.iter()
				.map(|b| b.as_array().map(Vec::len).unwrap_or(0))
				.sum()
		}
	}

	#[async_trait]
	impl EventSender for MockSender {
		async fn send(&self, payload: &str, _retry: bool) -> DeliveryResult {
			self.payloads.lock().await.push(serde_json::from_str(payload).unwrap());
			DeliveryResult::succeeded()
		}
	}

	fn metric(name: &str) -> Event {
		Event::from(MetricEvent::new(User::builder("u").build(), name, 1.0))
	}

	fn config(flush_interval: Duration, capacity: usize) -> EventProcessorConfig {
		EventProcessorConfig {
			flush_interval,
			max_events_in_queue: capacity,
		}
	}

	#[tokio::test]
	async fn test_flush_delivers_recorded_events() {
		let sender = Arc::new(MockSender::new());
		let processor = DefaultEventProcessor::start(config(Duration::from_secs(3600), 100), sender.clone());

		assert!(processor.record(metric("a")));
		assert!(processor.record(metric("b")));
		processor.flush().await;

		assert_eq!(sender.sent_events().await, 2);
		processor.close().await;
	}

	#[tokio::test(start_paused = true)]
	async fn test_periodic_flush() {
		let sender = Arc::new(MockSender::new());
		let processor = DefaultEventProcessor::start(config(Duration::from_secs(2), 100), sender.clone());

		processor.record(metric("a"));
		tokio::time::sleep(Duration::from_secs(3)).await;

		assert_eq!(sender.sent_events().await, 1);
		processor.close().await;
	}

	#[tokio::test]
	async fn test_close_drains_and_is_idempotent() {
		let sender = Arc::new(MockSender::new());
		let processor = DefaultEventProcessor::start(config(Duration::from_secs(3600), 100), sender.clone());

		processor.record(metric("a"));
		processor.close().await;
		processor.close().await;

		assert!(processor.is_closed());
		assert_eq!(sender.sent_events().await, 1);
		assert!(!processor.record(metric("late")));
		// a flush after close returns immediately
		processor.flush().await;
	}

	#[tokio::test]
	async fn test_rejected_flush_completes_immediately() {
		let sender = Arc::new(MockSender::new());
		let processor = DefaultEventProcessor::start(config(Duration::from_secs(3600), 1), sender.clone());

		// the dispatcher has not run yet, so the single slot stays taken
		let mut rejected = 0;
		for i in 0..50 {
			if !processor.record(metric(&format!("e{i}"))) {
				rejected += 1;
			}
		}
		let (event, done) = Event::flush();
		if !processor.record(event) {
			rejected += 1;
		}
		tokio::time::timeout(Duration::from_secs(5), done)
			.await
			.unwrap()
			.unwrap();
		assert!(rejected > 0);
		processor.close().await;
	}

	#[tokio::test]
	async fn test_null_processor_accepts_nothing() {
		let processor = NullEventProcessor;
		let (event, done) = Event::flush();
		assert!(!processor.record(event));
		done.await.unwrap();
		assert!(!processor.record(metric("a")));
		processor.flush().await;
		processor.close().await;
	}

	#[test]
	fn test_default_config() {
		let config = EventProcessorConfig::default();
		assert_eq!(config.flush_interval, Duration::from_secs(2));
		assert_eq!(config.max_events_in_queue, 10_000);
		assert_eq!(DeliveryStatus::Succeeded, DeliveryResult::succeeded().status);
	}
}
