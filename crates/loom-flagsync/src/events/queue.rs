// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use std::collections::VecDeque;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::Notify;
use tracing::warn;

use super::event::Event;

/// Bounded FIFO of events.
#[derive(Debug)]
pub struct EventQueue {
	events: VecDeque<Event>,
	capacity: usize,
	closed: bool,
}

impl EventQueue {
	pub fn new(capacity: usize) -> Self {
		Self {
			events: VecDeque::new(),
			capacity,
			closed: false,
		}
	}

	/// Appends `event`, handing it back when the queue is closed or full.
	pub fn add_event(&mut self, event: Event) -> std::result::Result<(), Event> {
		if self.closed {
			return Err(event);
		}
		if self.events.len() >= self.capacity {
			warn!(
				capacity = self.capacity,
				"Events are being produced faster than they can be processed"
			);
			return Err(event);
		}
		self.events.push_back(event);
		Ok(())
	}

	pub fn shift(&mut self) -> Option<Event> {
		self.events.pop_front()
	}

	/// Removes and returns everything queued, oldest first.
	pub fn take_all(&mut self) -> Vec<Event> {
		self.events.drain(..).collect()
	}

	/// Stops admission. Queued events stay.
	pub fn close(&mut self) {
		self.closed = true;
	}

	pub fn is_closed(&self) -> bool {
		self.closed
	}

	pub fn len(&self) -> usize {
		self.events.len()
	}

	pub fn is_empty(&self) -> bool {
		self.events.is_empty()
	}
}

/// [`EventQueue`] shared between producers and the dispatcher.
#[derive(Debug, Clone)]
pub struct SharedEventQueue {
	inner: Arc<SharedInner>,
}

#[derive(Debug)]
struct SharedInner {
	queue: Mutex<EventQueue>,
	ready: Notify,
}

impl SharedEventQueue {
	pub fn new(capacity: usize) -> Self {
		Self {
			inner: Arc::new(SharedInner {
				queue: Mutex::new(EventQueue::new(capacity)),
				ready: Notify::new(),
			}),
		}
	}

	pub fn push(&self, event: Event) -> std::result::Result<(), Event> {
		self.inner.queue.lock().add_event(event)?;
		self.inner.ready.notify_one();
		Ok(())
	}

	/// Waits for the next event.
	pub async fn next(&self) -> Event {
		loop {
			if let Some(event) = self.inner.queue.lock().shift() {
				return event;
			}
			self.inner.ready.notified().await;
		}
	}

	pub fn close(&self) {
		self.inner.queue.lock().close();
	}

	pub fn len(&self) -> usize {
		self.inner.queue.lock().len()
	}

	pub fn is_empty(&self) -> bool {
		self.inner.queue.lock().is_empty()
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::events::event::MetricEvent;
	use loom_flagsync_core::User;
	use std::time::Duration;

	fn metric(name: &str) -> Event {
		Event::from(MetricEvent::new(User::builder("u").build(), name, 1.0))
	}

	fn name_of(event: &Event) -> &str {
		match event {
			Event::Metric(m) => &m.event_name,
			_ => "",
		}
	}

	#[test]
	fn test_rejects_at_capacity() {
		let mut queue = EventQueue::new(2);
		assert!(queue.add_event(metric("a")).is_ok());
		assert!(queue.add_event(metric("b")).is_ok());

		let rejected = queue.add_event(metric("c")).unwrap_err();
		assert_eq!(name_of(&rejected), "c");
		assert_eq!(queue.len(), 2);
	}

	#[derive(Clone, Default)]
	struct CapturedLogs(Arc<Mutex<Vec<u8>>>);

	impl std::io::Write for CapturedLogs {
		fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
			self.0.lock().extend_from_slice(buf);
			Ok(buf.len())
		}

		fn flush(&mut self) -> std::io::Result<()> {
			Ok(())
		}
	}

	impl<'a> tracing_subscriber::fmt::MakeWriter<'a> for CapturedLogs {
		type Writer = Self;

		fn make_writer(&'a self) -> Self::Writer {
			self.clone()
		}
	}

	#[test]
	fn test_full_queue_logs_a_warning() {
		let logs = CapturedLogs::default();
		let subscriber = tracing_subscriber::fmt()
			.with_writer(logs.clone())
			.with_ansi(false)
			.finish();

		tracing::subscriber::with_default(subscriber, || {
			let mut queue = EventQueue::new(1);
			queue.add_event(metric("a")).unwrap();
			assert!(queue.add_event(metric("b")).is_err());
		});

		let output = String::from_utf8(logs.0.lock().clone()).unwrap();
		assert!(output.contains("WARN"));
		assert!(output.contains("Events are being produced faster than they can be processed"));
		assert!(output.contains("capacity=1"));
	}

	#[test]
	fn test_no_warning_below_capacity() {
		let logs = CapturedLogs::default();
		let subscriber = tracing_subscriber::fmt()
			.with_writer(logs.clone())
			.with_ansi(false)
			.finish();

		tracing::subscriber::with_default(subscriber, || {
			let mut queue = EventQueue::new(2);
			queue.add_event(metric("a")).unwrap();
			queue.add_event(metric("b")).unwrap();
		});

		assert!(logs.0.lock().is_empty());
	}

	#[test]
	fn test_fifo_order() {
		let mut queue = EventQueue::new(10);
		for name in ["a", "b", "c"] {
			queue.add_event(metric(name)).unwrap();
		}
		assert_eq!(name_of(&queue.shift().unwrap()), "a");

		let rest: Vec<String> = queue.take_all().iter().map(|e| name_of(e).to_string()).collect();
		assert_eq!(rest, vec!["b", "c"]);
		assert!(queue.is_empty());
	}

	#[test]
	fn test_close_keeps_queued_events() {
		let mut queue = EventQueue::new(10);
		queue.add_event(metric("a")).unwrap();
		queue.close();

		assert!(queue.add_event(metric("b")).is_err());
		assert!(queue.is_closed());
		assert_eq!(queue.len(), 1);
	}

	#[tokio::test]
	async fn test_next_waits_for_push() {
		let queue = SharedEventQueue::new(10);
		let consumer = queue.clone();
		let task = tokio::spawn(async move { consumer.next().await });

		tokio::time::sleep(Duration::from_millis(20)).await;
		assert!(!task.is_finished());

		queue.push(metric("late")).unwrap();
		let event = task.await.unwrap();
		assert_eq!(name_of(&event), "late");
	}

	#[tokio::test]
	async fn test_push_before_next_is_not_lost() {
		let queue = SharedEventQueue::new(10);
		queue.push(metric("early")).unwrap();
		assert_eq!(queue.len(), 1);
		let event = queue.next().await;
		assert_eq!(name_of(&event), "early");
	}
}
