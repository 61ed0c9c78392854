// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Client lifecycle and change notifications.

use tokio::sync::broadcast;

use crate::error::FlagsError;

const DEFAULT_CAPACITY: usize = 256;

/// Notification delivered to [`crate::FlagsClient::subscribe`] receivers.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientEvent {
	/// The client received its first flag data.
	Ready,
	/// Synchronization failed permanently.
	Failed(FlagsError),
	/// A recoverable or evaluation error occurred.
	Error(FlagsError),
	/// These flag keys changed value.
	Update(Vec<String>),
}

/// Broadcast emitter. Clones publish to the same subscribers.
#[derive(Debug, Clone)]
pub struct Emitter<T> {
	tx: broadcast::Sender<T>,
}

impl<T: Clone> Emitter<T> {
	pub fn new() -> Self {
		Self::with_capacity(DEFAULT_CAPACITY)
	}

	pub fn with_capacity(capacity: usize) -> Self {
		let (tx, _) = broadcast::channel(capacity);
		Self { tx }
	}

	pub fn subscribe(&self) -> broadcast::Receiver<T> {
		self.tx.subscribe()
	}

	pub fn has_listeners(&self) -> bool {
		self.tx.receiver_count() > 0
	}

	/// Publishes `value`; returns how many subscribers will see it.
	pub fn emit(&self, value: T) -> usize {
		self.tx.send(value).unwrap_or(0)
	}
}

impl<T: Clone> Default for Emitter<T> {
	fn default() -> Self {
		Self::new()
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[tokio::test]
	async fn test_emit_reaches_subscribers() {
		let emitter = Emitter::<ClientEvent>::new();
		assert!(!emitter.has_listeners());

		let mut rx = emitter.subscribe();
		assert!(emitter.has_listeners());
		assert_eq!(emitter.emit(ClientEvent::Ready), 1);
		assert_eq!(rx.recv().await.unwrap(), ClientEvent::Ready);
	}

	#[test]
	fn test_emit_without_subscribers_is_dropped() {
		let emitter = Emitter::<ClientEvent>::new();
		assert_eq!(emitter.emit(ClientEvent::Update(vec!["a".into()])), 0);
	}

	#[test]
	fn test_dropped_receiver_no_longer_listens() {
		let emitter = Emitter::<u32>::with_capacity(4);
		let rx = emitter.subscribe();
		drop(rx);
		assert!(!emitter.has_listeners());
	}
}
