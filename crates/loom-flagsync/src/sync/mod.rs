// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Data synchronization strategies.
//!
//! A [`DataSynchronizer`] keeps the store in step with the flag service. Both
//! transports reduce what they receive to a
//! [`loom_flagsync_core::AddressedUpdate`] and hand it to an [`UpdateSink`],
//! which routes it through the store mediator.

mod polling;
mod requestor;
mod streaming;
mod test_data;
mod token;

use std::sync::Arc;

use async_trait::async_trait;
use loom_flagsync_core::{AddressedUpdate, DataUpdate, User};
use tracing::debug;

use crate::error::{FlagsError, Result};
use crate::updates::DataSourceUpdates;

pub use polling::{PollingConfig, PollingDataSynchronizer, DEFAULT_POLLING_INTERVAL};
pub use requestor::Requestor;
pub use streaming::{
	reconnect_delay, streaming_url, StreamState, StreamingConfig, StreamingDataSynchronizer,
	CLOSED_BY_CLIENT_CODE, CLOSED_BY_CLIENT_REASON, DEFAULT_PING_INTERVAL, DEFAULT_RECONNECT_INTERVALS,
	MIN_PING_INTERVAL,
};
pub use test_data::{TestData, TestDataSynchronizer};
pub use token::{connection_token, connection_token_at};

/// How the client keeps its flags current.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DataSyncMode {
	#[default]
	Streaming,
	Polling,
}

#[async_trait]
pub trait DataSynchronizer: Send + Sync {
	/// Begins synchronizing in the background.
	async fn start(&self);

	/// Switches to `user` and returns once data for that user has been
	/// requested and applied.
	async fn identify(&self, user: User) -> Result<()>;

	/// Stops synchronizing. Idempotent.
	async fn stop(&self);

	async fn close(&self) {
		self.stop().await;
	}
}

/// Synchronizer for offline clients.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullDataSynchronizer;

#[async_trait]
impl DataSynchronizer for NullDataSynchronizer {
	async fn start(&self) {}

	async fn identify(&self, _user: User) -> Result<()> {
		Ok(())
	}

	async fn stop(&self) {}
}

pub type CompletionHandler = Arc<dyn Fn() + Send + Sync>;
pub type ErrorHandler = Arc<dyn Fn(FlagsError) + Send + Sync>;

/// Applies normalized updates through the mediator and reports outcomes.
///
/// `on_complete` fires once per applied update, including an empty patch,
/// which is how a "nothing changed" poll still completes initialization.
#[derive(Clone)]
pub struct UpdateSink {
	updates: DataSourceUpdates,
	on_complete: CompletionHandler,
	on_error: ErrorHandler,
}

impl UpdateSink {
	pub fn new(updates: DataSourceUpdates, on_complete: CompletionHandler, on_error: ErrorHandler) -> Self {
		Self {
			updates,
			on_complete,
			on_error,
		}
	}

	/// A sink that ignores completions and errors.
	pub fn silent(updates: DataSourceUpdates) -> Self {
		Self::new(updates, Arc::new(|| {}), Arc::new(|_| {}))
	}

	pub fn updates(&self) -> &DataSourceUpdates {
		&self.updates
	}

	pub fn apply(&self, update: AddressedUpdate) {
		let AddressedUpdate { user_key_id, update } = update;
		match update {
			DataUpdate::Full(data) => {
				debug!(user_key_id = %user_key_id, flags = data.flags.len(), "Received full data");
				self.updates.init(&user_key_id, data, || (self.on_complete)());
			}
			DataUpdate::Patch(items) => {
				debug!(user_key_id = %user_key_id, flags = items.len(), "Received patch");
				for item in items {
					self.updates.upsert(&user_key_id, item.namespace, item.flag, || {});
				}
				(self.on_complete)();
			}
		}
	}

	pub fn error(&self, error: FlagsError) {
		(self.on_error)(error);
	}
}

impl std::fmt::Debug for UpdateSink {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("UpdateSink").finish_non_exhaustive()
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::emitter::Emitter;
	use crate::platform::MemoryPersistence;
	use crate::store::FlagStore;
	use loom_flagsync_core::{FlagEntry, FullData, PatchItem};
	use std::sync::atomic::{AtomicUsize, Ordering};

	fn sink_with_counter() -> (UpdateSink, FlagStore, Arc<AtomicUsize>) {
		let store = FlagStore::new(Arc::new(MemoryPersistence::new()));
		store.identify(User::builder("u1").build()).unwrap();
		let completions = Arc::new(AtomicUsize::new(0));
		let counter = completions.clone();
		let sink = UpdateSink::new(
			DataSourceUpdates::new(store.clone(), Emitter::new()),
			Arc::new(move || {
				counter.fetch_add(1, Ordering::SeqCst);
			}),
			Arc::new(|_| {}),
		);
		(sink, store, completions)
	}

	#[test]
	fn test_empty_patch_completes() {
		let (sink, store, completions) = sink_with_counter();
		sink.apply(AddressedUpdate::new("u1", DataUpdate::Patch(Vec::new())));

		assert_eq!(completions.load(Ordering::SeqCst), 1);
		assert!(!store.initialized());
	}

	#[test]
	fn test_patch_applies_every_item_then_completes_once() {
		let (sink, store, completions) = sink_with_counter();
		sink.apply(AddressedUpdate::new(
			"u1",
			DataUpdate::Patch(vec![
				PatchItem::flag(FlagEntry::new("a", "1", 1)),
				PatchItem::flag(FlagEntry::new("b", "2", 2)),
			]),
		));

		assert_eq!(completions.load(Ordering::SeqCst), 1);
		assert_eq!(store.snapshot().len(), 2);
		assert_eq!(store.version(), 2);
	}

	#[test]
	fn test_full_for_stale_user_still_completes() {
		let (sink, store, completions) = sink_with_counter();
		sink.apply(AddressedUpdate::new(
			"someone-else",
			DataUpdate::Full(FullData::remote(vec![FlagEntry::new("a", "1", 1)])),
		));

		assert_eq!(completions.load(Ordering::SeqCst), 1);
		assert!(store.snapshot().is_empty());
	}

	#[tokio::test]
	async fn test_null_synchronizer_is_inert() {
		let sync = NullDataSynchronizer;
		sync.start().await;
		sync.identify(User::builder("u").build()).await.unwrap();
		sync.close().await;
	}
}
