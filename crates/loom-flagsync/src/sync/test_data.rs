// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! In-process flag source for tests.
//!
//! Hand a [`TestData`] to [`crate::FlagsClientBuilder::test_data`] and the
//! client is served from it instead of the network. Changes made with
//! [`TestData::update`] reach the client as patches, the same path a streamed
//! change takes.

use std::sync::Arc;

use async_trait::async_trait;
use loom_flagsync_core::{AddressedUpdate, DataUpdate, FlagEntry, FullData, Namespace, PatchItem, User};
use parking_lot::Mutex;
use tracing::debug;

use super::{DataSynchronizer, UpdateSink};
use crate::error::Result;
use crate::store::FlagStore;

#[derive(Debug, Default)]
struct TestDataInner {
	flags: Vec<FlagEntry>,
	attached: Option<(FlagStore, UpdateSink)>,
}

/// Flags served to a client without a flag service.
///
/// Clones share the same flags.
#[derive(Debug, Clone, Default)]
pub struct TestData {
	inner: Arc<Mutex<TestDataInner>>,
}

impl TestData {
	pub fn new() -> Self {
		Self::default()
	}

	/// Adds `flag` to the initial set, replacing one with the same key.
	pub fn flag(self, flag: FlagEntry) -> Self {
		upsert_entry(&mut self.inner.lock().flags, flag);
		self
	}

	/// Current flag set, as served on start and identify.
	pub fn flags(&self) -> Vec<FlagEntry> {
		self.inner.lock().flags.clone()
	}

	/// Changes one flag.
	///
	/// The flag is given the version after the one the client holds for that
	/// key, so it always wins. Before a client is attached only the initial
	/// set changes.
	pub fn update(&self, flag: FlagEntry) {
		let mut inner = self.inner.lock();
		let Some((store, sink)) = inner.attached.clone() else {
			upsert_entry(&mut inner.flags, flag);
			return;
		};

		let held = store.get(Namespace::Flags, &flag.key).map_or(0, |f| f.version);
		let flag = FlagEntry {
			version: held + 1,
			..flag
		};
		upsert_entry(&mut inner.flags, flag.clone());
		drop(inner);

		debug!(flag_key = %flag.key, version = flag.version, "Test data updated flag");
		sink.apply(AddressedUpdate::new(
			store.user_key_id(),
			DataUpdate::Patch(vec![PatchItem::flag(flag)]),
		));
	}

	pub(crate) fn synchronizer(&self, store: FlagStore, sink: UpdateSink) -> TestDataSynchronizer {
		self.inner.lock().attached = Some((store.clone(), sink.clone()));
		TestDataSynchronizer {
			data: self.clone(),
			store,
			sink,
		}
	}
}

fn upsert_entry(flags: &mut Vec<FlagEntry>, flag: FlagEntry) {
	match flags.iter_mut().find(|f| f.key == flag.key) {
		Some(existing) => *existing = flag,
		None => flags.push(flag),
	}
}

/// Serves a [`TestData`] flag set to every identified user.
#[derive(Debug)]
pub struct TestDataSynchronizer {
	data: TestData,
	store: FlagStore,
	sink: UpdateSink,
}

impl TestDataSynchronizer {
	fn serve(&self, user_key_id: String) {
		let flags = self.data.flags();
		debug!(user_key_id = %user_key_id, flags = flags.len(), "Serving test data");
		self
			.sink
			.apply(AddressedUpdate::new(user_key_id, DataUpdate::Full(FullData::remote(flags))));
	}
}

#[async_trait]
impl DataSynchronizer for TestDataSynchronizer {
	async fn start(&self) {
		self.serve(self.store.user_key_id());
	}

	async fn identify(&self, user: User) -> Result<()> {
		self.serve(user.key_id);
		Ok(())
	}

	async fn stop(&self) {
		self.data.inner.lock().attached = None;
	}
}
