// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Versioned, per-user flag store.
//!
//! The store holds the snapshot of the currently identified user and mirrors
//! every mutation to the [`Persistence`] medium before returning. Writes go
//! through [`crate::DataSourceUpdates`]; readers take clones.

use std::collections::HashMap;
use std::sync::Arc;

use loom_flagsync_core::{FlagEntry, FullData, Namespace, StoreSnapshot, User};
use parking_lot::RwLock;
use tracing::{debug, warn};

use crate::error::{FlagsError, Result};
use crate::platform::Persistence;

/// Persistence key prefix for per-user snapshots.
pub const STORE_KEY_PREFIX: &str = "flagsync-datastore";
/// Persistence key of the current user marker.
pub const CURRENT_USER_KEY: &str = "flagsync-user";

/// Persistence key of `user_key_id`'s snapshot.
pub fn store_key(user_key_id: &str) -> String {
	format!("{STORE_KEY_PREFIX}-{user_key_id}")
}

#[derive(Debug, Default)]
struct StoreInner {
	user: User,
	snapshot: StoreSnapshot,
	initialized: bool,
	closed: bool,
}

/// Thread-safe handle to the flag store. Clones share the same state.
#[derive(Clone)]
pub struct FlagStore {
	inner: Arc<RwLock<StoreInner>>,
	persistence: Arc<dyn Persistence>,
}

impl FlagStore {
	pub fn new(persistence: Arc<dyn Persistence>) -> Self {
		Self {
			inner: Arc::new(RwLock::new(StoreInner::default())),
			persistence,
		}
	}

	/// Makes `user` current: saves the user marker, then loads that user's
	/// snapshot (or starts an empty one).
	///
	/// Runs under the write lock so no addressed write can interleave with
	/// the switch.
	pub fn identify(&self, user: User) -> Result<()> {
		let marker = serde_json::to_string(&user)?;
		let mut inner = self.inner.write();
		self.persistence.save(CURRENT_USER_KEY, marker)?;

		let snapshot = match self.persistence.load(&store_key(&user.key_id))? {
			Some(raw) => serde_json::from_str::<StoreSnapshot>(&raw).unwrap_or_else(|e| {
				warn!(user_key_id = %user.key_id, error = %e, "Discarding unreadable persisted snapshot");
				StoreSnapshot::default()
			}),
			None => StoreSnapshot::default(),
		};

		debug!(
			user_key_id = %user.key_id,
			flags = snapshot.len(),
			version = snapshot.version,
			"Store identified user"
		);

		inner.user = user;
		inner.snapshot = snapshot;
		Ok(())
	}

	pub fn user(&self) -> User {
		self.inner.read().user.clone()
	}

	pub fn user_key_id(&self) -> String {
		self.inner.read().user.key_id.clone()
	}

	pub fn get(&self, namespace: Namespace, key: &str) -> Option<FlagEntry> {
		match namespace {
			Namespace::Flags => self.inner.read().snapshot.flags.get(key).cloned(),
		}
	}

	/// All entries of `namespace` together with the store version.
	pub fn all(&self, namespace: Namespace) -> (HashMap<String, FlagEntry>, i64) {
		let inner = self.inner.read();
		match namespace {
			Namespace::Flags => (inner.snapshot.flags.clone(), inner.snapshot.version),
		}
	}

	pub fn snapshot(&self) -> StoreSnapshot {
		self.inner.read().snapshot.clone()
	}

	/// Inserts or overwrites one entry.
	///
	/// An existing entry is replaced when its version is `<=` the incoming
	/// one; the store version becomes the max of itself and the incoming
	/// version either way.
	pub fn upsert(&self, namespace: Namespace, entry: FlagEntry) -> Result<()> {
		let mut inner = self.inner.write();
		let Namespace::Flags = namespace;
		apply_upsert(&mut inner, entry);
		self.persist(&inner)
	}

	/// Replaces the snapshot wholesale.
	pub fn init(&self, snapshot: StoreSnapshot) -> Result<()> {
		let mut inner = self.inner.write();
		apply_init(&mut inner, snapshot);
		self.persist(&inner)
	}

	/// [`Self::upsert`] for `user_key_id` only.
	///
	/// Returns `None` when `user_key_id` is not the current user, otherwise the
	/// entry held before the write. The user check and the write happen under
	/// one lock.
	pub fn upsert_for(
		&self,
		user_key_id: &str,
		namespace: Namespace,
		entry: FlagEntry,
	) -> Result<Option<Option<FlagEntry>>> {
		let mut inner = self.inner.write();
		if inner.user.key_id != user_key_id {
			return Ok(None);
		}
		let Namespace::Flags = namespace;

		let previous = inner.snapshot.flags.get(&entry.key).cloned();
		apply_upsert(&mut inner, entry);
		self.persist(&inner)?;
		Ok(Some(previous))
	}

	/// Full replace for `user_key_id` only.
	///
	/// Local entries held now and absent from a remote `data` are carried
	/// over. Returns `None` when `user_key_id` is not the current user,
	/// otherwise the snapshots before and after the write.
	pub fn init_for(&self, user_key_id: &str, data: FullData) -> Result<Option<(StoreSnapshot, StoreSnapshot)>> {
		let mut inner = self.inner.write();
		if inner.user.key_id != user_key_id {
			return Ok(None);
		}

		let keep_local = !data.is_local();
		let mut incoming = data.into_snapshot();
		if keep_local {
			for (key, entry) in inner.snapshot.flags.iter().filter(|(_, e)| e.is_local()) {
				if !incoming.flags.contains_key(key) {
					incoming.flags.insert(key.clone(), entry.clone());
				}
			}
		}

		let old = std::mem::take(&mut inner.snapshot);
		apply_init(&mut inner, incoming);
		let new = inner.snapshot.clone();
		self.persist(&inner)?;
		Ok(Some((old, new)))
	}

	pub fn version(&self) -> i64 {
		self.inner.read().snapshot.version
	}

	/// True once any `init` has run.
	pub fn initialized(&self) -> bool {
		self.inner.read().initialized
	}

	pub fn close(&self) {
		self.inner.write().closed = true;
	}

	pub fn is_closed(&self) -> bool {
		self.inner.read().closed
	}

	fn persist(&self, inner: &StoreInner) -> Result<()> {
		let raw = serde_json::to_string(&inner.snapshot)?;
		self
			.persistence
			.save(&store_key(&inner.user.key_id), raw)
			.map_err(|e| FlagsError::Persistence(e.to_string()))
	}
}

fn apply_upsert(inner: &mut StoreInner, entry: FlagEntry) {
	let version = entry.version;
	let replace = inner
		.snapshot
		.flags
		.get(&entry.key)
		.map_or(true, |prior| prior.version <= version);
	if replace {
		inner.snapshot.flags.insert(entry.key.clone(), entry);
	}
	if version > inner.snapshot.version {
		inner.snapshot.version = version;
	}
}

fn apply_init(inner: &mut StoreInner, mut snapshot: StoreSnapshot) {
	snapshot.recompute_version();
	inner.snapshot = snapshot;
	inner.initialized = true;
}

impl std::fmt::Debug for FlagStore {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		let inner = self.inner.read();
		f.debug_struct("FlagStore")
			.field("user", &inner.user.key_id)
			.field("flags", &inner.snapshot.len())
			.field("version", &inner.snapshot.version)
			.finish()
	}
}
