// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Store mediator.
//!
//! Every write to the [`FlagStore`] goes through [`DataSourceUpdates`]. It
//! discards updates addressed to a user that is no longer current, keeps
//! bootstrap-seeded flags alive across full replaces, and tells subscribers
//! which keys changed.
//!
//! Completion callbacks run before the change notification is published.

use std::collections::BTreeSet;

use loom_flagsync_core::{FlagEntry, FullData, Namespace, StoreSnapshot};
use tracing::{debug, error};

use crate::emitter::{ClientEvent, Emitter};
use crate::store::FlagStore;

#[derive(Debug, Clone)]
pub struct DataSourceUpdates {
	store: FlagStore,
	emitter: Emitter<ClientEvent>,
}

impl DataSourceUpdates {
	pub fn new(store: FlagStore, emitter: Emitter<ClientEvent>) -> Self {
		Self { store, emitter }
	}

	pub fn store(&self) -> &FlagStore {
		&self.store
	}

	/// Replaces the snapshot of `user_key_id` with `data`.
	///
	/// Local entries currently held but absent from a remote `data` are carried
	/// over. `on_complete` runs even when the update is discarded.
	pub fn init(&self, user_key_id: &str, data: FullData, on_complete: impl FnOnce()) {
		let check_for_changes = self.emitter.has_listeners();
		let flags = data.flags.len();

		let applied = self.store.init_for(user_key_id, data);
		on_complete();

		match applied {
			Ok(Some((old, new))) => {
				debug!(user_key_id, flags, version = new.version, "Initialized all data");
				if check_for_changes {
					self.check_updates(&old, &new);
				}
			}
			Ok(None) => debug!(user_key_id, "Discarded full update for stale user"),
			Err(e) => error!(user_key_id, error = %e, "Failed to persist full update"),
		}
	}

	/// Upserts one entry for `user_key_id`.
	pub fn upsert(
		&self,
		user_key_id: &str,
		namespace: Namespace,
		entry: FlagEntry,
		on_complete: impl FnOnce(),
	) {
		let check_for_changes = self.emitter.has_listeners();
		let key = entry.key.clone();
		let candidate = check_for_changes.then(|| entry.clone());

		let applied = self.store.upsert_for(user_key_id, namespace, entry);
		on_complete();

		match applied {
			Ok(Some(old)) => {
				debug!(flag_key = %key, %namespace, "Updated flag");
				if let Some(candidate) = candidate {
					if Self::is_updated(old.as_ref(), Some(&candidate)) {
						self.emitter.emit(ClientEvent::Update(vec![key]));
					}
				}
			}
			Ok(None) => debug!(user_key_id, flag_key = %key, "Discarded patch for stale user"),
			Err(e) => error!(flag_key = %key, error = %e, "Failed to persist patch"),
		}
	}

	/// Emits the keys that differ between two snapshots. Never touches the store.
	pub fn check_updates(&self, old: &StoreSnapshot, new: &StoreSnapshot) {
		let keys = Self::changed_keys(old, new);
		if !keys.is_empty() {
			debug!(count = keys.len(), "Flags changed");
			self.emitter.emit(ClientEvent::Update(keys));
		}
	}

	/// Sorted keys for which [`Self::is_updated`] holds.
	pub fn changed_keys(old: &StoreSnapshot, new: &StoreSnapshot) -> Vec<String> {
		let keys: BTreeSet<&String> = old.flags.keys().chain(new.flags.keys()).collect();
		keys
			.into_iter()
			.filter(|key| Self::is_updated(old.flags.get(*key), new.flags.get(*key)))
			.cloned()
			.collect()
	}

	/// An entry changed if it appeared, disappeared, or its variation changed
	/// without going back in version.
	pub fn is_updated(old: Option<&FlagEntry>, new: Option<&FlagEntry>) -> bool {
		match (old, new) {
			(Some(old), Some(new)) => new.version >= old.version && new.variation != old.variation,
			(None, None) => false,
			_ => true,
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::platform::{MemoryPersistence, Persistence};
	use loom_flagsync_core::{Origin, User};
	use std::cell::Cell;
	use std::sync::Arc;
	use tokio::sync::broadcast::error::TryRecvError;

	fn setup(user: &str) -> (DataSourceUpdates, Emitter<ClientEvent>) {
		let store = FlagStore::new(Arc::new(MemoryPersistence::new()));
		store.identify(User::builder(user).build()).unwrap();
		let emitter = Emitter::new();
		(DataSourceUpdates::new(store, emitter.clone()), emitter)
	}

	fn remote(key: &str, variation: &str, version: i64) -> FlagEntry {
		FlagEntry::new(key, variation, version)
	}

	fn local(key: &str, variation: &str) -> FlagEntry {
		FlagEntry::new(key, variation, 0).with_origin(Origin::Local)
	}

	#[test]
	fn test_is_updated_rule() {
		let a1 = remote("a", "x", 1);
		let a1_changed = remote("a", "y", 1);
		let a0_changed = remote("a", "y", 0);
		let a2_same = remote("a", "x", 2);

		assert!(DataSourceUpdates::is_updated(None, Some(&a1)));
		assert!(DataSourceUpdates::is_updated(Some(&a1), None));
		assert!(DataSourceUpdates::is_updated(Some(&a1), Some(&a1_changed)));
		assert!(!DataSourceUpdates::is_updated(Some(&a1), Some(&a0_changed)));
		assert!(!DataSourceUpdates::is_updated(Some(&a1), Some(&a2_same)));
		assert!(!DataSourceUpdates::is_updated(None, None));
	}

	#[tokio::test]
	async fn test_full_update_is_idempotent() {
		let (updates, emitter) = setup("u1");
		let mut rx = emitter.subscribe();
		let data = FullData::remote(vec![remote("a", "1", 3), remote("b", "2", 4)]);

		updates.init("u1", data.clone(), || {});
		let first = updates.store().snapshot();
		assert_eq!(rx.recv().await.unwrap(), ClientEvent::Update(vec!["a".into(), "b".into()]));

		updates.init("u1", data, || {});
		assert_eq!(updates.store().snapshot(), first);
		assert!(matches!(rx.try_recv(), Err(TryRecvError::Empty)));
	}

	#[tokio::test]
	async fn test_equal_version_patch_overwrites_and_notifies() {
		let (updates, emitter) = setup("u1");
		updates.init("u1", FullData::remote(vec![remote("a", "old", 5)]), || {});

		let mut rx = emitter.subscribe();
		updates.upsert("u1", Namespace::Flags, remote("a", "new", 5), || {});

		assert_eq!(updates.store().get(Namespace::Flags, "a").unwrap().variation, "new");
		assert_eq!(rx.recv().await.unwrap(), ClientEvent::Update(vec!["a".into()]));
	}

	#[tokio::test]
	async fn test_same_value_patch_is_silent() {
		let (updates, emitter) = setup("u1");
		updates.init("u1", FullData::remote(vec![remote("a", "v", 5)]), || {});

		let mut rx = emitter.subscribe();
		updates.upsert("u1", Namespace::Flags, remote("a", "v", 6), || {});

		assert_eq!(updates.store().version(), 6);
		assert!(matches!(rx.try_recv(), Err(TryRecvError::Empty)));
	}

	#[test]
	fn test_remote_full_preserves_local_flags() {
		let (updates, _) = setup("u1");
		updates.init("u1", FullData::local(vec![local("seeded", "on"), local("both", "x")]), || {});

		updates.init("u1", FullData::remote(vec![remote("both", "y", 9)]), || {});

		let snapshot = updates.store().snapshot();
		assert_eq!(snapshot.get("seeded").unwrap().origin, Origin::Local);
		assert_eq!(snapshot.get("both").unwrap().variation, "y");
		assert_eq!(snapshot.get("both").unwrap().origin, Origin::Remote);
		assert_eq!(snapshot.version, 9);
	}

	#[test]
	fn test_local_full_does_not_preserve_previous_local_flags() {
		let (updates, _) = setup("u1");
		updates.init("u1", FullData::local(vec![local("a", "1")]), || {});
		updates.init("u1", FullData::local(vec![local("b", "2")]), || {});

		let snapshot = updates.store().snapshot();
		assert!(snapshot.get("a").is_none());
		assert!(snapshot.get("b").is_some());
	}

	#[tokio::test]
	async fn test_stale_user_is_discarded_but_completes() {
		let (updates, emitter) = setup("u1");
		let mut rx = emitter.subscribe();
		let completed = Cell::new(0);

		updates.init("u0", FullData::remote(vec![remote("a", "1", 1)]), || {
			completed.set(completed.get() + 1)
		});
		updates.upsert("u0", Namespace::Flags, remote("b", "1", 1), || {
			completed.set(completed.get() + 1)
		});

		assert_eq!(completed.get(), 2);
		assert!(updates.store().snapshot().is_empty());
		assert!(!updates.store().initialized());
		assert!(matches!(rx.try_recv(), Err(TryRecvError::Empty)));
	}

	#[test]
	fn test_full_update_racing_identify_stays_with_its_user() {
		let persistence = Arc::new(MemoryPersistence::new());
		let store = FlagStore::new(persistence.clone());
		store.identify(User::builder("a").build()).unwrap();
		let updates = DataSourceUpdates::new(store.clone(), Emitter::new());

		let switcher = std::thread::spawn(move || {
			for i in 0..300 {
				let key = if i % 2 == 0 { "b" } else { "a" };
				store.identify(User::builder(key).build()).unwrap();
			}
		});
		let completed = Cell::new(0);
		for version in 1..=300 {
			updates.init("a", FullData::remote(vec![remote("only-for-a", "on", version)]), || {
				completed.set(completed.get() + 1)
			});
		}
		switcher.join().unwrap();

		assert_eq!(completed.get(), 300);
		let saved = persistence
			.load(&crate::store::store_key("b"))
			.unwrap()
			.unwrap_or_default();
		assert!(!saved.contains("only-for-a"));
	}

	#[test]
	fn test_callback_runs_before_notification() {
		let (updates, emitter) = setup("u1");
		let mut rx = emitter.subscribe();
		let saw_event_in_callback = Cell::new(true);

		updates.init("u1", FullData::remote(vec![remote("a", "1", 1)]), || {
			saw_event_in_callback.set(!matches!(rx.try_recv(), Err(TryRecvError::Empty)));
		});

		assert!(!saw_event_in_callback.get());
	}

	#[test]
	fn test_check_updates_leaves_store_alone() {
		let (updates, emitter) = setup("u1");
		let mut rx = emitter.subscribe();
		let old = StoreSnapshot::from_entries(vec![remote("a", "1", 1), remote("b", "1", 1)]);
		let new = StoreSnapshot::from_entries(vec![remote("a", "2", 2), remote("c", "1", 1)]);

		updates.check_updates(&old, &new);

		assert!(updates.store().snapshot().is_empty());
		assert_eq!(
			rx.try_recv().unwrap(),
			ClientEvent::Update(vec!["a".into(), "b".into(), "c".into()])
		);
	}
}
