// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Normalized update protocol shared by the streaming and polling transports.
//!
//! Whatever arrives on the wire is reduced to either a [`DataUpdate::Full`]
//! replacement or a [`DataUpdate::Patch`] of individual upserts, addressed to
//! the user it was computed for.

use crate::flag::{FlagEntry, Origin};
use crate::snapshot::StoreSnapshot;

/// Keyspace inside the store. Flags are the only one today.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Namespace {
	#[default]
	Flags,
}

impl Namespace {
	pub fn as_str(&self) -> &'static str {
		match self {
			Namespace::Flags => "flags",
		}
	}
}

impl std::fmt::Display for Namespace {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.write_str(self.as_str())
	}
}

/// A complete replacement of the user's flags.
#[derive(Debug, Clone, PartialEq)]
pub struct FullData {
	pub flags: Vec<FlagEntry>,
	/// `Local` when the data comes from bootstrap rather than the service.
	pub origin: Origin,
}

impl FullData {
	pub fn remote(flags: Vec<FlagEntry>) -> Self {
		Self {
			flags,
			origin: Origin::Remote,
		}
	}

	pub fn local(flags: Vec<FlagEntry>) -> Self {
		Self {
			flags,
			origin: Origin::Local,
		}
	}

	pub fn is_local(&self) -> bool {
		self.origin == Origin::Local
	}

	pub fn into_snapshot(self) -> StoreSnapshot {
		StoreSnapshot::from_entries(self.flags)
	}
}

/// One upsert within a patch.
#[derive(Debug, Clone, PartialEq)]
pub struct PatchItem {
	pub namespace: Namespace,
	pub flag: FlagEntry,
}

impl PatchItem {
	pub fn flag(flag: FlagEntry) -> Self {
		Self {
			namespace: Namespace::Flags,
			flag,
		}
	}
}

#[derive(Debug, Clone, PartialEq)]
pub enum DataUpdate {
	Full(FullData),
	Patch(Vec<PatchItem>),
}

impl DataUpdate {
	pub fn is_full(&self) -> bool {
		matches!(self, DataUpdate::Full(_))
	}

	/// Number of flag entries carried by the update.
	pub fn len(&self) -> usize {
		match self {
			DataUpdate::Full(data) => data.flags.len(),
			DataUpdate::Patch(items) => items.len(),
		}
	}

	pub fn is_empty(&self) -> bool {
		self.len() == 0
	}
}

/// An update together with the user it was computed for.
#[derive(Debug, Clone, PartialEq)]
pub struct AddressedUpdate {
	pub user_key_id: String,
	pub update: DataUpdate,
}

impl AddressedUpdate {
	pub fn new(user_key_id: impl Into<String>, update: DataUpdate) -> Self {
		Self {
			user_key_id: user_key_id.into(),
			update,
		}
	}
}
