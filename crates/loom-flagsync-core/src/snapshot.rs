// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Per-user flag snapshot with its version watermark.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::flag::FlagEntry;

/// All flags held for one user.
///
/// `version` is the highest entry version, or 0 when there are no entries.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StoreSnapshot {
	pub flags: HashMap<String, FlagEntry>,
	pub version: i64,
}

impl StoreSnapshot {
	/// Builds a snapshot keyed by flag key. Later duplicates replace earlier ones.
	pub fn from_entries(entries: impl IntoIterator<Item = FlagEntry>) -> Self {
		let flags: HashMap<String, FlagEntry> = entries
			.into_iter()
			.map(|entry| (entry.key.clone(), entry))
			.collect();
		let mut snapshot = Self { flags, version: 0 };
		snapshot.recompute_version();
		snapshot
	}

	/// Resets `version` to the maximum entry version.
	pub fn recompute_version(&mut self) {
		self.version = self
			.flags
			.values()
			.map(|entry| entry.version)
			.max()
			.unwrap_or(0);
	}

	pub fn is_empty(&self) -> bool {
		self.flags.is_empty()
	}

	pub fn len(&self) -> usize {
		self.flags.len()
	}

	pub fn get(&self, key: &str) -> Option<&FlagEntry> {
		self.flags.get(key)
	}
}
