// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Static flag data used before (or instead of) the flag service.

use loom_flagsync_core::{FlagEntry, FullData, Origin, WireFlag};

use crate::error::Result;
use crate::updates::DataSourceUpdates;

/// Seeds the store from a static flag list.
///
/// Entries are stamped `Origin::Local` with version 0, so any server-issued
/// version wins against them.
#[derive(Debug, Clone, PartialEq)]
pub struct JsonBootstrapProvider {
	flags: Vec<FlagEntry>,
}

impl JsonBootstrapProvider {
	pub fn new(flags: Vec<WireFlag>) -> Self {
		let flags = flags
			.into_iter()
			.map(|flag| {
				let mut entry = FlagEntry::from_wire(flag, Origin::Local);
				entry.version = 0;
				entry
			})
			.collect();
		Self { flags }
	}

	/// Parses a JSON array of wire flags.
	pub fn from_json(raw: &str) -> Result<Self> {
		let flags: Vec<WireFlag> = serde_json::from_str(raw)?;
		Ok(Self::new(flags))
	}

	pub fn flags(&self) -> &[FlagEntry] {
		&self.flags
	}

	pub fn len(&self) -> usize {
		self.flags.len()
	}

	pub fn is_empty(&self) -> bool {
		self.flags.is_empty()
	}

	/// Full-replaces `user_key_id`'s snapshot with the bootstrap flags.
	pub fn populate(&self, user_key_id: &str, updates: &DataSourceUpdates) {
		updates.init(user_key_id, FullData::local(self.flags.clone()), || {});
	}
}
