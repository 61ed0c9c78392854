// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Flag entries as served by the flag service and kept in the local store.

use serde::{Deserialize, Serialize};

/// Declared type of a flag's variation value.
///
/// Values always travel as strings; the type tells the client how the string
/// is meant to be read. Unknown or empty type names fall back to `String`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VariationType {
	Boolean,
	Number,
	Json,
	#[default]
	#[serde(other)]
	String,
}

/// One selectable value of a flag.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Variation {
	/// Server-side identifier of the option. Bootstrap data has none.
	#[serde(default)]
	pub id: Option<i64>,
	/// The option's value.
	pub value: String,
}

impl Variation {
	pub fn new(id: Option<i64>, value: impl Into<String>) -> Self {
		Self {
			id,
			value: value.into(),
		}
	}
}

/// Provenance of a flag entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Origin {
	/// Confirmed by the live flag service.
	#[default]
	Remote,
	/// Seeded from static bootstrap data.
	Local,
}

/// A flag as it appears on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WireFlag {
	/// The flag key.
	pub id: String,
	/// The variation served to the user.
	pub variation: String,
	#[serde(default)]
	pub variation_type: VariationType,
	#[serde(default)]
	pub send_to_experiment: Option<bool>,
	/// Server-issued version stamp.
	#[serde(default)]
	pub timestamp: Option<i64>,
	#[serde(default)]
	pub variation_options: Option<Vec<Variation>>,
}

/// A pre-evaluated flag held by the store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FlagEntry {
	pub key: String,
	pub variation: String,
	pub variation_type: VariationType,
	pub variation_options: Vec<Variation>,
	pub version: i64,
	pub send_to_experiment: bool,
	pub origin: Origin,
}

impl FlagEntry {
	/// Creates a remote string entry whose only option is its own variation.
	pub fn new(key: impl Into<String>, variation: impl Into<String>, version: i64) -> Self {
		let variation = variation.into();
		Self {
			key: key.into(),
			variation_options: vec![Variation::new(None, variation.clone())],
			variation,
			variation_type: VariationType::String,
			version,
			send_to_experiment: false,
			origin: Origin::Remote,
		}
	}

	/// Converts a wire flag, stamping it with `origin`.
	///
	/// The wire `timestamp` becomes the entry version (0 when absent). A flag
	/// without options gets a single option carrying its served variation.
	pub fn from_wire(flag: WireFlag, origin: Origin) -> Self {
		let variation_options = flag
			.variation_options
			.unwrap_or_else(|| vec![Variation::new(None, flag.variation.clone())]);

		Self {
			key: flag.id,
			variation: flag.variation,
			variation_type: flag.variation_type,
			variation_options,
			version: flag.timestamp.unwrap_or(0),
			send_to_experiment: flag.send_to_experiment.unwrap_or(false),
			origin,
		}
	}

	pub fn with_origin(mut self, origin: Origin) -> Self {
		self.origin = origin;
		self
	}

	pub fn with_type(mut self, variation_type: VariationType) -> Self {
		self.variation_type = variation_type;
		self
	}

	pub fn with_send_to_experiment(mut self, send: bool) -> Self {
		self.send_to_experiment = send;
		self
	}

	/// Returns the option matching the served variation, if any.
	pub fn served_variation(&self) -> Option<&Variation> {
		self
			.variation_options
			.iter()
			.find(|v| v.value == self.variation)
	}

	pub fn is_local(&self) -> bool {
		self.origin == Origin::Local
	}
}
