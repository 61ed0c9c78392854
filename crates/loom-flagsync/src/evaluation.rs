// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Flag lookup and typed conversion of served variations.
//!
//! Flags arrive pre-evaluated for the identified user, so evaluation is a
//! store lookup followed by a string-to-type conversion.

use std::fmt;

use loom_flagsync_core::{FlagEntry, Namespace, User, Variation};
use serde::Serialize;

use crate::events::EvalEvent;
use crate::store::FlagStore;

pub const MATCH_REASON: &str = "target match";
pub const TYPE_MISMATCH_REASON: &str = "type mismatch";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum ReasonKind {
	ClientNotReady,
	Match,
	WrongType,
	FlagNotFound,
	Error,
}

impl ReasonKind {
	pub fn as_str(&self) -> &'static str {
		match self {
			ReasonKind::ClientNotReady => "ClientNotReady",
			ReasonKind::Match => "Match",
			ReasonKind::WrongType => "WrongType",
			ReasonKind::FlagNotFound => "FlagNotFound",
			ReasonKind::Error => "Error",
		}
	}
}

impl fmt::Display for ReasonKind {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}

/// Outcome of a typed evaluation, carrying the value actually returned.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EvalDetail<T> {
	pub flag_key: String,
	pub kind: ReasonKind,
	pub reason: String,
	pub value: T,
}

impl<T> EvalDetail<T> {
	pub fn new(flag_key: impl Into<String>, kind: ReasonKind, reason: impl Into<String>, value: T) -> Self {
		Self {
			flag_key: flag_key.into(),
			kind,
			reason: reason.into(),
			value,
		}
	}

	pub fn is_match(&self) -> bool {
		self.kind == ReasonKind::Match
	}
}

/// Conversion from the wire string form of a variation.
pub trait FromVariation: Sized {
	fn from_variation(raw: &str) -> Option<Self>;
}

impl FromVariation for bool {
	fn from_variation(raw: &str) -> Option<Self> {
		if raw.eq_ignore_ascii_case("true") {
			Some(true)
		} else if raw.eq_ignore_ascii_case("false") {
			Some(false)
		} else {
			None
		}
	}
}

impl FromVariation for f64 {
	/// Surrounding whitespace is ignored and a blank string reads as `0`.
	fn from_variation(raw: &str) -> Option<Self> {
		let trimmed = raw.trim();
		if trimmed.is_empty() {
			return Some(0.0);
		}
		trimmed.parse::<f64>().ok().filter(|n| !n.is_nan())
	}
}

impl FromVariation for String {
	fn from_variation(raw: &str) -> Option<Self> {
		Some(raw.to_string())
	}
}

impl FromVariation for serde_json::Value {
	fn from_variation(raw: &str) -> Option<Self> {
		serde_json::from_str(raw).ok()
	}
}

/// Result of looking a flag up.
#[derive(Debug, Clone, PartialEq)]
pub enum EvalResult {
	Matched(FlagEntry),
	FlagNotFound(String),
}

impl EvalResult {
	pub fn kind(&self) -> ReasonKind {
		match self {
			EvalResult::Matched(_) => ReasonKind::Match,
			EvalResult::FlagNotFound(_) => ReasonKind::FlagNotFound,
		}
	}

	pub fn reason(&self) -> String {
		match self {
			EvalResult::Matched(_) => MATCH_REASON.to_string(),
			EvalResult::FlagNotFound(key) => format!("flag not found: {key}"),
		}
	}

	pub fn entry(&self) -> Option<&FlagEntry> {
		match self {
			EvalResult::Matched(entry) => Some(entry),
			EvalResult::FlagNotFound(_) => None,
		}
	}

	/// Telemetry for a matched flag: the option whose value equals the
	/// served variation.
	pub fn to_eval_event(&self, user: &User) -> Option<EvalEvent> {
		let entry = self.entry()?;
		let variation = entry
			.served_variation()
			.cloned()
			.unwrap_or_else(|| Variation::new(None, entry.variation.clone()));
		Some(EvalEvent::new(
			user.clone(),
			entry.key.clone(),
			variation,
			entry.send_to_experiment,
		))
	}

	/// Converts the served variation, falling back to `default` with a
	/// `WrongType` (or `FlagNotFound`) detail.
	pub fn convert<T: FromVariation>(&self, flag_key: &str, default: T) -> EvalDetail<T> {
		match self {
			EvalResult::Matched(entry) => match T::from_variation(&entry.variation) {
				Some(value) => EvalDetail::new(flag_key, ReasonKind::Match, MATCH_REASON, value),
				None => EvalDetail::new(flag_key, ReasonKind::WrongType, TYPE_MISMATCH_REASON, default),
			},
			EvalResult::FlagNotFound(_) => EvalDetail::new(flag_key, self.kind(), self.reason(), default),
		}
	}
}

#[derive(Debug, Clone)]
pub struct Evaluator {
	store: FlagStore,
}

impl Evaluator {
	pub fn new(store: FlagStore) -> Self {
		Self { store }
	}

	pub fn evaluate(&self, flag_key: &str) -> EvalResult {
		match self.store.get(Namespace::Flags, flag_key) {
			Some(entry) => EvalResult::Matched(entry),
			None => EvalResult::FlagNotFound(flag_key.to_string()),
		}
	}
}
