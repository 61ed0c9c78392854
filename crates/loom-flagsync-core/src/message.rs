// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Wire envelope spoken by the streaming socket and the polling endpoint.
//!
//! # Inbound
//!
//! ```json
//! {
//!   "messageType": "data-sync",
//!   "data": {
//!     "eventType": "full",
//!     "userKeyId": "user-1",
//!     "featureFlags": [ ... ]
//!   }
//! }
//! ```
//!
//! `eventType` defaults to `patch` when missing or unrecognised.
//!
//! # Outbound
//!
//! - `{"messageType": "data-sync", "data": {"timestamp": 0, "user": {...}}}`
//! - `{"messageType": "ping", "data": null}`

use serde::{Deserialize, Serialize};

use crate::error::{ProtocolError, Result};
use crate::flag::{FlagEntry, Origin, WireFlag};
use crate::update::{AddressedUpdate, DataUpdate, FullData, PatchItem};
use crate::user::User;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MessageType {
	DataSync,
	Ping,
	#[serde(other)]
	Unknown,
}

impl MessageType {
	pub fn as_str(&self) -> &'static str {
		match self {
			MessageType::DataSync => "data-sync",
			MessageType::Ping => "ping",
			MessageType::Unknown => "unknown",
		}
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventType {
	Full,
	#[default]
	#[serde(other)]
	Patch,
}

/// Body of an inbound `data-sync` message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DataSyncPayload {
	#[serde(default)]
	pub event_type: Option<EventType>,
	#[serde(default)]
	pub user_key_id: Option<String>,
	#[serde(default)]
	pub feature_flags: Vec<WireFlag>,
	#[serde(default)]
	pub timestamp: Option<i64>,
}

impl DataSyncPayload {
	pub fn event_type(&self) -> EventType {
		self.event_type.unwrap_or_default()
	}
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InboundMessage {
	pub message_type: MessageType,
	#[serde(default)]
	pub data: Option<DataSyncPayload>,
}

impl InboundMessage {
	pub fn is_data_sync(&self) -> bool {
		self.message_type == MessageType::DataSync
	}

	/// Normalizes a `data-sync` message into an update.
	///
	/// Every entry is stamped `Origin::Remote`. When the payload omits
	/// `userKeyId`, the update is addressed to `fallback_user_key_id`.
	pub fn into_update(self, fallback_user_key_id: &str) -> Result<AddressedUpdate> {
		if self.message_type != MessageType::DataSync {
			return Err(ProtocolError::UnexpectedType(
				self.message_type.as_str().to_string(),
			));
		}
		let payload = self.data.ok_or(ProtocolError::MissingData)?;
		Ok(payload.into_update(fallback_user_key_id))
	}
}

impl DataSyncPayload {
	pub fn into_update(self, fallback_user_key_id: &str) -> AddressedUpdate {
		let event_type = self.event_type();
		let user_key_id = self
			.user_key_id
			.unwrap_or_else(|| fallback_user_key_id.to_string());
		let entries = self
			.feature_flags
			.into_iter()
			.map(|flag| FlagEntry::from_wire(flag, Origin::Remote));

		let update = match event_type {
			EventType::Full => DataUpdate::Full(FullData::remote(entries.collect())),
			EventType::Patch => DataUpdate::Patch(entries.map(PatchItem::flag).collect()),
		};
		AddressedUpdate::new(user_key_id, update)
	}
}

/// Parses a raw text frame or response body.
pub fn parse_message(raw: &str) -> Result<InboundMessage> {
	Ok(serde_json::from_str(raw)?)
}

/// Body of an outbound data request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataSyncRequest {
	/// The store watermark; the service only sends newer flags.
	pub timestamp: i64,
	pub user: User,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutboundMessage {
	pub message_type: MessageType,
	pub data: Option<DataSyncRequest>,
}

impl OutboundMessage {
	pub fn data_sync(timestamp: i64, user: User) -> Self {
		Self {
			message_type: MessageType::DataSync,
			data: Some(DataSyncRequest { timestamp, user }),
		}
	}

	pub fn ping() -> Self {
		Self {
			message_type: MessageType::Ping,
			data: None,
		}
	}

	pub fn to_json(&self) -> Result<String> {
		Ok(serde_json::to_string(self)?)
	}
}
