// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Core types for the Loom client-side flag synchronization SDK.
//!
//! This crate holds the vocabulary shared by the synchronizers, the versioned
//! store and the client (`loom-flagsync`):
//!
//! - [`FlagEntry`]: one pre-evaluated flag for the identified user
//! - [`StoreSnapshot`]: all flags of one user plus the version watermark
//! - [`InboundMessage`] / [`OutboundMessage`]: the wire envelope spoken by
//!   both the streaming and the polling transport
//! - [`DataUpdate`]: the normalized "full replace" / "incremental patch"
//!   protocol consumed by the store mediator
//! - [`User`]: the identity flags are evaluated for
//!
//! # Example
//!
//! ```
//! use loom_flagsync_core::{parse_message, DataUpdate};
//!
//! let raw = r#"{
//!     "messageType": "data-sync",
//!     "data": {
//!         "eventType": "full",
//!         "userKeyId": "user-1",
//!         "featureFlags": [
//!             {"id": "dark-mode", "variation": "true", "variationType": "boolean", "timestamp": 42}
//!         ]
//!     }
//! }"#;
//!
//! let message = parse_message(raw).unwrap();
//! let update = message.into_update("user-1").unwrap();
//! assert_eq!(update.user_key_id, "user-1");
//! assert!(matches!(update.update, DataUpdate::Full(_)));
//! ```

pub mod error;
pub mod flag;
pub mod message;
pub mod snapshot;
pub mod update;
pub mod user;

pub use error::{ProtocolError, Result};
pub use flag::{FlagEntry, Origin, Variation, VariationType, WireFlag};
pub use message::{
	parse_message, DataSyncPayload, DataSyncRequest, EventType, InboundMessage, MessageType,
	OutboundMessage,
};
pub use snapshot::StoreSnapshot;
pub use update::{AddressedUpdate, DataUpdate, FullData, Namespace, PatchItem};
pub use user::{CustomProperty, User, UserBuilder};
