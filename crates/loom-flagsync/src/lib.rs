// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Client-side feature flag SDK for Loom.
//!
//! The service evaluates flags for one identified user and the client keeps a
//! local, versioned copy of the results in step with it, either over a
//! WebSocket stream or by polling. Variations are served from that copy, and
//! evaluation and custom metric telemetry is batched back to the service.
//!
//! # Features
//!
//! - **Streaming or polling sync**: WebSocket with ping keepalive and backoff
//!   reconnects, or periodic HTTP polling
//! - **Versioned store**: stale updates never overwrite newer data
//! - **Bootstrap and offline mode**: serve static flags with no network
//! - **Telemetry pipeline**: bounded queue, deduplication, batched delivery
//! - **Change notification**: subscribe to ready, failure and update events
//!
//! # Example
//!
//! ```ignore
//! use loom_flagsync::{FlagsClient, User};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let client = FlagsClient::builder()
//!         .sdk_key("client-sdk-key")
//!         .base_url("https://flags.example.com")
//!         .user(User::builder("user-123").name("Ada").build())
//!         .build()
//!         .await?;
//!
//!     client.wait_for_initialization().await?;
//!
//!     if client.bool_variation("new-checkout", false) {
//!         client.track("checkout-started", None);
//!     }
//!
//!     client.close().await;
//!     Ok(())
//! }
//! ```

mod bootstrap;
mod client;
mod config;
mod emitter;
mod error;
mod evaluation;
pub mod events;
mod platform;
mod store;
pub mod sync;
mod updates;

pub use bootstrap::JsonBootstrapProvider;
pub use client::{ClientState, FlagsClient, DEFAULT_METRIC_VALUE};
pub use config::{
	ClientConfig, FlagsClientBuilder, DEFAULT_START_WAIT_TIME, EVENTS_PATH, POLLING_PATH, STREAMING_PATH,
};
pub use emitter::{ClientEvent, Emitter};
pub use error::{FlagsError, Result};
pub use evaluation::{
	EvalDetail, EvalResult, Evaluator, FromVariation, ReasonKind, MATCH_REASON, TYPE_MISMATCH_REASON,
};
pub use platform::{
	sdk_headers, HttpMethod, HttpRequest, HttpResponse, HttpTransport, MemoryPersistence, Persistence,
	ReqwestTransport, SocketCommand, SocketConnection, SocketConnector, SocketEvent, WebSocketConnector,
	DEFAULT_REQUEST_TIMEOUT,
};
pub use store::{store_key, FlagStore};
pub use sync::{DataSyncMode, DataSynchronizer, TestData};
pub use updates::DataSourceUpdates;

// Re-export core types for convenience
pub use loom_flagsync_core::{
	AddressedUpdate, CustomProperty, DataUpdate, FlagEntry, FullData, Namespace, Origin, PatchItem,
	StoreSnapshot, User, UserBuilder, Variation, VariationType, WireFlag,
};
