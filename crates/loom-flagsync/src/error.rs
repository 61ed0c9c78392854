// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Error types for the flag synchronization SDK.

use loom_common_http::is_http_recoverable;
use loom_flagsync_core::ProtocolError;
use thiserror::Error;

/// Result type alias for SDK operations.
pub type Result<T> = std::result::Result<T, FlagsError>;

/// Errors that can occur in the flag synchronization SDK.
///
/// Errors are `Clone` so the same failure can be handed to initialization
/// waiters and broadcast to subscribers.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum FlagsError {
	/// SDK key is missing and the client is not offline.
	#[error("you must configure the client with an SDK key")]
	MissingSdkKey,

	/// No user was configured.
	#[error("you must configure the client with a user")]
	MissingUser,

	/// The user cannot be identified.
	#[error("invalid user: {0}")]
	InvalidUser(String),

	/// The client did not receive flag data within the start wait time.
	#[error(
		"client failed to initialize within {0} ms; this usually indicates a connection issue \
		 or an invalid SDK key. Initialization continues in the background"
	)]
	InitializationTimeout(u64),

	/// The service rejected the SDK key.
	#[error("authentication failed. Double check your SDK key.")]
	AuthenticationFailed,

	/// Server returned an unexpected status.
	#[error("server error ({status}): {message}")]
	ServerError { status: u16, message: String },

	/// The request never produced a response.
	#[error("request failed: {0}")]
	RequestFailed(String),

	/// Streaming connection failed.
	#[error("connection failed: {0}")]
	ConnectionFailed(String),

	/// Response or message could not be decoded.
	#[error("failed to parse: {0}")]
	ParseFailed(String),

	/// Flag is not present in the store.
	#[error("flag not found: {0}")]
	FlagNotFound(String),

	/// Flag variation does not convert to the requested type.
	#[error("type mismatch for flag: {0}")]
	WrongType(String),

	/// Reading or writing the persistence medium failed.
	#[error("persistence error: {0}")]
	Persistence(String),

	/// The client has been closed.
	#[error("client has been closed")]
	ClientClosed,
}

impl FlagsError {
	/// Maps an unexpected HTTP status to an error. `401` becomes
	/// [`FlagsError::AuthenticationFailed`].
	pub fn from_status(status: u16, message: impl Into<String>) -> Self {
		if status == 401 {
			return FlagsError::AuthenticationFailed;
		}
		FlagsError::ServerError {
			status,
			message: message.into(),
		}
	}

	/// HTTP status behind the error, if any.
	pub fn status(&self) -> Option<u16> {
		match self {
			FlagsError::AuthenticationFailed => Some(401),
			FlagsError::ServerError { status, .. } => Some(*status),
			_ => None,
		}
	}

	/// Whether the failed transport operation may be attempted again.
	///
	/// I/O failures are recoverable; HTTP statuses follow
	/// [`loom_common_http::is_http_recoverable`].
	pub fn is_recoverable(&self) -> bool {
		match self {
			FlagsError::RequestFailed(_) | FlagsError::ConnectionFailed(_) => true,
			FlagsError::AuthenticationFailed => false,
			FlagsError::ServerError { status, .. } => is_http_recoverable(*status),
			_ => false,
		}
	}

	pub fn is_authentication(&self) -> bool {
		matches!(self, FlagsError::AuthenticationFailed)
	}
}

impl From<ProtocolError> for FlagsError {
	fn from(e: ProtocolError) -> Self {
		FlagsError::ParseFailed(e.to_string())
	}
}

impl From<serde_json::Error> for FlagsError {
	fn from(e: serde_json::Error) -> Self {
		FlagsError::ParseFailed(e.to_string())
	}
}

impl From<reqwest::Error> for FlagsError {
	fn from(e: reqwest::Error) -> Self {
		match e.status() {
			Some(status) => FlagsError::from_status(status.as_u16(), e.to_string()),
			None => FlagsError::RequestFailed(e.to_string()),
		}
	}
}
