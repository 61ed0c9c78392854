// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Error types for wire message handling.

use thiserror::Error;

/// Result type alias for protocol operations.
pub type Result<T> = std::result::Result<T, ProtocolError>;

/// Errors raised while decoding or encoding wire messages.
#[derive(Error, Debug)]
pub enum ProtocolError {
	/// The message is not valid JSON or does not match the envelope.
	#[error("malformed message: {0}")]
	Malformed(#[from] serde_json::Error),

	/// A `data-sync` message arrived without a `data` section.
	#[error("data-sync message carries no data")]
	MissingData,

	/// The message is not a `data-sync` message.
	#[error("unexpected message type: {0}")]
	UnexpectedType(String),
}
