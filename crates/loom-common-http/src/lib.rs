// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights
// reserved. SPDX-License-Identifier: Proprietary

//! Shared HTTP utilities for Loom SDKs.
//!
//! This crate provides:
//! - A pre-configured HTTP client with a consistent SDK User-Agent header
//! - Classification of HTTP failures into recoverable and terminal ones
//! - Uniform log messages for failed requests

mod client;
mod status;

pub use client::{builder, sdk_version, user_agent, SDK_NAME};
pub use status::{http_error_message, is_http_recoverable};
