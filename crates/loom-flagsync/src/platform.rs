// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Platform collaborators: request/response transport, bidirectional socket
//! and persistence medium.
//!
//! The SDK only talks to the outside world through these traits. Default
//! adapters are provided for reqwest, tokio-tungstenite and an in-memory map;
//! tests substitute scripted implementations.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, warn};

use crate::error::{FlagsError, Result};

/// Default timeout for HTTP requests made by [`ReqwestTransport`].
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpMethod {
	Get,
	Post,
}

#[derive(Debug, Clone, PartialEq)]
pub struct HttpRequest {
	pub method: HttpMethod,
	pub url: String,
	pub headers: Vec<(String, String)>,
	pub body: Option<String>,
}

impl HttpRequest {
	/// A JSON `POST` carrying the SDK headers.
	pub fn post_json(url: impl Into<String>, sdk_key: &str, body: String) -> Self {
		Self {
			method: HttpMethod::Post,
			url: url.into(),
			headers: sdk_headers(sdk_key),
			body: Some(body),
		}
	}

	pub fn header(&self, name: &str) -> Option<&str> {
		self
			.headers
			.iter()
			.find(|(k, _)| k.eq_ignore_ascii_case(name))
			.map(|(_, v)| v.as_str())
	}
}

#[derive(Debug, Clone, PartialEq)]
pub struct HttpResponse {
	pub status: u16,
	pub body: String,
}

impl HttpResponse {
	pub fn new(status: u16, body: impl Into<String>) -> Self {
		Self {
			status,
			body: body.into(),
		}
	}

	pub fn is_success(&self) -> bool {
		(200..300).contains(&self.status)
	}
}

/// Headers carried by every SDK request.
pub fn sdk_headers(sdk_key: &str) -> Vec<(String, String)> {
	vec![
		("Authorization".to_string(), sdk_key.to_string()),
		("Content-Type".to_string(), "application/json".to_string()),
		("User-Agent".to_string(), loom_common_http::user_agent()),
	]
}

/// Request/response channel to the flag service.
///
/// Implementations return `Ok` for every response that arrived, whatever its
/// status; `Err` means no response was received.
#[async_trait]
pub trait HttpTransport: Send + Sync {
	async fn send(&self, request: HttpRequest) -> Result<HttpResponse>;
}

/// [`HttpTransport`] backed by a shared reqwest client.
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
	client: reqwest::Client,
}

impl ReqwestTransport {
	pub fn new() -> Result<Self> {
		let client = loom_common_http::builder()
			.timeout(DEFAULT_REQUEST_TIMEOUT)
			.build()
			.map_err(|e| FlagsError::RequestFailed(e.to_string()))?;
		Ok(Self { client })
	}

	pub fn with_client(client: reqwest::Client) -> Self {
		Self { client }
	}
}

#[async_trait]
impl HttpTransport for ReqwestTransport {
	async fn send(&self, request: HttpRequest) -> Result<HttpResponse> {
		let mut builder = match request.method {
			HttpMethod::Get => self.client.get(&request.url),
			HttpMethod::Post => self.client.post(&request.url),
		};
		for (name, value) in &request.headers {
			builder = builder.header(name.as_str(), value.as_str());
		}
		if let Some(body) = request.body {
			builder = builder.body(body);
		}

		let response = builder
			.send()
			.await
			.map_err(|e| FlagsError::RequestFailed(e.to_string()))?;
		let status = response.status().as_u16();
		let body = response
			.text()
			.await
			.map_err(|e| FlagsError::RequestFailed(e.to_string()))?;

		Ok(HttpResponse { status, body })
	}
}

/// Instruction sent to an open socket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SocketCommand {
	Send(String),
	Close { code: u16, reason: String },
}

/// Something that happened on an open socket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SocketEvent {
	Message(String),
	/// The socket closed. `code` is the close frame code when one was received.
	Closed { code: Option<u16> },
	Error(String),
}

/// An established bidirectional channel.
///
/// Dropping `commands` closes the socket.
#[derive(Debug)]
pub struct SocketConnection {
	pub commands: mpsc::UnboundedSender<SocketCommand>,
	pub events: mpsc::UnboundedReceiver<SocketEvent>,
}

impl SocketConnection {
	pub fn send(&self, command: SocketCommand) -> bool {
		self.commands.send(command).is_ok()
	}
}

/// Opens bidirectional message channels.
#[async_trait]
pub trait SocketConnector: Send + Sync {
	async fn connect(&self, url: &str) -> Result<SocketConnection>;
}

/// [`SocketConnector`] over tokio-tungstenite.
#[derive(Debug, Clone, Default)]
pub struct WebSocketConnector;

impl WebSocketConnector {
	pub fn new() -> Self {
		Self
	}
}

#[async_trait]
impl SocketConnector for WebSocketConnector {
	async fn connect(&self, url: &str) -> Result<SocketConnection> {
		let (ws_stream, _) = tokio_tungstenite::connect_async(url)
			.await
			.map_err(|e| FlagsError::ConnectionFailed(e.to_string()))?;

		let (mut write, mut read) = ws_stream.split();
		let (command_tx, mut command_rx) = mpsc::unbounded_channel::<SocketCommand>();
		let (event_tx, event_rx) = mpsc::unbounded_channel::<SocketEvent>();

		tokio::spawn(async move {
			loop {
				tokio::select! {
					command = command_rx.recv() => match command {
						Some(SocketCommand::Send(text)) => {
							if let Err(e) = write.send(Message::Text(text)).await {
								let _ = event_tx.send(SocketEvent::Error(e.to_string()));
								let _ = event_tx.send(SocketEvent::Closed { code: None });
								break;
							}
						}
						Some(SocketCommand::Close { code, reason }) => {
							let frame = CloseFrame {
								code: CloseCode::from(code),
								reason: reason.into(),
							};
							if let Err(e) = write.send(Message::Close(Some(frame))).await {
								debug!(error = %e, "Failed to send close frame");
							}
							let _ = event_tx.send(SocketEvent::Closed { code: Some(code) });
							break;
						}
						None => {
							let _ = write.close().await;
							break;
						}
					},
					message = read.next() => match message {
						Some(Ok(Message::Text(text))) => {
							let _ = event_tx.send(SocketEvent::Message(text));
						}
						Some(Ok(Message::Close(frame))) => {
							let code = frame.map(|f| u16::from(f.code));
							let _ = event_tx.send(SocketEvent::Closed { code });
							break;
						}
						Some(Ok(_)) => {}
						Some(Err(e)) => {
							warn!(error = %e, "WebSocket error");
							let _ = event_tx.send(SocketEvent::Error(e.to_string()));
							let _ = event_tx.send(SocketEvent::Closed { code: None });
							break;
						}
						None => {
							let _ = event_tx.send(SocketEvent::Closed { code: None });
							break;
						}
					},
				}
			}
		});

		Ok(SocketConnection {
			commands: command_tx,
			events: event_rx,
		})
	}
}

/// Key/value medium the store persists to.
///
/// Calls are synchronous: the store persists inside its own short critical
/// section, before a mutation returns.
pub trait Persistence: Send + Sync {
	fn load(&self, key: &str) -> Result<Option<String>>;
	fn save(&self, key: &str, value: String) -> Result<()>;
}

/// [`Persistence`] that lives as long as the process.
#[derive(Debug, Default)]
pub struct MemoryPersistence {
	entries: Mutex<HashMap<String, String>>,
}

impl MemoryPersistence {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn len(&self) -> usize {
		self.entries.lock().len()
	}

	pub fn is_empty(&self) -> bool {
		self.entries.lock().is_empty()
	}
}

impl Persistence for MemoryPersistence {
	fn load(&self, key: &str) -> Result<Option<String>> {
		Ok(self.entries.lock().get(key).cloned())
	}

	fn save(&self, key: &str, value: String) -> Result<()> {
		self.entries.lock().insert(key.to_string(), value);
		Ok(())
	}
}
