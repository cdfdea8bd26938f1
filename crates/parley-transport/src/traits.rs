//! Transport abstraction traits for Parley.
//!
//! The engine talks to the broker only through these traits, so the
//! WebSocket client and the in-memory broker are interchangeable.

use async_trait::async_trait;
use bytes::Bytes;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use thiserror::Error;

static CONNECTION_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Unique identifier for a connection.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ConnectionId(pub String);

impl ConnectionId {
    /// Create a new connection ID.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generate a process-unique connection ID.
    #[must_use]
    pub fn generate() -> Self {
        let n = CONNECTION_COUNTER.fetch_add(1, Ordering::Relaxed);
        Self(format!("conn_{n:x}"))
    }

    /// Get the ID as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for ConnectionId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for ConnectionId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Transport errors.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The broker or endpoint refused the handshake. Retrying will not help.
    #[error("Handshake rejected: {0}")]
    HandshakeRejected(String),

    /// Could not reach the broker.
    #[error("Connect failed: {0}")]
    ConnectFailed(String),

    /// Connection was closed.
    #[error("Connection closed")]
    ConnectionClosed,

    /// Operation timed out.
    #[error("Timed out")]
    Timeout,

    /// Failed to send data.
    #[error("Send failed: {0}")]
    SendFailed(String),

    /// Failed to receive data.
    #[error("Receive failed: {0}")]
    ReceiveFailed(String),

    /// Protocol error.
    #[error("Protocol error: {0}")]
    Protocol(#[from] parley_protocol::ProtocolError),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl TransportError {
    /// Whether the failure is terminal for the current open attempt.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        matches!(self, TransportError::HandshakeRejected(_))
    }
}

/// A body delivered on a subscribed topic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    /// Topic the body arrived on.
    pub topic: String,
    /// Raw payload.
    pub body: Bytes,
}

impl Delivery {
    /// Create a new delivery.
    #[must_use]
    pub fn new(topic: impl Into<String>, body: impl Into<Bytes>) -> Self {
        Self {
            topic: topic.into(),
            body: body.into(),
        }
    }
}

/// A way of reaching a pub/sub broker.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Open a connection and complete the handshake.
    ///
    /// Errors for which [`TransportError::is_fatal`] holds mean the endpoint
    /// itself was refused; any other error may succeed on a later attempt.
    async fn connect(&self, endpoint: &str) -> Result<Arc<dyn Connection>, TransportError>;

    /// Get the transport name (e.g., "websocket", "memory").
    fn name(&self) -> &'static str;
}

/// An established pub/sub connection.
///
/// Methods take `&self` so one task can block in [`Connection::recv`] while
/// another publishes.
#[async_trait]
pub trait Connection: Send + Sync {
    /// Get the connection's unique identifier.
    fn id(&self) -> &ConnectionId;

    /// Start receiving bodies published on `topic`.
    async fn subscribe(&self, topic: &str) -> Result<(), TransportError>;

    /// Stop receiving `topic`.
    async fn unsubscribe(&self, topic: &str) -> Result<(), TransportError>;

    /// Receive the next delivery.
    ///
    /// Returns `None` if the connection is closed cleanly.
    async fn recv(&self) -> Result<Option<Delivery>, TransportError>;

    /// Publish a body to a destination.
    async fn publish(&self, destination: &str, body: Bytes) -> Result<(), TransportError>;

    /// Close the connection gracefully. Closing twice is a no-op.
    async fn close(&self) -> Result<(), TransportError>;

    /// Check if the connection is still open.
    fn is_open(&self) -> bool;
}
