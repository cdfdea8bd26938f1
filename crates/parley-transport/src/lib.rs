//! # parley-transport
//!
//! Pub/sub transport abstraction for the Parley chat client.
//!
//! The session engine only needs "open a durable connection, subscribe to a
//! topic, publish to a destination". This crate defines that capability and
//! ships two implementations:
//!
//! - **Memory** - an in-process broker with fault injection, for tests and
//!   offline demos
//! - **WebSocket** - a tokio-tungstenite client speaking the Parley frame
//!   protocol (feature `websocket`, on by default)
//!
//! ```rust,ignore
//! use parley_transport::{Connection, Transport};
//!
//! async fn tail(transport: &dyn Transport, topic: &str) {
//!     let conn = transport.connect("memory://local").await.unwrap();
//!     conn.subscribe(topic).await.unwrap();
//!     while let Ok(Some(delivery)) = conn.recv().await {
//!         // Process delivery.body
//!     }
//! }
//! ```

pub mod memory;
pub mod traits;

#[cfg(feature = "websocket")]
pub mod websocket;

pub use memory::{MemoryBroker, MEMORY_SCHEME};
pub use traits::{Connection, ConnectionId, Delivery, Transport, TransportError};

#[cfg(feature = "websocket")]
pub use websocket::{WebSocketConfig, WebSocketTransport};
