//! # parley-core
//!
//! The realtime chat session engine for Parley.
//!
//! This crate owns everything stateful about being in a room:
//!
//! - **Connection** - one pub/sub subscription per room, with constant-delay
//!   reconnect and cancellable teardown
//! - **Store** - the ordered, de-duplicated message log
//! - **Notify** - when an incoming message raises a passive alert
//! - **Room** - metadata cache for the current room
//! - **Session** - composes the above behind `enter` / `send_message` / `leave`
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐  frames  ┌─────────────┐  append  ┌──────────────┐
//! │  Connection  │─────────▶│   Ingest    │─────────▶│ MessageStore │
//! │   Manager    │          │    gate     │          └──────────────┘
//! └──────────────┘          └─────────────┘
//!        ▲                         │
//!        │ open/send/close         ▼
//! ┌──────────────┐          ┌─────────────┐
//! │   Session    │          │ Notification│
//! │  Controller  │          │   Policy    │
//! └──────────────┘          └─────────────┘
//! ```

pub mod config;
pub mod connection;
pub mod directory;
pub mod error;
pub mod metrics;
pub mod notify;
pub mod room;
pub mod session;
pub mod store;

pub use config::EngineConfig;
pub use connection::{ConnectionManager, ConnectionState, FrameHandler};
pub use directory::{MemoryDirectory, RoomDirectory};
pub use error::{ConnectionError, DirectoryError, NotifyError, SessionError, ValidationError};
pub use notify::{
    AttentionSignals, NoopNotifier, Notification, NotificationPolicy, Notifier, NotifyContext,
    RecordingNotifier,
};
pub use room::{Room, RoomMetadataCache};
pub use session::{validate_outgoing, SessionController};
pub use store::MessageStore;
