//! # parley-protocol
//!
//! Wire types for the Parley chat client.
//!
//! This crate defines what travels between a client and the room backend:
//! chat messages and outgoing envelopes, room-scoped pub/sub addresses, the
//! control frames of the live link, and the codecs for all of them.
//!
//! ## Example
//!
//! ```rust
//! use parley_protocol::{codec, Encoding, Frame, OutgoingMessage, RoomId};
//!
//! let room = RoomId::parse("lobby").unwrap();
//! let body = codec::encode_outgoing(&OutgoingMessage::new("alice", "hi")).unwrap();
//! let frame = Frame::publish(room.send_destination(), body);
//!
//! let encoded = codec::encode(&frame, Encoding::Json).unwrap();
//! let decoded = codec::decode(&encoded, Encoding::Json).unwrap();
//! assert_eq!(frame, decoded);
//! ```

pub mod codec;
pub mod frames;
pub mod message;
pub mod topic;
pub mod version;

pub use codec::{decode, decode_message, encode, encode_outgoing, Encoding, ProtocolError};
pub use frames::{Frame, FrameType};
pub use message::{ChatMessage, MessageKey, OutgoingMessage, Timestamp, MAX_CONTENT_CHARS};
pub use topic::RoomId;
pub use version::{Version, PROTOCOL_VERSION};
