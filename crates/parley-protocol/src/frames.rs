//! Control frames for the pub/sub link.
//!
//! Frames carry subscription management and opaque message bodies between
//! the client and the broker. Chat payloads travel as JSON text inside the
//! `body` of `publish` and `message` frames.

use serde::{Deserialize, Serialize};

/// Frame type identifiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "u8", try_from = "u8")]
#[repr(u8)]
pub enum FrameType {
    Connect = 0x01,
    Connected = 0x02,
    Subscribe = 0x03,
    Unsubscribe = 0x04,
    Publish = 0x05,
    Message = 0x06,
    Error = 0x07,
    Ping = 0x08,
    Pong = 0x09,
}

impl From<FrameType> for u8 {
    fn from(ft: FrameType) -> u8 {
        ft as u8
    }
}

impl TryFrom<u8> for FrameType {
    type Error = &'static str;

    fn try_from(value: u8) -> Result<Self, <Self as TryFrom<u8>>::Error> {
        match value {
            0x01 => Ok(FrameType::Connect),
            0x02 => Ok(FrameType::Connected),
            0x03 => Ok(FrameType::Subscribe),
            0x04 => Ok(FrameType::Unsubscribe),
            0x05 => Ok(FrameType::Publish),
            0x06 => Ok(FrameType::Message),
            0x07 => Ok(FrameType::Error),
            0x08 => Ok(FrameType::Ping),
            0x09 => Ok(FrameType::Pong),
            _ => Err("Invalid frame type"),
        }
    }
}

/// A protocol frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Frame {
    /// Client handshake.
    Connect {
        /// Protocol major version.
        version: u8,
        /// Optional session token.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        token: Option<String>,
    },

    /// Broker accepted the handshake.
    Connected {
        /// Broker-assigned session identifier.
        session: String,
        /// Negotiated protocol major version.
        version: u8,
        /// Recommended heartbeat interval in milliseconds.
        heartbeat: u32,
    },

    /// Start receiving a topic.
    Subscribe {
        /// Subscription id, echoed in errors.
        id: u64,
        /// Topic name.
        topic: String,
    },

    /// Stop receiving a topic.
    Unsubscribe {
        /// Subscription id given at subscribe time.
        id: u64,
        /// Topic name.
        topic: String,
    },

    /// Client sends a body to a destination.
    Publish {
        /// Send address.
        destination: String,
        /// Serialized payload.
        body: String,
    },

    /// Broker delivers a body published on a subscribed topic.
    Message {
        /// Topic the body was published on.
        topic: String,
        /// Serialized payload.
        body: String,
    },

    /// Error report.
    Error {
        /// Error code.
        code: u16,
        /// Human-readable error message.
        message: String,
    },

    /// Keepalive ping.
    Ping {
        /// Optional timestamp.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        timestamp: Option<u64>,
    },

    /// Keepalive pong.
    Pong {
        /// Echoed timestamp from ping.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        timestamp: Option<u64>,
    },
}

impl Frame {
    /// Get the frame type.
    #[must_use]
    pub fn frame_type(&self) -> FrameType {
        match self {
            Frame::Connect { .. } => FrameType::Connect,
            Frame::Connected { .. } => FrameType::Connected,
            Frame::Subscribe { .. } => FrameType::Subscribe,
            Frame::Unsubscribe { .. } => FrameType::Unsubscribe,
            Frame::Publish { .. } => FrameType::Publish,
            Frame::Message { .. } => FrameType::Message,
            Frame::Error { .. } => FrameType::Error,
            Frame::Ping { .. } => FrameType::Ping,
            Frame::Pong { .. } => FrameType::Pong,
        }
    }

    /// Create a new Connect frame.
    #[must_use]
    pub fn connect(version: u8, token: Option<String>) -> Self {
        Frame::Connect { version, token }
    }

    /// Create a new Connected frame.
    #[must_use]
    pub fn connected(session: impl Into<String>, version: u8, heartbeat: u32) -> Self {
        Frame::Connected {
            session: session.into(),
            version,
            heartbeat,
        }
    }

    /// Create a new Subscribe frame.
    #[must_use]
    pub fn subscribe(id: u64, topic: impl Into<String>) -> Self {
        Frame::Subscribe {
            id,
            topic: topic.into(),
        }
    }

    /// Create a new Unsubscribe frame.
    #[must_use]
    pub fn unsubscribe(id: u64, topic: impl Into<String>) -> Self {
        Frame::Unsubscribe {
            id,
            topic: topic.into(),
        }
    }

    /// Create a new Publish frame.
    #[must_use]
    pub fn publish(destination: impl Into<String>, body: impl Into<String>) -> Self {
        Frame::Publish {
            destination: destination.into(),
            body: body.into(),
        }
    }

    /// Create a new Message frame.
    #[must_use]
    pub fn message(topic: impl Into<String>, body: impl Into<String>) -> Self {
        Frame::Message {
            topic: topic.into(),
            body: body.into(),
        }
    }

    /// Create a new Error frame.
    #[must_use]
    pub fn error(code: u16, message: impl Into<String>) -> Self {
        Frame::Error {
            code,
            message: message.into(),
        }
    }

    /// Create a new Ping frame.
    #[must_use]
    pub fn ping() -> Self {
        Frame::Ping { timestamp: None }
    }

    /// Create a new Pong frame.
    #[must_use]
    pub fn pong(timestamp: Option<u64>) -> Self {
        Frame::Pong { timestamp }
    }
}
