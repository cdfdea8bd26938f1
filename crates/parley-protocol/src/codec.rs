//! Codec for frames and chat payloads.
//!
//! Frames are JSON text by default; MessagePack is available for binary
//! links. Chat payloads inside frame bodies are always JSON.

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::frames::Frame;
use crate::message::{ChatMessage, OutgoingMessage, MAX_CONTENT_CHARS};

/// Maximum encoded frame size (64 KiB).
pub const MAX_FRAME_SIZE: usize = 64 * 1024;

/// Protocol errors that can occur during encoding/decoding.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// Frame exceeds maximum size.
    #[error("Frame size {0} exceeds maximum {MAX_FRAME_SIZE}")]
    FrameTooLarge(usize),

    /// JSON encoding or decoding error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// MessagePack encoding error.
    #[error("Encoding error: {0}")]
    Encode(#[from] rmp_serde::encode::Error),

    /// MessagePack decoding error.
    #[error("Decoding error: {0}")]
    Decode(#[from] rmp_serde::decode::Error),

    /// Body parsed but is not an acceptable chat message.
    #[error("Malformed message: {0}")]
    MalformedMessage(&'static str),
}

/// Frame encoding on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Encoding {
    /// JSON text frames.
    #[default]
    Json,
    /// MessagePack binary frames.
    #[serde(rename = "msgpack")]
    MessagePack,
}

/// Encode a frame.
///
/// # Errors
///
/// Returns an error if the frame is too large or encoding fails.
pub fn encode(frame: &Frame, encoding: Encoding) -> Result<Bytes, ProtocolError> {
    let data = match encoding {
        Encoding::Json => serde_json::to_vec(frame)?,
        Encoding::MessagePack => rmp_serde::to_vec_named(frame)?,
    };

    if data.len() > MAX_FRAME_SIZE {
        return Err(ProtocolError::FrameTooLarge(data.len()));
    }

    Ok(Bytes::from(data))
}

/// Decode a frame.
///
/// # Errors
///
/// Returns an error if the data is too large or invalid.
pub fn decode(data: &[u8], encoding: Encoding) -> Result<Frame, ProtocolError> {
    if data.len() > MAX_FRAME_SIZE {
        return Err(ProtocolError::FrameTooLarge(data.len()));
    }

    let frame = match encoding {
        Encoding::Json => serde_json::from_slice(data)?,
        Encoding::MessagePack => rmp_serde::from_slice(data)?,
    };
    Ok(frame)
}

/// Decode a chat message from a frame body.
///
/// A body is accepted only if it parses, names a sender and stays within the
/// content limit.
///
/// # Errors
///
/// Returns an error describing why the body was rejected.
pub fn decode_message(body: &[u8]) -> Result<ChatMessage, ProtocolError> {
    check_message(serde_json::from_slice(body)?)
}

/// Apply the [`decode_message`] checks to an already parsed message, such
/// as one entry of a history page.
///
/// # Errors
///
/// Returns [`ProtocolError::MalformedMessage`] for an empty sender or
/// over-long content.
pub fn check_message(message: ChatMessage) -> Result<ChatMessage, ProtocolError> {
    if message.sender.trim().is_empty() {
        return Err(ProtocolError::MalformedMessage("empty sender"));
    }
    if message.content_chars() > MAX_CONTENT_CHARS {
        return Err(ProtocolError::MalformedMessage("content too long"));
    }

    Ok(message)
}

/// Encode an outgoing envelope as a frame body.
///
/// # Errors
///
/// Returns an error if serialization fails.
pub fn encode_outgoing(message: &OutgoingMessage) -> Result<String, ProtocolError> {
    Ok(serde_json::to_string(message)?)
}

/// Codec bound to one encoding, for links that negotiate it once.
#[derive(Debug, Clone, Copy, Default)]
pub struct FrameCodec {
    encoding: Encoding,
}

impl FrameCodec {
    /// Create a codec for the given encoding.
    #[must_use]
    pub fn new(encoding: Encoding) -> Self {
        Self { encoding }
    }

    /// The encoding this codec uses.
    #[must_use]
    pub fn encoding(&self) -> Encoding {
        self.encoding
    }

    /// Encode a frame.
    ///
    /// # Errors
    ///
    /// Returns an error if encoding fails.
    pub fn encode(&self, frame: &Frame) -> Result<Bytes, ProtocolError> {
        encode(frame, self.encoding)
    }

    /// Decode a frame.
    ///
    /// # Errors
    ///
    /// Returns an error if decoding fails.
    pub fn decode(&self, data: &[u8]) -> Result<Frame, ProtocolError> {
        decode(data, self.encoding)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::Timestamp;

    #[test]
    fn test_frames_survive_both_encodings() {
        let frames = vec![
            Frame::connect(1, Some("token123".to_string())),
            Frame::connected("sess-1", 1, 30000),
            Frame::subscribe(7, "/topic/room/a"),
            Frame::message("/topic/room/a", r#"{"sender":"a"}"#),
            Frame::error(404, "no such topic"),
            Frame::ping(),
        ];

        for encoding in [Encoding::Json, Encoding::MessagePack] {
            let codec = FrameCodec::new(encoding);
            for frame in &frames {
                let encoded = codec.encode(frame).unwrap();
                assert_eq!(&codec.decode(&encoded).unwrap(), frame);
            }
        }
    }

    #[test]
    fn test_frame_too_large() {
        let frame = Frame::publish("/app/sendMessage/a", "x".repeat(MAX_FRAME_SIZE));
        match encode(&frame, Encoding::Json) {
            Err(ProtocolError::FrameTooLarge(_)) => {}
            other => panic!("Expected FrameTooLarge error, got {:?}", other),
        }
    }

    #[test]
    fn test_decode_message() {
        let msg = decode_message(br#"{"sender":"B","content":"hey","timeStamp":5}"#).unwrap();
        assert_eq!(msg, ChatMessage::new("B", "hey", Timestamp::from_millis(5)));
    }

    #[test]
    fn test_decode_message_rejects_malformed_bodies() {
        assert!(matches!(
            decode_message(b"not json"),
            Err(ProtocolError::Json(_))
        ));
        assert!(matches!(
            decode_message(br#"{"sender":"B","content":"missing time"}"#),
            Err(ProtocolError::Json(_))
        ));
        assert!(matches!(
            decode_message(br#"{"sender":"  ","content":"x","timeStamp":1}"#),
            Err(ProtocolError::MalformedMessage(_))
        ));

        let long = format!(
            r#"{{"sender":"B","content":"{}","timeStamp":1}}"#,
            "y".repeat(MAX_CONTENT_CHARS + 1)
        );
        assert!(matches!(
            decode_message(long.as_bytes()),
            Err(ProtocolError::MalformedMessage(_))
        ));
    }

    #[test]
    fn test_encode_outgoing() {
        let body = encode_outgoing(&OutgoingMessage::new("alice", "hello")).unwrap();
        assert_eq!(body, r#"{"sender":"alice","content":"hello"}"#);
    }
}
