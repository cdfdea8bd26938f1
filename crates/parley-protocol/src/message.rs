//! Chat message types exchanged with the room backend.
//!
//! These are the payloads carried inside `message` and `publish` frames and
//! returned by the history lookup.

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::de::{self, Deserializer};
use serde::{Deserialize, Serialize, Serializer};
use std::fmt;

/// Maximum message length in Unicode code points.
pub const MAX_CONTENT_CHARS: usize = 2000;

/// Point in time, stored as milliseconds since the Unix epoch.
///
/// Deserializes from either an integer (epoch millis) or an ISO-8601 string.
/// Strings without an offset are read as UTC.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Timestamp(i64);

impl Timestamp {
    /// Create a timestamp from epoch milliseconds.
    #[must_use]
    pub const fn from_millis(millis: i64) -> Self {
        Self(millis)
    }

    /// The current wall-clock time.
    #[must_use]
    pub fn now() -> Self {
        Self(Utc::now().timestamp_millis())
    }

    /// Epoch milliseconds.
    #[must_use]
    pub const fn as_millis(self) -> i64 {
        self.0
    }

    /// Convert to a UTC date-time, if representable.
    #[must_use]
    pub fn to_datetime(self) -> Option<DateTime<Utc>> {
        DateTime::from_timestamp_millis(self.0)
    }

    /// Parse an ISO-8601 timestamp, with or without an offset.
    ///
    /// # Errors
    ///
    /// Returns the chrono parse error if the text matches neither form.
    pub fn parse(text: &str) -> Result<Self, chrono::ParseError> {
        match DateTime::parse_from_rfc3339(text) {
            Ok(dt) => Ok(Self(dt.timestamp_millis())),
            Err(_) => NaiveDateTime::parse_from_str(text, "%Y-%m-%dT%H:%M:%S%.f")
                .map(|naive| Self(naive.and_utc().timestamp_millis())),
        }
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.to_datetime() {
            Some(dt) => write!(f, "{}", dt.to_rfc3339()),
            None => write!(f, "{}ms", self.0),
        }
    }
}

impl From<DateTime<Utc>> for Timestamp {
    fn from(dt: DateTime<Utc>) -> Self {
        Self(dt.timestamp_millis())
    }
}

impl Serialize for Timestamp {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_i64(self.0)
    }
}

impl<'de> Deserialize<'de> for Timestamp {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Millis(i64),
            Text(String),
        }

        match Raw::deserialize(deserializer)? {
            Raw::Millis(millis) => Ok(Self(millis)),
            Raw::Text(text) => Self::parse(&text).map_err(|e| {
                de::Error::custom(format!("invalid timestamp {text:?}: {e}"))
            }),
        }
    }
}

/// A chat message as delivered by the backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    /// Server-assigned identifier, when the backend provides one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// Display name of the author.
    pub sender: String,
    /// Message text.
    pub content: String,
    /// When the server accepted the message.
    #[serde(rename = "timeStamp", alias = "timestamp")]
    pub timestamp: Timestamp,
}

impl ChatMessage {
    /// Create a message without a server id.
    #[must_use]
    pub fn new(
        sender: impl Into<String>,
        content: impl Into<String>,
        timestamp: Timestamp,
    ) -> Self {
        Self {
            id: None,
            sender: sender.into(),
            content: content.into(),
            timestamp,
        }
    }

    /// Attach a server-assigned id.
    #[must_use]
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    /// The identity used for de-duplication.
    #[must_use]
    pub fn key(&self) -> MessageKey {
        match &self.id {
            Some(id) => MessageKey::Id(id.clone()),
            None => MessageKey::Content {
                sender: self.sender.clone(),
                content: self.content.clone(),
                timestamp: self.timestamp,
            },
        }
    }

    /// Length of the content in code points.
    #[must_use]
    pub fn content_chars(&self) -> usize {
        self.content.chars().count()
    }
}

/// Message identity: the server id when known, otherwise the full triple.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum MessageKey {
    /// Server-assigned identifier.
    Id(String),
    /// Sender, content and timestamp together.
    Content {
        /// Author.
        sender: String,
        /// Text.
        content: String,
        /// Server time.
        timestamp: Timestamp,
    },
}

/// The envelope a client publishes to a room's send address.
///
/// The server stamps it with a timestamp (and possibly an id) and broadcasts
/// the resulting [`ChatMessage`] on the room topic.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutgoingMessage {
    /// Author.
    pub sender: String,
    /// Text.
    pub content: String,
}

impl OutgoingMessage {
    /// Create a new outgoing envelope.
    #[must_use]
    pub fn new(sender: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            sender: sender.into(),
            content: content.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timestamp_from_millis_and_iso() {
        let from_int: ChatMessage =
            serde_json::from_str(r#"{"sender":"a","content":"hi","timeStamp":1700000000000}"#)
                .unwrap();
        assert_eq!(from_int.timestamp.as_millis(), 1_700_000_000_000);

        let from_naive: ChatMessage = serde_json::from_str(
            r#"{"sender":"a","content":"hi","timeStamp":"2023-11-14T22:13:20.000"}"#,
        )
        .unwrap();
        assert_eq!(from_naive.timestamp, from_int.timestamp);

        let from_offset: ChatMessage = serde_json::from_str(
            r#"{"sender":"a","content":"hi","timestamp":"2023-11-14T23:13:20+01:00"}"#,
        )
        .unwrap();
        assert_eq!(from_offset.timestamp, from_int.timestamp);
    }

    #[test]
    fn test_invalid_timestamp_rejected() {
        let result: Result<ChatMessage, _> =
            serde_json::from_str(r#"{"sender":"a","content":"hi","timeStamp":"yesterday"}"#);
        assert!(result.is_err());
    }

    #[test]
    fn test_message_key_prefers_server_id() {
        let a = ChatMessage::new("a", "hi", Timestamp::from_millis(1)).with_id("m-1");
        let b = ChatMessage::new("b", "other", Timestamp::from_millis(2)).with_id("m-1");
        assert_eq!(a.key(), b.key());

        let c = ChatMessage::new("a", "hi", Timestamp::from_millis(1));
        let d = ChatMessage::new("a", "hi", Timestamp::from_millis(1));
        assert_eq!(c.key(), d.key());
        assert_ne!(a.key(), c.key());
    }

    #[test]
    fn test_content_chars_counts_code_points() {
        let msg = ChatMessage::new("a", "héllo 👋", Timestamp::default());
        assert_eq!(msg.content_chars(), 7);
    }

    #[test]
    fn test_serializes_millis_and_skips_missing_id() {
        let msg = ChatMessage::new("a", "hi", Timestamp::from_millis(5));
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["timeStamp"], 5);
        assert!(json.get("id").is_none());
    }
}
