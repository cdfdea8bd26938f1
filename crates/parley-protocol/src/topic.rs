//! Room-scoped pub/sub addresses.
//!
//! Every room has a topic clients subscribe to and a send address clients
//! publish to. The server relays what arrives at the send address onto the
//! topic.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Maximum room id length.
pub const MAX_ROOM_ID_LENGTH: usize = 256;

const TOPIC_PREFIX: &str = "/topic/room/";
const SEND_PREFIX: &str = "/app/sendMessage/";

/// An opaque room identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RoomId(String);

impl RoomId {
    /// Create a room id, rejecting values that cannot form an address.
    ///
    /// # Errors
    ///
    /// Returns an error message if the id is empty, too long, or contains
    /// whitespace, control characters or `/`.
    pub fn parse(raw: &str) -> Result<Self, &'static str> {
        let id = raw.trim();
        if id.is_empty() {
            return Err("Room id cannot be empty");
        }
        if id.len() > MAX_ROOM_ID_LENGTH {
            return Err("Room id too long");
        }
        if id
            .chars()
            .any(|c| c.is_whitespace() || c.is_control() || c == '/')
        {
            return Err("Room id contains invalid characters");
        }
        Ok(Self(id.to_string()))
    }

    /// Get the id as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The topic carrying this room's live messages.
    #[must_use]
    pub fn topic(&self) -> String {
        format!("{TOPIC_PREFIX}{}", self.0)
    }

    /// The address clients publish outgoing messages to.
    #[must_use]
    pub fn send_destination(&self) -> String {
        format!("{SEND_PREFIX}{}", self.0)
    }

    /// Recover the room id from a send address.
    #[must_use]
    pub fn from_send_destination(destination: &str) -> Option<Self> {
        destination
            .strip_prefix(SEND_PREFIX)
            .and_then(|id| Self::parse(id).ok())
    }

    /// Recover the room id from a topic name.
    #[must_use]
    pub fn from_topic(topic: &str) -> Option<Self> {
        topic
            .strip_prefix(TOPIC_PREFIX)
            .and_then(|id| Self::parse(id).ok())
    }
}

impl fmt::Display for RoomId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<&str> for RoomId {
    type Error = &'static str;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        Self::parse(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_room_addresses() {
        let room = RoomId::parse("abc123").unwrap();
        assert_eq!(room.topic(), "/topic/room/abc123");
        assert_eq!(room.send_destination(), "/app/sendMessage/abc123");
        assert_eq!(
            RoomId::from_send_destination("/app/sendMessage/abc123"),
            Some(room.clone())
        );
        assert_eq!(RoomId::from_topic("/topic/room/abc123"), Some(room));
        assert_eq!(RoomId::from_topic("/topic/other/abc123"), None);
    }

    #[test]
    fn test_room_id_validation() {
        assert_eq!(RoomId::parse("  padded ").unwrap().as_str(), "padded");
        assert!(RoomId::parse("").is_err());
        assert!(RoomId::parse("   ").is_err());
        assert!(RoomId::parse("a/b").is_err());
        assert!(RoomId::parse("a b").is_err());
        assert!(RoomId::parse(&"x".repeat(MAX_ROOM_ID_LENGTH + 1)).is_err());
    }
}
