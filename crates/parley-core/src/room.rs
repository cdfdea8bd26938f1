//! Room metadata.

use parley_protocol::{RoomId, Timestamp};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::directory::RoomDirectory;
use crate::error::DirectoryError;

/// Display attributes of a room.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Room {
    /// Room identifier.
    #[serde(rename = "roomId")]
    pub id: RoomId,
    /// Display name.
    #[serde(rename = "roomName")]
    pub name: String,
    /// Who created the room.
    #[serde(default)]
    pub created_by: String,
    /// When the room was created.
    #[serde(default)]
    pub created_at: Timestamp,
}

impl Room {
    /// Create a room description.
    #[must_use]
    pub fn new(
        id: RoomId,
        name: impl Into<String>,
        created_by: impl Into<String>,
        created_at: Timestamp,
    ) -> Self {
        Self {
            id,
            name: name.into(),
            created_by: created_by.into(),
            created_at,
        }
    }
}

/// Holds the current room's metadata for one session.
#[derive(Debug, Default)]
pub struct RoomMetadataCache {
    room: Option<Room>,
}

impl RoomMetadataCache {
    /// Create an empty cache.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Look the room up and replace whatever was cached.
    ///
    /// On failure the cache is left empty.
    ///
    /// # Errors
    ///
    /// Returns the directory error, `NotFound` included.
    pub async fn refresh(
        &mut self,
        directory: &dyn RoomDirectory,
        id: &RoomId,
    ) -> Result<&Room, DirectoryError> {
        self.room = None;
        let room = directory.room(id).await?;
        debug!(room = %room.id, name = %room.name, "Room metadata refreshed");
        Ok(self.room.insert(room))
    }

    /// The cached room, if loaded.
    #[must_use]
    pub fn current(&self) -> Option<&Room> {
        self.room.as_ref()
    }

    /// Forget the cached room.
    pub fn clear(&mut self) {
        self.room = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::directory::MemoryDirectory;

    fn lobby() -> Room {
        Room::new(
            RoomId::parse("lobby").unwrap(),
            "The Lobby",
            "alice",
            Timestamp::from_millis(10),
        )
    }

    #[tokio::test]
    async fn test_refresh_loads_room() {
        let directory = MemoryDirectory::new();
        directory.add_room(lobby());

        let mut cache = RoomMetadataCache::new();
        let room = cache.refresh(&directory, &lobby().id).await.unwrap();
        assert_eq!(room.name, "The Lobby");
        assert_eq!(cache.current(), Some(&lobby()));

        cache.clear();
        assert!(cache.current().is_none());
    }

    #[tokio::test]
    async fn test_refresh_failure_empties_cache() {
        let directory = MemoryDirectory::new();
        directory.add_room(lobby());

        let mut cache = RoomMetadataCache::new();
        cache.refresh(&directory, &lobby().id).await.unwrap();

        let missing = RoomId::parse("nowhere").unwrap();
        let err = cache.refresh(&directory, &missing).await.unwrap_err();
        assert_eq!(err, DirectoryError::NotFound("nowhere".into()));
        assert!(cache.current().is_none());
    }

    #[test]
    fn test_room_wire_names() {
        let room: Room = serde_json::from_str(
            r#"{"roomId":"r1","roomName":"General","createdBy":"bob","createdAt":"2024-01-01T00:00:00"}"#,
        )
        .unwrap();
        assert_eq!(room.id.as_str(), "r1");
        assert_eq!(room.name, "General");
        assert_eq!(room.created_by, "bob");
        assert_eq!(room.created_at.as_millis(), 1_704_067_200_000);

        let sparse: Room = serde_json::from_str(r#"{"roomId":"r2","roomName":"Quiet"}"#).unwrap();
        assert_eq!(sparse.created_by, "");
    }
}
