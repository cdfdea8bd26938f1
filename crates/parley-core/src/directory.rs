//! Room and history lookup.
//!
//! The engine only reads from the room backend; creating rooms, listing them
//! and account management belong to other parts of the client.

use async_trait::async_trait;
use parley_protocol::{ChatMessage, RoomId};
use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};
use std::time::Duration;

use crate::error::DirectoryError;
use crate::room::Room;

/// Request/response lookups against the room backend.
#[async_trait]
pub trait RoomDirectory: Send + Sync {
    /// Fetch a room's metadata.
    ///
    /// Returns [`DirectoryError::NotFound`] when the room does not exist.
    async fn room(&self, id: &RoomId) -> Result<Room, DirectoryError>;

    /// Fetch one page of a room's history, newest first.
    async fn messages(
        &self,
        id: &RoomId,
        page: u32,
        size: u32,
    ) -> Result<Vec<ChatMessage>, DirectoryError>;
}

#[derive(Default)]
struct DirectoryState {
    rooms: HashMap<RoomId, Room>,
    history: HashMap<RoomId, Vec<ChatMessage>>,
    history_delay: Duration,
    history_unavailable: bool,
}

/// In-memory room directory.
///
/// History is stored oldest first and served newest first, like the real
/// backend. Lookups can be slowed down or failed to exercise the engine.
#[derive(Default)]
pub struct MemoryDirectory {
    state: RwLock<DirectoryState>,
}

impl MemoryDirectory {
    /// Create an empty directory.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a room.
    pub fn add_room(&self, room: Room) {
        self.write().rooms.insert(room.id.clone(), room);
    }

    /// Append a message to a room's stored history.
    pub fn record(&self, room: &RoomId, message: ChatMessage) {
        self.write()
            .history
            .entry(room.clone())
            .or_default()
            .push(message);
    }

    /// Delay every history lookup by `delay`.
    pub fn set_history_delay(&self, delay: Duration) {
        self.write().history_delay = delay;
    }

    /// Make history lookups fail.
    pub fn set_history_unavailable(&self, unavailable: bool) {
        self.write().history_unavailable = unavailable;
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, DirectoryState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, DirectoryState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl RoomDirectory for MemoryDirectory {
    async fn room(&self, id: &RoomId) -> Result<Room, DirectoryError> {
        self.read()
            .rooms
            .get(id)
            .cloned()
            .ok_or_else(|| DirectoryError::NotFound(id.to_string()))
    }

    async fn messages(
        &self,
        id: &RoomId,
        page: u32,
        size: u32,
    ) -> Result<Vec<ChatMessage>, DirectoryError> {
        let delay = self.read().history_delay;
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        let state = self.read();
        if state.history_unavailable {
            return Err(DirectoryError::Unavailable("history service down".into()));
        }

        let skip = page as usize * size as usize;
        Ok(state
            .history
            .get(id)
            .map(|stored| {
                stored
                    .iter()
                    .rev()
                    .skip(skip)
                    .take(size as usize)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parley_protocol::Timestamp;

    #[tokio::test]
    async fn test_history_is_served_newest_first_in_pages() {
        let directory = MemoryDirectory::new();
        let room = RoomId::parse("r").unwrap();
        for t in 1..=5 {
            directory.record(
                &room,
                ChatMessage::new("a", format!("m{t}"), Timestamp::from_millis(t)),
            );
        }

        let first = directory.messages(&room, 0, 2).await.unwrap();
        let contents: Vec<_> = first.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, ["m5", "m4"]);

        let third = directory.messages(&room, 2, 2).await.unwrap();
        assert_eq!(third.len(), 1);
        assert_eq!(third[0].content, "m1");

        let empty = RoomId::parse("empty").unwrap();
        assert!(directory.messages(&empty, 0, 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_unknown_room_is_not_found() {
        let directory = MemoryDirectory::new();
        let id = RoomId::parse("ghost").unwrap();
        assert_eq!(
            directory.room(&id).await.unwrap_err(),
            DirectoryError::NotFound("ghost".into())
        );
    }

    #[tokio::test]
    async fn test_history_outage() {
        let directory = MemoryDirectory::new();
        directory.set_history_unavailable(true);
        let id = RoomId::parse("r").unwrap();
        assert!(matches!(
            directory.messages(&id, 0, 10).await,
            Err(DirectoryError::Unavailable(_))
        ));
    }
}
