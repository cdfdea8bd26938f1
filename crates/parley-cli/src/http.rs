//! Room directory backed by the chat server's REST API.

use async_trait::async_trait;
use parley_core::{DirectoryError, Room, RoomDirectory};
use parley_protocol::{codec, ChatMessage, ProtocolError, RoomId};
use reqwest::{Client, StatusCode};
use serde_json::Value;
use tracing::{debug, warn};

/// Looks rooms and history up over HTTP.
///
/// - `GET {api}/rooms/room/{id}` returns the room, `404` when unknown
/// - `GET {api}/messages/{id}?page=&size=` returns history, newest first
#[derive(Debug, Clone)]
pub struct HttpDirectory {
    client: Client,
    base: String,
}

impl HttpDirectory {
    /// Create a directory rooted at `api_url`.
    #[must_use]
    pub fn new(api_url: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            base: api_url.into().trim_end_matches('/').to_string(),
        }
    }

    fn room_url(&self, id: &RoomId) -> String {
        format!("{}/rooms/room/{}", self.base, id)
    }

    fn messages_url(&self, id: &RoomId) -> String {
        format!("{}/messages/{}", self.base, id)
    }
}

fn check_status(status: StatusCode, id: &RoomId) -> Result<(), DirectoryError> {
    if status == StatusCode::NOT_FOUND {
        return Err(DirectoryError::NotFound(id.to_string()));
    }
    if !status.is_success() {
        return Err(DirectoryError::Unavailable(format!("server answered {status}")));
    }
    Ok(())
}

fn decode_entry(entry: Value) -> Result<ChatMessage, ProtocolError> {
    codec::check_message(serde_json::from_value(entry)?)
}

/// Decode a history page entry by entry, dropping the ones that fail the
/// same checks live frames go through.
fn decode_page(id: &RoomId, entries: Vec<Value>) -> Vec<ChatMessage> {
    let total = entries.len();
    let messages: Vec<ChatMessage> = entries
        .into_iter()
        .enumerate()
        .filter_map(|(index, entry)| match decode_entry(entry) {
            Ok(message) => Some(message),
            Err(e) => {
                warn!(room = %id, index, error = %e, "Dropping malformed history entry");
                parley_core::metrics::record_malformed_frame();
                None
            }
        })
        .collect();
    if messages.len() < total {
        debug!(room = %id, kept = messages.len(), total, "History page partially decoded");
    }
    messages
}

fn unavailable(err: reqwest::Error) -> DirectoryError {
    DirectoryError::Unavailable(err.to_string())
}

fn invalid(err: reqwest::Error) -> DirectoryError {
    DirectoryError::InvalidResponse(err.to_string())
}

#[async_trait]
impl RoomDirectory for HttpDirectory {
    async fn room(&self, id: &RoomId) -> Result<Room, DirectoryError> {
        let url = self.room_url(id);
        debug!(%url, "Fetching room");

        let response = self.client.get(&url).send().await.map_err(unavailable)?;
        check_status(response.status(), id)?;
        response.json().await.map_err(invalid)
    }

    async fn messages(
        &self,
        id: &RoomId,
        page: u32,
        size: u32,
    ) -> Result<Vec<ChatMessage>, DirectoryError> {
        let url = self.messages_url(id);
        debug!(%url, page, size, "Fetching history");

        let response = self
            .client
            .get(&url)
            .query(&[("page", page), ("size", size)])
            .send()
            .await
            .map_err(unavailable)?;
        check_status(response.status(), id)?;
        let entries: Vec<Value> = response.json().await.map_err(invalid)?;
        Ok(decode_page(id, entries))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_urls() {
        let directory = HttpDirectory::new("http://chat.local/api/");
        let id = RoomId::parse("r42").unwrap();
        assert_eq!(directory.room_url(&id), "http://chat.local/api/rooms/room/r42");
        assert_eq!(directory.messages_url(&id), "http://chat.local/api/messages/r42");
    }

    #[test]
    fn test_bad_history_entries_are_dropped() {
        let id = RoomId::parse("r1").unwrap();
        let long = "x".repeat(parley_protocol::MAX_CONTENT_CHARS + 1);
        let page: Vec<Value> = serde_json::from_value(serde_json::json!([
            {"sender": "A", "content": "newest", "timeStamp": 3000},
            {"sender": "B", "content": "no time", "timeStamp": null},
            {"content": "no sender", "timeStamp": 2500},
            {"sender": " ", "content": "blank sender", "timeStamp": 2400},
            {"sender": "C", "content": long, "timeStamp": 2300},
            {"sender": "A", "content": "oldest", "timeStamp": "2024-05-01T10:00:00"}
        ]))
        .unwrap();

        let messages = decode_page(&id, page);
        let contents: Vec<_> = messages.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, ["newest", "oldest"]);
    }

    #[test]
    fn test_status_mapping() {
        let id = RoomId::parse("r1").unwrap();
        assert!(check_status(StatusCode::OK, &id).is_ok());
        assert_eq!(
            check_status(StatusCode::NOT_FOUND, &id),
            Err(DirectoryError::NotFound("r1".into()))
        );
        assert!(matches!(
            check_status(StatusCode::BAD_GATEWAY, &id),
            Err(DirectoryError::Unavailable(_))
        ));
    }
}
