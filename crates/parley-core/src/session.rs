//! Room session orchestration.
//!
//! A [`SessionController`] ties one user to at most one room at a time. Each
//! `enter` builds a fresh metadata cache, message store and ingest gate; the
//! connection manager is kept across rooms so observers of its state do not
//! have to resubscribe.

use bytes::Bytes;
use parley_protocol::{codec, ChatMessage, OutgoingMessage, RoomId};
use parley_transport::Transport;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::{broadcast, watch};
use tracing::{debug, info, warn};

use crate::config::EngineConfig;
use crate::connection::{ConnectionManager, ConnectionState, FrameHandler};
use crate::directory::RoomDirectory;
use crate::error::{DirectoryError, SessionError, ValidationError};
use crate::metrics;
use crate::notify::{AttentionSignals, NotificationPolicy, Notifier};
use crate::room::{Room, RoomMetadataCache};
use crate::store::MessageStore;

/// Capacity of the new-message broadcast.
const EVENT_CAPACITY: usize = 256;

/// Check an outgoing text before it touches the network.
///
/// # Errors
///
/// [`ValidationError::Empty`] when only whitespace remains after trimming,
/// [`ValidationError::TooLong`] when `text` has more than `limit` code points.
pub fn validate_outgoing(text: &str, limit: usize) -> Result<(), ValidationError> {
    if text.trim().is_empty() {
        return Err(ValidationError::Empty);
    }
    let length = text.chars().count();
    if length > limit {
        return Err(ValidationError::TooLong { length, limit });
    }
    Ok(())
}

/// Routes live messages into the store.
///
/// Until the history page is in, live messages are parked in `pending`;
/// `complete` loads the page and replays them through the normal append
/// path. The same lock guards the "still loading?" check and the append, so
/// nothing slips between the history load and the replay.
struct Ingest {
    store: MessageStore,
    pending: Mutex<Option<Vec<ChatMessage>>>,
    policy: Arc<NotificationPolicy>,
    attention: Arc<AttentionSignals>,
    user: String,
    events: broadcast::Sender<ChatMessage>,
}

impl Ingest {
    fn new(
        policy: Arc<NotificationPolicy>,
        attention: Arc<AttentionSignals>,
        user: String,
        events: broadcast::Sender<ChatMessage>,
    ) -> Self {
        Self {
            store: MessageStore::new(),
            pending: Mutex::new(Some(Vec::new())),
            policy,
            attention,
            user,
            events,
        }
    }

    fn accept(&self, message: ChatMessage) {
        let mut pending = self.pending.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(buffer) = pending.as_mut() {
            debug!(sender = %message.sender, "Buffering live message until history loads");
            buffer.push(message);
            return;
        }
        if self.store.append(message.clone()) {
            self.announce(&message);
        }
    }

    fn complete(&self, history: Vec<ChatMessage>) {
        let mut pending = self.pending.lock().unwrap_or_else(PoisonError::into_inner);
        self.store.load_history(history);

        let buffered = pending.take().unwrap_or_default();
        if !buffered.is_empty() {
            debug!(count = buffered.len(), "Replaying buffered live messages");
        }
        for message in buffered {
            if self.store.append(message.clone()) {
                self.announce(&message);
            }
        }
    }

    fn announce(&self, message: &ChatMessage) {
        let context = self.attention.context(&self.user);
        self.policy.handle(message, &context);
        // No receivers is fine.
        let _ = self.events.send(message.clone());
    }
}

struct ActiveSession {
    room: RoomId,
    metadata: RoomMetadataCache,
    ingest: Arc<Ingest>,
}

/// Drives one user's presence in a chat room.
pub struct SessionController {
    user: String,
    config: EngineConfig,
    directory: Arc<dyn RoomDirectory>,
    connection: ConnectionManager,
    policy: Arc<NotificationPolicy>,
    attention: Arc<AttentionSignals>,
    events: broadcast::Sender<ChatMessage>,
    active: Option<ActiveSession>,
}

impl SessionController {
    /// Create a controller for `user`.
    #[must_use]
    pub fn new(
        user: impl Into<String>,
        config: EngineConfig,
        directory: Arc<dyn RoomDirectory>,
        transport: Arc<dyn Transport>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let connection = ConnectionManager::new(transport, &config);
        Self {
            user: user.into(),
            config,
            directory,
            connection,
            policy: Arc::new(NotificationPolicy::new(notifier)),
            attention: Arc::new(AttentionSignals::default()),
            events,
            active: None,
        }
    }

    /// Enter `room_id`, leaving the current room first.
    ///
    /// The room lookup and the history lookup run concurrently, and the
    /// connection is opened as soon as the room is known to exist. Returns
    /// once metadata and history are both in; the connection reports its own
    /// progress through [`SessionController::watch_connection`]. An
    /// unavailable history is logged and treated as empty.
    ///
    /// # Errors
    ///
    /// [`SessionError::NotFound`] when the room does not exist (no connection
    /// is opened), [`SessionError::Directory`] when the lookup fails.
    pub async fn enter(&mut self, room_id: RoomId) -> Result<Room, SessionError> {
        if self.active.is_some() {
            self.leave().await;
        }
        info!(user = %self.user, room = %room_id, "Entering room");

        let ingest = Arc::new(Ingest::new(
            Arc::clone(&self.policy),
            Arc::clone(&self.attention),
            self.user.clone(),
            self.events.clone(),
        ));
        let handler: FrameHandler = {
            let ingest = Arc::clone(&ingest);
            Arc::new(move |message: ChatMessage| ingest.accept(message))
        };

        let mut metadata = RoomMetadataCache::new();
        let directory = self.directory.as_ref();
        let connection = &self.connection;
        let page_size = self.config.history_page_size;

        let lookup = async {
            let room = metadata.refresh(directory, &room_id).await.cloned();
            if room.is_ok() {
                connection.open(&room_id, handler).await;
            }
            room
        };
        let history = directory.messages(&room_id, 0, page_size);
        let (room, history) = tokio::join!(lookup, history);

        let room = match room {
            Ok(room) => room,
            Err(DirectoryError::NotFound(_)) => {
                warn!(room = %room_id, "Room not found");
                return Err(SessionError::NotFound(room_id));
            }
            Err(e) => {
                warn!(room = %room_id, error = %e, "Room lookup failed");
                return Err(SessionError::Directory(e));
            }
        };

        let history = history.unwrap_or_else(|e| {
            warn!(room = %room_id, error = %e, "History unavailable, starting empty");
            Vec::new()
        });
        ingest.complete(history);
        info!(room = %room_id, name = %room.name, messages = ingest.store.len(), "Room ready");

        self.active = Some(ActiveSession {
            room: room_id,
            metadata,
            ingest,
        });
        Ok(room)
    }

    /// Publish `text` to the current room as the current user.
    ///
    /// The message is not added to the log here; it shows up when the
    /// broker delivers it back.
    ///
    /// # Errors
    ///
    /// [`SessionError::Validation`] for empty or oversized text,
    /// [`SessionError::NotConnected`] when no live link exists, and
    /// [`SessionError::SendFailed`] when the transport refuses the publish.
    pub async fn send_message(&self, text: &str) -> Result<(), SessionError> {
        validate_outgoing(text, self.config.max_message_chars)?;

        let active = self.active.as_ref().ok_or(SessionError::NotConnected)?;
        if !self.connection.state().is_live() {
            return Err(SessionError::NotConnected);
        }

        let body = codec::encode_outgoing(&OutgoingMessage::new(self.user.as_str(), text))?;
        self.connection
            .send(&active.room.send_destination(), Bytes::from(body))
            .await?;

        metrics::record_sent();
        debug!(room = %active.room, chars = text.chars().count(), "Message sent");
        Ok(())
    }

    /// Close the connection and drop the room's log and metadata.
    pub async fn leave(&mut self) {
        self.connection.close().await;
        if let Some(active) = self.active.take() {
            info!(user = %self.user, room = %active.room, "Left room");
        }
    }

    /// Snapshot of the current room's log, oldest first.
    #[must_use]
    pub fn current_log(&self) -> Vec<ChatMessage> {
        self.active
            .as_ref()
            .map(|active| active.ingest.store.all())
            .unwrap_or_default()
    }

    /// Current connection state.
    #[must_use]
    pub fn connection_state(&self) -> ConnectionState {
        self.connection.state()
    }

    /// Observe connection state changes.
    #[must_use]
    pub fn watch_connection(&self) -> watch::Receiver<ConnectionState> {
        self.connection.watch()
    }

    /// Receive every message newly inserted into the log.
    #[must_use]
    pub fn subscribe_messages(&self) -> broadcast::Receiver<ChatMessage> {
        self.events.subscribe()
    }

    /// Metadata of the current room.
    #[must_use]
    pub fn room(&self) -> Option<&Room> {
        self.active.as_ref().and_then(|active| active.metadata.current())
    }

    /// The signed-in user.
    #[must_use]
    pub fn current_user(&self) -> &str {
        &self.user
    }

    /// Visibility and permission signals used by the notification policy.
    #[must_use]
    pub fn attention(&self) -> &Arc<AttentionSignals> {
        &self.attention
    }
}

impl std::fmt::Debug for SessionController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionController")
            .field("user", &self.user)
            .field("room", &self.active.as_ref().map(|active| &active.room))
            .field("connection", &self.connection)
            .finish_non_exhaustive()
    }
}
