//! Connection lifecycle for one room subscription.
//!
//! A [`ConnectionManager`] owns at most one background task. The task
//! connects, subscribes to the room topic, pumps deliveries into the frame
//! handler and, when the link drops, waits a fixed delay before trying again.
//!
//! Every `open` starts a new epoch and every `close` retires it. The task
//! re-checks its epoch under the shared lock before each state change and
//! each delivery, so once `close` returns nothing from a retired task can
//! touch the state or the handler, even if it was mid-flight when aborted.

use bytes::Bytes;
use parley_protocol::{codec, ChatMessage, RoomId};
use parley_transport::{Connection, Transport, TransportError};
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, trace, warn};

use crate::config::EngineConfig;
use crate::error::ConnectionError;
use crate::metrics;

/// Lifecycle of a room subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    /// No subscription requested.
    Idle,
    /// A connect attempt is in progress.
    Connecting,
    /// Subscribed and receiving.
    Connected,
    /// The link dropped; a retry is scheduled.
    Disconnected,
    /// The endpoint refused the handshake. Needs a fresh `open`.
    Failed,
}

impl ConnectionState {
    /// Whether sends are accepted in this state.
    #[must_use]
    pub fn is_live(self) -> bool {
        self == ConnectionState::Connected
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConnectionState::Idle => "idle",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Callback invoked for every well-formed message on the room topic.
pub type FrameHandler = Arc<dyn Fn(ChatMessage) + Send + Sync>;

struct Link {
    epoch: u64,
    conn: Option<Arc<dyn Connection>>,
}

struct Shared {
    state: watch::Sender<ConnectionState>,
    link: Mutex<Link>,
}

impl Shared {
    fn new() -> Self {
        let (state, _) = watch::channel(ConnectionState::Idle);
        Self {
            state,
            link: Mutex::new(Link {
                epoch: 0,
                conn: None,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Link> {
        self.link.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn set(&self, next: ConnectionState) {
        self.state.send_if_modified(|state| {
            if *state == next {
                return false;
            }
            trace!(from = %state, to = %next, "Connection state change");
            *state = next;
            true
        });
    }

    /// Start a new epoch in `Connecting`.
    fn begin(&self) -> u64 {
        let mut link = self.lock();
        link.epoch += 1;
        link.conn = None;
        self.set(ConnectionState::Connecting);
        link.epoch
    }

    fn transition(&self, epoch: u64, next: ConnectionState) -> bool {
        let link = self.lock();
        if link.epoch != epoch {
            return false;
        }
        self.set(next);
        true
    }

    fn attach(&self, epoch: u64, conn: Arc<dyn Connection>) -> bool {
        let mut link = self.lock();
        if link.epoch != epoch {
            return false;
        }
        link.conn = Some(conn);
        metrics::link_up();
        self.set(ConnectionState::Connected);
        true
    }

    fn detach(&self, epoch: u64) -> bool {
        let mut link = self.lock();
        if link.epoch != epoch {
            return false;
        }
        if link.conn.take().is_some() {
            metrics::link_down();
        }
        self.set(ConnectionState::Disconnected);
        true
    }

    fn deliver(&self, epoch: u64, message: ChatMessage, handler: &FrameHandler) -> bool {
        let link = self.lock();
        if link.epoch != epoch {
            return false;
        }
        handler(message);
        true
    }

    fn live_link(&self) -> Option<Arc<dyn Connection>> {
        let link = self.lock();
        if !self.state.borrow().is_live() {
            return None;
        }
        link.conn.clone()
    }

    /// End the current epoch and return to `Idle`.
    fn retire(&self) -> Option<Arc<dyn Connection>> {
        let mut link = self.lock();
        link.epoch += 1;
        let conn = link.conn.take();
        if conn.is_some() {
            metrics::link_down();
        }
        self.set(ConnectionState::Idle);
        conn
    }
}

struct ActiveLink {
    room: RoomId,
    task: JoinHandle<()>,
}

/// Owns the subscription to one room's message stream.
pub struct ConnectionManager {
    transport: Arc<dyn Transport>,
    endpoint: String,
    reconnect_delay: Duration,
    shared: Arc<Shared>,
    active: Mutex<Option<ActiveLink>>,
}

impl ConnectionManager {
    /// Create a manager that reaches the broker through `transport`.
    #[must_use]
    pub fn new(transport: Arc<dyn Transport>, config: &EngineConfig) -> Self {
        Self {
            transport,
            endpoint: config.endpoint.clone(),
            reconnect_delay: config.reconnect_delay,
            shared: Arc::new(Shared::new()),
            active: Mutex::new(None),
        }
    }

    /// Subscribe to `room`, delivering its messages to `handler`.
    ///
    /// A no-op when already open for the same room, unless the previous
    /// attempt ended in [`ConnectionState::Failed`]. An open subscription to
    /// another room is torn down first.
    pub async fn open(&self, room: &RoomId, handler: FrameHandler) {
        let same_room = self
            .active()
            .as_ref()
            .is_some_and(|active| active.room == *room);
        if same_room && !matches!(self.state(), ConnectionState::Failed | ConnectionState::Idle) {
            debug!(room = %room, "Already open");
            return;
        }

        self.close().await;

        let epoch = self.shared.begin();
        info!(room = %room, endpoint = %self.endpoint, transport = self.transport.name(), "Opening room stream");

        let task = tokio::spawn(drive(
            Arc::clone(&self.shared),
            Arc::clone(&self.transport),
            self.endpoint.clone(),
            self.reconnect_delay,
            room.clone(),
            handler,
            epoch,
        ));

        *self.active() = Some(ActiveLink {
            room: room.clone(),
            task,
        });
    }

    /// Publish `payload` to `destination` on the live link.
    ///
    /// Nothing is queued: outside [`ConnectionState::Connected`] the send is
    /// refused without reaching the transport.
    ///
    /// # Errors
    ///
    /// [`ConnectionError::NotConnected`] when the link is not live, or
    /// [`ConnectionError::SendFailed`] when the transport refuses the publish.
    pub async fn send(&self, destination: &str, payload: Bytes) -> Result<(), ConnectionError> {
        let link = self
            .shared
            .live_link()
            .ok_or(ConnectionError::NotConnected)?;
        link.publish(destination, payload)
            .await
            .map_err(ConnectionError::SendFailed)
    }

    /// Tear the subscription down and return to [`ConnectionState::Idle`].
    ///
    /// Cancels any pending retry. Safe to call repeatedly.
    pub async fn close(&self) {
        let active = self.active().take();
        let link = self.shared.retire();

        let Some(active) = active else {
            return;
        };
        active.task.abort();

        if let Some(link) = link {
            let topic = active.room.topic();
            if let Err(e) = link.unsubscribe(&topic).await {
                debug!(error = %e, topic, "Unsubscribe on close failed");
            }
            if let Err(e) = link.close().await {
                debug!(error = %e, "Link close failed");
            }
        }
        info!(room = %active.room, "Room stream closed");
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        *self.shared.state.borrow()
    }

    /// Observe state changes.
    #[must_use]
    pub fn watch(&self) -> watch::Receiver<ConnectionState> {
        self.shared.state.subscribe()
    }

    /// The room currently open, if any.
    #[must_use]
    pub fn room(&self) -> Option<RoomId> {
        self.active().as_ref().map(|active| active.room.clone())
    }

    fn active(&self) -> MutexGuard<'_, Option<ActiveLink>> {
        self.active.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for ConnectionManager {
    fn drop(&mut self) {
        self.shared.retire();
        if let Some(active) = self.active().take() {
            active.task.abort();
        }
    }
}

impl fmt::Debug for ConnectionManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionManager")
            .field("endpoint", &self.endpoint)
            .field("transport", &self.transport.name())
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

async fn establish(
    transport: &dyn Transport,
    endpoint: &str,
    topic: &str,
) -> Result<Arc<dyn Connection>, TransportError> {
    let conn = transport.connect(endpoint).await?;
    if let Err(e) = conn.subscribe(topic).await {
        let _ = conn.close().await;
        return Err(e);
    }
    Ok(conn)
}

async fn drive(
    shared: Arc<Shared>,
    transport: Arc<dyn Transport>,
    endpoint: String,
    delay: Duration,
    room: RoomId,
    handler: FrameHandler,
    epoch: u64,
) {
    let topic = room.topic();
    let mut attempt: u64 = 0;

    loop {
        if !shared.transition(epoch, ConnectionState::Connecting) {
            return;
        }
        if attempt > 0 {
            metrics::record_reconnect_attempt();
            info!(room = %room, attempt, "Reconnecting");
        }
        attempt += 1;

        match establish(transport.as_ref(), &endpoint, &topic).await {
            Ok(conn) => {
                if !shared.attach(epoch, Arc::clone(&conn)) {
                    let _ = conn.close().await;
                    return;
                }
                info!(room = %room, connection = %conn.id(), "Connected");

                pump(&shared, epoch, conn.as_ref(), &handler, &topic).await;
                let _ = conn.close().await;

                if !shared.detach(epoch) {
                    return;
                }
                warn!(room = %room, "Connection lost");
            }
            Err(e) if e.is_fatal() => {
                error!(room = %room, error = %e, "Handshake rejected, giving up");
                shared.transition(epoch, ConnectionState::Failed);
                return;
            }
            Err(e) => {
                warn!(room = %room, error = %e, "Connect attempt failed");
                if !shared.transition(epoch, ConnectionState::Disconnected) {
                    return;
                }
            }
        }

        debug!(room = %room, delay_ms = delay.as_millis() as u64, "Waiting before reconnect");
        tokio::time::sleep(delay).await;
    }
}

/// Feed deliveries to the handler until the link ends or the epoch retires.
async fn pump(
    shared: &Shared,
    epoch: u64,
    conn: &dyn Connection,
    handler: &FrameHandler,
    topic: &str,
) {
    loop {
        let delivery = match conn.recv().await {
            Ok(Some(delivery)) => delivery,
            Ok(None) => return,
            Err(e) => {
                warn!(error = %e, "Receive failed");
                return;
            }
        };

        if delivery.topic != topic {
            trace!(topic = %delivery.topic, "Ignoring delivery for another topic");
            continue;
        }
        metrics::record_frame();

        match codec::decode_message(&delivery.body) {
            Ok(message) => {
                if !shared.deliver(epoch, message, handler) {
                    return;
                }
            }
            Err(e) => {
                metrics::record_malformed_frame();
                warn!(error = %e, topic, bytes = delivery.body.len(), "Dropping malformed frame");
            }
        }
    }
}
