//! In-process pub/sub broker.
//!
//! `MemoryBroker` implements [`Transport`] without any I/O: topics are
//! broadcast channels kept in a concurrent map, and each connection merges
//! its subscriptions into one inbox. It also exposes fault injection and a
//! bounded publish log, which is what the engine's tests drive it with.
//! Topics nobody listens to any more are pruned on the next subscribe.
//!
//! Endpoints must use the `memory://` scheme; anything else is rejected at
//! handshake time.

use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;
use parley_protocol::{codec, ChatMessage, OutgoingMessage, RoomId, Timestamp};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

use crate::traits::{Connection, ConnectionId, Delivery, Transport, TransportError};

/// Endpoint scheme accepted by the memory broker.
pub const MEMORY_SCHEME: &str = "memory://";

/// Default per-topic broadcast capacity.
const DEFAULT_TOPIC_CAPACITY: usize = 1024;

/// Most recent publishes kept for [`MemoryBroker::published`].
pub const PUBLISH_LOG_CAPACITY: usize = 1024;

/// Maps a published body to a delivery, emulating server-side routing.
pub type Relay = dyn Fn(&str, &Bytes) -> Option<Delivery> + Send + Sync;

struct BrokerState {
    topics: DashMap<String, broadcast::Sender<Delivery>>,
    published: Mutex<VecDeque<(String, Bytes)>>,
    relay: RwLock<Option<Arc<Relay>>>,
    reject_handshakes: AtomicBool,
    refuse_connections: AtomicBool,
    connect_attempts: AtomicUsize,
    epoch: watch::Sender<u64>,
    capacity: usize,
}

impl BrokerState {
    fn deliver(&self, delivery: Delivery) -> usize {
        match self.topics.get(&delivery.topic) {
            Some(tx) => {
                trace!(topic = %delivery.topic, "Delivering body");
                tx.send(delivery).unwrap_or_default()
            }
            None => 0,
        }
    }

    fn current_epoch(&self) -> u64 {
        *self.epoch.borrow()
    }

    fn record_publish(&self, destination: &str, body: &Bytes) {
        let mut log = self
            .published
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if log.len() == PUBLISH_LOG_CAPACITY {
            log.pop_front();
        }
        log.push_back((destination.to_string(), body.clone()));
    }

    fn prune_idle_topics(&self) {
        self.topics.retain(|topic, tx| {
            let live = tx.receiver_count() > 0;
            if !live {
                trace!(topic = %topic, "Pruning idle topic");
            }
            live
        });
    }
}

/// An in-process broker usable as a [`Transport`].
///
/// Cloning yields another handle to the same broker.
#[derive(Clone)]
pub struct MemoryBroker {
    state: Arc<BrokerState>,
}

impl MemoryBroker {
    /// Create a broker with no relay installed.
    #[must_use]
    pub fn new() -> Self {
        let (epoch, _) = watch::channel(0);
        Self {
            state: Arc::new(BrokerState {
                topics: DashMap::new(),
                published: Mutex::new(VecDeque::new()),
                relay: RwLock::new(None),
                reject_handshakes: AtomicBool::new(false),
                refuse_connections: AtomicBool::new(false),
                connect_attempts: AtomicUsize::new(0),
                epoch,
                capacity: DEFAULT_TOPIC_CAPACITY,
            }),
        }
    }

    /// Create a broker that behaves like the chat backend: envelopes
    /// published to a room's send address come back on the room topic,
    /// stamped with the current time and a broker-assigned id.
    #[must_use]
    pub fn with_chat_echo() -> Self {
        let broker = Self::new();
        let sequence = AtomicU64::new(0);
        broker.set_relay(move |destination, body| {
            let room = RoomId::from_send_destination(destination)?;
            let outgoing: OutgoingMessage = serde_json::from_slice(body).ok()?;
            let n = sequence.fetch_add(1, Ordering::Relaxed);
            let stamped = ChatMessage::new(outgoing.sender, outgoing.content, Timestamp::now())
                .with_id(format!("mem-{n}"));
            let json = serde_json::to_vec(&stamped).ok()?;
            Some(Delivery::new(room.topic(), json))
        });
        broker
    }

    /// Install the relay applied to every published body.
    pub fn set_relay<F>(&self, relay: F)
    where
        F: Fn(&str, &Bytes) -> Option<Delivery> + Send + Sync + 'static,
    {
        let mut slot = self
            .state
            .relay
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        let relay: Arc<Relay> = Arc::new(relay);
        *slot = Some(relay);
    }

    /// Deliver a raw body to every subscriber of `topic`.
    ///
    /// Returns the number of connections that received it.
    pub fn inject(&self, topic: &str, body: impl Into<Bytes>) -> usize {
        self.state.deliver(Delivery::new(topic, body))
    }

    /// Deliver a chat message to every subscriber of the room topic.
    pub fn inject_message(&self, room: &RoomId, message: &ChatMessage) -> usize {
        match serde_json::to_vec(message) {
            Ok(json) => self.inject(&room.topic(), json),
            Err(e) => {
                warn!(error = %e, "Failed to serialize injected message");
                0
            }
        }
    }

    /// Drop every live connection, as if the network went away.
    pub fn sever_all(&self) {
        self.state.epoch.send_modify(|epoch| *epoch += 1);
        debug!("Severed all memory connections");
    }

    /// Make subsequent handshakes fail fatally.
    pub fn reject_handshakes(&self, reject: bool) {
        self.state.reject_handshakes.store(reject, Ordering::SeqCst);
    }

    /// Make subsequent connects fail transiently.
    pub fn refuse_connections(&self, refuse: bool) {
        self.state.refuse_connections.store(refuse, Ordering::SeqCst);
    }

    /// Number of connect calls so far, successful or not.
    #[must_use]
    pub fn connect_attempts(&self) -> usize {
        self.state.connect_attempts.load(Ordering::SeqCst)
    }

    /// The most recent `(destination, body)` publishes, oldest first; at
    /// most [`PUBLISH_LOG_CAPACITY`] are kept.
    #[must_use]
    pub fn published(&self) -> Vec<(String, Bytes)> {
        self.state
            .published
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .cloned()
            .collect()
    }

    /// Number of topics currently tracked.
    #[must_use]
    pub fn topic_count(&self) -> usize {
        self.state.topics.len()
    }

    /// Number of live subscriptions on `topic`.
    #[must_use]
    pub fn subscriber_count(&self, topic: &str) -> usize {
        self.state
            .topics
            .get(topic)
            .map(|tx| tx.receiver_count())
            .unwrap_or(0)
    }
}

impl Default for MemoryBroker {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Transport for MemoryBroker {
    async fn connect(&self, endpoint: &str) -> Result<Arc<dyn Connection>, TransportError> {
        self.state.connect_attempts.fetch_add(1, Ordering::SeqCst);

        if !endpoint.starts_with(MEMORY_SCHEME) {
            return Err(TransportError::HandshakeRejected(format!(
                "unsupported endpoint {endpoint:?}"
            )));
        }
        if self.state.reject_handshakes.load(Ordering::SeqCst) {
            return Err(TransportError::HandshakeRejected(
                "broker rejected handshake".into(),
            ));
        }
        if self.state.refuse_connections.load(Ordering::SeqCst) {
            return Err(TransportError::ConnectFailed("connection refused".into()));
        }

        let conn = MemoryConnection::new(Arc::clone(&self.state));
        debug!(connection = %conn.id, endpoint, "Memory connection established");
        Ok(Arc::new(conn))
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}

/// A connection to a [`MemoryBroker`].
pub struct MemoryConnection {
    id: ConnectionId,
    broker: Arc<BrokerState>,
    epoch: u64,
    open: AtomicBool,
    inbox_tx: mpsc::UnboundedSender<Delivery>,
    inbox: tokio::sync::Mutex<mpsc::UnboundedReceiver<Delivery>>,
    forwarders: Mutex<HashMap<String, JoinHandle<()>>>,
    shutdown: watch::Sender<bool>,
}

impl MemoryConnection {
    fn new(broker: Arc<BrokerState>) -> Self {
        let (inbox_tx, inbox) = mpsc::unbounded_channel();
        let (shutdown, _) = watch::channel(false);
        let epoch = broker.current_epoch();
        Self {
            id: ConnectionId::generate(),
            broker,
            epoch,
            open: AtomicBool::new(true),
            inbox_tx,
            inbox: tokio::sync::Mutex::new(inbox),
            forwarders: Mutex::new(HashMap::new()),
            shutdown,
        }
    }

    fn is_severed(&self) -> bool {
        self.broker.current_epoch() != self.epoch
    }

    fn shut_down(&self) {
        self.open.store(false, Ordering::SeqCst);
        self.shutdown.send_replace(true);
        let mut forwarders = self
            .forwarders
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        for (_, task) in forwarders.drain() {
            task.abort();
        }
    }
}

#[async_trait]
impl Connection for MemoryConnection {
    fn id(&self) -> &ConnectionId {
        &self.id
    }

    async fn subscribe(&self, topic: &str) -> Result<(), TransportError> {
        if !self.is_open() {
            return Err(TransportError::ConnectionClosed);
        }

        self.broker.prune_idle_topics();
        let mut rx = self
            .broker
            .topics
            .entry(topic.to_string())
            .or_insert_with(|| broadcast::channel(self.broker.capacity).0)
            .subscribe();

        let inbox = self.inbox_tx.clone();
        let topic_name = topic.to_string();
        let task = tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(delivery) => {
                        if inbox.send(delivery).is_err() {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(topic = %topic_name, skipped, "Subscriber lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });

        let mut forwarders = self
            .forwarders
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if let Some(previous) = forwarders.insert(topic.to_string(), task) {
            previous.abort();
        }
        debug!(connection = %self.id, topic, "Subscribed");
        Ok(())
    }

    async fn unsubscribe(&self, topic: &str) -> Result<(), TransportError> {
        let removed = self
            .forwarders
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(topic);
        if let Some(task) = removed {
            task.abort();
            debug!(connection = %self.id, topic, "Unsubscribed");
        }
        Ok(())
    }

    async fn recv(&self) -> Result<Option<Delivery>, TransportError> {
        let mut severed = self.broker.epoch.subscribe();
        let mut shutdown = self.shutdown.subscribe();
        let mut inbox = self.inbox.lock().await;

        loop {
            if !self.is_open() || *shutdown.borrow() {
                return Ok(None);
            }
            if self.is_severed() {
                self.shut_down();
                return Ok(None);
            }

            tokio::select! {
                delivery = inbox.recv() => return Ok(delivery),
                changed = severed.changed() => {
                    if changed.is_err() {
                        self.shut_down();
                        return Ok(None);
                    }
                }
                _ = shutdown.changed() => {}
            }
        }
    }

    async fn publish(&self, destination: &str, body: Bytes) -> Result<(), TransportError> {
        if !self.is_open() || self.is_severed() {
            return Err(TransportError::ConnectionClosed);
        }

        self.broker.record_publish(destination, &body);

        let relay = self
            .broker
            .relay
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        if let Some(delivery) = relay.and_then(|relay| relay(destination, &body)) {
            self.broker.deliver(delivery);
        }
        Ok(())
    }

    async fn close(&self) -> Result<(), TransportError> {
        if self.open.load(Ordering::SeqCst) {
            self.shut_down();
            debug!(connection = %self.id, "Memory connection closed");
        }
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst) && !self.is_severed()
    }
}

impl Drop for MemoryConnection {
    fn drop(&mut self) {
        self.shut_down();
    }
}

/// Convenience for tests and demos: serialize a chat message body.
///
/// # Errors
///
/// Returns an error if serialization fails.
pub fn chat_body(message: &OutgoingMessage) -> Result<Bytes, TransportError> {
    Ok(Bytes::from(codec::encode_outgoing(message)?))
}
