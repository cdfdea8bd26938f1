//! WebSocket client transport.
//!
//! This module connects to a broker over WebSocket using tokio-tungstenite
//! and speaks the frame protocol from `parley-protocol`: a `connect` /
//! `connected` handshake, then `subscribe`, `publish` and `message` frames.

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use parley_protocol::codec::FrameCodec;
use parley_protocol::{Encoding, Frame, PROTOCOL_VERSION};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, PoisonError};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio_tungstenite::{
    connect_async,
    tungstenite::{Error as WsError, Message},
    MaybeTlsStream, WebSocketStream,
};
use tracing::{debug, error, info, trace, warn};

use crate::traits::{Connection, ConnectionId, Delivery, Transport, TransportError};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// WebSocket transport configuration.
#[derive(Debug, Clone)]
pub struct WebSocketConfig {
    /// Frame encoding used on the link.
    pub encoding: Encoding,
    /// Bound on the whole connect: TCP, upgrade and the `connected` reply.
    pub handshake_timeout: Duration,
    /// Optional session token sent in the handshake.
    pub token: Option<String>,
}

impl Default for WebSocketConfig {
    fn default() -> Self {
        Self {
            encoding: Encoding::Json,
            handshake_timeout: Duration::from_secs(10),
            token: None,
        }
    }
}

/// WebSocket client transport.
#[derive(Debug, Clone, Default)]
pub struct WebSocketTransport {
    config: WebSocketConfig,
}

impl WebSocketTransport {
    /// Create a new WebSocket transport.
    #[must_use]
    pub fn new(config: WebSocketConfig) -> Self {
        Self { config }
    }
}

/// Classify a tungstenite connect error.
///
/// URL problems and HTTP-level refusals mean the endpoint itself is wrong;
/// everything else may be transient.
fn classify_connect_error(err: WsError) -> TransportError {
    match err {
        WsError::Url(e) => TransportError::HandshakeRejected(format!("invalid endpoint: {e}")),
        WsError::Http(response) => TransportError::HandshakeRejected(format!(
            "upgrade refused with status {}",
            response.status()
        )),
        WsError::HttpFormat(e) => TransportError::HandshakeRejected(format!("bad request: {e}")),
        WsError::Io(e) => TransportError::ConnectFailed(e.to_string()),
        other => TransportError::ConnectFailed(other.to_string()),
    }
}

impl WebSocketTransport {
    /// TCP connect, upgrade and `connect`/`connected` exchange.
    async fn establish(&self, endpoint: &str) -> Result<WebSocketConnection, TransportError> {
        let (stream, _response) = connect_async(endpoint).await.map_err(|e| {
            warn!(endpoint, error = %e, "WebSocket connect failed");
            classify_connect_error(e)
        })?;

        debug!(endpoint, "WebSocket upgrade completed");

        let (sink, stream) = stream.split();
        let conn = WebSocketConnection::new(sink, stream, FrameCodec::new(self.config.encoding));

        match conn.handshake(self.config.token.clone()).await {
            Ok(session) => {
                info!(endpoint, session = %session, "Connected to broker");
                Ok(conn)
            }
            Err(e) => {
                let _ = conn.close().await;
                Err(e)
            }
        }
    }
}

#[async_trait]
impl Transport for WebSocketTransport {
    async fn connect(&self, endpoint: &str) -> Result<Arc<dyn Connection>, TransportError> {
        // A dropped half-open socket is closed when the future is cancelled.
        match tokio::time::timeout(self.config.handshake_timeout, self.establish(endpoint)).await {
            Ok(Ok(conn)) => Ok(Arc::new(conn)),
            Ok(Err(e)) => Err(e),
            Err(_) => {
                warn!(
                    endpoint,
                    timeout_ms = self.config.handshake_timeout.as_millis() as u64,
                    "WebSocket connect timed out"
                );
                Err(TransportError::Timeout)
            }
        }
    }

    fn name(&self) -> &'static str {
        "websocket"
    }
}

/// A WebSocket connection to a broker.
pub struct WebSocketConnection {
    id: ConnectionId,
    sink: Mutex<SplitSink<WsStream, Message>>,
    stream: Mutex<SplitStream<WsStream>>,
    codec: FrameCodec,
    is_open: AtomicBool,
    next_subscription: AtomicU64,
    subscriptions: std::sync::Mutex<HashMap<String, u64>>,
}

impl WebSocketConnection {
    fn new(
        sink: SplitSink<WsStream, Message>,
        stream: SplitStream<WsStream>,
        codec: FrameCodec,
    ) -> Self {
        Self {
            id: ConnectionId::generate(),
            sink: Mutex::new(sink),
            stream: Mutex::new(stream),
            codec,
            is_open: AtomicBool::new(true),
            next_subscription: AtomicU64::new(1),
            subscriptions: std::sync::Mutex::new(HashMap::new()),
        }
    }

    /// Send `connect` and wait for `connected`.
    async fn handshake(&self, token: Option<String>) -> Result<String, TransportError> {
        self.send_frame(&Frame::connect(PROTOCOL_VERSION.major, token))
            .await?;

        loop {
            match self.next_frame().await? {
                Some(Frame::Connected {
                    session, version, ..
                }) => {
                    if !PROTOCOL_VERSION.accepts_major(version) {
                        return Err(TransportError::HandshakeRejected(format!(
                            "broker speaks protocol {version}, client {PROTOCOL_VERSION}"
                        )));
                    }
                    return Ok(session);
                }
                Some(Frame::Error { code, message }) => {
                    return Err(TransportError::HandshakeRejected(format!(
                        "broker error {code}: {message}"
                    )));
                }
                Some(other) => {
                    trace!(frame = ?other.frame_type(), "Ignoring frame during handshake");
                }
                None => return Err(TransportError::ConnectionClosed),
            }
        }
    }

    async fn send_frame(&self, frame: &Frame) -> Result<(), TransportError> {
        if !self.is_open.load(Ordering::SeqCst) {
            return Err(TransportError::ConnectionClosed);
        }

        let data = self.codec.encode(frame)?;
        let message = match self.codec.encoding() {
            Encoding::Json => Message::Text(String::from_utf8_lossy(&data).into_owned()),
            Encoding::MessagePack => Message::Binary(data.to_vec()),
        };

        let mut sink = self.sink.lock().await;
        sink.send(message)
            .await
            .map_err(|e| TransportError::SendFailed(e.to_string()))
    }

    /// Read the next protocol frame, answering pings on the way.
    async fn next_frame(&self) -> Result<Option<Frame>, TransportError> {
        let mut stream = self.stream.lock().await;

        loop {
            let data = match stream.next().await {
                Some(Ok(Message::Text(text))) => text.into_bytes(),
                Some(Ok(Message::Binary(data))) => data,
                Some(Ok(Message::Ping(data))) => {
                    let mut sink = self.sink.lock().await;
                    if let Err(e) = sink.send(Message::Pong(data)).await {
                        warn!("Failed to send pong: {}", e);
                    }
                    continue;
                }
                Some(Ok(Message::Pong(_))) | Some(Ok(Message::Frame(_))) => continue,
                Some(Ok(Message::Close(_))) => {
                    debug!(connection = %self.id, "Received close frame");
                    self.is_open.store(false, Ordering::SeqCst);
                    return Ok(None);
                }
                Some(Err(WsError::ConnectionClosed)) | None => {
                    debug!(connection = %self.id, "WebSocket stream ended");
                    self.is_open.store(false, Ordering::SeqCst);
                    return Ok(None);
                }
                Some(Err(e)) => {
                    error!(connection = %self.id, "WebSocket error: {}", e);
                    self.is_open.store(false, Ordering::SeqCst);
                    return Err(TransportError::ReceiveFailed(e.to_string()));
                }
            };

            match self.codec.decode(&data) {
                Ok(frame) => return Ok(Some(frame)),
                Err(e) => {
                    warn!(connection = %self.id, error = %e, "Dropping undecodable frame");
                }
            }
        }
    }
}

#[async_trait]
impl Connection for WebSocketConnection {
    fn id(&self) -> &ConnectionId {
        &self.id
    }

    async fn subscribe(&self, topic: &str) -> Result<(), TransportError> {
        let id = self.next_subscription.fetch_add(1, Ordering::Relaxed);
        self.send_frame(&Frame::subscribe(id, topic)).await?;
        self.subscriptions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(topic.to_string(), id);
        debug!(connection = %self.id, topic, id, "Subscribed");
        Ok(())
    }

    async fn unsubscribe(&self, topic: &str) -> Result<(), TransportError> {
        let id = self
            .subscriptions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(topic);
        match id {
            Some(id) => self.send_frame(&Frame::unsubscribe(id, topic)).await,
            None => Ok(()),
        }
    }

    async fn recv(&self) -> Result<Option<Delivery>, TransportError> {
        loop {
            match self.next_frame().await? {
                Some(Frame::Message { topic, body }) => {
                    return Ok(Some(Delivery::new(topic, body.into_bytes())));
                }
                Some(Frame::Ping { timestamp }) => {
                    self.send_frame(&Frame::pong(timestamp)).await?;
                }
                Some(Frame::Error { code, message }) => {
                    warn!(connection = %self.id, code, %message, "Broker reported error");
                }
                Some(other) => {
                    trace!(connection = %self.id, frame = ?other.frame_type(), "Ignoring frame");
                }
                None => return Ok(None),
            }
        }
    }

    async fn publish(&self, destination: &str, body: Bytes) -> Result<(), TransportError> {
        let body = String::from_utf8(body.to_vec())
            .map_err(|e| TransportError::SendFailed(format!("body is not UTF-8: {e}")))?;
        self.send_frame(&Frame::publish(destination, body)).await
    }

    async fn close(&self) -> Result<(), TransportError> {
        if !self.is_open.swap(false, Ordering::SeqCst) {
            return Ok(()); // Already closed
        }

        let mut sink = self.sink.lock().await;
        sink.close()
            .await
            .map_err(|e| TransportError::SendFailed(format!("Failed to close: {}", e)))
    }

    fn is_open(&self) -> bool {
        self.is_open.load(Ordering::SeqCst)
    }
}
