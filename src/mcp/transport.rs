//! MCP Transport Layer Implementation
//!
//! A transport owns exactly one WebSocket connection to one endpoint and
//! multiplexes JSON-RPC requests over it. Each outbound request gets a fresh
//! numeric id and a pending entry; the reader task resolves entries as
//! responses arrive, in any order.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures_util::{
    future::{BoxFuture, FutureExt, Shared},
    stream::{SplitSink, SplitStream},
    SinkExt, StreamExt,
};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
};
use tokio::{
    net::TcpStream,
    sync::{mpsc, oneshot},
    task::JoinHandle,
};
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};
use url::Url;

use super::{
    errors::{MCPError, MCPResult},
    protocol::{MCPMessage, MCPNotification, MCPRequest, MessageId},
    server_config::ServerConfig,
};

/// Largest inbound frame accepted by default (1 MiB)
pub const DEFAULT_MAX_MESSAGE_SIZE: usize = 1024 * 1024;

/// Close code reported when the stream ends without a close frame
const ABNORMAL_CLOSURE: u16 = 1006;
/// Close code reported for a close frame without a status
const NO_STATUS_RECEIVED: u16 = 1005;

const DISCONNECTED_BY_CLIENT: &str = "disconnected by client";

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type ConnectAttempt = Shared<BoxFuture<'static, MCPResult<()>>>;

/// Connection status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConnectionStatus {
    /// Not connected
    Disconnected,
    /// Dial in progress
    Connecting,
    /// Connected and ready
    Connected,
}

/// Transport statistics
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct TransportStats {
    /// Total messages sent
    pub messages_sent: u64,
    /// Total messages received
    pub messages_received: u64,
    /// Total bytes sent
    pub bytes_sent: u64,
    /// Total bytes received
    pub bytes_received: u64,
    /// Dials started
    pub connection_attempts: u64,
    /// Dials that produced an open connection
    pub successful_connections: u64,
    /// Dials that failed
    pub failed_connections: u64,
    /// Last activity timestamp
    pub last_activity: Option<DateTime<Utc>>,
}

impl TransportStats {
    /// Update statistics for sent message
    pub fn update_sent(&mut self, message_size: usize) {
        self.messages_sent += 1;
        self.bytes_sent += message_size as u64;
        self.last_activity = Some(Utc::now());
    }

    /// Update statistics for received message
    pub fn update_received(&mut self, message_size: usize) {
        self.messages_received += 1;
        self.bytes_received += message_size as u64;
        self.last_activity = Some(Utc::now());
    }

    /// Record the outcome of one dial
    pub fn update_connection(&mut self, success: bool) {
        self.connection_attempts += 1;
        if success {
            self.successful_connections += 1;
            self.last_activity = Some(Utc::now());
        } else {
            self.failed_connections += 1;
        }
    }

    /// Get success rate
    pub fn success_rate(&self) -> f64 {
        if self.connection_attempts == 0 {
            0.0
        } else {
            self.successful_connections as f64 / self.connection_attempts as f64
        }
    }
}

/// Transport configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransportConfig {
    /// WebSocket endpoint (`ws://` or `wss://`)
    pub endpoint: String,
    /// Maximum inbound message size
    pub max_message_size: usize,
}

impl TransportConfig {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
        }
    }
}

/// Request/response channel to one MCP server
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait MCPTransport: Send + Sync {
    /// Open the connection; concurrent callers share one dial
    async fn connect(&self) -> MCPResult<()>;

    /// Close the connection and reject every outstanding request
    async fn disconnect(&self) -> MCPResult<()>;

    /// Send one JSON-RPC request and wait for its response
    async fn send_request(&self, method: &str, params: Value) -> MCPResult<Value>;

    /// Physical connection state
    fn is_connected(&self) -> bool;
}

/// Builds the transport for a configured server
pub trait TransportFactory: Send + Sync {
    fn create_transport(&self, server: &ServerConfig) -> MCPResult<Arc<dyn MCPTransport>>;
}

impl<F> TransportFactory for F
where
    F: Fn(&ServerConfig) -> MCPResult<Arc<dyn MCPTransport>> + Send + Sync,
{
    fn create_transport(&self, server: &ServerConfig) -> MCPResult<Arc<dyn MCPTransport>> {
        self(server)
    }
}

/// Factory producing [`WebSocketTransport`]s
#[derive(Debug, Default, Clone, Copy)]
pub struct WebSocketTransportFactory;

impl TransportFactory for WebSocketTransportFactory {
    fn create_transport(&self, server: &ServerConfig) -> MCPResult<Arc<dyn MCPTransport>> {
        Ok(Arc::new(WebSocketTransport::new(TransportConfig::new(
            server.endpoint_url.clone(),
        ))))
    }
}

struct PendingRequest {
    method: String,
    response_sender: oneshot::Sender<MCPResult<Value>>,
}

struct OpenConnection {
    generation: u64,
    outgoing: mpsc::UnboundedSender<Message>,
    reader: JoinHandle<()>,
}

enum ConnectionSlot {
    Idle,
    Connecting {
        generation: u64,
        attempt: ConnectAttempt,
    },
    Open(OpenConnection),
}

impl ConnectionSlot {
    /// Whether the dial tagged `generation` is still the one in flight
    fn is_dialing(&self, generation: u64) -> bool {
        matches!(self, ConnectionSlot::Connecting { generation: g, .. } if *g == generation)
    }
}

struct TransportInner {
    config: TransportConfig,
    next_id: AtomicU64,
    /// Bumped on every dial; stale dials and readers compare against it
    generation: AtomicU64,
    pending: Mutex<HashMap<u64, PendingRequest>>,
    slot: Mutex<ConnectionSlot>,
    stats: Mutex<TransportStats>,
    notifications: Mutex<Option<mpsc::UnboundedSender<MCPNotification>>>,
}

/// WebSocket transport implementation
pub struct WebSocketTransport {
    inner: Arc<TransportInner>,
}

impl WebSocketTransport {
    /// Create a new WebSocket transport; nothing is dialled until `connect`
    pub fn new(config: TransportConfig) -> Self {
        Self {
            inner: Arc::new(TransportInner {
                config,
                next_id: AtomicU64::new(1),
                generation: AtomicU64::new(0),
                pending: Mutex::new(HashMap::new()),
                slot: Mutex::new(ConnectionSlot::Idle),
                stats: Mutex::new(TransportStats::default()),
                notifications: Mutex::new(None),
            }),
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.inner.config.endpoint
    }

    /// Current connection status
    pub fn status(&self) -> ConnectionStatus {
        match &*self.inner.slot.lock() {
            ConnectionSlot::Idle => ConnectionStatus::Disconnected,
            ConnectionSlot::Connecting { .. } => ConnectionStatus::Connecting,
            ConnectionSlot::Open(_) => ConnectionStatus::Connected,
        }
    }

    /// Snapshot of the transport statistics
    pub fn stats(&self) -> TransportStats {
        self.inner.stats.lock().clone()
    }

    /// Number of requests still waiting for a response
    pub fn pending_requests(&self) -> usize {
        self.inner.pending.lock().len()
    }

    /// Receive server notifications from now on.
    ///
    /// Only the most recent subscriber is fed; notifications are otherwise
    /// logged and dropped.
    pub fn subscribe_notifications(&self) -> mpsc::UnboundedReceiver<MCPNotification> {
        let (tx, rx) = mpsc::unbounded_channel();
        *self.inner.notifications.lock() = Some(tx);
        rx
    }
}

impl Drop for WebSocketTransport {
    fn drop(&mut self) {
        let previous = std::mem::replace(&mut *self.inner.slot.lock(), ConnectionSlot::Idle);
        if let ConnectionSlot::Open(open) = previous {
            open.reader.abort();
            let _ = open.outgoing.send(Message::Close(None));
        }
    }
}

impl TransportInner {
    async fn dial(self: Arc<Self>, generation: u64) -> MCPResult<()> {
        match self.open_stream().await {
            Ok(stream) => {
                self.stats.lock().update_connection(true);
                self.install(generation, stream)
            }
            Err(e) => {
                self.stats.lock().update_connection(false);
                let mut slot = self.slot.lock();
                if slot.is_dialing(generation) {
                    *slot = ConnectionSlot::Idle;
                }
                Err(e)
            }
        }
    }

    async fn open_stream(&self) -> MCPResult<WsStream> {
        let url = Url::parse(&self.config.endpoint).map_err(|e| {
            MCPError::configuration(format!(
                "Invalid WebSocket URL '{}': {}",
                self.config.endpoint, e
            ))
        })?;
        if !matches!(url.scheme(), "ws" | "wss") {
            return Err(MCPError::configuration(format!(
                "Unsupported URL scheme '{}' for {}",
                url.scheme(),
                url
            )));
        }

        info!("Connecting to MCP server: {}", url);

        let (stream, response) = connect_async(url.as_str())
            .await
            .map_err(|e| MCPError::connection(format!("WebSocket connection to {} failed: {}", url, e)))?;

        debug!("WebSocket connected with response: {:?}", response.status());
        Ok(stream)
    }

    fn install(self: &Arc<Self>, generation: u64, stream: WsStream) -> MCPResult<()> {
        let (sink, source) = stream.split();
        let (outgoing, outgoing_rx) = mpsc::unbounded_channel();
        tokio::spawn(write_loop(sink, outgoing_rx));

        let mut slot = self.slot.lock();
        if !slot.is_dialing(generation) {
            drop(slot);
            debug!("Discarding connection to {} opened after disconnect", self.config.endpoint);
            let _ = outgoing.send(Message::Close(None));
            return Err(MCPError::connection(DISCONNECTED_BY_CLIENT));
        }

        let reader = tokio::spawn(self.clone().read_loop(generation, source));
        *slot = ConnectionSlot::Open(OpenConnection {
            generation,
            outgoing,
            reader,
        });
        info!("Connected to MCP server: {}", self.config.endpoint);
        Ok(())
    }

    async fn read_loop(self: Arc<Self>, generation: u64, mut source: SplitStream<WsStream>) {
        let code = loop {
            match source.next().await {
                Some(Ok(Message::Text(text))) => self.handle_frame(&text),
                Some(Ok(Message::Binary(bytes))) => match String::from_utf8(bytes) {
                    Ok(text) => self.handle_frame(&text),
                    Err(_) => warn!("Dropping non UTF-8 binary frame"),
                },
                Some(Ok(Message::Close(frame))) => {
                    break frame
                        .map(|frame| u16::from(frame.code))
                        .unwrap_or(NO_STATUS_RECEIVED)
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    warn!("WebSocket error on {}: {}", self.config.endpoint, e);
                    break ABNORMAL_CLOSURE;
                }
                None => break ABNORMAL_CLOSURE,
            }
        };

        self.handle_unexpected_close(generation, code);
    }

    fn handle_unexpected_close(&self, generation: u64, code: u16) {
        let was_current = {
            let mut slot = self.slot.lock();
            if matches!(&*slot, ConnectionSlot::Open(open) if open.generation == generation) {
                *slot = ConnectionSlot::Idle;
                true
            } else {
                false
            }
        };

        if was_current {
            warn!(
                "Connection to {} closed unexpectedly (code {})",
                self.config.endpoint, code
            );
            self.fail_pending(MCPError::connection(format!(
                "connection closed (code {})",
                code
            )));
        }
    }

    fn handle_frame(&self, text: &str) {
        if text.len() > self.config.max_message_size {
            warn!(
                "Dropping oversized message: {} bytes (limit {})",
                text.len(),
                self.config.max_message_size
            );
            return;
        }
        self.stats.lock().update_received(text.len());

        match MCPMessage::from_json(text) {
            Ok(MCPMessage::Response(response)) => {
                let Some(id) = response.id.as_ref().and_then(MessageId::as_number) else {
                    warn!(
                        "Dropping response without a usable id: {:?}",
                        response.error
                    );
                    return;
                };

                let entry = self.pending.lock().remove(&id);
                match entry {
                    Some(pending) => {
                        debug!("Response received for request {} ({})", id, pending.method);
                        let outcome = response.into_result().map_err(MCPError::remote);
                        if pending.response_sender.send(outcome).is_err() {
                            debug!("Caller of request {} is gone", id);
                        }
                    }
                    None => warn!("Dropping response for unknown request id {}", id),
                }
            }
            Ok(MCPMessage::Notification(notification)) => {
                debug!("Received notification '{}'", notification.method);
                let mut subscriber = self.notifications.lock();
                if let Some(tx) = subscriber.as_ref() {
                    if tx.send(notification).is_err() {
                        *subscriber = None;
                    }
                }
            }
            Ok(MCPMessage::Request(request)) => {
                warn!(
                    "Ignoring server-initiated request '{}' (id {})",
                    request.method, request.id
                );
            }
            Err(e) => warn!("Dropping unparseable frame: {}", e),
        }
    }

    /// Register a pending entry and hand back the writer channel.
    ///
    /// Registration happens under the slot lock so a concurrent close either
    /// sees the entry and rejects it, or the caller sees the closed slot.
    fn register(
        &self,
        id: u64,
        method: &str,
        response_sender: oneshot::Sender<MCPResult<Value>>,
    ) -> MCPResult<mpsc::UnboundedSender<Message>> {
        let slot = self.slot.lock();
        let ConnectionSlot::Open(open) = &*slot else {
            return Err(MCPError::connection("Not connected"));
        };
        self.pending.lock().insert(
            id,
            PendingRequest {
                method: method.to_string(),
                response_sender,
            },
        );
        Ok(open.outgoing.clone())
    }

    fn fail_pending(&self, error: MCPError) {
        let drained: Vec<(u64, PendingRequest)> = self.pending.lock().drain().collect();
        if drained.is_empty() {
            return;
        }

        debug!("Rejecting {} pending request(s): {}", drained.len(), error);
        for (_, pending) in drained {
            let _ = pending.response_sender.send(Err(error.clone()));
        }
    }
}

async fn write_loop(
    mut sink: SplitSink<WsStream, Message>,
    mut outgoing: mpsc::UnboundedReceiver<Message>,
) {
    while let Some(message) = outgoing.recv().await {
        let closing = matches!(message, Message::Close(_));
        if let Err(e) = sink.send(message).await {
            debug!("WebSocket write failed: {}", e);
            break;
        }
        if closing {
            break;
        }
    }
    let _ = sink.close().await;
}

/// Removes the pending entry when the waiting caller goes away
struct PendingGuard<'a> {
    inner: &'a TransportInner,
    id: u64,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        self.inner.pending.lock().remove(&self.id);
    }
}

#[async_trait]
impl MCPTransport for WebSocketTransport {
    async fn connect(&self) -> MCPResult<()> {
        let attempt = {
            let mut slot = self.inner.slot.lock();
            match &*slot {
                ConnectionSlot::Open(_) => return Ok(()),
                ConnectionSlot::Connecting { attempt, .. } => attempt.clone(),
                ConnectionSlot::Idle => {
                    let generation = self.inner.generation.fetch_add(1, Ordering::SeqCst) + 1;
                    let attempt = self.inner.clone().dial(generation).boxed().shared();
                    *slot = ConnectionSlot::Connecting {
                        generation,
                        attempt: attempt.clone(),
                    };
                    attempt
                }
            }
        };

        attempt.await
    }

    async fn disconnect(&self) -> MCPResult<()> {
        let previous = std::mem::replace(&mut *self.inner.slot.lock(), ConnectionSlot::Idle);
        match previous {
            ConnectionSlot::Open(open) => {
                open.reader.abort();
                let _ = open.outgoing.send(Message::Close(None));
                info!("Disconnected from MCP server: {}", self.inner.config.endpoint);
            }
            ConnectionSlot::Connecting { .. } => {
                debug!("Abandoning connection attempt to {}", self.inner.config.endpoint);
            }
            ConnectionSlot::Idle => {}
        }

        self.inner
            .fail_pending(MCPError::connection(DISCONNECTED_BY_CLIENT));
        Ok(())
    }

    async fn send_request(&self, method: &str, params: Value) -> MCPResult<Value> {
        if !self.is_connected() {
            self.connect().await?;
        }

        let id = self.inner.next_id.fetch_add(1, Ordering::SeqCst);
        let text = MCPMessage::Request(MCPRequest::new(id, method, params)).to_json()?;

        let (response_sender, response_receiver) = oneshot::channel();
        let outgoing = self.inner.register(id, method, response_sender)?;
        let _guard = PendingGuard {
            inner: &self.inner,
            id,
        };

        let size = text.len();
        outgoing
            .send(Message::Text(text))
            .map_err(|_| MCPError::transport("Connection writer has shut down"))?;
        self.inner.stats.lock().update_sent(size);
        debug!("Sent request {} ({})", id, method);

        match response_receiver.await {
            Ok(outcome) => outcome,
            Err(_) => Err(MCPError::connection("Request cancelled")),
        }
    }

    fn is_connected(&self) -> bool {
        matches!(&*self.inner.slot.lock(), ConnectionSlot::Open(_))
    }
}
