use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::body::Bytes;
use axum::extract::ws::{Message as WsMessage, WebSocket};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use futures::{SinkExt, StreamExt};
use relay_core::{parse_client_message, ActionError, ClientMessage};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::forwarder::ActionSink;

/// Unique client identifier.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ClientId(pub String);

impl Default for ClientId {
    fn default() -> Self {
        Self(format!("client_{}", Uuid::now_v7()))
    }
}

impl ClientId {
    pub fn new() -> Self {
        Self::default()
    }
}

impl std::fmt::Display for ClientId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Channel readiness, in lifecycle order.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum ReadyState {
    Connecting = 0,
    Open = 1,
    Closing = 2,
    Closed = 3,
}

impl ReadyState {
    fn from_u8(raw: u8) -> Self {
        match raw {
            0 => Self::Connecting,
            1 => Self::Open,
            2 => Self::Closing,
            _ => Self::Closed,
        }
    }
}

/// One client signaling channel, as seen by the registry.
///
/// Frames are not written to the socket directly: `send` pushes onto a
/// bounded queue drained by the connection's writer task.
#[derive(Debug)]
pub struct ClientConnection {
    pub id: ClientId,
    tx: mpsc::Sender<Arc<str>>,
    state: AtomicU8,
    pub connected_at: Instant,
    dropped_messages: AtomicU64,
}

impl ClientConnection {
    pub fn new(id: ClientId, tx: mpsc::Sender<Arc<str>>) -> Self {
        Self {
            id,
            tx,
            state: AtomicU8::new(ReadyState::Connecting as u8),
            connected_at: Instant::now(),
            dropped_messages: AtomicU64::new(0),
        }
    }

    /// A fresh connection with its own queue of `capacity` frames.
    pub fn channel(capacity: usize) -> (Arc<Self>, mpsc::Receiver<Arc<str>>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Arc::new(Self::new(ClientId::new(), tx)), rx)
    }

    /// Queue a text frame. Returns `false` if the queue is full or closed.
    pub fn send(&self, message: Arc<str>) -> bool {
        if self.tx.try_send(message).is_ok() {
            true
        } else {
            let _ = self.dropped_messages.fetch_add(1, Ordering::Relaxed);
            false
        }
    }

    pub fn ready_state(&self) -> ReadyState {
        ReadyState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub fn set_ready_state(&self, state: ReadyState) {
        self.state.store(state as u8, Ordering::Release);
    }

    pub fn is_open(&self) -> bool {
        self.ready_state() == ReadyState::Open
    }

    /// Total frames dropped because the queue was full or closed.
    pub fn drop_count(&self) -> u64 {
        self.dropped_messages.load(Ordering::Relaxed)
    }
}

/// Per-member outcome of one broadcast.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct BroadcastReport {
    pub delivered: usize,
    /// Members not in the `Open` state.
    pub skipped: usize,
    /// Open members whose queue was full or already closed.
    pub failed: usize,
}

impl BroadcastReport {
    pub fn recipients(&self) -> usize {
        self.delivered + self.skipped + self.failed
    }
}

/// The set of live client channels.
#[derive(Debug, Default)]
pub struct ClientRegistry {
    clients: DashMap<ClientId, Arc<ClientConnection>>,
}

impl ClientRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a connection. Returns `false` if it was already registered.
    pub fn add(&self, connection: Arc<ClientConnection>) -> bool {
        match self.clients.entry(connection.id.clone()) {
            Entry::Occupied(_) => false,
            Entry::Vacant(slot) => {
                let _ = slot.insert(connection);
                true
            }
        }
    }

    /// Remove a connection by ID. Returns `false` if it was not registered.
    pub fn remove(&self, id: &ClientId) -> bool {
        self.clients.remove(id).is_some()
    }

    pub fn contains(&self, id: &ClientId) -> bool {
        self.clients.contains_key(id)
    }

    /// Number of registered clients.
    pub fn count(&self) -> usize {
        self.clients.len()
    }

    /// Queue `payload` for every open member.
    ///
    /// Iterates over a snapshot so concurrent add/remove never observes a
    /// half-finished fan-out, and one failed send never stops the rest.
    pub fn broadcast(&self, payload: &str) -> BroadcastReport {
        let members: Vec<Arc<ClientConnection>> = self
            .clients
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect();
        let payload: Arc<str> = Arc::from(payload);

        let mut report = BroadcastReport::default();
        for conn in members {
            if !conn.is_open() {
                report.skipped += 1;
            } else if conn.send(Arc::clone(&payload)) {
                report.delivered += 1;
            } else {
                report.failed += 1;
                tracing::warn!(client_id = %conn.id, "Send queue full or closed, dropping frame");
            }
        }
        report
    }
}

/// Settings shared by every connection task.
#[derive(Clone)]
pub struct ConnectionContext {
    pub registry: Arc<ClientRegistry>,
    pub sink: Arc<dyn ActionSink>,
    pub heartbeat_interval: Duration,
    pub shutdown: CancellationToken,
}

/// Drive one accepted channel until it closes, then deregister it.
pub async fn run_connection(
    socket: WebSocket,
    connection: Arc<ClientConnection>,
    mut rx: mpsc::Receiver<Arc<str>>,
    ctx: ConnectionContext,
) {
    let client_id = connection.id.clone();
    connection.set_ready_state(ReadyState::Open);
    let _ = ctx.registry.add(Arc::clone(&connection));
    tracing::info!(client_id = %client_id, clients = ctx.registry.count(), "Client connected");

    let (mut ws_tx, mut ws_rx) = socket.split();

    // Writer task: drain the queue to the socket + periodic ping
    let writer_cid = client_id.clone();
    let heartbeat = ctx.heartbeat_interval;
    let shutdown = ctx.shutdown.clone();
    let mut writer = tokio::spawn(async move {
        let mut ping_interval = tokio::time::interval(heartbeat);
        ping_interval.tick().await; // consume first immediate tick

        loop {
            tokio::select! {
                msg = rx.recv() => {
                    let Some(text) = msg else { break };
                    if ws_tx.send(WsMessage::Text(text.to_string().into())).await.is_err() {
                        break;
                    }
                }
                _ = ping_interval.tick() => {
                    if ws_tx.send(WsMessage::Ping(Bytes::new())).await.is_err() {
                        break;
                    }
                    tracing::trace!(client_id = %writer_cid, "Sent ping");
                }
                () = shutdown.cancelled() => {
                    let _ = ws_tx.send(WsMessage::Close(None)).await;
                    break;
                }
            }
        }
    });

    // Reader task: hand text frames to the action path
    let reader_cid = client_id.clone();
    let sink = Arc::clone(&ctx.sink);
    let mut reader = tokio::spawn(async move {
        while let Some(frame) = ws_rx.next().await {
            match frame {
                Ok(WsMessage::Text(text)) => {
                    let _ = handle_client_text(&reader_cid, text.as_str(), &sink);
                }
                Ok(WsMessage::Close(_)) => break,
                Ok(_) => {} // binary, ping, pong
                Err(e) => {
                    tracing::debug!(client_id = %reader_cid, error = %e, "Read error");
                    break;
                }
            }
        }
    });

    tokio::select! {
        _ = &mut writer => reader.abort(),
        _ = &mut reader => writer.abort(),
    }

    connection.set_ready_state(ReadyState::Closing);
    let _ = ctx.registry.remove(&client_id);
    connection.set_ready_state(ReadyState::Closed);
    tracing::info!(
        client_id = %client_id,
        clients = ctx.registry.count(),
        dropped = connection.drop_count(),
        "Client disconnected"
    );
}

/// Parse one inbound text frame and start forwarding it if it is a call action.
///
/// Each forward runs on its own task so a slow provider never stalls the
/// reader. Anything unparseable is logged and dropped.
pub fn handle_client_text(
    client_id: &ClientId,
    text: &str,
    sink: &Arc<dyn ActionSink>,
) -> Option<JoinHandle<()>> {
    match parse_client_message(text) {
        Ok(ClientMessage::CallResponse(request)) => {
            tracing::info!(
                client_id = %client_id,
                action = %request.action,
                call_id = %request.call_id,
                "Call action received"
            );
            let sink = Arc::clone(sink);
            Some(tokio::spawn(async move { sink.forward(request).await }))
        }
        Ok(ClientMessage::Other(kind)) => {
            tracing::debug!(client_id = %client_id, kind = %kind, "Ignoring client message");
            None
        }
        Err(e @ ActionError::InvalidCallResponse(_)) => {
            tracing::warn!(client_id = %client_id, error = %e, "Dropping call_response");
            None
        }
        Err(e) => {
            tracing::debug!(client_id = %client_id, error = %e, "Ignoring unparseable frame");
            None
        }
    }
}
