//! Axum composition root: webhook ingress, client channels, static assets.

use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::rejection::QueryRejection;
use axum::extract::ws::rejection::WebSocketUpgradeRejection;
use axum::extract::ws::{close_code, CloseFrame, Message, Utf8Bytes, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::http::header::{HOST, ORIGIN};
use axum::http::HeaderMap;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use relay_core::VerifyToken;
use tokio_util::sync::CancellationToken;
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

use crate::broadcast::BroadcastDispatcher;
use crate::client::{self, ClientConnection, ClientRegistry, ConnectionContext};
use crate::config::RelayConfig;
use crate::forwarder::{ActionSink, ForwardError, GraphForwarder};
use crate::origin::origin_allowed;
use crate::shutdown::DEFAULT_SHUTDOWN_TIMEOUT;
use crate::webhook::{self, VerifyParams};

/// Shared state passed to Axum handlers.
#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<ClientRegistry>,
    pub dispatcher: BroadcastDispatcher,
    /// Where validated client call actions go.
    pub sink: Arc<dyn ActionSink>,
    pub verify_token: VerifyToken,
    pub enforce_origin: bool,
    pub max_send_queue: usize,
    pub heartbeat_interval: Duration,
    /// Cancelled once to stop the listener and close every channel.
    pub shutdown: CancellationToken,
}

impl AppState {
    pub fn new(config: &RelayConfig, sink: Arc<dyn ActionSink>, shutdown: CancellationToken) -> Self {
        let registry = Arc::new(ClientRegistry::new());
        Self {
            dispatcher: BroadcastDispatcher::new(Arc::clone(&registry)),
            registry,
            sink,
            verify_token: config.verify_token.clone(),
            enforce_origin: config.enforce_origin,
            max_send_queue: config.max_send_queue,
            heartbeat_interval: config.heartbeat_interval,
            shutdown,
        }
    }

    fn connection_context(&self) -> ConnectionContext {
        ConnectionContext {
            registry: Arc::clone(&self.registry),
            sink: Arc::clone(&self.sink),
            heartbeat_interval: self.heartbeat_interval,
            shutdown: self.shutdown.clone(),
        }
    }
}

/// Build the Axum router with all routes.
///
/// `static_dir` is served for unmatched paths when it exists on disk.
pub fn build_router(state: AppState, static_dir: Option<&Path>) -> Router {
    let mut router = Router::new()
        .route("/", get(root_get).post(webhook::receive_webhook))
        .route("/ws", get(ws_handler))
        .with_state(state);

    match static_dir {
        Some(dir) if dir.is_dir() => {
            info!(dir = %dir.display(), "Serving static assets");
            router = router.fallback_service(ServeDir::new(dir));
        }
        Some(dir) => warn!(dir = %dir.display(), "Static directory not found, assets disabled"),
        None => {}
    }

    router.layer(TraceLayer::new_for_http())
}

#[derive(Debug, thiserror::Error)]
pub enum StartError {
    #[error(transparent)]
    Forwarder(#[from] ForwardError),
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Start the relay with the provider forwarder built from `config`.
pub async fn start(config: RelayConfig) -> Result<ServerHandle, StartError> {
    let forwarder = GraphForwarder::new(config.forwarder_config())?;
    // Re-checked before every send; this only surfaces the problem early.
    if let Err(e) = forwarder.check_base_url() {
        warn!(error = %e, "Provider API URL will be refused for every call action");
    }
    start_with_sink(config, Arc::new(forwarder)).await
}

/// Start the relay with a caller-supplied action sink.
pub async fn start_with_sink(
    config: RelayConfig,
    sink: Arc<dyn ActionSink>,
) -> Result<ServerHandle, StartError> {
    let shutdown = CancellationToken::new();
    let state = AppState::new(&config, sink, shutdown.clone());
    let registry = Arc::clone(&state.registry);
    let router = build_router(state, config.static_dir.as_deref());

    let addr = config.bind_addr();
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .map_err(|source| StartError::Bind { addr, source })?;
    let local_addr = listener.local_addr()?;

    info!(addr = %local_addr, enforce_origin = config.enforce_origin, "Relay server started");

    let token = shutdown.clone();
    let server = tokio::spawn(async move {
        let result = axum::serve(listener, router)
            .with_graceful_shutdown(async move { token.cancelled().await })
            .await;
        if let Err(e) = result {
            error!(error = %e, "Server error");
        }
    });

    Ok(ServerHandle {
        addr: local_addr,
        registry,
        shutdown,
        server,
    })
}

/// Handle returned by `start()`.
pub struct ServerHandle {
    addr: SocketAddr,
    registry: Arc<ClientRegistry>,
    shutdown: CancellationToken,
    server: tokio::task::JoinHandle<()>,
}

impl ServerHandle {
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn port(&self) -> u16 {
        self.addr.port()
    }

    pub fn registry(&self) -> &Arc<ClientRegistry> {
        &self.registry
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    /// Stop accepting, close client channels, and wait up to `timeout`
    /// (default 30 s) for the listener to drain.
    ///
    /// Returns `false` if the timeout elapsed first.
    pub async fn shutdown(self, timeout: Option<Duration>) -> bool {
        let timeout = timeout.unwrap_or(DEFAULT_SHUTDOWN_TIMEOUT);
        self.shutdown.cancel();
        info!(timeout_secs = timeout.as_secs(), "Waiting for listener to drain");

        match tokio::time::timeout(timeout, self.server).await {
            Ok(Ok(())) => true,
            Ok(Err(e)) => {
                error!(error = %e, "Listener task failed during shutdown");
                false
            }
            Err(_) => {
                warn!("Shutdown timed out after {timeout:?}");
                false
            }
        }
    }
}

/// `GET /`: a channel upgrade, or else the webhook subscription handshake.
async fn root_get(
    State(state): State<AppState>,
    headers: HeaderMap,
    ws: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
    query: Result<Query<VerifyParams>, QueryRejection>,
) -> Response {
    match ws {
        Ok(ws) => upgrade(ws, &headers, state),
        Err(_) => {
            let params = query.map(|Query(p)| p).unwrap_or_default();
            webhook::verify_subscription(&params, &state.verify_token)
        }
    }
}

/// `GET /ws`
async fn ws_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    ws: WebSocketUpgrade,
) -> Response {
    upgrade(ws, &headers, state)
}

fn upgrade(ws: WebSocketUpgrade, headers: &HeaderMap, state: AppState) -> Response {
    // A non-UTF-8 Origin is present but unusable, so it is checked as "".
    let origin = headers
        .get(ORIGIN)
        .map(|v| v.to_str().unwrap_or_default().to_string());
    let host = headers.get(HOST).and_then(|v| v.to_str().ok());
    let allowed = !state.enforce_origin || origin_allowed(origin.as_deref(), host);

    ws.on_upgrade(move |socket| async move {
        if allowed {
            handle_socket(socket, state).await;
        } else {
            reject_socket(socket, origin.unwrap_or_default()).await;
        }
    })
    .into_response()
}

async fn handle_socket(socket: WebSocket, state: AppState) {
    let (connection, rx) = ClientConnection::channel(state.max_send_queue);
    client::run_connection(socket, connection, rx, state.connection_context()).await;
}

async fn reject_socket(mut socket: WebSocket, origin: String) {
    warn!(origin = %origin, "Rejected channel with invalid origin");
    let frame = CloseFrame {
        code: close_code::POLICY,
        reason: Utf8Bytes::from_static("Invalid origin"),
    };
    let _ = socket.send(Message::Close(Some(frame))).await;
}
