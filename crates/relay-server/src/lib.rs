//! # relay-server
//!
//! Axum HTTP + `WebSocket` server for the call-signaling relay.
//!
//! - Webhook ingress: subscription handshake and call-event receipt
//! - `WebSocket` channels: registry, heartbeat, call-action intake
//! - Event fan-out to every open channel
//! - Call-action forwarding to the provider, behind an allow-listed host
//! - Graceful shutdown via `tokio::signal` + `CancellationToken`

#![deny(unsafe_code)]

pub mod broadcast;
pub mod client;
pub mod config;
pub mod forwarder;
pub mod origin;
pub mod server;
pub mod shutdown;
pub mod webhook;

pub use broadcast::BroadcastDispatcher;
pub use client::{BroadcastReport, ClientConnection, ClientId, ClientRegistry, ReadyState};
pub use config::{ConfigError, RelayConfig};
pub use forwarder::{ActionSink, ForwardError, ForwarderConfig, GraphForwarder};
pub use server::{build_router, start, start_with_sink, AppState, ServerHandle, StartError};
pub use shutdown::{wait_for_signal, DEFAULT_SHUTDOWN_TIMEOUT};
