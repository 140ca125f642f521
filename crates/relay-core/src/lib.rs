//! # relay-core
//!
//! Domain types for the call-signaling relay. Nothing in this crate performs
//! I/O: it parses provider webhooks into normalized events, parses client
//! channel messages into call actions, and builds the provider request body.

pub mod actions;
pub mod events;
pub mod security;
pub mod webhook;

pub use actions::{
    parse_client_message, ActionError, CallAction, CallActionRequest, ClientMessage,
    PhoneNumberId, ProviderCallBody,
};
pub use events::{CallConnectEvent, CallTerminateEvent, RelayEvent};
pub use security::{AccessToken, VerifyToken};
pub use webhook::{translate, translate_bytes, IgnoreReason, Translation};
