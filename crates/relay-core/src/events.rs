//! Normalized call-lifecycle events pushed to connected clients.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A provider call connected and carries the caller's SDP offer.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallConnectEvent {
    pub call_id: String,
    pub phone_number_id: String,
    pub from: String,
    pub to: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sdp: Option<String>,
    pub timestamp: String,
}

/// A provider call ended.
///
/// `duration` is relayed as the provider sent it, whatever its JSON type.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallTerminateEvent {
    pub call_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub direction: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration: Option<Value>,
}

/// Event frame sent to every open client, tagged by `type`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RelayEvent {
    IncomingCall(CallConnectEvent),
    CallTerminated(CallTerminateEvent),
}

impl RelayEvent {
    /// Wire value of the `type` discriminator.
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::IncomingCall(_) => "incoming_call",
            Self::CallTerminated(_) => "call_terminated",
        }
    }

    pub fn call_id(&self) -> &str {
        match self {
            Self::IncomingCall(e) => &e.call_id,
            Self::CallTerminated(e) => &e.call_id,
        }
    }

    /// Serialize to the JSON text frame clients receive.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

impl From<CallConnectEvent> for RelayEvent {
    fn from(event: CallConnectEvent) -> Self {
        Self::IncomingCall(event)
    }
}

impl From<CallTerminateEvent> for RelayEvent {
    fn from(event: CallTerminateEvent) -> Self {
        Self::CallTerminated(event)
    }
}
