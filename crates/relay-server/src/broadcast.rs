//! Event fan-out to connected clients.
//!
//! Best effort: each event is queued once per open client and never retried.
//! A client that cannot take it right now misses it.

use std::sync::Arc;

use relay_core::RelayEvent;
use tracing::{debug, warn};

use crate::client::{BroadcastReport, ClientRegistry};

/// Serializes relay events and pushes them to every open client.
#[derive(Clone, Debug)]
pub struct BroadcastDispatcher {
    registry: Arc<ClientRegistry>,
}

impl BroadcastDispatcher {
    pub fn new(registry: Arc<ClientRegistry>) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &Arc<ClientRegistry> {
        &self.registry
    }

    /// Broadcast an event to all open connections.
    pub fn dispatch(&self, event: &RelayEvent) -> BroadcastReport {
        let json = match event.to_json() {
            Ok(j) => j,
            Err(e) => {
                warn!(event_type = event.event_type(), error = %e, "failed to serialize event");
                return BroadcastReport::default();
            }
        };
        let report = self.registry.broadcast(&json);
        debug!(
            event_type = event.event_type(),
            call_id = event.call_id(),
            recipients = report.recipients(),
            delivered = report.delivered,
            skipped = report.skipped,
            failed = report.failed,
            "broadcast event"
        );
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::{ClientConnection, ReadyState};
    use relay_core::{CallConnectEvent, CallTerminateEvent};
    use serde_json::{json, Value};

    fn dispatcher_with_clients(n: usize) -> (BroadcastDispatcher, Vec<tokio::sync::mpsc::Receiver<Arc<str>>>) {
        let registry = Arc::new(ClientRegistry::new());
        let mut receivers = Vec::new();
        for _ in 0..n {
            let (conn, rx) = ClientConnection::channel(8);
            conn.set_ready_state(ReadyState::Open);
            registry.add(conn);
            receivers.push(rx);
        }
        (BroadcastDispatcher::new(registry), receivers)
    }

    #[test]
    fn incoming_call_reaches_every_client_verbatim() {
        let (dispatcher, mut receivers) = dispatcher_with_clients(2);
        let event = RelayEvent::from(CallConnectEvent {
            call_id: "abc123".into(),
            phone_number_id: "111".into(),
            from: "+1555".into(),
            to: "+1556".into(),
            sdp: Some("v=0...".into()),
            timestamp: "123".into(),
        });

        let report = dispatcher.dispatch(&event);
        assert_eq!(report.delivered, 2);

        for rx in &mut receivers {
            let frame: Value = serde_json::from_str(&rx.try_recv().unwrap()).unwrap();
            assert_eq!(
                frame,
                json!({
                    "type": "incoming_call",
                    "callId": "abc123",
                    "phoneNumberId": "111",
                    "from": "+1555",
                    "to": "+1556",
                    "sdp": "v=0...",
                    "timestamp": "123"
                })
            );
            assert!(rx.try_recv().is_err());
        }
    }

    #[test]
    fn call_terminated_reaches_every_client() {
        let (dispatcher, mut receivers) = dispatcher_with_clients(3);
        let event = RelayEvent::from(CallTerminateEvent {
            call_id: "abc123".into(),
            direction: Some("business_initiated".into()),
            status: Some("completed".into()),
            duration: Some(42.into()),
        });

        assert_eq!(dispatcher.dispatch(&event).delivered, 3);
        for rx in &mut receivers {
            let frame: Value = serde_json::from_str(&rx.try_recv().unwrap()).unwrap();
            assert_eq!(frame["type"], "call_terminated");
            assert_eq!(frame["callId"], "abc123");
            assert_eq!(frame["direction"], "business_initiated");
            assert_eq!(frame["status"], "completed");
            assert_eq!(frame["duration"], 42);
        }
    }

    #[test]
    fn dispatch_without_clients_is_a_no_op() {
        let (dispatcher, _) = dispatcher_with_clients(0);
        let event = RelayEvent::from(CallTerminateEvent {
            call_id: "x".into(),
            direction: None,
            status: None,
            duration: None,
        });
        assert_eq!(dispatcher.dispatch(&event), BroadcastReport::default());
    }
}
