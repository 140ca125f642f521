//! Provider webhook schema and translation into [`RelayEvent`]s.
//!
//! Webhooks carry many notification kinds (messages, statuses, account
//! updates). Only the first change of the first entry is inspected, and only
//! when its `field` is `"calls"`. Within that change only the metadata and the
//! first call are read; sibling calls are never deserialized. Optional call
//! fields with an unexpected JSON type read as absent, so they cannot sink an
//! event whose required fields are present.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer};
use serde_json::Value;

use crate::events::{CallConnectEvent, CallTerminateEvent, RelayEvent};

/// Change `field` that marks a call-lifecycle notification.
pub const CALLS_FIELD: &str = "calls";

/// One call as the provider describes it.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct CallObject {
    #[serde(default, deserialize_with = "string_or_number")]
    pub id: Option<String>,
    #[serde(default, deserialize_with = "lenient")]
    pub event: Option<String>,
    #[serde(default, deserialize_with = "lenient")]
    pub from: Option<String>,
    #[serde(default, deserialize_with = "lenient")]
    pub to: Option<String>,
    #[serde(default, deserialize_with = "lenient")]
    pub session: Option<CallSession>,
    #[serde(default, deserialize_with = "string_or_number")]
    pub timestamp: Option<String>,
    #[serde(default, deserialize_with = "lenient")]
    pub direction: Option<String>,
    #[serde(default, deserialize_with = "lenient")]
    pub status: Option<String>,
    #[serde(default)]
    pub duration: Option<Value>,
}

#[derive(Clone, Debug, Default, Deserialize)]
pub struct CallSession {
    #[serde(default, deserialize_with = "lenient")]
    pub sdp: Option<String>,
    #[serde(default, deserialize_with = "lenient")]
    pub sdp_type: Option<String>,
}

/// Why a webhook produced no event.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum IgnoreReason {
    /// Not a `calls` change (or no change at all).
    NotCallNotification,
    /// A `calls` change missing data the event needs.
    Malformed(&'static str),
    /// A call event other than `connect` / `terminate`.
    UnhandledEvent(String),
}

impl std::fmt::Display for IgnoreReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NotCallNotification => f.write_str("not a call notification"),
            Self::Malformed(what) => write!(f, "malformed call notification: {what}"),
            Self::UnhandledEvent(event) => write!(f, "unhandled call event '{event}'"),
        }
    }
}

/// Outcome of translating one webhook body.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Translation {
    Event(RelayEvent),
    Ignored(IgnoreReason),
}

impl Translation {
    pub fn into_event(self) -> Option<RelayEvent> {
        match self {
            Self::Event(event) => Some(event),
            Self::Ignored(_) => None,
        }
    }
}

/// Translate raw webhook bytes. Bodies that are not JSON are ignored.
pub fn translate_bytes(body: &[u8]) -> Translation {
    match serde_json::from_slice::<Value>(body) {
        Ok(value) => translate(&value),
        Err(_) => Translation::Ignored(IgnoreReason::Malformed("body is not JSON")),
    }
}

/// Translate a parsed webhook body.
pub fn translate(body: &Value) -> Translation {
    let Some(change) = first_change(body) else {
        return Translation::Ignored(IgnoreReason::NotCallNotification);
    };
    if change.get("field").and_then(Value::as_str) != Some(CALLS_FIELD) {
        return Translation::Ignored(IgnoreReason::NotCallNotification);
    }

    let Some(value) = change.get("value") else {
        return Translation::Ignored(IgnoreReason::Malformed("missing change value"));
    };
    let Some(raw_call) = value.get("calls").and_then(|calls| calls.get(0)) else {
        return Translation::Ignored(IgnoreReason::Malformed("no calls in change"));
    };
    let Ok(call) = CallObject::deserialize(raw_call) else {
        return Translation::Ignored(IgnoreReason::Malformed("call is not an object"));
    };

    match call.event.as_deref() {
        Some("connect") => connect_event(value, call),
        Some("terminate") => terminate_event(call),
        Some(other) => Translation::Ignored(IgnoreReason::UnhandledEvent(other.to_string())),
        None => Translation::Ignored(IgnoreReason::Malformed("call has no event")),
    }
}

fn first_change(body: &Value) -> Option<&Value> {
    body.get("entry")?.get(0)?.get("changes")?.get(0)
}

fn metadata_phone_number_id(value: &Value) -> Option<String> {
    match value.get("metadata")?.get("phone_number_id")? {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn connect_event(value: &Value, call: CallObject) -> Translation {
    let (Some(call_id), Some(phone_number_id), Some(from), Some(to), Some(timestamp)) = (
        call.id,
        metadata_phone_number_id(value),
        call.from,
        call.to,
        call.timestamp,
    ) else {
        return Translation::Ignored(IgnoreReason::Malformed("connect event missing fields"));
    };

    Translation::Event(RelayEvent::IncomingCall(CallConnectEvent {
        call_id,
        phone_number_id,
        from,
        to,
        sdp: call.session.and_then(|s| s.sdp),
        timestamp,
    }))
}

fn terminate_event(call: CallObject) -> Translation {
    let Some(call_id) = call.id else {
        return Translation::Ignored(IgnoreReason::Malformed("terminate event missing call id"));
    };
    Translation::Event(RelayEvent::CallTerminated(CallTerminateEvent {
        call_id,
        direction: call.direction,
        status: call.status,
        duration: call.duration,
    }))
}

/// Read a field as `T`, or as absent when its JSON type does not fit.
fn lenient<'de, D, T>(deserializer: D) -> Result<Option<T>, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(value.and_then(|v| serde_json::from_value(v).ok()))
}

/// Providers send ids and unix timestamps as strings, but bare numbers occur too.
fn string_or_number<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Option::<Value>::deserialize(deserializer)? {
        Some(Value::String(s)) => Some(s),
        Some(Value::Number(n)) => Some(n.to_string()),
        _ => None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn calls_body(call: Value) -> Value {
        json!({
            "object": "whatsapp_business_account",
            "entry": [{
                "id": "waba",
                "changes": [{
                    "field": "calls",
                    "value": {
                        "messaging_product": "whatsapp",
                        "metadata": { "phone_number_id": "111", "display_phone_number": "1555" },
                        "calls": [call]
                    }
                }]
            }]
        })
    }

    #[test]
    fn connect_event_translates_verbatim() {
        let body = calls_body(json!({
            "id": "abc123",
            "event": "connect",
            "from": "+1555",
            "to": "+1556",
            "session": { "sdp_type": "offer", "sdp": "v=0..." },
            "timestamp": "123"
        }));
        let event = translate(&body).into_event().unwrap();
        assert_eq!(
            event,
            RelayEvent::IncomingCall(CallConnectEvent {
                call_id: "abc123".into(),
                phone_number_id: "111".into(),
                from: "+1555".into(),
                to: "+1556".into(),
                sdp: Some("v=0...".into()),
                timestamp: "123".into(),
            })
        );
    }

    #[test]
    fn connect_without_session_has_no_sdp() {
        let body = calls_body(json!({
            "id": "abc123", "event": "connect", "from": "+1555", "to": "+1556", "timestamp": "123"
        }));
        match translate(&body) {
            Translation::Event(RelayEvent::IncomingCall(e)) => assert!(e.sdp.is_none()),
            other => panic!("unexpected translation: {other:?}"),
        }
    }

    #[test]
    fn numeric_timestamp_is_accepted() {
        let body = calls_body(json!({
            "id": "abc123", "event": "connect", "from": "+1555", "to": "+1556", "timestamp": 1700000000
        }));
        match translate(&body) {
            Translation::Event(RelayEvent::IncomingCall(e)) => assert_eq!(e.timestamp, "1700000000"),
            other => panic!("unexpected translation: {other:?}"),
        }
    }

    #[test]
    fn terminate_event_translates() {
        let body = calls_body(json!({
            "id": "abc123",
            "event": "terminate",
            "direction": "business_initiated",
            "status": "completed",
            "duration": 42,
            "from": "+1555",
            "to": "+1556",
            "timestamp": "124"
        }));
        assert_eq!(
            translate(&body),
            Translation::Event(RelayEvent::CallTerminated(CallTerminateEvent {
                call_id: "abc123".into(),
                direction: Some("business_initiated".into()),
                status: Some("completed".into()),
                duration: Some(json!(42)),
            }))
        );
    }

    #[test]
    fn terminate_with_only_id_is_accepted() {
        let body = calls_body(json!({ "id": "abc123", "event": "terminate" }));
        assert!(matches!(
            translate(&body),
            Translation::Event(RelayEvent::CallTerminated(_))
        ));
    }

    #[test]
    fn other_field_is_ignored() {
        let body = json!({
            "entry": [{ "changes": [{ "field": "messages", "value": { "messages": [] } }] }]
        });
        assert_eq!(
            translate(&body),
            Translation::Ignored(IgnoreReason::NotCallNotification)
        );
    }

    #[test]
    fn empty_and_shapeless_bodies_are_ignored() {
        for body in [
            json!({}),
            json!([]),
            json!(null),
            json!("calls"),
            json!({ "entry": [] }),
            json!({ "entry": [{}] }),
            json!({ "entry": [{ "changes": [] }] }),
            json!({ "entry": "nope" }),
        ] {
            assert_eq!(
                translate(&body),
                Translation::Ignored(IgnoreReason::NotCallNotification),
                "body: {body}"
            );
        }
    }

    #[test]
    fn only_first_change_is_inspected() {
        let body = json!({
            "entry": [{ "changes": [
                { "field": "messages", "value": {} },
                { "field": "calls", "value": { "calls": [{ "id": "x", "event": "terminate" }] } }
            ] }]
        });
        assert!(translate(&body).into_event().is_none());
    }

    #[test]
    fn unknown_call_event_is_ignored() {
        let body = calls_body(json!({ "id": "abc123", "event": "ringing" }));
        assert_eq!(
            translate(&body),
            Translation::Ignored(IgnoreReason::UnhandledEvent("ringing".into()))
        );
    }

    #[test]
    fn calls_change_without_calls_is_malformed() {
        let body = json!({ "entry": [{ "changes": [{ "field": "calls", "value": { "calls": [] } }] }] });
        assert!(matches!(translate(&body), Translation::Ignored(IgnoreReason::Malformed(_))));

        let body = json!({ "entry": [{ "changes": [{ "field": "calls" }] }] });
        assert!(matches!(translate(&body), Translation::Ignored(IgnoreReason::Malformed(_))));
    }

    #[test]
    fn connect_missing_metadata_is_malformed() {
        let body = json!({ "entry": [{ "changes": [{ "field": "calls", "value": {
            "calls": [{ "id": "abc123", "event": "connect", "from": "+1555", "to": "+1556", "timestamp": "1" }]
        } }] }] });
        assert!(matches!(translate(&body), Translation::Ignored(IgnoreReason::Malformed(_))));
    }

    #[test]
    fn mistyped_fields_do_not_panic() {
        let body = calls_body(json!({ "id": [7], "event": "connect", "from": {}, "duration": "long" }));
        assert!(matches!(translate(&body), Translation::Ignored(IgnoreReason::Malformed(_))));
    }

    #[test]
    fn terminate_relays_duration_of_any_type() {
        for duration in [json!("42"), json!(42.5)] {
            let body = calls_body(json!({
                "id": "abc123", "event": "terminate", "status": "completed", "duration": duration.clone()
            }));
            match translate(&body) {
                Translation::Event(RelayEvent::CallTerminated(e)) => {
                    assert_eq!(e.call_id, "abc123");
                    assert_eq!(e.status.as_deref(), Some("completed"));
                    assert_eq!(e.duration, Some(duration));
                }
                other => panic!("unexpected translation: {other:?}"),
            }
        }
    }

    #[test]
    fn mistyped_optional_fields_read_as_absent() {
        let body = calls_body(json!({
            "id": "abc123", "event": "terminate", "direction": 3, "status": ["completed"]
        }));
        assert_eq!(
            translate(&body),
            Translation::Event(RelayEvent::CallTerminated(CallTerminateEvent {
                call_id: "abc123".into(),
                direction: None,
                status: None,
                duration: None,
            }))
        );

        let body = calls_body(json!({
            "id": "abc123", "event": "connect", "from": "+1555", "to": "+1556",
            "timestamp": "1", "session": "not-a-session"
        }));
        match translate(&body) {
            Translation::Event(RelayEvent::IncomingCall(e)) => assert!(e.sdp.is_none()),
            other => panic!("unexpected translation: {other:?}"),
        }
    }

    #[test]
    fn malformed_sibling_call_does_not_drop_first() {
        let body = json!({ "entry": [{ "changes": [{ "field": "calls", "value": {
            "calls": [{ "id": "abc123", "event": "terminate" }, { "id": 5 }, "junk"]
        } }] }] });
        match translate(&body) {
            Translation::Event(RelayEvent::CallTerminated(e)) => assert_eq!(e.call_id, "abc123"),
            other => panic!("unexpected translation: {other:?}"),
        }
    }

    #[test]
    fn call_that_is_not_an_object_is_malformed() {
        let body = calls_body(json!("abc123"));
        assert_eq!(
            translate(&body),
            Translation::Ignored(IgnoreReason::Malformed("call is not an object"))
        );
    }

    #[test]
    fn non_json_bytes_are_ignored() {
        assert!(matches!(
            translate_bytes(b"not json"),
            Translation::Ignored(IgnoreReason::Malformed(_))
        ));
        assert!(translate_bytes(b"").into_event().is_none());
    }

    #[test]
    fn translate_bytes_matches_translate() {
        let body = calls_body(json!({ "id": "abc123", "event": "terminate", "duration": 5 }));
        let bytes = serde_json::to_vec(&body).unwrap();
        assert_eq!(translate_bytes(&bytes), translate(&body));
    }
}
