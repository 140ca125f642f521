//! Client-originated call actions and the provider request body built from them.

use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

/// `type` of a client frame that carries a call action.
pub const CALL_RESPONSE_TYPE: &str = "call_response";

/// Value of `messaging_product` in every provider call request.
pub const MESSAGING_PRODUCT: &str = "whatsapp";

// ASCII digits only: `\d` would also admit other Unicode decimal digits.
static PHONE_NUMBER_ID: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^[0-9]+$").unwrap());

/// Errors parsing or validating client channel input.
#[derive(Debug, thiserror::Error)]
pub enum ActionError {
    #[error("message is not valid JSON: {0}")]
    InvalidJson(#[source] serde_json::Error),
    #[error("message is not a JSON object")]
    NotAnObject,
    #[error("message has no string `type`")]
    MissingType,
    #[error("invalid call_response message: {0}")]
    InvalidCallResponse(#[source] serde_json::Error),
    #[error("invalid phone number id format: {0:?}")]
    InvalidPhoneNumberId(String),
}

/// Call-control verbs the provider accepts.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallAction {
    PreAccept,
    Accept,
    Reject,
    Terminate,
}

impl CallAction {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::PreAccept => "pre_accept",
            Self::Accept => "accept",
            Self::Reject => "reject",
            Self::Terminate => "terminate",
        }
    }
}

impl std::fmt::Display for CallAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A phone-number identifier that is safe to place in a URL path.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct PhoneNumberId(String);

impl PhoneNumberId {
    /// Accepts only non-empty strings of ASCII digits.
    pub fn parse(raw: &str) -> Result<Self, ActionError> {
        if PHONE_NUMBER_ID.is_match(raw) {
            Ok(Self(raw.to_string()))
        } else {
            Err(ActionError::InvalidPhoneNumberId(raw.to_string()))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for PhoneNumberId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// A `call_response` frame from a client.
///
/// `phone_number_id` is kept raw here (a JSON number is read as its decimal
/// text); it is validated into a [`PhoneNumberId`] immediately before an
/// outbound URL is built.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallActionRequest {
    pub action: CallAction,
    pub call_id: String,
    #[serde(deserialize_with = "string_or_number")]
    pub phone_number_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sdp: Option<String>,
}

impl CallActionRequest {
    /// Body for `POST {base}/{phone_number_id}/calls`.
    pub fn provider_body(&self) -> ProviderCallBody<'_> {
        ProviderCallBody {
            messaging_product: MESSAGING_PRODUCT,
            call_id: &self.call_id,
            action: self.action,
            session: self
                .sdp
                .as_deref()
                .filter(|sdp| !sdp.is_empty())
                .map(|sdp| ProviderSession {
                    sdp_type: "answer",
                    sdp,
                }),
        }
    }
}

fn string_or_number<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    match Value::deserialize(deserializer)? {
        Value::String(s) => Ok(s),
        Value::Number(n) => Ok(n.to_string()),
        other => Err(serde::de::Error::custom(format!(
            "expected string or number, found {other}"
        ))),
    }
}

/// JSON body of a provider call-control request.
#[derive(Debug, Serialize)]
pub struct ProviderCallBody<'a> {
    pub messaging_product: &'static str,
    pub call_id: &'a str,
    pub action: CallAction,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session: Option<ProviderSession<'a>>,
}

#[derive(Debug, Serialize)]
pub struct ProviderSession<'a> {
    pub sdp_type: &'static str,
    pub sdp: &'a str,
}

/// A parsed inbound channel frame.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ClientMessage {
    CallResponse(CallActionRequest),
    /// Any other `type`; carried so callers can log it.
    Other(String),
}

/// Parse one text frame from a client channel.
pub fn parse_client_message(text: &str) -> Result<ClientMessage, ActionError> {
    let value: Value = serde_json::from_str(text).map_err(ActionError::InvalidJson)?;
    if !value.is_object() {
        return Err(ActionError::NotAnObject);
    }
    let kind = value
        .get("type")
        .and_then(Value::as_str)
        .ok_or(ActionError::MissingType)?;
    if kind != CALL_RESPONSE_TYPE {
        return Ok(ClientMessage::Other(kind.to_string()));
    }
    let request =
        CallActionRequest::deserialize(&value).map_err(ActionError::InvalidCallResponse)?;
    Ok(ClientMessage::CallResponse(request))
}
