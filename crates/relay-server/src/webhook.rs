//! Provider webhook handlers: subscription verification and event receipt.

use axum::body::Bytes;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use relay_core::{translate_bytes, Translation, VerifyToken};
use serde::Deserialize;
use tracing::{debug, info};

use crate::server::AppState;

/// `hub.mode` value the provider sends when subscribing.
pub const SUBSCRIBE_MODE: &str = "subscribe";

/// Query parameters of the subscription handshake.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct VerifyParams {
    #[serde(rename = "hub.mode")]
    pub mode: Option<String>,
    #[serde(rename = "hub.challenge")]
    pub challenge: Option<String>,
    #[serde(rename = "hub.verify_token")]
    pub verify_token: Option<String>,
}

/// Echo the challenge when mode and token match, else 403 with no body.
pub fn verify_subscription(params: &VerifyParams, expected: &VerifyToken) -> Response {
    let mode_ok = params.mode.as_deref() == Some(SUBSCRIBE_MODE);
    let token_ok = params
        .verify_token
        .as_deref()
        .is_some_and(|token| expected.matches(token));

    if mode_ok && token_ok {
        info!("Webhook verified");
        (StatusCode::OK, params.challenge.clone().unwrap_or_default()).into_response()
    } else {
        info!(mode = params.mode.as_deref().unwrap_or(""), "Webhook verification failed");
        StatusCode::FORBIDDEN.into_response()
    }
}

/// `POST /`: always acknowledged with 200, whatever the body holds.
pub async fn receive_webhook(State(state): State<AppState>, body: Bytes) -> StatusCode {
    info!(
        received_at = %chrono::Utc::now().to_rfc3339(),
        bytes = body.len(),
        "Webhook received"
    );
    debug!(body = %String::from_utf8_lossy(&body), "Webhook body");

    match translate_bytes(&body) {
        Translation::Event(event) => {
            let report = state.dispatcher.dispatch(&event);
            info!(
                event_type = event.event_type(),
                call_id = event.call_id(),
                delivered = report.delivered,
                "Relayed call event"
            );
        }
        Translation::Ignored(reason) => {
            debug!(reason = %reason, "Webhook produced no event");
        }
    }
    StatusCode::OK
}
