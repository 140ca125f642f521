//! Outbound call-action forwarding to the provider's calls endpoint.
//!
//! Forwarding is fire-and-forget: one attempt, no retry, no queue. Failures
//! are logged and dropped.

use std::time::Duration;

use async_trait::async_trait;
use relay_core::{AccessToken, ActionError, CallActionRequest, PhoneNumberId};
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE};
use reqwest::Url;
use tracing::{debug, error, info, instrument, warn};

/// Hostnames the relay may send signaling traffic to.
pub const PROVIDER_HOSTS: &[&str] = &["graph.facebook.com"];

pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Upper bound on provider error bodies kept for logging.
const MAX_ERROR_BODY: usize = 2048;

/// Why a call action was not delivered.
#[derive(Debug, thiserror::Error)]
pub enum ForwardError {
    #[error(transparent)]
    InvalidAction(#[from] ActionError),
    #[error("invalid API base URL {url:?}: {reason}")]
    InvalidBaseUrl { url: String, reason: String },
    #[error("API URL hostname {0:?} is not allow-listed")]
    DisallowedHost(String),
    #[error("request timed out after {0:?}")]
    Timeout(Duration),
    #[error("network error: {0}")]
    Network(String),
    #[error("provider returned {status}: {body}")]
    ProviderRejected { status: u16, body: String },
    #[error("failed to build HTTP client: {0}")]
    ClientBuild(String),
}

impl ForwardError {
    /// Rejected before any request was attempted.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            Self::InvalidAction(_) | Self::InvalidBaseUrl { .. } | Self::DisallowedHost(_)
        )
    }

    /// Short classification string for logging.
    pub fn error_kind(&self) -> &'static str {
        match self {
            Self::InvalidAction(_) => "invalid_action",
            Self::InvalidBaseUrl { .. } => "invalid_base_url",
            Self::DisallowedHost(_) => "disallowed_host",
            Self::Timeout(_) => "timeout",
            Self::Network(_) => "network_error",
            Self::ProviderRejected { .. } => "provider_rejected",
            Self::ClientBuild(_) => "client_build",
        }
    }
}

/// Settings for [`GraphForwarder`].
#[derive(Clone, Debug)]
pub struct ForwarderConfig {
    pub api_base_url: String,
    pub access_token: AccessToken,
    /// Checked against the base URL before every send.
    pub allowed_hosts: Vec<String>,
    pub timeout: Duration,
}

impl ForwarderConfig {
    pub fn new(api_base_url: impl Into<String>, access_token: AccessToken) -> Self {
        Self {
            api_base_url: api_base_url.into(),
            access_token,
            allowed_hosts: PROVIDER_HOSTS.iter().map(|h| (*h).to_string()).collect(),
            timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_allowed_hosts<I, S>(mut self, hosts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.allowed_hosts = hosts.into_iter().map(Into::into).collect();
        self
    }
}

/// Destination for validated client call actions.
#[async_trait]
pub trait ActionSink: Send + Sync {
    /// Deliver once, log any failure, never report back to the caller.
    async fn forward(&self, request: CallActionRequest);
}

/// Sends call actions to `{api_base_url}/{phone_number_id}/calls`.
pub struct GraphForwarder {
    config: ForwarderConfig,
    client: reqwest::Client,
}

impl std::fmt::Debug for GraphForwarder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GraphForwarder")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl GraphForwarder {
    pub fn new(config: ForwarderConfig) -> Result<Self, ForwardError> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| ForwardError::ClientBuild(e.to_string()))?;
        Ok(Self { config, client })
    }

    pub fn config(&self) -> &ForwarderConfig {
        &self.config
    }

    /// Parse the configured base URL and require an allow-listed hostname.
    pub fn check_base_url(&self) -> Result<Url, ForwardError> {
        let raw = &self.config.api_base_url;
        let url = Url::parse(raw).map_err(|e| ForwardError::InvalidBaseUrl {
            url: raw.clone(),
            reason: e.to_string(),
        })?;
        let host = url.host_str().ok_or_else(|| ForwardError::InvalidBaseUrl {
            url: raw.clone(),
            reason: "URL has no host".into(),
        })?;
        if !self.config.allowed_hosts.iter().any(|allowed| allowed == host) {
            return Err(ForwardError::DisallowedHost(host.to_string()));
        }
        Ok(url)
    }

    /// Validate and build the calls endpoint for one phone-number id.
    pub fn calls_url(&self, phone_number_id: &PhoneNumberId) -> Result<Url, ForwardError> {
        let base = self.check_base_url()?;
        let joined = format!(
            "{}/{}/calls",
            base.as_str().trim_end_matches('/'),
            phone_number_id
        );
        Url::parse(&joined).map_err(|e| ForwardError::InvalidBaseUrl {
            url: joined,
            reason: e.to_string(),
        })
    }

    /// One delivery attempt. Validation happens before any network I/O.
    #[instrument(skip_all, fields(action = %request.action, call_id = %request.call_id))]
    pub async fn try_forward(&self, request: &CallActionRequest) -> Result<(), ForwardError> {
        let phone_number_id = PhoneNumberId::parse(&request.phone_number_id)?;
        let url = self.calls_url(&phone_number_id)?;
        let body = request.provider_body();

        debug!(%url, "posting call action");
        let response = self
            .client
            .post(url)
            .header(AUTHORIZATION, self.config.access_token.bearer_header())
            .header(CONTENT_TYPE, "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| self.classify(&e))?;

        let status = response.status();
        if status.is_success() {
            return Ok(());
        }
        let mut body = response.text().await.unwrap_or_default();
        if body.len() > MAX_ERROR_BODY {
            let mut cut = MAX_ERROR_BODY;
            while !body.is_char_boundary(cut) {
                cut -= 1;
            }
            body.truncate(cut);
        }
        Err(ForwardError::ProviderRejected {
            status: status.as_u16(),
            body,
        })
    }

    fn classify(&self, err: &reqwest::Error) -> ForwardError {
        if err.is_timeout() {
            ForwardError::Timeout(self.config.timeout)
        } else {
            ForwardError::Network(err.to_string())
        }
    }
}

#[async_trait]
impl ActionSink for GraphForwarder {
    async fn forward(&self, request: CallActionRequest) {
        match self.try_forward(&request).await {
            Ok(()) => info!(
                action = %request.action,
                call_id = %request.call_id,
                "call action sent"
            ),
            Err(e) if e.is_validation() => warn!(
                action = %request.action,
                call_id = %request.call_id,
                kind = e.error_kind(),
                error = %e,
                "call action rejected"
            ),
            Err(e) => error!(
                action = %request.action,
                call_id = %request.call_id,
                kind = e.error_kind(),
                error = %e,
                "call action failed"
            ),
        }
    }
}
