//! Relay configuration, sourced from the process environment.

use std::path::PathBuf;
use std::time::Duration;

use relay_core::{AccessToken, VerifyToken};

use crate::forwarder::{ForwarderConfig, DEFAULT_REQUEST_TIMEOUT};

/// Provider Graph API endpoint used when `WHATSAPP_API_URL` is unset.
pub const DEFAULT_API_BASE_URL: &str = "https://graph.facebook.com/v18.0";
pub const DEFAULT_PORT: u16 = 3000;
pub const DEFAULT_HOST: &str = "0.0.0.0";
pub const DEFAULT_STATIC_DIR: &str = "public";

/// Environment variable names.
pub mod env_vars {
    pub const WHATSAPP_TOKEN: &str = "WHATSAPP_TOKEN";
    pub const VERIFY_TOKEN: &str = "VERIFY_TOKEN";
    pub const WHATSAPP_API_URL: &str = "WHATSAPP_API_URL";
    pub const PORT: &str = "PORT";
    pub const HOST: &str = "HOST";
    pub const ENFORCE_ORIGIN: &str = "ENFORCE_ORIGIN";
    pub const STATIC_DIR: &str = "STATIC_DIR";
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{0} is required")]
    Missing(&'static str),
    #[error("invalid {var}: {reason}")]
    Invalid { var: &'static str, reason: String },
}

/// Everything the relay needs to start.
#[derive(Clone, Debug)]
pub struct RelayConfig {
    pub host: String,
    pub port: u16,
    /// Provider API base, e.g. `https://graph.facebook.com/v18.0`.
    pub api_base_url: String,
    pub access_token: AccessToken,
    pub verify_token: VerifyToken,
    /// Reject browser channels whose `Origin` does not match `Host`.
    pub enforce_origin: bool,
    /// Directory of static client assets; skipped when it does not exist.
    pub static_dir: Option<PathBuf>,
    pub request_timeout: Duration,
    /// Bounded outbound queue per client connection.
    pub max_send_queue: usize,
    pub heartbeat_interval: Duration,
}

impl RelayConfig {
    /// Defaults for everything except the two required secrets.
    pub fn new(access_token: AccessToken, verify_token: VerifyToken) -> Self {
        Self {
            host: DEFAULT_HOST.into(),
            port: DEFAULT_PORT,
            api_base_url: DEFAULT_API_BASE_URL.into(),
            access_token,
            verify_token,
            enforce_origin: false,
            static_dir: Some(PathBuf::from(DEFAULT_STATIC_DIR)),
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            max_send_queue: 256,
            heartbeat_interval: Duration::from_secs(30),
        }
    }

    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary key lookup. Empty values count as unset.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let access_token =
            get(env_vars::WHATSAPP_TOKEN).ok_or(ConfigError::Missing(env_vars::WHATSAPP_TOKEN))?;
        let verify_token =
            get(env_vars::VERIFY_TOKEN).ok_or(ConfigError::Missing(env_vars::VERIFY_TOKEN))?;

        let mut config = Self::new(AccessToken::new(access_token), VerifyToken::new(verify_token));

        if let Some(url) = get(env_vars::WHATSAPP_API_URL) {
            config.api_base_url = url;
        }
        if let Some(port) = get(env_vars::PORT) {
            config.port = port.trim().parse().map_err(|e| ConfigError::Invalid {
                var: env_vars::PORT,
                reason: format!("{port:?}: {e}"),
            })?;
        }
        if let Some(host) = get(env_vars::HOST) {
            config.host = host;
        }
        if let Some(flag) = get(env_vars::ENFORCE_ORIGIN) {
            config.enforce_origin = parse_flag(env_vars::ENFORCE_ORIGIN, &flag)?;
        }
        // An explicitly empty STATIC_DIR disables asset serving.
        if let Some(dir) = lookup(env_vars::STATIC_DIR) {
            config.static_dir = if dir.trim().is_empty() {
                None
            } else {
                Some(PathBuf::from(dir))
            };
        }

        Ok(config)
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn forwarder_config(&self) -> ForwarderConfig {
        ForwarderConfig::new(self.api_base_url.clone(), self.access_token.clone())
            .with_timeout(self.request_timeout)
    }
}

fn parse_flag(var: &'static str, raw: &str) -> Result<bool, ConfigError> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        other => Err(ConfigError::Invalid {
            var,
            reason: format!("expected a boolean, got {other:?}"),
        }),
    }
}
