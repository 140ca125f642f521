use std::path::PathBuf;

use clap::Parser;
use relay_server::RelayConfig;
use relay_telemetry::{LogFormat, TelemetryConfig};
use tracing::Level;

/// Call-signaling relay between provider webhooks and WebSocket clients.
///
/// Secrets and the provider URL come from the environment
/// (`WHATSAPP_TOKEN`, `VERIFY_TOKEN`, `WHATSAPP_API_URL`); flags override
/// the listener settings.
#[derive(Parser, Debug)]
#[command(name = "call-relay", version)]
pub struct Cli {
    /// Port to bind (overrides PORT).
    #[arg(long)]
    pub port: Option<u16>,

    /// Host to bind (overrides HOST).
    #[arg(long)]
    pub host: Option<String>,

    /// Directory of static client assets (overrides STATIC_DIR).
    #[arg(long)]
    pub static_dir: Option<PathBuf>,

    /// Close browser channels whose Origin does not match Host.
    #[arg(long)]
    pub enforce_origin: bool,

    /// Default log level; RUST_LOG takes precedence.
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    pub log_level: Level,

    /// Log output format: pretty or json.
    #[arg(long, env = "LOG_FORMAT", default_value = "pretty")]
    pub log_format: LogFormat,
}

impl Cli {
    /// Layer command-line overrides onto the environment config.
    pub fn apply(&self, config: &mut RelayConfig) {
        if let Some(port) = self.port {
            config.port = port;
        }
        if let Some(host) = &self.host {
            config.host.clone_from(host);
        }
        if let Some(dir) = &self.static_dir {
            config.static_dir = Some(dir.clone());
        }
        if self.enforce_origin {
            config.enforce_origin = true;
        }
    }

    pub fn telemetry_config(&self) -> TelemetryConfig {
        TelemetryConfig {
            log_level: self.log_level,
            format: self.log_format,
            ..TelemetryConfig::default()
        }
    }
}
