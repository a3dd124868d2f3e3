use clap::Parser;
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// How the registry treats display names offered in `init`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum NamePolicy {
    /// Any name is accepted, duplicates included.
    #[default]
    Open,
    /// Blank names and names already online are rejected and the client
    /// may retry its handshake.
    Unique,
}

/// Real-time chat relay server
///
/// Flags are optional so that only the ones actually passed override the
/// TOML file and `RELAY_*` environment variables.
#[derive(Parser, Serialize, Clone, Debug, Default)]
#[command(name = "relay-server", version, about = "Real-time chat relay server")]
pub struct Cli {
    /// Path to TOML config file
    #[arg(long, env = "RELAY_CONFIG", default_value = "./relay.toml")]
    #[serde(skip)]
    pub config: PathBuf,

    /// Output a commented TOML config template and exit
    #[arg(long)]
    #[serde(skip)]
    pub generate_config: bool,

    /// Port to listen on
    #[arg(long)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,

    /// Bind address
    #[arg(long)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bind_address: Option<String>,

    /// Enable structured JSON logging
    #[arg(long)]
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub json_logs: bool,

    /// Display-name policy for handshakes
    #[arg(long, value_enum)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name_policy: Option<NamePolicy>,

    /// Seconds a new connection has to send its `init` record
    #[arg(long)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub handshake_timeout_secs: Option<u64>,

    /// Seconds between server pings (0 disables keepalive)
    #[arg(long)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ping_interval_secs: Option<u64>,

    /// Seconds to wait for a pong before closing the connection
    #[arg(long)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pong_timeout_secs: Option<u64>,

    /// Largest inbound WebSocket frame accepted, in bytes
    #[arg(long)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_frame_bytes: Option<usize>,

    /// Seconds to wait for online sessions to end after shutdown
    #[arg(long)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub drain_timeout_secs: Option<u64>,
}

/// Effective server configuration after all layers are merged.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub port: u16,
    pub bind_address: String,
    pub json_logs: bool,
    pub name_policy: NamePolicy,
    pub handshake_timeout_secs: u64,
    pub ping_interval_secs: u64,
    pub pong_timeout_secs: u64,
    pub max_frame_bytes: usize,
    pub drain_timeout_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: 34999,
            bind_address: "0.0.0.0".to_string(),
            json_logs: false,
            name_policy: NamePolicy::Open,
            handshake_timeout_secs: 30,
            ping_interval_secs: 30,
            pong_timeout_secs: 10,
            max_frame_bytes: 64 * 1024,
            drain_timeout_secs: 0,
        }
    }
}

impl Config {
    /// Layered sources, lowest precedence first:
    /// built-in defaults < TOML file < env vars (RELAY_*) < CLI flags
    pub fn figment(cli: &Cli) -> Figment {
        Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Toml::file(&cli.config))
            .merge(Env::prefixed("RELAY_"))
            .merge(Serialized::defaults(cli))
    }

    pub fn load(cli: &Cli) -> Result<Self, figment::Error> {
        Self::figment(cli).extract()
    }

    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_secs(self.handshake_timeout_secs)
    }

    /// `None` when keepalive pings are disabled.
    pub fn ping_interval(&self) -> Option<Duration> {
        (self.ping_interval_secs > 0).then(|| Duration::from_secs(self.ping_interval_secs))
    }

    pub fn pong_timeout(&self) -> Duration {
        Duration::from_secs(self.pong_timeout_secs)
    }

    pub fn drain_timeout(&self) -> Duration {
        Duration::from_secs(self.drain_timeout_secs)
    }
}

/// Generate a commented TOML config template
pub fn generate_config_template() -> String {
    r#"# Relay Server Configuration
# Place this file at ./relay.toml or specify with --config <path>
# All settings can be overridden via environment variables (RELAY_PORT, etc.)
# or CLI flags (--port, etc.)

# Server port (default: 34999)
# port = 34999

# Bind address (default: 0.0.0.0, all interfaces)
# bind_address = "0.0.0.0"

# Enable structured JSON logging
# json_logs = false

# Display-name policy: "open" (duplicates allowed) or "unique"
# Under "unique", blank or already-online names are rejected with
# empty_username / duplicate_username and the client may retry.
# name_policy = "open"

# Seconds a new connection has to send its init record
# handshake_timeout_secs = 30

# Keepalive: seconds between server pings (0 disables) and how long to
# wait for the matching pong before dropping the connection
# ping_interval_secs = 30
# pong_timeout_secs = 10

# Largest inbound WebSocket frame in bytes
# max_frame_bytes = 65536

# Seconds to wait for online sessions to finish after shutdown (0 = exit at once)
# drain_timeout_secs = 0
"#
    .to_string()
}
