use std::sync::Arc;
use std::time::Duration;

use crate::config::Config;
use crate::ws::registry::ConnectionRegistry;

/// Per-connection timing knobs, copied out of [`Config`].
#[derive(Debug, Clone, Copy)]
pub struct SessionLimits {
    pub handshake_timeout: Duration,
    /// `None` disables keepalive pings.
    pub ping_interval: Option<Duration>,
    pub pong_timeout: Duration,
    pub max_frame_bytes: usize,
}

impl From<&Config> for SessionLimits {
    fn from(config: &Config) -> Self {
        Self {
            handshake_timeout: config.handshake_timeout(),
            ping_interval: config.ping_interval(),
            pong_timeout: config.pong_timeout(),
            max_frame_bytes: config.max_frame_bytes,
        }
    }
}

/// Shared application state passed to all handlers via axum State extractor.
#[derive(Clone)]
pub struct AppState {
    /// Who is online; the only process-wide mutable state
    pub registry: Arc<ConnectionRegistry>,
    pub limits: SessionLimits,
}

impl AppState {
    pub fn new(config: &Config) -> Self {
        Self {
            registry: Arc::new(ConnectionRegistry::new(config.name_policy)),
            limits: SessionLimits::from(config),
        }
    }
}
