//! Server configuration.

use std::time::Duration;

use consult_settings::ConsultSettings;
use serde::{Deserialize, Serialize};

use crate::websocket::supervisor::LivenessTiming;

/// Runtime configuration for [`ConsultServer`](crate::server::ConsultServer),
/// flattened from [`ConsultSettings`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Host to bind.
    pub host: String,
    /// Port to bind (`0` for auto-assign).
    pub port: u16,
    /// Maximum concurrent observer connections.
    pub max_connections: usize,
    /// Max inbound WebSocket message size in bytes.
    pub max_message_size: usize,
    /// Heartbeat interval in seconds.
    pub heartbeat_interval_secs: u64,
    /// Stale-connection sweep interval in seconds.
    pub cleanup_interval_secs: u64,
    /// Idle seconds before a connection is evicted.
    pub heartbeat_timeout_secs: u64,
    /// Per-send timeout in milliseconds.
    pub send_timeout_ms: u64,
    /// Sends in flight across all fan-outs.
    pub max_concurrent_sends: usize,
    /// Per-connection outbound queue length.
    pub queue_capacity: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self::from(&ConsultSettings::default())
    }
}

impl From<&ConsultSettings> for ServerConfig {
    fn from(settings: &ConsultSettings) -> Self {
        Self {
            host: settings.server.host.clone(),
            port: settings.server.port,
            max_connections: settings.server.max_connections,
            max_message_size: settings.server.max_message_size,
            heartbeat_interval_secs: settings.liveness.heartbeat_interval_secs,
            cleanup_interval_secs: settings.liveness.cleanup_interval_secs,
            heartbeat_timeout_secs: settings.liveness.timeout_secs,
            send_timeout_ms: settings.delivery.send_timeout_ms,
            max_concurrent_sends: settings.delivery.max_concurrent_sends,
            queue_capacity: settings.delivery.queue_capacity,
        }
    }
}

impl ServerConfig {
    /// `host:port` for binding.
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Per-send timeout.
    pub fn send_timeout(&self) -> Duration {
        Duration::from_millis(self.send_timeout_ms)
    }

    /// Supervisor loop timing.
    pub fn liveness_timing(&self) -> LivenessTiming {
        LivenessTiming {
            heartbeat_interval: Duration::from_secs(self.heartbeat_interval_secs),
            cleanup_interval: Duration::from_secs(self.cleanup_interval_secs),
            timeout: Duration::from_secs(self.heartbeat_timeout_secs),
        }
    }
}
