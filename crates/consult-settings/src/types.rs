//! Settings schema.
//!
//! Every struct uses `#[serde(default)]` so a settings file only needs the
//! keys it overrides.

use serde::{Deserialize, Serialize};

use crate::errors::{Result, SettingsError};

/// Root settings object.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ConsultSettings {
    /// Network listener settings.
    pub server: ServerSettings,
    /// Heartbeat and eviction timing.
    pub liveness: LivenessSettings,
    /// Outbound delivery limits.
    pub delivery: DeliverySettings,
    /// Log output.
    pub logging: LoggingSettings,
}

impl ConsultSettings {
    /// Reject values that would make the server misbehave.
    pub fn validate(&self) -> Result<()> {
        let live = &self.liveness;
        if live.heartbeat_interval_secs == 0 || live.cleanup_interval_secs == 0 {
            return Err(SettingsError::InvalidValue(
                "liveness intervals must be greater than zero".into(),
            ));
        }
        if live.timeout_secs < live.heartbeat_interval_secs {
            return Err(SettingsError::InvalidValue(format!(
                "liveness timeout ({}s) is shorter than the heartbeat interval ({}s)",
                live.timeout_secs, live.heartbeat_interval_secs
            )));
        }
        let delivery = &self.delivery;
        if delivery.send_timeout_ms == 0
            || delivery.max_concurrent_sends == 0
            || delivery.queue_capacity == 0
        {
            return Err(SettingsError::InvalidValue(
                "delivery limits must be greater than zero".into(),
            ));
        }
        if self.server.max_connections == 0 {
            return Err(SettingsError::InvalidValue(
                "server.maxConnections must be greater than zero".into(),
            ));
        }
        Ok(())
    }
}

/// Listener settings.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServerSettings {
    /// Bind address.
    pub host: String,
    /// Bind port; `0` picks a free port.
    pub port: u16,
    /// Maximum simultaneous observer connections.
    pub max_connections: usize,
    /// Maximum inbound WebSocket frame size in bytes.
    pub max_message_size: usize,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8000,
            max_connections: 1_000,
            max_message_size: 1024 * 1024,
        }
    }
}

/// Heartbeat and stale-connection eviction timing.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LivenessSettings {
    /// Seconds between heartbeat broadcasts.
    pub heartbeat_interval_secs: u64,
    /// Seconds between stale-connection sweeps.
    pub cleanup_interval_secs: u64,
    /// Idle seconds after which a connection is evicted (three missed
    /// heartbeats by default).
    pub timeout_secs: u64,
}

impl Default for LivenessSettings {
    fn default() -> Self {
        Self {
            heartbeat_interval_secs: 30,
            cleanup_interval_secs: 60,
            timeout_secs: 90,
        }
    }
}

/// Outbound delivery limits.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DeliverySettings {
    /// Upper bound on one send to one connection, in milliseconds.
    pub send_timeout_ms: u64,
    /// Upper bound on sends in flight across all fan-outs.
    pub max_concurrent_sends: usize,
    /// Per-connection outbound queue length.
    pub queue_capacity: usize,
}

impl Default for DeliverySettings {
    fn default() -> Self {
        Self {
            send_timeout_ms: 5_000,
            max_concurrent_sends: 64,
            queue_capacity: 256,
        }
    }
}

/// Log output settings.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoggingSettings {
    /// `tracing` filter directive, e.g. `info` or `consult_server=debug`.
    pub level: String,
    /// Emit JSON lines instead of compact text.
    pub json: bool,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}
