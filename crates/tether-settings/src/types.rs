//! Settings types.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::errors::{Result, SettingsError};

/// Root settings document.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TetherSettings {
    /// Connection, retry, and heartbeat policy.
    pub connection: ConnectionSettings,
    /// Log output.
    pub logging: LoggingSettings,
}

impl TetherSettings {
    /// Check cross-field constraints.
    pub fn validate(&self) -> Result<()> {
        self.connection.validate()
    }
}

/// Connection, retry, and heartbeat policy.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ConnectionSettings {
    /// Endpoint URL (`ws://` or `wss://`).
    pub url: String,
    /// Failed opens tolerated before entering `failed`.
    pub max_reconnect_attempts: u32,
    /// Base delay between transport reconnection attempts.
    pub reconnect_delay_ms: u64,
    /// Cap on the transport's exponential backoff.
    pub reconnect_delay_max_ms: u64,
    /// Probe cadence.
    pub heartbeat_interval_ms: u64,
    /// Per-probe acknowledgment deadline.
    pub heartbeat_timeout_ms: u64,
    /// Round-trip latency above which a warning is raised.
    pub high_latency_threshold_ms: u64,
    /// Reopen the transport when a probe times out.
    pub force_reconnect_on_timeout: bool,
    /// Outbound frame queue depth.
    pub send_buffer: usize,
}

impl Default for ConnectionSettings {
    fn default() -> Self {
        Self {
            url: "ws://127.0.0.1:8080/ws".to_string(),
            max_reconnect_attempts: 5,
            reconnect_delay_ms: 1_000,
            reconnect_delay_max_ms: 5_000,
            heartbeat_interval_ms: 30_000,
            heartbeat_timeout_ms: 5_000,
            high_latency_threshold_ms: 1_000,
            force_reconnect_on_timeout: false,
            send_buffer: 256,
        }
    }
}

impl ConnectionSettings {
    /// Probe cadence as a `Duration`.
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms)
    }

    /// Per-probe deadline as a `Duration`.
    pub fn heartbeat_timeout(&self) -> Duration {
        Duration::from_millis(self.heartbeat_timeout_ms)
    }

    /// High-latency threshold as a `Duration`.
    pub fn high_latency_threshold(&self) -> Duration {
        Duration::from_millis(self.high_latency_threshold_ms)
    }

    /// Base reconnection delay as a `Duration`.
    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }

    /// Reconnection delay cap as a `Duration`.
    pub fn reconnect_delay_max(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_max_ms)
    }

    /// Check field ranges and cross-field constraints.
    pub fn validate(&self) -> Result<()> {
        if !(self.url.starts_with("ws://") || self.url.starts_with("wss://")) {
            return Err(SettingsError::InvalidValue(format!(
                "url must start with ws:// or wss://, got `{}`",
                self.url
            )));
        }
        if self.max_reconnect_attempts == 0 {
            return Err(SettingsError::InvalidValue(
                "maxReconnectAttempts must be at least 1".into(),
            ));
        }
        if self.heartbeat_interval_ms == 0 {
            return Err(SettingsError::InvalidValue(
                "heartbeatIntervalMs must be positive".into(),
            ));
        }
        if self.heartbeat_timeout_ms >= self.heartbeat_interval_ms {
            return Err(SettingsError::InvalidValue(format!(
                "heartbeatTimeoutMs ({}) must be shorter than heartbeatIntervalMs ({})",
                self.heartbeat_timeout_ms, self.heartbeat_interval_ms
            )));
        }
        if self.reconnect_delay_max_ms < self.reconnect_delay_ms {
            return Err(SettingsError::InvalidValue(
                "reconnectDelayMaxMs must not be below reconnectDelayMs".into(),
            ));
        }
        if self.send_buffer == 0 {
            return Err(SettingsError::InvalidValue("sendBuffer must be positive".into()));
        }
        Ok(())
    }
}

/// Log output settings.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoggingSettings {
    /// `EnvFilter` directive used when `RUST_LOG` is unset.
    pub level: String,
    /// Emit one JSON object per line instead of compact text.
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
