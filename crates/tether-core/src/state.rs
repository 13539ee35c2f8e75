//! Connectivity state of the managed channel.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Lifecycle phase of the managed connection.
///
/// Exactly one value holds at any time. `Failed` is terminal: nothing
/// leaves it except an explicit `connect()` from a collaborator.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    /// No transport, no automatic reconnection.
    #[default]
    Disconnected,
    /// First open of a fresh connection is in flight.
    Connecting,
    /// Transport is open and the heartbeat monitor is running.
    Connected,
    /// Transport dropped unsolicited; the transport's retry loop is active.
    Reconnecting,
    /// Retry budget exhausted.
    Failed,
}

impl ConnectionState {
    /// Wire/log name.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Reconnecting => "reconnecting",
            Self::Failed => "failed",
        }
    }

    /// Whether an open is in flight (first attempt or retry).
    #[must_use]
    pub fn is_opening(self) -> bool {
        matches!(self, Self::Connecting | Self::Reconnecting)
    }

    /// Whether no automatic transition can leave this state.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Disconnected | Self::Failed)
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Point-in-time view of the connection handle's attributes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionSnapshot {
    /// Current connectivity state.
    pub state: ConnectionState,
    /// Consecutive failed attempts since the last successful open.
    pub attempts: u32,
    /// Whether a transport link is currently held.
    pub has_transport: bool,
    /// Whether the heartbeat monitor is running.
    pub heartbeat_running: bool,
}
