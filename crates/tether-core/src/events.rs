//! Connection telemetry events and their broadcast emitter.

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::state::ConnectionState;

/// Default broadcast channel capacity.
const DEFAULT_CAPACITY: usize = 256;

/// Observable signal about the managed connection.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ConnectionEvent {
    /// Connectivity state transition.
    StateChanged {
        /// Previous state.
        from: ConnectionState,
        /// New state.
        to: ConnectionState,
    },
    /// A `ping` probe was sent.
    HeartbeatSent {
        /// Probe send time, ms since epoch.
        timestamp: i64,
    },
    /// A `pong` acknowledged the pending probe.
    HeartbeatAcknowledged {
        /// Round-trip latency.
        latency_ms: u64,
    },
    /// Acknowledged, but slower than the high-latency threshold.
    HighLatency {
        /// Round-trip latency.
        latency_ms: u64,
    },
    /// A new cycle began while the previous probe was still unacknowledged.
    StaleConnection,
    /// The per-probe timeout expired without a `pong`.
    HeartbeatTimeout,
    /// The retry budget was exhausted.
    RetryExhausted {
        /// Attempts made.
        attempts: u32,
    },
}

/// Broadcast-based event emitter.
///
/// Non-blocking: `emit` never awaits. Slow receivers are lagged rather than
/// blocking the sender.
pub struct EventEmitter {
    tx: broadcast::Sender<ConnectionEvent>,
}

impl EventEmitter {
    /// Create a new emitter with the default channel capacity.
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    /// Create a new emitter with a custom channel capacity.
    pub fn with_capacity(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    /// Emit to all subscribers. Returns the number of receivers reached.
    pub fn emit(&self, event: ConnectionEvent) -> usize {
        self.tx.send(event).unwrap_or(0)
    }

    /// Receive every event emitted after this call.
    pub fn subscribe(&self) -> broadcast::Receiver<ConnectionEvent> {
        self.tx.subscribe()
    }
}

impl Default for EventEmitter {
    fn default() -> Self {
        Self::new()
    }
}
