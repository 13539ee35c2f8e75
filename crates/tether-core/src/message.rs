//! Wire envelope and heartbeat contract.
//!
//! Every frame is a JSON text message `{"event": "...", "payload": ...}`.
//! The payload is optional and defaults to `null`.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::errors::TransportError;

/// Heartbeat probe event name.
pub const PING_EVENT: &str = "ping";
/// Heartbeat acknowledgment event name.
pub const PONG_EVENT: &str = "pong";

/// A named event with a JSON payload.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    /// Event name.
    pub event: String,
    /// Event payload.
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub payload: Value,
}

impl Envelope {
    /// Build an envelope.
    pub fn new(event: impl Into<String>, payload: Value) -> Self {
        Self {
            event: event.into(),
            payload,
        }
    }

    /// Encode as a text frame.
    pub fn encode(&self) -> Result<String, TransportError> {
        Ok(serde_json::to_string(self)?)
    }

    /// Decode a text frame.
    pub fn decode(text: &str) -> Result<Self, TransportError> {
        Ok(serde_json::from_str(text)?)
    }

    /// Whether this is a heartbeat acknowledgment.
    #[must_use]
    pub fn is_pong(&self) -> bool {
        self.event == PONG_EVENT
    }

    /// Whether this is a heartbeat probe.
    #[must_use]
    pub fn is_ping(&self) -> bool {
        self.event == PING_EVENT
    }
}

/// Payload of a `ping` probe.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeartbeatProbe {
    /// Milliseconds since the Unix epoch when the probe was sent.
    pub timestamp: i64,
}

impl HeartbeatProbe {
    /// A probe stamped with the current wall-clock time.
    #[must_use]
    pub fn now() -> Self {
        Self {
            timestamp: chrono::Utc::now().timestamp_millis(),
        }
    }

    /// Convert to a `ping` envelope.
    #[must_use]
    pub fn into_envelope(self) -> Envelope {
        Envelope::new(PING_EVENT, serde_json::json!({ "timestamp": self.timestamp }))
    }
}
