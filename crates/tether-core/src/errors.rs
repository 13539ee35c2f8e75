//! Error types.
//!
//! - [`TransportError`]: failures reported by a transport through its
//!   `error` notification. Never returned from public connection operations.
//! - [`TetherError`]: umbrella error for setup paths (invalid endpoint or
//!   policy, supervisor gone) used by composition roots.

use thiserror::Error;

/// Failure reported by a transport.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum TransportError {
    /// The connection attempt failed (DNS, TCP, TLS, handshake).
    #[error("connect failed: {0}")]
    Connect(String),

    /// The peer sent a frame that is not a valid envelope.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// A frame could not be encoded or decoded.
    #[error("codec error: {0}")]
    Codec(String),
}

impl From<serde_json::Error> for TransportError {
    fn from(e: serde_json::Error) -> Self {
        Self::Codec(e.to_string())
    }
}

/// Top-level error for setting up a connection manager.
#[derive(Debug, Error)]
pub enum TetherError {
    /// The configured endpoint is not usable.
    #[error("invalid endpoint `{url}`: {reason}")]
    InvalidEndpoint {
        /// The endpoint as configured.
        url: String,
        /// Why it was rejected.
        reason: String,
    },

    /// Heartbeat or retry policy values that cannot be scheduled.
    #[error("invalid connection policy: {0}")]
    InvalidConfig(String),

    /// The supervisor task has exited.
    #[error("connection supervisor is not running")]
    SupervisorGone,
}

/// Result alias for setup operations.
pub type Result<T> = std::result::Result<T, TetherError>;

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn connect_error_display() {
        let err = TransportError::Connect("refused".into());
        assert_eq!(err.to_string(), "connect failed: refused");
    }

    #[test]
    fn json_error_maps_to_codec() {
        let json_err = serde_json::from_str::<serde_json::Value>("{bad").unwrap_err();
        let err: TransportError = json_err.into();
        assert_matches!(err, TransportError::Codec(_));
    }

    #[test]
    fn protocol_error_display() {
        let err = TransportError::Protocol("undecodable frame".into());
        assert_eq!(err.to_string(), "protocol error: undecodable frame");
    }

    #[test]
    fn invalid_endpoint_display() {
        let err = TetherError::InvalidEndpoint {
            url: "http://x".into(),
            reason: "scheme must be ws or wss".into(),
        };
        assert!(err.to_string().contains("http://x"));
        assert!(err.to_string().contains("scheme"));
    }

    #[test]
    fn invalid_config_display() {
        let err = TetherError::InvalidConfig("heartbeat interval must be positive".into());
        assert_eq!(
            err.to_string(),
            "invalid connection policy: heartbeat interval must be positive"
        );
    }
}
