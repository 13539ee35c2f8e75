//! Metric names recorded through the `metrics` facade.
//!
//! Nothing is recorded unless the embedding process installs a recorder.

/// Successful opens (counter).
pub const CONNECTS_TOTAL: &str = "tether_connects_total";
/// Failed open attempts (counter).
pub const RECONNECT_ATTEMPTS_TOTAL: &str = "tether_reconnect_attempts_total";
/// Transitions into `failed` (counter).
pub const RETRY_EXHAUSTED_TOTAL: &str = "tether_retry_exhausted_total";
/// Probes that expired without a `pong` (counter).
pub const HEARTBEAT_TIMEOUTS_TOTAL: &str = "tether_heartbeat_timeouts_total";
/// Probe round-trip latency in milliseconds (histogram).
pub const HEARTBEAT_LATENCY_MS: &str = "tether_heartbeat_latency_ms";
/// Frames queued for sending (counter).
pub const MESSAGES_SENT_TOTAL: &str = "tether_messages_sent_total";
/// Frames dropped: not connected or queue full (counter).
pub const MESSAGES_DROPPED_TOTAL: &str = "tether_messages_dropped_total";
