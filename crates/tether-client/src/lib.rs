//! # tether-client
//!
//! Persistent real-time connection with automatic reconnection.
//!
//! - **Supervisor**: [`ConnectionSupervisor`] spawns the actor that owns the
//!   connection; collaborators use a cloneable [`ConnectionHandle`]
//! - **Lifecycle**: pure connectivity state machine behind the actor
//! - **Heartbeat**: `ping`/`pong` probes with per-probe timeout
//! - **Transport**: [`Transport`] boundary plus the WebSocket implementation
//!   with bounded, backed-off retries
//! - **Mock**: scriptable in-memory transport for tests

#![deny(unsafe_code)]

pub mod heartbeat;
pub mod lifecycle;
pub mod mock;
pub mod supervisor;
pub mod telemetry;
pub mod transport;

pub use heartbeat::{HeartbeatConfig, HeartbeatMonitor, HeartbeatSignal};
pub use lifecycle::{Effect, Input, Lifecycle, Transition};
pub use supervisor::{ConnectionHandle, ConnectionSupervisor, SupervisorConfig};
pub use transport::{
    Transport, TransportLink, TransportNotification, TransportOptions, TransportSender, WsTransport,
};
