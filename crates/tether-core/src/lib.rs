//! # tether-core
//!
//! Shared vocabulary for the Tether connection manager.
//!
//! - **Connectivity state**: [`ConnectionState`] with the five lifecycle phases
//! - **Wire envelope**: [`Envelope`] framing plus the `ping`/`pong` heartbeat contract
//! - **Event subscriptions**: [`EventRegistry`] mapping event names to ordered callbacks
//! - **Telemetry**: [`ConnectionEvent`] broadcast through an [`EventEmitter`]
//! - **Errors**: [`TetherError`] and [`TransportError`] via `thiserror`
//! - **Logging**: `tracing` subscriber setup and test capture helpers

#![deny(unsafe_code)]

pub mod errors;
pub mod events;
pub mod logging;
pub mod message;
pub mod registry;
pub mod state;

pub use errors::{TetherError, TransportError};
pub use events::{ConnectionEvent, EventEmitter};
pub use message::{Envelope, HeartbeatProbe, PING_EVENT, PONG_EVENT};
pub use registry::{EventCallback, EventRegistry, SubscriptionId};
pub use state::{ConnectionSnapshot, ConnectionState};
