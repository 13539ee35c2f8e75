//! Transport boundary.
//!
//! A [`Transport`] opens a [`TransportLink`]: an outbound [`TransportSender`],
//! an inbound stream of [`TransportNotification`]s, and a close switch. The
//! transport owns its own reconnection loop; the supervisor only observes
//! `Open`/`Close`/`Error` and decides when to give up.

pub mod backoff;
pub mod websocket;

use std::time::Duration;

use serde_json::Value;
use tether_core::{Envelope, TransportError};
use tether_settings::ConnectionSettings;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::telemetry;

pub use websocket::WsTransport;

/// Options passed to [`Transport::open`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TransportOptions {
    /// Whether the transport retries after a failed open or a drop.
    pub reconnection: bool,
    /// Consecutive failed opens before the transport gives up.
    pub reconnection_attempts: u32,
    /// Base delay between attempts.
    pub reconnection_delay: Duration,
    /// Cap for the exponential backoff.
    pub reconnection_delay_max: Duration,
    /// Outbound queue depth.
    pub send_buffer: usize,
}

impl Default for TransportOptions {
    fn default() -> Self {
        Self::from_settings(&ConnectionSettings::default())
    }
}

impl TransportOptions {
    /// Derive transport options from connection settings.
    pub fn from_settings(settings: &ConnectionSettings) -> Self {
        Self {
            reconnection: true,
            reconnection_attempts: settings.max_reconnect_attempts,
            reconnection_delay: settings.reconnect_delay(),
            reconnection_delay_max: settings.reconnect_delay_max(),
            send_buffer: settings.send_buffer,
        }
    }
}

/// Notification from a transport to its owner.
#[derive(Clone, Debug, PartialEq)]
pub enum TransportNotification {
    /// The channel is open (first time or after a retry).
    Open,
    /// The channel dropped. The transport may retry.
    Close {
        /// Human-readable cause.
        reason: String,
    },
    /// An open attempt or the channel failed.
    Error {
        /// What went wrong.
        error: TransportError,
    },
    /// An inbound event.
    Message {
        /// Event name.
        event: String,
        /// Event payload.
        payload: Value,
    },
}

/// Fire-and-forget outbound half of a link.
#[derive(Clone, Debug)]
pub struct TransportSender {
    tx: mpsc::Sender<Envelope>,
}

impl TransportSender {
    /// Wrap an outbound queue.
    pub fn new(tx: mpsc::Sender<Envelope>) -> Self {
        Self { tx }
    }

    /// Queue an event for sending.
    ///
    /// Returns `false` and drops the frame if the queue is full or the link
    /// is gone.
    pub fn send(&self, event: &str, payload: Value) -> bool {
        if self.tx.try_send(Envelope::new(event, payload)).is_ok() {
            metrics::counter!(telemetry::MESSAGES_SENT_TOTAL).increment(1);
            true
        } else {
            metrics::counter!(telemetry::MESSAGES_DROPPED_TOTAL).increment(1);
            debug!(event, "outbound frame dropped");
            false
        }
    }

    /// Whether the receiving side is gone.
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// One opened transport. Dropping it closes the transport.
#[derive(Debug)]
pub struct TransportLink {
    sender: TransportSender,
    notifications: mpsc::Receiver<TransportNotification>,
    cancel: CancellationToken,
}

impl TransportLink {
    /// Assemble a link from its parts.
    pub fn new(
        sender: TransportSender,
        notifications: mpsc::Receiver<TransportNotification>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            sender,
            notifications,
            cancel,
        }
    }

    /// Outbound half.
    pub fn sender(&self) -> &TransportSender {
        &self.sender
    }

    /// Next notification, or `None` once the transport has stopped.
    pub async fn next_notification(&mut self) -> Option<TransportNotification> {
        self.notifications.recv().await
    }

    /// Close the transport and stop its retry loop.
    pub fn close(&self) {
        self.cancel.cancel();
    }

    /// Whether [`close`](Self::close) was called or the link was dropped.
    pub fn is_closed(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

impl Drop for TransportLink {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// A full-duplex event channel factory.
pub trait Transport: Send + Sync + 'static {
    /// Start opening `url`. Must not block: the result arrives as an
    /// `Open` or `Error` notification on the returned link.
    fn open(&self, url: &str, options: &TransportOptions) -> TransportLink;
}
