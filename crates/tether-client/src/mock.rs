//! Scriptable in-memory transport.
//!
//! [`MockTransport`] records every `open` and hands the test a [`MockLink`]
//! controller per link. The test drives notifications (`open`, `close`,
//! `error`, `message`, `end`) and inspects what the supervisor sent.

use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::Value;
use tether_core::{Envelope, TransportError};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::transport::{Transport, TransportLink, TransportNotification, TransportOptions, TransportSender};

const NOTIFICATION_BUFFER: usize = 64;

/// Transport that opens scripted links.
#[derive(Clone, Debug, Default)]
pub struct MockTransport {
    links: Arc<Mutex<Vec<MockLink>>>,
}

impl MockTransport {
    /// Create a transport with no links.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of `open` calls so far.
    pub fn open_count(&self) -> usize {
        self.links.lock().len()
    }

    /// Controller for the `index`-th opened link.
    pub fn link(&self, index: usize) -> Option<MockLink> {
        self.links.lock().get(index).cloned()
    }

    /// Controller for the most recently opened link.
    pub fn last_link(&self) -> Option<MockLink> {
        self.links.lock().last().cloned()
    }
}

impl Transport for MockTransport {
    fn open(&self, url: &str, options: &TransportOptions) -> TransportLink {
        let (out_tx, out_rx) = mpsc::channel(options.send_buffer.max(1));
        let (note_tx, note_rx) = mpsc::channel(NOTIFICATION_BUFFER);
        let cancel = CancellationToken::new();

        self.links.lock().push(MockLink {
            url: url.to_owned(),
            notify: Arc::new(Mutex::new(Some(note_tx))),
            outbound: Arc::new(Mutex::new(out_rx)),
            cancel: cancel.clone(),
        });
        TransportLink::new(TransportSender::new(out_tx), note_rx, cancel)
    }
}

/// Test-side controller of one opened link.
#[derive(Clone, Debug)]
pub struct MockLink {
    url: String,
    notify: Arc<Mutex<Option<mpsc::Sender<TransportNotification>>>>,
    outbound: Arc<Mutex<mpsc::Receiver<Envelope>>>,
    cancel: CancellationToken,
}

impl MockLink {
    /// URL passed to `open`.
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Report `open`. Returns `false` if the owner dropped the link.
    pub fn open(&self) -> bool {
        self.notify(TransportNotification::Open)
    }

    /// Report an unsolicited `close`.
    pub fn close(&self, reason: &str) -> bool {
        self.notify(TransportNotification::Close {
            reason: reason.to_owned(),
        })
    }

    /// Report a failed open attempt.
    pub fn error(&self, message: &str) -> bool {
        self.notify(TransportNotification::Error {
            error: TransportError::Connect(message.to_owned()),
        })
    }

    /// Deliver an inbound event.
    pub fn message(&self, event: &str, payload: Value) -> bool {
        self.notify(TransportNotification::Message {
            event: event.to_owned(),
            payload,
        })
    }

    /// End the notification stream, as a transport that gave up.
    pub fn end(&self) {
        drop(self.notify.lock().take());
    }

    /// Whether the owner closed or dropped the link.
    pub fn is_closed(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Frames sent through the link since the last call.
    pub fn take_sent(&self) -> Vec<Envelope> {
        let mut outbound = self.outbound.lock();
        let mut sent = Vec::new();
        while let Ok(envelope) = outbound.try_recv() {
            sent.push(envelope);
        }
        sent
    }

    fn notify(&self, notification: TransportNotification) -> bool {
        self.notify
            .lock()
            .as_ref()
            .is_some_and(|tx| tx.try_send(notification).is_ok())
    }
}
