//! WebSocket transport over `tokio-tungstenite`.
//!
//! Each [`Transport::open`] spawns one driver task that owns the socket for
//! the lifetime of the link. The driver:
//! - connects, reports `Open`, then pumps frames both ways;
//! - on a failed connect reports `Error`, on a drop reports `Close`;
//! - reports an undecodable inbound frame as a protocol `Error` and keeps
//!   the socket open;
//! - retries with [`backoff_delay`] until `reconnection_attempts`
//!   consecutive failures, then ends the notification stream;
//! - closes the socket immediately if the link was closed while a connect
//!   was in flight.

use futures::{SinkExt, StreamExt};
use tether_core::{Envelope, TransportError};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, info, info_span, warn};

use super::backoff::backoff_delay;
use super::{Transport, TransportLink, TransportNotification, TransportOptions, TransportSender};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Notification queue depth between the driver and the link owner.
const NOTIFICATION_BUFFER: usize = 256;

/// WebSocket implementation of [`Transport`].
#[derive(Clone, Copy, Debug, Default)]
pub struct WsTransport;

impl WsTransport {
    /// Create a WebSocket transport.
    pub fn new() -> Self {
        Self
    }
}

impl Transport for WsTransport {
    fn open(&self, url: &str, options: &TransportOptions) -> TransportLink {
        let (out_tx, out_rx) = mpsc::channel(options.send_buffer.max(1));
        let (note_tx, note_rx) = mpsc::channel(NOTIFICATION_BUFFER);
        let cancel = CancellationToken::new();

        let driver = Driver {
            url: url.to_owned(),
            options: options.clone(),
            outbound: out_rx,
            notify: note_tx,
            cancel: cancel.clone(),
        };
        let span = info_span!("ws_transport", url = %url);
        drop(tokio::spawn(driver.run().instrument(span)));

        TransportLink::new(TransportSender::new(out_tx), note_rx, cancel)
    }
}

/// Why a frame pump stopped.
enum PumpExit {
    /// The link owner closed or dropped the link.
    Cancelled,
    /// The connection dropped underneath us.
    Dropped(String),
}

struct Driver {
    url: String,
    options: TransportOptions,
    outbound: mpsc::Receiver<Envelope>,
    notify: mpsc::Sender<TransportNotification>,
    cancel: CancellationToken,
}

impl Driver {
    async fn run(mut self) {
        let mut failures: u32 = 0;
        let mut retry: u32 = 0;

        loop {
            let attempt = tokio::select! {
                () = self.cancel.cancelled() => return,
                res = connect_async(self.url.as_str()) => res,
            };

            match attempt {
                Ok((mut ws, _response)) => {
                    if self.cancel.is_cancelled() {
                        debug!("link closed during connect, closing socket");
                        let _ = ws.close(None).await;
                        return;
                    }
                    failures = 0;
                    retry = 0;
                    info!("websocket open");
                    if !self.report(TransportNotification::Open).await {
                        let _ = ws.close(None).await;
                        return;
                    }
                    match self.pump(ws).await {
                        PumpExit::Cancelled => return,
                        PumpExit::Dropped(reason) => {
                            warn!(%reason, "websocket dropped");
                            self.drain_outbound();
                            if !self.report(TransportNotification::Close { reason }).await {
                                return;
                            }
                        }
                    }
                }
                Err(e) => {
                    failures += 1;
                    warn!(error = %e, failures, "websocket connect failed");
                    let error = TransportError::Connect(e.to_string());
                    if !self.report(TransportNotification::Error { error }).await {
                        return;
                    }
                }
            }

            if !self.options.reconnection || failures >= self.options.reconnection_attempts {
                debug!(failures, "transport retry budget spent, stopping");
                return;
            }

            let delay = backoff_delay(
                retry,
                self.options.reconnection_delay,
                self.options.reconnection_delay_max,
            );
            retry = retry.saturating_add(1);
            let delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX);
            debug!(delay_ms, retry, "reconnecting after delay");
            tokio::select! {
                () = self.cancel.cancelled() => return,
                () = tokio::time::sleep(delay) => {}
            }
        }
    }

    /// Forward a notification. Returns `false` if the owner is gone.
    async fn report(&self, notification: TransportNotification) -> bool {
        if self.cancel.is_cancelled() {
            return false;
        }
        self.notify.send(notification).await.is_ok()
    }

    /// Discard frames queued while the socket was down.
    fn drain_outbound(&mut self) {
        let mut dropped = 0_u32;
        while self.outbound.try_recv().is_ok() {
            dropped += 1;
        }
        if dropped > 0 {
            debug!(dropped, "discarded frames queued before drop");
        }
    }

    async fn pump(&mut self, ws: WsStream) -> PumpExit {
        let (mut sink, mut stream) = ws.split();

        loop {
            tokio::select! {
                () = self.cancel.cancelled() => {
                    let _ = sink.send(Message::Close(None)).await;
                    return PumpExit::Cancelled;
                }
                out = self.outbound.recv() => {
                    let Some(envelope) = out else {
                        let _ = sink.send(Message::Close(None)).await;
                        return PumpExit::Cancelled;
                    };
                    match envelope.encode() {
                        Ok(text) => {
                            if let Err(e) = sink.send(Message::Text(text.into())).await {
                                return PumpExit::Dropped(e.to_string());
                            }
                        }
                        Err(e) => warn!(event = %envelope.event, error = %e, "failed to encode frame"),
                    }
                }
                frame = stream.next() => match frame {
                    Some(Ok(Message::Text(text))) => match Envelope::decode(text.as_str()) {
                        Ok(envelope) => {
                            let note = TransportNotification::Message {
                                event: envelope.event,
                                payload: envelope.payload,
                            };
                            if !self.report(note).await {
                                return PumpExit::Cancelled;
                            }
                        }
                        Err(e) => {
                            debug!(error = %e, len = text.len(), "undecodable frame");
                            let error = TransportError::Protocol(format!("undecodable frame: {e}"));
                            if !self.report(TransportNotification::Error { error }).await {
                                return PumpExit::Cancelled;
                            }
                        }
                    },
                    Some(Ok(Message::Close(frame))) => {
                        let reason = frame.map_or_else(
                            || "closed by peer".to_string(),
                            |f| format!("closed by peer ({}): {}", u16::from(f.code), f.reason.as_str()),
                        );
                        return PumpExit::Dropped(reason);
                    }
                    // Protocol pings are answered by tungstenite while the stream is polled.
                    Some(Ok(_)) => {}
                    Some(Err(e)) => return PumpExit::Dropped(e.to_string()),
                    None => return PumpExit::Dropped("stream ended".to_string()),
                },
            }
        }
    }
}
