//! Application-level heartbeat (ping/pong liveness monitoring).
//!
//! While running, a probe cycle sends `ping {timestamp}` every `interval`
//! and arms a per-probe `timeout`. At most one probe is outstanding. A
//! missing `pong` is a warning, never a disconnect: the monitor reports
//! [`HeartbeatSignal::TimedOut`] and leaves policy to its owner.
//!
//! Each [`HeartbeatMonitor::start`] spawns a fresh cycle task guarded by its
//! own `CancellationToken`. [`HeartbeatMonitor::stop`] cancels under the
//! same lock the cycle takes before acting, so nothing fires after `stop`.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tether_core::{ConnectionEvent, EventEmitter, HeartbeatProbe, PING_EVENT};
use tether_settings::ConnectionSettings;
use tokio::sync::mpsc;
use tokio::time::{self, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::telemetry;
use crate::transport::TransportSender;

/// Probe cadence and thresholds.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct HeartbeatConfig {
    /// Time between probes.
    pub interval: Duration,
    /// Per-probe acknowledgment deadline.
    pub timeout: Duration,
    /// Round-trip latency above which a warning is raised.
    pub high_latency_threshold: Duration,
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self::from_settings(&ConnectionSettings::default())
    }
}

impl HeartbeatConfig {
    /// Derive heartbeat policy from connection settings.
    pub fn from_settings(settings: &ConnectionSettings) -> Self {
        Self {
            interval: settings.heartbeat_interval(),
            timeout: settings.heartbeat_timeout(),
            high_latency_threshold: settings.high_latency_threshold(),
        }
    }
}

/// Signal from a probe cycle to the monitor's owner.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HeartbeatSignal {
    /// A probe of cycle `run` expired without a `pong`.
    TimedOut {
        /// Run id from [`HeartbeatMonitor::run_id`] at the time of expiry.
        run: u64,
    },
}

/// One outstanding probe.
#[derive(Clone, Copy, Debug)]
struct HeartbeatRecord {
    seq: u64,
    timestamp: i64,
    sent_at: Instant,
}

#[derive(Debug, Default)]
struct MonitorState {
    run: u64,
    seq: u64,
    cancel: Option<CancellationToken>,
    pending: Option<HeartbeatRecord>,
}

/// Ping/pong liveness monitor for one connected transport at a time.
pub struct HeartbeatMonitor {
    config: HeartbeatConfig,
    state: Arc<Mutex<MonitorState>>,
    events: Arc<EventEmitter>,
    signals: mpsc::UnboundedSender<HeartbeatSignal>,
}

impl HeartbeatMonitor {
    /// Create a stopped monitor.
    pub fn new(
        config: HeartbeatConfig,
        events: Arc<EventEmitter>,
        signals: mpsc::UnboundedSender<HeartbeatSignal>,
    ) -> Self {
        Self {
            config,
            state: Arc::new(Mutex::new(MonitorState::default())),
            events,
            signals,
        }
    }

    /// Begin probing through `sender`. Replaces any running cycle.
    ///
    /// The first probe goes out one interval after this call.
    pub fn start(&self, sender: TransportSender) {
        let mut state = self.state.lock();
        if let Some(previous) = state.cancel.take() {
            previous.cancel();
        }
        state.pending = None;
        state.run += 1;
        let token = CancellationToken::new();
        state.cancel = Some(token.clone());
        let run = state.run;
        drop(state);

        let cycle = ProbeCycle {
            config: self.config,
            state: Arc::clone(&self.state),
            events: Arc::clone(&self.events),
            signals: self.signals.clone(),
            sender,
            token,
            run,
        };
        drop(tokio::spawn(cycle.run()));
        debug!(
            run,
            interval_ms = duration_ms(self.config.interval),
            "heartbeat started"
        );
    }

    /// Cancel the cycle and any outstanding probe. Idempotent.
    pub fn stop(&self) {
        let mut state = self.state.lock();
        state.pending = None;
        if let Some(token) = state.cancel.take() {
            token.cancel();
            debug!(run = state.run, "heartbeat stopped");
        }
    }

    /// Whether a cycle is running.
    pub fn is_running(&self) -> bool {
        self.state.lock().cancel.is_some()
    }

    /// Id of the most recent cycle.
    pub fn run_id(&self) -> u64 {
        self.state.lock().run
    }

    /// Whether `run` is the cycle currently running.
    pub fn is_current(&self, run: u64) -> bool {
        let state = self.state.lock();
        state.cancel.is_some() && state.run == run
    }

    /// Record a `pong`. Returns the round-trip latency if a probe was pending.
    pub fn acknowledge(&self) -> Option<Duration> {
        let record = {
            let mut state = self.state.lock();
            if state.cancel.is_none() {
                return None;
            }
            state.pending.take()?
        };
        let latency = record.sent_at.elapsed();
        let latency_ms = duration_ms(latency);

        #[allow(clippy::cast_precision_loss)]
        metrics::histogram!(telemetry::HEARTBEAT_LATENCY_MS).record(latency_ms as f64);
        debug!(latency_ms, seq = record.seq, probe_ts = record.timestamp, "heartbeat acknowledged");
        let _ = self
            .events
            .emit(ConnectionEvent::HeartbeatAcknowledged { latency_ms });

        if latency > self.config.high_latency_threshold {
            warn!(
                latency_ms,
                threshold_ms = duration_ms(self.config.high_latency_threshold),
                "high heartbeat latency"
            );
            let _ = self.events.emit(ConnectionEvent::HighLatency { latency_ms });
        }
        Some(latency)
    }
}

impl Drop for HeartbeatMonitor {
    fn drop(&mut self) {
        self.stop();
    }
}

/// The task behind one `start()`.
struct ProbeCycle {
    config: HeartbeatConfig,
    state: Arc<Mutex<MonitorState>>,
    events: Arc<EventEmitter>,
    signals: mpsc::UnboundedSender<HeartbeatSignal>,
    sender: TransportSender,
    token: CancellationToken,
    run: u64,
}

impl ProbeCycle {
    async fn run(self) {
        let mut ticker = time::interval_at(Instant::now() + self.config.interval, self.config.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut deadline: Option<(Instant, u64)> = None;

        loop {
            tokio::select! {
                () = self.token.cancelled() => return,
                _ = ticker.tick() => deadline = self.probe(),
                seq = expiry(deadline) => {
                    deadline = None;
                    self.expire(seq);
                }
            }
        }
    }

    /// Send one probe. Returns the deadline to arm.
    fn probe(&self) -> Option<(Instant, u64)> {
        let mut state = self.state.lock();
        if self.token.is_cancelled() {
            return None;
        }
        let stale = state.pending.take().is_some();
        state.seq += 1;
        let seq = state.seq;
        let probe = HeartbeatProbe::now();
        let sent_at = Instant::now();
        state.pending = Some(HeartbeatRecord {
            seq,
            timestamp: probe.timestamp,
            sent_at,
        });
        drop(state);

        if stale {
            warn!(run = self.run, "previous heartbeat unacknowledged, connection may be stale");
            let _ = self.events.emit(ConnectionEvent::StaleConnection);
        }
        let envelope = probe.into_envelope();
        if !self.sender.send(PING_EVENT, envelope.payload) {
            debug!(seq, "heartbeat probe not queued");
        }
        let _ = self.events.emit(ConnectionEvent::HeartbeatSent {
            timestamp: probe.timestamp,
        });
        Some((sent_at + self.config.timeout, seq))
    }

    /// The deadline for probe `seq` passed.
    fn expire(&self, seq: u64) {
        {
            let mut state = self.state.lock();
            if self.token.is_cancelled() {
                return;
            }
            match state.pending {
                Some(record) if record.seq == seq => state.pending = None,
                _ => return,
            }
        }

        warn!(
            run = self.run,
            timeout_ms = duration_ms(self.config.timeout),
            "heartbeat timeout, no pong received"
        );
        metrics::counter!(telemetry::HEARTBEAT_TIMEOUTS_TOTAL).increment(1);
        let _ = self.events.emit(ConnectionEvent::HeartbeatTimeout);
        let _ = self.signals.send(HeartbeatSignal::TimedOut { run: self.run });
    }
}

async fn expiry(deadline: Option<(Instant, u64)>) -> u64 {
    match deadline {
        Some((at, seq)) => {
            time::sleep_until(at).await;
            seq
        }
        None => std::future::pending().await,
    }
}

fn duration_ms(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}
