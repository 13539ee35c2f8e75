//! Connection supervisor.
//!
//! One actor task owns the connection: the [`Lifecycle`], the active
//! [`TransportLink`], and the [`HeartbeatMonitor`]. It consumes, one at a
//! time and in this priority order:
//! 1. transport notifications from the current link,
//! 2. heartbeat signals,
//! 3. commands from [`ConnectionHandle`]s.
//!
//! Collaborators only ever hold a [`ConnectionHandle`]. Dropping the last
//! handle stops the actor and closes the transport.

use std::sync::Arc;

use metrics::counter;
use serde_json::Value;
use tether_core::{
    ConnectionEvent, ConnectionSnapshot, ConnectionState, EventEmitter, EventRegistry, PING_EVENT,
    PONG_EVENT, SubscriptionId, TetherError,
};
use tether_settings::ConnectionSettings;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tracing::{Instrument, debug, error, info, info_span, trace, warn};
use uuid::Uuid;

use crate::heartbeat::{HeartbeatConfig, HeartbeatMonitor, HeartbeatSignal};
use crate::lifecycle::{Effect, Input, Lifecycle};
use crate::telemetry;
use crate::transport::{Transport, TransportLink, TransportNotification, TransportOptions};

/// Everything the supervisor needs, read once at construction.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SupervisorConfig {
    /// Endpoint passed to [`Transport::open`].
    pub url: String,
    /// Transport retry policy and buffering.
    pub transport: TransportOptions,
    /// Heartbeat cadence and thresholds.
    pub heartbeat: HeartbeatConfig,
    /// Consecutive failed attempts before `failed`.
    pub max_reconnect_attempts: u32,
    /// Reopen the transport when a probe times out.
    pub force_reconnect_on_timeout: bool,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self::from_settings(&ConnectionSettings::default())
    }
}

impl SupervisorConfig {
    /// Build from loaded connection settings.
    pub fn from_settings(settings: &ConnectionSettings) -> Self {
        Self {
            url: settings.url.clone(),
            transport: TransportOptions::from_settings(settings),
            heartbeat: HeartbeatConfig::from_settings(settings),
            max_reconnect_attempts: settings.max_reconnect_attempts,
            force_reconnect_on_timeout: settings.force_reconnect_on_timeout,
        }
    }

    /// Reject endpoints and policies the actor could not run with.
    ///
    /// A zero heartbeat interval cannot be scheduled, and a probe timeout
    /// that is not shorter than the interval would never fire.
    pub fn validate(&self) -> tether_core::errors::Result<()> {
        if !(self.url.starts_with("ws://") || self.url.starts_with("wss://")) {
            return Err(TetherError::InvalidEndpoint {
                url: self.url.clone(),
                reason: "expected a ws:// or wss:// URL".into(),
            });
        }
        if self.heartbeat.interval.is_zero() {
            return Err(TetherError::InvalidConfig(
                "heartbeat interval must be greater than zero".into(),
            ));
        }
        if self.heartbeat.timeout >= self.heartbeat.interval {
            return Err(TetherError::InvalidConfig(format!(
                "heartbeat timeout ({:?}) must be shorter than the interval ({:?})",
                self.heartbeat.timeout, self.heartbeat.interval
            )));
        }
        if self.max_reconnect_attempts == 0 {
            return Err(TetherError::InvalidConfig(
                "max reconnect attempts must be at least 1".into(),
            ));
        }
        if self.transport.send_buffer == 0 {
            return Err(TetherError::InvalidConfig(
                "send buffer must be greater than zero".into(),
            ));
        }
        Ok(())
    }
}

enum Command {
    Connect,
    Disconnect,
    Emit { event: String, payload: Value },
    Snapshot(oneshot::Sender<ConnectionSnapshot>),
}

/// Entry point for starting a supervised connection.
pub struct ConnectionSupervisor;

impl ConnectionSupervisor {
    /// Spawn the supervisor actor. The connection starts `disconnected`.
    ///
    /// Must be called inside a tokio runtime. Fails without spawning
    /// anything if [`SupervisorConfig::validate`] rejects the config.
    pub fn spawn<T: Transport>(
        config: SupervisorConfig,
        transport: T,
    ) -> tether_core::errors::Result<ConnectionHandle> {
        config.validate()?;

        let id = Uuid::now_v7();
        let events = Arc::new(EventEmitter::new());
        let registry = EventRegistry::new();
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let (sig_tx, sig_rx) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(ConnectionState::Disconnected);

        let actor = Supervisor {
            lifecycle: Lifecycle::new(
                config.max_reconnect_attempts,
                config.force_reconnect_on_timeout,
            ),
            monitor: HeartbeatMonitor::new(config.heartbeat, Arc::clone(&events), sig_tx),
            transport: Box::new(transport),
            link: None,
            registry: registry.clone(),
            events: Arc::clone(&events),
            state_tx,
            commands: cmd_rx,
            signals: sig_rx,
            config,
        };
        let span = info_span!("supervisor", connection_id = %id);
        drop(tokio::spawn(actor.run().instrument(span)));

        Ok(ConnectionHandle {
            id,
            commands: cmd_tx,
            registry,
            events,
            state: state_rx,
        })
    }
}

/// Cloneable collaborator-facing handle to a supervised connection.
///
/// Every operation is non-blocking and infallible from the caller's point
/// of view; if the actor is gone, commands are dropped.
#[derive(Clone)]
pub struct ConnectionHandle {
    id: Uuid,
    commands: mpsc::UnboundedSender<Command>,
    registry: EventRegistry,
    events: Arc<EventEmitter>,
    state: watch::Receiver<ConnectionState>,
}

impl std::fmt::Debug for ConnectionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionHandle")
            .field("id", &self.id)
            .field("state", &*self.state.borrow())
            .finish_non_exhaustive()
    }
}

impl ConnectionHandle {
    /// Connection id, also recorded on the supervisor's tracing span.
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Open the connection. No-op while connected or while an open is in
    /// flight.
    pub fn connect(&self) {
        self.send(Command::Connect);
    }

    /// Close the connection and stop reconnecting.
    pub fn disconnect(&self) {
        self.send(Command::Disconnect);
    }

    /// Send an event if connected. Dropped otherwise.
    pub fn emit(&self, event: impl Into<String>, payload: Value) {
        self.send(Command::Emit {
            event: event.into(),
            payload,
        });
    }

    /// Register `callback` for inbound `event`. Survives reconnects.
    pub fn subscribe<F>(&self, event: impl Into<String>, callback: F) -> SubscriptionId
    where
        F: Fn(&Value) + Send + Sync + 'static,
    {
        self.registry.subscribe(event, callback)
    }

    /// Remove a subscription. Returns `false` if it was not registered.
    pub fn unsubscribe(&self, event: &str, id: SubscriptionId) -> bool {
        self.registry.unsubscribe(event, id)
    }

    /// Current connectivity state.
    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    /// Receiver that observes every state change.
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.state.clone()
    }

    /// Wait until the state equals `target`.
    pub async fn wait_for_state(&self, target: ConnectionState) -> tether_core::errors::Result<()> {
        let mut rx = self.state.clone();
        let _ = rx
            .wait_for(|state| *state == target)
            .await
            .map_err(|_| TetherError::SupervisorGone)?;
        Ok(())
    }

    /// Telemetry events emitted after this call.
    pub fn events(&self) -> broadcast::Receiver<ConnectionEvent> {
        self.events.subscribe()
    }

    /// Current attributes of the connection.
    ///
    /// Resolves after every notification and command queued before it.
    pub async fn snapshot(&self) -> tether_core::errors::Result<ConnectionSnapshot> {
        let (tx, rx) = oneshot::channel();
        if self.commands.send(Command::Snapshot(tx)).is_err() {
            return Err(TetherError::SupervisorGone);
        }
        rx.await.map_err(|_| TetherError::SupervisorGone)
    }

    fn send(&self, command: Command) {
        if self.commands.send(command).is_err() {
            debug!(connection_id = %self.id, "supervisor gone, command dropped");
        }
    }
}

/// The actor.
struct Supervisor {
    config: SupervisorConfig,
    lifecycle: Lifecycle,
    monitor: HeartbeatMonitor,
    transport: Box<dyn Transport>,
    link: Option<TransportLink>,
    registry: EventRegistry,
    events: Arc<EventEmitter>,
    state_tx: watch::Sender<ConnectionState>,
    commands: mpsc::UnboundedReceiver<Command>,
    signals: mpsc::UnboundedReceiver<HeartbeatSignal>,
}

impl Supervisor {
    async fn run(mut self) {
        debug!(url = %self.config.url, "supervisor started");
        loop {
            tokio::select! {
                biased;
                note = next_notification(&mut self.link) => self.on_notification(note),
                Some(signal) = self.signals.recv() => self.on_heartbeat(signal),
                cmd = self.commands.recv() => match cmd {
                    Some(cmd) => self.on_command(cmd),
                    None => break,
                },
            }
        }
        self.monitor.stop();
        if let Some(link) = self.link.take() {
            link.close();
        }
        debug!("all handles dropped, supervisor stopped");
    }

    fn on_command(&mut self, cmd: Command) {
        match cmd {
            Command::Connect => {
                if !self.lifecycle.state().is_terminal() {
                    debug!(state = %self.lifecycle.state(), "connect ignored");
                }
                self.apply(Input::Connect);
            }
            Command::Disconnect => {
                info!("disconnect requested");
                self.apply(Input::Disconnect);
            }
            Command::Emit { event, payload } => self.emit(&event, payload),
            Command::Snapshot(reply) => {
                let _ = reply.send(self.snapshot());
            }
        }
    }

    fn on_notification(&mut self, note: Option<TransportNotification>) {
        let state = self.lifecycle.state();
        match note {
            None => {
                warn!(%state, "transport stopped without reaching the retry budget");
                self.apply(Input::StreamEnded);
            }
            Some(TransportNotification::Open) => self.apply(Input::Open),
            Some(TransportNotification::Close { reason }) => {
                if state == ConnectionState::Connected {
                    warn!(%reason, "connection closed unexpectedly, waiting for transport to reconnect");
                } else {
                    debug!(%state, %reason, "close while not connected");
                }
                self.apply(Input::Close);
            }
            Some(TransportNotification::Error { error }) => {
                if state.is_opening() {
                    counter!(telemetry::RECONNECT_ATTEMPTS_TOTAL).increment(1);
                    warn!(
                        %error,
                        attempts = self.lifecycle.attempts() + 1,
                        max = self.lifecycle.max_attempts(),
                        "connection attempt failed"
                    );
                } else {
                    warn!(%error, %state, "transport error");
                }
                self.apply(Input::Error);
            }
            Some(TransportNotification::Message { event, payload }) => {
                self.on_message(&event, &payload);
            }
        }
    }

    fn on_message(&self, event: &str, payload: &Value) {
        if event == PONG_EVENT {
            let _ = self.monitor.acknowledge();
        } else if event == PING_EVENT {
            if let Some(link) = &self.link {
                let _ = link.sender().send(PONG_EVENT, payload.clone());
            }
        }
        let handlers = self.registry.dispatch(event, payload);
        trace!(event, handlers, "inbound event dispatched");
    }

    fn on_heartbeat(&mut self, signal: HeartbeatSignal) {
        match signal {
            HeartbeatSignal::TimedOut { run } => {
                if !self.monitor.is_current(run) {
                    debug!(run, "timeout from a stopped heartbeat ignored");
                    return;
                }
                if self.config.force_reconnect_on_timeout {
                    warn!("heartbeat timed out, forcing reconnect");
                }
                self.apply(Input::HeartbeatTimeout);
            }
        }
    }

    fn emit(&self, event: &str, payload: Value) {
        match (&self.link, self.lifecycle.state()) {
            (Some(link), ConnectionState::Connected) => {
                let _ = link.sender().send(event, payload);
            }
            (_, state) => {
                counter!(telemetry::MESSAGES_DROPPED_TOTAL).increment(1);
                debug!(event, %state, "not connected, emit dropped");
            }
        }
    }

    fn snapshot(&self) -> ConnectionSnapshot {
        ConnectionSnapshot {
            state: self.lifecycle.state(),
            attempts: self.lifecycle.attempts(),
            has_transport: self.link.is_some(),
            heartbeat_running: self.monitor.is_running(),
        }
    }

    /// Run one input through the lifecycle, perform its effects, then
    /// publish the new state.
    fn apply(&mut self, input: Input) {
        let transition = self.lifecycle.apply(input);
        for effect in &transition.effects {
            self.perform(*effect);
        }
        if !transition.changed() {
            return;
        }

        let (from, to) = (transition.from, transition.to);
        info!(%from, %to, attempts = self.lifecycle.attempts(), "connection state changed");
        if to == ConnectionState::Connected {
            counter!(telemetry::CONNECTS_TOTAL).increment(1);
        }
        let _ = self.state_tx.send_replace(to);
        let _ = self.events.emit(ConnectionEvent::StateChanged { from, to });
    }

    fn perform(&mut self, effect: Effect) {
        match effect {
            Effect::OpenTransport => {
                if let Some(stale) = self.link.take() {
                    stale.close();
                }
                debug!(url = %self.config.url, "opening transport");
                self.link = Some(self.transport.open(&self.config.url, &self.config.transport));
            }
            Effect::CloseTransport => {
                if let Some(link) = self.link.take() {
                    link.close();
                }
            }
            Effect::StartHeartbeat => {
                if let Some(link) = &self.link {
                    self.monitor.start(link.sender().clone());
                }
            }
            Effect::StopHeartbeat => self.monitor.stop(),
            Effect::ReportExhausted { attempts } => {
                error!(attempts, "retry budget exhausted, connection failed");
                counter!(telemetry::RETRY_EXHAUSTED_TOTAL).increment(1);
                let _ = self.events.emit(ConnectionEvent::RetryExhausted { attempts });
            }
        }
    }
}

/// Next notification from `link`, or never if there is none.
async fn next_notification(link: &mut Option<TransportLink>) -> Option<TransportNotification> {
    match link {
        Some(link) => link.next_notification().await,
        None => std::future::pending().await,
    }
}
