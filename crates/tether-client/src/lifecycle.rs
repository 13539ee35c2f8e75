//! Connectivity state machine.
//!
//! Pure and synchronous: [`Lifecycle::apply`] maps an [`Input`] to a new
//! state plus the [`Effect`]s the supervisor must carry out, in order. No
//! I/O or timers live here.
//!
//! | from                       | input            | to            | effects                          |
//! |----------------------------|------------------|---------------|----------------------------------|
//! | disconnected / failed      | connect          | connecting    | open                             |
//! | any other                  | connect          | unchanged     | none                             |
//! | any                        | disconnect       | disconnected  | stop heartbeat, close            |
//! | connecting / reconnecting  | open             | connected     | start heartbeat                  |
//! | disconnected / failed      | open             | unchanged     | close                            |
//! | connected                  | close            | reconnecting  | stop heartbeat                   |
//! | connecting / reconnecting  | error            | unchanged or failed (budget spent) | close, report exhausted |
//! | connecting / reconnecting / connected | stream ended | disconnected | stop heartbeat, close   |
//! | connected (force policy)   | heartbeat timeout| reconnecting  | stop heartbeat, close, open      |

use tether_core::ConnectionState;

/// Something that happened to the connection.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Input {
    /// Collaborator called `connect()`.
    Connect,
    /// Collaborator called `disconnect()`.
    Disconnect,
    /// Transport reported `open`.
    Open,
    /// Transport reported `close`.
    Close,
    /// Transport reported `error`.
    Error,
    /// Transport stopped producing notifications.
    StreamEnded,
    /// Heartbeat probe expired without a `pong`.
    HeartbeatTimeout,
}

/// Side effect requested by a transition.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Effect {
    /// Open a new transport link.
    OpenTransport,
    /// Close and release the current link, if any.
    CloseTransport,
    /// Start the heartbeat monitor on the current link.
    StartHeartbeat,
    /// Stop the heartbeat monitor.
    StopHeartbeat,
    /// The retry budget was exhausted after `attempts` failures.
    ReportExhausted {
        /// Failed attempts.
        attempts: u32,
    },
}

/// Result of one [`Lifecycle::apply`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Transition {
    /// State before the input.
    pub from: ConnectionState,
    /// State after the input.
    pub to: ConnectionState,
    /// Effects to apply, in order.
    pub effects: Vec<Effect>,
}

impl Transition {
    /// Whether the state changed.
    pub fn changed(&self) -> bool {
        self.from != self.to
    }
}

/// Connectivity state plus the consecutive-failure counter.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Lifecycle {
    state: ConnectionState,
    attempts: u32,
    max_attempts: u32,
    force_reconnect_on_timeout: bool,
}

impl Lifecycle {
    /// A disconnected lifecycle. `max_attempts` is clamped to at least 1.
    pub fn new(max_attempts: u32, force_reconnect_on_timeout: bool) -> Self {
        Self {
            state: ConnectionState::Disconnected,
            attempts: 0,
            max_attempts: max_attempts.max(1),
            force_reconnect_on_timeout,
        }
    }

    /// Current state.
    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Consecutive failed attempts since the last successful open.
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Configured retry budget.
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Apply one input.
    pub fn apply(&mut self, input: Input) -> Transition {
        use ConnectionState as S;

        let from = self.state;
        let mut effects = Vec::new();

        match (input, from) {
            (Input::Connect, S::Disconnected | S::Failed) => {
                self.attempts = 0;
                self.state = S::Connecting;
                effects.push(Effect::OpenTransport);
            }
            (Input::Connect, _) => {}

            (Input::Disconnect, _) => {
                self.attempts = 0;
                self.state = S::Disconnected;
                effects.extend([Effect::StopHeartbeat, Effect::CloseTransport]);
            }

            (Input::Open, S::Connecting | S::Reconnecting) => {
                self.attempts = 0;
                self.state = S::Connected;
                effects.push(Effect::StartHeartbeat);
            }
            (Input::Open, S::Disconnected | S::Failed) => effects.push(Effect::CloseTransport),
            (Input::Open, S::Connected) => {}

            (Input::Close, S::Connected) => {
                self.state = S::Reconnecting;
                effects.push(Effect::StopHeartbeat);
            }
            (Input::Close, _) => {}

            (Input::Error, S::Connecting | S::Reconnecting) => {
                self.attempts += 1;
                if self.attempts >= self.max_attempts {
                    self.state = S::Failed;
                    effects.extend([
                        Effect::CloseTransport,
                        Effect::ReportExhausted {
                            attempts: self.attempts,
                        },
                    ]);
                }
            }
            (Input::Error, _) => {}

            (Input::StreamEnded, S::Connecting | S::Reconnecting | S::Connected) => {
                self.state = S::Disconnected;
                effects.extend([Effect::StopHeartbeat, Effect::CloseTransport]);
            }
            (Input::StreamEnded, _) => {}

            (Input::HeartbeatTimeout, S::Connected) if self.force_reconnect_on_timeout => {
                self.state = S::Reconnecting;
                effects.extend([
                    Effect::StopHeartbeat,
                    Effect::CloseTransport,
                    Effect::OpenTransport,
                ]);
            }
            (Input::HeartbeatTimeout, _) => {}
        }

        Transition {
            from,
            to: self.state,
            effects,
        }
    }
}
