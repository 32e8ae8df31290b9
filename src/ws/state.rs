//! Connection state machine of a generation session.

use std::{fmt::Display, time::Duration};

use snafu::prelude::*;

/// Connection state of a session, exactly one at a time
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    /// not started, or closed by the caller
    #[default]
    Disconnected,
    /// handshake in progress
    Connecting,
    /// channel open, heartbeat running
    Connected,
    /// waiting the backoff delay before next connect attempt
    Reconnecting,
    /// reconnect budget exhausted, terminal
    Failed,
}

impl ConnectionState {
    /// state name
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Reconnecting => "reconnecting",
            Self::Failed => "failed",
        }
    }

    /// Transition table, `None` when `transition` is not allowed from this state
    pub fn next(self, transition: Transition) -> Option<Self> {
        use ConnectionState::*;

        match (self, transition) {
            (Disconnected | Failed, Transition::Initialize) => Some(Connecting),
            (Connecting, Transition::Connected) => Some(Connected),
            (Connecting | Connected, Transition::Lost) => Some(Reconnecting),
            (Reconnecting, Transition::RetryDue) => Some(Connecting),
            (Reconnecting, Transition::GiveUp) => Some(Failed),
            (Connecting | Connected | Reconnecting, Transition::Disconnect) => Some(Disconnected),
            _ => None,
        }
    }
}

impl Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Events driving the connection state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Transition {
    /// caller started the session
    Initialize,
    /// transport acknowledged the connection
    Connected,
    /// handshake failed, or an open connection dropped
    Lost,
    /// caller closed the session
    Disconnect,
    /// backoff delay elapsed
    RetryDue,
    /// no reconnect attempt left
    GiveUp,
}

/// A transition not allowed from current state
#[derive(Debug, Snafu)]
#[snafu(display("transition {transition:?} is not allowed from {from} state"))]
pub struct InvalidTransition {
    /// state before the transition
    pub from: ConnectionState,
    /// rejected transition
    pub transition: Transition,
}

/// Connection state plus the reconnect attempt counter
#[derive(Debug, Clone)]
pub struct ConnectionMachine {
    state: ConnectionState,
    attempt: u32,
    max_retries: u32,
    base_delay: Duration,
}

impl ConnectionMachine {
    /// Create a disconnected machine allowing `max_retries` reconnects
    pub fn new(max_retries: u32, base_delay: Duration) -> Self {
        Self {
            state: ConnectionState::Disconnected,
            attempt: 0,
            max_retries,
            base_delay,
        }
    }

    /// current state
    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// reconnect attempts scheduled since last successful connect
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    /// Apply a transition, a successful connect resets the attempt counter
    pub fn apply(&mut self, transition: Transition) -> Result<ConnectionState, InvalidTransition> {
        let next = self
            .state
            .next(transition)
            .context(InvalidTransitionSnafu {
                from: self.state,
                transition,
            })?;

        if matches!(transition, Transition::Initialize | Transition::Connected) {
            self.attempt = 0;
        }

        self.state = next;
        Ok(next)
    }

    /// Schedule the next reconnect: `base_delay * 2 ^ attempt`.
    ///
    /// `None` once `max_retries` attempts were used, the caller should give up.
    pub fn schedule_retry(&mut self) -> Option<Duration> {
        if self.attempt >= self.max_retries {
            return None;
        }

        let delay = self
            .base_delay
            .checked_mul(2u32.saturating_pow(self.attempt))
            .unwrap_or(Duration::MAX);
        self.attempt += 1;

        Some(delay)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    use ConnectionState::*;

    #[test]
    fn test_connect_then_disconnect() {
        let mut machine = ConnectionMachine::new(5, Duration::from_millis(10));

        assert_eq!(machine.apply(Transition::Initialize).unwrap(), Connecting);
        assert_eq!(machine.apply(Transition::Connected).unwrap(), Connected);
        assert_eq!(machine.apply(Transition::Disconnect).unwrap(), Disconnected);
    }

    #[test]
    fn test_connected_never_goes_back_to_connecting_directly() {
        assert_eq!(Connected.next(Transition::RetryDue), None);
        assert_eq!(Connected.next(Transition::Initialize), None);
        assert_eq!(Connected.next(Transition::Lost), Some(Reconnecting));
        assert_eq!(Failed.next(Transition::RetryDue), None);
        assert_eq!(Disconnected.next(Transition::Lost), None);
    }

    #[test]
    fn test_invalid_transition_keeps_state() {
        let mut machine = ConnectionMachine::new(5, Duration::from_millis(10));

        let err = machine.apply(Transition::Connected).unwrap_err();
        assert_eq!(err.from, Disconnected);
        assert_eq!(machine.state(), Disconnected);
    }

    #[test]
    fn test_backoff_doubles_until_budget_exhausted() {
        let mut machine = ConnectionMachine::new(3, Duration::from_millis(100));
        machine.apply(Transition::Initialize).unwrap();
        machine.apply(Transition::Lost).unwrap();

        let mut delays = vec![];
        while let Some(delay) = machine.schedule_retry() {
            delays.push(delay);
            machine.apply(Transition::RetryDue).unwrap();
            machine.apply(Transition::Lost).unwrap();
        }

        assert_eq!(
            delays,
            vec![
                Duration::from_millis(100),
                Duration::from_millis(200),
                Duration::from_millis(400)
            ]
        );
        assert_eq!(machine.apply(Transition::GiveUp).unwrap(), Failed);
    }

    #[test]
    fn test_connect_resets_attempts() {
        let mut machine = ConnectionMachine::new(2, Duration::from_millis(100));
        machine.apply(Transition::Initialize).unwrap();
        machine.apply(Transition::Lost).unwrap();
        machine.schedule_retry().unwrap();
        machine.schedule_retry().unwrap();
        assert_eq!(machine.attempt(), 2);

        machine.apply(Transition::RetryDue).unwrap();
        machine.apply(Transition::Connected).unwrap();
        assert_eq!(machine.attempt(), 0);
        assert_eq!(machine.schedule_retry(), Some(Duration::from_millis(100)));
    }

    #[test]
    fn test_failed_session_can_be_initialized_again() {
        let mut machine = ConnectionMachine::new(0, Duration::from_millis(100));
        machine.apply(Transition::Initialize).unwrap();
        machine.apply(Transition::Lost).unwrap();
        assert!(machine.schedule_retry().is_none());
        machine.apply(Transition::GiveUp).unwrap();

        assert_eq!(machine.apply(Transition::Initialize).unwrap(), Connecting);
    }
}
