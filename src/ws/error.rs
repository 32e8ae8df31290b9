use std::{fmt::Display, time::Duration};

use snafu::prelude::*;
use tokio_tungstenite::tungstenite as websocket;

use super::message::MessageStreamSinkError;
use crate::config::ConfigError;

/// Why an open connection was considered lost
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DisconnectReason {
    /// server sent a close frame
    ServerClosed(Option<String>),
    /// transport ended without close frame
    TransportClosed,
    /// transport reported an error
    TransportError(String),
    /// no pong before the next heartbeat
    HeartbeatTimeout,
    /// writing to the socket failed
    SendFailed(String),
}

impl Display for DisconnectReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ServerClosed(Some(reason)) => write!(f, "server closed the socket: {}", reason),
            Self::ServerClosed(None) => f.write_str("server closed the socket"),
            Self::TransportClosed => f.write_str("transport closed"),
            Self::TransportError(err) => write!(f, "transport error: {}", err),
            Self::HeartbeatTimeout => f.write_str("heartbeat timeout"),
            Self::SendFailed(err) => write!(f, "send failed: {}", err),
        }
    }
}

/// Error of the socket connection itself
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)), module(socket_error), context(suffix(false)))]
pub enum SocketConnectionError {
    /// no access token stored when (re)connecting
    #[snafu(display("no access token available for socket connection"))]
    MissingToken,

    /// websocket handshake failed
    #[snafu(display("connect socket {url} failed: {source}"))]
    Handshake {
        /// socket url without credentials
        url: String,
        /// source error
        source: websocket::Error,
    },

    /// websocket handshake did not finish in time
    #[snafu(display("connect socket {url} timed out after {timeout:?}"))]
    HandshakeTimeout {
        /// socket url without credentials
        url: String,
        /// handshake deadline
        timeout: Duration,
    },

    /// an open connection dropped
    #[snafu(display("connection lost: {reason}"))]
    Lost {
        /// why it dropped
        reason: DisconnectReason,
    },

    /// every reconnect attempt failed
    #[snafu(display("gave up after {attempts} reconnect attempts"))]
    ReconnectExhausted {
        /// used attempts
        attempts: u32,
    },
}

impl SocketConnectionError {
    /// Message suitable for showing to end users, transport details stay in logs
    pub fn user_message(&self) -> &'static str {
        "Connection failed, please retry."
    }
}

/// Error returned by session handle operations
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)), module(session_error), context(suffix(false)))]
pub enum SessionError {
    /// access token missing or not a jwt
    #[snafu(display("access token is missing or malformed"))]
    InvalidToken,

    /// socket settings are out of range
    #[snafu(display("invalid socket config: {source}"))]
    InvalidConfig {
        /// source error
        source: ConfigError,
    },

    /// session already running
    #[snafu(display("session is already initialized"))]
    AlreadyRunning,

    /// operation requires a connected session
    #[snafu(display("session is not connected"))]
    NotConnected,

    /// write message to socket failed
    #[snafu(display("send {event} message failed: {source}"))]
    SendFailed {
        /// event name
        event: &'static str,
        /// source error
        source: MessageStreamSinkError,
    },

    /// background worker is gone
    #[snafu(display("session worker stopped"))]
    WorkerStopped,
}
