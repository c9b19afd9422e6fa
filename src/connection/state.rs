//! Socket state machine
//!
//! Defines the connection types and the valid socket state transitions.

use std::fmt;

/// Which of the two chat sockets a connection is
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionType {
    /// Carries per-device account authorization
    Identified,
    /// Carries no account authorization
    Unidentified,
}

impl fmt::Display for ConnectionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionType::Identified => write!(f, "identified"),
            ConnectionType::Unidentified => write!(f, "unidentified"),
        }
    }
}

/// Externally visible socket state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    #[default]
    Closed,
    Connecting,
    Open,
}

impl ConnectionState {
    pub fn is_open(self) -> bool {
        self == ConnectionState::Open
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionState::Closed => write!(f, "closed"),
            ConnectionState::Connecting => write!(f, "connecting"),
            ConnectionState::Open => write!(f, "open"),
        }
    }
}

/// Events that can trigger state transitions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SocketEvent {
    /// Transport connect attempt started
    ConnectStarted,
    /// Transport connected and handshake written
    Opened,
    /// Connect or handshake failed
    ConnectFailed,
    /// Open socket went away, or the socket is no longer wanted
    Closed,
}

/// Get the next state for a given event, if the transition is valid
pub fn next_state(from: ConnectionState, event: SocketEvent) -> Option<ConnectionState> {
    use ConnectionState::*;

    match (from, event) {
        (Closed, SocketEvent::ConnectStarted) => Some(Connecting),
        (Connecting, SocketEvent::Opened) => Some(Open),
        (Connecting, SocketEvent::ConnectFailed) => Some(Closed),
        (_, SocketEvent::Closed) => Some(Closed),
        _ => None,
    }
}
