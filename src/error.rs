//! Error types for the chat connection layer

use crate::connection::ConnectionType;
use bytes::Bytes;
use chat_shared::codec::CodecError;
use std::time::Duration;
use thiserror::Error;

/// Failures surfaced by chat sockets and the connection manager
#[derive(Error, Debug)]
pub enum ChatError {
    #[error("{0} socket is not open")]
    NotConnected(ConnectionType),

    #[error("{0} socket closed before a response arrived")]
    ConnectionClosed(ConnectionType),

    #[error("{0} connection has been shut down")]
    ConnectionShutdown(ConnectionType),

    #[error("Request {path} timed out after {elapsed:?}")]
    Timeout { path: String, elapsed: Duration },

    #[error("Service responded {status}: {message}")]
    ServiceResponse {
        status: u32,
        message: String,
        body: Bytes,
    },

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ChatError {
    /// True when the request never got a service response
    pub fn is_transport_failure(&self) -> bool {
        !matches!(self, ChatError::ServiceResponse { .. })
    }

    /// Status code of a service response failure
    pub fn status(&self) -> Option<u32> {
        match self {
            ChatError::ServiceResponse { status, .. } => Some(*status),
            _ => None,
        }
    }
}

pub type Result<T, E = ChatError> = std::result::Result<T, E>;
