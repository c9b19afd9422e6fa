//! Chat Shared Protocol Types
//!
//! This crate provides the wire types and codec spoken between chat clients
//! and the chat server over a persistent socket.

pub mod codec;
pub mod proto;

use std::time::{SystemTime, UNIX_EPOCH};

// Re-export commonly used types at crate root
pub use proto::*;

/// Get current timestamp in milliseconds since Unix epoch
pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// Timing parameters for the chat socket
pub mod timing {
    /// Longest a request waits for its socket to open before dispatching anyway
    pub const OPEN_WAIT_TIMEOUT_MS: u64 = 30_000;

    /// Interval between keepalive requests on an open socket
    pub const KEEPALIVE_INTERVAL_MS: u64 = 30_000;

    /// How long a received push keeps the sockets wanted-open
    pub const PUSH_KEEPALIVE_MS: u64 = 20_000;

    /// Socket connect timeout
    pub const CONNECT_TIMEOUT_MS: u64 = 10_000;

    /// Initial delay before reconnecting after a failed connect
    pub const RECONNECT_DELAY_MS: u64 = 1_000;

    /// Upper bound for the reconnect backoff
    pub const MAX_RECONNECT_DELAY_MS: u64 = 30_000;

    /// Default per-request response timeout
    pub const REQUEST_TIMEOUT_MS: u64 = 10_000;
}

/// Well-known request paths
pub mod paths {
    /// Handshake path for both socket types
    pub const WEBSOCKET: &str = "/v1/websocket/";

    /// Client-initiated liveness probe
    pub const KEEPALIVE: &str = "/v1/keepalive";

    /// Server-initiated message delivery
    pub const MESSAGE: &str = "/api/v1/message";

    /// Server signal that the initial backlog has been delivered
    pub const QUEUE_EMPTY: &str = "/api/v1/queue/empty";

    /// Account self-lookup (identified only)
    pub const WHOAMI: &str = "/v1/accounts/whoami";

    /// Message send prefix, followed by the destination login
    pub const MESSAGES_PREFIX: &str = "/v1/messages/";
}

/// Header names with protocol meaning
pub mod headers {
    /// Server enqueue time of a delivered message, milliseconds since epoch
    pub const SERVER_TIMESTAMP: &str = "X-Server-Timestamp";
}

/// Builder helpers for creating frames
impl WireMessage {
    /// Wrap a request in a frame
    pub fn request(request: WireRequest) -> Self {
        Self {
            kind: MessageKind::Request.into(),
            request: Some(request),
            response: None,
            handshake: None,
        }
    }

    /// Wrap a response in a frame
    pub fn response(response: WireResponse) -> Self {
        Self {
            kind: MessageKind::Response.into(),
            request: None,
            response: Some(response),
            handshake: None,
        }
    }

    /// Wrap a handshake in a frame
    pub fn handshake(handshake: Handshake) -> Self {
        Self {
            kind: MessageKind::Handshake.into(),
            request: None,
            response: None,
            handshake: Some(handshake),
        }
    }

    /// Decoded frame kind, `Unknown` for values this build does not know
    pub fn message_kind(&self) -> MessageKind {
        MessageKind::try_from(self.kind).unwrap_or(MessageKind::Unknown)
    }
}

impl WireRequest {
    /// Create a new request with an empty body
    pub fn new(id: u64, verb: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            id,
            verb: verb.into(),
            path: path.into(),
            body: Vec::new(),
            headers: Vec::new(),
        }
    }

    /// Attach a body
    pub fn with_body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = body.into();
        self
    }
}

impl WireResponse {
    /// Create a response for the request with the given id
    pub fn new(id: u64, status: u32, message: impl Into<String>) -> Self {
        Self {
            id,
            status,
            message: message.into(),
            body: Vec::new(),
            headers: Vec::new(),
        }
    }

    /// Attach a body
    pub fn with_body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = body.into();
        self
    }

    /// Check for a 2xx status
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

impl Handshake {
    /// Handshake for a socket that carries no account authorization
    pub fn unidentified(user_agent: impl Into<String>) -> Self {
        Self {
            path: paths::WEBSOCKET.into(),
            login: None,
            password: None,
            user_agent: user_agent.into(),
        }
    }

    /// Handshake for a socket authorized as the given account
    pub fn identified(
        login: impl Into<String>,
        password: impl Into<String>,
        user_agent: impl Into<String>,
    ) -> Self {
        Self {
            path: paths::WEBSOCKET.into(),
            login: Some(login.into()),
            password: Some(password.into()),
            user_agent: user_agent.into(),
        }
    }

    /// Check whether the handshake carries credentials
    pub fn is_identified(&self) -> bool {
        self.login.is_some()
    }
}
