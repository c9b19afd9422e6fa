//! Client configuration

use chat_shared::timing;
use std::fmt;
use std::time::Duration;

/// Environment variable that overrides the server address
pub const SERVER_ADDR_ENV: &str = "CHAT_SERVER_ADDR";

/// Configuration shared by both chat sockets
#[derive(Debug, Clone)]
pub struct ChatConfig {
    /// Chat server address
    pub server_addr: String,
    /// Sent in the socket handshake
    pub user_agent: String,
    /// Longest a request waits for its socket to open before dispatching anyway
    pub open_wait_timeout: Duration,
    /// Interval between keepalive requests on an open socket
    pub keepalive_interval: Duration,
    /// How long a push keeps both sockets wanted-open
    pub push_keepalive: Duration,
    /// Connection timeout
    pub connect_timeout: Duration,
    /// Reconnection delay (initial)
    pub reconnect_delay: Duration,
    /// Maximum reconnection delay
    pub max_reconnect_delay: Duration,
    /// Response timeout for requests that don't set their own
    pub request_timeout: Duration,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            server_addr: "127.0.0.1:8443".into(),
            user_agent: concat!("chat-client/", env!("CARGO_PKG_VERSION")).into(),
            open_wait_timeout: Duration::from_millis(timing::OPEN_WAIT_TIMEOUT_MS),
            keepalive_interval: Duration::from_millis(timing::KEEPALIVE_INTERVAL_MS),
            push_keepalive: Duration::from_millis(timing::PUSH_KEEPALIVE_MS),
            connect_timeout: Duration::from_millis(timing::CONNECT_TIMEOUT_MS),
            reconnect_delay: Duration::from_millis(timing::RECONNECT_DELAY_MS),
            max_reconnect_delay: Duration::from_millis(timing::MAX_RECONNECT_DELAY_MS),
            request_timeout: Duration::from_millis(timing::REQUEST_TIMEOUT_MS),
        }
    }
}

impl ChatConfig {
    /// Defaults, with the server address taken from `CHAT_SERVER_ADDR` when set
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Ok(addr) = std::env::var(SERVER_ADDR_ENV) {
            if !addr.trim().is_empty() {
                config.server_addr = addr.trim().to_string();
            }
        }
        config
    }
}

/// Account credentials presented by the identified socket
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub login: String,
    pub password: String,
}

impl Credentials {
    pub fn new(login: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            login: login.into(),
            password: password.into(),
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("login", &self.login)
            .field("password", &"<redacted>")
            .finish()
    }
}
