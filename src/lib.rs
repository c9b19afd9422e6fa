//! Client side of the chat service
//!
//! Keeps two persistent sockets to the chat server, one authenticated with
//! the account's credentials and one anonymous, and routes requests to the
//! right one. Sockets open on demand and close once nothing needs them.

pub mod config;
pub mod connection;
pub mod error;
pub mod request;
pub mod transport;

#[cfg(test)]
mod test_support;

pub use config::{ChatConfig, Credentials};
pub use connection::{
    AccountStore, AppExpiry, ChatConnection, ConnectionDependencies, ConnectionManager,
    ConnectionState, ConnectionType, ExpiryFlag, IncomingMessages, NeverExpires,
    StaticAccountStore, UnsubmittedRequestToken,
};
pub use error::{ChatError, Result};
pub use request::{IncomingMessage, Request, Response};
