//! Chat sockets
//!
//! This module handles:
//! - One persistent socket per connection type, with automatic reconnection
//! - The should-be-open policy and unsubmitted-request tokens
//! - Request/response matching over the socket
//! - Keepalives and server-initiated message delivery
//! - Routing requests between the identified and unidentified sockets

mod chat;
mod driver;
mod manager;
mod open_wait;
mod pending;
mod policy;
mod state;
mod token;

pub use chat::{ChatConnection, ConnectionDependencies};
pub use manager::{ConnectionManager, IncomingMessages};
pub use open_wait::wait_if_should_be_open;
pub use policy::{AccountStore, AppExpiry, ExpiryFlag, NeverExpires, StaticAccountStore};
pub use state::{next_state, ConnectionState, ConnectionType, SocketEvent};
pub use token::UnsubmittedRequestToken;
