//! Session management for signed-in accounts
//!
//! This module handles:
//! - Socket handshakes and authentication
//! - Answering client requests
//! - Live message delivery to identified sessions
//! - Mailboxes for accounts that are offline

mod connection;
mod manager;

pub use connection::ChatSession;
pub use manager::SessionManager;
