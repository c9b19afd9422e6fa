//! Bounded wait for a socket to open before dispatching a request
//!
//! Requests prefer a ready socket, but must never hang on one that will not
//! open soon (no network, revoked credentials, cold start).

use super::ChatConnection;
use std::time::Duration;
use tracing::{debug, info};

/// Wait up to `limit` for the socket to open, if it wants to be open at all
///
/// Returns immediately when the socket is not wanted-open. Otherwise races
/// the open against a timer; the losing branch is dropped before returning.
/// Never fails: dispatch afterwards surfaces any connection failure.
pub async fn wait_if_should_be_open(connection: &ChatConnection, limit: Duration) {
    if !connection.should_be_open() {
        debug!(
            "[{}] Socket not wanted-open, dispatching without waiting",
            connection.connection_type()
        );
        return;
    }

    tokio::select! {
        opened = connection.wait_until_open_retrying() => match opened {
            Ok(()) => {}
            Err(e) => debug!("[{}] Stopped waiting for open: {}", connection.connection_type(), e),
        },
        _ = tokio::time::sleep(limit) => {
            info!(
                "[{}] Socket did not open within {:?}, dispatching anyway",
                connection.connection_type(),
                limit
            );
        }
    }
}
