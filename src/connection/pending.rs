//! Pending-request table
//!
//! Tracks requests written to the socket that are awaiting a response and
//! matches responses back to their callers by request id.

use crate::error::{ChatError, Result};
use crate::request::Response;
use chat_shared::WireResponse;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::oneshot;
use tokio::time::Instant;
use tracing::debug;

/// A request awaiting its response
struct PendingRequest {
    path: String,
    sent_at: Instant,
    reply: oneshot::Sender<Result<Response>>,
}

/// Requests by id
#[derive(Default)]
pub(crate) struct PendingRequests {
    next_id: AtomicU64,
    requests: Mutex<HashMap<u64, PendingRequest>>,
}

impl PendingRequests {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Get the next request id
    pub(crate) fn next_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Track a request and return the receiver its outcome arrives on
    pub(crate) fn register(&self, id: u64, path: &str) -> oneshot::Receiver<Result<Response>> {
        let (reply, rx) = oneshot::channel();
        let pending = PendingRequest {
            path: path.to_string(),
            sent_at: Instant::now(),
            reply,
        };
        self.requests.lock().insert(id, pending);
        rx
    }

    /// Deliver a response to its waiting request
    ///
    /// Returns false if no request with that id is pending.
    pub(crate) fn complete(&self, response: WireResponse) -> bool {
        let Some(pending) = self.requests.lock().remove(&response.id) else {
            return false;
        };

        debug!(
            "Response {} for {} ({}) after {:?}",
            response.id,
            pending.path,
            response.status,
            pending.sent_at.elapsed()
        );

        let result = if response.is_success() {
            Ok(Response::from(response))
        } else {
            Err(ChatError::ServiceResponse {
                status: response.status,
                message: response.message,
                body: response.body.into(),
            })
        };

        // The caller may have given up already
        let _ = pending.reply.send(result);
        true
    }

    /// Stop tracking a request
    pub(crate) fn remove(&self, id: u64) -> bool {
        self.requests.lock().remove(&id).is_some()
    }

    /// Fail every pending request, returning how many there were
    pub(crate) fn fail_all(&self, make_error: impl Fn() -> ChatError) -> usize {
        let drained: Vec<PendingRequest> = {
            let mut requests = self.requests.lock();
            requests.drain().map(|(_, pending)| pending).collect()
        };

        let count = drained.len();
        for pending in drained {
            let _ = pending.reply.send(Err(make_error()));
        }
        count
    }

    pub(crate) fn len(&self) -> usize {
        self.requests.lock().len()
    }
}
