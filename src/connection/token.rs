//! Unsubmitted-request tokens
//!
//! A token says "a request is about to be sent on this socket". While any
//! token is alive the socket wants to be open. Tokens are not `Clone`: each
//! one is released exactly once, when it is dropped or consumed by
//! [`ChatConnection::make_request`](super::ChatConnection::make_request).

use super::policy::SocketPolicy;
use super::ConnectionType;
use std::fmt;
use std::sync::Arc;

#[must_use = "dropping the token immediately releases the hold on the socket"]
pub struct UnsubmittedRequestToken {
    policy: Arc<SocketPolicy>,
    connection_type: ConnectionType,
}

impl UnsubmittedRequestToken {
    pub(crate) fn acquire(policy: Arc<SocketPolicy>, connection_type: ConnectionType) -> Self {
        policy.acquire_token();
        Self {
            policy,
            connection_type,
        }
    }

    /// Socket this token holds open
    pub fn connection_type(&self) -> ConnectionType {
        self.connection_type
    }
}

impl Drop for UnsubmittedRequestToken {
    fn drop(&mut self) {
        self.policy.release_token();
    }
}

impl fmt::Debug for UnsubmittedRequestToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UnsubmittedRequestToken")
            .field("connection_type", &self.connection_type)
            .finish()
    }
}
