//! Should-be-open policy for a chat socket
//!
//! A socket wants its transport open while someone needs it: the app is in
//! the foreground, a caller holds an unsubmitted-request token, a request is
//! awaiting its response, or a push opened a keep-alive window. Expired
//! builds never connect, and the identified socket needs credentials.

use crate::config::Credentials;
use crate::connection::ConnectionType;
use parking_lot::{Mutex, RwLock};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{watch, Notify};
use tokio::time::{Duration, Instant};

/// Decides whether this build may still talk to the service
pub trait AppExpiry: Send + Sync + 'static {
    fn is_expired(&self) -> bool;
}

/// Source of the account credentials used by the identified socket
pub trait AccountStore: Send + Sync + 'static {
    /// `None` while the device is not registered
    fn credentials(&self) -> Option<Credentials>;
}

/// Expiry policy for builds that never expire
#[derive(Debug, Default, Clone, Copy)]
pub struct NeverExpires;

impl AppExpiry for NeverExpires {
    fn is_expired(&self) -> bool {
        false
    }
}

/// Expiry policy driven by a flag, e.g. a remote kill switch
#[derive(Debug, Default)]
pub struct ExpiryFlag {
    expired: AtomicBool,
}

impl ExpiryFlag {
    pub fn new(expired: bool) -> Self {
        Self {
            expired: AtomicBool::new(expired),
        }
    }

    pub fn set_expired(&self, expired: bool) {
        self.expired.store(expired, Ordering::SeqCst);
    }
}

impl AppExpiry for ExpiryFlag {
    fn is_expired(&self) -> bool {
        self.expired.load(Ordering::SeqCst)
    }
}

/// Account store holding credentials in memory
#[derive(Debug, Default)]
pub struct StaticAccountStore {
    credentials: RwLock<Option<Credentials>>,
}

impl StaticAccountStore {
    pub fn new(credentials: Option<Credentials>) -> Self {
        Self {
            credentials: RwLock::new(credentials),
        }
    }

    /// Replace the stored credentials (registration or re-registration)
    pub fn set_credentials(&self, credentials: Option<Credentials>) {
        *self.credentials.write() = credentials;
    }
}

impl AccountStore for StaticAccountStore {
    fn credentials(&self) -> Option<Credentials> {
        self.credentials.read().clone()
    }
}

/// Inputs to the should-be-open decision for one socket
pub(crate) struct SocketPolicy {
    connection_type: ConnectionType,
    expiry: Arc<dyn AppExpiry>,
    accounts: Arc<dyn AccountStore>,
    app_active: AtomicBool,
    tokens: AtomicUsize,
    keepalive_until: Mutex<Option<Instant>>,
    shutdown: watch::Sender<bool>,
    /// Any input changed
    wake: Notify,
    /// Skip the current reconnect backoff
    reconnect: Notify,
}

impl SocketPolicy {
    pub(crate) fn new(
        connection_type: ConnectionType,
        expiry: Arc<dyn AppExpiry>,
        accounts: Arc<dyn AccountStore>,
    ) -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            connection_type,
            expiry,
            accounts,
            app_active: AtomicBool::new(false),
            tokens: AtomicUsize::new(0),
            keepalive_until: Mutex::new(None),
            shutdown,
            wake: Notify::new(),
            reconnect: Notify::new(),
        }
    }

    /// Whether the transport should be open, given the pending request count
    pub(crate) fn should_be_open(&self, pending_requests: usize) -> bool {
        if self.is_shut_down() || self.expiry.is_expired() {
            return false;
        }
        if self.connection_type == ConnectionType::Identified && self.credentials().is_none() {
            return false;
        }

        self.app_active.load(Ordering::SeqCst)
            || self.outstanding_tokens() > 0
            || pending_requests > 0
            || self.keepalive_deadline().is_some()
    }

    pub(crate) fn credentials(&self) -> Option<Credentials> {
        self.accounts.credentials()
    }

    pub(crate) fn set_app_active(&self, active: bool) {
        if self.app_active.swap(active, Ordering::SeqCst) != active {
            self.wake();
        }
    }

    pub(crate) fn acquire_token(&self) {
        self.tokens.fetch_add(1, Ordering::SeqCst);
        self.wake();
    }

    pub(crate) fn release_token(&self) {
        self.tokens.fetch_sub(1, Ordering::SeqCst);
        self.wake();
    }

    pub(crate) fn outstanding_tokens(&self) -> usize {
        self.tokens.load(Ordering::SeqCst)
    }

    /// Keep the socket wanted-open for at least `duration` from now
    pub(crate) fn extend_keepalive(&self, duration: Duration) {
        let until = Instant::now() + duration;
        {
            let mut slot = self.keepalive_until.lock();
            if slot.map_or(true, |current| current < until) {
                *slot = Some(until);
            }
        }
        self.wake();
    }

    /// End of the keep-alive window, if it has not elapsed yet
    pub(crate) fn keepalive_deadline(&self) -> Option<Instant> {
        let now = Instant::now();
        self.keepalive_until.lock().filter(|until| *until > now)
    }

    pub(crate) fn wake(&self) {
        self.wake.notify_one();
    }

    pub(crate) async fn woken(&self) {
        self.wake.notified().await;
    }

    /// Wake a reconnect backoff that is in progress; no effect otherwise
    pub(crate) fn request_reconnect(&self) {
        self.reconnect.notify_waiters();
    }

    pub(crate) async fn reconnect_requested(&self) {
        self.reconnect.notified().await;
    }

    pub(crate) fn shut_down(&self) {
        self.shutdown.send_replace(true);
        self.wake();
        self.request_reconnect();
    }

    pub(crate) fn is_shut_down(&self) -> bool {
        *self.shutdown.borrow()
    }

    pub(crate) fn subscribe_shutdown(&self) -> watch::Receiver<bool> {
        self.shutdown.subscribe()
    }
}
