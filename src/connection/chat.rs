//! A single persistent chat socket

use super::driver;
use super::pending::PendingRequests;
use super::policy::{AccountStore, AppExpiry, SocketPolicy};
use super::state::{next_state, ConnectionState, ConnectionType, SocketEvent};
use super::token::UnsubmittedRequestToken;
use crate::config::ChatConfig;
use crate::error::{ChatError, Result};
use crate::request::{IncomingMessage, Request, Response};
use crate::transport::TransportConnector;
use chat_shared::WireMessage;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Collaborators injected at construction
#[derive(Clone)]
pub struct ConnectionDependencies {
    pub expiry: Arc<dyn AppExpiry>,
    pub accounts: Arc<dyn AccountStore>,
    pub connector: Arc<dyn TransportConnector>,
}

/// Handle to one chat socket
///
/// Cloning is cheap; every clone drives the same socket. The socket task is
/// spawned on construction, so this must be created inside a tokio runtime.
#[derive(Clone)]
pub struct ChatConnection {
    inner: Arc<Inner>,
}

pub(super) struct Inner {
    pub(super) connection_type: ConnectionType,
    pub(super) config: ChatConfig,
    pub(super) connector: Arc<dyn TransportConnector>,
    pub(super) policy: Arc<SocketPolicy>,
    pub(super) pending: PendingRequests,
    pub(super) state: watch::Sender<ConnectionState>,
    /// Writer queue of the currently open socket
    pub(super) outbound: Mutex<Option<mpsc::UnboundedSender<WireMessage>>>,
    pub(super) queue_emptied: AtomicBool,
    pub(super) cycle_requested: AtomicBool,
    pub(super) incoming: mpsc::UnboundedSender<IncomingMessage>,
    /// Reason the latest attempt failed before the server answered
    last_failure: watch::Sender<Option<String>>,
    driver: Mutex<Option<JoinHandle<()>>>,
}

impl Inner {
    pub(super) fn should_be_open(&self) -> bool {
        self.policy.should_be_open(self.pending.len())
    }

    /// Publish a failed attempt to anyone waiting for the socket to open
    pub(super) fn record_failure(&self, reason: String) {
        self.last_failure.send_replace(Some(reason));
    }

    /// Apply a state machine event and publish the result
    pub(super) fn transition(&self, event: SocketEvent) {
        let connection_type = self.connection_type;
        self.state.send_if_modified(|state| match next_state(*state, event) {
            Some(next) if next != *state => {
                debug!("[{}] {} -> {}", connection_type, state, next);
                *state = next;
                true
            }
            Some(_) => false,
            None => {
                warn!(
                    "[{}] Ignoring {:?} while {}",
                    connection_type, event, state
                );
                false
            }
        });
    }
}

impl ChatConnection {
    /// Create the connection and start its socket task
    pub fn new(
        connection_type: ConnectionType,
        config: ChatConfig,
        deps: ConnectionDependencies,
        incoming: mpsc::UnboundedSender<IncomingMessage>,
    ) -> Self {
        let policy = Arc::new(SocketPolicy::new(
            connection_type,
            deps.expiry,
            deps.accounts,
        ));
        let (state, _) = watch::channel(ConnectionState::Closed);

        let inner = Arc::new(Inner {
            connection_type,
            config,
            connector: deps.connector,
            policy,
            pending: PendingRequests::new(),
            state,
            outbound: Mutex::new(None),
            queue_emptied: AtomicBool::new(false),
            cycle_requested: AtomicBool::new(false),
            incoming,
            last_failure: watch::channel(None).0,
            driver: Mutex::new(None),
        });

        let handle = tokio::spawn(driver::run(inner.clone()));
        *inner.driver.lock() = Some(handle);

        Self { inner }
    }

    pub fn connection_type(&self) -> ConnectionType {
        self.inner.connection_type
    }

    /// Current socket state
    pub fn state(&self) -> ConnectionState {
        *self.inner.state.borrow()
    }

    /// Watch socket state changes
    pub fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.inner.state.subscribe()
    }

    /// Whether a request submitted now would be written immediately
    pub fn can_make_requests(&self) -> bool {
        self.state().is_open()
    }

    /// Whether the server has delivered its initial message backlog on the
    /// current socket
    pub fn has_emptied_initial_queue(&self) -> bool {
        self.inner.queue_emptied.load(Ordering::SeqCst)
    }

    /// Whether the socket currently wants its transport open
    pub fn should_be_open(&self) -> bool {
        self.inner.should_be_open()
    }

    pub fn outstanding_tokens(&self) -> usize {
        self.inner.policy.outstanding_tokens()
    }

    pub fn pending_requests(&self) -> usize {
        self.inner.pending.len()
    }

    /// Signal intent to send; holds the socket open until released
    pub fn unsubmitted_request_token(&self) -> UnsubmittedRequestToken {
        UnsubmittedRequestToken::acquire(self.inner.policy.clone(), self.inner.connection_type)
    }

    /// Wait until the socket is open
    ///
    /// Resolves immediately if it already is. Fails with
    /// [`ChatError::Transport`] as soon as an attempt fails, either at
    /// connect or by closing before the server said anything, and with
    /// [`ChatError::ConnectionShutdown`] after shutdown.
    pub async fn wait_until_open(&self) -> Result<()> {
        let failure_rx = self.inner.last_failure.subscribe();
        let state_rx = self.inner.state.subscribe();
        let shutdown_rx = self.inner.policy.subscribe_shutdown();

        tokio::select! {
            biased;
            _ = wait_for_shutdown(shutdown_rx) => {
                Err(ChatError::ConnectionShutdown(self.inner.connection_type))
            }
            opened = wait_for_open(state_rx) => {
                if opened {
                    Ok(())
                } else {
                    Err(ChatError::ConnectionShutdown(self.inner.connection_type))
                }
            }
            Some(reason) = wait_for_failure(failure_rx) => {
                Err(ChatError::Transport(reason))
            }
        }
    }

    /// Wait until the socket is open, riding out failed attempts while the
    /// socket task keeps reconnecting
    ///
    /// Fails only when the connection is shut down.
    pub(crate) async fn wait_until_open_retrying(&self) -> Result<()> {
        let state_rx = self.inner.state.subscribe();
        let shutdown_rx = self.inner.policy.subscribe_shutdown();

        tokio::select! {
            biased;
            _ = wait_for_shutdown(shutdown_rx) => {
                Err(ChatError::ConnectionShutdown(self.inner.connection_type))
            }
            opened = wait_for_open(state_rx) => {
                if opened {
                    Ok(())
                } else {
                    Err(ChatError::ConnectionShutdown(self.inner.connection_type))
                }
            }
        }
    }

    /// Submit a request, consuming the token that held the socket open
    ///
    /// Fails immediately with [`ChatError::NotConnected`] if the socket is
    /// not open. The pending entry takes over the token's hold, so the socket
    /// stays wanted until the response (or failure) arrives.
    pub async fn make_request(
        &self,
        request: Request,
        token: UnsubmittedRequestToken,
    ) -> Result<Response> {
        let inner = &self.inner;
        if token.connection_type() != inner.connection_type {
            warn!(
                "[{}] Submitting with a token taken from the {} socket",
                inner.connection_type,
                token.connection_type()
            );
        }

        let id = inner.pending.next_id();
        let (_entry, reply) = PendingGuard::register(inner, id, &request.path);
        drop(token);

        let sender = inner.outbound.lock().clone();
        let Some(sender) = sender else {
            debug!(
                "[{}] {} {} failed: socket not open",
                inner.connection_type, request.verb, request.path
            );
            return Err(ChatError::NotConnected(inner.connection_type));
        };

        let timeout = request.timeout.unwrap_or(inner.config.request_timeout);
        let path = request.path.clone();
        debug!(
            "[{}] Sending request {}: {} {}",
            inner.connection_type, id, request.verb, path
        );

        if sender.send(WireMessage::request(request.to_wire(id))).is_err() {
            return Err(ChatError::NotConnected(inner.connection_type));
        }

        match tokio::time::timeout(timeout, reply).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(ChatError::ConnectionClosed(inner.connection_type)),
            Err(_) => {
                warn!("[{}] Request {} {} timed out", inner.connection_type, id, path);
                Err(ChatError::Timeout {
                    path,
                    elapsed: timeout,
                })
            }
        }
    }

    /// Hint that a push arrived: keep the socket wanted for a while and skip
    /// any reconnect backoff
    pub fn did_receive_push(&self) {
        debug!("[{}] Push received", self.inner.connection_type);
        self.inner.policy.extend_keepalive(self.inner.config.push_keepalive);
        self.inner.policy.request_reconnect();
    }

    /// Foreground apps keep both sockets open
    pub fn set_app_active(&self, active: bool) {
        self.inner.policy.set_app_active(active);
    }

    /// Drop the current socket and reconnect if still wanted, e.g. after a
    /// credential change
    pub fn cycle(&self) {
        info!("[{}] Cycling socket", self.inner.connection_type);
        self.inner.cycle_requested.store(true, Ordering::SeqCst);
        self.inner.policy.wake();
        self.inner.policy.request_reconnect();
    }

    /// Close the socket for good and wait for its task to finish
    pub async fn shutdown(&self) {
        self.inner.policy.shut_down();
        let handle = self.inner.driver.lock().take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                warn!("[{}] Socket task ended abnormally: {}", self.inner.connection_type, e);
            }
        }
    }
}

async fn wait_for_open(mut state_rx: watch::Receiver<ConnectionState>) -> bool {
    state_rx.wait_for(|state| state.is_open()).await.is_ok()
}

async fn wait_for_failure(mut failure_rx: watch::Receiver<Option<String>>) -> Option<String> {
    failure_rx.changed().await.ok()?;
    let reason = failure_rx.borrow_and_update().clone();
    reason
}

async fn wait_for_shutdown(mut shutdown_rx: watch::Receiver<bool>) {
    let _ = shutdown_rx.wait_for(|down| *down).await;
}

/// Pending-table entry that is removed on every exit path
struct PendingGuard<'a> {
    inner: &'a Inner,
    id: u64,
}

impl<'a> PendingGuard<'a> {
    fn register(inner: &'a Inner, id: u64, path: &str) -> (Self, oneshot::Receiver<Result<Response>>) {
        let reply = inner.pending.register(id, path);
        (Self { inner, id }, reply)
    }
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        if self.inner.pending.remove(self.id) {
            self.inner.policy.wake();
        }
    }
}
