//! Session manager for tracking signed-in accounts
//!
//! Every message lands in its recipient's mailbox and stays there until the
//! recipient's client acknowledges the push. Delivery is at least once: a
//! push that was never acknowledged is sent again on the next login.

use super::connection::SessionHandle;
use chat_shared::now_ms;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::RwLock;
use tracing::debug;

/// A message not yet acknowledged by its recipient
#[derive(Debug, Clone, PartialEq)]
pub struct QueuedMessage {
    /// Also the id of the push request carrying it
    pub id: u64,
    pub body: Vec<u8>,
    pub server_timestamp: u64,
}

/// Where a delivered message went
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// Pushed down the recipient's identified socket, awaiting its ack
    Live,
    /// Stored until the recipient connects
    Queued,
}

/// Tracks live identified sessions and per-account mailboxes
pub struct SessionManager {
    /// login -> password
    accounts: HashMap<String, String>,
    /// Ids for server-initiated requests
    next_id: AtomicU64,
    state: RwLock<State>,
}

#[derive(Default)]
struct State {
    /// login -> live session
    sessions: HashMap<String, SessionHandle>,
    /// login -> messages not yet acknowledged
    mailboxes: HashMap<String, VecDeque<QueuedMessage>>,
}

impl SessionManager {
    pub fn new(accounts: HashMap<String, String>) -> Self {
        Self {
            accounts,
            next_id: AtomicU64::new(1),
            state: RwLock::new(State::default()),
        }
    }

    /// Check a login/password pair against the account table
    pub fn authenticate(&self, login: &str, password: &str) -> bool {
        self.accounts.get(login).is_some_and(|p| p == password)
    }

    pub fn has_account(&self, login: &str) -> bool {
        self.accounts.contains_key(login)
    }

    /// Id for the next server-initiated request
    pub fn next_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::SeqCst)
    }

    /// Make `handle` the live session for its account and push the backlog
    ///
    /// Replaces any older session for the same account. Unacknowledged
    /// messages and the queue-empty signal are pushed under the same lock, so
    /// a concurrent delivery cannot overtake the backlog. Messages stay in the
    /// mailbox until acknowledged. Returns how many were pushed.
    pub async fn register(&self, handle: SessionHandle) -> usize {
        let mut state = self.state.write().await;
        let login = handle.login.clone();

        let mut pushed = 0;
        if let Some(mailbox) = state.mailboxes.get(&login) {
            for message in mailbox {
                if handle.push_message(message) {
                    pushed += 1;
                }
            }
        }
        handle.push_queue_empty(self.next_id());

        if state.sessions.insert(login.clone(), handle).is_some() {
            debug!("Replaced older session for {}", login);
        }
        pushed
    }

    /// Drop the live session for `login` if it is still `session_id`
    pub async fn unregister(&self, login: &str, session_id: u64) {
        let mut state = self.state.write().await;
        if state.sessions.get(login).is_some_and(|s| s.id == session_id) {
            state.sessions.remove(login);
        }
    }

    /// Deliver a message to an account; `None` if the account does not exist
    pub async fn deliver(&self, login: &str, body: Vec<u8>) -> Option<Delivery> {
        if !self.has_account(login) {
            return None;
        }

        let message = QueuedMessage {
            id: self.next_id(),
            body,
            server_timestamp: now_ms(),
        };

        let mut state = self.state.write().await;
        let pushed = state.sessions.get(login).map(|s| s.push_message(&message));
        let live = match pushed {
            Some(true) => true,
            Some(false) => {
                // Session is going away
                state.sessions.remove(login);
                false
            }
            None => false,
        };
        state
            .mailboxes
            .entry(login.to_string())
            .or_default()
            .push_back(message);

        Some(if live { Delivery::Live } else { Delivery::Queued })
    }

    /// The client confirmed message `id`; drop it from the mailbox
    pub async fn acknowledge(&self, login: &str, id: u64) -> bool {
        let mut state = self.state.write().await;
        let Some(mailbox) = state.mailboxes.get_mut(login) else {
            return false;
        };
        let Some(pos) = mailbox.iter().position(|m| m.id == id) else {
            return false;
        };
        mailbox.remove(pos);
        if mailbox.is_empty() {
            state.mailboxes.remove(login);
        }
        true
    }

    /// Whether `login` has a live identified session
    pub async fn is_online(&self, login: &str) -> bool {
        self.state.read().await.sessions.contains_key(login)
    }

    /// Number of messages `login` has not acknowledged yet
    pub async fn queued_count(&self, login: &str) -> usize {
        self.state
            .read()
            .await
            .mailboxes
            .get(login)
            .map_or(0, VecDeque::len)
    }
}
