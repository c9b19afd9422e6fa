//! Connection manager routing requests across the two chat sockets

use super::open_wait::wait_if_should_be_open;
use super::{ChatConnection, ConnectionDependencies, ConnectionState, ConnectionType};
use crate::config::ChatConfig;
use crate::error::Result;
use crate::request::{IncomingMessage, Request, Response};
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Messages the server pushed down either socket
pub type IncomingMessages = mpsc::UnboundedReceiver<IncomingMessage>;

/// Owns the identified and unidentified sockets and routes requests to them
///
/// The manager keeps no state of its own besides the two connections; all
/// synchronization lives inside each [`ChatConnection`]. Cloning shares the
/// same sockets.
#[derive(Clone)]
pub struct ConnectionManager {
    identified: ChatConnection,
    unidentified: ChatConnection,
    open_wait_timeout: Duration,
}

impl ConnectionManager {
    /// Create both connections and start their socket tasks
    ///
    /// Must be called inside a tokio runtime.
    pub fn new(config: ChatConfig, deps: ConnectionDependencies) -> (Self, IncomingMessages) {
        let (incoming_tx, incoming_rx) = mpsc::unbounded_channel();
        let open_wait_timeout = config.open_wait_timeout;

        let identified = ChatConnection::new(
            ConnectionType::Identified,
            config.clone(),
            deps.clone(),
            incoming_tx.clone(),
        );
        let unidentified =
            ChatConnection::new(ConnectionType::Unidentified, config, deps, incoming_tx);

        let manager = Self {
            identified,
            unidentified,
            open_wait_timeout,
        };
        (manager, incoming_rx)
    }

    /// Pick the socket a request travels on
    pub fn route(request: &Request) -> ConnectionType {
        if request.is_anonymous || !request.requires_authorization_headers {
            ConnectionType::Unidentified
        } else {
            ConnectionType::Identified
        }
    }

    pub fn connection(&self, connection_type: ConnectionType) -> &ChatConnection {
        match connection_type {
            ConnectionType::Identified => &self.identified,
            ConnectionType::Unidentified => &self.unidentified,
        }
    }

    /// Wait until the identified socket is open; no timeout at this layer
    pub async fn wait_for_identified_connection_to_open(&self) -> Result<()> {
        self.identified.wait_until_open().await
    }

    pub fn identified_connection_state(&self) -> ConnectionState {
        self.identified.state()
    }

    /// Whether the identified socket has delivered the server's initial backlog
    pub fn has_emptied_initial_queue(&self) -> bool {
        self.identified.has_emptied_initial_queue()
    }

    pub fn can_make_requests(&self, connection_type: ConnectionType) -> bool {
        self.connection(connection_type).can_make_requests()
    }

    /// Route, wait (bounded) for the socket, and dispatch
    ///
    /// The request is always submitted, even if the socket never opened; the
    /// connection's result is returned unchanged.
    pub async fn make_request(&self, request: Request) -> Result<Response> {
        let connection_type = Self::route(&request);
        if !flags_agree_with_route(&request, connection_type) {
            warn!(
                "Request {} {} has is_anonymous={} requires_authorization_headers={}; routing to {}",
                request.verb,
                request.path,
                request.is_anonymous,
                request.requires_authorization_headers,
                connection_type
            );
        }

        let connection = self.connection(connection_type);
        let token = connection.unsubmitted_request_token();
        wait_if_should_be_open(connection, self.open_wait_timeout).await;
        connection.make_request(request, token).await
    }

    /// A push arrived; wake both sockets
    pub fn did_receive_push(&self) {
        debug!("Push received, waking both sockets");
        for connection in [&self.identified, &self.unidentified] {
            connection.did_receive_push();
        }
    }

    /// Foreground apps keep both sockets open
    pub fn set_app_active(&self, active: bool) {
        self.identified.set_app_active(active);
        self.unidentified.set_app_active(active);
    }

    /// Reconnect the identified socket, e.g. after the credentials changed
    pub fn cycle_identified(&self) {
        self.identified.cycle();
    }

    /// Close both sockets for good
    pub async fn shutdown(&self) {
        futures::future::join(self.identified.shutdown(), self.unidentified.shutdown()).await;
    }
}

/// Whether the request's auth flags allow the socket it was routed to
fn flags_agree_with_route(request: &Request, connection_type: ConnectionType) -> bool {
    match connection_type {
        ConnectionType::Unidentified => !request.requires_authorization_headers,
        ConnectionType::Identified => !request.is_anonymous,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ChatError;
    use crate::test_support::{self, eventually, FakeServerOptions};
    use crate::transport::{memory_transport, MemoryConnector};
    use tokio::time::Instant;

    fn manager(
        connector: &MemoryConnector,
        credentials: Option<crate::config::Credentials>,
    ) -> (ConnectionManager, IncomingMessages) {
        ConnectionManager::new(
            test_support::config(),
            test_support::deps(connector, credentials),
        )
    }

    #[test]
    fn test_route_anonymous_to_unidentified() {
        let request = Request::get("/v1/profile").anonymous();
        assert_eq!(ConnectionManager::route(&request), ConnectionType::Unidentified);
    }

    #[test]
    fn test_route_without_authorization_to_unidentified() {
        let request = Request::get("/v1/profile").without_authorization();
        assert_eq!(ConnectionManager::route(&request), ConnectionType::Unidentified);
        assert!(flags_agree_with_route(&request, ConnectionType::Unidentified));
    }

    #[test]
    fn test_flags_disagreeing_with_route() {
        let mut request = Request::get("/v1/profile").anonymous();
        request.requires_authorization_headers = true;

        // Still routes, favoring the unidentified socket
        let route = ConnectionManager::route(&request);
        assert_eq!(route, ConnectionType::Unidentified);
        assert!(!flags_agree_with_route(&request, route));

        let normal = Request::get("/v1/profile");
        assert!(flags_agree_with_route(&normal, ConnectionManager::route(&normal)));
        let anonymous = Request::get("/v1/profile").anonymous();
        assert!(flags_agree_with_route(&anonymous, ConnectionManager::route(&anonymous)));
    }

    #[test]
    fn test_route_authorized_to_identified() {
        let request = Request::get("/v1/profile");
        assert_eq!(ConnectionManager::route(&request), ConnectionType::Identified);

        let both = Request::get("/v1/profile").anonymous().without_authorization();
        assert_eq!(ConnectionManager::route(&both), ConnectionType::Unidentified);
    }

    #[tokio::test(start_paused = true)]
    async fn test_getters_before_any_activity() {
        let (connector, _listener) = memory_transport();
        let (manager, _incoming) = manager(&connector, Some(test_support::credentials()));

        assert_eq!(manager.identified_connection_state(), ConnectionState::Closed);
        assert!(!manager.has_emptied_initial_queue());
        assert!(!manager.can_make_requests(ConnectionType::Identified));
        assert!(!manager.can_make_requests(ConnectionType::Unidentified));
        assert_eq!(connector.connect_attempts(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_request_on_open_socket_does_not_wait() {
        let (connector, listener) = memory_transport();
        let log = test_support::spawn_server(listener, FakeServerOptions::default());
        let (manager, _incoming) = manager(&connector, Some(test_support::credentials()));

        manager.set_app_active(true);
        manager
            .wait_for_identified_connection_to_open()
            .await
            .expect("open");

        let start = Instant::now();
        let response = manager
            .make_request(Request::put(test_support::ECHO, "ping"))
            .await
            .expect("response");

        assert!(start.elapsed() < Duration::from_secs(1));
        assert_eq!(&response.body[..], b"ping");
        assert!(log.handshakes.lock().iter().any(|h| h.is_identified()));
        assert_eq!(manager.connection(ConnectionType::Identified).outstanding_tokens(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_anonymous_request_uses_unidentified_socket() {
        let (connector, listener) = memory_transport();
        let log = test_support::spawn_server(listener, FakeServerOptions::default());
        let (manager, _incoming) = manager(&connector, Some(test_support::credentials()));

        let response = manager
            .make_request(Request::put(test_support::ECHO, "anon").anonymous())
            .await
            .expect("response");

        assert_eq!(&response.body[..], b"anon");
        let handshakes = log.handshakes.lock().clone();
        assert_eq!(handshakes.len(), 1);
        assert!(!handshakes[0].is_identified());
    }

    #[tokio::test(start_paused = true)]
    async fn test_inconsistent_request_is_still_dispatched() {
        let (connector, listener) = memory_transport();
        let log = test_support::spawn_server(listener, FakeServerOptions::default());
        let (manager, _incoming) = manager(&connector, Some(test_support::credentials()));

        let mut request = Request::get(test_support::ECHO).anonymous();
        request.requires_authorization_headers = true;
        let response = manager.make_request(request).await.expect("response");

        assert_eq!(response.status, 200);
        assert!(!log.handshakes.lock()[0].is_identified());
    }

    #[tokio::test(start_paused = true)]
    async fn test_unreachable_server_fails_after_open_wait() {
        let (connector, _listener) = memory_transport();
        connector.set_reachable(false);
        let (manager, _incoming) = manager(&connector, Some(test_support::credentials()));

        let start = Instant::now();
        let err = manager
            .make_request(Request::get("/v1/profile"))
            .await
            .expect_err("should fail");

        let waited = start.elapsed();
        assert!(err.is_transport_failure(), "unexpected error: {}", err);
        assert!(waited >= Duration::from_secs(30), "returned early: {:?}", waited);
        assert!(waited < Duration::from_secs(31), "waited too long: {:?}", waited);

        let identified = manager.connection(ConnectionType::Identified);
        assert_eq!(identified.outstanding_tokens(), 0);
        assert_eq!(identified.pending_requests(), 0);
        assert!(!identified.should_be_open());
    }

    #[tokio::test(start_paused = true)]
    async fn test_identified_request_without_credentials_fails_fast() {
        let (connector, _listener) = memory_transport();
        let (manager, _incoming) = manager(&connector, None);

        let start = Instant::now();
        let err = manager
            .make_request(Request::get("/v1/profile"))
            .await
            .expect_err("should fail");

        assert!(matches!(err, ChatError::NotConnected(ConnectionType::Identified)));
        assert_eq!(start.elapsed(), Duration::ZERO);
        assert_eq!(connector.connect_attempts(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_requests_on_both_sockets() {
        let (connector, listener) = memory_transport();
        let log = test_support::spawn_server(listener, FakeServerOptions::default());
        let (manager, _incoming) = manager(&connector, Some(test_support::credentials()));

        let (identified, unidentified) = tokio::join!(
            manager.make_request(Request::put(test_support::ECHO, "mine")),
            manager.make_request(Request::put(test_support::ECHO, "anyone").anonymous()),
        );

        assert_eq!(&identified.expect("identified").body[..], b"mine");
        assert_eq!(&unidentified.expect("unidentified").body[..], b"anyone");
        assert_eq!(log.handshake_count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_push_opens_both_sockets() {
        let (connector, listener) = memory_transport();
        let options = FakeServerOptions {
            backlog: vec![b"while you were away".to_vec()],
            ..Default::default()
        };
        let _log = test_support::spawn_server(listener, options);
        let (manager, mut incoming) = manager(&connector, Some(test_support::credentials()));

        manager.did_receive_push();
        assert!(manager.connection(ConnectionType::Identified).should_be_open());
        assert!(manager.connection(ConnectionType::Unidentified).should_be_open());

        let message = incoming.recv().await.expect("backlog message");
        assert_eq!(&message.body[..], b"while you were away");
        assert!(eventually(|| manager.has_emptied_initial_queue()).await);
        assert!(eventually(|| manager.can_make_requests(ConnectionType::Unidentified)).await);

        // Both close once the push window runs out
        assert!(
            eventually(|| {
                !manager.can_make_requests(ConnectionType::Identified)
                    && !manager.can_make_requests(ConnectionType::Unidentified)
            })
            .await
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_cycle_identified_reconnects() {
        let (connector, listener) = memory_transport();
        let log = test_support::spawn_server(listener, FakeServerOptions::default());
        let (manager, _incoming) = manager(&connector, Some(test_support::credentials()));

        manager.set_app_active(true);
        manager
            .wait_for_identified_connection_to_open()
            .await
            .expect("open");
        let identified_handshakes =
            || log.handshakes.lock().iter().filter(|h| h.is_identified()).count();
        assert!(eventually(|| identified_handshakes() == 1).await);

        manager.cycle_identified();
        assert!(eventually(|| identified_handshakes() == 2).await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_stops_both_sockets() {
        let (connector, listener) = memory_transport();
        let _log = test_support::spawn_server(listener, FakeServerOptions::default());
        let (manager, _incoming) = manager(&connector, Some(test_support::credentials()));

        manager.set_app_active(true);
        manager
            .wait_for_identified_connection_to_open()
            .await
            .expect("open");

        manager.shutdown().await;
        assert_eq!(manager.identified_connection_state(), ConnectionState::Closed);
        assert!(!manager.can_make_requests(ConnectionType::Unidentified));

        let err = manager
            .wait_for_identified_connection_to_open()
            .await
            .expect_err("should fail");
        assert!(matches!(err, ChatError::ConnectionShutdown(ConnectionType::Identified)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_for_identified_fails_when_unreachable() {
        let (connector, _listener) = memory_transport();
        connector.set_reachable(false);
        let (manager, _incoming) = manager(&connector, Some(test_support::credentials()));

        manager.set_app_active(true);
        let result = tokio::time::timeout(
            Duration::from_secs(600),
            manager.wait_for_identified_connection_to_open(),
        )
        .await
        .expect("should not wait forever");

        let err = result.expect_err("should fail");
        assert!(err.is_transport_failure(), "unexpected error: {}", err);
        assert_eq!(manager.identified_connection_state(), ConnectionState::Closed);
    }
}
