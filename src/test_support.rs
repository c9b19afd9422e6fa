//! In-memory chat server and fixtures for tests

use crate::config::{ChatConfig, Credentials};
use crate::connection::{
    ChatConnection, ConnectionDependencies, ConnectionState, NeverExpires, StaticAccountStore,
};
use crate::transport::{MemoryConnector, MemoryListener};
use chat_shared::codec::{self, FrameDecoder};
use chat_shared::{headers, paths, Handshake, MessageKind, WireMessage, WireRequest, WireResponse};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream, WriteHalf};

/// Answers 200 with the request body
pub(crate) const ECHO: &str = "/v1/echo";
/// Never answered
pub(crate) const SILENT: &str = "/v1/silent";
/// Server drops the socket without answering
pub(crate) const HANG_UP: &str = "/v1/hang-up";
/// Followed by the status code to answer with
pub(crate) const STATUS_PREFIX: &str = "/v1/status/";

pub(crate) fn credentials() -> Credentials {
    Credentials::new("alice", "secret")
}

pub(crate) fn deps(
    connector: &MemoryConnector,
    credentials: Option<Credentials>,
) -> ConnectionDependencies {
    ConnectionDependencies {
        expiry: Arc::new(NeverExpires),
        accounts: Arc::new(StaticAccountStore::new(credentials)),
        connector: Arc::new(connector.clone()),
    }
}

pub(crate) fn config() -> ChatConfig {
    ChatConfig::default()
}

/// Wait (bounded) until the connection reaches `state`
pub(crate) async fn wait_for_state(connection: &ChatConnection, state: ConnectionState) {
    let mut rx = connection.subscribe_state();
    let reached = tokio::time::timeout(Duration::from_secs(120), rx.wait_for(|s| *s == state))
        .await
        .map(|r| r.is_ok())
        .unwrap_or(false);
    assert!(reached, "connection never reached {}", state);
}

#[derive(Debug, Clone, Default)]
pub(crate) struct FakeServerOptions {
    /// Message bodies delivered to identified sockets right after the
    /// handshake, followed by a queue-empty signal
    pub(crate) backlog: Vec<Vec<u8>>,
    /// Leave keepalives unanswered
    pub(crate) ignore_keepalives: bool,
}

/// What the fake server saw
#[derive(Default)]
pub(crate) struct ServerLog {
    pub(crate) handshakes: Mutex<Vec<Handshake>>,
    pub(crate) requests: Mutex<Vec<WireRequest>>,
    pub(crate) acks: Mutex<Vec<WireResponse>>,
}

impl ServerLog {
    pub(crate) fn handshake_count(&self) -> usize {
        self.handshakes.lock().len()
    }

    /// Client requests other than keepalives
    pub(crate) fn request_paths(&self) -> Vec<String> {
        self.requests
            .lock()
            .iter()
            .filter(|r| r.path != paths::KEEPALIVE)
            .map(|r| r.path.clone())
            .collect()
    }

    pub(crate) fn keepalive_count(&self) -> usize {
        self.requests
            .lock()
            .iter()
            .filter(|r| r.path == paths::KEEPALIVE)
            .count()
    }
}

/// Serve every connection accepted on `listener`
pub(crate) fn spawn_server(mut listener: MemoryListener, options: FakeServerOptions) -> Arc<ServerLog> {
    let log = Arc::new(ServerLog::default());
    let server_log = log.clone();
    tokio::spawn(async move {
        while let Some(stream) = listener.accept().await {
            tokio::spawn(serve(stream, server_log.clone(), options.clone()));
        }
    });
    log
}

async fn serve(stream: DuplexStream, log: Arc<ServerLog>, options: FakeServerOptions) {
    let (mut reader, mut writer) = tokio::io::split(stream);
    let mut decoder = FrameDecoder::new();
    let mut buf = vec![0u8; 4096];
    let push_ids = AtomicU64::new(10_000);

    loop {
        let n = match reader.read(&mut buf).await {
            Ok(0) | Err(_) => return,
            Ok(n) => n,
        };
        decoder.extend(&buf[..n]);

        while let Ok(Some(message)) = decoder.decode_next() {
            match message.message_kind() {
                MessageKind::Handshake => {
                    let Some(handshake) = message.handshake else { return };
                    let identified = handshake.is_identified();
                    log.handshakes.lock().push(handshake);

                    if identified {
                        for body in &options.backlog {
                            let id = push_ids.fetch_add(1, Ordering::SeqCst);
                            let mut push =
                                WireRequest::new(id, "PUT", paths::MESSAGE).with_body(body.clone());
                            push.headers.push(format!("{}:{}", headers::SERVER_TIMESTAMP, 1234));
                            if send(&mut writer, WireMessage::request(push)).await.is_err() {
                                return;
                            }
                        }
                        let id = push_ids.fetch_add(1, Ordering::SeqCst);
                        let empty = WireRequest::new(id, "PUT", paths::QUEUE_EMPTY);
                        if send(&mut writer, WireMessage::request(empty)).await.is_err() {
                            return;
                        }
                    }
                }
                MessageKind::Request => {
                    let Some(request) = message.request else { continue };
                    log.requests.lock().push(request.clone());

                    if request.path == HANG_UP {
                        return;
                    }
                    if request.path == paths::KEEPALIVE && options.ignore_keepalives {
                        continue;
                    }
                    if let Some(response) = respond(&request) {
                        if send(&mut writer, WireMessage::response(response)).await.is_err() {
                            return;
                        }
                    }
                }
                MessageKind::Response => {
                    if let Some(response) = message.response {
                        log.acks.lock().push(response);
                    }
                }
                MessageKind::Unknown => {}
            }
        }
    }
}

fn respond(request: &WireRequest) -> Option<WireResponse> {
    let path = request.path.as_str();
    if path == SILENT {
        return None;
    }
    if path == paths::KEEPALIVE {
        return Some(WireResponse::new(request.id, 200, "OK"));
    }
    if path == ECHO {
        return Some(WireResponse::new(request.id, 200, "OK").with_body(request.body.clone()));
    }
    if let Some(code) = path.strip_prefix(STATUS_PREFIX) {
        let status = code.parse().unwrap_or(500);
        return Some(WireResponse::new(request.id, status, format!("Status {}", status)));
    }
    Some(WireResponse::new(request.id, 404, "Not Found"))
}

async fn send(writer: &mut WriteHalf<DuplexStream>, message: WireMessage) -> std::io::Result<()> {
    let encoded = codec::encode(&message)
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
    writer.write_all(&encoded).await?;
    writer.flush().await
}

/// Poll `condition` until it holds, giving up after a long (virtual) while
pub(crate) async fn eventually(mut condition: impl FnMut() -> bool) -> bool {
    for _ in 0..1000 {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    condition()
}
