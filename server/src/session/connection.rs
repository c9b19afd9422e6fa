//! Individual chat session handling

use super::manager::{QueuedMessage, SessionManager};
use anyhow::{anyhow, bail, Result};
use chat_shared::{
    codec::{self, FrameDecoder},
    headers, paths, timing, Handshake, MessageKind, WireMessage, WireRequest, WireResponse,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Handle to push server-initiated requests to a signed-in session
#[derive(Clone)]
pub struct SessionHandle {
    pub id: u64,
    pub login: String,
    outbound: mpsc::UnboundedSender<WireMessage>,
}

impl SessionHandle {
    pub fn new(id: u64, login: impl Into<String>, outbound: mpsc::UnboundedSender<WireMessage>) -> Self {
        Self {
            id,
            login: login.into(),
            outbound,
        }
    }

    /// Push a message delivery under the message's id; false if the session is gone
    pub fn push_message(&self, message: &QueuedMessage) -> bool {
        let mut request = WireRequest::new(message.id, "PUT", paths::MESSAGE)
            .with_body(message.body.clone());
        request
            .headers
            .push(format!("{}:{}", headers::SERVER_TIMESTAMP, message.server_timestamp));
        self.outbound.send(WireMessage::request(request)).is_ok()
    }

    /// Tell the client its backlog has been delivered
    pub fn push_queue_empty(&self, id: u64) -> bool {
        let request = WireRequest::new(id, "PUT", paths::QUEUE_EMPTY);
        self.outbound.send(WireMessage::request(request)).is_ok()
    }
}

/// Frame reader over the read half of a socket
struct FrameReader<R> {
    reader: R,
    decoder: FrameDecoder,
    read_buf: Vec<u8>,
}

impl<R: AsyncRead + Unpin> FrameReader<R> {
    fn new(reader: R) -> Self {
        Self {
            reader,
            decoder: FrameDecoder::new(),
            read_buf: vec![0u8; 4096],
        }
    }

    /// Read the next frame
    /// Returns None if the connection is closed
    async fn recv(&mut self) -> Result<Option<WireMessage>> {
        loop {
            // First try to decode from existing buffer
            if let Some(message) = self.decoder.decode_next()? {
                return Ok(Some(message));
            }

            // Read more data
            let n = self.reader.read(&mut self.read_buf).await?;
            if n == 0 {
                return Ok(None);
            }
            self.decoder.extend(&self.read_buf[..n]);
        }
    }
}

/// One client socket, from handshake to close
pub struct ChatSession<S> {
    id: u64,
    peer: String,
    frames: FrameReader<ReadHalf<S>>,
    writer: WriteHalf<S>,
}

impl<S: AsyncRead + AsyncWrite + Send + Unpin + 'static> ChatSession<S> {
    pub fn new(id: u64, stream: S, peer: impl Into<String>) -> Self {
        let (reader, writer) = tokio::io::split(stream);
        Self {
            id,
            peer: peer.into(),
            frames: FrameReader::new(reader),
            writer,
        }
    }

    /// Authenticate, then serve requests until the client goes away
    pub async fn run(self, manager: Arc<SessionManager>) -> Result<()> {
        let Self {
            id,
            peer,
            mut frames,
            mut writer,
        } = self;

        let handshake = read_handshake(&mut frames).await?;
        let login = authenticate(&manager, &handshake)?;
        info!(
            "[{}] Session {} open: {}",
            peer,
            id,
            login.as_deref().unwrap_or("unidentified")
        );

        let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel::<WireMessage>();
        if let Some(login) = &login {
            let pushed = manager
                .register(SessionHandle::new(id, login.clone(), outbound_tx.clone()))
                .await;
            debug!("[{}] Pushed {} queued messages", peer, pushed);
        }

        let result = loop {
            tokio::select! {
                Some(message) = outbound_rx.recv() => {
                    if let Err(e) = write_frame(&mut writer, &message).await {
                        break Err(e);
                    }
                }
                frame = frames.recv() => {
                    let message = match frame {
                        Ok(Some(message)) => message,
                        Ok(None) => break Ok(()),
                        Err(e) => break Err(e),
                    };
                    match message.message_kind() {
                        MessageKind::Request => {
                            let Some(request) = message.request else { continue };
                            let response = handle_request(&manager, login.as_deref(), request).await;
                            if let Err(e) = write_frame(&mut writer, &WireMessage::response(response)).await {
                                break Err(e);
                            }
                        }
                        MessageKind::Response => {
                            let (Some(ack), Some(login)) = (message.response, login.as_deref()) else {
                                continue;
                            };
                            if !ack.is_success() {
                                warn!("[{}] Push {} answered {}, keeping it queued", peer, ack.id, ack.status);
                            } else if manager.acknowledge(login, ack.id).await {
                                debug!("[{}] Message {} acknowledged", peer, ack.id);
                            }
                        }
                        other => warn!("[{}] Unexpected {:?} frame", peer, other),
                    }
                }
            }
        };

        // Late deliveries must see a dead session and stay queued
        drop(outbound_rx);
        drop(outbound_tx);
        if let Some(login) = &login {
            manager.unregister(login, id).await;
        }
        info!("[{}] Session {} closed", peer, id);
        result
    }
}

async fn read_handshake<R: AsyncRead + Unpin>(frames: &mut FrameReader<R>) -> Result<Handshake> {
    let limit = Duration::from_millis(timing::CONNECT_TIMEOUT_MS);
    let message = tokio::time::timeout(limit, frames.recv())
        .await
        .map_err(|_| anyhow!("no handshake within {:?}", limit))??
        .ok_or_else(|| anyhow!("closed before handshake"))?;

    if message.message_kind() != MessageKind::Handshake {
        bail!("expected handshake, got {:?}", message.message_kind());
    }
    message
        .handshake
        .ok_or_else(|| anyhow!("handshake frame without payload"))
}

/// Signed-in login for identified handshakes, `None` for unidentified ones
fn authenticate(manager: &SessionManager, handshake: &Handshake) -> Result<Option<String>> {
    match (&handshake.login, &handshake.password) {
        (None, _) => Ok(None),
        (Some(login), Some(password)) if manager.authenticate(login, password) => {
            Ok(Some(login.clone()))
        }
        (Some(login), _) => bail!("authentication failed for {}", login),
    }
}

/// Answer one client request
async fn handle_request(
    manager: &SessionManager,
    login: Option<&str>,
    request: WireRequest,
) -> WireResponse {
    let id = request.id;
    match (request.verb.as_str(), request.path.as_str()) {
        ("GET", paths::KEEPALIVE) => WireResponse::new(id, 200, "OK"),
        ("GET", paths::WHOAMI) => match login {
            Some(login) => WireResponse::new(id, 200, "OK").with_body(login.as_bytes().to_vec()),
            None => WireResponse::new(id, 401, "Unauthorized"),
        },
        ("PUT", path) if path.starts_with(paths::MESSAGES_PREFIX) => {
            let recipient = &path[paths::MESSAGES_PREFIX.len()..];
            match manager.deliver(recipient, request.body).await {
                Some(delivery) => {
                    debug!(
                        "Message from {} to {}: {:?}",
                        login.unwrap_or("sealed sender"),
                        recipient,
                        delivery
                    );
                    WireResponse::new(id, 200, "OK")
                }
                None => WireResponse::new(id, 404, "Unknown recipient"),
            }
        }
        _ => WireResponse::new(id, 404, "Not Found"),
    }
}

async fn write_frame<W: AsyncWrite + Unpin>(writer: &mut W, message: &WireMessage) -> Result<()> {
    let encoded = codec::encode(message)?;
    writer.write_all(&encoded).await?;
    writer.flush().await?;
    Ok(())
}
