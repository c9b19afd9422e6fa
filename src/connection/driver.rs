//! Socket task
//!
//! One task per connection. It keeps the transport open while the socket is
//! wanted, reconnecting with exponential backoff, and runs the open socket:
//! outbound writes, inbound frame decoding, keepalives and server-initiated
//! requests.

use super::chat::Inner;
use super::state::{ConnectionType, SocketEvent};
use crate::error::{ChatError, Result};
use crate::request::{find_header, IncomingMessage};
use crate::transport::TransportStream;
use bytes::Bytes;
use chat_shared::codec::{self, FrameDecoder};
use chat_shared::{headers, paths, Handshake, MessageKind, WireMessage, WireRequest, WireResponse};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::{mpsc, watch};
use tokio::time::{interval_at, sleep, sleep_until, timeout, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

/// Why an open socket stopped
enum SocketClose {
    /// Nothing needs the socket any more
    Unwanted,
    /// Dropped on request, reconnect right away if still wanted
    Cycled,
    /// Transport or protocol failure
    Failed { reason: String, received_any: bool },
}

/// Main socket loop with reconnection logic
pub(super) async fn run(inner: Arc<Inner>) {
    let base_delay = inner.config.reconnect_delay;
    let mut reconnect_delay = base_delay;

    while !inner.policy.is_shut_down() {
        if !inner.should_be_open() {
            inner.transition(SocketEvent::Closed);
            inner.policy.woken().await;
            continue;
        }
        // Nothing to cycle while closed
        inner.cycle_requested.store(false, Ordering::SeqCst);

        inner.transition(SocketEvent::ConnectStarted);
        let stream = match connect(&inner).await {
            Ok(stream) => stream,
            Err(e) => {
                warn!(
                    "[{}] Connect via {} failed: {}",
                    inner.connection_type,
                    inner.connector.name(),
                    e
                );
                inner.transition(SocketEvent::ConnectFailed);
                inner.record_failure(e.to_string());
                backoff(&inner, &mut reconnect_delay).await;
                continue;
            }
        };

        info!(
            "[{}] Socket open via {}",
            inner.connection_type,
            inner.connector.name()
        );
        let close = run_socket(&inner, stream).await;
        on_socket_closed(&inner);

        match close {
            SocketClose::Unwanted => {
                debug!("[{}] Socket closed: no longer needed", inner.connection_type);
                reconnect_delay = base_delay;
            }
            SocketClose::Cycled => {
                info!("[{}] Socket cycled", inner.connection_type);
                reconnect_delay = base_delay;
            }
            SocketClose::Failed {
                reason,
                received_any,
            } => {
                warn!("[{}] Socket closed: {}", inner.connection_type, reason);
                // A socket that never heard from the server gets no backoff reset
                if received_any {
                    reconnect_delay = base_delay;
                } else {
                    inner.record_failure(reason);
                }
                backoff(&inner, &mut reconnect_delay).await;
            }
        }
    }

    on_socket_closed(&inner);
    info!("[{}] Socket task stopped", inner.connection_type);
}

/// Connect the transport and write the handshake
async fn connect(inner: &Inner) -> Result<Box<dyn TransportStream>> {
    let handshake = match inner.connection_type {
        ConnectionType::Identified => {
            let credentials = inner.policy.credentials().ok_or_else(|| {
                ChatError::Transport("no credentials for the identified socket".into())
            })?;
            Handshake::identified(
                credentials.login,
                credentials.password,
                inner.config.user_agent.clone(),
            )
        }
        ConnectionType::Unidentified => Handshake::unidentified(inner.config.user_agent.clone()),
    };

    let mut stream = timeout(inner.config.connect_timeout, inner.connector.connect())
        .await
        .map_err(|_| {
            ChatError::Transport(format!(
                "connect timed out after {:?}",
                inner.config.connect_timeout
            ))
        })?
        .map_err(|e| ChatError::Transport(format!("{:#}", e)))?;

    write_frame(&mut stream, &WireMessage::handshake(handshake)).await?;
    Ok(stream)
}

/// Wait out the reconnect delay
///
/// A push, a cycle or a newly taken request token cuts it short.
async fn backoff(inner: &Inner, delay: &mut Duration) {
    if !inner.should_be_open() {
        return;
    }

    debug!(
        "[{}] Reconnecting in {:?}",
        inner.connection_type, *delay
    );
    let mut shutdown_rx: watch::Receiver<bool> = inner.policy.subscribe_shutdown();
    let mut tokens = inner.policy.outstanding_tokens();
    let timer = sleep(*delay);
    tokio::pin!(timer);

    loop {
        tokio::select! {
            _ = &mut timer => {
                *delay = std::cmp::min(*delay * 2, inner.config.max_reconnect_delay);
                return;
            }
            _ = inner.policy.reconnect_requested() => {
                debug!("[{}] Skipping reconnect backoff", inner.connection_type);
                *delay = inner.config.reconnect_delay;
                return;
            }
            _ = inner.policy.woken() => {
                if !inner.should_be_open() {
                    return;
                }
                let now = inner.policy.outstanding_tokens();
                if now > tokens {
                    debug!(
                        "[{}] Request waiting, skipping reconnect backoff",
                        inner.connection_type
                    );
                    return;
                }
                tokens = now;
            }
            _ = shutdown_rx.wait_for(|down| *down) => return,
        }
    }
}

/// Handle an open socket until it closes
async fn run_socket(inner: &Inner, stream: Box<dyn TransportStream>) -> SocketClose {
    let (mut reader, mut writer) = tokio::io::split(stream);
    let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel::<WireMessage>();
    *inner.outbound.lock() = Some(outbound_tx);
    inner.transition(SocketEvent::Opened);

    let mut decoder = FrameDecoder::new();
    let mut read_buf = vec![0u8; 4096];

    let period = inner.config.keepalive_interval;
    let mut keepalive = interval_at(Instant::now() + period, period);
    keepalive.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut awaiting_keepalive: Option<u64> = None;
    let mut received_any = false;

    let close = 'socket: loop {
        if inner.cycle_requested.swap(false, Ordering::SeqCst) {
            break 'socket SocketClose::Cycled;
        }
        if !inner.should_be_open() {
            break 'socket SocketClose::Unwanted;
        }

        let keepalive_deadline = inner.policy.keepalive_deadline();

        tokio::select! {
            // Policy inputs changed
            _ = inner.policy.woken() => {}

            // Push keep-alive window ran out
            _ = sleep_until(keepalive_deadline.unwrap_or_else(Instant::now)),
                if keepalive_deadline.is_some() => {}

            _ = keepalive.tick() => {
                if let Some(id) = awaiting_keepalive {
                    break 'socket SocketClose::Failed {
                        reason: format!("keepalive {} went unanswered", id),
                        received_any,
                    };
                }
                let id = inner.pending.next_id();
                let probe = WireMessage::request(WireRequest::new(id, "GET", paths::KEEPALIVE));
                if let Err(e) = write_frame(&mut writer, &probe).await {
                    break 'socket SocketClose::Failed {
                        reason: format!("keepalive write failed: {}", e),
                        received_any,
                    };
                }
                awaiting_keepalive = Some(id);
            }

            Some(message) = outbound_rx.recv() => {
                if let Err(e) = write_frame(&mut writer, &message).await {
                    break 'socket SocketClose::Failed {
                        reason: format!("write failed: {}", e),
                        received_any,
                    };
                }
            }

            read = reader.read(&mut read_buf) => {
                let n = match read {
                    Ok(0) => {
                        break 'socket SocketClose::Failed {
                            reason: "server closed connection".into(),
                            received_any,
                        };
                    }
                    Ok(n) => n,
                    Err(e) => {
                        break 'socket SocketClose::Failed {
                            reason: format!("read error: {}", e),
                            received_any,
                        };
                    }
                };
                decoder.extend(&read_buf[..n]);

                // Process all complete frames
                loop {
                    let message = match decoder.decode_next() {
                        Ok(Some(message)) => message,
                        Ok(None) => break,
                        Err(e) => {
                            break 'socket SocketClose::Failed {
                                reason: format!("bad frame: {}", e),
                                received_any,
                            };
                        }
                    };
                    received_any = true;

                    if let Some(reply) = handle_frame(inner, message, &mut awaiting_keepalive) {
                        if let Err(e) = write_frame(&mut writer, &reply).await {
                            break 'socket SocketClose::Failed {
                                reason: format!("write failed: {}", e),
                                received_any,
                            };
                        }
                    }
                }
            }
        }
    };

    inner.outbound.lock().take();
    if let Err(e) = writer.shutdown().await {
        debug!("[{}] Transport shutdown: {}", inner.connection_type, e);
    }
    close
}

/// Tear down per-socket state once the transport is gone
fn on_socket_closed(inner: &Inner) {
    inner.outbound.lock().take();
    let failed = inner
        .pending
        .fail_all(|| ChatError::ConnectionClosed(inner.connection_type));
    if failed > 0 {
        warn!(
            "[{}] Failed {} pending requests on close",
            inner.connection_type, failed
        );
    }
    inner.queue_emptied.store(false, Ordering::SeqCst);
    inner.transition(SocketEvent::Closed);
}

/// Route one inbound frame, returning a frame to write back if any
fn handle_frame(
    inner: &Inner,
    message: WireMessage,
    awaiting_keepalive: &mut Option<u64>,
) -> Option<WireMessage> {
    match message.message_kind() {
        MessageKind::Response => {
            let response = message.response?;
            if *awaiting_keepalive == Some(response.id) {
                *awaiting_keepalive = None;
                if !response.is_success() {
                    warn!(
                        "[{}] Keepalive answered {}",
                        inner.connection_type, response.status
                    );
                }
                return None;
            }

            let id = response.id;
            if !inner.pending.complete(response) {
                debug!(
                    "[{}] Response for unknown request {}",
                    inner.connection_type, id
                );
            }
            None
        }
        MessageKind::Request => {
            let request = message.request?;
            Some(WireMessage::response(handle_server_request(inner, request)))
        }
        other => {
            warn!(
                "[{}] Unexpected {:?} frame from server",
                inner.connection_type, other
            );
            None
        }
    }
}

/// Answer a request the server pushed down the socket
fn handle_server_request(inner: &Inner, request: WireRequest) -> WireResponse {
    match (request.verb.as_str(), request.path.as_str()) {
        ("PUT", paths::MESSAGE) => {
            let message = IncomingMessage {
                connection_type: inner.connection_type,
                server_timestamp: find_header(&request.headers, headers::SERVER_TIMESTAMP)
                    .and_then(|value| value.parse().ok()),
                body: Bytes::from(request.body),
            };
            if inner.incoming.send(message).is_err() {
                debug!(
                    "[{}] No consumer for incoming messages",
                    inner.connection_type
                );
            }
            WireResponse::new(request.id, 200, "OK")
        }
        ("PUT", paths::QUEUE_EMPTY) => {
            if !inner.queue_emptied.swap(true, Ordering::SeqCst) {
                info!("[{}] Initial queue drained", inner.connection_type);
            }
            WireResponse::new(request.id, 200, "OK")
        }
        (verb, path) => {
            warn!(
                "[{}] Unsupported server request {} {}",
                inner.connection_type, verb, path
            );
            WireResponse::new(request.id, 400, "Unsupported request")
        }
    }
}

async fn write_frame<W: AsyncWrite + Unpin>(writer: &mut W, message: &WireMessage) -> Result<()> {
    let encoded = codec::encode(message)?;
    writer.write_all(&encoded).await?;
    writer.flush().await?;
    Ok(())
}
