//! Transport trait abstraction for pluggable socket backends

use anyhow::Result;
use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWrite};

/// A byte stream a chat socket runs over
pub trait TransportStream: AsyncRead + AsyncWrite + Send + Unpin + 'static {}

impl<T> TransportStream for T where T: AsyncRead + AsyncWrite + Send + Unpin + 'static {}

/// Factory for creating transport connections
#[async_trait]
pub trait TransportConnector: Send + Sync + 'static {
    /// Attempt to connect, returning a stream on success
    async fn connect(&self) -> Result<Box<dyn TransportStream>>;

    /// Human-readable name for this transport
    fn name(&self) -> &'static str;
}
