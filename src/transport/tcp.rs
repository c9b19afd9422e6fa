//! TCP transport implementation

use crate::transport::traits::{TransportConnector, TransportStream};
use anyhow::{Context, Result};
use async_trait::async_trait;
use tokio::net::TcpStream;

/// TCP connector for connecting to a chat server address
pub struct TcpConnector {
    address: String,
}

impl TcpConnector {
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
        }
    }

    pub fn address(&self) -> &str {
        &self.address
    }
}

#[async_trait]
impl TransportConnector for TcpConnector {
    async fn connect(&self) -> Result<Box<dyn TransportStream>> {
        let stream = TcpStream::connect(&self.address)
            .await
            .with_context(|| format!("connect to {}", self.address))?;
        stream.set_nodelay(true)?;
        Ok(Box::new(stream))
    }

    fn name(&self) -> &'static str {
        "TCP"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn test_tcp_connector_reaches_listener() {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("addr").to_string();

        let connector = TcpConnector::new(addr.clone());
        assert_eq!(connector.name(), "TCP");
        assert_eq!(connector.address(), addr);

        let accept = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.expect("accept");
            let mut buf = [0u8; 4];
            socket.read_exact(&mut buf).await.expect("read");
            buf
        });

        let mut stream = connector.connect().await.expect("connect");
        stream.write_all(b"ping").await.expect("write");
        assert_eq!(&accept.await.expect("join"), b"ping");
    }

    #[tokio::test]
    async fn test_tcp_connector_reports_refused() {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("addr").to_string();
        drop(listener);

        let err = TcpConnector::new(addr).connect().await.err().expect("should fail");
        assert!(format!("{:#}", err).contains("connect to"));
    }
}
