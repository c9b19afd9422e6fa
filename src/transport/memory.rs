//! In-process transport built on tokio duplex pipes
//!
//! Each `connect` creates a duplex pair, keeps the client half and hands the
//! server half to the paired [`MemoryListener`]. Reachability can be toggled
//! to simulate outages.

use crate::transport::traits::{TransportConnector, TransportStream};
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::io::DuplexStream;
use tokio::sync::mpsc;

const PIPE_CAPACITY: usize = 64 * 1024;

/// Create a connected connector/listener pair
pub fn memory_transport() -> (MemoryConnector, MemoryListener) {
    let (accept_tx, accept_rx) = mpsc::unbounded_channel();
    let connector = MemoryConnector {
        accept_tx,
        reachable: Arc::new(AtomicBool::new(true)),
        attempts: Arc::new(AtomicUsize::new(0)),
    };
    (connector, MemoryListener { accept_rx })
}

/// Client side of the in-process transport
#[derive(Clone)]
pub struct MemoryConnector {
    accept_tx: mpsc::UnboundedSender<DuplexStream>,
    reachable: Arc<AtomicBool>,
    attempts: Arc<AtomicUsize>,
}

impl MemoryConnector {
    /// Make subsequent connects succeed or fail
    pub fn set_reachable(&self, reachable: bool) {
        self.reachable.store(reachable, Ordering::SeqCst);
    }

    /// Number of connect calls so far, successful or not
    pub fn connect_attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TransportConnector for MemoryConnector {
    async fn connect(&self) -> Result<Box<dyn TransportStream>> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        if !self.reachable.load(Ordering::SeqCst) {
            return Err(anyhow!("memory transport unreachable"));
        }

        let (client, server) = tokio::io::duplex(PIPE_CAPACITY);
        self.accept_tx
            .send(server)
            .map_err(|_| anyhow!("memory listener dropped"))?;
        Ok(Box::new(client))
    }

    fn name(&self) -> &'static str {
        "Memory"
    }
}

/// Server side of the in-process transport
pub struct MemoryListener {
    accept_rx: mpsc::UnboundedReceiver<DuplexStream>,
}

impl MemoryListener {
    /// Wait for the next client connection; `None` once every connector is gone
    pub async fn accept(&mut self) -> Option<DuplexStream> {
        self.accept_rx.recv().await
    }
}
