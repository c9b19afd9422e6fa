mod config;
mod session;

use config::ServerConfig;
use session::{ChatSession, SessionManager};
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()))
        .init();

    let config = ServerConfig::from_env()?;
    let listener = TcpListener::bind(&config.bind_addr).await?;
    info!(
        "Chat server listening on {} ({} accounts)",
        config.bind_addr,
        config.accounts.len()
    );

    let manager = Arc::new(SessionManager::new(config.accounts));
    let mut next_session_id: u64 = 0;

    loop {
        let (socket, addr) = listener.accept().await?;
        if let Err(e) = socket.set_nodelay(true) {
            warn!("[{}] Failed to set TCP_NODELAY: {}", addr, e);
        }
        next_session_id += 1;

        let session = ChatSession::new(next_session_id, socket, addr.to_string());
        let manager = manager.clone();
        tokio::spawn(async move {
            if let Err(e) = session.run(manager).await {
                warn!("[{}] Session ended: {:#}", addr, e);
            }
        });
    }
}
