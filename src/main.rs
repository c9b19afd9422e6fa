use anyhow::{Context, Result};
use chat_client::transport::TcpConnector;
use chat_client::{
    ChatConfig, ConnectionDependencies, ConnectionManager, Credentials, IncomingMessage,
    NeverExpires, Request, StaticAccountStore,
};
use chat_shared::paths;
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

const LOGIN_ENV: &str = "CHAT_LOGIN";
const PASSWORD_ENV: &str = "CHAT_PASSWORD";

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()))
        .init();

    let config = ChatConfig::from_env();
    let credentials = credentials_from_env();

    info!("Chat client starting");
    info!("  Server: {}", config.server_addr);
    match &credentials {
        Some(c) => info!("  Account: {}", c.login),
        None => info!("  Account: none (unidentified only)"),
    }

    let deps = ConnectionDependencies {
        expiry: Arc::new(NeverExpires),
        accounts: Arc::new(StaticAccountStore::new(credentials.clone())),
        connector: Arc::new(TcpConnector::new(config.server_addr.clone())),
    };
    let (manager, mut incoming) = ConnectionManager::new(config, deps);

    // Foreground: keep both sockets up
    manager.set_app_active(true);

    match manager
        .make_request(Request::get(paths::KEEPALIVE).anonymous())
        .await
    {
        Ok(response) => info!("Unidentified socket reachable: {}", response.status),
        Err(e) => warn!("Unidentified request failed: {}", e),
    }

    if credentials.is_some() {
        match manager.make_request(Request::get(paths::WHOAMI)).await {
            Ok(response) => info!(
                "Signed in as {}",
                String::from_utf8_lossy(&response.body)
            ),
            Err(e) => warn!("whoami failed: {}", e),
        }
    }

    // Main event loop
    loop {
        tokio::select! {
            message = incoming.recv() => match message {
                Some(message) => handle_incoming(&message),
                None => {
                    error!("Incoming message channel closed");
                    break;
                }
            },
            signal = tokio::signal::ctrl_c() => {
                signal.context("failed to listen for ctrl-c")?;
                info!("Shutting down");
                break;
            }
        }
    }

    manager.shutdown().await;
    Ok(())
}

fn credentials_from_env() -> Option<Credentials> {
    let login = std::env::var(LOGIN_ENV).ok()?;
    let password = std::env::var(PASSWORD_ENV).ok()?;
    Some(Credentials::new(login, password))
}

fn handle_incoming(message: &IncomingMessage) {
    info!(
        "[{}] Message ({} bytes, server time {:?}): {}",
        message.connection_type,
        message.body.len(),
        message.server_timestamp,
        String::from_utf8_lossy(&message.body)
    );
}
