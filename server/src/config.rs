//! Server configuration

use anyhow::{bail, Result};
use std::collections::HashMap;

/// Environment variable with the listen address
pub const BIND_ADDR_ENV: &str = "CHAT_BIND_ADDR";
/// Environment variable with the account table, `login:password,...`
pub const ACCOUNTS_ENV: &str = "CHAT_ACCOUNTS";

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub bind_addr: String,
    /// login -> password
    pub accounts: HashMap<String, String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:8443".into(),
            accounts: HashMap::new(),
        }
    }
}

impl ServerConfig {
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();
        if let Ok(addr) = std::env::var(BIND_ADDR_ENV) {
            config.bind_addr = addr;
        }
        if let Ok(accounts) = std::env::var(ACCOUNTS_ENV) {
            config.accounts = parse_accounts(&accounts)?;
        }
        Ok(config)
    }
}

/// Parse `login:password` pairs separated by commas
pub fn parse_accounts(input: &str) -> Result<HashMap<String, String>> {
    let mut accounts = HashMap::new();
    for entry in input.split(',').map(str::trim).filter(|e| !e.is_empty()) {
        let Some((login, password)) = entry.split_once(':') else {
            bail!("account entry '{}' is missing a password", entry);
        };
        if login.is_empty() {
            bail!("account entry '{}' has an empty login", entry);
        }
        accounts.insert(login.to_string(), password.to_string());
    }
    Ok(accounts)
}
