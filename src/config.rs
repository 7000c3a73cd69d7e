//! Application configuration

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Default listen port
pub const DEFAULT_PORT: u16 = 3000;

/// Default bound for each graceful-shutdown phase
pub const DEFAULT_GRACEFUL_SHUTDOWN_MS: u64 = 5000;

/// Framework configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Server name reported in `initialize` and `/health`
    pub name: String,
    /// Server version reported in `initialize` and `/health`
    pub version: String,
    /// HTTP listen port
    pub port: u16,
    /// Development mode (enables HMR injection)
    pub dev_mode: bool,
    /// Port of the frontend dev server, if one is running
    pub dev_server_port: Option<u16>,
    /// Public base URL used to build websocket URLs (defaults to localhost)
    pub public_url: Option<String>,
    /// Bound for each phase of `stop()`
    pub graceful_shutdown_ms: u64,
    /// Endpoint used by `get_identity`
    pub identity_url: Option<String>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            name: "mcp-apps".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            port: DEFAULT_PORT,
            dev_mode: false,
            dev_server_port: None,
            public_url: None,
            graceful_shutdown_ms: DEFAULT_GRACEFUL_SHUTDOWN_MS,
            identity_url: None,
        }
    }
}

impl AppConfig {
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
            ..Default::default()
        }
    }

    /// Overlay environment variables on the defaults
    ///
    /// `MCP_PORT` takes precedence over `PORT`. `NODE_ENV=development` turns on
    /// dev mode.
    pub fn from_env(name: impl Into<String>, version: impl Into<String>) -> Self {
        let mut config = Self::new(name, version);
        let var = |key: &str| std::env::var(key).ok().filter(|v| !v.trim().is_empty());

        if let Some(port) = var("MCP_PORT")
            .or_else(|| var("PORT"))
            .and_then(|p| p.trim().parse().ok())
        {
            config.port = port;
        }
        config.dev_mode = var("NODE_ENV").as_deref() == Some("development");
        config.dev_server_port = var("MCP_DEV_SERVER_PORT").and_then(|p| p.trim().parse().ok());
        config.public_url = var("MCP_PUBLIC_URL");
        if let Some(ms) = var("MCP_GRACEFUL_SHUTDOWN_MS").and_then(|v| v.trim().parse().ok()) {
            config.graceful_shutdown_ms = ms;
        }
        config.identity_url = var("MCP_IDENTITY_URL");
        config
    }

    pub fn graceful_shutdown_timeout(&self) -> Duration {
        Duration::from_millis(self.graceful_shutdown_ms)
    }

    /// Base URL for websocket endpoints (`ws://` / `wss://`)
    pub fn websocket_base(&self) -> String {
        match &self.public_url {
            Some(url) => {
                let trimmed = url.trim_end_matches('/');
                if let Some(rest) = trimmed.strip_prefix("https://") {
                    format!("wss://{}", rest)
                } else if let Some(rest) = trimmed.strip_prefix("http://") {
                    format!("ws://{}", rest)
                } else {
                    trimmed.to_string()
                }
            }
            None => format!("ws://localhost:{}", self.port),
        }
    }

    /// HMR port, only when dev mode is on
    pub fn hmr_port(&self) -> Option<u16> {
        if self.dev_mode {
            self.dev_server_port
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = AppConfig::default();
        assert_eq!(config.port, 3000);
        assert_eq!(config.graceful_shutdown_timeout(), Duration::from_secs(5));
        assert_eq!(config.websocket_base(), "ws://localhost:3000");
        assert_eq!(config.hmr_port(), None);
    }

    #[test]
    fn test_websocket_base_from_public_url() {
        let mut config = AppConfig::default();
        config.public_url = Some("https://apps.example.com/".to_string());
        assert_eq!(config.websocket_base(), "wss://apps.example.com");

        config.public_url = Some("http://10.0.0.2:8080".to_string());
        assert_eq!(config.websocket_base(), "ws://10.0.0.2:8080");
    }

    #[test]
    fn test_hmr_port_requires_dev_mode() {
        let mut config = AppConfig::default();
        config.dev_server_port = Some(5173);
        assert_eq!(config.hmr_port(), None);
        config.dev_mode = true;
        assert_eq!(config.hmr_port(), Some(5173));
    }
}
