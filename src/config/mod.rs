//! Configuration management module
//!
//! TOML configuration shared by the server and client binaries. Every
//! section has defaults, so a config file only needs the keys it changes.

use serde::{Deserialize, Serialize};
use std::{
    path::{Path, PathBuf},
    time::Duration,
};
use tokio::fs;
use tracing::{debug, info};

use crate::{
    error::{AppError, AppResult},
    mcp::{
        http::HttpTransportConfig,
        protocol::{Implementation, ServerCapabilities},
        server::McpServerConfig,
        session::SessionConfig,
        transport::TransportConfig,
    },
};

const CONFIG_FILE_NAME: &str = "wiki-mcp.toml";

/// Main application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Logging settings
    pub logging: LoggingConfig,
    /// HTTP/SSE server settings
    pub server: ServerConfig,
    /// Client session settings
    pub client: ClientConfig,
    /// Article reader settings
    pub article: ArticleConfig,
}

impl Config {
    /// Load configuration from default locations
    ///
    /// Search order:
    /// 1. ./wiki-mcp.toml
    /// 2. ~/.config/wiki-mcp/config.toml
    /// 3. Default configuration
    pub async fn load() -> AppResult<Self> {
        info!("Loading application configuration");

        let local = Path::new(".").join(CONFIG_FILE_NAME);
        if fs::try_exists(&local).await.unwrap_or(false) {
            let config = Self::load_from_file(&local).await?;
            info!("Loaded configuration from {}", local.display());
            return Ok(config);
        }

        if let Some(config_path) = Self::get_user_config_path() {
            if fs::try_exists(&config_path).await.unwrap_or(false) {
                let config = Self::load_from_file(&config_path).await?;
                info!("Loaded configuration from {}", config_path.display());
                return Ok(config);
            }
        }

        info!("Using default configuration");
        Ok(Self::default())
    }

    /// Load from an explicit path when given, otherwise search the defaults
    pub async fn load_or_default(path: Option<&Path>) -> AppResult<Self> {
        match path {
            Some(path) => Self::load_from_file(path).await,
            None => Self::load().await,
        }
    }

    /// Load configuration from a specific file
    pub async fn load_from_file<P: AsRef<Path>>(path: P) -> AppResult<Self> {
        let path = path.as_ref();
        debug!("Loading configuration from: {}", path.display());

        let content = fs::read_to_string(path).await?;
        let config: Config = toml::from_str(&content).map_err(|e| {
            AppError::config(format!("Failed to parse {}: {}", path.display(), e))
        })?;

        config.validate()?;
        Ok(config)
    }

    /// Save configuration to a file
    pub async fn save_to_file<P: AsRef<Path>>(&self, path: P) -> AppResult<()> {
        let path = path.as_ref();
        debug!("Saving configuration to: {}", path.display());

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }

        let content = toml::to_string_pretty(self)
            .map_err(|e| AppError::config(format!("Failed to serialize config: {}", e)))?;
        fs::write(path, content).await?;

        info!("Configuration saved to: {}", path.display());
        Ok(())
    }

    /// Validate configuration
    pub fn validate(&self) -> AppResult<()> {
        debug!("Validating configuration");

        if self.server.port == 0 {
            return Err(AppError::config("server.port must be greater than 0"));
        }
        for (key, path) in [
            ("server.sse_path", &self.server.sse_path),
            ("server.messages_path", &self.server.messages_path),
        ] {
            if !path.starts_with('/') {
                return Err(AppError::config(format!("{} must start with '/'", key)));
            }
        }
        if self.server.sse_path == self.server.messages_path {
            return Err(AppError::config(
                "server.sse_path and server.messages_path must differ",
            ));
        }

        if self.client.handshake_timeout_ms == 0 || self.client.connect_timeout_ms == 0 {
            return Err(AppError::config("client timeouts must be greater than 0"));
        }
        if self.client.max_message_size == 0 {
            return Err(AppError::config(
                "client.max_message_size must be greater than 0",
            ));
        }

        if self.article.fetch_timeout_secs == 0 || self.article.convert_timeout_ms == 0 {
            return Err(AppError::config("article timeouts must be greater than 0"));
        }
        if self.article.max_body_bytes == 0 || self.article.max_output_chars == 0 {
            return Err(AppError::config("article size limits must be greater than 0"));
        }
        if scraper::Selector::parse(&self.article.content_selector).is_err() {
            return Err(AppError::config(format!(
                "article.content_selector is not a valid CSS selector: {}",
                self.article.content_selector
            )));
        }

        debug!("Configuration validation passed");
        Ok(())
    }

    /// Get user configuration directory path
    fn get_user_config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|mut path| {
            path.push("wiki-mcp");
            path.push("config.toml");
            path
        })
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default level for this crate when RUST_LOG is unset
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

/// HTTP/SSE server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Interface to bind
    pub host: String,
    /// Port to bind
    pub port: u16,
    /// Name announced in the handshake
    pub name: String,
    /// Event stream path
    pub sse_path: String,
    /// Message submission path
    pub messages_path: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 8000,
            name: "wiki".to_string(),
            sse_path: "/sse".to_string(),
            messages_path: "/messages".to_string(),
        }
    }
}

impl ServerConfig {
    /// `host:port` to bind
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn http_transport(&self) -> HttpTransportConfig {
        HttpTransportConfig {
            sse_path: self.sse_path.clone(),
            messages_path: self.messages_path.clone(),
        }
    }

    pub fn mcp_server(&self) -> McpServerConfig {
        McpServerConfig {
            server_info: Implementation::new(self.name.clone(), env!("CARGO_PKG_VERSION")),
            capabilities: ServerCapabilities::all(),
        }
    }
}

/// Client session configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Bound on the initialize handshake
    pub handshake_timeout_ms: u64,
    /// Bound on opening the event stream
    pub connect_timeout_ms: u64,
    /// Largest accepted message in bytes
    pub max_message_size: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            handshake_timeout_ms: 30_000,
            connect_timeout_ms: 10_000,
            max_message_size: 4 * 1024 * 1024,
        }
    }
}

impl ClientConfig {
    pub fn session(&self) -> SessionConfig {
        SessionConfig {
            handshake_timeout: Duration::from_millis(self.handshake_timeout_ms),
            ..SessionConfig::default()
        }
    }

    pub fn transport(&self, endpoint: impl Into<String>) -> TransportConfig {
        TransportConfig {
            endpoint: endpoint.into(),
            connect_timeout: Duration::from_millis(self.connect_timeout_ms),
            max_message_size: self.max_message_size,
            ..TransportConfig::default()
        }
    }
}

/// Article reader configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ArticleConfig {
    /// HTTP GET timeout in seconds
    pub fetch_timeout_secs: u64,
    /// CSS selector of the main content container
    pub content_selector: String,
    /// User-Agent sent when fetching
    pub user_agent: String,
    /// Largest response body accepted
    pub max_body_bytes: usize,
    /// Converted output is truncated beyond this many characters
    pub max_output_chars: usize,
    /// Bound on parsing and converting one fetched page
    pub convert_timeout_ms: u64,
}

impl Default for ArticleConfig {
    fn default() -> Self {
        Self {
            fetch_timeout_secs: 10,
            content_selector: "div#mw-content-text".to_string(),
            user_agent: concat!("wiki-mcp/", env!("CARGO_PKG_VERSION")).to_string(),
            max_body_bytes: 5 * 1024 * 1024,
            max_output_chars: 200_000,
            convert_timeout_ms: 10_000,
        }
    }
}

impl ArticleConfig {
    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch_timeout_secs)
    }

    pub fn convert_timeout(&self) -> Duration {
        Duration::from_millis(self.convert_timeout_ms)
    }
}
