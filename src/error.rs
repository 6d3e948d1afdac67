//! Error handling for wiki-mcp
//!
//! Crate-level errors for configuration, I/O and server bootstrapping.
//! Protocol and tool failures live in [`crate::mcp::errors`] and convert
//! into [`AppError`] when they escape to a binary.

use thiserror::Error;

use crate::mcp::errors::MCPError;

/// Application result type alias
pub type AppResult<T> = std::result::Result<T, AppError>;

/// Main application error enum
#[derive(Error, Debug)]
pub enum AppError {
    /// I/O operation errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration file could not be parsed or failed validation
    #[error("Configuration error: {message}")]
    Config { message: String },

    /// HTTP client errors
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// MCP protocol errors
    #[error("MCP error: {0}")]
    Mcp(#[from] MCPError),
}

impl AppError {
    /// Create a new configuration error
    pub fn config<S: Into<String>>(message: S) -> Self {
        Self::Config {
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = AppError::config("port must be greater than 0");
        assert_eq!(
            err.to_string(),
            "Configuration error: port must be greater than 0"
        );
    }

    #[test]
    fn test_mcp_conversion() {
        let err: AppError = MCPError::connection("refused").into();
        assert!(matches!(err, AppError::Mcp(_)));
        assert_eq!(err.to_string(), "MCP error: Connection error: refused");
    }
}
