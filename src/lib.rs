//! wiki-mcp - Wikipedia article reader over the Model Context Protocol
//!
//! This library provides both ends of an MCP deployment: a server exposing
//! the `read_wikipedia_article` tool over HTTP/SSE, and a client session
//! that performs the handshake, lists capabilities and calls tools.
//!
//! # Architecture
//!
//! - **Protocol Layer**: message types, error taxonomy and sessions ([`mcp`])
//! - **Tool Layer**: the article fetch, extract and convert pipeline ([`article`])
//! - **Infrastructure Layer**: configuration, errors and logging

pub mod article;
pub mod config;
pub mod error;
pub mod mcp;

pub use config::Config;
pub use error::{AppError, AppResult};

use anyhow::Result;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Initialize the logging system with structured logging
///
/// `RUST_LOG` takes precedence over `default_filter`. Logs go to stderr so
/// the client's stdout carries only its report.
pub fn initialize_logging(default_filter: &str) -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .try_init()?;

    Ok(())
}

/// Build the tool registry served by `wiki-mcp-server`
pub fn build_registry(config: &Config) -> AppResult<mcp::CapabilityRegistry> {
    let mut registry = mcp::CapabilityRegistry::new();
    registry.register(article::ReadArticleTool::new(config.article.clone())?.descriptor())?;
    Ok(registry)
}
