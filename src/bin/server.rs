//! wiki-mcp-server: serves the `read_wikipedia_article` tool over HTTP/SSE

use std::{path::PathBuf, sync::Arc};

use anyhow::{Context, Result};
use clap::Parser;
use tokio::net::TcpListener;
use tracing::{info, warn};

use wiki_mcp::{
    build_registry, initialize_logging,
    mcp::{McpServer, SseServer},
    Config,
};

/// MCP server exposing a Wikipedia article reader.
#[derive(Parser, Debug)]
#[command(name = "wiki-mcp-server")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Interface to bind (overrides the config file)
    #[arg(long)]
    host: Option<String>,

    /// Port to bind (overrides the config file)
    #[arg(long)]
    port: Option<u16>,

    /// Path to configuration file
    #[arg(long, value_name = "CONFIG_FILE")]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let mut config = Config::load_or_default(args.config.as_deref())
        .await
        .context("Failed to load configuration")?;
    if let Some(host) = args.host {
        config.server.host = host;
    }
    if let Some(port) = args.port {
        config.server.port = port;
    }
    config.validate()?;

    initialize_logging(&format!("wiki_mcp={}", config.logging.level))?;
    info!(version = env!("CARGO_PKG_VERSION"), "Starting wiki-mcp server");

    let registry = build_registry(&config).context("Failed to register tools")?;
    let server = Arc::new(McpServer::new(config.server.mcp_server(), registry));

    let address = config.server.bind_address();
    let listener = TcpListener::bind(&address)
        .await
        .with_context(|| format!("Failed to bind {}", address))?;

    SseServer::new(Arc::clone(&server), config.server.http_transport())
        .serve(listener, async {
            match tokio::signal::ctrl_c().await {
                Ok(()) => info!("Interrupt received, shutting down"),
                Err(error) => {
                    warn!(%error, "Could not listen for interrupts");
                    std::future::pending::<()>().await
                }
            }
        })
        .await?;

    let report = server.report();
    info!(
        total_sessions = report.server.total_sessions,
        error_responses = report.server.error_responses,
        tool_calls = report.tools.total_executions,
        tool_success_rate = report.tool_success_rate,
        "Server stopped"
    );
    Ok(())
}
