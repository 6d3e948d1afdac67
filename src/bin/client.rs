//! wiki-mcp-client: connects to an MCP server over SSE, prints its
//! capabilities and optionally reads one article

use std::{path::PathBuf, process::ExitCode};

use anyhow::{Context, Result};
use clap::Parser;
use serde_json::Value;
use tracing::info;
use url::Url;

use wiki_mcp::{
    article::TOOL_NAME,
    initialize_logging,
    mcp::{CapabilityKind, CapabilityList, Session, SseTransport, ToolArguments, ToolCallResult},
    Config,
};

/// Lists the tools, resources and prompts of an MCP server.
#[derive(Parser, Debug)]
#[command(name = "wiki-mcp-client")]
#[command(author, version, about, long_about = None)]
#[command(after_help = "Example: wiki-mcp-client http://localhost:8000/sse \
https://en.wikipedia.org/wiki/Artificial_intelligence")]
struct Args {
    /// Full URL of the SSE endpoint, e.g. http://localhost:8000/sse
    server_url: String,

    /// Wikipedia article to fetch through the server
    article_url: Option<String>,

    /// Path to configuration file
    #[arg(long, value_name = "CONFIG_FILE")]
    config: Option<PathBuf>,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    let args = Args::parse();

    if !has_http_scheme(&args.server_url) {
        println!("Error: Invalid URL scheme. Use http or https.");
        return ExitCode::FAILURE;
    }

    let config = match Config::load_or_default(args.config.as_deref()).await {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Configuration error: {e}");
            return ExitCode::FAILURE;
        }
    };
    if let Err(e) = initialize_logging(&format!("wiki_mcp={}", config.logging.level)) {
        eprintln!("Could not initialize logging: {e}");
    }

    match run(&config, &args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            println!("Error connecting to MCP Server: {e:#}");
            eprintln!("{e:?}");
            ExitCode::FAILURE
        }
    }
}

async fn run(config: &Config, args: &Args) -> Result<()> {
    let channels = SseTransport::connect(&config.client.transport(args.server_url.as_str())).await?;
    let session = Session::new(channels, config.client.session());

    session.initialize().await?;
    println!("Connected to MCP Server at {}", args.server_url);

    for kind in CapabilityKind::ALL {
        let listing = session
            .list(kind)
            .await
            .with_context(|| format!("Failed to list {}", kind))?;
        print!("{}", render_listing(&listing));
    }

    if let Some(article_url) = &args.article_url {
        println!("\nCalling {} tool...", TOOL_NAME);

        let mut arguments = ToolArguments::new();
        arguments.insert("url".to_string(), Value::String(article_url.clone()));
        match session.call_tool(TOOL_NAME, arguments).await {
            Ok(ToolCallResult::Success { text }) => {
                println!("\n=== Wikipedia Article Markdown Content ===\n");
                println!("{}", text);
            }
            Ok(failure) => {
                println!("Error calling {} tool:", TOOL_NAME);
                println!("{}", failure);
            }
            Err(e) => {
                println!("Error calling {} tool:", TOOL_NAME);
                println!("{}", e);
            }
        }
    }

    let stats = session.stats();
    info!(
        requests = stats.requests_sent,
        failed = stats.failed_requests,
        average_ms = stats.average_response_time.as_millis() as u64,
        "Session finished"
    );
    session.close().await?;
    Ok(())
}

fn has_http_scheme(raw: &str) -> bool {
    Url::parse(raw)
        .map(|url| matches!(url.scheme(), "http" | "https"))
        .unwrap_or(false)
}

fn render_listing(listing: &CapabilityList) -> String {
    let mut out = format!("\nAvailable {}:\n", listing.kind());
    if listing.is_empty() {
        out.push_str("No items available.\n");
    } else {
        for item in listing.display_items() {
            out.push_str(&format!(" * {}\n", item));
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiki_mcp::mcp::protocol::{ResourceInfo, ToolInfo};

    #[test]
    fn test_scheme_check() {
        assert!(has_http_scheme("http://localhost:8000/sse"));
        assert!(has_http_scheme("https://example.org/sse"));
        assert!(!has_http_scheme("ws://localhost:8000/sse"));
        assert!(!has_http_scheme("localhost:8000/sse"));
        assert!(!has_http_scheme(""));
    }

    #[test]
    fn test_render_empty_listing() {
        let listing = CapabilityList::Resources(Vec::<ResourceInfo>::new());
        assert_eq!(
            render_listing(&listing),
            "\nAvailable resources:\nNo items available.\n"
        );
    }

    #[test]
    fn test_render_tools() {
        let listing = CapabilityList::Tools(vec![ToolInfo {
            name: TOOL_NAME.to_string(),
            description: "Reads an article".to_string(),
            input_schema: serde_json::json!({"type": "object"}),
        }]);
        let rendered = render_listing(&listing);
        assert!(rendered.starts_with("\nAvailable tools:\n * "));
        assert!(rendered.contains(TOOL_NAME));
    }

    #[test]
    fn test_args_parse() {
        let args = Args::parse_from(["wiki-mcp-client", "http://localhost:8000/sse"]);
        assert!(args.article_url.is_none());

        let args = Args::parse_from([
            "wiki-mcp-client",
            "http://localhost:8000/sse",
            "https://en.wikipedia.org/wiki/Rust",
            "--config",
            "client.toml",
        ]);
        assert_eq!(args.article_url.as_deref(), Some("https://en.wikipedia.org/wiki/Rust"));
        assert_eq!(args.config, Some(PathBuf::from("client.toml")));
    }
}
