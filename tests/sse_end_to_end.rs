//! End-to-end tests over real HTTP/SSE
//!
//! A client [`Session`] talks to an [`SseServer`] bound on loopback; the
//! article tool fetches from a second local origin.

use std::{net::SocketAddr, sync::Arc, time::Duration};

use axum::{response::Html, routing::get, Router};
use serde_json::Value;
use tokio::net::TcpListener;
use tokio_test::{assert_err, assert_ok};
use tokio_util::sync::CancellationToken;

use wiki_mcp::{
    article::TOOL_NAME,
    build_registry,
    mcp::{
        CapabilityKind, ErrorCode, McpServer, MCPError, Session, SessionConfig, SessionState,
        SseServer, SseTransport, ToolArguments, ToolCallResult, TransportConfig,
    },
    Config,
};

async fn spawn_origin() -> SocketAddr {
    let app = Router::new().route(
        "/wiki/Ferris",
        get(|| async {
            Html(r#"<html><body><div id="mw-content-text"><p>Ferris is a <b>crab</b>.</p></div></body></html>"#)
        }),
    );
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    addr
}

async fn spawn_mcp_server() -> (SocketAddr, CancellationToken) {
    let config = Config::default();
    let server = Arc::new(McpServer::new(
        config.server.mcp_server(),
        build_registry(&config).unwrap(),
    ));

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let stop = CancellationToken::new();
    let wait = stop.clone();
    tokio::spawn(
        SseServer::new(server, config.server.http_transport())
            .serve(listener, async move { wait.cancelled().await }),
    );
    (addr, stop)
}

async fn connect(addr: SocketAddr) -> Session {
    let transport = TransportConfig::new(format!("http://{}/sse", addr));
    let channels = SseTransport::connect(&transport).await.unwrap();
    Session::new(
        channels,
        SessionConfig {
            handshake_timeout: Duration::from_secs(5),
            ..SessionConfig::default()
        },
    )
}

fn url_argument(url: String) -> ToolArguments {
    let mut arguments = ToolArguments::new();
    arguments.insert("url".to_string(), Value::String(url));
    arguments
}

/// Handshake, listing and a successful tool call over one session, on the
/// single-threaded runtime the client binary uses
#[tokio::test(flavor = "current_thread")]
async fn test_full_session_over_sse() {
    let origin = spawn_origin().await;
    let (addr, stop) = spawn_mcp_server().await;
    let session = connect(addr).await;

    let init = assert_ok!(session.initialize().await);
    assert_eq!(init.server_info.name, "wiki");
    assert_eq!(session.state(), SessionState::Ready);
    assert_ok!(session.ping().await);

    let tools = session.list_tools().await.unwrap();
    assert_eq!(tools.len(), 1);
    assert_eq!(tools[0].name, TOOL_NAME);
    assert_eq!(tools[0].input_schema["required"][0], "url");

    for kind in [CapabilityKind::Resources, CapabilityKind::Prompts] {
        let listing = session.list(kind).await.unwrap();
        assert_eq!(listing.kind(), kind);
        assert!(listing.is_empty());
    }

    let result = session
        .call_tool(TOOL_NAME, url_argument(format!("http://{}/wiki/Ferris", origin)))
        .await
        .unwrap();
    assert_eq!(result, ToolCallResult::success("Ferris is a **crab**.\n"));

    let stats = session.stats();
    assert_eq!(stats.failed_requests, 0);
    assert_eq!(stats.requests_sent, stats.responses_received);

    assert_ok!(session.close().await);
    assert_eq!(session.state(), SessionState::Closed);
    stop.cancel();
}

/// Tool failures arrive as structured results, not session errors
#[tokio::test]
async fn test_tool_failures_over_sse() {
    let (addr, stop) = spawn_mcp_server().await;
    let session = connect(addr).await;
    session.initialize().await.unwrap();

    let result = session
        .call_tool(TOOL_NAME, url_argument("ftp://example.org/".to_string()))
        .await
        .unwrap();
    assert_eq!(
        result,
        ToolCallResult::failure(ErrorCode::InvalidParams, "URL must start with http or https.")
    );

    let result = session
        .call_tool("no_such_tool", ToolArguments::new())
        .await
        .unwrap();
    assert_eq!(
        result,
        ToolCallResult::failure(ErrorCode::InvalidParams, "Unknown tool: no_such_tool")
    );

    assert_ok!(session.close().await);
    stop.cancel();
}

/// Concurrent sessions are isolated from each other
#[tokio::test]
async fn test_independent_sessions() {
    let (addr, stop) = spawn_mcp_server().await;
    let first = connect(addr).await;
    let second = connect(addr).await;

    first.initialize().await.unwrap();
    assert_ok!(first.list_tools().await);

    // The second session has not completed its handshake yet
    let early = second.list_tools().await;
    assert!(matches!(early, Err(MCPError::Protocol { .. })));

    second.initialize().await.unwrap();
    assert_ok!(second.list_tools().await);

    first.close().await.unwrap();
    assert_err!(first.list_tools().await);
    assert_ok!(second.list_tools().await);

    second.close().await.unwrap();
    stop.cancel();
}
