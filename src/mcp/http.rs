//! HTTP/SSE Server Transport
//!
//! `GET <sse_path>` opens a session: the response is an event stream whose
//! first event names the submission URL. `POST <messages_path>?session_id=`
//! feeds client messages into that session. Each session is served by
//! [`McpServer::serve`] over an in-process channel pair.

use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::sse::{Event, KeepAlive, Sse},
    routing::{get, post},
    Json, Router,
};
use dashmap::DashMap;
use futures_util::{
    stream::{self, Stream},
    StreamExt,
};
use serde::Deserialize;
use std::{convert::Infallible, future::Future, sync::Arc};
use tokio::{net::TcpListener, sync::mpsc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::{
    protocol::MCPMessage,
    server::{McpServer, StatsReport},
    transport::{ChannelPair, ChannelReceiver, ChannelSender},
};
use crate::error::AppResult;

/// Route layout of the HTTP transport
#[derive(Debug, Clone)]
pub struct HttpTransportConfig {
    /// Path of the event stream endpoint
    pub sse_path: String,
    /// Path of the message submission endpoint
    pub messages_path: String,
}

impl Default for HttpTransportConfig {
    fn default() -> Self {
        Self {
            sse_path: "/sse".to_string(),
            messages_path: "/messages".to_string(),
        }
    }
}

struct SseState {
    server: Arc<McpServer>,
    sessions: DashMap<String, mpsc::UnboundedSender<MCPMessage>>,
    messages_path: String,
    shutdown: CancellationToken,
}

/// Removes the session when its event stream is dropped
struct SessionGuard {
    id: String,
    state: Arc<SseState>,
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        if self.state.sessions.remove(&self.id).is_some() {
            debug!(session = %self.id, "event stream dropped");
        }
    }
}

/// HTTP front end for an [`McpServer`]
pub struct SseServer {
    state: Arc<SseState>,
    config: HttpTransportConfig,
}

impl SseServer {
    pub fn new(server: Arc<McpServer>, config: HttpTransportConfig) -> Self {
        let state = Arc::new(SseState {
            server,
            sessions: DashMap::new(),
            messages_path: config.messages_path.clone(),
            shutdown: CancellationToken::new(),
        });
        Self { state, config }
    }

    /// Number of open event streams
    pub fn active_sessions(&self) -> usize {
        self.state.sessions.len()
    }

    pub fn router(&self) -> Router {
        Router::new()
            .route(&self.config.sse_path, get(open_stream))
            .route(&self.config.messages_path, post(submit_message))
            .route("/health", get(health))
            .route("/stats", get(stats))
            .with_state(Arc::clone(&self.state))
    }

    /// Serve until `shutdown` resolves, then end every open event stream
    pub async fn serve<F>(self, listener: TcpListener, shutdown: F) -> AppResult<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let addr = listener.local_addr()?;
        info!(%addr, sse = %self.config.sse_path, "starting HTTP/SSE MCP transport");

        let token = self.state.shutdown.clone();
        axum::serve(listener, self.router())
            .with_graceful_shutdown(async move {
                shutdown.await;
                token.cancel();
            })
            .await?;

        info!("HTTP/SSE MCP transport shut down");
        Ok(())
    }
}

async fn health() -> &'static str {
    "ok"
}

async fn stats(State(state): State<Arc<SseState>>) -> Json<StatsReport> {
    Json(state.server.report())
}

async fn open_stream(
    State(state): State<Arc<SseState>>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let session_id = Uuid::new_v4().simple().to_string();
    let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
    let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
    state.sessions.insert(session_id.clone(), inbound_tx);

    let channels = ChannelPair::new(
        Arc::new(ChannelSender::new(outbound_tx)),
        Box::new(ChannelReceiver::new(inbound_rx)),
    );
    tokio::spawn(Arc::clone(&state.server).serve(channels, session_id.clone()));

    let endpoint = format!("{}?session_id={}", state.messages_path, session_id);
    let shutdown = state.shutdown.clone();
    let guard = SessionGuard {
        id: session_id,
        state,
    };

    let first = stream::once(async move {
        Ok::<_, Infallible>(Event::default().event("endpoint").data(endpoint))
    });
    let messages = stream::unfold((outbound_rx, guard), |(mut outbound, guard)| async move {
        let message = outbound.recv().await?;
        let event = match message.to_json() {
            Ok(json) => Event::default().event("message").data(json),
            Err(error) => {
                warn!(session = %guard.id, %error, "dropping unserializable message");
                Event::default().comment("dropped message")
            }
        };
        Some((Ok::<_, Infallible>(event), (outbound, guard)))
    });

    Sse::new(
        first
            .chain(messages)
            .take_until(shutdown.cancelled_owned()),
    )
    .keep_alive(KeepAlive::default())
}

#[derive(Debug, Deserialize)]
struct MessageQuery {
    session_id: Option<String>,
}

async fn submit_message(
    State(state): State<Arc<SseState>>,
    Query(query): Query<MessageQuery>,
    body: String,
) -> (StatusCode, &'static str) {
    let Some(session_id) = query.session_id else {
        return (StatusCode::BAD_REQUEST, "session_id is required");
    };
    let Some(sender) = state
        .sessions
        .get(&session_id)
        .map(|entry| entry.value().clone())
    else {
        return (StatusCode::NOT_FOUND, "Could not find session");
    };

    let message = match MCPMessage::from_json(&body) {
        Ok(message) => message,
        Err(error) => {
            warn!(session = %session_id, %error, "rejecting unparsable message");
            return (StatusCode::BAD_REQUEST, "Could not parse message");
        }
    };

    if sender.send(message).is_err() {
        state.sessions.remove(&session_id);
        return (StatusCode::NOT_FOUND, "Could not find session");
    }
    (StatusCode::ACCEPTED, "Accepted")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mcp::{registry::CapabilityRegistry, server::McpServerConfig};
    use std::net::SocketAddr;

    async fn spawn_server() -> (SocketAddr, CancellationToken) {
        let server = Arc::new(McpServer::new(
            McpServerConfig::default(),
            CapabilityRegistry::new(),
        ));
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let stop = CancellationToken::new();
        let wait = stop.clone();
        tokio::spawn(
            SseServer::new(server, HttpTransportConfig::default())
                .serve(listener, async move { wait.cancelled().await }),
        );
        (addr, stop)
    }

    #[tokio::test]
    async fn test_health() {
        let (addr, stop) = spawn_server().await;
        let body = reqwest::get(format!("http://{}/health", addr))
            .await
            .unwrap()
            .text()
            .await
            .unwrap();
        assert_eq!(body, "ok");
        stop.cancel();
    }

    #[tokio::test]
    async fn test_stats_report() {
        let (addr, stop) = spawn_server().await;
        let report: serde_json::Value = reqwest::get(format!("http://{}/stats", addr))
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(report["server"]["total_sessions"], 0);
        assert_eq!(report["tools"]["total_executions"], 0);
        assert_eq!(report["tool_success_rate"], 0.0);
        stop.cancel();
    }

    #[tokio::test]
    async fn test_submit_rejections() {
        let (addr, stop) = spawn_server().await;
        let client = reqwest::Client::new();

        let missing = client
            .post(format!("http://{}/messages", addr))
            .body("{}")
            .send()
            .await
            .unwrap();
        assert_eq!(missing.status(), reqwest::StatusCode::BAD_REQUEST);

        let unknown = client
            .post(format!("http://{}/messages?session_id=nope", addr))
            .body(r#"{"jsonrpc":"2.0","id":1,"method":"ping"}"#)
            .send()
            .await
            .unwrap();
        assert_eq!(unknown.status(), reqwest::StatusCode::NOT_FOUND);
        stop.cancel();
    }
}
