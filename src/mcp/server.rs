//! MCP Server Implementation
//!
//! Runs the server side of a session over a [`ChannelPair`]: the handshake
//! state machine, capability listings and tool dispatch through the
//! [`CapabilityRegistry`].

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::{collections::HashMap, sync::Arc};
use tracing::{debug, info, warn};

use super::{
    errors::{MCPError, MCPResult},
    protocol::{
        CallToolParams, CapabilityKind, Implementation, InitializeParams, InitializeResult,
        MCPMessage, MCPNotification, MCPRequest, MCPResponse, MethodName, ProtocolVersion,
        ServerCapabilities,
    },
    registry::{CapabilityRegistry, ToolStats},
    transport::ChannelPair,
};

/// MCP server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct McpServerConfig {
    /// Server information
    pub server_info: Implementation,
    /// Server capabilities
    pub capabilities: ServerCapabilities,
}

impl Default for McpServerConfig {
    fn default() -> Self {
        Self {
            server_info: Implementation::new("wiki", env!("CARGO_PKG_VERSION")),
            capabilities: ServerCapabilities::all(),
        }
    }
}

/// Per-connection handshake state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ServerSessionState {
    AwaitingInit,
    Ready,
    Closed,
}

/// Server-side view of one connected client
#[derive(Debug)]
pub struct ServerSession {
    id: String,
    state: Mutex<ServerSessionState>,
    client_info: Mutex<Option<Implementation>>,
    connected_at: DateTime<Utc>,
}

impl ServerSession {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            state: Mutex::new(ServerSessionState::AwaitingInit),
            client_info: Mutex::new(None),
            connected_at: Utc::now(),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn state(&self) -> ServerSessionState {
        *self.state.lock()
    }

    pub fn client_info(&self) -> Option<Implementation> {
        self.client_info.lock().clone()
    }

    fn begin(&self) -> MCPResult<()> {
        let mut state = self.state.lock();
        match *state {
            ServerSessionState::AwaitingInit => {
                *state = ServerSessionState::Ready;
                Ok(())
            }
            ServerSessionState::Ready => Err(MCPError::protocol("Session already initialized")),
            ServerSessionState::Closed => Err(MCPError::connection("Session is closed")),
        }
    }

    fn require_ready(&self, method: &MethodName) -> MCPResult<()> {
        match *self.state.lock() {
            ServerSessionState::Ready => Ok(()),
            ServerSessionState::AwaitingInit => Err(MCPError::protocol(format!(
                "Received '{}' before initialization was complete",
                method
            ))),
            ServerSessionState::Closed => Err(MCPError::connection("Session is closed")),
        }
    }

    fn close(&self) {
        *self.state.lock() = ServerSessionState::Closed;
    }
}

/// Combined statistics served on `/stats` and logged at shutdown
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatsReport {
    pub server: ServerStats,
    pub tools: ToolStats,
    pub tool_success_rate: f64,
}

/// Server statistics
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct ServerStats {
    /// Sessions opened since start
    pub total_sessions: u64,
    /// Sessions currently being served
    pub active_sessions: u64,
    /// Requests handled, by method
    pub requests_by_method: HashMap<String, u64>,
    /// Requests answered with an error
    pub error_responses: u64,
    /// Last activity timestamp
    pub last_activity: Option<DateTime<Utc>>,
}

/// MCP server shared by every session
pub struct McpServer {
    config: McpServerConfig,
    registry: Arc<CapabilityRegistry>,
    stats: Mutex<ServerStats>,
}

impl McpServer {
    /// Create a server around a fully populated registry
    pub fn new(config: McpServerConfig, registry: CapabilityRegistry) -> Self {
        Self {
            config,
            registry: Arc::new(registry),
            stats: Mutex::new(ServerStats::default()),
        }
    }

    pub fn config(&self) -> &McpServerConfig {
        &self.config
    }

    pub fn registry(&self) -> &CapabilityRegistry {
        &self.registry
    }

    /// Snapshot of server statistics
    pub fn stats(&self) -> ServerStats {
        self.stats.lock().clone()
    }

    /// Session and tool statistics together
    pub fn report(&self) -> StatsReport {
        let tools = self.registry.stats();
        StatsReport {
            server: self.stats(),
            tool_success_rate: tools.success_rate(),
            tools,
        }
    }

    /// Serve one session until the client's stream ends.
    ///
    /// The handshake is processed in arrival order. Every other request runs
    /// as its own task, so a slow tool call does not hold up a listing that
    /// arrives after it.
    pub async fn serve(self: Arc<Self>, channels: ChannelPair, session_id: impl Into<String>) {
        let ChannelPair {
            sender,
            mut receiver,
        } = channels;
        let session = Arc::new(ServerSession::new(session_id));

        {
            let mut stats = self.stats.lock();
            stats.total_sessions += 1;
            stats.active_sessions += 1;
        }
        info!(session = %session.id(), "MCP session opened");

        loop {
            let message = match receiver.recv().await {
                Ok(Some(message)) => message,
                Ok(None) => break,
                Err(error) => {
                    warn!(session = %session.id(), %error, "inbound stream failed");
                    break;
                }
            };

            match message {
                MCPMessage::Request(request) if request.method == MethodName::initialize() => {
                    let response = self.handle_request(&session, request).await;
                    if let Err(error) = sender.send(MCPMessage::Response(response)).await {
                        debug!(session = %session.id(), %error, "could not deliver handshake");
                        break;
                    }
                }
                MCPMessage::Request(request) => {
                    let server = Arc::clone(&self);
                    let session = Arc::clone(&session);
                    let sender = Arc::clone(&sender);
                    tokio::spawn(async move {
                        let response = server.handle_request(&session, request).await;
                        if let Err(error) = sender.send(MCPMessage::Response(response)).await {
                            debug!(session = %session.id(), %error, "could not deliver response");
                        }
                    });
                }
                MCPMessage::Notification(notification) => {
                    self.handle_notification(&session, &notification)
                }
                MCPMessage::Response(response) => {
                    debug!(session = %session.id(), id = %response.id, "ignoring response from client")
                }
            }
        }

        session.close();
        if let Err(error) = sender.close().await {
            debug!(session = %session.id(), %error, "closing outbound stream");
        }
        self.stats.lock().active_sessions -= 1;
        info!(
            session = %session.id(),
            duration_secs = (Utc::now() - session.connected_at).num_seconds(),
            "MCP session closed"
        );
    }

    /// Answer one request. Never fails: errors become error responses.
    pub async fn handle_request(&self, session: &ServerSession, request: MCPRequest) -> MCPResponse {
        let id = request.id.clone();
        let method = request.method.clone();

        {
            let mut stats = self.stats.lock();
            *stats
                .requests_by_method
                .entry(method.as_str().to_string())
                .or_insert(0) += 1;
            stats.last_activity = Some(Utc::now());
        }

        match self.route(session, request).await {
            Ok(result) => MCPResponse::success(id, result),
            Err(error) => {
                debug!(session = %session.id(), %method, %error, "request failed");
                self.stats.lock().error_responses += 1;
                MCPResponse::error(id, error.to_wire())
            }
        }
    }

    async fn route(&self, session: &ServerSession, request: MCPRequest) -> MCPResult<Value> {
        request.validate()?;
        let MCPRequest { method, params, .. } = request;

        if method == MethodName::initialize() {
            return self.initialize(session, params);
        }
        if method == MethodName::ping() {
            return Ok(Value::Object(Default::default()));
        }

        session.require_ready(&method)?;

        if let Some(kind) = CapabilityKind::from_method(method.as_str()) {
            return self.registry.listing(kind).to_result();
        }

        if method == MethodName::call_tool() {
            let params: CallToolParams = params
                .ok_or_else(|| MCPError::invalid_params("Missing tool call params"))
                .and_then(|params| {
                    serde_json::from_value(params).map_err(|e| {
                        MCPError::invalid_params(format!("Invalid tool call params: {}", e))
                    })
                })?;

            info!(session = %session.id(), tool = %params.name, "tool call");
            let result = self.registry.dispatch(&params.name, params.arguments).await?;
            return serde_json::to_value(result.to_wire())
                .map_err(|e| MCPError::internal(format!("Could not encode tool result: {}", e)));
        }

        Err(MCPError::protocol(format!("Method not found: {}", method)))
    }

    fn initialize(&self, session: &ServerSession, params: Option<Value>) -> MCPResult<Value> {
        let params: Option<InitializeParams> = params
            .map(serde_json::from_value)
            .transpose()
            .map_err(|e| MCPError::invalid_params(format!("Invalid initialize params: {}", e)))?;

        session.begin()?;

        if let Some(params) = params {
            if !ProtocolVersion::CURRENT.is_compatible(&params.protocol_version) {
                warn!(
                    session = %session.id(),
                    requested = %params.protocol_version,
                    "client requested a different protocol revision"
                );
            }
            info!(
                session = %session.id(),
                client = %params.client_info.name,
                version = %params.client_info.version,
                "client initialized"
            );
            *session.client_info.lock() = Some(params.client_info);
        }

        serde_json::to_value(InitializeResult {
            protocol_version: ProtocolVersion::CURRENT,
            capabilities: self.config.capabilities.clone(),
            server_info: self.config.server_info.clone(),
        })
        .map_err(|e| MCPError::internal(format!("Could not encode handshake: {}", e)))
    }

    fn handle_notification(&self, session: &ServerSession, notification: &MCPNotification) {
        if notification.method == MethodName::initialized() {
            debug!(session = %session.id(), "client confirmed initialization");
        } else {
            debug!(session = %session.id(), method = %notification.method, "ignoring notification");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mcp::{
        errors::ErrorCode,
        protocol::{MessageId, ToolArguments, ToolCallResult},
        registry::{ParameterType, ToolDescriptor, ToolParameter},
        session::{Session, SessionConfig},
        transport::memory_pair,
    };
    use serde_json::json;
    use std::time::Duration;
    use tokio::sync::Notify;

    fn registry() -> CapabilityRegistry {
        let mut registry = CapabilityRegistry::new();
        registry
            .register(
                ToolDescriptor::from_fn("echo", "Echo the message back", |args: ToolArguments| async move {
                    Ok::<_, MCPError>(args["message"].as_str().unwrap_or_default().to_string())
                })
                .with_parameter(ToolParameter::new("message", ParameterType::String, true)),
            )
            .unwrap();
        registry
            .register(ToolDescriptor::from_fn("upper", "Uppercase", |args: ToolArguments| async move {
                Ok::<_, MCPError>(args["message"].as_str().unwrap_or_default().to_uppercase())
            }))
            .unwrap();
        registry
    }

    fn request(id: u64, method: &str, params: Option<Value>) -> MCPRequest {
        MCPRequest::with_id(MessageId::from_number(id), method, params)
    }

    fn connect(server: McpServer) -> (Session, tokio::task::JoinHandle<()>) {
        let (client, server_side) = memory_pair();
        let handle = tokio::spawn(Arc::new(server).serve(server_side, "test"));
        (Session::new(client, SessionConfig::default()), handle)
    }

    #[tokio::test]
    async fn test_request_before_initialize_is_protocol_error() {
        let server = McpServer::new(McpServerConfig::default(), registry());
        let session = ServerSession::new("s1");

        let response = server
            .handle_request(&session, request(1, "tools/list", None))
            .await;
        let error = response.error.unwrap();
        assert_eq!(error.error_code(), ErrorCode::ProtocolError);

        let ping = server.handle_request(&session, request(2, "ping", None)).await;
        assert!(ping.is_success());
    }

    #[tokio::test]
    async fn test_double_initialize_is_protocol_error() {
        let server = McpServer::new(McpServerConfig::default(), registry());
        let session = ServerSession::new("s1");

        let first = server.handle_request(&session, request(1, "initialize", None)).await;
        assert!(first.is_success());
        assert_eq!(first.result.unwrap()["serverInfo"]["name"], "wiki");
        assert_eq!(session.state(), ServerSessionState::Ready);

        let second = server.handle_request(&session, request(2, "initialize", None)).await;
        assert_eq!(second.error.unwrap().error_code(), ErrorCode::ProtocolError);
    }

    #[tokio::test]
    async fn test_unknown_method_and_bad_params() {
        let server = McpServer::new(McpServerConfig::default(), registry());
        let session = ServerSession::new("s1");
        server.handle_request(&session, request(1, "initialize", None)).await;

        let unknown = server.handle_request(&session, request(2, "sampling/createMessage", None)).await;
        let error = unknown.error.unwrap();
        assert_eq!(error.error_code(), ErrorCode::ProtocolError);
        assert_eq!(error.message, "Method not found: sampling/createMessage");

        let bad = server
            .handle_request(&session, request(3, "tools/call", Some(json!({"arguments": {}}))))
            .await;
        assert_eq!(bad.error.unwrap().error_code(), ErrorCode::InvalidParams);

        let stats = server.stats();
        assert_eq!(stats.requests_by_method["initialize"], 1);
        assert_eq!(stats.error_responses, 2);
    }

    #[tokio::test]
    async fn test_session_round_trip() {
        let (session, _server) = connect(McpServer::new(McpServerConfig::default(), registry()));

        let info = session.initialize().await.unwrap();
        assert_eq!(info.server_info.name, "wiki");

        let tools = session.list_tools().await.unwrap();
        let names: Vec<_> = tools.iter().map(|t| t.name.as_str()).collect();
        assert_eq!(names, vec!["echo", "upper"]);
        assert_eq!(session.list_tools().await.unwrap(), tools);

        assert!(session.list_resources().await.unwrap().is_empty());
        assert!(session.list_prompts().await.unwrap().is_empty());

        let mut args = ToolArguments::new();
        args.insert("message".to_string(), json!("hello"));
        let result = session.call_tool("echo", args).await.unwrap();
        assert_eq!(result, ToolCallResult::success("hello"));

        let unknown = session.call_tool("missing", ToolArguments::new()).await.unwrap();
        assert_eq!(
            unknown,
            ToolCallResult::failure(ErrorCode::InvalidParams, "Unknown tool: missing")
        );

        let invalid = session.call_tool("echo", ToolArguments::new()).await.unwrap();
        assert!(matches!(
            invalid,
            ToolCallResult::Failure { code: ErrorCode::InvalidParams, .. }
        ));
    }

    #[tokio::test]
    async fn test_slow_tool_does_not_block_listing() {
        let gate = Arc::new(Notify::new());
        let mut registry = CapabilityRegistry::new();
        {
            let gate = Arc::clone(&gate);
            registry
                .register(ToolDescriptor::from_fn("slow", "Waits for a signal", move |_| {
                    let gate = Arc::clone(&gate);
                    async move {
                        gate.notified().await;
                        Ok::<_, MCPError>("done".to_string())
                    }
                }))
                .unwrap();
        }

        let (session, _server) = connect(McpServer::new(McpServerConfig::default(), registry));
        session.initialize().await.unwrap();

        let slow = {
            let session = session.clone();
            tokio::spawn(async move { session.call_tool("slow", ToolArguments::new()).await })
        };

        let tools = tokio::time::timeout(Duration::from_secs(2), session.list_tools())
            .await
            .expect("listing blocked behind slow tool")
            .unwrap();
        assert_eq!(tools.len(), 1);
        assert!(!slow.is_finished());

        gate.notify_one();
        let result = slow.await.unwrap().unwrap();
        assert_eq!(result, ToolCallResult::success("done"));
    }

    #[tokio::test]
    async fn test_serve_ends_when_client_closes() {
        let server = Arc::new(McpServer::new(McpServerConfig::default(), registry()));
        let (client, server_side) = memory_pair();
        let handle = tokio::spawn(Arc::clone(&server).serve(server_side, "closing"));

        let session = Session::new(client, SessionConfig::default());
        session.initialize().await.unwrap();
        session.close().await.unwrap();

        tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .expect("serve did not return")
            .unwrap();
        let stats = server.stats();
        assert_eq!(stats.total_sessions, 1);
        assert_eq!(stats.active_sessions, 0);
    }
}
