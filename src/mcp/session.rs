//! MCP Client Session
//!
//! Handshake and request/response correlation on top of a [`ChannelPair`].
//! Every outgoing request is registered in a pending table before it is
//! sent; a dispatch task owns the inbound stream and resolves pending
//! entries by correlation id, so responses may arrive in any order.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::{
    collections::HashMap,
    fmt::{self, Display},
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, Weak,
    },
    time::{Duration, Instant},
};
use tokio::{sync::oneshot, task::JoinHandle};
use tracing::{debug, info, warn};

use super::{
    errors::{MCPError, MCPResult},
    protocol::{
        CallToolParams, CallToolResponse, CapabilityKind, CapabilityList, Implementation,
        InitializeParams, InitializeResult, MCPMessage, MCPNotification, MCPRequest, MCPResponse,
        MessageId, MethodName, PromptInfo, ProtocolVersion, ResourceInfo, RpcError, ToolArguments,
        ToolCallResult, ToolInfo,
    },
    transport::{ChannelPair, MessageReceiver, MessageSender},
};
use crate::mcp::errors::ErrorCode;

/// Session lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionState {
    Uninitialized,
    Initializing,
    Ready,
    Closed,
}

impl Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionState::Uninitialized => "uninitialized",
            SessionState::Initializing => "initializing",
            SessionState::Ready => "ready",
            SessionState::Closed => "closed",
        };
        f.write_str(name)
    }
}

/// Session configuration
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Identity sent in the handshake
    pub client_info: Implementation,
    /// Bound on waiting for the handshake acknowledgment
    pub handshake_timeout: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            client_info: Implementation::new("wiki-mcp-client", env!("CARGO_PKG_VERSION")),
            handshake_timeout: Duration::from_secs(30),
        }
    }
}

/// Session statistics
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct ClientStats {
    /// Total requests sent
    pub requests_sent: u64,
    /// Responses carrying a result
    pub responses_received: u64,
    /// Requests that ended in an error response or a transport failure
    pub failed_requests: u64,
    /// Notifications received from the server
    pub notifications_received: u64,
    /// Average round trip of answered requests
    pub average_response_time: Duration,
    /// Last activity timestamp
    pub last_activity: Option<DateTime<Utc>>,
}

impl ClientStats {
    fn record_response(&mut self, success: bool, elapsed: Duration) {
        let answered = self.responses_received + self.failed_requests;
        let total = self.average_response_time.as_nanos() * u128::from(answered)
            + elapsed.as_nanos();
        self.average_response_time =
            Duration::from_nanos((total / u128::from(answered + 1)) as u64);

        if success {
            self.responses_received += 1;
        } else {
            self.failed_requests += 1;
        }
        self.last_activity = Some(Utc::now());
    }
}

struct PendingRequest {
    method: MethodName,
    response_sender: oneshot::Sender<MCPResult<MCPResponse>>,
    sent_at: Instant,
}

struct Shared {
    state: SessionState,
    pending: HashMap<MessageId, PendingRequest>,
}

/// Removes a request's pending entry when its caller stops waiting,
/// including when the call future is dropped mid-flight
struct PendingGuard<'a> {
    shared: &'a Mutex<Shared>,
    id: MessageId,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        if self.shared.lock().pending.remove(&self.id).is_some() {
            debug!(id = %self.id, "request abandoned before its response");
        }
    }
}

struct SessionInner {
    sender: Arc<dyn MessageSender>,
    shared: Mutex<Shared>,
    next_id: AtomicU64,
    config: SessionConfig,
    server_info: Mutex<Option<InitializeResult>>,
    stats: Mutex<ClientStats>,
    dispatcher: Mutex<Option<JoinHandle<()>>>,
}

/// Client side of an MCP session.
///
/// Cloning yields another handle to the same session, so independent tasks
/// can issue concurrent calls.
#[derive(Clone)]
pub struct Session {
    inner: Arc<SessionInner>,
}

impl Session {
    /// Wrap a channel pair and start the inbound dispatch task.
    ///
    /// Must be called from within a tokio runtime.
    pub fn new(channels: ChannelPair, config: SessionConfig) -> Self {
        let ChannelPair { sender, receiver } = channels;
        let inner = Arc::new(SessionInner {
            sender,
            shared: Mutex::new(Shared {
                state: SessionState::Uninitialized,
                pending: HashMap::new(),
            }),
            next_id: AtomicU64::new(1),
            config,
            server_info: Mutex::new(None),
            stats: Mutex::new(ClientStats::default()),
            dispatcher: Mutex::new(None),
        });

        let handle = tokio::spawn(dispatch_loop(Arc::downgrade(&inner), receiver));
        *inner.dispatcher.lock() = Some(handle);

        Self { inner }
    }

    /// Current lifecycle state
    pub fn state(&self) -> SessionState {
        self.inner.shared.lock().state
    }

    /// Handshake result, once the session is ready
    pub fn server_info(&self) -> Option<InitializeResult> {
        self.inner.server_info.lock().clone()
    }

    /// Snapshot of the session counters
    pub fn stats(&self) -> ClientStats {
        self.inner.stats.lock().clone()
    }

    /// Number of requests still awaiting a response
    pub fn pending_requests(&self) -> usize {
        self.inner.shared.lock().pending.len()
    }

    /// Perform the handshake.
    ///
    /// Fails with a protocol error unless the session is uninitialized. Any
    /// failure after the handshake request was sent closes the session.
    pub async fn initialize(&self) -> MCPResult<InitializeResult> {
        {
            let mut shared = self.inner.shared.lock();
            match shared.state {
                SessionState::Uninitialized => shared.state = SessionState::Initializing,
                SessionState::Initializing => {
                    return Err(MCPError::protocol("Handshake already in progress"))
                }
                SessionState::Ready => {
                    return Err(MCPError::protocol("Session already initialized"))
                }
                SessionState::Closed => return Err(MCPError::connection("Session is closed")),
            }
        }

        match self.handshake().await {
            Ok(result) => {
                info!(
                    server = %result.server_info.name,
                    version = %result.server_info.version,
                    protocol = %result.protocol_version,
                    "MCP session ready"
                );
                Ok(result)
            }
            Err(error) => {
                warn!(%error, "MCP handshake failed");
                if let Err(close_error) = self.close().await {
                    debug!(error = %close_error, "closing after failed handshake");
                }
                Err(error)
            }
        }
    }

    async fn handshake(&self) -> MCPResult<InitializeResult> {
        let params = serde_json::to_value(InitializeParams::new(
            self.inner.config.client_info.clone(),
        ))
        .map_err(|e| MCPError::internal(format!("Could not encode handshake: {}", e)))?;

        let timeout = self.inner.config.handshake_timeout;
        let value = tokio::time::timeout(
            timeout,
            self.inner
                .request(MethodName::initialize(), Some(params), false),
        )
        .await
        .map_err(|_| MCPError::timeout(timeout.as_millis() as u64))??;

        let result: InitializeResult = serde_json::from_value(value)
            .map_err(|e| MCPError::protocol(format!("Invalid handshake response: {}", e)))?;

        if !ProtocolVersion::CURRENT.is_compatible(&result.protocol_version) {
            return Err(MCPError::protocol(format!(
                "Unsupported protocol version {} (client speaks {})",
                result.protocol_version,
                ProtocolVersion::CURRENT
            )));
        }

        self.inner
            .sender
            .send(MCPMessage::Notification(MCPNotification::new(
                MethodName::initialized(),
            )))
            .await?;

        {
            let mut shared = self.inner.shared.lock();
            if shared.state == SessionState::Closed {
                return Err(MCPError::connection("Session closed during handshake"));
            }
            shared.state = SessionState::Ready;
        }
        *self.inner.server_info.lock() = Some(result.clone());

        Ok(result)
    }

    /// Issue a request and wait for its correlated response
    pub async fn call(&self, method: impl Into<MethodName>, params: Option<Value>) -> MCPResult<Value> {
        self.inner.request(method.into(), params, true).await
    }

    /// Liveness check
    pub async fn ping(&self) -> MCPResult<()> {
        self.call(MethodName::ping(), None).await.map(|_| ())
    }

    /// List one capability kind
    pub async fn list(&self, kind: CapabilityKind) -> MCPResult<CapabilityList> {
        let result = self.call(kind.method(), None).await?;
        CapabilityList::from_result(kind, &result)
    }

    pub async fn list_tools(&self) -> MCPResult<Vec<ToolInfo>> {
        match self.list(CapabilityKind::Tools).await? {
            CapabilityList::Tools(tools) => Ok(tools),
            other => Err(unexpected_listing(other.kind())),
        }
    }

    pub async fn list_resources(&self) -> MCPResult<Vec<ResourceInfo>> {
        match self.list(CapabilityKind::Resources).await? {
            CapabilityList::Resources(resources) => Ok(resources),
            other => Err(unexpected_listing(other.kind())),
        }
    }

    pub async fn list_prompts(&self) -> MCPResult<Vec<PromptInfo>> {
        match self.list(CapabilityKind::Prompts).await? {
            CapabilityList::Prompts(prompts) => Ok(prompts),
            other => Err(unexpected_listing(other.kind())),
        }
    }

    /// Invoke a tool.
    ///
    /// Tool-level failures, including an unknown tool name, come back as
    /// [`ToolCallResult::Failure`]; session and protocol failures are errors.
    pub async fn call_tool(
        &self,
        name: impl Into<String>,
        arguments: ToolArguments,
    ) -> MCPResult<ToolCallResult> {
        let params = serde_json::to_value(CallToolParams {
            name: name.into(),
            arguments,
        })
        .map_err(|e| MCPError::internal(format!("Could not encode tool call: {}", e)))?;

        match self.call(MethodName::call_tool(), Some(params)).await {
            Ok(value) => {
                let response: CallToolResponse = serde_json::from_value(value).map_err(|e| {
                    MCPError::protocol(format!("Invalid tool call response: {}", e))
                })?;
                Ok(ToolCallResult::from_wire(response))
            }
            Err(error) if matches!(error.code(), ErrorCode::InvalidParams | ErrorCode::Internal) => {
                Ok(ToolCallResult::from_error(&error))
            }
            Err(error) => Err(error),
        }
    }

    /// Release the transport and fail every outstanding call. Idempotent.
    pub async fn close(&self) -> MCPResult<()> {
        if !self.inner.shutdown("Session closed") {
            return Ok(());
        }

        let result = self.inner.sender.close().await;
        if let Some(handle) = self.inner.dispatcher.lock().take() {
            handle.abort();
        }

        info!("MCP session closed");
        result
    }
}

fn unexpected_listing(kind: CapabilityKind) -> MCPError {
    MCPError::protocol(format!("Unexpected {} listing", kind))
}

impl SessionInner {
    async fn request(
        &self,
        method: MethodName,
        params: Option<Value>,
        require_ready: bool,
    ) -> MCPResult<Value> {
        let id = MessageId::from_number(self.next_id.fetch_add(1, Ordering::Relaxed));
        let (response_sender, response_receiver) = oneshot::channel();

        {
            let mut shared = self.shared.lock();
            match shared.state {
                SessionState::Closed => return Err(MCPError::connection("Session is closed")),
                SessionState::Ready => {}
                SessionState::Initializing if !require_ready => {}
                state => {
                    return Err(MCPError::protocol(format!(
                        "Cannot call '{}' while the session is {}",
                        method, state
                    )))
                }
            }
            shared.pending.insert(
                id.clone(),
                PendingRequest {
                    method: method.clone(),
                    response_sender,
                    sent_at: Instant::now(),
                },
            );
        }
        let _guard = PendingGuard {
            shared: &self.shared,
            id: id.clone(),
        };
        self.stats.lock().requests_sent += 1;

        debug!(%id, %method, "sending request");
        let request = MCPRequest::with_id(id, method, params);
        if let Err(error) = self.sender.send(MCPMessage::Request(request)).await {
            self.stats.lock().failed_requests += 1;
            return Err(error);
        }

        let response = response_receiver.await.map_err(|_| {
            MCPError::connection("Session closed before a response arrived")
        })??;

        response.into_result()
    }

    /// Mark the session closed and fail every pending request.
    ///
    /// Returns false when the session was already closed.
    fn shutdown(&self, reason: &str) -> bool {
        let drained: Vec<PendingRequest> = {
            let mut shared = self.shared.lock();
            if shared.state == SessionState::Closed {
                return false;
            }
            shared.state = SessionState::Closed;
            shared.pending.drain().map(|(_, pending)| pending).collect()
        };

        if !drained.is_empty() {
            debug!(count = drained.len(), reason, "failing pending requests");
        }
        let failed = drained.len() as u64;
        for pending in drained {
            let _ = pending
                .response_sender
                .send(Err(MCPError::connection(reason)));
        }
        self.stats.lock().failed_requests += failed;

        true
    }

    async fn handle_message(&self, message: MCPMessage) {
        match message {
            MCPMessage::Response(response) => {
                let pending = self.shared.lock().pending.remove(&response.id);
                match pending {
                    Some(pending) => {
                        debug!(id = %response.id, method = %pending.method, "response received");
                        self.stats
                            .lock()
                            .record_response(response.is_success(), pending.sent_at.elapsed());
                        let _ = pending.response_sender.send(Ok(response));
                    }
                    None if response.id == MessageId::Null => warn!(
                        error = ?response.error.as_ref().map(|e| &e.message),
                        "server rejected a message it could not correlate"
                    ),
                    None => warn!(id = %response.id, "response for unknown request id"),
                }
            }
            MCPMessage::Notification(notification) => {
                debug!(method = %notification.method, "notification received");
                let mut stats = self.stats.lock();
                stats.notifications_received += 1;
                stats.last_activity = Some(Utc::now());
            }
            MCPMessage::Request(request) => {
                let response = if request.method == MethodName::ping() {
                    MCPResponse::success(request.id, Value::Object(Default::default()))
                } else {
                    warn!(method = %request.method, "unsupported request from server");
                    MCPResponse::error(
                        request.id,
                        RpcError::new(
                            ErrorCode::ProtocolError,
                            format!("Method not found: {}", request.method),
                        ),
                    )
                };
                if let Err(error) = self.sender.send(MCPMessage::Response(response)).await {
                    debug!(%error, "could not answer server request");
                }
            }
        }
    }
}

impl Drop for SessionInner {
    fn drop(&mut self) {
        if let Some(handle) = self.dispatcher.get_mut().take() {
            handle.abort();
        }
    }
}

async fn dispatch_loop(session: Weak<SessionInner>, mut receiver: Box<dyn MessageReceiver>) {
    loop {
        let next = receiver.recv().await;
        let Some(inner) = session.upgrade() else {
            break;
        };

        match next {
            Ok(Some(message)) => inner.handle_message(message).await,
            Ok(None) => {
                if inner.shutdown("Transport closed") {
                    info!("MCP transport closed by peer");
                }
                let _ = inner.sender.close().await;
                break;
            }
            Err(error) => {
                warn!(%error, "MCP transport failed");
                inner.shutdown(&format!("Transport failed: {}", error.message()));
                let _ = inner.sender.close().await;
                break;
            }
        }
    }
}
