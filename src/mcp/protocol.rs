//! MCP Protocol Core Implementation
//!
//! JSON-RPC 2.0 message structures, handshake payloads and the capability
//! listing and tool-call payloads exchanged between client and server.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::{
    fmt::{self, Display},
    str::FromStr,
};
use uuid::Uuid;

use super::errors::{ErrorCode, MCPError, MCPResult};

/// JSON-RPC version string carried by every message
pub const JSONRPC_VERSION: &str = "2.0";

/// MCP protocol revision, identified by its publication date
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ProtocolVersion {
    pub year: u16,
    pub month: u8,
    pub day: u8,
}

impl ProtocolVersion {
    /// MCP Protocol version 2024-11-05
    pub const CURRENT: Self = Self {
        year: 2024,
        month: 11,
        day: 5,
    };

    /// Create a new protocol version
    pub fn new(year: u16, month: u8, day: u8) -> Self {
        Self { year, month, day }
    }

    /// Revisions published in the same year are wire compatible
    pub fn is_compatible(&self, other: &Self) -> bool {
        self.year == other.year
    }
}

impl Display for ProtocolVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04}-{:02}-{:02}", self.year, self.month, self.day)
    }
}

impl FromStr for ProtocolVersion {
    type Err = MCPError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = s.split('-').collect();
        if parts.len() != 3 {
            return Err(MCPError::protocol(format!(
                "Invalid protocol version format: {}",
                s
            )));
        }

        let invalid = || MCPError::protocol(format!("Invalid protocol version: {}", s));
        let year = parts[0].parse().map_err(|_| invalid())?;
        let month = parts[1].parse().map_err(|_| invalid())?;
        let day = parts[2].parse().map_err(|_| invalid())?;

        Ok(Self::new(year, month, day))
    }
}

impl TryFrom<String> for ProtocolVersion {
    type Error = MCPError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<ProtocolVersion> for String {
    fn from(version: ProtocolVersion) -> Self {
        version.to_string()
    }
}

impl PartialOrd for ProtocolVersion {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ProtocolVersion {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        (self.year, self.month, self.day).cmp(&(other.year, other.month, other.day))
    }
}

/// Correlation id for requests and responses.
///
/// `Null` only appears on error responses to messages whose id could not
/// be read.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MessageId {
    String(String),
    Number(u64),
    Null,
}

impl MessageId {
    /// Generate a new random message ID
    pub fn generate() -> Self {
        Self::String(Uuid::new_v4().to_string())
    }

    /// Create from number
    pub fn from_number(n: u64) -> Self {
        Self::Number(n)
    }
}

impl Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MessageId::String(s) => write!(f, "{}", s),
            MessageId::Number(n) => write!(f, "{}", n),
            MessageId::Null => f.write_str("null"),
        }
    }
}

/// Method name for MCP requests and notifications
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MethodName(String);

impl MethodName {
    /// Create a new method name
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// Get the method name as string
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn initialize() -> Self {
        Self("initialize".to_string())
    }

    pub fn initialized() -> Self {
        Self("notifications/initialized".to_string())
    }

    pub fn ping() -> Self {
        Self("ping".to_string())
    }

    pub fn list_tools() -> Self {
        Self("tools/list".to_string())
    }

    pub fn list_resources() -> Self {
        Self("resources/list".to_string())
    }

    pub fn list_prompts() -> Self {
        Self("prompts/list".to_string())
    }

    pub fn call_tool() -> Self {
        Self("tools/call".to_string())
    }
}

impl Display for MethodName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for MethodName {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for MethodName {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// JSON-RPC error object
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcError {
    /// Error code
    pub code: i32,
    /// Error message
    pub message: String,
    /// Additional error data
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl RpcError {
    /// Create a new error object for a taxonomy code
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code: code.code(),
            message: message.into(),
            data: None,
        }
    }

    /// Taxonomy code for this error object
    pub fn error_code(&self) -> ErrorCode {
        ErrorCode::from_code(self.code)
    }
}

/// MCP request message
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MCPRequest {
    /// JSON-RPC version (must be "2.0")
    pub jsonrpc: String,
    /// Request ID
    pub id: MessageId,
    /// Method name
    pub method: MethodName,
    /// Request parameters
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl MCPRequest {
    /// Create a new request with a random ID
    pub fn new(method: impl Into<MethodName>) -> Self {
        Self::with_id(MessageId::generate(), method, None)
    }

    /// Create request with specific ID
    pub fn with_id(id: MessageId, method: impl Into<MethodName>, params: Option<Value>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id,
            method: method.into(),
            params,
        }
    }

    /// Validate the request structure
    pub fn validate(&self) -> MCPResult<()> {
        if self.jsonrpc != JSONRPC_VERSION {
            return Err(MCPError::protocol("Invalid JSON-RPC version"));
        }

        if self.method.as_str().is_empty() {
            return Err(MCPError::protocol("Method name cannot be empty"));
        }

        Ok(())
    }
}

/// MCP response message
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MCPResponse {
    /// JSON-RPC version (must be "2.0")
    pub jsonrpc: String,
    /// Request ID
    pub id: MessageId,
    /// Response result (success)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    /// Response error (failure)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<RpcError>,
}

impl MCPResponse {
    /// Create a successful response
    pub fn success(id: MessageId, result: Value) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id,
            result: Some(result),
            error: None,
        }
    }

    /// Create an error response
    pub fn error(id: MessageId, error: RpcError) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id,
            result: None,
            error: Some(error),
        }
    }

    /// Check if this is a successful response
    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }

    /// Validate the response structure
    pub fn validate(&self) -> MCPResult<()> {
        if self.jsonrpc != JSONRPC_VERSION {
            return Err(MCPError::protocol("Invalid JSON-RPC version"));
        }

        if self.result.is_some() && self.error.is_some() {
            return Err(MCPError::protocol(
                "Response cannot have both result and error",
            ));
        }

        if self.result.is_none() && self.error.is_none() {
            return Err(MCPError::protocol(
                "Response must have either result or error",
            ));
        }

        Ok(())
    }

    /// Consume the response, yielding the result or the mapped error
    pub fn into_result(self) -> MCPResult<Value> {
        match (self.result, self.error) {
            (_, Some(error)) => Err(MCPError::from_wire(&error)),
            (Some(result), None) => Ok(result),
            (None, None) => Err(MCPError::protocol(
                "Response must have either result or error",
            )),
        }
    }
}

/// MCP notification message (no response expected)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MCPNotification {
    /// JSON-RPC version (must be "2.0")
    pub jsonrpc: String,
    /// Method name
    pub method: MethodName,
    /// Notification parameters
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl MCPNotification {
    /// Create a new notification
    pub fn new(method: impl Into<MethodName>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            method: method.into(),
            params: None,
        }
    }
}

/// Any JSON-RPC message travelling over a channel
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MCPMessage {
    Request(MCPRequest),
    Response(MCPResponse),
    Notification(MCPNotification),
}

impl MCPMessage {
    /// Parse a message from JSON text
    pub fn from_json(json: &str) -> MCPResult<Self> {
        serde_json::from_str(json)
            .map_err(|e| MCPError::protocol(format!("Could not parse message: {}", e)))
    }

    /// Serialize the message to JSON text
    pub fn to_json(&self) -> MCPResult<String> {
        serde_json::to_string(self)
            .map_err(|e| MCPError::internal(format!("Could not serialize message: {}", e)))
    }

    /// Short label for logging
    pub fn kind(&self) -> &'static str {
        match self {
            MCPMessage::Request(_) => "request",
            MCPMessage::Response(_) => "response",
            MCPMessage::Notification(_) => "notification",
        }
    }
}

/// Name and version of a peer implementation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Implementation {
    pub name: String,
    pub version: String,
}

impl Implementation {
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
        }
    }
}

/// Handshake request payload
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitializeParams {
    pub protocol_version: ProtocolVersion,
    #[serde(default)]
    pub capabilities: Value,
    pub client_info: Implementation,
}

impl InitializeParams {
    pub fn new(client_info: Implementation) -> Self {
        Self {
            protocol_version: ProtocolVersion::CURRENT,
            capabilities: Value::Object(Default::default()),
            client_info,
        }
    }
}

/// Per-kind capability flag advertised in the handshake
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListCapability {
    #[serde(default)]
    pub list_changed: bool,
}

/// Server capability summary
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerCapabilities {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tools: Option<ListCapability>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resources: Option<ListCapability>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompts: Option<ListCapability>,
}

impl ServerCapabilities {
    /// Advertise every listing kind
    pub fn all() -> Self {
        Self {
            tools: Some(ListCapability::default()),
            resources: Some(ListCapability::default()),
            prompts: Some(ListCapability::default()),
        }
    }
}

/// Handshake acknowledgment payload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitializeResult {
    pub protocol_version: ProtocolVersion,
    pub capabilities: ServerCapabilities,
    pub server_info: Implementation,
}

/// Tool descriptor as listed on the wire
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolInfo {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub input_schema: Value,
}

impl Display for ToolInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.name, first_line(&self.description))
    }
}

/// Resource descriptor as listed on the wire
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceInfo {
    pub uri: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
}

impl Display for ResourceInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.name, self.uri)?;
        if let Some(description) = &self.description {
            write!(f, ": {}", first_line(description))?;
        }
        Ok(())
    }
}

/// Argument accepted by a prompt
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PromptArgument {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub required: bool,
}

/// Prompt descriptor as listed on the wire
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PromptInfo {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub arguments: Vec<PromptArgument>,
}

impl Display for PromptInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name)?;
        if let Some(description) = &self.description {
            write!(f, ": {}", first_line(description))?;
        }
        Ok(())
    }
}

fn first_line(text: &str) -> &str {
    text.trim().lines().next().unwrap_or_default().trim()
}

/// The three listable capability kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CapabilityKind {
    Tools,
    Resources,
    Prompts,
}

impl CapabilityKind {
    /// Every kind, in the order a client lists them
    pub const ALL: [CapabilityKind; 3] = [
        CapabilityKind::Tools,
        CapabilityKind::Resources,
        CapabilityKind::Prompts,
    ];

    /// Field name holding the sequence in a listing result
    pub fn field(&self) -> &'static str {
        match self {
            CapabilityKind::Tools => "tools",
            CapabilityKind::Resources => "resources",
            CapabilityKind::Prompts => "prompts",
        }
    }

    /// Wire method that lists this kind
    pub fn method(&self) -> MethodName {
        match self {
            CapabilityKind::Tools => MethodName::list_tools(),
            CapabilityKind::Resources => MethodName::list_resources(),
            CapabilityKind::Prompts => MethodName::list_prompts(),
        }
    }

    /// Kind listed by a wire method, if any
    pub fn from_method(method: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.method().as_str() == method)
    }
}

impl Display for CapabilityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.field())
    }
}

impl FromStr for CapabilityKind {
    type Err = MCPError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.field() == s)
            .ok_or_else(|| MCPError::invalid_params(format!("Unknown capability kind: {}", s)))
    }
}

/// Ordered listing of one capability kind
#[derive(Debug, Clone, PartialEq)]
pub enum CapabilityList {
    Tools(Vec<ToolInfo>),
    Resources(Vec<ResourceInfo>),
    Prompts(Vec<PromptInfo>),
}

impl CapabilityList {
    pub fn kind(&self) -> CapabilityKind {
        match self {
            CapabilityList::Tools(_) => CapabilityKind::Tools,
            CapabilityList::Resources(_) => CapabilityKind::Resources,
            CapabilityList::Prompts(_) => CapabilityKind::Prompts,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            CapabilityList::Tools(items) => items.len(),
            CapabilityList::Resources(items) => items.len(),
            CapabilityList::Prompts(items) => items.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Descriptor names, in listing order
    pub fn names(&self) -> Vec<String> {
        match self {
            CapabilityList::Tools(items) => items.iter().map(|i| i.name.clone()).collect(),
            CapabilityList::Resources(items) => items.iter().map(|i| i.name.clone()).collect(),
            CapabilityList::Prompts(items) => items.iter().map(|i| i.name.clone()).collect(),
        }
    }

    /// One display line per descriptor
    pub fn display_items(&self) -> Vec<String> {
        match self {
            CapabilityList::Tools(items) => items.iter().map(ToString::to_string).collect(),
            CapabilityList::Resources(items) => items.iter().map(ToString::to_string).collect(),
            CapabilityList::Prompts(items) => items.iter().map(ToString::to_string).collect(),
        }
    }

    /// Encode as a listing result, e.g. `{"tools": [...]}`
    pub fn to_result(&self) -> MCPResult<Value> {
        let items = match self {
            CapabilityList::Tools(items) => serde_json::to_value(items),
            CapabilityList::Resources(items) => serde_json::to_value(items),
            CapabilityList::Prompts(items) => serde_json::to_value(items),
        }
        .map_err(|e| MCPError::internal(format!("Could not encode listing: {}", e)))?;

        let mut result = serde_json::Map::new();
        result.insert(self.kind().field().to_string(), items);
        Ok(Value::Object(result))
    }

    /// Decode a listing result for the given kind
    pub fn from_result(kind: CapabilityKind, result: &Value) -> MCPResult<Self> {
        let items = result.get(kind.field()).cloned().ok_or_else(|| {
            MCPError::protocol(format!("Listing result is missing '{}'", kind.field()))
        })?;

        let invalid = |e: serde_json::Error| {
            MCPError::protocol(format!("Invalid {} listing: {}", kind.field(), e))
        };

        Ok(match kind {
            CapabilityKind::Tools => Self::Tools(serde_json::from_value(items).map_err(invalid)?),
            CapabilityKind::Resources => {
                Self::Resources(serde_json::from_value(items).map_err(invalid)?)
            }
            CapabilityKind::Prompts => {
                Self::Prompts(serde_json::from_value(items).map_err(invalid)?)
            }
        })
    }
}

/// Arguments passed to a tool: unique keys, mixed primitive values
pub type ToolArguments = serde_json::Map<String, Value>;

/// `tools/call` request payload
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallToolParams {
    pub name: String,
    #[serde(default)]
    pub arguments: ToolArguments,
}

/// Tool content items
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ToolContent {
    #[serde(rename = "text")]
    Text { text: String },
}

impl ToolContent {
    /// Create text content
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text { text: text.into() }
    }
}

/// `tools/call` result payload as it travels on the wire
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallToolResponse {
    pub content: Vec<ToolContent>,
    #[serde(default)]
    pub is_error: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<RpcError>,
}

/// Outcome of one tool invocation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ToolCallResult {
    Success { text: String },
    Failure { code: ErrorCode, message: String },
}

impl ToolCallResult {
    pub fn success(text: impl Into<String>) -> Self {
        Self::Success { text: text.into() }
    }

    pub fn failure(code: ErrorCode, message: impl Into<String>) -> Self {
        Self::Failure {
            code,
            message: message.into(),
        }
    }

    /// Map an internal error to a failure result
    pub fn from_error(error: &MCPError) -> Self {
        Self::failure(error.code(), error.message())
    }

    pub fn is_success(&self) -> bool {
        matches!(self, ToolCallResult::Success { .. })
    }

    /// Encode for the wire
    pub fn to_wire(&self) -> CallToolResponse {
        match self {
            ToolCallResult::Success { text } => CallToolResponse {
                content: vec![ToolContent::text(text.clone())],
                is_error: false,
                error: None,
            },
            ToolCallResult::Failure { code, message } => CallToolResponse {
                content: vec![ToolContent::text(message.clone())],
                is_error: true,
                error: Some(RpcError::new(*code, message.clone())),
            },
        }
    }

    /// Decode from the wire
    pub fn from_wire(response: CallToolResponse) -> Self {
        let text = response
            .content
            .iter()
            .map(|ToolContent::Text { text }| text.as_str())
            .collect::<Vec<_>>()
            .join("\n");

        if !response.is_error {
            return Self::Success { text };
        }

        match response.error {
            Some(error) => Self::Failure {
                code: error.error_code(),
                message: error.message,
            },
            None => Self::Failure {
                code: ErrorCode::Internal,
                message: text,
            },
        }
    }
}

impl Display for ToolCallResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ToolCallResult::Success { text } => f.write_str(text),
            ToolCallResult::Failure { code, message } => write!(f, "[{}] {}", code, message),
        }
    }
}
