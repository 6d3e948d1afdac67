//! Model Context Protocol (MCP) Implementation
//!
//! JSON-RPC 2.0 session protocol between a tool-calling client and a tool
//! server.
//!
//! Key components:
//! - Protocol core with message types, handshake payloads and tool results
//! - Client session with request correlation and a bounded handshake
//! - Server session state machine and capability registry
//! - HTTP/SSE transports for both ends plus an in-process channel pair

pub mod errors;
pub mod http;
pub mod protocol;
pub mod registry;
pub mod server;
pub mod session;
pub mod sse;
pub mod transport;

pub use errors::{ErrorCode, MCPError, MCPResult};
pub use http::{HttpTransportConfig, SseServer};
pub use protocol::{
    CapabilityKind, CapabilityList, Implementation, MCPMessage, MCPNotification, MCPRequest,
    MCPResponse, MessageId, MethodName, ProtocolVersion, ToolArguments, ToolCallResult,
};
pub use registry::{CapabilityRegistry, ToolDescriptor, ToolHandler, ToolParameter};
pub use server::{McpServer, McpServerConfig, StatsReport};
pub use session::{Session, SessionConfig, SessionState};
pub use sse::SseTransport;
pub use transport::{memory_pair, ChannelPair, MessageReceiver, MessageSender, TransportConfig};
