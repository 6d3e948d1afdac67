//! MCP Error Handling
//!
//! Internal failure taxonomy for sessions, transports and tools, and the
//! mapping of those failures onto the closed set of wire error codes.

use serde::{Deserialize, Serialize};
use std::fmt::{self, Display};
use thiserror::Error;

use super::protocol::RpcError;

/// Result type for MCP operations
pub type MCPResult<T> = Result<T, MCPError>;

/// Closed set of error codes surfaced on the wire.
///
/// Each code carries its JSON-RPC numeric value. Codes received from a peer
/// that fall outside this set are folded back into it by [`ErrorCode::from_code`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorCode {
    /// Caller-supplied input is structurally or semantically invalid
    InvalidParams,
    /// Server-side failure unrelated to caller input
    Internal,
    /// Transport unavailable or closed mid-flight
    ConnectionError,
    /// Session used out of its valid state sequence
    ProtocolError,
}

impl ErrorCode {
    /// JSON-RPC numeric code
    pub fn code(&self) -> i32 {
        match self {
            ErrorCode::InvalidParams => -32602,
            ErrorCode::Internal => -32603,
            ErrorCode::ConnectionError => -32000,
            ErrorCode::ProtocolError => -32600,
        }
    }

    /// Map a numeric code received from a peer back onto the taxonomy
    pub fn from_code(code: i32) -> Self {
        match code {
            -32602 => ErrorCode::InvalidParams,
            -32603 => ErrorCode::Internal,
            -32000 => ErrorCode::ConnectionError,
            // parse error, invalid request, method not found
            -32700 | -32600 | -32601 => ErrorCode::ProtocolError,
            _ => ErrorCode::Internal,
        }
    }

    /// Stable name used in logs and CLI output
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::InvalidParams => "InvalidParams",
            ErrorCode::Internal => "Internal",
            ErrorCode::ConnectionError => "ConnectionError",
            ErrorCode::ProtocolError => "ProtocolError",
        }
    }
}

impl Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// MCP error enumeration
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum MCPError {
    /// Caller input rejected
    #[error("Invalid params: {message}")]
    InvalidParams { message: String },

    /// Server-side failure
    #[error("Internal error: {message}")]
    Internal { message: String },

    /// Transport unavailable or closed
    #[error("Connection error: {message}")]
    Connection { message: String },

    /// Session state machine violated, or a malformed peer message
    #[error("Protocol error: {message}")]
    Protocol { message: String },

    /// Dispatch to a tool name that was never registered
    #[error("Unknown tool: {name}")]
    UnknownTool { name: String },

    /// Registration of a name that already exists
    #[error("Duplicate name: {name}")]
    DuplicateName { name: String },

    /// A bounded wait expired
    #[error("Timeout error: operation timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },
}

impl MCPError {
    /// Create an invalid params error
    pub fn invalid_params(message: impl Into<String>) -> Self {
        Self::InvalidParams {
            message: message.into(),
        }
    }

    /// Create an internal error
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Create a connection error
    pub fn connection(message: impl Into<String>) -> Self {
        Self::Connection {
            message: message.into(),
        }
    }

    /// Create a protocol error
    pub fn protocol(message: impl Into<String>) -> Self {
        Self::Protocol {
            message: message.into(),
        }
    }

    /// Create an unknown tool error
    pub fn unknown_tool(name: impl Into<String>) -> Self {
        Self::UnknownTool { name: name.into() }
    }

    /// Create a duplicate name error
    pub fn duplicate_name(name: impl Into<String>) -> Self {
        Self::DuplicateName { name: name.into() }
    }

    /// Create a timeout error
    pub fn timeout(timeout_ms: u64) -> Self {
        Self::Timeout { timeout_ms }
    }

    /// Wire code this error maps to
    pub fn code(&self) -> ErrorCode {
        match self {
            MCPError::InvalidParams { .. } | MCPError::UnknownTool { .. } => {
                ErrorCode::InvalidParams
            }
            MCPError::Internal { .. } | MCPError::DuplicateName { .. } => ErrorCode::Internal,
            MCPError::Connection { .. } | MCPError::Timeout { .. } => ErrorCode::ConnectionError,
            MCPError::Protocol { .. } => ErrorCode::ProtocolError,
        }
    }

    /// Human-readable message without the category prefix
    pub fn message(&self) -> String {
        match self {
            MCPError::InvalidParams { message }
            | MCPError::Internal { message }
            | MCPError::Connection { message }
            | MCPError::Protocol { message } => message.clone(),
            MCPError::UnknownTool { name } => format!("Unknown tool: {}", name),
            MCPError::DuplicateName { name } => format!("Tool '{}' already registered", name),
            MCPError::Timeout { timeout_ms } => {
                format!("Operation timed out after {}ms", timeout_ms)
            }
        }
    }

    /// Convert to the JSON-RPC error object sent on the wire
    pub fn to_wire(&self) -> RpcError {
        RpcError::new(self.code(), self.message())
    }

    /// Rebuild an internal error from a wire error object
    pub fn from_wire(error: &RpcError) -> Self {
        let message = error.message.clone();
        match ErrorCode::from_code(error.code) {
            ErrorCode::InvalidParams => Self::InvalidParams { message },
            ErrorCode::Internal => Self::Internal { message },
            ErrorCode::ConnectionError => Self::Connection { message },
            ErrorCode::ProtocolError => Self::Protocol { message },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_taxonomy_maps_to_wire_codes() {
        let cases = [
            (MCPError::invalid_params("bad"), ErrorCode::InvalidParams),
            (MCPError::internal("boom"), ErrorCode::Internal),
            (MCPError::connection("closed"), ErrorCode::ConnectionError),
            (MCPError::protocol("not ready"), ErrorCode::ProtocolError),
            (MCPError::unknown_tool("nope"), ErrorCode::InvalidParams),
            (MCPError::duplicate_name("echo"), ErrorCode::Internal),
            (MCPError::timeout(50), ErrorCode::ConnectionError),
        ];

        for (error, expected) in cases {
            assert_eq!(error.code(), expected, "{:?}", error);
            assert_eq!(error.to_wire().code, expected.code());
        }
    }

    #[test]
    fn test_wire_message_has_no_prefix() {
        let error = MCPError::invalid_params("URL must start with http or https.");
        assert_eq!(error.to_wire().message, "URL must start with http or https.");
        assert_eq!(
            error.to_string(),
            "Invalid params: URL must start with http or https."
        );

        let unknown = MCPError::unknown_tool("missing");
        assert_eq!(unknown.to_wire().message, "Unknown tool: missing");
    }

    #[test]
    fn test_from_wire() {
        let wire = RpcError::new(ErrorCode::Internal, "Request error: refused");
        assert_eq!(
            MCPError::from_wire(&wire),
            MCPError::internal("Request error: refused")
        );

        let method_not_found = RpcError {
            code: -32601,
            message: "Method not found: foo".to_string(),
            data: None,
        };
        assert_eq!(
            MCPError::from_wire(&method_not_found).code(),
            ErrorCode::ProtocolError
        );
    }

    #[test]
    fn test_unrecognised_code_folds_into_internal() {
        assert_eq!(ErrorCode::from_code(-1), ErrorCode::Internal);
        assert_eq!(ErrorCode::from_code(-32700), ErrorCode::ProtocolError);
    }
}
