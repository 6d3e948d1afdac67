//! MCP Capability Registry
//!
//! Server-side table of invocable tools plus the resource and prompt
//! descriptors advertised in listings. Registration happens before the
//! server starts accepting sessions; afterwards the registry is shared
//! read-only behind an `Arc`.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures_util::FutureExt;
use indexmap::IndexMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::{
    any::Any,
    collections::HashMap,
    future::Future,
    panic::AssertUnwindSafe,
    sync::Arc,
    time::{Duration, Instant},
};
use tracing::{debug, error, info, warn};

use super::{
    errors::{ErrorCode, MCPError, MCPResult},
    protocol::{CapabilityKind, CapabilityList, PromptInfo, ResourceInfo, ToolArguments, ToolCallResult, ToolInfo},
};

/// Tool parameter definition
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolParameter {
    /// Parameter name
    pub name: String,
    /// Parameter description
    pub description: Option<String>,
    /// Parameter type
    pub parameter_type: ParameterType,
    /// Whether parameter is required
    pub required: bool,
}

impl ToolParameter {
    /// Create a new parameter
    pub fn new(name: impl Into<String>, parameter_type: ParameterType, required: bool) -> Self {
        Self {
            name: name.into(),
            description: None,
            parameter_type,
            required,
        }
    }

    /// Set description
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Validate a value against this parameter
    pub fn validate(&self, value: Option<&Value>) -> MCPResult<()> {
        let value = match value {
            None | Some(Value::Null) if self.required => {
                return Err(MCPError::invalid_params(format!(
                    "Required parameter '{}' is missing",
                    self.name
                )))
            }
            None | Some(Value::Null) => return Ok(()),
            Some(value) => value,
        };

        match (&self.parameter_type, value) {
            (ParameterType::String, Value::String(_))
            | (ParameterType::Number, Value::Number(_))
            | (ParameterType::Boolean, Value::Bool(_))
            | (ParameterType::Array, Value::Array(_))
            | (ParameterType::Object, Value::Object(_)) => Ok(()),
            (ParameterType::Integer, Value::Number(n)) if n.is_i64() || n.is_u64() => Ok(()),
            _ => Err(MCPError::invalid_params(format!(
                "Parameter '{}' must be of type {}",
                self.name,
                self.parameter_type.as_str()
            ))),
        }
    }
}

/// Parameter type enumeration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ParameterType {
    String,
    Number,
    Integer,
    Boolean,
    Array,
    Object,
}

impl ParameterType {
    /// JSON Schema type name
    pub fn as_str(&self) -> &'static str {
        match self {
            ParameterType::String => "string",
            ParameterType::Number => "number",
            ParameterType::Integer => "integer",
            ParameterType::Boolean => "boolean",
            ParameterType::Array => "array",
            ParameterType::Object => "object",
        }
    }
}

/// Handler invoked when a tool is called
#[async_trait]
pub trait ToolHandler: Send + Sync {
    /// Run the tool. Errors are mapped to a failure result by the registry.
    async fn call(&self, arguments: ToolArguments) -> MCPResult<String>;
}

/// Adapter turning an async closure into a [`ToolHandler`]
pub struct FnHandler<F>(pub F);

#[async_trait]
impl<F, Fut> ToolHandler for FnHandler<F>
where
    F: Fn(ToolArguments) -> Fut + Send + Sync,
    Fut: Future<Output = MCPResult<String>> + Send,
{
    async fn call(&self, arguments: ToolArguments) -> MCPResult<String> {
        (self.0)(arguments).await
    }
}

/// Name, description, parameters and handler of one tool
#[derive(Clone)]
pub struct ToolDescriptor {
    pub name: String,
    pub description: String,
    pub parameters: Vec<ToolParameter>,
    handler: Arc<dyn ToolHandler>,
}

impl ToolDescriptor {
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        handler: Arc<dyn ToolHandler>,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            parameters: Vec::new(),
            handler,
        }
    }

    /// Build a descriptor around an async closure
    pub fn from_fn<F, Fut>(name: impl Into<String>, description: impl Into<String>, f: F) -> Self
    where
        F: Fn(ToolArguments) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = MCPResult<String>> + Send + 'static,
    {
        Self::new(name, description, Arc::new(FnHandler(f)))
    }

    /// Declare a parameter
    pub fn with_parameter(mut self, parameter: ToolParameter) -> Self {
        self.parameters.push(parameter);
        self
    }

    /// Check arguments against the declared parameters
    pub fn validate_arguments(&self, arguments: &ToolArguments) -> MCPResult<()> {
        for parameter in &self.parameters {
            parameter.validate(arguments.get(&parameter.name))?;
        }
        Ok(())
    }

    /// JSON Schema describing the tool input
    pub fn input_schema(&self) -> Value {
        let mut properties = serde_json::Map::new();
        let mut required = Vec::new();

        for param in &self.parameters {
            let mut schema = serde_json::Map::new();
            schema.insert(
                "type".to_string(),
                Value::String(param.parameter_type.as_str().to_string()),
            );
            if let Some(description) = &param.description {
                schema.insert("description".to_string(), Value::String(description.clone()));
            }

            properties.insert(param.name.clone(), Value::Object(schema));
            if param.required {
                required.push(Value::String(param.name.clone()));
            }
        }

        serde_json::json!({
            "type": "object",
            "properties": properties,
            "required": required,
        })
    }

    /// Wire descriptor
    pub fn info(&self) -> ToolInfo {
        ToolInfo {
            name: self.name.clone(),
            description: self.description.clone(),
            input_schema: self.input_schema(),
        }
    }
}

impl std::fmt::Debug for ToolDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolDescriptor")
            .field("name", &self.name)
            .field("parameters", &self.parameters)
            .finish_non_exhaustive()
    }
}

/// Tool execution statistics
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct ToolStats {
    /// Total executions
    pub total_executions: u64,
    /// Successful executions
    pub successful_executions: u64,
    /// Failed executions
    pub failed_executions: u64,
    /// Executions by tool
    pub executions_by_tool: HashMap<String, u64>,
    /// Average execution time
    pub average_execution_time: Duration,
    /// Last execution time
    pub last_execution: Option<DateTime<Utc>>,
}

impl ToolStats {
    /// Update statistics for an execution
    pub fn update(&mut self, tool_name: &str, success: bool, duration: Duration) {
        self.total_executions += 1;

        if success {
            self.successful_executions += 1;
        } else {
            self.failed_executions += 1;
        }

        *self
            .executions_by_tool
            .entry(tool_name.to_string())
            .or_insert(0) += 1;

        let total = self.average_execution_time.as_nanos()
            * u128::from(self.total_executions - 1)
            + duration.as_nanos();
        self.average_execution_time =
            Duration::from_nanos((total / u128::from(self.total_executions)) as u64);

        self.last_execution = Some(Utc::now());
    }

    /// Get success rate
    pub fn success_rate(&self) -> f64 {
        if self.total_executions == 0 {
            0.0
        } else {
            self.successful_executions as f64 / self.total_executions as f64
        }
    }
}

/// Registry of tools, resources and prompts
#[derive(Default)]
pub struct CapabilityRegistry {
    tools: IndexMap<String, ToolDescriptor>,
    resources: IndexMap<String, ResourceInfo>,
    prompts: IndexMap<String, PromptInfo>,
    stats: Mutex<ToolStats>,
}

impl CapabilityRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a tool
    pub fn register(&mut self, descriptor: ToolDescriptor) -> MCPResult<()> {
        if self.tools.contains_key(&descriptor.name) {
            return Err(MCPError::duplicate_name(descriptor.name));
        }

        info!(tool = %descriptor.name, "registering tool");
        self.tools.insert(descriptor.name.clone(), descriptor);
        Ok(())
    }

    /// Register a resource descriptor, keyed by URI
    pub fn register_resource(&mut self, resource: ResourceInfo) -> MCPResult<()> {
        if self.resources.contains_key(&resource.uri) {
            return Err(MCPError::duplicate_name(resource.uri));
        }
        self.resources.insert(resource.uri.clone(), resource);
        Ok(())
    }

    /// Register a prompt descriptor
    pub fn register_prompt(&mut self, prompt: PromptInfo) -> MCPResult<()> {
        if self.prompts.contains_key(&prompt.name) {
            return Err(MCPError::duplicate_name(prompt.name));
        }
        self.prompts.insert(prompt.name.clone(), prompt);
        Ok(())
    }

    /// Tools in registration order
    pub fn list(&self) -> Vec<ToolInfo> {
        self.tools.values().map(ToolDescriptor::info).collect()
    }

    /// Fresh listing of one capability kind, in registration order
    pub fn listing(&self, kind: CapabilityKind) -> CapabilityList {
        match kind {
            CapabilityKind::Tools => CapabilityList::Tools(self.list()),
            CapabilityKind::Resources => {
                CapabilityList::Resources(self.resources.values().cloned().collect())
            }
            CapabilityKind::Prompts => {
                CapabilityList::Prompts(self.prompts.values().cloned().collect())
            }
        }
    }

    /// Whether a tool with this name exists
    pub fn contains(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    /// Invoke a tool by name.
    ///
    /// Only an unknown name is an error. Invalid arguments, handler errors
    /// and handler panics all become [`ToolCallResult::Failure`].
    pub async fn dispatch(&self, name: &str, arguments: ToolArguments) -> MCPResult<ToolCallResult> {
        let tool = self
            .tools
            .get(name)
            .cloned()
            .ok_or_else(|| MCPError::unknown_tool(name))?;

        let started = Instant::now();
        let result = match tool.validate_arguments(&arguments) {
            Err(error) => ToolCallResult::from_error(&error),
            Ok(()) => {
                debug!(tool = name, "dispatching tool call");
                match AssertUnwindSafe(tool.handler.call(arguments))
                    .catch_unwind()
                    .await
                {
                    Ok(Ok(text)) => ToolCallResult::success(text),
                    Ok(Err(error)) => {
                        warn!(tool = name, %error, "tool call failed");
                        ToolCallResult::from_error(&error)
                    }
                    Err(panic) => {
                        let detail = panic_message(panic.as_ref());
                        error!(tool = name, panic = %detail, "tool handler panicked");
                        ToolCallResult::failure(
                            ErrorCode::Internal,
                            format!("Unexpected error: {}", detail),
                        )
                    }
                }
            }
        };

        self.stats
            .lock()
            .update(name, result.is_success(), started.elapsed());
        Ok(result)
    }

    /// Snapshot of execution statistics
    pub fn stats(&self) -> ToolStats {
        self.stats.lock().clone()
    }
}

pub(crate) fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "tool handler panicked".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn echo_tool(name: &str) -> ToolDescriptor {
        ToolDescriptor::from_fn(name, "Echo the message back", |args: ToolArguments| async move {
            Ok::<_, MCPError>(
                args.get("message")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string(),
            )
        })
        .with_parameter(
            ToolParameter::new("message", ParameterType::String, true)
                .with_description("Text to echo"),
        )
    }

    fn args(value: Value) -> ToolArguments {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn test_register_rejects_duplicate_name() {
        let mut registry = CapabilityRegistry::new();
        registry.register(echo_tool("echo")).unwrap();

        let result = registry.register(echo_tool("echo"));
        assert_eq!(result, Err(MCPError::duplicate_name("echo")));
        assert_eq!(registry.list().len(), 1);
    }

    #[test]
    fn test_list_preserves_registration_order() {
        let mut registry = CapabilityRegistry::new();
        for name in ["zeta", "alpha", "mid"] {
            registry.register(echo_tool(name)).unwrap();
        }

        let names: Vec<_> = registry.list().into_iter().map(|t| t.name).collect();
        assert_eq!(names, vec!["zeta", "alpha", "mid"]);
        assert_eq!(registry.list(), registry.list());
    }

    #[test]
    fn test_input_schema() {
        let schema = echo_tool("echo").input_schema();
        assert_eq!(schema["type"], "object");
        assert_eq!(schema["properties"]["message"]["type"], "string");
        assert_eq!(schema["required"], json!(["message"]));
    }

    #[test]
    fn test_listing_other_kinds() {
        let mut registry = CapabilityRegistry::new();
        assert!(registry.listing(CapabilityKind::Resources).is_empty());

        registry
            .register_prompt(PromptInfo {
                name: "summarize".to_string(),
                description: None,
                arguments: Vec::new(),
            })
            .unwrap();
        let listing = registry.listing(CapabilityKind::Prompts);
        assert_eq!(listing.names(), vec!["summarize"]);

        let duplicate = registry.register_prompt(PromptInfo {
            name: "summarize".to_string(),
            description: None,
            arguments: Vec::new(),
        });
        assert!(matches!(duplicate, Err(MCPError::DuplicateName { .. })));

        let guide = ResourceInfo {
            uri: "wiki://style-guide".to_string(),
            name: "Style guide".to_string(),
            description: None,
            mime_type: Some("text/markdown".to_string()),
        };
        registry.register_resource(guide.clone()).unwrap();
        let listing = registry.listing(CapabilityKind::Resources);
        assert_eq!(listing.names(), vec!["Style guide"]);
        assert!(matches!(
            registry.register_resource(guide),
            Err(MCPError::DuplicateName { .. })
        ));
    }

    #[test]
    fn test_success_rate() {
        let mut stats = ToolStats::default();
        assert_eq!(stats.success_rate(), 0.0);

        stats.update("echo", true, Duration::from_millis(4));
        stats.update("echo", true, Duration::from_millis(2));
        stats.update("echo", false, Duration::from_millis(6));
        stats.update("other", true, Duration::from_millis(4));
        assert_eq!(stats.success_rate(), 0.75);
        assert_eq!(stats.executions_by_tool["echo"], 3);
        assert_eq!(stats.average_execution_time, Duration::from_millis(4));
    }

    #[tokio::test]
    async fn test_dispatch_unknown_tool() {
        let registry = CapabilityRegistry::new();
        let result = registry.dispatch("missing", ToolArguments::new()).await;
        assert_eq!(result, Err(MCPError::unknown_tool("missing")));
    }

    #[tokio::test]
    async fn test_dispatch_reaches_handler() {
        let mut registry = CapabilityRegistry::new();
        registry.register(echo_tool("echo")).unwrap();

        let result = registry
            .dispatch("echo", args(json!({"message": "hello"})))
            .await
            .unwrap();
        assert_eq!(result, ToolCallResult::success("hello"));

        let stats = registry.stats();
        assert_eq!(stats.total_executions, 1);
        assert_eq!(stats.executions_by_tool["echo"], 1);
    }

    #[tokio::test]
    async fn test_invalid_arguments_become_failure() {
        let mut registry = CapabilityRegistry::new();
        registry.register(echo_tool("echo")).unwrap();

        let missing = registry.dispatch("echo", ToolArguments::new()).await.unwrap();
        assert_eq!(
            missing,
            ToolCallResult::failure(ErrorCode::InvalidParams, "Required parameter 'message' is missing")
        );

        let wrong_type = registry
            .dispatch("echo", args(json!({"message": 42})))
            .await
            .unwrap();
        assert!(matches!(
            wrong_type,
            ToolCallResult::Failure { code: ErrorCode::InvalidParams, .. }
        ));
    }

    #[tokio::test]
    async fn test_handler_error_becomes_failure() {
        let mut registry = CapabilityRegistry::new();
        registry
            .register(ToolDescriptor::from_fn("broken", "Always fails", |_| async {
                Err::<String, _>(MCPError::internal("Request error: connection refused"))
            }))
            .unwrap();

        let result = registry.dispatch("broken", ToolArguments::new()).await.unwrap();
        assert_eq!(
            result,
            ToolCallResult::failure(ErrorCode::Internal, "Request error: connection refused")
        );
        assert_eq!(registry.stats().failed_executions, 1);
    }

    #[tokio::test]
    async fn test_handler_panic_is_caught() {
        let mut registry = CapabilityRegistry::new();
        registry
            .register(ToolDescriptor::from_fn("panics", "Panics", |_| async {
                if true {
                    panic!("converter exploded");
                }
                Ok::<_, MCPError>(String::new())
            }))
            .unwrap();

        let result = registry.dispatch("panics", ToolArguments::new()).await.unwrap();
        assert_eq!(
            result,
            ToolCallResult::failure(ErrorCode::Internal, "Unexpected error: converter exploded")
        );
    }

    #[test]
    fn test_parameter_validation() {
        let param = ToolParameter::new("url", ParameterType::String, true);
        assert!(param.validate(Some(&json!("https://example.com"))).is_ok());
        assert!(param.validate(Some(&json!(42))).is_err());
        assert!(param.validate(None).is_err());

        let optional = ToolParameter::new("limit", ParameterType::Integer, false);
        assert!(optional.validate(None).is_ok());
        assert!(optional.validate(Some(&json!(3))).is_ok());
        assert!(optional.validate(Some(&json!(1.5))).is_err());
    }
}
