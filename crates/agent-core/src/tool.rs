//! Tool System
//!
//! Tools are discovered once at startup, registered by name and invoked by the
//! tool-execution step of the reasoning loop. The registry is immutable once it is
//! shared with an [`Agent`](crate::reasoning::Agent).

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use crate::error::{AgentError, Result};
use crate::message::Message;

/// Default deadline for a single tool invocation
pub const DEFAULT_TOOL_TIMEOUT: Duration = Duration::from_secs(60);

/// Tool call request from the LLM
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    /// Call ID assigned by the model, echoed back in the tool message
    pub id: String,

    /// Tool identifier
    pub name: String,

    /// Arguments as a JSON object
    #[serde(default = "empty_object")]
    pub arguments: Value,
}

fn empty_object() -> Value {
    Value::Object(serde_json::Map::new())
}

impl ToolCall {
    pub fn new(id: impl Into<String>, name: impl Into<String>, arguments: Value) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            arguments,
        }
    }
}

/// Result from tool execution
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ToolResult {
    /// Tool that was called
    pub name: String,

    /// Whether execution succeeded
    pub success: bool,

    /// Output (result text or error)
    pub output: String,
}

impl ToolResult {
    pub fn success(name: impl Into<String>, output: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            success: true,
            output: output.into(),
        }
    }

    pub fn failure(name: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            success: false,
            output: error.into(),
        }
    }

    /// Turn this result into the tool message answering `call_id`
    pub fn into_message(self, call_id: &str) -> Message {
        let msg = if self.success {
            Message::tool(call_id, self.output)
        } else {
            Message::tool_error(call_id, self.output)
        };
        msg.with_name(self.name)
    }
}

/// Tool definition advertised to the model
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ToolSchema {
    /// Unique tool identifier
    pub name: String,

    /// Human-readable description (shown to LLM)
    #[serde(default)]
    pub description: String,

    /// JSON Schema for the arguments object
    #[serde(default = "object_schema")]
    pub input_schema: Value,
}

fn object_schema() -> Value {
    serde_json::json!({"type": "object"})
}

impl ToolSchema {
    pub fn new(name: impl Into<String>, description: impl Into<String>, input_schema: Value) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            input_schema,
        }
    }

    /// Names listed under the schema's `required` key
    pub fn required_params(&self) -> Vec<&str> {
        self.input_schema
            .get("required")
            .and_then(Value::as_array)
            .map(|req| req.iter().filter_map(Value::as_str).collect())
            .unwrap_or_default()
    }
}

/// Tool trait - one implementation per concrete tool
#[async_trait]
pub trait Tool: Send + Sync {
    /// Get the tool's schema for LLM function calling
    fn schema(&self) -> ToolSchema;

    /// Execute the tool with given arguments
    async fn execute(&self, call: &ToolCall) -> Result<ToolResult>;

    /// Validate arguments before execution
    fn validate(&self, call: &ToolCall) -> Result<()> {
        let args = match &call.arguments {
            Value::Object(args) => args,
            Value::String(raw) => {
                return Err(AgentError::ToolValidation(format!(
                    "arguments for '{}' are not valid JSON: {raw}",
                    call.name
                )));
            }
            _ => {
                return Err(AgentError::ToolValidation(format!(
                    "arguments for '{}' must be a JSON object",
                    call.name
                )));
            }
        };

        let schema = self.schema();
        for param in schema.required_params() {
            if !args.contains_key(param) {
                return Err(AgentError::ToolValidation(format!(
                    "Missing required parameter: {param}"
                )));
            }
        }

        Ok(())
    }
}

/// Registry for available tools
pub struct ToolRegistry {
    tools: BTreeMap<String, Arc<dyn Tool>>,
    call_timeout: Duration,
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self {
            tools: BTreeMap::new(),
            call_timeout: DEFAULT_TOOL_TIMEOUT,
        }
    }

    /// Set the per-invocation deadline
    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout = timeout;
        self
    }

    pub const fn call_timeout(&self) -> Duration {
        self.call_timeout
    }

    /// Register a new tool. The first tool registered under a name wins.
    pub fn register<T: Tool + 'static>(&mut self, tool: T) -> bool {
        self.register_arc(Arc::new(tool))
    }

    /// Register a shared tool. The first tool registered under a name wins.
    pub fn register_arc(&mut self, tool: Arc<dyn Tool>) -> bool {
        let name = tool.schema().name;
        if self.tools.contains_key(&name) {
            tracing::warn!(tool = %name, "duplicate tool name, keeping first registration");
            return false;
        }
        self.tools.insert(name, tool);
        true
    }

    /// Get a tool by name
    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).cloned()
    }

    /// Execute a single tool call: lookup, validation, then invocation under
    /// the registry deadline
    pub async fn execute(&self, call: &ToolCall) -> Result<ToolResult> {
        let tool = self
            .get(&call.name)
            .ok_or_else(|| AgentError::ToolNotFound(call.name.clone()))?;

        tool.validate(call)?;

        tokio::time::timeout(self.call_timeout, tool.execute(call))
            .await
            .map_err(|_| AgentError::ToolTimeout {
                name: call.name.clone(),
                secs: self.call_timeout.as_secs(),
            })?
    }

    /// Run every call concurrently and return one tool message per call, in
    /// the order of `calls`. Failures become error tool messages; nothing here
    /// aborts the batch.
    pub async fn execute_all(&self, calls: &[ToolCall]) -> Vec<Message> {
        let invocations = calls.iter().map(|call| async move {
            let started = std::time::Instant::now();
            let outcome = self.execute(call).await;
            let elapsed_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);

            match outcome {
                Ok(result) => {
                    tracing::debug!(tool = %call.name, call_id = %call.id, elapsed_ms, success = result.success, "tool finished");
                    result.into_message(&call.id)
                }
                Err(e) => {
                    tracing::warn!(tool = %call.name, call_id = %call.id, elapsed_ms, error = %e, "tool failed");
                    Message::tool_error(&call.id, format!("Error: {e}")).with_name(call.name.clone())
                }
            }
        });

        // join_all yields outputs in input order regardless of completion order
        futures::future::join_all(invocations).await
    }

    /// Get all tool schemas (the catalog advertised to the model)
    pub fn schemas(&self) -> Vec<ToolSchema> {
        self.tools.values().map(|t| t.schema()).collect()
    }

    /// Get tool names
    pub fn names(&self) -> Vec<&str> {
        self.tools.keys().map(String::as_str).collect()
    }

    /// Number of registered tools
    pub fn len(&self) -> usize {
        self.tools.len()
    }

    /// Check if empty
    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}
