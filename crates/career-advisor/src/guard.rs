//! Argument Guards
//!
//! The Firecrawl search tool fails when called with a `sources` argument, and
//! small models keep sending it. [`ArgumentGuard`] hides such arguments from the
//! advertised schema and strips them from calls before they reach the server.

use std::sync::Arc;

use agent_core::{Result, Tool, ToolCall, ToolRegistry, ToolResult, ToolSchema};
use async_trait::async_trait;
use serde_json::Value;

use crate::firecrawl::SEARCH_TOOL;

/// Arguments the search tool rejects
const SEARCH_REJECTED_ARGS: &[&str] = &["sources"];

/// Wraps a tool and removes a fixed set of arguments
pub struct ArgumentGuard {
    inner: Arc<dyn Tool>,
    rejected: &'static [&'static str],
}

impl ArgumentGuard {
    pub fn new(inner: Arc<dyn Tool>, rejected: &'static [&'static str]) -> Self {
        Self { inner, rejected }
    }

    fn strip(&self, call: &ToolCall) -> ToolCall {
        let mut call = call.clone();
        if let Some(args) = call.arguments.as_object_mut() {
            for key in self.rejected {
                if args.remove(*key).is_some() {
                    tracing::debug!(tool = %call.name, argument = *key, "dropped rejected argument");
                }
            }
        }
        call
    }
}

#[async_trait]
impl Tool for ArgumentGuard {
    fn schema(&self) -> ToolSchema {
        let mut schema = self.inner.schema();
        if let Some(props) = schema.input_schema.get_mut("properties").and_then(Value::as_object_mut) {
            for key in self.rejected {
                props.remove(*key);
            }
        }
        if let Some(required) = schema.input_schema.get_mut("required").and_then(Value::as_array_mut) {
            required.retain(|r| !r.as_str().is_some_and(|r| self.rejected.contains(&r)));
        }
        schema
    }

    async fn execute(&self, call: &ToolCall) -> Result<ToolResult> {
        self.inner.execute(&self.strip(call)).await
    }
}

/// Rebuild a registry with guards around the research tools that need them
pub fn guard_research_tools(tools: &ToolRegistry) -> ToolRegistry {
    let mut guarded = ToolRegistry::new().with_timeout(tools.call_timeout());
    for name in tools.names() {
        let Some(tool) = tools.get(name) else { continue };
        let tool: Arc<dyn Tool> = if name == SEARCH_TOOL {
            Arc::new(ArgumentGuard::new(tool, SEARCH_REJECTED_ARGS))
        } else {
            tool
        };
        guarded.register_arc(tool);
    }
    guarded
}
