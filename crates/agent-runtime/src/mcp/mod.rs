//! MCP Tool Providers
//!
//! Tool providers are MCP servers spawned as child processes. At startup
//! [`McpPool::discover`] starts each configured server, lists its tools and
//! registers one [`McpTool`] per advertised tool in the agent's registry.

mod client;
pub mod protocol;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use agent_core::error::{AgentError, Result};
use agent_core::tool::{Tool, ToolCall, ToolRegistry, ToolResult, ToolSchema};
use async_trait::async_trait;
use tracing::{info, warn};

pub use client::{McpClient, StdioMcpServer};
pub use protocol::{McpToolDefinition, ToolCallResult};

#[derive(Debug, thiserror::Error)]
pub enum McpError {
    #[error("transport error: {0}")]
    Transport(String),

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("server spawn failed: {0}")]
    SpawnFailed(String),

    #[error("timeout waiting for server response")]
    Timeout,
}

impl From<McpError> for AgentError {
    fn from(e: McpError) -> Self {
        Self::ToolExecution(e.to_string())
    }
}

/// How to start one MCP server
#[derive(Clone)]
pub struct McpServerConfig {
    /// Name used in logs
    pub id: String,

    /// Program followed by its arguments
    pub command: Vec<String>,

    /// Variables passed to the child on top of the inherited system ones
    pub env: HashMap<String, String>,

    /// Deadline for every request to the server: handshake, discovery and each `tools/call`
    pub request_timeout: Duration,
}

impl McpServerConfig {
    pub fn new(id: impl Into<String>, command: Vec<String>) -> Self {
        Self {
            id: id.into(),
            command,
            env: HashMap::new(),
            request_timeout: Duration::from_secs(60),
        }
    }

    #[must_use]
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    #[must_use]
    pub const fn request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }
}

impl std::fmt::Debug for McpServerConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("McpServerConfig")
            .field("id", &self.id)
            .field("command", &self.command)
            .field("env", &self.env.keys().collect::<Vec<_>>())
            .field("request_timeout", &self.request_timeout)
            .finish()
    }
}

/// A tool served by an MCP server
pub struct McpTool {
    client: Arc<dyn McpClient>,
    definition: McpToolDefinition,
}

impl McpTool {
    pub fn new(client: Arc<dyn McpClient>, definition: McpToolDefinition) -> Self {
        Self { client, definition }
    }
}

#[async_trait]
impl Tool for McpTool {
    fn schema(&self) -> ToolSchema {
        ToolSchema::new(
            self.definition.name.clone(),
            self.definition.description.clone(),
            self.definition.input_schema.clone(),
        )
    }

    async fn execute(&self, call: &ToolCall) -> Result<ToolResult> {
        let result = self
            .client
            .call_tool(&self.definition.name, call.arguments.clone())
            .await?;

        let text = result.text();
        Ok(if result.is_error {
            ToolResult::failure(&self.definition.name, text)
        } else {
            ToolResult::success(&self.definition.name, text)
        })
    }
}

/// The running MCP servers backing the tool registry
#[derive(Default)]
pub struct McpPool {
    servers: Vec<Arc<dyn McpClient>>,
}

impl McpPool {
    /// Start every configured server and register its tools.
    ///
    /// Fails on the first server that cannot be started or listed; servers
    /// already started are shut down first.
    pub async fn discover(
        configs: &[McpServerConfig],
        registry: &mut ToolRegistry,
    ) -> std::result::Result<Self, McpError> {
        let mut pool = Self::default();

        for config in configs {
            let started = StdioMcpServer::spawn(
                &config.id,
                &config.command,
                &config.env,
                config.request_timeout,
            )
            .await;

            let server: Arc<dyn McpClient> = match started {
                Ok(server) => Arc::new(server),
                Err(e) => {
                    pool.shutdown_all().await;
                    return Err(e);
                }
            };
            pool.servers.push(server.clone());

            if let Err(e) = pool.register_tools(&server, registry).await {
                pool.shutdown_all().await;
                return Err(e);
            }
        }

        Ok(pool)
    }

    /// Register the tools of an already connected server
    pub async fn register_tools(
        &self,
        server: &Arc<dyn McpClient>,
        registry: &mut ToolRegistry,
    ) -> std::result::Result<usize, McpError> {
        let tools = server.list_tools().await?;
        let mut registered = 0;
        for definition in tools {
            let name = definition.name.clone();
            if registry.register(McpTool::new(server.clone(), definition)) {
                registered += 1;
            } else {
                warn!(server_id = %server.server_id(), tool = %name, "tool name already registered, skipping");
            }
        }
        info!(server_id = %server.server_id(), tool_count = registered, "MCP server tools registered");
        Ok(registered)
    }

    pub fn len(&self) -> usize {
        self.servers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.servers.is_empty()
    }

    /// Shut down all servers
    pub async fn shutdown_all(&self) {
        for server in &self.servers {
            if let Err(e) = server.shutdown().await {
                warn!(server_id = %server.server_id(), error = %e, "failed to shut down MCP server");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Mutex;

    /// In-process MCP server with a fixed tool list
    struct StaticServer {
        id: &'static str,
        tools: Vec<McpToolDefinition>,
        calls: Mutex<Vec<String>>,
    }

    impl StaticServer {
        fn new(id: &'static str, names: &[&str]) -> Arc<Self> {
            Arc::new(Self {
                id,
                tools: names
                    .iter()
                    .map(|n| McpToolDefinition {
                        name: (*n).to_string(),
                        description: format!("{n} tool"),
                        input_schema: json!({"type": "object", "required": ["query"]}),
                    })
                    .collect(),
                calls: Mutex::default(),
            })
        }
    }

    #[async_trait]
    impl McpClient for StaticServer {
        fn server_id(&self) -> &str {
            self.id
        }

        async fn list_tools(&self) -> std::result::Result<Vec<McpToolDefinition>, McpError> {
            Ok(self.tools.clone())
        }

        async fn call_tool(
            &self,
            name: &str,
            arguments: serde_json::Value,
        ) -> std::result::Result<ToolCallResult, McpError> {
            self.calls.lock().unwrap().push(name.to_string());
            let text = match arguments["query"].as_str() {
                Some("fail") => return Ok(serde_json::from_value(json!({
                    "content": [{"type": "text", "text": "rate limit exceeded"}],
                    "isError": true
                }))?),
                Some("down") => return Err(McpError::Transport("server exited".into())),
                Some(q) => format!(r#"[{{"title": "{q}"}}]"#),
                None => String::new(),
            };
            Ok(serde_json::from_value(json!({"content": [{"type": "text", "text": text}]}))?)
        }

        async fn shutdown(&self) -> std::result::Result<(), McpError> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn first_registration_wins_across_servers() {
        let pool = McpPool::default();
        let mut registry = ToolRegistry::new();
        let a: Arc<dyn McpClient> = StaticServer::new("a", &["firecrawl_search", "firecrawl_scrape"]);
        let b: Arc<dyn McpClient> = StaticServer::new("b", &["firecrawl_search", "firecrawl_map"]);

        assert_eq!(pool.register_tools(&a, &mut registry).await.unwrap(), 2);
        assert_eq!(pool.register_tools(&b, &mut registry).await.unwrap(), 1);
        assert_eq!(registry.names(), vec!["firecrawl_map", "firecrawl_scrape", "firecrawl_search"]);
    }

    #[tokio::test]
    async fn mcp_tool_results_become_tool_results() {
        let server = StaticServer::new("a", &["firecrawl_search"]);
        let tool = McpTool::new(server.clone(), server.tools[0].clone());

        let ok = tool
            .execute(&ToolCall::new("c1", "firecrawl_search", json!({"query": "rust"})))
            .await
            .unwrap();
        assert!(ok.success);
        let listed: serde_json::Value = serde_json::from_str(&ok.output).unwrap();
        assert_eq!(listed[0]["title"], "rust");

        let flagged = tool
            .execute(&ToolCall::new("c2", "firecrawl_search", json!({"query": "fail"})))
            .await
            .unwrap();
        assert!(!flagged.success);
        assert_eq!(flagged.output, "rate limit exceeded");

        let down = tool
            .execute(&ToolCall::new("c3", "firecrawl_search", json!({"query": "down"})))
            .await;
        assert!(matches!(down, Err(AgentError::ToolExecution(_))));

        assert_eq!(server.calls.lock().unwrap().len(), 3);
    }

    #[tokio::test]
    async fn registry_dispatches_to_mcp_tool() {
        let server: Arc<dyn McpClient> = StaticServer::new("a", &["firecrawl_search"]);
        let mut registry = ToolRegistry::new();
        McpPool::default().register_tools(&server, &mut registry).await.unwrap();

        let messages = registry
            .execute_all(&[
                ToolCall::new("c1", "firecrawl_search", json!({"query": "ML jobs"})),
                ToolCall::new("c2", "firecrawl_search", json!({})),
            ])
            .await;
        assert_eq!(messages.len(), 2);
        assert!(!messages[0].is_error);
        assert!(messages[1].is_error);
        assert!(messages[1].content.contains("query"));
    }

    #[test]
    fn config_debug_hides_env_values() {
        let cfg = McpServerConfig::new("firecrawl", vec!["npx".into(), "-y".into(), "firecrawl-mcp".into()])
            .env("FIRECRAWL_API_KEY", "fc-secret");
        let dbg = format!("{cfg:?}");
        assert!(dbg.contains("FIRECRAWL_API_KEY"));
        assert!(!dbg.contains("fc-secret"));
    }
}
