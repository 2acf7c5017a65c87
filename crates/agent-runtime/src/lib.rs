//! # agent-runtime
//!
//! Runtime integrations for the career advisor agent.
//!
//! ## Providers
//!
//! - **OpenAI-compatible** chat completions (vLLM, RunPod, OpenAI) via [`OpenAiProvider`]
//! - **MCP** tool servers over stdio via [`McpPool`]
//!
//! ## Usage
//!
//! ```rust,ignore
//! use agent_runtime::{McpPool, McpServerConfig, OpenAiConfig, OpenAiProvider};
//!
//! let mut registry = ToolRegistry::new();
//! let pool = McpPool::discover(&[firecrawl], &mut registry).await?;
//! let provider = OpenAiProvider::new(OpenAiConfig::new(endpoint, api_key))?;
//! let agent = AgentBuilder::new()
//!     .provider(Arc::new(provider))
//!     .tools(registry)
//!     .build()?;
//! ```

pub mod mcp;
pub mod openai;

pub use mcp::{McpError, McpPool, McpServerConfig, McpTool};
pub use openai::{OpenAiConfig, OpenAiProvider};
