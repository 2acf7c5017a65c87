//! Application State

use std::sync::Arc;

use agent_core::{LlmProvider, TurnRunner};
use agent_runtime::McpPool;

/// Shared application state, built once in `main`
#[derive(Clone)]
pub struct AppState {
    /// Runs turns against the checkpoint store
    pub runner: Arc<TurnRunner>,

    /// Model endpoint, used by the health probe
    pub provider: Arc<dyn LlmProvider>,

    /// Running tool servers
    pub mcp: Arc<McpPool>,

    /// Model name the agent is bound to
    pub model: String,
}
