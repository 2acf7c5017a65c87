//! Firecrawl Research Tools
//!
//! Web research comes from the Firecrawl MCP server (`firecrawl_search`,
//! `firecrawl_scrape`, `firecrawl_map` and friends), started as a child process.

use std::time::Duration;

use agent_runtime::McpServerConfig;

use crate::error::{AdvisorError, Result};

/// Server id used in logs
pub const SERVER_ID: &str = "firecrawl";

/// Command that starts the server
pub const DEFAULT_COMMAND: &str = "npx -y firecrawl-mcp";

/// Variable carrying the API key into the child process
pub const API_KEY_VAR: &str = "FIRECRAWL_API_KEY";

/// Web search tool name
pub const SEARCH_TOOL: &str = "firecrawl_search";

/// Page scrape tool name
pub const SCRAPE_TOOL: &str = "firecrawl_scrape";

/// Build the launch configuration for the Firecrawl server.
///
/// `command` is split on whitespace into program and arguments.
pub fn server_config(command: &str, api_key: &str, request_timeout: Duration) -> Result<McpServerConfig> {
    let argv: Vec<String> = command.split_whitespace().map(str::to_string).collect();
    if argv.is_empty() {
        return Err(AdvisorError::EmptyCommand);
    }
    if api_key.trim().is_empty() {
        return Err(AdvisorError::MissingApiKey);
    }

    Ok(McpServerConfig::new(SERVER_ID, argv)
        .env(API_KEY_VAR, api_key)
        .request_timeout(request_timeout))
}
