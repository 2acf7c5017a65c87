//! Career Advisor HTTP Server
//!
//! Axum-based server exposing the career advisor agent over a REST API.
//! Conversations are checkpointed per thread; research tools come from the
//! Firecrawl MCP server started at boot.

mod config;
mod handlers;
mod state;

use std::sync::Arc;

use anyhow::Context;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use agent_core::{AgentBuilder, CheckpointStore, GenerationOptions, LlmProvider, ToolRegistry, TurnRunner};
use agent_runtime::{McpPool, OpenAiConfig, OpenAiProvider};
use agent_store::SqliteCheckpointStore;
use career_advisor::{CAREER_ADVISOR_PROMPT, firecrawl, guard_research_tools};

use crate::config::Config;
use crate::state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info,tower_http=debug".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load environment
    dotenvy::dotenv().ok();

    let config = Config::from_env().context("invalid configuration")?;
    tracing::debug!(?config, "configuration loaded");

    // Checkpoint store
    let store = SqliteCheckpointStore::connect(&config.database_url)
        .await
        .with_context(|| format!("failed to open checkpoint store at {}", config.database_url))?;
    let discarded = store.recover().await?;
    if discarded > 0 {
        tracing::warn!(discarded, "discarded write intents of unfinished turns");
    }
    tracing::info!("✓ Checkpoint store ready");

    // Research tools
    let firecrawl = firecrawl::server_config(
        &config.firecrawl_command,
        &config.firecrawl_api_key,
        config.tool_timeout,
    )?;
    let mut discovered = ToolRegistry::new().with_timeout(config.tool_timeout);
    let mcp = McpPool::discover(&[firecrawl], &mut discovered)
        .await
        .context("failed to start the Firecrawl MCP server")?;
    let tools = guard_research_tools(&discovered);

    tracing::info!("Registered {} tools:", tools.len());
    for name in tools.names() {
        tracing::info!("  • {}", name);
    }

    // Model endpoint
    let provider: Arc<dyn LlmProvider> = Arc::new(OpenAiProvider::new(
        OpenAiConfig::new(&config.model_endpoint, &config.model_api_key)
            .with_timeout(config.model_timeout.as_secs()),
    )?);

    match provider.health_check().await {
        Ok(true) => {
            tracing::info!(model = %config.model_name, "✓ Connected to model endpoint");
            if let Ok(models) = provider.list_models().await {
                for model in models {
                    tracing::debug!("  Model: {}", model.id);
                }
            }
        }
        Ok(false) | Err(_) => {
            tracing::warn!(endpoint = %config.model_endpoint, "⚠ Model endpoint not reachable - turns will fail until it is");
        }
    }

    let agent = AgentBuilder::new()
        .provider(provider.clone())
        .tools(tools)
        .system_prompt(CAREER_ADVISOR_PROMPT)
        .generation(GenerationOptions {
            model: config.model_name.clone(),
            temperature: config.temperature,
            max_tokens: config.max_tokens,
            stop_sequences: Vec::new(),
        })
        .max_iterations(config.max_iterations)
        .build()?;

    let runner = TurnRunner::new(Arc::new(agent), Arc::new(store));
    let mcp = Arc::new(mcp);

    // Build application state
    let state = AppState {
        runner: Arc::new(runner),
        provider,
        mcp: mcp.clone(),
        model: config.model_name.clone(),
    };

    let app = handlers::router(state);

    // Start server
    let listener = match tokio::net::TcpListener::bind(&config.bind_addr).await {
        Ok(listener) => listener,
        Err(e) => {
            mcp.shutdown_all().await;
            return Err(e).with_context(|| format!("failed to bind {}", config.bind_addr));
        }
    };

    tracing::info!("══════════════════════════════════════════════════");
    tracing::info!("🚀 career advisor running on http://{}", config.bind_addr);
    tracing::info!("══════════════════════════════════════════════════");
    tracing::info!("Endpoints:");
    tracing::info!("  GET    /health                        - Health check");
    tracing::info!("  GET    /api/tools                     - Tool catalog");
    tracing::info!("  POST   /api/threads                   - New thread id");
    tracing::info!("  POST   /api/chat                      - Send message");
    tracing::info!("  GET    /api/threads/{{id}}/history      - Thread transcript");
    tracing::info!("  DELETE /api/threads/{{id}}              - Delete thread");

    let served = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await;

    tracing::info!("shutting down tool servers");
    mcp.shutdown_all().await;

    served?;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to listen for ctrl-c");
        std::future::pending::<()>().await;
    }
    tracing::info!("shutdown signal received");
}
