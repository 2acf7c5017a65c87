//! HTTP Handlers

use axum::{
    Json, Router,
    extract::{Path, State},
    http::StatusCode,
    routing::{delete, get, post},
};
use serde::{Deserialize, Serialize};
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

use agent_core::{AgentError, Message, ThreadId, ToolSchema};

use crate::state::AppState;

// ============================================================================
// Response Types
// ============================================================================

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    pub model: String,
    pub model_reachable: bool,
    pub tool_count: usize,
    pub tool_servers: usize,
}

#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    pub message: String,
    #[serde(default)]
    pub thread_id: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ChatResponse {
    pub message: String,
    pub thread_id: ThreadId,
    pub checkpoint: u64,
    pub iterations: usize,
    pub tool_calls: usize,
}

#[derive(Debug, Serialize)]
pub struct ThreadResponse {
    pub thread_id: ThreadId,
}

#[derive(Debug, Serialize)]
pub struct HistoryResponse {
    pub thread_id: ThreadId,
    pub checkpoint: u64,
    pub messages: Vec<Message>,
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,
}

type ApiError = (StatusCode, Json<ErrorResponse>);

fn api_error(status: StatusCode, code: &str, error: impl Into<String>) -> ApiError {
    (
        status,
        Json(ErrorResponse {
            error: error.into(),
            code: code.into(),
        }),
    )
}

/// Map an agent failure onto a status code and a stable error code
fn agent_error(e: &AgentError) -> ApiError {
    let (status, code) = match e {
        AgentError::Provider(_)
        | AgentError::ProviderUnavailable(_)
        | AgentError::Auth(_)
        | AgentError::RateLimited(_)
        | AgentError::Parse(_) => (StatusCode::BAD_GATEWAY, "MODEL_ERROR"),
        AgentError::Conflict { .. } => (StatusCode::CONFLICT, "THREAD_CONFLICT"),
        AgentError::MaxIterations(_) => (StatusCode::UNPROCESSABLE_ENTITY, "MAX_ITERATIONS"),
        AgentError::Checkpoint(_) => (StatusCode::INTERNAL_SERVER_ERROR, "CHECKPOINT_ERROR"),
        _ => (StatusCode::INTERNAL_SERVER_ERROR, "AGENT_ERROR"),
    };
    api_error(status, code, e.user_message())
}

fn parse_thread_id(raw: String) -> Result<ThreadId, ApiError> {
    ThreadId::parse(raw).map_err(|e| {
        tracing::debug!(error = %e, "rejected thread id");
        api_error(StatusCode::BAD_REQUEST, "INVALID_THREAD_ID", "Thread ids are 1-128 characters of [A-Za-z0-9-_.:]")
    })
}

// ============================================================================
// Handlers
// ============================================================================

/// Health check endpoint
pub async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    let model_reachable = state.provider.health_check().await.unwrap_or(false);

    Json(HealthResponse {
        status: if model_reachable { "healthy" } else { "degraded" },
        version: env!("CARGO_PKG_VERSION"),
        model: state.model.clone(),
        model_reachable,
        tool_count: state.runner.agent().tools().len(),
        tool_servers: state.mcp.len(),
    })
}

/// The tool catalog the model is bound to
pub async fn list_tools(State(state): State<AppState>) -> Json<Vec<ToolSchema>> {
    Json(state.runner.agent().tools().schemas())
}

/// Mint a new thread id
pub async fn create_thread() -> (StatusCode, Json<ThreadResponse>) {
    (StatusCode::CREATED, Json(ThreadResponse { thread_id: ThreadId::new() }))
}

/// Run one conversational turn
pub async fn chat_handler(
    State(state): State<AppState>,
    Json(payload): Json<ChatRequest>,
) -> Result<Json<ChatResponse>, ApiError> {
    if payload.message.trim().is_empty() {
        return Err(api_error(StatusCode::BAD_REQUEST, "EMPTY_MESSAGE", "Message must not be empty"));
    }

    let thread_id = match payload.thread_id {
        Some(raw) => parse_thread_id(raw)?,
        None => ThreadId::new(),
    };

    let report = state
        .runner
        .run_turn(&thread_id, &payload.message)
        .await
        .map_err(|e| {
            tracing::error!(thread_id = %thread_id, error = %e, "turn failed");
            agent_error(&e)
        })?;

    Ok(Json(ChatResponse {
        message: report.outcome.answer.content,
        thread_id: report.thread_id,
        checkpoint: report.checkpoint,
        iterations: report.outcome.iterations,
        tool_calls: report.outcome.tool_calls,
    }))
}

/// Committed transcript of a thread
pub async fn thread_history(
    State(state): State<AppState>,
    Path(thread_id): Path<String>,
) -> Result<Json<HistoryResponse>, ApiError> {
    let thread_id = parse_thread_id(thread_id)?;

    let checkpoint = state
        .runner
        .history(&thread_id)
        .await
        .map_err(|e| {
            tracing::error!(thread_id = %thread_id, error = %e, "history load failed");
            agent_error(&e)
        })?
        .ok_or_else(|| api_error(StatusCode::NOT_FOUND, "THREAD_NOT_FOUND", "Thread not found"))?;

    Ok(Json(HistoryResponse {
        thread_id: checkpoint.thread_id,
        checkpoint: checkpoint.seq,
        messages: checkpoint.conversation.into_messages(),
    }))
}

/// Drop every checkpoint of a thread
pub async fn delete_thread(
    State(state): State<AppState>,
    Path(thread_id): Path<String>,
) -> Result<StatusCode, ApiError> {
    let thread_id = parse_thread_id(thread_id)?;

    let removed = state.runner.delete_thread(&thread_id).await.map_err(|e| {
        tracing::error!(thread_id = %thread_id, error = %e, "thread delete failed");
        agent_error(&e)
    })?;

    if removed {
        tracing::info!(thread_id = %thread_id, "thread deleted");
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(api_error(StatusCode::NOT_FOUND, "THREAD_NOT_FOUND", "Thread not found"))
    }
}

/// Build the router with all endpoints
pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health_check))
        .route("/api/tools", get(list_tools))
        .route("/api/threads", post(create_thread))
        .route("/api/threads/{thread_id}", delete(delete_thread))
        .route("/api/threads/{thread_id}/history", get(thread_history))
        .route("/api/chat", post(chat_handler))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::{Arc, Mutex};

    use agent_core::provider::ModelInfo;
    use agent_core::{
        AgentBuilder, Completion, GenerationOptions, LlmProvider, MemoryCheckpointStore, Result,
        ToolCall, ToolResult, Tool, TurnRunner,
    };
    use agent_runtime::McpPool;
    use async_trait::async_trait;
    use axum::body::{Body, to_bytes};
    use axum::http::Request;
    use serde_json::{Value, json};
    use tower::ServiceExt;

    struct CannedModel {
        replies: Mutex<VecDeque<Result<Message>>>,
    }

    #[async_trait]
    impl LlmProvider for CannedModel {
        async fn health_check(&self) -> Result<bool> {
            Ok(true)
        }

        async fn complete(
            &self,
            _messages: &[Message],
            _tools: &[ToolSchema],
            options: &GenerationOptions,
        ) -> Result<Completion> {
            let message = self
                .replies
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Err(AgentError::ProviderUnavailable("script exhausted".into())))?;
            Ok(Completion {
                message,
                model: options.model.clone(),
                usage: None,
                finish_reason: None,
            })
        }

        async fn list_models(&self) -> Result<Vec<ModelInfo>> {
            Ok(vec![])
        }
    }

    struct Search;

    #[async_trait]
    impl Tool for Search {
        fn schema(&self) -> ToolSchema {
            ToolSchema::new(
                "firecrawl_search",
                "Search the web",
                json!({"type": "object", "properties": {"query": {"type": "string"}}, "required": ["query"]}),
            )
        }

        async fn execute(&self, _call: &ToolCall) -> Result<ToolResult> {
            Ok(ToolResult::success("firecrawl_search", "3 openings found"))
        }
    }

    fn app(replies: Vec<Result<Message>>) -> Router {
        let provider: Arc<dyn LlmProvider> = Arc::new(CannedModel {
            replies: Mutex::new(replies.into()),
        });
        let agent = AgentBuilder::new()
            .provider(provider.clone())
            .tool(Search)
            .system_prompt("You are a career advisor.")
            .build()
            .unwrap();
        let runner = TurnRunner::new(Arc::new(agent), Arc::new(MemoryCheckpointStore::new()));

        router(AppState {
            runner: Arc::new(runner),
            provider,
            mcp: Arc::new(McpPool::default()),
            model: "test-model".into(),
        })
    }

    async fn send(app: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let request = Request::builder()
            .method(method)
            .uri(uri)
            .header("content-type", "application/json")
            .body(body.map_or_else(Body::empty, |b| Body::from(b.to_string())))
            .unwrap();
        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, value)
    }

    #[tokio::test]
    async fn health_reports_catalog() {
        let app = app(vec![]);
        let (status, body) = send(&app, "GET", "/health", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["model_reachable"], true);
        assert_eq!(body["tool_count"], 1);
        assert_eq!(body["model"], "test-model");
    }

    #[tokio::test]
    async fn tools_endpoint_lists_schemas() {
        let app = app(vec![]);
        let (status, body) = send(&app, "GET", "/api/tools", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body[0]["name"], "firecrawl_search");
    }

    #[tokio::test]
    async fn chat_commits_and_history_follows() {
        let app = app(vec![
            Ok(Message::assistant_with_tool_calls(
                "",
                vec![ToolCall::new("call_1", "firecrawl_search", json!({"query": "data engineer jobs"}))],
            )),
            Ok(Message::assistant("Demand is strong. Start with SQL.")),
        ]);

        let (status, body) = send(
            &app,
            "POST",
            "/api/chat",
            Some(json!({"message": "I want to move into data engineering", "thread_id": "t-1"})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["message"], "Demand is strong. Start with SQL.");
        assert_eq!(body["thread_id"], "t-1");
        assert_eq!(body["checkpoint"], 1);
        assert_eq!(body["iterations"], 2);
        assert_eq!(body["tool_calls"], 1);

        let (status, body) = send(&app, "GET", "/api/threads/t-1/history", None).await;
        assert_eq!(status, StatusCode::OK);
        let roles: Vec<&str> = body["messages"]
            .as_array()
            .unwrap()
            .iter()
            .map(|m| m["role"].as_str().unwrap())
            .collect();
        assert_eq!(roles, vec!["user", "assistant", "tool", "assistant"]);
    }

    #[tokio::test]
    async fn chat_without_thread_mints_one() {
        let app = app(vec![Ok(Message::assistant("Hello! What do you do today?"))]);
        let (status, body) = send(&app, "POST", "/api/chat", Some(json!({"message": "hi"}))).await;
        assert_eq!(status, StatusCode::OK);
        assert!(!body["thread_id"].as_str().unwrap().is_empty());
    }

    #[tokio::test]
    async fn model_failure_maps_to_bad_gateway() {
        let app = app(vec![Err(AgentError::ProviderUnavailable("connection refused".into()))]);
        let (status, body) = send(&app, "POST", "/api/chat", Some(json!({"message": "hi", "thread_id": "t-2"}))).await;
        assert_eq!(status, StatusCode::BAD_GATEWAY);
        assert_eq!(body["code"], "MODEL_ERROR");

        let (status, _) = send(&app, "GET", "/api/threads/t-2/history", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn bad_requests_rejected() {
        let app = app(vec![]);
        let (status, body) = send(&app, "POST", "/api/chat", Some(json!({"message": "  "}))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["code"], "EMPTY_MESSAGE");

        let (status, body) = send(&app, "POST", "/api/chat", Some(json!({"message": "hi", "thread_id": "no spaces"}))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["code"], "INVALID_THREAD_ID");
    }

    #[tokio::test]
    async fn delete_removes_thread() {
        let app = app(vec![Ok(Message::assistant("Noted."))]);
        send(&app, "POST", "/api/chat", Some(json!({"message": "hi", "thread_id": "t-3"}))).await;

        let (status, _) = send(&app, "DELETE", "/api/threads/t-3", None).await;
        assert_eq!(status, StatusCode::NO_CONTENT);
        let (status, _) = send(&app, "DELETE", "/api/threads/t-3", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn create_thread_returns_fresh_ids() {
        let app = app(vec![]);
        let (status, first) = send(&app, "POST", "/api/threads", None).await;
        assert_eq!(status, StatusCode::CREATED);
        let (_, second) = send(&app, "POST", "/api/threads", None).await;
        assert_ne!(first["thread_id"], second["thread_id"]);
    }
}
