//! OpenAI-compatible LLM Provider
//!
//! Implementation of `LlmProvider` for any endpoint speaking the Chat Completions
//! API (vLLM, RunPod serverless, OpenAI itself). Tools are advertised in the
//! `{"type": "function", ...}` wrapper and tool-call arguments come back as JSON
//! encoded strings.

use std::time::Duration;

use agent_core::{
    error::{AgentError, Result},
    message::{Message, Role},
    provider::{Completion, FinishReason, GenerationOptions, LlmProvider, ModelInfo, TokenUsage},
    tool::{ToolCall, ToolSchema},
};
use async_trait::async_trait;
use reqwest::StatusCode;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE, HeaderMap, HeaderValue};
use serde_json::{Value, json};

/// Longest slice of an error body kept in error messages
const ERROR_BODY_LIMIT: usize = 512;

/// OpenAI-compatible provider configuration
#[derive(Clone)]
pub struct OpenAiConfig {
    /// Base URL up to and including the API version, e.g. `https://host/v1`
    pub base_url: String,

    /// Bearer token
    pub api_key: String,

    /// Request timeout in seconds
    pub timeout_secs: u64,
}

impl OpenAiConfig {
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            api_key: api_key.into(),
            timeout_secs: 120,
        }
    }

    #[must_use]
    pub const fn with_timeout(mut self, secs: u64) -> Self {
        self.timeout_secs = secs;
        self
    }
}

impl std::fmt::Debug for OpenAiConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenAiConfig")
            .field("base_url", &self.base_url)
            .field("api_key", &"[redacted]")
            .field("timeout_secs", &self.timeout_secs)
            .finish()
    }
}

/// OpenAI-compatible LLM provider
pub struct OpenAiProvider {
    http: reqwest::Client,
    base_url: String,
    auth: HeaderValue,
}

impl OpenAiProvider {
    /// Create a provider from configuration
    pub fn new(config: OpenAiConfig) -> Result<Self> {
        if config.api_key.trim().is_empty() {
            return Err(AgentError::Config("model API key is empty".into()));
        }
        if config.base_url.trim().is_empty() {
            return Err(AgentError::Config("model endpoint URL is empty".into()));
        }

        let mut auth = HeaderValue::from_str(&format!("Bearer {}", config.api_key))
            .map_err(|e| AgentError::Config(format!("invalid API key: {e}")))?;
        auth.set_sensitive(true);

        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| AgentError::Config(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            http,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            auth,
        })
    }

    fn headers(&self) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, self.auth.clone());
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers
    }

    async fn get_json(&self, path: &str) -> Result<Value> {
        let url = format!("{}{path}", self.base_url);
        let resp = self
            .http
            .get(&url)
            .headers(self.headers())
            .send()
            .await
            .map_err(transport_error)?;
        read_json(resp).await
    }
}

/// Build the Chat Completions request body
pub fn build_request_body(
    messages: &[Message],
    tools: &[ToolSchema],
    options: &GenerationOptions,
) -> Value {
    let mut body = json!({
        "model": options.model,
        "messages": messages_to_openai(messages),
        "max_tokens": options.max_tokens,
        "temperature": options.temperature,
    });

    if !tools.is_empty() {
        body["tools"] = tools_to_openai(tools);
    }
    if !options.stop_sequences.is_empty() {
        body["stop"] = json!(options.stop_sequences);
    }

    body
}

/// Convert transcript messages into the Chat Completions wire format.
///
/// Tool calls travel in `assistant.tool_calls` with stringified arguments and
/// tool results use `role: "tool"` with the `tool_call_id` they answer.
pub fn messages_to_openai(messages: &[Message]) -> Vec<Value> {
    messages
        .iter()
        .map(|msg| match msg.role {
            Role::System | Role::User => json!({
                "role": msg.role.to_string(),
                "content": msg.content,
            }),
            Role::Assistant if msg.tool_calls.is_empty() => json!({
                "role": "assistant",
                "content": msg.content,
            }),
            Role::Assistant => {
                let tool_calls: Vec<Value> = msg
                    .tool_calls
                    .iter()
                    .map(|tc| {
                        json!({
                            "id": tc.id,
                            "type": "function",
                            "function": {
                                "name": tc.name,
                                "arguments": wire_arguments(&tc.arguments),
                            }
                        })
                    })
                    .collect();

                let mut m = json!({
                    "role": "assistant",
                    "content": Value::Null,
                    "tool_calls": tool_calls,
                });
                if !msg.content.is_empty() {
                    m["content"] = json!(msg.content);
                }
                m
            }
            Role::Tool => {
                let mut m = json!({
                    "role": "tool",
                    "tool_call_id": msg.tool_call_id,
                    "content": msg.content,
                });
                if let Some(name) = &msg.name {
                    m["name"] = json!(name);
                }
                m
            }
        })
        .collect()
}

/// Arguments kept as a raw string (they did not parse) go back verbatim
fn wire_arguments(arguments: &Value) -> String {
    match arguments {
        Value::String(raw) => raw.clone(),
        other => other.to_string(),
    }
}

/// Wrap tool schemas as OpenAI function definitions
pub fn tools_to_openai(tools: &[ToolSchema]) -> Value {
    tools
        .iter()
        .map(|t| {
            json!({
                "type": "function",
                "function": {
                    "name": t.name,
                    "description": t.description,
                    "parameters": t.input_schema,
                }
            })
        })
        .collect()
}

/// Parse a non-streaming Chat Completions response
pub fn parse_chat_completion(v: &Value, requested_model: &str) -> Result<Completion> {
    let choice = &v["choices"][0];
    let message = &choice["message"];
    if !message.is_object() {
        return Err(AgentError::Parse(
            "missing `choices[0].message` in response".into(),
        ));
    }

    let tool_calls = message["tool_calls"]
        .as_array()
        .map(|calls| calls.iter().map(parse_tool_call).collect::<Result<Vec<_>>>())
        .transpose()?
        .unwrap_or_default();

    let content = message["content"].as_str().unwrap_or_default();
    let message = if tool_calls.is_empty() {
        Message::assistant(content)
    } else {
        Message::assistant_with_tool_calls(content, tool_calls)
    };

    let usage = v["usage"].as_object().map(|u| {
        let count = |key: &str| {
            u.get(key)
                .and_then(Value::as_u64)
                .and_then(|n| u32::try_from(n).ok())
                .unwrap_or(0)
        };
        TokenUsage {
            prompt_tokens: count("prompt_tokens"),
            completion_tokens: count("completion_tokens"),
            total_tokens: count("total_tokens"),
        }
    });

    Ok(Completion {
        message,
        model: v["model"].as_str().unwrap_or(requested_model).to_string(),
        usage,
        finish_reason: choice["finish_reason"].as_str().map(FinishReason::from_wire),
    })
}

fn parse_tool_call(tc: &Value) -> Result<ToolCall> {
    let func = &tc["function"];
    let name = func["name"]
        .as_str()
        .filter(|n| !n.is_empty())
        .ok_or_else(|| AgentError::Parse("tool call without a function name".into()))?;

    // Undecodable arguments stay a raw string and fail validation per call
    let arguments = match &func["arguments"] {
        Value::String(s) if s.trim().is_empty() => json!({}),
        Value::String(s) => serde_json::from_str(s).unwrap_or_else(|e| {
            tracing::warn!(tool = %name, error = %e, "tool call arguments are not valid JSON");
            Value::String(s.clone())
        }),
        Value::Null => json!({}),
        other => other.clone(),
    };

    let id = tc["id"]
        .as_str()
        .filter(|id| !id.is_empty())
        .map_or_else(|| format!("call_{}", uuid::Uuid::new_v4().simple()), str::to_string);

    Ok(ToolCall::new(id, name, arguments))
}

/// Map a non-success HTTP status to an agent error
pub fn status_error(status: StatusCode, body: &str) -> AgentError {
    let body: String = body.chars().take(ERROR_BODY_LIMIT).collect();
    let reason = format!("endpoint returned {status}: {body}");
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => AgentError::Auth(reason),
        StatusCode::TOO_MANY_REQUESTS => AgentError::RateLimited(reason),
        s if s.is_server_error() => AgentError::ProviderUnavailable(reason),
        _ => AgentError::Provider(reason),
    }
}

fn transport_error(e: reqwest::Error) -> AgentError {
    if e.is_timeout() {
        AgentError::ProviderUnavailable(format!("request timed out: {e}"))
    } else if e.is_connect() {
        AgentError::ProviderUnavailable(format!("connection failed: {e}"))
    } else {
        AgentError::Provider(e.to_string())
    }
}

async fn read_json(resp: reqwest::Response) -> Result<Value> {
    let status = resp.status();
    let text = resp.text().await.map_err(transport_error)?;

    if !status.is_success() {
        return Err(status_error(status, &text));
    }

    serde_json::from_str(&text).map_err(|e| AgentError::Parse(format!("invalid JSON response: {e}")))
}

#[async_trait]
impl LlmProvider for OpenAiProvider {
    async fn health_check(&self) -> Result<bool> {
        match self.get_json("/models").await {
            Ok(_) => Ok(true),
            Err(e) => {
                tracing::warn!(endpoint = %self.base_url, error = %e, "model endpoint health check failed");
                Ok(false)
            }
        }
    }

    async fn complete(
        &self,
        messages: &[Message],
        tools: &[ToolSchema],
        options: &GenerationOptions,
    ) -> Result<Completion> {
        let body = build_request_body(messages, tools, options);
        let url = format!("{}/chat/completions", self.base_url);

        tracing::debug!(
            url = %url,
            model = %options.model,
            messages = messages.len(),
            tools = tools.len(),
            "sending chat completion request"
        );

        let resp = self
            .http
            .post(&url)
            .headers(self.headers())
            .json(&body)
            .send()
            .await
            .map_err(transport_error)?;

        let v = read_json(resp).await?;
        parse_chat_completion(&v, &options.model)
    }

    async fn list_models(&self) -> Result<Vec<ModelInfo>> {
        let v = self.get_json("/models").await?;
        let models = v["data"]
            .as_array()
            .map(|data| {
                data.iter()
                    .filter_map(|m| {
                        Some(ModelInfo {
                            id: m["id"].as_str()?.to_string(),
                            owned_by: m["owned_by"].as_str().map(str::to_string),
                        })
                    })
                    .collect()
            })
            .unwrap_or_default();
        Ok(models)
    }
}
