//! LLM Provider Strategy Pattern
//!
//! Defines a common interface for chat-completion backends so the agent works with
//! any OpenAI-compatible endpoint without code changes. A [`BoundModel`] pins a
//! provider to one tool catalog and one set of generation options, so every call
//! made by the reasoning step advertises the same tools.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use agent_core::provider::{BoundModel, GenerationOptions};
//!
//! let model = BoundModel::new(provider, registry.schemas(), GenerationOptions::default());
//! let reply = model.generate(conversation.messages()).await?;
//! ```

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::{AgentError, Result};
use crate::message::{Message, Role};
use crate::tool::{ToolCall, ToolSchema};

/// Model used when no override is configured
pub const DEFAULT_MODEL: &str = "NousResearch/Hermes-2-Pro-Mistral-7B";

/// Configuration for LLM generation
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct GenerationOptions {
    /// Model identifier served by the endpoint
    pub model: String,

    /// Temperature for sampling (0.0 = deterministic, 1.0 = creative)
    #[serde(default = "default_temperature")]
    pub temperature: f32,

    /// Maximum tokens to generate
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,

    /// Stop sequences
    #[serde(default)]
    pub stop_sequences: Vec<String>,
}

const fn default_temperature() -> f32 { 0.7 }
const fn default_max_tokens() -> u32 { 2048 }

impl Default for GenerationOptions {
    fn default() -> Self {
        Self {
            model: DEFAULT_MODEL.into(),
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
            stop_sequences: Vec::new(),
        }
    }
}

/// Response from an LLM completion
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Completion {
    /// The assistant message (text, tool calls, or both)
    pub message: Message,

    /// Model that generated this response
    pub model: String,

    /// Token usage statistics (if available)
    pub usage: Option<TokenUsage>,

    /// Finish reason
    pub finish_reason: Option<FinishReason>,
}

/// Token usage statistics
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct TokenUsage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

/// Reason for completion finishing
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum FinishReason {
    Stop,
    Length,
    ToolCalls,
    ContentFilter,
    Other(String),
}

impl FinishReason {
    /// Map an OpenAI-style `finish_reason` string
    pub fn from_wire(s: &str) -> Self {
        match s {
            "stop" => Self::Stop,
            "length" => Self::Length,
            "tool_calls" | "function_call" => Self::ToolCalls,
            "content_filter" => Self::ContentFilter,
            other => Self::Other(other.to_string()),
        }
    }
}

/// Information about a model
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ModelInfo {
    pub id: String,
    pub owned_by: Option<String>,
}

/// Strategy trait for LLM providers
///
/// Implement this trait to add support for new LLM backends.
/// The agent works exclusively through this interface.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Check if the provider is available and configured correctly
    async fn health_check(&self) -> Result<bool>;

    /// Generate one assistant message from the transcript, advertising `tools`
    async fn complete(
        &self,
        messages: &[Message],
        tools: &[ToolSchema],
        options: &GenerationOptions,
    ) -> Result<Completion>;

    /// List available models
    async fn list_models(&self) -> Result<Vec<ModelInfo>>;

    /// Pin this provider to a tool catalog and generation options
    fn bind_tools(self: Arc<Self>, tools: Vec<ToolSchema>, options: GenerationOptions) -> BoundModel
    where
        Self: Sized + 'static,
    {
        BoundModel::new(self, tools, options)
    }
}

/// A provider bound to a fixed tool catalog and generation options
#[derive(Clone)]
pub struct BoundModel {
    provider: Arc<dyn LlmProvider>,
    tools: Arc<[ToolSchema]>,
    options: GenerationOptions,
}

impl BoundModel {
    pub fn new(
        provider: Arc<dyn LlmProvider>,
        tools: Vec<ToolSchema>,
        options: GenerationOptions,
    ) -> Self {
        Self {
            provider,
            tools: tools.into(),
            options,
        }
    }

    /// Run one completion and return the assistant message it produced
    pub async fn generate(&self, messages: &[Message]) -> Result<Message> {
        let completion = self
            .provider
            .complete(messages, &self.tools, &self.options)
            .await?;

        if completion.message.role != Role::Assistant {
            return Err(AgentError::Parse(format!(
                "provider returned a {} message, expected assistant",
                completion.message.role
            )));
        }

        if let Some(usage) = &completion.usage {
            tracing::debug!(
                model = %completion.model,
                prompt_tokens = usage.prompt_tokens,
                completion_tokens = usage.completion_tokens,
                finish_reason = ?completion.finish_reason,
                "completion received"
            );
        }

        let mut message = completion.message.with_model(completion.model);
        dedupe_call_ids(&mut message.tool_calls);
        Ok(message)
    }
}

/// Give every call of one reply a distinct id, minting fresh ids for empty or
/// repeated ones so each tool result can be matched to its call.
fn dedupe_call_ids(calls: &mut [ToolCall]) {
    let mut seen = HashSet::new();
    for call in calls {
        if call.id.is_empty() || !seen.insert(call.id.clone()) {
            let fresh = format!("call_{}", uuid::Uuid::new_v4().simple());
            tracing::warn!(tool = %call.name, repeated = %call.id, minted = %fresh, "model reused a tool call id");
            call.id = fresh.clone();
            seen.insert(fresh);
        }
    }
}

impl std::fmt::Debug for BoundModel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BoundModel")
            .field("tools", &self.tools.iter().map(|t| t.name.as_str()).collect::<Vec<_>>())
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    /// Records the tool names advertised on each call
    #[derive(Default)]
    struct RecordingProvider {
        seen: Mutex<Vec<Vec<String>>>,
        reply_role: Option<Role>,
        reply_calls: Vec<ToolCall>,
    }

    #[async_trait]
    impl LlmProvider for RecordingProvider {
        async fn health_check(&self) -> Result<bool> {
            Ok(true)
        }

        async fn complete(
            &self,
            _messages: &[Message],
            tools: &[ToolSchema],
            options: &GenerationOptions,
        ) -> Result<Completion> {
            self.seen
                .lock()
                .unwrap()
                .push(tools.iter().map(|t| t.name.clone()).collect());
            let role = self.reply_role.unwrap_or(Role::Assistant);
            let mut message = Message::new(role, "ok");
            message.tool_calls = self.reply_calls.clone();
            Ok(Completion {
                message,
                model: options.model.clone(),
                usage: None,
                finish_reason: Some(FinishReason::Stop),
            })
        }

        async fn list_models(&self) -> Result<Vec<ModelInfo>> {
            Ok(vec![])
        }
    }

    #[test]
    fn test_generation_options_defaults() {
        let opts = GenerationOptions::default();
        assert!((opts.temperature - 0.7).abs() < f32::EPSILON);
        assert_eq!(opts.max_tokens, 2048);
        assert_eq!(opts.model, DEFAULT_MODEL);
    }

    #[test]
    fn test_finish_reason_mapping() {
        assert_eq!(FinishReason::from_wire("tool_calls"), FinishReason::ToolCalls);
        assert_eq!(FinishReason::from_wire("stop"), FinishReason::Stop);
        assert_eq!(FinishReason::from_wire("eos"), FinishReason::Other("eos".into()));
    }

    #[tokio::test]
    async fn test_bound_model_advertises_same_catalog_every_call() {
        let provider = Arc::new(RecordingProvider::default());
        let tools = vec![
            ToolSchema::new("firecrawl_search", "search", serde_json::json!({"type": "object"})),
            ToolSchema::new("firecrawl_scrape", "scrape", serde_json::json!({"type": "object"})),
        ];
        let model = provider.clone().bind_tools(tools, GenerationOptions::default());

        let first = model.generate(&[Message::user("a")]).await.unwrap();
        model.generate(&[Message::user("b")]).await.unwrap();

        let seen = provider.seen.lock().unwrap();
        assert_eq!(seen.len(), 2);
        assert_eq!(seen[0], seen[1]);
        assert_eq!(seen[0], vec!["firecrawl_search", "firecrawl_scrape"]);
        assert_eq!(
            first.metadata.and_then(|m| m.model).as_deref(),
            Some(DEFAULT_MODEL)
        );
    }

    #[tokio::test]
    async fn test_bound_model_rejects_non_assistant_reply() {
        let provider = Arc::new(RecordingProvider {
            reply_role: Some(Role::User),
            ..Default::default()
        });
        let model = BoundModel::new(provider, vec![], GenerationOptions::default());
        assert!(matches!(
            model.generate(&[Message::user("a")]).await,
            Err(AgentError::Parse(_))
        ));
    }

    #[tokio::test]
    async fn test_repeated_call_ids_made_unique() {
        let args = serde_json::json!({"query": "rust"});
        let provider = Arc::new(RecordingProvider {
            reply_calls: vec![
                ToolCall::new("dup", "firecrawl_search", args.clone()),
                ToolCall::new("dup", "firecrawl_search", args.clone()),
                ToolCall::new("", "firecrawl_scrape", args),
            ],
            ..Default::default()
        });
        let model = BoundModel::new(provider, vec![], GenerationOptions::default());

        let reply = model.generate(&[Message::user("a")]).await.unwrap();
        let ids: Vec<&str> = reply.tool_calls.iter().map(|c| c.id.as_str()).collect();
        assert_eq!(ids[0], "dup");
        assert_ne!(ids[1], "dup");
        assert!(ids[1].starts_with("call_") && ids[2].starts_with("call_"));
        assert_ne!(ids[1], ids[2]);
    }
}
