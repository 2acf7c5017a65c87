//! Reasoning Loop
//!
//! Drives one turn through the conversation graph: the reasoning step calls the
//! model, the tool-execution step answers its tool calls, and [`Step::next`]
//! decides where to go after each. The loop stops when the model answers without
//! tool calls or when the round-trip budget is spent.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;

use crate::error::{AgentError, Result};
use crate::graph::Step;
use crate::message::{Conversation, Message};
use crate::provider::{BoundModel, GenerationOptions, LlmProvider};
use crate::tool::{Tool, ToolRegistry};

/// Agent configuration
#[derive(Clone, Debug)]
pub struct AgentConfig {
    /// Operating instructions, prepended as the system message
    pub system_prompt: String,

    /// Maximum reasoning round-trips per turn before giving up
    pub max_iterations: usize,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            system_prompt: DEFAULT_SYSTEM_PROMPT.into(),
            max_iterations: 10,
        }
    }
}

const DEFAULT_SYSTEM_PROMPT: &str = "You are a helpful AI assistant. \
Use the available tools when you need fresh information, then answer concisely.";

/// Result of a completed turn
#[derive(Clone, Debug, Serialize)]
pub struct TurnOutcome {
    /// The final assistant message (no tool calls)
    pub answer: Message,

    /// Reasoning round-trips made
    pub iterations: usize,

    /// Tool calls executed across all tool steps
    pub tool_calls: usize,
}

/// Receives the messages each completed step appended
#[async_trait]
pub trait StepObserver: Send {
    async fn on_step(&mut self, step: Step, appended: &[Message]) -> Result<()>;
}

/// Observer that ignores every step
pub struct NoopObserver;

#[async_trait]
impl StepObserver for NoopObserver {
    async fn on_step(&mut self, _step: Step, _appended: &[Message]) -> Result<()> {
        Ok(())
    }
}

/// The main Agent struct
pub struct Agent {
    model: BoundModel,
    tools: Arc<ToolRegistry>,
    config: AgentConfig,
}

impl Agent {
    /// Create a new agent. `model` should be bound to `tools.schemas()`.
    pub const fn new(model: BoundModel, tools: Arc<ToolRegistry>, config: AgentConfig) -> Self {
        Self { model, tools, config }
    }

    /// Reasoning step: call the model once on the transcript led by the
    /// system prompt and append its assistant message.
    ///
    /// The prompt is added to the outbound request only. On a model error the
    /// transcript gains no assistant message.
    pub async fn reason(&self, conversation: &mut Conversation) -> Result<()> {
        let reply = {
            let instructed = conversation.instructed(&self.config.system_prompt);
            self.model.generate(&instructed).await?
        };
        tracing::debug!(
            tool_calls = reply.tool_calls.len(),
            content_len = reply.content.len(),
            "assistant message appended"
        );
        conversation.push(reply);
        Ok(())
    }

    /// Tool-execution step: answer every tool call of the latest assistant
    /// message, appending one tool message per call in request order.
    ///
    /// Returns the number of calls executed.
    pub async fn execute_tools(&self, conversation: &mut Conversation) -> Result<usize> {
        let calls = conversation.pending_tool_calls().to_vec();
        if calls.is_empty() {
            return Err(AgentError::InvalidTranscript(
                "tool execution reached without pending tool calls".into(),
            ));
        }

        for call in &calls {
            tracing::debug!(tool = %call.name, call_id = %call.id, "executing tool");
        }

        let results = self.tools.execute_all(&calls).await;
        conversation.extend(results);
        Ok(calls.len())
    }

    /// Run the loop until the model answers without tool calls
    pub async fn run(&self, conversation: &mut Conversation) -> Result<TurnOutcome> {
        self.run_observed(conversation, &mut NoopObserver).await
    }

    /// Run the loop, reporting each step's appended messages to `observer`
    pub async fn run_observed(
        &self,
        conversation: &mut Conversation,
        observer: &mut dyn StepObserver,
    ) -> Result<TurnOutcome> {
        let mut step = Step::START;
        let mut iterations = 0;
        let mut tool_calls = 0;

        loop {
            match step {
                Step::Reasoning => {
                    if iterations >= self.config.max_iterations {
                        tracing::warn!(max = self.config.max_iterations, "reasoning budget exhausted");
                        return Err(AgentError::MaxIterations(self.config.max_iterations));
                    }
                    iterations += 1;

                    self.reason(conversation).await?;
                    let appended = conversation.tail(conversation.len() - 1);
                    observer.on_step(step, appended).await?;
                }
                Step::ToolExecution => {
                    let before = conversation.len();
                    tool_calls += self.execute_tools(conversation).await?;
                    observer.on_step(step, conversation.tail(before)).await?;
                }
                Step::End => {
                    let answer = conversation
                        .last()
                        .cloned()
                        .ok_or_else(|| AgentError::InvalidTranscript("turn ended on an empty transcript".into()))?;
                    tracing::info!(iterations, tool_calls, "turn complete");
                    return Ok(TurnOutcome {
                        answer,
                        iterations,
                        tool_calls,
                    });
                }
            }

            let next = step.next(conversation.last());
            tracing::trace!(from = %step, to = %next, "transition");
            step = next;
        }
    }

    /// Run with a simple string input (creates temporary conversation)
    pub async fn ask(&self, question: &str) -> Result<String> {
        let mut conversation = Conversation::new();
        conversation.push(Message::user(question));
        let outcome = self.run(&mut conversation).await?;
        Ok(outcome.answer.content)
    }

    /// Get the tool registry
    pub fn tools(&self) -> &ToolRegistry {
        &self.tools
    }
}

/// Builder for Agent configuration
pub struct AgentBuilder {
    provider: Option<Arc<dyn LlmProvider>>,
    tools: ToolRegistry,
    config: AgentConfig,
    generation: GenerationOptions,
}

impl Default for AgentBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl AgentBuilder {
    pub fn new() -> Self {
        Self {
            provider: None,
            tools: ToolRegistry::new(),
            config: AgentConfig::default(),
            generation: GenerationOptions::default(),
        }
    }

    #[must_use]
    pub fn provider(mut self, provider: Arc<dyn LlmProvider>) -> Self {
        self.provider = Some(provider);
        self
    }

    #[must_use]
    pub fn tool<T: Tool + 'static>(mut self, tool: T) -> Self {
        self.tools.register(tool);
        self
    }

    #[must_use]
    pub fn tools(mut self, tools: ToolRegistry) -> Self {
        self.tools = tools;
        self
    }

    #[must_use]
    pub fn system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.config.system_prompt = prompt.into();
        self
    }

    #[must_use]
    pub fn generation(mut self, options: GenerationOptions) -> Self {
        self.generation = options;
        self
    }

    #[must_use]
    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.generation.model = model.into();
        self
    }

    #[must_use]
    pub const fn temperature(mut self, temp: f32) -> Self {
        self.generation.temperature = temp;
        self
    }

    #[must_use]
    pub const fn max_tokens(mut self, max: u32) -> Self {
        self.generation.max_tokens = max;
        self
    }

    #[must_use]
    pub const fn max_iterations(mut self, max: usize) -> Self {
        self.config.max_iterations = max;
        self
    }

    /// Bind the provider to the registry's catalog and build the agent
    pub fn build(self) -> Result<Agent> {
        let provider = self.provider
            .ok_or_else(|| AgentError::Config("Provider is required".into()))?;

        if self.config.max_iterations == 0 {
            return Err(AgentError::Config("max_iterations must be at least 1".into()));
        }

        let model = BoundModel::new(provider, self.tools.schemas(), self.generation);
        Ok(Agent::new(model, Arc::new(self.tools), self.config))
    }
}
