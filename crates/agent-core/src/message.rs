//! Conversation Messages
//!
//! Standard message format used across the agent system. A [`Conversation`] is the
//! transcript threaded through the reasoning loop: ordered, append-only, and owned by
//! exactly one turn at a time.

use std::borrow::Cow;
use std::collections::HashSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{AgentError, Result};
use crate::tool::ToolCall;

/// Role of a message sender
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// System prompt/instructions
    System,
    /// User input
    User,
    /// Assistant (LLM) response
    Assistant,
    /// Tool result (fed back to the model)
    Tool,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::System => write!(f, "system"),
            Self::User => write!(f, "user"),
            Self::Assistant => write!(f, "assistant"),
            Self::Tool => write!(f, "tool"),
        }
    }
}

/// A single message in a conversation
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Message role
    pub role: Role,

    /// Text content. For tool messages this is the serialized result or error.
    #[serde(default)]
    pub content: String,

    /// Tool calls requested by the assistant, in the order the model listed them
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCall>,

    /// The tool call this message answers (tool messages only)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,

    /// Whether a tool message carries an error instead of a result
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub is_error: bool,

    /// Optional name (tool name for tool messages)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// Timestamp
    #[serde(default = "Utc::now")]
    pub timestamp: DateTime<Utc>,

    /// Optional metadata
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<MessageMetadata>,
}

/// Additional message metadata
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct MessageMetadata {
    /// Model that generated this (for assistant messages)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
}

impl Message {
    /// Create a new message
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            tool_calls: Vec::new(),
            tool_call_id: None,
            is_error: false,
            name: None,
            timestamp: Utc::now(),
            metadata: None,
        }
    }

    /// Create a system message
    pub fn system(content: impl Into<String>) -> Self {
        Self::new(Role::System, content)
    }

    /// Create a user message
    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    /// Create an assistant message
    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }

    /// Create an assistant message requesting tool calls
    pub fn assistant_with_tool_calls(content: impl Into<String>, tool_calls: Vec<ToolCall>) -> Self {
        let mut msg = Self::new(Role::Assistant, content);
        msg.tool_calls = tool_calls;
        msg
    }

    /// Create a successful tool result message
    pub fn tool(tool_call_id: impl Into<String>, content: impl Into<String>) -> Self {
        let mut msg = Self::new(Role::Tool, content);
        msg.tool_call_id = Some(tool_call_id.into());
        msg
    }

    /// Create a tool message carrying an error
    pub fn tool_error(tool_call_id: impl Into<String>, error: impl Into<String>) -> Self {
        let mut msg = Self::tool(tool_call_id, error);
        msg.is_error = true;
        msg
    }

    /// Add a name to the message
    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Record the model that produced this message
    #[must_use]
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.metadata.get_or_insert_with(MessageMetadata::default).model = Some(model.into());
        self
    }

    /// Whether this is an assistant message with pending tool calls
    pub fn requests_tools(&self) -> bool {
        self.role == Role::Assistant && !self.tool_calls.is_empty()
    }
}

/// Conversation history (the transcript)
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Conversation {
    messages: Vec<Message>,
}

impl Conversation {
    pub fn new() -> Self {
        Self::default()
    }

    pub const fn from_messages(messages: Vec<Message>) -> Self {
        Self { messages }
    }

    /// Add a message
    pub fn push(&mut self, message: Message) {
        self.messages.push(message);
    }

    /// Append several messages in order
    pub fn extend(&mut self, messages: impl IntoIterator<Item = Message>) {
        self.messages.extend(messages);
    }

    /// The transcript as sent to the model: led by `prompt` as a system
    /// message unless it already starts with one. The transcript itself is
    /// never modified.
    pub fn instructed(&self, prompt: &str) -> Cow<'_, [Message]> {
        if self.messages.first().map(|m| m.role) == Some(Role::System) {
            return Cow::Borrowed(&self.messages);
        }
        let mut messages = Vec::with_capacity(self.messages.len() + 1);
        messages.push(Message::system(prompt));
        messages.extend_from_slice(&self.messages);
        Cow::Owned(messages)
    }

    /// Get all messages
    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    /// Messages appended after the first `from` entries
    pub fn tail(&self, from: usize) -> &[Message] {
        self.messages.get(from..).unwrap_or(&[])
    }

    pub fn into_messages(self) -> Vec<Message> {
        self.messages
    }

    /// Get the last message
    pub fn last(&self) -> Option<&Message> {
        self.messages.last()
    }

    /// Tool calls awaiting execution: those of the final message, if it is an
    /// assistant message that requested tools
    pub fn pending_tool_calls(&self) -> &[ToolCall] {
        match self.last() {
            Some(m) if m.requests_tools() => &m.tool_calls,
            _ => &[],
        }
    }

    /// Check that every tool message answers a tool call of the nearest
    /// unanswered assistant message, and that no other message interrupts a
    /// batch of tool calls before all of them are answered.
    pub fn validate(&self) -> Result<()> {
        let mut pending: HashSet<&str> = HashSet::new();

        for (idx, msg) in self.messages.iter().enumerate() {
            match msg.role {
                Role::Tool => {
                    let id = msg.tool_call_id.as_deref().ok_or_else(|| {
                        AgentError::InvalidTranscript(format!("tool message #{idx} has no tool_call_id"))
                    })?;
                    if !pending.remove(id) {
                        return Err(AgentError::InvalidTranscript(format!(
                            "tool message #{idx} answers unknown or already answered call '{id}'"
                        )));
                    }
                }
                _ if !pending.is_empty() => {
                    return Err(AgentError::InvalidTranscript(format!(
                        "message #{idx} ({}) arrived with {} tool call(s) unanswered",
                        msg.role,
                        pending.len()
                    )));
                }
                Role::Assistant => {
                    for call in &msg.tool_calls {
                        if !pending.insert(call.id.as_str()) {
                            return Err(AgentError::InvalidTranscript(format!(
                                "assistant message #{idx} repeats tool call id '{}'",
                                call.id
                            )));
                        }
                    }
                }
                Role::System | Role::User => {}
            }
        }

        Ok(())
    }

    /// Number of messages
    pub fn len(&self) -> usize {
        self.messages.len()
    }

    /// Check if empty
    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn call(id: &str) -> ToolCall {
        ToolCall::new(id, "firecrawl_search", json!({"query": "rust"}))
    }

    #[test]
    fn test_message_creation() {
        let msg = Message::user("Hello");
        assert_eq!(msg.role, Role::User);
        assert_eq!(msg.content, "Hello");
        assert!(!msg.requests_tools());
    }

    #[test]
    fn test_conversation() {
        let mut conv = Conversation::new();
        conv.push(Message::user("Hi"));
        conv.push(Message::assistant("Hello!"));

        assert_eq!(conv.len(), 2);
        assert!(conv.last().unwrap().role == Role::Assistant);
        assert_eq!(conv.tail(1)[0].content, "Hello!");
    }

    #[test]
    fn test_instructed_prepends_once_without_mutating() {
        let mut conv = Conversation::new();
        conv.push(Message::user("Hi"));

        let instructed = conv.instructed("rules");
        assert_eq!(instructed.len(), 2);
        assert_eq!(instructed[0].role, Role::System);
        assert_eq!(instructed[0].content, "rules");
        assert_eq!(instructed[1].content, "Hi");
        assert_eq!(conv.len(), 1);

        let led = Conversation::from_messages(vec![Message::system("old rules"), Message::user("Hi")]);
        let instructed = led.instructed("rules");
        assert!(matches!(instructed, Cow::Borrowed(_)));
        assert_eq!(instructed.iter().filter(|m| m.role == Role::System).count(), 1);
        assert_eq!(instructed[0].content, "old rules");
    }

    #[test]
    fn test_pending_tool_calls_only_from_last_message() {
        let mut conv = Conversation::new();
        conv.push(Message::assistant_with_tool_calls("", vec![call("a")]));
        assert_eq!(conv.pending_tool_calls().len(), 1);

        conv.push(Message::tool("a", "done"));
        assert!(conv.pending_tool_calls().is_empty());
    }

    #[test]
    fn test_validate_accepts_answered_calls() {
        let conv = Conversation::from_messages(vec![
            Message::system("s"),
            Message::user("u"),
            Message::assistant_with_tool_calls("", vec![call("a"), call("b")]),
            Message::tool("b", "2"),
            Message::tool("a", "1"),
            Message::assistant("final"),
        ]);
        assert!(conv.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_orphan_tool_message() {
        let conv = Conversation::from_messages(vec![Message::user("u"), Message::tool("zzz", "x")]);
        assert!(matches!(conv.validate(), Err(AgentError::InvalidTranscript(_))));
    }

    #[test]
    fn test_validate_rejects_interrupted_batch() {
        let conv = Conversation::from_messages(vec![
            Message::assistant_with_tool_calls("", vec![call("a"), call("b")]),
            Message::tool("a", "1"),
            Message::user("too early"),
        ]);
        assert!(conv.validate().is_err());
    }

    #[test]
    fn test_message_serde_preserves_tool_fields() {
        let msg = Message::tool_error("call-1", "boom").with_name("firecrawl_scrape");
        let json = serde_json::to_string(&msg).unwrap();
        let back: Message = serde_json::from_str(&json).unwrap();
        assert_eq!(back, msg);
        assert!(back.is_error);
    }
}
