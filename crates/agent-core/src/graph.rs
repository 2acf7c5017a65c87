//! Turn Routing
//!
//! The conversation graph has two working nodes and one terminal state:
//!
//! ```text
//!   START ──▶ Reasoning ──┬──▶ End            (assistant message has no tool calls)
//!                ▲        │
//!                │        └──▶ ToolExecution  (assistant message has ≥1 tool call)
//!                └─────────────────┘
//! ```

use serde::{Deserialize, Serialize};

use crate::message::{Message, Role};

/// A state of the conversation graph
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Step {
    /// Call the model with the full transcript
    Reasoning,
    /// Satisfy the tool calls of the latest assistant message
    ToolExecution,
    /// The latest assistant message is the answer for this turn
    End,
}

impl Step {
    /// Entry state of every turn
    pub const START: Self = Self::Reasoning;

    /// Transition taken after `self` has completed, given the latest message
    pub fn next(self, latest: Option<&Message>) -> Self {
        match self {
            Self::Reasoning => route_after_reasoning(latest),
            Self::ToolExecution => Self::Reasoning,
            Self::End => Self::End,
        }
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Reasoning => "reasoning",
            Self::ToolExecution => "tool_execution",
            Self::End => "end",
        }
    }
}

impl std::fmt::Display for Step {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Decide where to go after a reasoning step.
///
/// Only an assistant message with at least one tool call enters tool execution;
/// anything else ends the turn.
pub fn route_after_reasoning(latest: Option<&Message>) -> Step {
    match latest {
        Some(msg) if msg.role == Role::Assistant && !msg.tool_calls.is_empty() => Step::ToolExecution,
        _ => Step::End,
    }
}
