//! # agent-core
//!
//! Core agent logic: a two-step conversation graph over a provider-agnostic
//! chat model and an extensible tool system, with transcripts persisted per
//! thread through a checkpoint store.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                          TurnRunner                              │
//! │  ┌──────────────────────────────────────────┐  ┌──────────────┐  │
//! │  │                 Agent                    │  │ Checkpoint   │  │
//! │  │  ┌───────────┐ ┌──────────┐ ┌─────────┐  │──│   Store      │  │
//! │  │  │ Reasoning │─│  Tool    │─│ Bound   │  │  │  (Strategy)  │  │
//! │  │  │   Loop    │ │ Registry │ │ Model   │  │  └──────────────┘  │
//! │  │  └───────────┘ └──────────┘ └─────────┘  │                    │
//! │  └──────────────────────────────────────────┘                    │
//! └──────────────────────────────────────────────────────────────────┘
//! ```
//!
//! The `LlmProvider` trait lets any OpenAI-compatible endpoint back the agent,
//! and the `CheckpointStore` trait lets transcripts live in memory or on disk
//! without changing agent logic.

pub mod error;
pub mod graph;
pub mod message;
pub mod provider;
pub mod reasoning;
pub mod session;
pub mod tool;
pub mod turn;

pub use error::{AgentError, Result};
pub use graph::Step;
pub use message::{Conversation, Message, Role};
pub use provider::{BoundModel, Completion, GenerationOptions, LlmProvider};
pub use reasoning::{Agent, AgentBuilder, AgentConfig, TurnOutcome};
pub use session::{Checkpoint, CheckpointStore, MemoryCheckpointStore, ThreadId};
pub use tool::{Tool, ToolCall, ToolRegistry, ToolResult, ToolSchema};
pub use turn::{TurnReport, TurnRunner};
