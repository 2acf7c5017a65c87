//! Thread Checkpoints
//!
//! The persistence boundary: transcripts are stored per thread as numbered
//! checkpoints. A turn loads the latest checkpoint, works on its own copy and
//! commits the extended transcript in one step. Messages produced by an
//! unfinished turn are only ever recorded as write intents.

use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{AgentError, Result};
use crate::message::{Conversation, Message};

const MAX_THREAD_ID_LEN: usize = 128;

/// Unique thread identifier
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ThreadId(String);

impl ThreadId {
    /// Mint a fresh random identifier
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Accept an externally supplied identifier after checking its shape
    pub fn parse(s: impl Into<String>) -> Result<Self> {
        let s = s.into();
        let well_formed = !s.is_empty()
            && s.len() <= MAX_THREAD_ID_LEN
            && s.chars().all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | ':'));
        if well_formed {
            Ok(Self(s))
        } else {
            Err(AgentError::Checkpoint(format!("invalid thread id '{s}'")))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for ThreadId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ThreadId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A committed snapshot of one thread's transcript
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub thread_id: ThreadId,

    /// Monotonic per-thread sequence number, starting at 1
    pub seq: u64,

    /// Sequence this checkpoint was derived from
    pub parent_seq: Option<u64>,

    pub conversation: Conversation,

    pub created_at: DateTime<Utc>,
}

impl Checkpoint {
    pub fn message_count(&self) -> usize {
        self.conversation.len()
    }
}

/// A message recorded by a step of a turn that has not committed yet
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct WriteIntent {
    pub thread_id: ThreadId,

    /// Sequence the turn will commit as
    pub seq: u64,

    /// Step that produced the message (`input`, `reasoning`, `tool_execution`)
    pub step: String,

    pub message: Message,
}

/// Durable store for thread transcripts
#[async_trait]
pub trait CheckpointStore: Send + Sync {
    /// Latest committed checkpoint of a thread
    async fn load(&self, thread_id: &ThreadId) -> Result<Option<Checkpoint>>;

    /// Atomically commit `conversation` as the successor of `parent_seq`.
    ///
    /// Fails with [`AgentError::Conflict`] when `parent_seq` is no longer the
    /// latest checkpoint. Clears the thread's write intents on success.
    async fn commit(
        &self,
        thread_id: &ThreadId,
        parent_seq: Option<u64>,
        conversation: &Conversation,
    ) -> Result<Checkpoint>;

    /// Record messages produced by a step of an in-progress turn
    async fn put_writes(
        &self,
        thread_id: &ThreadId,
        seq: u64,
        step: &str,
        messages: &[Message],
    ) -> Result<()>;

    /// Uncommitted write intents of a thread, in recording order
    async fn pending_writes(&self, thread_id: &ThreadId) -> Result<Vec<WriteIntent>>;

    /// Drop the write intents of a thread's abandoned turn
    async fn discard_writes(&self, thread_id: &ThreadId) -> Result<()>;

    /// Drop write intents left behind by turns that never committed.
    /// Returns how many intents were discarded.
    async fn recover(&self) -> Result<usize>;

    /// Remove every checkpoint of a thread. Returns whether it existed.
    async fn delete(&self, thread_id: &ThreadId) -> Result<bool>;
}

#[derive(Default)]
struct MemoryState {
    checkpoints: HashMap<ThreadId, Checkpoint>,
    writes: HashMap<ThreadId, Vec<WriteIntent>>,
}

/// In-memory checkpoint store (for development/testing)
#[derive(Default)]
pub struct MemoryCheckpointStore {
    state: RwLock<MemoryState>,
}

impl MemoryCheckpointStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> Result<std::sync::RwLockReadGuard<'_, MemoryState>> {
        self.state
            .read()
            .map_err(|e| AgentError::Checkpoint(format!("lock poisoned: {e}")))
    }

    fn write(&self) -> Result<std::sync::RwLockWriteGuard<'_, MemoryState>> {
        self.state
            .write()
            .map_err(|e| AgentError::Checkpoint(format!("lock poisoned: {e}")))
    }
}

#[async_trait]
impl CheckpointStore for MemoryCheckpointStore {
    async fn load(&self, thread_id: &ThreadId) -> Result<Option<Checkpoint>> {
        Ok(self.read()?.checkpoints.get(thread_id).cloned())
    }

    async fn commit(
        &self,
        thread_id: &ThreadId,
        parent_seq: Option<u64>,
        conversation: &Conversation,
    ) -> Result<Checkpoint> {
        let mut state = self.write()?;

        let found = state.checkpoints.get(thread_id).map(|c| c.seq);
        if found != parent_seq {
            return Err(AgentError::Conflict {
                thread_id: thread_id.to_string(),
                expected: parent_seq,
                found,
            });
        }

        let checkpoint = Checkpoint {
            thread_id: thread_id.clone(),
            seq: parent_seq.map_or(1, |s| s + 1),
            parent_seq,
            conversation: conversation.clone(),
            created_at: Utc::now(),
        };
        state.checkpoints.insert(thread_id.clone(), checkpoint.clone());
        state.writes.remove(thread_id);
        Ok(checkpoint)
    }

    async fn put_writes(
        &self,
        thread_id: &ThreadId,
        seq: u64,
        step: &str,
        messages: &[Message],
    ) -> Result<()> {
        let mut state = self.write()?;
        let intents = state.writes.entry(thread_id.clone()).or_default();
        intents.extend(messages.iter().map(|m| WriteIntent {
            thread_id: thread_id.clone(),
            seq,
            step: step.to_string(),
            message: m.clone(),
        }));
        Ok(())
    }

    async fn pending_writes(&self, thread_id: &ThreadId) -> Result<Vec<WriteIntent>> {
        Ok(self.read()?.writes.get(thread_id).cloned().unwrap_or_default())
    }

    async fn discard_writes(&self, thread_id: &ThreadId) -> Result<()> {
        self.write()?.writes.remove(thread_id);
        Ok(())
    }

    async fn recover(&self) -> Result<usize> {
        let mut state = self.write()?;
        let discarded = state.writes.values().map(Vec::len).sum();
        state.writes.clear();
        Ok(discarded)
    }

    async fn delete(&self, thread_id: &ThreadId) -> Result<bool> {
        let mut state = self.write()?;
        state.writes.remove(thread_id);
        Ok(state.checkpoints.remove(thread_id).is_some())
    }
}
