//! Threaded Turns
//!
//! [`TurnRunner`] ties the reasoning loop to a [`CheckpointStore`]. Each turn
//! loads the thread's latest checkpoint, appends the user message, runs the loop
//! on a private copy and commits only when the loop ends with an answer. Turns
//! on the same thread are serialized; turns on different threads run freely.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use serde::Serialize;
use tokio::sync::OwnedMutexGuard;

use crate::error::Result;
use crate::graph::Step;
use crate::message::{Conversation, Message};
use crate::reasoning::{Agent, StepObserver, TurnOutcome};
use crate::session::{Checkpoint, CheckpointStore, ThreadId};

/// Threads whose lock map entries are pruned once idle
const PRUNE_THRESHOLD: usize = 1024;

/// Per-thread async mutexes
#[derive(Default)]
pub struct ThreadLocks {
    locks: Mutex<HashMap<ThreadId, Arc<tokio::sync::Mutex<()>>>>,
}

impl ThreadLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait until no other turn holds `thread_id`
    pub async fn acquire(&self, thread_id: &ThreadId) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
            if locks.len() >= PRUNE_THRESHOLD {
                locks.retain(|_, l| Arc::strong_count(l) > 1);
            }
            locks.entry(thread_id.clone()).or_default().clone()
        };
        lock.lock_owned().await
    }
}

/// What a committed turn produced
#[derive(Clone, Debug, Serialize)]
pub struct TurnReport {
    pub thread_id: ThreadId,

    /// Sequence of the checkpoint this turn committed
    pub checkpoint: u64,

    #[serde(flatten)]
    pub outcome: TurnOutcome,
}

/// Records each step's messages as write intents of the pending checkpoint
struct IntentRecorder<'a> {
    store: &'a dyn CheckpointStore,
    thread_id: &'a ThreadId,
    seq: u64,
}

#[async_trait]
impl StepObserver for IntentRecorder<'_> {
    async fn on_step(&mut self, step: Step, appended: &[Message]) -> Result<()> {
        self.store
            .put_writes(self.thread_id, self.seq, step.as_str(), appended)
            .await
    }
}

/// Runs turns against persisted threads
pub struct TurnRunner {
    agent: Arc<Agent>,
    store: Arc<dyn CheckpointStore>,
    locks: ThreadLocks,
}

impl TurnRunner {
    pub fn new(agent: Arc<Agent>, store: Arc<dyn CheckpointStore>) -> Self {
        Self {
            agent,
            store,
            locks: ThreadLocks::new(),
        }
    }

    /// Run one user turn on `thread_id` and commit the extended transcript.
    ///
    /// On any error the stored transcript is left as it was before the turn.
    pub async fn run_turn(&self, thread_id: &ThreadId, user_input: &str) -> Result<TurnReport> {
        let _guard = self.locks.acquire(thread_id).await;

        let (parent_seq, mut conversation) = match self.store.load(thread_id).await? {
            Some(cp) => (Some(cp.seq), cp.conversation),
            None => (None, Conversation::new()),
        };
        let pending_seq = parent_seq.map_or(1, |s| s + 1);

        tracing::info!(
            thread_id = %thread_id,
            history = conversation.len(),
            "turn started"
        );

        let input = Message::user(user_input);
        self.store
            .put_writes(thread_id, pending_seq, "input", std::slice::from_ref(&input))
            .await?;
        conversation.push(input);

        let mut recorder = IntentRecorder {
            store: self.store.as_ref(),
            thread_id,
            seq: pending_seq,
        };

        let result: Result<(TurnOutcome, Checkpoint)> = async {
            let outcome = self.agent.run_observed(&mut conversation, &mut recorder).await?;
            conversation.validate()?;
            let checkpoint = self.store.commit(thread_id, parent_seq, &conversation).await?;
            Ok((outcome, checkpoint))
        }
        .await;

        let (outcome, checkpoint) = match result {
            Ok(done) => done,
            Err(e) => {
                tracing::warn!(thread_id = %thread_id, error = %e, "turn failed, nothing committed");
                if let Err(discard) = self.store.discard_writes(thread_id).await {
                    tracing::warn!(thread_id = %thread_id, error = %discard, "failed to discard write intents");
                }
                return Err(e);
            }
        };

        tracing::info!(
            thread_id = %thread_id,
            checkpoint = checkpoint.seq,
            messages = checkpoint.message_count(),
            iterations = outcome.iterations,
            tool_calls = outcome.tool_calls,
            "turn committed"
        );

        Ok(TurnReport {
            thread_id: thread_id.clone(),
            checkpoint: checkpoint.seq,
            outcome,
        })
    }

    /// Latest committed transcript of a thread
    pub async fn history(&self, thread_id: &ThreadId) -> Result<Option<Checkpoint>> {
        self.store.load(thread_id).await
    }

    /// Remove a thread, waiting for any in-flight turn on it to finish
    pub async fn delete_thread(&self, thread_id: &ThreadId) -> Result<bool> {
        let _guard = self.locks.acquire(thread_id).await;
        self.store.delete(thread_id).await
    }

    pub fn agent(&self) -> &Agent {
        &self.agent
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_same_thread_is_serialized() {
        let locks = Arc::new(ThreadLocks::new());
        let id = ThreadId::parse("t1").unwrap();

        let guard = locks.acquire(&id).await;
        let contender = {
            let locks = locks.clone();
            let id = id.clone();
            tokio::spawn(async move {
                let _g = locks.acquire(&id).await;
            })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!contender.is_finished());

        drop(guard);
        tokio::time::timeout(Duration::from_secs(1), contender)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn test_different_threads_do_not_block() {
        let locks = ThreadLocks::new();
        let _a = locks.acquire(&ThreadId::parse("a").unwrap()).await;
        let b = tokio::time::timeout(
            Duration::from_millis(100),
            locks.acquire(&ThreadId::parse("b").unwrap()),
        )
        .await;
        assert!(b.is_ok());
    }
}
