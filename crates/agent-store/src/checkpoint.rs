//! SQLite-backed [`CheckpointStore`]
//!
//! A thread's messages live in `checkpoint_blobs`, one row per transcript index.
//! Each `checkpoints` row records how many of those messages the checkpoint
//! covers. Commits run in one transaction that checks the parent sequence,
//! writes new message rows, records the checkpoint and clears the thread's
//! write intents.

use agent_core::error::Result;
use agent_core::message::{Conversation, Message};
use agent_core::session::{Checkpoint, CheckpointStore, ThreadId, WriteIntent};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, params};
use tracing::{debug, info};

use crate::db::Database;
use crate::error::{StoreError, StoreResult};

/// Durable checkpoint store on SQLite
#[derive(Clone)]
pub struct SqliteCheckpointStore {
    db: Database,
}

impl SqliteCheckpointStore {
    /// Wrap a migrated database
    pub const fn new(db: Database) -> Self {
        Self { db }
    }

    /// Open the database a `DATABASE_URL` names and migrate it
    pub async fn connect(url: &str) -> StoreResult<Self> {
        Ok(Self::new(Database::connect(url).await?))
    }
}

struct CheckpointRow {
    seq: u64,
    parent_seq: Option<u64>,
    message_count: usize,
    created_at: String,
}

fn latest_row(conn: &Connection, thread_id: &str) -> StoreResult<Option<CheckpointRow>> {
    let row = conn
        .query_row(
            "SELECT seq, parent_seq, message_count, created_at
             FROM checkpoints WHERE thread_id = ?1
             ORDER BY seq DESC LIMIT 1",
            params![thread_id],
            |row| {
                Ok(CheckpointRow {
                    seq: row.get(0)?,
                    parent_seq: row.get(1)?,
                    message_count: row.get(2)?,
                    created_at: row.get(3)?,
                })
            },
        )
        .optional()?;
    Ok(row)
}

fn corrupt(thread_id: &str, message: impl Into<String>) -> StoreError {
    StoreError::Corrupt {
        thread_id: thread_id.to_string(),
        message: message.into(),
    }
}

fn parse_time(thread_id: &str, raw: &str) -> StoreResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| corrupt(thread_id, format!("bad timestamp '{raw}': {e}")))
}

fn load_checkpoint(conn: &Connection, thread_id: &ThreadId) -> StoreResult<Option<Checkpoint>> {
    let id = thread_id.as_str();
    let Some(row) = latest_row(conn, id)? else {
        return Ok(None);
    };

    let mut stmt = conn.prepare(
        "SELECT payload FROM checkpoint_blobs
         WHERE thread_id = ?1 AND idx < ?2
         ORDER BY idx",
    )?;
    let messages = stmt
        .query_map(params![id, row.message_count], |r| r.get::<_, String>(0))?
        .map(|payload| Ok(serde_json::from_str::<Message>(&payload?)?))
        .collect::<StoreResult<Vec<_>>>()?;

    if messages.len() != row.message_count {
        return Err(corrupt(
            id,
            format!(
                "checkpoint {} covers {} messages but {} are stored",
                row.seq,
                row.message_count,
                messages.len()
            ),
        ));
    }

    Ok(Some(Checkpoint {
        thread_id: thread_id.clone(),
        seq: row.seq,
        parent_seq: row.parent_seq,
        conversation: Conversation::from_messages(messages),
        created_at: parse_time(id, &row.created_at)?,
    }))
}

fn commit_checkpoint(
    conn: &mut Connection,
    thread_id: &ThreadId,
    parent_seq: Option<u64>,
    messages: &[(String, String)],
) -> StoreResult<Checkpoint> {
    let id = thread_id.as_str();
    let tx = conn.transaction_with_behavior(rusqlite::TransactionBehavior::Immediate)?;

    let found = latest_row(&tx, id)?.map(|r| r.seq);
    if found != parent_seq {
        return Err(StoreError::Conflict {
            thread_id: id.to_string(),
            expected: parent_seq,
            found,
        });
    }

    {
        let mut upsert = tx.prepare(
            "INSERT INTO checkpoint_blobs (thread_id, idx, role, payload)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(thread_id, idx) DO UPDATE
             SET role = excluded.role, payload = excluded.payload
             WHERE payload != excluded.payload",
        )?;
        for (idx, (role, payload)) in messages.iter().enumerate() {
            upsert.execute(params![id, idx, role, payload])?;
        }
    }
    tx.execute(
        "DELETE FROM checkpoint_blobs WHERE thread_id = ?1 AND idx >= ?2",
        params![id, messages.len()],
    )?;

    let seq = parent_seq.map_or(1, |s| s + 1);
    let created_at = Utc::now();
    tx.execute(
        "INSERT INTO checkpoints (thread_id, seq, parent_seq, message_count, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![id, seq, parent_seq, messages.len(), created_at.to_rfc3339()],
    )?;
    tx.execute("DELETE FROM checkpoint_writes WHERE thread_id = ?1", params![id])?;
    tx.commit()?;

    Ok(Checkpoint {
        thread_id: thread_id.clone(),
        seq,
        parent_seq,
        conversation: Conversation::new(),
        created_at,
    })
}

#[async_trait]
impl CheckpointStore for SqliteCheckpointStore {
    async fn load(&self, thread_id: &ThreadId) -> Result<Option<Checkpoint>> {
        let thread_id = thread_id.clone();
        Ok(self.db.execute(move |conn| load_checkpoint(conn, &thread_id)).await?)
    }

    async fn commit(
        &self,
        thread_id: &ThreadId,
        parent_seq: Option<u64>,
        conversation: &Conversation,
    ) -> Result<Checkpoint> {
        let rows = conversation
            .messages()
            .iter()
            .map(|m| Ok((m.role.to_string(), serde_json::to_string(m)?)))
            .collect::<StoreResult<Vec<_>>>()?;

        let owned_id = thread_id.clone();
        let mut checkpoint = self
            .db
            .execute_mut(move |conn| commit_checkpoint(conn, &owned_id, parent_seq, &rows))
            .await?;
        checkpoint.conversation = conversation.clone();

        debug!(
            thread_id = %thread_id,
            seq = checkpoint.seq,
            messages = checkpoint.message_count(),
            "checkpoint committed"
        );
        Ok(checkpoint)
    }

    async fn put_writes(
        &self,
        thread_id: &ThreadId,
        seq: u64,
        step: &str,
        messages: &[Message],
    ) -> Result<()> {
        let payloads = messages
            .iter()
            .map(serde_json::to_string)
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(StoreError::from)?;
        let id = thread_id.as_str().to_string();
        let step = step.to_string();

        self.db
            .execute_mut(move |conn| {
                let tx = conn.transaction()?;
                {
                    let now = Utc::now().to_rfc3339();
                    let mut insert = tx.prepare(
                        "INSERT INTO checkpoint_writes (thread_id, seq, step, idx, payload, created_at)
                         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                    )?;
                    for (idx, payload) in payloads.iter().enumerate() {
                        insert.execute(params![id, seq, step, idx, payload, now])?;
                    }
                }
                tx.commit()?;
                Ok(())
            })
            .await?;
        Ok(())
    }

    async fn pending_writes(&self, thread_id: &ThreadId) -> Result<Vec<WriteIntent>> {
        let owned_id = thread_id.clone();
        let intents = self
            .db
            .execute(move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT seq, step, payload FROM checkpoint_writes
                     WHERE thread_id = ?1 ORDER BY id",
                )?;
                let rows = stmt.query_map(params![owned_id.as_str()], |r| {
                    Ok((r.get::<_, u64>(0)?, r.get::<_, String>(1)?, r.get::<_, String>(2)?))
                })?;
                rows.map(|row| {
                    let (seq, step, payload) = row?;
                    Ok(WriteIntent {
                        thread_id: owned_id.clone(),
                        seq,
                        step,
                        message: serde_json::from_str(&payload)?,
                    })
                })
                .collect::<StoreResult<Vec<_>>>()
            })
            .await?;
        Ok(intents)
    }

    async fn discard_writes(&self, thread_id: &ThreadId) -> Result<()> {
        let id = thread_id.as_str().to_string();
        self.db
            .execute(move |conn| {
                conn.execute("DELETE FROM checkpoint_writes WHERE thread_id = ?1", params![id])?;
                Ok(())
            })
            .await?;
        Ok(())
    }

    async fn recover(&self) -> Result<usize> {
        let discarded = self
            .db
            .execute(|conn| Ok(conn.execute("DELETE FROM checkpoint_writes", [])?))
            .await?;
        if discarded > 0 {
            info!(discarded, "discarded write intents of unfinished turns");
        }
        Ok(discarded)
    }

    async fn delete(&self, thread_id: &ThreadId) -> Result<bool> {
        let id = thread_id.as_str().to_string();
        let existed = self
            .db
            .execute_mut(move |conn| {
                let tx = conn.transaction()?;
                let removed = tx.execute("DELETE FROM checkpoints WHERE thread_id = ?1", params![id])?;
                tx.execute("DELETE FROM checkpoint_blobs WHERE thread_id = ?1", params![id])?;
                tx.execute("DELETE FROM checkpoint_writes WHERE thread_id = ?1", params![id])?;
                tx.commit()?;
                Ok(removed > 0)
            })
            .await?;
        Ok(existed)
    }
}
