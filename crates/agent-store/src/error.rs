//! Error types for the checkpoint store

use agent_core::AgentError;
use thiserror::Error;

pub type StoreResult<T> = Result<T, StoreError>;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("migration v{version} failed: {message}")]
    Migration { version: u32, message: String },

    #[error("unsupported database URL '{0}': expected sqlite://<path> or a file path")]
    UnsupportedUrl(String),

    /// Stored data that cannot be turned back into a transcript
    #[error("corrupt checkpoint for thread {thread_id}: {message}")]
    Corrupt { thread_id: String, message: String },

    #[error("checkpoint conflict on thread {thread_id}: expected seq {expected:?}, found {found:?}")]
    Conflict {
        thread_id: String,
        expected: Option<u64>,
        found: Option<u64>,
    },

    #[error("background task failed: {0}")]
    TaskJoin(String),
}

impl From<tokio::task::JoinError> for StoreError {
    fn from(err: tokio::task::JoinError) -> Self {
        Self::TaskJoin(err.to_string())
    }
}

impl From<StoreError> for AgentError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Conflict {
                thread_id,
                expected,
                found,
            } => Self::Conflict {
                thread_id,
                expected,
                found,
            },
            other => Self::Checkpoint(other.to_string()),
        }
    }
}
