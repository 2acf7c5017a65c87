//! # agent-store
//!
//! Durable thread checkpoints for the career advisor agent.
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │  SqliteCheckpointStore (CheckpointStore)│
//! ├─────────────────────────────────────────┤
//! │  Database (rusqlite WAL, spawn_blocking)│
//! │  Migrations (versioned, transactional)  │
//! └─────────────────────────────────────────┘
//! ```
//!
//! ```ignore
//! let store = SqliteCheckpointStore::connect("sqlite://data/threads.db").await?;
//! store.recover().await?;
//! ```

pub mod checkpoint;
pub mod db;
pub mod error;
pub mod migration;

pub use checkpoint::SqliteCheckpointStore;
pub use db::{Database, DatabaseLocation};
pub use error::{StoreError, StoreResult};
