//! SQLite connection handle
//!
//! [`Database`] wraps a `rusqlite::Connection` behind an `Arc<Mutex<>>` and runs
//! every statement on the blocking pool via `tokio::task::spawn_blocking`.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use rusqlite::Connection;
use tracing::{debug, info};

use crate::error::{StoreError, StoreResult};
use crate::migration;

/// Where a `DATABASE_URL` points
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DatabaseLocation {
    File(PathBuf),
    Memory,
}

impl DatabaseLocation {
    /// Accepts `sqlite://path`, `sqlite:path`, `sqlite::memory:`, `:memory:`
    /// or a bare file path.
    pub fn parse(url: &str) -> StoreResult<Self> {
        let url = url.trim();
        let rest = url
            .strip_prefix("sqlite://")
            .or_else(|| url.strip_prefix("sqlite:"))
            .unwrap_or(url);

        if rest == ":memory:" {
            return Ok(Self::Memory);
        }
        if rest.is_empty() || rest.contains("://") {
            return Err(StoreError::UnsupportedUrl(url.to_string()));
        }

        let path = rest.split('?').next().unwrap_or(rest);
        Ok(Self::File(PathBuf::from(path)))
    }
}

/// Thread-safe handle to a SQLite database
#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
}

impl Database {
    /// Open (or create) a database file and apply pragmas
    pub fn open(path: impl AsRef<Path>) -> StoreResult<Self> {
        let path = path.as_ref();
        info!(path = %path.display(), "opening database");

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(path)?;
        Self::apply_pragmas(&conn)?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// In-memory database for tests
    pub fn open_in_memory() -> StoreResult<Self> {
        debug!("opening in-memory database");

        let conn = Connection::open_in_memory()?;
        Self::apply_pragmas(&conn)?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Open the database a `DATABASE_URL` names and run pending migrations
    pub async fn connect(url: &str) -> StoreResult<Self> {
        let location = DatabaseLocation::parse(url)?;
        let db = tokio::task::spawn_blocking(move || match location {
            DatabaseLocation::File(path) => Self::open(path),
            DatabaseLocation::Memory => Self::open_in_memory(),
        })
        .await??;
        db.run_migrations().await?;
        Ok(db)
    }

    /// Run all pending schema migrations
    pub async fn run_migrations(&self) -> StoreResult<()> {
        self.execute(migration::run_all).await
    }

    /// Run a closure against the connection on the blocking pool
    pub async fn execute<F, T>(&self, f: F) -> StoreResult<T>
    where
        F: FnOnce(&Connection) -> StoreResult<T> + Send + 'static,
        T: Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let conn = conn
                .lock()
                .map_err(|e| StoreError::TaskJoin(format!("mutex poisoned: {e}")))?;
            f(&conn)
        })
        .await?
    }

    /// Run a closure that needs `&mut Connection` (transactions)
    pub async fn execute_mut<F, T>(&self, f: F) -> StoreResult<T>
    where
        F: FnOnce(&mut Connection) -> StoreResult<T> + Send + 'static,
        T: Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let mut conn = conn
                .lock()
                .map_err(|e| StoreError::TaskJoin(format!("mutex poisoned: {e}")))?;
            f(&mut conn)
        })
        .await?
    }

    fn apply_pragmas(conn: &Connection) -> StoreResult<()> {
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;
        conn.pragma_update(None, "temp_store", "MEMORY")?;
        conn.pragma_update(None, "foreign_keys", "ON")?;
        // Concurrent writers wait instead of failing immediately
        conn.pragma_update(None, "busy_timeout", 5_000_i32)?;

        debug!("database pragmas applied");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn url_forms() {
        assert_eq!(
            DatabaseLocation::parse("sqlite://data/threads.db").unwrap(),
            DatabaseLocation::File("data/threads.db".into())
        );
        assert_eq!(
            DatabaseLocation::parse("sqlite:threads.db?mode=rwc").unwrap(),
            DatabaseLocation::File("threads.db".into())
        );
        assert_eq!(
            DatabaseLocation::parse("/var/lib/advisor.db").unwrap(),
            DatabaseLocation::File("/var/lib/advisor.db".into())
        );
        assert_eq!(DatabaseLocation::parse("sqlite::memory:").unwrap(), DatabaseLocation::Memory);
        assert_eq!(DatabaseLocation::parse(":memory:").unwrap(), DatabaseLocation::Memory);
    }

    #[test]
    fn foreign_urls_rejected() {
        assert!(matches!(
            DatabaseLocation::parse("postgresql://user:pw@localhost/advisor"),
            Err(StoreError::UnsupportedUrl(_))
        ));
        assert!(DatabaseLocation::parse("").is_err());
    }

    #[tokio::test]
    async fn connect_creates_file_and_schema() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("threads.db");
        let db = Database::connect(&format!("sqlite://{}", path.display())).await.unwrap();

        let tables: i64 = db
            .execute(|conn| {
                Ok(conn.query_row(
                    "SELECT count(*) FROM sqlite_master WHERE type='table' AND name LIKE 'checkpoint%'",
                    [],
                    |row| row.get(0),
                )?)
            })
            .await
            .unwrap();
        assert_eq!(tables, 3);
        assert!(path.exists());
    }
}
