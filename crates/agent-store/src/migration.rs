//! Schema migrations
//!
//! Migrations are static SQL keyed by version. Applied versions are tracked in
//! `_migrations`, so running them again is a no-op.

use rusqlite::Connection;
use tracing::{debug, info, warn};

use crate::error::{StoreError, StoreResult};

struct Migration {
    version: u32,
    description: &'static str,
    sql: &'static str,
}

/// All migrations in order. Add new migrations to the end.
static MIGRATIONS: &[Migration] = &[Migration {
    version: 1,
    description: "thread checkpoints, message blobs, pending writes",
    sql: r"
        CREATE TABLE checkpoints (
            thread_id     TEXT    NOT NULL,
            seq           INTEGER NOT NULL,
            parent_seq    INTEGER,
            message_count INTEGER NOT NULL,
            created_at    TEXT    NOT NULL,
            PRIMARY KEY (thread_id, seq)
        );

        CREATE TABLE checkpoint_blobs (
            thread_id TEXT    NOT NULL,
            idx       INTEGER NOT NULL,
            role      TEXT    NOT NULL CHECK(role IN ('system','user','assistant','tool')),
            payload   TEXT    NOT NULL,
            PRIMARY KEY (thread_id, idx)
        );

        CREATE TABLE checkpoint_writes (
            id         INTEGER PRIMARY KEY AUTOINCREMENT,
            thread_id  TEXT    NOT NULL,
            seq        INTEGER NOT NULL,
            step       TEXT    NOT NULL,
            idx        INTEGER NOT NULL,
            payload    TEXT    NOT NULL,
            created_at TEXT    NOT NULL
        );
        CREATE INDEX idx_checkpoint_writes_thread ON checkpoint_writes(thread_id, seq);
    ",
}];

#[cfg(test)]
const LATEST_VERSION: u32 = 1;

/// Run every migration newer than the recorded version
pub fn run_all(conn: &Connection) -> StoreResult<()> {
    ensure_migrations_table(conn)?;

    let current = current_version(conn)?;
    let pending: Vec<&Migration> = MIGRATIONS.iter().filter(|m| m.version > current).collect();

    if pending.is_empty() {
        debug!(current_version = current, "database schema is up to date");
        return Ok(());
    }

    info!(current_version = current, pending = pending.len(), "running pending migrations");

    for migration in pending {
        apply(conn, migration)?;
    }
    Ok(())
}

/// Latest applied migration version, or 0
pub fn current_version(conn: &Connection) -> StoreResult<u32> {
    conn.query_row("SELECT COALESCE(MAX(version), 0) FROM _migrations", [], |row| row.get(0))
        .map_err(|e| StoreError::Migration {
            version: 0,
            message: format!("failed to read current version: {e}"),
        })
}

fn ensure_migrations_table(conn: &Connection) -> StoreResult<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS _migrations (
            version     INTEGER PRIMARY KEY,
            description TEXT NOT NULL,
            applied_at  INTEGER NOT NULL
        );",
    )
    .map_err(|e| StoreError::Migration {
        version: 0,
        message: format!("failed to create _migrations table: {e}"),
    })
}

/// Apply one migration inside a transaction
fn apply(conn: &Connection, migration: &Migration) -> StoreResult<()> {
    info!(version = migration.version, description = migration.description, "applying migration");

    let fail = |message: String| StoreError::Migration {
        version: migration.version,
        message,
    };

    // `&Connection` cannot open a `Transaction`, so BEGIN/COMMIT by hand
    conn.execute_batch("BEGIN IMMEDIATE;")
        .map_err(|e| fail(format!("failed to begin transaction: {e}")))?;

    let result = (|| -> StoreResult<()> {
        conn.execute_batch(migration.sql)
            .map_err(|e| fail(format!("SQL execution failed: {e}")))?;
        conn.execute(
            "INSERT INTO _migrations (version, description, applied_at) VALUES (?1, ?2, ?3)",
            rusqlite::params![migration.version, migration.description, chrono::Utc::now().timestamp()],
        )
        .map_err(|e| fail(format!("failed to record migration: {e}")))?;
        Ok(())
    })();

    match result {
        Ok(()) => conn
            .execute_batch("COMMIT;")
            .map_err(|e| fail(format!("failed to commit: {e}"))),
        Err(err) => {
            warn!(version = migration.version, %err, "migration failed, rolling back");
            let _ = conn.execute_batch("ROLLBACK;");
            Err(err)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn migrations_are_ordered() {
        for window in MIGRATIONS.windows(2) {
            assert!(window[1].version > window[0].version);
        }
        assert_eq!(MIGRATIONS.last().map(|m| m.version), Some(LATEST_VERSION));
    }

    #[test]
    fn run_all_is_idempotent() {
        let conn = Connection::open_in_memory().unwrap();
        run_all(&conn).unwrap();
        run_all(&conn).unwrap();
        assert_eq!(current_version(&conn).unwrap(), LATEST_VERSION);
    }

    #[test]
    fn role_constraint_enforced() {
        let conn = Connection::open_in_memory().unwrap();
        run_all(&conn).unwrap();
        let bad = conn.execute(
            "INSERT INTO checkpoint_blobs (thread_id, idx, role, payload) VALUES ('t', 0, 'robot', '{}')",
            [],
        );
        assert!(bad.is_err());
    }
}
