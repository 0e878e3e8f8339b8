//! Watcher state schema and migrations
//!
//! Uses SQLite with embedded migrations managed via PRAGMA user_version.
//! The state database is the single source of truth for watched
//! directories, per-source fingerprints/cursors, and daemon liveness.

use rusqlite::Connection;

/// Current schema version
pub const SCHEMA_VERSION: i32 = 1;

/// SQL migrations, indexed by version number
const MIGRATIONS: &[&str] = &[
    // Version 1: Initial schema
    r#"
    CREATE TABLE IF NOT EXISTS watched_directories (
        id        INTEGER PRIMARY KEY AUTOINCREMENT,
        path      TEXT NOT NULL UNIQUE,
        added_at  TEXT NOT NULL,
        recursive INTEGER NOT NULL DEFAULT 1
    );

    CREATE TABLE IF NOT EXISTS file_state (
        file_path     TEXT PRIMARY KEY,
        content_hash  TEXT NOT NULL,
        mtime         INTEGER NOT NULL,
        last_ingested TEXT NOT NULL
    );

    -- Singleton rows enforced by CHECK (id = 1)

    CREATE TABLE IF NOT EXISTS clipboard_state (
        id            INTEGER PRIMARY KEY CHECK (id = 1),
        last_hash     TEXT NOT NULL DEFAULT '',
        last_ingested TEXT NOT NULL DEFAULT ''
    );

    CREATE TABLE IF NOT EXISTS history_state (
        id            INTEGER PRIMARY KEY CHECK (id = 1),
        last_line_num INTEGER NOT NULL DEFAULT 0,
        last_ingested TEXT NOT NULL DEFAULT ''
    );

    CREATE TABLE IF NOT EXISTS daemon_state (
        id         INTEGER PRIMARY KEY CHECK (id = 1),
        pid        INTEGER,
        started_at TEXT,
        status     TEXT NOT NULL DEFAULT 'stopped'
    );
    "#,
];

/// Run any pending migrations on the connection.
pub fn run_migrations(conn: &Connection) -> crate::error::Result<()> {
    let current_version: i32 = conn
        .query_row("PRAGMA user_version", [], |r| r.get(0))
        .unwrap_or(0);

    for (i, migration) in MIGRATIONS.iter().enumerate() {
        let version = (i + 1) as i32;
        if version > current_version {
            tracing::info!(version, "Running state schema migration");
            conn.execute_batch(migration)?;
            conn.execute(&format!("PRAGMA user_version = {}", version), [])?;
        }
    }

    if current_version < SCHEMA_VERSION {
        tracing::info!(
            from = current_version,
            to = SCHEMA_VERSION,
            "State migrations complete"
        );
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tables_created() {
        let conn = Connection::open_in_memory().unwrap();
        run_migrations(&conn).unwrap();

        let tables = [
            "watched_directories",
            "file_state",
            "clipboard_state",
            "history_state",
            "daemon_state",
        ];

        for table in tables {
            let exists: i32 = conn
                .query_row(
                    "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name=?",
                    [table],
                    |r| r.get(0),
                )
                .unwrap();
            assert_eq!(exists, 1, "Table {} should exist", table);
        }
    }

    #[test]
    fn test_migrations_are_idempotent() {
        let conn = Connection::open_in_memory().unwrap();
        run_migrations(&conn).unwrap();
        run_migrations(&conn).unwrap();

        let version: i32 = conn.query_row("PRAGMA user_version", [], |r| r.get(0)).unwrap();
        assert_eq!(version, SCHEMA_VERSION);
    }
}
