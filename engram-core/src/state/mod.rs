//! Durable state for the capture daemon
//!
//! [`WatcherState`] is the single source of truth shared by every
//! collector and the orchestrator: watched directories, per-file
//! ingestion fingerprints, the clipboard fingerprint, the history
//! cursor, and the daemon liveness record. One SQLite file in WAL mode;
//! every mutating call is serialized through a single connection behind
//! a mutex so concurrent collector workers never interleave writes.

pub mod schema;

use crate::error::{Error, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// A directory registered for file capture.
#[derive(Debug, Clone)]
pub struct WatchedDirectory {
    /// Row id
    pub id: i64,
    /// Absolute path (unique)
    pub path: PathBuf,
    /// When the directory was registered
    pub added_at: DateTime<Utc>,
    /// Whether live watching and scans descend into subdirectories
    pub recursive: bool,
}

/// Per-file ingestion fingerprint used to suppress re-ingestion.
#[derive(Debug, Clone)]
pub struct FileFingerprint {
    /// Absolute, resolved path (primary key)
    pub file_path: PathBuf,
    /// sha256 of the content at last ingestion
    pub content_hash: String,
    /// File mtime (unix seconds) at last ingestion
    pub mtime: i64,
    /// When the file was last ingested
    pub last_ingested: DateTime<Utc>,
}

/// The persisted daemon liveness marker.
///
/// Authoritative only when corroborated by an OS-level liveness probe;
/// a stale value can survive a crash until the next status/start call
/// clears it.
#[derive(Debug, Clone, Default)]
pub struct DaemonRecord {
    /// PID of the recorded daemon process, if any
    pub pid: Option<i32>,
    /// When the daemon started
    pub started_at: Option<DateTime<Utc>>,
    /// Recorded status string ("running" or "stopped")
    pub status: String,
}

/// SQLite-backed state manager for the capture daemon.
pub struct WatcherState {
    conn: Mutex<Connection>,
}

fn parse_ts(raw: String) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(&raw)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

impl WatcherState {
    /// Open or create the state database at the given path.
    ///
    /// An unreachable or corrupt state database is fatal: the daemon
    /// cannot run without its progress markers.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(path)?;
        conn.execute_batch(
            "
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            ",
        )?;

        schema::run_migrations(&conn)?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Open an in-memory state database (for testing).
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        schema::run_migrations(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn lock_conn(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| Error::Config("state store lock poisoned".to_string()))
    }

    // --- Watched directories ---

    /// Register a directory for capture. The path must be absolute.
    pub fn add_directory(&self, path: &Path, recursive: bool) -> Result<WatchedDirectory> {
        if !path.is_absolute() {
            return Err(Error::Config(format!(
                "watched directory path must be absolute: {}",
                path.display()
            )));
        }

        let now = Utc::now();
        let conn = self.lock_conn()?;
        // Re-adding a watched path is a no-op apart from the recursive flag.
        conn.execute(
            "INSERT INTO watched_directories (path, added_at, recursive)
             VALUES (?1, ?2, ?3)
             ON CONFLICT(path) DO UPDATE SET recursive = excluded.recursive",
            params![
                path.to_string_lossy(),
                now.to_rfc3339(),
                recursive as i64
            ],
        )?;

        let (id, added_at) = conn.query_row(
            "SELECT id, added_at FROM watched_directories WHERE path = ?1",
            params![path.to_string_lossy()],
            |row| Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?)),
        )?;

        Ok(WatchedDirectory {
            id,
            path: path.to_path_buf(),
            added_at: parse_ts(added_at),
            recursive,
        })
    }

    /// Unregister a directory. Returns false if it was not watched.
    pub fn remove_directory(&self, path: &Path) -> Result<bool> {
        let conn = self.lock_conn()?;
        let removed = conn.execute(
            "DELETE FROM watched_directories WHERE path = ?1",
            params![path.to_string_lossy()],
        )?;
        Ok(removed > 0)
    }

    /// All watched directories in insertion order.
    pub fn list_directories(&self) -> Result<Vec<WatchedDirectory>> {
        let conn = self.lock_conn()?;
        let mut stmt = conn.prepare(
            "SELECT id, path, added_at, recursive FROM watched_directories ORDER BY id",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, i64>(3)?,
            ))
        })?;

        let mut dirs = Vec::new();
        for row in rows {
            let (id, path, added_at, recursive) = row?;
            dirs.push(WatchedDirectory {
                id,
                path: PathBuf::from(path),
                added_at: parse_ts(added_at),
                recursive: recursive != 0,
            });
        }
        Ok(dirs)
    }

    // --- File fingerprints ---

    /// Fingerprint for a file path, if it was ever ingested.
    pub fn get_file_fingerprint(&self, file_path: &Path) -> Result<Option<FileFingerprint>> {
        let conn = self.lock_conn()?;
        let row = conn
            .query_row(
                "SELECT content_hash, mtime, last_ingested FROM file_state WHERE file_path = ?1",
                params![file_path.to_string_lossy()],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, i64>(1)?,
                        row.get::<_, String>(2)?,
                    ))
                },
            )
            .optional()?;

        Ok(row.map(|(content_hash, mtime, last_ingested)| FileFingerprint {
            file_path: file_path.to_path_buf(),
            content_hash,
            mtime,
            last_ingested: parse_ts(last_ingested),
        }))
    }

    /// Record the fingerprint for a successfully ingested file.
    pub fn upsert_file_fingerprint(
        &self,
        file_path: &Path,
        content_hash: &str,
        mtime: i64,
    ) -> Result<()> {
        let conn = self.lock_conn()?;
        conn.execute(
            "INSERT INTO file_state (file_path, content_hash, mtime, last_ingested)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(file_path) DO UPDATE SET
                 content_hash = excluded.content_hash,
                 mtime = excluded.mtime,
                 last_ingested = excluded.last_ingested",
            params![
                file_path.to_string_lossy(),
                content_hash,
                mtime,
                Utc::now().to_rfc3339()
            ],
        )?;
        Ok(())
    }

    /// Forget a file's fingerprint.
    pub fn remove_file_fingerprint(&self, file_path: &Path) -> Result<()> {
        let conn = self.lock_conn()?;
        conn.execute(
            "DELETE FROM file_state WHERE file_path = ?1",
            params![file_path.to_string_lossy()],
        )?;
        Ok(())
    }

    // --- Clipboard fingerprint ---

    /// Hash of the last ingested clipboard content (empty if none yet).
    pub fn get_last_clipboard_hash(&self) -> Result<String> {
        let conn = self.lock_conn()?;
        let hash = conn
            .query_row(
                "SELECT last_hash FROM clipboard_state WHERE id = 1",
                [],
                |row| row.get::<_, String>(0),
            )
            .optional()?;
        Ok(hash.unwrap_or_default())
    }

    /// Record the hash of newly ingested clipboard content.
    pub fn set_last_clipboard_hash(&self, hash: &str) -> Result<()> {
        let conn = self.lock_conn()?;
        conn.execute(
            "INSERT INTO clipboard_state (id, last_hash, last_ingested)
             VALUES (1, ?1, ?2)
             ON CONFLICT(id) DO UPDATE SET
                 last_hash = excluded.last_hash,
                 last_ingested = excluded.last_ingested",
            params![hash, Utc::now().to_rfc3339()],
        )?;
        Ok(())
    }

    // --- History cursor ---

    /// Line number up to which the history file has been processed.
    pub fn get_history_cursor(&self) -> Result<usize> {
        let conn = self.lock_conn()?;
        let line = conn
            .query_row(
                "SELECT last_line_num FROM history_state WHERE id = 1",
                [],
                |row| row.get::<_, i64>(0),
            )
            .optional()?;
        Ok(line.unwrap_or(0).max(0) as usize)
    }

    /// Advance (or reset) the history cursor.
    pub fn set_history_cursor(&self, line: usize) -> Result<()> {
        let conn = self.lock_conn()?;
        conn.execute(
            "INSERT INTO history_state (id, last_line_num, last_ingested)
             VALUES (1, ?1, ?2)
             ON CONFLICT(id) DO UPDATE SET
                 last_line_num = excluded.last_line_num,
                 last_ingested = excluded.last_ingested",
            params![line as i64, Utc::now().to_rfc3339()],
        )?;
        Ok(())
    }

    // --- Daemon record ---

    /// Record this daemon process as running.
    pub fn set_daemon_pid(&self, pid: i32) -> Result<()> {
        let conn = self.lock_conn()?;
        conn.execute(
            "INSERT INTO daemon_state (id, pid, started_at, status)
             VALUES (1, ?1, ?2, 'running')
             ON CONFLICT(id) DO UPDATE SET
                 pid = excluded.pid,
                 started_at = excluded.started_at,
                 status = 'running'",
            params![pid, Utc::now().to_rfc3339()],
        )?;
        Ok(())
    }

    /// PID of the recorded running daemon, if the record says running.
    pub fn get_daemon_pid(&self) -> Result<Option<i32>> {
        let conn = self.lock_conn()?;
        let pid = conn
            .query_row(
                "SELECT pid FROM daemon_state WHERE id = 1 AND status = 'running'",
                [],
                |row| row.get::<_, Option<i32>>(0),
            )
            .optional()?;
        Ok(pid.flatten())
    }

    /// Mark the daemon as stopped and drop the PID.
    pub fn clear_daemon_pid(&self) -> Result<()> {
        let conn = self.lock_conn()?;
        conn.execute(
            "UPDATE daemon_state SET pid = NULL, status = 'stopped' WHERE id = 1",
            [],
        )?;
        Ok(())
    }

    /// The raw daemon record, without staleness correction.
    ///
    /// Callers that need a truthful answer must corroborate the PID with
    /// a liveness probe (see the daemon module's status operation).
    pub fn get_daemon_record(&self) -> Result<DaemonRecord> {
        let conn = self.lock_conn()?;
        let row = conn
            .query_row(
                "SELECT pid, started_at, status FROM daemon_state WHERE id = 1",
                [],
                |row| {
                    Ok((
                        row.get::<_, Option<i32>>(0)?,
                        row.get::<_, Option<String>>(1)?,
                        row.get::<_, String>(2)?,
                    ))
                },
            )
            .optional()?;

        Ok(match row {
            Some((pid, started_at, status)) => DaemonRecord {
                pid,
                started_at: started_at.map(parse_ts),
                status,
            },
            None => DaemonRecord {
                pid: None,
                started_at: None,
                status: "stopped".to_string(),
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_directories_roundtrip_in_insertion_order() {
        let state = WatcherState::open_in_memory().unwrap();

        state.add_directory(Path::new("/tmp/b"), true).unwrap();
        state.add_directory(Path::new("/tmp/a"), false).unwrap();

        let dirs = state.list_directories().unwrap();
        assert_eq!(dirs.len(), 2);
        assert_eq!(dirs[0].path, PathBuf::from("/tmp/b"));
        assert!(dirs[0].recursive);
        assert_eq!(dirs[1].path, PathBuf::from("/tmp/a"));
        assert!(!dirs[1].recursive);

        assert!(state.remove_directory(Path::new("/tmp/b")).unwrap());
        assert!(!state.remove_directory(Path::new("/tmp/b")).unwrap());
        assert_eq!(state.list_directories().unwrap().len(), 1);
    }

    #[test]
    fn test_readding_a_directory_is_idempotent() {
        let state = WatcherState::open_in_memory().unwrap();
        let first = state.add_directory(Path::new("/tmp/x"), true).unwrap();
        let again = state.add_directory(Path::new("/tmp/x"), false).unwrap();

        // Same row; only the recursive flag moves.
        assert_eq!(first.id, again.id);
        let dirs = state.list_directories().unwrap();
        assert_eq!(dirs.len(), 1);
        assert!(!dirs[0].recursive);
    }

    #[test]
    fn test_relative_directory_is_rejected() {
        let state = WatcherState::open_in_memory().unwrap();
        assert!(state.add_directory(Path::new("relative/dir"), true).is_err());
    }

    #[test]
    fn test_file_fingerprint_upsert() {
        let state = WatcherState::open_in_memory().unwrap();
        let path = Path::new("/tmp/file.rs");

        assert!(state.get_file_fingerprint(path).unwrap().is_none());

        state.upsert_file_fingerprint(path, "hash-1", 100).unwrap();
        let fp = state.get_file_fingerprint(path).unwrap().unwrap();
        assert_eq!(fp.content_hash, "hash-1");
        assert_eq!(fp.mtime, 100);

        state.upsert_file_fingerprint(path, "hash-2", 200).unwrap();
        let fp = state.get_file_fingerprint(path).unwrap().unwrap();
        assert_eq!(fp.content_hash, "hash-2");
        assert_eq!(fp.mtime, 200);

        state.remove_file_fingerprint(path).unwrap();
        assert!(state.get_file_fingerprint(path).unwrap().is_none());
    }

    #[test]
    fn test_clipboard_singleton() {
        let state = WatcherState::open_in_memory().unwrap();
        assert_eq!(state.get_last_clipboard_hash().unwrap(), "");

        state.set_last_clipboard_hash("abc").unwrap();
        state.set_last_clipboard_hash("def").unwrap();
        assert_eq!(state.get_last_clipboard_hash().unwrap(), "def");
    }

    #[test]
    fn test_history_cursor_singleton() {
        let state = WatcherState::open_in_memory().unwrap();
        assert_eq!(state.get_history_cursor().unwrap(), 0);

        state.set_history_cursor(42).unwrap();
        assert_eq!(state.get_history_cursor().unwrap(), 42);

        // Truncation reset
        state.set_history_cursor(0).unwrap();
        assert_eq!(state.get_history_cursor().unwrap(), 0);
    }

    #[test]
    fn test_daemon_record_lifecycle() {
        let state = WatcherState::open_in_memory().unwrap();

        assert!(state.get_daemon_pid().unwrap().is_none());
        let record = state.get_daemon_record().unwrap();
        assert_eq!(record.status, "stopped");

        state.set_daemon_pid(4242).unwrap();
        assert_eq!(state.get_daemon_pid().unwrap(), Some(4242));
        let record = state.get_daemon_record().unwrap();
        assert_eq!(record.status, "running");
        assert!(record.started_at.is_some());

        state.clear_daemon_pid().unwrap();
        assert!(state.get_daemon_pid().unwrap().is_none());
        assert_eq!(state.get_daemon_record().unwrap().status, "stopped");
    }
}
