//! Content store contract and the local SQLite implementation
//!
//! The capture subsystem only needs `add` to be idempotent by document id;
//! indexing and similarity search live behind this boundary and are not
//! part of this crate. [`DocumentStore`] persists documents in their own
//! SQLite file so the watcher state database stays small and separable.

use crate::error::{Error, Result};
use crate::types::Document;
use rusqlite::{params, Connection};
use std::path::Path;
use std::sync::Mutex;

/// The contract collectors publish through.
///
/// `add` is idempotent by id: re-submitting a document with an id already
/// present is an upsert, not a duplicate. Failures propagate so the caller
/// can keep its fingerprint unchanged and retry on the next detection.
pub trait ContentStore: Send + Sync {
    /// Insert or update documents; returns the number submitted.
    fn add(&self, documents: &[Document]) -> Result<usize>;

    /// Delete documents by id; returns the number removed.
    fn delete(&self, ids: &[String]) -> Result<usize>;

    /// Total number of stored documents.
    fn count(&self) -> Result<i64>;
}

/// SQLite-backed document store.
pub struct DocumentStore {
    conn: Mutex<Connection>,
}

impl DocumentStore {
    /// Open or create a store at the given path.
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

        let store = Self {
            conn: Mutex::new(conn),
        };
        store.create_tables()?;
        Ok(store)
    }

    /// Open an in-memory store (for testing).
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.create_tables()?;
        Ok(store)
    }

    fn create_tables(&self) -> Result<()> {
        let conn = self.lock_conn()?;
        conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS documents (
                id             TEXT PRIMARY KEY,
                content        TEXT NOT NULL,
                source_type    TEXT NOT NULL,
                timestamp      TEXT NOT NULL,
                file_path      TEXT,
                file_extension TEXT,
                tags           TEXT NOT NULL DEFAULT '',
                content_hash   TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_documents_source_type
                ON documents(source_type);
            ",
        )?;
        Ok(())
    }

    fn lock_conn(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| Error::Store("document store lock poisoned".to_string()))
    }
}

impl ContentStore for DocumentStore {
    fn add(&self, documents: &[Document]) -> Result<usize> {
        let mut conn = self.lock_conn()?;
        let tx = conn.transaction()?;

        for doc in documents {
            tx.execute(
                "INSERT INTO documents
                     (id, content, source_type, timestamp, file_path, file_extension, tags, content_hash)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
                 ON CONFLICT(id) DO UPDATE SET
                     timestamp = excluded.timestamp,
                     file_path = excluded.file_path,
                     file_extension = excluded.file_extension,
                     tags = excluded.tags",
                params![
                    doc.id,
                    doc.content,
                    doc.source_type.as_str(),
                    doc.timestamp.to_rfc3339(),
                    doc.file_path.as_ref().map(|p| p.to_string_lossy().to_string()),
                    doc.file_extension,
                    doc.tags.join(","),
                    doc.content_hash,
                ],
            )?;
        }

        tx.commit()?;
        Ok(documents.len())
    }

    fn delete(&self, ids: &[String]) -> Result<usize> {
        let conn = self.lock_conn()?;
        let mut removed = 0;
        for id in ids {
            removed += conn.execute("DELETE FROM documents WHERE id = ?1", params![id])?;
        }
        Ok(removed)
    }

    fn count(&self) -> Result<i64> {
        let conn = self.lock_conn()?;
        let count = conn.query_row("SELECT COUNT(*) FROM documents", [], |row| row.get(0))?;
        Ok(count)
    }
}
