//! Core domain types for engram
//!
//! The capture subsystem normalizes everything it observes into a
//! [`Document`]: an immutable unit of content with a deterministic,
//! content-derived identity. The content store treats `add` as an
//! upsert keyed on that identity, which is the entire dedup contract:
//! submitting identical content twice is a no-op regardless of where
//! it came from.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::path::PathBuf;

/// Where a captured document originated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceType {
    /// A file under a watched directory
    File,
    /// Text captured from the OS clipboard
    Clipboard,
    /// A shell command from the history file
    Terminal,
    /// Explicitly submitted by the user
    Manual,
}

impl SourceType {
    /// Stable string form used in the content store and in tags.
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceType::File => "file",
            SourceType::Clipboard => "clipboard",
            SourceType::Terminal => "terminal",
            SourceType::Manual => "manual",
        }
    }
}

impl std::fmt::Display for SourceType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An immutable unit of captured content, destined for the content store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Document {
    /// Deterministic id: `doc_` + first 16 hex chars of the content hash
    pub id: String,
    /// The captured text
    pub content: String,
    /// Origin of the content
    pub source_type: SourceType,
    /// When the document was built
    pub timestamp: DateTime<Utc>,
    /// Originating file path, for file captures
    pub file_path: Option<PathBuf>,
    /// Originating file extension, for file captures
    pub file_extension: Option<String>,
    /// Ordered tags (first occurrence wins)
    pub tags: Vec<String>,
    /// Full sha256 hash of the content, hex encoded
    pub content_hash: String,
}

impl Document {
    /// Build a document from captured text.
    ///
    /// Identity is a pure function of `content`: documents with the same
    /// text always get the same id no matter the source metadata.
    pub fn new(content: impl Into<String>, source_type: SourceType, tags: Vec<String>) -> Self {
        let content = content.into();
        let hash = content_hash(&content);
        let id = format!("doc_{}", &hash[..16]);

        Self {
            id,
            content,
            source_type,
            timestamp: Utc::now(),
            file_path: None,
            file_extension: None,
            tags: dedup_tags(tags),
            content_hash: hash,
        }
    }

    /// Attach the originating file path (and derive its extension).
    pub fn with_file_path(mut self, path: PathBuf) -> Self {
        self.file_extension = path
            .extension()
            .map(|e| e.to_string_lossy().to_string())
            .filter(|e| !e.is_empty());
        self.file_path = Some(path);
        self
    }
}

/// SHA-256 hash of text content, hex encoded.
pub fn content_hash(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    hex::encode(hasher.finalize())
}

/// Keep first occurrence of each tag, preserving order.
fn dedup_tags(tags: Vec<String>) -> Vec<String> {
    let mut seen = std::collections::HashSet::new();
    tags.into_iter().filter(|t| seen.insert(t.clone())).collect()
}
