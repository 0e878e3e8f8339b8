//! Error types for engram-core

use thiserror::Error;

/// Main error type for the engram-core library
#[derive(Error, Debug)]
pub enum Error {
    /// Database error
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// Content store error
    #[error("content store error: {0}")]
    Store(String),

    /// Filesystem watch error
    #[error("watch error: {0}")]
    Watch(#[from] notify::Error),

    /// Daemon lifecycle error
    #[error("daemon error: {0}")]
    Daemon(String),
}

/// Result type alias for engram-core
pub type Result<T> = std::result::Result<T, Error>;
