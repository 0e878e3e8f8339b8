//! # engram-core
//!
//! Core library for engram - a background capture daemon for personal
//! activity.
//!
//! This library provides:
//! - A capture daemon with file, clipboard, and shell-history collectors
//! - Durable daemon state (checkpoints, fingerprints, PID record) in SQLite
//! - A content-addressed document store with idempotent writes
//! - Regex-based secret filtering for captured text
//! - Configuration management and logging infrastructure
//!
//! ## Architecture
//!
//! Three collectors run on independent workers against one shared
//! [`WatcherState`]: the file collector reacts to filesystem events and
//! runs a catch-up scan at startup, while the clipboard and history
//! collectors poll on fixed intervals. Every accepted observation
//! becomes a [`Document`] whose id is derived from its content, so
//! re-submitting the same content is a no-op at the store.
//!
//! ## Example
//!
//! ```rust,no_run
//! use engram_core::{Config, WatcherDaemon};
//!
//! let config = Config::load().expect("failed to load config");
//! let mut daemon = WatcherDaemon::new(&config).expect("failed to build daemon");
//! daemon.run(None).expect("daemon failed");
//! ```

// Re-export commonly used items at the crate root
pub use config::Config;
pub use error::{Error, Result};
pub use security::SecretFilter;
pub use state::WatcherState;
pub use store::{ContentStore, DocumentStore};
pub use types::{Document, SourceType};
pub use watcher::WatcherDaemon;

// Public modules
pub mod config;
pub mod error;
pub mod logging;
pub mod security;
pub mod state;
pub mod store;
pub mod types;
pub mod watcher;
