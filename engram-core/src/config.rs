//! Configuration loading and management
//!
//! Configuration is loaded from `~/.config/engram/config.toml` once at
//! process start and passed by reference into every component. There are
//! no ambient configuration globals.
//!
//! This module follows the XDG Base Directory Specification:
//! - Config: `$XDG_CONFIG_HOME/engram/` (~/.config/engram/)
//! - Data: `$XDG_DATA_HOME/engram/` (~/.local/share/engram/)
//! - State/Logs: `$XDG_STATE_HOME/engram/` (~/.local/state/engram/)

use crate::error::{Error, Result};
use serde::Deserialize;
use std::path::PathBuf;

/// Returns a best-effort home directory path.
pub(crate) fn home_dir() -> PathBuf {
    std::env::var_os("HOME")
        .map(PathBuf::from)
        .or_else(dirs::home_dir)
        .unwrap_or_else(|| PathBuf::from("."))
}

/// Returns XDG_CONFIG_HOME or ~/.config
fn xdg_config_home() -> PathBuf {
    std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| home_dir().join(".config"))
}

/// Returns XDG_DATA_HOME or ~/.local/share
fn xdg_data_home() -> PathBuf {
    std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| home_dir().join(".local/share"))
}

/// Returns XDG_STATE_HOME or ~/.local/state
fn xdg_state_home() -> PathBuf {
    std::env::var("XDG_STATE_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| home_dir().join(".local/state"))
}

/// Main configuration struct
#[derive(Debug, Deserialize, Default, Clone)]
pub struct Config {
    /// Capture daemon configuration
    #[serde(default)]
    pub watcher: WatcherConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Capture daemon configuration
#[derive(Debug, Deserialize, Clone)]
pub struct WatcherConfig {
    /// Seconds within which repeated events for the same file are ignored
    #[serde(default = "default_debounce_secs")]
    pub debounce_secs: u64,

    /// Clipboard poll interval in seconds
    #[serde(default = "default_clipboard_poll_secs")]
    pub clipboard_poll_secs: u64,

    /// Shell history poll interval in seconds
    #[serde(default = "default_history_poll_secs")]
    pub history_poll_secs: u64,

    /// Minimum clipboard text length (after trimming) worth capturing
    #[serde(default = "default_min_clipboard_len")]
    pub min_clipboard_len: usize,

    /// Maximum clipboard text length accepted
    #[serde(default = "default_max_clipboard_len")]
    pub max_clipboard_len: usize,

    /// Minimum shell command length worth capturing
    #[serde(default = "default_min_command_len")]
    pub min_command_len: usize,

    /// Documents per content-store call when batching history lines
    #[serde(default = "default_history_batch_size")]
    pub history_batch_size: usize,

    /// Maximum file size in bytes the file collector will read
    #[serde(default = "default_max_file_size_bytes")]
    pub max_file_size_bytes: u64,

    /// File extensions (lowercase, without the dot) the file collector
    /// ingests; matching is case-insensitive
    #[serde(default = "default_supported_extensions")]
    pub supported_extensions: Vec<String>,

    /// Commands whose base name is never captured from shell history.
    ///
    /// Tuned by observation, not derived; override it in config.toml.
    #[serde(default = "default_skip_commands")]
    pub skip_commands: Vec<String>,

    /// Run captured clipboard/history text through the secret filter
    #[serde(default = "default_secret_filtering")]
    pub secret_filtering: bool,

    /// Override the shell history file path (defaults to the active
    /// shell's well-known location)
    #[serde(default)]
    pub history_file: Option<PathBuf>,

    /// Seconds to wait for a background daemon to signal readiness
    #[serde(default = "default_startup_timeout_secs")]
    pub startup_timeout_secs: u64,

    /// Seconds to wait for graceful shutdown before sending SIGKILL
    #[serde(default = "default_stop_timeout_secs")]
    pub stop_timeout_secs: u64,
}

impl Default for WatcherConfig {
    fn default() -> Self {
        Self {
            debounce_secs: default_debounce_secs(),
            clipboard_poll_secs: default_clipboard_poll_secs(),
            history_poll_secs: default_history_poll_secs(),
            min_clipboard_len: default_min_clipboard_len(),
            max_clipboard_len: default_max_clipboard_len(),
            min_command_len: default_min_command_len(),
            history_batch_size: default_history_batch_size(),
            max_file_size_bytes: default_max_file_size_bytes(),
            supported_extensions: default_supported_extensions(),
            skip_commands: default_skip_commands(),
            secret_filtering: default_secret_filtering(),
            history_file: None,
            startup_timeout_secs: default_startup_timeout_secs(),
            stop_timeout_secs: default_stop_timeout_secs(),
        }
    }
}

fn default_debounce_secs() -> u64 {
    5
}

fn default_clipboard_poll_secs() -> u64 {
    5
}

fn default_history_poll_secs() -> u64 {
    30
}

fn default_min_clipboard_len() -> usize {
    10
}

fn default_max_clipboard_len() -> usize {
    50_000
}

fn default_min_command_len() -> usize {
    5
}

fn default_history_batch_size() -> usize {
    20
}

fn default_max_file_size_bytes() -> u64 {
    1_048_576
}

fn default_supported_extensions() -> Vec<String> {
    [
        "py", "md", "txt", "js", "ts", "jsx", "tsx", "json", "yaml", "yml", "toml", "sh", "bash",
        "css", "html", "sql", "rs", "go", "java",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

fn default_skip_commands() -> Vec<String> {
    [
        "ls", "cd", "pwd", "clear", "exit", "which", "echo", "cat", "less", "more", "head",
        "tail", "man",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

fn default_secret_filtering() -> bool {
    true
}

fn default_startup_timeout_secs() -> u64 {
    10
}

fn default_stop_timeout_secs() -> u64 {
    10
}

/// Logging configuration
#[derive(Debug, Deserialize, Clone)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Config {
    /// Load configuration from the default path
    pub fn load() -> Result<Self> {
        let config_path = Self::config_path();

        if !config_path.exists() {
            tracing::info!("No config file found at {:?}, using defaults", config_path);
            return Ok(Config::default());
        }

        Self::load_from(&config_path)
    }

    /// Load configuration from a specific path
    pub fn load_from(path: &PathBuf) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("failed to read config file {:?}: {}", path, e)))?;

        let config: Config = toml::from_str(&content)
            .map_err(|e| Error::Config(format!("failed to parse config: {}", e)))?;

        Ok(config)
    }

    /// Returns the default config file path
    ///
    /// `$XDG_CONFIG_HOME/engram/config.toml` (~/.config/engram/config.toml)
    pub fn config_path() -> PathBuf {
        xdg_config_home().join("engram").join("config.toml")
    }

    /// Returns the data directory path (for SQLite databases)
    ///
    /// `$XDG_DATA_HOME/engram/` (~/.local/share/engram/)
    pub fn data_dir() -> PathBuf {
        xdg_data_home().join("engram")
    }

    /// Returns the state directory path (for logs and runtime files)
    ///
    /// `$XDG_STATE_HOME/engram/` (~/.local/state/engram/)
    pub fn state_dir() -> PathBuf {
        xdg_state_home().join("engram")
    }

    /// Returns the watcher state database path
    ///
    /// `$XDG_DATA_HOME/engram/watcher.db` (~/.local/share/engram/watcher.db)
    pub fn state_db_path() -> PathBuf {
        Self::data_dir().join("watcher.db")
    }

    /// Returns the content store database path
    ///
    /// `$XDG_DATA_HOME/engram/documents.db` (~/.local/share/engram/documents.db)
    pub fn store_db_path() -> PathBuf {
        Self::data_dir().join("documents.db")
    }

    /// Returns the log file path
    ///
    /// `$XDG_STATE_HOME/engram/engram.log` (~/.local/state/engram/engram.log)
    pub fn log_path() -> PathBuf {
        Self::state_dir().join("engram.log")
    }

    /// Ensure XDG base directory environment variables are set.
    ///
    /// This is mainly for CLI binaries that want explicit, stable path behavior
    /// before invoking other components that read these env vars.
    pub fn ensure_xdg_env() {
        let home = home_dir();

        if std::env::var("XDG_DATA_HOME").is_err() {
            std::env::set_var("XDG_DATA_HOME", home.join(".local/share"));
        }

        if std::env::var("XDG_STATE_HOME").is_err() {
            std::env::set_var("XDG_STATE_HOME", home.join(".local/state"));
        }

        if std::env::var("XDG_CONFIG_HOME").is_err() {
            std::env::set_var("XDG_CONFIG_HOME", home.join(".config"));
        }
    }
}
