//! Shell history capture
//!
//! Tails the user's shell history file with a persisted line cursor, so
//! commands are ingested exactly once across daemon restarts. Supports
//! zsh (including the extended-history timestamp format) and bash.

use crate::config::WatcherConfig;
use crate::error::Result;
use crate::security::SecretFilter;
use crate::state::WatcherState;
use crate::store::ContentStore;
use crate::types::{Document, SourceType};
use crate::watcher::{join_with_timeout, StopSignal};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

/// Shells whose history format we know how to read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Shell {
    Zsh,
    Bash,
}

impl Shell {
    /// Detect the user's shell from `$SHELL`. Returns None for shells we
    /// don't support (fish keeps history in a different format entirely).
    pub fn detect() -> Option<Self> {
        let shell = std::env::var("SHELL").ok()?;
        let name = Path::new(&shell).file_name()?.to_str()?;
        match name {
            "zsh" => Some(Shell::Zsh),
            "bash" => Some(Shell::Bash),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Shell::Zsh => "zsh",
            Shell::Bash => "bash",
        }
    }

    /// Default history file location for this shell.
    pub fn history_file(&self) -> PathBuf {
        let home = crate::config::home_dir();
        match self {
            Shell::Zsh => home.join(".zsh_history"),
            Shell::Bash => home.join(".bash_history"),
        }
    }
}

/// Strip the zsh extended-history prefix (`: 1700000000:0;cmd`) if present.
/// Bash and plain zsh lines pass through unchanged.
fn strip_extended_prefix(line: &str) -> &str {
    if let Some(rest) = line.strip_prefix(": ") {
        if let Some((meta, cmd)) = rest.split_once(';') {
            let mut parts = meta.splitn(2, ':');
            let epoch_ok = parts
                .next()
                .map(|s| !s.is_empty() && s.chars().all(|c| c.is_ascii_digit()))
                .unwrap_or(false);
            if epoch_ok {
                return cmd;
            }
        }
    }
    line
}

/// The base command of a line: the last path segment of its first
/// whitespace-separated token, so `/usr/bin/ls -la` skips like `ls`.
fn base_command(command: &str) -> &str {
    let first = command.split_whitespace().next().unwrap_or("");
    first.rsplit('/').next().unwrap_or(first)
}

/// Cursor-based history ingestion, separated from the polling thread so
/// it can be exercised directly against a fixture file.
pub struct HistoryIngest {
    state: Arc<WatcherState>,
    store: Arc<dyn ContentStore>,
    filter: Option<Arc<SecretFilter>>,
    shell: Option<Shell>,
    history_file: Option<PathBuf>,
    min_command_len: usize,
    batch_size: usize,
    skip_commands: Vec<String>,
}

impl HistoryIngest {
    /// Accept or reject one raw history line. Returns the cleaned command
    /// text if it should be ingested.
    fn parse_history_line<'a>(&self, line: &'a str) -> Option<&'a str> {
        let command = strip_extended_prefix(line).trim();
        if command.len() < self.min_command_len {
            return None;
        }
        let base = base_command(command);
        if self.skip_commands.iter().any(|s| s == base) {
            return None;
        }
        if let Some(filter) = &self.filter {
            let scan = filter.scan(command);
            if scan.is_sensitive() {
                tracing::info!(
                    categories = ?scan.matched,
                    "Command blocked by secret filter"
                );
                return None;
            }
        }
        Some(command)
    }

    /// Read new history lines past the cursor, ingest the acceptable ones,
    /// and advance the cursor. Returns how many documents were ingested.
    pub fn poll_once(&self) -> Result<usize> {
        let Some(history_file) = &self.history_file else {
            return Ok(0);
        };
        if !history_file.exists() {
            return Ok(0);
        }

        let bytes = std::fs::read(history_file)?;
        let text = String::from_utf8_lossy(&bytes);
        let lines: Vec<&str> = text.lines().collect();

        let mut cursor = self.state.get_history_cursor()?;
        if cursor > lines.len() {
            // History file was truncated or rotated; start over.
            tracing::info!(
                cursor,
                lines = lines.len(),
                "History file shrank, resetting cursor"
            );
            cursor = 0;
        }

        let shell_name = self.shell.map(|s| s.name()).unwrap_or("shell");
        let docs: Vec<Document> = lines[cursor..]
            .iter()
            .filter_map(|line| self.parse_history_line(line))
            .map(|cmd| {
                Document::new(
                    cmd,
                    SourceType::Terminal,
                    vec![
                        "terminal".to_string(),
                        shell_name.to_string(),
                        "auto-captured".to_string(),
                    ],
                )
            })
            .collect();

        let mut ingested = 0;
        for batch in docs.chunks(self.batch_size) {
            // A store failure leaves the cursor where it was, so the same
            // lines are retried on the next poll.
            ingested += self.store.add(batch)?;
        }

        // Rejected lines are consumed too; they are never reconsidered.
        self.state.set_history_cursor(lines.len())?;

        if ingested > 0 {
            tracing::info!(count = ingested, "Ingested shell commands");
        }
        Ok(ingested)
    }
}

/// Polls a shell history file from a worker thread.
pub struct HistoryCollector {
    ingest: Arc<HistoryIngest>,
    poll_interval: Duration,
    stop: StopSignal,
    worker: Option<JoinHandle<()>>,
}

impl HistoryCollector {
    /// Build a collector. An unsupported shell produces an inert collector;
    /// the rest of the daemon is unaffected.
    pub fn new(
        state: Arc<WatcherState>,
        store: Arc<dyn ContentStore>,
        filter: Option<Arc<SecretFilter>>,
        cfg: &WatcherConfig,
    ) -> Self {
        let shell = Shell::detect();
        let history_file = cfg
            .history_file
            .clone()
            .or_else(|| shell.map(|s| s.history_file()));

        if history_file.is_none() {
            tracing::warn!("Unsupported shell, history collector disabled");
        }

        Self {
            ingest: Arc::new(HistoryIngest {
                state,
                store,
                filter,
                shell,
                history_file,
                min_command_len: cfg.min_command_len,
                // chunks() panics on zero; a misconfigured batch size
                // degrades to one document per call.
                batch_size: cfg.history_batch_size.max(1),
                skip_commands: cfg.skip_commands.clone(),
            }),
            poll_interval: Duration::from_secs(cfg.history_poll_secs),
            stop: StopSignal::new(),
            worker: None,
        }
    }

    /// Whether this collector can do anything at all.
    pub fn is_enabled(&self) -> bool {
        self.ingest.history_file.is_some()
    }

    /// The cursor pipeline, for direct use and tests.
    pub fn ingest(&self) -> &Arc<HistoryIngest> {
        &self.ingest
    }

    /// Start the poll worker. Inert collectors do not spawn a thread.
    pub fn start(&mut self) {
        if !self.is_enabled() {
            return;
        }

        self.stop = StopSignal::new();
        let stop = self.stop.clone();
        let ingest = Arc::clone(&self.ingest);
        let interval = self.poll_interval;

        self.worker = Some(std::thread::spawn(move || {
            while !stop.is_triggered() {
                if let Err(e) = ingest.poll_once() {
                    tracing::error!(error = %e, "Error in history poll");
                }
                if stop.wait_timeout(interval) {
                    break;
                }
            }
        }));
        tracing::info!(
            file = %self.ingest.history_file.as_deref().unwrap_or(Path::new("")).display(),
            "History collector started"
        );
    }

    /// Signal the worker and wait a bounded time for it to finish.
    pub fn stop(&mut self) {
        self.stop.trigger();
        if let Some(worker) = self.worker.take() {
            join_with_timeout(worker, Duration::from_secs(10), "history-collector");
        }
        tracing::info!("History collector stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::DocumentStore;

    fn tmpdir() -> tempfile::TempDir {
        tempfile::Builder::new()
            .prefix("engram-test")
            .tempdir()
            .unwrap()
    }

    fn ingest(
        dir: &Path,
        shell: Shell,
        filtering: bool,
    ) -> (HistoryIngest, Arc<DocumentStore>, PathBuf) {
        let store = Arc::new(DocumentStore::open_in_memory().unwrap());
        let history = dir.join("history");
        let cfg = WatcherConfig::default();
        let ingest = HistoryIngest {
            state: Arc::new(WatcherState::open_in_memory().unwrap()),
            store: Arc::clone(&store) as Arc<dyn ContentStore>,
            filter: filtering.then(|| Arc::new(SecretFilter::new().unwrap())),
            shell: Some(shell),
            history_file: Some(history.clone()),
            min_command_len: cfg.min_command_len,
            batch_size: cfg.history_batch_size,
            skip_commands: cfg.skip_commands.clone(),
        };
        (ingest, store, history)
    }

    #[test]
    fn test_strip_extended_prefix() {
        assert_eq!(
            strip_extended_prefix(": 1700000000:0;git push origin main"),
            "git push origin main"
        );
        assert_eq!(strip_extended_prefix("git push"), "git push");
        // Not a valid extended prefix; leave as-is.
        assert_eq!(strip_extended_prefix(": hello;world"), ": hello;world");
    }

    #[test]
    fn test_base_command_strips_path() {
        assert_eq!(base_command("/usr/bin/ls -la"), "ls");
        assert_eq!(base_command("git status"), "git");
        assert_eq!(base_command(""), "");
    }

    #[test]
    fn test_skip_list_and_length_gates() {
        let dir = tmpdir();
        let (ingest, store, history) = ingest(dir.path(), Shell::Bash, false);
        std::fs::write(
            &history,
            "ls -la\ncd /home\ncargo build --release\ngit\n/usr/bin/ls /tmp\n",
        )
        .unwrap();

        // Only `cargo build --release` survives: ls/cd are skip-listed
        // (with or without a path prefix), `git` is under min length.
        assert_eq!(ingest.poll_once().unwrap(), 1);
        assert_eq!(store.count().unwrap(), 1);
    }

    #[test]
    fn test_cursor_persists_across_polls() {
        let dir = tmpdir();
        let (ingest, store, history) = ingest(dir.path(), Shell::Bash, false);
        std::fs::write(&history, "cargo test -p engram-core\n").unwrap();

        assert_eq!(ingest.poll_once().unwrap(), 1);
        // Same file, no new lines: nothing happens.
        assert_eq!(ingest.poll_once().unwrap(), 0);
        assert_eq!(store.count().unwrap(), 1);

        // Appending produces exactly the new command.
        let mut contents = std::fs::read_to_string(&history).unwrap();
        contents.push_str("cargo clippy --all-targets\n");
        std::fs::write(&history, contents).unwrap();
        assert_eq!(ingest.poll_once().unwrap(), 1);
        assert_eq!(store.count().unwrap(), 2);
    }

    #[test]
    fn test_rejected_lines_are_not_reprocessed() {
        let dir = tmpdir();
        let (ingest, store, history) = ingest(dir.path(), Shell::Bash, false);
        std::fs::write(&history, "ls -la\n").unwrap();

        assert_eq!(ingest.poll_once().unwrap(), 0);
        // The rejected line was still consumed by the cursor.
        assert_eq!(ingest.poll_once().unwrap(), 0);
        assert_eq!(store.count().unwrap(), 0);
    }

    #[test]
    fn test_truncation_resets_cursor() {
        let dir = tmpdir();
        let (ingest, store, history) = ingest(dir.path(), Shell::Zsh, false);
        std::fs::write(
            &history,
            ": 1700000000:0;cargo fmt --check\n: 1700000001:0;cargo doc --no-deps\n",
        )
        .unwrap();
        assert_eq!(ingest.poll_once().unwrap(), 2);

        // Rotate the file down to a single fresh line.
        std::fs::write(&history, ": 1700000002:0;cargo run --bin engram\n").unwrap();
        assert_eq!(ingest.poll_once().unwrap(), 1);
        assert_eq!(store.count().unwrap(), 3);
    }

    #[test]
    fn test_secret_commands_are_blocked() {
        let dir = tmpdir();
        let (ingest, store, history) = ingest(dir.path(), Shell::Bash, true);
        std::fs::write(
            &history,
            "export API_KEY=abcdefghijklmnopqrstuvwxyz123456\ncargo build --release\n",
        )
        .unwrap();

        assert_eq!(ingest.poll_once().unwrap(), 1);
        assert_eq!(store.count().unwrap(), 1);
    }

    #[test]
    fn test_zero_batch_size_is_clamped() {
        let dir = tmpdir();
        let history = dir.path().join("history");
        std::fs::write(&history, "cargo build --release\ncargo test --workspace\n").unwrap();

        let store = Arc::new(DocumentStore::open_in_memory().unwrap());
        let cfg = WatcherConfig {
            history_batch_size: 0,
            history_file: Some(history),
            ..WatcherConfig::default()
        };
        let collector = HistoryCollector::new(
            Arc::new(WatcherState::open_in_memory().unwrap()),
            Arc::clone(&store) as Arc<dyn ContentStore>,
            None,
            &cfg,
        );

        assert_eq!(collector.ingest().poll_once().unwrap(), 2);
        assert_eq!(store.count().unwrap(), 2);
    }

    #[test]
    fn test_missing_history_file_is_a_noop() {
        let dir = tmpdir();
        let (ingest, store, _) = ingest(dir.path(), Shell::Bash, false);
        assert_eq!(ingest.poll_once().unwrap(), 0);
        assert_eq!(store.count().unwrap(), 0);
    }
}
