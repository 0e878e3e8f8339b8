//! Daemon lifecycle: start, stop, status, and the run loop itself
//!
//! The daemon records its PID in [`WatcherState`] while running. Start,
//! stop, and status all corroborate that record with an OS-level
//! liveness probe before trusting it, so a record left behind by a
//! crash is detected and cleared instead of blocking the next start.

use crate::config::Config;
use crate::error::{Error, Result};
use crate::security::SecretFilter;
use crate::state::WatcherState;
use crate::store::{ContentStore, DocumentStore};
use crate::watcher::{ClipboardCollector, FileCollector, HistoryCollector, StopSignal};
use chrono::{DateTime, Utc};
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Result of a stop request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopOutcome {
    /// A live daemon was signalled and has exited.
    Stopped { pid: i32, forced: bool },
    /// Nothing was running (including the stale-record case).
    NotRunning,
}

/// Point-in-time daemon status, corrected for stale records.
#[derive(Debug, Clone)]
pub struct DaemonStatus {
    pub running: bool,
    pub pid: Option<i32>,
    pub started_at: Option<DateTime<Utc>>,
    pub watched_directories: usize,
    /// Set when a stale record was found and cleared during this call.
    pub note: Option<String>,
}

/// True if a process with this PID exists right now.
///
/// EPERM means the process exists but belongs to someone else; only
/// ESRCH is proof of death, so any other error counts as alive. Probe
/// errs on the side of not starting a second daemon.
fn process_alive(pid: i32) -> bool {
    if pid <= 0 {
        return false;
    }
    let rc = unsafe { libc::kill(pid, 0) };
    if rc == 0 {
        return true;
    }
    std::io::Error::last_os_error().raw_os_error() != Some(libc::ESRCH)
}

fn send_signal(pid: i32, signal: libc::c_int) -> Result<()> {
    let rc = unsafe { libc::kill(pid, signal) };
    if rc == 0 || std::io::Error::last_os_error().raw_os_error() == Some(libc::ESRCH) {
        Ok(())
    } else {
        Err(Error::Daemon(format!(
            "failed to signal pid {}: {}",
            pid,
            std::io::Error::last_os_error()
        )))
    }
}

/// The in-process daemon: owns the three collectors and the shared
/// cancellation signal.
pub struct WatcherDaemon {
    state: Arc<WatcherState>,
    files: FileCollector,
    clipboard: ClipboardCollector,
    history: HistoryCollector,
    stop: StopSignal,
}

impl WatcherDaemon {
    /// Open the databases and wire up the collectors.
    pub fn new(config: &Config) -> Result<Self> {
        let state = Arc::new(WatcherState::open(&Config::state_db_path())?);
        let store: Arc<dyn ContentStore> =
            Arc::new(DocumentStore::open(&Config::store_db_path())?);

        let filter = if config.watcher.secret_filtering {
            Some(Arc::new(SecretFilter::new()?))
        } else {
            tracing::warn!("Secret filtering disabled by config");
            None
        };

        Ok(Self {
            files: FileCollector::new(Arc::clone(&state), Arc::clone(&store), &config.watcher),
            clipboard: ClipboardCollector::new(
                Arc::clone(&state),
                Arc::clone(&store),
                filter.clone(),
                &config.watcher,
            ),
            history: HistoryCollector::new(
                Arc::clone(&state),
                Arc::clone(&store),
                filter,
                &config.watcher,
            ),
            state,
            stop: StopSignal::new(),
        })
    }

    /// A handle that stops the daemon when triggered.
    pub fn stop_signal(&self) -> StopSignal {
        self.stop.clone()
    }

    /// Run until the stop signal fires. Records the PID on entry and
    /// clears it on exit, including the error path.
    ///
    /// `ready_file` is written once the collectors are running; the
    /// parent process of a background start polls for it.
    pub fn run(&mut self, ready_file: Option<&Path>) -> Result<()> {
        let pid = std::process::id() as i32;
        self.state.set_daemon_pid(pid)?;
        tracing::info!(pid, "Capture daemon starting");

        let result = self.run_inner(ready_file);

        // The record must not outlive the process even when a collector
        // failed to start.
        self.files.stop();
        self.clipboard.stop();
        self.history.stop();
        if let Err(e) = self.state.clear_daemon_pid() {
            tracing::error!(error = %e, "Failed to clear daemon record");
        }
        tracing::info!(pid, "Capture daemon stopped");
        result
    }

    fn run_inner(&mut self, ready_file: Option<&Path>) -> Result<()> {
        let signal = self.stop.clone();
        ctrlc::set_handler(move || signal.trigger())
            .map_err(|e| Error::Daemon(format!("failed to set signal handler: {}", e)))?;

        // Catch up on changes made while the daemon was down, before any
        // live events arrive.
        let summary = self.files.initial_scan()?;
        tracing::info!(
            ingested = summary.ingested,
            skipped = summary.skipped,
            "Initial scan complete"
        );

        self.files.start()?;
        self.clipboard.start();
        self.history.start();

        if let Some(path) = ready_file {
            std::fs::write(path, std::process::id().to_string())?;
        }

        while !self.stop.wait_timeout(Duration::from_secs(1)) {}
        Ok(())
    }
}

/// Start the daemon, idempotently.
///
/// With `foreground` set the daemon runs on the calling thread until
/// signalled. Otherwise a detached child process is spawned and this
/// call waits for its readiness file.
///
/// Two `start` calls racing between the liveness check and the PID
/// record can both spawn a daemon; the second record wins. Accepted:
/// starts come from one user's shell, not from automation.
pub fn start_daemon(config: &Config, foreground: bool) -> Result<i32> {
    let state = WatcherState::open(&Config::state_db_path())?;

    if let Some(pid) = state.get_daemon_pid()? {
        if process_alive(pid) {
            tracing::info!(pid, "Daemon already running");
            return Ok(pid);
        }
        tracing::warn!(pid, "Clearing stale daemon record");
        state.clear_daemon_pid()?;
    }
    drop(state);

    if foreground {
        let pid = std::process::id() as i32;
        WatcherDaemon::new(config)?.run(None)?;
        return Ok(pid);
    }

    spawn_background(config)
}

fn spawn_background(config: &Config) -> Result<i32> {
    let exe = std::env::current_exe()?;
    let ready_file = Config::state_dir().join(format!("ready.{}", std::process::id()));
    std::fs::create_dir_all(Config::state_dir())?;
    let _ = std::fs::remove_file(&ready_file);

    use std::os::unix::process::CommandExt;
    let mut child = std::process::Command::new(&exe)
        .args(["watch", "run", "--ready-file"])
        .arg(&ready_file)
        .stdin(std::process::Stdio::null())
        .stdout(std::process::Stdio::null())
        .stderr(std::process::Stdio::null())
        .process_group(0)
        .spawn()?;

    let pid = child.id() as i32;
    let deadline = Instant::now() + Duration::from_secs(config.watcher.startup_timeout_secs);

    loop {
        if ready_file.exists() {
            let _ = std::fs::remove_file(&ready_file);
            tracing::info!(pid, "Daemon started in background");
            return Ok(pid);
        }
        if let Some(status) = child.try_wait()? {
            return Err(Error::Daemon(format!(
                "daemon exited during startup with {}",
                status
            )));
        }
        if Instant::now() >= deadline {
            let _ = send_signal(pid, libc::SIGKILL);
            return Err(Error::Daemon(format!(
                "daemon did not become ready within {}s",
                config.watcher.startup_timeout_secs
            )));
        }
        std::thread::sleep(Duration::from_millis(100));
    }
}

/// Stop a running daemon: SIGTERM, a bounded wait, then SIGKILL.
pub fn stop_daemon(config: &Config) -> Result<StopOutcome> {
    let state = WatcherState::open(&Config::state_db_path())?;
    stop_from(&state, Duration::from_secs(config.watcher.stop_timeout_secs))
}

fn stop_from(state: &WatcherState, timeout: Duration) -> Result<StopOutcome> {
    let Some(pid) = state.get_daemon_pid()? else {
        return Ok(StopOutcome::NotRunning);
    };

    if !process_alive(pid) {
        tracing::warn!(pid, "Clearing stale daemon record");
        state.clear_daemon_pid()?;
        return Ok(StopOutcome::NotRunning);
    }

    tracing::info!(pid, "Stopping daemon");
    send_signal(pid, libc::SIGTERM)?;

    let deadline = Instant::now() + timeout;
    while process_alive(pid) {
        if Instant::now() >= deadline {
            tracing::warn!(pid, "Daemon did not exit in time, sending SIGKILL");
            send_signal(pid, libc::SIGKILL)?;
            // A SIGKILLed daemon never reaches its own cleanup.
            state.clear_daemon_pid()?;
            return Ok(StopOutcome::Stopped { pid, forced: true });
        }
        std::thread::sleep(Duration::from_millis(100));
    }

    // The daemon clears its own record on the way out, but make sure.
    state.clear_daemon_pid()?;
    Ok(StopOutcome::Stopped { pid, forced: false })
}

/// Report daemon status, clearing a stale record if one is found.
pub fn daemon_status(_config: &Config) -> Result<DaemonStatus> {
    let state = WatcherState::open(&Config::state_db_path())?;
    status_from(&state)
}

fn status_from(state: &WatcherState) -> Result<DaemonStatus> {
    let record = state.get_daemon_record()?;
    let watched = state.list_directories()?.len();

    let (running, pid, note) = match record.pid {
        Some(pid) if record.status == "running" && process_alive(pid) => (true, Some(pid), None),
        Some(pid) if record.status == "running" => {
            state.clear_daemon_pid()?;
            (
                false,
                None,
                Some(format!("stale record for pid {} cleared", pid)),
            )
        }
        _ => (false, None, None),
    };

    Ok(DaemonStatus {
        running,
        pid,
        started_at: if running { record.started_at } else { None },
        watched_directories: watched,
        note,
    })
}
