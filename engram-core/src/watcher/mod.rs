//! Background capture subsystem
//!
//! A long-running daemon coordinates three independently scheduled
//! collectors against one shared durable state:
//!
//! ```text
//! ┌────────────────┐  events   ┌──────────────┐
//! │ FileCollector  │──────────►│              │
//! ├────────────────┤   poll    │ WatcherState │──── fingerprints/cursors
//! │ ClipboardColl. │──────────►│   (SQLite)   │
//! ├────────────────┤   poll    │              │
//! │ HistoryColl.   │──────────►└──────────────┘
//! └───────┬────────┘
//!         │ Documents
//!         ▼
//!   ContentStore (idempotent add)
//! ```
//!
//! Each collector runs on its own worker (the file collector rides the
//! notification library's thread), checks a shared cancellation signal at
//! every wait boundary, and is joined with a bounded deadline during
//! shutdown. Collectors operate on disjoint state keys, so no cross-
//! collector ordering is needed.

pub mod clipboard;
pub mod daemon;
pub mod files;
pub mod history;

pub use clipboard::ClipboardCollector;
pub use daemon::{daemon_status, start_daemon, stop_daemon, DaemonStatus, StopOutcome, WatcherDaemon};
pub use files::{FileCollector, ScanSummary};
pub use history::{HistoryCollector, Shell};

use std::sync::{Arc, Condvar, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

/// Cooperative cancellation signal shared by every capture worker.
///
/// Poll loops suspend on [`StopSignal::wait_timeout`], which returns
/// early when [`StopSignal::trigger`] fires, so shutdown latency is
/// bounded by wait granularity rather than the full poll interval.
/// There is no forced interruption: an in-flight unit of work always
/// finishes before its loop observes the signal.
#[derive(Clone, Default)]
pub struct StopSignal {
    inner: Arc<(Mutex<bool>, Condvar)>,
}

impl StopSignal {
    /// Fresh, untriggered signal.
    pub fn new() -> Self {
        Self::default()
    }

    /// Flip the signal; wakes every waiter.
    pub fn trigger(&self) {
        let (lock, cvar) = &*self.inner;
        if let Ok(mut stopped) = lock.lock() {
            *stopped = true;
        }
        cvar.notify_all();
    }

    /// True once triggered.
    pub fn is_triggered(&self) -> bool {
        let (lock, _) = &*self.inner;
        lock.lock().map(|stopped| *stopped).unwrap_or(true)
    }

    /// Block for up to `timeout`, returning true if the signal fired.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let (lock, cvar) = &*self.inner;
        let Ok(mut stopped) = lock.lock() else {
            return true;
        };

        let deadline = Instant::now() + timeout;
        while !*stopped {
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            match cvar.wait_timeout(stopped, deadline - now) {
                Ok((guard, _)) => stopped = guard,
                Err(_) => return true,
            }
        }
        true
    }
}

/// Join a worker thread, giving up after `timeout`.
///
/// Workers are daemon-scoped; an unresponsive one is abandoned rather
/// than blocking shutdown forever.
pub(crate) fn join_with_timeout(handle: JoinHandle<()>, timeout: Duration, name: &str) {
    let deadline = Instant::now() + timeout;
    while !handle.is_finished() {
        if Instant::now() >= deadline {
            tracing::warn!(worker = name, "Worker did not stop within timeout, abandoning");
            return;
        }
        std::thread::sleep(Duration::from_millis(20));
    }
    if handle.join().is_err() {
        tracing::warn!(worker = name, "Worker panicked");
    }
}
