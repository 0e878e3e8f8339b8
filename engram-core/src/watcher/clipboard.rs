//! Clipboard capture
//!
//! Polls the OS clipboard on a fixed interval from its own worker. A
//! platform without a usable clipboard disables the collector cleanly
//! instead of crashing the daemon. At most one document is emitted per
//! distinct clipboard value, enforced by the persisted fingerprint.

use crate::config::WatcherConfig;
use crate::error::Result;
use crate::security::SecretFilter;
use crate::state::WatcherState;
use crate::store::ContentStore;
use crate::types::{content_hash, Document, SourceType};
use crate::watcher::{join_with_timeout, StopSignal};
use cli_clipboard::{ClipboardContext, ClipboardProvider};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

/// The decision pipeline, separated from the polling thread so it can
/// be exercised directly with injected text.
pub struct ClipboardIngest {
    state: Arc<WatcherState>,
    store: Arc<dyn ContentStore>,
    filter: Option<Arc<SecretFilter>>,
    min_len: usize,
    max_len: usize,
}

impl ClipboardIngest {
    /// Run one clipboard observation through the filters. Returns true
    /// if a document was submitted.
    pub fn check_and_ingest(&self, text: &str) -> Result<bool> {
        // Max length applies to the raw text, min length to the trimmed text.
        if text.len() > self.max_len {
            return Ok(false);
        }
        let trimmed = text.trim();
        if trimmed.len() < self.min_len {
            return Ok(false);
        }

        let hash = content_hash(trimmed);
        if hash == self.state.get_last_clipboard_hash()? {
            return Ok(false);
        }

        if let Some(filter) = &self.filter {
            let scan = filter.scan(trimmed);
            if scan.is_sensitive() {
                // Category names only; the matched text never reaches the log.
                tracing::info!(
                    categories = ?scan.matched,
                    "Clipboard content blocked by secret filter"
                );
                return Ok(false);
            }
        }

        let doc = Document::new(
            trimmed,
            SourceType::Clipboard,
            vec!["clipboard".to_string(), "auto-captured".to_string()],
        );
        self.store.add(std::slice::from_ref(&doc))?;
        self.state.set_last_clipboard_hash(&hash)?;

        tracing::info!(chars = trimmed.len(), "Ingested clipboard content");
        Ok(true)
    }
}

/// Polls the clipboard on a dedicated worker thread.
pub struct ClipboardCollector {
    ingest: Arc<ClipboardIngest>,
    poll_interval: Duration,
    stop: StopSignal,
    worker: Option<JoinHandle<()>>,
}

impl ClipboardCollector {
    /// Build a collector; `filter` is optional per the secret-filter contract.
    pub fn new(
        state: Arc<WatcherState>,
        store: Arc<dyn ContentStore>,
        filter: Option<Arc<SecretFilter>>,
        cfg: &WatcherConfig,
    ) -> Self {
        Self {
            ingest: Arc::new(ClipboardIngest {
                state,
                store,
                filter,
                min_len: cfg.min_clipboard_len,
                max_len: cfg.max_clipboard_len,
            }),
            poll_interval: Duration::from_secs(cfg.clipboard_poll_secs),
            stop: StopSignal::new(),
            worker: None,
        }
    }

    /// The decision pipeline, for direct use and tests.
    pub fn ingest(&self) -> &Arc<ClipboardIngest> {
        &self.ingest
    }

    /// Start the poll worker.
    pub fn start(&mut self) {
        self.stop = StopSignal::new();
        let stop = self.stop.clone();
        let ingest = Arc::clone(&self.ingest);
        let interval = self.poll_interval;

        self.worker = Some(std::thread::spawn(move || {
            poll_loop(ingest, stop, interval)
        }));
        tracing::info!("Clipboard collector started");
    }

    /// Signal the worker and wait a bounded time for it to finish.
    pub fn stop(&mut self) {
        self.stop.trigger();
        if let Some(worker) = self.worker.take() {
            join_with_timeout(worker, Duration::from_secs(10), "clipboard-collector");
        }
        tracing::info!("Clipboard collector stopped");
    }
}

fn poll_loop(ingest: Arc<ClipboardIngest>, stop: StopSignal, interval: Duration) {
    // The clipboard context lives on this thread. If the platform has no
    // usable clipboard the collector is permanently disabled; the daemon
    // keeps running.
    let mut ctx = match ClipboardContext::new() {
        Ok(ctx) => ctx,
        Err(e) => {
            tracing::warn!(error = %e, "Clipboard unavailable, collector disabled");
            return;
        }
    };

    while !stop.is_triggered() {
        match ctx.get_contents() {
            Ok(text) => {
                if let Err(e) = ingest.check_and_ingest(&text) {
                    tracing::error!(error = %e, "Error in clipboard poll");
                }
            }
            Err(e) => {
                // Transient read failure (empty clipboard, display gone away
                // for a moment); skip this cycle.
                tracing::debug!(error = %e, "Clipboard read failed");
            }
        }

        if stop.wait_timeout(interval) {
            break;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::DocumentStore;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Store double that counts `add` calls.
    struct CountingStore {
        inner: DocumentStore,
        adds: AtomicUsize,
    }

    impl CountingStore {
        fn new() -> Self {
            Self {
                inner: DocumentStore::open_in_memory().unwrap(),
                adds: AtomicUsize::new(0),
            }
        }

        fn add_calls(&self) -> usize {
            self.adds.load(Ordering::SeqCst)
        }
    }

    impl ContentStore for CountingStore {
        fn add(&self, documents: &[Document]) -> Result<usize> {
            self.adds.fetch_add(1, Ordering::SeqCst);
            self.inner.add(documents)
        }

        fn delete(&self, ids: &[String]) -> Result<usize> {
            self.inner.delete(ids)
        }

        fn count(&self) -> Result<i64> {
            self.inner.count()
        }
    }

    fn ingest(store: Arc<CountingStore>, filtering: bool) -> ClipboardIngest {
        ClipboardIngest {
            state: Arc::new(WatcherState::open_in_memory().unwrap()),
            store,
            filter: filtering.then(|| Arc::new(SecretFilter::new().unwrap())),
            min_len: 10,
            max_len: 50_000,
        }
    }

    #[test]
    fn test_secret_is_blocked_before_the_store() {
        let store = Arc::new(CountingStore::new());
        let ingest = ingest(Arc::clone(&store), true);

        let ingested = ingest
            .check_and_ingest("API_KEY=abcdefghijklmnopqrstuvwxyz123456")
            .unwrap();
        assert!(!ingested);
        assert_eq!(store.add_calls(), 0);
    }

    #[test]
    fn test_same_secret_passes_with_filtering_disabled() {
        let store = Arc::new(CountingStore::new());
        let ingest = ingest(Arc::clone(&store), false);

        let ingested = ingest
            .check_and_ingest("API_KEY=abcdefghijklmnopqrstuvwxyz123456")
            .unwrap();
        assert!(ingested);
        assert_eq!(store.add_calls(), 1);
    }

    #[test]
    fn test_at_most_one_document_per_distinct_value() {
        let store = Arc::new(CountingStore::new());
        let ingest = ingest(Arc::clone(&store), false);

        assert!(ingest.check_and_ingest("some interesting snippet").unwrap());
        // Subsequent polls observing the same value are no-ops.
        assert!(!ingest.check_and_ingest("some interesting snippet").unwrap());
        assert!(!ingest.check_and_ingest("  some interesting snippet  ").unwrap());
        assert_eq!(store.add_calls(), 1);

        assert!(ingest.check_and_ingest("a different snippet!").unwrap());
        assert_eq!(store.add_calls(), 2);
    }

    #[test]
    fn test_length_gates() {
        let store = Arc::new(CountingStore::new());
        let ingest = ingest(Arc::clone(&store), false);

        assert!(!ingest.check_and_ingest("short").unwrap());
        assert!(!ingest.check_and_ingest("        x        ").unwrap());
        let huge = "y".repeat(60_000);
        assert!(!ingest.check_and_ingest(&huge).unwrap());
        assert_eq!(store.add_calls(), 0);
    }
}
