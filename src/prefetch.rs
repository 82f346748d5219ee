//! Background prefetcher: keeps the next few pending paths warm in the cache.
//!
//! One worker thread per session. It sleeps until the navigator publishes a
//! new look-ahead window, then walks that window front to back calling
//! `try_prefetch`. Wakes are edge-triggered and coalesce: several publishes
//! before the worker gets to run produce a single pass over the latest window.
//!
//! Cancellation closes a channel the worker selects on, so a sleeping worker
//! exits immediately and a busy one stops after the file it is reading.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};

use crossbeam_channel::{bounded, select, Receiver, Sender, TrySendError};
use tracing::{debug, warn};

use crate::cache::{ContentCache, Loader};
use crate::error::{Result, TriageError};

pub const DEFAULT_PREFETCH_DEPTH: usize = 32;

// ── Stats (shared with the session via Arc) ─────────────────────────────

#[derive(Default)]
pub struct PrefetchStats {
    pub loaded: AtomicU64,
    pub skipped: AtomicU64,
    pub failed: AtomicU64,
    pub passes: AtomicU64,
    last_error: Mutex<String>,
}

impl PrefetchStats {
    fn record_fail(&self, err: &str) {
        self.failed.fetch_add(1, Ordering::Relaxed);
        let mut le = self.last_error.lock().unwrap_or_else(PoisonError::into_inner);
        le.clear();
        le.extend(err.chars().take(120));
    }

    pub fn last_error(&self) -> String {
        self.last_error
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

// ── Cancellation ────────────────────────────────────────────────────────

/// Cooperative cancellation flag that can also wake a blocked `select!`.
#[derive(Clone)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
    closer: Arc<Mutex<Option<Sender<()>>>>,
    closed: Receiver<()>,
}

impl CancelToken {
    pub fn new() -> Self {
        let (tx, rx) = bounded(0);
        CancelToken {
            flag: Arc::new(AtomicBool::new(false)),
            closer: Arc::new(Mutex::new(Some(tx))),
            closed: rx,
        }
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::Release);
        // Dropping the only sender disconnects every receiver clone.
        self.closer
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::Acquire)
    }

    /// Becomes ready (disconnected) once [`cancel`](Self::cancel) runs.
    pub fn closed(&self) -> &Receiver<()> {
        &self.closed
    }
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::new()
    }
}

// ── Queue handle (held by the navigator) ────────────────────────────────

type Window = Arc<Mutex<Vec<PathBuf>>>;

fn lock_window(window: &Window) -> MutexGuard<'_, Vec<PathBuf>> {
    window.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Publishing side of the scheduler: replaces the look-ahead window and
/// signals "queue changed".
#[derive(Clone)]
pub struct PrefetchQueue {
    window: Window,
    wake: Sender<()>,
    depth: usize,
}

impl PrefetchQueue {
    pub fn depth(&self) -> usize {
        self.depth
    }

    /// Publish the upcoming paths (front first); only the first `depth` are kept.
    pub fn publish<I>(&self, upcoming: I)
    where
        I: IntoIterator<Item = PathBuf>,
    {
        let batch: Vec<PathBuf> = upcoming.into_iter().take(self.depth).collect();
        *lock_window(&self.window) = batch;

        match self.wake.try_send(()) {
            // Full: a wake is already pending and will see the new window.
            Ok(()) | Err(TrySendError::Full(())) => {}
            Err(TrySendError::Disconnected(())) => debug!("prefetch: worker gone, publish dropped"),
        }
    }
}

// ── Scheduler ───────────────────────────────────────────────────────────

pub struct PrefetchScheduler {
    pub stats: Arc<PrefetchStats>,
    cancel: CancelToken,
    handle: Option<JoinHandle<()>>,
}

impl PrefetchScheduler {
    /// Spawn the worker. Returns the scheduler handle and the queue handle the
    /// navigator publishes to.
    pub fn start<L: Loader>(
        cache: Arc<ContentCache<L>>,
        depth: usize,
    ) -> Result<(Self, PrefetchQueue)> {
        let (wake_tx, wake_rx) = bounded(1);
        let window: Window = Arc::new(Mutex::new(Vec::new()));
        let stats = Arc::new(PrefetchStats::default());
        let cancel = CancelToken::new();

        let handle = {
            let window = window.clone();
            let stats = stats.clone();
            let cancel = cancel.clone();
            thread::Builder::new()
                .name("prefetch".into())
                .spawn(move || worker_loop(cache, window, wake_rx, cancel, stats))
                .map_err(|source| TriageError::Worker { source })?
        };
        debug!(depth, "prefetch: worker started");

        Ok((
            PrefetchScheduler {
                stats,
                cancel,
                handle: Some(handle),
            },
            PrefetchQueue {
                window,
                wake: wake_tx,
                depth,
            },
        ))
    }

    pub fn is_running(&self) -> bool {
        self.handle.is_some()
    }

    /// Cancel the worker and wait for it to exit. Safe to call repeatedly.
    pub fn stop(&mut self) {
        self.cancel.cancel();
        if let Some(h) = self.handle.take() {
            if h.join().is_err() {
                warn!("prefetch: worker panicked");
            }
        }
    }
}

impl Drop for PrefetchScheduler {
    fn drop(&mut self) {
        self.stop();
    }
}

// ── Worker loop ─────────────────────────────────────────────────────────

fn worker_loop<L: Loader>(
    cache: Arc<ContentCache<L>>,
    window: Window,
    wake: Receiver<()>,
    cancel: CancelToken,
    stats: Arc<PrefetchStats>,
) {
    loop {
        let woke = select! {
            recv(cancel.closed()) -> _ => false,
            recv(wake) -> msg => msg.is_ok(),
        };
        if !woke || cancel.is_cancelled() {
            break;
        }

        let batch = std::mem::take(&mut *lock_window(&window));
        stats.passes.fetch_add(1, Ordering::Relaxed);

        for path in &batch {
            if cancel.is_cancelled() {
                break;
            }
            match cache.try_prefetch(path) {
                Ok(true) => {
                    stats.loaded.fetch_add(1, Ordering::Relaxed);
                    debug!(path = %path.display(), "prefetch: loaded");
                }
                Ok(false) => {
                    stats.skipped.fetch_add(1, Ordering::Relaxed);
                }
                Err(e) => {
                    stats.record_fail(&e.to_string());
                    debug!(error = %e, "prefetch: candidate skipped");
                }
            }
        }
    }

    debug!("prefetch: stopped");
}

// ── Tests ───────────────────────────────────────────────────────────────
