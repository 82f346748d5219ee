//! Session orchestrator: owns the cache → prefetcher → navigator graph for one
//! source folder and serializes user commands over it.
//!
//! Commands (`load`, `undo`, `left`, `right`, `down`) run end to end under one
//! lock. A command that arrives while another is in flight is rejected with
//! [`Outcome::Busy`], not queued. After every command the session publishes a
//! [`SessionState`] snapshot; readers either poll [`Session::snapshot`] or
//! [`Session::subscribe`] to a channel.
//!
//! Only [`TriageError::Exhausted`] reaches the caller. Every other failure
//! below this layer is logged and reported as [`Outcome::Unchanged`].

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};

use crossbeam_channel::{unbounded, Receiver, Sender};
use tracing::{debug, error, info, warn};

use crate::cache::{CacheLimits, ContentCache, Loader};
use crate::error::{Result, TriageError};
use crate::navigator::Navigator;
use crate::prefetch::{PrefetchScheduler, PrefetchStats, DEFAULT_PREFETCH_DEPTH};
use crate::scanner::{self, DEFAULT_MAX_CANDIDATES};

// ── Options ─────────────────────────────────────────────────────────────

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Direction {
    Left,
    Right,
    Down,
}

impl Direction {
    pub fn name(&self) -> &'static str {
        match self {
            Direction::Left => "left",
            Direction::Right => "right",
            Direction::Down => "down",
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Destination folders. A two-way setup leaves `down` unset.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Destinations {
    pub left: Option<PathBuf>,
    pub right: Option<PathBuf>,
    pub down: Option<PathBuf>,
}

impl Destinations {
    pub fn get(&self, direction: Direction) -> Option<&Path> {
        match direction {
            Direction::Left => self.left.as_deref(),
            Direction::Right => self.right.as_deref(),
            Direction::Down => self.down.as_deref(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SessionOptions {
    pub source: PathBuf,
    pub destinations: Destinations,
    pub limits: CacheLimits,
    pub prefetch_depth: usize,
    pub max_candidates: usize,
}

impl SessionOptions {
    pub fn new(source: impl Into<PathBuf>, destinations: Destinations) -> Self {
        SessionOptions {
            source: source.into(),
            destinations,
            limits: CacheLimits::default(),
            prefetch_depth: DEFAULT_PREFETCH_DEPTH,
            max_candidates: DEFAULT_MAX_CANDIDATES,
        }
    }
}

// ── Published state ─────────────────────────────────────────────────────

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Outcome {
    /// The command ran and changed state.
    Applied,
    /// The command was a no-op or failed without changing state.
    Unchanged,
    /// Another command was in flight; this one was dropped.
    Busy,
}

/// What the presentation layer shows.
#[derive(Debug)]
pub struct SessionState<P> {
    pub current_path: Option<PathBuf>,
    pub current_image: Option<Arc<P>>,
    pub progress_text: String,
    pub is_busy: bool,
}

impl<P> Clone for SessionState<P> {
    fn clone(&self) -> Self {
        SessionState {
            current_path: self.current_path.clone(),
            current_image: self.current_image.clone(),
            progress_text: self.progress_text.clone(),
            is_busy: self.is_busy,
        }
    }
}

impl<P> Default for SessionState<P> {
    fn default() -> Self {
        SessionState {
            current_path: None,
            current_image: None,
            progress_text: "0 / 0".into(),
            is_busy: false,
        }
    }
}

impl<P> SessionState<P> {
    fn capture<L: Loader<Payload = P>>(nav: &Navigator<L>) -> Self {
        SessionState {
            current_path: nav.current().map(Path::to_path_buf),
            current_image: nav.displayed().cloned(),
            progress_text: nav.progress().to_string(),
            is_busy: false,
        }
    }
}

/// Clears the busy flag however the command exits.
struct BusyGuard<'a>(&'a AtomicBool);

impl Drop for BusyGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

// ── Session ─────────────────────────────────────────────────────────────

pub struct Session<L: Loader> {
    options: SessionOptions,
    cache: Arc<ContentCache<L>>,
    nav: Mutex<Navigator<L>>,
    scheduler: Mutex<Option<PrefetchScheduler>>,
    stats: Arc<PrefetchStats>,
    busy: AtomicBool,
    closed: AtomicBool,
    state: RwLock<SessionState<L::Payload>>,
    subscribers: Mutex<Vec<Sender<SessionState<L::Payload>>>>,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

impl<L: Loader> Session<L> {
    /// Build the object graph and start the prefetch worker. Nothing is
    /// scanned until [`load`](Self::load).
    pub fn open(options: SessionOptions, loader: L) -> Result<Self> {
        let cache = Arc::new(ContentCache::new(loader, options.limits));
        let (scheduler, queue) = PrefetchScheduler::start(cache.clone(), options.prefetch_depth)?;
        let stats = scheduler.stats.clone();
        let nav = Navigator::new(cache.clone(), Some(queue));

        info!(source = %options.source.display(), "session: opened");
        Ok(Session {
            options,
            cache,
            nav: Mutex::new(nav),
            scheduler: Mutex::new(Some(scheduler)),
            stats,
            busy: AtomicBool::new(false),
            closed: AtomicBool::new(false),
            state: RwLock::new(SessionState::default()),
            subscribers: Mutex::new(Vec::new()),
        })
    }

    pub fn options(&self) -> &SessionOptions {
        &self.options
    }

    pub fn cache(&self) -> &Arc<ContentCache<L>> {
        &self.cache
    }

    pub fn prefetch_stats(&self) -> &Arc<PrefetchStats> {
        &self.stats
    }

    // ── Commands ────────────────────────────────────────────────────────

    /// Rescan the source folder and show the first candidate.
    pub fn load(&self) -> Result<Outcome> {
        self.run("load", |nav, opts| {
            if !opts.source.is_dir() {
                warn!(source = %opts.source.display(), "session: source folder missing");
                return Ok(false);
            }
            let candidates = scanner::scan_candidates(&opts.source, opts.max_candidates);
            nav.load(candidates);
            Ok(true)
        })
    }

    pub fn undo(&self) -> Result<Outcome> {
        self.run("undo", |nav, _| nav.undo())
    }

    pub fn left(&self) -> Result<Outcome> {
        self.move_to(Direction::Left)
    }

    pub fn right(&self) -> Result<Outcome> {
        self.move_to(Direction::Right)
    }

    pub fn down(&self) -> Result<Outcome> {
        self.move_to(Direction::Down)
    }

    pub fn move_to(&self, direction: Direction) -> Result<Outcome> {
        self.run(direction.name(), |nav, opts| {
            match opts.destinations.get(direction) {
                Some(dir) => nav.move_current_to(dir),
                None => {
                    debug!(%direction, "session: no destination configured");
                    Ok(false)
                }
            }
        })
    }

    fn run<F>(&self, command: &'static str, op: F) -> Result<Outcome>
    where
        F: FnOnce(&mut Navigator<L>, &SessionOptions) -> Result<bool>,
    {
        if self.closed.load(Ordering::Acquire) {
            return Ok(Outcome::Unchanged);
        }
        if self
            .busy
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            debug!(command, "session: busy, command dropped");
            return Ok(Outcome::Busy);
        }
        let busy = BusyGuard(&self.busy);
        self.publish_busy();

        let mut nav = lock(&self.nav);
        // close() may have won the navigator lock while this command waited.
        if self.closed.load(Ordering::Acquire) {
            debug!(command, "session: closed, command dropped");
            self.publish_done(SessionState::default(), busy);
            return Ok(Outcome::Unchanged);
        }
        let result = op(&mut *nav, &self.options);
        // Published under the navigator lock; close() sets `closed` before
        // taking it, so teardown always publishes last.
        self.publish_done(SessionState::capture(&*nav), busy);
        drop(nav);

        match result {
            Ok(true) => Ok(Outcome::Applied),
            Ok(false) => Ok(Outcome::Unchanged),
            Err(e @ TriageError::Exhausted { .. }) => {
                error!(command, error = %e, "session: command failed");
                Err(e)
            }
            Err(e) => {
                warn!(command, error = %e, "session: command aborted");
                Ok(Outcome::Unchanged)
            }
        }
    }

    // ── State ───────────────────────────────────────────────────────────

    pub fn snapshot(&self) -> SessionState<L::Payload> {
        self.state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::Acquire)
    }

    pub fn progress_text(&self) -> String {
        self.snapshot().progress_text
    }

    pub fn current_image(&self) -> Option<Arc<L::Payload>> {
        self.snapshot().current_image
    }

    /// Receive every published state, starting with the current one.
    pub fn subscribe(&self) -> Receiver<SessionState<L::Payload>> {
        let (tx, rx) = unbounded();
        // Held across snapshot and registration so no publish slips between.
        let mut subscribers = lock(&self.subscribers);
        if !self.closed.load(Ordering::Acquire) {
            tx.send(self.snapshot()).ok();
            subscribers.push(tx);
        }
        rx
    }

    fn publish_busy(&self) {
        let mut subscribers = lock(&self.subscribers);
        let mut state = self.snapshot();
        state.is_busy = true;
        self.store_and_send(&mut *subscribers, state);
    }

    fn publish(&self, state: SessionState<L::Payload>) {
        let mut subscribers = lock(&self.subscribers);
        self.store_and_send(&mut *subscribers, state);
    }

    /// Final state of a command. The busy flag is released before anyone is
    /// told, so a subscriber reacting to this state can issue the next command.
    fn publish_done(&self, state: SessionState<L::Payload>, busy: BusyGuard<'_>) {
        let mut subscribers = lock(&self.subscribers);
        *self.state.write().unwrap_or_else(PoisonError::into_inner) = state.clone();
        drop(busy);
        subscribers.retain(|tx| tx.send(state.clone()).is_ok());
    }

    fn store_and_send(
        &self,
        subscribers: &mut Vec<Sender<SessionState<L::Payload>>>,
        state: SessionState<L::Payload>,
    ) {
        *self.state.write().unwrap_or_else(PoisonError::into_inner) = state.clone();
        subscribers.retain(|tx| tx.send(state.clone()).is_ok());
    }

    // ── Teardown ────────────────────────────────────────────────────────

    /// Stop the prefetch worker and release every payload. Later commands are
    /// no-ops. Safe to call repeatedly; also runs on drop.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }

        if let Some(mut scheduler) = lock(&self.scheduler).take() {
            scheduler.stop();
        }
        {
            let mut nav = lock(&self.nav);
            nav.release();
            self.cache.clear();
            self.publish(SessionState::default());
        }
        lock(&self.subscribers).clear();
        info!("session: closed");
    }
}

impl<L: Loader> Drop for Session<L> {
    fn drop(&mut self) {
        self.close();
    }
}

// ── Tests ───────────────────────────────────────────────────────────────
