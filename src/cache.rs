//! Bounded content cache (LRU by last access) + payload loaders.
//!
//! Flow:
//!   1. `try_prefetch(path)` → read file unlocked → `Loader::load` → insert → evict
//!   2. `get(path)` → fill on demand if missing → refresh recency → shared payload
//!
//! The mutex covers map mutation and the eviction scan only. File I/O and
//! decoding run outside it, so a slow read never blocks lookups of resident
//! entries. Two callers racing to fill the same path both do the work; the
//! first insert wins.

use std::collections::HashMap;
use std::fmt;
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use image::GenericImageView;
use tracing::debug;

use crate::error::{Result, TriageError};

// ── Loaders ─────────────────────────────────────────────────────────────

/// Turns the raw bytes of one file into a cacheable payload.
pub trait Loader: Send + Sync + 'static {
    type Payload: Send + Sync + 'static;

    fn load(&self, path: &Path, bytes: Vec<u8>) -> Result<Self::Payload>;
}

/// Caches file contents as-is.
#[derive(Clone, Copy, Debug, Default)]
pub struct RawLoader;

impl Loader for RawLoader {
    type Payload = Vec<u8>;

    fn load(&self, _path: &Path, bytes: Vec<u8>) -> Result<Vec<u8>> {
        Ok(bytes)
    }
}

/// Decoded image: raw RGBA pixels ready for display.
pub struct DecodedImage {
    pub rgba: Vec<u8>,
    pub width: u32,
    pub height: u32,
}

impl DecodedImage {
    /// Decode an in-memory image file (format sniffed from content).
    pub fn from_bytes(path: &Path, bytes: &[u8]) -> Result<Self> {
        let img = image::load_from_memory(bytes).map_err(|e| TriageError::Decode {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;
        let (width, height) = img.dimensions();
        let rgba = img.into_rgba8().into_raw();
        Ok(DecodedImage {
            rgba,
            width,
            height,
        })
    }
}

impl fmt::Debug for DecodedImage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DecodedImage")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("bytes", &self.rgba.len())
            .finish()
    }
}

/// Decodes PNG/JPEG files with the `image` crate.
#[derive(Clone, Copy, Debug, Default)]
pub struct ImageLoader;

impl Loader for ImageLoader {
    type Payload = DecodedImage;

    fn load(&self, path: &Path, bytes: Vec<u8>) -> Result<DecodedImage> {
        DecodedImage::from_bytes(path, &bytes)
    }
}

// ── Limits ──────────────────────────────────────────────────────────────

pub const DEFAULT_MAX_BYTES: u64 = 100 * 1024 * 1024;
pub const DEFAULT_MAX_ENTRIES: usize = 256;
pub const DEFAULT_RESERVE_MARGIN: usize = 100;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CacheLimits {
    /// Largest file (in bytes) that may be cached.
    pub max_bytes: u64,
    /// High-water mark: exceeding it triggers an eviction pass.
    pub max_entries: usize,
    /// How far below `max_entries` an eviction pass shrinks the cache.
    pub reserve_margin: usize,
}

impl Default for CacheLimits {
    fn default() -> Self {
        CacheLimits {
            max_bytes: DEFAULT_MAX_BYTES,
            max_entries: DEFAULT_MAX_ENTRIES,
            reserve_margin: DEFAULT_RESERVE_MARGIN,
        }
    }
}

impl CacheLimits {
    /// Entry count an eviction pass shrinks to. Never zero, so the entry
    /// that triggered the pass survives it.
    pub fn low_water(&self) -> usize {
        self.max_entries.saturating_sub(self.reserve_margin).max(1)
    }
}

// ── Cache ───────────────────────────────────────────────────────────────

struct Entry<P> {
    payload: Arc<P>,
    size: u64,
    /// Access clock value at last touch; larger is more recent.
    last_access: u64,
}

struct State<P> {
    entries: HashMap<PathBuf, Entry<P>>,
    clock: u64,
}

impl<P> State<P> {
    fn tick(&mut self) -> u64 {
        self.clock += 1;
        self.clock
    }
}

/// Thread-safe path → payload store with LRU eviction.
pub struct ContentCache<L: Loader> {
    loader: L,
    limits: CacheLimits,
    state: Mutex<State<L::Payload>>,
}

impl<L: Loader> ContentCache<L> {
    pub fn new(loader: L, limits: CacheLimits) -> Self {
        ContentCache {
            loader,
            limits,
            state: Mutex::new(State {
                entries: HashMap::new(),
                clock: 0,
            }),
        }
    }

    pub fn limits(&self) -> CacheLimits {
        self.limits
    }

    fn state(&self) -> MutexGuard<'_, State<L::Payload>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Load `path` into the cache unless it is already resident.
    ///
    /// Returns `Ok(false)` for a resident path without touching its recency,
    /// `Ok(true)` after a fresh insert. Oversize, unreadable and undecodable
    /// files are reported as errors and left uncached.
    pub fn try_prefetch(&self, path: &Path) -> Result<bool> {
        if self.contains(path) {
            return Ok(false);
        }
        let (payload, size) = self.fill(path)?;
        let (_, inserted) = self.insert(path, payload, size, false);
        Ok(inserted)
    }

    /// Fetch the payload for `path`, filling the cache on a miss, and mark it
    /// as most recently used.
    pub fn get(&self, path: &Path) -> Result<Arc<L::Payload>> {
        {
            let mut state = self.state();
            let now = state.tick();
            if let Some(entry) = state.entries.get_mut(path) {
                entry.last_access = now;
                return Ok(entry.payload.clone());
            }
        }
        let (payload, size) = self.fill(path)?;
        let (payload, _) = self.insert(path, payload, size, true);
        Ok(payload)
    }

    pub fn contains(&self, path: &Path) -> bool {
        self.state().entries.contains_key(path)
    }

    pub fn len(&self) -> usize {
        self.state().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state().entries.is_empty()
    }

    /// Total source bytes of all resident entries.
    pub fn resident_bytes(&self) -> u64 {
        self.state().entries.values().map(|e| e.size).sum()
    }

    /// Access clock value of the last touch of `path`, if resident.
    pub fn last_access(&self, path: &Path) -> Option<u64> {
        self.state().entries.get(path).map(|e| e.last_access)
    }

    /// Drop every entry. Payloads still held by callers stay alive until
    /// those callers release them.
    pub fn clear(&self) {
        let mut state = self.state();
        let n = state.entries.len();
        state.entries.clear();
        debug!(released = n, "cache: cleared");
    }

    /// Read and decode `path` with no lock held.
    fn fill(&self, path: &Path) -> Result<(L::Payload, u64)> {
        let read_err = |source| TriageError::Read {
            path: path.to_path_buf(),
            source,
        };
        let limit = self.limits.max_bytes;
        let oversize = |size| TriageError::Oversize {
            path: path.to_path_buf(),
            size,
            limit,
        };

        let file = File::open(path).map_err(read_err)?;
        let len = file.metadata().map_err(read_err)?.len();
        if len > limit {
            return Err(oversize(len));
        }

        // A file that grew since the length check is still caught.
        let bytes = read_capped(file, len, limit).map_err(read_err)?;
        let size = bytes.len() as u64;
        if size > limit {
            return Err(oversize(size));
        }

        let payload = self.loader.load(path, bytes)?;
        Ok((payload, size))
    }

    /// Insert a freshly loaded payload. If another caller inserted the same
    /// path meanwhile, the resident payload is kept and `false` is returned.
    fn insert(
        &self,
        path: &Path,
        payload: L::Payload,
        size: u64,
        touch_existing: bool,
    ) -> (Arc<L::Payload>, bool) {
        let mut state = self.state();
        let now = state.tick();

        if let Some(entry) = state.entries.get_mut(path) {
            if touch_existing {
                entry.last_access = now;
            }
            return (entry.payload.clone(), false);
        }

        let payload = Arc::new(payload);
        state.entries.insert(
            path.to_path_buf(),
            Entry {
                payload: payload.clone(),
                size,
                last_access: now,
            },
        );
        debug!(path = %path.display(), size, "cache: filled");

        if state.entries.len() > self.limits.max_entries {
            self.evict(&mut state);
        }
        (payload, true)
    }

    /// Drop least-recently-used entries down to the low-water mark.
    fn evict(&self, state: &mut State<L::Payload>) {
        let excess = state
            .entries
            .len()
            .saturating_sub(self.limits.low_water());
        if excess == 0 {
            return;
        }

        let mut by_age: Vec<(u64, PathBuf)> = state
            .entries
            .iter()
            .map(|(p, e)| (e.last_access, p.clone()))
            .collect();
        by_age.sort_unstable_by_key(|(t, _)| *t);

        for (_, path) in by_age.into_iter().take(excess) {
            state.entries.remove(&path);
        }
        debug!(
            evicted = excess,
            resident = state.entries.len(),
            "cache: evicted"
        );
    }
}

/// Read at most `limit + 1` bytes, so a result longer than `limit` means the
/// source is oversize.
fn read_capped<R: Read>(reader: R, len_hint: u64, limit: u64) -> std::io::Result<Vec<u8>> {
    let mut bytes = Vec::with_capacity(len_hint.min(limit) as usize);
    reader
        .take(limit.saturating_add(1))
        .read_to_end(&mut bytes)?;
    Ok(bytes)
}

// ── Tests ───────────────────────────────────────────────────────────────
