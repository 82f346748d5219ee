//! Navigation stack: pending queue, undo history and the displayed item.
//!
//! The front of the pending queue is the next candidate to show. Moving the
//! current file records a [`MoveRecord`]; undo reverses the newest record and
//! puts the restored file (and whatever was displayed) back at the front.
//!
//! Every operation either completes or returns an error having mutated
//! nothing. Serializing operations is the session's job.

use std::collections::VecDeque;
use std::ffi::OsStr;
use std::fmt;
use std::fs::{self, File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{debug, info};

use crate::cache::{ContentCache, Loader};
use crate::error::{Result, TriageError};
use crate::prefetch::PrefetchQueue;

/// Suffixed names tried after the bare name collides: `name_0.ext` … `name_1023.ext`.
pub const MAX_NAME_ATTEMPTS: usize = 1024;

/// One reversible relocation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MoveRecord {
    pub source: PathBuf,
    pub destination: PathBuf,
}

/// Sorted vs. still-to-sort counts. `remaining` includes the displayed item.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Progress {
    pub done: usize,
    pub remaining: usize,
}

impl Progress {
    pub fn total(&self) -> usize {
        self.done + self.remaining
    }
}

impl fmt::Display for Progress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} / {}", self.done, self.total())
    }
}

pub struct Navigator<L: Loader> {
    cache: Arc<ContentCache<L>>,
    prefetch: Option<PrefetchQueue>,
    pending: VecDeque<PathBuf>,
    history: Vec<MoveRecord>,
    current: Option<PathBuf>,
    displayed: Option<Arc<L::Payload>>,
}

impl<L: Loader> Navigator<L> {
    pub fn new(cache: Arc<ContentCache<L>>, prefetch: Option<PrefetchQueue>) -> Self {
        Navigator {
            cache,
            prefetch,
            pending: VecDeque::new(),
            history: Vec::new(),
            current: None,
            displayed: None,
        }
    }

    // ── Accessors ───────────────────────────────────────────────────────

    pub fn current(&self) -> Option<&Path> {
        self.current.as_deref()
    }

    pub fn displayed(&self) -> Option<&Arc<L::Payload>> {
        self.displayed.as_ref()
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    pub fn pending(&self) -> impl Iterator<Item = &Path> {
        self.pending.iter().map(PathBuf::as_path)
    }

    pub fn history(&self) -> &[MoveRecord] {
        &self.history
    }

    pub fn history_len(&self) -> usize {
        self.history.len()
    }

    pub fn progress(&self) -> Progress {
        Progress {
            done: self.history.len(),
            remaining: self.pending.len() + usize::from(self.current.is_some()),
        }
    }

    // ── Operations ──────────────────────────────────────────────────────

    /// Replace the pending queue wholesale and show its first displayable item.
    /// Undo history is kept.
    pub fn load(&mut self, ordered: Vec<PathBuf>) -> Option<&Path> {
        info!(candidates = ordered.len(), "navigator: loaded");
        self.pending = ordered.into();
        self.current = None;
        self.advance()
    }

    /// Pop candidates until one can be obtained from the cache. Candidates that
    /// fail to load are dropped for good.
    pub fn advance(&mut self) -> Option<&Path> {
        self.displayed = None;

        while let Some(next) = self.pending.pop_front() {
            match self.cache.get(&next) {
                Ok(payload) => {
                    self.current = Some(next);
                    self.displayed = Some(payload);
                    self.notify_prefetch();
                    return self.current.as_deref();
                }
                Err(e) => debug!(error = %e, "navigator: candidate discarded"),
            }
        }

        self.current = None;
        None
    }

    /// Move the displayed file into `dir` under a unique name, then advance.
    ///
    /// `Ok(false)` when nothing is displayed or `dir` is not a directory. On
    /// error the file stays where it was and no state changes.
    pub fn move_current_to(&mut self, dir: &Path) -> Result<bool> {
        let Some(source) = self.current.clone() else {
            return Ok(false);
        };
        if !dir.is_dir() {
            debug!(dir = %dir.display(), "navigator: destination missing, move ignored");
            return Ok(false);
        }
        let Some(file_name) = source.file_name() else {
            return Ok(false);
        };

        let destination = unique_destination(dir, file_name)?;
        relocate(&source, &destination)?;
        info!(from = %source.display(), to = %destination.display(), "navigator: moved");

        self.history.push(MoveRecord {
            source,
            destination,
        });
        self.advance();
        Ok(true)
    }

    /// Reverse the newest move and show the restored file.
    ///
    /// `Ok(false)` with an empty history. On error the record stays on the
    /// history and no state changes.
    pub fn undo(&mut self) -> Result<bool> {
        let Some(record) = self.history.last().cloned() else {
            return Ok(false);
        };

        relocate(&record.destination, &record.source)?;
        self.history.pop();
        info!(
            from = %record.destination.display(),
            to = %record.source.display(),
            "navigator: undone"
        );

        if let Some(current) = self.current.take() {
            self.pending.push_front(current);
        }
        self.pending.push_front(record.source);
        self.advance();
        Ok(true)
    }

    /// Drop the displayed payload and stop publishing to the prefetcher.
    pub fn release(&mut self) {
        self.displayed = None;
        self.current = None;
        self.prefetch = None;
    }

    fn notify_prefetch(&self) {
        if let Some(queue) = &self.prefetch {
            queue.publish(self.pending.iter().take(queue.depth()).cloned());
        }
    }
}

// ── Filesystem helpers ──────────────────────────────────────────────────

/// Dangling symlinks count as taken.
fn occupied(path: &Path) -> bool {
    path.symlink_metadata().is_ok()
}

/// First free name for `file_name` in `dir`: the bare name, then
/// `stem_0.ext` … `stem_1023.ext`.
pub fn unique_destination(dir: &Path, file_name: &OsStr) -> Result<PathBuf> {
    let bare = dir.join(file_name);
    if !occupied(&bare) {
        return Ok(bare);
    }

    let name = Path::new(file_name);
    let stem = name.file_stem().unwrap_or(file_name);
    let ext = name.extension();

    for i in 0..MAX_NAME_ATTEMPTS {
        let mut candidate = stem.to_os_string();
        candidate.push(format!("_{}", i));
        if let Some(ext) = ext {
            candidate.push(".");
            candidate.push(ext);
        }
        let path = dir.join(candidate);
        if !occupied(&path) {
            return Ok(path);
        }
    }

    Err(TriageError::Exhausted {
        dir: dir.to_path_buf(),
        file_name: file_name.to_string_lossy().into_owned(),
    })
}

/// Move `from` to `to` without ever overwriting. Falls back to copy + remove
/// when a plain rename fails (e.g. across filesystems); a partial copy is
/// removed again on failure.
pub fn relocate(from: &Path, to: &Path) -> Result<()> {
    let move_err = |source| TriageError::Move {
        from: from.to_path_buf(),
        to: to.to_path_buf(),
        source,
    };

    if occupied(to) {
        return Err(move_err(io::Error::new(
            io::ErrorKind::AlreadyExists,
            "destination already exists",
        )));
    }

    let rename_err = match fs::rename(from, to) {
        Ok(()) => return Ok(()),
        Err(e) => e,
    };
    if !from.is_file() || occupied(to) {
        return Err(move_err(rename_err));
    }

    debug!(error = %rename_err, "relocate: rename failed, copying");
    copy_then_remove(from, to).map_err(move_err)
}

/// Copy `from` into a newly created `to`, then remove `from`. Never
/// overwrites; on failure a partial copy is removed and `from` is untouched.
pub fn copy_then_remove(from: &Path, to: &Path) -> io::Result<()> {
    let mut src = File::open(from)?;
    let mut dst = OpenOptions::new().write(true).create_new(true).open(to)?;

    let copied = io::copy(&mut src, &mut dst)
        .and_then(|_| dst.set_permissions(src.metadata()?.permissions()))
        .and_then(|()| dst.sync_all());
    drop(dst);
    if let Err(e) = copied.and_then(|()| fs::remove_file(from)) {
        fs::remove_file(to).ok();
        return Err(e);
    }
    Ok(())
}

// ── Tests ───────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{CacheLimits, ImageLoader};
    use crate::prefetch::PrefetchScheduler;
    use std::time::{Duration, Instant};

    struct Fixture {
        tmp: tempfile::TempDir,
        source: PathBuf,
        left: PathBuf,
        right: PathBuf,
        down: PathBuf,
    }

    impl Fixture {
        fn new() -> Self {
            let tmp = tempfile::tempdir().unwrap();
            let mk = |name: &str| {
                let p = tmp.path().join(name);
                fs::create_dir(&p).unwrap();
                p
            };
            let (source, left, right, down) = (mk("src"), mk("left"), mk("right"), mk("down"));
            Fixture {
                tmp,
                source,
                left,
                right,
                down,
            }
        }

        fn png(&self, name: &str) -> PathBuf {
            png_in(&self.source, name)
        }

        /// File names under every fixture directory, sorted, duplicates kept.
        fn all_files(&self) -> Vec<String> {
            let mut names: Vec<String> = walkdir::WalkDir::new(self.tmp.path())
                .into_iter()
                .filter_map(|e| e.ok())
                .filter(|e| e.file_type().is_file())
                .map(|e| e.file_name().to_string_lossy().into_owned())
                .collect();
            names.sort();
            names
        }
    }

    fn png_in(dir: &Path, name: &str) -> PathBuf {
        let p = dir.join(name);
        image::RgbaImage::from_pixel(2, 2, image::Rgba([1, 2, 3, 255]))
            .save_with_format(&p, image::ImageFormat::Png)
            .unwrap();
        p
    }

    fn navigator() -> Navigator<ImageLoader> {
        Navigator::new(
            Arc::new(ContentCache::new(ImageLoader, CacheLimits::default())),
            None,
        )
    }

    // ── load / advance ──────────────────────────────────────────────────

    #[test]
    fn load_shows_first_candidate() {
        let fx = Fixture::new();
        let a = fx.png("a.png");
        let b = fx.png("b.png");
        let mut nav = navigator();

        assert_eq!(nav.load(vec![b.clone(), a.clone()]), Some(b.as_path()));
        assert!(nav.displayed().is_some());
        assert_eq!(nav.pending_len(), 1);
        assert_eq!(nav.progress().to_string(), "0 / 2");

        assert_eq!(nav.advance(), Some(a.as_path()));
        assert_eq!(nav.advance(), None);
        assert!(nav.displayed().is_none());
        assert_eq!(nav.progress().to_string(), "0 / 0");
    }

    #[test]
    fn undecodable_candidates_are_discarded() {
        let fx = Fixture::new();
        let broken = fx.source.join("broken.png");
        fs::write(&broken, b"not an image").unwrap();
        let missing = fx.source.join("missing.jpg");
        let good = fx.png("good.png");
        let mut nav = navigator();

        assert_eq!(
            nav.load(vec![broken.clone(), missing, good.clone()]),
            Some(good.as_path())
        );
        assert_eq!(nav.pending_len(), 0);
        assert!(broken.exists(), "discarded files stay in place");
    }

    #[test]
    fn oversize_candidates_are_discarded() {
        let fx = Fixture::new();
        let big = fx.png("big.png");
        let small = fx.source.join("small.png");
        fs::copy(&big, &small).unwrap();
        let big_len = fs::metadata(&big).unwrap().len();
        // Pad the first file past the limit.
        let mut bytes = fs::read(&big).unwrap();
        bytes.extend(std::iter::repeat(0u8).take(big_len as usize));
        fs::write(&big, bytes).unwrap();

        let cache = ContentCache::new(
            ImageLoader,
            CacheLimits {
                max_bytes: big_len,
                ..CacheLimits::default()
            },
        );
        let mut nav = Navigator::new(Arc::new(cache), None);
        assert_eq!(nav.load(vec![big, small.clone()]), Some(small.as_path()));
    }

    #[test]
    fn load_keeps_history() {
        let fx = Fixture::new();
        let a = fx.png("a.png");
        let b = fx.png("b.png");
        let mut nav = navigator();
        nav.load(vec![a]);
        assert!(nav.move_current_to(&fx.left).unwrap());

        nav.load(vec![b.clone()]);
        assert_eq!(nav.history_len(), 1);
        assert_eq!(nav.current(), Some(b.as_path()));
        assert_eq!(nav.progress().to_string(), "1 / 2");
    }

    // ── move ────────────────────────────────────────────────────────────

    #[test]
    fn move_relocates_and_advances() {
        let fx = Fixture::new();
        let a = fx.png("a.png");
        let b = fx.png("b.png");
        let mut nav = navigator();
        nav.load(vec![a.clone(), b.clone()]);

        assert!(nav.move_current_to(&fx.right).unwrap());
        assert!(!a.exists());
        assert!(fx.right.join("a.png").exists());
        assert_eq!(nav.current(), Some(b.as_path()));
        assert_eq!(
            nav.history(),
            &[MoveRecord {
                source: a,
                destination: fx.right.join("a.png"),
            }]
        );
        assert_eq!(nav.progress().to_string(), "1 / 2");
    }

    #[test]
    fn move_without_current_is_noop() {
        let fx = Fixture::new();
        let mut nav = navigator();
        assert!(!nav.move_current_to(&fx.left).unwrap());
        assert_eq!(nav.history_len(), 0);
    }

    #[test]
    fn move_to_missing_dir_is_noop() {
        let fx = Fixture::new();
        let a = fx.png("a.png");
        let mut nav = navigator();
        nav.load(vec![a.clone()]);

        assert!(!nav.move_current_to(&fx.left.join("nope")).unwrap());
        assert!(a.exists());
        assert_eq!(nav.current(), Some(a.as_path()));
        assert_eq!(nav.history_len(), 0);
    }

    #[test]
    fn same_name_gets_suffixed() {
        let fx = Fixture::new();
        let sub = fx.source.join("sub");
        fs::create_dir(&sub).unwrap();
        let x1 = fx.png("x.png");
        let x2 = png_in(&sub, "x.png");
        let mut nav = navigator();
        nav.load(vec![x1, x2]);

        nav.move_current_to(&fx.left).unwrap();
        nav.move_current_to(&fx.left).unwrap();

        let dests: Vec<_> = nav.history().iter().map(|r| r.destination.clone()).collect();
        assert_eq!(dests, vec![fx.left.join("x.png"), fx.left.join("x_0.png")]);
        assert!(dests.iter().all(|d| d.exists()));
    }

    #[test]
    fn exhausted_names_leave_state_untouched() {
        let fx = Fixture::new();
        let a = fx.png("x.png");
        fs::write(fx.down.join("x.png"), b"taken").unwrap();
        for i in 0..MAX_NAME_ATTEMPTS {
            fs::write(fx.down.join(format!("x_{}.png", i)), b"taken").unwrap();
        }
        let mut nav = navigator();
        nav.load(vec![a.clone()]);

        let err = nav.move_current_to(&fx.down).unwrap_err();
        assert!(matches!(err, TriageError::Exhausted { .. }));
        assert!(a.exists());
        assert_eq!(nav.current(), Some(a.as_path()));
        assert_eq!(nav.history_len(), 0);
    }

    // ── undo ────────────────────────────────────────────────────────────

    #[test]
    fn undo_restores_and_redisplays() {
        let fx = Fixture::new();
        let a = fx.png("a.png");
        let b = fx.png("b.png");
        let c = fx.png("c.png");
        let mut nav = navigator();
        nav.load(vec![a.clone(), b.clone(), c.clone()]);
        nav.move_current_to(&fx.left).unwrap();
        assert_eq!(nav.current(), Some(b.as_path()));

        assert!(nav.undo().unwrap());
        assert!(a.exists());
        assert!(!fx.left.join("a.png").exists());
        assert_eq!(nav.history_len(), 0);
        assert_eq!(nav.current(), Some(a.as_path()));
        // b goes back in front of c.
        let pending: Vec<_> = nav.pending().map(Path::to_path_buf).collect();
        assert_eq!(pending, vec![b, c]);
        assert_eq!(nav.progress().to_string(), "0 / 3");
    }

    #[test]
    fn undo_after_queue_drained() {
        let fx = Fixture::new();
        let a = fx.png("a.png");
        let mut nav = navigator();
        nav.load(vec![a.clone()]);
        nav.move_current_to(&fx.right).unwrap();
        assert_eq!(nav.current(), None);

        assert!(nav.undo().unwrap());
        assert_eq!(nav.current(), Some(a.as_path()));
        assert_eq!(nav.pending_len(), 0);
    }

    #[test]
    fn undo_with_empty_history_is_noop() {
        let fx = Fixture::new();
        let a = fx.png("a.png");
        let mut nav = navigator();
        nav.load(vec![a.clone()]);
        assert!(!nav.undo().unwrap());
        assert_eq!(nav.current(), Some(a.as_path()));
    }

    #[test]
    fn undo_failure_keeps_record() {
        let fx = Fixture::new();
        let a = fx.png("a.png");
        let b = fx.png("b.png");
        let mut nav = navigator();
        nav.load(vec![a.clone(), b.clone()]);
        nav.move_current_to(&fx.left).unwrap();
        fs::remove_file(fx.left.join("a.png")).unwrap();

        let err = nav.undo().unwrap_err();
        assert!(matches!(err, TriageError::Move { .. }));
        assert_eq!(nav.history_len(), 1);
        assert_eq!(nav.current(), Some(b.as_path()));
        assert_eq!(nav.pending_len(), 0);
    }

    #[test]
    fn undo_refuses_to_overwrite_source() {
        let fx = Fixture::new();
        let a = fx.png("a.png");
        let mut nav = navigator();
        nav.load(vec![a.clone()]);
        nav.move_current_to(&fx.left).unwrap();
        fs::write(&a, b"newcomer").unwrap();

        assert!(nav.undo().is_err());
        assert_eq!(fs::read(&a).unwrap(), b"newcomer");
        assert!(fx.left.join("a.png").exists());
    }

    #[test]
    fn moves_and_undos_preserve_files() {
        let fx = Fixture::new();
        let names = ["a.png", "b.png", "c.png", "d.png", "e.png", "f.png"];
        let paths: Vec<_> = names.iter().map(|n| fx.png(n)).collect();
        // A second "a.png" elsewhere forces a suffixed destination.
        let sub = fx.source.join("sub");
        fs::create_dir(&sub).unwrap();
        let mut queue = paths.clone();
        let sub_a = png_in(&sub, "a.png");
        queue.push(sub_a.clone());

        let before = fx.all_files().len();
        assert_eq!(before, 7);
        let mut nav = navigator();
        nav.load(queue);

        let dirs = [fx.left.clone(), fx.right.clone(), fx.down.clone()];
        let script = "LRDuLuuRDDLuRRuuuLDR";
        for (i, step) in script.chars().enumerate() {
            let history_before = nav.history_len();
            match step {
                'u' => {
                    let undone = nav.undo().unwrap();
                    assert_eq!(undone, history_before > 0);
                    if undone {
                        assert_eq!(nav.history_len(), history_before - 1);
                    }
                }
                _ => {
                    let dir = &dirs[i % 3];
                    nav.move_current_to(dir).unwrap();
                }
            }
            assert_eq!(fx.all_files().len(), before, "after step {} ({})", i, step);
        }

        while nav.undo().unwrap() {}
        assert_eq!(nav.history_len(), 0);
        for p in paths.iter().chain(std::iter::once(&sub_a)) {
            assert!(p.exists(), "{} restored", p.display());
        }
        for d in [&fx.left, &fx.right, &fx.down] {
            assert_eq!(fs::read_dir(d).unwrap().count(), 0);
        }
        assert_eq!(fx.all_files(), {
            let mut expected: Vec<String> = names.iter().map(|n| n.to_string()).collect();
            expected.push("a.png".into());
            expected.sort();
            expected
        });
    }

    // ── prefetch wiring ─────────────────────────────────────────────────

    #[test]
    fn advance_publishes_upcoming_to_prefetcher() {
        let fx = Fixture::new();
        let paths: Vec<_> = (0..6).map(|i| fx.png(&format!("{}.png", i))).collect();
        let cache = Arc::new(ContentCache::new(ImageLoader, CacheLimits::default()));
        let (mut sched, queue) = PrefetchScheduler::start(cache.clone(), 3).unwrap();
        let mut nav = Navigator::new(cache.clone(), Some(queue));

        nav.load(paths.clone());

        let deadline = Instant::now() + Duration::from_secs(5);
        while Instant::now() < deadline && !paths[1..4].iter().all(|p| cache.contains(p)) {
            std::thread::sleep(Duration::from_millis(10));
        }
        sched.stop();
        assert!(paths[1..4].iter().all(|p| cache.contains(p)));
        assert!(!cache.contains(&paths[5]));
    }

    // ── helpers ─────────────────────────────────────────────────────────

    #[test]
    fn unique_destination_without_extension() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("README"), b"").unwrap();
        let p = unique_destination(dir.path(), OsStr::new("README")).unwrap();
        assert_eq!(p, dir.path().join("README_0"));
    }

    #[test]
    fn unique_destination_skips_taken_suffixes() {
        let dir = tempfile::tempdir().unwrap();
        for n in ["x.png", "x_0.png", "x_1.png"] {
            fs::write(dir.path().join(n), b"").unwrap();
        }
        let p = unique_destination(dir.path(), OsStr::new("x.png")).unwrap();
        assert_eq!(p, dir.path().join("x_2.png"));
    }

    #[test]
    fn relocate_never_overwrites() {
        let dir = tempfile::tempdir().unwrap();
        let from = dir.path().join("a");
        let to = dir.path().join("b");
        fs::write(&from, b"a").unwrap();
        fs::write(&to, b"b").unwrap();

        assert!(relocate(&from, &to).is_err());
        assert_eq!(fs::read(&from).unwrap(), b"a");
        assert_eq!(fs::read(&to).unwrap(), b"b");
    }

    #[test]
    fn relocate_missing_source_fails() {
        let dir = tempfile::tempdir().unwrap();
        let err = relocate(&dir.path().join("nope"), &dir.path().join("dest")).unwrap_err();
        assert!(matches!(err, TriageError::Move { .. }));
        assert!(!dir.path().join("dest").exists());
    }

    #[test]
    fn copy_then_remove_moves_content() {
        let dir = tempfile::tempdir().unwrap();
        let from = dir.path().join("a.png");
        let to = dir.path().join("b.png");
        fs::write(&from, b"pixels").unwrap();

        copy_then_remove(&from, &to).unwrap();
        assert!(!from.exists());
        assert_eq!(fs::read(&to).unwrap(), b"pixels");
    }

    #[test]
    fn copy_then_remove_keeps_existing_destination() {
        let dir = tempfile::tempdir().unwrap();
        let from = dir.path().join("a.png");
        let to = dir.path().join("b.png");
        fs::write(&from, b"new").unwrap();
        fs::write(&to, b"old").unwrap();

        let err = copy_then_remove(&from, &to).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::AlreadyExists);
        assert_eq!(fs::read(&from).unwrap(), b"new");
        assert_eq!(fs::read(&to).unwrap(), b"old");
    }

    #[cfg(unix)]
    #[test]
    fn copy_then_remove_cleans_partial_copy() {
        // A directory opens fine on unix but fails on read, after the
        // destination file has been created.
        let dir = tempfile::tempdir().unwrap();
        let from = dir.path().join("folder");
        fs::create_dir(&from).unwrap();
        let to = dir.path().join("copy.png");

        assert!(copy_then_remove(&from, &to).is_err());
        assert!(!to.exists());
        assert!(from.is_dir());
    }

    #[test]
    fn progress_display() {
        let p = Progress {
            done: 3,
            remaining: 7,
        };
        assert_eq!(p.total(), 10);
        assert_eq!(p.to_string(), "3 / 10");
    }
}
