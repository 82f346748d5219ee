//! Directory scanner: collect candidate images under the source directory.
//!
//! Scan order is depth first: a directory's files (byte order on name) come
//! before its subdirectories (byte order), each subdirectory fully scanned in
//! turn. The scan is capped, then reversed, so the last file found is shown
//! first.

use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};
use walkdir::WalkDir;

pub const ACCEPTED_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg"];

pub const DEFAULT_MAX_CANDIDATES: usize = 5000;

pub fn is_accepted(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| ACCEPTED_EXTENSIONS.contains(&e.to_lowercase().as_str()))
        .unwrap_or(false)
}

/// Every regular file under `root`, in scan order. Unreadable entries are skipped.
pub fn scan_order(root: &Path) -> impl Iterator<Item = PathBuf> {
    WalkDir::new(root)
        .follow_links(true)
        .sort_by(|a, b| {
            a.file_type()
                .is_dir()
                .cmp(&b.file_type().is_dir())
                .then_with(|| a.file_name().cmp(b.file_name()))
        })
        .into_iter()
        .filter_map(|e| match e {
            Ok(e) => Some(e),
            Err(err) => {
                debug!(error = %err, "scan: entry skipped");
                None
            }
        })
        .filter(|e| e.file_type().is_file())
        .map(walkdir::DirEntry::into_path)
}

/// Accepted files under `root` in presentation order, at most `max` of them.
///
/// A missing or non-directory root yields an empty list.
pub fn scan_candidates(root: &Path, max: usize) -> Vec<PathBuf> {
    let root = match std::path::absolute(root) {
        Ok(p) => p,
        Err(e) => {
            warn!(root = %root.display(), error = %e, "scan: cannot resolve source");
            return Vec::new();
        }
    };
    if !root.is_dir() {
        warn!(root = %root.display(), "scan: source is not a directory");
        return Vec::new();
    }

    let mut found: Vec<PathBuf> = scan_order(&root)
        .filter(|p| is_accepted(p))
        .take(max)
        .collect();
    found.reverse();

    info!(root = %root.display(), count = found.len(), "scan: done");
    found
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn touch(root: &Path, rel: &str) {
        let p = root.join(rel);
        if let Some(parent) = p.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(p, b"img").unwrap();
    }

    fn rel(root: &Path, paths: &[PathBuf]) -> Vec<String> {
        let root = std::path::absolute(root).unwrap();
        paths
            .iter()
            .map(|p| {
                p.strip_prefix(&root)
                    .unwrap()
                    .to_string_lossy()
                    .replace('\\', "/")
            })
            .collect()
    }

    // ── ordering ────────────────────────────────────────────────────────

    #[test]
    fn top_level_files_then_subdirs_reversed() {
        let dir = tempfile::tempdir().unwrap();
        touch(dir.path(), "a.png");
        touch(dir.path(), "b.jpg");
        touch(dir.path(), "sub/c.png");

        let found = scan_candidates(dir.path(), 10);
        assert_eq!(rel(dir.path(), &found), vec!["sub/c.png", "b.jpg", "a.png"]);
    }

    #[test]
    fn files_precede_subdirs_regardless_of_name() {
        let dir = tempfile::tempdir().unwrap();
        touch(dir.path(), "0dir/z.png");
        touch(dir.path(), "a.png");
        touch(dir.path(), "zz.png");

        let order: Vec<PathBuf> = scan_order(dir.path()).collect();
        assert_eq!(rel(dir.path(), &order), vec!["a.png", "zz.png", "0dir/z.png"]);
    }

    #[test]
    fn nested_dirs_are_depth_first() {
        let dir = tempfile::tempdir().unwrap();
        touch(dir.path(), "x/y/deep.png");
        touch(dir.path(), "x/mid.png");
        touch(dir.path(), "y/other.png");
        touch(dir.path(), "top.png");

        let order: Vec<PathBuf> = scan_order(dir.path()).collect();
        assert_eq!(
            rel(dir.path(), &order),
            vec!["top.png", "x/mid.png", "x/y/deep.png", "y/other.png"]
        );
    }

    #[test]
    fn names_compare_bytewise() {
        let dir = tempfile::tempdir().unwrap();
        touch(dir.path(), "a.png");
        touch(dir.path(), "B.png");
        touch(dir.path(), "_c.png");

        let order: Vec<PathBuf> = scan_order(dir.path()).collect();
        assert_eq!(rel(dir.path(), &order), vec!["B.png", "_c.png", "a.png"]);
    }

    // ── filtering / cap ─────────────────────────────────────────────────

    #[test]
    fn only_accepted_extensions() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["A.PNG", "b.Jpeg", "c.jpg", "notes.txt", "noext", "d.gif", "e.png.bak"] {
            touch(dir.path(), name);
        }

        let found = scan_candidates(dir.path(), 10);
        assert_eq!(rel(dir.path(), &found), vec!["c.jpg", "b.Jpeg", "A.PNG"]);
    }

    #[test]
    fn cap_applies_before_reversal() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["a.png", "b.png", "c.png", "d.png"] {
            touch(dir.path(), name);
        }

        let found = scan_candidates(dir.path(), 2);
        assert_eq!(rel(dir.path(), &found), vec!["b.png", "a.png"]);
    }

    #[test]
    fn candidates_are_absolute() {
        let dir = tempfile::tempdir().unwrap();
        touch(dir.path(), "a.png");
        let found = scan_candidates(dir.path(), 10);
        assert!(found.iter().all(|p| p.is_absolute()));
    }

    #[test]
    fn missing_root_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        assert!(scan_candidates(&dir.path().join("nope"), 10).is_empty());
    }

    #[test]
    fn file_root_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        touch(dir.path(), "a.png");
        assert!(scan_candidates(&dir.path().join("a.png"), 10).is_empty());
    }

    #[test]
    fn empty_dir_no_panic() {
        let dir = tempfile::tempdir().unwrap();
        assert!(scan_candidates(dir.path(), 10).is_empty());
    }

    // ── is_accepted ─────────────────────────────────────────────────────

    #[test]
    fn accepted_case_insensitive() {
        assert!(is_accepted(Path::new("/a/photo.JPG")));
        assert!(is_accepted(Path::new("/a/photo.Png")));
        assert!(is_accepted(Path::new("/a/photo.jpeg")));
    }

    #[test]
    fn rejected_extensions() {
        for p in ["/a/clip.mp4", "/a/x.webp", "/a/.png", "/a/noext", "/a/"] {
            assert!(!is_accepted(Path::new(p)), "{} should be rejected", p);
        }
    }
}
