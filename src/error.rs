//! Error taxonomy for cache fills, file moves and configuration.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Errors raised by the triage core.
#[derive(Debug, Error)]
pub enum TriageError {
    // ── Candidate errors (the candidate is discarded) ──────────────────
    /// File is larger than the cache byte limit; never cached.
    #[error("{path}: {size} bytes exceeds the {limit} byte limit")]
    Oversize { path: PathBuf, size: u64, limit: u64 },

    /// File could not be opened or read.
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// Loader rejected the file contents.
    #[error("failed to decode {path}: {message}")]
    Decode { path: PathBuf, message: String },

    // ── Move errors ─────────────────────────────────────────────────────
    /// Relocating a file failed; nothing was recorded.
    #[error("failed to move {from} to {to}: {source}")]
    Move {
        from: PathBuf,
        to: PathBuf,
        #[source]
        source: io::Error,
    },

    /// Every unique-name candidate in the destination is taken.
    #[error("no free name for {file_name} in {dir}")]
    Exhausted { dir: PathBuf, file_name: String },

    // ── Session ─────────────────────────────────────────────────────────
    /// The background prefetch thread could not be spawned.
    #[error("failed to start prefetch worker: {source}")]
    Worker {
        #[source]
        source: io::Error,
    },

    // ── Configuration ───────────────────────────────────────────────────
    /// Config file exists but is not valid JSON for [`crate::config::AppConfig`].
    #[error("invalid config {path}: {source}")]
    Config {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

impl TriageError {
    /// True for errors that only mean "skip this candidate".
    pub fn is_skippable(&self) -> bool {
        matches!(
            self,
            TriageError::Oversize { .. } | TriageError::Read { .. } | TriageError::Decode { .. }
        )
    }
}

pub type Result<T, E = TriageError> = std::result::Result<T, E>;
