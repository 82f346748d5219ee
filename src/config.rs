//! JSON configuration: source and destination folders plus cache tuning.
//!
//! Keys are PascalCase (`SourcePath`, `LeftPath`, `RightPath`, `DownPath`,
//! then the tuning knobs). Every key is optional.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use tracing::{error, info};

use crate::cache::{CacheLimits, DEFAULT_MAX_BYTES, DEFAULT_MAX_ENTRIES, DEFAULT_RESERVE_MARGIN};
use crate::error::{Result, TriageError};
use crate::prefetch::DEFAULT_PREFETCH_DEPTH;
use crate::scanner::DEFAULT_MAX_CANDIDATES;
use crate::session::{Destinations, SessionOptions};

pub const CONFIG_FILE_NAME: &str = "config.json";

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct AppConfig {
    pub source_path: Option<PathBuf>,
    pub left_path: Option<PathBuf>,
    pub right_path: Option<PathBuf>,
    pub down_path: Option<PathBuf>,
    pub max_file_size: u64,
    pub max_cached_files: usize,
    pub reserve_margin: usize,
    pub prefetch_depth: usize,
    pub max_candidates: usize,
}

impl Default for AppConfig {
    fn default() -> Self {
        AppConfig {
            source_path: None,
            left_path: None,
            right_path: None,
            down_path: None,
            max_file_size: DEFAULT_MAX_BYTES,
            max_cached_files: DEFAULT_MAX_ENTRIES,
            reserve_margin: DEFAULT_RESERVE_MARGIN,
            prefetch_depth: DEFAULT_PREFETCH_DEPTH,
            max_candidates: DEFAULT_MAX_CANDIDATES,
        }
    }
}

impl AppConfig {
    /// Read `path`. A missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Self> {
        let text = match fs::read_to_string(path) {
            Ok(t) => t,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                info!(path = %path.display(), "config: not found, using defaults");
                return Ok(Self::default());
            }
            Err(source) => {
                return Err(TriageError::Read {
                    path: path.to_path_buf(),
                    source,
                })
            }
        };
        serde_json::from_str(&text).map_err(|source| TriageError::Config {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Like [`load`](Self::load), but a broken file is logged and replaced by
    /// the defaults.
    pub fn load_or_default(path: &Path) -> Self {
        Self::load(path).unwrap_or_else(|e| {
            error!(error = %e, "config: unusable, using defaults");
            Self::default()
        })
    }

    pub fn destinations(&self) -> Destinations {
        Destinations {
            left: self.left_path.clone(),
            right: self.right_path.clone(),
            down: self.down_path.clone(),
        }
    }

    pub fn limits(&self) -> CacheLimits {
        CacheLimits {
            max_bytes: self.max_file_size,
            max_entries: self.max_cached_files,
            reserve_margin: self.reserve_margin,
        }
    }

    /// An unset source yields an empty path, which `load` treats as missing.
    pub fn session_options(&self) -> SessionOptions {
        SessionOptions {
            source: self.source_path.clone().unwrap_or_default(),
            destinations: self.destinations(),
            limits: self.limits(),
            prefetch_depth: self.prefetch_depth,
            max_candidates: self.max_candidates,
        }
    }
}

/// `./config.json` when present, else `config.json` in the platform config dir.
pub fn default_config_path() -> PathBuf {
    let local = PathBuf::from(CONFIG_FILE_NAME);
    if local.is_file() {
        return local;
    }
    ProjectDirs::from("", "", "triage")
        .map(|dirs| dirs.config_dir().join(CONFIG_FILE_NAME))
        .unwrap_or(local)
}
