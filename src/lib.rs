//! Image triage core: walk a folder of images one at a time and move each into
//! a left, right or down destination, with undo.
//!
//! [`session::Session`] is the entry point. It owns a bounded
//! [`cache::ContentCache`], a background [`prefetch::PrefetchScheduler`] and a
//! [`navigator::Navigator`] that keeps the pending queue and move history.

pub mod cache;
pub mod config;
pub mod error;
pub mod logging;
pub mod navigator;
pub mod prefetch;
pub mod scanner;
pub mod session;

pub use cache::{CacheLimits, ContentCache, DecodedImage, ImageLoader, Loader, RawLoader};
pub use config::AppConfig;
pub use error::{Result, TriageError};
pub use session::{Destinations, Direction, Outcome, Session, SessionOptions, SessionState};
