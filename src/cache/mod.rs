//! Fingerprint caching for fast rescans.
//!
//! * [`database`]: SQLite persistence, in-memory index, checkpoints and recovery.
//! * [`entry`]: The cached record and its validity check.
//!
//! # Cache Invalidation
//!
//! Entries are keyed by absolute path and trusted only while the file's
//! size and modification time are exactly what they were when hashed. Any
//! difference is a miss and the file is hashed again. A corrupt or
//! incompatible cache file is never fatal; see [`HashCache::open_or_recover`].

pub mod database;
pub mod entry;

use std::path::PathBuf;

use directories::ProjectDirs;

pub use database::{CacheError, CacheResult, HashCache, DEFAULT_CHECKPOINT_INTERVAL};
pub use entry::CacheEntry;

/// Platform-specific default location of the cache database.
#[must_use]
pub fn default_cache_path() -> Option<PathBuf> {
    ProjectDirs::from("com", "mediasift", "mediasift")
        .map(|dirs| dirs.cache_dir().join("fingerprints.db"))
}
