//! Cache entry definitions.

use std::path::PathBuf;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use crate::scanner::{FileRecord, Hash};

/// Remembered digests for one path.
///
/// The entry is only trusted while the file's live size and modification
/// time match exactly (nanosecond precision where the platform has it).
/// Either digest may be missing: most files only ever get a prehash.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEntry {
    /// Absolute path of the file
    pub path: PathBuf,
    /// File size in bytes when hashed
    pub size: u64,
    /// Whole seconds of the mtime relative to the Unix epoch
    pub mtime_secs: i64,
    /// Sub-second part of the mtime, always in `0..1_000_000_000`
    pub mtime_nanos: u32,
    /// BLAKE3 digest of the first 4 KiB
    pub prehash: Option<Hash>,
    /// BLAKE3 fingerprint of the full content
    pub hash: Option<Hash>,
}

impl CacheEntry {
    /// Build an entry with no digests yet.
    #[must_use]
    pub fn new(path: PathBuf, size: u64, mtime: SystemTime) -> Self {
        let (mtime_secs, mtime_nanos) = split_mtime(mtime);
        Self {
            path,
            size,
            mtime_secs,
            mtime_nanos,
            prehash: None,
            hash: None,
        }
    }

    /// Build an entry for a scanned record.
    #[must_use]
    pub fn for_record(record: &FileRecord) -> Self {
        Self::new(record.path.clone(), record.size, record.modified)
    }

    /// Set the prefix digest.
    #[must_use]
    pub fn with_prehash(mut self, prehash: Hash) -> Self {
        self.prehash = Some(prehash);
        self
    }

    /// Set the full fingerprint.
    #[must_use]
    pub fn with_hash(mut self, hash: Hash) -> Self {
        self.hash = Some(hash);
        self
    }

    /// Whether the entry still describes a file with this size and mtime.
    #[must_use]
    pub fn is_valid_for(&self, size: u64, mtime: SystemTime) -> bool {
        self.size == size && (self.mtime_secs, self.mtime_nanos) == split_mtime(mtime)
    }

    /// Keep digests from `older` that this entry lacks, if both describe
    /// the same file state.
    pub fn merge_from(&mut self, older: &CacheEntry) {
        if (self.size, self.mtime_secs, self.mtime_nanos)
            != (older.size, older.mtime_secs, older.mtime_nanos)
        {
            return;
        }
        self.prehash = self.prehash.or(older.prehash);
        self.hash = self.hash.or(older.hash);
    }

    /// Reconstruct the stored modification time.
    #[must_use]
    pub fn mtime(&self) -> SystemTime {
        join_mtime(self.mtime_secs, self.mtime_nanos)
    }
}

/// Split a timestamp into floor seconds and a non-negative nanosecond part.
fn split_mtime(mtime: SystemTime) -> (i64, u32) {
    match mtime.duration_since(UNIX_EPOCH) {
        Ok(d) => (d.as_secs() as i64, d.subsec_nanos()),
        Err(e) => {
            let d = e.duration();
            let secs = -(d.as_secs() as i64);
            match d.subsec_nanos() {
                0 => (secs, 0),
                n => (secs - 1, 1_000_000_000 - n),
            }
        }
    }
}

fn join_mtime(secs: i64, nanos: u32) -> SystemTime {
    if secs >= 0 {
        UNIX_EPOCH + Duration::new(secs as u64, nanos)
    } else {
        UNIX_EPOCH - Duration::from_secs(secs.unsigned_abs()) + Duration::from_nanos(u64::from(nanos))
    }
}
