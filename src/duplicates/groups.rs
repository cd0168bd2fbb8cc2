//! Size bucketing, canonical ordering and verified duplicate groups.
//!
//! # Overview
//!
//! Size grouping is the first phase of duplicate detection. Files with a
//! size no other file shares cannot be duplicates, so they go straight to
//! the survivors and never touch the hasher.
//!
//! # Example
//!
//! ```
//! use mediasift::scanner::FileRecord;
//! use mediasift::duplicates::group_by_size;
//! use std::path::PathBuf;
//! use std::time::SystemTime;
//!
//! let files = vec![
//!     FileRecord::new(PathBuf::from("/a/1.jpg"), 1024, SystemTime::UNIX_EPOCH, 0),
//!     FileRecord::new(PathBuf::from("/b/1.jpg"), 1024, SystemTime::UNIX_EPOCH, 1),
//!     FileRecord::new(PathBuf::from("/a/2.jpg"), 2048, SystemTime::UNIX_EPOCH, 0),
//! ];
//!
//! let grouping = group_by_size(files);
//!
//! assert_eq!(grouping.stats.total_files, 3);
//! assert_eq!(grouping.stats.potential_duplicates, 2);
//! assert_eq!(grouping.candidates.len(), 1);
//! assert_eq!(grouping.unique.len(), 1);
//! ```

use std::cmp::Ordering;
use std::collections::HashMap;
use std::path::PathBuf;

use crate::scanner::{FileRecord, Hash};

/// Canonical preference between two records.
///
/// Files from an earlier source root win; within a root the
/// lexicographically smallest path wins.
#[must_use]
pub fn canonical_order(a: &FileRecord, b: &FileRecord) -> Ordering {
    a.root_index
        .cmp(&b.root_index)
        .then_with(|| a.path.cmp(&b.path))
}

/// Sort records so the preferred canonical comes first.
pub fn sort_canonical(records: &mut [FileRecord]) {
    records.sort_by(canonical_order);
}

/// Files verified byte-identical to each other.
///
/// `files[0]` is the canonical survivor; the rest are redundant copies.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DuplicateGroup {
    /// BLAKE3 fingerprint shared by every member
    pub fingerprint: Hash,
    /// File size in bytes, shared by every member
    pub size: u64,
    /// Members in canonical order
    pub files: Vec<FileRecord>,
}

impl DuplicateGroup {
    /// Create a group, putting members in canonical order.
    #[must_use]
    pub fn new(fingerprint: Hash, size: u64, mut files: Vec<FileRecord>) -> Self {
        sort_canonical(&mut files);
        Self {
            fingerprint,
            size,
            files,
        }
    }

    /// Number of files in this group.
    #[must_use]
    pub fn len(&self) -> usize {
        self.files.len()
    }

    /// Check if this group is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    /// The surviving member.
    #[must_use]
    pub fn canonical(&self) -> Option<&FileRecord> {
        self.files.first()
    }

    /// Members that will not be copied.
    #[must_use]
    pub fn redundant(&self) -> &[FileRecord] {
        self.files.get(1..).unwrap_or(&[])
    }

    /// Bytes held by redundant members.
    #[must_use]
    pub fn redundant_bytes(&self) -> u64 {
        self.size * self.redundant().len() as u64
    }

    /// Fingerprint as hexadecimal string.
    #[must_use]
    pub fn hash_hex(&self) -> String {
        crate::scanner::hash_to_hex(&self.fingerprint)
    }

    /// Paths of all members in canonical order.
    #[must_use]
    pub fn paths(&self) -> Vec<PathBuf> {
        self.files.iter().map(|f| f.path.clone()).collect()
    }
}

/// Statistics from size grouping phase.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GroupingStats {
    /// Total number of files processed
    pub total_files: usize,
    /// Total bytes of all files processed
    pub total_bytes: u64,
    /// Files whose size no other file shares
    pub unique_sizes: usize,
    /// Files in size buckets of two or more
    pub potential_duplicates: usize,
    /// Number of size buckets with two or more files
    pub size_groups: usize,
}

impl GroupingStats {
    /// Percentage of files eliminated by size alone.
    #[must_use]
    pub fn elimination_rate(&self) -> f64 {
        if self.total_files == 0 {
            0.0
        } else {
            (self.unique_sizes as f64 / self.total_files as f64) * 100.0
        }
    }
}

/// Result of bucketing records by size.
#[derive(Debug, Default)]
pub struct SizeGrouping {
    /// Size buckets holding two or more files
    pub candidates: HashMap<u64, Vec<FileRecord>>,
    /// Files with a size no other file shares
    pub unique: Vec<FileRecord>,
    /// Counters for logging
    pub stats: GroupingStats,
}

/// Group files by exact size (Phase 1).
#[must_use]
pub fn group_by_size(files: impl IntoIterator<Item = FileRecord>) -> SizeGrouping {
    let mut by_size: HashMap<u64, Vec<FileRecord>> = HashMap::new();
    let mut stats = GroupingStats::default();

    for file in files {
        stats.total_files += 1;
        stats.total_bytes += file.size;
        by_size.entry(file.size).or_default().push(file);
    }

    let mut grouping = SizeGrouping::default();
    for (size, bucket) in by_size {
        if bucket.len() > 1 {
            stats.potential_duplicates += bucket.len();
            stats.size_groups += 1;
            grouping.candidates.insert(size, bucket);
        } else {
            stats.unique_sizes += bucket.len();
            grouping.unique.extend(bucket);
        }
    }

    log::debug!(
        "Size grouping: {} files, {} unique sizes ({:.1}% eliminated), {} size groups",
        stats.total_files,
        stats.unique_sizes,
        stats.elimination_rate(),
        stats.size_groups
    );

    grouping.stats = stats;
    grouping
}
