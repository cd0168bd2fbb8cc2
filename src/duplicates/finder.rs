//! Duplicate finder implementation with multi-phase detection.
//!
//! # Overview
//!
//! This module runs the deduplication pipeline over scanned records:
//! 1. **Phase 1 - Size grouping**: Files with a unique size survive untouched
//!    (see [`crate::duplicates::groups`])
//! 2. **Phase 2 - Prehash**: BLAKE3 of the first 4 KiB of every size-group
//!    member; files whose prefix is unique survive without a full read
//! 3. **Phase 3 - Fingerprint**: Full BLAKE3 hash of every prehash match
//! 4. **Phase 4 - Verify**: Byte-for-byte comparison of every fingerprint
//!    match against the canonical of its sub-group
//!
//! Both digests are served from the [`HashCache`] when size and mtime still
//! match.
//!
//! A fingerprint match is never trusted on its own. Members of a
//! fingerprint bucket that turn out to differ start a new sub-group.
//!
//! # Example
//!
//! ```no_run
//! use mediasift::duplicates::{DuplicateFinder, FinderConfig};
//! use mediasift::scanner::{MultiWalker, ScanConfig};
//! use std::path::PathBuf;
//!
//! let walker = MultiWalker::new(vec![PathBuf::from("/backups/phone")], ScanConfig::default());
//! let records = walker.walk().filter_map(Result::ok).collect();
//!
//! let finder = DuplicateFinder::new(FinderConfig::default().with_io_threads(2));
//! let outcome = finder.find_duplicates(records).unwrap();
//! println!("{} duplicate groups", outcome.groups.len());
//! ```

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use rayon::prelude::*;

use super::groups::{canonical_order, group_by_size, sort_canonical, DuplicateGroup};
use crate::cache::{CacheEntry, HashCache};
use crate::error::{FailureStage, FileFailure};
use crate::progress::ProgressCallback;
use crate::scanner::{
    ContentHasher, FileRecord, Hash, HashError, Hasher, Verifier, DEFAULT_CHUNK_SIZE,
};

/// Configuration for the duplicate finder.
#[derive(Clone)]
pub struct FinderConfig {
    /// Number of I/O threads for hashing and verification.
    /// Default is 4 to prevent disk thrashing.
    pub io_threads: usize,
    /// Read buffer size used for hashing and comparison.
    pub chunk_size: usize,
    /// Optional fingerprint cache for faster rescans.
    pub cache: Option<Arc<HashCache>>,
    /// Optional shutdown flag for graceful termination.
    pub shutdown_flag: Option<Arc<AtomicBool>>,
    /// Optional progress callback.
    pub progress_callback: Option<Arc<dyn ProgressCallback>>,
}

impl std::fmt::Debug for FinderConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FinderConfig")
            .field("io_threads", &self.io_threads)
            .field("chunk_size", &self.chunk_size)
            .field("cache", &self.cache.as_ref().map(|_| "<cache>"))
            .field("shutdown_flag", &self.shutdown_flag)
            .field(
                "progress_callback",
                &self.progress_callback.as_ref().map(|_| "<callback>"),
            )
            .finish()
    }
}

impl Default for FinderConfig {
    fn default() -> Self {
        Self {
            io_threads: 4,
            chunk_size: DEFAULT_CHUNK_SIZE,
            cache: None,
            shutdown_flag: None,
            progress_callback: None,
        }
    }
}

impl FinderConfig {
    /// Set the number of I/O threads (at least one).
    #[must_use]
    pub fn with_io_threads(mut self, threads: usize) -> Self {
        self.io_threads = threads.max(1);
        self
    }

    /// Set the read buffer size.
    #[must_use]
    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size;
        self
    }

    /// Set the fingerprint cache.
    #[must_use]
    pub fn with_cache(mut self, cache: Arc<HashCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Set the shutdown flag for graceful termination.
    #[must_use]
    pub fn with_shutdown_flag(mut self, flag: Arc<AtomicBool>) -> Self {
        self.shutdown_flag = Some(flag);
        self
    }

    /// Set the progress callback.
    #[must_use]
    pub fn with_progress_callback(mut self, callback: Arc<dyn ProgressCallback>) -> Self {
        self.progress_callback = Some(callback);
        self
    }

    fn is_shutdown_requested(&self) -> bool {
        self.shutdown_flag
            .as_ref()
            .is_some_and(|f| f.load(Ordering::SeqCst))
    }
}

/// Errors that abort duplicate finding.
///
/// Per-file read failures are not errors; they end up in
/// [`DedupOutcome::failures`].
#[derive(thiserror::Error, Debug)]
pub enum FinderError {
    /// The run was interrupted by user (Ctrl+C or shutdown signal).
    #[error("Deduplication interrupted by user")]
    Interrupted,

    /// The I/O worker pool could not be created.
    #[error("Failed to start I/O worker pool: {0}")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),
}

/// Counters collected while finding duplicates.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DedupStats {
    /// Records handed to the finder
    pub total_files: usize,
    /// Bytes of all records handed to the finder
    pub total_bytes: u64,
    /// Records that survived on size alone
    pub unique_by_size: usize,
    /// Records prehashed (from disk or cache)
    pub prehashed: usize,
    /// Prehashes served by the cache
    pub prehash_cache_hits: usize,
    /// Records that survived on their prehash
    pub unique_by_prehash: usize,
    /// Records fingerprinted (from disk or cache)
    pub hashed: usize,
    /// Fingerprints served by the cache
    pub cache_hits: usize,
    /// Fingerprints computed from disk
    pub cache_misses: usize,
    /// Records dropped because they could not be read
    pub failed: usize,
    /// Verified groups of two or more files
    pub duplicate_groups: usize,
    /// Files that will not be copied
    pub redundant_files: usize,
    /// Bytes held by redundant files
    pub redundant_bytes: u64,
    /// Byte-for-byte comparisons performed
    pub verifications: usize,
    /// Fingerprint buckets that verification split apart
    pub split_buckets: usize,
}

/// Result of a deduplication pass.
#[derive(Debug, Clone, Default)]
pub struct DedupOutcome {
    /// Verified groups, ordered by their canonical member
    pub groups: Vec<DuplicateGroup>,
    /// One record per distinct content, in canonical order
    pub survivors: Vec<FileRecord>,
    /// Files that could not be hashed or verified
    pub failures: Vec<FileFailure>,
    /// Counters for logging
    pub stats: DedupStats,
}

/// Which digest a hashing pass computes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Digest {
    Prefix,
    Full,
}

impl Digest {
    fn phase(self) -> &'static str {
        match self {
            Self::Prefix => "prehash",
            Self::Full => "fingerprint",
        }
    }
}

/// Records bucketed by (size, digest), with counters for the pass.
#[derive(Default)]
struct DigestBuckets {
    buckets: HashMap<(u64, Hash), Vec<FileRecord>>,
    hashed: usize,
    cache_hits: usize,
}

/// Outcome of hashing one record.
enum Fingerprint {
    Hashed { hash: Hash, cache_hit: bool },
    Failed(HashError),
    Skipped,
}

/// Sub-groups produced by verifying one fingerprint bucket.
struct VerifiedBucket {
    size: u64,
    hash: Hash,
    subgroups: Vec<Vec<FileRecord>>,
    failures: Vec<FileFailure>,
    verifications: usize,
}

/// Multi-phase duplicate finder.
pub struct DuplicateFinder {
    config: FinderConfig,
    hasher: Arc<dyn ContentHasher>,
    verifier: Verifier,
}

impl std::fmt::Debug for DuplicateFinder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DuplicateFinder")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl DuplicateFinder {
    /// Create a new duplicate finder with the given configuration.
    #[must_use]
    pub fn new(config: FinderConfig) -> Self {
        let mut hasher = Hasher::new().with_chunk_size(config.chunk_size);
        let mut verifier = Verifier::new().with_chunk_size(config.chunk_size);
        if let Some(ref flag) = config.shutdown_flag {
            hasher = hasher.with_shutdown_flag(flag.clone());
            verifier = verifier.with_shutdown_flag(flag.clone());
        }
        Self {
            config,
            hasher: Arc::new(hasher),
            verifier,
        }
    }

    /// Create a new duplicate finder with default configuration.
    #[must_use]
    pub fn with_defaults() -> Self {
        Self::new(FinderConfig::default())
    }

    /// Replace the fingerprint function.
    ///
    /// Verification still reads file content, so a weak hasher can only
    /// cost extra comparisons, never a wrong group.
    #[must_use]
    pub fn with_hasher(mut self, hasher: Arc<dyn ContentHasher>) -> Self {
        self.hasher = hasher;
        self
    }

    /// Partition `records` into verified duplicate groups and survivors.
    ///
    /// Every input record ends up in exactly one of: a group's canonical
    /// (which is also a survivor), a group's redundant members, the
    /// survivors, or the failures.
    ///
    /// # Errors
    ///
    /// Returns [`FinderError::Interrupted`] if shutdown is requested, and
    /// [`FinderError::ThreadPool`] if the worker pool cannot start.
    pub fn find_duplicates(&self, records: Vec<FileRecord>) -> Result<DedupOutcome, FinderError> {
        if self.config.is_shutdown_requested() {
            return Err(FinderError::Interrupted);
        }

        let mut outcome = DedupOutcome::default();

        // Phase 1: size grouping
        let grouping = group_by_size(records);
        outcome.stats.total_files = grouping.stats.total_files;
        outcome.stats.total_bytes = grouping.stats.total_bytes;
        outcome.stats.unique_by_size = grouping.stats.unique_sizes;
        outcome.survivors.extend(grouping.unique);

        let mut candidates: Vec<FileRecord> = grouping.candidates.into_values().flatten().collect();
        sort_canonical(&mut candidates);

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.config.io_threads)
            .build()?;

        // Phase 2: prehash
        let prehashes = self.digest_all(&pool, candidates, Digest::Prefix);
        if self.config.is_shutdown_requested() {
            log::info!("Prehashing interrupted by shutdown signal");
            return Err(FinderError::Interrupted);
        }
        let prefixed = bucket_digests(prehashes, Digest::Prefix, &mut outcome.failures)?;
        outcome.stats.prehashed = prefixed.hashed;
        outcome.stats.prehash_cache_hits = prefixed.cache_hits;

        let mut candidates = Vec::new();
        for (_, mut bucket) in prefixed.buckets {
            if bucket.len() == 1 {
                outcome.stats.unique_by_prehash += 1;
                outcome.survivors.append(&mut bucket);
            } else {
                candidates.append(&mut bucket);
            }
        }
        sort_canonical(&mut candidates);

        // Phase 3: fingerprints
        let fingerprints = self.digest_all(&pool, candidates, Digest::Full);
        if self.config.is_shutdown_requested() {
            log::info!("Fingerprinting interrupted by shutdown signal");
            return Err(FinderError::Interrupted);
        }
        let fingerprinted = bucket_digests(fingerprints, Digest::Full, &mut outcome.failures)?;
        outcome.stats.hashed = fingerprinted.hashed;
        outcome.stats.cache_hits = fingerprinted.cache_hits;
        outcome.stats.cache_misses = fingerprinted.hashed - fingerprinted.cache_hits;
        let buckets = fingerprinted.buckets;

        let mut to_verify: Vec<((u64, Hash), Vec<FileRecord>)> = Vec::new();
        for (key, mut bucket) in buckets {
            if bucket.len() == 1 {
                outcome.survivors.append(&mut bucket);
            } else {
                sort_canonical(&mut bucket);
                to_verify.push((key, bucket));
            }
        }
        to_verify.sort_by(|(_, a), (_, b)| canonical_order(&a[0], &b[0]));

        // Phase 4: verification
        let verified = self.verify_all(&pool, to_verify)?;
        for bucket in verified {
            outcome.stats.verifications += bucket.verifications;
            if bucket.subgroups.len() > 1 {
                outcome.stats.split_buckets += 1;
                log::debug!(
                    "Fingerprint {} split into {} groups after comparison",
                    crate::scanner::hash_to_hex(&bucket.hash),
                    bucket.subgroups.len()
                );
            }
            outcome.failures.extend(bucket.failures);
            for mut members in bucket.subgroups {
                if members.len() == 1 {
                    outcome.survivors.append(&mut members);
                } else {
                    let group = DuplicateGroup::new(bucket.hash, bucket.size, members);
                    if let Some(canonical) = group.canonical() {
                        outcome.survivors.push(canonical.clone());
                    }
                    outcome.stats.redundant_files += group.redundant().len();
                    outcome.stats.redundant_bytes += group.redundant_bytes();
                    outcome.groups.push(group);
                }
            }
        }

        outcome.stats.duplicate_groups = outcome.groups.len();
        outcome.stats.failed = outcome.failures.len();
        sort_canonical(&mut outcome.survivors);
        outcome
            .groups
            .sort_by(|a, b| canonical_order(&a.files[0], &b.files[0]));
        outcome.failures.sort_by(|a, b| a.path.cmp(&b.path));

        log::info!(
            "Deduplication: {} files, {} groups, {} redundant files, {} failed",
            outcome.stats.total_files,
            outcome.stats.duplicate_groups,
            outcome.stats.redundant_files,
            outcome.stats.failed
        );
        log::debug!(
            "Prehash: {} files, {} unique, {} from cache",
            outcome.stats.prehashed,
            outcome.stats.unique_by_prehash,
            outcome.stats.prehash_cache_hits
        );
        log::debug!(
            "Fingerprint cache: {} hits, {} misses",
            outcome.stats.cache_hits,
            outcome.stats.cache_misses
        );

        Ok(outcome)
    }

    fn digest_all(
        &self,
        pool: &rayon::ThreadPool,
        candidates: Vec<FileRecord>,
        digest: Digest,
    ) -> Vec<(FileRecord, Fingerprint)> {
        if let Some(ref callback) = self.config.progress_callback {
            callback.on_phase_start(digest.phase(), candidates.len());
        }
        let done = AtomicUsize::new(0);

        let results = pool.install(|| {
            candidates
                .into_par_iter()
                .map(|record| {
                    if self.config.is_shutdown_requested() {
                        return (record, Fingerprint::Skipped);
                    }
                    let fingerprint = self.digest(&record, digest);
                    if let Some(ref callback) = self.config.progress_callback {
                        let current = done.fetch_add(1, Ordering::Relaxed) + 1;
                        callback.on_progress(current, record.path.to_string_lossy().as_ref());
                        callback.on_item_completed(record.size);
                    }
                    (record, fingerprint)
                })
                .collect()
        });

        if let Some(ref callback) = self.config.progress_callback {
            callback.on_phase_end(digest.phase());
        }
        results
    }

    fn digest(&self, record: &FileRecord, digest: Digest) -> Fingerprint {
        if let Some(ref cache) = self.config.cache {
            let cached = match digest {
                Digest::Prefix => cache.lookup_prehash(&record.path, record.size, record.modified),
                Digest::Full => cache.lookup(&record.path, record.size, record.modified),
            };
            if let Some(hash) = cached {
                log::trace!("{} cache hit: {}", digest.phase(), record.path.display());
                return Fingerprint::Hashed {
                    hash,
                    cache_hit: true,
                };
            }
            log::trace!("{} cache miss: {}", digest.phase(), record.path.display());
        }

        let computed = match digest {
            Digest::Prefix => self.hasher.prehash(&record.path),
            Digest::Full => self.hasher.fingerprint(&record.path),
        };
        match computed {
            Ok(hash) => {
                if let Some(ref cache) = self.config.cache {
                    let entry = CacheEntry::for_record(record);
                    cache.record(match digest {
                        Digest::Prefix => entry.with_prehash(hash),
                        Digest::Full => entry.with_hash(hash),
                    });
                }
                Fingerprint::Hashed {
                    hash,
                    cache_hit: false,
                }
            }
            Err(e) => Fingerprint::Failed(e),
        }
    }

    fn verify_all(
        &self,
        pool: &rayon::ThreadPool,
        buckets: Vec<((u64, Hash), Vec<FileRecord>)>,
    ) -> Result<Vec<VerifiedBucket>, FinderError> {
        if let Some(ref callback) = self.config.progress_callback {
            callback.on_phase_start("verify", buckets.len());
        }
        let done = AtomicUsize::new(0);

        let results: Result<Vec<VerifiedBucket>, HashError> = pool.install(|| {
            buckets
                .into_par_iter()
                .map(|((size, hash), bucket)| {
                    let verified = self.verify_bucket(size, hash, bucket);
                    if let Some(ref callback) = self.config.progress_callback {
                        let current = done.fetch_add(1, Ordering::Relaxed) + 1;
                        callback.on_progress(current, &crate::scanner::hash_to_hex(&hash));
                    }
                    verified
                })
                .collect()
        });

        if let Some(ref callback) = self.config.progress_callback {
            callback.on_phase_end("verify");
        }

        match results {
            Ok(verified) if !self.config.is_shutdown_requested() => Ok(verified),
            Ok(_) => Err(FinderError::Interrupted),
            Err(e) => {
                log::debug!("Verification stopped: {}", e);
                Err(FinderError::Interrupted)
            }
        }
    }

    /// Split one fingerprint bucket into byte-identical sub-groups.
    ///
    /// `bucket` must be in canonical order, so each sub-group's first member
    /// is its canonical. A read failure is charged to whichever file failed:
    /// a failed canonical leaves its sub-group and the next member takes
    /// over, while a failed candidate is dropped. Only interruption is
    /// returned as an error.
    fn verify_bucket(
        &self,
        size: u64,
        hash: Hash,
        bucket: Vec<FileRecord>,
    ) -> Result<VerifiedBucket, HashError> {
        let mut verified = VerifiedBucket {
            size,
            hash,
            subgroups: Vec::new(),
            failures: Vec::new(),
            verifications: 0,
        };

        'files: for record in bucket {
            let mut index = 0;
            while index < verified.subgroups.len() {
                verified.verifications += 1;
                let result = self
                    .verifier
                    .are_identical(&verified.subgroups[index][0].path, &record.path);
                match result {
                    Ok(true) => {
                        verified.subgroups[index].push(record);
                        continue 'files;
                    }
                    Ok(false) => {
                        log::debug!(
                            "Fingerprint match but content differs: {} vs {}",
                            verified.subgroups[index][0].path.display(),
                            record.path.display()
                        );
                        index += 1;
                    }
                    Err(e) if e.is_interrupted() => return Err(e),
                    Err(e) if e.path() == verified.subgroups[index][0].path.as_path() => {
                        let subgroup = &mut verified.subgroups[index];
                        let canonical = subgroup.remove(0);
                        log::warn!("Failed to verify {}: {}", canonical.path.display(), e);
                        verified
                            .failures
                            .push(FileFailure::new(canonical.path, FailureStage::Verify, e));
                        if subgroup.is_empty() {
                            verified.subgroups.remove(index);
                        }
                        // Retry against the promoted canonical.
                    }
                    Err(e) => {
                        log::warn!("Failed to verify {}: {}", record.path.display(), e);
                        verified
                            .failures
                            .push(FileFailure::new(record.path, FailureStage::Verify, e));
                        continue 'files;
                    }
                }
            }
            verified.subgroups.push(vec![record]);
        }

        Ok(verified)
    }
}

/// Bucket hashed records by (size, digest); read failures go to `failures`.
fn bucket_digests(
    results: Vec<(FileRecord, Fingerprint)>,
    digest: Digest,
    failures: &mut Vec<FileFailure>,
) -> Result<DigestBuckets, FinderError> {
    let mut out = DigestBuckets::default();
    for (record, fingerprint) in results {
        match fingerprint {
            Fingerprint::Hashed { hash, cache_hit } => {
                out.hashed += 1;
                if cache_hit {
                    out.cache_hits += 1;
                }
                out.buckets.entry((record.size, hash)).or_default().push(record);
            }
            Fingerprint::Failed(e) if e.is_interrupted() => return Err(FinderError::Interrupted),
            Fingerprint::Failed(e) => {
                log::warn!("Failed to {} {}: {}", digest.phase(), record.path.display(), e);
                failures.push(FileFailure::new(record.path, FailureStage::Hash, e));
            }
            Fingerprint::Skipped => return Err(FinderError::Interrupted),
        }
    }
    Ok(out)
}
