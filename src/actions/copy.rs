//! Never-overwrite copying of planned survivors.
//!
//! # Overview
//!
//! Each copy:
//! - re-checks the source against its scan-time snapshot (TOCTOU protection)
//! - streams into a temporary sibling of the destination
//! - links the finished file into place only if the destination is still free
//! - carries over the source modification time
//!
//! Sources are only ever opened for reading.
//!
//! # Example
//!
//! ```no_run
//! use mediasift::actions::copy::{execute_plan, CopyConfig};
//!
//! let plan = Vec::new();
//! let result = execute_plan(&plan, &CopyConfig::default()).unwrap();
//! println!("{}", result.summary());
//! ```

use std::fs::{self, File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::SystemTime;

use bytesize::ByteSize;
use filetime::FileTime;
use rayon::prelude::*;
use serde::Serialize;
use thiserror::Error;

use crate::plan::{CopyPlanEntry, PlanReason};
use crate::progress::ProgressCallback;
use crate::scanner::FileRecord;

/// Error type for copy operations.
#[derive(Debug, Error)]
pub enum CopyError {
    /// Source was not found (may have been deleted or moved).
    #[error("source not found: {0}")]
    NotFound(PathBuf),

    /// Permission denied reading the source or writing the destination.
    #[error("permission denied: {0}")]
    PermissionDenied(PathBuf),

    /// Source changed since it was scanned.
    #[error("source modified since scan: {0}")]
    Modified(PathBuf),

    /// Something already occupies the destination.
    #[error("destination already exists: {0}")]
    DestinationExists(PathBuf),

    /// General I/O error.
    #[error("I/O error for {path}: {source}")]
    Io {
        /// Path the operation failed on
        path: PathBuf,
        /// The underlying I/O error
        #[source]
        source: io::Error,
    },
}

impl CopyError {
    fn from_io(path: &Path, e: io::Error) -> Self {
        match e.kind() {
            io::ErrorKind::NotFound => Self::NotFound(path.to_path_buf()),
            io::ErrorKind::PermissionDenied => Self::PermissionDenied(path.to_path_buf()),
            io::ErrorKind::AlreadyExists => Self::DestinationExists(path.to_path_buf()),
            _ => Self::Io {
                path: path.to_path_buf(),
                source: e,
            },
        }
    }

    /// Get the path associated with this error.
    #[must_use]
    pub fn path(&self) -> &Path {
        match self {
            Self::NotFound(p)
            | Self::PermissionDenied(p)
            | Self::Modified(p)
            | Self::DestinationExists(p)
            | Self::Io { path: p, .. } => p,
        }
    }
}

/// Final state of one planned copy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CopyStatus {
    /// The destination now holds a copy of the source
    Copied,
    /// The target already held identical content; nothing was written
    AlreadyPresent,
    /// The copy was attempted and failed
    Failed,
    /// The copy was not attempted because of shutdown
    Skipped,
}

/// Result of one planned copy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CopyOutcome {
    /// Source path
    pub source: PathBuf,
    /// Planned destination path
    pub destination: PathBuf,
    /// What happened
    pub status: CopyStatus,
    /// Error message for failed or skipped copies
    pub error: Option<String>,
    /// Bytes written
    pub bytes: u64,
}

/// Results of executing a plan, in plan order.
#[derive(Debug, Clone, Default)]
pub struct BatchCopyResult {
    /// One outcome per plan entry
    pub outcomes: Vec<CopyOutcome>,
    /// Total bytes written
    pub bytes_copied: u64,
    /// Whether shutdown stopped the batch early
    pub interrupted: bool,
}

impl BatchCopyResult {
    fn count(&self, status: CopyStatus) -> usize {
        self.outcomes.iter().filter(|o| o.status == status).count()
    }

    /// Number of successful copies.
    #[must_use]
    pub fn success_count(&self) -> usize {
        self.count(CopyStatus::Copied)
    }

    /// Number of failed copies.
    #[must_use]
    pub fn failure_count(&self) -> usize {
        self.count(CopyStatus::Failed)
    }

    /// Number of survivors the target already held.
    #[must_use]
    pub fn already_present_count(&self) -> usize {
        self.count(CopyStatus::AlreadyPresent)
    }

    /// Number of copies skipped because of shutdown.
    #[must_use]
    pub fn skipped_count(&self) -> usize {
        self.count(CopyStatus::Skipped)
    }

    /// Check if every survivor is now in the target.
    #[must_use]
    pub fn all_succeeded(&self) -> bool {
        self.outcomes
            .iter()
            .all(|o| matches!(o.status, CopyStatus::Copied | CopyStatus::AlreadyPresent))
    }

    /// Human-readable summary of the operation.
    #[must_use]
    pub fn summary(&self) -> String {
        let present = match self.already_present_count() {
            0 => String::new(),
            n => format!(", {} already present", n),
        };
        if self.all_succeeded() {
            format!(
                "Copied {} file(s){}, {}",
                self.success_count(),
                present,
                ByteSize::b(self.bytes_copied)
            )
        } else {
            format!(
                "Copied {} file(s){}, {} failed, {} skipped, {}",
                self.success_count(),
                present,
                self.failure_count(),
                self.skipped_count(),
                ByteSize::b(self.bytes_copied)
            )
        }
    }
}

/// Configuration for copy operations.
#[derive(Clone)]
pub struct CopyConfig {
    /// Number of copy worker threads.
    pub io_threads: usize,
    /// Verify size and mtime before copying (TOCTOU protection).
    pub verify_snapshot: bool,
    /// Give the copy the source's modification time.
    pub preserve_mtime: bool,
    /// Optional shutdown flag; no new copies start once it is set.
    pub shutdown_flag: Option<Arc<AtomicBool>>,
    /// Optional progress callback.
    pub progress_callback: Option<Arc<dyn ProgressCallback>>,
}

impl std::fmt::Debug for CopyConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CopyConfig")
            .field("io_threads", &self.io_threads)
            .field("verify_snapshot", &self.verify_snapshot)
            .field("preserve_mtime", &self.preserve_mtime)
            .field("shutdown_flag", &self.shutdown_flag)
            .finish_non_exhaustive()
    }
}

impl Default for CopyConfig {
    fn default() -> Self {
        Self {
            io_threads: 4,
            verify_snapshot: true,
            preserve_mtime: true,
            shutdown_flag: None,
            progress_callback: None,
        }
    }
}

impl CopyConfig {
    /// Set the number of copy worker threads (at least one).
    #[must_use]
    pub fn with_io_threads(mut self, threads: usize) -> Self {
        self.io_threads = threads.max(1);
        self
    }

    /// Enable/disable TOCTOU verification.
    #[must_use]
    pub fn with_verify_snapshot(mut self, verify: bool) -> Self {
        self.verify_snapshot = verify;
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

/// File metadata snapshot for TOCTOU verification.
#[derive(Debug, Clone)]
pub struct FileSnapshot {
    /// Path to the file.
    pub path: PathBuf,
    /// File size in bytes.
    pub size: u64,
    /// Last modification time.
    pub mtime: SystemTime,
}

impl FileSnapshot {
    /// Snapshot recorded by the scanner.
    #[must_use]
    pub fn from_record(record: &FileRecord) -> Self {
        Self {
            path: record.path.clone(),
            size: record.size,
            mtime: record.modified,
        }
    }

    /// Create a snapshot of a file's current state.
    ///
    /// # Errors
    ///
    /// Returns error if file doesn't exist or can't be accessed.
    pub fn capture(path: &Path) -> Result<Self, CopyError> {
        let metadata = fs::metadata(path).map_err(|e| CopyError::from_io(path, e))?;
        let mtime = metadata
            .modified()
            .map_err(|e| CopyError::from_io(path, e))?;
        Ok(Self {
            path: path.to_path_buf(),
            size: metadata.len(),
            mtime,
        })
    }

    /// Verify that the file still matches this snapshot.
    ///
    /// # Errors
    ///
    /// Returns error if file was modified, deleted, or can't be accessed.
    pub fn verify(&self) -> Result<(), CopyError> {
        let current = Self::capture(&self.path)?;
        if current.mtime != self.mtime || current.size != self.size {
            log::warn!(
                "File modified since scan: {} (size {} -> {})",
                self.path.display(),
                self.size,
                current.size
            );
            return Err(CopyError::Modified(self.path.clone()));
        }
        Ok(())
    }
}

/// Removes the temporary file unless the copy was committed.
struct TempFile {
    path: PathBuf,
    armed: bool,
}

impl Drop for TempFile {
    fn drop(&mut self) {
        if self.armed {
            if let Err(e) = fs::remove_file(&self.path) {
                log::debug!("Failed to remove {}: {}", self.path.display(), e);
            }
        }
    }
}

static TEMP_COUNTER: AtomicU64 = AtomicU64::new(0);

fn temp_sibling(destination: &Path) -> PathBuf {
    let name = destination
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let n = TEMP_COUNTER.fetch_add(1, Ordering::Relaxed);
    destination.with_file_name(format!(".{}.{}-{}.partial", name, std::process::id(), n))
}

fn destination_taken(destination: &Path) -> bool {
    fs::symlink_metadata(destination).is_ok()
}

/// Copy one file to a destination that must not exist yet.
///
/// Returns the number of bytes written.
///
/// # Errors
///
/// - `Modified` if the source no longer matches its snapshot
/// - `DestinationExists` if anything occupies the destination
/// - `NotFound`, `PermissionDenied` or `Io` for filesystem failures
pub fn copy_file(
    source: &FileRecord,
    destination: &Path,
    config: &CopyConfig,
) -> Result<u64, CopyError> {
    if config.verify_snapshot {
        FileSnapshot::from_record(source).verify()?;
    }
    if destination_taken(destination) {
        return Err(CopyError::DestinationExists(destination.to_path_buf()));
    }
    if let Some(parent) = destination.parent() {
        fs::create_dir_all(parent).map_err(|e| CopyError::from_io(parent, e))?;
    }

    let mut temp = TempFile {
        path: temp_sibling(destination),
        armed: true,
    };
    let mut reader = File::open(&source.path).map_err(|e| CopyError::from_io(&source.path, e))?;
    let mut writer = OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(&temp.path)
        .map_err(|e| CopyError::from_io(&temp.path, e))?;

    let bytes = io::copy(&mut reader, &mut writer).map_err(|e| CopyError::Io {
        path: source.path.clone(),
        source: e,
    })?;
    writer
        .sync_all()
        .map_err(|e| CopyError::from_io(&temp.path, e))?;
    drop(writer);

    if config.verify_snapshot && bytes != source.size {
        return Err(CopyError::Modified(source.path.clone()));
    }

    if config.preserve_mtime {
        filetime::set_file_mtime(&temp.path, FileTime::from_system_time(source.modified))
            .map_err(|e| CopyError::from_io(&temp.path, e))?;
    }

    // hard_link fails if the destination exists, so a racing writer is never clobbered
    match fs::hard_link(&temp.path, destination) {
        Ok(()) => {}
        Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
            return Err(CopyError::DestinationExists(destination.to_path_buf()));
        }
        Err(e) => {
            log::debug!(
                "Hard link unavailable for {} ({}), renaming instead",
                destination.display(),
                e
            );
            if destination_taken(destination) {
                return Err(CopyError::DestinationExists(destination.to_path_buf()));
            }
            fs::rename(&temp.path, destination).map_err(|e| CopyError::from_io(destination, e))?;
            temp.armed = false;
        }
    }

    Ok(bytes)
}

/// Execute a copy plan.
///
/// Destinations in a plan are unique, so entries run concurrently on a
/// pool of `config.io_threads` workers. Outcomes are returned in plan order.
///
/// # Errors
///
/// Returns an error only if the worker pool cannot be created. Per-file
/// failures are recorded in the result.
pub fn execute_plan(
    plan: &[CopyPlanEntry],
    config: &CopyConfig,
) -> Result<BatchCopyResult, rayon::ThreadPoolBuildError> {
    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(config.io_threads)
        .build()?;

    if let Some(ref callback) = config.progress_callback {
        callback.on_phase_start("copy", plan.len());
    }
    let done = AtomicUsize::new(0);

    let outcomes: Vec<CopyOutcome> = pool.install(|| {
        plan.par_iter()
            .map(|entry| {
                let mut outcome = CopyOutcome {
                    source: entry.source.path.clone(),
                    destination: entry.destination.clone(),
                    status: CopyStatus::Skipped,
                    error: None,
                    bytes: 0,
                };
                if config.is_shutdown_requested() {
                    outcome.error = Some("interrupted before copy".to_string());
                    return outcome;
                }

                if entry.reason == PlanReason::AlreadyPresent {
                    log::debug!(
                        "Not copying {}: identical to {}",
                        entry.source.path.display(),
                        entry.destination.display()
                    );
                    outcome.status = CopyStatus::AlreadyPresent;
                } else {
                    match copy_file(&entry.source, &entry.destination, config) {
                        Ok(bytes) => {
                            log::debug!(
                                "Copied {} -> {}",
                                entry.source.path.display(),
                                entry.destination.display()
                            );
                            outcome.status = CopyStatus::Copied;
                            outcome.bytes = bytes;
                        }
                        Err(e) => {
                            log::warn!("Failed to copy {}: {}", entry.source.path.display(), e);
                            outcome.status = CopyStatus::Failed;
                            outcome.error = Some(e.to_string());
                        }
                    }
                }

                if let Some(ref callback) = config.progress_callback {
                    let current = done.fetch_add(1, Ordering::Relaxed) + 1;
                    callback.on_progress(current, entry.source.path.to_string_lossy().as_ref());
                    callback.on_item_completed(outcome.bytes);
                }
                outcome
            })
            .collect()
    });

    if let Some(ref callback) = config.progress_callback {
        callback.on_phase_end("copy");
    }

    let result = BatchCopyResult {
        bytes_copied: outcomes.iter().map(|o| o.bytes).sum(),
        interrupted: config.is_shutdown_requested(),
        outcomes,
    };
    log::info!("{}", result.summary());
    Ok(result)
}
