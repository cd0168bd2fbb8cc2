//! Run orchestration.
//!
//! A run moves through the stages in [`Stage`] strictly in order:
//! scan, dedup, classify, plan, report, then (apply mode only) copy and
//! final report. Only the copy stage writes outside the cache and the
//! report file, and it only writes under the target root.

use std::fmt;
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use bytesize::ByteSize;

use crate::actions::{execute_plan, CopyConfig};
use crate::cache::{default_cache_path, HashCache};
use crate::classify::{ClassifyError, DateClassifier};
use crate::config::{ConfigError, Settings};
use crate::duplicates::{reconcile, DedupOutcome, DuplicateFinder, FinderConfig, FinderError};
use crate::error::{ExitCode, FailureStage, FileFailure};
use crate::output::{DiffReport, JsonOutputError, Report};
use crate::plan::CopyPlanner;
use crate::progress::ProgressCallback;
use crate::scanner::{
    validate_roots, FileRecord, MultiWalker, ScanConfig, ScanError, Verifier,
};

/// Stages of a run, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Stage {
    /// Walk the source roots
    Scan,
    /// Size, fingerprint and verify
    Dedup,
    /// Assign date buckets to survivors
    Classify,
    /// Choose destinations
    Plan,
    /// Write the planned report
    Report,
    /// Copy survivors (apply mode only)
    ExecuteCopy,
    /// Rewrite the report with copy results (apply mode only)
    FinalReport,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Scan => "scan",
            Self::Dedup => "dedup",
            Self::Classify => "classify",
            Self::Plan => "plan",
            Self::Report => "report",
            Self::ExecuteCopy => "copy",
            Self::FinalReport => "final report",
        };
        f.write_str(name)
    }
}

/// Errors that end a run early.
#[derive(thiserror::Error, Debug)]
pub enum PipelineError {
    /// The run was interrupted by the user.
    #[error("Interrupted by user")]
    Interrupted,

    /// The configuration could not be loaded.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// A source root is missing, unreadable, or overlaps another root.
    #[error("Invalid source root: {0}")]
    InvalidRoot(#[from] ScanError),

    /// The target root cannot be created or written.
    #[error("Target {path} is not writable: {source}")]
    TargetNotWritable {
        /// Target root
        path: PathBuf,
        /// The underlying I/O error
        #[source]
        source: io::Error,
    },

    /// An output path overlaps a source tree.
    #[error("{path} overlaps source root {root}; source trees are never written")]
    OverlapsSourceRoot {
        /// The offending output path
        path: PathBuf,
        /// The source root containing it
        root: PathBuf,
    },

    /// A worker pool could not be created.
    #[error("Failed to start worker pool: {0}")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),

    /// The JSON report could not be written.
    #[error("Failed to write report {path}: {source}")]
    Report {
        /// Report path
        path: PathBuf,
        /// The underlying error
        #[source]
        source: JsonOutputError,
    },
}

impl From<FinderError> for PipelineError {
    fn from(e: FinderError) -> Self {
        match e {
            FinderError::Interrupted => Self::Interrupted,
            FinderError::ThreadPool(e) => Self::ThreadPool(e),
        }
    }
}

impl From<ClassifyError> for PipelineError {
    fn from(e: ClassifyError) -> Self {
        match e {
            ClassifyError::Interrupted => Self::Interrupted,
            ClassifyError::ThreadPool(e) => Self::ThreadPool(e),
        }
    }
}

/// Fingerprint cache behaviour for a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheMode {
    /// Load and update the persistent cache
    Enabled,
    /// Empty the persistent cache first, then use it
    Cleared,
    /// Keep fingerprints in memory only
    Disabled,
}

/// Inputs for a deduplicate-and-copy run.
#[derive(Debug, Clone)]
pub struct RunOptions {
    /// Source roots, in priority order
    pub roots: Vec<PathBuf>,
    /// Destination root
    pub target: PathBuf,
    /// Where the JSON report goes
    pub output_json: PathBuf,
    /// Plan only; copy nothing
    pub dry_run: bool,
    /// Effective settings
    pub settings: Settings,
    /// Cache behaviour
    pub cache_mode: CacheMode,
}

/// Inputs for a two-tree comparison.
#[derive(Debug, Clone)]
pub struct DiffOptions {
    /// Folder A (root index 0)
    pub folder_a: PathBuf,
    /// Folder B (root index 1)
    pub folder_b: PathBuf,
    /// Where the JSON report goes
    pub output_json: PathBuf,
    /// Effective settings
    pub settings: Settings,
    /// Cache behaviour
    pub cache_mode: CacheMode,
}

/// Result of a completed run.
#[derive(Debug, Clone)]
pub struct RunOutcome {
    /// The report as written
    pub report: Report,
    /// Process exit code for this outcome
    pub exit_code: ExitCode,
}

/// Result of a completed comparison.
#[derive(Debug, Clone)]
pub struct DiffOutcome {
    /// The report as written
    pub report: DiffReport,
    /// Process exit code for this outcome
    pub exit_code: ExitCode,
}

/// Drives runs with a shared shutdown flag and optional progress display.
pub struct Pipeline {
    shutdown_flag: Arc<AtomicBool>,
    progress: Option<Arc<dyn ProgressCallback>>,
}

impl Pipeline {
    /// Create a pipeline observing `shutdown_flag`.
    #[must_use]
    pub fn new(shutdown_flag: Arc<AtomicBool>) -> Self {
        Self {
            shutdown_flag,
            progress: None,
        }
    }

    /// Report progress through `callback`.
    #[must_use]
    pub fn with_progress(mut self, callback: Arc<dyn ProgressCallback>) -> Self {
        self.progress = Some(callback);
        self
    }

    fn is_shutdown_requested(&self) -> bool {
        self.shutdown_flag.load(Ordering::SeqCst)
    }

    fn enter(&self, stage: Stage) -> Result<(), PipelineError> {
        if self.is_shutdown_requested() {
            return Err(PipelineError::Interrupted);
        }
        log::info!("Stage: {}", stage);
        Ok(())
    }

    /// Deduplicate the source roots and plan (or perform) the copy.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError`] for configuration problems, interruption,
    /// or an unwritable report. Per-file failures do not abort the run.
    pub fn run(&self, options: &RunOptions) -> Result<RunOutcome, PipelineError> {
        let roots = validate_roots(&options.roots)?;
        let target = absolute(&options.target)?;
        let output_json = absolute(&options.output_json)?;
        ensure_outside_roots(&target, &roots)?;
        ensure_outside_roots(&output_json, &roots)?;
        if let Some(root) = roots.iter().find(|root| root.starts_with(&target)) {
            return Err(PipelineError::OverlapsSourceRoot {
                path: target,
                root: root.clone(),
            });
        }
        check_target(&target, !options.dry_run)?;

        let cache = open_cache(&options.settings, options.cache_mode);

        self.enter(Stage::Scan)?;
        let (records, scan_failures) = self.scan(&roots, &options.settings);
        if self.is_shutdown_requested() {
            return Err(PipelineError::Interrupted);
        }

        self.enter(Stage::Dedup)?;
        let dedup = self.dedup(records, &options.settings, &cache);
        finish_cache(&cache, &roots);
        let mut outcome = dedup?;
        outcome.failures.extend(scan_failures);
        outcome.failures.sort_by(|a, b| a.path.cmp(&b.path));

        self.enter(Stage::Classify)?;
        let mut classifier = DateClassifier::default()
            .with_io_threads(options.settings.io_threads)
            .with_shutdown_flag(self.shutdown_flag.clone());
        if let Some(ref callback) = self.progress {
            classifier = classifier.with_progress_callback(callback.clone());
        }
        let classifications = classifier.classify_all(&outcome.survivors)?;

        self.enter(Stage::Plan)?;
        let mut planner = CopyPlanner::new(&target, options.settings.layout)
            .with_verifier(Verifier::new().with_chunk_size(options.settings.chunk_size));
        let plan = planner.plan(
            outcome
                .survivors
                .iter()
                .cloned()
                .zip(classifications.into_iter().map(|c| c.bucket)),
        );

        self.enter(Stage::Report)?;
        let mut report = Report::new(options.dry_run, &outcome, &plan);
        write_report(&output_json, |w| report.write_to(w, true))?;

        if !options.dry_run {
            self.enter(Stage::ExecuteCopy)?;
            let mut copy_config = CopyConfig::default()
                .with_io_threads(options.settings.io_threads)
                .with_shutdown_flag(self.shutdown_flag.clone());
            if let Some(ref callback) = self.progress {
                copy_config = copy_config.with_progress_callback(callback.clone());
            }
            let result = execute_plan(&plan, &copy_config)?;

            log::info!("Stage: {}", Stage::FinalReport);
            report = report.with_copy_results(&result);
            write_report(&output_json, |w| report.write_to(w, true))?;
            if result.interrupted {
                return Err(PipelineError::Interrupted);
            }
        }

        log::info!(
            "{} duplicate groups, {} redundant files ({}), {} survivors ({}), {} failures",
            report.duplicate_group_count,
            report.redundant_file_count,
            ByteSize::b(report.redundant_total_bytes),
            report.survivor_file_count,
            ByteSize::b(report.survivor_total_bytes),
            report.failures.len()
        );

        let exit_code = if report.has_failures() {
            ExitCode::PartialFailure
        } else {
            ExitCode::Success
        };
        Ok(RunOutcome { report, exit_code })
    }

    /// List files unique to each of two folders.
    ///
    /// # Errors
    ///
    /// Same conditions as [`Pipeline::run`], minus the target checks.
    pub fn diff(&self, options: &DiffOptions) -> Result<DiffOutcome, PipelineError> {
        let roots = validate_roots(&[options.folder_a.clone(), options.folder_b.clone()])?;
        let output_json = absolute(&options.output_json)?;
        ensure_outside_roots(&output_json, &roots)?;

        let cache = open_cache(&options.settings, options.cache_mode);

        self.enter(Stage::Scan)?;
        let (records, scan_failures) = self.scan(&roots, &options.settings);
        if self.is_shutdown_requested() {
            return Err(PipelineError::Interrupted);
        }

        self.enter(Stage::Dedup)?;
        let dedup = self.dedup(records, &options.settings, &cache);
        finish_cache(&cache, &roots);
        let mut outcome = dedup?;
        outcome.failures.extend(scan_failures);
        outcome.failures.sort_by(|a, b| a.path.cmp(&b.path));

        self.enter(Stage::Report)?;
        let report = DiffReport::new(&reconcile(&outcome));
        write_report(&output_json, |w| report.write_to(w, true))?;

        let exit_code = if report.has_failures() {
            ExitCode::PartialFailure
        } else {
            ExitCode::Success
        };
        Ok(DiffOutcome { report, exit_code })
    }

    fn scan(&self, roots: &[PathBuf], settings: &Settings) -> (Vec<FileRecord>, Vec<FileFailure>) {
        let config = ScanConfig::default()
            .with_exclude_patterns(settings.exclude.clone())
            .with_follow_symlinks(settings.follow_symlinks);
        let walker = MultiWalker::new(roots.to_vec(), config).with_shutdown_flag(self.shutdown_flag.clone());

        if let Some(ref callback) = self.progress {
            callback.on_phase_start("scan", 0);
        }

        let mut records = Vec::new();
        let mut failures = Vec::new();
        for entry in walker.walk() {
            match entry {
                Ok(record) => {
                    records.push(record);
                    if let Some(ref callback) = self.progress {
                        if let Some(last) = records.last() {
                            callback.on_progress(records.len(), last.path.to_string_lossy().as_ref());
                        }
                    }
                }
                Err(e) => {
                    log::warn!("{}", e);
                    failures.push(FileFailure::new(e.path().to_path_buf(), FailureStage::Scan, &e));
                }
            }
        }

        if let Some(ref callback) = self.progress {
            callback.on_phase_end("scan");
        }
        log::info!("Scanned {} files under {} roots", records.len(), roots.len());
        (records, failures)
    }

    fn dedup(
        &self,
        records: Vec<FileRecord>,
        settings: &Settings,
        cache: &Arc<HashCache>,
    ) -> Result<DedupOutcome, PipelineError> {
        let mut config = FinderConfig::default()
            .with_io_threads(settings.io_threads)
            .with_chunk_size(settings.chunk_size)
            .with_cache(cache.clone())
            .with_shutdown_flag(self.shutdown_flag.clone());
        if let Some(ref callback) = self.progress {
            config = config.with_progress_callback(callback.clone());
        }
        Ok(DuplicateFinder::new(config).find_duplicates(records)?)
    }
}

/// Absolute form of a path that may not exist yet.
fn absolute(path: &Path) -> Result<PathBuf, PipelineError> {
    match path.canonicalize() {
        Ok(p) => Ok(p),
        Err(_) => {
            // Resolve the deepest existing ancestor so symlinked parents match the roots
            let abs = std::path::absolute(path).map_err(|source| PipelineError::TargetNotWritable {
                path: path.to_path_buf(),
                source,
            })?;
            let mut existing = abs.as_path();
            let mut rest = Vec::new();
            while let Some(parent) = existing.parent() {
                if let Some(name) = existing.file_name() {
                    rest.push(name.to_os_string());
                }
                existing = parent;
                if let Ok(canonical) = existing.canonicalize() {
                    return Ok(rest.iter().rev().fold(canonical, |acc, n| acc.join(n)));
                }
            }
            Ok(abs)
        }
    }
}

fn ensure_outside_roots(path: &Path, roots: &[PathBuf]) -> Result<(), PipelineError> {
    match roots.iter().find(|root| path.starts_with(root)) {
        Some(root) => Err(PipelineError::OverlapsSourceRoot {
            path: path.to_path_buf(),
            root: root.clone(),
        }),
        None => Ok(()),
    }
}

/// Check the target can receive copies.
///
/// In apply mode the target is created and checked with a scratch file;
/// in dry-run nothing is written and only existing paths are checked.
fn check_target(target: &Path, create: bool) -> Result<(), PipelineError> {
    let not_writable = |source| PipelineError::TargetNotWritable {
        path: target.to_path_buf(),
        source,
    };

    if !create {
        return match fs::metadata(target) {
            Ok(meta) if !meta.is_dir() => Err(not_writable(io::Error::other("not a directory"))),
            Ok(meta) if meta.permissions().readonly() => {
                Err(not_writable(io::Error::from(io::ErrorKind::PermissionDenied)))
            }
            _ => Ok(()),
        };
    }

    fs::create_dir_all(target).map_err(not_writable)?;
    let scratch = target.join(format!(".mediasift-write-check-{}", std::process::id()));
    OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(&scratch)
        .map_err(not_writable)?;
    if let Err(e) = fs::remove_file(&scratch) {
        log::debug!("Failed to remove {}: {}", scratch.display(), e);
    }
    Ok(())
}

fn open_cache(settings: &Settings, mode: CacheMode) -> Arc<HashCache> {
    let path = match mode {
        CacheMode::Disabled => None,
        CacheMode::Enabled | CacheMode::Cleared => {
            settings.cache_path.clone().or_else(default_cache_path)
        }
    };

    let cache = match path {
        Some(path) => {
            log::debug!("Using hash cache at {}", path.display());
            HashCache::open_or_recover(&path)
        }
        None => HashCache::in_memory(),
    }
    .with_checkpoint_interval(settings.checkpoint_interval);

    if mode == CacheMode::Cleared {
        match cache.clear() {
            Ok(()) => log::info!("Hash cache cleared"),
            Err(e) => log::warn!("Failed to clear hash cache: {}", e),
        }
    }
    Arc::new(cache)
}

/// Persist new fingerprints and forget vanished files.
fn finish_cache(cache: &HashCache, roots: &[PathBuf]) {
    if let Err(e) = cache.flush() {
        log::warn!("Failed to save hash cache: {}", e);
    }
    if let Err(e) = cache.prune_missing(roots) {
        log::warn!("Failed to prune hash cache: {}", e);
    }
}

fn write_report(
    path: &Path,
    write: impl FnOnce(&mut BufWriter<File>) -> Result<(), JsonOutputError>,
) -> Result<(), PipelineError> {
    let report_err = |source| PipelineError::Report {
        path: path.to_path_buf(),
        source,
    };
    let file = File::create(path).map_err(|e| report_err(JsonOutputError::Io(e)))?;
    let mut writer = BufWriter::new(file);
    write(&mut writer).map_err(report_err)?;
    writer
        .flush()
        .map_err(|e| report_err(JsonOutputError::Io(e)))?;
    log::info!("Report written to {}", path.display());
    Ok(())
}
