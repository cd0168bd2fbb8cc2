//! Parallel date classification.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::SystemTime;

use chrono::{DateTime, Local, NaiveDate};
use rayon::prelude::*;

use super::{DateBucket, EmbeddedMetadata, FileCategory, MetadataReader};
use crate::progress::ProgressCallback;
use crate::scanner::FileRecord;

/// Where a bucket's date came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DateSource {
    /// Capture date embedded in the file
    Embedded,
    /// Filesystem creation (birth) time
    Created,
    /// Filesystem modification time
    Modified,
    /// No usable timestamp
    Unknown,
}

/// Classification of one file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Classification {
    /// Category derived from the extension
    pub category: FileCategory,
    /// Date bucket the file is filed under
    pub bucket: DateBucket,
    /// Origin of the bucket's date
    pub source: DateSource,
}

/// Errors that abort classification.
#[derive(thiserror::Error, Debug)]
pub enum ClassifyError {
    /// Shutdown was requested mid-way.
    #[error("Classification interrupted by user")]
    Interrupted,

    /// The worker pool could not be created.
    #[error("Failed to start classification worker pool: {0}")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),
}

/// Assigns date buckets to files.
pub struct DateClassifier {
    reader: Arc<dyn MetadataReader>,
    io_threads: usize,
    shutdown_flag: Option<Arc<AtomicBool>>,
    progress_callback: Option<Arc<dyn ProgressCallback>>,
}

impl Default for DateClassifier {
    fn default() -> Self {
        Self::new(Arc::new(EmbeddedMetadata))
    }
}

impl DateClassifier {
    /// Create a classifier backed by `reader`.
    #[must_use]
    pub fn new(reader: Arc<dyn MetadataReader>) -> Self {
        Self {
            reader,
            io_threads: 4,
            shutdown_flag: None,
            progress_callback: None,
        }
    }

    /// Set the number of worker threads (at least one).
    #[must_use]
    pub fn with_io_threads(mut self, threads: usize) -> Self {
        self.io_threads = threads.max(1);
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

    /// Classify one file.
    ///
    /// Embedded metadata wins for media; otherwise the file's birth time,
    /// then its scan-time modification time. Never fails.
    #[must_use]
    pub fn classify(&self, record: &FileRecord) -> Classification {
        let category = FileCategory::from_path(&record.path);

        if category != FileCategory::Other {
            match self.reader.capture_date(&record.path, category) {
                Ok(Some(date)) => {
                    return Classification {
                        category,
                        bucket: DateBucket::Date(date),
                        source: DateSource::Embedded,
                    };
                }
                Ok(None) => {
                    log::trace!("No embedded date in {}", record.path.display());
                }
                Err(e) => {
                    log::debug!("{}", e);
                }
            }
        }

        let created = std::fs::metadata(&record.path)
            .and_then(|m| m.created())
            .ok()
            .and_then(local_date);
        if let Some(date) = created {
            return Classification {
                category,
                bucket: DateBucket::Date(date),
                source: DateSource::Created,
            };
        }

        match local_date(record.modified) {
            Some(date) => Classification {
                category,
                bucket: DateBucket::Date(date),
                source: DateSource::Modified,
            },
            None => Classification {
                category,
                bucket: DateBucket::Unknown,
                source: DateSource::Unknown,
            },
        }
    }

    /// Classify many files in parallel, preserving input order.
    ///
    /// # Errors
    ///
    /// Returns [`ClassifyError::Interrupted`] if shutdown is requested.
    pub fn classify_all(&self, records: &[FileRecord]) -> Result<Vec<Classification>, ClassifyError> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.io_threads)
            .build()?;

        if let Some(ref callback) = self.progress_callback {
            callback.on_phase_start("classify", records.len());
        }
        let done = AtomicUsize::new(0);

        let results: Option<Vec<Classification>> = pool.install(|| {
            records
                .par_iter()
                .map(|record| {
                    if self.is_shutdown_requested() {
                        return None;
                    }
                    let classification = self.classify(record);
                    if let Some(ref callback) = self.progress_callback {
                        let current = done.fetch_add(1, Ordering::Relaxed) + 1;
                        callback.on_progress(current, record.path.to_string_lossy().as_ref());
                    }
                    Some(classification)
                })
                .collect()
        });

        if let Some(ref callback) = self.progress_callback {
            callback.on_phase_end("classify");
        }

        let classifications = results.ok_or(ClassifyError::Interrupted)?;
        let embedded = classifications
            .iter()
            .filter(|c| c.source == DateSource::Embedded)
            .count();
        log::info!(
            "Classified {} files ({} from embedded metadata)",
            classifications.len(),
            embedded
        );
        Ok(classifications)
    }
}

/// Calendar date of a timestamp in the local timezone.
///
/// Timestamps at or before the Unix epoch are treated as unset.
fn local_date(time: SystemTime) -> Option<NaiveDate> {
    if time <= SystemTime::UNIX_EPOCH {
        return None;
    }
    Some(DateTime::<Local>::from(time).date_naive())
}
