//! JSON run and diff reports.
//!
//! Reports carry no timestamps, durations or cache counters, so two dry
//! runs over an unchanged tree serialize to identical bytes.
//!
//! # Output Schema
//!
//! ```json
//! {
//!   "dry_run": true,
//!   "scanned_file_count": 3,
//!   "scanned_total_bytes": 5242880,
//!   "duplicate_group_count": 1,
//!   "redundant_file_count": 1,
//!   "redundant_total_bytes": 2097152,
//!   "survivor_file_count": 2,
//!   "survivor_total_bytes": 3145728,
//!   "groups": [
//!     {
//!       "canonical_path": "/a/photo.jpg",
//!       "redundant_paths": ["/b/photo.jpg"],
//!       "size_bytes": 2097152,
//!       "fingerprint": "abc123..."
//!     }
//!   ],
//!   "plan": [
//!     {
//!       "source_path": "/a/photo.jpg",
//!       "destination_path": "/target/2021-06-15/photo.jpg",
//!       "date_bucket": "2021-06-15",
//!       "reason": "new_file"
//!     }
//!   ],
//!   "failures": []
//! }
//! ```
//!
//! Apply mode adds `copy_results`.

use std::io::Write;
use std::path::Path;

use serde::Serialize;

use crate::actions::{BatchCopyResult, CopyStatus};
use crate::duplicates::{DedupOutcome, DuplicateGroup, Reconciliation};
use crate::error::FileFailure;
use crate::plan::{CopyPlanEntry, PlanReason};

/// A verified duplicate group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct JsonGroup {
    /// The surviving member
    pub canonical_path: String,
    /// Members that are not copied
    pub redundant_paths: Vec<String>,
    /// Size of every member in bytes
    pub size_bytes: u64,
    /// BLAKE3 fingerprint as hexadecimal string
    pub fingerprint: String,
}

impl JsonGroup {
    /// Create a JSON group from a DuplicateGroup.
    #[must_use]
    pub fn from_duplicate_group(group: &DuplicateGroup) -> Self {
        Self {
            canonical_path: group
                .canonical()
                .map(|f| path_string(&f.path))
                .unwrap_or_default(),
            redundant_paths: group.redundant().iter().map(|f| path_string(&f.path)).collect(),
            size_bytes: group.size,
            fingerprint: group.hash_hex(),
        }
    }
}

/// A planned copy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct JsonPlanEntry {
    /// Survivor being copied
    pub source_path: String,
    /// Where it goes
    pub destination_path: String,
    /// Day the file was classified into, or `unknown`
    pub date_bucket: String,
    /// How the destination name was chosen
    pub reason: PlanReason,
}

impl JsonPlanEntry {
    /// Create a JSON plan entry from a CopyPlanEntry.
    #[must_use]
    pub fn from_plan_entry(entry: &CopyPlanEntry) -> Self {
        Self {
            source_path: path_string(&entry.source.path),
            destination_path: path_string(&entry.destination),
            date_bucket: entry.date_bucket.label(),
            reason: entry.reason,
        }
    }
}

/// Outcome of one executed copy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct JsonCopyResult {
    /// Survivor being copied
    pub source_path: String,
    /// Where it went
    pub destination_path: String,
    /// What happened
    pub status: CopyStatus,
    /// Why it failed or was skipped
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Report for a deduplicate-and-copy run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Report {
    /// Whether copies were only planned
    pub dry_run: bool,
    /// Files found under the source roots after exclusions
    pub scanned_file_count: usize,
    /// Bytes of those files
    pub scanned_total_bytes: u64,
    /// Verified groups of two or more identical files
    pub duplicate_group_count: usize,
    /// Files not copied because an identical survivor exists
    pub redundant_file_count: usize,
    /// Bytes of those files
    pub redundant_total_bytes: u64,
    /// Distinct contents selected for copying
    pub survivor_file_count: usize,
    /// Bytes of those files
    pub survivor_total_bytes: u64,
    /// Every duplicate group, ordered by canonical member
    pub groups: Vec<JsonGroup>,
    /// Source to destination mapping, in survivor order
    pub plan: Vec<JsonPlanEntry>,
    /// Per-entry copy outcomes (apply mode only)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub copy_results: Option<Vec<JsonCopyResult>>,
    /// Files that could not be processed
    pub failures: Vec<FileFailure>,
}

impl Report {
    /// Build the report for a completed deduplication and plan.
    #[must_use]
    pub fn new(dry_run: bool, outcome: &DedupOutcome, plan: &[CopyPlanEntry]) -> Self {
        Self {
            dry_run,
            scanned_file_count: outcome.stats.total_files,
            scanned_total_bytes: outcome.stats.total_bytes,
            duplicate_group_count: outcome.groups.len(),
            redundant_file_count: outcome.groups.iter().map(|g| g.redundant().len()).sum(),
            redundant_total_bytes: outcome.groups.iter().map(DuplicateGroup::redundant_bytes).sum(),
            survivor_file_count: outcome.survivors.len(),
            survivor_total_bytes: outcome.survivors.iter().map(|s| s.size).sum(),
            groups: outcome.groups.iter().map(JsonGroup::from_duplicate_group).collect(),
            plan: plan.iter().map(JsonPlanEntry::from_plan_entry).collect(),
            copy_results: None,
            failures: outcome.failures.clone(),
        }
    }

    /// Attach executed copy outcomes.
    ///
    /// Failed copies are also appended to `failures`.
    #[must_use]
    pub fn with_copy_results(mut self, result: &BatchCopyResult) -> Self {
        let mut copy_failures = Vec::new();
        let results = result
            .outcomes
            .iter()
            .map(|o| {
                if o.status == CopyStatus::Failed {
                    copy_failures.push(FileFailure::new(
                        o.source.clone(),
                        crate::error::FailureStage::Copy,
                        o.error.as_deref().unwrap_or("copy failed"),
                    ));
                }
                JsonCopyResult {
                    source_path: path_string(&o.source),
                    destination_path: path_string(&o.destination),
                    status: o.status,
                    error: o.error.clone(),
                }
            })
            .collect();
        self.copy_results = Some(results);
        self.failures.extend(copy_failures);
        self
    }

    /// Whether any file failed at any stage.
    #[must_use]
    pub fn has_failures(&self) -> bool {
        !self.failures.is_empty()
    }

    /// Serialize to compact JSON string.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails (unlikely for valid data).
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Serialize to pretty-printed JSON string.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails (unlikely for valid data).
    pub fn to_json_pretty(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    /// Write JSON to a writer.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization or writing fails.
    pub fn write_to<W: Write>(&self, writer: &mut W, pretty: bool) -> Result<(), JsonOutputError> {
        write_json(self, writer, pretty)
    }
}

/// Report for the `diff` subcommand.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DiffReport {
    /// Files in A with no identical file in B
    pub unique_to_folder_a: Vec<String>,
    /// Files in B with no identical file in A
    pub unique_to_folder_b: Vec<String>,
    /// Groups with members on both sides
    pub matched_group_count: usize,
    /// Files that could not be processed
    pub failures: Vec<FileFailure>,
}

impl DiffReport {
    /// Create a diff report from a reconciliation.
    #[must_use]
    pub fn new(reconciliation: &Reconciliation) -> Self {
        Self {
            unique_to_folder_a: reconciliation.unique_to_a.iter().map(|p| path_string(p)).collect(),
            unique_to_folder_b: reconciliation.unique_to_b.iter().map(|p| path_string(p)).collect(),
            matched_group_count: reconciliation.matched_groups,
            failures: reconciliation.failures.clone(),
        }
    }

    /// Whether any file failed.
    #[must_use]
    pub fn has_failures(&self) -> bool {
        !self.failures.is_empty()
    }

    /// Write JSON to a writer.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization or writing fails.
    pub fn write_to<W: Write>(&self, writer: &mut W, pretty: bool) -> Result<(), JsonOutputError> {
        write_json(self, writer, pretty)
    }
}

fn write_json<T: Serialize, W: Write>(
    value: &T,
    writer: &mut W,
    pretty: bool,
) -> Result<(), JsonOutputError> {
    let json = if pretty {
        serde_json::to_string_pretty(value)?
    } else {
        serde_json::to_string(value)?
    };
    writer.write_all(json.as_bytes())?;
    writer.write_all(b"\n")?;
    Ok(())
}

fn path_string(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

/// Errors that can occur during JSON output.
#[derive(thiserror::Error, Debug)]
pub enum JsonOutputError {
    /// JSON serialization error
    #[error("JSON serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// I/O error during writing
    #[error("I/O error during JSON generation: {0}")]
    Io(#[from] std::io::Error),
}
