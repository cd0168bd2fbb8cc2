//! Destination planning for survivors.
//!
//! Each survivor maps to `<target>/<bucket folder>/<file name>`. Names that
//! collide, either with an earlier survivor or with something already in
//! the target tree, get a numeric suffix (`name_1.ext`, `name_2.ext`, ...).
//! Collision checks fold case and Unicode normalization so the plan stays
//! valid on case-insensitive filesystems.
//!
//! A survivor whose exact content already sits in its destination folder,
//! typically from an earlier run into the same target, is planned as
//! [`PlanReason::AlreadyPresent`] and is not copied again.

use std::collections::{HashMap, HashSet};
use std::ffi::OsString;
use std::path::{Path, PathBuf};

use serde::Serialize;
use unicode_normalization::UnicodeNormalization;

use crate::classify::{DateBucket, Layout};
use crate::scanner::{FileRecord, Verifier};

/// Why a destination was chosen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PlanReason {
    /// The original file name was free
    NewFile,
    /// The original name was taken and a suffix was added
    ResolvedNameCollision,
    /// An identical file already exists at the destination; nothing to copy
    AlreadyPresent,
}

/// One planned copy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CopyPlanEntry {
    /// Scan-time snapshot of the source
    pub source: FileRecord,
    /// Absolute destination path, unique within the plan. For
    /// [`PlanReason::AlreadyPresent`] this is the existing identical file.
    pub destination: PathBuf,
    /// Date bucket the file was classified into
    pub date_bucket: DateBucket,
    /// How the destination name was chosen
    pub reason: PlanReason,
}

/// Maps survivors to unique destinations under a target root.
#[derive(Debug)]
pub struct CopyPlanner {
    target_root: PathBuf,
    layout: Layout,
    verifier: Verifier,
    taken: HashSet<String>,
    /// Regular files found in each listed destination folder, with sizes
    existing: HashMap<PathBuf, Vec<(PathBuf, u64)>>,
}

impl CopyPlanner {
    /// Create a planner for `target_root`.
    #[must_use]
    pub fn new(target_root: impl Into<PathBuf>, layout: Layout) -> Self {
        Self {
            target_root: target_root.into(),
            layout,
            verifier: Verifier::new(),
            taken: HashSet::new(),
            existing: HashMap::new(),
        }
    }

    /// Compare against existing target files with this verifier.
    #[must_use]
    pub fn with_verifier(mut self, verifier: Verifier) -> Self {
        self.verifier = verifier;
        self
    }

    /// Plan every survivor, in the order given.
    ///
    /// Survivors should already be in canonical order so suffixes are
    /// assigned deterministically.
    pub fn plan(
        &mut self,
        survivors: impl IntoIterator<Item = (FileRecord, DateBucket)>,
    ) -> Vec<CopyPlanEntry> {
        let entries: Vec<CopyPlanEntry> = survivors
            .into_iter()
            .map(|(source, bucket)| self.plan_one(source, bucket))
            .collect();

        let renamed = entries
            .iter()
            .filter(|e| e.reason == PlanReason::ResolvedNameCollision)
            .count();
        let present = entries
            .iter()
            .filter(|e| e.reason == PlanReason::AlreadyPresent)
            .count();
        log::info!(
            "Planned {} copies ({} renamed to avoid collisions, {} already in the target)",
            entries.len() - present,
            renamed,
            present
        );
        entries
    }

    fn plan_one(&mut self, source: FileRecord, bucket: DateBucket) -> CopyPlanEntry {
        let dir = match bucket.folder(self.layout) {
            Some(folder) => self.target_root.join(folder),
            None => self.target_root.clone(),
        };
        self.register_existing(&dir);

        if let Some(existing) = self.identical_existing(&source, &dir) {
            log::debug!(
                "{} is already in the target as {}",
                source.path.display(),
                existing.display()
            );
            return CopyPlanEntry {
                source,
                destination: existing,
                date_bucket: bucket,
                reason: PlanReason::AlreadyPresent,
            };
        }

        let name = source
            .path
            .file_name()
            .map(OsString::from)
            .unwrap_or_else(|| OsString::from("unnamed"));

        let mut candidate = dir.join(&name);
        let mut reason = PlanReason::NewFile;
        let mut counter = 1u64;
        while self.taken.contains(&collision_key(&candidate)) {
            candidate = dir.join(suffixed_name(Path::new(&name), counter));
            reason = PlanReason::ResolvedNameCollision;
            counter += 1;
        }
        self.taken.insert(collision_key(&candidate));

        if reason == PlanReason::ResolvedNameCollision {
            log::debug!(
                "Name collision for {}: using {}",
                source.path.display(),
                candidate.display()
            );
        }

        CopyPlanEntry {
            source,
            destination: candidate,
            date_bucket: bucket,
            reason,
        }
    }

    /// Mark every entry already present in `dir` as taken, once per dir.
    fn register_existing(&mut self, dir: &Path) {
        if self.existing.contains_key(dir) {
            return;
        }
        let mut files = Vec::new();
        if let Ok(entries) = std::fs::read_dir(dir) {
            for entry in entries.flatten() {
                let path = dir.join(entry.file_name());
                self.taken.insert(collision_key(&path));
                if let Ok(meta) = std::fs::symlink_metadata(&path) {
                    if meta.is_file() {
                        files.push((path, meta.len()));
                    }
                }
            }
        }
        files.sort();
        self.existing.insert(dir.to_path_buf(), files);
    }

    /// An existing regular file in `dir` with exactly the content of `source`.
    fn identical_existing(&self, source: &FileRecord, dir: &Path) -> Option<PathBuf> {
        let files = self.existing.get(dir)?;
        files
            .iter()
            .filter(|(_, size)| *size == source.size)
            .find(|(path, _)| match self.verifier.are_identical(&source.path, path) {
                Ok(same) => same,
                Err(e) => {
                    log::debug!("Could not compare with {}: {}", path.display(), e);
                    false
                }
            })
            .map(|(path, _)| path.clone())
    }
}

/// Case- and normalization-insensitive key for a destination path.
fn collision_key(path: &Path) -> String {
    path.to_string_lossy().nfc().collect::<String>().to_lowercase()
}

/// `name` with `_<n>` inserted before the extension.
fn suffixed_name(name: &Path, n: u64) -> OsString {
    let stem = name.file_stem().unwrap_or(name.as_os_str());
    let mut out = OsString::from(stem);
    out.push(format!("_{}", n));
    if let Some(ext) = name.extension() {
        out.push(".");
        out.push(ext);
    }
    out
}
