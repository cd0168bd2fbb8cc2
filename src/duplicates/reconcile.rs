//! Two-tree reconciliation on top of the duplicate finder.
//!
//! Folder A is scanned as root 0 and folder B as root 1, so a verified
//! group that has members with both root indexes means the content exists
//! on both sides.

use std::path::PathBuf;

use super::finder::DedupOutcome;
use crate::error::FileFailure;

/// Root index used for folder A.
pub const SIDE_A: usize = 0;
/// Root index used for folder B.
pub const SIDE_B: usize = 1;

/// Files present on only one side.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Reconciliation {
    /// Files in A with no byte-identical file in B, sorted
    pub unique_to_a: Vec<PathBuf>,
    /// Files in B with no byte-identical file in A, sorted
    pub unique_to_b: Vec<PathBuf>,
    /// Verified groups with members on both sides
    pub matched_groups: usize,
    /// Files that could not be hashed or verified
    pub failures: Vec<FileFailure>,
}

/// Split a two-root deduplication outcome into per-side unique files.
///
/// Duplicates confined to one side are all reported as unique to that side.
#[must_use]
pub fn reconcile(outcome: &DedupOutcome) -> Reconciliation {
    let mut result = Reconciliation {
        failures: outcome.failures.clone(),
        ..Reconciliation::default()
    };

    let grouped: std::collections::HashSet<&PathBuf> = outcome
        .groups
        .iter()
        .flat_map(|g| g.files.iter().map(|f| &f.path))
        .collect();

    for group in &outcome.groups {
        let on_a = group.files.iter().any(|f| f.root_index == SIDE_A);
        let on_b = group.files.iter().any(|f| f.root_index == SIDE_B);
        if on_a && on_b {
            result.matched_groups += 1;
            continue;
        }
        for file in &group.files {
            result.push(file.root_index, file.path.clone());
        }
    }

    for survivor in outcome
        .survivors
        .iter()
        .filter(|s| !grouped.contains(&s.path))
    {
        result.push(survivor.root_index, survivor.path.clone());
    }

    result.unique_to_a.sort();
    result.unique_to_b.sort();

    log::info!(
        "Reconciliation: {} only in A, {} only in B, {} matched groups",
        result.unique_to_a.len(),
        result.unique_to_b.len(),
        result.matched_groups
    );
    result
}

impl Reconciliation {
    fn push(&mut self, root_index: usize, path: PathBuf) {
        if root_index == SIDE_A {
            self.unique_to_a.push(path);
        } else {
            self.unique_to_b.push(path);
        }
    }
}
