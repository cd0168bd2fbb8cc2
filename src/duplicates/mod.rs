//! Duplicate detection module.
//!
//! This module provides functionality for:
//! - Size-based file grouping (Phase 1)
//! - Full-content fingerprinting with cache reuse (Phase 2)
//! - Byte-for-byte verification of fingerprint matches (Phase 3)
//! - Reconciling two trees against each other

pub mod finder;
pub mod groups;
pub mod reconcile;

pub use finder::{DedupOutcome, DedupStats, DuplicateFinder, FinderConfig, FinderError};
pub use groups::{
    canonical_order, group_by_size, sort_canonical, DuplicateGroup, GroupingStats, SizeGrouping,
};
pub use reconcile::{reconcile, Reconciliation, SIDE_A, SIDE_B};
