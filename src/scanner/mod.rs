//! Scanner module for source tree traversal, fingerprinting and verification.
//!
//! This module provides functionality for:
//! - Walking one or more source roots with jwalk
//! - Content fingerprinting with BLAKE3 in bounded chunks
//! - Byte-for-byte verification of fingerprint matches
//!
//! # Architecture
//!
//! - [`walker`]: Directory traversal, exclusion policy and root validation
//! - [`hasher`]: Streaming BLAKE3 fingerprints
//! - [`verify`]: Chunked byte comparison of two files
//!
//! # Example
//!
//! ```no_run
//! use mediasift::scanner::{ScanConfig, Walker};
//! use std::path::Path;
//!
//! let walker = Walker::new(Path::new("/backups/phone"), 0, ScanConfig::default());
//! for entry in walker.walk() {
//!     match entry {
//!         Ok(file) => println!("{}: {} bytes", file.path.display(), file.size),
//!         Err(e) => eprintln!("Warning: {}", e),
//!     }
//! }
//! ```

pub mod hasher;
pub mod verify;
pub mod walker;

use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;

pub use hasher::{
    hash_to_hex, hex_to_hash, ContentHasher, Hash, Hasher, DEFAULT_CHUNK_SIZE, MAX_CHUNK_SIZE,
    MIN_CHUNK_SIZE, PREHASH_SIZE,
};
pub use verify::Verifier;
pub use walker::{validate_roots, MultiWalker, Walker};

/// Filenames that are never scanned, grouped or copied unless the
/// exclusion list is overridden.
pub const DEFAULT_EXCLUDES: &[&str] = &[".DS_Store", "Thumbs.db", "desktop.ini", "._*"];

/// Scan-time snapshot of a regular file under one of the source roots.
///
/// Identity is the path. `root_index` is the position of the owning source
/// root in the order the roots were given, which drives canonical selection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileRecord {
    /// Absolute path to the file
    pub path: PathBuf,
    /// File size in bytes
    pub size: u64,
    /// Last modification time
    pub modified: SystemTime,
    /// Index of the source root this file was found under
    pub root_index: usize,
}

impl FileRecord {
    /// Create a new FileRecord.
    #[must_use]
    pub fn new(path: PathBuf, size: u64, modified: SystemTime, root_index: usize) -> Self {
        Self {
            path,
            size,
            modified,
            root_index,
        }
    }

    /// Lowercased extension of the file name, if any.
    #[must_use]
    pub fn extension(&self) -> Option<String> {
        self.path
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_ascii_lowercase)
    }
}

/// Configuration for directory walking.
#[derive(Debug, Clone)]
pub struct ScanConfig {
    /// Include symlinked files whose target resolves inside the same root.
    /// Directory symlinks are never descended.
    pub follow_symlinks: bool,

    /// Gitignore-style patterns for entries that are never scanned.
    /// Matching directories are pruned with everything below them.
    pub exclude_patterns: Vec<String>,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            follow_symlinks: false,
            exclude_patterns: DEFAULT_EXCLUDES.iter().map(|s| (*s).to_string()).collect(),
        }
    }
}

impl ScanConfig {
    /// Replace the exclusion patterns.
    #[must_use]
    pub fn with_exclude_patterns(mut self, patterns: Vec<String>) -> Self {
        self.exclude_patterns = patterns;
        self
    }

    /// Enable or disable in-root symlinked files.
    #[must_use]
    pub fn with_follow_symlinks(mut self, follow: bool) -> Self {
        self.follow_symlinks = follow;
        self
    }
}

/// Errors that can occur during directory scanning.
#[derive(thiserror::Error, Debug)]
pub enum ScanError {
    /// Permission denied when accessing a path.
    #[error("Permission denied: {0}")]
    PermissionDenied(PathBuf),

    /// The path does not exist.
    #[error("Path not found: {0}")]
    NotFound(PathBuf),

    /// The path exists but is not a directory.
    #[error("Not a directory: {0}")]
    NotADirectory(PathBuf),

    /// Two source roots overlap, so files would be counted twice.
    #[error("Source roots overlap: {inner} is inside {outer}")]
    OverlappingRoots {
        /// The nested root
        inner: PathBuf,
        /// The root containing it
        outer: PathBuf,
    },

    /// An I/O error occurred for a specific path.
    #[error("I/O error for {path}: {source}")]
    Io {
        /// The path where the error occurred
        path: PathBuf,
        /// The underlying I/O error
        #[source]
        source: io::Error,
    },
}

impl ScanError {
    /// Path the error relates to.
    #[must_use]
    pub fn path(&self) -> &Path {
        match self {
            Self::PermissionDenied(p) | Self::NotFound(p) | Self::NotADirectory(p) => p,
            Self::OverlappingRoots { inner, .. } => inner,
            Self::Io { path, .. } => path,
        }
    }
}

/// Errors that can occur while reading file content.
///
/// Cloneable so per-file failures can be stored in stats and reports.
#[derive(thiserror::Error, Debug, Clone)]
pub enum HashError {
    /// The file disappeared after it was scanned.
    #[error("File not found: {0}")]
    NotFound(PathBuf),

    /// The file is no longer readable.
    #[error("Permission denied: {0}")]
    PermissionDenied(PathBuf),

    /// Reading stopped because shutdown was requested.
    #[error("Interrupted while reading {0}")]
    Interrupted(PathBuf),

    /// Any other read failure, including errors mid-stream.
    #[error("I/O error reading {path}: {source}")]
    Io {
        /// The path being read
        path: PathBuf,
        /// The underlying I/O error
        #[source]
        source: Arc<io::Error>,
    },
}

impl HashError {
    /// Map an I/O error on `path` to the matching variant.
    #[must_use]
    pub fn from_io(path: &Path, error: io::Error) -> Self {
        match error.kind() {
            io::ErrorKind::NotFound => Self::NotFound(path.to_path_buf()),
            io::ErrorKind::PermissionDenied => Self::PermissionDenied(path.to_path_buf()),
            _ => Self::Io {
                path: path.to_path_buf(),
                source: Arc::new(error),
            },
        }
    }

    /// Whether this error was caused by a shutdown request.
    #[must_use]
    pub fn is_interrupted(&self) -> bool {
        matches!(self, Self::Interrupted(_))
    }

    /// Path the error relates to.
    #[must_use]
    pub fn path(&self) -> &Path {
        match self {
            Self::NotFound(p) | Self::PermissionDenied(p) | Self::Interrupted(p) => p,
            Self::Io { path, .. } => path,
        }
    }
}
