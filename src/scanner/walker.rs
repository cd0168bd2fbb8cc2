//! Directory walker implementation using jwalk for parallel traversal.
//!
//! # Overview
//!
//! [`Walker`] lazily yields a [`FileRecord`] for every regular file under a
//! single source root; [`MultiWalker`] chains walkers over several roots,
//! tagging each record with the index of its root.
//!
//! - Children are sorted by name, so the output order is deterministic
//! - Excluded entries are dropped before jwalk reads them; excluded
//!   directories are pruned entirely
//! - Directory symlinks are never descended
//! - Symlinked files are skipped unless `follow_symlinks` is set, and even
//!   then only when the target resolves inside the same root and is not
//!   already reached by the walk itself (or by an earlier link)
//! - Nothing is ever written
//!
//! # Example
//!
//! ```no_run
//! use mediasift::scanner::{validate_roots, MultiWalker, ScanConfig};
//! use std::path::PathBuf;
//!
//! let roots = validate_roots(&[PathBuf::from("/backup/a"), PathBuf::from("/backup/b")]).unwrap();
//! let walker = MultiWalker::new(roots, ScanConfig::default());
//! let files: Vec<_> = walker.walk().filter_map(Result::ok).collect();
//! println!("Found {} files", files.len());
//! ```

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::SystemTime;

use ignore::gitignore::{Gitignore, GitignoreBuilder};
use jwalk::WalkDir;

use super::{FileRecord, ScanConfig, ScanError};

/// Directory walker for a single source root.
#[derive(Debug, Clone)]
pub struct Walker {
    /// Root path to walk
    root: PathBuf,
    /// Position of this root among all source roots
    root_index: usize,
    /// Walker configuration
    config: ScanConfig,
    /// Optional shutdown flag for graceful termination
    shutdown_flag: Option<Arc<AtomicBool>>,
}

impl Walker {
    /// Create a new walker for the given root.
    ///
    /// # Arguments
    ///
    /// * `path` - Root directory to scan
    /// * `root_index` - Index recorded on every yielded [`FileRecord`]
    /// * `config` - Walker configuration options
    #[must_use]
    pub fn new(path: &Path, root_index: usize, config: ScanConfig) -> Self {
        Self {
            root: path.to_path_buf(),
            root_index,
            config,
            shutdown_flag: None,
        }
    }

    /// Stop iteration as soon as possible once the flag is set.
    #[must_use]
    pub fn with_shutdown_flag(mut self, flag: Arc<AtomicBool>) -> Self {
        self.shutdown_flag = Some(flag);
        self
    }

    /// Build the exclusion matcher from config patterns.
    fn build_excludes(&self) -> Option<Arc<Gitignore>> {
        let mut builder = GitignoreBuilder::new(&self.root);

        for pattern in &self.config.exclude_patterns {
            if let Err(e) = builder.add_line(None, pattern) {
                log::warn!("Invalid exclude pattern '{}': {}", pattern, e);
            }
        }

        match builder.build() {
            Ok(gitignore) if gitignore.is_empty() => None,
            Ok(gitignore) => Some(Arc::new(gitignore)),
            Err(e) => {
                log::warn!("Failed to build exclude patterns: {}", e);
                None
            }
        }
    }

    /// Walk the root, yielding file records.
    ///
    /// Errors are yielded as [`ScanError`] values rather than stopping
    /// iteration.
    pub fn walk(&self) -> impl Iterator<Item = Result<FileRecord, ScanError>> {
        let excludes = self.build_excludes();
        let root = self.root.clone();
        let root_index = self.root_index;
        let follow_symlinks = self.config.follow_symlinks;
        let shutdown_flag = self.shutdown_flag.clone();
        let canonical_root = fs::canonicalize(&self.root).unwrap_or_else(|_| self.root.clone());
        let link_excludes = excludes.clone();
        let mut link_targets = HashSet::new();

        let prune_root = root.clone();
        let walk_dir = WalkDir::new(&root)
            .follow_links(false)
            .skip_hidden(false)
            .process_read_dir(move |_depth, _path, _read_dir_state, children| {
                if let Some(ref gi) = excludes {
                    children.retain(|child| match child {
                        Ok(entry) => {
                            let excluded = is_excluded(
                                gi,
                                &prune_root,
                                &entry.path(),
                                entry.file_type().is_dir(),
                            );
                            if excluded {
                                log::trace!("Excluding: {}", entry.path().display());
                            }
                            !excluded
                        }
                        Err(_) => true,
                    });
                }
                // Sort children for deterministic output
                children.sort_by(|a, b| match (a, b) {
                    (Ok(a), Ok(b)) => a.file_name().cmp(b.file_name()),
                    (Ok(_), Err(_)) => std::cmp::Ordering::Less,
                    (Err(_), Ok(_)) => std::cmp::Ordering::Greater,
                    (Err(_), Err(_)) => std::cmp::Ordering::Equal,
                });
            });

        walk_dir
            .into_iter()
            .take_while(move |_| {
                let stop = shutdown_flag
                    .as_ref()
                    .is_some_and(|f| f.load(Ordering::SeqCst));
                if stop {
                    log::debug!("Walker: Shutdown requested, stopping iteration");
                }
                !stop
            })
            .filter_map(move |entry_result| match entry_result {
                Ok(entry) => {
                    let path = entry.path();
                    if path == root {
                        return None;
                    }

                    let file_type = entry.file_type();
                    if file_type.is_dir() {
                        return None;
                    }

                    if file_type.is_symlink() {
                        if !follow_symlinks {
                            log::trace!("Skipping symlink: {}", path.display());
                            return None;
                        }
                        let links = LinkContext {
                            canonical_root: &canonical_root,
                            excludes: link_excludes.as_deref(),
                            seen_targets: &mut link_targets,
                        };
                        return resolve_symlink(path, root_index, links);
                    }

                    let metadata = match fs::symlink_metadata(&path) {
                        Ok(m) => m,
                        Err(e) => return Some(Err(io_error(&path, e))),
                    };
                    if !metadata.is_file() {
                        return None;
                    }

                    let modified = metadata.modified().unwrap_or(SystemTime::UNIX_EPOCH);
                    Some(Ok(FileRecord::new(
                        path,
                        metadata.len(),
                        modified,
                        root_index,
                    )))
                }
                Err(e) => {
                    let path = e.path().map_or_else(|| root.clone(), Path::to_path_buf);
                    log::warn!("Walker error for {}: {}", path.display(), e);
                    Some(Err(ScanError::Io {
                        path,
                        source: std::io::Error::other(e.to_string()),
                    }))
                }
            })
    }
}

/// Check a path against the exclusion matcher, relative to `root`.
fn is_excluded(gi: &Gitignore, root: &Path, path: &Path, is_dir: bool) -> bool {
    let relative_path = path.strip_prefix(root).unwrap_or(path);
    let path_str = relative_path.to_string_lossy();
    let normalized_path = if cfg!(windows) {
        path_str.replace('\\', "/")
    } else {
        path_str.into_owned()
    };
    gi.matched(normalized_path, is_dir).is_ignore()
}

/// What a followed symlink is checked against.
struct LinkContext<'a> {
    canonical_root: &'a Path,
    excludes: Option<&'a Gitignore>,
    seen_targets: &'a mut HashSet<PathBuf>,
}

/// Include a symlinked file only if it resolves to a regular file inside the
/// root that no other record of this walk already stands for.
///
/// A target the walk reaches directly is left to the walk, and each target
/// is taken through at most one link, so a link never duplicates its own
/// target.
fn resolve_symlink(
    path: PathBuf,
    root_index: usize,
    links: LinkContext<'_>,
) -> Option<Result<FileRecord, ScanError>> {
    let target = match fs::canonicalize(&path) {
        Ok(t) => t,
        Err(e) => {
            log::debug!("Skipping dangling symlink {}: {}", path.display(), e);
            return None;
        }
    };

    let Ok(relative) = target.strip_prefix(links.canonical_root) else {
        log::debug!(
            "Skipping symlink leaving its root: {} -> {}",
            path.display(),
            target.display()
        );
        return None;
    };

    let metadata = match fs::metadata(&target) {
        Ok(m) if m.is_file() => m,
        Ok(_) => {
            log::trace!("Not descending directory symlink: {}", path.display());
            return None;
        }
        Err(e) => return Some(Err(io_error(&path, e))),
    };

    let walked_directly = links
        .excludes
        .map_or(true, |gi| !gi.matched_path_or_any_parents(relative, false).is_ignore());
    if walked_directly {
        log::trace!(
            "Skipping symlink to a scanned file: {} -> {}",
            path.display(),
            target.display()
        );
        return None;
    }
    if !links.seen_targets.insert(target.clone()) {
        log::trace!(
            "Skipping second symlink to {}: {}",
            target.display(),
            path.display()
        );
        return None;
    }

    let modified = metadata.modified().unwrap_or(SystemTime::UNIX_EPOCH);
    Some(Ok(FileRecord::new(path, metadata.len(), modified, root_index)))
}

/// Map I/O errors during file access.
fn io_error(path: &Path, error: std::io::Error) -> ScanError {
    use std::io::ErrorKind;

    match error.kind() {
        ErrorKind::PermissionDenied => {
            log::warn!("Permission denied: {}", path.display());
            ScanError::PermissionDenied(path.to_path_buf())
        }
        ErrorKind::NotFound => {
            log::debug!("File not found (may have been deleted): {}", path.display());
            ScanError::NotFound(path.to_path_buf())
        }
        _ => {
            log::warn!("I/O error for {}: {}", path.display(), error);
            ScanError::Io {
                path: path.to_path_buf(),
                source: error,
            }
        }
    }
}

/// Canonicalize source roots and reject missing, unreadable, non-directory
/// or overlapping roots.
///
/// # Errors
///
/// Returns the first problem found, in root order.
pub fn validate_roots(roots: &[PathBuf]) -> Result<Vec<PathBuf>, ScanError> {
    let mut canonical = Vec::with_capacity(roots.len());

    for root in roots {
        let path = fs::canonicalize(root).map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => ScanError::NotFound(root.clone()),
            std::io::ErrorKind::PermissionDenied => ScanError::PermissionDenied(root.clone()),
            _ => ScanError::Io {
                path: root.clone(),
                source: e,
            },
        })?;
        if !path.is_dir() {
            return Err(ScanError::NotADirectory(root.clone()));
        }
        fs::read_dir(&path).map_err(|e| match e.kind() {
            std::io::ErrorKind::PermissionDenied => ScanError::PermissionDenied(root.clone()),
            _ => ScanError::Io {
                path: root.clone(),
                source: e,
            },
        })?;
        canonical.push(path);
    }

    for (i, a) in canonical.iter().enumerate() {
        for b in &canonical[i + 1..] {
            if b.starts_with(a) {
                return Err(ScanError::OverlappingRoots {
                    inner: b.clone(),
                    outer: a.clone(),
                });
            }
            if a.starts_with(b) {
                return Err(ScanError::OverlappingRoots {
                    inner: a.clone(),
                    outer: b.clone(),
                });
            }
        }
    }

    Ok(canonical)
}

/// Walks several source roots in order.
#[derive(Debug)]
pub struct MultiWalker {
    roots: Vec<PathBuf>,
    config: ScanConfig,
    shutdown_flag: Option<Arc<AtomicBool>>,
}

impl MultiWalker {
    /// Create a walker over already validated roots.
    #[must_use]
    pub fn new(roots: Vec<PathBuf>, config: ScanConfig) -> Self {
        Self {
            roots,
            config,
            shutdown_flag: None,
        }
    }

    /// Share a shutdown flag with every per-root walker.
    #[must_use]
    pub fn with_shutdown_flag(mut self, flag: Arc<AtomicBool>) -> Self {
        self.shutdown_flag = Some(flag);
        self
    }

    /// The roots in walk order.
    #[must_use]
    pub fn roots(&self) -> &[PathBuf] {
        &self.roots
    }

    /// Walk every root in order; records carry their root's index.
    pub fn walk(&self) -> impl Iterator<Item = Result<FileRecord, ScanError>> + '_ {
        self.roots.iter().enumerate().flat_map(move |(index, root)| {
            log::debug!("Walking root #{}: {}", index, root.display());
            let mut walker = Walker::new(root, index, self.config.clone());
            if let Some(ref flag) = self.shutdown_flag {
                walker = walker.with_shutdown_flag(Arc::clone(flag));
            }
            walker.walk()
        })
    }
}
