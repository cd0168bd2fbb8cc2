//! SQLite-backed fingerprint cache.
//!
//! Each row holds the prehash and the full fingerprint of one path; either
//! may be absent. Paths are stored as raw OS bytes so that distinct
//! non-UTF-8 names never share a row. The whole index is read into memory when the cache is opened. Lookups and
//! records during a run only touch the in-memory map; new records are written
//! back in one transaction by [`HashCache::flush`], which the run calls at
//! completion, on interruption, and every `checkpoint_interval` records.

use std::borrow::Cow;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError, RwLock};
use std::time::SystemTime;

use rusqlite::{params, Connection};

use super::entry::CacheEntry;
use crate::scanner::Hash;

/// Current on-disk schema version, stored in `PRAGMA user_version`.
const SCHEMA_VERSION: i64 = 2;

/// Default number of new records between automatic flushes.
pub const DEFAULT_CHECKPOINT_INTERVAL: usize = 1000;

/// Errors that can occur in the cache store.
#[derive(thiserror::Error, Debug)]
pub enum CacheError {
    /// SQLite reported an error (including "file is not a database").
    #[error("cache database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// The cache file or its directory could not be prepared.
    #[error("cache I/O error for {path}: {source}")]
    Io {
        /// Path being accessed
        path: PathBuf,
        /// The underlying I/O error
        #[source]
        source: std::io::Error,
    },

    /// The file was written by an incompatible version.
    #[error("cache schema version {found} is not supported (expected {expected})")]
    SchemaMismatch {
        /// Version found in the file
        found: i64,
        /// Version this build writes
        expected: i64,
    },
}

/// Result alias for cache operations.
pub type CacheResult<T> = Result<T, CacheError>;

/// Persistent fingerprint cache keyed by path, validated by size and mtime.
///
/// Concurrent lookups share a read lock; records take the write lock briefly.
/// The SQLite connection sits behind its own mutex and is only used to load
/// and flush.
pub struct HashCache {
    path: Option<PathBuf>,
    conn: Mutex<Option<Connection>>,
    entries: RwLock<HashMap<PathBuf, CacheEntry>>,
    pending: Mutex<Vec<CacheEntry>>,
    checkpoint_interval: usize,
}

impl std::fmt::Debug for HashCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HashCache")
            .field("path", &self.path)
            .field("entries", &self.len())
            .field("checkpoint_interval", &self.checkpoint_interval)
            .finish()
    }
}

impl HashCache {
    /// Open or create the cache at `path` and load every entry into memory.
    ///
    /// # Errors
    ///
    /// Fails if the file is not a SQLite database, has an unknown schema
    /// version, or cannot be created.
    pub fn open(path: &Path) -> CacheResult<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|source| CacheError::Io {
                path: parent.to_path_buf(),
                source,
            })?;
        }

        let conn = Connection::open(path)?;
        init_schema(&conn)?;
        let entries = load_entries(&conn)?;
        log::debug!(
            "Loaded {} cached fingerprints from {}",
            entries.len(),
            path.display()
        );

        Ok(Self {
            path: Some(path.to_path_buf()),
            conn: Mutex::new(Some(conn)),
            entries: RwLock::new(entries),
            pending: Mutex::new(Vec::new()),
            checkpoint_interval: DEFAULT_CHECKPOINT_INTERVAL,
        })
    }

    /// Open the cache, degrading instead of failing.
    ///
    /// An unreadable or corrupt file is moved aside (or removed) and a fresh
    /// cache is created in its place. If even that fails the run continues
    /// with a memory-only cache.
    #[must_use]
    pub fn open_or_recover(path: &Path) -> Self {
        match Self::open(path) {
            Ok(cache) => cache,
            Err(e) => {
                log::warn!(
                    "Hash cache at {} is unusable ({}); starting with an empty cache",
                    path.display(),
                    e
                );
                discard_file(path);
                match Self::open(path) {
                    Ok(cache) => cache,
                    Err(e) => {
                        log::warn!("Could not recreate hash cache ({}); caching in memory only", e);
                        Self::in_memory()
                    }
                }
            }
        }
    }

    /// A cache that lives only for this process.
    #[must_use]
    pub fn in_memory() -> Self {
        Self {
            path: None,
            conn: Mutex::new(None),
            entries: RwLock::new(HashMap::new()),
            pending: Mutex::new(Vec::new()),
            checkpoint_interval: DEFAULT_CHECKPOINT_INTERVAL,
        }
    }

    /// Set how many new records trigger an automatic flush. Zero disables it.
    #[must_use]
    pub fn with_checkpoint_interval(mut self, interval: usize) -> Self {
        self.checkpoint_interval = interval;
        self
    }

    /// Backing file, if any.
    #[must_use]
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Number of entries currently known.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Whether the cache holds no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Fingerprint for `path` if the cached size and mtime still match.
    #[must_use]
    pub fn lookup(&self, path: &Path, size: u64, mtime: SystemTime) -> Option<Hash> {
        self.valid_entry(path, size, mtime, |entry| entry.hash)
    }

    /// Prehash for `path` if the cached size and mtime still match.
    #[must_use]
    pub fn lookup_prehash(&self, path: &Path, size: u64, mtime: SystemTime) -> Option<Hash> {
        self.valid_entry(path, size, mtime, |entry| entry.prehash)
    }

    fn valid_entry(
        &self,
        path: &Path,
        size: u64,
        mtime: SystemTime,
        digest: impl Fn(&CacheEntry) -> Option<Hash>,
    ) -> Option<Hash> {
        let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
        match entries.get(path) {
            Some(entry) if entry.is_valid_for(size, mtime) => digest(entry),
            Some(_) => {
                log::trace!("Stale cache entry: {}", path.display());
                None
            }
            None => None,
        }
    }

    /// Remember freshly computed digests.
    ///
    /// Digests already known for the same size and mtime are kept, so a
    /// prehash and a later full fingerprint end up in one row.
    pub fn record(&self, mut entry: CacheEntry) {
        {
            let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
            if let Some(existing) = entries.get(&entry.path) {
                entry.merge_from(existing);
            }
            entries.insert(entry.path.clone(), entry.clone());
        }

        let due = {
            let mut pending = self.pending.lock().unwrap_or_else(PoisonError::into_inner);
            pending.push(entry);
            self.checkpoint_interval > 0 && pending.len() >= self.checkpoint_interval
        };

        if due {
            if let Err(e) = self.flush() {
                log::warn!("Hash cache checkpoint failed: {}", e);
            }
        }
    }

    /// Write all records made since the last flush.
    ///
    /// Returns the number of rows written. On failure the records stay
    /// pending for the next attempt.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::Database`] if the transaction fails.
    pub fn flush(&self) -> CacheResult<usize> {
        let batch = std::mem::take(&mut *self.pending.lock().unwrap_or_else(PoisonError::into_inner));
        if batch.is_empty() {
            return Ok(0);
        }

        let mut guard = self.conn.lock().unwrap_or_else(PoisonError::into_inner);
        let Some(conn) = guard.as_mut() else {
            return Ok(0);
        };

        match write_batch(conn, &batch) {
            Ok(()) => {
                log::debug!("Flushed {} fingerprints to the hash cache", batch.len());
                Ok(batch.len())
            }
            Err(e) => {
                self.pending
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .extend(batch);
                Err(e)
            }
        }
    }

    /// Drop entries under `roots` whose files no longer exist.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::Database`] if the delete fails.
    pub fn prune_missing(&self, roots: &[PathBuf]) -> CacheResult<usize> {
        let stale: Vec<PathBuf> = {
            let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
            entries
                .keys()
                .filter(|p| roots.iter().any(|r| p.starts_with(r)))
                .filter(|p| fs::symlink_metadata(p).is_err())
                .cloned()
                .collect()
        };
        if stale.is_empty() {
            return Ok(0);
        }

        {
            let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
            for path in &stale {
                entries.remove(path);
            }
        }

        let mut guard = self.conn.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(conn) = guard.as_mut() {
            let tx = conn.transaction()?;
            {
                let mut stmt = tx.prepare("DELETE FROM file_hashes WHERE path = ?1")?;
                for path in &stale {
                    stmt.execute(params![path_to_bytes(path).as_ref()])?;
                }
            }
            tx.commit()?;
        }

        log::debug!("Pruned {} cache entries for vanished files", stale.len());
        Ok(stale.len())
    }

    /// Remove every entry, in memory and on disk.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::Database`] if the delete fails.
    pub fn clear(&self) -> CacheResult<()> {
        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
        self.pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();

        let guard = self.conn.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(conn) = guard.as_ref() {
            conn.execute("DELETE FROM file_hashes", [])?;
        }
        log::info!("Hash cache cleared");
        Ok(())
    }
}

fn init_schema(conn: &Connection) -> CacheResult<()> {
    conn.pragma_update(None, "synchronous", "NORMAL")?;

    let version: i64 = conn.pragma_query_value(None, "user_version", |row| row.get(0))?;
    match version {
        0 => create_tables(conn),
        1 => {
            // Version 1 keyed rows by lossy UTF-8 paths and had no prehash.
            log::info!("Upgrading hash cache schema from version 1; cached fingerprints are discarded");
            conn.execute_batch("DROP TABLE IF EXISTS file_hashes;")?;
            create_tables(conn)
        }
        SCHEMA_VERSION => Ok(()),
        found => Err(CacheError::SchemaMismatch {
            found,
            expected: SCHEMA_VERSION,
        }),
    }
}

fn create_tables(conn: &Connection) -> CacheResult<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS file_hashes (
            path        BLOB PRIMARY KEY NOT NULL,
            size        INTEGER NOT NULL,
            mtime_secs  INTEGER NOT NULL,
            mtime_nanos INTEGER NOT NULL,
            prehash     BLOB,
            hash        BLOB
        );",
    )?;
    conn.pragma_update(None, "user_version", SCHEMA_VERSION)?;
    Ok(())
}

fn load_entries(conn: &Connection) -> CacheResult<HashMap<PathBuf, CacheEntry>> {
    let mut stmt = conn
        .prepare("SELECT path, size, mtime_secs, mtime_nanos, prehash, hash FROM file_hashes")?;
    let rows = stmt.query_map([], |row| {
        Ok((
            row.get::<_, Vec<u8>>(0)?,
            row.get::<_, i64>(1)?,
            row.get::<_, i64>(2)?,
            row.get::<_, i64>(3)?,
            row.get::<_, Option<Vec<u8>>>(4)?,
            row.get::<_, Option<Vec<u8>>>(5)?,
        ))
    })?;

    let mut entries = HashMap::new();
    for row in rows {
        let (path, size, mtime_secs, mtime_nanos, prehash, hash) = row?;
        let path = path_from_bytes(path);
        let (Ok(prehash), Ok(hash), Ok(size), Ok(mtime_nanos)) = (
            prehash.as_deref().map(Hash::try_from).transpose(),
            hash.as_deref().map(Hash::try_from).transpose(),
            u64::try_from(size),
            u32::try_from(mtime_nanos),
        ) else {
            log::debug!("Skipping malformed cache row for {}", path.display());
            continue;
        };
        entries.insert(
            path.clone(),
            CacheEntry {
                path,
                size,
                mtime_secs,
                mtime_nanos,
                prehash,
                hash,
            },
        );
    }
    Ok(entries)
}

fn write_batch(conn: &mut Connection, batch: &[CacheEntry]) -> CacheResult<()> {
    let tx = conn.transaction()?;
    {
        let mut stmt = tx.prepare(
            "INSERT OR REPLACE INTO file_hashes
                (path, size, mtime_secs, mtime_nanos, prehash, hash)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        )?;
        for entry in batch {
            stmt.execute(params![
                path_to_bytes(&entry.path).as_ref(),
                entry.size as i64,
                entry.mtime_secs,
                i64::from(entry.mtime_nanos),
                entry.prehash.as_ref().map(|h| &h[..]),
                entry.hash.as_ref().map(|h| &h[..]),
            ])?;
        }
    }
    tx.commit()?;
    Ok(())
}

/// Raw bytes of a path, the primary key of a cache row.
#[cfg(unix)]
fn path_to_bytes(path: &Path) -> Cow<'_, [u8]> {
    use std::os::unix::ffi::OsStrExt;
    Cow::Borrowed(path.as_os_str().as_bytes())
}

#[cfg(unix)]
fn path_from_bytes(bytes: Vec<u8>) -> PathBuf {
    use std::os::unix::ffi::OsStringExt;
    PathBuf::from(std::ffi::OsString::from_vec(bytes))
}

/// UTF-16 code units, little endian, so unpaired surrogates survive.
#[cfg(windows)]
fn path_to_bytes(path: &Path) -> Cow<'_, [u8]> {
    use std::os::windows::ffi::OsStrExt;
    Cow::Owned(
        path.as_os_str()
            .encode_wide()
            .flat_map(u16::to_le_bytes)
            .collect(),
    )
}

#[cfg(windows)]
fn path_from_bytes(bytes: Vec<u8>) -> PathBuf {
    use std::os::windows::ffi::OsStringExt;
    let wide: Vec<u16> = bytes
        .chunks_exact(2)
        .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
        .collect();
    PathBuf::from(std::ffi::OsString::from_wide(&wide))
}

#[cfg(not(any(unix, windows)))]
fn path_to_bytes(path: &Path) -> Cow<'_, [u8]> {
    match path.to_string_lossy() {
        Cow::Borrowed(s) => Cow::Borrowed(s.as_bytes()),
        Cow::Owned(s) => Cow::Owned(s.into_bytes()),
    }
}

#[cfg(not(any(unix, windows)))]
fn path_from_bytes(bytes: Vec<u8>) -> PathBuf {
    PathBuf::from(String::from_utf8_lossy(&bytes).into_owned())
}

/// Move a bad cache file out of the way, or delete it if it cannot be moved.
fn discard_file(path: &Path) {
    if !path.exists() {
        return;
    }
    let aside = path.with_extension("corrupt");
    if let Err(e) = fs::rename(path, &aside) {
        log::debug!("Could not move {} aside: {}", path.display(), e);
        if let Err(e) = fs::remove_file(path) {
            log::warn!("Could not remove broken cache {}: {}", path.display(), e);
        }
    } else {
        log::info!("Moved unusable hash cache to {}", aside.display());
    }
}
