//! Byte-for-byte comparison of fingerprint matches.
//!
//! A shared fingerprint is a necessary condition for two files to be
//! duplicates, never a sufficient one. Every merge goes through
//! [`Verifier::are_identical`].

use std::fs::File;
use std::io::{self, Read};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use super::hasher::{DEFAULT_CHUNK_SIZE, MAX_CHUNK_SIZE, MIN_CHUNK_SIZE};
use super::HashError;

/// Streams two files side by side and stops at the first differing chunk.
#[derive(Debug, Clone)]
pub struct Verifier {
    chunk_size: usize,
    shutdown_flag: Option<Arc<AtomicBool>>,
}

impl Default for Verifier {
    fn default() -> Self {
        Self::new()
    }
}

impl Verifier {
    /// Create a verifier with the default chunk size.
    #[must_use]
    pub fn new() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            shutdown_flag: None,
        }
    }

    /// Set the comparison chunk size, clamped to the supported range.
    #[must_use]
    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size.clamp(MIN_CHUNK_SIZE, MAX_CHUNK_SIZE);
        self
    }

    /// Abort in-progress comparisons when the flag is set.
    #[must_use]
    pub fn with_shutdown_flag(mut self, flag: Arc<AtomicBool>) -> Self {
        self.shutdown_flag = Some(flag);
        self
    }

    fn is_shutdown_requested(&self) -> bool {
        self.shutdown_flag
            .as_ref()
            .is_some_and(|f| f.load(Ordering::SeqCst))
    }

    /// Check whether two files have exactly the same content.
    ///
    /// # Errors
    ///
    /// Returns [`HashError`] naming whichever file could not be read.
    pub fn are_identical(&self, a: &Path, b: &Path) -> Result<bool, HashError> {
        let mut file_a = File::open(a).map_err(|e| HashError::from_io(a, e))?;
        let mut file_b = File::open(b).map_err(|e| HashError::from_io(b, e))?;

        let len_a = file_a.metadata().map_err(|e| HashError::from_io(a, e))?.len();
        let len_b = file_b.metadata().map_err(|e| HashError::from_io(b, e))?.len();
        if len_a != len_b {
            log::debug!(
                "Size mismatch during verification: {} ({}) vs {} ({})",
                a.display(),
                len_a,
                b.display(),
                len_b
            );
            return Ok(false);
        }

        let mut buf_a = vec![0u8; self.chunk_size];
        let mut buf_b = vec![0u8; self.chunk_size];

        loop {
            if self.is_shutdown_requested() {
                return Err(HashError::Interrupted(b.to_path_buf()));
            }

            let n_a = fill_chunk(&mut file_a, &mut buf_a).map_err(|e| HashError::from_io(a, e))?;
            let n_b = fill_chunk(&mut file_b, &mut buf_b).map_err(|e| HashError::from_io(b, e))?;

            if n_a != n_b || buf_a[..n_a] != buf_b[..n_b] {
                return Ok(false);
            }
            if n_a == 0 {
                return Ok(true);
            }
        }
    }
}

/// Read until `buf` is full or the reader is exhausted.
fn fill_chunk<R: Read>(reader: &mut R, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}
