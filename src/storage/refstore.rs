//! # Ref Sidecar Store
//!
//! Variable-length payloads of `ref` fields live out-of-line in one sidecar
//! file per field. The fixed-width cell only stores a `[start, end)` byte
//! range into that file.
//!
//! Appends are strictly monotonic; the sidecar grows until the cleanup
//! worker compacts it. A per-sidecar mutex serializes the size probe and the
//! append so ranges handed to concurrent transactions never interleave.

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::Path;

use eyre::{ensure, Result, WrapErr};

use crate::record::RefRange;
use crate::storage::PathLocks;

#[derive(Debug, Default)]
pub struct RefStore {
    locks: PathLocks,
}

impl RefStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a payload and returns the range it now occupies.
    pub fn append(&self, path: &Path, payload: &[u8]) -> Result<RefRange> {
        let lock = self.locks.get(path);
        let _guard = lock.lock();

        let mut options = OpenOptions::new();
        options.create(true).append(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            options.mode(crate::config::FILE_MODE);
        }
        let mut file = options
            .open(path)
            .wrap_err_with(|| format!("failed to open sidecar '{}'", path.display()))?;

        let start = file
            .metadata()
            .wrap_err_with(|| format!("failed to stat sidecar '{}'", path.display()))?
            .len();
        file.write_all(payload)
            .wrap_err_with(|| format!("failed to append to sidecar '{}'", path.display()))?;

        Ok((start, start + payload.len() as u64))
    }

    /// Reads the payload bytes at `[start, end)`.
    pub fn read(&self, path: &Path, range: RefRange) -> Result<Vec<u8>> {
        let (start, end) = range;
        ensure!(
            start <= end,
            "inverted ref offsets [{start}, {end}) for sidecar '{}'",
            path.display()
        );
        let bytes = fs::read(path)
            .wrap_err_with(|| format!("failed to read sidecar '{}'", path.display()))?;
        ensure!(
            end <= bytes.len() as u64,
            "ref offsets [{start}, {end}) out of range for sidecar '{}' of {} bytes",
            path.display(),
            bytes.len()
        );
        Ok(bytes[start as usize..end as usize].to_vec())
    }
}
