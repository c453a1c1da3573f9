//! # Table File I/O
//!
//! A table file is a packed array of fixed-width records. There is no
//! in-place mutation and no appending: every change rewrites the whole file
//! through a `.temp` sibling followed by an atomic rename, so readers always
//! observe either the old or the new array.
//!
//! ## Write Serialization
//!
//! The file rewrite itself takes no lock here. Callers that read-modify-write
//! a table (commit, rollback, compaction) must hold the table's entry in
//! [`PathLocks`] across the whole sequence; sidecar appends use the same
//! structure keyed by sidecar path.

pub mod refstore;

pub use refstore::RefStore;

use std::collections::HashMap;
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use eyre::{Result, WrapErr};
use parking_lot::Mutex;

use crate::record::{codec, Record};
use crate::schema::Table;

/// Process-wide map from file path to its write mutex. Entries are created
/// on first use and live for the process lifetime.
#[derive(Debug, Default)]
pub struct PathLocks {
    inner: Mutex<HashMap<PathBuf, Arc<Mutex<()>>>>,
}

impl PathLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, path: &Path) -> Arc<Mutex<()>> {
        let mut map = self.inner.lock();
        map.entry(path.to_path_buf())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }
}

/// Loads and decodes every record in the table file. A missing file is an
/// empty table; a trailing partial record is dropped.
pub fn read_all(table: &Table) -> Result<Vec<Record>> {
    let path = table.data_path();
    if !path.exists() {
        return Ok(Vec::new());
    }
    let bytes = fs::read(&path)
        .wrap_err_with(|| format!("failed to read table file '{}'", path.display()))?;

    let size = table.record_size();
    let mut records = Vec::with_capacity(bytes.len() / size);
    let mut pos = 0;
    while pos + size <= bytes.len() {
        records.push(codec::decode(&bytes[pos..pos + size], &table.fields)?);
        pos += size;
    }
    Ok(records)
}

/// Serializes the records in the given order and atomically replaces the
/// table file.
pub fn write_all<'a, I>(table: &Table, records: I) -> Result<()>
where
    I: IntoIterator<Item = &'a Record>,
{
    let path = table.data_path();
    let temp = temp_path(&path);

    let file = create_file(&temp)?;
    let mut writer = BufWriter::new(file);
    for record in records {
        let bytes = codec::encode(record, &table.fields)?;
        writer
            .write_all(&bytes)
            .wrap_err_with(|| format!("failed to write table file '{}'", temp.display()))?;
    }
    let file = writer
        .into_inner()
        .wrap_err_with(|| format!("failed to flush table file '{}'", temp.display()))?;
    file.sync_all()
        .wrap_err_with(|| format!("failed to sync table file '{}'", temp.display()))?;

    fs::rename(&temp, &path)
        .wrap_err_with(|| format!("failed to replace table file '{}'", path.display()))?;
    Ok(())
}

/// `<file>.temp` sibling used for atomic replacement.
pub(crate) fn temp_path(path: &Path) -> PathBuf {
    let mut os = path.as_os_str().to_os_string();
    os.push(".temp");
    PathBuf::from(os)
}

/// Creates (or truncates) a file with the configured file mode.
pub(crate) fn create_file(path: &Path) -> Result<File> {
    let file = File::create(path)
        .wrap_err_with(|| format!("failed to create file '{}'", path.display()))?;
    apply_file_mode(path)?;
    Ok(file)
}

#[cfg(unix)]
pub(crate) fn apply_file_mode(path: &Path) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(crate::config::FILE_MODE))
        .wrap_err_with(|| format!("failed to set mode on '{}'", path.display()))
}

#[cfg(not(unix))]
pub(crate) fn apply_file_mode(_path: &Path) -> Result<()> {
    Ok(())
}

#[cfg(unix)]
pub(crate) fn apply_dir_mode(path: &Path) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(crate::config::DIR_MODE))
        .wrap_err_with(|| format!("failed to set mode on '{}'", path.display()))
}

#[cfg(not(unix))]
pub(crate) fn apply_dir_mode(_path: &Path) -> Result<()> {
    Ok(())
}
