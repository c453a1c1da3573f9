//! # Cleanup Worker
//!
//! A background thread that periodically compacts every table in the store:
//! superseded and deleted record versions are dropped, and ref sidecars are
//! rewritten to hold only the payload bytes still referenced by surviving
//! records.
//!
//! ## Cycle
//!
//! Each tick enumerates schema directories and their tables. Per table,
//! under that table's write lock (the same lock commits take, so compaction
//! never interleaves with a transaction rewriting the file):
//!
//! 1. Load all records; retain live ones. Skip the table when nothing would
//!    be dropped.
//! 2. For each ref field, copy every distinct still-referenced `[start, end)`
//!    range into a fresh sidecar (shared old→new map, so a range reused by
//!    several records is copied once), rebind the retained records' ranges,
//!    and atomically replace the sidecar.
//! 3. Atomically rewrite the table file with the retained records.
//!
//! Sidecars are rewritten before the table file so the offsets that land on
//! disk always point into the compacted sidecar.
//!
//! ## Lifecycle
//!
//! The worker thread sleeps on a stop channel with the tick interval as the
//! timeout. `stop()` sends the signal and joins the thread; a cycle already
//! in progress runs to completion. Errors inside a cycle are logged and
//! never kill the worker.

use std::collections::HashMap;
use std::fs;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use crossbeam_channel::{bounded, RecvTimeoutError, Sender};
use eyre::{Result, WrapErr};
use tracing::{debug, warn};

use crate::record::{Record, RefRange};
use crate::schema::{self, Table};
use crate::storage::{self, PathLocks};

pub(crate) struct CleanupWorker {
    stop_tx: Sender<()>,
    handle: Option<JoinHandle<()>>,
}

impl CleanupWorker {
    pub(crate) fn spawn(
        root: PathBuf,
        interval: Duration,
        locks: Arc<PathLocks>,
    ) -> Result<Self> {
        let (stop_tx, stop_rx) = bounded::<()>(1);
        let handle = std::thread::Builder::new()
            .name("stratadb-cleanup".to_string())
            .spawn(move || loop {
                match stop_rx.recv_timeout(interval) {
                    Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                    Err(RecvTimeoutError::Timeout) => {
                        if let Err(err) = run_cycle(&root, &locks) {
                            warn!(error = %err, "cleanup cycle failed");
                        }
                    }
                }
            })
            .wrap_err("failed to spawn cleanup worker thread")?;

        Ok(Self {
            stop_tx,
            handle: Some(handle),
        })
    }

    /// Signals the thread and blocks until it has exited.
    pub(crate) fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        if let Some(handle) = self.handle.take() {
            let _ = self.stop_tx.send(());
            let _ = handle.join();
        }
    }
}

impl Drop for CleanupWorker {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Runs one compaction cycle over every table under the data root. Per-table
/// failures are logged and do not abort the cycle.
pub(crate) fn run_cycle(root: &Path, locks: &PathLocks) -> Result<()> {
    for schema_name in schema::list_schemas(root)? {
        let schema_path = root.join(&schema_name);
        let tables = match schema::list_tables(&schema_path) {
            Ok(tables) => tables,
            Err(err) => {
                warn!(schema = %schema_name, error = %err, "failed to list tables");
                continue;
            }
        };
        for table_name in tables {
            let qualified = format!("{schema_name}:{table_name}");
            let outcome =
                schema::get_table(&qualified, root).and_then(|table| compact_table(&table, locks));
            if let Err(err) = outcome {
                warn!(table = %qualified, error = %err, "table compaction failed");
            }
        }
    }
    Ok(())
}

fn compact_table(table: &Table, locks: &PathLocks) -> Result<()> {
    let lock = locks.get(&table.data_path());
    let _guard = lock.lock();

    let records = storage::read_all(table)?;
    let total = records.len();
    let mut retained: Vec<Record> = records
        .into_iter()
        .filter(|r| r.meta().is_live())
        .collect();
    if retained.len() == total {
        return Ok(());
    }

    for field in table.ref_fields() {
        compact_sidecar(table, &field.name, &mut retained)?;
    }
    storage::write_all(table, retained.iter())?;

    debug!(
        table = %table.qualified_name(),
        dropped = total - retained.len(),
        retained = retained.len(),
        "compacted table"
    );
    Ok(())
}

/// Rewrites one ref sidecar to hold only the ranges still referenced by
/// `records`, rebinding their offsets to the compacted layout.
fn compact_sidecar(table: &Table, field: &str, records: &mut [Record]) -> Result<()> {
    let path = table.sidecar_path(field);
    if !path.exists() {
        return Ok(());
    }
    let old = fs::read(&path)
        .wrap_err_with(|| format!("failed to read sidecar '{}'", path.display()))?;

    let temp = storage::temp_path(&path);
    let file = storage::create_file(&temp)?;
    let mut writer = BufWriter::new(file);

    let mut remap: HashMap<RefRange, RefRange> = HashMap::new();
    let mut cursor = 0u64;

    for record in records.iter_mut() {
        let Some(range) = record.ref_range(field) else {
            continue;
        };
        if let Some(new_range) = remap.get(&range) {
            record.set_ref_range(field, *new_range);
            continue;
        }
        let (start, end) = range;
        if start > end || end > old.len() as u64 {
            // Dangling range; nothing to copy.
            continue;
        }

        let payload = &old[start as usize..end as usize];
        writer
            .write_all(payload)
            .wrap_err_with(|| format!("failed to write sidecar '{}'", temp.display()))?;

        let new_range = (cursor, cursor + payload.len() as u64);
        cursor = new_range.1;
        remap.insert(range, new_range);
        record.set_ref_range(field, new_range);
    }

    let file = writer
        .into_inner()
        .wrap_err_with(|| format!("failed to flush sidecar '{}'", temp.display()))?;
    file.sync_all()
        .wrap_err_with(|| format!("failed to sync sidecar '{}'", temp.display()))?;
    fs::rename(&temp, &path)
        .wrap_err_with(|| format!("failed to replace sidecar '{}'", path.display()))?;
    Ok(())
}
