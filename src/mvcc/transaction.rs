//! # Transactions
//!
//! A transaction owns a set of record locks and a set of staged record
//! versions, grouped per table. Staging never touches table files; all disk
//! effects happen in `commit` (or, for lock bits, `rollback`).
//!
//! ## Staging
//!
//! - `stage_insert` builds a fresh record locked by this transaction.
//! - `stage_update` locks the given record, clones it under a fresh id, and
//!   applies the updates to the clone. The clone remembers the id it
//!   supersedes.
//! - `stage_delete` locks, clones, and marks the clone as a tombstone.
//!
//! Staged versions are not current until commit, so readers never observe
//! uncommitted data.
//!
//! ## Commit
//!
//! Per affected table, in qualified-name order, under that table's write
//! lock: read the existing array, demote every version superseded by a
//! staged record, promote the staged records, and rewrite the file as
//! `existing ++ staged`. The commit is NOT atomic across tables: if
//! rewriting table N fails, tables 1..N-1 stay rewritten, the transaction
//! remains active, and the caller decides whether to retry or roll back.
//!
//! ## Rollback
//!
//! Discards staged records and rewrites touched tables only to clear any
//! persisted lock bits held by this transaction; record content is
//! unchanged.
//!
//! A staging failure does not auto-rollback; the transaction stays active
//! and keeps its locks until the caller commits or rolls back.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::SystemTime;

use eyre::{bail, ensure, Result};
use parking_lot::Mutex;
use smallvec::SmallVec;
use tracing::debug;

use crate::error::Status;
use crate::record::Record;
use crate::schema::Table;
use crate::storage::{self, PathLocks, RefStore};
use crate::types::{FieldType, Value, ID_FIELD};

use super::{next_record_id, next_txn_id, TxnId, TxnState};

pub struct Transaction {
    id: TxnId,
    start_time: SystemTime,
    table_locks: Arc<PathLocks>,
    refs: Arc<RefStore>,
    inner: Mutex<TxnInner>,
}

struct TxnInner {
    state: TxnState,
    locked: SmallVec<[Arc<Record>; 4]>,
    staged: Vec<(Table, Vec<Arc<Record>>)>,
}

impl Transaction {
    pub(crate) fn new(table_locks: Arc<PathLocks>, refs: Arc<RefStore>) -> Self {
        Self {
            id: next_txn_id(),
            start_time: SystemTime::now(),
            table_locks,
            refs,
            inner: Mutex::new(TxnInner {
                state: TxnState::Active,
                locked: SmallVec::new(),
                staged: Vec::new(),
            }),
        }
    }

    pub fn id(&self) -> TxnId {
        self.id
    }

    pub fn start_time(&self) -> SystemTime {
        self.start_time
    }

    pub fn state(&self) -> TxnState {
        self.inner.lock().state
    }

    /// Stages a new record for insertion. Ref payloads are appended to their
    /// sidecars immediately and the returned record carries their ranges.
    pub fn stage_insert(
        &self,
        table: &Table,
        data: HashMap<String, Value>,
    ) -> Result<Arc<Record>> {
        let mut inner = self.inner.lock();
        ensure_active(&inner)?;

        for (name, value) in &data {
            if name == ID_FIELD {
                return Err(
                    Status::bad_request("field 'id' is generated and cannot be supplied").into(),
                );
            }
            let field = table
                .field(name)
                .ok_or_else(|| Status::field_missing(&table.table_name, name))?;
            ensure!(
                value.matches_type(field.field_type),
                "field '{}' expects {}, got {}",
                name,
                field.field_type,
                value.type_name()
            );
        }

        let mut record = Record::new_staged(next_record_id(), data, self.id);

        let mut ranges = Vec::new();
        for field in table.ref_fields() {
            if let Some(Value::Str(payload)) = record.value(&field.name) {
                let range = self
                    .refs
                    .append(&table.sidecar_path(&field.name), payload.as_bytes())?;
                ranges.push((field.name.clone(), range));
            }
        }
        for (name, range) in ranges {
            record.set_ref_range(&name, range);
        }

        let record = Arc::new(record);
        stage(&mut inner, table, Arc::clone(&record));
        Ok(record)
    }

    /// Locks `record`, clones it, and applies `updates` to the clone. A
    /// `Value::Null` update clears the field; updates to ref fields append
    /// the new payload and rebind the range.
    pub fn stage_update(
        &self,
        table: &Table,
        record: &Arc<Record>,
        updates: HashMap<String, Value>,
    ) -> Result<Arc<Record>> {
        let mut inner = self.inner.lock();
        ensure_active(&inner)?;

        self.take_lock(&mut inner, record)?;
        let mut staging = record.clone_for(self.id)?;

        for (name, value) in updates {
            let field = table
                .field(&name)
                .ok_or_else(|| Status::field_missing(&table.table_name, &name))?;

            if value.is_null() {
                staging.clear_field(&name);
                continue;
            }
            ensure!(
                value.matches_type(field.field_type),
                "field '{}' expects {}, got {}",
                name,
                field.field_type,
                value.type_name()
            );

            if field.field_type == FieldType::Ref {
                if let Value::Str(payload) = &value {
                    let range = self
                        .refs
                        .append(&table.sidecar_path(&name), payload.as_bytes())?;
                    staging.set_ref_range(&name, range);
                }
            }
            staging.set_value(&name, value);
        }

        let staging = Arc::new(staging);
        stage(&mut inner, table, Arc::clone(&staging));
        Ok(staging)
    }

    /// Locks `record` and stages a tombstone clone.
    pub fn stage_delete(&self, table: &Table, record: &Arc<Record>) -> Result<()> {
        let mut inner = self.inner.lock();
        ensure_active(&inner)?;

        self.take_lock(&mut inner, record)?;
        let mut staging = record.clone_for(self.id)?;
        staging.set_deleted();

        stage(&mut inner, table, Arc::new(staging));
        Ok(())
    }

    /// Writes all staged records. See the module docs for the cross-table
    /// atomicity caveat.
    pub fn commit(&self) -> Result<()> {
        let mut inner = self.inner.lock();
        ensure_active(&inner)?;

        inner.staged.sort_by_key(|(table, _)| table.qualified_name());

        for (table, staged) in &inner.staged {
            let lock = self.table_locks.get(&table.data_path());
            let _guard = lock.lock();

            let existing = storage::read_all(table)?;

            let superseded: HashSet<i64> =
                staged.iter().filter_map(|r| r.supersedes()).collect();
            for record in &existing {
                if superseded.contains(&record.id()) {
                    record.demote();
                }
            }
            for record in staged {
                record.promote();
            }

            storage::write_all(
                table,
                existing.iter().chain(staged.iter().map(|r| r.as_ref())),
            )?;

            debug!(
                table = %table.qualified_name(),
                txn = self.id,
                staged = staged.len(),
                "committed table rewrite"
            );
        }

        for record in &inner.locked {
            record.unlock();
        }
        inner.state = TxnState::Committed;
        Ok(())
    }

    /// Discards staged records and clears any persisted lock bits held by
    /// this transaction in the touched tables.
    pub fn rollback(&self) -> Result<()> {
        let mut inner = self.inner.lock();
        ensure_active(&inner)?;

        for (table, _) in &inner.staged {
            let lock = self.table_locks.get(&table.data_path());
            let _guard = lock.lock();

            let existing = storage::read_all(table)?;
            let mut changed = false;
            for record in &existing {
                changed |= record.clear_lock_if(self.id);
            }
            if changed {
                storage::write_all(table, existing.iter())?;
            }
        }

        for record in &inner.locked {
            record.unlock();
        }
        inner.state = TxnState::RolledBack;
        debug!(txn = self.id, "rolled back");
        Ok(())
    }

    fn take_lock(&self, inner: &mut TxnInner, record: &Arc<Record>) -> Result<()> {
        record.lock(self.id)?;
        if !inner.locked.iter().any(|r| Arc::ptr_eq(r, record)) {
            inner.locked.push(Arc::clone(record));
        }
        Ok(())
    }
}

fn ensure_active(inner: &TxnInner) -> Result<()> {
    if inner.state != TxnState::Active {
        bail!("transaction is not active");
    }
    Ok(())
}

fn stage(inner: &mut TxnInner, table: &Table, record: Arc<Record>) {
    let qualified = table.qualified_name();
    if let Some((_, records)) = inner
        .staged
        .iter_mut()
        .find(|(t, _)| t.qualified_name() == qualified)
    {
        records.push(record);
    } else {
        inner.staged.push((table.clone(), vec![record]));
    }
}
