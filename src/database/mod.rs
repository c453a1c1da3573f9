//! # Database Facade
//!
//! [`Database`] is the public entry point: it owns the data root, the
//! transaction registry, the per-path write locks shared by committers and
//! the cleanup worker, and the ref store. All handles are cheap clones of a
//! shared inner.
//!
//! ## Transactions
//!
//! `begin` registers a new transaction in a mutex-guarded map keyed by id;
//! `commit`/`rollback` look the transaction up (unknown ids fail), run the
//! terminal operation, and deregister it. The one-shot helpers
//! (`insert_record`, `update_record`, `delete_record`) wrap a whole
//! begin/stage/commit cycle and roll back if staging fails.
//!
//! ## Reads
//!
//! Reads materialize the table file as of the last atomic replacement; they
//! take no locks and never block writers.

use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::sync::Arc;

use eyre::{bail, Result, WrapErr};
use parking_lot::Mutex;
use tracing::debug;

use crate::cleanup::{self, CleanupWorker};
use crate::config::Config;
use crate::error::Status;
use crate::mvcc::{Transaction, TxnId};
use crate::query::Query;
use crate::record::Record;
use crate::schema::{self, Schema, Table};
use crate::storage::{self, PathLocks, RefStore};
use crate::types::{Field, FieldType, Value};

#[derive(Clone)]
pub struct Database {
    inner: Arc<DbInner>,
}

struct DbInner {
    config: Config,
    table_locks: Arc<PathLocks>,
    refs: Arc<RefStore>,
    transactions: Mutex<HashMap<TxnId, Arc<Transaction>>>,
    cleanup: Mutex<Option<CleanupWorker>>,
}

impl Database {
    /// Opens a store at `config.data_root`, creating the directory if
    /// needed.
    pub fn open(config: Config) -> Result<Self> {
        fs::create_dir_all(&config.data_root).wrap_err_with(|| {
            format!(
                "failed to create data root '{}'",
                config.data_root.display()
            )
        })?;
        Ok(Self {
            inner: Arc::new(DbInner {
                config,
                table_locks: Arc::new(PathLocks::new()),
                refs: Arc::new(RefStore::new()),
                transactions: Mutex::new(HashMap::new()),
                cleanup: Mutex::new(None),
            }),
        })
    }

    pub fn config(&self) -> &Config {
        &self.inner.config
    }

    pub fn data_root(&self) -> &Path {
        &self.inner.config.data_root
    }

    // Catalog ---------------------------------------------------------------

    pub fn create_schema(&self, name: &str) -> Result<Schema> {
        schema::create_schema(self.data_root(), name)
    }

    pub fn open_schema(&self, name: &str) -> Result<Schema> {
        schema::open_schema(self.data_root(), name)
    }

    pub fn create_table(
        &self,
        schema_name: &str,
        table_name: &str,
        fields: Vec<Field>,
    ) -> Result<Table> {
        let schema = self.open_schema(schema_name)?;
        schema.create_table(table_name, fields)
    }

    /// Looks up a table by its qualified `schema:table` name.
    pub fn get_table(&self, qualified: &str) -> Result<Table> {
        schema::get_table(qualified, self.data_root())
    }

    // Transactions ----------------------------------------------------------

    pub fn begin(&self) -> Arc<Transaction> {
        let tx = Arc::new(Transaction::new(
            Arc::clone(&self.inner.table_locks),
            Arc::clone(&self.inner.refs),
        ));
        self.inner
            .transactions
            .lock()
            .insert(tx.id(), Arc::clone(&tx));
        debug!(txn = tx.id(), "transaction started");
        tx
    }

    pub fn commit(&self, tx: &Transaction) -> Result<()> {
        if !self.inner.transactions.lock().contains_key(&tx.id()) {
            bail!("transaction {} not found", tx.id());
        }
        tx.commit()?;
        self.inner.transactions.lock().remove(&tx.id());
        Ok(())
    }

    pub fn rollback(&self, tx: &Transaction) -> Result<()> {
        if !self.inner.transactions.lock().contains_key(&tx.id()) {
            bail!("transaction {} not found", tx.id());
        }
        tx.rollback()?;
        self.inner.transactions.lock().remove(&tx.id());
        Ok(())
    }

    // One-shot record operations --------------------------------------------

    pub fn insert_record(
        &self,
        table: &Table,
        data: HashMap<String, Value>,
    ) -> Result<Arc<Record>> {
        let tx = self.begin();
        let record = match tx.stage_insert(table, data) {
            Ok(record) => record,
            Err(err) => {
                let _ = self.rollback(&tx);
                return Err(err);
            }
        };
        self.commit(&tx)?;
        Ok(record)
    }

    pub fn update_record(
        &self,
        table: &Table,
        record: &Arc<Record>,
        updates: HashMap<String, Value>,
    ) -> Result<Arc<Record>> {
        let tx = self.begin();
        let updated = match tx.stage_update(table, record, updates) {
            Ok(updated) => updated,
            Err(err) => {
                let _ = self.rollback(&tx);
                return Err(err);
            }
        };
        self.commit(&tx)?;
        Ok(updated)
    }

    pub fn delete_record(&self, table: &Table, record: &Arc<Record>) -> Result<()> {
        let tx = self.begin();
        if let Err(err) = tx.stage_delete(table, record) {
            let _ = self.rollback(&tx);
            return Err(err);
        }
        self.commit(&tx)
    }

    // Reads -----------------------------------------------------------------

    /// Every version in the table file, current or not.
    pub fn get_all_records(&self, table: &Table) -> Result<Vec<Arc<Record>>> {
        Ok(storage::read_all(table)?
            .into_iter()
            .map(Arc::new)
            .collect())
    }

    /// Only live versions: current and not deleted.
    pub fn get_current_records(&self, table: &Table) -> Result<Vec<Arc<Record>>> {
        Ok(storage::read_all(table)?
            .into_iter()
            .filter(|r| r.meta().is_live())
            .map(Arc::new)
            .collect())
    }

    /// The live version with the given id.
    pub fn get_record_by_id(&self, table: &Table, id: i64) -> Result<Arc<Record>> {
        for record in storage::read_all(table)? {
            if record.id() == id && record.meta().is_live() {
                return Ok(Arc::new(record));
            }
        }
        bail!(
            "record {} not found in table '{}'",
            id,
            table.qualified_name()
        );
    }

    /// Resolves a record's ref field to its sidecar payload.
    pub fn read_ref(&self, table: &Table, record: &Record, field: &str) -> Result<String> {
        let def = table
            .field(field)
            .ok_or_else(|| Status::field_missing(&table.table_name, field))?;
        if def.field_type != FieldType::Ref {
            return Err(Status::bad_request(format!(
                "field '{field}' is not a ref field"
            ))
            .into());
        }
        let range = match record.ref_range(field) {
            Some(range) => range,
            None => bail!("field '{}' is null on record {}", field, record.id()),
        };
        let bytes = self.inner.refs.read(&table.sidecar_path(field), range)?;
        String::from_utf8(bytes)
            .map_err(|e| eyre::eyre!("ref payload of field '{field}' is not UTF-8: {e}"))
    }

    /// Starts a fluent query over the table's live records.
    pub fn select(&self, table: &Table) -> Query {
        Query::new(table.clone())
    }

    // Cleanup worker --------------------------------------------------------

    /// Starts the background compaction worker on the configured interval.
    pub fn start_cleanup(&self) -> Result<()> {
        let mut slot = self.inner.cleanup.lock();
        if slot.is_some() {
            bail!("cleanup worker is already running");
        }
        *slot = Some(CleanupWorker::spawn(
            self.data_root().to_path_buf(),
            self.inner.config.cleanup_interval,
            Arc::clone(&self.inner.table_locks),
        )?);
        Ok(())
    }

    /// Stops the worker and blocks until its thread has exited. An
    /// in-progress cycle runs to completion first.
    pub fn stop_cleanup(&self) -> Result<()> {
        match self.inner.cleanup.lock().take() {
            Some(worker) => {
                worker.stop();
                Ok(())
            }
            None => bail!("cleanup worker is not running"),
        }
    }

    /// Runs one compaction cycle synchronously on the calling thread.
    pub fn compact(&self) -> Result<()> {
        cleanup::run_cycle(self.data_root(), &self.inner.table_locks)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::FieldType;

    fn open_db() -> (tempfile::TempDir, Database) {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::open(Config::new(dir.path())).unwrap();
        (dir, db)
    }

    fn int_table(db: &Database) -> Table {
        db.create_schema("app").unwrap();
        db.create_table("app", "t", vec![Field::new("n", FieldType::Int, 8)])
            .unwrap()
    }

    fn int_data(n: i64) -> HashMap<String, Value> {
        let mut data = HashMap::new();
        data.insert("n".to_string(), Value::Int(n));
        data
    }

    #[test]
    fn insert_and_read_back() {
        let (_dir, db) = open_db();
        let table = int_table(&db);

        let record = db.insert_record(&table, int_data(42)).unwrap();
        assert!(record.id() > 0);

        let current = db.get_current_records(&table).unwrap();
        assert_eq!(current.len(), 1);
        assert_eq!(current[0].value("n"), Some(&Value::Int(42)));

        let by_id = db.get_record_by_id(&table, current[0].id()).unwrap();
        assert_eq!(by_id.value("n"), Some(&Value::Int(42)));
    }

    #[test]
    fn commit_of_unknown_transaction_fails() {
        let (_dir, db) = open_db();
        let tx = db.begin();
        db.commit(&tx).unwrap();
        let err = db.commit(&tx).unwrap_err();
        assert!(err.to_string().contains("not found"));
    }

    #[test]
    fn get_record_by_id_skips_tombstones() {
        let (_dir, db) = open_db();
        let table = int_table(&db);

        let record = db.insert_record(&table, int_data(7)).unwrap();
        let current = db.get_record_by_id(&table, record.id()).unwrap();
        db.delete_record(&table, &current).unwrap();

        assert!(db.get_record_by_id(&table, record.id()).is_err());
        assert!(db.get_current_records(&table).unwrap().is_empty());
        assert!(db.get_all_records(&table).unwrap().len() >= 2);
    }

    #[test]
    fn cleanup_lifecycle_guards_double_start_and_stop() {
        let (_dir, db) = open_db();
        assert!(db.stop_cleanup().is_err());
        db.start_cleanup().unwrap();
        assert!(db.start_cleanup().is_err());
        db.stop_cleanup().unwrap();
        assert!(db.stop_cleanup().is_err());
    }

    #[test]
    fn read_ref_resolves_payload() {
        let (_dir, db) = open_db();
        db.create_schema("app").unwrap();
        let table = db
            .create_table(
                "app",
                "posts",
                vec![Field::new(
                    "body",
                    FieldType::Ref,
                    crate::types::REF_CELL_LEN,
                )],
            )
            .unwrap();

        let mut data = HashMap::new();
        data.insert("body".to_string(), Value::Str("out of line".to_string()));
        db.insert_record(&table, data).unwrap();

        let current = db.get_current_records(&table).unwrap();
        let body = db.read_ref(&table, &current[0], "body").unwrap();
        assert_eq!(body, "out of line");
    }
}
