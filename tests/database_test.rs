//! End-to-end tests for the record lifecycle: create, insert, update,
//! delete, and explicit transactions with locking.

use std::collections::HashMap;
use std::sync::Arc;

use stratadb::{Config, Database, Field, FieldType, Record, Table, TxnState, Value};
use tempfile::TempDir;

fn open_db() -> (TempDir, Database) {
    let dir = tempfile::tempdir().unwrap();
    let db = Database::open(Config::new(dir.path())).unwrap();
    (dir, db)
}

fn val_table(db: &Database) -> Table {
    db.create_schema("s").unwrap();
    db.create_table("s", "t", vec![Field::new("val", FieldType::Int, 8)])
        .unwrap()
}

fn val_data(val: i64) -> HashMap<String, Value> {
    let mut data = HashMap::new();
    data.insert("val".to_string(), Value::Int(val));
    data
}

fn val_of(record: &Record) -> i64 {
    match record.value("val") {
        Some(Value::Int(v)) => *v,
        other => panic!("unexpected val {other:?}"),
    }
}

#[test]
fn create_insert_read() {
    let (_dir, db) = open_db();
    let table = val_table(&db);

    db.insert_record(&table, val_data(42)).unwrap();

    let current = db.get_current_records(&table).unwrap();
    assert_eq!(current.len(), 1);
    assert_eq!(val_of(&current[0]), 42);
    assert!(current[0].id() > 0);
}

#[test]
fn update_supersedes_previous_version() {
    let (_dir, db) = open_db();
    let table = val_table(&db);

    db.insert_record(&table, val_data(1)).unwrap();
    let original = db.get_current_records(&table).unwrap().remove(0);
    db.update_record(&table, &original, val_data(2)).unwrap();

    let all = db.get_all_records(&table).unwrap();
    assert_eq!(all.len(), 2);
    let live: Vec<_> = all.iter().filter(|r| r.meta().is_live()).collect();
    assert_eq!(live.len(), 1);
    assert_eq!(val_of(live[0]), 2);

    let current = db.get_current_records(&table).unwrap();
    assert_eq!(current.len(), 1);
    assert_eq!(val_of(&current[0]), 2);
}

#[test]
fn delete_hides_but_retains() {
    let (_dir, db) = open_db();
    let table = val_table(&db);

    db.insert_record(&table, val_data(7)).unwrap();
    let original = db.get_current_records(&table).unwrap().remove(0);
    db.delete_record(&table, &original).unwrap();

    assert!(db.get_current_records(&table).unwrap().is_empty());

    let all = db.get_all_records(&table).unwrap();
    assert!(all.len() >= 2);
    assert!(all.iter().any(|r| r.id() == original.id()));
    assert!(all.iter().any(|r| r.meta().is_deleted));
}

#[test]
fn lock_conflict_names_the_holder() {
    let (_dir, db) = open_db();
    let table = val_table(&db);

    db.insert_record(&table, val_data(1)).unwrap();
    let record = db.get_current_records(&table).unwrap().remove(0);

    let tx1 = db.begin();
    let tx2 = db.begin();

    tx1.stage_update(&table, &record, val_data(2)).unwrap();
    let err = tx2.stage_update(&table, &record, val_data(3)).unwrap_err();
    assert!(err
        .to_string()
        .contains(&format!("locked by transaction {}", tx1.id())));

    db.commit(&tx1).unwrap();
    db.rollback(&tx2).unwrap();

    // The lock is released by commit; a later transaction succeeds.
    let record = db.get_current_records(&table).unwrap().remove(0);
    let tx3 = db.begin();
    tx3.stage_update(&table, &record, val_data(4)).unwrap();
    db.commit(&tx3).unwrap();
    assert_eq!(val_of(&db.get_current_records(&table).unwrap()[0]), 4);
}

#[test]
fn explicit_transaction_batches_multiple_stagings() {
    let (_dir, db) = open_db();
    let table = val_table(&db);

    let tx = db.begin();
    tx.stage_insert(&table, val_data(1)).unwrap();
    tx.stage_insert(&table, val_data(2)).unwrap();
    tx.stage_insert(&table, val_data(3)).unwrap();

    // Nothing visible until commit.
    assert!(db.get_current_records(&table).unwrap().is_empty());

    db.commit(&tx).unwrap();
    assert_eq!(tx.state(), TxnState::Committed);

    let mut vals: Vec<i64> = db
        .get_current_records(&table)
        .unwrap()
        .iter()
        .map(|r| val_of(r))
        .collect();
    vals.sort_unstable();
    assert_eq!(vals, vec![1, 2, 3]);
}

#[test]
fn commit_spans_multiple_tables() {
    let (_dir, db) = open_db();
    db.create_schema("s").unwrap();
    let users = db
        .create_table("s", "users", vec![Field::new("val", FieldType::Int, 8)])
        .unwrap();
    let events = db
        .create_table("s", "events", vec![Field::new("val", FieldType::Int, 8)])
        .unwrap();

    let tx = db.begin();
    tx.stage_insert(&users, val_data(1)).unwrap();
    tx.stage_insert(&events, val_data(2)).unwrap();
    db.commit(&tx).unwrap();

    assert_eq!(db.get_current_records(&users).unwrap().len(), 1);
    assert_eq!(db.get_current_records(&events).unwrap().len(), 1);
}

#[test]
fn rollback_preserves_on_disk_content() {
    let (_dir, db) = open_db();
    let table = val_table(&db);

    db.insert_record(&table, val_data(10)).unwrap();
    let before = std::fs::read(table.data_path()).unwrap();

    let record = db.get_current_records(&table).unwrap().remove(0);
    let tx = db.begin();
    tx.stage_update(&table, &record, val_data(11)).unwrap();
    tx.stage_insert(&table, val_data(12)).unwrap();
    db.rollback(&tx).unwrap();

    let after = std::fs::read(table.data_path()).unwrap();
    assert_eq!(before, after);
    assert_eq!(val_of(&db.get_current_records(&table).unwrap()[0]), 10);
}

#[test]
fn staging_failure_leaves_transaction_active() {
    let (_dir, db) = open_db();
    let table = val_table(&db);

    let tx = db.begin();
    let mut bad = HashMap::new();
    bad.insert("ghost".to_string(), Value::Int(1));
    assert!(tx.stage_insert(&table, bad).is_err());

    assert_eq!(tx.state(), TxnState::Active);
    tx.stage_insert(&table, val_data(5)).unwrap();
    db.commit(&tx).unwrap();
    assert_eq!(db.get_current_records(&table).unwrap().len(), 1);
}

#[test]
fn type_mismatch_is_rejected_at_staging() {
    let (_dir, db) = open_db();
    let table = val_table(&db);

    let mut data = HashMap::new();
    data.insert("val".to_string(), Value::Str("42".to_string()));
    let err = db.insert_record(&table, data).unwrap_err();
    assert!(err.to_string().contains("expects int"));
    assert!(db.get_current_records(&table).unwrap().is_empty());
}

#[test]
fn reopened_store_sees_committed_data() {
    let dir = tempfile::tempdir().unwrap();
    {
        let db = Database::open(Config::new(dir.path())).unwrap();
        let table = val_table(&db);
        db.insert_record(&table, val_data(99)).unwrap();
    }

    let db = Database::open(Config::new(dir.path())).unwrap();
    let table = db.get_table("s:t").unwrap();
    let current = db.get_current_records(&table).unwrap();
    assert_eq!(current.len(), 1);
    assert_eq!(val_of(&current[0]), 99);
}

#[test]
fn null_values_roundtrip_through_updates() {
    let (_dir, db) = open_db();
    let table = val_table(&db);

    db.insert_record(&table, val_data(5)).unwrap();
    let record = db.get_current_records(&table).unwrap().remove(0);

    let mut updates = HashMap::new();
    updates.insert("val".to_string(), Value::Null);
    db.update_record(&table, &record, updates).unwrap();

    let current = db.get_current_records(&table).unwrap();
    assert_eq!(current.len(), 1);
    let field = table.field("val").unwrap();
    assert!(current[0].is_null(field));

    let recovered = Arc::clone(&current[0]);
    db.update_record(&table, &recovered, val_data(6)).unwrap();
    assert_eq!(val_of(&db.get_current_records(&table).unwrap()[0]), 6);
}
