//! # StrataDB - Embedded Append-Only Relational Store
//!
//! StrataDB is a file-backed relational store with multi-version record
//! semantics: every update and delete appends a new version, superseded
//! versions stay in the table file until a background worker compacts them.
//! Writes go through transactions with pessimistic per-record locking;
//! reads materialize a snapshot of the table file and never block writers.
//!
//! ## Quick Start
//!
//! ```ignore
//! use stratadb::{Config, Database, Field, FieldType, FilterOp, Value};
//!
//! let db = Database::open(Config::new("./data"))?;
//! db.create_schema("app")?;
//! let table = db.create_table("app", "users", vec![
//!     Field::new("name", FieldType::Str, 64),
//!     Field::new("age", FieldType::Int, 8),
//! ])?;
//!
//! let mut row = std::collections::HashMap::new();
//! row.insert("name".to_string(), Value::from("alice"));
//! row.insert("age".to_string(), Value::from(34));
//! db.insert_record(&table, row)?;
//!
//! let adults = db.select(&table)
//!     .filter("age", FilterOp::Ge, 18)
//!     .sort("name", true)
//!     .fetch_all()?;
//! ```
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────┐
//! │              Database (facade)              │
//! │   txn registry · one-shot ops · lifecycle   │
//! ├──────────────┬───────────────┬──────────────┤
//! │ Transactions │     Query     │   Cleanup    │
//! │ lock + stage │ filter/sort/  │  compaction  │
//! │ commit/roll  │    limit      │    worker    │
//! ├──────────────┴───────────────┴──────────────┤
//! │          Schema Catalog (dirs + JSON)       │
//! ├─────────────────────────────────────────────┤
//! │     Record Codec (fixed-width binary)       │
//! ├─────────────────────────────────────────────┤
//! │  Table Files (rewrite + rename) · Sidecars  │
//! └─────────────────────────────────────────────┘
//! ```
//!
//! ## File Layout
//!
//! ```text
//! data_root/
//! ├── app/                       # schema directory
//! │   ├── index.conf.sdb         # schema marker
//! │   ├── users.sdb              # packed fixed-width records
//! │   ├── users.conf.sdb         # JSON field list
//! │   └── users.bio.data.sdb     # sidecar of ref field "bio"
//! └── audit/
//!     └── ...
//! ```
//!
//! ## Concurrency Model
//!
//! One process owns the data root; threads inside it coordinate through:
//!
//! - a per-record mutex: the lock a transaction takes before staging
//!   against a record handle;
//! - a per-table-file write mutex: held across every read, modify, rewrite
//!   sequence on a table file, by commits, rollbacks, and the cleanup
//!   worker alike;
//! - a per-sidecar append mutex, so concurrent stagings get disjoint
//!   payload ranges.
//!
//! Durability is best-effort: whole-file rewrites land via temp file plus
//! atomic rename, but there is no write-ahead log and no cross-table commit
//! atomicity.

mod cleanup;

pub mod config;
pub mod database;
pub mod error;
pub mod mvcc;
pub mod query;
pub mod record;
pub mod schema;
pub mod storage;
pub mod types;

pub use config::Config;
pub use database::Database;
pub use error::{Status, StatusCode};
pub use mvcc::{Transaction, TxnId, TxnState};
pub use query::{FilterOp, Query};
pub use record::{Record, RecordMeta, RefRange};
pub use schema::{Schema, Table};
pub use types::{Constraint, Field, FieldType, Value, ID_FIELD, REF_CELL_LEN, TIME_ID_LEN};
