//! # Transaction Primitives
//!
//! Transaction ids come from a process-wide monotonic counter starting at 1;
//! id 0 is reserved for "no owning transaction" in record metadata.
//!
//! Record ids are nanosecond wall-clock timestamps plus a monotonic counter
//! increment, so two records created in the same clock tick still get
//! distinct ids even on platforms with coarse clock resolution.

mod transaction;

pub use transaction::Transaction;

use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

pub type TxnId = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxnState {
    Active,
    Committed,
    RolledBack,
}

static TXN_COUNTER: AtomicU64 = AtomicU64::new(0);
static RECORD_SEQ: AtomicI64 = AtomicI64::new(0);

pub fn next_txn_id() -> TxnId {
    TXN_COUNTER.fetch_add(1, Ordering::SeqCst) + 1
}

pub fn next_record_id() -> i64 {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as i64)
        .unwrap_or(0);
    now + RECORD_SEQ.fetch_add(1, Ordering::SeqCst) + 1
}
