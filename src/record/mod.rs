//! # Record Runtime Entity
//!
//! A [`Record`] is one row version held in memory: the primary-key id, a
//! metadata word, one [`Value`] per field, and, for `ref` fields, the
//! `[start, end)` byte range of the out-of-line payload in that field's
//! sidecar file.
//!
//! ## Metadata
//!
//! ```text
//! Bit 0: CURRENT_BIT  - this version is the live one
//! Bit 1: DELETED_BIT  - tombstone
//! Bit 2: LOCKED_BIT   - held by a transaction (txn_id != 0)
//! Bits 3-7: reserved
//! ```
//!
//! A record is *current* iff `CURRENT_BIT` is set and `DELETED_BIT` is not.
//! The metadata word lives behind the record's own mutex; locking a record
//! for a transaction is the single admission point for mutation.
//!
//! ## Versioning
//!
//! Updates and deletes never touch an existing version. They `clone_for` the
//! owning transaction: the clone gets a fresh id, copies of all field values
//! and ref ranges, and remembers the id it supersedes so commit can demote
//! the prior version. Staged clones are locked and not current until commit.
//!
//! ## Lock Scope
//!
//! The lock is a property of the in-memory handle. Two transactions conflict
//! when they stage against the same `Arc<Record>`; the on-disk lock bits only
//! ever persist transiently and committed records always land unlocked.

pub mod codec;

use std::collections::HashMap;

use eyre::{bail, Result};
use parking_lot::Mutex;

use crate::types::{Field, FieldType, Value, ID_FIELD};

/// Byte range `[start, end)` into a ref sidecar file.
pub type RefRange = (u64, u64);

pub mod flags {
    pub const CURRENT_BIT: u8 = 0b0000_0001;
    pub const DELETED_BIT: u8 = 0b0000_0010;
    pub const LOCKED_BIT: u8 = 0b0000_0100;
}

/// Only the low 24 bits of a transaction id fit in the record format; lock
/// ownership comparisons mask accordingly.
pub const TXN_ID_MASK: u64 = 0x00FF_FFFF;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordMeta {
    pub is_current: bool,
    pub is_deleted: bool,
    pub is_locked: bool,
    pub txn_id: u64,
}

impl RecordMeta {
    /// Metadata of a committed, live version.
    pub fn committed() -> Self {
        Self {
            is_current: true,
            is_deleted: false,
            is_locked: false,
            txn_id: 0,
        }
    }

    /// Metadata of a version staged inside a transaction: locked, not yet
    /// current.
    pub fn staged(txn_id: u64) -> Self {
        Self {
            is_current: false,
            is_deleted: false,
            is_locked: true,
            txn_id,
        }
    }

    pub fn flags_byte(&self) -> u8 {
        let mut byte = 0u8;
        if self.is_current {
            byte |= flags::CURRENT_BIT;
        }
        if self.is_deleted {
            byte |= flags::DELETED_BIT;
        }
        if self.is_locked {
            byte |= flags::LOCKED_BIT;
        }
        byte
    }

    pub fn from_flags_byte(byte: u8, txn_id: u64) -> Self {
        Self {
            is_current: byte & flags::CURRENT_BIT != 0,
            is_deleted: byte & flags::DELETED_BIT != 0,
            is_locked: byte & flags::LOCKED_BIT != 0,
            txn_id,
        }
    }

    pub fn is_live(&self) -> bool {
        self.is_current && !self.is_deleted
    }
}

#[derive(Debug)]
pub struct Record {
    id: i64,
    meta: Mutex<RecordMeta>,
    fields: HashMap<String, Value>,
    ref_offsets: HashMap<String, RefRange>,
    supersedes: Option<i64>,
}

impl Record {
    /// Builds a freshly staged record for an insert. The id is mirrored into
    /// the field map.
    pub fn new_staged(id: i64, mut fields: HashMap<String, Value>, txn_id: u64) -> Self {
        fields.insert(ID_FIELD.to_string(), Value::Int(id));
        Self {
            id,
            meta: Mutex::new(RecordMeta::staged(txn_id)),
            fields,
            ref_offsets: HashMap::new(),
            supersedes: None,
        }
    }

    /// Reassembles a record from decoded parts.
    pub fn from_parts(
        id: i64,
        meta: RecordMeta,
        mut fields: HashMap<String, Value>,
        ref_offsets: HashMap<String, RefRange>,
    ) -> Self {
        fields.insert(ID_FIELD.to_string(), Value::Int(id));
        Self {
            id,
            meta: Mutex::new(meta),
            fields,
            ref_offsets,
            supersedes: None,
        }
    }

    pub fn id(&self) -> i64 {
        self.id
    }

    /// Snapshot of the metadata word.
    pub fn meta(&self) -> RecordMeta {
        *self.meta.lock()
    }

    pub fn value(&self, field: &str) -> Option<&Value> {
        self.fields.get(field)
    }

    pub fn fields(&self) -> &HashMap<String, Value> {
        &self.fields
    }

    pub fn ref_range(&self, field: &str) -> Option<RefRange> {
        self.ref_offsets.get(field).copied()
    }

    pub fn ref_offsets(&self) -> &HashMap<String, RefRange> {
        &self.ref_offsets
    }

    /// Id of the prior version this staged clone replaces, if any.
    pub fn supersedes(&self) -> Option<i64> {
        self.supersedes
    }

    /// A field is null when it carries no usable payload: a ref field with
    /// neither offsets nor a pending payload, any other field without a
    /// value.
    pub fn is_null(&self, field: &Field) -> bool {
        if field.field_type == FieldType::Ref && self.ref_offsets.contains_key(&field.name) {
            return false;
        }
        match self.fields.get(&field.name) {
            None => true,
            Some(value) => value.is_null(),
        }
    }

    /// Takes the record lock for a transaction. Re-locking by the holder is
    /// a no-op; any other holder is a conflict.
    pub fn lock(&self, txn_id: u64) -> Result<()> {
        let mut meta = self.meta.lock();
        if meta.is_locked && meta.txn_id != txn_id {
            bail!(
                "record {} is locked by transaction {}",
                self.id,
                meta.txn_id
            );
        }
        meta.is_locked = true;
        meta.txn_id = txn_id;
        Ok(())
    }

    /// Unconditionally releases the lock.
    pub fn unlock(&self) {
        let mut meta = self.meta.lock();
        meta.is_locked = false;
        meta.txn_id = 0;
    }

    /// Transaction id of the current holder, if locked.
    pub fn locked_by(&self) -> Option<u64> {
        let meta = self.meta.lock();
        meta.is_locked.then_some(meta.txn_id)
    }

    /// Sets the tombstone bit. Fails if another transaction holds the lock.
    pub fn mark_deleted(&self, txn_id: u64) -> Result<()> {
        let mut meta = self.meta.lock();
        if meta.is_locked && meta.txn_id != txn_id {
            bail!(
                "record {} is locked by transaction {}",
                self.id,
                meta.txn_id
            );
        }
        meta.is_deleted = true;
        Ok(())
    }

    /// Creates the staging copy for an update or delete: fresh id, same
    /// values and ref ranges, locked by `txn_id`, not current, and marked as
    /// superseding this version. Fails if another transaction holds the lock.
    pub fn clone_for(&self, txn_id: u64) -> Result<Record> {
        let meta = self.meta.lock();
        if meta.is_locked && meta.txn_id != txn_id {
            bail!(
                "record {} is locked by transaction {}",
                self.id,
                meta.txn_id
            );
        }

        let new_id = crate::mvcc::next_record_id();
        let mut fields = self.fields.clone();
        fields.insert(ID_FIELD.to_string(), Value::Int(new_id));

        Ok(Record {
            id: new_id,
            meta: Mutex::new(RecordMeta {
                is_current: false,
                is_deleted: meta.is_deleted,
                is_locked: true,
                txn_id,
            }),
            fields,
            ref_offsets: self.ref_offsets.clone(),
            supersedes: Some(self.id),
        })
    }

    /// Commit transition: current, unlocked, no owning transaction.
    pub fn promote(&self) {
        let mut meta = self.meta.lock();
        meta.is_current = true;
        meta.is_locked = false;
        meta.txn_id = 0;
    }

    /// Marks a superseded version as no longer current.
    pub fn demote(&self) {
        self.meta.lock().is_current = false;
    }

    /// Clears the lock when held by `txn_id` (24-bit masked, since decoded
    /// records only carry the truncated id). Returns whether anything
    /// changed.
    pub fn clear_lock_if(&self, txn_id: u64) -> bool {
        let mut meta = self.meta.lock();
        if meta.is_locked && meta.txn_id & TXN_ID_MASK == txn_id & TXN_ID_MASK {
            meta.is_locked = false;
            meta.txn_id = 0;
            true
        } else {
            false
        }
    }

    // Staging-side mutation. These run on a clone that is not yet shared.

    pub fn set_value(&mut self, field: &str, value: Value) {
        self.fields.insert(field.to_string(), value);
    }

    /// Nulls a field: drops its value and any sidecar range.
    pub fn clear_field(&mut self, field: &str) {
        self.fields.remove(field);
        self.ref_offsets.remove(field);
    }

    pub fn set_ref_range(&mut self, field: &str, range: RefRange) {
        self.ref_offsets.insert(field.to_string(), range);
    }

    pub fn set_deleted(&mut self) {
        self.meta.get_mut().is_deleted = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Record {
        let mut fields = HashMap::new();
        fields.insert("n".to_string(), Value::Int(7));
        Record::new_staged(100, fields, 1)
    }

    #[test]
    fn meta_flags_roundtrip() {
        let meta = RecordMeta {
            is_current: true,
            is_deleted: false,
            is_locked: true,
            txn_id: 9,
        };
        let byte = meta.flags_byte();
        assert_eq!(byte, flags::CURRENT_BIT | flags::LOCKED_BIT);
        assert_eq!(RecordMeta::from_flags_byte(byte, 9), meta);
    }

    #[test]
    fn staged_record_mirrors_id_into_fields() {
        let record = sample();
        assert_eq!(record.value(ID_FIELD), Some(&Value::Int(100)));
        let meta = record.meta();
        assert!(meta.is_locked && !meta.is_current);
        assert_eq!(meta.txn_id, 1);
    }

    #[test]
    fn lock_is_reentrant_for_holder_and_conflicts_for_others() {
        let record = sample();
        record.lock(1).unwrap();
        record.lock(1).unwrap();
        let err = record.lock(2).unwrap_err();
        assert!(err.to_string().contains("transaction 1"));
        record.unlock();
        record.lock(2).unwrap();
        assert_eq!(record.locked_by(), Some(2));
    }

    #[test]
    fn clone_for_gets_fresh_id_and_supersedes() {
        let record = sample();
        record.promote();
        let clone = record.clone_for(3).unwrap();
        assert_ne!(clone.id(), record.id());
        assert_eq!(clone.supersedes(), Some(record.id()));
        assert_eq!(clone.value("n"), Some(&Value::Int(7)));
        assert_eq!(clone.value(ID_FIELD), Some(&Value::Int(clone.id())));
        let meta = clone.meta();
        assert!(meta.is_locked && !meta.is_current && meta.txn_id == 3);
    }

    #[test]
    fn clone_for_respects_foreign_lock() {
        let record = sample();
        record.promote();
        record.lock(5).unwrap();
        assert!(record.clone_for(6).is_err());
        assert!(record.clone_for(5).is_ok());
    }

    #[test]
    fn mark_deleted_respects_foreign_lock() {
        let record = sample();
        record.promote();
        record.lock(2).unwrap();
        assert!(record.mark_deleted(3).is_err());
        assert!(!record.meta().is_deleted);
        record.mark_deleted(2).unwrap();
        assert!(record.meta().is_deleted);
    }

    #[test]
    fn clear_lock_if_masks_to_24_bits() {
        let record = sample();
        record.lock(7).unwrap();
        // A decoded record would carry 7 & TXN_ID_MASK; the full id must
        // still match it.
        assert!(record.clear_lock_if(7 | 0x0100_0000_0000));
        assert_eq!(record.locked_by(), None);
    }

    #[test]
    fn ref_field_nullness_follows_offsets() {
        let field = Field::new("body", FieldType::Ref, crate::types::REF_CELL_LEN);
        let mut record = sample();
        assert!(record.is_null(&field));
        record.set_ref_range("body", (0, 3));
        assert!(!record.is_null(&field));
        record.clear_field("body");
        assert!(record.is_null(&field));
    }
}
