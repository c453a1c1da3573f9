//! # Fixed-Width Record Codec
//!
//! Encodes a [`Record`] to the packed on-disk form and back, given the
//! table's field list. The record size is fixed per table:
//!
//! ```text
//! size = 12 + Σ (field.length + 1)   over non-id fields
//! ```
//!
//! ## Binary Layout (little-endian)
//!
//! ```text
//! Offset  Size  Description
//! 0       8     id (i64, nanosecond timestamp)
//! 8       1     metadata flags (bit 0 current, bit 1 deleted, bit 2 locked)
//! 9       2     transaction id, low 16 bits
//! 11      1     transaction id, high 8 bits (24 bits total on disk)
//! 12      ...   per non-id field, in declared order:
//!                 1 byte null flag (1 = null, cell bytes zeroed)
//!                 field.length payload bytes
//! ```
//!
//! ## Cell Payloads
//!
//! | Type     | Encoding                                             |
//! |----------|------------------------------------------------------|
//! | `timeID` | i64 little-endian                                    |
//! | `int`    | i64 little-endian                                    |
//! | `float`  | exact f64 bit pattern (`to_bits`/`from_bits`)        |
//! | `string` | UTF-8 bytes, zero padded; trailing NULs trimmed on read |
//! | `bool`   | 1 byte, 0 or 1                                       |
//! | `ref`    | start u64, end u64; remaining 112 bytes reserved     |
//!
//! Strings therefore round-trip only up to trailing NULs; everything else is
//! byte-exact.

use std::collections::HashMap;

use eyre::{bail, ensure, Result};

use crate::record::{Record, RecordMeta, RefRange, TXN_ID_MASK};
use crate::types::{Field, FieldType, Value, ID_FIELD};

/// Bytes occupied by id + flags + transaction id.
pub const HEADER_LEN: usize = 12;

/// On-disk size of one record of a table with the given fields.
pub fn record_size(fields: &[Field]) -> usize {
    let mut size = HEADER_LEN;
    for field in fields {
        if field.name != ID_FIELD {
            size += field.length as usize + 1;
        }
    }
    size
}

pub fn encode(record: &Record, fields: &[Field]) -> Result<Vec<u8>> {
    let size = record_size(fields);
    let mut buf = vec![0u8; size];

    buf[0..8].copy_from_slice(&record.id().to_le_bytes());
    let meta = record.meta();
    buf[8] = meta.flags_byte();
    let txn = meta.txn_id & TXN_ID_MASK;
    buf[9..11].copy_from_slice(&(txn as u16).to_le_bytes());
    buf[11] = (txn >> 16) as u8;

    let mut pos = HEADER_LEN;
    for field in fields {
        if field.name == ID_FIELD {
            continue;
        }
        let len = field.length as usize;
        let null = record.is_null(field);
        buf[pos] = u8::from(null);
        pos += 1;

        if !null {
            encode_cell(record, field, &mut buf[pos..pos + len])?;
        }
        pos += len;
    }

    Ok(buf)
}

fn encode_cell(record: &Record, field: &Field, cell: &mut [u8]) -> Result<()> {
    match field.field_type {
        FieldType::TimeId | FieldType::Int => match record.value(&field.name) {
            Some(Value::Int(v)) => cell[0..8].copy_from_slice(&v.to_le_bytes()),
            other => bail!(
                "field '{}' expects an int value, got {}",
                field.name,
                type_label(other)
            ),
        },
        FieldType::Float => match record.value(&field.name) {
            Some(Value::Float(v)) => cell[0..8].copy_from_slice(&v.to_bits().to_le_bytes()),
            other => bail!(
                "field '{}' expects a float value, got {}",
                field.name,
                type_label(other)
            ),
        },
        FieldType::Str => match record.value(&field.name) {
            Some(Value::Str(v)) => {
                ensure!(
                    v.len() <= cell.len(),
                    "field '{}' value of {} bytes exceeds cell width {}",
                    field.name,
                    v.len(),
                    cell.len()
                );
                cell[..v.len()].copy_from_slice(v.as_bytes());
            }
            other => bail!(
                "field '{}' expects a string value, got {}",
                field.name,
                type_label(other)
            ),
        },
        FieldType::Bool => match record.value(&field.name) {
            Some(Value::Bool(v)) => cell[0] = u8::from(*v),
            other => bail!(
                "field '{}' expects a bool value, got {}",
                field.name,
                type_label(other)
            ),
        },
        FieldType::Ref => match record.ref_range(&field.name) {
            Some((start, end)) => {
                cell[0..8].copy_from_slice(&start.to_le_bytes());
                cell[8..16].copy_from_slice(&end.to_le_bytes());
            }
            None => bail!("field '{}' has no ref offsets but is not null", field.name),
        },
    }
    Ok(())
}

pub fn decode(buf: &[u8], fields: &[Field]) -> Result<Record> {
    let size = record_size(fields);
    ensure!(
        buf.len() >= size,
        "record buffer too short: {} bytes, need {}",
        buf.len(),
        size
    );

    let id = i64::from_le_bytes(buf[0..8].try_into().unwrap());
    let txn = u16::from_le_bytes(buf[9..11].try_into().unwrap()) as u64
        | (buf[11] as u64) << 16;
    let meta = RecordMeta::from_flags_byte(buf[8], txn);

    let mut values: HashMap<String, Value> = HashMap::new();
    let mut refs: HashMap<String, RefRange> = HashMap::new();

    let mut pos = HEADER_LEN;
    for field in fields {
        if field.name == ID_FIELD {
            continue;
        }
        let len = field.length as usize;
        let null = buf[pos] != 0;
        pos += 1;
        let cell = &buf[pos..pos + len];
        pos += len;

        if null {
            continue;
        }

        match field.field_type {
            FieldType::TimeId | FieldType::Int => {
                let v = i64::from_le_bytes(cell[0..8].try_into().unwrap());
                values.insert(field.name.clone(), Value::Int(v));
            }
            FieldType::Float => {
                let bits = u64::from_le_bytes(cell[0..8].try_into().unwrap());
                values.insert(field.name.clone(), Value::Float(f64::from_bits(bits)));
            }
            FieldType::Str => {
                let end = cell
                    .iter()
                    .rposition(|&b| b != 0)
                    .map(|i| i + 1)
                    .unwrap_or(0);
                let text = std::str::from_utf8(&cell[..end]).map_err(|e| {
                    eyre::eyre!("field '{}' holds invalid UTF-8: {}", field.name, e)
                })?;
                values.insert(field.name.clone(), Value::Str(text.to_string()));
            }
            FieldType::Bool => {
                let v = match cell[0] {
                    0 => false,
                    1 => true,
                    byte => bail!("field '{}' holds invalid bool byte {}", field.name, byte),
                };
                values.insert(field.name.clone(), Value::Bool(v));
            }
            FieldType::Ref => {
                let start = u64::from_le_bytes(cell[0..8].try_into().unwrap());
                let end = u64::from_le_bytes(cell[8..16].try_into().unwrap());
                refs.insert(field.name.clone(), (start, end));
            }
        }
    }

    Ok(Record::from_parts(id, meta, values, refs))
}

fn type_label(value: Option<&Value>) -> &'static str {
    value.map(Value::type_name).unwrap_or("nothing")
}
