//! # Field and Value Model
//!
//! Tables are described by an ordered list of [`Field`]s; records carry one
//! [`Value`] per field. The field list is persisted verbatim in the table's
//! config file, so the serde names here are part of the on-disk contract.
//!
//! ## Field Types
//!
//! | Type     | Cell payload                          | Required length |
//! |----------|---------------------------------------|-----------------|
//! | `timeID` | i64 nanosecond timestamp              | 8               |
//! | `int`    | i64                                   | 8               |
//! | `float`  | f64 bit pattern                       | 8               |
//! | `string` | UTF-8, zero padded                    | ≥ 1             |
//! | `bool`   | 1 byte (0/1)                          | ≥ 1             |
//! | `ref`    | two u64 sidecar offsets, rest zeroed  | 128             |
//!
//! ## Comparison Semantics
//!
//! - `Null` never equals and never orders against anything.
//! - `Int` and `Float` are mutually coercible (int widens to float).
//! - Strings compare lexicographically.
//! - Booleans support equality only; `false < true` is honored when a query
//!   sorts on a bool field.
//! - Any other pairing is incomparable.

use std::cmp::Ordering;
use std::fmt;

use eyre::Result;
use serde::{Deserialize, Serialize};

use crate::error::Status;

/// Name of the implicit primary-key field prepended to every table.
pub const ID_FIELD: &str = "id";

/// Fixed cell width of a `timeID` field.
pub const TIME_ID_LEN: u32 = 8;
/// Fixed cell width of a `ref` field (two offsets + reserved bytes).
pub const REF_CELL_LEN: u32 = 128;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FieldType {
    #[serde(rename = "timeID")]
    TimeId,
    #[serde(rename = "int")]
    Int,
    #[serde(rename = "float")]
    Float,
    #[serde(rename = "string")]
    Str,
    #[serde(rename = "bool")]
    Bool,
    #[serde(rename = "ref")]
    Ref,
}

impl FieldType {
    pub fn name(self) -> &'static str {
        match self {
            FieldType::TimeId => "timeID",
            FieldType::Int => "int",
            FieldType::Float => "float",
            FieldType::Str => "string",
            FieldType::Bool => "bool",
            FieldType::Ref => "ref",
        }
    }
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Constraint {
    #[serde(rename = "primary_key")]
    PrimaryKey,
    #[serde(rename = "not_null")]
    NotNull,
    #[serde(rename = "unique")]
    Unique,
}

/// One column of a table: a name, a type, the fixed on-disk cell width, and
/// declared constraints. Constraints other than the implicit primary key are
/// recorded but not enforced by the engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Field {
    pub name: String,
    #[serde(rename = "type")]
    pub field_type: FieldType,
    pub length: u32,
    #[serde(default)]
    pub constraints: Vec<Constraint>,
}

impl Field {
    pub fn new(name: impl Into<String>, field_type: FieldType, length: u32) -> Self {
        Self {
            name: name.into(),
            field_type,
            length,
            constraints: Vec::new(),
        }
    }

    pub fn with_constraint(mut self, constraint: Constraint) -> Self {
        self.constraints.push(constraint);
        self
    }

    /// The implicit primary-key field every table starts with.
    pub fn id_field() -> Self {
        Field::new(ID_FIELD, FieldType::TimeId, TIME_ID_LEN)
            .with_constraint(Constraint::PrimaryKey)
            .with_constraint(Constraint::NotNull)
            .with_constraint(Constraint::Unique)
    }

    /// Checks the type/length invariants the codec depends on.
    pub fn validate(&self) -> Result<()> {
        let ok = match self.field_type {
            FieldType::TimeId => self.length == TIME_ID_LEN,
            FieldType::Ref => self.length == REF_CELL_LEN,
            FieldType::Int | FieldType::Float => self.length == 8,
            FieldType::Str | FieldType::Bool => self.length >= 1,
        };
        if !ok {
            return Err(Status::bad_request(format!(
                "field '{}' of type '{}' has invalid length {}",
                self.name, self.field_type, self.length
            ))
            .into());
        }
        Ok(())
    }
}

/// Runtime value of a single field.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Int(i64),
    Float(f64),
    Str(String),
    Bool(bool),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::Str(_) => "string",
            Value::Bool(_) => "bool",
        }
    }

    /// Whether this value can populate a cell of the declared type. `Ref`
    /// cells are fed from string payloads; `timeID` cells from integers.
    pub fn matches_type(&self, field_type: FieldType) -> bool {
        match (self, field_type) {
            (Value::Null, _) => true,
            (Value::Int(_), FieldType::Int | FieldType::TimeId) => true,
            (Value::Float(_), FieldType::Float) => true,
            (Value::Str(_), FieldType::Str | FieldType::Ref) => true,
            (Value::Bool(_), FieldType::Bool) => true,
            _ => false,
        }
    }

    /// Coerced equality. Incomparable pairings (and anything involving
    /// `Null`) are not equal.
    pub fn equals(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Float(a), Value::Float(b)) => a == b,
            (Value::Int(a), Value::Float(b)) => (*a as f64) == *b,
            (Value::Float(a), Value::Int(b)) => *a == (*b as f64),
            (Value::Str(a), Value::Str(b)) => a == b,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            _ => false,
        }
    }

    /// Whether the pair belongs to a comparable family at all. `!=` holds
    /// only for comparable, non-equal pairs.
    pub fn comparable(&self, other: &Value) -> bool {
        matches!(
            (self, other),
            (Value::Int(_) | Value::Float(_), Value::Int(_) | Value::Float(_))
                | (Value::Str(_), Value::Str(_))
                | (Value::Bool(_), Value::Bool(_))
        )
    }

    /// Coerced ordering for `<`, `<=`, `>`, `>=`. Booleans and incomparable
    /// pairings return `None`.
    pub fn partial_cmp_coerced(&self, other: &Value) -> Option<Ordering> {
        match (self, other) {
            (Value::Int(a), Value::Int(b)) => Some(a.cmp(b)),
            (Value::Str(a), Value::Str(b)) => Some(a.cmp(b)),
            (Value::Float(a), Value::Float(b)) => a.partial_cmp(b),
            (Value::Int(a), Value::Float(b)) => (*a as f64).partial_cmp(b),
            (Value::Float(a), Value::Int(b)) => a.partial_cmp(&(*b as f64)),
            _ => None,
        }
    }

    /// Total-enough ordering used by the sort stage. Booleans order with
    /// `false < true`; incomparable pairs keep their relative order.
    pub fn sort_cmp(&self, other: &Value) -> Ordering {
        match (self, other) {
            (Value::Bool(a), Value::Bool(b)) => a.cmp(b),
            _ => self.partial_cmp_coerced(other).unwrap_or(Ordering::Equal),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => f.write_str("null"),
            Value::Int(v) => write!(f, "{v}"),
            Value::Float(v) => write!(f, "{v}"),
            Value::Str(v) => f.write_str(v),
            Value::Bool(v) => write!(f, "{v}"),
        }
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Int(v as i64)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Str(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Str(v)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}
