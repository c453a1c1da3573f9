//! # Status Envelope
//!
//! Failures that cross the public API boundary carry a numbered status so
//! callers can branch without parsing message text. The envelope is a plain
//! `std::error::Error`, so it travels inside `eyre::Report` and can be
//! recovered with `Report::downcast_ref::<Status>()`.
//!
//! ## Status Codes
//!
//! | Code | Meaning                  |
//! |------|--------------------------|
//! | 400  | Bad request              |
//! | 401  | Schema does not exist    |
//! | 402  | Table does not exist     |
//! | 403  | Field does not exist     |
//! | 411  | Schema already exists    |
//! | 412  | Table already exists     |
//! | 413  | Field already exists     |
//! | 491  | Invalid name             |
//! | 500  | Database error           |
//! | 501  | Internal error           |
//! | 600  | Unknown                  |
//!
//! Codes 4xx are caller errors, 5xx are engine errors, 6xx is unclassified.

use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum StatusCode {
    BadRequest = 400,
    SchemaMissing = 401,
    TableMissing = 402,
    FieldMissing = 403,
    SchemaExists = 411,
    TableExists = 412,
    FieldExists = 413,
    InvalidName = 491,
    DbError = 500,
    Internal = 501,
    Unknown = 600,
}

impl StatusCode {
    pub fn as_u16(self) -> u16 {
        self as u16
    }

    pub fn is_caller_error(self) -> bool {
        (400..500).contains(&self.as_u16())
    }

    pub fn is_db_error(self) -> bool {
        (500..600).contains(&self.as_u16())
    }
}

impl fmt::Display for StatusCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_u16())
    }
}

/// Error envelope surfaced by the public API: a status code, a human-readable
/// message, and the unix timestamp (seconds) at which the failure was raised.
#[derive(Debug, Clone, Error)]
#[error("{code} [{timestamp}] {message}")]
pub struct Status {
    pub timestamp: u64,
    pub code: StatusCode,
    pub message: String,
}

impl Status {
    pub fn new(code: StatusCode, message: impl Into<String>) -> Self {
        let timestamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);
        Self {
            timestamp,
            code,
            message: message.into(),
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BadRequest, message)
    }

    pub fn schema_missing(name: &str) -> Self {
        Self::new(
            StatusCode::SchemaMissing,
            format!("schema '{name}' does not exist"),
        )
    }

    pub fn table_missing(schema: &str, table: &str) -> Self {
        Self::new(
            StatusCode::TableMissing,
            format!("table '{table}' does not exist in schema '{schema}'"),
        )
    }

    pub fn field_missing(table: &str, field: &str) -> Self {
        Self::new(
            StatusCode::FieldMissing,
            format!("field '{field}' does not exist in table '{table}'"),
        )
    }

    pub fn schema_exists(name: &str) -> Self {
        Self::new(
            StatusCode::SchemaExists,
            format!("schema '{name}' already exists"),
        )
    }

    pub fn table_exists(name: &str) -> Self {
        Self::new(
            StatusCode::TableExists,
            format!("table '{name}' already exists"),
        )
    }

    pub fn invalid_name(message: impl Into<String>) -> Self {
        Self::new(StatusCode::InvalidName, message)
    }
}
