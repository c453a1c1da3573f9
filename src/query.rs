//! # Query Evaluator
//!
//! A fluent filter / sort / limit pipeline over a table's live records:
//!
//! ```ignore
//! let rows = db
//!     .select(&table)
//!     .filter("n", FilterOp::Ge, 2)
//!     .sort("n", true)
//!     .limit(3)
//!     .fetch_all()?;
//! ```
//!
//! The pipeline always runs in this order:
//!
//! 1. Materialize every record from the table file.
//! 2. Keep only live versions (current and not deleted).
//! 3. Apply all filters conjunctively. A predicate on an unknown or null
//!    field rejects the record; it is never an error.
//! 4. Stable-sort by the chosen field. Records without a sortable value go
//!    last in both directions.
//! 5. Truncate to the limit when one is set.
//!
//! Filter comparability follows [`Value`]: strings lexicographic, int and
//! float mutually coercible, bools equality-only, anything else false.

use std::cmp::Ordering;
use std::sync::Arc;

use eyre::Result;

use crate::record::Record;
use crate::schema::Table;
use crate::storage;
use crate::types::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

#[derive(Debug, Clone)]
struct FilterCond {
    field: String,
    op: FilterOp,
    value: Value,
}

#[derive(Debug, Clone)]
pub struct Query {
    table: Table,
    conditions: Vec<FilterCond>,
    sort_field: Option<String>,
    ascending: bool,
    limit: usize,
}

impl Query {
    pub(crate) fn new(table: Table) -> Self {
        Self {
            table,
            conditions: Vec::new(),
            sort_field: None,
            ascending: true,
            limit: 0,
        }
    }

    /// Adds a conjunctive filter condition.
    pub fn filter(mut self, field: impl Into<String>, op: FilterOp, value: impl Into<Value>) -> Self {
        self.conditions.push(FilterCond {
            field: field.into(),
            op,
            value: value.into(),
        });
        self
    }

    /// Sorts by `field`; ascending when `ascending` is true.
    pub fn sort(mut self, field: impl Into<String>, ascending: bool) -> Self {
        self.sort_field = Some(field.into());
        self.ascending = ascending;
        self
    }

    /// Caps the result count. Zero means no limit.
    pub fn limit(mut self, count: usize) -> Self {
        self.limit = count;
        self
    }

    /// Runs the pipeline and returns the matching records.
    pub fn fetch_all(self) -> Result<Vec<Arc<Record>>> {
        let mut records: Vec<Arc<Record>> = storage::read_all(&self.table)?
            .into_iter()
            .filter(|r| r.meta().is_live())
            .map(Arc::new)
            .collect();

        if !self.conditions.is_empty() {
            records.retain(|r| self.conditions.iter().all(|c| matches(r, c)));
        }

        if let Some(field) = &self.sort_field {
            let ascending = self.ascending;
            records.sort_by(|a, b| sort_key(a, field, b, ascending));
        }

        if self.limit > 0 && records.len() > self.limit {
            records.truncate(self.limit);
        }

        Ok(records)
    }
}

fn matches(record: &Record, cond: &FilterCond) -> bool {
    let value = match record.value(&cond.field) {
        Some(value) if !value.is_null() => value,
        _ => return false,
    };
    match cond.op {
        FilterOp::Eq => value.equals(&cond.value),
        FilterOp::Ne => value.comparable(&cond.value) && !value.equals(&cond.value),
        FilterOp::Lt => matches!(
            value.partial_cmp_coerced(&cond.value),
            Some(Ordering::Less)
        ),
        FilterOp::Le => matches!(
            value.partial_cmp_coerced(&cond.value),
            Some(Ordering::Less | Ordering::Equal)
        ),
        FilterOp::Gt => matches!(
            value.partial_cmp_coerced(&cond.value),
            Some(Ordering::Greater)
        ),
        FilterOp::Ge => matches!(
            value.partial_cmp_coerced(&cond.value),
            Some(Ordering::Greater | Ordering::Equal)
        ),
    }
}

fn sort_key(a: &Record, field: &str, b: &Record, ascending: bool) -> Ordering {
    let left = a.value(field).filter(|v| !v.is_null());
    let right = b.value(field).filter(|v| !v.is_null());
    match (left, right) {
        (None, None) => Ordering::Equal,
        (None, Some(_)) => Ordering::Greater,
        (Some(_), None) => Ordering::Less,
        (Some(x), Some(y)) => {
            let ord = x.sort_cmp(y);
            if ascending {
                ord
            } else {
                ord.reverse()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::database::Database;
    use crate::schema::Table;
    use crate::types::{Field, FieldType};
    use std::collections::HashMap;

    fn seeded_db(values: &[i64]) -> (tempfile::TempDir, Database, Table) {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::open(Config::new(dir.path())).unwrap();
        db.create_schema("app").unwrap();
        let table = db
            .create_table(
                "app",
                "t",
                vec![
                    Field::new("n", FieldType::Int, 8),
                    Field::new("label", FieldType::Str, 16),
                ],
            )
            .unwrap();
        for &n in values {
            let mut data = HashMap::new();
            data.insert("n".to_string(), Value::Int(n));
            db.insert_record(&table, data).unwrap();
        }
        (dir, db, table)
    }

    fn ns(records: &[Arc<Record>]) -> Vec<i64> {
        records
            .iter()
            .map(|r| match r.value("n") {
                Some(Value::Int(n)) => *n,
                other => panic!("unexpected value {other:?}"),
            })
            .collect()
    }

    #[test]
    fn filter_sort_limit_pipeline() {
        let (_dir, db, table) = seeded_db(&[3, 1, 4, 1, 5, 9, 2]);
        let rows = db
            .select(&table)
            .filter("n", FilterOp::Ge, 2)
            .sort("n", true)
            .limit(3)
            .fetch_all()
            .unwrap();
        assert_eq!(ns(&rows), vec![2, 3, 4]);
    }

    #[test]
    fn descending_sort_without_limit() {
        let (_dir, db, table) = seeded_db(&[3, 1, 2]);
        let rows = db.select(&table).sort("n", false).fetch_all().unwrap();
        assert_eq!(ns(&rows), vec![3, 2, 1]);
    }

    #[test]
    fn unknown_filter_field_rejects_all_records() {
        let (_dir, db, table) = seeded_db(&[1, 2]);
        let rows = db
            .select(&table)
            .filter("ghost", FilterOp::Eq, 1)
            .fetch_all()
            .unwrap();
        assert!(rows.is_empty());
    }

    #[test]
    fn cross_type_predicate_is_false_not_an_error() {
        let (_dir, db, table) = seeded_db(&[1, 2]);
        let rows = db
            .select(&table)
            .filter("n", FilterOp::Gt, "abc")
            .fetch_all()
            .unwrap();
        assert!(rows.is_empty());
    }

    #[test]
    fn int_filters_coerce_against_floats() {
        let (_dir, db, table) = seeded_db(&[1, 2, 3]);
        let rows = db
            .select(&table)
            .filter("n", FilterOp::Gt, 1.5)
            .sort("n", true)
            .fetch_all()
            .unwrap();
        assert_eq!(ns(&rows), vec![2, 3]);
    }

    #[test]
    fn records_missing_the_sort_field_go_last_both_directions() {
        let (_dir, db, table) = seeded_db(&[2, 1]);
        let mut data = HashMap::new();
        data.insert("label".to_string(), Value::Str("only-label".to_string()));
        db.insert_record(&table, data).unwrap();

        let rows = db.select(&table).sort("n", true).fetch_all().unwrap();
        assert_eq!(rows.len(), 3);
        assert!(rows[2].value("n").is_none());

        let rows = db.select(&table).sort("n", false).fetch_all().unwrap();
        assert!(rows[2].value("n").is_none());
    }

    #[test]
    fn superseded_versions_are_invisible() {
        let (_dir, db, table) = seeded_db(&[1]);
        let current = db.get_current_records(&table).unwrap().remove(0);
        let mut updates = HashMap::new();
        updates.insert("n".to_string(), Value::Int(10));
        db.update_record(&table, &current, updates).unwrap();

        let rows = db.select(&table).fetch_all().unwrap();
        assert_eq!(ns(&rows), vec![10]);
    }

    #[test]
    fn ne_requires_comparable_values() {
        let (_dir, db, table) = seeded_db(&[1, 2]);
        let rows = db
            .select(&table)
            .filter("n", FilterOp::Ne, "text")
            .fetch_all()
            .unwrap();
        assert!(rows.is_empty());

        let rows = db
            .select(&table)
            .filter("n", FilterOp::Ne, 1)
            .fetch_all()
            .unwrap();
        assert_eq!(ns(&rows), vec![2]);
    }
}
