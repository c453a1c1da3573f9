//! # Table Definition
//!
//! A [`Table`] is the hydrated form of a table's config file: the table name,
//! the ordered field list (implicit `id` first), and the schema directory it
//! lives in. The struct serializes directly to the JSON config format:
//!
//! ```json
//! {
//!   "tableName": "users",
//!   "fields": [
//!     { "name": "id", "type": "timeID", "length": 8,
//!       "constraints": ["primary_key", "not_null", "unique"] },
//!     { "name": "name", "type": "string", "length": 64, "constraints": [] }
//!   ],
//!   "schemaPath": "/data/app"
//! }
//! ```

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::record::codec;
use crate::types::{Field, FieldType};

use super::{CONF_SUFFIX, DATA_SUFFIX, REF_SUFFIX};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Table {
    pub table_name: String,
    pub fields: Vec<Field>,
    pub schema_path: PathBuf,
}

impl Table {
    pub fn schema_name(&self) -> String {
        self.schema_path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default()
    }

    /// The `schema:table` form used for lookups and lock keys.
    pub fn qualified_name(&self) -> String {
        format!("{}:{}", self.schema_name(), self.table_name)
    }

    pub fn data_path(&self) -> PathBuf {
        self.schema_path
            .join(format!("{}{}", self.table_name, DATA_SUFFIX))
    }

    pub fn config_path(&self) -> PathBuf {
        self.schema_path
            .join(format!("{}{}", self.table_name, CONF_SUFFIX))
    }

    /// Sidecar file holding the out-of-line payloads of one ref field.
    pub fn sidecar_path(&self, field: &str) -> PathBuf {
        self.schema_path
            .join(format!("{}.{}{}", self.table_name, field, REF_SUFFIX))
    }

    pub fn field(&self, name: &str) -> Option<&Field> {
        self.fields.iter().find(|f| f.name == name)
    }

    pub fn ref_fields(&self) -> impl Iterator<Item = &Field> {
        self.fields
            .iter()
            .filter(|f| f.field_type == FieldType::Ref)
    }

    /// Fixed on-disk size of one record of this table.
    pub fn record_size(&self) -> usize {
        codec::record_size(&self.fields)
    }
}
