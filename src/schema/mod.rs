//! # Schema Catalog
//!
//! The on-disk namespace is two levels deep: schema directories under the
//! data root, table files inside them.
//!
//! ```text
//! <data_root>/
//! ├── <schema>/
//! │   ├── index.conf.sdb           # schema marker
//! │   ├── <table>.sdb              # packed fixed-width record array
//! │   ├── <table>.conf.sdb         # JSON field list
//! │   └── <table>.<field>.data.sdb # one sidecar per ref field
//! ```
//!
//! Tables are always addressed by the qualified `schema:table` form; bare
//! names are rejected rather than falling back to a default schema.
//!
//! ## Naming Rules
//!
//! Schema and table names must be non-empty, must not start with `.`, and
//! must not contain `:` or path separators. `index` is reserved for the
//! schema marker file.

mod table;

pub use table::Table;

use std::fs;
use std::path::{Path, PathBuf};

use eyre::{Result, WrapErr};

use crate::error::Status;
use crate::storage;
use crate::types::Field;

/// Suffix of table data files.
pub const DATA_SUFFIX: &str = ".sdb";
/// Suffix of table config files.
pub const CONF_SUFFIX: &str = ".conf.sdb";
/// Suffix of ref sidecar files (after `<table>.<field>`).
pub const REF_SUFFIX: &str = ".data.sdb";
/// Marker file created in every schema directory.
pub const SCHEMA_MARKER: &str = "index.conf.sdb";

/// A handle to an existing schema directory.
#[derive(Debug, Clone)]
pub struct Schema {
    name: String,
    path: PathBuf,
}

pub fn create_schema(root: &Path, name: &str) -> Result<Schema> {
    validate_name(name, "schema")?;
    let path = root.join(name);
    if path.exists() {
        return Err(Status::schema_exists(name).into());
    }
    fs::create_dir_all(&path)
        .wrap_err_with(|| format!("failed to create schema directory '{}'", path.display()))?;
    storage::apply_dir_mode(&path)?;
    storage::create_file(&path.join(SCHEMA_MARKER))?;
    Ok(Schema {
        name: name.to_string(),
        path,
    })
}

pub fn open_schema(root: &Path, name: &str) -> Result<Schema> {
    let path = root.join(name);
    if !path.is_dir() {
        return Err(Status::schema_missing(name).into());
    }
    Ok(Schema {
        name: name.to_string(),
        path,
    })
}

impl Schema {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Creates a table in this schema: validates names and field lengths,
    /// prepends the implicit `id` field, creates the data file plus one
    /// sidecar per ref field, and writes the JSON config.
    pub fn create_table(&self, name: &str, fields: Vec<Field>) -> Result<Table> {
        validate_name(name, "table")?;
        if name == "index" {
            return Err(Status::invalid_name("'index' is a reserved table name").into());
        }

        let mut all_fields = vec![Field::id_field()];
        all_fields.extend(fields);

        for field in &all_fields {
            field.validate()?;
        }
        for (i, field) in all_fields.iter().enumerate() {
            if all_fields[..i].iter().any(|f| f.name == field.name) {
                return Err(Status::new(
                    crate::error::StatusCode::FieldExists,
                    format!("field '{}' is declared twice", field.name),
                )
                .into());
            }
        }

        let table = Table {
            table_name: name.to_string(),
            fields: all_fields,
            schema_path: self.path.clone(),
        };

        if table.data_path().exists() || table.config_path().exists() {
            return Err(Status::table_exists(name).into());
        }

        storage::create_file(&table.data_path())?;
        for field in table.ref_fields() {
            storage::create_file(&table.sidecar_path(&field.name))?;
        }

        let json = serde_json::to_vec_pretty(&table)
            .wrap_err_with(|| format!("failed to serialize config for table '{name}'"))?;
        storage::create_file(&table.config_path())?;
        fs::write(table.config_path(), json).wrap_err_with(|| {
            format!(
                "failed to write config file '{}'",
                table.config_path().display()
            )
        })?;

        Ok(table)
    }
}

/// Resolves a qualified `schema:table` name against the data root.
pub fn get_table(qualified: &str, root: &Path) -> Result<Table> {
    let Some((schema_name, table_name)) = qualified.split_once(':') else {
        return Err(Status::bad_request(format!(
            "table name '{qualified}' must be qualified as 'schema:table'"
        ))
        .into());
    };
    if schema_name.is_empty() || table_name.is_empty() {
        return Err(Status::bad_request(format!(
            "table name '{qualified}' must be qualified as 'schema:table'"
        ))
        .into());
    }

    let schema_path = root.join(schema_name);
    if !schema_path.is_dir() {
        return Err(Status::schema_missing(schema_name).into());
    }

    let conf_path = schema_path.join(format!("{table_name}{CONF_SUFFIX}"));
    if !conf_path.is_file() {
        return Err(Status::table_missing(schema_name, table_name).into());
    }

    let bytes = fs::read(&conf_path)
        .wrap_err_with(|| format!("failed to read config file '{}'", conf_path.display()))?;
    let mut table: Table = serde_json::from_slice(&bytes)
        .wrap_err_with(|| format!("failed to parse config file '{}'", conf_path.display()))?;
    table.schema_path = schema_path;
    Ok(table)
}

/// All schema directories under the data root.
pub fn list_schemas(root: &Path) -> Result<Vec<String>> {
    let entries = fs::read_dir(root)
        .wrap_err_with(|| format!("failed to read data root '{}'", root.display()))?;
    let mut schemas = Vec::new();
    for entry in entries {
        let entry = entry?;
        if entry.file_type()?.is_dir() {
            schemas.push(entry.file_name().to_string_lossy().into_owned());
        }
    }
    schemas.sort();
    Ok(schemas)
}

/// All table names in a schema directory: files with the engine extension
/// that are neither config files nor sidecars.
pub fn list_tables(schema_path: &Path) -> Result<Vec<String>> {
    let entries = fs::read_dir(schema_path)
        .wrap_err_with(|| format!("failed to read schema directory '{}'", schema_path.display()))?;
    let mut tables = Vec::new();
    for entry in entries {
        let entry = entry?;
        if !entry.file_type()?.is_file() {
            continue;
        }
        let name = entry.file_name().to_string_lossy().into_owned();
        if name.ends_with(DATA_SUFFIX)
            && !name.ends_with(CONF_SUFFIX)
            && !name.ends_with(REF_SUFFIX)
        {
            tables.push(name[..name.len() - DATA_SUFFIX.len()].to_string());
        }
    }
    tables.sort();
    Ok(tables)
}

fn validate_name(name: &str, kind: &str) -> Result<()> {
    if name.is_empty() {
        return Err(Status::invalid_name(format!("{kind} name must not be empty")).into());
    }
    if name.starts_with('.') {
        return Err(
            Status::invalid_name(format!("{kind} name '{name}' must not start with '.'")).into(),
        );
    }
    if name.contains(':') || name.contains('/') || name.contains('\\') {
        return Err(Status::invalid_name(format!(
            "{kind} name '{name}' must not contain ':' or path separators"
        ))
        .into());
    }
    Ok(())
}
