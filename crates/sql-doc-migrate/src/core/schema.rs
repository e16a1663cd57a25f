//! Column and table declarations describing how a relational table becomes a
//! document collection.
//!
//! A [`Column`] carries the source field name, the output field name and the
//! semantic [`ColumnType`] used by the cast rules in [`crate::typecast`].
//! A [`Table`] groups columns and checks, when it is built, that no two columns
//! write the same output field.

use std::collections::HashSet;
use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{MigrateError, Result};

use super::value::{Document, Row, Value};

/// Field that carries a row's source primary key on its document until
/// references are resolved.
pub const ORIGIN_ID_FIELD: &str = "origin_identifier";

/// Semantic type of a column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ColumnType {
    #[default]
    String,
    Integer,
    Float,
    Decimal,
    Boolean,
    DateTime,
    Date,
    Time,
    Timestamp,
    Text,
    Binary,
    /// Primary key of the table; translated into [`ORIGIN_ID_FIELD`].
    Key,
    /// Column is dropped from the output.
    Ignore,
}

impl ColumnType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ColumnType::String => "string",
            ColumnType::Integer => "integer",
            ColumnType::Float => "float",
            ColumnType::Decimal => "decimal",
            ColumnType::Boolean => "boolean",
            ColumnType::DateTime => "datetime",
            ColumnType::Date => "date",
            ColumnType::Time => "time",
            ColumnType::Timestamp => "timestamp",
            ColumnType::Text => "text",
            ColumnType::Binary => "binary",
            ColumnType::Key => "key",
            ColumnType::Ignore => "ignore",
        }
    }
}

impl fmt::Display for ColumnType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-column options. This is the complete set; anything else in a
/// translation file is rejected when it is loaded.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ColumnOptions {
    /// Output field name, if different from the source name.
    pub rename_to: Option<String>,
    /// Name of the table this column points to.
    pub reference: Option<String>,
    /// Drop the column from the output.
    pub ignore: bool,
}

impl ColumnOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn rename_to(mut self, name: impl Into<String>) -> Self {
        self.rename_to = Some(name.into());
        self
    }

    pub fn reference(mut self, table: impl Into<String>) -> Self {
        self.reference = Some(table.into());
        self
    }

    pub fn ignore(mut self) -> Self {
        self.ignore = true;
        self
    }
}

/// Column declaration as written in a translation file.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ColumnDef {
    pub name: String,

    #[serde(default, rename = "type", skip_serializing_if = "Option::is_none")]
    pub column_type: Option<ColumnType>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rename_to: Option<String>,

    #[serde(default, alias = "reference", skip_serializing_if = "Option::is_none")]
    pub references: Option<String>,

    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub ignore: bool,
}

/// One source column and how it is written to the document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "ColumnDef", into = "ColumnDef")]
pub struct Column {
    sql_name: String,
    name: String,
    column_type: ColumnType,
    options: ColumnOptions,
}

impl Column {
    /// Declare a column.
    ///
    /// A missing type means `string`. A column named `id` declared as
    /// `integer` becomes the table's `key`, and a column named `<entity>_id`
    /// references the plural of `<entity>` unless a reference was given.
    pub fn new(
        sql_name: impl Into<String>,
        column_type: Option<ColumnType>,
        mut options: ColumnOptions,
    ) -> Self {
        let sql_name = sql_name.into();
        let mut column_type = column_type.unwrap_or_default();

        if sql_name == "id" && column_type == ColumnType::Integer {
            column_type = ColumnType::Key;
        }

        if options.reference.as_deref().map_or(true, str::is_empty) {
            options.reference = derive_reference(&sql_name);
        }

        let name = options
            .rename_to
            .clone()
            .filter(|n| !n.is_empty())
            .unwrap_or_else(|| sql_name.clone());

        Self {
            sql_name,
            name,
            column_type,
            options,
        }
    }

    /// Shorthand for a column with a type and no options.
    pub fn typed(sql_name: impl Into<String>, column_type: ColumnType) -> Self {
        Self::new(sql_name, Some(column_type), ColumnOptions::default())
    }

    /// Original field name in the source table.
    pub fn sql_name(&self) -> &str {
        &self.sql_name
    }

    /// Effective output field name.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn column_type(&self) -> ColumnType {
        self.column_type
    }

    pub fn options(&self) -> &ColumnOptions {
        &self.options
    }

    /// Table this column points to, if any.
    pub fn reference(&self) -> Option<&str> {
        self.options.reference.as_deref().filter(|r| !r.is_empty())
    }

    pub fn is_renamed(&self) -> bool {
        self.name != self.sql_name
    }

    pub fn is_referenced(&self) -> bool {
        self.reference().is_some()
    }

    pub fn is_key(&self) -> bool {
        self.column_type == ColumnType::Key
    }

    pub fn is_ignored(&self) -> bool {
        self.options.ignore || self.column_type == ColumnType::Ignore
    }

    /// Field this column writes to, or `None` for ignored columns.
    pub fn output_field(&self) -> Option<&str> {
        if self.is_ignored() {
            None
        } else if self.is_key() {
            Some(ORIGIN_ID_FIELD)
        } else {
            Some(&self.name)
        }
    }

    /// Translate one raw value into its output field(s).
    pub fn translate(&self, raw: Value) -> Result<Document> {
        crate::typecast::translate(self, raw)
    }
}

/// `user_id` references `users`; anything without an `_id` suffix references nothing.
fn derive_reference(sql_name: &str) -> Option<String> {
    let entity = sql_name.strip_suffix("_id")?;
    if entity.is_empty() {
        return None;
    }
    Some(pluralizer::pluralize(entity, 2, false))
}

impl From<ColumnDef> for Column {
    fn from(def: ColumnDef) -> Self {
        let options = ColumnOptions {
            rename_to: def.rename_to,
            reference: def.references,
            ignore: def.ignore,
        };
        Column::new(def.name, def.column_type, options)
    }
}

impl From<Column> for ColumnDef {
    fn from(col: Column) -> Self {
        ColumnDef {
            name: col.sql_name,
            column_type: Some(col.column_type),
            rename_to: col.options.rename_to,
            references: col.options.reference,
            ignore: col.options.ignore,
        }
    }
}

impl fmt::Display for Column {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "column {:?}, {}", self.sql_name, self.column_type)?;
        if let Some(reference) = self.reference() {
            write!(f, ", references: {:?}", reference)?;
        }
        if self.is_renamed() {
            write!(f, ", rename_to: {:?}", self.name)?;
        }
        if self.options.ignore {
            f.write_str(", ignore: true")?;
        }
        Ok(())
    }
}

/// A source table and the collection it is written to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Table {
    source_name: String,
    target_name: String,
    columns: Vec<Column>,
    before: Option<String>,
    after: Option<String>,
}

impl Table {
    /// Build a table, rejecting duplicate column names and output field collisions.
    pub fn new(source_name: impl Into<String>, columns: Vec<Column>) -> Result<Self> {
        let source_name = source_name.into();
        if source_name.is_empty() {
            return Err(MigrateError::Config("table name is required".into()));
        }

        let mut sql_names = HashSet::new();
        let mut fields = HashSet::new();
        for column in &columns {
            if column.sql_name().is_empty() {
                return Err(MigrateError::Config(format!(
                    "table {}: column name is required",
                    source_name
                )));
            }
            if !sql_names.insert(column.sql_name()) {
                return Err(MigrateError::Config(format!(
                    "table {}: column {} is declared twice",
                    source_name,
                    column.sql_name()
                )));
            }
            if let Some(field) = column.output_field() {
                if !fields.insert(field) {
                    return Err(MigrateError::Config(format!(
                        "table {}: column {} writes field {} which is already taken",
                        source_name,
                        column.sql_name(),
                        field
                    )));
                }
            }
        }

        Ok(Self {
            target_name: source_name.clone(),
            source_name,
            columns,
            before: None,
            after: None,
        })
    }

    /// Write this table to a differently named collection.
    pub fn with_target_name(mut self, target_name: impl Into<String>) -> Self {
        self.target_name = target_name.into();
        self
    }

    /// Statement run against the source before the table is read.
    pub fn with_before(mut self, sql: impl Into<String>) -> Self {
        self.before = Some(sql.into());
        self
    }

    /// Statement run against the source after the table is read.
    pub fn with_after(mut self, sql: impl Into<String>) -> Self {
        self.after = Some(sql.into());
        self
    }

    pub fn source_name(&self) -> &str {
        &self.source_name
    }

    pub fn target_name(&self) -> &str {
        &self.target_name
    }

    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    pub fn before(&self) -> Option<&str> {
        self.before.as_deref()
    }

    pub fn after(&self) -> Option<&str> {
        self.after.as_deref()
    }

    /// Find a column by its source name.
    pub fn column(&self, sql_name: &str) -> Option<&Column> {
        self.columns.iter().find(|c| c.sql_name == sql_name)
    }

    pub fn key_column(&self) -> Option<&Column> {
        self.columns.iter().find(|c| c.is_key() && !c.is_ignored())
    }

    /// Columns whose values must be resolved to document references.
    pub fn reference_columns(&self) -> impl Iterator<Item = &Column> {
        self.columns
            .iter()
            .filter(|c| c.is_referenced() && !c.is_ignored() && !c.is_key())
    }

    pub fn has_references(&self) -> bool {
        self.reference_columns().next().is_some()
    }

    /// Translate a full row into one document.
    ///
    /// Declared columns go through their cast rules; undeclared fields are
    /// copied under their own name unless that name is `origin_identifier` or
    /// a declared column's output field, in which case they are dropped.
    pub fn translate(&self, row: Row) -> Result<Document> {
        let mut doc = Document::with_capacity(row.len());
        for (field, value) in row {
            match self.column(&field) {
                Some(column) => doc.extend(column.translate(value)?),
                None if self.is_reserved_field(&field) => {
                    debug!(
                        "{}: dropping undeclared field {} which would shadow a declared field",
                        self.source_name, field
                    );
                }
                None => {
                    doc.insert(field, value);
                }
            }
        }
        Ok(doc)
    }

    /// Output fields owned by declared columns, plus the origin field.
    fn is_reserved_field(&self, field: &str) -> bool {
        field == ORIGIN_ID_FIELD
            || self
                .columns
                .iter()
                .any(|c| c.output_field() == Some(field))
    }
}

impl fmt::Display for Table {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "table {:?}", self.source_name)?;
        if self.target_name != self.source_name {
            write!(f, ", rename_to: {:?}", self.target_name)?;
        }
        writeln!(f, " {{")?;
        for column in &self.columns {
            writeln!(f, "  {}", column)?;
        }
        f.write_str("}")
    }
}
