//! The complete migration definition: every table to move plus global options.

use std::collections::HashSet;
use std::fmt;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{MigrateError, Result};

use super::schema::{Column, Table};

/// What phase 2 does with a reference that has no matching document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnresolvedPolicy {
    /// Leave the original foreign key value in place.
    #[default]
    Keep,
    /// Replace the field with null.
    Clear,
}

/// Options that apply to the whole migration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TranslationOptions {
    /// Remove `origin_identifier` from documents once references are resolved (default: true).
    #[serde(default = "default_true")]
    pub strip_origin_ids: bool,

    /// Handling of references that cannot be resolved (default: keep).
    #[serde(default)]
    pub on_unresolved: UnresolvedPolicy,
}

impl Default for TranslationOptions {
    fn default() -> Self {
        Self {
            strip_origin_ids: true,
            on_unresolved: UnresolvedPolicy::Keep,
        }
    }
}

/// Table declaration as written in a translation file.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
struct TableDef {
    name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    rename_to: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    before: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    after: Option<String>,

    #[serde(default)]
    columns: Vec<Column>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
struct TranslationDef {
    #[serde(default)]
    options: TranslationOptions,

    #[serde(default)]
    tables: Vec<TableDef>,
}

/// Every table to migrate, in processing order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Translation {
    tables: Vec<Table>,
    options: TranslationOptions,
}

impl Translation {
    /// Build a translation, rejecting duplicate table or collection names.
    pub fn new(tables: Vec<Table>, options: TranslationOptions) -> Result<Self> {
        let mut sources = HashSet::new();
        let mut targets = HashSet::new();
        for table in &tables {
            if !sources.insert(table.source_name()) {
                return Err(MigrateError::Config(format!(
                    "table {} is declared twice",
                    table.source_name()
                )));
            }
            if !targets.insert(table.target_name()) {
                return Err(MigrateError::Config(format!(
                    "collection {} is written by more than one table",
                    table.target_name()
                )));
            }
        }

        let translation = Self { tables, options };
        for table in &translation.tables {
            for column in table.reference_columns() {
                let reference = column.reference().unwrap_or_default();
                if translation.table(reference).is_none() {
                    warn!(
                        "{}.{} references unknown table {}; its values will stay unresolved",
                        table.source_name(),
                        column.sql_name(),
                        reference
                    );
                }
            }
        }
        Ok(translation)
    }

    /// Load a translation from a YAML file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    /// Parse a translation from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let def: TranslationDef = serde_yaml::from_str(yaml)?;
        let mut tables = Vec::with_capacity(def.tables.len());
        for t in def.tables {
            let mut table = Table::new(t.name, t.columns)?;
            if let Some(target) = t.rename_to.filter(|n| !n.is_empty()) {
                table = table.with_target_name(target);
            }
            if let Some(sql) = t.before {
                table = table.with_before(sql);
            }
            if let Some(sql) = t.after {
                table = table.with_after(sql);
            }
            tables.push(table);
        }
        Self::new(tables, def.options)
    }

    /// Serialize back to the YAML translation format.
    pub fn to_yaml(&self) -> Result<String> {
        let def = TranslationDef {
            options: self.options,
            tables: self
                .tables
                .iter()
                .map(|t| TableDef {
                    name: t.source_name().to_string(),
                    rename_to: (t.target_name() != t.source_name())
                        .then(|| t.target_name().to_string()),
                    before: t.before().map(str::to_string),
                    after: t.after().map(str::to_string),
                    columns: t.columns().to_vec(),
                })
                .collect(),
        };
        Ok(serde_yaml::to_string(&def)?)
    }

    pub fn tables(&self) -> &[Table] {
        &self.tables
    }

    pub fn options(&self) -> &TranslationOptions {
        &self.options
    }

    /// Find a table by source name, falling back to collection name.
    pub fn table(&self, name: &str) -> Option<&Table> {
        self.tables
            .iter()
            .find(|t| t.source_name() == name)
            .or_else(|| self.tables.iter().find(|t| t.target_name() == name))
    }

    /// Collection holding the documents a reference column points to.
    ///
    /// Unknown tables map to the reference name itself, which will never be in
    /// the reference index.
    pub fn referenced_collection<'a>(&'a self, column: &'a Column) -> Option<&'a str> {
        let reference = column.reference()?;
        Some(
            self.table(reference)
                .map(Table::target_name)
                .unwrap_or(reference),
        )
    }
}

impl fmt::Display for Translation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, table) in self.tables.iter().enumerate() {
            if i > 0 {
                f.write_str("\n\n")?;
            }
            write!(f, "{}", table)?;
        }
        Ok(())
    }
}

fn default_true() -> bool {
    true
}
