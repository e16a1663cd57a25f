//! Migration run report.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Overall run status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Running,
    Completed,
    Cancelled,
}

/// A row that was skipped during loading.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RowError {
    /// 1-based position of the row in its cursor.
    pub row: u64,
    pub message: String,
}

/// Counters for one table.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableReport {
    /// Source table name.
    pub table: String,

    /// Target collection name.
    pub collection: String,

    pub rows_read: u64,
    pub documents_written: u64,
    pub references_resolved: u64,
    pub references_unresolved: u64,

    /// Rows skipped because a value could not be cast.
    pub errors: Vec<RowError>,
}

impl TableReport {
    pub fn new(table: impl Into<String>, collection: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            collection: collection.into(),
            ..Default::default()
        }
    }
}

/// Result of a migration run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MigrationReport {
    /// Unique run identifier.
    pub run_id: String,

    pub status: RunStatus,

    pub started_at: DateTime<Utc>,

    pub completed_at: Option<DateTime<Utc>>,

    /// Total duration in seconds.
    pub duration_seconds: f64,

    /// Per-table counters, in definition order.
    pub tables: Vec<TableReport>,
}

impl MigrationReport {
    pub fn new(run_id: impl Into<String>, started_at: DateTime<Utc>) -> Self {
        Self {
            run_id: run_id.into(),
            status: RunStatus::Running,
            started_at,
            completed_at: None,
            duration_seconds: 0.0,
            tables: Vec::new(),
        }
    }

    /// Stamp the completion time and final status.
    pub fn finish(&mut self, status: RunStatus) {
        let completed_at = Utc::now();
        self.duration_seconds =
            (completed_at - self.started_at).num_milliseconds() as f64 / 1000.0;
        self.completed_at = Some(completed_at);
        self.status = status;
    }

    /// Counters for a table, by source or collection name.
    pub fn table(&self, name: &str) -> Option<&TableReport> {
        self.tables
            .iter()
            .find(|t| t.table == name || t.collection == name)
    }

    pub fn rows_read(&self) -> u64 {
        self.tables.iter().map(|t| t.rows_read).sum()
    }

    pub fn documents_written(&self) -> u64 {
        self.tables.iter().map(|t| t.documents_written).sum()
    }

    pub fn references_resolved(&self) -> u64 {
        self.tables.iter().map(|t| t.references_resolved).sum()
    }

    pub fn references_unresolved(&self) -> u64 {
        self.tables.iter().map(|t| t.references_unresolved).sum()
    }

    pub fn error_count(&self) -> usize {
        self.tables.iter().map(|t| t.errors.len()).sum()
    }

    /// Convert to JSON string.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}
