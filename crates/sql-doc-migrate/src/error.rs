//! Error types for the migration library.

use thiserror::Error;

/// Main error type for migration operations.
#[derive(Error, Debug)]
pub enum MigrateError {
    /// Configuration error (invalid YAML, duplicate names, unknown options, etc.)
    #[error("Configuration error: {0}")]
    Config(String),

    /// A value could not be cast to the column's declared type.
    #[error("Cast error on column {column}: cannot read {value:?} as {expected}")]
    Cast {
        column: String,
        value: String,
        expected: String,
    },

    /// Source or sink is unreachable.
    #[error("Connection error: {0}")]
    Connection(String),

    /// Source database query or cursor failure
    #[error("Source error on table {table}: {message}")]
    Source { table: String, message: String },

    /// Sink database write or read failure
    #[error("Sink error on collection {collection}: {message}")]
    Sink { collection: String, message: String },

    /// Reference index misuse (e.g. inserting after phase 1 finished)
    #[error("Reference index error: {0}")]
    Index(String),

    /// IO error (file operations)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// YAML serialization/deserialization error
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// A table worker panicked or was aborted
    #[error("Task failed: {0}")]
    Task(String),

    /// Migration was cancelled
    #[error("Migration cancelled")]
    Cancelled,
}

impl MigrateError {
    /// Create a Cast error for a column and the offending raw value.
    pub fn cast(
        column: impl Into<String>,
        value: impl Into<String>,
        expected: impl Into<String>,
    ) -> Self {
        MigrateError::Cast {
            column: column.into(),
            value: value.into(),
            expected: expected.into(),
        }
    }

    /// Create a Source error
    pub fn source(table: impl Into<String>, message: impl Into<String>) -> Self {
        MigrateError::Source {
            table: table.into(),
            message: message.into(),
        }
    }

    /// Create a Sink error
    pub fn sink(collection: impl Into<String>, message: impl Into<String>) -> Self {
        MigrateError::Sink {
            collection: collection.into(),
            message: message.into(),
        }
    }

    /// Whether this error only invalidates the current row.
    ///
    /// Row-level errors are recorded in the report and the table keeps going;
    /// everything else aborts the run.
    pub fn is_row_level(&self) -> bool {
        matches!(self, MigrateError::Cast { .. })
    }

    /// Format error with full details including error chain
    pub fn format_detailed(&self) -> String {
        let mut output = format!("Error: {}\n", self);

        let mut source = std::error::Error::source(self);
        let mut depth = 1;
        while let Some(err) = source {
            output.push_str(&format!("\nCaused by:\n  {}: {}", depth, err));
            source = err.source();
            depth += 1;
        }

        output
    }
}

/// Result type alias for migration operations.
pub type Result<T> = std::result::Result<T, MigrateError>;
