//! # sql-doc-migrate
//!
//! Relational to document-store migration library.
//!
//! Tables are described by a [`Translation`]: which columns to keep, their
//! types, renames, and which columns reference other tables. A migration runs
//! in two phases:
//!
//! - **Load**: every row becomes a document, keyed by an `origin_identifier`
//!   holding its source primary key
//! - **Resolve**: foreign keys are rewritten to the identifiers the document
//!   store assigned, then `origin_identifier` is stripped
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use sql_doc_migrate::{Config, ConfigContext, MemorySink, MemorySource, Orchestrator};
//!
//! #[tokio::main]
//! async fn main() -> sql_doc_migrate::Result<()> {
//!     let ctx = ConfigContext::current_dir()?;
//!     let config = Config::load(&ctx, "config.yaml")?;
//!     let translation = config.load_translation(&ctx)?;
//!
//!     let orchestrator = Orchestrator::new(
//!         translation,
//!         Arc::new(MemorySource::new()),
//!         Arc::new(MemorySink::new()),
//!     )
//!     .with_workers(config.migration.workers());
//!     let report = orchestrator.run().await?;
//!     println!("Wrote {} documents", report.documents_written());
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod core;
pub mod error;
pub mod memory;
pub mod orchestrator;
pub mod reference;
pub mod typecast;

// Re-exports for convenient access
pub use crate::config::{
    Config, ConfigContext, ConnectionConfig, MigrationConfig, NoSqlConnection, SqlConnection,
};
pub use crate::core::{
    Column, ColumnOptions, ColumnType, Document, DocumentId, Patch, Row, SinkWriter, SourceReader,
    Table, Translation, TranslationOptions, UnresolvedPolicy, Value, ORIGIN_ID_FIELD,
};
pub use error::{MigrateError, Result};
pub use memory::{MemorySink, MemorySource};
pub use orchestrator::{MigrationReport, Orchestrator, RowError, RunStatus, TableReport};
pub use reference::{FrozenReferenceIndex, OriginKey, ReferenceIndex};
