//! Core abstractions for relational to document migration.
//!
//! - [`schema`]: column and table declarations
//! - [`translation`]: the full set of tables to migrate plus global options
//! - [`value`]: raw and typed field values, rows and documents
//! - [`traits`]: the source reader and sink writer the orchestrator drives

pub mod schema;
pub mod traits;
pub mod translation;
pub mod value;

pub use schema::{Column, ColumnDef, ColumnOptions, ColumnType, Table, ORIGIN_ID_FIELD};
pub use traits::{SinkWriter, SourceReader, CURSOR_BUFFER};
pub use translation::{Translation, TranslationOptions, UnresolvedPolicy};
pub use value::{Document, DocumentId, Patch, Row, Value};
