//! Traits for the relational source and the document sink.
//!
//! - [`SourceReader`]: streams rows out of named tables
//! - [`SinkWriter`]: stores documents in named collections and hands back the
//!   identifier it assigned
//!
//! Both cursors are bounded channels fed by a background task, so only a
//! handful of rows or documents are ever held in memory at once.

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::error::Result;

use super::value::{Document, DocumentId, Patch, Row};

/// Default capacity of cursor channels.
pub const CURSOR_BUFFER: usize = 64;

/// Read rows from a relational source.
///
/// Cursors are single-pass: reading a table again means opening a new cursor.
#[async_trait]
pub trait SourceReader: Send + Sync {
    /// Start streaming rows from a table, in the source's natural order.
    ///
    /// The receiver yields `Result<Row>` until the table is exhausted. An
    /// `Err` item ends the cursor.
    async fn open_cursor(&self, table: &str) -> Result<mpsc::Receiver<Result<Row>>>;

    /// Run a raw statement against the source (before/after hooks).
    async fn run_statement(&self, sql: &str) -> Result<()>;

    /// Whether the source can currently be reached.
    async fn is_connected(&self) -> bool;

    /// Database type identifier for logs (e.g. "mysql", "memory").
    fn db_type(&self) -> &str;
}

/// Write documents to a document store.
#[async_trait]
pub trait SinkWriter: Send + Sync {
    /// Insert a document and return the identifier the sink assigned to it.
    async fn insert(&self, collection: &str, document: Document) -> Result<DocumentId>;

    /// Apply a partial update to one stored document.
    async fn update(&self, collection: &str, id: &DocumentId, patch: Patch) -> Result<()>;

    /// Find the first document whose fields equal every field of `query`.
    async fn find_one(
        &self,
        collection: &str,
        query: &Document,
    ) -> Result<Option<(DocumentId, Document)>>;

    /// Stream every document in a collection.
    async fn scan(
        &self,
        collection: &str,
    ) -> Result<mpsc::Receiver<Result<(DocumentId, Document)>>>;

    /// Remove a field from every document in a collection, returning how many
    /// documents changed.
    async fn unset_field(&self, collection: &str, field: &str) -> Result<u64>;

    /// Whether the sink can currently be reached.
    async fn is_connected(&self) -> bool;

    /// Database type identifier for logs (e.g. "mongodb", "memory").
    fn db_type(&self) -> &str;
}
