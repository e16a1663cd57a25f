//! In-memory source and sink.
//!
//! [`MemorySource`] serves rows from named tables held in memory and
//! [`MemorySink`] stores documents in memory, assigning random identifiers.
//! They back dry runs and tests; both honor the same cursor contract as a
//! networked driver (bounded channels fed by a background task).

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use indexmap::IndexMap;
use tokio::sync::{mpsc, Mutex};
use tracing::debug;

use crate::core::{Document, DocumentId, Patch, Row, SinkWriter, SourceReader, CURSOR_BUFFER};
use crate::error::{MigrateError, Result};

/// Relational source backed by in-memory tables.
#[derive(Debug, Default)]
pub struct MemorySource {
    tables: HashMap<String, Arc<Vec<Row>>>,
    statements: Mutex<Vec<String>>,
    disconnected: AtomicBool,
}

impl MemorySource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add (or replace) a table.
    pub fn with_table(mut self, name: impl Into<String>, rows: Vec<Row>) -> Self {
        self.tables.insert(name.into(), Arc::new(rows));
        self
    }

    /// Simulate losing the connection.
    pub fn disconnect(&self) {
        self.disconnected.store(true, Ordering::SeqCst);
    }

    /// Statements run so far, in order.
    pub async fn statements(&self) -> Vec<String> {
        self.statements.lock().await.clone()
    }

    fn ensure_connected(&self) -> Result<()> {
        if self.disconnected.load(Ordering::SeqCst) {
            return Err(MigrateError::Connection("memory source is disconnected".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl SourceReader for MemorySource {
    async fn open_cursor(&self, table: &str) -> Result<mpsc::Receiver<Result<Row>>> {
        self.ensure_connected()?;
        let rows = self
            .tables
            .get(table)
            .cloned()
            .ok_or_else(|| MigrateError::source(table, "table does not exist"))?;

        let (tx, rx) = mpsc::channel(CURSOR_BUFFER);
        tokio::spawn(async move {
            for row in rows.iter() {
                if tx.send(Ok(row.clone())).await.is_err() {
                    break;
                }
            }
        });
        Ok(rx)
    }

    async fn run_statement(&self, sql: &str) -> Result<()> {
        self.ensure_connected()?;
        debug!("memory source: {}", sql);
        self.statements.lock().await.push(sql.to_string());
        Ok(())
    }

    async fn is_connected(&self) -> bool {
        !self.disconnected.load(Ordering::SeqCst)
    }

    fn db_type(&self) -> &str {
        "memory"
    }
}

type Collection = IndexMap<DocumentId, Document>;

/// Document sink backed by in-memory collections.
#[derive(Debug, Default)]
pub struct MemorySink {
    collections: Mutex<HashMap<String, Collection>>,
    disconnected: AtomicBool,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulate losing the connection.
    pub fn disconnect(&self) {
        self.disconnected.store(true, Ordering::SeqCst);
    }

    /// Copy of every document in a collection, in insertion order.
    pub async fn documents(&self, collection: &str) -> Vec<(DocumentId, Document)> {
        self.collections
            .lock()
            .await
            .get(collection)
            .map(|c| c.iter().map(|(id, doc)| (id.clone(), doc.clone())).collect())
            .unwrap_or_default()
    }

    /// Fetch one document by identifier.
    pub async fn get(&self, collection: &str, id: &DocumentId) -> Option<Document> {
        self.collections
            .lock()
            .await
            .get(collection)
            .and_then(|c| c.get(id).cloned())
    }

    pub async fn count(&self, collection: &str) -> usize {
        self.collections
            .lock()
            .await
            .get(collection)
            .map_or(0, IndexMap::len)
    }

    fn ensure_connected(&self) -> Result<()> {
        if self.disconnected.load(Ordering::SeqCst) {
            return Err(MigrateError::Connection("memory sink is disconnected".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl SinkWriter for MemorySink {
    async fn insert(&self, collection: &str, document: Document) -> Result<DocumentId> {
        self.ensure_connected()?;
        let id = DocumentId::generate();
        self.collections
            .lock()
            .await
            .entry(collection.to_string())
            .or_default()
            .insert(id.clone(), document);
        Ok(id)
    }

    async fn update(&self, collection: &str, id: &DocumentId, patch: Patch) -> Result<()> {
        self.ensure_connected()?;
        let mut collections = self.collections.lock().await;
        let doc = collections
            .get_mut(collection)
            .and_then(|c| c.get_mut(id))
            .ok_or_else(|| MigrateError::sink(collection, format!("no document {}", id)))?;
        patch.apply(doc);
        Ok(())
    }

    async fn find_one(
        &self,
        collection: &str,
        query: &Document,
    ) -> Result<Option<(DocumentId, Document)>> {
        self.ensure_connected()?;
        let collections = self.collections.lock().await;
        Ok(collections.get(collection).and_then(|c| {
            c.iter()
                .find(|(_, doc)| query.iter().all(|(k, v)| doc.get(k) == Some(v)))
                .map(|(id, doc)| (id.clone(), doc.clone()))
        }))
    }

    async fn scan(
        &self,
        collection: &str,
    ) -> Result<mpsc::Receiver<Result<(DocumentId, Document)>>> {
        self.ensure_connected()?;
        // Snapshot the ids so updates made while scanning cannot reorder the cursor.
        let snapshot: Vec<(DocumentId, Document)> = self.documents(collection).await;

        let (tx, rx) = mpsc::channel(CURSOR_BUFFER);
        tokio::spawn(async move {
            for entry in snapshot {
                if tx.send(Ok(entry)).await.is_err() {
                    break;
                }
            }
        });
        Ok(rx)
    }

    async fn unset_field(&self, collection: &str, field: &str) -> Result<u64> {
        self.ensure_connected()?;
        let mut collections = self.collections.lock().await;
        let mut changed = 0;
        if let Some(c) = collections.get_mut(collection) {
            for doc in c.values_mut() {
                if doc.shift_remove(field).is_some() {
                    changed += 1;
                }
            }
        }
        Ok(changed)
    }

    async fn is_connected(&self) -> bool {
        !self.disconnected.load(Ordering::SeqCst)
    }

    fn db_type(&self) -> &str {
        "memory"
    }
}
