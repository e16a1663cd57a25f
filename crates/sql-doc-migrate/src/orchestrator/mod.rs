//! Migration orchestrator - two-phase workflow coordinator.
//!
//! Phase 1 streams every table out of the source, writes one document per row
//! and records which identifier the sink assigned to each source primary key.
//! Phase 2 starts only once phase 1 is done for every table: it rewrites
//! foreign key fields to the assigned identifiers and strips the
//! `origin_identifier` bookkeeping field.

mod report;

pub use report::{MigrationReport, RowError, RunStatus, TableReport};

use std::sync::Arc;

use chrono::Utc;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::core::{
    Patch, SinkWriter, SourceReader, Table, Translation, UnresolvedPolicy, Value, ORIGIN_ID_FIELD,
};
use crate::error::{MigrateError, Result};
use crate::reference::{FrozenReferenceIndex, OriginKey, ReferenceIndex};

/// Migration orchestrator.
pub struct Orchestrator {
    translation: Arc<Translation>,
    source: Arc<dyn SourceReader>,
    sink: Arc<dyn SinkWriter>,
    workers: usize,
    cancel: CancellationToken,
}

/// Reference counters produced by phase 2 for one table.
#[derive(Debug, Default, Clone, Copy)]
struct ResolveStats {
    resolved: u64,
    unresolved: u64,
}

impl Orchestrator {
    /// Create a new orchestrator running one table at a time.
    pub fn new(
        translation: Translation,
        source: Arc<dyn SourceReader>,
        sink: Arc<dyn SinkWriter>,
    ) -> Self {
        Self {
            translation: Arc::new(translation),
            source,
            sink,
            workers: 1,
            cancel: CancellationToken::new(),
        }
    }

    /// Number of tables processed concurrently in each phase.
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers.max(1);
        self
    }

    /// Token that stops the run at the next table boundary.
    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn translation(&self) -> &Translation {
        &self.translation
    }

    /// Check that both sides are reachable.
    pub async fn health_check(&self) -> Result<()> {
        if !self.source.is_connected().await {
            return Err(MigrateError::Connection(format!(
                "{} source is not reachable",
                self.source.db_type()
            )));
        }
        if !self.sink.is_connected().await {
            return Err(MigrateError::Connection(format!(
                "{} sink is not reachable",
                self.sink.db_type()
            )));
        }
        Ok(())
    }

    /// Run the migration.
    pub async fn run(&self) -> Result<MigrationReport> {
        let run_id = uuid::Uuid::new_v4().to_string();
        let mut report = MigrationReport::new(run_id, Utc::now());

        info!("Starting migration run: {}", report.run_id);
        self.health_check().await?;
        info!(
            "Migrating {} tables from {} to {} with {} workers",
            self.translation.tables().len(),
            self.source.db_type(),
            self.sink.db_type(),
            self.workers
        );
        debug!("Migration plan:\n{}", self.translation);

        info!("Phase 1: Loading documents");
        let index = Arc::new(ReferenceIndex::new());
        let (tables, completed) = self.load_documents(index.clone()).await?;
        report.tables = tables;

        if !completed {
            info!("Migration cancelled, skipping reference resolution");
            report.finish(RunStatus::Cancelled);
            return Ok(report);
        }

        let index = Arc::try_unwrap(index)
            .map_err(|_| MigrateError::Index("reference index still shared after phase 1".into()))?
            .freeze()?;
        info!("Phase 1 complete: {} documents indexed", index.len());

        info!("Phase 2: Resolving references");
        let completed = self
            .resolve_references(Arc::new(index), &mut report.tables)
            .await?;

        let status = if completed {
            RunStatus::Completed
        } else {
            RunStatus::Cancelled
        };
        report.finish(status);

        info!(
            "Migration {:?}: {} rows read, {} documents written, {} references resolved, {} unresolved, {} rows skipped in {:.1}s",
            report.status,
            report.rows_read(),
            report.documents_written(),
            report.references_resolved(),
            report.references_unresolved(),
            report.error_count(),
            report.duration_seconds
        );

        Ok(report)
    }

    /// Phase 1. Returns the per-table reports and whether every table ran.
    async fn load_documents(
        &self,
        index: Arc<ReferenceIndex>,
    ) -> Result<(Vec<TableReport>, bool)> {
        let semaphore = Arc::new(Semaphore::new(self.workers));
        let abort = self.cancel.child_token();
        let mut handles: Vec<(String, JoinHandle<Result<TableReport>>)> = Vec::new();

        for table in self.translation.tables() {
            let permit = semaphore
                .clone()
                .acquire_owned()
                .await
                .map_err(|_| MigrateError::Cancelled)?;

            if abort.is_cancelled() {
                info!("Cancellation requested, stopping new tables");
                break;
            }

            let table = table.clone();
            let source = self.source.clone();
            let sink = self.sink.clone();
            let index = index.clone();
            let abort = abort.clone();
            let name = table.source_name().to_string();

            let handle = tokio::spawn(async move {
                let result = load_table(&table, source.as_ref(), sink.as_ref(), &index).await;
                if result.is_err() {
                    abort.cancel();
                }
                drop(permit);
                result
            });
            handles.push((name, handle));
        }

        let started = handles.len();
        let reports = join_tables("load", handles).await?;
        Ok((
            reports,
            started == self.translation.tables().len() && !self.cancel.is_cancelled(),
        ))
    }

    /// Phase 2. Returns whether every table was resolved.
    async fn resolve_references(
        &self,
        index: Arc<FrozenReferenceIndex>,
        reports: &mut [TableReport],
    ) -> Result<bool> {
        let semaphore = Arc::new(Semaphore::new(self.workers));
        let abort = self.cancel.child_token();
        let mut handles: Vec<(String, JoinHandle<Result<ResolveStats>>)> = Vec::new();

        for table in self.translation.tables() {
            let permit = semaphore
                .clone()
                .acquire_owned()
                .await
                .map_err(|_| MigrateError::Cancelled)?;

            if abort.is_cancelled() {
                info!("Cancellation requested, stopping reference resolution");
                break;
            }

            let table = table.clone();
            let translation = self.translation.clone();
            let sink = self.sink.clone();
            let index = index.clone();
            let abort = abort.clone();
            let name = table.source_name().to_string();

            let handle = tokio::spawn(async move {
                let result = resolve_table(&table, &translation, sink.as_ref(), &index).await;
                if result.is_err() {
                    abort.cancel();
                }
                drop(permit);
                result
            });
            handles.push((name, handle));
        }

        let started = handles.len();
        let stats = join_tables("resolve", handles).await?;
        for (report, stats) in reports.iter_mut().zip(stats) {
            report.references_resolved = stats.resolved;
            report.references_unresolved = stats.unresolved;
        }
        Ok(started == self.translation.tables().len() && !self.cancel.is_cancelled())
    }
}

/// Await every task in order, returning the first failure after all finished.
async fn join_tables<T>(
    phase: &str,
    handles: Vec<(String, JoinHandle<Result<T>>)>,
) -> Result<Vec<T>> {
    let mut results = Vec::with_capacity(handles.len());
    let mut first_error = None;

    for (name, handle) in handles {
        match handle.await {
            Ok(Ok(value)) => results.push(value),
            Ok(Err(e)) => {
                error!("{}: {} failed - {}", name, phase, e);
                first_error.get_or_insert(e);
            }
            Err(e) => {
                error!("{}: {} task panicked - {}", name, phase, e);
                first_error.get_or_insert(MigrateError::Task(format!("{}: {}", name, e)));
            }
        }
    }

    match first_error {
        Some(e) => Err(e),
        None => Ok(results),
    }
}

/// Copy one table into its collection and index the assigned identifiers.
async fn load_table(
    table: &Table,
    source: &dyn SourceReader,
    sink: &dyn SinkWriter,
    index: &ReferenceIndex,
) -> Result<TableReport> {
    let collection = table.target_name();
    let mut report = TableReport::new(table.source_name(), collection);

    if let Some(sql) = table.before() {
        debug!("{}: running before statement", table.source_name());
        source.run_statement(sql).await?;
    }

    let keyed = table.key_column().is_some();
    let mut cursor = source.open_cursor(table.source_name()).await?;
    while let Some(row) = cursor.recv().await {
        let row = row?;
        report.rows_read += 1;

        let document = match table.translate(row) {
            Ok(document) => document,
            Err(e) if e.is_row_level() => {
                warn!("{}: skipping row {}: {}", table.source_name(), report.rows_read, e);
                report.errors.push(RowError {
                    row: report.rows_read,
                    message: e.to_string(),
                });
                continue;
            }
            Err(e) => return Err(e),
        };

        // Only a declared key makes a row reachable as a reference target.
        let origin = keyed
            .then(|| document.get(ORIGIN_ID_FIELD).and_then(OriginKey::from_value));
        let id = sink.insert(collection, document).await?;
        report.documents_written += 1;

        match origin {
            Some(Some(key)) => {
                index.insert(collection, key, id)?;
            }
            Some(None) => warn!(
                "{}: row {} has no usable {}, references to it cannot be resolved",
                table.source_name(),
                report.rows_read,
                ORIGIN_ID_FIELD
            ),
            None => {}
        }
    }

    if let Some(sql) = table.after() {
        debug!("{}: running after statement", table.source_name());
        source.run_statement(sql).await?;
    }

    info!(
        "{}: {} rows read, {} documents written to {}",
        table.source_name(),
        report.rows_read,
        report.documents_written,
        collection
    );
    Ok(report)
}

/// Rewrite one collection's foreign keys and strip its origin identifiers.
async fn resolve_table(
    table: &Table,
    translation: &Translation,
    sink: &dyn SinkWriter,
    index: &FrozenReferenceIndex,
) -> Result<ResolveStats> {
    let options = *translation.options();
    let collection = table.target_name();
    let mut stats = ResolveStats::default();

    if !table.has_references() {
        if options.strip_origin_ids {
            let stripped = sink.unset_field(collection, ORIGIN_ID_FIELD).await?;
            debug!("{}: stripped {} from {} documents", collection, ORIGIN_ID_FIELD, stripped);
        }
        return Ok(stats);
    }

    // (document field, collection it points into)
    let references: Vec<(String, String)> = table
        .reference_columns()
        .filter_map(|c| {
            translation
                .referenced_collection(c)
                .map(|target| (c.name().to_string(), target.to_string()))
        })
        .collect();
    for (field, target) in &references {
        if index.collection_len(target) == 0 {
            warn!(
                "{}.{} points at {}, which has no indexed documents",
                collection, field, target
            );
        }
    }

    let mut cursor = sink.scan(collection).await?;
    while let Some(entry) = cursor.recv().await {
        let (id, document) = entry?;
        let mut patch = Patch::new();

        for (field, target) in &references {
            let value = match document.get(field) {
                Some(value) if !value.is_null() => value,
                _ => continue,
            };
            match index.resolve(target, value) {
                Some(assigned) => {
                    patch = patch.set(field.as_str(), Value::Id(assigned.clone()));
                    stats.resolved += 1;
                }
                None => {
                    stats.unresolved += 1;
                    warn!(
                        "{}: {} = {} has no matching document in {}",
                        collection, field, value, target
                    );
                    if options.on_unresolved == UnresolvedPolicy::Clear {
                        patch = patch.set(field.as_str(), Value::Null);
                    }
                }
            }
        }

        if options.strip_origin_ids && document.contains_key(ORIGIN_ID_FIELD) {
            patch = patch.unset(ORIGIN_ID_FIELD);
        }
        if !patch.is_empty() {
            sink.update(collection, &id, patch).await?;
        }
    }

    info!(
        "{}: {} references resolved, {} unresolved",
        collection, stats.resolved, stats.unresolved
    );
    Ok(stats)
}
