//! Row sink: hands completed bars to the storage backend off the ingestion path.

use serde::Serialize;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::bar::BarRow;

#[derive(Error, Debug)]
pub enum SinkError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("encode error: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("transport error: {0}")]
    Transport(String),
    #[error("backend rejected insert with status {status}: {body}")]
    Rejected { status: u16, body: String },
    #[error("backend unavailable: {0}")]
    Unavailable(String),
}

/// Fully qualified destination table, `{project}.{dataset}.{table}`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TableRef {
    pub project: String,
    pub dataset: String,
    pub table: String,
}

impl TableRef {
    pub fn new(project: impl Into<String>, dataset: impl Into<String>, table: impl Into<String>) -> Self {
        Self {
            project: project.into(),
            dataset: dataset.into(),
            table: table.into(),
        }
    }
}

impl fmt::Display for TableRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.project, self.dataset, self.table)
    }
}

/// Backend rejection of a single row within an otherwise accepted batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RowError {
    pub index: usize,
    pub message: String,
}

/// Append-only storage for bar rows. Calls may block.
pub trait StorageBackend: Send + Sync + 'static {
    fn name(&self) -> &'static str;

    /// Insert `rows` as one batch. `Ok` carries per-row errors, possibly empty.
    fn insert_rows(&self, table: &TableRef, rows: &[BarRow]) -> Result<Vec<RowError>, SinkError>;
}

#[derive(Debug, Default)]
pub struct SinkStats {
    batches_written: AtomicU64,
    batches_failed: AtomicU64,
    rows_written: AtomicU64,
    rows_lost: AtomicU64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SinkStatsSnapshot {
    pub batches_written: u64,
    pub batches_failed: u64,
    pub rows_written: u64,
    pub rows_lost: u64,
}

impl SinkStats {
    pub fn snapshot(&self) -> SinkStatsSnapshot {
        SinkStatsSnapshot {
            batches_written: self.batches_written.load(Ordering::Relaxed),
            batches_failed: self.batches_failed.load(Ordering::Relaxed),
            rows_written: self.rows_written.load(Ordering::Relaxed),
            rows_lost: self.rows_lost.load(Ordering::Relaxed),
        }
    }
}

/// Writes one batch and records the outcome. Never returns an error: failed
/// rows are logged and counted as lost.
pub fn write_batch(backend: &dyn StorageBackend, table: &TableRef, stats: &SinkStats, rows: &[BarRow]) {
    let batch = rows.len() as u64;
    match backend.insert_rows(table, rows) {
        Ok(row_errors) if row_errors.is_empty() => {
            stats.batches_written.fetch_add(1, Ordering::Relaxed);
            stats.rows_written.fetch_add(batch, Ordering::Relaxed);
            info!(rows = batch, table = %table, backend = backend.name(), "inserted bar rows");
        }
        Ok(row_errors) => {
            let lost = (row_errors.len() as u64).min(batch);
            stats.batches_written.fetch_add(1, Ordering::Relaxed);
            stats.rows_written.fetch_add(batch - lost, Ordering::Relaxed);
            stats.rows_lost.fetch_add(lost, Ordering::Relaxed);
            error!(
                rows = batch,
                rejected = lost,
                table = %table,
                errors = ?row_errors,
                "storage backend rejected rows"
            );
        }
        Err(err) => {
            stats.batches_failed.fetch_add(1, Ordering::Relaxed);
            stats.rows_lost.fetch_add(batch, Ordering::Relaxed);
            error!(rows = batch, table = %table, backend = backend.name(), %err, "bar insert failed, rows dropped");
        }
    }
}

/// Dispatches batches to the blocking pool so a slow backend never stalls ticks.
pub struct RowSink {
    backend: Arc<dyn StorageBackend>,
    table: TableRef,
    stats: Arc<SinkStats>,
    pending: Vec<JoinHandle<()>>,
}

impl RowSink {
    pub fn new(backend: Arc<dyn StorageBackend>, table: TableRef) -> Self {
        Self {
            backend,
            table,
            stats: Arc::new(SinkStats::default()),
            pending: Vec::new(),
        }
    }

    pub fn table(&self) -> &TableRef {
        &self.table
    }

    pub fn stats(&self) -> Arc<SinkStats> {
        Arc::clone(&self.stats)
    }

    /// Schedules a write without waiting for it. Empty batches are ignored.
    /// Returns whether a write was scheduled.
    pub fn submit(&mut self, rows: Vec<BarRow>) -> bool {
        if rows.is_empty() {
            return false;
        }
        self.pending.retain(|h| !h.is_finished());

        let backend = Arc::clone(&self.backend);
        let table = self.table.clone();
        let stats = Arc::clone(&self.stats);
        let handle = tokio::task::spawn_blocking(move || {
            write_batch(backend.as_ref(), &table, &stats, &rows);
        });
        self.pending.push(handle);
        true
    }

    /// Number of writes that have not finished yet.
    pub fn in_flight(&self) -> usize {
        self.pending.iter().filter(|h| !h.is_finished()).count()
    }

    /// Awaits every scheduled write.
    pub async fn wait_idle(&mut self) {
        for handle in self.pending.drain(..) {
            if let Err(err) = handle.await {
                warn!(%err, "sink write task did not complete");
            }
        }
    }
}

impl fmt::Debug for RowSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RowSink")
            .field("backend", &self.backend.name())
            .field("table", &self.table)
            .field("pending", &self.pending.len())
            .finish()
    }
}
