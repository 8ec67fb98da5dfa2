//! Storage backend implementations.

use parking_lot::Mutex;
use serde::Deserialize;
use std::collections::HashMap;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use crate::bar::BarRow;
use crate::sink::{RowError, SinkError, StorageBackend, TableRef};

/// Keeps rows in memory, keyed by table. Can be told to fail or stall.
#[derive(Debug, Default)]
pub struct MemoryBackend {
    tables: Mutex<HashMap<String, Vec<BarRow>>>,
    failing: AtomicBool,
    delay: Mutex<Option<Duration>>,
    calls: AtomicU64,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// While set, every insert fails with `SinkError::Unavailable`.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Makes each insert sleep before completing.
    pub fn set_delay(&self, delay: Option<Duration>) {
        *self.delay.lock() = delay;
    }

    pub fn rows(&self, table: &TableRef) -> Vec<BarRow> {
        self.tables
            .lock()
            .get(&table.to_string())
            .cloned()
            .unwrap_or_default()
    }

    pub fn insert_calls(&self) -> u64 {
        self.calls.load(Ordering::SeqCst)
    }
}

impl StorageBackend for MemoryBackend {
    fn name(&self) -> &'static str {
        "memory"
    }

    fn insert_rows(&self, table: &TableRef, rows: &[BarRow]) -> Result<Vec<RowError>, SinkError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let delay = *self.delay.lock();
        if let Some(delay) = delay {
            std::thread::sleep(delay);
        }
        if self.failing.load(Ordering::SeqCst) {
            return Err(SinkError::Unavailable("memory backend set to fail".to_string()));
        }
        self.tables
            .lock()
            .entry(table.to_string())
            .or_default()
            .extend_from_slice(rows);
        Ok(Vec::new())
    }
}

/// Appends rows as JSON lines to `{dir}/{project}.{dataset}.{table}.jsonl`.
#[derive(Debug)]
pub struct JsonLinesBackend {
    dir: PathBuf,
}

impl JsonLinesBackend {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn path_for(&self, table: &TableRef) -> PathBuf {
        self.dir.join(format!("{}.jsonl", table))
    }
}

impl StorageBackend for JsonLinesBackend {
    fn name(&self) -> &'static str {
        "jsonl"
    }

    fn insert_rows(&self, table: &TableRef, rows: &[BarRow]) -> Result<Vec<RowError>, SinkError> {
        let mut buf = Vec::with_capacity(rows.len() * 128);
        for row in rows {
            serde_json::to_writer(&mut buf, row)?;
            buf.push(b'\n');
        }

        fs::create_dir_all(&self.dir)?;
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.path_for(table))?;
        // One write per batch keeps a batch contiguous in the file.
        file.write_all(&buf)?;
        file.flush()?;
        Ok(Vec::new())
    }
}

/// BigQuery-style streaming insert over REST (`tabledata.insertAll`).
///
/// Runs the async client on the ambient tokio runtime; must be called from a
/// blocking-pool thread.
#[derive(Debug)]
pub struct InsertAllBackend {
    base_url: String,
    token: String,
    client: reqwest::Client,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct InsertAllResponse {
    #[serde(default)]
    insert_errors: Vec<InsertErrorEntry>,
}

#[derive(Debug, Deserialize)]
struct InsertErrorEntry {
    index: usize,
    #[serde(default)]
    errors: Vec<InsertErrorDetail>,
}

#[derive(Debug, Deserialize)]
struct InsertErrorDetail {
    #[serde(default)]
    reason: String,
    #[serde(default)]
    message: String,
}

impl InsertAllBackend {
    pub fn new(base_url: impl Into<String>, token: impl Into<String>, timeout: Duration) -> Result<Self, SinkError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| SinkError::Transport(e.to_string()))?;
        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token: token.into(),
            client,
        })
    }

    pub fn endpoint(&self, table: &TableRef) -> String {
        format!(
            "{}/projects/{}/datasets/{}/tables/{}/insertAll",
            self.base_url, table.project, table.dataset, table.table
        )
    }

    async fn insert(&self, table: &TableRef, rows: &[BarRow]) -> Result<Vec<RowError>, SinkError> {
        let body = serde_json::json!({
            "kind": "bigquery#tableDataInsertAllRequest",
            "rows": rows.iter().map(|r| serde_json::json!({ "json": r })).collect::<Vec<_>>(),
        });

        let response = self
            .client
            .post(self.endpoint(table))
            .bearer_auth(&self.token)
            .json(&body)
            .send()
            .await
            .map_err(|e| SinkError::Transport(e.to_string()))?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| SinkError::Transport(e.to_string()))?;
        if !status.is_success() {
            return Err(SinkError::Rejected {
                status: status.as_u16(),
                body: text,
            });
        }

        let parsed: InsertAllResponse = if text.trim().is_empty() {
            InsertAllResponse { insert_errors: Vec::new() }
        } else {
            serde_json::from_str(&text)?
        };
        Ok(parsed
            .insert_errors
            .into_iter()
            .map(|entry| RowError {
                index: entry.index,
                message: entry
                    .errors
                    .iter()
                    .map(|d| format!("{}: {}", d.reason, d.message))
                    .collect::<Vec<_>>()
                    .join("; "),
            })
            .collect())
    }
}

impl StorageBackend for InsertAllBackend {
    fn name(&self) -> &'static str {
        "bigquery"
    }

    fn insert_rows(&self, table: &TableRef, rows: &[BarRow]) -> Result<Vec<RowError>, SinkError> {
        let handle = tokio::runtime::Handle::try_current()
            .map_err(|e| SinkError::Unavailable(e.to_string()))?;
        handle.block_on(self.insert(table, rows))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(ts: &str, close: f64) -> BarRow {
        BarRow {
            timestamp: ts.to_string(),
            symbol: "BTC-USD".to_string(),
            open: Some(close),
            high: Some(close),
            low: Some(close),
            close: Some(close),
            volume: 1.0,
        }
    }

    #[test]
    fn test_memory_backend_appends_per_table() {
        let backend = MemoryBackend::new();
        let a = TableRef::new("p", "d", "a");
        let b = TableRef::new("p", "d", "b");
        backend.insert_rows(&a, &[row("t0", 1.0)]).unwrap();
        backend.insert_rows(&a, &[row("t1", 2.0)]).unwrap();
        backend.insert_rows(&b, &[row("t0", 3.0)]).unwrap();

        assert_eq!(backend.rows(&a).len(), 2);
        assert_eq!(backend.rows(&b).len(), 1);
        assert_eq!(backend.insert_calls(), 3);
    }

    #[test]
    fn test_memory_backend_failing() {
        let backend = MemoryBackend::new();
        let t = TableRef::new("p", "d", "t");
        backend.set_failing(true);
        assert!(matches!(
            backend.insert_rows(&t, &[row("t0", 1.0)]),
            Err(SinkError::Unavailable(_))
        ));
        assert!(backend.rows(&t).is_empty());
    }

    #[test]
    fn test_jsonl_backend_appends_lines() {
        let dir = tempfile::tempdir().unwrap();
        let backend = JsonLinesBackend::new(dir.path().join("nested"));
        let t = TableRef::new("local", "moda_mcp", "raw_ohlcv");

        backend.insert_rows(&t, &[row("t0", 1.0), row("t1", 2.0)]).unwrap();
        backend.insert_rows(&t, &[row("t2", 3.0)]).unwrap();

        let path = backend.path_for(&t);
        assert!(path.ends_with("local.moda_mcp.raw_ohlcv.jsonl"));
        let content = std::fs::read_to_string(path).unwrap();
        let rows: Vec<BarRow> = content
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();
        assert_eq!(rows, vec![row("t0", 1.0), row("t1", 2.0), row("t2", 3.0)]);
    }

    #[test]
    fn test_insert_all_endpoint() {
        let backend = InsertAllBackend::new("http://bq.local/v2/", "tok", Duration::from_secs(1)).unwrap();
        let t = TableRef::new("proj", "moda_mcp", "raw_ohlcv");
        assert_eq!(
            backend.endpoint(&t),
            "http://bq.local/v2/projects/proj/datasets/moda_mcp/tables/raw_ohlcv/insertAll"
        );
    }

    #[test]
    fn test_insert_all_outside_runtime_is_unavailable() {
        let backend = InsertAllBackend::new("http://bq.local", "tok", Duration::from_secs(1)).unwrap();
        let t = TableRef::new("p", "d", "t");
        assert!(matches!(
            backend.insert_rows(&t, &[row("t0", 1.0)]),
            Err(SinkError::Unavailable(_))
        ));
    }
}
