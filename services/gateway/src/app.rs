//! Wiring from configuration to a ready-to-run supervisor.

use anyhow::Context;
use market_service::{
    BucketInterval, FallbackPoller, FeedClient, IngestPipeline, IngestorSupervisor, InsertAllBackend,
    JsonLinesBackend, MemoryBackend, RowSink, StorageBackend, SystemClock, TableRef,
};
use shared::logger::sanitize_for_log;
use shared::{HttpClient, IngestConfig, SinkConfig, SinkKind};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

pub fn build_backend(sink: &SinkConfig, http_timeout: Duration) -> anyhow::Result<Arc<dyn StorageBackend>> {
    let backend: Arc<dyn StorageBackend> = match sink.kind {
        SinkKind::Memory => Arc::new(MemoryBackend::new()),
        SinkKind::Jsonl => {
            info!(dir = %sink.jsonl_dir, "writing bars as JSON lines");
            Arc::new(JsonLinesBackend::new(&sink.jsonl_dir))
        }
        SinkKind::Bigquery => {
            let token = sink
                .bigquery_token
                .as_deref()
                .context("bigquery sink selected without a token")?;
            info!(url = %sink.bigquery_url, token = %sanitize_for_log(token), "writing bars via insertAll");
            Arc::new(InsertAllBackend::new(&sink.bigquery_url, token, http_timeout)?)
        }
    };
    Ok(backend)
}

/// Builds the full ingest stack for `config.symbol`.
pub fn build_supervisor(config: &IngestConfig) -> anyhow::Result<IngestorSupervisor> {
    let interval = BucketInterval::new(config.bucket_interval).context("invalid bucket interval")?;
    let backend = build_backend(&config.sink, config.http_timeout)?;
    let table = TableRef::new(&config.sink.project, &config.sink.dataset, &config.sink.table);
    info!(backend = backend.name(), table = %table, "row sink ready");

    let sink = RowSink::new(backend, table);
    let pipeline = IngestPipeline::new(
        config.symbol.as_str(),
        interval,
        sink,
        Arc::new(SystemClock),
        config.late_trades,
    );

    let feed = FeedClient::new(&config.ws_url, &config.symbol, config.http_timeout);
    let http = HttpClient::new(&config.rest_url, config.http_timeout).context("building REST client")?;
    let poller = FallbackPoller::new(http, &config.symbol);

    Ok(IngestorSupervisor::new(feed, poller, pipeline, config.poll_interval))
}
