use crate::app::{build_backend, build_supervisor};
use crate::router::{create_router, AppState};

use axum::body::Body;
use axum::http::{Request, StatusCode};
use market_service::{BarRow, IngestState, SinkStats, TableRef};
use shared::{IngestConfig, SinkConfig, SinkKind};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tower::ServiceExt;

fn test_state(state: IngestState) -> (AppState, watch::Sender<IngestState>) {
    let (tx, rx) = watch::channel(state);
    let app_state = AppState {
        symbol: "BTC-USD".to_string(),
        state_rx: rx,
        stats: Arc::new(SinkStats::default()),
    };
    (app_state, tx)
}

async fn get_json(app: axum::Router, uri: &str) -> (StatusCode, serde_json::Value) {
    let response = app
        .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
        .await
        .unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    (status, serde_json::from_slice(&bytes).unwrap())
}

// =============================================================================
// Router
// =============================================================================

#[tokio::test]
async fn test_health_reports_ok() {
    let (state, _tx) = test_state(IngestState::ConnectingFeed);
    let (status, body) = get_json(create_router(state), "/health").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, serde_json::json!({"status": "ok"}));
}

#[tokio::test]
async fn test_status_tracks_supervisor_state() {
    let (state, tx) = test_state(IngestState::ConnectingFeed);
    let app = create_router(state);

    let (_, body) = get_json(app.clone(), "/status").await;
    assert_eq!(body["state"], "CONNECTING_FEED");
    assert_eq!(body["symbol"], "BTC-USD");

    tx.send_replace(IngestState::Polling);
    let (_, body) = get_json(app, "/status").await;
    assert_eq!(body["state"], "POLLING");
    assert_eq!(body["sink"]["rows_written"], 0);
    assert_eq!(body["sink"]["rows_lost"], 0);
}

#[tokio::test]
async fn test_unknown_route_is_404() {
    let (state, _tx) = test_state(IngestState::Streaming);
    let response = create_router(state)
        .oneshot(Request::builder().uri("/orders").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

// =============================================================================
// Bootstrap
// =============================================================================

#[test]
fn test_jsonl_backend_from_config() {
    let dir = tempfile::tempdir().unwrap();
    let sink = SinkConfig {
        kind: SinkKind::Jsonl,
        jsonl_dir: dir.path().to_string_lossy().into_owned(),
        ..IngestConfig::default().sink
    };
    let backend = build_backend(&sink, Duration::from_secs(1)).unwrap();
    assert_eq!(backend.name(), "jsonl");

    let row = BarRow {
        timestamp: "2024-06-01T10:00:00+00:00".to_string(),
        symbol: "BTC-USD".to_string(),
        open: Some(1.0),
        high: Some(1.0),
        low: Some(1.0),
        close: Some(1.0),
        volume: 1.0,
    };
    let table = TableRef::new("local", "moda_mcp", "raw_ohlcv");
    assert!(backend.insert_rows(&table, &[row]).unwrap().is_empty());
    assert!(dir.path().join("local.moda_mcp.raw_ohlcv.jsonl").exists());
}

#[test]
fn test_bigquery_backend_requires_token() {
    let sink = SinkConfig {
        kind: SinkKind::Bigquery,
        bigquery_token: None,
        ..IngestConfig::default().sink
    };
    assert!(build_backend(&sink, Duration::from_secs(1)).is_err());
}

#[tokio::test]
async fn test_build_supervisor_from_defaults() {
    let config = IngestConfig::from_vars(&HashMap::new()).unwrap();
    let supervisor = build_supervisor(&config).unwrap();
    assert_eq!(supervisor.state(), IngestState::ConnectingFeed);
    assert_eq!(supervisor.pipeline().symbol(), "BTC-USD");
    assert_eq!(supervisor.pipeline().interval().as_duration(), Duration::from_secs(3600));
}

#[test]
fn test_build_supervisor_rejects_fractional_interval() {
    let config = IngestConfig {
        bucket_interval: Duration::from_millis(1500),
        ..IngestConfig::default()
    };
    assert!(build_supervisor(&config).is_err());
}
