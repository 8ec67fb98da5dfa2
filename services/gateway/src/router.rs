use axum::{extract::State, routing::get, Json, Router};
use market_service::{IngestState, SinkStats, SinkStatsSnapshot};
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::watch;
use tower_http::trace::TraceLayer;

/// Read-only view of the running ingestor.
#[derive(Clone)]
pub struct AppState {
    pub symbol: String,
    pub state_rx: watch::Receiver<IngestState>,
    pub stats: Arc<SinkStats>,
}

#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub symbol: String,
    pub state: IngestState,
    pub sink: SinkStatsSnapshot,
}

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/status", get(ingest_status))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}

async fn health_check() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok" }))
}

async fn ingest_status(State(state): State<AppState>) -> Json<StatusResponse> {
    let current = *state.state_rx.borrow();
    Json(StatusResponse {
        symbol: state.symbol.clone(),
        state: current,
        sink: state.stats.snapshot(),
    })
}
