use gateway_service::{build_supervisor, create_router, AppState};
use shared::logger::init_logger;
use shared::IngestConfig;
use std::net::SocketAddr;
use tokio_util::sync::CancellationToken;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_logger();

    let config = IngestConfig::from_env()?;
    tracing::info!(
        symbol = %config.symbol,
        bucket_secs = config.bucket_interval.as_secs(),
        sink = ?config.sink.kind,
        late_trades = ?config.late_trades,
        "starting tickbar"
    );

    let supervisor = build_supervisor(&config)?;
    let state = AppState {
        symbol: config.symbol.clone(),
        state_rx: supervisor.subscribe_state(),
        stats: supervisor.pipeline().sink().stats(),
    };

    let cancel = CancellationToken::new();
    let ingestor = tokio::spawn(supervisor.run(cancel.clone()));

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    tracing::info!("Starting server on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, create_router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    cancel.cancel();
    let pipeline = ingestor.await?;
    let counters = pipeline.counters();
    tracing::info!(
        trades = counters.trades_applied,
        rows = counters.rows_flushed,
        late_reopened = counters.late_reopened,
        late_dropped = counters.late_dropped,
        "tickbar stopped"
    );
    Ok(())
}

async fn shutdown_signal() {
    use tokio::signal;

    let ctrl_c = async {
        if let Err(err) = signal::ctrl_c().await {
            tracing::error!(%err, "failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(err) => {
                tracing::error!(%err, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("Shutdown signal received, starting graceful shutdown");
}
