use live_polls::config::Config;
use live_polls::db::{MemoryStore, PgStore, VoteStore, init_db};
use live_polls::sse::LiveUpdates;
use live_polls::startup::{AppState, build_router};
use std::net::SocketAddr;
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{e}");
            ExitCode::FAILURE
        }
    }
}

async fn run() -> Result<(), Box<dyn std::error::Error>> {
    let config = Config::load()?;

    let store: Arc<dyn VoteStore> = match config.database_url.as_deref() {
        Some(url) => {
            let pool = init_db(url, config.db_max_connections).await?;
            Arc::new(PgStore::new(pool))
        }
        None => Arc::new(MemoryStore::new()),
    };

    let addr = config.bind_addr;
    let app_state = AppState::new(store.clone(), config);
    let health_monitor = app_state.spawn_health_monitor();
    let live = app_state.live.clone();
    let app = build_router(app_state);

    info!("listening on {addr}");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal(live))
    .await?;

    health_monitor.abort();
    store.close().await;
    info!("server stopped");
    Ok(())
}

/// Resolves on Ctrl-C or SIGTERM, then ends every live stream so open SSE
/// connections do not hold up the drain.
async fn shutdown_signal(live: LiveUpdates) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("failed to listen for Ctrl-C: {e}");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!("failed to listen for SIGTERM: {e}");
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
    info!("shutdown signal received");
    live.close_all();
}
