//! People Monitor - occupancy monitor for edge vision devices
//!
//! Main entry point.

use people_monitor::{
    broadcast_scheduler::BroadcastScheduler,
    state::{AppConfig, AppState},
    web_api,
};
use std::sync::Arc;
use tokio::signal;
use tokio::sync::broadcast;
use tower_http::cors::{Any, CorsLayer};
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "people_monitor=debug,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting People Monitor v{}", env!("CARGO_PKG_VERSION"));

    // Load configuration
    let config = AppConfig::default();
    tracing::info!(
        settings_file = %config.settings_file.display(),
        static_dir = %config.static_dir.display(),
        slot_count = config.slot_count,
        broadcast_interval_ms = config.broadcast_interval_ms,
        max_viewers = ?config.max_viewers,
        "Configuration loaded"
    );

    tokio::fs::create_dir_all(config.static_dir.join("images")).await?;

    let state = AppState::build(config).await?;
    tracing::info!("Components initialized");

    // Shutdown channel for background tasks
    let (shutdown_tx, _) = broadcast::channel::<()>(1);

    let scheduler = Arc::new(BroadcastScheduler::new(
        state.engine.clone(),
        state.realtime.clone(),
        state.config_store.clone(),
        state.aitrios.clone(),
        state.config.schedule(),
    ));
    let scheduler_handle = scheduler.start(shutdown_tx.subscribe());

    // Router with static file serving (viewer assets, background images)
    let serve_dir = ServeDir::new(&state.config.static_dir);
    let app = web_api::create_router(state.clone())
        .nest_service("/static", serve_dir)
        .layer(CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any))
        .layer(TraceLayer::new_for_http());

    // Start server
    let addr = format!("{}:{}", state.config.host, state.config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Listening on {}", addr);

    let shutdown_tx_server = shutdown_tx.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            shutdown_signal().await;
            tracing::info!("Shutdown signal received, stopping");
            let _ = shutdown_tx_server.send(());
        })
        .await?;

    let _ = shutdown_tx.send(());
    let _ = scheduler_handle.await;

    tracing::info!("People Monitor stopped");
    Ok(())
}

/// Wait for SIGINT or SIGTERM
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
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
}
