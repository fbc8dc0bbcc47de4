//! Chronicle API server entry point.

use std::net::SocketAddr;
use std::sync::Arc;

use chronicle_api::error::AppError;
use chronicle_api::state::AppState;
use chronicle_api::telemetry;
use chronicle_core::clock::{Clock, SystemClock};
use chronicle_core::config::SnapshotConfiguration;
use sqlx::postgres::PgPoolOptions;

#[tokio::main]
async fn main() -> Result<(), AppError> {
    let tracer_provider = telemetry::init()?;

    tracing::info!("Starting Chronicle API server");

    // Read configuration from environment.
    let host = std::env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string());
    let port: u16 = std::env::var("PORT")
        .unwrap_or_else(|_| "3000".to_string())
        .parse()
        .map_err(|e| AppError::Config(format!("PORT must be a valid u16: {e}")))?;
    let snapshot_config = SnapshotConfiguration::from_env()?;
    tracing::info!(
        policy = snapshot_config.default_policy.as_str(),
        serializer = snapshot_config.default_serializer.as_str(),
        compression = snapshot_config.default_compression.as_str(),
        async_creation = snapshot_config.async_creation,
        "snapshot configuration loaded"
    );

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);

    // Build application state.
    let app_state = if let Ok(database_url) = std::env::var("DATABASE_URL") {
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .connect(&database_url)
            .await?;
        sqlx::migrate!("../../migrations").run(&pool).await?;
        AppState::postgres(pool, snapshot_config, clock)?
    } else {
        tracing::warn!("DATABASE_URL not set; using in-memory stores");
        AppState::in_memory(snapshot_config, clock)?
    };

    let app = chronicle_api::app(app_state.clone());

    // Start server.
    let addr: SocketAddr = format!("{host}:{port}")
        .parse()
        .map_err(|e| AppError::Config(format!("invalid HOST:PORT combination: {e}")))?;
    tracing::info!("Listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // Let in-flight snapshot writes and cleanups finish before exiting.
    app_state
        .orders
        .snapshot_manager()
        .wait_for_background_tasks()
        .await;
    if let Some(provider) = &tracer_provider {
        telemetry::shutdown(provider);
    }

    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %err, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}
