//! # Beeline Server
//!
//! Main entry point for the Beeline job queue server: loads
//! configuration, builds the job store, starts the expiry sweeper, and
//! serves the REST boundary with a Prometheus `/metrics` endpoint.

use axum::routing::get;
use beeline_config::{AppConfig, ConfigLoader};
use beeline_core::{JobStore, QueueError, QueueResult};
use beeline_queue::config::StoreBackend;
use beeline_queue::{
    create_pool, ExpirySweeper, MemoryJobStore, QueueService, RedisJobStore, RetryPolicy,
};
use beeline_rest::{create_router, AppState};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::sync::Arc;
use tokio::signal;
use tracing::{error, info, warn};

#[tokio::main]
async fn main() {
    init_logging();

    info!("Starting Beeline server...");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));

    if let Err(e) = run().await {
        error!("Application error: {}", e);
        std::process::exit(1);
    }
}

async fn run() -> QueueResult<()> {
    // Load configuration
    let config_loader = ConfigLoader::from_default_location()?;
    let config = config_loader.get().await;

    info!("Environment: {}", config.app.environment);
    info!("Store backend: {:?}", config.queue.store.backend);

    // Install the Prometheus recorder before anything records a metric
    let prometheus = PrometheusBuilder::new().install_recorder().map_err(|e| {
        QueueError::Configuration(format!("Failed to install metrics recorder: {}", e))
    })?;
    beeline_queue::metrics::register_metrics();

    // Build the job store and the service facade
    let store = build_store(&config).await?;
    let queue = Arc::new(QueueService::new(store.clone(), config.queue.clone()));

    // Start the expiry sweeper
    let retry = RetryPolicy::new(&config.queue.retry);
    let sweeper = Arc::new(ExpirySweeper::new(store, retry, config.queue.sweep.clone()));
    let sweeper_task = if config.queue.sweep.enabled {
        let sweeper = sweeper.clone();
        Some(tokio::spawn(async move { sweeper.run().await }))
    } else {
        warn!("Expiry sweeper disabled; expired leases will not be reclaimed");
        None
    };

    // Build the router with the metrics endpoint
    let metrics_handle = prometheus.clone();
    let router = create_router(AppState::new(queue), &config.server).route(
        "/metrics",
        get(move || {
            let handle = metrics_handle.clone();
            async move { handle.render() }
        }),
    );

    // Start REST server
    let addr = config.server.addr();
    info!("Starting REST server on http://{}", addr);

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .map_err(|e| QueueError::Internal(format!("Failed to bind {}: {}", addr, e)))?;

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(|e| QueueError::Internal(format!("REST server error: {}", e)))?;

    // Stop the sweeper after the HTTP server has drained
    sweeper.stop();
    if let Some(task) = sweeper_task {
        match task.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => error!("Sweeper stopped with error: {}", e),
            Err(e) => error!("Sweeper task panicked: {}", e),
        }
    }

    info!("Server shutdown complete");
    Ok(())
}

/// Builds the configured job store backend.
async fn build_store(config: &AppConfig) -> QueueResult<Arc<dyn JobStore>> {
    match config.queue.store.backend {
        StoreBackend::Memory => {
            warn!("Using in-memory job store; jobs are lost on restart");
            Ok(Arc::new(MemoryJobStore::new()))
        }
        StoreBackend::Redis => {
            let redis = &config.queue.store.redis;
            let pool = create_pool(redis).await?;
            Ok(Arc::new(RedisJobStore::new(pool, redis)))
        }
    }
}

fn init_logging() {
    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,beeline=debug,tower_http=debug"));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_target(true))
        .init();
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, initiating graceful shutdown...");
        }
        _ = terminate => {
            info!("Received terminate signal, initiating graceful shutdown...");
        }
    }
}
