//! Entitlement Service - guild feature subscriptions paid with credits
//!
//! This is the main entry point for the entitlement service.

use std::sync::Arc;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use entitle_core::FeatureCatalog;
use entitle_service::{create_router, AppState, Collaborators, EngineConfig, EngineContext};
use entitle_store::RocksStore;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,entitle_service=debug,entitle_store=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting Entitlement Service");

    // Load configuration from environment
    let config = EngineConfig::from_env();

    tracing::info!(
        listen_addr = %config.listen_addr,
        data_dir = %config.data_dir,
        sweep_interval_secs = config.sweep_interval_secs,
        grace_period_days = config.grace_period_days,
        warning_horizon_days = config.warning_horizon_days,
        catalog_path = ?config.feature_catalog_path,
        "Service configuration loaded"
    );

    // Load the feature catalog once; it is immutable afterwards
    let catalog = match &config.feature_catalog_path {
        Some(path) => FeatureCatalog::load(path)?,
        None => FeatureCatalog::default(),
    };
    tracing::info!(features = catalog.len(), "Feature catalog loaded");

    // Initialize RocksDB store
    tracing::info!(path = %config.data_dir, "Opening RocksDB store");
    let store = Arc::new(RocksStore::open(&config.data_dir)?);

    // Build the engine
    let ctx = Arc::new(
        EngineContext::builder(config.clone(), catalog, Collaborators::shared(store)).build(),
    );
    let state = AppState::new(ctx);
    let sweeper = Arc::clone(&state.sweeper);
    sweeper.start();

    // Create the router
    let app = create_router(state);
    tracing::info!("Router configured with all API endpoints");

    // Start HTTP server
    tracing::info!(listen_addr = %config.listen_addr, "Starting HTTP server");
    let listener = tokio::net::TcpListener::bind(&config.listen_addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // Let an in-flight sweep finish before exiting
    sweeper.stop().await;
    tracing::info!("Entitlement Service stopped");

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}
