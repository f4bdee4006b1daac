//! Rollcall - Event check-in admission control

use anyhow::Result;
use std::path::Path;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use rollcall::{
    api,
    app::Application,
    cache::create_cache,
    config::Config,
    db,
    tasks::{start_lifecycle_scheduler, start_reconciliation},
};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "rollcall=info,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting Rollcall...");

    // Load configuration
    let config = Config::load_with_env(Path::new("config.yml"))?;
    tracing::info!("Configuration loaded");

    // Initialize database
    let pool = db::create_pool(&config.database).await?;
    tracing::info!("Database connected: {:?}", config.database.driver);

    // Run migrations
    let applied = db::migrations::run_migrations(&pool).await?;
    tracing::info!(applied, "Database migrations completed");

    // Initialize cache
    let cache = create_cache(&config.cache).await?;
    tracing::info!("Cache initialized: {:?}", config.cache.driver);

    let app = Application::new(&config, pool.clone(), cache);

    // Background tasks
    let cancel_token = CancellationToken::new();
    let scheduler_handle = tokio::spawn(start_lifecycle_scheduler(
        app.scheduler.clone(),
        Duration::from_secs(config.scheduler.interval_seconds),
        cancel_token.child_token(),
    ));
    let reconciliation_handle = tokio::spawn(start_reconciliation(
        app.admission.clone(),
        Duration::from_secs(config.reconciliation.interval_seconds),
        cancel_token.child_token(),
    ));

    // Build router
    let router = api::build_router(app.state, &config.server.cors_origin)?;

    // Start server
    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Server listening on http://{}", addr);

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal(cancel_token.clone()))
        .await?;

    cancel_token.cancel();
    for handle in [scheduler_handle, reconciliation_handle] {
        if let Err(e) = handle.await {
            tracing::warn!(error = %e, "Background task ended abnormally");
        }
    }
    pool.close().await;

    tracing::info!("Rollcall stopped");
    Ok(())
}

/// Resolve on Ctrl-C, or when `cancel_token` is cancelled elsewhere
async fn shutdown_signal(cancel_token: CancellationToken) {
    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            if let Err(e) = result {
                tracing::error!(error = %e, "Failed to listen for shutdown signal");
            }
            tracing::info!("Shutdown signal received");
        }
        _ = cancel_token.cancelled() => {}
    }
}
