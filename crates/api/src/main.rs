use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tracing::info;

use ticketing_api::app::{create_app, AppState};
use ticketing_api::config::Config;
use ticketing_api::jobs::{JobScheduler, PaymentReconciliationJob, PoolMetricsJob};
use ticketing_api::middleware::{init_metrics, logging::init_logging};

const JOB_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present
    dotenvy::dotenv().ok();

    // Load configuration
    let config = Config::load()?;

    // Initialize logging
    init_logging(&config.logging)?;
    init_metrics()?;

    info!("Starting ticketing API v{}", env!("CARGO_PKG_VERSION"));

    // Create database pool
    let pool = persistence::db::create_pool(&config.database.pool_config()).await?;

    // Run migrations
    info!("Running database migrations...");
    sqlx::migrate!("../persistence/src/migrations")
        .run(&pool)
        .await?;
    info!("Migrations completed");

    let addr = config.socket_addr()?;
    let reconciliation_enabled = config.registration.reconciliation_enabled;
    let registration_config = config.registration.clone();

    // Build application
    let state = AppState::from_config(config, pool.clone())?;

    let mut scheduler = JobScheduler::new();
    scheduler.register(PoolMetricsJob::new(pool));
    if reconciliation_enabled {
        scheduler.register(PaymentReconciliationJob::from_config(
            Arc::clone(&state.settlement),
            &registration_config,
        ));
    } else {
        info!("Payment reconciliation disabled");
    }
    scheduler.start();

    let app = create_app(state);

    // Start server
    info!("Server listening on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    scheduler.shutdown();
    scheduler.wait_for_shutdown(JOB_SHUTDOWN_TIMEOUT).await;
    info!("Server stopped");

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
