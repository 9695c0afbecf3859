//! Retail Replenishment - alert worker
//!
//! Connects to the ledger database and runs the stock alert scan on a
//! fixed interval until interrupted.

use std::{sync::Arc, time::Duration};

use retail_replenishment_backend::{
    services::{LedgerServices, TracingNotifier},
    store::PgLedgerStore,
    Config,
};
use sqlx::postgres::PgPoolOptions;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "rrp_worker=debug,retail_replenishment_backend=debug,sqlx=warn".into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    dotenvy::dotenv().ok();
    let config = Config::load()?;

    tracing::info!("Starting Retail Replenishment worker");
    tracing::info!("Environment: {}", config.environment);

    // Create database connection pool
    tracing::info!("Connecting to database...");
    let db_pool = PgPoolOptions::new()
        .max_connections(config.database.max_connections)
        .min_connections(config.database.min_connections)
        .acquire_timeout(Duration::from_secs(30))
        .connect(&config.database.url)
        .await?;

    tracing::info!("Database connection established");

    // Run migrations in development
    if config.environment == "development" {
        tracing::info!("Running database migrations...");
        sqlx::migrate!("./migrations").run(&db_pool).await?;
        tracing::info!("Migrations completed");
    }

    let services = LedgerServices::new(
        Arc::new(PgLedgerStore::new(db_pool)),
        Arc::new(TracingNotifier),
        config.alerts.thresholds(),
    );

    if !config.alerts.enabled {
        tracing::warn!("Alert scan disabled, nothing to do");
        return Ok(());
    }

    let mut ticker = tokio::time::interval(Duration::from_secs(config.alerts.interval_seconds));
    let thresholds = services.alerts.thresholds();
    tracing::info!(
        interval_seconds = config.alerts.interval_seconds,
        critical = %thresholds.critical,
        low_stock = %thresholds.low_stock,
        "Alert scan scheduled"
    );

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                if let Err(e) = services.alerts.generate_stock_alerts().await {
                    tracing::error!(error = %e, code = e.code(), "Alert scan failed");
                }
            }
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Shutdown signal received");
                break;
            }
        }
    }

    Ok(())
}
