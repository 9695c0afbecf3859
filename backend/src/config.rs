//! Configuration management for the replenishment worker
//!
//! Supports hierarchical configuration loading:
//! 1. Default values in code
//! 2. Configuration files (config/development.toml, config/production.toml)
//! 3. Environment variable overrides with RRP__ prefix

use config::{Environment, File};
use rust_decimal::Decimal;
use serde::Deserialize;
use shared::AlertThresholds;

use crate::error::{AppError, AppResult};

/// Main application configuration
#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    /// Current environment (development, production)
    pub environment: String,

    /// Database configuration
    pub database: DatabaseConfig,

    /// Alert generator configuration
    pub alerts: AlertConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DatabaseConfig {
    /// PostgreSQL connection URL
    pub url: String,

    /// Maximum number of connections in the pool
    pub max_connections: u32,

    /// Minimum number of connections in the pool
    pub min_connections: u32,
}

#[derive(Debug, Deserialize, Clone)]
pub struct AlertConfig {
    /// Run the scheduled scan at all
    pub enabled: bool,

    /// Seconds between two scans
    pub interval_seconds: u64,

    /// Quantity at or below which a CRITICAL_STOCK alert is raised
    pub critical_threshold: Decimal,

    /// Quantity at or below which LOW_STOCK / LATE_ORDER alerts are raised
    pub low_stock_threshold: Decimal,
}

impl AlertConfig {
    pub fn thresholds(&self) -> AlertThresholds {
        AlertThresholds {
            critical: self.critical_threshold,
            low_stock: self.low_stock_threshold,
        }
    }
}

impl Default for AlertConfig {
    fn default() -> Self {
        let thresholds = AlertThresholds::default();
        Self {
            enabled: true,
            interval_seconds: 3600,
            critical_threshold: thresholds.critical,
            low_stock_threshold: thresholds.low_stock,
        }
    }
}

impl Config {
    /// Load configuration from files and environment variables
    pub fn load() -> AppResult<Self> {
        let environment =
            std::env::var("RRP__ENVIRONMENT").unwrap_or_else(|_| "development".into());

        let config = config::Config::builder()
            // Start with default values
            .set_default("environment", environment.clone())?
            .set_default("database.max_connections", 10)?
            .set_default("database.min_connections", 2)?
            .set_default("alerts.enabled", true)?
            .set_default("alerts.interval_seconds", 3600)?
            .set_default("alerts.critical_threshold", "10")?
            .set_default("alerts.low_stock_threshold", "30")?
            // Load environment-specific config file
            .add_source(File::with_name(&format!("config/{}", environment)).required(false))
            // Override with environment variables (RRP__ prefix)
            .add_source(
                Environment::with_prefix("RRP")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let config: Config = config.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> AppResult<()> {
        if self.alerts.interval_seconds == 0 {
            return Err(AppError::Configuration(
                "alerts.interval_seconds must be greater than zero".into(),
            ));
        }
        if self.alerts.critical_threshold > self.alerts.low_stock_threshold {
            return Err(AppError::Configuration(
                "alerts.critical_threshold cannot exceed alerts.low_stock_threshold".into(),
            ));
        }
        Ok(())
    }
}
