//! Configuration loader with layered sources.

use crate::AppConfig;
use beeline_core::{QueueError, QueueResult};
use beeline_queue::StoreBackend;
use config::{Config, Environment, File};
use std::path::Path;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info};

/// Configuration loader with runtime refresh support.
#[derive(Clone)]
pub struct ConfigLoader {
    config: Arc<RwLock<AppConfig>>,
    config_dir: String,
}

impl ConfigLoader {
    /// Creates a new configuration loader.
    ///
    /// Configuration is loaded from multiple sources in order:
    /// 1. Built-in defaults
    /// 2. `{config_dir}/default.toml`
    /// 3. `{config_dir}/{environment}.toml`
    /// 4. `{config_dir}/local.toml` (not committed to version control)
    /// 5. Environment variables with `BEELINE__` prefix
    pub fn new(config_dir: impl Into<String>) -> QueueResult<Self> {
        let config_dir = config_dir.into();
        let config = Self::load_config(&config_dir)?;

        Ok(Self {
            config: Arc::new(RwLock::new(config)),
            config_dir,
        })
    }

    /// Loads configuration from the default location (`./config`).
    pub fn from_default_location() -> QueueResult<Self> {
        Self::new("./config")
    }

    /// Returns the current configuration.
    pub async fn get(&self) -> AppConfig {
        self.config.read().await.clone()
    }

    /// Reloads the configuration from disk.
    pub async fn reload(&self) -> QueueResult<()> {
        let new_config = Self::load_config(&self.config_dir)?;
        let mut config = self.config.write().await;
        *config = new_config;
        info!("Configuration reloaded successfully");
        Ok(())
    }

    fn load_config(config_dir: &str) -> QueueResult<AppConfig> {
        // Load .env file if present
        if let Err(e) = dotenvy::dotenv() {
            debug!("No .env file found or error loading it: {}", e);
        }

        let environment =
            std::env::var("BEELINE_ENVIRONMENT").unwrap_or_else(|_| "development".to_string());
        info!("Loading configuration for environment: {}", environment);

        let mut builder = Config::builder();

        let default_path = format!("{}/default.toml", config_dir);
        if Path::new(&default_path).exists() {
            debug!("Loading default config from: {}", default_path);
            builder = builder.add_source(File::with_name(&default_path).required(false));
        }

        let env_path = format!("{}/{}.toml", config_dir, environment);
        if Path::new(&env_path).exists() {
            debug!("Loading environment config from: {}", env_path);
            builder = builder.add_source(File::with_name(&env_path).required(false));
        }

        let local_path = format!("{}/local.toml", config_dir);
        if Path::new(&local_path).exists() {
            debug!("Loading local config from: {}", local_path);
            builder = builder.add_source(File::with_name(&local_path).required(false));
        }

        builder = builder.add_source(
            Environment::with_prefix("BEELINE")
                .separator("__")
                .try_parsing(true),
        );

        let config = builder
            .build()
            .map_err(|e| QueueError::Configuration(e.to_string()))?;

        let app_config: AppConfig = config
            .try_deserialize()
            .map_err(|e| QueueError::Configuration(e.to_string()))?;

        Self::validate_config(&app_config)?;

        Ok(app_config)
    }

    /// Validates the configuration.
    fn validate_config(config: &AppConfig) -> QueueResult<()> {
        let queue = &config.queue;

        if queue.lease.default_lease_ms == 0 {
            return Err(QueueError::Configuration(
                "default lease duration must be positive".to_string(),
            ));
        }
        if queue.lease.max_lease_ms < queue.lease.default_lease_ms {
            return Err(QueueError::Configuration(
                "max lease duration must be at least the default lease duration".to_string(),
            ));
        }

        // Expired leases linger a full tick before the sweeper sees them.
        if queue.sweep.enabled && queue.sweep.interval_ms >= queue.lease.default_lease_ms {
            return Err(QueueError::Configuration(
                "sweep interval must be smaller than the default lease duration".to_string(),
            ));
        }

        if !(0.0..=1.0).contains(&queue.retry.jitter_factor) {
            return Err(QueueError::Configuration(
                "retry jitter factor must be between 0.0 and 1.0".to_string(),
            ));
        }
        if queue.retry.max_delay_ms < queue.retry.base_delay_ms {
            return Err(QueueError::Configuration(
                "retry max delay must be at least the base delay".to_string(),
            ));
        }

        if queue.list.max_limit == 0 || queue.list.default_limit > queue.list.max_limit {
            return Err(QueueError::Configuration(
                "listing default limit must not exceed the maximum".to_string(),
            ));
        }

        if queue.store.backend == StoreBackend::Redis && queue.store.redis.url.is_empty() {
            return Err(QueueError::Configuration(
                "Redis URL is required for the redis store backend".to_string(),
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use beeline_queue::config::{RetryConfig, SweepConfig};

    #[test]
    fn test_default_config_is_valid() {
        let config = AppConfig::default();
        assert!(ConfigLoader::validate_config(&config).is_ok());
    }

    #[test]
    fn test_rejects_sweep_interval_above_lease() {
        let mut config = AppConfig::default();
        config.queue.sweep = SweepConfig {
            interval_ms: config.queue.lease.default_lease_ms,
            ..config.queue.sweep
        };
        let err = ConfigLoader::validate_config(&config).unwrap_err();
        assert_eq!(err.error_code(), "CONFIGURATION_ERROR");
    }

    #[test]
    fn test_rejects_out_of_range_jitter() {
        let mut config = AppConfig::default();
        config.queue.retry = RetryConfig {
            jitter_factor: 1.5,
            ..config.queue.retry
        };
        assert!(ConfigLoader::validate_config(&config).is_err());
    }

    #[test]
    fn test_rejects_inverted_list_limits() {
        let mut config = AppConfig::default();
        config.queue.list.default_limit = 1_000;
        config.queue.list.max_limit = 500;
        assert!(ConfigLoader::validate_config(&config).is_err());
    }
}
