//! Redis-backed job store.

mod store;

pub use store::RedisJobStore;

use crate::config::RedisConfig;
use beeline_core::{QueueError, QueueResult};
use deadpool_redis::{Config, Pool, Runtime};
use tracing::info;

/// Create a Redis connection pool.
pub async fn create_pool(config: &RedisConfig) -> QueueResult<Pool> {
    info!("Creating Redis connection pool for job store...");

    let cfg = Config::from_url(&config.url);

    let pool = cfg
        .builder()
        .map_err(|e| QueueError::Configuration(format!("Invalid Redis config: {}", e)))?
        .max_size(config.pool_size)
        .create_timeout(Some(config.connect_timeout()))
        .wait_timeout(Some(config.connect_timeout()))
        .runtime(Runtime::Tokio1)
        .build()
        .map_err(|e| QueueError::Configuration(format!("Failed to create pool: {}", e)))?;

    // Test connection
    let mut conn = pool.get().await?;
    redis::cmd("PING").query_async::<String>(&mut *conn).await?;

    info!("Redis connection pool created successfully");

    Ok(pool)
}

/// Redis key builder for the job store.
pub struct RedisKeys {
    prefix: String,
}

impl RedisKeys {
    /// Create a new key builder with the given prefix.
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    /// Job record key (hash of scalar fields).
    pub fn job(&self, job_id: &str) -> String {
        format!("{}:job:{}", self.prefix, job_id)
    }

    /// Pending index (sorted set scored by `run_at`).
    pub fn pending(&self) -> String {
        format!("{}:pending", self.prefix)
    }

    /// Leased index (sorted set scored by `lease_expires_at`).
    pub fn leased(&self) -> String {
        format!("{}:leased", self.prefix)
    }

    /// All-jobs index (sorted set scored by creation time).
    pub fn jobs(&self) -> String {
        format!("{}:jobs", self.prefix)
    }

    /// Terminal-status membership set (`completed` or `dead`).
    pub fn status(&self, status: &str) -> String {
        format!("{}:status:{}", self.prefix, status)
    }
}

impl Default for RedisKeys {
    fn default() -> Self {
        Self::new("beeline")
    }
}
