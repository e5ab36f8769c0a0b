//! Queue engine configuration.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Configuration for the queue engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueConfig {
    /// Job store selection and backend settings.
    #[serde(default)]
    pub store: StoreConfig,

    /// Lease issuing configuration.
    #[serde(default)]
    pub lease: LeaseConfig,

    /// Retry and dead-letter configuration.
    #[serde(default)]
    pub retry: RetryConfig,

    /// Expiry sweeper configuration.
    #[serde(default)]
    pub sweep: SweepConfig,

    /// Listing limits for the read API.
    #[serde(default)]
    pub list: ListConfig,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            store: StoreConfig::default(),
            lease: LeaseConfig::default(),
            retry: RetryConfig::default(),
            sweep: SweepConfig::default(),
            list: ListConfig::default(),
        }
    }
}

/// Which job store backend to run against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    /// In-process store; single node, lost on restart.
    Memory,
    /// Redis-backed store shared across server instances.
    Redis,
}

impl Default for StoreBackend {
    fn default() -> Self {
        StoreBackend::Memory
    }
}

/// Job store configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Backend selection.
    #[serde(default)]
    pub backend: StoreBackend,

    /// Redis connection configuration, used when `backend = "redis"`.
    #[serde(default)]
    pub redis: RedisConfig,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackend::default(),
            redis: RedisConfig::default(),
        }
    }
}

/// Redis connection configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedisConfig {
    /// Redis URL.
    #[serde(default = "default_redis_url")]
    pub url: String,

    /// Connection pool size.
    #[serde(default = "default_pool_size")]
    pub pool_size: usize,

    /// Connection timeout in seconds.
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,

    /// Key prefix for all queue keys.
    #[serde(default = "default_key_prefix")]
    pub key_prefix: String,
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            url: default_redis_url(),
            pool_size: default_pool_size(),
            connect_timeout_secs: default_connect_timeout(),
            key_prefix: default_key_prefix(),
        }
    }
}

fn default_redis_url() -> String {
    "redis://localhost:6379".to_string()
}

fn default_pool_size() -> usize {
    10
}

fn default_connect_timeout() -> u64 {
    5
}

fn default_key_prefix() -> String {
    "beeline".to_string()
}

/// Lease issuing configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LeaseConfig {
    /// Lease duration granted when a claim does not ask for one, in
    /// milliseconds.
    #[serde(default = "default_lease_ms")]
    pub default_lease_ms: u64,

    /// Ceiling for requested lease durations and heartbeat extensions,
    /// in milliseconds.
    #[serde(default = "default_max_lease_ms")]
    pub max_lease_ms: u64,

    /// How many due pending jobs one claim round inspects. Jobs beyond
    /// this window are picked up by later polls.
    #[serde(default = "default_claim_scan_limit")]
    pub claim_scan_limit: usize,

    /// Ceiling for `maxBatch` on a single lease request.
    #[serde(default = "default_max_batch")]
    pub max_batch: usize,
}

impl Default for LeaseConfig {
    fn default() -> Self {
        Self {
            default_lease_ms: default_lease_ms(),
            max_lease_ms: default_max_lease_ms(),
            claim_scan_limit: default_claim_scan_limit(),
            max_batch: default_max_batch(),
        }
    }
}

fn default_lease_ms() -> u64 {
    60_000
}

fn default_max_lease_ms() -> u64 {
    300_000 // 5 minutes
}

fn default_claim_scan_limit() -> usize {
    128
}

fn default_max_batch() -> usize {
    32
}

/// Retry and dead-letter configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Attempt budget applied to jobs that do not set their own.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Backoff delay for the first retry, in milliseconds.
    #[serde(default = "default_base_delay")]
    pub base_delay_ms: u64,

    /// Backoff delay ceiling, in milliseconds.
    #[serde(default = "default_max_delay")]
    pub max_delay_ms: u64,

    /// Jitter applied around the computed delay, as a fraction of it.
    /// `0.2` spreads each delay over plus or minus twenty percent.
    #[serde(default = "default_jitter_factor")]
    pub jitter_factor: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay(),
            max_delay_ms: default_max_delay(),
            jitter_factor: default_jitter_factor(),
        }
    }
}

fn default_max_attempts() -> u32 {
    10
}

fn default_base_delay() -> u64 {
    1_000
}

fn default_max_delay() -> u64 {
    30_000
}

fn default_jitter_factor() -> f64 {
    0.2
}

/// Expiry sweeper configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SweepConfig {
    /// Enable the sweeper loop.
    #[serde(default = "default_sweep_enabled")]
    pub enabled: bool,

    /// Tick interval in milliseconds. Must be well under the default
    /// lease duration or expired leases linger between ticks.
    #[serde(default = "default_sweep_interval")]
    pub interval_ms: u64,

    /// Maximum expired leases reclaimed per tick.
    #[serde(default = "default_sweep_batch")]
    pub batch_size: usize,
}

impl Default for SweepConfig {
    fn default() -> Self {
        Self {
            enabled: default_sweep_enabled(),
            interval_ms: default_sweep_interval(),
            batch_size: default_sweep_batch(),
        }
    }
}

fn default_sweep_enabled() -> bool {
    true
}

fn default_sweep_interval() -> u64 {
    1_000
}

fn default_sweep_batch() -> usize {
    500
}

/// Listing limits for the read API.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListConfig {
    /// Limit applied when a listing request does not set one.
    #[serde(default = "default_list_limit")]
    pub default_limit: usize,

    /// Hard ceiling for listing limits.
    #[serde(default = "default_list_max")]
    pub max_limit: usize,
}

impl Default for ListConfig {
    fn default() -> Self {
        Self {
            default_limit: default_list_limit(),
            max_limit: default_list_max(),
        }
    }
}

fn default_list_limit() -> usize {
    50
}

fn default_list_max() -> usize {
    500
}

impl LeaseConfig {
    /// Returns the default lease duration as a `Duration`.
    pub fn default_lease(&self) -> Duration {
        Duration::from_millis(self.default_lease_ms)
    }

    /// Returns the lease duration ceiling as a `Duration`.
    pub fn max_lease(&self) -> Duration {
        Duration::from_millis(self.max_lease_ms)
    }
}

impl SweepConfig {
    /// Returns the tick interval as a `Duration`.
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }
}

impl RedisConfig {
    /// Returns the connection timeout as a `Duration`.
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }
}
