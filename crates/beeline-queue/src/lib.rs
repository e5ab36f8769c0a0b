//! # Beeline Queue
//!
//! The queue engine: lease manager, retry policy, expiry sweeper, and
//! the job store backends. [`QueueService`] is the facade the HTTP
//! boundary and worker tooling talk to; [`ExpirySweeper`] is the one
//! background task, run by the server binary.

pub mod config;
pub mod lease;
pub mod memory;
pub mod metrics;
pub mod outcome;
pub mod redis;
pub mod retry;
pub mod service;
pub mod sweeper;

pub use config::{
    LeaseConfig, ListConfig, QueueConfig, RedisConfig, RetryConfig, StoreBackend, StoreConfig,
    SweepConfig,
};
pub use lease::LeaseManager;
pub use memory::MemoryJobStore;
pub use outcome::OutcomeHandler;
pub use redis::{create_pool, RedisJobStore};
pub use retry::RetryPolicy;
pub use service::QueueService;
pub use sweeper::{ExpirySweeper, SweepStats};
