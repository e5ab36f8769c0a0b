//! # Beeline Config
//!
//! Layered configuration for the Beeline job queue: built-in defaults,
//! TOML files, and `BEELINE__`-prefixed environment variables.

pub mod app_config;
pub mod loader;

pub use app_config::{AppConfig, AppInfo, ServerConfig};
pub use loader::ConfigLoader;
