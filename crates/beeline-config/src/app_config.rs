//! Application configuration structures.

use beeline_queue::QueueConfig;
use serde::{Deserialize, Serialize};

/// Top-level application configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Application metadata.
    #[serde(default)]
    pub app: AppInfo,

    /// HTTP server configuration.
    #[serde(default)]
    pub server: ServerConfig,

    /// Queue engine configuration.
    #[serde(default)]
    pub queue: QueueConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            app: AppInfo::default(),
            server: ServerConfig::default(),
            queue: QueueConfig::default(),
        }
    }
}

/// Application metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppInfo {
    /// Application name.
    #[serde(default = "default_app_name")]
    pub name: String,

    /// Deployment environment: development, staging, production.
    #[serde(default = "default_environment")]
    pub environment: String,
}

impl Default for AppInfo {
    fn default() -> Self {
        Self {
            name: default_app_name(),
            environment: default_environment(),
        }
    }
}

fn default_app_name() -> String {
    "beeline".to_string()
}

fn default_environment() -> String {
    "development".to_string()
}

/// HTTP server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Bind host.
    #[serde(default = "default_host")]
    pub host: String,

    /// Bind port.
    #[serde(default = "default_port")]
    pub port: u16,

    /// Enable CORS.
    #[serde(default = "default_cors_enabled")]
    pub cors_enabled: bool,

    /// Allowed CORS origins. `*` means any.
    #[serde(default = "default_cors_origins")]
    pub cors_origins: Vec<String>,

    /// Static API token required as `Authorization: Bearer <token>` on
    /// `/v1/*` routes. `None` disables the check.
    #[serde(default)]
    pub api_token: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            cors_enabled: default_cors_enabled(),
            cors_origins: default_cors_origins(),
            api_token: None,
        }
    }
}

impl ServerConfig {
    /// Returns the bind address.
    #[must_use]
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_cors_enabled() -> bool {
    true
}

fn default_cors_origins() -> Vec<String> {
    vec!["*".to_string()]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = AppConfig::default();
        assert_eq!(config.app.name, "beeline");
        assert_eq!(config.server.addr(), "0.0.0.0:8080");
        assert!(config.server.api_token.is_none());
        assert_eq!(config.queue.lease.default_lease_ms, 60_000);
        assert_eq!(config.queue.retry.max_attempts, 10);
    }
}
