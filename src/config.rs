//! Configuration management
//!
//! Loads configuration from:
//! 1. Default values
//! 2. Configuration file (config/local.toml)
//! 3. Environment variables (override)

use serde::Deserialize;
use std::path::PathBuf;

/// Main application configuration
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub redis: RedisConfig,
    pub concurrent: ConcurrentConfig,
    pub proxy: ProxyConfig,
    pub cache: CacheConfig,
    pub worker: WorkerConfig,
    pub logging: LoggingConfig,
}

/// Server configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Bind address (e.g., "0.0.0.0")
    pub host: String,
    /// Port number (e.g., 8000)
    pub port: u16,
    /// Public domain the bridge federates as (e.g., "cc.example.com")
    pub fqdn: String,
}

impl ServerConfig {
    /// Base URL for all ids the bridge emits.
    ///
    /// Federation ids are always https; remote servers will not dereference
    /// plain-http actors.
    pub fn base_url(&self) -> String {
        format!("https://{}", self.fqdn)
    }
}

/// Database configuration (SQLite)
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// Path to SQLite database file
    pub path: PathBuf,
}

/// Redis configuration (CC stream pub/sub)
#[derive(Debug, Clone, Deserialize)]
pub struct RedisConfig {
    /// Redis URL (e.g., "redis://127.0.0.1:6379")
    pub url: String,
}

/// Concurrent gateway configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ConcurrentConfig {
    /// Base URL of the CC gateway API (message/association/entity services)
    pub api_url: String,
}

/// Proxy identity configuration
///
/// The proxy is the bridge-owned CC identity that signs every CC object
/// synthesized from remote AP activity.
#[derive(Debug, Clone, Deserialize)]
pub struct ProxyConfig {
    /// Hex-encoded secp256k1 private key
    pub private_key: String,
    /// CC stream the association worker subscribes to
    pub notification_stream: String,
}

/// Cache configuration
#[derive(Debug, Clone, Deserialize)]
pub struct CacheConfig {
    /// Person cache TTL in seconds (default: 1800)
    pub person_ttl: u64,
}

/// Fan-out worker configuration
#[derive(Debug, Clone, Deserialize)]
pub struct WorkerConfig {
    /// Supervisor tick interval in seconds (default: 10)
    pub tick_seconds: u64,
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level: trace, debug, info, warn, error
    pub level: String,
    /// Log format: "pretty" or "json"
    pub format: String,
}

impl AppConfig {
    /// Load configuration from file and environment
    ///
    /// # Loading Order
    /// 1. Default values
    /// 2. config/default.toml (if exists)
    /// 3. config/local.toml (if exists)
    /// 4. Environment variables (CCBRIDGE__*)
    ///
    /// # Errors
    /// Returns error if configuration is invalid
    pub fn load() -> Result<Self, crate::error::AppError> {
        use config::{Config, Environment, File};

        let config = Config::builder()
            .set_default("server.host", "0.0.0.0")
            .map_err(|e| crate::error::AppError::Config(e.to_string()))?
            .set_default("server.port", 8000)
            .map_err(|e| crate::error::AppError::Config(e.to_string()))?
            .set_default("database.path", "data/ccbridge.db")
            .map_err(|e| crate::error::AppError::Config(e.to_string()))?
            .set_default("redis.url", "redis://127.0.0.1:6379")
            .map_err(|e| crate::error::AppError::Config(e.to_string()))?
            .set_default("cache.person_ttl", 1800)
            .map_err(|e| crate::error::AppError::Config(e.to_string()))?
            .set_default("worker.tick_seconds", 10)
            .map_err(|e| crate::error::AppError::Config(e.to_string()))?
            .set_default("logging.level", "info")
            .map_err(|e| crate::error::AppError::Config(e.to_string()))?
            .set_default("logging.format", "pretty")
            .map_err(|e| crate::error::AppError::Config(e.to_string()))?
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name("config/local").required(false))
            .add_source(
                Environment::with_prefix("CCBRIDGE")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .map_err(|e| crate::error::AppError::Config(e.to_string()))?;

        let app_config: Self = config
            .try_deserialize()
            .map_err(|e| crate::error::AppError::Config(e.to_string()))?;
        app_config.validate()?;
        Ok(app_config)
    }

    fn validate(&self) -> Result<(), crate::error::AppError> {
        if self.server.fqdn.trim().is_empty() {
            return Err(crate::error::AppError::Config(
                "server.fqdn must be set".to_string(),
            ));
        }

        if self.proxy.private_key.trim().is_empty() {
            return Err(crate::error::AppError::Config(
                "proxy.private_key must be set".to_string(),
            ));
        }

        if self.worker.tick_seconds == 0 {
            return Err(crate::error::AppError::Config(
                "worker.tick_seconds must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }
}
