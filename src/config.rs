//! Configuration management for the querier
//!
//! TOML file support with environment variable overrides and sensible
//! defaults. Every section may be omitted from the file.
//!
//! ```toml
//! [cache]
//! ttl_secs = 604800
//! flux_interval_secs = 300
//!
//! [execution]
//! max_concurrency = 8
//!
//! [redis]
//! url = "redis://cache:6379"
//! ```

use crate::cache::{BucketCacheConfig, RedisStoreConfig, RetryPolicy};
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Main configuration structure
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct QuerierConfig {
    /// Bucket cache settings
    #[serde(default)]
    pub cache: CacheConfig,

    /// Sub-query execution limits
    #[serde(default)]
    pub execution: ExecutionConfig,

    /// Shared cache store; an empty URL keeps the cache in process
    #[serde(default)]
    pub redis: RedisConfig,

    /// Logging and metrics
    #[serde(default)]
    pub monitoring: MonitoringConfig,
}

/// Bucket cache configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CacheConfig {
    /// Use the bucket cache at all
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Lifetime of a cache record in seconds
    #[serde(default = "default_ttl_secs")]
    pub ttl_secs: u64,

    /// Trailing window (seconds before now) that is never cached
    #[serde(default = "default_flux_interval_secs")]
    pub flux_interval_secs: u64,

    /// Entry bound of the in-process store
    #[serde(default = "default_memory_max_entries")]
    pub memory_max_entries: usize,
}

/// Execution configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ExecutionConfig {
    /// Sub-queries of one request executed at the same time
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,

    /// Missing ranges of one sub-query executed at the same time
    #[serde(default = "default_missing_range_parallelism")]
    pub missing_range_parallelism: usize,

    /// Deadline of one sub-query in milliseconds
    #[serde(default = "default_query_timeout_ms")]
    pub query_timeout_ms: u64,

    /// Documentation link attached to response warnings
    #[serde(default)]
    pub warnings_doc_url: String,
}

/// Redis store configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RedisConfig {
    /// Server URL
    #[serde(default)]
    pub url: String,

    /// Maximum in-flight commands
    #[serde(default = "default_pool_size")]
    pub pool_size: u32,

    /// Command timeout in milliseconds
    #[serde(default = "default_command_timeout_ms")]
    pub command_timeout_ms: u64,

    /// Connection timeout in milliseconds
    #[serde(default = "default_connection_timeout_ms")]
    pub connection_timeout_ms: u64,

    /// Retries of a failed command
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
}

/// Monitoring configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct MonitoringConfig {
    /// Log level directive, `RUST_LOG` syntax
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Emit JSON log lines
    #[serde(default)]
    pub json_logs: bool,

    /// Record prometheus metrics
    #[serde(default = "default_true")]
    pub metrics_enabled: bool,
}

fn default_ttl_secs() -> u64 { 168 * 3600 }
fn default_flux_interval_secs() -> u64 { 300 }
fn default_memory_max_entries() -> usize { 10_000 }
fn default_max_concurrency() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(4)
}
fn default_missing_range_parallelism() -> usize { 4 }
fn default_query_timeout_ms() -> u64 { 60_000 }
fn default_pool_size() -> u32 { 16 }
fn default_command_timeout_ms() -> u64 { 1_000 }
fn default_connection_timeout_ms() -> u64 { 5_000 }
fn default_max_retries() -> u32 { 3 }
fn default_log_level() -> String { "info".to_string() }
fn default_true() -> bool { true }

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            ttl_secs: default_ttl_secs(),
            flux_interval_secs: default_flux_interval_secs(),
            memory_max_entries: default_memory_max_entries(),
        }
    }
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            max_concurrency: default_max_concurrency(),
            missing_range_parallelism: default_missing_range_parallelism(),
            query_timeout_ms: default_query_timeout_ms(),
            warnings_doc_url: String::new(),
        }
    }
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            pool_size: default_pool_size(),
            command_timeout_ms: default_command_timeout_ms(),
            connection_timeout_ms: default_connection_timeout_ms(),
            max_retries: default_max_retries(),
        }
    }
}

impl Default for MonitoringConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            json_logs: false,
            metrics_enabled: true,
        }
    }
}

impl CacheConfig {
    /// Bucket cache settings derived from this section
    pub fn bucket_cache_config(&self) -> BucketCacheConfig {
        BucketCacheConfig::default()
            .with_ttl(Duration::from_secs(self.ttl_secs))
            .with_flux_interval(Duration::from_secs(self.flux_interval_secs))
    }
}

impl RedisConfig {
    /// Store settings, `None` when no URL is configured
    pub fn store_config(&self) -> Option<RedisStoreConfig> {
        if self.url.is_empty() {
            return None;
        }
        Some(RedisStoreConfig {
            url: self.url.clone(),
            pool_size: self.pool_size,
            connection_timeout: Duration::from_millis(self.connection_timeout_ms),
            command_timeout: Duration::from_millis(self.command_timeout_ms),
            retry_policy: RetryPolicy {
                max_retries: self.max_retries,
                ..Default::default()
            },
        })
    }
}

impl QuerierConfig {
    /// Load configuration from TOML file
    pub fn from_file(path: &str) -> Result<Self> {
        let contents = std::fs::read_to_string(path).map_err(|e| {
            Error::Configuration(format!("Failed to read config file {}: {}", path, e))
        })?;

        toml::from_str(&contents).map_err(|e| {
            Error::Configuration(format!("Failed to parse config file {}: {}", path, e))
        })
    }

    /// Load configuration with environment variable overrides
    pub fn from_file_with_env(path: &str) -> Result<Self> {
        let mut config = Self::from_file(path)?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Load from environment variables only
    pub fn from_env() -> Self {
        let mut config = Self::default();
        config.apply_env_overrides();
        config
    }

    /// Apply environment variable overrides
    ///
    /// Unparsable numeric values are ignored.
    pub fn apply_env_overrides(&mut self) {
        // Cache
        if let Some(ttl) = env_parse("QUERIER_CACHE_TTL_SECS") {
            self.cache.ttl_secs = ttl;
        }
        if let Some(flux) = env_parse("QUERIER_FLUX_INTERVAL_SECS") {
            self.cache.flux_interval_secs = flux;
        }

        // Execution
        if let Some(max) = env_parse("QUERIER_MAX_CONCURRENCY") {
            self.execution.max_concurrency = max;
        }

        // Redis
        if let Ok(url) = std::env::var("QUERIER_REDIS_URL") {
            self.redis.url = url;
        }

        // Monitoring
        if let Ok(log_level) = std::env::var("RUST_LOG") {
            self.monitoring.log_level = log_level;
        }
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.cache.enabled && self.cache.ttl_secs == 0 {
            return Err(Error::Configuration("Cache TTL must be > 0".to_string()));
        }
        if self.cache.ttl_secs > 0 && self.cache.flux_interval_secs >= self.cache.ttl_secs {
            return Err(Error::Configuration(
                "Flux interval must be shorter than the cache TTL".to_string(),
            ));
        }

        if self.execution.max_concurrency == 0 {
            return Err(Error::Configuration("Max concurrency must be > 0".to_string()));
        }
        if self.execution.missing_range_parallelism == 0 {
            return Err(Error::Configuration(
                "Missing range parallelism must be > 0".to_string(),
            ));
        }
        if self.execution.query_timeout_ms == 0 {
            return Err(Error::Configuration("Query timeout must be > 0".to_string()));
        }

        if !self.redis.url.is_empty() {
            url::Url::parse(&self.redis.url).map_err(|e| {
                Error::Configuration(format!("Invalid redis URL: {}", e))
            })?;
            if self.redis.pool_size == 0 {
                return Err(Error::Configuration("Redis pool size must be > 0".to_string()));
            }
        }

        Ok(())
    }

    /// Save configuration to TOML file
    pub fn save_to_file(&self, path: &str) -> Result<()> {
        let contents = toml::to_string_pretty(self)
            .map_err(|e| Error::Configuration(format!("Failed to serialize config: {}", e)))?;

        std::fs::write(path, contents)?;
        Ok(())
    }
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok().and_then(|v| v.parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = QuerierConfig::default();
        assert_eq!(config.cache.ttl_secs, 604_800);
        assert_eq!(config.cache.flux_interval_secs, 300);
        assert_eq!(config.execution.missing_range_parallelism, 4);
        assert!(config.monitoring.metrics_enabled);
        assert!(config.redis.store_config().is_none());
    }

    #[test]
    fn test_config_validation() {
        let config = QuerierConfig::default();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_flux_must_be_shorter_than_ttl() {
        let mut config = QuerierConfig::default();
        config.cache.ttl_secs = 60;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_invalid_redis_url() {
        let mut config = QuerierConfig::default();
        config.redis.url = "not a url".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let config: QuerierConfig = toml::from_str(
            r#"
            [cache]
            flux_interval_secs = 600

            [redis]
            url = "redis://cache:6379"
            "#,
        )
        .unwrap();

        assert_eq!(config.cache.flux_interval_secs, 600);
        assert_eq!(config.cache.ttl_secs, 604_800);
        let store = config.redis.store_config().unwrap();
        assert_eq!(store.url, "redis://cache:6379");
        assert_eq!(store.command_timeout, Duration::from_secs(1));
    }

    #[test]
    fn test_save_and_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("querier.toml");
        let path = path.to_str().unwrap();

        let mut config = QuerierConfig::default();
        config.execution.max_concurrency = 3;
        config.save_to_file(path).unwrap();

        let loaded = QuerierConfig::from_file(path).unwrap();
        assert_eq!(loaded.execution.max_concurrency, 3);
    }

    #[test]
    fn test_missing_file_is_configuration_error() {
        let err = QuerierConfig::from_file("/nonexistent/querier.toml").unwrap_err();
        assert!(matches!(err, Error::Configuration(_)));
    }

    #[test]
    fn test_env_override() {
        std::env::set_var("QUERIER_FLUX_INTERVAL_SECS", "120");
        let config = QuerierConfig::from_env();
        assert_eq!(config.cache.flux_interval_secs, 120);
        std::env::remove_var("QUERIER_FLUX_INTERVAL_SECS");
    }

    #[test]
    fn test_bucket_cache_config() {
        let config = CacheConfig::default().bucket_cache_config();
        assert_eq!(config.flux_interval, Duration::from_secs(300));
        assert_eq!(config.ttl, Duration::from_secs(604_800));
    }
}
