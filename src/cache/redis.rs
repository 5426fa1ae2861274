//! Redis-backed cache store
//!
//! Stores each record with `SET <org>:<key> <bytes> PX <ttl>` over a single
//! multiplexed async connection. Commands are bounded by a timeout and
//! retried with exponential backoff on transient failures.
//!
//! Error messages never carry credentials: URLs are redacted and Redis
//! errors are reduced to their kind before they leave this module.
//!
//! # Example
//!
//! ```rust,no_run
//! use kuba_querier::cache::{RedisCacheStore, RedisStoreConfig};
//! use std::time::Duration;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = RedisStoreConfig::with_url("redis://localhost:6379")
//!     .command_timeout(Duration::from_millis(500));
//! let store = RedisCacheStore::connect(config).await?;
//! # Ok(())
//! # }
//! ```

use super::store::{namespaced_key, CacheStore};
use crate::error::CacheStoreError;
use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use redis::{Client, RedisError};
use std::time::{Duration, Instant};
use tokio::sync::{RwLock, Semaphore};
use tracing::{debug, warn};
use url::Url;

/// Connection settings for [`RedisCacheStore`]
#[derive(Clone, Debug)]
pub struct RedisStoreConfig {
    /// Redis server URL (e.g., "redis://localhost:6379")
    pub url: String,

    /// Maximum number of in-flight commands
    /// Default: 16
    pub pool_size: u32,

    /// Timeout for establishing the connection
    /// Default: 5 seconds
    pub connection_timeout: Duration,

    /// Timeout for individual commands
    /// Default: 1 second
    pub command_timeout: Duration,

    /// Retry policy for failed commands
    pub retry_policy: RetryPolicy,
}

impl Default for RedisStoreConfig {
    fn default() -> Self {
        Self {
            url: "redis://127.0.0.1:6379".to_string(),
            pool_size: 16,
            connection_timeout: Duration::from_secs(5),
            command_timeout: Duration::from_secs(1),
            retry_policy: RetryPolicy::default(),
        }
    }
}

impl RedisStoreConfig {
    /// Create a config for `url`
    pub fn with_url(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Default::default()
        }
    }

    /// Set the in-flight command bound
    pub fn pool_size(mut self, size: u32) -> Self {
        self.pool_size = size;
        self
    }

    /// Set the connection timeout
    pub fn connection_timeout(mut self, timeout: Duration) -> Self {
        self.connection_timeout = timeout;
        self
    }

    /// Set the command timeout
    pub fn command_timeout(mut self, timeout: Duration) -> Self {
        self.command_timeout = timeout;
        self
    }

    /// Set the retry policy
    pub fn retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = policy;
        self
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), String> {
        if self.url.is_empty() {
            return Err("Redis URL cannot be empty".to_string());
        }
        if !self.url.starts_with("redis://") && !self.url.starts_with("rediss://") {
            return Err("Redis URL must use the 'redis://' or 'rediss://' scheme".to_string());
        }
        if self.pool_size == 0 {
            return Err("Pool size must be greater than 0".to_string());
        }
        if self.pool_size > 1000 {
            return Err("Pool size cannot exceed 1000".to_string());
        }
        if self.command_timeout.is_zero() {
            return Err("Command timeout must be greater than 0".to_string());
        }
        Ok(())
    }
}

/// Retry policy with exponential backoff
#[derive(Clone, Debug)]
pub struct RetryPolicy {
    /// Maximum number of retry attempts
    /// Default: 3
    pub max_retries: u32,

    /// Initial delay between retries
    /// Default: 50ms
    pub initial_delay: Duration,

    /// Maximum delay between retries
    /// Default: 2 seconds
    pub max_delay: Duration,

    /// Multiplier for exponential backoff
    /// Default: 2.0
    pub multiplier: f64,

    /// Add up to 25% random jitter to delays
    /// Default: true
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay: Duration::from_millis(50),
            max_delay: Duration::from_secs(2),
            multiplier: 2.0,
            jitter: true,
        }
    }
}

impl RetryPolicy {
    /// Policy that never retries
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            ..Default::default()
        }
    }

    /// Delay before retry `attempt` (0-indexed)
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let base = self.initial_delay.as_millis() as f64 * self.multiplier.powi(attempt as i32);
        let delay_ms = base.min(self.max_delay.as_millis() as f64);

        let delay_ms = if self.jitter {
            delay_ms * (1.0 + rand::random::<f64>() * 0.25)
        } else {
            delay_ms
        };

        Duration::from_millis(delay_ms as u64)
    }

    /// Whether another attempt is allowed after `attempt`
    pub fn should_retry(&self, attempt: u32) -> bool {
        attempt < self.max_retries
    }
}

/// Cache store backed by Redis
pub struct RedisCacheStore {
    client: Client,
    connection: RwLock<Option<MultiplexedConnection>>,
    config: RedisStoreConfig,
    semaphore: Semaphore,
}

impl RedisCacheStore {
    /// Open a client and establish the initial connection
    pub async fn connect(config: RedisStoreConfig) -> Result<Self, CacheStoreError> {
        config.validate().map_err(CacheStoreError::Connection)?;

        let client = Client::open(config.url.as_str())
            .map_err(|e| CacheStoreError::Connection(safe_redis_error(&config.url, &e)))?;

        let store = Self {
            client,
            connection: RwLock::new(None),
            semaphore: Semaphore::new(config.pool_size as usize),
            config,
        };
        store.reconnect().await?;

        debug!(url = %sanitize_url(&store.config.url), "Redis cache store connected");
        Ok(store)
    }

    /// Store configuration
    pub fn config(&self) -> &RedisStoreConfig {
        &self.config
    }

    async fn reconnect(&self) -> Result<MultiplexedConnection, CacheStoreError> {
        let start = Instant::now();
        let conn = tokio::time::timeout(
            self.config.connection_timeout,
            self.client.get_multiplexed_async_connection(),
        )
        .await
        .map_err(|_| CacheStoreError::Timeout("Redis connection timeout".to_string()))?
        .map_err(|e| CacheStoreError::Connection(safe_redis_error(&self.config.url, &e)))?;

        *self.connection.write().await = Some(conn.clone());
        debug!("Redis connection established in {:?}", start.elapsed());
        Ok(conn)
    }

    async fn connection(&self) -> Result<MultiplexedConnection, CacheStoreError> {
        let existing = self.connection.read().await.clone();
        match existing {
            Some(conn) => Ok(conn),
            None => self.reconnect().await,
        }
    }

    /// Run a command with timeout and retry
    async fn execute<F, Fut, T>(&self, f: F) -> Result<T, CacheStoreError>
    where
        F: Fn(MultiplexedConnection) -> Fut,
        Fut: std::future::Future<Output = Result<T, RedisError>>,
    {
        let _permit = self
            .semaphore
            .acquire()
            .await
            .map_err(|_| CacheStoreError::Connection("Semaphore closed".to_string()))?;
        let policy = &self.config.retry_policy;
        let mut attempt = 0;

        loop {
            let conn = self.connection().await?;
            let result = tokio::time::timeout(self.config.command_timeout, f(conn)).await;

            match result {
                Ok(Ok(value)) => return Ok(value),
                Ok(Err(e)) => {
                    if policy.should_retry(attempt) && is_retriable_error(&e) {
                        let delay = policy.delay_for_attempt(attempt);
                        warn!(
                            "Redis command failed (attempt {}), retrying in {:?}: {}",
                            attempt + 1,
                            delay,
                            safe_redis_error(&self.config.url, &e)
                        );
                        tokio::time::sleep(delay).await;
                        if is_connection_error(&e) {
                            let _ = self.reconnect().await;
                        }
                        attempt += 1;
                        continue;
                    }
                    return Err(CacheStoreError::Backend(safe_redis_error(
                        &self.config.url,
                        &e,
                    )));
                }
                Err(_) => {
                    if policy.should_retry(attempt) {
                        let delay = policy.delay_for_attempt(attempt);
                        warn!(
                            "Redis command timeout (attempt {}), retrying in {:?}",
                            attempt + 1,
                            delay
                        );
                        tokio::time::sleep(delay).await;
                        attempt += 1;
                        continue;
                    }
                    return Err(CacheStoreError::Timeout("Redis command timeout".to_string()));
                }
            }
        }
    }
}

#[async_trait]
impl CacheStore for RedisCacheStore {
    async fn get(&self, org_id: &str, key: &str) -> Result<Vec<u8>, CacheStoreError> {
        let full = namespaced_key(org_id, key);
        let value: Option<Vec<u8>> = self
            .execute(|mut conn| {
                let full = full.clone();
                async move { redis::cmd("GET").arg(full).query_async(&mut conn).await }
            })
            .await?;
        value.ok_or(CacheStoreError::NotFound(full))
    }

    async fn set(
        &self,
        org_id: &str,
        key: &str,
        value: Vec<u8>,
        ttl: Duration,
    ) -> Result<(), CacheStoreError> {
        let full = namespaced_key(org_id, key);
        let ttl_ms = (ttl.as_millis() as u64).max(1);
        self.execute(|mut conn| {
            let full = full.clone();
            let value = value.clone();
            async move {
                redis::cmd("SET")
                    .arg(full)
                    .arg(value)
                    .arg("PX")
                    .arg(ttl_ms)
                    .query_async::<()>(&mut conn)
                    .await
            }
        })
        .await
    }

    async fn delete(&self, org_id: &str, key: &str) -> Result<(), CacheStoreError> {
        let full = namespaced_key(org_id, key);
        self.execute(|mut conn| {
            let full = full.clone();
            async move { redis::cmd("DEL").arg(full).query_async::<()>(&mut conn).await }
        })
        .await
    }
}

fn is_retriable_error(e: &RedisError) -> bool {
    e.is_connection_dropped()
        || e.is_timeout()
        || e.is_io_error()
        || matches!(e.kind(), redis::ErrorKind::BusyLoadingError)
}

fn is_connection_error(e: &RedisError) -> bool {
    e.is_connection_dropped() || e.is_io_error()
}

// ============================================================================
// Credential redaction
// ============================================================================

/// Redact username and password from a Redis URL
pub fn sanitize_url(url: &str) -> String {
    match Url::parse(url) {
        Ok(mut parsed) => {
            if parsed.password().is_some() {
                let _ = parsed.set_password(Some("***"));
            }
            if !parsed.username().is_empty() {
                let _ = parsed.set_username("***");
            }
            parsed.to_string()
        }
        Err(_) => "[invalid-url]".to_string(),
    }
}

/// Error message naming the target host and the error kind only
pub fn safe_redis_error(url: &str, err: &RedisError) -> String {
    let kind = match err.kind() {
        redis::ErrorKind::ResponseError => "Response error",
        redis::ErrorKind::AuthenticationFailed => "Authentication failed",
        redis::ErrorKind::TypeError => "Type error",
        redis::ErrorKind::BusyLoadingError => "Server loading data",
        redis::ErrorKind::InvalidClientConfig => "Invalid client config",
        redis::ErrorKind::TryAgain => "Try again",
        redis::ErrorKind::ReadOnly => "Read-only operation",
        redis::ErrorKind::IoError => "IO error",
        redis::ErrorKind::ClientError => "Client error",
        redis::ErrorKind::ParseError => "Parse error",
        _ => "Unknown error",
    };

    match Url::parse(url)
        .ok()
        .and_then(|u| Some((u.host_str()?.to_string(), u.port().unwrap_or(6379))))
    {
        Some((host, port)) => format!("Redis error at {}:{}: {}", host, port, kind),
        None => format!("Redis error at {}: {}", sanitize_url(url), kind),
    }
}
