//! Error types for the querier

use thiserror::Error;

use crate::query::error::QueryError;

/// Main error type for the querier
#[derive(Error, Debug)]
pub enum Error {
    /// Cache store error
    #[error("Cache store error: {0}")]
    CacheStore(#[from] CacheStoreError),

    /// Query error
    #[error("Query error: {0}")]
    Query(#[from] QueryError),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}

/// Errors returned by a cache store backend
///
/// `NotFound` is the normal signal for an absent key and is handled as a
/// full miss by the bucket cache. Every other variant is a real failure.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CacheStoreError {
    /// Key does not exist (or has expired)
    #[error("Key not found: {0}")]
    NotFound(String),

    /// Could not reach the backend
    #[error("Connection error: {0}")]
    Connection(String),

    /// Backend did not answer in time
    #[error("Timeout: {0}")]
    Timeout(String),

    /// Stored payload could not be encoded or decoded
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Any other backend failure
    #[error("Backend error: {0}")]
    Backend(String),
}

impl CacheStoreError {
    /// Whether this error is the "key absent" signal
    pub fn is_not_found(&self) -> bool {
        matches!(self, CacheStoreError::NotFound(_))
    }
}

/// Result type alias using the crate error
pub type Result<T> = std::result::Result<T, Error>;
