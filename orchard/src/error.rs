//! Error types for cache operations
//!
//! This module defines the error taxonomy for the orchard library. Input
//! errors (`InvalidKey`, `MissingKey`, `MissingValue`) are never retried,
//! `Priming` wraps a failed value producer, and `Store` / `StoreUnavailable`
//! describe the remote key-value store. Only the store variants are ever
//! recovered locally, and only when fail-through is enabled.

use thiserror::Error;

/// Main error type for cache operations
///
/// Errors are `Clone` because one in-flight resolution hands the same
/// outcome to every caller waiting on the same key.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum OrchardError {
    /// The key specification could not be turned into a cache key
    #[error("Invalid key: {0}")]
    InvalidKey(String),

    /// No key was supplied to a cache request
    #[error("missing required parameter: key")]
    MissingKey,

    /// No value was supplied to a cache request
    #[error("missing required parameter: value")]
    MissingValue,

    /// The value producer failed or its future rejected
    #[error("Priming failed for {key}: {message}")]
    Priming { key: String, message: String },

    /// The remote store rejected or failed an operation
    #[error("Store error: {0}")]
    Store(String),

    /// The remote store is known to be unreachable
    #[error("Store unavailable: {0}")]
    StoreUnavailable(String),

    /// Serialization/Deserialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),
}

impl OrchardError {
    /// Whether this error came from the remote store rather than the caller
    pub fn is_store_error(&self) -> bool {
        matches!(self, OrchardError::Store(_) | OrchardError::StoreUnavailable(_))
    }
}

/// Result type alias for cache operations
pub type Result<T> = std::result::Result<T, OrchardError>;

impl From<serde_json::Error> for OrchardError {
    fn from(e: serde_json::Error) -> Self {
        OrchardError::Serialization(e.to_string())
    }
}

#[cfg(feature = "redis")]
impl From<redis::RedisError> for OrchardError {
    fn from(e: redis::RedisError) -> Self {
        if e.is_io_error() || e.is_connection_refusal() || e.is_connection_dropped() {
            OrchardError::StoreUnavailable(e.to_string())
        } else {
            OrchardError::Store(e.to_string())
        }
    }
}
