//! Error types for counter storage operations.
//!
//! Foreground operations return these errors to the caller. Background
//! synchronization paths (the write-through worker and periodic ticks) never
//! propagate them; they are logged and the next sync trigger tries again.

use std::time::Duration;
use thiserror::Error;

/// Result type for counter storage operations.
pub type Result<T> = std::result::Result<T, WindowStoreError>;

/// Main error type for counter storage operations.
#[derive(Debug, Error)]
pub enum WindowStoreError {
    /// Storage backend error.
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Connection error (e.g., Redis connection failed).
    #[error("Connection error: {0}")]
    Connection(#[from] ConnectionError),
}

impl WindowStoreError {
    /// Check if retrying the same operation later may succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Storage(e) => e.is_retryable(),
            Self::Connection(_) => true,
            Self::Config(_) => false,
        }
    }
}

/// Storage-related errors.
#[derive(Debug, Error)]
pub enum StorageError {
    /// Generic storage operation failed.
    #[error("{message}")]
    OperationFailed {
        /// Error message.
        message: String,
        /// Whether the operation can be retried.
        retryable: bool,
    },

    /// The remote store answered without a total for a key it was sent.
    #[error("Key not found: {0}")]
    KeyNotFound(String),

    /// Serialization/deserialization error.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Connection pool exhausted.
    #[error("Connection pool exhausted")]
    PoolExhausted,
}

impl StorageError {
    /// Create a new operation failed error.
    pub fn operation_failed(message: impl Into<String>, retryable: bool) -> Self {
        Self::OperationFailed {
            message: message.into(),
            retryable,
        }
    }

    /// Check if this error is retryable.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::OperationFailed { retryable, .. } => *retryable,
            Self::PoolExhausted => true,
            _ => false,
        }
    }
}

/// Configuration-related errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Window length is zero or otherwise unusable.
    #[error("Invalid window: {0}")]
    InvalidWindow(String),

    /// Synchronization period is zero or otherwise unusable.
    #[error("Invalid synchronization period: {0}")]
    InvalidPeriod(String),
}

/// Connection-related errors.
#[derive(Debug, Error)]
pub enum ConnectionError {
    /// Failed to connect.
    #[error("Failed to connect: {0}")]
    ConnectionFailed(String),

    /// Connection timeout.
    #[error("Connection timeout after {0:?}")]
    Timeout(Duration),

    /// Connection closed unexpectedly.
    #[error("Connection closed unexpectedly")]
    Closed,
}
