//! Error types for rate limiting operations.
//!
//! A rejected request is *not* an error: limiters return a
//! [`RateLimit`](crate::RateLimit) value with `is_accepted() == false`.
//! The types here cover everything else: storage failures, invalid
//! requests, unsupported operations and bad configuration.

use std::time::Duration;
use thiserror::Error;

use crate::rate_limit::RateLimit;

/// Result type for rate limiting operations.
pub type Result<T> = std::result::Result<T, RateLimitError>;

/// Main error type for rate limiting operations.
#[derive(Debug, Error)]
pub enum RateLimitError {
    /// Storage backend error.
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// The request can never be satisfied (zero tokens, or more tokens than
    /// the policy can ever hold).
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// The policy cannot hand out reservations.
    #[error("Reservation is not supported by the {policy} policy")]
    ReserveNotSupported {
        /// Name of the policy that refused.
        policy: &'static str,
    },

    /// A reservation would have to wait longer than the caller allowed.
    #[error("Reservation would wait {wait:?}, more than the allowed {max_wait:?}")]
    MaxWaitDurationExceeded {
        /// Time the caller would have had to wait.
        wait: Duration,
        /// Maximum wait the caller accepted.
        max_wait: Duration,
        /// State of the limiter at the time of the attempt.
        rate_limit: RateLimit,
    },

    /// Rate limit exceeded with retry information.
    ///
    /// Only produced by [`RateLimit::ensure_accepted`].
    #[error("Rate limit exceeded, retry after {retry_after} ms since epoch")]
    RateLimitExceeded {
        /// Instant (Unix milliseconds) after which a retry may succeed.
        retry_after: u64,
        /// Current remaining quota.
        remaining: u64,
        /// Maximum quota limit.
        limit: u64,
    },
}

impl RateLimitError {
    /// Shorthand for an [`InvalidRequest`](Self::InvalidRequest) error.
    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::InvalidRequest(message.into())
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

    /// Serialization/deserialization error.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Every compare-and-swap attempt lost against a concurrent writer.
    #[error("Gave up on {key} after {attempts} conflicting writes")]
    ConflictRetriesExhausted {
        /// Subject key being updated.
        key: String,
        /// Number of attempts made.
        attempts: u32,
    },

    /// The advisory lock could not be acquired.
    #[error("Lock error: {0}")]
    Lock(String),
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
            Self::ConflictRetriesExhausted { .. } => true,
            Self::Lock(_) => true,
            Self::Serialization(_) => false,
        }
    }
}

/// Configuration-related errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Invalid limit (must be positive).
    #[error("Invalid limit: {0}")]
    InvalidLimit(String),

    /// Invalid interval or rate.
    #[error("Invalid rate: {0}")]
    InvalidRate(String),

    /// Invalid policy configuration.
    #[error("Invalid policy configuration: {0}")]
    InvalidPolicy(String),

    /// Missing required configuration.
    #[error("Missing required configuration: {0}")]
    MissingRequired(String),

    /// A compound limiter needs at least one member.
    #[error("A compound limiter needs at least one limiter")]
    EmptyCompound,

    /// The configuration document could not be parsed.
    #[error("Unparseable configuration: {0}")]
    Parse(String),
}
