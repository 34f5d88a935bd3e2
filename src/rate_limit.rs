//! Result of a consume attempt.
//!
//! Every call to [`Limiter::consume`](crate::Limiter::consume) produces a
//! `RateLimit`, accepted or not. Rejection is an ordinary value; callers that
//! prefer fail-fast style use [`RateLimit::ensure_accepted`].

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use crate::error::{RateLimitError, Result};

/// The outcome of a rate limit check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimit {
    /// Whether the tokens were granted.
    accepted: bool,
    /// Tokens still available to the subject.
    remaining_tokens: u64,
    /// Instant (Unix ms) at which enough tokens are expected to be available.
    retry_after: u64,
    /// Configured ceiling, informational.
    limit: u64,
}

impl RateLimit {
    /// Create a new "accepted" result.
    pub fn accepted(remaining_tokens: u64, retry_after: u64, limit: u64) -> Self {
        Self {
            accepted: true,
            remaining_tokens,
            retry_after,
            limit,
        }
    }

    /// Create a new "rejected" result.
    pub fn rejected(remaining_tokens: u64, retry_after: u64, limit: u64) -> Self {
        Self {
            accepted: false,
            remaining_tokens,
            retry_after,
            limit,
        }
    }

    /// Check if the tokens were granted.
    pub fn is_accepted(&self) -> bool {
        self.accepted
    }

    /// Check if the tokens were refused.
    pub fn is_rejected(&self) -> bool {
        !self.accepted
    }

    /// Tokens still available.
    pub fn remaining_tokens(&self) -> u64 {
        self.remaining_tokens
    }

    /// Retry instant in Unix milliseconds.
    pub fn retry_after_ms(&self) -> u64 {
        self.retry_after
    }

    /// Retry instant as wall-clock time.
    pub fn retry_after(&self) -> SystemTime {
        UNIX_EPOCH + Duration::from_millis(self.retry_after)
    }

    /// How long to wait, measured from `now_ms`, before retrying.
    pub fn wait_duration(&self, now_ms: u64) -> Duration {
        Duration::from_millis(self.retry_after.saturating_sub(now_ms))
    }

    /// Configured ceiling.
    pub fn limit(&self) -> u64 {
        self.limit
    }

    /// Return `self` if accepted, otherwise a
    /// [`RateLimitExceeded`](RateLimitError::RateLimitExceeded) error
    /// carrying the remaining tokens and retry instant.
    pub fn ensure_accepted(self) -> Result<Self> {
        if self.accepted {
            Ok(self)
        } else {
            Err(RateLimitError::RateLimitExceeded {
                retry_after: self.retry_after,
                remaining: self.remaining_tokens,
                limit: self.limit,
            })
        }
    }
}
