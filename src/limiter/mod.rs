//! Rate limiting policies.
//!
//! Every policy implements the object-safe [`Limiter`] trait, so policies can
//! be mixed freely inside a [`CompoundLimiter`].
//!
//! # Available Policies
//!
//! | Policy | Burst at window edges | Reserve | State |
//! |--------|-----------------------|---------|-------|
//! | Fixed Window | Up to 2x limit | Yes | [`Window`](crate::state::Window) |
//! | Sliding Window | Smoothed | No | [`Window`](crate::state::Window) |
//! | Token Bucket | Up to capacity | Yes | [`TokenBucketState`](crate::state::TokenBucketState) |
//! | No Limit | n/a | Yes | none |
//! | Compound | strictest member | No | members' |
//!
//! A limiter instance is a cheap handle bound to one subject key; all
//! accounting lives in storage, so any number of handles for the same key
//! (in one process or many) see the same quota.

mod compound;
mod fixed_window;
mod no_limit;
mod sliding_window;
mod token_bucket;

pub use compound::CompoundLimiter;
pub use fixed_window::FixedWindowLimiter;
pub use no_limit::NoLimiter;
pub use sliding_window::SlidingWindowLimiter;
pub use token_bucket::TokenBucketLimiter;

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, RateLimitError, Result};
use crate::rate_limit::RateLimit;
use crate::reservation::Reservation;

/// Slack for floating point comparisons on fractional token counts.
pub(crate) const EPSILON: f64 = 1e-9;

/// Rate limiting policy kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Policy {
    /// Counter reset at fixed interval boundaries.
    FixedWindow,
    /// Counter blended with the previous interval.
    SlidingWindow,
    /// Continuously refilled bucket.
    TokenBucket,
    /// Accept everything.
    NoLimit,
    /// Conjunction of other limiters.
    Compound,
}

impl Policy {
    /// Snake-case name, as used in configuration.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::FixedWindow => "fixed_window",
            Self::SlidingWindow => "sliding_window",
            Self::TokenBucket => "token_bucket",
            Self::NoLimit => "no_limit",
            Self::Compound => "compound",
        }
    }
}

impl fmt::Display for Policy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A rate limiter bound to one subject key.
///
/// Rejection is reported through [`RateLimit::is_accepted`], never as an
/// error; errors mean the decision could not be made (storage failure,
/// invalid request, unsupported operation).
#[async_trait]
pub trait Limiter: Send + Sync {
    /// Subject key this limiter accounts against.
    fn id(&self) -> &str;

    /// Policy kind.
    fn policy(&self) -> Policy;

    /// Try to take `tokens` now.
    async fn consume(&self, tokens: u64) -> Result<RateLimit>;

    /// Commit `tokens` now for use at a (possibly future) instant.
    ///
    /// With `max_wait` set, fails with
    /// [`MaxWaitDurationExceeded`](RateLimitError::MaxWaitDurationExceeded)
    /// instead of reserving further out than that.
    async fn reserve(&self, _tokens: u64, _max_wait: Option<Duration>) -> Result<Reservation> {
        Err(RateLimitError::ReserveNotSupported {
            policy: self.policy().as_str(),
        })
    }

    /// Give back `tokens` taken earlier. Best effort compensation.
    async fn release(&self, tokens: u64) -> Result<()>;

    /// What a caller would observe right now, without consuming anything.
    async fn peek(&self) -> Result<RateLimit>;

    /// Forget all consumption for this subject.
    async fn reset(&self) -> Result<()>;
}

#[async_trait]
impl<L: Limiter + ?Sized> Limiter for Arc<L> {
    fn id(&self) -> &str {
        (**self).id()
    }

    fn policy(&self) -> Policy {
        (**self).policy()
    }

    async fn consume(&self, tokens: u64) -> Result<RateLimit> {
        (**self).consume(tokens).await
    }

    async fn reserve(&self, tokens: u64, max_wait: Option<Duration>) -> Result<Reservation> {
        (**self).reserve(tokens, max_wait).await
    }

    async fn release(&self, tokens: u64) -> Result<()> {
        (**self).release(tokens).await
    }

    async fn peek(&self) -> Result<RateLimit> {
        (**self).peek().await
    }

    async fn reset(&self) -> Result<()> {
        (**self).reset().await
    }
}

#[async_trait]
impl<L: Limiter + ?Sized> Limiter for Box<L> {
    fn id(&self) -> &str {
        (**self).id()
    }

    fn policy(&self) -> Policy {
        (**self).policy()
    }

    async fn consume(&self, tokens: u64) -> Result<RateLimit> {
        (**self).consume(tokens).await
    }

    async fn reserve(&self, tokens: u64, max_wait: Option<Duration>) -> Result<Reservation> {
        (**self).reserve(tokens, max_wait).await
    }

    async fn release(&self, tokens: u64) -> Result<()> {
        (**self).release(tokens).await
    }

    async fn peek(&self) -> Result<RateLimit> {
        (**self).peek().await
    }

    async fn reset(&self) -> Result<()> {
        (**self).reset().await
    }
}

/// Zero tokens is never a meaningful request.
pub(crate) fn ensure_tokens(tokens: u64) -> Result<()> {
    if tokens == 0 {
        return Err(RateLimitError::invalid_request(
            "tokens must be a positive integer",
        ));
    }
    Ok(())
}

pub(crate) fn ensure_limit(limit: u64) -> Result<()> {
    if limit == 0 {
        return Err(ConfigError::InvalidLimit("limit must be greater than 0".into()).into());
    }
    Ok(())
}

/// Interval in whole milliseconds, at least one and at most `u64::MAX`.
pub(crate) fn interval_ms(interval: Duration) -> Result<u64> {
    match u64::try_from(interval.as_millis()) {
        Ok(0) => Err(
            ConfigError::InvalidRate("interval must be at least one millisecond".into()).into(),
        ),
        Ok(ms) => Ok(ms),
        Err(_) => Err(ConfigError::InvalidRate(format!(
            "interval of {}s does not fit in u64 milliseconds",
            interval.as_secs()
        ))
        .into()),
    }
}

/// Whole tokens in a possibly fractional count.
pub(crate) fn whole_tokens(tokens: f64) -> u64 {
    (tokens + EPSILON).floor().max(0.0) as u64
}
