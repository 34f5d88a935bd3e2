//! Pass-through policy.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::clock::{self, Clock};
use crate::error::Result;
use crate::limiter::{Limiter, Policy, ensure_tokens};
use crate::rate_limit::RateLimit;
use crate::reservation::Reservation;

/// Accepts every request. Useful to switch limiting off through
/// configuration without changing call sites.
#[derive(Debug)]
pub struct NoLimiter {
    id: String,
    clock: Arc<dyn Clock>,
}

impl NoLimiter {
    /// Create a limiter that never limits `id`.
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            clock: clock::system(),
        }
    }

    /// Read time from `clock`.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    fn unlimited(&self) -> RateLimit {
        RateLimit::accepted(u64::MAX, self.clock.now_ms(), u64::MAX)
    }
}

#[async_trait]
impl Limiter for NoLimiter {
    fn id(&self) -> &str {
        &self.id
    }

    fn policy(&self) -> Policy {
        Policy::NoLimit
    }

    async fn consume(&self, tokens: u64) -> Result<RateLimit> {
        ensure_tokens(tokens)?;
        Ok(self.unlimited())
    }

    async fn reserve(&self, tokens: u64, _max_wait: Option<Duration>) -> Result<Reservation> {
        ensure_tokens(tokens)?;
        let limit = self.unlimited();
        Ok(Reservation::new(
            limit.retry_after_ms(),
            limit,
            self.clock.clone(),
        ))
    }

    async fn release(&self, _tokens: u64) -> Result<()> {
        Ok(())
    }

    async fn peek(&self) -> Result<RateLimit> {
        Ok(self.unlimited())
    }

    async fn reset(&self) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;

    #[tokio::test]
    async fn test_no_limit_always_accepts() {
        let clock = ManualClock::new(42);
        let limiter = NoLimiter::new("anything").with_clock(Arc::new(clock));

        for _ in 0..1_000 {
            let limit = limiter.consume(1_000_000).await.unwrap();
            assert!(limit.is_accepted());
            assert_eq!(limit.remaining_tokens(), u64::MAX);
            assert_eq!(limit.retry_after_ms(), 42);
        }

        let reservation = limiter.reserve(5, Some(Duration::ZERO)).await.unwrap();
        assert_eq!(reservation.wait_duration(), Duration::ZERO);
        assert!(limiter.consume(0).await.is_err());
    }
}
