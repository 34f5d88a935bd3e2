//! Token Bucket rate limiting policy.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, trace};

use crate::clock::{self, Clock};
use crate::error::{RateLimitError, Result};
use crate::limiter::{EPSILON, Limiter, Policy, ensure_limit, ensure_tokens, whole_tokens};
use crate::lock::KeyLock;
use crate::rate::Rate;
use crate::rate_limit::RateLimit;
use crate::reservation::Reservation;
use crate::state::{LimiterState, TokenBucketState};
use crate::storage::{StateStore, Step, Storage};

/// Token Bucket rate limiter.
///
/// Allows controlled bursts while enforcing an average rate limit.
/// Tokens are refilled continuously at `rate` up to `capacity`.
///
/// # Characteristics
///
/// - **Memory**: One fill level and timestamp per key
/// - **Burst**: Up to `capacity` at once
/// - **Reservations**: Supported; future refill is borrowed
///
/// # Example
///
/// ```ignore
/// use tollgate::{Limiter, MemoryStorage, Rate, TokenBucketLimiter};
///
/// let storage = Arc::new(MemoryStorage::new());
/// // bursts of 20, 5 more every second
/// let limiter = TokenBucketLimiter::new("user:42", 20, Rate::per_second(5), storage)?;
/// ```
pub struct TokenBucketLimiter<S> {
    id: String,
    capacity: u64,
    rate: Rate,
    store: StateStore<S>,
    clock: Arc<dyn Clock>,
}

impl<S> std::fmt::Debug for TokenBucketLimiter<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenBucketLimiter")
            .field("id", &self.id)
            .field("capacity", &self.capacity)
            .field("rate", &self.rate)
            .field("store", &self.store)
            .finish()
    }
}

impl<S: Storage> TokenBucketLimiter<S> {
    /// Create a bucket of `capacity` tokens refilled at `rate` for `id`.
    pub fn new(id: impl Into<String>, capacity: u64, rate: Rate, storage: Arc<S>) -> Result<Self> {
        ensure_limit(capacity)?;

        Ok(Self {
            id: id.into(),
            capacity,
            rate,
            store: StateStore::new(storage),
            clock: clock::system(),
        })
    }

    /// Read time from `clock`.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Serialise updates for this key through `lock`.
    pub fn with_lock(mut self, lock: Arc<dyn KeyLock>) -> Self {
        self.store.set_lock(lock);
        self
    }

    /// Give up after `max_retries` conflicting writes.
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.store.set_max_retries(max_retries);
        self
    }

    /// Maximum burst.
    pub fn capacity(&self) -> u64 {
        self.capacity
    }

    /// Refill rate.
    pub fn rate(&self) -> Rate {
        self.rate
    }

    /// Stored bucket refilled up to `now`, or a full one.
    ///
    /// A record written under another capacity or rate is discarded.
    fn current_bucket(&self, state: Option<LimiterState>, now: u64) -> TokenBucketState {
        let mut bucket = state
            .and_then(LimiterState::into_token_bucket)
            .filter(|b| b.capacity() == self.capacity && b.rate() == self.rate)
            .unwrap_or_else(|| TokenBucketState::new(&self.id, self.capacity, self.rate, now));
        bucket.refill(now);
        bucket
    }

    fn check_capacity(&self, tokens: u64) -> Result<()> {
        if tokens > self.capacity {
            return Err(RateLimitError::invalid_request(format!(
                "cannot take {tokens} tokens from a bucket of {}",
                self.capacity
            )));
        }
        Ok(())
    }

    /// Instant at which one more token is in the bucket.
    fn next_token_at(&self, bucket: &TokenBucketState, now: u64) -> u64 {
        now.saturating_add(bucket.wait_ms(1, now))
    }

    fn ttl(&self, bucket: &TokenBucketState, now: u64) -> Duration {
        Duration::from_millis(bucket.full_at(now).saturating_sub(now).max(1_000))
    }
}

#[async_trait]
impl<S: Storage> Limiter for TokenBucketLimiter<S> {
    fn id(&self) -> &str {
        &self.id
    }

    fn policy(&self) -> Policy {
        Policy::TokenBucket
    }

    async fn consume(&self, tokens: u64) -> Result<RateLimit> {
        ensure_tokens(tokens)?;
        self.check_capacity(tokens)?;

        let limit = self
            .store
            .update(&self.id, |current| {
                let now = self.clock.now_ms();
                let mut bucket = self.current_bucket(current, now);

                let output = if bucket.available_tokens() + EPSILON >= tokens as f64 {
                    bucket.take(tokens);
                    RateLimit::accepted(
                        whole_tokens(bucket.available_tokens()),
                        self.next_token_at(&bucket, now),
                        self.capacity,
                    )
                } else {
                    RateLimit::rejected(
                        whole_tokens(bucket.available_tokens()),
                        now.saturating_add(bucket.wait_ms(tokens, now)),
                        self.capacity,
                    )
                };

                // The refill is persisted either way.
                Ok(Step::Write {
                    ttl: self.ttl(&bucket, now),
                    state: bucket.into(),
                    output,
                })
            })
            .await?;

        trace!(
            key = %self.id,
            tokens,
            accepted = limit.is_accepted(),
            remaining = limit.remaining_tokens(),
            "Token bucket decision"
        );
        Ok(limit)
    }

    async fn reserve(&self, tokens: u64, max_wait: Option<Duration>) -> Result<Reservation> {
        ensure_tokens(tokens)?;
        self.check_capacity(tokens)?;

        let (time_to_act, rate_limit) = self
            .store
            .update(&self.id, |current| {
                let now = self.clock.now_ms();
                let mut bucket = self.current_bucket(current, now);

                let wait_ms = if bucket.available_tokens() + EPSILON >= tokens as f64 {
                    0
                } else {
                    bucket.wait_ms(tokens, now)
                };
                let wait = Duration::from_millis(wait_ms);
                let time_to_act = now.saturating_add(wait_ms);

                if let Some(max_wait) = max_wait
                    && wait > max_wait
                {
                    return Err(RateLimitError::MaxWaitDurationExceeded {
                        wait,
                        max_wait,
                        rate_limit: RateLimit::rejected(
                            whole_tokens(bucket.available_tokens()),
                            time_to_act,
                            self.capacity,
                        ),
                    });
                }

                let rate_limit = if wait_ms == 0 {
                    bucket.take(tokens);
                    RateLimit::accepted(
                        whole_tokens(bucket.available_tokens()),
                        self.next_token_at(&bucket, now),
                        self.capacity,
                    )
                } else {
                    bucket.borrow(tokens, now);
                    RateLimit::rejected(0, time_to_act, self.capacity)
                };

                Ok(Step::Write {
                    ttl: self.ttl(&bucket, now),
                    state: bucket.into(),
                    output: (time_to_act, rate_limit),
                })
            })
            .await?;

        debug!(key = %self.id, tokens, time_to_act, "Token bucket reservation");
        Ok(Reservation::new(time_to_act, rate_limit, self.clock.clone()))
    }

    async fn release(&self, tokens: u64) -> Result<()> {
        self.store
            .update(&self.id, |current| {
                let Some(current) = current else {
                    return Ok(Step::Keep(()));
                };
                let now = self.clock.now_ms();
                let mut bucket = self.current_bucket(Some(current), now);
                bucket.give_back(tokens, now);
                Ok(Step::Write {
                    ttl: self.ttl(&bucket, now),
                    state: bucket.into(),
                    output: (),
                })
            })
            .await
    }

    async fn peek(&self) -> Result<RateLimit> {
        let now = self.clock.now_ms();
        let bucket = self.current_bucket(self.store.read(&self.id).await?, now);
        let remaining = whole_tokens(bucket.available_tokens());
        let retry_after = self.next_token_at(&bucket, now);

        Ok(if remaining > 0 {
            RateLimit::accepted(remaining, retry_after, self.capacity)
        } else {
            RateLimit::rejected(remaining, retry_after, self.capacity)
        })
    }

    async fn reset(&self) -> Result<()> {
        debug!(key = %self.id, "Resetting token bucket");
        self.store.delete(&self.id).await
    }
}
