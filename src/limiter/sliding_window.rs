//! Sliding Window rate limiting policy.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, trace};

use crate::clock::{self, Clock};
use crate::error::Result;
use crate::limiter::{EPSILON, Limiter, Policy, ensure_limit, ensure_tokens, interval_ms, whole_tokens};
use crate::lock::KeyLock;
use crate::rate_limit::RateLimit;
use crate::state::{LimiterState, Window};
use crate::storage::{StateStore, Step, Storage};

/// Sliding Window rate limiter.
///
/// Approximates a window ending at the current instant by weighting the
/// previous interval's count with the share of it that still overlaps:
///
/// ```text
/// count = hits + previous_hits * (1 - elapsed / interval)
/// ```
///
/// This smooths the double burst a fixed window allows at its boundary.
///
/// # Characteristics
///
/// - **Memory**: Two counters per key
/// - **Accuracy**: Approximate, assumes even spread in the previous interval
/// - **Reservations**: Not supported
pub struct SlidingWindowLimiter<S> {
    id: String,
    limit: u64,
    interval_ms: u64,
    anchor: u64,
    store: StateStore<S>,
    clock: Arc<dyn Clock>,
}

impl<S> std::fmt::Debug for SlidingWindowLimiter<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SlidingWindowLimiter")
            .field("id", &self.id)
            .field("limit", &self.limit)
            .field("interval_ms", &self.interval_ms)
            .field("anchor", &self.anchor)
            .field("store", &self.store)
            .finish()
    }
}

impl<S: Storage> SlidingWindowLimiter<S> {
    /// Create a limiter allowing `limit` tokens in any `interval` for `id`.
    pub fn new(
        id: impl Into<String>,
        limit: u64,
        interval: Duration,
        storage: Arc<S>,
    ) -> Result<Self> {
        ensure_limit(limit)?;
        let interval_ms = interval_ms(interval)?;
        let clock = clock::system();

        Ok(Self {
            id: id.into(),
            limit,
            interval_ms,
            anchor: clock.now_ms(),
            store: StateStore::new(storage),
            clock,
        })
    }

    /// Read time from `clock`. Interval boundaries are re-anchored on it.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.anchor = clock.now_ms();
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

    /// Tokens allowed per interval.
    pub fn limit(&self) -> u64 {
        self.limit
    }

    /// Interval length.
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    fn current_window(&self, state: Option<LimiterState>, now: u64) -> Window {
        let mut window = state
            .and_then(LimiterState::into_window)
            .filter(|w| w.interval_ms() == self.interval_ms)
            .unwrap_or_else(|| Window::anchored(&self.id, self.anchor, self.interval_ms, now));
        window.roll(now, self.limit);
        window
    }

    fn remaining(&self, window: &Window, now: u64) -> u64 {
        whole_tokens(self.limit as f64 - window.sliding_hit_count(now))
    }

    fn fits(&self, window: &Window, tokens: u64, now: u64) -> bool {
        window.sliding_hit_count(now) + tokens as f64 <= self.limit as f64 + EPSILON
    }

    fn snapshot(&self, window: &Window, now: u64) -> RateLimit {
        let remaining = self.remaining(window, now);
        let retry_after = if remaining > 0 {
            now
        } else {
            window.sliding_retry_at(1, self.limit, now)
        };

        if self.fits(window, 1, now) {
            RateLimit::accepted(remaining, retry_after, self.limit)
        } else {
            RateLimit::rejected(remaining, retry_after, self.limit)
        }
    }

    fn ttl(&self, window: &Window, now: u64) -> Duration {
        let expires_at = window.expires_at(self.limit);
        Duration::from_millis(expires_at.saturating_sub(now).max(1_000))
    }
}

#[async_trait]
impl<S: Storage> Limiter for SlidingWindowLimiter<S> {
    fn id(&self) -> &str {
        &self.id
    }

    fn policy(&self) -> Policy {
        Policy::SlidingWindow
    }

    async fn consume(&self, tokens: u64) -> Result<RateLimit> {
        ensure_tokens(tokens)?;

        if tokens > self.limit {
            let now = self.clock.now_ms();
            let window = self.current_window(self.store.read(&self.id).await?, now);
            debug!(key = %self.id, tokens, limit = self.limit, "Request exceeds window limit");
            return Ok(RateLimit::rejected(
                self.remaining(&window, now),
                window.interval_end(),
                self.limit,
            ));
        }

        let limit = self
            .store
            .update(&self.id, |current| {
                let now = self.clock.now_ms();
                let mut window = self.current_window(current, now);

                if !self.fits(&window, tokens, now) {
                    return Ok(Step::Keep(RateLimit::rejected(
                        self.remaining(&window, now),
                        window.sliding_retry_at(tokens, self.limit, now),
                        self.limit,
                    )));
                }

                window.add(tokens);
                let remaining = self.remaining(&window, now);
                let retry_after = if remaining > 0 {
                    now
                } else {
                    window.sliding_retry_at(1, self.limit, now)
                };

                Ok(Step::Write {
                    ttl: self.ttl(&window, now),
                    state: window.into(),
                    output: RateLimit::accepted(remaining, retry_after, self.limit),
                })
            })
            .await?;

        trace!(
            key = %self.id,
            tokens,
            accepted = limit.is_accepted(),
            remaining = limit.remaining_tokens(),
            "Sliding window decision"
        );
        Ok(limit)
    }

    async fn release(&self, tokens: u64) -> Result<()> {
        self.store
            .update(&self.id, |current| {
                let Some(current) = current else {
                    return Ok(Step::Keep(()));
                };
                let now = self.clock.now_ms();
                let mut window = self.current_window(Some(current), now);
                window.release(tokens);
                Ok(Step::Write {
                    ttl: self.ttl(&window, now),
                    state: window.into(),
                    output: (),
                })
            })
            .await
    }

    async fn peek(&self) -> Result<RateLimit> {
        let now = self.clock.now_ms();
        let window = self.current_window(self.store.read(&self.id).await?, now);
        Ok(self.snapshot(&window, now))
    }

    async fn reset(&self) -> Result<()> {
        debug!(key = %self.id, "Resetting sliding window");
        self.store.delete(&self.id).await
    }
}
