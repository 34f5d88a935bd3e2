//! Fixed Window rate limiting policy.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, trace};

use crate::clock::{self, Clock};
use crate::error::{RateLimitError, Result};
use crate::limiter::{Limiter, Policy, ensure_limit, ensure_tokens, interval_ms};
use crate::lock::KeyLock;
use crate::rate_limit::RateLimit;
use crate::reservation::Reservation;
use crate::state::{LimiterState, Window};
use crate::storage::{StateStore, Step, Storage};

/// Fixed Window rate limiter.
///
/// Counts tokens per interval and starts from zero at every boundary.
/// Intervals are aligned to the instant the limiter was built, so every
/// handle sharing a key and a construction time agrees on the boundaries.
///
/// # Characteristics
///
/// - **Memory**: One counter per key
/// - **Accuracy**: Up to 2x the limit across a boundary
/// - **Reservations**: Supported, in whole intervals
///
/// # Example
///
/// ```ignore
/// use std::sync::Arc;
/// use std::time::Duration;
/// use tollgate::{FixedWindowLimiter, Limiter, MemoryStorage};
///
/// let storage = Arc::new(MemoryStorage::new());
/// let limiter = FixedWindowLimiter::new("api-1.2.3.4", 100, Duration::from_secs(60), storage)?;
///
/// let limit = limiter.consume(1).await?;
/// assert!(limit.is_accepted());
/// ```
pub struct FixedWindowLimiter<S> {
    id: String,
    limit: u64,
    interval_ms: u64,
    anchor: u64,
    store: StateStore<S>,
    clock: Arc<dyn Clock>,
}

impl<S> std::fmt::Debug for FixedWindowLimiter<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FixedWindowLimiter")
            .field("id", &self.id)
            .field("limit", &self.limit)
            .field("interval_ms", &self.interval_ms)
            .field("anchor", &self.anchor)
            .field("store", &self.store)
            .finish()
    }
}

impl<S: Storage> FixedWindowLimiter<S> {
    /// Create a limiter allowing `limit` tokens per `interval` for `id`.
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

    /// Read time from `clock`. Window boundaries are re-anchored on it.
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

    /// Stored window rolled forward to `now`, or a fresh one.
    fn current_window(&self, state: Option<LimiterState>, now: u64) -> Window {
        let mut window = state
            .and_then(LimiterState::into_window)
            .filter(|w| w.interval_ms() == self.interval_ms)
            .unwrap_or_else(|| Window::anchored(&self.id, self.anchor, self.interval_ms, now));
        window.roll(now, self.limit);
        window
    }

    /// Instant at which one more token fits.
    fn next_token_at(&self, window: &Window, now: u64) -> u64 {
        let k = window.intervals_until_fits(1, self.limit);
        window.start_of(k).max(now)
    }

    fn ttl(&self, window: &Window, now: u64) -> Duration {
        let expires_at = window.expires_at(self.limit);
        Duration::from_millis(expires_at.saturating_sub(now).max(1_000))
    }
}

#[async_trait]
impl<S: Storage> Limiter for FixedWindowLimiter<S> {
    fn id(&self) -> &str {
        &self.id
    }

    fn policy(&self) -> Policy {
        Policy::FixedWindow
    }

    async fn consume(&self, tokens: u64) -> Result<RateLimit> {
        ensure_tokens(tokens)?;

        if tokens > self.limit {
            // Can never fit; report without touching the record.
            let now = self.clock.now_ms();
            let window = self.current_window(self.store.read(&self.id).await?, now);
            debug!(key = %self.id, tokens, limit = self.limit, "Request exceeds window limit");
            return Ok(RateLimit::rejected(
                window.available(self.limit),
                window.interval_end(),
                self.limit,
            ));
        }

        let limit = self
            .store
            .update(&self.id, |current| {
                let now = self.clock.now_ms();
                let mut window = self.current_window(current, now);

                let k = window.intervals_until_fits(tokens, self.limit);
                if k > 0 {
                    return Ok(Step::Keep(RateLimit::rejected(
                        window.available(self.limit),
                        window.start_of(k),
                        self.limit,
                    )));
                }

                window.add(tokens);
                let output = RateLimit::accepted(
                    window.available(self.limit),
                    self.next_token_at(&window, now),
                    self.limit,
                );
                Ok(Step::Write {
                    ttl: self.ttl(&window, now),
                    state: window.into(),
                    output,
                })
            })
            .await?;

        trace!(
            key = %self.id,
            tokens,
            accepted = limit.is_accepted(),
            remaining = limit.remaining_tokens(),
            "Fixed window decision"
        );
        Ok(limit)
    }

    async fn reserve(&self, tokens: u64, max_wait: Option<Duration>) -> Result<Reservation> {
        ensure_tokens(tokens)?;
        if tokens > self.limit {
            return Err(RateLimitError::invalid_request(format!(
                "cannot reserve {tokens} tokens, the window only holds {}",
                self.limit
            )));
        }

        let (time_to_act, rate_limit) = self
            .store
            .update(&self.id, |current| {
                let now = self.clock.now_ms();
                let mut window = self.current_window(current, now);

                let k = window.intervals_until_fits(tokens, self.limit);
                let time_to_act = window.start_of(k).max(now);
                let wait = Duration::from_millis(time_to_act - now);

                if let Some(max_wait) = max_wait
                    && wait > max_wait
                {
                    return Err(RateLimitError::MaxWaitDurationExceeded {
                        wait,
                        max_wait,
                        rate_limit: RateLimit::rejected(
                            window.available(self.limit),
                            time_to_act,
                            self.limit,
                        ),
                    });
                }

                window.reserve_in(k, tokens, self.limit);
                let rate_limit = if k == 0 {
                    RateLimit::accepted(
                        window.available(self.limit),
                        self.next_token_at(&window, now),
                        self.limit,
                    )
                } else {
                    RateLimit::rejected(0, time_to_act, self.limit)
                };

                Ok(Step::Write {
                    ttl: self.ttl(&window, now),
                    state: window.into(),
                    output: (time_to_act, rate_limit),
                })
            })
            .await?;

        debug!(key = %self.id, tokens, time_to_act, "Fixed window reservation");
        Ok(Reservation::new(time_to_act, rate_limit, self.clock.clone()))
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
        let remaining = window.available(self.limit);
        let retry_after = self.next_token_at(&window, now);

        Ok(if remaining > 0 {
            RateLimit::accepted(remaining, retry_after, self.limit)
        } else {
            RateLimit::rejected(remaining, retry_after, self.limit)
        })
    }

    async fn reset(&self) -> Result<()> {
        debug!(key = %self.id, "Resetting fixed window");
        self.store.delete(&self.id).await
    }
}
