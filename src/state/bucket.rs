//! Token bucket fill level.

use serde::{Deserialize, Serialize};

use crate::rate::Rate;

/// Fill level of one subject's bucket.
///
/// `available_tokens` stays within `[0, capacity]`. Capacity borrowed by a
/// reservation is recorded by pushing `last_refill` into the future: no
/// tokens accrue until the clock catches up with it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TokenBucketState {
    id: String,
    available_tokens: f64,
    last_refill: u64,
    capacity: u64,
    rate: Rate,
}

impl TokenBucketState {
    /// Create a full bucket.
    pub fn new(id: impl Into<String>, capacity: u64, rate: Rate, now: u64) -> Self {
        Self {
            id: id.into(),
            available_tokens: capacity as f64,
            last_refill: now,
            capacity,
            rate,
        }
    }

    /// Subject key.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Tokens in the bucket as of [`last_refill`](Self::last_refill).
    pub fn available_tokens(&self) -> f64 {
        self.available_tokens
    }

    /// Instant (Unix ms) up to which refill has been accounted.
    pub fn last_refill(&self) -> u64 {
        self.last_refill
    }

    /// Maximum fill level.
    pub fn capacity(&self) -> u64 {
        self.capacity
    }

    /// Refill rate.
    pub fn rate(&self) -> Rate {
        self.rate
    }

    /// Account for tokens accrued up to `now`.
    pub fn refill(&mut self, now: u64) {
        if now <= self.last_refill {
            return;
        }
        let accrued = self.rate.tokens_during(now - self.last_refill);
        self.available_tokens = (self.available_tokens + accrued).min(self.capacity as f64);
        self.last_refill = now;
    }

    /// Milliseconds until `tokens` are in the bucket. Call after [`refill`].
    ///
    /// [`refill`]: Self::refill
    pub fn wait_ms(&self, tokens: u64, now: u64) -> u64 {
        let debt = self.last_refill.saturating_sub(now);
        let missing = tokens as f64 - self.available_tokens;
        debt.saturating_add(self.rate.millis_for_tokens(missing))
    }

    /// Remove `tokens`. Call after [`refill`], with enough tokens available.
    ///
    /// [`refill`]: Self::refill
    pub fn take(&mut self, tokens: u64) {
        self.available_tokens = (self.available_tokens - tokens as f64).max(0.0);
    }

    /// Remove `tokens`, borrowing from future refill what is missing.
    pub fn borrow(&mut self, tokens: u64, now: u64) {
        let missing = tokens as f64 - self.available_tokens;
        if missing <= 0.0 {
            self.take(tokens);
            return;
        }
        self.available_tokens = 0.0;
        self.last_refill = self
            .last_refill
            .max(now)
            .saturating_add(self.rate.millis_for_tokens(missing));
    }

    /// Return `tokens`: first pay back borrowed refill time, then refill the
    /// bucket up to capacity.
    pub fn give_back(&mut self, tokens: u64, now: u64) {
        self.refill(now);
        let debt = self.last_refill.saturating_sub(now);
        let credit = self.rate.millis_for_tokens(tokens as f64);
        if credit <= debt {
            self.last_refill -= credit;
            return;
        }

        let leftover = if debt > 0 {
            self.last_refill = now;
            self.rate.tokens_during(credit - debt)
        } else {
            tokens as f64
        };
        self.available_tokens = (self.available_tokens + leftover).min(self.capacity as f64);
    }

    /// Instant at which the bucket will be full again.
    pub fn full_at(&self, now: u64) -> u64 {
        let missing = self.capacity as f64 - self.available_tokens;
        self.last_refill
            .max(now)
            .saturating_add(self.rate.millis_for_tokens(missing))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn bucket(capacity: u64, rate: Rate) -> TokenBucketState {
        TokenBucketState::new("b", capacity, rate, 0)
    }

    #[test]
    fn test_refill_never_exceeds_capacity() {
        let mut b = bucket(10, Rate::per_second(5));
        b.take(4);
        b.refill(60_000);
        assert_eq!(b.available_tokens(), 10.0);
        assert_eq!(b.last_refill(), 60_000);
    }

    #[test]
    fn test_refill_accrues_fractions() {
        let mut b = bucket(10, Rate::new(Duration::from_secs(3), 1));
        b.take(10);
        b.refill(1_000);
        b.refill(2_000);
        b.refill(3_000);
        assert!((b.available_tokens() - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_borrow_moves_refill_into_future() {
        let mut b = bucket(5, Rate::per_second(1));
        b.take(3);
        b.borrow(4, 0);
        assert_eq!(b.available_tokens(), 0.0);
        assert_eq!(b.last_refill(), 2_000);

        // nothing accrues while in debt
        b.refill(1_500);
        assert_eq!(b.available_tokens(), 0.0);
        assert_eq!(b.wait_ms(1, 1_500), 1_500);

        b.refill(3_000);
        assert!((b.available_tokens() - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_give_back_pays_debt_first() {
        let mut b = bucket(5, Rate::per_second(1));
        b.borrow(8, 0);
        assert_eq!(b.last_refill(), 3_000);

        b.give_back(2, 0);
        assert_eq!(b.last_refill(), 1_000);
        assert_eq!(b.available_tokens(), 0.0);

        b.give_back(3, 0);
        assert_eq!(b.last_refill(), 0);
        assert!((b.available_tokens() - 2.0).abs() < 1e-9);
    }

    #[test]
    fn test_give_back_capped_at_capacity() {
        let mut b = bucket(5, Rate::per_second(1));
        b.take(1);
        b.give_back(3, 0);
        assert_eq!(b.available_tokens(), 5.0);
    }

    #[test]
    fn test_full_at() {
        let mut b = bucket(10, Rate::per_second(2));
        b.take(6);
        assert_eq!(b.full_at(0), 3_000);
    }
}
