//! Accounting window shared by the fixed and sliding window policies.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// One accounting interval for a subject key.
///
/// `interval_start` always sits on a boundary `anchor + k * interval`.
/// `hit_count` may exceed the limit only through fixed-window reservations;
/// the excess belongs to later intervals and is carried over by [`roll`].
///
/// [`roll`]: Window::roll
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Window {
    id: String,
    interval_start: u64,
    interval_ms: u64,
    hit_count: u64,
    #[serde(default)]
    previous_hit_count: u64,
}

impl Window {
    /// Create an empty window starting at `interval_start` (Unix ms).
    ///
    /// The interval is clamped to `[1, u64::MAX]` milliseconds.
    pub fn new(id: impl Into<String>, interval_start: u64, interval: Duration) -> Self {
        Self {
            id: id.into(),
            interval_start,
            interval_ms: u64::try_from(interval.as_millis())
                .unwrap_or(u64::MAX)
                .max(1),
            hit_count: 0,
            previous_hit_count: 0,
        }
    }

    /// Create an empty window on the boundary of `anchor` that contains `now`.
    pub(crate) fn anchored(id: &str, anchor: u64, interval_ms: u64, now: u64) -> Self {
        let start = if now < anchor {
            now
        } else {
            anchor + (now - anchor) / interval_ms * interval_ms
        };
        Self {
            id: id.to_string(),
            interval_start: start,
            interval_ms,
            hit_count: 0,
            previous_hit_count: 0,
        }
    }

    /// Subject key.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Start of the current interval (Unix ms).
    pub fn interval_start(&self) -> u64 {
        self.interval_start
    }

    /// Interval length in milliseconds.
    pub fn interval_ms(&self) -> u64 {
        self.interval_ms
    }

    /// End of the current interval (Unix ms), saturating at `u64::MAX`.
    pub fn interval_end(&self) -> u64 {
        self.interval_start.saturating_add(self.interval_ms)
    }

    /// Tokens recorded against the current interval.
    pub fn hit_count(&self) -> u64 {
        self.hit_count
    }

    /// Tokens recorded against the interval just before this one.
    pub fn previous_hit_count(&self) -> u64 {
        self.previous_hit_count
    }

    /// Advance to the interval containing `now`.
    ///
    /// Skipping `k` intervals drops `k * limit` hits; the interval right
    /// before `now` becomes the previous interval. `now` exactly on a
    /// boundary belongs to the new interval.
    pub fn roll(&mut self, now: u64, limit: u64) {
        if now < self.interval_start {
            return;
        }
        let skipped = (now - self.interval_start) / self.interval_ms;
        if skipped == 0 {
            return;
        }

        let before_last = (skipped - 1).saturating_mul(limit);
        self.previous_hit_count = self.hit_count.saturating_sub(before_last).min(limit);
        self.hit_count = self.hit_count.saturating_sub(skipped.saturating_mul(limit));
        self.interval_start += skipped * self.interval_ms;
    }

    /// Tokens still free in the current interval.
    pub fn available(&self, limit: u64) -> u64 {
        limit.saturating_sub(self.hit_count)
    }

    /// Record `tokens` against the current interval.
    pub fn add(&mut self, tokens: u64) {
        self.hit_count = self.hit_count.saturating_add(tokens);
    }

    /// Give back `tokens` to the current interval.
    pub fn release(&mut self, tokens: u64) {
        self.hit_count = self.hit_count.saturating_sub(tokens);
    }

    /// Number of whole intervals to skip before `tokens` fit (0: they fit now).
    pub fn intervals_until_fits(&self, tokens: u64, limit: u64) -> u64 {
        let needed = self.hit_count.saturating_add(tokens);
        if needed <= limit {
            0
        } else {
            (needed - limit).div_ceil(limit)
        }
    }

    /// Start of the interval `k` intervals after the current one.
    pub fn start_of(&self, k: u64) -> u64 {
        self.interval_start
            .saturating_add(k.saturating_mul(self.interval_ms))
    }

    /// Commit `tokens` into the interval `k` intervals ahead.
    ///
    /// Unused room in the intervals before it is forfeited.
    pub fn reserve_in(&mut self, k: u64, tokens: u64, limit: u64) {
        self.hit_count = self
            .hit_count
            .max(k.saturating_mul(limit))
            .saturating_add(tokens);
    }

    /// Current hits plus the previous interval's hits weighted by how much of
    /// the previous interval still overlaps a full-length window ending now.
    pub fn sliding_hit_count(&self, now: u64) -> f64 {
        let elapsed = now.saturating_sub(self.interval_start) as f64 / self.interval_ms as f64;
        let weight = (1.0 - elapsed).max(0.0);
        self.hit_count as f64 + self.previous_hit_count as f64 * weight
    }

    /// Earliest instant at which `tokens` fit under the sliding count.
    ///
    /// Requires `tokens <= limit`.
    pub fn sliding_retry_at(&self, tokens: u64, limit: u64, now: u64) -> u64 {
        if self.hit_count.saturating_add(tokens) <= limit {
            // Fits in this interval once the previous one has decayed enough.
            let room = (limit - self.hit_count - tokens) as f64;
            if self.previous_hit_count == 0 || self.previous_hit_count as f64 <= room {
                return now;
            }
            let fraction = 1.0 - room / self.previous_hit_count as f64;
            let at = self
                .interval_start
                .saturating_add((fraction * self.interval_ms as f64).ceil() as u64);
            return at.max(now);
        }

        // Next interval: current hits decay as the previous count.
        let next_start = self.interval_end();
        let room = (limit - tokens) as f64;
        if self.hit_count as f64 <= room {
            return next_start;
        }
        let fraction = 1.0 - room / self.hit_count as f64;
        next_start.saturating_add((fraction * self.interval_ms as f64).ceil() as u64)
    }

    /// Instant after which the record carries no information any more:
    /// the last interval holding hits, plus one interval so the sliding
    /// policy can still read it as the previous interval.
    pub fn expires_at(&self, limit: u64) -> u64 {
        let occupied = self.hit_count.div_ceil(limit.max(1)).max(1);
        self.start_of(occupied + 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn window(start: u64, hits: u64) -> Window {
        let mut w = Window::new("w", start, Duration::from_secs(10));
        w.add(hits);
        w
    }

    #[test]
    fn test_anchored_aligns_to_boundary() {
        let w = Window::anchored("w", 1_000, 10_000, 35_500);
        assert_eq!(w.interval_start(), 31_000);
        assert_eq!(w.interval_end(), 41_000);
    }

    #[test]
    fn test_roll_on_exact_boundary() {
        let mut w = window(0, 7);
        w.roll(9_999, 10);
        assert_eq!(w.hit_count(), 7);

        w.roll(10_000, 10);
        assert_eq!(w.interval_start(), 10_000);
        assert_eq!(w.hit_count(), 0);
        assert_eq!(w.previous_hit_count(), 7);
    }

    #[test]
    fn test_roll_past_two_intervals_forgets_previous() {
        let mut w = window(0, 7);
        w.roll(25_000, 10);
        assert_eq!(w.interval_start(), 20_000);
        assert_eq!(w.hit_count(), 0);
        assert_eq!(w.previous_hit_count(), 0);
    }

    #[test]
    fn test_roll_carries_reserved_debt() {
        // 10 used now, 5 reserved for the next interval
        let mut w = window(0, 15);
        w.roll(12_000, 10);
        assert_eq!(w.hit_count(), 5);
        assert_eq!(w.previous_hit_count(), 10);
    }

    #[test]
    fn test_intervals_until_fits() {
        let w = window(0, 8);
        assert_eq!(w.intervals_until_fits(2, 10), 0);
        assert_eq!(w.intervals_until_fits(5, 10), 1);

        let w = window(0, 15);
        assert_eq!(w.intervals_until_fits(5, 10), 1);
        assert_eq!(w.intervals_until_fits(10, 10), 2);
    }

    #[test]
    fn test_reserve_in_future_interval_forfeits_slack() {
        let mut w = window(0, 8);
        w.reserve_in(1, 5, 10);
        assert_eq!(w.hit_count(), 15);

        w.roll(10_000, 10);
        assert_eq!(w.hit_count(), 5);
    }

    #[test]
    fn test_sliding_hit_count_weights_previous() {
        let mut w = window(0, 8);
        w.roll(10_100, 10);
        // 8 * (1 - 0.01)
        assert!((w.sliding_hit_count(10_100) - 7.92).abs() < 1e-9);
        assert!((w.sliding_hit_count(15_000) - 4.0).abs() < 1e-9);
    }

    #[test]
    fn test_sliding_retry_inside_current_interval() {
        let mut w = window(0, 8);
        w.roll(10_000, 10);
        // need previous decayed to 5: 8 * (1 - x) <= 5  =>  x >= 0.375
        assert_eq!(w.sliding_retry_at(5, 10, 10_100), 13_750);
    }

    #[test]
    fn test_sliding_retry_in_next_interval() {
        let w = window(0, 9);
        // next interval: 9 * (1 - x) <= 6  =>  x >= 1/3
        assert_eq!(w.sliding_retry_at(4, 10, 5_000), 10_000 + 3_334);
    }

    #[test]
    fn test_huge_interval_saturates() {
        let mut w = Window::new("w", 5_000, Duration::from_millis(u64::MAX));
        assert_eq!(w.interval_end(), u64::MAX);

        w.add(1);
        assert_eq!(w.sliding_retry_at(1, 1, 5_000), u64::MAX);
        assert_eq!(w.expires_at(1), u64::MAX);

        let w = Window::new("w", 0, Duration::MAX);
        assert_eq!(w.interval_ms(), u64::MAX);
    }

    #[test]
    fn test_expires_at_covers_debt_and_margin() {
        assert_eq!(window(0, 3).expires_at(10), 20_000);
        assert_eq!(window(0, 25).expires_at(10), 40_000);
    }
}
