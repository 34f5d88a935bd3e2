//! Refill rate for the token bucket policy.
//!
//! A `Rate` says "`amount` tokens every `interval`". It converts between
//! elapsed time and tokens in both directions.
//!
//! # Examples
//!
//! ```
//! use tollgate::Rate;
//! use std::time::Duration;
//!
//! // 10 tokens per second
//! let rate = Rate::per_second(10);
//! assert_eq!(rate.time_for_tokens(5.0), Duration::from_millis(500));
//!
//! // 50 tokens every 30 seconds
//! let rate = Rate::new(Duration::from_secs(30), 50);
//! assert!((rate.tokens_per_second() - 50.0 / 30.0).abs() < 1e-9);
//! ```

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, Result};
use crate::limiter::interval_ms;

/// Token refill rate: `amount` tokens every `interval`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Rate {
    /// Refill period in milliseconds.
    interval_ms: u64,

    /// Tokens added every period.
    amount: u64,
}

impl Rate {
    /// Create a new rate.
    ///
    /// # Panics
    ///
    /// Panics if `amount` is 0, or if `interval` is shorter than a
    /// millisecond or longer than `u64::MAX` milliseconds.
    pub fn new(interval: Duration, amount: u64) -> Self {
        match Self::try_new(interval, amount) {
            Ok(rate) => rate,
            Err(e) => panic!("{e}"),
        }
    }

    /// Try to create a new rate, returning an error if invalid.
    pub fn try_new(interval: Duration, amount: u64) -> Result<Self> {
        if amount == 0 {
            return Err(ConfigError::InvalidRate("amount must be greater than 0".into()).into());
        }
        Ok(Self {
            interval_ms: interval_ms(interval)?,
            amount,
        })
    }

    /// `n` tokens per second.
    pub fn per_second(n: u64) -> Self {
        Self::new(Duration::from_secs(1), n)
    }

    /// `n` tokens per minute.
    pub fn per_minute(n: u64) -> Self {
        Self::new(Duration::from_secs(60), n)
    }

    /// `n` tokens per hour.
    pub fn per_hour(n: u64) -> Self {
        Self::new(Duration::from_secs(3600), n)
    }

    /// `n` tokens per day.
    pub fn per_day(n: u64) -> Self {
        Self::new(Duration::from_secs(86400), n)
    }

    /// Refill period.
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    /// Tokens added per period.
    pub fn amount(&self) -> u64 {
        self.amount
    }

    /// Tokens added per second.
    pub fn tokens_per_second(&self) -> f64 {
        self.amount as f64 * 1000.0 / self.interval_ms as f64
    }

    /// Tokens accrued over `elapsed_ms` milliseconds.
    pub fn tokens_during(&self, elapsed_ms: u64) -> f64 {
        elapsed_ms as f64 * self.amount as f64 / self.interval_ms as f64
    }

    /// Time needed to accrue `tokens`, rounded up to the millisecond.
    pub fn time_for_tokens(&self, tokens: f64) -> Duration {
        Duration::from_millis(self.millis_for_tokens(tokens))
    }

    /// Milliseconds needed to accrue `tokens`, rounded up.
    pub(crate) fn millis_for_tokens(&self, tokens: f64) -> u64 {
        if tokens <= 0.0 {
            return 0;
        }
        (tokens * self.interval_ms as f64 / self.amount as f64).ceil() as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rate_per_second() {
        let rate = Rate::per_second(10);
        assert_eq!(rate.amount(), 10);
        assert_eq!(rate.interval(), Duration::from_secs(1));
        assert!((rate.tokens_per_second() - 10.0).abs() < 1e-9);
    }

    #[test]
    fn test_rate_per_minute() {
        let rate = Rate::per_minute(60);
        assert!((rate.tokens_per_second() - 1.0).abs() < 1e-9);
        assert_eq!(rate.time_for_tokens(1.0), Duration::from_secs(1));
    }

    #[test]
    fn test_tokens_during_is_fractional() {
        let rate = Rate::new(Duration::from_secs(3), 1);
        assert!((rate.tokens_during(1_000) - 1.0 / 3.0).abs() < 1e-12);
    }

    #[test]
    fn test_time_for_tokens_rounds_up() {
        let rate = Rate::new(Duration::from_secs(3), 1);
        assert_eq!(rate.millis_for_tokens(0.5), 1_500);
        assert_eq!(rate.millis_for_tokens(0.0001), 1);
        assert_eq!(rate.millis_for_tokens(0.0), 0);
        assert_eq!(rate.millis_for_tokens(-2.0), 0);
    }

    #[test]
    fn test_try_new_rejects_zero() {
        assert!(Rate::try_new(Duration::from_secs(1), 0).is_err());
        assert!(Rate::try_new(Duration::ZERO, 5).is_err());
        assert!(Rate::try_new(Duration::from_secs(1), 5).is_ok());
    }

    #[test]
    fn test_try_new_rejects_interval_beyond_u64_millis() {
        assert!(matches!(
            Rate::try_new(Duration::MAX, 1),
            Err(crate::error::RateLimitError::Config(ConfigError::InvalidRate(_)))
        ));
    }

    #[test]
    #[should_panic]
    fn test_rate_zero_amount_panics() {
        Rate::new(Duration::from_secs(1), 0);
    }
}
