//! Reservations: tokens promised for a future instant.
//!
//! ```ignore
//! let reservation = limiter.reserve(5, Some(Duration::from_secs(2))).await?;
//! reservation.wait().await;
//! // the five tokens are ours now
//! ```

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::clock::Clock;
use crate::rate_limit::RateLimit;

/// Tokens committed now that may be used from `time_to_act` on.
#[derive(Clone)]
pub struct Reservation {
    time_to_act: u64,
    rate_limit: RateLimit,
    clock: Arc<dyn Clock>,
}

impl fmt::Debug for Reservation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Reservation")
            .field("time_to_act", &self.time_to_act)
            .field("rate_limit", &self.rate_limit)
            .finish()
    }
}

impl Reservation {
    /// Create a reservation usable from `time_to_act` (Unix ms).
    pub fn new(time_to_act: u64, rate_limit: RateLimit, clock: Arc<dyn Clock>) -> Self {
        Self {
            time_to_act,
            rate_limit,
            clock,
        }
    }

    /// Instant (Unix ms) from which the reserved tokens may be used.
    pub fn time_to_act(&self) -> u64 {
        self.time_to_act
    }

    /// Time left until the reservation matures.
    pub fn wait_duration(&self) -> Duration {
        Duration::from_millis(self.time_to_act.saturating_sub(self.clock.now_ms()))
    }

    /// Limiter state right after the reservation was committed.
    pub fn rate_limit(&self) -> &RateLimit {
        &self.rate_limit
    }

    /// Consume the reservation and return its rate limit.
    pub fn into_rate_limit(self) -> RateLimit {
        self.rate_limit
    }

    /// Sleep until the reservation matures.
    ///
    /// Not cancellable by itself; race it with `tokio::select!` if needed.
    pub async fn wait(&self) {
        let delay = self.wait_duration();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
    }

    /// Block the current thread until the reservation matures.
    pub fn wait_blocking(&self) {
        let delay = self.wait_duration();
        if !delay.is_zero() {
            std::thread::sleep(delay);
        }
    }
}
