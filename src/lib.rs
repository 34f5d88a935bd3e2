//! Rate limiting core for Rust.
//!
//! `tollgate` decides whether a subject (a user, an IP address, an API key)
//! may spend tokens right now, and keeps the accounting in a pluggable
//! storage backend so that many processes can share one quota.
//!
//! - **Policies**: Fixed Window, Sliding Window, Token Bucket, No Limit
//! - **Compound limiting**: all-or-nothing across several limiters
//! - **Reservations**: commit tokens now, use them when they mature
//! - **Pluggable Storage**: compare-and-swap contract, in-memory backend included
//!
//! # Quick Start
//!
//! ```ignore
//! use std::sync::Arc;
//! use std::time::Duration;
//! use tollgate::{FixedWindowLimiter, Limiter, MemoryStorage};
//!
//! #[tokio::main]
//! async fn main() -> tollgate::Result<()> {
//!     let storage = Arc::new(MemoryStorage::new());
//!     let limiter = FixedWindowLimiter::new("user:123", 10, Duration::from_secs(1), storage)?;
//!
//!     let limit = limiter.consume(1).await?;
//!     if limit.is_accepted() {
//!         println!("Request allowed! {} remaining", limit.remaining_tokens());
//!     } else {
//!         println!("Rate limited! Retry after {:?}", limit.retry_after());
//!     }
//!     Ok(())
//! }
//! ```
//!
//! # Policies
//!
//! | Policy | Best For | Reserve |
//! |--------|----------|---------|
//! | Fixed Window | Simple quotas | Yes |
//! | Sliding Window | Smoothing window edges | No |
//! | Token Bucket | Bursty traffic with a sustained rate | Yes |
//! | No Limit | Switching limiting off by configuration | Yes |
//! | Compound | Several quotas at once | No |
//!
//! # Feature Flags
//!
//! - `memory` (default): In-memory storage with garbage collection, in-process key lock

pub mod clock;
pub mod config;
pub mod error;
pub mod factory;
pub mod limiter;
pub mod lock;
pub mod rate;
pub mod rate_limit;
pub mod reservation;
pub mod state;
pub mod storage;

// Re-export main types
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{LimiterConfig, LimiterConfigBuilder};
pub use error::{ConfigError, RateLimitError, Result, StorageError};
pub use factory::{CompoundLimiterFactory, LimiterFactory, RateLimiterFactory};
pub use limiter::{
    CompoundLimiter, FixedWindowLimiter, Limiter, NoLimiter, Policy, SlidingWindowLimiter,
    TokenBucketLimiter,
};
pub use lock::{KeyLock, LockGuard};
pub use rate::Rate;
pub use rate_limit::RateLimit;
pub use reservation::Reservation;
pub use state::{LimiterState, TokenBucketState, Window};
pub use storage::{SaveOutcome, Storage};

#[cfg(feature = "memory")]
pub use lock::InMemoryLock;
#[cfg(feature = "memory")]
pub use storage::{GcConfig, GcInterval, MemoryStorage};

/// Prelude for convenient imports.
pub mod prelude {
    pub use crate::config::LimiterConfig;
    pub use crate::error::{RateLimitError, Result};
    pub use crate::factory::{LimiterFactory, RateLimiterFactory};
    pub use crate::limiter::{
        CompoundLimiter, FixedWindowLimiter, Limiter, NoLimiter, Policy, SlidingWindowLimiter,
        TokenBucketLimiter,
    };
    pub use crate::rate::Rate;
    pub use crate::rate_limit::RateLimit;
    pub use crate::reservation::Reservation;
    pub use crate::storage::Storage;

    #[cfg(feature = "memory")]
    pub use crate::storage::MemoryStorage;
}
