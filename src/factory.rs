//! Building limiters for many subjects from one configuration.
//!
//! # Example
//!
//! ```ignore
//! use tollgate::{LimiterConfig, MemoryStorage, Policy, RateLimiterFactory};
//!
//! let config = LimiterConfig::builder("login")
//!     .policy(Policy::SlidingWindow)
//!     .limit(5)
//!     .interval(Duration::from_secs(60))
//!     .build()?;
//! let factory = RateLimiterFactory::new(config, Arc::new(MemoryStorage::new()))?;
//!
//! // one limiter per client address, keyed "login-203.0.113.7"
//! let limiter = factory.create(Some("203.0.113.7"))?;
//! let limit = limiter.consume(1).await?;
//! ```

use std::sync::Arc;

use tracing::trace;

use crate::clock::{self, Clock};
use crate::config::LimiterConfig;
use crate::error::{ConfigError, Result};
use crate::limiter::{
    CompoundLimiter, FixedWindowLimiter, Limiter, NoLimiter, Policy, SlidingWindowLimiter,
    TokenBucketLimiter,
};
use crate::lock::KeyLock;
use crate::storage::Storage;

/// Something that hands out limiters per subject key.
pub trait LimiterFactory: Send + Sync {
    /// Build the limiter for `key`, or for the configuration id alone.
    fn create(&self, key: Option<&str>) -> Result<Box<dyn Limiter>>;
}

/// Builds limiters of one configured policy over a shared storage.
pub struct RateLimiterFactory<S> {
    config: LimiterConfig,
    storage: Arc<S>,
    lock: Option<Arc<dyn KeyLock>>,
    clock: Arc<dyn Clock>,
}

impl<S> std::fmt::Debug for RateLimiterFactory<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimiterFactory")
            .field("config", &self.config)
            .field("locked", &self.lock.is_some())
            .finish()
    }
}

impl<S: Storage> RateLimiterFactory<S> {
    /// Validate `config` and bind it to `storage`.
    pub fn new(config: LimiterConfig, storage: Arc<S>) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            storage,
            lock: None,
            clock: clock::system(),
        })
    }

    /// Hand `lock` to every limiter built.
    pub fn with_lock(mut self, lock: Arc<dyn KeyLock>) -> Self {
        self.lock = Some(lock);
        self
    }

    /// Hand `clock` to every limiter built.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// The validated configuration.
    pub fn config(&self) -> &LimiterConfig {
        &self.config
    }

    fn subject(&self, key: Option<&str>) -> String {
        match key {
            Some(key) => format!("{}-{}", self.config.id, key),
            None => self.config.id.clone(),
        }
    }

    fn missing(option: &str) -> ConfigError {
        ConfigError::MissingRequired(option.to_string())
    }
}

impl<S: Storage> LimiterFactory for RateLimiterFactory<S> {
    fn create(&self, key: Option<&str>) -> Result<Box<dyn Limiter>> {
        let id = self.subject(key);
        let config = &self.config;
        trace!(key = %id, policy = %config.policy, "Creating limiter");

        let limiter: Box<dyn Limiter> = match config.policy {
            Policy::FixedWindow => {
                let limit = config.limit.ok_or_else(|| Self::missing("limit"))?;
                let interval = config.interval().ok_or_else(|| Self::missing("interval_ms"))?;
                let mut limiter =
                    FixedWindowLimiter::new(id, limit, interval, self.storage.clone())?
                        .with_clock(self.clock.clone());
                if let Some(lock) = &self.lock {
                    limiter = limiter.with_lock(lock.clone());
                }
                Box::new(limiter)
            }
            Policy::SlidingWindow => {
                let limit = config.limit.ok_or_else(|| Self::missing("limit"))?;
                let interval = config.interval().ok_or_else(|| Self::missing("interval_ms"))?;
                let mut limiter =
                    SlidingWindowLimiter::new(id, limit, interval, self.storage.clone())?
                        .with_clock(self.clock.clone());
                if let Some(lock) = &self.lock {
                    limiter = limiter.with_lock(lock.clone());
                }
                Box::new(limiter)
            }
            Policy::TokenBucket => {
                let capacity = config.limit.ok_or_else(|| Self::missing("limit"))?;
                let rate = config.rate.ok_or_else(|| Self::missing("rate"))?;
                let mut limiter =
                    TokenBucketLimiter::new(id, capacity, rate, self.storage.clone())?
                        .with_clock(self.clock.clone());
                if let Some(lock) = &self.lock {
                    limiter = limiter.with_lock(lock.clone());
                }
                Box::new(limiter)
            }
            Policy::NoLimit => Box::new(NoLimiter::new(id).with_clock(self.clock.clone())),
            Policy::Compound => {
                return Err(ConfigError::InvalidPolicy(
                    "compound limiters come from a CompoundLimiterFactory".into(),
                )
                .into());
            }
        };

        Ok(limiter)
    }
}

/// Builds a [`CompoundLimiter`] over one limiter per member factory.
pub struct CompoundLimiterFactory {
    factories: Vec<Box<dyn LimiterFactory>>,
}

impl std::fmt::Debug for CompoundLimiterFactory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompoundLimiterFactory")
            .field("factories", &self.factories.len())
            .finish()
    }
}

impl CompoundLimiterFactory {
    /// Combine `factories`. At least one is required.
    pub fn new(factories: Vec<Box<dyn LimiterFactory>>) -> Result<Self> {
        if factories.is_empty() {
            return Err(ConfigError::EmptyCompound.into());
        }
        Ok(Self { factories })
    }
}

impl LimiterFactory for CompoundLimiterFactory {
    fn create(&self, key: Option<&str>) -> Result<Box<dyn Limiter>> {
        let limiters = self
            .factories
            .iter()
            .map(|factory| factory.create(key))
            .collect::<Result<Vec<_>>>()?;
        Ok(Box::new(CompoundLimiter::new(limiters)?))
    }
}
