//! Limiter configuration.
//!
//! A `LimiterConfig` names a policy and its parameters. It can be built in
//! code or loaded from JSON, and is validated before any limiter is made.
//!
//! # Examples
//!
//! ```ignore
//! use tollgate::{LimiterConfig, Policy, Rate};
//! use std::time::Duration;
//!
//! // 100 requests per minute, fixed window
//! let config = LimiterConfig::builder("api")
//!     .policy(Policy::FixedWindow)
//!     .limit(100)
//!     .interval(Duration::from_secs(60))
//!     .build()?;
//!
//! // Same thing from JSON; durations are milliseconds
//! let config = LimiterConfig::from_json(
//!     r#"{"id":"api","policy":"fixed_window","limit":100,"interval_ms":60000}"#,
//! )?;
//!
//! // Bursts of 20, refilled 5 per second
//! let config = LimiterConfig::builder("upload")
//!     .policy(Policy::TokenBucket)
//!     .limit(20)
//!     .rate(Rate::per_second(5))
//!     .build()?;
//! ```

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, Result};
use crate::limiter::{Policy, interval_ms};
use crate::rate::Rate;

/// Policy and parameters for a family of limiters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LimiterConfig {
    /// Prefix of every subject key built from this configuration.
    pub id: String,

    /// Which policy to apply.
    pub policy: Policy,

    /// Tokens per interval for window policies, capacity for the token bucket.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<u64>,

    /// Window length in milliseconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interval_ms: Option<u64>,

    /// Token bucket refill rate.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rate: Option<Rate>,
}

impl LimiterConfig {
    /// Start building a configuration for `id`.
    pub fn builder(id: impl Into<String>) -> LimiterConfigBuilder {
        LimiterConfigBuilder::new(id)
    }

    /// Parse and validate a JSON document.
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self =
            serde_json::from_str(json).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Check that the parameters the policy needs are present and sane,
    /// and that nothing it does not use was given.
    pub fn validate(&self) -> Result<()> {
        if self.id.is_empty() {
            return Err(ConfigError::MissingRequired("id".into()).into());
        }

        match self.policy {
            Policy::FixedWindow | Policy::SlidingWindow => {
                self.require_limit()?;
                let interval_ms = self
                    .interval_ms
                    .ok_or_else(|| ConfigError::MissingRequired("interval_ms".into()))?;
                if interval_ms == 0 {
                    return Err(
                        ConfigError::InvalidRate("interval_ms must be greater than 0".into()).into(),
                    );
                }
                self.reject("rate", self.rate.is_some())?;
            }
            Policy::TokenBucket => {
                self.require_limit()?;
                let rate = self
                    .rate
                    .ok_or_else(|| ConfigError::MissingRequired("rate".into()))?;
                Rate::try_new(rate.interval(), rate.amount())?;
                self.reject("interval_ms", self.interval_ms.is_some())?;
            }
            Policy::NoLimit => {
                self.reject("limit", self.limit.is_some())?;
                self.reject("interval_ms", self.interval_ms.is_some())?;
                self.reject("rate", self.rate.is_some())?;
            }
            Policy::Compound => {
                return Err(ConfigError::InvalidPolicy(
                    "compound limiters are assembled from several configurations".into(),
                )
                .into());
            }
        }

        Ok(())
    }

    /// Window length, for window policies.
    pub fn interval(&self) -> Option<Duration> {
        self.interval_ms.map(Duration::from_millis)
    }

    fn require_limit(&self) -> Result<u64> {
        match self.limit {
            None => Err(ConfigError::MissingRequired("limit".into()).into()),
            Some(0) => Err(ConfigError::InvalidLimit("limit must be greater than 0".into()).into()),
            Some(limit) => Ok(limit),
        }
    }

    fn reject(&self, option: &str, present: bool) -> Result<()> {
        if present {
            return Err(ConfigError::InvalidPolicy(format!(
                "option `{option}` does not apply to the {} policy",
                self.policy
            ))
            .into());
        }
        Ok(())
    }
}

/// Builder for creating configurations with validation.
#[derive(Debug)]
pub struct LimiterConfigBuilder {
    id: String,
    policy: Option<Policy>,
    limit: Option<u64>,
    interval: Option<Duration>,
    rate: Option<Rate>,
}

impl LimiterConfigBuilder {
    /// Create a new builder for `id`.
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            policy: None,
            limit: None,
            interval: None,
            rate: None,
        }
    }

    /// Set the policy.
    pub fn policy(mut self, policy: Policy) -> Self {
        self.policy = Some(policy);
        self
    }

    /// Set the limit (or bucket capacity).
    pub fn limit(mut self, limit: u64) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Set the window length.
    pub fn interval(mut self, interval: Duration) -> Self {
        self.interval = Some(interval);
        self
    }

    /// Set the refill rate.
    pub fn rate(mut self, rate: Rate) -> Self {
        self.rate = Some(rate);
        self
    }

    /// Build the configuration, returning an error if invalid.
    pub fn build(self) -> Result<LimiterConfig> {
        let policy = self
            .policy
            .ok_or_else(|| ConfigError::MissingRequired("policy".into()))?;

        let config = LimiterConfig {
            id: self.id,
            policy,
            limit: self.limit,
            interval_ms: self.interval.map(interval_ms).transpose()?,
            rate: self.rate,
        };
        config.validate()?;
        Ok(config)
    }
}
