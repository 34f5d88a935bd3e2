//! Integration tests for rates and limiter configuration.

use std::sync::Arc;
use std::time::Duration;

use tollgate::{
    ConfigError, LimiterConfig, LimiterFactory, ManualClock, MemoryStorage, Policy, Rate,
    RateLimitError, RateLimiterFactory,
};

#[test]
fn test_rate_per_second() {
    let rate = Rate::per_second(10);
    assert_eq!(rate.amount(), 10);
    assert_eq!(rate.interval(), Duration::from_secs(1));
}

#[test]
fn test_rate_per_hour() {
    let rate = Rate::per_hour(3_600);
    assert!((rate.tokens_per_second() - 1.0).abs() < 1e-9);
    assert_eq!(rate.time_for_tokens(2.0), Duration::from_secs(2));
}

#[test]
fn test_rate_custom_interval() {
    let rate = Rate::new(Duration::from_secs(300), 100); // 100 per 5 minutes
    assert_eq!(rate.interval(), Duration::from_secs(300));
    assert_eq!(rate.time_for_tokens(1.0), Duration::from_secs(3));
}

#[test]
fn test_config_builder() {
    let config = LimiterConfig::builder("search")
        .policy(Policy::TokenBucket)
        .limit(50)
        .rate(Rate::per_minute(30))
        .build()
        .unwrap();

    assert_eq!(config.id, "search");
    assert_eq!(config.limit, Some(50));
    assert_eq!(config.rate, Some(Rate::per_minute(30)));
    assert_eq!(config.interval(), None);
}

#[test]
fn test_config_json_round_trip() {
    let json = r#"{"id":"login","policy":"sliding_window","limit":5,"interval_ms":900000}"#;
    let config = LimiterConfig::from_json(json).unwrap();

    assert_eq!(config.policy, Policy::SlidingWindow);
    assert_eq!(config.interval(), Some(Duration::from_secs(900)));
    assert_eq!(serde_json::to_string(&config).unwrap(), json);
}

#[test]
fn test_config_rejects_missing_interval() {
    let err = LimiterConfig::from_json(r#"{"id":"login","policy":"fixed_window","limit":5}"#)
        .unwrap_err();
    assert!(matches!(
        err,
        RateLimitError::Config(ConfigError::MissingRequired(ref option)) if option == "interval_ms"
    ));
}

#[test]
fn test_config_rejects_unknown_fields() {
    let err = LimiterConfig::from_json(
        r#"{"id":"login","policy":"fixed_window","limit":5,"interval_ms":1000,"burst":9}"#,
    )
    .unwrap_err();
    assert!(matches!(err, RateLimitError::Config(ConfigError::Parse(_))));
}

#[tokio::test]
async fn test_factory_from_json() {
    let clock = ManualClock::new(0);
    let config = LimiterConfig::from_json(
        r#"{"id":"upload","policy":"token_bucket","limit":2,"rate":{"interval_ms":60000,"amount":1}}"#,
    )
    .unwrap();
    let factory = RateLimiterFactory::new(
        config,
        Arc::new(MemoryStorage::new().with_clock(Arc::new(clock.clone()))),
    )
    .unwrap()
    .with_clock(Arc::new(clock.clone()));

    let limiter = factory.create(Some("alice")).unwrap();
    assert_eq!(limiter.id(), "upload-alice");
    assert!(limiter.consume(2).await.unwrap().is_accepted());

    let limit = limiter.consume(1).await.unwrap();
    assert!(limit.is_rejected());
    assert_eq!(limit.retry_after_ms(), 60_000);
}

#[tokio::test]
async fn test_longest_interval_saturates_instead_of_overflowing() {
    let clock = ManualClock::new(1_000);
    for (policy, tokens) in [("sliding_window", 1), ("fixed_window", 2)] {
        let config = LimiterConfig::from_json(&format!(
            r#"{{"id":"api","policy":"{policy}","limit":1,"interval_ms":18446744073709551615}}"#
        ))
        .unwrap();
        let factory = RateLimiterFactory::new(
            config,
            Arc::new(MemoryStorage::new().with_clock(Arc::new(clock.clone()))),
        )
        .unwrap()
        .with_clock(Arc::new(clock.clone()));

        let limit = factory.create(Some("k")).unwrap().consume(tokens).await.unwrap();
        assert_eq!(limit.retry_after_ms(), u64::MAX, "{policy}");
        assert_eq!(limit.limit(), 1);
    }
}

#[test]
fn test_builder_rejects_interval_beyond_u64_millis() {
    let result = LimiterConfig::builder("api")
        .policy(Policy::FixedWindow)
        .limit(1)
        .interval(Duration::MAX)
        .build();
    assert!(matches!(
        result,
        Err(RateLimitError::Config(ConfigError::InvalidRate(_)))
    ));
}

#[test]
fn test_factory_rejects_invalid_config() {
    let config = LimiterConfig {
        id: "broken".into(),
        policy: Policy::FixedWindow,
        limit: Some(0),
        interval_ms: Some(1_000),
        rate: None,
    };
    assert!(RateLimiterFactory::new(config, Arc::new(MemoryStorage::new())).is_err());
}
