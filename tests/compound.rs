//! Integration tests for all-or-nothing compound limiting.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tollgate::{
    CompoundLimiter, FixedWindowLimiter, Limiter, LimiterState, ManualClock, MemoryStorage, Policy,
    RateLimit, RateLimitError, Result, SaveOutcome, Storage, StorageError, TokenBucketLimiter,
    Rate,
};

fn fixed(
    id: &str,
    limit: u64,
    storage: &Arc<MemoryStorage>,
    clock: &ManualClock,
) -> FixedWindowLimiter<MemoryStorage> {
    FixedWindowLimiter::new(id, limit, Duration::from_secs(60), storage.clone())
        .unwrap()
        .with_clock(Arc::new(clock.clone()))
}

/// Storage that fails every call.
struct Unreachable;

impl Storage for Unreachable {
    async fn fetch(&self, _key: &str) -> Result<Option<LimiterState>> {
        Err(StorageError::operation_failed("connection refused", true).into())
    }

    async fn save(
        &self,
        _key: &str,
        _state: LimiterState,
        _previous: Option<&LimiterState>,
        _ttl: Duration,
    ) -> Result<SaveOutcome> {
        Err(StorageError::operation_failed("connection refused", true).into())
    }

    async fn delete(&self, _key: &str) -> Result<()> {
        Err(StorageError::operation_failed("connection refused", true).into())
    }
}

/// Accepts everything and counts what it hands out, but cannot give back.
#[derive(Default)]
struct NoRefunds {
    taken: AtomicU64,
}

#[async_trait]
impl Limiter for NoRefunds {
    fn id(&self) -> &str {
        "no-refunds"
    }

    fn policy(&self) -> Policy {
        Policy::NoLimit
    }

    async fn consume(&self, tokens: u64) -> Result<RateLimit> {
        self.taken.fetch_add(tokens, Ordering::SeqCst);
        Ok(RateLimit::accepted(100, 0, 100))
    }

    async fn release(&self, _tokens: u64) -> Result<()> {
        Err(StorageError::Lock("refunds are disabled".into()).into())
    }

    async fn peek(&self) -> Result<RateLimit> {
        Ok(RateLimit::accepted(100, 0, 100))
    }

    async fn reset(&self) -> Result<()> {
        Ok(())
    }
}

#[tokio::test]
async fn test_rejection_rolls_back_accepting_members() {
    let clock = ManualClock::new(0);
    let storage = Arc::new(MemoryStorage::new().with_clock(Arc::new(clock.clone())));

    let compound = CompoundLimiter::new(vec![
        Box::new(fixed("l1", 6, &storage, &clock)),
        Box::new(fixed("l2", 4, &storage, &clock)),
    ])
    .unwrap();

    assert!(compound.consume(3).await.unwrap().is_accepted());

    let limit = compound.consume(3).await.unwrap();
    assert!(limit.is_rejected(), "l2 only has 1 token left");
    assert_eq!(limit.remaining_tokens(), 1);
    assert_eq!(limit.limit(), 4);

    // l1 got its 3 tokens back, so it alone still has room for 3.
    let l1 = fixed("l1", 6, &storage, &clock);
    let limit = l1.consume(3).await.unwrap();
    assert!(limit.is_accepted());
    assert_eq!(limit.remaining_tokens(), 0);
}

#[tokio::test]
async fn test_all_members_see_every_request() {
    let clock = ManualClock::new(0);
    let storage = Arc::new(MemoryStorage::new().with_clock(Arc::new(clock.clone())));
    let last = Arc::new(NoRefunds::default());

    let compound = CompoundLimiter::new(vec![
        Box::new(fixed("tight", 1, &storage, &clock)),
        Box::new(last.clone()),
    ])
    .unwrap();

    compound.consume(1).await.unwrap();
    // Rejected by the first member, the second is still asked.
    assert!(compound.consume(1).await.unwrap().is_rejected());
    assert_eq!(last.taken.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_accepted_result_reports_tightest_member() {
    let clock = ManualClock::new(0);
    let storage = Arc::new(MemoryStorage::new().with_clock(Arc::new(clock.clone())));

    let compound = CompoundLimiter::new(vec![
        Box::new(fixed("wide", 100, &storage, &clock)),
        Box::new(
            TokenBucketLimiter::new("narrow", 5, Rate::per_second(1), storage.clone())
                .unwrap()
                .with_clock(Arc::new(clock.clone())),
        ),
    ])
    .unwrap();

    let limit = compound.consume(2).await.unwrap();
    assert!(limit.is_accepted());
    assert_eq!(limit.remaining_tokens(), 3);
    assert_eq!(limit.limit(), 5);
}

#[tokio::test]
async fn test_storage_error_propagates_after_rollback() {
    let clock = ManualClock::new(0);
    let storage = Arc::new(MemoryStorage::new().with_clock(Arc::new(clock.clone())));

    let compound = CompoundLimiter::new(vec![
        Box::new(fixed("healthy", 5, &storage, &clock)),
        Box::new(FixedWindowLimiter::new("down", 5, Duration::from_secs(60), Arc::new(Unreachable)).unwrap()),
    ])
    .unwrap();

    let err = compound.consume(2).await.unwrap_err();
    assert!(matches!(err, RateLimitError::Storage(StorageError::OperationFailed { .. })));

    // The healthy member was compensated.
    let healthy = fixed("healthy", 5, &storage, &clock);
    assert_eq!(healthy.peek().await.unwrap().remaining_tokens(), 5);
}

#[tokio::test]
async fn test_failed_rollback_keeps_original_outcome() {
    let clock = ManualClock::new(0);
    let storage = Arc::new(MemoryStorage::new().with_clock(Arc::new(clock.clone())));

    let compound = CompoundLimiter::new(vec![
        Box::new(NoRefunds::default()),
        Box::new(fixed("tight", 1, &storage, &clock)),
    ])
    .unwrap();

    assert!(compound.consume(1).await.unwrap().is_accepted());
    let limit = compound.consume(1).await.unwrap();
    assert!(limit.is_rejected(), "a failed refund must not turn into an error");
}

#[tokio::test]
async fn test_compound_does_not_reserve() {
    let compound = CompoundLimiter::new(vec![Box::new(NoRefunds::default())]).unwrap();

    assert!(matches!(
        compound.reserve(1, None).await,
        Err(RateLimitError::ReserveNotSupported { policy: "compound" })
    ));
}

#[tokio::test]
async fn test_reset_clears_every_member() {
    let clock = ManualClock::new(0);
    let storage = Arc::new(MemoryStorage::new().with_clock(Arc::new(clock.clone())));

    let compound = CompoundLimiter::new(vec![
        Box::new(fixed("a", 2, &storage, &clock)),
        Box::new(fixed("b", 3, &storage, &clock)),
    ])
    .unwrap();

    compound.consume(2).await.unwrap();
    assert!(compound.peek().await.unwrap().is_rejected());

    compound.reset().await.unwrap();
    let limit = compound.peek().await.unwrap();
    assert!(limit.is_accepted());
    assert_eq!(limit.remaining_tokens(), 2);
}
