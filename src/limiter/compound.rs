//! All-or-nothing combination of several limiters.

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::error::{ConfigError, Result};
use crate::limiter::{Limiter, Policy, ensure_tokens};
use crate::rate_limit::RateLimit;

/// Grants tokens only when every member grants them.
///
/// Members are asked in order. If any member rejects (or fails), the tokens
/// taken by the members that did accept are handed back, last accepted
/// first, so a rejected request leaves no trace in any member.
///
/// Rollback is best effort: a member that cannot release is logged and
/// skipped, and the caller still sees the original outcome.
///
/// # Example
///
/// ```ignore
/// let limiter = CompoundLimiter::new(vec![
///     Box::new(per_second) as Box<dyn Limiter>,
///     Box::new(per_hour),
/// ])?;
/// ```
pub struct CompoundLimiter {
    id: String,
    limiters: Vec<Box<dyn Limiter>>,
}

impl std::fmt::Debug for CompoundLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let members: Vec<_> = self
            .limiters
            .iter()
            .map(|l| (l.policy(), l.id().to_string()))
            .collect();
        f.debug_struct("CompoundLimiter")
            .field("id", &self.id)
            .field("limiters", &members)
            .finish()
    }
}

impl CompoundLimiter {
    /// Combine `limiters`. At least one is required.
    pub fn new(limiters: Vec<Box<dyn Limiter>>) -> Result<Self> {
        if limiters.is_empty() {
            return Err(ConfigError::EmptyCompound.into());
        }

        let id = limiters
            .iter()
            .map(|l| l.id())
            .collect::<Vec<_>>()
            .join(",");
        Ok(Self { id, limiters })
    }

    /// Members, in evaluation order.
    pub fn limiters(&self) -> &[Box<dyn Limiter>] {
        &self.limiters
    }

    /// Hand `tokens` back to the members at `accepted`, newest first.
    async fn roll_back(&self, accepted: &[usize], tokens: u64) {
        for &index in accepted.iter().rev() {
            let limiter = &self.limiters[index];
            if let Err(err) = limiter.release(tokens).await {
                warn!(
                    key = %limiter.id(),
                    policy = %limiter.policy(),
                    tokens,
                    error = %err,
                    "Failed to roll back tokens"
                );
            }
        }
    }
}

/// Most restrictive view of several results.
///
/// Remaining tokens and limit come from the member with the fewest tokens
/// left; the retry instant is the latest one.
fn combine<'a>(results: impl Iterator<Item = &'a RateLimit>) -> Option<(u64, u64, u64)> {
    results.fold(None, |acc, limit| {
        let retry_after = acc.map_or(limit.retry_after_ms(), |(_, r, _)| {
            r.max(limit.retry_after_ms())
        });
        match acc {
            Some((remaining, _, cap)) if remaining <= limit.remaining_tokens() => {
                Some((remaining, retry_after, cap))
            }
            _ => Some((limit.remaining_tokens(), retry_after, limit.limit())),
        }
    })
}

fn summarize(results: &[RateLimit]) -> RateLimit {
    if results.iter().all(RateLimit::is_accepted) {
        let (remaining, retry_after, limit) = combine(results.iter()).unwrap_or((0, 0, 0));
        RateLimit::accepted(remaining, retry_after, limit)
    } else {
        let (remaining, retry_after, limit) =
            combine(results.iter().filter(|r| r.is_rejected())).unwrap_or((0, 0, 0));
        RateLimit::rejected(remaining, retry_after, limit)
    }
}

#[async_trait]
impl Limiter for CompoundLimiter {
    fn id(&self) -> &str {
        &self.id
    }

    fn policy(&self) -> Policy {
        Policy::Compound
    }

    async fn consume(&self, tokens: u64) -> Result<RateLimit> {
        ensure_tokens(tokens)?;

        let mut accepted = Vec::with_capacity(self.limiters.len());
        let mut results = Vec::with_capacity(self.limiters.len());

        for (index, limiter) in self.limiters.iter().enumerate() {
            match limiter.consume(tokens).await {
                Ok(limit) => {
                    if limit.is_accepted() {
                        accepted.push(index);
                    }
                    results.push(limit);
                }
                Err(err) => {
                    self.roll_back(&accepted, tokens).await;
                    return Err(err);
                }
            }
        }

        let limit = summarize(&results);
        if limit.is_rejected() && !accepted.is_empty() {
            debug!(key = %self.id, tokens, rolled_back = accepted.len(), "Compound request rejected");
            self.roll_back(&accepted, tokens).await;
        }
        Ok(limit)
    }

    async fn release(&self, tokens: u64) -> Result<()> {
        let mut first_error = None;
        for limiter in &self.limiters {
            if let Err(err) = limiter.release(tokens).await {
                first_error.get_or_insert(err);
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    async fn peek(&self) -> Result<RateLimit> {
        let mut results = Vec::with_capacity(self.limiters.len());
        for limiter in &self.limiters {
            results.push(limiter.peek().await?);
        }
        Ok(summarize(&results))
    }

    async fn reset(&self) -> Result<()> {
        let mut first_error = None;
        for limiter in &self.limiters {
            if let Err(err) = limiter.reset().await {
                first_error.get_or_insert(err);
            }
        }
        first_error.map_or(Ok(()), Err)
    }
}
