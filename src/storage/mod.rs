//! Storage backend trait and the in-memory reference backend.
//!
//! Limiters keep no state of their own: every decision is a read-modify-write
//! of one [`LimiterState`] record per subject key. Backends provide the three
//! primitives below; [`Storage::save`] must be a true compare-and-swap so that
//! two callers racing on the same key cannot both win.

#[cfg(feature = "memory")]
mod memory;

#[cfg(feature = "memory")]
pub use memory::{GcConfig, GcInterval, MemoryStorage};

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tracing::debug;

use crate::error::{Result, StorageError};
use crate::lock::{KeyLock, LockGuard};
use crate::state::LimiterState;

/// Outcome of a compare-and-swap write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaveOutcome {
    /// The record was written.
    Saved,
    /// Another writer got there first; re-read and try again.
    Conflict,
}

/// Storage backend trait for rate limiting state.
///
/// All storage operations are async to support both local and distributed backends.
/// Implementations must be thread-safe (`Send + Sync`).
///
/// # Required Operations
///
/// - `fetch`: Retrieve the record for a key, `None` if absent or expired
/// - `save`: Compare-and-swap the record for a key
/// - `delete`: Remove a record (manual reset)
///
/// # Example
///
/// ```ignore
/// use tollgate::storage::{SaveOutcome, Storage};
///
/// async fn overwrite<S: Storage>(storage: &S, state: LimiterState) -> Result<()> {
///     loop {
///         let current = storage.fetch("key").await?;
///         let ttl = Duration::from_secs(60);
///         if storage.save("key", state.clone(), current.as_ref(), ttl).await? == SaveOutcome::Saved {
///             return Ok(());
///         }
///     }
/// }
/// ```
pub trait Storage: Send + Sync + 'static {
    /// Get the record for `key`.
    ///
    /// Returns `None` if the key doesn't exist or has expired.
    fn fetch(&self, key: &str) -> impl Future<Output = Result<Option<LimiterState>>> + Send;

    /// Compare-and-swap.
    ///
    /// Stores `state` only if the current record is still exactly `previous`
    /// (or still absent when `previous` is `None`). `ttl` is a hint: the
    /// record carries no information after it elapses.
    fn save(
        &self,
        key: &str,
        state: LimiterState,
        previous: Option<&LimiterState>,
        ttl: Duration,
    ) -> impl Future<Output = Result<SaveOutcome>> + Send;

    /// Delete a record.
    ///
    /// Returns success even if the key didn't exist.
    fn delete(&self, key: &str) -> impl Future<Output = Result<()>> + Send;
}

impl<S: Storage + ?Sized> Storage for Arc<S> {
    async fn fetch(&self, key: &str) -> Result<Option<LimiterState>> {
        (**self).fetch(key).await
    }

    async fn save(
        &self,
        key: &str,
        state: LimiterState,
        previous: Option<&LimiterState>,
        ttl: Duration,
    ) -> Result<SaveOutcome> {
        (**self).save(key, state, previous, ttl).await
    }

    async fn delete(&self, key: &str) -> Result<()> {
        (**self).delete(key).await
    }
}

impl<S: Storage + ?Sized> Storage for Box<S> {
    async fn fetch(&self, key: &str) -> Result<Option<LimiterState>> {
        (**self).fetch(key).await
    }

    async fn save(
        &self,
        key: &str,
        state: LimiterState,
        previous: Option<&LimiterState>,
        ttl: Duration,
    ) -> Result<SaveOutcome> {
        (**self).save(key, state, previous, ttl).await
    }

    async fn delete(&self, key: &str) -> Result<()> {
        (**self).delete(key).await
    }
}

/// Default number of compare-and-swap attempts before giving up.
pub const DEFAULT_MAX_RETRIES: u32 = 32;

/// What a read-modify-write step decided.
pub(crate) enum Step<T> {
    /// Leave the stored record as it is.
    Keep(T),
    /// Replace the stored record.
    Write {
        state: LimiterState,
        ttl: Duration,
        output: T,
    },
}

/// Storage handle shared by the stateful limiters: the backend, an optional
/// advisory lock and the CAS retry budget.
pub(crate) struct StateStore<S> {
    storage: Arc<S>,
    lock: Option<Arc<dyn KeyLock>>,
    max_retries: u32,
}

impl<S> std::fmt::Debug for StateStore<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StateStore")
            .field("locked", &self.lock.is_some())
            .field("max_retries", &self.max_retries)
            .finish()
    }
}

impl<S: Storage> StateStore<S> {
    pub(crate) fn new(storage: Arc<S>) -> Self {
        Self {
            storage,
            lock: None,
            max_retries: DEFAULT_MAX_RETRIES,
        }
    }

    pub(crate) fn set_lock(&mut self, lock: Arc<dyn KeyLock>) {
        self.lock = Some(lock);
    }

    pub(crate) fn set_max_retries(&mut self, max_retries: u32) {
        self.max_retries = max_retries.max(1);
    }

    async fn guard(&self, key: &str) -> Result<Option<LockGuard>> {
        match &self.lock {
            Some(lock) => Ok(Some(lock.acquire(key).await?)),
            None => Ok(None),
        }
    }

    /// Read without modifying.
    pub(crate) async fn read(&self, key: &str) -> Result<Option<LimiterState>> {
        self.storage.fetch(key).await
    }

    /// Run `op` against the current record and CAS its result back, retrying
    /// with a fresh read whenever another writer intervened.
    ///
    /// An error from `op` aborts without writing.
    pub(crate) async fn update<T, F>(&self, key: &str, mut op: F) -> Result<T>
    where
        F: FnMut(Option<LimiterState>) -> Result<Step<T>> + Send,
        T: Send,
    {
        let _guard = self.guard(key).await?;

        for attempt in 1..=self.max_retries {
            let current = self.storage.fetch(key).await?;

            let (state, ttl, output) = match op(current.clone())? {
                Step::Keep(output) => return Ok(output),
                Step::Write { state, ttl, output } => (state, ttl, output),
            };

            match self.storage.save(key, state, current.as_ref(), ttl).await? {
                SaveOutcome::Saved => return Ok(output),
                SaveOutcome::Conflict => {
                    debug!(key = %key, attempt, "Concurrent write detected, retrying");
                }
            }
        }

        Err(StorageError::ConflictRetriesExhausted {
            key: key.to_string(),
            attempts: self.max_retries,
        }
        .into())
    }

    /// Remove the record.
    pub(crate) async fn delete(&self, key: &str) -> Result<()> {
        let _guard = self.guard(key).await?;
        self.storage.delete(key).await
    }
}
