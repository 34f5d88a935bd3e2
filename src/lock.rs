//! Optional advisory locking around read-modify-write.
//!
//! A backend that cannot do a real compare-and-swap can still be used safely
//! by serialising access per subject key. When a limiter is given a
//! [`KeyLock`], it holds the key's lock for the whole fetch/compute/save
//! sequence; the [`LockGuard`] releases it on drop, on every exit path.

use std::fmt;

use async_trait::async_trait;

use crate::error::Result;

/// Held lock. Dropping it releases the lock.
pub struct LockGuard {
    _inner: Box<dyn Send>,
}

impl LockGuard {
    /// Wrap whatever keeps the underlying lock alive.
    pub fn new<G: Send + 'static>(guard: G) -> Self {
        Self {
            _inner: Box::new(guard),
        }
    }
}

impl fmt::Debug for LockGuard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("LockGuard")
    }
}

/// Per-key mutual exclusion.
#[async_trait]
pub trait KeyLock: Send + Sync + fmt::Debug + 'static {
    /// Wait until the lock for `key` is free and take it.
    async fn acquire(&self, key: &str) -> Result<LockGuard>;
}

#[cfg(feature = "memory")]
pub use memory::InMemoryLock;

#[cfg(feature = "memory")]
mod memory {
    use std::sync::Arc;

    use async_trait::async_trait;
    use dashmap::DashMap;
    use tokio::sync::Mutex;

    use super::{KeyLock, LockGuard};
    use crate::error::Result;

    /// Process-local lock table, one async mutex per key.
    #[derive(Debug, Default)]
    pub struct InMemoryLock {
        locks: DashMap<String, Arc<Mutex<()>>>,
    }

    impl InMemoryLock {
        /// Create an empty lock table.
        pub fn new() -> Self {
            Self::default()
        }

        /// Forget keys nobody currently holds.
        pub fn purge_idle(&self) {
            // held guards own a clone of the Arc
            self.locks.retain(|_, mutex| Arc::strong_count(mutex) > 1);
        }

        /// Number of keys in the table.
        pub fn len(&self) -> usize {
            self.locks.len()
        }

        /// Whether the table is empty.
        pub fn is_empty(&self) -> bool {
            self.locks.is_empty()
        }
    }

    #[async_trait]
    impl KeyLock for InMemoryLock {
        async fn acquire(&self, key: &str) -> Result<LockGuard> {
            let mutex = self.locks.entry(key.to_string()).or_default().clone();
            Ok(LockGuard::new(mutex.lock_owned().await))
        }
    }
}
