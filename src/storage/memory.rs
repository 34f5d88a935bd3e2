//! In-memory storage with automatic garbage collection.
//!
//! This storage backend uses `DashMap` for thread-safe concurrent access.
//! Compare-and-swap runs under the map's per-shard entry lock, so it is
//! atomic with respect to every other writer in the process.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use parking_lot::Mutex;
use tracing::trace;

use crate::clock::{self, Clock};
use crate::error::Result;
use crate::state::LimiterState;
use crate::storage::{SaveOutcome, Storage};

/// Garbage collection interval configuration.
#[derive(Debug, Clone)]
pub enum GcInterval {
    /// Sweep expired records every N storage operations.
    Operations(u64),
    /// Only sweep when [`MemoryStorage::run_gc`] is called.
    Manual,
}

impl Default for GcInterval {
    fn default() -> Self {
        Self::Operations(10_000)
    }
}

/// Garbage collection configuration.
#[derive(Debug, Clone, Default)]
pub struct GcConfig {
    /// When to trigger GC.
    pub interval: GcInterval,
}

impl GcConfig {
    /// Create config with operation-count based GC.
    pub fn on_operations(count: u64) -> Self {
        Self {
            interval: GcInterval::Operations(count.max(1)),
        }
    }

    /// Create config with manual GC only.
    pub fn manual() -> Self {
        Self {
            interval: GcInterval::Manual,
        }
    }
}

/// Internal entry with expiration tracking.
#[derive(Debug, Clone)]
struct InternalEntry {
    state: LimiterState,
    expires_at: u64,
}

impl InternalEntry {
    fn live(&self, now: u64) -> Option<&LimiterState> {
        (self.expires_at > now).then_some(&self.state)
    }
}

/// In-memory storage with garbage collection.
///
/// Records past their TTL read as absent immediately; the memory they hold
/// is reclaimed by the next sweep.
///
/// # Example
///
/// ```ignore
/// use tollgate::storage::{GcConfig, MemoryStorage};
///
/// // Default GC (every 10000 operations)
/// let storage = MemoryStorage::new();
///
/// // Manual GC only
/// let storage = MemoryStorage::with_gc(GcConfig::manual());
/// storage.run_gc();
/// ```
pub struct MemoryStorage {
    data: DashMap<String, InternalEntry>,
    gc_config: GcConfig,
    operations: AtomicU64,
    gc_lock: Mutex<()>,
    clock: Arc<dyn Clock>,
}

impl std::fmt::Debug for MemoryStorage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryStorage")
            .field("entries", &self.data.len())
            .field("gc_config", &self.gc_config)
            .finish()
    }
}

impl Default for MemoryStorage {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStorage {
    /// Create a new memory storage with default GC configuration.
    pub fn new() -> Self {
        Self::with_gc(GcConfig::default())
    }

    /// Create a new memory storage with custom GC configuration.
    pub fn with_gc(gc_config: GcConfig) -> Self {
        Self {
            data: DashMap::new(),
            gc_config,
            operations: AtomicU64::new(0),
            gc_lock: Mutex::new(()),
            clock: clock::system(),
        }
    }

    /// Use `clock` to decide when records expire.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Sweep expired records now.
    pub fn run_gc(&self) {
        let now = self.clock.now_ms();
        let before = self.data.len();
        self.data.retain(|_, entry| entry.expires_at > now);
        trace!(removed = before.saturating_sub(self.data.len()), "Memory storage sweep");
    }

    /// Get the number of entries currently stored.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Check if the storage is empty.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Clear all entries.
    pub fn clear(&self) {
        self.data.clear();
    }

    /// Check if GC should run and run it if needed.
    fn maybe_run_gc(&self) {
        if let GcInterval::Operations(threshold) = self.gc_config.interval {
            let count = self.operations.fetch_add(1, Ordering::Relaxed);
            if count % threshold == 0 && count > 0 {
                // Try to acquire GC lock (non-blocking)
                if let Some(_guard) = self.gc_lock.try_lock() {
                    self.run_gc();
                }
            }
        }
    }
}

impl Storage for MemoryStorage {
    async fn fetch(&self, key: &str) -> Result<Option<LimiterState>> {
        self.maybe_run_gc();

        let now = self.clock.now_ms();
        Ok(self
            .data
            .get(key)
            .and_then(|internal| internal.live(now).cloned()))
    }

    async fn save(
        &self,
        key: &str,
        state: LimiterState,
        previous: Option<&LimiterState>,
        ttl: Duration,
    ) -> Result<SaveOutcome> {
        self.maybe_run_gc();

        let now = self.clock.now_ms();
        let fresh = InternalEntry {
            state,
            expires_at: now.saturating_add(u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX)),
        };

        // The entry guard holds the shard lock until the end of the match.
        let outcome = match self.data.entry(key.to_string()) {
            Entry::Occupied(mut occupied) => {
                if occupied.get().live(now) == previous {
                    occupied.insert(fresh);
                    SaveOutcome::Saved
                } else {
                    SaveOutcome::Conflict
                }
            }
            Entry::Vacant(vacant) => {
                if previous.is_none() {
                    vacant.insert(fresh);
                    SaveOutcome::Saved
                } else {
                    SaveOutcome::Conflict
                }
            }
        };

        Ok(outcome)
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.data.remove(key);
        Ok(())
    }
}
