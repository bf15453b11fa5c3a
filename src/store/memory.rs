//! Process-local counter store.

use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, trace};

use super::{CounterStore, Expiry};
use crate::error::StoreError;

/// Increments between sweeps of expired counters.
const DEFAULT_SWEEP_INTERVAL: u64 = 1024;

/// A stored counter and its optional deadline.
#[derive(Debug, Clone, Copy)]
struct WindowCounter {
    count: u64,
    expires_at: Option<Instant>,
}

impl WindowCounter {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at.map_or(true, |deadline| deadline > now)
    }
}

/// In-memory counter store.
///
/// Counts are only shared within one process, so this backend suits a single
/// guard instance. Increments hold the key's shard lock, which keeps them
/// atomic under concurrent callers. Every `sweep_interval` increments the
/// store drops expired counters, so the map is bounded by the identities
/// seen within roughly one window. Time follows the tokio clock.
#[derive(Debug)]
pub struct MemoryCounterStore {
    counters: DashMap<String, WindowCounter>,
    increments: AtomicU64,
    sweep_interval: u64,
}

impl Default for MemoryCounterStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryCounterStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::with_sweep_interval(DEFAULT_SWEEP_INTERVAL)
    }

    /// Create an empty store that sweeps expired counters every `interval`
    /// increments.
    pub fn with_sweep_interval(interval: u64) -> Self {
        Self {
            counters: DashMap::new(),
            increments: AtomicU64::new(0),
            sweep_interval: interval.max(1),
        }
    }

    /// Current count for a key, if a live counter exists.
    pub fn count(&self, key: &str) -> Option<u64> {
        let now = Instant::now();
        self.counters
            .get(key)
            .filter(|counter| counter.is_live(now))
            .map(|counter| counter.count)
    }

    /// Drop counters whose window has elapsed.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let before = self.counters.len();
        self.counters.retain(|_, counter| counter.is_live(now));
        before - self.counters.len()
    }

    /// Number of stored counters, including ones not yet purged.
    pub fn len(&self) -> usize {
        self.counters.len()
    }

    /// Whether the store holds no counters.
    pub fn is_empty(&self) -> bool {
        self.counters.is_empty()
    }
}

#[async_trait]
impl CounterStore for MemoryCounterStore {
    async fn increment(&self, key: &str) -> Result<u64, StoreError> {
        // Sweep before taking the entry: retain locks every shard.
        let seen = self.increments.fetch_add(1, Ordering::Relaxed) + 1;
        if seen % self.sweep_interval == 0 {
            let purged = self.purge_expired();
            if purged > 0 {
                debug!(purged = purged, remaining = self.counters.len(), "Swept expired counters");
            }
        }

        let now = Instant::now();
        let count = match self.counters.entry(key.to_string()) {
            Entry::Occupied(mut occupied) => {
                let counter = occupied.get_mut();
                if counter.is_live(now) {
                    counter.count += 1;
                } else {
                    *counter = WindowCounter {
                        count: 1,
                        expires_at: None,
                    };
                }
                counter.count
            }
            Entry::Vacant(vacant) => {
                vacant.insert(WindowCounter {
                    count: 1,
                    expires_at: None,
                });
                1
            }
        };
        trace!(key = %key, count = count, "Incremented counter");
        Ok(count)
    }

    async fn set_expiry(&self, key: &str, seconds: u64) -> Result<(), StoreError> {
        let now = Instant::now();
        let deadline = now
            .checked_add(Duration::from_secs(seconds))
            .ok_or_else(|| StoreError::Protocol(format!("expiry {} out of range", seconds)))?;
        if let Some(mut counter) = self.counters.get_mut(key) {
            if counter.is_live(now) {
                counter.expires_at = Some(deadline);
            }
        }
        Ok(())
    }

    async fn get_expiry(&self, key: &str) -> Result<Expiry, StoreError> {
        let now = Instant::now();
        let expiry = match self.counters.get(key) {
            Some(counter) if counter.is_live(now) => match counter.expires_at {
                // Round up like a store with second granularity would.
                Some(deadline) => {
                    let left = deadline.duration_since(now);
                    let secs = left.as_secs() + u64::from(left.subsec_nanos() > 0);
                    Expiry::Remaining(secs)
                }
                None => Expiry::Persistent,
            },
            _ => Expiry::Missing,
        };
        Ok(expiry)
    }
}
