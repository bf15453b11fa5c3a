//! Counter store abstraction and its backends.

mod memory;
mod redis;

pub use self::memory::MemoryCounterStore;
pub use self::redis::RedisCounterStore;

use async_trait::async_trait;
use std::sync::Arc;

use crate::config::{StoreBackend, StoreConfig};
use crate::error::{Result, StoreError};

/// Remaining lifetime of a window counter, as reported by the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Expiry {
    /// The counter expires after this many seconds
    Remaining(u64),
    /// The counter exists but has no time-to-live
    Persistent,
    /// No counter is stored under the key
    Missing,
}

impl Expiry {
    /// Interpret a Redis-style `TTL` reply.
    pub fn from_ttl(ttl: i64) -> std::result::Result<Self, StoreError> {
        match ttl {
            -2 => Ok(Expiry::Missing),
            -1 => Ok(Expiry::Persistent),
            secs if secs >= 0 => Ok(Expiry::Remaining(secs as u64)),
            other => Err(StoreError::Protocol(format!("unexpected TTL reply {}", other))),
        }
    }
}

/// Operations the admission guard needs from a shared counter store.
///
/// Every method is a single store call. Implementations do not retry; the
/// guard owns the failure policy.
#[async_trait]
pub trait CounterStore: Send + Sync {
    /// Atomically create the counter at 1 or increment it, returning the new count.
    async fn increment(&self, key: &str) -> std::result::Result<u64, StoreError>;

    /// Set or refresh the counter's time-to-live.
    async fn set_expiry(&self, key: &str, seconds: u64) -> std::result::Result<(), StoreError>;

    /// Query the counter's remaining time-to-live.
    async fn get_expiry(&self, key: &str) -> std::result::Result<Expiry, StoreError>;
}

/// Build the store selected by configuration.
pub fn from_config(config: &StoreConfig) -> Result<Arc<dyn CounterStore>> {
    match config.backend {
        StoreBackend::Redis => Ok(Arc::new(RedisCounterStore::new(config)?)),
        StoreBackend::Memory => Ok(Arc::new(MemoryCounterStore::new())),
    }
}
