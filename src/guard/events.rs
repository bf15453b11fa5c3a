//! Observability hooks for the admission guard.

use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, warn};

use crate::error::StoreError;

/// Something noteworthy the guard did while evaluating a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GuardEvent {
    /// The counter could not be advanced; the request was let through.
    FailOpen { key: String, error: StoreError },
    /// A new window's expiry could not be set.
    ExpirySetFailed { key: String, error: StoreError },
    /// Retry-after could not be read; the window length was reported instead.
    ExpiryQueryFailed { key: String, error: StoreError },
    /// A counter without a time-to-live was given one on the reject path.
    ExpiryRepaired { key: String },
    /// The request exceeded its quota.
    Rejected {
        key: String,
        count: u64,
        retry_after_secs: u64,
    },
}

/// Receives guard events.
pub trait GuardObserver: Send + Sync {
    fn on_event(&self, event: &GuardEvent);
}

/// Point-in-time copy of [`TracingObserver`] counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GuardStats {
    pub fail_open: u64,
    pub expiry_set_failed: u64,
    pub expiry_query_failed: u64,
    pub expiry_repaired: u64,
    pub rejected: u64,
}

/// Default observer: logs each event through `tracing` and counts it.
#[derive(Debug, Default)]
pub struct TracingObserver {
    fail_open: AtomicU64,
    expiry_set_failed: AtomicU64,
    expiry_query_failed: AtomicU64,
    expiry_repaired: AtomicU64,
    rejected: AtomicU64,
}

impl TracingObserver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stats(&self) -> GuardStats {
        GuardStats {
            fail_open: self.fail_open.load(Ordering::Relaxed),
            expiry_set_failed: self.expiry_set_failed.load(Ordering::Relaxed),
            expiry_query_failed: self.expiry_query_failed.load(Ordering::Relaxed),
            expiry_repaired: self.expiry_repaired.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
        }
    }
}

impl GuardObserver for TracingObserver {
    fn on_event(&self, event: &GuardEvent) {
        match event {
            GuardEvent::FailOpen { key, error } => {
                self.fail_open.fetch_add(1, Ordering::Relaxed);
                warn!(key = %key, error = %error, "Rate limiting failed, allowing request");
            }
            GuardEvent::ExpirySetFailed { key, error } => {
                self.expiry_set_failed.fetch_add(1, Ordering::Relaxed);
                warn!(key = %key, error = %error, "Failed to set window expiry");
            }
            GuardEvent::ExpiryQueryFailed { key, error } => {
                self.expiry_query_failed.fetch_add(1, Ordering::Relaxed);
                warn!(key = %key, error = %error, "Failed to read window expiry");
            }
            GuardEvent::ExpiryRepaired { key } => {
                self.expiry_repaired.fetch_add(1, Ordering::Relaxed);
                warn!(key = %key, "Counter had no expiry, window restarted");
            }
            GuardEvent::Rejected {
                key,
                count,
                retry_after_secs,
            } => {
                self.rejected.fetch_add(1, Ordering::Relaxed);
                debug!(
                    key = %key,
                    count = count,
                    retry_after_secs = retry_after_secs,
                    "Rate limit exceeded"
                );
            }
        }
    }
}
