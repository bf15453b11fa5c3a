//! Request admission guard.
//!
//! The guard counts requests per client identity in a shared counter store
//! and rejects those that exceed the configured quota. The store owns all
//! window state; the guard only observes counts, so it holds no locks and
//! can be shared freely across request tasks.

mod decision;
mod events;
mod key;

pub use decision::{AdmissionDecision, RejectionBody};
pub use events::{GuardEvent, GuardObserver, GuardStats, TracingObserver};
pub use key::RateLimitKey;

use std::sync::Arc;
use tracing::trace;

use crate::config::GuardConfig;
use crate::error::{Result, StoreError};
use crate::store::{self, CounterStore, Expiry};

/// Admission guard over an injected counter store.
pub struct AdmissionGuard {
    config: GuardConfig,
    store: Arc<dyn CounterStore>,
    observer: Arc<dyn GuardObserver>,
}

impl AdmissionGuard {
    /// Create a guard that reports through a [`TracingObserver`].
    pub fn new(config: GuardConfig, store: Arc<dyn CounterStore>) -> Result<Self> {
        Self::with_observer(config, store, Arc::new(TracingObserver::new()))
    }

    /// Create a guard with a custom observer.
    ///
    /// Invalid configuration is rejected here rather than per request.
    pub fn with_observer(
        config: GuardConfig,
        store: Arc<dyn CounterStore>,
        observer: Arc<dyn GuardObserver>,
    ) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            store,
            observer,
        })
    }

    /// Create a guard backed by the store named in its configuration.
    pub fn from_config(config: GuardConfig, observer: Arc<dyn GuardObserver>) -> Result<Self> {
        config.validate()?;
        let store = store::from_config(&config.store)?;
        Self::with_observer(config, store, observer)
    }

    /// The configuration this guard was built with.
    pub fn config(&self) -> &GuardConfig {
        &self.config
    }

    /// Count one request for `identity` and decide whether it may proceed.
    ///
    /// Store failures never reject a request and never reach the caller:
    /// they are reported to the observer and the request is allowed.
    pub async fn evaluate(&self, identity: &str) -> AdmissionDecision {
        let key = RateLimitKey::new(&self.config.key_prefix, identity);

        let count = match self.store.increment(key.as_str()).await {
            Ok(count) => count,
            Err(error @ (StoreError::Unavailable(_) | StoreError::Protocol(_))) => {
                self.observer.on_event(&GuardEvent::FailOpen {
                    key: key.to_string(),
                    error,
                });
                return AdmissionDecision::Allow;
            }
        };

        trace!(key = %key, count = count, "Counted request");

        if count == 1 {
            if let Err(error) = self
                .store
                .set_expiry(key.as_str(), self.config.window_seconds)
                .await
            {
                self.observer.on_event(&GuardEvent::ExpirySetFailed {
                    key: key.to_string(),
                    error,
                });
            }
        }

        if count <= self.config.max_requests {
            return AdmissionDecision::Allow;
        }

        let retry_after_secs = self.retry_after(&key).await;
        self.observer.on_event(&GuardEvent::Rejected {
            key: key.to_string(),
            count,
            retry_after_secs,
        });
        AdmissionDecision::Reject { retry_after_secs }
    }

    /// Best-effort seconds until the key's window resets, in `1..=window`.
    async fn retry_after(&self, key: &RateLimitKey) -> u64 {
        let window = self.config.window_seconds;

        let secs = match self.store.get_expiry(key.as_str()).await {
            Ok(Expiry::Remaining(secs)) => secs,
            // Window closed between increment and query.
            Ok(Expiry::Missing) => 1,
            // The expiry for this window was lost; start it now so the
            // client is not locked out indefinitely.
            Ok(Expiry::Persistent) => {
                match self.store.set_expiry(key.as_str(), window).await {
                    Ok(()) => self.observer.on_event(&GuardEvent::ExpiryRepaired {
                        key: key.to_string(),
                    }),
                    Err(error) => self.observer.on_event(&GuardEvent::ExpirySetFailed {
                        key: key.to_string(),
                        error,
                    }),
                }
                window
            }
            Err(error) => {
                self.observer.on_event(&GuardEvent::ExpiryQueryFailed {
                    key: key.to_string(),
                    error,
                });
                window
            }
        };

        secs.clamp(1, window)
    }
}
