//! Configuration management for Turnstile.

use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::time::Duration;

use crate::error::{Result, TurnstileError};

/// Prefix for environment variable overrides, e.g. `TURNSTILE__GUARD__MAX_REQUESTS`.
const ENV_PREFIX: &str = "TURNSTILE";

/// Longest accepted window: one year.
pub const MAX_WINDOW_SECONDS: u64 = 365 * 24 * 60 * 60;

/// Main configuration for the Turnstile service.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TurnstileConfig {
    /// Server configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Admission guard configuration
    #[serde(default)]
    pub guard: GuardConfig,
}

/// Server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// HTTP listen address
    #[serde(default = "default_listen_addr")]
    pub listen_addr: SocketAddr,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
        }
    }
}

fn default_listen_addr() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 8080))
}

/// Admission guard configuration.
///
/// Immutable once handed to an [`AdmissionGuard`](crate::guard::AdmissionGuard).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GuardConfig {
    /// Maximum requests admitted per identity per window
    #[serde(default = "default_max_requests")]
    pub max_requests: u64,

    /// Window length in seconds
    #[serde(default = "default_window_seconds")]
    pub window_seconds: u64,

    /// Namespace prepended to every client identity
    #[serde(default = "default_key_prefix")]
    pub key_prefix: String,

    /// Counter store settings
    #[serde(default)]
    pub store: StoreConfig,
}

impl Default for GuardConfig {
    fn default() -> Self {
        Self {
            max_requests: default_max_requests(),
            window_seconds: default_window_seconds(),
            key_prefix: default_key_prefix(),
            store: StoreConfig::default(),
        }
    }
}

fn default_max_requests() -> u64 {
    5
}

fn default_window_seconds() -> u64 {
    60
}

fn default_key_prefix() -> String {
    "rate_limit:".to_string()
}

impl GuardConfig {
    /// Reject values that would make the guard meaningless.
    pub fn validate(&self) -> Result<()> {
        if self.max_requests == 0 {
            return Err(TurnstileError::Config(
                "guard.max_requests must be positive".to_string(),
            ));
        }
        if self.window_seconds == 0 {
            return Err(TurnstileError::Config(
                "guard.window_seconds must be positive".to_string(),
            ));
        }
        if self.window_seconds > MAX_WINDOW_SECONDS {
            return Err(TurnstileError::Config(format!(
                "guard.window_seconds must be at most {}",
                MAX_WINDOW_SECONDS
            )));
        }
        if self.key_prefix.is_empty() {
            return Err(TurnstileError::Config(
                "guard.key_prefix must not be empty".to_string(),
            ));
        }
        self.store.validate()
    }
}

/// Which counter store implementation backs the guard.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    /// Shared Redis instance
    #[default]
    Redis,
    /// Process-local map, for single-instance deployments
    Memory,
}

/// Counter store configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Store implementation
    #[serde(default)]
    pub backend: StoreBackend,

    /// Connection target, e.g. `redis://:secret@cache:6379/0`
    pub url: Option<String>,

    /// Upper bound on a single store call, in milliseconds
    #[serde(default = "default_store_timeout")]
    pub timeout_ms: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackend::default(),
            url: None,
            timeout_ms: default_store_timeout(),
        }
    }
}

fn default_store_timeout() -> u64 {
    250
}

impl StoreConfig {
    /// Per-call timeout as a duration.
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    fn validate(&self) -> Result<()> {
        if self.timeout_ms == 0 {
            return Err(TurnstileError::Config(
                "guard.store.timeout_ms must be positive".to_string(),
            ));
        }
        if self.backend == StoreBackend::Redis
            && self.url.as_deref().map_or(true, |url| url.trim().is_empty())
        {
            return Err(TurnstileError::Config(
                "guard.store.url is required for the redis backend".to_string(),
            ));
        }
        Ok(())
    }
}

impl TurnstileConfig {
    /// Load configuration from an optional YAML file, overridden by
    /// `TURNSTILE__*` environment variables.
    pub fn load(path: Option<&str>) -> Result<Self> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(config::File::with_name(path).required(true));
        }
        let config: TurnstileConfig = builder
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;
        config.guard.validate()?;
        Ok(config)
    }

    /// Parse configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: TurnstileConfig =
            serde_yaml::from_str(yaml).map_err(|e| TurnstileError::Config(e.to_string()))?;
        config.guard.validate()?;
        Ok(config)
    }
}
