//! Redis-backed counter store.

use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use redis::{AsyncCommands, Client, ErrorKind, RedisError};
use std::future::Future;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info};

use super::{CounterStore, Expiry};
use crate::config::StoreConfig;
use crate::error::{Result, StoreError, TurnstileError};

/// Counter store on a shared Redis instance.
///
/// The multiplexed connection is opened on first use rather than at
/// construction, so the guard can come up while Redis is down and start
/// counting once it is reachable. A connection-level failure discards the
/// cached connection and the next call dials again.
pub struct RedisCounterStore {
    client: Client,
    connection: Mutex<Option<MultiplexedConnection>>,
    timeout: Duration,
    target: String,
}

impl RedisCounterStore {
    /// Create a store for the configured connection target.
    pub fn new(config: &StoreConfig) -> Result<Self> {
        let url = config
            .url
            .as_deref()
            .ok_or_else(|| TurnstileError::Config("redis store requires a url".to_string()))?;
        let target = sanitize_url(url);
        let client = Client::open(url)
            .map_err(|e| TurnstileError::Config(format!("invalid redis url {}: {}", target, e)))?;

        info!(target = %target, timeout_ms = config.timeout_ms, "Redis counter store configured");

        Ok(Self {
            client,
            connection: Mutex::new(None),
            timeout: config.timeout(),
            target,
        })
    }

    /// The connection target with any password masked.
    pub fn target(&self) -> &str {
        &self.target
    }

    /// Cached connection, dialling one if needed.
    ///
    /// The lock is held while dialling so concurrent callers share one
    /// connection attempt instead of racing to replace each other's.
    async fn connection(&self) -> std::result::Result<MultiplexedConnection, StoreError> {
        let mut cached = self.connection.lock().await;
        if let Some(conn) = cached.as_ref() {
            return Ok(conn.clone());
        }

        debug!(target = %self.target, "Connecting to Redis");
        let conn = self
            .client
            .get_multiplexed_async_connection()
            .await
            .map_err(classify)?;
        *cached = Some(conn.clone());
        Ok(conn)
    }

    /// Run one command, bounding connect and command together by a single
    /// timeout, and drop the cached connection if the store turned out to
    /// be unreachable.
    async fn call<T, F, Fut>(&self, op: &'static str, f: F) -> std::result::Result<T, StoreError>
    where
        F: FnOnce(MultiplexedConnection) -> Fut,
        Fut: Future<Output = std::result::Result<T, RedisError>>,
    {
        let attempt = async {
            let conn = self.connection().await?;
            f(conn).await.map_err(classify)
        };
        let result = match tokio::time::timeout(self.timeout, attempt).await {
            Ok(result) => result,
            Err(_) => Err(StoreError::Unavailable(format!(
                "{} against {} timed out after {:?}",
                op, self.target, self.timeout
            ))),
        };

        if let Err(StoreError::Unavailable(_)) = result {
            self.connection.lock().await.take();
        }
        result
    }
}

#[async_trait]
impl CounterStore for RedisCounterStore {
    async fn increment(&self, key: &str) -> std::result::Result<u64, StoreError> {
        let count: i64 = self
            .call("INCR", |mut conn| async move { conn.incr(key, 1).await })
            .await?;
        count_from_reply(count)
    }

    async fn set_expiry(&self, key: &str, seconds: u64) -> std::result::Result<(), StoreError> {
        let seconds = i64::try_from(seconds)
            .map_err(|_| StoreError::Protocol(format!("expiry {} out of range", seconds)))?;
        let _: bool = self
            .call("EXPIRE", |mut conn| async move { conn.expire(key, seconds).await })
            .await?;
        Ok(())
    }

    async fn get_expiry(&self, key: &str) -> std::result::Result<Expiry, StoreError> {
        let ttl: i64 = self
            .call("TTL", |mut conn| async move { conn.ttl(key).await })
            .await?;
        Expiry::from_ttl(ttl)
    }
}

/// An `INCR` reply is the counter after increment, so it is at least 1.
fn count_from_reply(count: i64) -> std::result::Result<u64, StoreError> {
    u64::try_from(count)
        .ok()
        .filter(|count| *count > 0)
        .ok_or_else(|| StoreError::Protocol(format!("INCR returned {}", count)))
}

/// Map a Redis client error onto the store error taxonomy.
///
/// Rejected credentials leave the store as unreachable as a refused
/// connection. Permission and key-type errors are replies we cannot use.
fn classify(err: RedisError) -> StoreError {
    if err.is_io_error()
        || err.is_timeout()
        || err.is_connection_refusal()
        || err.is_connection_dropped()
    {
        return StoreError::Unavailable(err.to_string());
    }

    if err.code() == Some("NOAUTH") {
        return StoreError::Unavailable(err.to_string());
    }

    match err.kind() {
        ErrorKind::AuthenticationFailed | ErrorKind::InvalidClientConfig => {
            StoreError::Unavailable(err.to_string())
        }
        ErrorKind::TypeError | ErrorKind::ResponseError | ErrorKind::ExtensionError => {
            StoreError::Protocol(err.to_string())
        }
        _ => StoreError::Unavailable(err.to_string()),
    }
}

/// Mask the password in a Redis URL so it can be logged.
fn sanitize_url(url: &str) -> String {
    match url::Url::parse(url) {
        Ok(mut parsed) => {
            if parsed.password().is_some() {
                let _ = parsed.set_password(Some("***"));
            }
            parsed.to_string()
        }
        Err(_) => "invalid_url".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StoreBackend;

    fn store_config(url: &str) -> StoreConfig {
        StoreConfig {
            backend: StoreBackend::Redis,
            url: Some(url.to_string()),
            timeout_ms: 500,
        }
    }

    #[test]
    fn test_sanitize_url_masks_password() {
        assert_eq!(
            sanitize_url("redis://:hunter2@cache:6379/0"),
            "redis://:***@cache:6379/0"
        );
        assert_eq!(sanitize_url("redis://cache:6379"), "redis://cache:6379");
        assert_eq!(sanitize_url("::"), "invalid_url");
    }

    #[test]
    fn test_new_rejects_invalid_url() {
        let result = RedisCounterStore::new(&store_config("http://not-redis"));
        assert!(matches!(result, Err(TurnstileError::Config(_))));
    }

    #[test]
    fn test_new_rejects_missing_url() {
        let mut config = store_config("redis://localhost");
        config.url = None;
        assert!(matches!(
            RedisCounterStore::new(&config),
            Err(TurnstileError::Config(_))
        ));
    }

    #[test]
    fn test_new_does_not_connect() {
        let store = RedisCounterStore::new(&store_config("redis://:pw@127.0.0.1:1/0")).unwrap();
        assert_eq!(store.target(), "redis://:***@127.0.0.1:1/0");
    }

    #[test]
    fn test_classify_io_errors_as_unavailable() {
        let io = std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "refused");
        assert!(matches!(
            classify(RedisError::from(io)),
            StoreError::Unavailable(_)
        ));
    }

    #[test]
    fn test_classify_auth_as_unavailable() {
        let err = RedisError::from((ErrorKind::AuthenticationFailed, "bad password"));
        assert!(matches!(classify(err), StoreError::Unavailable(_)));
    }

    #[test]
    fn test_classify_key_type_error_as_protocol() {
        let err = RedisError::from((
            ErrorKind::ExtensionError,
            "WRONGTYPE",
            "Operation against a key holding the wrong kind of value".to_string(),
        ));
        assert!(matches!(classify(err), StoreError::Protocol(_)));
    }

    #[test]
    fn test_count_from_reply() {
        assert_eq!(count_from_reply(1), Ok(1));
        assert_eq!(count_from_reply(42), Ok(42));
        assert!(matches!(count_from_reply(0), Err(StoreError::Protocol(_))));
        assert!(matches!(count_from_reply(-3), Err(StoreError::Protocol(_))));
    }

    #[test]
    fn test_classify_type_error_as_protocol() {
        let err = RedisError::from((ErrorKind::TypeError, "response was nil"));
        assert!(matches!(classify(err), StoreError::Protocol(_)));
    }

    #[tokio::test]
    async fn test_unreachable_store_is_unavailable() {
        let store = RedisCounterStore::new(&store_config("redis://127.0.0.1:1/")).unwrap();

        let result = store.increment("rate_limit:1.2.3.4").await;
        assert!(matches!(result, Err(StoreError::Unavailable(_))));

        let result = store.get_expiry("rate_limit:1.2.3.4").await;
        assert!(matches!(result, Err(StoreError::Unavailable(_))));
    }

    #[tokio::test]
    async fn test_concurrent_calls_share_one_deadline() {
        let mut config = store_config("redis://10.255.255.1:6379/");
        config.timeout_ms = 200;
        let store = std::sync::Arc::new(RedisCounterStore::new(&config).unwrap());

        let started = std::time::Instant::now();
        let tasks = (0..10).map(|_| {
            let store = store.clone();
            tokio::spawn(async move { store.increment("rate_limit:1.2.3.4").await })
        });
        for result in futures::future::join_all(tasks).await {
            assert!(matches!(result.unwrap(), Err(StoreError::Unavailable(_))));
        }

        // Waiting for the dial lock counts against each call's timeout.
        assert!(started.elapsed() < std::time::Duration::from_secs(1));
    }

    /// Runs against a live Redis; set `TURNSTILE_TEST_REDIS_URL` to point
    /// it elsewhere than localhost.
    #[tokio::test]
    #[ignore = "requires a running Redis"]
    async fn test_live_redis_window_commands() {
        let url = std::env::var("TURNSTILE_TEST_REDIS_URL")
            .unwrap_or_else(|_| "redis://127.0.0.1:6379/".to_string());
        let store = RedisCounterStore::new(&store_config(&url)).unwrap();
        let key = format!("turnstile-test:{}", std::process::id());

        assert_eq!(store.get_expiry(&key).await.unwrap(), Expiry::Missing);

        assert_eq!(store.increment(&key).await.unwrap(), 1);
        assert_eq!(store.get_expiry(&key).await.unwrap(), Expiry::Persistent);

        store.set_expiry(&key, 30).await.unwrap();
        store.set_expiry(&key, 30).await.unwrap();
        assert!(matches!(
            store.get_expiry(&key).await.unwrap(),
            Expiry::Remaining(secs) if secs > 0 && secs <= 30
        ));

        assert_eq!(store.increment(&key).await.unwrap(), 2);

        store.set_expiry(&key, 1).await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(1100)).await;
        assert_eq!(store.get_expiry(&key).await.unwrap(), Expiry::Missing);
        assert_eq!(store.increment(&key).await.unwrap(), 1);
        store.set_expiry(&key, 1).await.unwrap();
    }
}
