use redis::aio::ConnectionManager;
use redis::Client;
use tokio::sync::RwLock;

use crate::config::Config;
use crate::error::AppError;

/// Connection retries: 3 attempts with capped exponential backoff.
const RETRY_EXPONENT_BASE: u64 = 2;
const RETRY_FACTOR: u64 = 100;
const RETRY_COUNT: usize = 3;

/// Async client for the shared counter store.
///
/// The managed connection lives behind a lock so the limiter can run before
/// the handshake completes (or after it failed); every operation reports an
/// error until `connect` succeeds.
pub struct RedisStore {
    client: Client,
    manager: RwLock<Option<ConnectionManager>>,
}

impl RedisStore {
    pub fn new(config: &Config) -> Result<Self, AppError> {
        let client = Client::open(config.redis_url().as_str())?;

        Ok(Self {
            client,
            manager: RwLock::new(None),
        })
    }

    /// Establish the managed connection. The manager reconnects on its own
    /// after transient failures; this only performs the initial handshake.
    pub async fn connect(&self) -> Result<(), AppError> {
        let manager = ConnectionManager::new_with_backoff(
            self.client.clone(),
            RETRY_EXPONENT_BASE,
            RETRY_FACTOR,
            RETRY_COUNT,
        )
        .await?;

        *self.manager.write().await = Some(manager);
        Ok(())
    }

    async fn connection(&self) -> Result<ConnectionManager, AppError> {
        self.manager
            .read()
            .await
            .clone()
            .ok_or_else(|| AppError::Redis("no connection established".to_string()))
    }

    pub async fn ping(&self) -> Result<(), AppError> {
        let mut conn = self.connection().await?;
        redis::cmd("PING").query_async::<_, String>(&mut conn).await?;
        Ok(())
    }

    /// Atomically increment the counter at `key`, creating it at 1.
    pub async fn incr(&self, key: &str) -> Result<i64, AppError> {
        let mut conn = self.connection().await?;
        let count = redis::cmd("INCR")
            .arg(key)
            .query_async::<_, i64>(&mut conn)
            .await?;
        Ok(count)
    }

    /// Set the key's expiry, in milliseconds from now.
    pub async fn pexpire(&self, key: &str, window_ms: u64) -> Result<(), AppError> {
        let mut conn = self.connection().await?;
        redis::cmd("PEXPIRE")
            .arg(key)
            .arg(window_ms)
            .query_async::<_, i64>(&mut conn)
            .await?;
        Ok(())
    }

    /// Remaining time-to-live in milliseconds. Negative when the key has no
    /// expiry (-1) or does not exist (-2).
    pub async fn pttl(&self, key: &str) -> Result<i64, AppError> {
        let mut conn = self.connection().await?;
        let ttl = redis::cmd("PTTL")
            .arg(key)
            .query_async::<_, i64>(&mut conn)
            .await?;
        Ok(ttl)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_operations_require_connection() {
        let store = RedisStore::new(&Config::default()).unwrap();

        assert!(store.ping().await.is_err());
        assert!(store.incr("ratelimit:test").await.is_err());
        assert!(store.pexpire("ratelimit:test", 1000).await.is_err());
        assert!(store.pttl("ratelimit:test").await.is_err());
    }
}
