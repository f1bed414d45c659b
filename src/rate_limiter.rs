use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use tracing::{debug, info, warn};

use crate::config::Config;
use crate::error::AppError;
use crate::memory::MemoryStore;
use crate::redis::RedisStore;

/// Namespace prefix for shared-store keys.
const KEY_PREFIX: &str = "ratelimit";

/// How often the probe pings Redis while the limiter is degraded.
const RECONNECT_PROBE_INTERVAL: Duration = Duration::from_secs(5);

/// Which backend is serving decisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendState {
    /// Redis is reachable; counters are shared across instances.
    SharedActive = 0,
    /// Redis is unreachable; counters live in process-local memory.
    SharedDegraded = 1,
}

impl BackendState {
    fn from_u8(value: u8) -> Self {
        if value == BackendState::SharedActive as u8 {
            BackendState::SharedActive
        } else {
            BackendState::SharedDegraded
        }
    }
}

/// Caller-supplied limit for a single check.
#[derive(Debug, Clone)]
pub struct RateLimitPolicy {
    /// Maximum number of requests allowed in the time window
    pub max_requests: u64,

    /// Time window in seconds
    pub window_seconds: u64,

    /// Scoping key, e.g. "forgot-password:user@example.com" or a client IP.
    /// Case normalization is the caller's responsibility.
    pub identifier: String,
}

impl RateLimitPolicy {
    pub fn new(max_requests: u64, window_seconds: u64, identifier: impl Into<String>) -> Self {
        Self {
            max_requests,
            window_seconds,
            identifier: identifier.into(),
        }
    }
}

/// Outcome of a rate limit check.
#[derive(Debug, Clone)]
pub struct RateLimitResult {
    /// Whether the request is allowed
    pub allowed: bool,

    /// Number of requests remaining in the current window
    pub remaining: u64,

    /// Epoch seconds when the window resets
    pub reset_at: u64,

    /// Total number of requests allowed in the window
    pub limit: u64,
}

struct Inner {
    memory: MemoryStore,
    redis: Option<RedisStore>,
    state: AtomicU8,
}

/// Fixed-window rate limiter with a shared Redis backend and an in-process
/// fallback.
///
/// One instance per process, cloned into every handler. Clones share state.
#[derive(Clone)]
pub struct RateLimiter {
    inner: Arc<Inner>,
}

impl RateLimiter {
    /// Create a limiter in degraded (local-only) mode. Call `connect` to
    /// attempt the shared-store handshake.
    pub fn new(config: &Config) -> Self {
        let redis = match RedisStore::new(config) {
            Ok(store) => Some(store),
            Err(err) => {
                warn!(
                    target: "floodgate::rate_limiter",
                    error = %err,
                    "Failed to initialize Redis client, using in-memory store only"
                );
                None
            }
        };

        Self {
            inner: Arc::new(Inner {
                memory: MemoryStore::new(),
                redis,
                state: AtomicU8::new(BackendState::SharedDegraded as u8),
            }),
        }
    }

    /// Startup handshake against the shared store.
    pub async fn connect(&self) {
        let Some(redis) = &self.inner.redis else {
            return;
        };

        match redis.connect().await {
            Ok(()) => {
                self.set_state(BackendState::SharedActive);
                info!(target: "floodgate::rate_limiter", "Connected to Redis");
            }
            Err(err) => {
                self.set_state(BackendState::SharedDegraded);
                warn!(
                    target: "floodgate::rate_limiter",
                    error = %err,
                    "Redis unavailable at startup, using in-memory fallback"
                );
            }
        }
    }

    pub fn state(&self) -> BackendState {
        BackendState::from_u8(self.inner.state.load(Ordering::Relaxed))
    }

    fn set_state(&self, state: BackendState) {
        self.inner.state.store(state as u8, Ordering::Relaxed);
    }

    /// Count one request against `policy` and decide whether it is allowed.
    ///
    /// Always yields a decision: a shared-store failure flips the limiter to
    /// the in-memory store and the same request is retried there, so backend
    /// trouble never surfaces to the caller.
    pub async fn check(&self, policy: &RateLimitPolicy) -> RateLimitResult {
        debug_assert!(policy.max_requests > 0 && policy.window_seconds > 0);

        match self.state() {
            BackendState::SharedActive => match self.check_shared(policy).await {
                Ok(result) => result,
                Err(err) => {
                    warn!(
                        target: "floodgate::rate_limiter",
                        identifier = %policy.identifier,
                        error = %err,
                        "Redis failed, falling back to in-memory"
                    );
                    self.set_state(BackendState::SharedDegraded);
                    self.inner.memory.check(policy)
                }
            },
            BackendState::SharedDegraded => self.inner.memory.check(policy),
        }
    }

    async fn check_shared(&self, policy: &RateLimitPolicy) -> Result<RateLimitResult, AppError> {
        let redis = self
            .inner
            .redis
            .as_ref()
            .ok_or_else(|| AppError::Redis("client not initialized".to_string()))?;

        let now_ms = epoch_ms();
        let window_ms = policy.window_seconds.saturating_mul(1000);
        let key = format!("{KEY_PREFIX}:{}", policy.identifier);

        let count = redis.incr(&key).await?;

        // A fresh key gets the window expiry; afterwards the TTL just runs down.
        if count == 1 {
            redis.pexpire(&key, window_ms).await?;
        }

        let ttl = redis.pttl(&key).await?;
        let reset_at = if ttl > 0 {
            (now_ms + ttl as u64) / 1000
        } else {
            (now_ms + window_ms) / 1000
        };

        let count = count as u64;
        let allowed = count <= policy.max_requests;
        let remaining = policy.max_requests.saturating_sub(count);

        if remaining == policy.max_requests.div_ceil(5) {
            debug!(
                target: "floodgate::rate_limiter",
                identifier = %policy.identifier,
                count,
                max_requests = policy.max_requests,
                remaining,
                "Rate limit threshold approaching"
            );
        }

        Ok(RateLimitResult {
            allowed,
            remaining,
            reset_at,
            limit: policy.max_requests,
        })
    }

    /// Periodically drop expired in-memory entries.
    pub fn spawn_sweeper(&self, interval: Duration) -> tokio::task::JoinHandle<()> {
        let limiter = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval.max(Duration::from_secs(1)));
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let cleaned = limiter.inner.memory.sweep();
                if cleaned > 0 {
                    debug!(
                        target: "floodgate::rate_limiter",
                        cleaned,
                        "Cleaned up expired in-memory rate limit entries"
                    );
                }
            }
        })
    }

    /// Watch for Redis coming back while degraded and promote the shared
    /// backend again. Stands in for a client-side reconnect event.
    pub fn spawn_reconnect_probe(&self) -> tokio::task::JoinHandle<()> {
        let limiter = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(RECONNECT_PROBE_INTERVAL);
            ticker.tick().await;
            loop {
                ticker.tick().await;

                if limiter.state() == BackendState::SharedActive {
                    continue;
                }
                let Some(redis) = &limiter.inner.redis else {
                    break;
                };

                // The manager reconnects on its own, so a plain ping may
                // already succeed; otherwise redo the handshake.
                let recovered = match redis.ping().await {
                    Ok(()) => true,
                    Err(_) => redis.connect().await.is_ok() && redis.ping().await.is_ok(),
                };

                if recovered {
                    limiter.set_state(BackendState::SharedActive);
                    info!(target: "floodgate::rate_limiter", "Reconnected to Redis");
                }
            }
        })
    }
}

/// Milliseconds since the Unix epoch.
pub(crate) fn epoch_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    fn local_limiter() -> RateLimiter {
        // The Redis client is never connected, so checks run against the
        // in-memory store.
        RateLimiter::new(&Config::default())
    }

    #[tokio::test]
    async fn test_starts_degraded_until_connected() {
        let limiter = local_limiter();
        assert_eq!(limiter.state(), BackendState::SharedDegraded);
    }

    #[tokio::test]
    async fn test_allows_up_to_limit_then_denies() {
        let limiter = local_limiter();
        let policy = RateLimitPolicy::new(3, 3600, "forgot-password:a@x.com");

        for expected_remaining in [2, 1, 0] {
            let result = limiter.check(&policy).await;
            assert!(result.allowed);
            assert_eq!(result.remaining, expected_remaining);
        }

        let result = limiter.check(&policy).await;
        assert!(!result.allowed);
        assert_eq!(result.remaining, 0);
        assert_eq!(result.limit, 3);
    }

    #[tokio::test]
    async fn test_identifiers_are_isolated() {
        let limiter = local_limiter();
        let first = RateLimitPolicy::new(1, 60, "client-log:10.0.0.1");
        let second = RateLimitPolicy::new(1, 60, "client-log:10.0.0.2");

        assert!(limiter.check(&first).await.allowed);
        assert!(!limiter.check(&first).await.allowed);
        assert!(limiter.check(&second).await.allowed);
    }

    #[tokio::test]
    async fn test_shared_failure_degrades_and_still_counts() {
        let limiter = local_limiter();
        // Simulate an established connection that has since gone away.
        limiter.set_state(BackendState::SharedActive);

        let policy = RateLimitPolicy::new(2, 60, "forgot-password:a@x.com");

        // The shared path errors (no connection), the same call lands on the
        // in-memory store, and the caller still gets a decision.
        let result = limiter.check(&policy).await;
        assert!(result.allowed);
        assert_eq!(result.remaining, 1);
        assert_eq!(limiter.state(), BackendState::SharedDegraded);

        // Counting continues correctly on the fallback.
        assert!(limiter.check(&policy).await.allowed);
        assert!(!limiter.check(&policy).await.allowed);
    }
}
