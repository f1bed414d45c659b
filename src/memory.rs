use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};

use crate::rate_limiter::{epoch_ms, RateLimitPolicy, RateLimitResult};

/// Counter state for one identifier in its current window.
#[derive(Debug, Clone)]
struct CounterEntry {
    count: u64,
    reset_at_ms: u64,
}

/// In-process fallback store, used when Redis is unavailable.
///
/// Expired entries are replaced lazily on access; the periodic sweep bounds
/// memory growth from identifiers that never come back.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, CounterEntry>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Count one request against the identifier's current window.
    pub fn check(&self, policy: &RateLimitPolicy) -> RateLimitResult {
        self.check_at(policy, epoch_ms())
    }

    pub(crate) fn check_at(&self, policy: &RateLimitPolicy, now_ms: u64) -> RateLimitResult {
        let window_ms = policy.window_seconds.saturating_mul(1000);
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);

        let entry = entries.entry(policy.identifier.clone()).or_insert(CounterEntry {
            count: 0,
            reset_at_ms: now_ms + window_ms,
        });

        // A leftover entry from an expired window starts over.
        if entry.reset_at_ms < now_ms {
            *entry = CounterEntry {
                count: 0,
                reset_at_ms: now_ms + window_ms,
            };
        }

        entry.count += 1;

        RateLimitResult {
            allowed: entry.count <= policy.max_requests,
            remaining: policy.max_requests.saturating_sub(entry.count),
            reset_at: entry.reset_at_ms / 1000,
            limit: policy.max_requests,
        }
    }

    /// Remove entries whose window has passed. Returns how many were removed.
    pub fn sweep(&self) -> usize {
        self.sweep_at(epoch_ms())
    }

    pub(crate) fn sweep_at(&self, now_ms: u64) -> usize {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        let before = entries.len();
        entries.retain(|_, entry| entry.reset_at_ms >= now_ms);
        before - entries.len()
    }

    /// Number of tracked identifiers.
    pub fn len(&self) -> usize {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy(max_requests: u64, window_seconds: u64, identifier: &str) -> RateLimitPolicy {
        RateLimitPolicy::new(max_requests, window_seconds, identifier)
    }

    #[test]
    fn test_counts_up_to_limit_then_denies() {
        let store = MemoryStore::new();
        let policy = policy(3, 3600, "forgot-password:a@x.com");
        let now_ms = 1_700_000_000_000;

        for expected_remaining in [2, 1, 0] {
            let result = store.check_at(&policy, now_ms);
            assert!(result.allowed);
            assert_eq!(result.remaining, expected_remaining);
            assert_eq!(result.limit, 3);
        }

        let result = store.check_at(&policy, now_ms);
        assert!(!result.allowed);
        assert_eq!(result.remaining, 0);
        assert_eq!(result.limit, 3);
    }

    #[test]
    fn test_reset_at_is_window_end_in_seconds() {
        let store = MemoryStore::new();
        let policy = policy(5, 60, "client-log:10.0.0.1");
        let now_ms = 1_700_000_000_000;

        let result = store.check_at(&policy, now_ms);
        assert_eq!(result.reset_at, (now_ms + 60_000) / 1000);

        // The window end does not move on later requests.
        let result = store.check_at(&policy, now_ms + 30_000);
        assert_eq!(result.reset_at, (now_ms + 60_000) / 1000);
    }

    #[test]
    fn test_expired_window_starts_fresh() {
        let store = MemoryStore::new();
        let policy = policy(2, 60, "resend-verification:a@x.com");
        let now_ms = 1_700_000_000_000;

        store.check_at(&policy, now_ms);
        store.check_at(&policy, now_ms);
        assert!(!store.check_at(&policy, now_ms).allowed);

        // Past the window the counter restarts at 1.
        let later = now_ms + 61_000;
        let result = store.check_at(&policy, later);
        assert!(result.allowed);
        assert_eq!(result.remaining, 1);
        assert_eq!(result.reset_at, (later + 60_000) / 1000);
    }

    #[test]
    fn test_identifiers_do_not_share_counters() {
        let store = MemoryStore::new();
        let now_ms = 1_700_000_000_000;
        let first = policy(2, 60, "forgot-password:a@x.com");
        let second = policy(2, 60, "forgot-password:b@x.com");

        store.check_at(&first, now_ms);
        store.check_at(&first, now_ms);

        let result = store.check_at(&second, now_ms);
        assert!(result.allowed);
        assert_eq!(result.remaining, 1);
    }

    #[test]
    fn test_sweep_removes_only_expired_entries() {
        let store = MemoryStore::new();
        let now_ms = 1_700_000_000_000;

        store.check_at(&policy(5, 60, "short-lived"), now_ms);
        store.check_at(&policy(5, 3600, "long-lived"), now_ms);
        assert_eq!(store.len(), 2);

        let cleaned = store.sweep_at(now_ms + 61_000);
        assert_eq!(cleaned, 1);
        assert_eq!(store.len(), 1);
    }
}
