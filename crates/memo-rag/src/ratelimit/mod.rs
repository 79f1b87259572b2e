//! Per-identity fixed-window rate limiting
//!
//! A shared [`RateLimitStore`] is the source of truth; each process keeps a
//! [`DashMap`] cache of the entries it has seen so that repeat callers inside
//! an active window never touch the store. The cache is only eventually
//! consistent with other processes, and concurrent read-modify-write on the
//! store may undercount slightly.
//!
//! Store failures never block callers: the limiter fails open.

mod store;

pub use store::{InMemoryRateLimitStore, RateLimitEntry, RateLimitStore, SqliteRateLimitStore};

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::sync::Arc;
use tokio::task::JoinHandle;

use crate::config::{RateLimitConfig, MAX_RATE_LIMIT_WINDOW_MS};
use crate::error::Result;

/// Fixed-window limiter with a local cache over a shared store
pub struct RateLimiter {
    config: RateLimitConfig,
    cache: DashMap<String, RateLimitEntry>,
    store: Arc<dyn RateLimitStore>,
}

impl RateLimiter {
    pub fn new(config: RateLimitConfig, store: Arc<dyn RateLimitStore>) -> Self {
        tracing::info!(
            "Rate limiter: {} requests per {}ms (store: {}, enabled: {})",
            config.max_requests,
            config.window_ms,
            store.name(),
            config.enabled
        );
        Self {
            config,
            cache: DashMap::new(),
            store,
        }
    }

    /// Window length, clamped so timestamp arithmetic cannot overflow
    fn window(&self) -> chrono::Duration {
        let ms = self.config.window_ms.min(MAX_RATE_LIMIT_WINDOW_MS);
        chrono::Duration::milliseconds(i64::try_from(ms).unwrap_or(i64::MAX))
    }

    /// Admit or reject one request from `identity`
    pub async fn allow(&self, identity: &str) -> bool {
        self.allow_at(identity, Utc::now()).await
    }

    /// [`allow`](Self::allow) with an explicit clock
    pub async fn allow_at(&self, identity: &str, now: DateTime<Utc>) -> bool {
        if !self.config.enabled {
            return true;
        }

        if let Some(admitted) = self.check_cache(identity, now) {
            return admitted;
        }

        let stored = match self.store.get(identity).await {
            Ok(entry) => entry,
            Err(e) => {
                tracing::warn!("Rate limit store read failed for {}, allowing: {}", identity, e);
                return true;
            }
        };

        let (entry, admitted) = match stored {
            Some(entry) if entry.is_active(now) => {
                if entry.count < self.config.max_requests {
                    (
                        RateLimitEntry {
                            count: entry.count + 1,
                            ..entry
                        },
                        true,
                    )
                } else {
                    (entry, false)
                }
            }
            _ => (RateLimitEntry::fresh(now, self.window()), true),
        };

        if admitted {
            if let Err(e) = self.store.put(identity, entry).await {
                tracing::warn!("Rate limit store write failed for {}, allowing: {}", identity, e);
            }
        } else {
            tracing::debug!("Rate limit reached for {} until {}", identity, entry.reset_at);
        }

        self.cache.insert(identity.to_string(), entry);
        admitted
    }

    /// Decide from the local cache alone; `None` on miss or expired entry
    fn check_cache(&self, identity: &str, now: DateTime<Utc>) -> Option<bool> {
        let mut entry = self.cache.get_mut(identity)?;
        if !entry.is_active(now) {
            return None;
        }
        if entry.count < self.config.max_requests {
            entry.count += 1;
            Some(true)
        } else {
            Some(false)
        }
    }

    /// When the identity's current window ends
    ///
    /// Falls back to one window from now when nothing is known.
    pub async fn reset_time(&self, identity: &str) -> DateTime<Utc> {
        self.reset_time_at(identity, Utc::now()).await
    }

    pub async fn reset_time_at(&self, identity: &str, now: DateTime<Utc>) -> DateTime<Utc> {
        if let Some(entry) = self.cache.get(identity) {
            if entry.is_active(now) {
                return entry.reset_at;
            }
        }

        match self.store.get(identity).await {
            Ok(Some(entry)) if entry.is_active(now) => entry.reset_at,
            Ok(_) => now + self.window(),
            Err(e) => {
                tracing::warn!("Rate limit store read failed for {}: {}", identity, e);
                now + self.window()
            }
        }
    }

    /// Whole seconds until the identity may retry, at least 1
    pub async fn retry_after_secs(&self, identity: &str) -> u64 {
        let now = Utc::now();
        let reset_at = self.reset_time_at(identity, now).await;
        retry_after_secs(reset_at, now)
    }

    /// Forget the identity's counter, locally and in the store
    pub async fn reset(&self, identity: &str) -> Result<()> {
        self.cache.remove(identity);
        self.store.delete(identity).await
    }

    /// Drop expired cache entries and delete stale store entries
    ///
    /// Store entries created more than two windows ago are removed, at most
    /// `cleanup_batch_size` per sweep. Returns how many store entries went.
    pub async fn sweep_at(&self, now: DateTime<Utc>) -> usize {
        self.cache.retain(|_, entry| entry.is_active(now));

        let cutoff = now - self.window() * 2;
        match self
            .store
            .delete_created_before(cutoff, self.config.cleanup_batch_size)
            .await
        {
            Ok(deleted) => {
                if deleted > 0 {
                    tracing::debug!("Rate limit cleanup removed {} entries", deleted);
                }
                deleted
            }
            Err(e) => {
                tracing::warn!("Rate limit cleanup failed: {}", e);
                0
            }
        }
    }

    pub async fn sweep(&self) -> usize {
        self.sweep_at(Utc::now()).await
    }

    /// Spawn the periodic sweep; abort the handle to stop it
    pub fn start_cleanup(self: &Arc<Self>) -> JoinHandle<()> {
        let limiter = Arc::clone(self);
        let period = self.config.cleanup_interval();

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            // First tick completes immediately
            ticker.tick().await;
            loop {
                ticker.tick().await;
                limiter.sweep().await;
            }
        })
    }

    /// Number of identities in the local cache
    pub fn cached_identities(&self) -> usize {
        self.cache.len()
    }
}

/// Ceiling of the seconds between `now` and `reset_at`, never below 1
pub fn retry_after_secs(reset_at: DateTime<Utc>, now: DateTime<Utc>) -> u64 {
    let ms = (reset_at - now).num_milliseconds();
    if ms <= 0 {
        return 1;
    }
    u64::try_from(ms).unwrap_or(u64::MAX).div_ceil(1000)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use async_trait::async_trait;
    use chrono::Duration;

    fn config(max: u32) -> RateLimitConfig {
        RateLimitConfig {
            enabled: true,
            window_ms: 60_000,
            max_requests: max,
            cleanup_batch_size: 100,
        }
    }

    fn limiter(max: u32) -> (RateLimiter, Arc<InMemoryRateLimitStore>) {
        let store = Arc::new(InMemoryRateLimitStore::new());
        (RateLimiter::new(config(max), store.clone()), store)
    }

    struct FailingStore;

    #[async_trait]
    impl RateLimitStore for FailingStore {
        async fn get(&self, _: &str) -> Result<Option<RateLimitEntry>> {
            Err(Error::internal("store offline"))
        }
        async fn put(&self, _: &str, _: RateLimitEntry) -> Result<()> {
            Err(Error::internal("store offline"))
        }
        async fn delete(&self, _: &str) -> Result<()> {
            Err(Error::internal("store offline"))
        }
        async fn delete_created_before(&self, _: DateTime<Utc>, _: usize) -> Result<usize> {
            Err(Error::internal("store offline"))
        }
        fn name(&self) -> &str {
            "failing"
        }
    }

    #[tokio::test]
    async fn test_n_plus_one_rejected() {
        let (limiter, _) = limiter(3);
        let now = Utc::now();

        for _ in 0..3 {
            assert!(limiter.allow_at("alice", now).await);
        }
        assert!(!limiter.allow_at("alice", now).await);
        assert!(limiter.allow_at("bob", now).await);
    }

    #[tokio::test]
    async fn test_window_resets() {
        let (limiter, _) = limiter(2);
        let start = Utc::now();

        assert!(limiter.allow_at("alice", start).await);
        assert!(limiter.allow_at("alice", start).await);
        assert!(!limiter.allow_at("alice", start + Duration::seconds(59)).await);
        assert!(limiter.allow_at("alice", start + Duration::seconds(60)).await);
    }

    #[tokio::test]
    async fn test_store_is_source_of_truth_on_cache_miss() {
        let store = Arc::new(InMemoryRateLimitStore::new());
        let now = Utc::now();
        let first = RateLimiter::new(config(2), store.clone());
        assert!(first.allow_at("alice", now).await);
        assert!(first.allow_at("alice", now).await);

        // A second process sharing the store sees the exhausted window
        let second = RateLimiter::new(config(2), store);
        assert!(!second.allow_at("alice", now).await);
    }

    #[tokio::test]
    async fn test_fails_open_when_store_errors() {
        let limiter = RateLimiter::new(config(1), Arc::new(FailingStore));
        let now = Utc::now();
        for _ in 0..5 {
            assert!(limiter.allow_at("alice", now).await);
        }
        assert_eq!(limiter.sweep_at(now).await, 0);
    }

    #[tokio::test]
    async fn test_disabled_admits_everything() {
        let mut cfg = config(1);
        cfg.enabled = false;
        let limiter = RateLimiter::new(cfg, Arc::new(InMemoryRateLimitStore::new()));
        for _ in 0..10 {
            assert!(limiter.allow("alice").await);
        }
    }

    #[tokio::test]
    async fn test_reset_clears_cache_and_store() {
        let (limiter, store) = limiter(1);
        let now = Utc::now();
        assert!(limiter.allow_at("alice", now).await);
        assert!(!limiter.allow_at("alice", now).await);

        limiter.reset("alice").await.unwrap();
        assert!(store.is_empty());
        assert!(limiter.allow_at("alice", now).await);
    }

    #[tokio::test]
    async fn test_sweep_prunes_expired_entries() {
        let (limiter, store) = limiter(5);
        let start = Utc::now();
        assert!(limiter.allow_at("alice", start).await);
        assert_eq!(limiter.cached_identities(), 1);

        let later = start + Duration::minutes(3);
        assert_eq!(limiter.sweep_at(later).await, 1);
        assert_eq!(limiter.cached_identities(), 0);
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_reset_time_reports_window_end() {
        let (limiter, _) = limiter(1);
        let now = Utc::now();
        limiter.allow_at("alice", now).await;
        assert_eq!(
            limiter.reset_time_at("alice", now).await,
            now + Duration::milliseconds(60_000)
        );
    }

    #[tokio::test]
    async fn test_reset_time_uses_wall_clock() {
        let (limiter, _) = limiter(1);
        let before = Utc::now();
        assert!(limiter.allow("alice").await);

        let reset_at = limiter.reset_time("alice").await;
        assert!(reset_at > before);
        assert!(reset_at <= Utc::now() + Duration::seconds(60));
    }

    #[tokio::test]
    async fn test_rejections_share_window_end() {
        let (limiter, _) = limiter(30);
        let now = Utc::now();
        let mut retry_afters = Vec::new();

        for _ in 0..35 {
            if !limiter.allow_at("alice", now).await {
                let reset_at = limiter.reset_time_at("alice", now).await;
                retry_afters.push(retry_after_secs(reset_at, now));
            }
        }

        assert_eq!(retry_afters, vec![60; 5]);
    }

    #[tokio::test]
    async fn test_oversized_window_is_clamped() {
        let mut cfg = config(1);
        cfg.window_ms = u64::MAX;
        let limiter = RateLimiter::new(cfg, Arc::new(InMemoryRateLimitStore::new()));
        let now = Utc::now();

        assert!(limiter.allow_at("alice", now).await);
        assert!(!limiter.allow_at("alice", now).await);
        assert_eq!(
            limiter.reset_time_at("alice", now).await,
            now + Duration::days(7)
        );
        assert_eq!(limiter.sweep_at(now).await, 0);
    }

    #[test]
    fn test_retry_after_rounds_up() {
        let now = Utc::now();
        assert_eq!(retry_after_secs(now + Duration::milliseconds(1_001), now), 2);
        assert_eq!(retry_after_secs(now + Duration::seconds(30), now), 30);
        assert_eq!(retry_after_secs(now, now), 1);
        assert_eq!(retry_after_secs(now - Duration::seconds(5), now), 1);
    }
}
