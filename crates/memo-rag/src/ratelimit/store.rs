//! Shared counter stores for the rate limiter

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::error::{Error, Result};
use crate::storage::MemoDb;

/// One identity's counter for the current window
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimitEntry {
    /// Requests admitted in the window
    pub count: u32,
    /// When the window ends
    pub reset_at: DateTime<Utc>,
    /// When the window began
    pub created_at: DateTime<Utc>,
}

impl RateLimitEntry {
    /// A window opened by its first request
    pub fn fresh(now: DateTime<Utc>, window: chrono::Duration) -> Self {
        Self {
            count: 1,
            reset_at: now + window,
            created_at: now,
        }
    }

    /// True while `now` is inside the window
    pub fn is_active(&self, now: DateTime<Utc>) -> bool {
        now < self.reset_at
    }
}

/// Source of truth for rate-limit counters, shared across instances
///
/// Implementations:
/// - `SqliteRateLimitStore`: the memo database
/// - `InMemoryRateLimitStore`: process-local, for single-instance runs and tests
#[async_trait]
pub trait RateLimitStore: Send + Sync {
    async fn get(&self, identity: &str) -> Result<Option<RateLimitEntry>>;

    async fn put(&self, identity: &str, entry: RateLimitEntry) -> Result<()>;

    async fn delete(&self, identity: &str) -> Result<()>;

    /// Delete at most `limit` entries created before `cutoff`, returning the count
    async fn delete_created_before(&self, cutoff: DateTime<Utc>, limit: usize) -> Result<usize>;

    /// Get store name for logging
    fn name(&self) -> &str;
}

/// Process-local counter store
#[derive(Default)]
pub struct InMemoryRateLimitStore {
    entries: DashMap<String, RateLimitEntry>,
}

impl InMemoryRateLimitStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[async_trait]
impl RateLimitStore for InMemoryRateLimitStore {
    async fn get(&self, identity: &str) -> Result<Option<RateLimitEntry>> {
        Ok(self.entries.get(identity).map(|e| *e))
    }

    async fn put(&self, identity: &str, entry: RateLimitEntry) -> Result<()> {
        self.entries.insert(identity.to_string(), entry);
        Ok(())
    }

    async fn delete(&self, identity: &str) -> Result<()> {
        self.entries.remove(identity);
        Ok(())
    }

    async fn delete_created_before(&self, cutoff: DateTime<Utc>, limit: usize) -> Result<usize> {
        let stale: Vec<String> = self
            .entries
            .iter()
            .filter(|e| e.created_at < cutoff)
            .take(limit)
            .map(|e| e.key().clone())
            .collect();

        for identity in &stale {
            self.entries.remove(identity);
        }
        Ok(stale.len())
    }

    fn name(&self) -> &str {
        "memory"
    }
}

/// Counter store in the SQLite memo database
pub struct SqliteRateLimitStore {
    db: Arc<MemoDb>,
}

impl SqliteRateLimitStore {
    pub fn new(db: Arc<MemoDb>) -> Self {
        Self { db }
    }

    async fn run<F, T>(&self, op: F) -> Result<T>
    where
        F: FnOnce(&MemoDb) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let db = Arc::clone(&self.db);
        tokio::task::spawn_blocking(move || op(&db))
            .await
            .map_err(|e| Error::Internal(format!("Task join error: {}", e)))?
    }
}

#[async_trait]
impl RateLimitStore for SqliteRateLimitStore {
    async fn get(&self, identity: &str) -> Result<Option<RateLimitEntry>> {
        let identity = identity.to_string();
        self.run(move |db| db.get_rate_limit(&identity)).await
    }

    async fn put(&self, identity: &str, entry: RateLimitEntry) -> Result<()> {
        let identity = identity.to_string();
        self.run(move |db| db.put_rate_limit(&identity, &entry)).await
    }

    async fn delete(&self, identity: &str) -> Result<()> {
        let identity = identity.to_string();
        self.run(move |db| db.delete_rate_limit(&identity)).await
    }

    async fn delete_created_before(&self, cutoff: DateTime<Utc>, limit: usize) -> Result<usize> {
        self.run(move |db| db.delete_rate_limits_created_before(cutoff, limit))
            .await
    }

    fn name(&self) -> &str {
        "sqlite"
    }
}
