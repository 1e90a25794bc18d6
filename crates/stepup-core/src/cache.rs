//! Tenant policy cache using moka
//!
//! Read-mostly cache shared by concurrent workflow invocations. Entries are
//! immutable `Arc<Policy>` snapshots, so an evaluation never observes a policy
//! changing underneath it.

use crate::config::PolicyCacheConfig;
use crate::policy::Policy;
use crate::types::TenantId;
use moka::future::Cache;
use std::sync::Arc;
use std::time::Duration;

/// Statistics for cache monitoring
#[derive(Debug, Clone, Copy, Default)]
pub struct CacheStats {
    /// Number of entries in cache
    pub entry_count: u64,
}

/// Per-tenant policy cache
#[derive(Debug, Clone)]
pub struct PolicyCache {
    inner: Cache<TenantId, Arc<Policy>>,
}

impl PolicyCache {
    /// Create new cache with max capacity
    #[inline]
    #[must_use]
    pub fn new(max_capacity: u64) -> Self {
        Self {
            inner: Cache::new(max_capacity),
        }
    }

    /// Create cache with time-based expiration
    #[inline]
    #[must_use]
    pub fn with_ttl(max_capacity: u64, ttl: Duration) -> Self {
        Self {
            inner: Cache::builder()
                .max_capacity(max_capacity)
                .time_to_live(ttl)
                .build(),
        }
    }

    /// Build from config, `None` when caching is disabled
    #[must_use]
    pub fn from_config(config: &PolicyCacheConfig) -> Option<Self> {
        config
            .enabled
            .then(|| Self::with_ttl(config.capacity, Duration::from_secs(config.ttl_secs)))
    }

    /// Insert policy snapshot
    #[inline]
    pub async fn insert(&self, tenant_id: TenantId, policy: Arc<Policy>) {
        self.inner.insert(tenant_id, policy).await;
    }

    /// Get policy snapshot
    #[inline]
    pub async fn get(&self, tenant_id: &TenantId) -> Option<Arc<Policy>> {
        self.inner.get(tenant_id).await
    }

    /// Invalidate one tenant
    #[inline]
    pub async fn invalidate(&self, tenant_id: &TenantId) {
        self.inner.invalidate(tenant_id).await;
    }

    /// Invalidate all entries
    #[inline]
    pub fn invalidate_all(&self) {
        self.inner.invalidate_all();
    }

    /// Get cache statistics
    ///
    /// Counts are eventually consistent; pending maintenance is flushed first.
    pub async fn stats(&self) -> CacheStats {
        self.inner.run_pending_tasks().await;
        CacheStats {
            entry_count: self.inner.entry_count(),
        }
    }
}

impl Default for PolicyCache {
    fn default() -> Self {
        Self::new(1024)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal::Decimal;

    fn policy(threshold: i64) -> Arc<Policy> {
        Arc::new(Policy {
            amount_threshold: Decimal::new(threshold, 0),
            ..Policy::default()
        })
    }

    #[tokio::test]
    async fn insert_and_get() {
        let cache = PolicyCache::new(16);
        let tenant = TenantId::new("t-1");

        cache.insert(tenant.clone(), policy(250)).await;

        let cached = cache.get(&tenant).await.unwrap();
        assert_eq!(cached.amount_threshold, Decimal::new(250, 0));
    }

    #[tokio::test]
    async fn returns_none_for_missing() {
        let cache = PolicyCache::default();
        assert!(cache.get(&TenantId::new("missing")).await.is_none());
    }

    #[tokio::test]
    async fn invalidation() {
        let cache = PolicyCache::new(16);
        let tenant = TenantId::new("t-2");
        cache.insert(tenant.clone(), policy(10)).await;

        cache.invalidate(&tenant).await;
        assert!(cache.get(&tenant).await.is_none());
    }

    #[tokio::test]
    async fn stats_count_entries() {
        let cache = PolicyCache::new(16);
        for i in 0..4 {
            cache.insert(TenantId::new(format!("t-{i}")), policy(i)).await;
        }
        assert_eq!(cache.stats().await.entry_count, 4);
    }

    #[test]
    fn disabled_config_builds_no_cache() {
        let config = PolicyCacheConfig {
            enabled: false,
            ..PolicyCacheConfig::default()
        };
        assert!(PolicyCache::from_config(&config).is_none());
        assert!(PolicyCache::from_config(&PolicyCacheConfig::default()).is_some());
    }
}
