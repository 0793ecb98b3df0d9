//! In-memory status cache with TTL
//!
//! Read-through cache in front of the subscription status API. The
//! authoritative state always lives in the subscription row; this only
//! bounds how stale a dashboard read may be, and every local mutation
//! invalidates its tenant.

use std::collections::HashMap;
use std::sync::RwLock;
use std::time::{Duration, Instant};
use uuid::Uuid;

/// Default cache TTL (60 seconds)
const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(60);

/// Cache entry with expiration
#[derive(Clone)]
struct CacheEntry<V> {
    value: V,
    expires_at: Instant,
}

impl<V> CacheEntry<V> {
    fn new(value: V, ttl: Duration) -> Self {
        Self {
            value,
            expires_at: Instant::now() + ttl,
        }
    }

    fn is_expired(&self) -> bool {
        Instant::now() > self.expires_at
    }
}

/// Thread-safe per-tenant TTL cache
pub struct StatusCache<V: Clone> {
    cache: RwLock<HashMap<Uuid, CacheEntry<V>>>,
    ttl: Duration,
}

impl<V: Clone> Default for StatusCache<V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<V: Clone> StatusCache<V> {
    /// Create a new cache with default TTL
    pub fn new() -> Self {
        Self {
            cache: RwLock::new(HashMap::new()),
            ttl: DEFAULT_CACHE_TTL,
        }
    }

    /// Create a new cache with custom TTL
    pub fn with_ttl(ttl: Duration) -> Self {
        Self {
            cache: RwLock::new(HashMap::new()),
            ttl,
        }
    }

    /// Get the cached value for a tenant, if present and unexpired
    pub fn get(&self, tenant_id: Uuid) -> Option<V> {
        let cache = self.cache.read().ok()?;
        let entry = cache.get(&tenant_id)?;

        if entry.is_expired() {
            None
        } else {
            Some(entry.value.clone())
        }
    }

    /// Cache a value for a tenant
    pub fn set(&self, tenant_id: Uuid, value: V) {
        if let Ok(mut cache) = self.cache.write() {
            cache.insert(tenant_id, CacheEntry::new(value, self.ttl));
        }
    }

    /// Invalidate one tenant (every local mutation calls this)
    pub fn invalidate(&self, tenant_id: Uuid) {
        if let Ok(mut cache) = self.cache.write() {
            cache.remove(&tenant_id);
        }
    }

    /// Clear expired entries (call periodically for memory management)
    pub fn cleanup(&self) {
        if let Ok(mut cache) = self.cache.write() {
            cache.retain(|_, entry| !entry.is_expired());
        }
    }
}
