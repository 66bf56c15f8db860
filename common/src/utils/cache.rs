use std::time::Duration;

use async_trait::async_trait;
use moka::future::Cache as MokaCache;
use serde::{de::DeserializeOwned, Serialize};

/// Narrow cache interface so callers (search results, sessions) depend on a
/// capability, not a concrete backend.
#[async_trait]
pub trait Cache<V>: Send + Sync {
    async fn get(&self, key: &str) -> Option<V>;
    async fn set(&self, key: String, value: V);
    async fn invalidate(&self, key: &str);
    /// Drops every entry. Used when a write can affect an unbounded set of
    /// cached keys (e.g. ingestion changing search results for many queries)
    /// and keying off the affected subset isn't worth the bookkeeping.
    async fn invalidate_all(&self);
}

/// In-memory TTL cache backed by `moka`. One instance per cached concern
/// (search results, sessions) -- each gets its own TTL from config.
#[derive(Clone)]
pub struct TtlCache<V: Clone + Send + Sync + 'static> {
    inner: MokaCache<String, V>,
}

impl<V: Clone + Send + Sync + 'static> TtlCache<V> {
    pub fn new(ttl: Duration, max_capacity: u64) -> Self {
        Self {
            inner: MokaCache::builder()
                .time_to_live(ttl)
                .max_capacity(max_capacity)
                .build(),
        }
    }
}

#[async_trait]
impl<V: Clone + Send + Sync + 'static> Cache<V> for TtlCache<V> {
    async fn get(&self, key: &str) -> Option<V> {
        self.inner.get(key).await
    }

    async fn set(&self, key: String, value: V) {
        self.inner.insert(key, value).await;
    }

    async fn invalidate(&self, key: &str) {
        self.inner.invalidate(key).await;
    }

    async fn invalidate_all(&self) {
        self.inner.invalidate_all();
    }
}

/// Serializes a value to its cached `String` form. Search results and other
/// cached payloads are stored pre-serialized so the cache itself stays
/// generic over `String` rather than carrying a type parameter per caller.
pub fn to_cache_value<T: Serialize>(value: &T) -> Option<String> {
    serde_json::to_string(value).ok()
}

pub fn from_cache_value<T: DeserializeOwned>(raw: &str) -> Option<T> {
    serde_json::from_str(raw).ok()
}
