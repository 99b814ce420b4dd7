//! In-memory LRU store.

use std::num::NonZeroUsize;
use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;
use bytes::Bytes;
use lru::LruCache;

use crate::cache::{Cache, CacheError};

const FALLBACK_CAPACITY: NonZeroUsize = match NonZeroUsize::new(1000) {
    Some(n) => n,
    None => NonZeroUsize::MIN,
};

/// Bounded store local to this process. Least recently used entries go first.
pub struct MemoryCache {
    inner: Mutex<LruCache<String, Bytes>>,
}

impl std::fmt::Debug for MemoryCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryCache").finish_non_exhaustive()
    }
}

impl MemoryCache {
    /// A zero capacity falls back to 1000 entries.
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(FALLBACK_CAPACITY);
        Self {
            inner: Mutex::new(LruCache::new(capacity)),
        }
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl Cache for MemoryCache {
    async fn get(&self, key: &str) -> Result<Option<Bytes>, CacheError> {
        let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(inner.get(key).cloned())
    }

    async fn put(&self, key: &str, value: Bytes) -> Result<(), CacheError> {
        let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        inner.put(key.to_string(), value);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_get_put() {
        let cache = MemoryCache::new(10);
        assert!(cache.get("a").await.unwrap().is_none());
        cache.put("a", Bytes::from_static(b"1")).await.unwrap();
        assert_eq!(cache.get("a").await.unwrap().unwrap(), Bytes::from_static(b"1"));
    }

    #[tokio::test]
    async fn test_evicts_least_recently_used() {
        let cache = MemoryCache::new(2);
        cache.put("a", Bytes::from_static(b"1")).await.unwrap();
        cache.put("b", Bytes::from_static(b"2")).await.unwrap();
        // Touch "a" so "b" becomes the eviction candidate.
        cache.get("a").await.unwrap();
        cache.put("c", Bytes::from_static(b"3")).await.unwrap();

        assert_eq!(cache.len(), 2);
        assert!(cache.get("a").await.unwrap().is_some());
        assert!(cache.get("b").await.unwrap().is_none());
    }
}
