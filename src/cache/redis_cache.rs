//! Redis-backed store shared by every gateway instance.

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;

use crate::cache::{Cache, CacheError};

pub struct RedisCache {
    conn: ConnectionManager,
    namespace: String,
    ttl: Duration,
}

impl std::fmt::Debug for RedisCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisCache")
            .field("namespace", &self.namespace)
            .field("ttl", &self.ttl)
            .finish_non_exhaustive()
    }
}

impl RedisCache {
    /// Connect and PING; fails if the store is unreachable.
    pub async fn connect(url: &str, namespace: &str, ttl: Duration) -> Result<Self, CacheError> {
        let client = redis::Client::open(url)
            .map_err(|e| CacheError::Unavailable(format!("invalid redis url: {}", e)))?;
        let mut probe = client.get_multiplexed_async_connection().await?;
        let _: String = redis::cmd("PING").query_async(&mut probe).await?;
        let conn = ConnectionManager::new(client).await?;

        Ok(Self {
            conn,
            namespace: namespace.to_string(),
            ttl,
        })
    }

    fn key(&self, key: &str) -> String {
        if self.namespace.is_empty() {
            key.to_string()
        } else {
            format!("{}:{}", self.namespace, key)
        }
    }
}

#[async_trait]
impl Cache for RedisCache {
    async fn get(&self, key: &str) -> Result<Option<Bytes>, CacheError> {
        let mut conn = self.conn.clone();
        let value: Option<Vec<u8>> = conn.get(self.key(key)).await?;
        Ok(value.map(Bytes::from))
    }

    async fn put(&self, key: &str, value: Bytes) -> Result<(), CacheError> {
        let mut conn = self.conn.clone();
        let _: () = conn
            .set_ex(self.key(key), value.as_ref(), self.ttl.as_secs().max(1))
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_unreachable_store_fails_fast() {
        let err = RedisCache::connect("redis://127.0.0.1:1", "", Duration::from_secs(60))
            .await
            .unwrap_err();
        assert!(matches!(err, CacheError::Unavailable(_)));
    }

    #[tokio::test]
    #[ignore = "requires REDIS_URL"]
    async fn test_round_trip_with_namespace() {
        let url = std::env::var("REDIS_URL").unwrap();
        let ns = format!("test-{}", uuid::Uuid::new_v4());
        let cache = RedisCache::connect(&url, &ns, Duration::from_secs(60))
            .await
            .unwrap();

        assert!(cache.get("k").await.unwrap().is_none());
        cache.put("k", Bytes::from_static(b"v")).await.unwrap();
        assert_eq!(cache.get("k").await.unwrap().unwrap(), Bytes::from_static(b"v"));

        let other = RedisCache::connect(&url, "", Duration::from_secs(60))
            .await
            .unwrap();
        assert!(other.get("k").await.unwrap().is_none());
    }
}
