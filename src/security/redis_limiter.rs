//! Redis-backed rate limiter shared by every gateway instance.
//!
//! # Key Layout
//! ```text
//! {ns}:rps:{backend}:{unix_second}   INCR + EXPIRE, one key per window
//! {ns}:ws_conns:{backend}            guarded by Lua so it stays in [0, max]
//! ```

use std::time::{SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::Script;

use crate::security::rate_limit::{BackendRateLimiter, RateLimitError};

const INCR_WS_SCRIPT: &str = r#"
local current = tonumber(redis.call('GET', KEYS[1]) or '0')
if current >= tonumber(ARGV[1]) then
  return 0
end
redis.call('INCR', KEYS[1])
return 1
"#;

const DECR_WS_SCRIPT: &str = r#"
local current = tonumber(redis.call('GET', KEYS[1]) or '0')
if current <= 0 then
  return 0
end
return redis.call('DECR', KEYS[1])
"#;

/// Rate limiter whose counters live in Redis.
pub struct RedisRateLimiter {
    conn: ConnectionManager,
    namespace: String,
    incr_ws: Script,
    decr_ws: Script,
}

impl std::fmt::Debug for RedisRateLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisRateLimiter")
            .field("namespace", &self.namespace)
            .finish_non_exhaustive()
    }
}

impl RedisRateLimiter {
    /// Connect and PING; fails if the store is unreachable.
    pub async fn connect(url: &str, namespace: &str) -> Result<Self, RateLimitError> {
        let client = redis::Client::open(url)
            .map_err(|e| RateLimitError::Unavailable(format!("invalid redis url: {}", e)))?;
        let mut probe = client.get_multiplexed_async_connection().await?;
        let _: String = redis::cmd("PING").query_async(&mut probe).await?;
        let conn = ConnectionManager::new(client).await?;

        Ok(Self {
            conn,
            namespace: namespace.to_string(),
            incr_ws: Script::new(INCR_WS_SCRIPT),
            decr_ws: Script::new(DECR_WS_SCRIPT),
        })
    }

    fn rps_key(&self, name: &str, second: u64) -> String {
        prefixed(&self.namespace, &format!("rps:{}:{}", name, second))
    }

    fn ws_key(&self, name: &str) -> String {
        prefixed(&self.namespace, &format!("ws_conns:{}", name))
    }
}

fn prefixed(namespace: &str, key: &str) -> String {
    if namespace.is_empty() {
        key.to_string()
    } else {
        format!("{}:{}", namespace, key)
    }
}

fn unix_second() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

#[async_trait]
impl BackendRateLimiter for RedisRateLimiter {
    async fn take_backend_rps(&self, name: &str, max_rps: u32) -> Result<bool, RateLimitError> {
        let key = self.rps_key(name, unix_second());
        let mut conn = self.conn.clone();
        let (count,): (u64,) = redis::pipe()
            .atomic()
            .incr(&key, 1)
            .expire(&key, 1)
            .ignore()
            .query_async(&mut conn)
            .await?;
        Ok(count <= u64::from(max_rps))
    }

    async fn take_ws_conn(&self, name: &str, max_conns: u32) -> Result<bool, RateLimitError> {
        let mut conn = self.conn.clone();
        let allowed: i64 = self
            .incr_ws
            .key(self.ws_key(name))
            .arg(max_conns)
            .invoke_async(&mut conn)
            .await?;
        Ok(allowed == 1)
    }

    async fn release_ws_conn(&self, name: &str) -> Result<(), RateLimitError> {
        let mut conn = self.conn.clone();
        let _: i64 = self
            .decr_ws
            .key(self.ws_key(name))
            .invoke_async(&mut conn)
            .await?;
        Ok(())
    }

    async fn flush_backend_ws_conns(&self, names: &[String]) -> Result<(), RateLimitError> {
        if names.is_empty() {
            return Ok(());
        }
        let keys: Vec<String> = names.iter().map(|n| self.ws_key(n)).collect();
        let mut conn = self.conn.clone();
        let _: i64 = redis::cmd("DEL").arg(keys).query_async(&mut conn).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_prefix() {
        assert_eq!(prefixed("", "ws_conns:a"), "ws_conns:a");
        assert_eq!(prefixed("gw", "rps:a:10"), "gw:rps:a:10");
    }

    #[tokio::test]
    async fn test_unreachable_store_fails_fast() {
        let err = RedisRateLimiter::connect("redis://127.0.0.1:1", "").await.unwrap_err();
        assert!(matches!(err, RateLimitError::Unavailable(_)));
    }

    #[tokio::test]
    #[ignore = "requires REDIS_URL"]
    async fn test_shared_quota() {
        let url = std::env::var("REDIS_URL").unwrap();
        let ns = format!("test-{}", uuid::Uuid::new_v4());
        let a = RedisRateLimiter::connect(&url, &ns).await.unwrap();
        let b = RedisRateLimiter::connect(&url, &ns).await.unwrap();

        assert!(a.take_ws_conn("node", 1).await.unwrap());
        assert!(!b.take_ws_conn("node", 1).await.unwrap());
        b.release_ws_conn("node").await.unwrap();
        b.release_ws_conn("node").await.unwrap();
        assert!(a.take_ws_conn("node", 1).await.unwrap());
        a.flush_backend_ws_conns(&["node".into()]).await.unwrap();
        assert!(b.take_ws_conn("node", 1).await.unwrap());
    }
}
