//! Caching subsystem.
//!
//! # Data Flow
//! ```text
//! LVC tick (block number, gas price)
//!     → sync client → lvc.rs snapshot → backing Cache (shared across instances)
//!
//! Request:
//!     → response.rs: static method? eth_blockNumber / eth_gasPrice from LVC?
//!     → fingerprint → compressed.rs → memory.rs | redis_cache.rs
//!     → freshness gate against the LVC block height
//! ```
//!
//! # Design Decisions
//! - One `Cache` trait object shared by the LVCs and the response cache
//! - Redis when configured, otherwise an in-process LRU
//! - Response entries are compressed; LVC values are stored as plain strings
//! - Freshness is decided against the chain height, never wall-clock age

pub mod compressed;
pub mod lvc;
pub mod memory;
pub mod redis_cache;
pub mod response;

use std::fmt::Debug;

use async_trait::async_trait;
use bytes::Bytes;
use thiserror::Error;

pub use compressed::CompressedCache;
pub use lvc::{LastValueCache, LvcError, UpdateFn, BLOCK_NUMBER_KEY, GAS_PRICE_KEY};
pub use memory::MemoryCache;
pub use redis_cache::RedisCache;
pub use response::{fingerprint, is_cacheable, lvc_reader, LatestValueFn, ResponseCache};

/// Errors raised by cache stores.
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("cache store unavailable: {0}")]
    Unavailable(String),

    #[error("cache store error: {0}")]
    Store(String),

    #[error("cache codec error: {0}")]
    Codec(String),
}

impl From<redis::RedisError> for CacheError {
    fn from(e: redis::RedisError) -> Self {
        if e.is_connection_refusal() || e.is_io_error() || e.is_timeout() {
            CacheError::Unavailable(e.to_string())
        } else {
            CacheError::Store(e.to_string())
        }
    }
}

/// Key/value store with byte values.
#[async_trait]
pub trait Cache: Send + Sync + Debug {
    async fn get(&self, key: &str) -> Result<Option<Bytes>, CacheError>;

    async fn put(&self, key: &str, value: Bytes) -> Result<(), CacheError>;
}
