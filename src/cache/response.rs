//! Response cache gated on block height.
//!
//! # Responsibilities
//! - Answer `eth_blockNumber` and `eth_gasPrice` from the last-value caches
//! - Look up stored responses by request fingerprint
//! - Treat entries older than the confirmation depth as misses
//!
//! # Design Decisions
//! - Population is the caller's job: `get` never fetches, `put` never checks
//!   the response beyond "has a result"
//! - Unknown chain height means unknown freshness; the lookup misses
//! - Entries are written whole and never patched

use std::sync::Arc;

use alloy::primitives::keccak256;
use bytes::Bytes;
use futures_util::future::BoxFuture;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::cache::{Cache, CacheError, CompressedCache, LastValueCache, LvcError};
use crate::observability::metrics;
use crate::rpc::types::to_quantity;
use crate::rpc::{RpcRequest, RpcResponse};

/// Latest value of a chain fact, usually read from an LVC.
pub type LatestValueFn = Arc<dyn Fn() -> BoxFuture<'static, Result<u64, LvcError>> + Send + Sync>;

/// Accessor reading `lvc` as an integer.
pub fn lvc_reader(lvc: Arc<LastValueCache>) -> LatestValueFn {
    Arc::new(move || -> BoxFuture<'static, Result<u64, LvcError>> {
        let lvc = lvc.clone();
        Box::pin(async move { lvc.read_u64().await })
    })
}

/// Answers never change for the life of a chain.
const STATIC_METHODS: &[&str] = &["eth_chainId", "net_version"];

/// Lookups keyed by hash or explicit block number.
const BLOCK_GATED_METHODS: &[&str] = &[
    "eth_getBlockByHash",
    "eth_getBlockByNumber",
    "eth_getBlockTransactionCountByHash",
    "eth_getBlockTransactionCountByNumber",
    "eth_getTransactionByHash",
    "eth_getTransactionByBlockHashAndIndex",
    "eth_getTransactionByBlockNumberAndIndex",
    "eth_getTransactionReceipt",
    "eth_getUncleByBlockHashAndIndex",
    "eth_getUncleByBlockNumberAndIndex",
];

/// Block tags whose meaning moves with the chain head.
const MOVING_TAGS: &[&str] = &["pending", "latest", "safe", "finalized"];

#[derive(Debug, Serialize, Deserialize)]
struct CachedEntry {
    block: u64,
    result: Value,
}

pub struct ResponseCache {
    cache: CompressedCache,
    block_number: LatestValueFn,
    gas_price: LatestValueFn,
    num_block_confirmations: u64,
}

impl std::fmt::Debug for ResponseCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResponseCache")
            .field("cache", &self.cache)
            .field("num_block_confirmations", &self.num_block_confirmations)
            .finish_non_exhaustive()
    }
}

impl ResponseCache {
    pub fn new(
        cache: Arc<dyn Cache>,
        block_number: LatestValueFn,
        gas_price: LatestValueFn,
        num_block_confirmations: u64,
    ) -> Self {
        Self {
            cache: CompressedCache::new(cache),
            block_number,
            gas_price,
            num_block_confirmations,
        }
    }

    /// Current chain height as seen by the block-number LVC.
    pub async fn latest_block(&self) -> Result<u64, LvcError> {
        (self.block_number)().await
    }

    /// Cached answer for `req`, stamped with the caller's id.
    pub async fn get(&self, req: &RpcRequest) -> Result<Option<RpcResponse>, CacheError> {
        let answer = match req.method.as_str() {
            "eth_blockNumber" => self.from_lvc(&self.block_number, req).await,
            "eth_gasPrice" => self.from_lvc(&self.gas_price, req).await,
            _ if is_cacheable(req) => self.lookup(req).await?,
            _ => return Ok(None),
        };
        metrics::record_cache_lookup(&req.method, answer.is_some());
        Ok(answer)
    }

    /// Store a successful response fetched at `block`.
    pub async fn put(
        &self,
        req: &RpcRequest,
        res: &RpcResponse,
        block: u64,
    ) -> Result<(), CacheError> {
        if res.is_error() {
            return Ok(());
        }
        let Some(result) = res.result.clone() else {
            return Ok(());
        };

        let entry = serde_json::to_vec(&CachedEntry { block, result })
            .map_err(|e| CacheError::Codec(e.to_string()))?;
        self.cache.put(&fingerprint(req), Bytes::from(entry)).await
    }

    async fn from_lvc(&self, source: &LatestValueFn, req: &RpcRequest) -> Option<RpcResponse> {
        match source().await {
            Ok(value) => Some(RpcResponse::result(req.id.clone(), to_quantity(value))),
            Err(e) => {
                tracing::debug!(method = %req.method, error = %e, "LVC value unavailable");
                None
            }
        }
    }

    async fn lookup(&self, req: &RpcRequest) -> Result<Option<RpcResponse>, CacheError> {
        let Some(raw) = self.cache.get(&fingerprint(req)).await? else {
            return Ok(None);
        };
        let entry: CachedEntry =
            serde_json::from_slice(&raw).map_err(|e| CacheError::Codec(e.to_string()))?;

        if !STATIC_METHODS.contains(&req.method.as_str()) {
            let current = match self.latest_block().await {
                Ok(current) => current,
                Err(e) => {
                    tracing::debug!(method = %req.method, error = %e, "Freshness unknown, skipping cache");
                    return Ok(None);
                }
            };
            if current > entry.block.saturating_add(self.num_block_confirmations) {
                return Ok(None);
            }
        }

        Ok(Some(RpcResponse::result(req.id.clone(), entry.result)))
    }
}

/// Whether a successful response to `req` may be stored.
pub fn is_cacheable(req: &RpcRequest) -> bool {
    let method = req.method.as_str();
    if STATIC_METHODS.contains(&method) {
        return true;
    }
    BLOCK_GATED_METHODS.contains(&method) && !mentions_moving_tag(&req.params)
}

fn mentions_moving_tag(value: &Value) -> bool {
    match value {
        Value::String(s) => MOVING_TAGS.contains(&s.as_str()),
        Value::Array(items) => items.iter().any(mentions_moving_tag),
        Value::Object(map) => map.values().any(mentions_moving_tag),
        _ => false,
    }
}

/// `cache:{method}:{keccak256(params)}`. Object keys serialize sorted.
pub fn fingerprint(req: &RpcRequest) -> String {
    let params = serde_json::to_vec(&req.params).unwrap_or_default();
    format!("cache:{}:{}", req.method, keccak256(&params))
}
