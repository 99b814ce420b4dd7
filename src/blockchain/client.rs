//! Sync node client.
//!
//! # Responsibilities
//! - Connect to the block-sync JSON-RPC endpoint
//! - Query the latest block number and suggested gas price
//! - Bound every call with a timeout

use std::sync::Arc;
use std::time::Duration;

use alloy::providers::{Provider, ProviderBuilder};
use futures_util::future::BoxFuture;
use tokio::time::timeout;

use crate::blockchain::types::{SyncError, SyncResult};
use crate::cache::{LvcError, UpdateFn};

/// Client used only by the last-value caches.
#[derive(Clone)]
pub struct SyncClient {
    provider: Arc<dyn Provider + Send + Sync>,
    rpc_url: url::Url,
    timeout_duration: Duration,
}

impl std::fmt::Debug for SyncClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncClient")
            .field("rpc_url", &self.rpc_url.as_str())
            .field("timeout", &self.timeout_duration)
            .finish_non_exhaustive()
    }
}

impl SyncClient {
    /// Build a client for `rpc_url`. No network call is made here.
    pub fn new(rpc_url: &str, timeout_duration: Duration) -> SyncResult<Self> {
        let url: url::Url = rpc_url.parse().map_err(|e: url::ParseError| SyncError::InvalidUrl {
            url: rpc_url.to_string(),
            reason: e.to_string(),
        })?;
        let provider = Arc::new(ProviderBuilder::new().connect_http(url.clone()))
            as Arc<dyn Provider + Send + Sync>;

        Ok(Self {
            provider,
            rpc_url: url,
            timeout_duration,
        })
    }

    pub fn rpc_url(&self) -> &url::Url {
        &self.rpc_url
    }

    /// Get the latest block number.
    pub async fn get_block_number(&self) -> SyncResult<u64> {
        match timeout(self.timeout_duration, self.provider.get_block_number()).await {
            Ok(Ok(result)) => Ok(result),
            Ok(Err(e)) => Err(SyncError::Rpc(e.to_string())),
            Err(_) => Err(SyncError::Timeout(self.timeout_duration)),
        }
    }

    /// Get the suggested gas price in wei.
    pub async fn get_gas_price(&self) -> SyncResult<u128> {
        match timeout(self.timeout_duration, self.provider.get_gas_price()).await {
            Ok(Ok(result)) => Ok(result),
            Ok(Err(e)) => Err(SyncError::Rpc(e.to_string())),
            Err(_) => Err(SyncError::Timeout(self.timeout_duration)),
        }
    }

    /// LVC updater for the latest block number.
    pub fn block_number_updater(&self) -> UpdateFn {
        let client = self.clone();
        Arc::new(move || -> BoxFuture<'static, Result<String, LvcError>> {
            let client = client.clone();
            Box::pin(async move { Ok(client.get_block_number().await?.to_string()) })
        })
    }

    /// LVC updater for the suggested gas price.
    pub fn gas_price_updater(&self) -> UpdateFn {
        let client = self.clone();
        Arc::new(move || -> BoxFuture<'static, Result<String, LvcError>> {
            let client = client.clone();
            Box::pin(async move { Ok(client.get_gas_price().await?.to_string()) })
        })
    }
}
