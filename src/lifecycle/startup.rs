//! Startup orchestration.
//!
//! # Responsibilities
//! - Resolve and validate configuration before any side effect
//! - Build the limiter, backends, groups, cache and server in dependency order
//! - Spawn the metrics, RPC and WebSocket listeners
//! - Report listener bind failures that surface within the grace period
//!
//! # Design Decisions
//! - Fail fast: any startup error is fatal and tears down what was built
//! - Subsystems initialize in order, not concurrently
//! - The grace period only catches early bind errors; it is not a readiness
//!   signal

use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::{mpsc, Semaphore};

use crate::backend::{opts_from_config, Backend, BackendError, BackendGroup};
use crate::blockchain::{SyncClient, SyncError};
use crate::cache::{
    lvc_reader, Cache, CacheError, LastValueCache, MemoryCache, RedisCache, ResponseCache,
    BLOCK_NUMBER_KEY, GAS_PRICE_KEY,
};
use crate::config::secrets::resolve_config;
use crate::config::validation::validate_config;
use crate::config::{ProxyConfig, SecretError, ValidationError};
use crate::http::{ServeError, Server, ServerParams};
use crate::lifecycle::{Gateway, Shutdown};
use crate::observability::metrics;
use crate::rpc::ErrorCatalog;
use crate::security::{BackendRateLimiter, LocalRateLimiter, RateLimitError, RedisRateLimiter};

/// Environment variable carrying this instance's IP for `X-Forwarded-For`.
pub const PROXY_IP_ENV: &str = "RPC_GATEWAY_IP";

/// Deadline for each call the sync client makes.
const SYNC_TIMEOUT: Duration = Duration::from_secs(5);

/// Errors that abort startup.
#[derive(Debug, Error)]
pub enum StartError {
    #[error("failed to resolve config: {0}")]
    Secret(#[from] SecretError),

    #[error("invalid config: {}", join_errors(.0))]
    Config(Vec<ValidationError>),

    #[error("error creating rate limiter: {0}")]
    RateLimiter(#[from] RateLimitError),

    #[error("error creating backend {name}: {source}")]
    Backend {
        name: String,
        #[source]
        source: BackendError,
    },

    #[error("error creating backend group: {0}")]
    Group(ValidationError),

    #[error("error connecting to cache: {0}")]
    Cache(#[from] CacheError),

    #[error("error creating block sync client: {0}")]
    Sync(#[from] SyncError),

    #[error("{name} listener failed: {source}")]
    Listener {
        name: &'static str,
        #[source]
        source: ServeError,
    },
}

fn join_errors(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

impl From<Vec<ValidationError>> for StartError {
    fn from(errors: Vec<ValidationError>) -> Self {
        StartError::Config(errors)
    }
}

/// Build and start a gateway from `config`.
///
/// Nothing is spawned until the configuration has resolved and validated.
/// A listener that fails to bind within the grace period fails startup
/// after everything already built has been shut down.
pub async fn start(config: ProxyConfig) -> Result<Gateway, StartError> {
    validate_config(&config)?;
    let config = resolve_config(&config)?;
    validate_config(&config)?;

    let errors = Arc::new(ErrorCatalog::from_config(&config));

    let limiter: Arc<dyn BackendRateLimiter> = if config.redis.url.is_empty() {
        tracing::warn!("No Redis URL configured, using local rate limiter");
        Arc::new(LocalRateLimiter::new())
    } else {
        Arc::new(RedisRateLimiter::connect(&config.redis.url, &config.redis.namespace).await?)
    };

    let semaphore = Arc::new(Semaphore::new(semaphore_permits(
        config.server.max_concurrent_rpcs,
    )));

    let proxy_ip = std::env::var(PROXY_IP_ENV).ok().filter(|ip| !ip.is_empty());
    let backends = build_backends(&config, limiter.clone(), semaphore, proxy_ip.as_deref())?;

    let mut groups = BTreeMap::new();
    for (name, group) in &config.backend_groups {
        let group =
            BackendGroup::new(name.clone(), &group.backends, &backends).map_err(StartError::Group)?;
        groups.insert(name.clone(), Arc::new(group));
    }

    let ws_backend_group = match &config.ws_backend_group {
        Some(name) => Some(
            groups
                .get(name)
                .cloned()
                .ok_or_else(|| StartError::Config(vec![ValidationError::UndefinedWsGroup(name.clone())]))?,
        ),
        None => None,
    };

    if config.authentication.is_empty() {
        tracing::info!("No auth keys configured, authentication disabled");
    }

    let mut lvcs = Vec::new();
    let cache = if config.cache.enabled {
        let (cache, built) = build_cache(&config).await?;
        lvcs = built;
        Some(Arc::new(cache))
    } else {
        None
    };

    let server = Server::new(ServerParams {
        backend_groups: groups.clone(),
        ws_backend_group,
        ws_method_whitelist: config.ws_method_whitelist.iter().cloned().collect::<HashSet<_>>(),
        rpc_method_mappings: config.rpc_method_mappings.clone(),
        max_body_size_bytes: config.server.max_body_size_bytes,
        authenticated_paths: config.authentication.clone(),
        timeout: config.server.request_timeout(),
        max_upstream_batch_size: config.server.max_upstream_batch_size,
        cache,
        rate_limit: config.rate_limit.clone(),
        enable_request_log: config.server.enable_request_log,
        max_request_body_log_len: config.server.max_request_body_log_len,
        max_batch_size: config.batch.max_size,
        errors,
        shutdown_drain: Duration::from_secs(config.server.shutdown_drain_seconds),
    });

    let gateway = Gateway {
        backends,
        groups,
        server,
        limiter,
        lvcs,
        metrics_shutdown: Shutdown::new(),
        closed: AtomicBool::new(false),
    };

    if config.metrics.enabled {
        start_metrics(&config, &gateway.metrics_shutdown);
    }

    let (errors_tx, mut errors_rx) = mpsc::unbounded_channel();
    if let Some(addr) = config.server.rpc_addr() {
        spawn_listener("rpc", addr, gateway.server.clone(), errors_tx.clone());
    }
    if let Some(addr) = config.server.ws_addr() {
        spawn_listener("ws", addr, gateway.server.clone(), errors_tx.clone());
    }
    drop(errors_tx);

    tokio::time::sleep(config.server.grace_period()).await;

    if let Ok((name, source)) = errors_rx.try_recv() {
        gateway.shutdown().await;
        return Err(StartError::Listener { name, source });
    }

    tracing::info!(
        backends = gateway.backends.len(),
        groups = gateway.groups.len(),
        "Gateway started"
    );
    Ok(gateway)
}

fn semaphore_permits(max_concurrent_rpcs: usize) -> usize {
    if max_concurrent_rpcs == 0 {
        Semaphore::MAX_PERMITS
    } else {
        max_concurrent_rpcs.min(Semaphore::MAX_PERMITS)
    }
}

fn build_backends(
    config: &ProxyConfig,
    limiter: Arc<dyn BackendRateLimiter>,
    semaphore: Arc<Semaphore>,
    proxy_ip: Option<&str>,
) -> Result<BTreeMap<String, Arc<Backend>>, StartError> {
    let mut backends = BTreeMap::new();

    for (name, cfg) in &config.backends {
        let opts = opts_from_config(&config.backend, cfg, proxy_ip).map_err(|e| {
            StartError::Backend {
                name: name.clone(),
                source: BackendError::Tls(e),
            }
        })?;
        let backend = Backend::new(
            name.clone(),
            &cfg.rpc_url,
            &cfg.ws_url,
            limiter.clone(),
            semaphore.clone(),
            opts,
        )
        .map_err(|source| StartError::Backend {
            name: name.clone(),
            source,
        })?;

        tracing::info!(
            backend = %name,
            rpc_url = %backend.rpc_url(),
            ws_url = %backend.ws_url(),
            "Configured backend"
        );
        backends.insert(name.clone(), Arc::new(backend));
    }

    Ok(backends)
}

/// Build the backing store, start both LVCs, and wrap it all in a `ResponseCache`.
async fn build_cache(
    config: &ProxyConfig,
) -> Result<(ResponseCache, Vec<Arc<LastValueCache>>), StartError> {
    let store: Arc<dyn Cache> = if config.redis.url.is_empty() {
        tracing::warn!("No Redis URL configured, using in-memory cache");
        Arc::new(MemoryCache::new(config.cache.memory_capacity))
    } else {
        Arc::new(
            RedisCache::connect(
                &config.redis.url,
                &config.redis.namespace,
                Duration::from_secs(config.cache.ttl_seconds),
            )
            .await?,
        )
    };

    let sync = SyncClient::new(&config.cache.block_sync_rpc_url, SYNC_TIMEOUT)?;
    let interval = Duration::from_millis(config.cache.refresh_interval_ms.max(1));

    let block_number = Arc::new(LastValueCache::new(
        BLOCK_NUMBER_KEY,
        interval,
        store.clone(),
        sync.block_number_updater(),
    ));
    let gas_price = Arc::new(LastValueCache::new(
        GAS_PRICE_KEY,
        interval,
        store.clone(),
        sync.gas_price_updater(),
    ));
    block_number.start();
    gas_price.start();

    let cache = ResponseCache::new(
        store,
        lvc_reader(block_number.clone()),
        lvc_reader(gas_price.clone()),
        config.cache.num_block_confirmations,
    );
    Ok((cache, vec![block_number, gas_price]))
}

fn start_metrics(config: &ProxyConfig, shutdown: &Shutdown) {
    let addr = match config.metrics.addr() {
        Ok(addr) => addr,
        Err(e) => {
            tracing::error!(error = %e, "Invalid metrics address");
            return;
        }
    };
    let handle = match metrics::install_recorder() {
        Ok(handle) => handle,
        Err(e) => {
            tracing::error!(error = %e, "Failed to install metrics recorder");
            return;
        }
    };
    tokio::spawn(metrics::serve_metrics(addr, handle, shutdown.subscribe()));
}

fn spawn_listener(
    name: &'static str,
    addr: String,
    server: Server,
    errors: mpsc::UnboundedSender<(&'static str, ServeError)>,
) {
    tokio::spawn(async move {
        let result = match name {
            "ws" => server.listen_and_serve_ws(&addr).await,
            _ => server.listen_and_serve_rpc(&addr).await,
        };
        match result {
            Ok(()) | Err(ServeError::Closed) => {
                tracing::info!(listener = name, "Listener closed");
            }
            Err(e) => {
                tracing::error!(listener = name, address = %addr, error = %e, "Error starting server");
                let _ = errors.send((name, e));
            }
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_semaphore_permits() {
        assert_eq!(semaphore_permits(0), Semaphore::MAX_PERMITS);
        assert_eq!(semaphore_permits(64), 64);
    }

    #[tokio::test]
    async fn test_rejects_before_side_effects() {
        let err = start(ProxyConfig::default()).await.unwrap_err();
        match err {
            StartError::Config(errors) => {
                assert!(errors.contains(&ValidationError::NoBackends));
                assert!(errors.contains(&ValidationError::NoBackendGroups));
                assert!(errors.contains(&ValidationError::NoMethodMappings));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_config_error_lists_everything() {
        let err = StartError::from(vec![
            ValidationError::NoBackends,
            ValidationError::MissingBlockSyncUrl,
        ]);
        assert_eq!(
            err.to_string(),
            "invalid config: must define at least one backend, block sync node required for caching"
        );
    }
}
