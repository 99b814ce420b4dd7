//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the gateway.
//! All types derive Serde traits for deserialization from config files.

use std::collections::{BTreeMap, HashMap};
use std::net::SocketAddr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Root configuration for the gateway.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct ProxyConfig {
    /// Listener and request-handling settings.
    pub server: ServerConfig,

    /// Shared external store used by the distributed limiter and cache.
    pub redis: RedisConfig,

    /// Prometheus exposition listener.
    pub metrics: MetricsConfig,

    /// Log level and output format.
    pub logging: LoggingConfig,

    /// Frontend (per-client) rate limiting.
    pub rate_limit: FrontendRateLimitConfig,

    /// Batch request limits.
    pub batch: BatchConfig,

    /// Resilience options shared by every backend.
    pub backend: BackendOptionsConfig,

    /// Upstream node definitions keyed by unique name.
    pub backends: BTreeMap<String, BackendConfig>,

    /// Named, ordered pools of backends.
    pub backend_groups: BTreeMap<String, BackendGroupConfig>,

    /// Secret path key -> alias used in logs.
    pub authentication: HashMap<String, String>,

    /// RPC method -> backend group name.
    pub rpc_method_mappings: HashMap<String, String>,

    /// Group serving WebSocket clients. Required when `server.ws_port` is set.
    pub ws_backend_group: Option<String>,

    /// Methods a WebSocket client may send upstream.
    pub ws_method_whitelist: Vec<String>,

    /// Overrides the message returned for non-whitelisted methods.
    pub whitelist_error_message: Option<String>,

    /// Response caching gated on block height.
    pub cache: CacheConfig,
}

/// Listener and request-handling configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Host for the JSON-RPC listener.
    pub rpc_host: String,

    /// Port for the JSON-RPC listener (0 disables it).
    pub rpc_port: u16,

    /// Host for the WebSocket listener.
    pub ws_host: String,

    /// Port for the WebSocket listener (0 disables it).
    pub ws_port: u16,

    /// Maximum accepted request body.
    pub max_body_size_bytes: usize,

    /// Instance-wide cap on in-flight upstream calls (0 = unbounded).
    pub max_concurrent_rpcs: usize,

    /// Server-side request deadline (0 = none).
    pub timeout_seconds: u64,

    /// Largest batch forwarded to a backend in one upstream call.
    pub max_upstream_batch_size: usize,

    /// Log request bodies at info level.
    pub enable_request_log: bool,

    /// Truncation length for logged request bodies.
    pub max_request_body_log_len: usize,

    /// How long startup waits for early listener failures.
    pub listener_grace_period_ms: u64,

    /// Upper bound on connection draining during shutdown.
    pub shutdown_drain_seconds: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            rpc_host: "0.0.0.0".to_string(),
            rpc_port: 0,
            ws_host: "0.0.0.0".to_string(),
            ws_port: 0,
            max_body_size_bytes: 10 * 1024 * 1024,
            max_concurrent_rpcs: 0,
            timeout_seconds: 0,
            max_upstream_batch_size: 10,
            enable_request_log: false,
            max_request_body_log_len: 10_000,
            listener_grace_period_ms: 10,
            shutdown_drain_seconds: 5,
        }
    }
}

impl ServerConfig {
    /// Socket address of the RPC listener, if enabled.
    pub fn rpc_addr(&self) -> Option<String> {
        (self.rpc_port != 0).then(|| format!("{}:{}", self.rpc_host, self.rpc_port))
    }

    /// Socket address of the WebSocket listener, if enabled.
    pub fn ws_addr(&self) -> Option<String> {
        (self.ws_port != 0).then(|| format!("{}:{}", self.ws_host, self.ws_port))
    }

    pub fn grace_period(&self) -> Duration {
        Duration::from_millis(self.listener_grace_period_ms)
    }

    pub fn request_timeout(&self) -> Option<Duration> {
        (self.timeout_seconds != 0).then(|| Duration::from_secs(self.timeout_seconds))
    }
}

/// External store configuration.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct RedisConfig {
    /// Connection URL; `$VAR` reads it from the environment. Empty selects
    /// the in-process limiter and cache.
    pub url: String,

    /// Prefix applied to every key written by this instance.
    pub namespace: String,
}

/// Metrics exposition configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct MetricsConfig {
    pub enabled: bool,
    pub host: String,
    pub port: u16,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            host: "0.0.0.0".to_string(),
            port: 9761,
        }
    }
}

impl MetricsConfig {
    pub fn addr(&self) -> Result<SocketAddr, std::net::AddrParseError> {
        format!("{}:{}", self.host, self.port).parse()
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default level when `RUST_LOG` is unset.
    pub level: String,
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Text,
        }
    }
}

/// Per-client rate limiting applied by the server before dispatch.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct FrontendRateLimitConfig {
    /// Requests allowed per client per interval (0 disables).
    pub base_rate: u32,

    /// Window length in seconds.
    pub base_interval_seconds: u64,

    /// User agents that bypass the limit.
    pub exempt_user_agents: Vec<String>,

    /// Overrides the over-rate-limit error message.
    pub error_message: Option<String>,
}

impl Default for FrontendRateLimitConfig {
    fn default() -> Self {
        Self {
            base_rate: 0,
            base_interval_seconds: 1,
            exempt_user_agents: Vec::new(),
            error_message: None,
        }
    }
}

/// Batch request limits.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct BatchConfig {
    /// Maximum calls in one client batch.
    pub max_size: usize,

    /// Overrides the too-many-batch-requests error message.
    pub error_message: Option<String>,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            max_size: 100,
            error_message: None,
        }
    }
}

/// Resilience options shared by every backend. Zero keeps the built-in default.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct BackendOptionsConfig {
    pub response_timeout_seconds: u64,
    pub max_retries: u32,
    pub max_response_size_bytes: usize,
    pub out_of_service_seconds: u64,
}

/// A single upstream node.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct BackendConfig {
    /// HTTP JSON-RPC endpoint (`$VAR` resolves from the environment).
    pub rpc_url: String,

    /// WebSocket endpoint (`$VAR` resolves from the environment).
    pub ws_url: String,

    /// Basic auth user, sent only when a password is configured.
    pub username: String,

    /// Basic auth password (`$VAR` resolves from the environment).
    pub password: String,

    /// Outbound calls per second (0 = uncapped).
    pub max_rps: u32,

    /// Concurrent WebSocket connections (0 = uncapped).
    pub max_ws_conns: u32,

    /// PEM CA bundle trusted for this upstream.
    pub ca_file: String,

    /// PEM client certificate for mutual TLS.
    pub client_cert_file: String,

    /// PEM private key for mutual TLS.
    pub client_key_file: String,

    /// Keep only the client-originating X-Forwarded-For entry.
    pub strip_trailing_xff: bool,
}

/// Ordered list of backend names.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct BackendGroupConfig {
    pub backends: Vec<String>,
}

/// Response cache configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CacheConfig {
    pub enabled: bool,

    /// Trusted node polled for block number and gas price.
    pub block_sync_rpc_url: String,

    /// Blocks a cached entry may lag behind the head before it is refetched.
    pub num_block_confirmations: u64,

    /// Last-value cache refresh tick.
    pub refresh_interval_ms: u64,

    /// Entry bound for the in-memory store.
    pub memory_capacity: usize,

    /// Entry TTL in the external store.
    pub ttl_seconds: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            block_sync_rpc_url: String::new(),
            num_block_confirmations: 0,
            refresh_interval_ms: 1_000,
            memory_capacity: 10_000,
            ttl_seconds: 24 * 60 * 60,
        }
    }
}
