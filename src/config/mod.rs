//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML)
//!     → loader.rs (parse & deserialize)
//!     → validation.rs (structural checks, all errors collected)
//!     → ProxyConfig
//!
//! At startup:
//!     secrets.rs resolves `$VAR` references
//!     → validation.rs runs again on resolved values
//!     → ProxyConfig (resolved, immutable) drives construction
//! ```
//!
//! # Design Decisions
//! - Config is immutable once loaded; no hot reload
//! - All fields have defaults to allow minimal configs
//! - Validation separates syntactic (serde) from semantic checks
//! - A zero numeric option means "use the built-in default"

pub mod loader;
pub mod schema;
pub mod secrets;
pub mod validation;

pub use loader::{load_config, load_config_str, ConfigError};
pub use schema::{
    BackendConfig, BackendGroupConfig, BackendOptionsConfig, BatchConfig, CacheConfig,
    FrontendRateLimitConfig, LogFormat, LoggingConfig, MetricsConfig, ProxyConfig, RedisConfig,
    ServerConfig,
};
pub use secrets::SecretError;
pub use validation::ValidationError;
