//! Environment-or-literal resolution for configuration values.
//!
//! A value of the form `$NAME` is read from the environment variable `NAME`;
//! anything else is taken literally. Resolution happens once, before
//! validation, so no component ever sees an unresolved value.

use std::collections::HashMap;

use thiserror::Error;

use crate::config::schema::ProxyConfig;

/// Errors raised while resolving configuration values.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SecretError {
    /// The referenced environment variable is unset or empty.
    #[error("config env var {0} not found")]
    MissingEnv(String),
}

/// Resolve a single value against the process environment.
pub fn read_from_env_or_config(value: &str) -> Result<String, SecretError> {
    resolve_with(value, |name| std::env::var(name).ok())
}

/// Resolve a single value with a caller-supplied lookup.
pub fn resolve_with<F>(value: &str, lookup: F) -> Result<String, SecretError>
where
    F: Fn(&str) -> Option<String>,
{
    match value.strip_prefix('$') {
        Some(name) => match lookup(name) {
            Some(v) if !v.is_empty() => Ok(v),
            _ => Err(SecretError::MissingEnv(value.to_string())),
        },
        None => Ok(value.to_string()),
    }
}

/// Return a copy of `config` with every resolvable field substituted.
pub fn resolve_config(config: &ProxyConfig) -> Result<ProxyConfig, SecretError> {
    resolve_config_with(config, |name| std::env::var(name).ok())
}

pub fn resolve_config_with<F>(config: &ProxyConfig, lookup: F) -> Result<ProxyConfig, SecretError>
where
    F: Fn(&str) -> Option<String>,
{
    let mut resolved = config.clone();

    if !resolved.redis.url.is_empty() {
        resolved.redis.url = resolve_with(&config.redis.url, &lookup)?;
    }

    for backend in resolved.backends.values_mut() {
        backend.rpc_url = resolve_with(&backend.rpc_url, &lookup)?;
        backend.ws_url = resolve_with(&backend.ws_url, &lookup)?;
        if !backend.password.is_empty() {
            backend.password = resolve_with(&backend.password, &lookup)?;
        }
    }

    let mut auth = HashMap::with_capacity(config.authentication.len());
    for (secret, alias) in &config.authentication {
        auth.insert(resolve_with(secret, &lookup)?, alias.clone());
    }
    resolved.authentication = auth;

    if !resolved.cache.block_sync_rpc_url.is_empty() {
        resolved.cache.block_sync_rpc_url = resolve_with(&config.cache.block_sync_rpc_url, &lookup)?;
    }

    Ok(resolved)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::schema::BackendConfig;

    fn env(name: &str) -> Option<String> {
        match name {
            "NODE_URL" => Some("http://node:8545".to_string()),
            "EMPTY" => Some(String::new()),
            _ => None,
        }
    }

    #[test]
    fn test_literal_passthrough() {
        assert_eq!(resolve_with("http://x", env).unwrap(), "http://x");
    }

    #[test]
    fn test_env_lookup() {
        assert_eq!(resolve_with("$NODE_URL", env).unwrap(), "http://node:8545");
        assert_eq!(
            resolve_with("$MISSING", env),
            Err(SecretError::MissingEnv("$MISSING".into()))
        );
        assert!(resolve_with("$EMPTY", env).is_err());
    }

    #[test]
    fn test_resolve_config_substitutes_backends_and_auth() {
        let mut config = ProxyConfig::default();
        config.backends.insert(
            "a".into(),
            BackendConfig {
                rpc_url: "$NODE_URL".into(),
                ws_url: "ws://node:8546".into(),
                ..Default::default()
            },
        );
        config.authentication.insert("$NODE_URL".into(), "alias".into());

        let resolved = resolve_config_with(&config, env).unwrap();
        assert_eq!(resolved.backends["a"].rpc_url, "http://node:8545");
        assert_eq!(resolved.backends["a"].ws_url, "ws://node:8546");
        assert_eq!(resolved.authentication["http://node:8545"], "alias");
    }

    #[test]
    fn test_resolve_config_propagates_missing() {
        let mut config = ProxyConfig::default();
        config.cache.block_sync_rpc_url = "$SYNC_URL".into();
        let err = resolve_config_with(&config, env).unwrap_err();
        assert_eq!(err.to_string(), "config env var $SYNC_URL not found");
    }
}
