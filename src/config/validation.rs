//! Semantic configuration validation.
//!
//! Returns all validation errors, not just the first. Runs once when the
//! file is loaded and again at startup on the resolved configuration.

use std::path::Path;

use thiserror::Error;
use url::Url;

use crate::config::schema::ProxyConfig;

/// Literal that may never be used as an authentication key.
pub const RESERVED_AUTH_KEY: &str = "none";

/// A single semantic configuration problem.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("must define at least one backend")]
    NoBackends,

    #[error("must define at least one backend group")]
    NoBackendGroups,

    #[error("must define at least one RPC method mapping")]
    NoMethodMappings,

    #[error("cannot use none as an auth key")]
    ReservedAuthKey,

    #[error("must define an RPC URL for backend {0}")]
    MissingRpcUrl(String),

    #[error("must define a WS URL for backend {0}")]
    MissingWsUrl(String),

    #[error("invalid RPC URL for backend {backend}: {reason}")]
    InvalidUrl { backend: String, reason: String },

    #[error("backend {backend} must set both client_cert_file and client_key_file")]
    IncompleteClientCert { backend: String },

    #[error("CA file {path} for backend {backend} does not exist")]
    MissingCaFile { backend: String, path: String },

    #[error("backend {0} is not defined")]
    UndefinedBackend(String),

    #[error("backend group {0} must contain at least one backend")]
    EmptyGroup(String),

    #[error("ws backend group {0} does not exist")]
    UndefinedWsGroup(String),

    #[error("a ws port was defined, but no ws group was defined")]
    WsPortWithoutGroup,

    #[error("undefined backend group {0}")]
    UndefinedMappingGroup(String),

    #[error("block sync node required for caching")]
    MissingBlockSyncUrl,
}

/// `$VAR` references are checked again once resolved at startup.
fn parse_unresolved(value: &str) -> Result<(), url::ParseError> {
    if value.starts_with('$') {
        return Ok(());
    }
    Url::parse(value).map(|_| ())
}

/// Validate a configuration.
pub fn validate_config(config: &ProxyConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.backends.is_empty() {
        errors.push(ValidationError::NoBackends);
    }
    if config.backend_groups.is_empty() {
        errors.push(ValidationError::NoBackendGroups);
    }
    if config.rpc_method_mappings.is_empty() {
        errors.push(ValidationError::NoMethodMappings);
    }

    if config.authentication.contains_key(RESERVED_AUTH_KEY) {
        errors.push(ValidationError::ReservedAuthKey);
    }

    for (name, backend) in &config.backends {
        if backend.rpc_url.is_empty() {
            errors.push(ValidationError::MissingRpcUrl(name.clone()));
        } else if let Err(e) = parse_unresolved(&backend.rpc_url) {
            errors.push(ValidationError::InvalidUrl {
                backend: name.clone(),
                reason: e.to_string(),
            });
        }
        if backend.ws_url.is_empty() {
            errors.push(ValidationError::MissingWsUrl(name.clone()));
        }
        if backend.client_cert_file.is_empty() != backend.client_key_file.is_empty() {
            errors.push(ValidationError::IncompleteClientCert {
                backend: name.clone(),
            });
        }
        if !backend.ca_file.is_empty() && !Path::new(&backend.ca_file).exists() {
            errors.push(ValidationError::MissingCaFile {
                backend: name.clone(),
                path: backend.ca_file.clone(),
            });
        }
    }

    for (group_name, group) in &config.backend_groups {
        if group.backends.is_empty() {
            errors.push(ValidationError::EmptyGroup(group_name.clone()));
        }
        for backend_name in &group.backends {
            if !config.backends.contains_key(backend_name) {
                errors.push(ValidationError::UndefinedBackend(backend_name.clone()));
            }
        }
    }

    match &config.ws_backend_group {
        Some(group) if !config.backend_groups.contains_key(group) => {
            errors.push(ValidationError::UndefinedWsGroup(group.clone()));
        }
        None if config.server.ws_port != 0 => {
            errors.push(ValidationError::WsPortWithoutGroup);
        }
        _ => {}
    }

    let mut mapped_groups: Vec<&String> = config.rpc_method_mappings.values().collect();
    mapped_groups.sort();
    mapped_groups.dedup();
    for group in mapped_groups {
        if !config.backend_groups.contains_key(group) {
            errors.push(ValidationError::UndefinedMappingGroup(group.clone()));
        }
    }

    if config.cache.enabled && config.cache.block_sync_rpc_url.is_empty() {
        errors.push(ValidationError::MissingBlockSyncUrl);
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
