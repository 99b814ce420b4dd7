//! Backend policy options.
//!
//! A backend starts from [`BackendOptions::default`] and applies a list of
//! [`BackendOpt`] values once, before first use. Nothing changes afterwards.

use std::path::Path;
use std::time::Duration;

use crate::config::{BackendConfig, BackendOptionsConfig};
use crate::net::{TlsError, UpstreamTls};
use crate::security::HeaderPolicy;

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);
pub const DEFAULT_OUT_OF_SERVICE: Duration = Duration::from_secs(5);
pub const DEFAULT_RETRY_BASE_DELAY: Duration = Duration::from_millis(1000);
pub const DEFAULT_RETRY_MAX_DELAY: Duration = Duration::from_millis(3000);

/// Resolved policy for one backend.
#[derive(Debug, Clone)]
pub struct BackendOptions {
    /// Deadline for a single attempt.
    pub timeout: Duration,
    /// Extra attempts after the first failure, on this backend only.
    pub max_retries: u32,
    /// Response body cap; `None` is unbounded.
    pub max_response_size: Option<usize>,
    /// How long a tripped backend stays out of service.
    pub out_of_service: Duration,
    /// Permanent failures (retries exhausted) before the breaker trips.
    pub failure_threshold: u32,
    /// Outbound calls per second; 0 is uncapped.
    pub max_rps: u32,
    /// Concurrent upstream WebSocket connections; 0 is uncapped.
    pub max_ws_conns: u32,
    pub tls: Option<UpstreamTls>,
    pub basic_auth: Option<(String, String)>,
    pub headers: HeaderPolicy,
    pub retry_base_delay: Duration,
    pub retry_max_delay: Duration,
}

impl Default for BackendOptions {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_TIMEOUT,
            max_retries: 0,
            max_response_size: None,
            out_of_service: DEFAULT_OUT_OF_SERVICE,
            failure_threshold: 1,
            max_rps: 0,
            max_ws_conns: 0,
            tls: None,
            basic_auth: None,
            headers: HeaderPolicy::default(),
            retry_base_delay: DEFAULT_RETRY_BASE_DELAY,
            retry_max_delay: DEFAULT_RETRY_MAX_DELAY,
        }
    }
}

/// A single policy adjustment.
#[derive(Debug, Clone)]
pub enum BackendOpt {
    Timeout(Duration),
    MaxRetries(u32),
    MaxResponseSize(usize),
    OutOfServiceDuration(Duration),
    FailureThreshold(u32),
    MaxRps(u32),
    MaxWsConns(u32),
    Tls(UpstreamTls),
    BasicAuth { username: String, password: String },
    StripTrailingXff,
    ProxyIp(String),
    RetryBackoff { base: Duration, max: Duration },
}

impl BackendOptions {
    pub fn apply(mut self, opts: impl IntoIterator<Item = BackendOpt>) -> Self {
        for opt in opts {
            match opt {
                BackendOpt::Timeout(d) => self.timeout = d,
                BackendOpt::MaxRetries(n) => self.max_retries = n,
                BackendOpt::MaxResponseSize(n) => self.max_response_size = Some(n),
                BackendOpt::OutOfServiceDuration(d) => self.out_of_service = d,
                BackendOpt::FailureThreshold(n) => self.failure_threshold = n.max(1),
                BackendOpt::MaxRps(n) => self.max_rps = n,
                BackendOpt::MaxWsConns(n) => self.max_ws_conns = n,
                BackendOpt::Tls(tls) => self.tls = Some(tls),
                BackendOpt::BasicAuth { username, password } => {
                    self.basic_auth = Some((username, password))
                }
                BackendOpt::StripTrailingXff => self.headers.strip_trailing_xff = true,
                BackendOpt::ProxyIp(ip) => {
                    self.headers.proxy_ip = (!ip.is_empty()).then_some(ip);
                }
                BackendOpt::RetryBackoff { base, max } => {
                    self.retry_base_delay = base;
                    self.retry_max_delay = max;
                }
            }
        }
        self
    }
}

/// Options for a configured backend. Zero values keep the defaults.
pub fn opts_from_config(
    shared: &BackendOptionsConfig,
    backend: &BackendConfig,
    proxy_ip: Option<&str>,
) -> Result<Vec<BackendOpt>, TlsError> {
    let mut opts = Vec::new();

    if shared.response_timeout_seconds != 0 {
        opts.push(BackendOpt::Timeout(Duration::from_secs(
            shared.response_timeout_seconds,
        )));
    }
    if shared.max_retries != 0 {
        opts.push(BackendOpt::MaxRetries(shared.max_retries));
    }
    if shared.max_response_size_bytes != 0 {
        opts.push(BackendOpt::MaxResponseSize(shared.max_response_size_bytes));
    }
    if shared.out_of_service_seconds != 0 {
        opts.push(BackendOpt::OutOfServiceDuration(Duration::from_secs(
            shared.out_of_service_seconds,
        )));
    }
    if backend.max_rps != 0 {
        opts.push(BackendOpt::MaxRps(backend.max_rps));
    }
    if backend.max_ws_conns != 0 {
        opts.push(BackendOpt::MaxWsConns(backend.max_ws_conns));
    }
    if !backend.password.is_empty() {
        opts.push(BackendOpt::BasicAuth {
            username: backend.username.clone(),
            password: backend.password.clone(),
        });
    }
    if !backend.ca_file.is_empty() {
        let client = (!backend.client_cert_file.is_empty() && !backend.client_key_file.is_empty())
            .then(|| {
                (
                    Path::new(&backend.client_cert_file),
                    Path::new(&backend.client_key_file),
                )
            });
        opts.push(BackendOpt::Tls(UpstreamTls::load(
            Path::new(&backend.ca_file),
            client,
        )?));
    }
    if backend.strip_trailing_xff {
        opts.push(BackendOpt::StripTrailingXff);
    }
    if let Some(ip) = proxy_ip {
        opts.push(BackendOpt::ProxyIp(ip.to_string()));
    }

    Ok(opts)
}
