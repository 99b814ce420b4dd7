//! Backend abstraction.
//!
//! # Responsibilities
//! - Represent a single upstream node (HTTP and WebSocket endpoints)
//! - Enforce per-backend quotas through the shared rate limiter
//! - Bound every attempt with a timeout and cap the response size
//! - Retry on the same backend, then trip the circuit breaker
//! - Sanitize forwarding headers and attach credentials

use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use base64::{engine::general_purpose::STANDARD, Engine as _};
use bytes::{Bytes, BytesMut};
use reqwest::header::CONTENT_TYPE;
use reqwest::StatusCode;
use thiserror::Error;
use tokio::net::TcpStream;
use tokio::sync::Semaphore;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::{header, HeaderValue};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use url::Url;

use crate::backend::options::{BackendOpt, BackendOptions};
use crate::net::TlsError;
use crate::observability::metrics;
use crate::resilience::{calculate_backoff, CircuitBreaker};
use crate::rpc::RpcErrorKind;
use crate::security::headers::X_FORWARDED_FOR;
use crate::security::{acquire_ws_conn, BackendRateLimiter, RateLimitError, WsConnPermit};

/// Upstream WebSocket connection.
pub type UpstreamWs = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Errors raised while calling a backend.
#[derive(Debug, Error)]
pub enum BackendError {
    #[error("backend {0} is offline")]
    Offline(String),

    #[error("backend {0} is over capacity")]
    OverCapacity(String),

    #[error("rate limiter unavailable: {0}")]
    RateLimiter(#[from] RateLimitError),

    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    #[error("backend response exceeded {limit} bytes")]
    ResponseTooLarge { limit: usize },

    #[error("backend returned status {0}")]
    BadStatus(u16),

    #[error("backend returned an invalid response: {0}")]
    BadResponse(String),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("request cancelled")]
    Cancelled,

    #[error("permanent error forwarding request after {attempts} attempts: {source}")]
    RetriesExhausted {
        attempts: u32,
        #[source]
        source: Box<BackendError>,
    },

    #[error("invalid backend configuration: {0}")]
    Config(String),

    #[error(transparent)]
    Tls(#[from] TlsError),

    #[error("websocket error: {0}")]
    WebSocket(String),
}

impl BackendError {
    /// Client-facing error for this failure.
    pub fn rpc_kind(&self) -> RpcErrorKind {
        match self {
            BackendError::Offline(_) => RpcErrorKind::BackendOffline,
            BackendError::OverCapacity(_) | BackendError::RateLimiter(_) => {
                RpcErrorKind::OverCapacity
            }
            BackendError::Timeout(_) => RpcErrorKind::GatewayTimeout,
            BackendError::ResponseTooLarge { .. } => RpcErrorKind::ResponseTooLarge,
            BackendError::BadResponse(_) | BackendError::BadStatus(_) => RpcErrorKind::BadResponse,
            BackendError::RetriesExhausted { source, .. } => source.rpc_kind(),
            _ => RpcErrorKind::Internal,
        }
    }
}

/// Per-call context supplied by the dispatcher.
#[derive(Debug, Clone, Default)]
pub struct ForwardContext {
    /// Incoming X-Forwarded-For (or the peer address when absent).
    pub forwarded_for: String,
    pub request_id: Option<String>,
}

/// A single upstream node wrapped with resilience policy.
pub struct Backend {
    name: String,
    rpc_url: Url,
    ws_url: String,
    client: reqwest::Client,
    limiter: Arc<dyn BackendRateLimiter>,
    semaphore: Arc<Semaphore>,
    breaker: CircuitBreaker,
    options: BackendOptions,
}

impl fmt::Debug for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Backend")
            .field("name", &self.name)
            .field("rpc_url", &self.rpc_url.as_str())
            .field("ws_url", &self.ws_url)
            .finish_non_exhaustive()
    }
}

impl Backend {
    /// Create a backend. `opts` are applied in order over the defaults.
    pub fn new(
        name: impl Into<String>,
        rpc_url: &str,
        ws_url: &str,
        limiter: Arc<dyn BackendRateLimiter>,
        semaphore: Arc<Semaphore>,
        opts: impl IntoIterator<Item = BackendOpt>,
    ) -> Result<Self, BackendError> {
        let name = name.into();
        let options = BackendOptions::default().apply(opts);

        let rpc_url = Url::parse(rpc_url)
            .map_err(|e| BackendError::Config(format!("invalid RPC URL for {}: {}", name, e)))?;

        let mut builder = reqwest::Client::builder().user_agent(concat!(
            env!("CARGO_PKG_NAME"),
            "/",
            env!("CARGO_PKG_VERSION")
        ));
        if let Some(tls) = &options.tls {
            builder = tls.apply(builder);
        }
        let client = builder
            .build()
            .map_err(|e| BackendError::Config(format!("failed to build client for {}: {}", name, e)))?;

        let breaker = CircuitBreaker::new(options.failure_threshold, options.out_of_service);

        Ok(Self {
            name,
            rpc_url,
            ws_url: ws_url.to_string(),
            client,
            limiter,
            semaphore,
            breaker,
            options,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn rpc_url(&self) -> &Url {
        &self.rpc_url
    }

    pub fn ws_url(&self) -> &str {
        &self.ws_url
    }

    pub fn options(&self) -> &BackendOptions {
        &self.options
    }

    /// False while the backend is out of service.
    pub fn is_online(&self) -> bool {
        self.breaker.is_available()
    }

    /// Take the backend out of service for the configured cooldown.
    pub fn mark_offline(&self) {
        self.breaker.trip();
        self.report_offline();
    }

    fn report_offline(&self) {
        tracing::warn!(
            backend = %self.name,
            cooldown = ?self.options.out_of_service,
            "Backend marked out of service"
        );
        metrics::record_backend_offline(&self.name);
    }

    /// Forward a JSON-RPC body and return the raw upstream response.
    pub async fn forward(&self, body: Bytes, ctx: &ForwardContext) -> Result<Bytes, BackendError> {
        if !self.is_online() {
            return Err(BackendError::Offline(self.name.clone()));
        }
        self.check_rate_limit().await?;

        // Held across retries. Waiting here is backpressure, not a backend failure.
        let _permit = self
            .semaphore
            .acquire()
            .await
            .map_err(|_| BackendError::Cancelled)?;

        let mut last_error = None;
        for attempt in 0..=self.options.max_retries {
            if attempt > 0 {
                let delay = calculate_backoff(
                    attempt - 1,
                    self.options.retry_base_delay,
                    self.options.retry_max_delay,
                );
                tokio::time::sleep(delay).await;
            }

            let start = Instant::now();
            let outcome = match tokio::time::timeout(self.options.timeout, self.do_forward(&body, ctx)).await {
                Ok(result) => result,
                Err(_) => Err(BackendError::Timeout(self.options.timeout)),
            };

            match outcome {
                Ok(response) => {
                    metrics::record_backend_request(&self.name, "success", start);
                    self.breaker.record_success();
                    return Ok(response);
                }
                Err(e @ BackendError::ResponseTooLarge { .. }) => {
                    metrics::record_backend_request(&self.name, "too_large", start);
                    tracing::warn!(backend = %self.name, error = %e, "Backend response too large");
                    return Err(e);
                }
                Err(e) => {
                    metrics::record_backend_request(&self.name, "error", start);
                    tracing::info!(
                        backend = %self.name,
                        attempt = attempt + 1,
                        error = %e,
                        "Backend request failed"
                    );
                    last_error = Some(e);
                }
            }
        }

        if self.breaker.record_failure() {
            self.report_offline();
        }

        Err(BackendError::RetriesExhausted {
            attempts: self.options.max_retries + 1,
            source: Box::new(last_error.unwrap_or(BackendError::Cancelled)),
        })
    }

    async fn check_rate_limit(&self) -> Result<(), BackendError> {
        if self.options.max_rps == 0 {
            return Ok(());
        }
        match self.limiter.take_backend_rps(&self.name, self.options.max_rps).await {
            Ok(true) => Ok(()),
            Ok(false) => {
                metrics::record_rate_limited(&self.name, "rps");
                Err(BackendError::OverCapacity(self.name.clone()))
            }
            Err(e) => {
                tracing::error!(backend = %self.name, error = %e, "Rate limiter error, denying call");
                metrics::record_rate_limited(&self.name, "limiter_error");
                Err(BackendError::RateLimiter(e))
            }
        }
    }

    async fn do_forward(&self, body: &Bytes, ctx: &ForwardContext) -> Result<Bytes, BackendError> {
        let mut request = self
            .client
            .post(self.rpc_url.clone())
            .header(CONTENT_TYPE, "application/json")
            .body(body.clone());
        if let Some(xff) = self.options.headers.forwarded_for(&ctx.forwarded_for) {
            request = request.header(X_FORWARDED_FOR, xff);
        }
        if let Some(id) = &ctx.request_id {
            request = request.header("x-request-id", id);
        }
        if let Some((username, password)) = &self.options.basic_auth {
            request = request.basic_auth(username, Some(password));
        }

        let response = request
            .send()
            .await
            .map_err(|e| BackendError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() && status != StatusCode::BAD_REQUEST {
            return Err(BackendError::BadStatus(status.as_u16()));
        }

        let bytes = self.read_capped(response).await?;
        serde_json::from_slice::<serde::de::IgnoredAny>(&bytes)
            .map_err(|e| BackendError::BadResponse(e.to_string()))?;
        Ok(bytes)
    }

    async fn read_capped(&self, mut response: reqwest::Response) -> Result<Bytes, BackendError> {
        let Some(limit) = self.options.max_response_size else {
            return response
                .bytes()
                .await
                .map_err(|e| BackendError::Transport(e.to_string()));
        };

        if response.content_length().is_some_and(|len| len > limit as u64) {
            return Err(BackendError::ResponseTooLarge { limit });
        }

        let mut buf = BytesMut::new();
        while let Some(chunk) = response
            .chunk()
            .await
            .map_err(|e| BackendError::Transport(e.to_string()))?
        {
            if buf.len() + chunk.len() > limit {
                return Err(BackendError::ResponseTooLarge { limit });
            }
            buf.extend_from_slice(&chunk);
        }
        Ok(buf.freeze())
    }

    /// Claim a WebSocket slot against this backend's cap.
    pub async fn acquire_ws_permit(&self) -> Result<WsConnPermit, BackendError> {
        if self.options.max_ws_conns == 0 {
            return Ok(WsConnPermit::unlimited());
        }
        match acquire_ws_conn(self.limiter.clone(), &self.name, self.options.max_ws_conns).await {
            Ok(Some(permit)) => Ok(permit),
            Ok(None) => {
                metrics::record_rate_limited(&self.name, "ws_conns");
                Err(BackendError::OverCapacity(self.name.clone()))
            }
            Err(e) => {
                tracing::error!(backend = %self.name, error = %e, "Rate limiter error, denying ws connection");
                Err(BackendError::RateLimiter(e))
            }
        }
    }

    /// Open the upstream WebSocket connection.
    pub async fn dial_ws(&self) -> Result<UpstreamWs, BackendError> {
        let mut request = self
            .ws_url
            .as_str()
            .into_client_request()
            .map_err(|e| BackendError::WebSocket(e.to_string()))?;

        if let Some((username, password)) = &self.options.basic_auth {
            let token = STANDARD.encode(format!("{}:{}", username, password));
            let value = HeaderValue::from_str(&format!("Basic {}", token))
                .map_err(|e| BackendError::WebSocket(e.to_string()))?;
            request.headers_mut().insert(header::AUTHORIZATION, value);
        }

        let (stream, _) = tokio::time::timeout(
            self.options.timeout,
            tokio_tungstenite::connect_async(request),
        )
        .await
        .map_err(|_| BackendError::Timeout(self.options.timeout))?
        .map_err(|e| BackendError::WebSocket(e.to_string()))?;
        Ok(stream)
    }
}
