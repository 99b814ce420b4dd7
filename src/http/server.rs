//! HTTP server setup and lifecycle.
//!
//! # Responsibilities
//! - Create Axum routers for the RPC and WebSocket listeners
//! - Authenticate requests by path key
//! - Apply the frontend per-client rate limit
//! - Bind listeners and serve until shutdown
//! - Drain serve loops on shutdown within a deadline

use std::collections::{BTreeMap, HashMap, HashSet};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    body::Body,
    extract::{ConnectInfo, Path, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde_json::Value;
use thiserror::Error;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tower_http::trace::TraceLayer;
use uuid::Uuid;

use crate::backend::{BackendGroup, ForwardContext};
use crate::cache::ResponseCache;
use crate::config::FrontendRateLimitConfig;
use crate::http::dispatch::{Dispatcher, Reply};
use crate::http::websocket::{ws_handler, ws_handler_authed};
use crate::lifecycle::Shutdown;
use crate::rpc::{ErrorCatalog, RpcErrorKind};
use crate::security::headers::X_FORWARDED_FOR;
use crate::security::LocalRateLimiter;

/// Everything the server needs, resolved by the orchestrator.
#[derive(Debug)]
pub struct ServerParams {
    pub backend_groups: BTreeMap<String, Arc<BackendGroup>>,
    pub ws_backend_group: Option<Arc<BackendGroup>>,
    pub ws_method_whitelist: HashSet<String>,
    /// RPC method -> backend group name.
    pub rpc_method_mappings: HashMap<String, String>,
    pub max_body_size_bytes: usize,
    /// Secret path key -> alias. Empty disables authentication.
    pub authenticated_paths: HashMap<String, String>,
    pub timeout: Option<Duration>,
    pub max_upstream_batch_size: usize,
    pub cache: Option<Arc<ResponseCache>>,
    pub rate_limit: FrontendRateLimitConfig,
    pub enable_request_log: bool,
    pub max_request_body_log_len: usize,
    pub max_batch_size: usize,
    pub errors: Arc<ErrorCatalog>,
    pub shutdown_drain: Duration,
}

/// Listener failures.
#[derive(Debug, Error)]
pub enum ServeError {
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("server closed")]
    Closed,

    #[error("listener error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug)]
pub(crate) struct ServerInner {
    pub(crate) params: ServerParams,
    frontend_limiter: Option<LocalRateLimiter>,
    pub(crate) shutdown: Shutdown,
    active: watch::Sender<usize>,
}

impl ServerInner {
    /// Alias for the path key, `Err` when the request is not allowed.
    pub(crate) fn authenticate(&self, key: Option<&str>) -> Result<Option<&str>, ()> {
        let paths = &self.params.authenticated_paths;
        match key {
            None if paths.is_empty() => Ok(None),
            Some(key) => paths.get(key).map(|alias| Some(alias.as_str())).ok_or(()),
            None => Err(()),
        }
    }

    pub(crate) fn error_response(&self, kind: RpcErrorKind) -> Response {
        (
            kind.http_status(),
            Json(self.params.errors.response(kind, Value::Null)),
        )
            .into_response()
    }

    pub(crate) fn over_rate_limit(&self, client_ip: &str, headers: &HeaderMap) -> bool {
        let Some(limiter) = &self.frontend_limiter else {
            return false;
        };
        let user_agent = headers
            .get(header::USER_AGENT)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default();
        if self
            .params
            .rate_limit
            .exempt_user_agents
            .iter()
            .any(|ua| !ua.is_empty() && user_agent.starts_with(ua.as_str()))
        {
            return false;
        }
        !limiter.take(client_ip, self.params.rate_limit.base_rate)
    }
}

/// Counts running serve loops for the shutdown drain.
struct ActiveGuard<'a>(&'a watch::Sender<usize>);

impl<'a> ActiveGuard<'a> {
    fn new(active: &'a watch::Sender<usize>) -> Self {
        active.send_modify(|n| *n += 1);
        Self(active)
    }
}

impl Drop for ActiveGuard<'_> {
    fn drop(&mut self) {
        self.0.send_modify(|n| *n = n.saturating_sub(1));
    }
}

/// JSON-RPC gateway server.
#[derive(Debug, Clone)]
pub struct Server {
    inner: Arc<ServerInner>,
}

impl Server {
    pub fn new(params: ServerParams) -> Self {
        let frontend_limiter = (params.rate_limit.base_rate > 0).then(|| {
            LocalRateLimiter::with_window(Duration::from_secs(
                params.rate_limit.base_interval_seconds.max(1),
            ))
        });
        let (active, _) = watch::channel(0);

        Self {
            inner: Arc::new(ServerInner {
                params,
                frontend_limiter,
                shutdown: Shutdown::new(),
                active,
            }),
        }
    }

    pub fn params(&self) -> &ServerParams {
        &self.inner.params
    }

    #[cfg(test)]
    pub(crate) fn inner(&self) -> &ServerInner {
        &self.inner
    }

    /// Serve JSON-RPC over HTTP on `addr` until shutdown.
    pub async fn listen_and_serve_rpc(&self, addr: &str) -> Result<(), ServeError> {
        self.serve("rpc", addr, self.rpc_router()).await
    }

    /// Serve JSON-RPC over WebSocket on `addr` until shutdown.
    pub async fn listen_and_serve_ws(&self, addr: &str) -> Result<(), ServeError> {
        self.serve("ws", addr, self.ws_router()).await
    }

    fn rpc_router(&self) -> Router {
        Router::new()
            .route("/healthz", get(|| async { "OK" }))
            .route("/", post(rpc_handler))
            .route("/{auth_key}", post(rpc_handler_authed))
            .with_state(self.inner.clone())
            .layer(TraceLayer::new_for_http())
    }

    fn ws_router(&self) -> Router {
        Router::new()
            .route("/", get(ws_handler))
            .route("/{auth_key}", get(ws_handler_authed))
            .with_state(self.inner.clone())
            .layer(TraceLayer::new_for_http())
    }

    async fn serve(&self, kind: &'static str, addr: &str, router: Router) -> Result<(), ServeError> {
        let _active = ActiveGuard::new(&self.inner.active);
        let mut shutdown = self.inner.shutdown.subscribe();
        if self.inner.shutdown.is_triggered() {
            return Err(ServeError::Closed);
        }

        let listener = TcpListener::bind(addr)
            .await
            .map_err(|source| ServeError::Bind {
                addr: addr.to_string(),
                source,
            })?;
        let local_addr = listener.local_addr()?;
        tracing::info!(listener = kind, address = %local_addr, "Server listening");

        axum::serve(
            listener,
            router.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(async move {
            let _ = shutdown.recv().await;
        })
        .await?;

        tracing::info!(listener = kind, address = %local_addr, "Server stopped");
        Ok(())
    }

    /// Stop accepting, then wait for serve loops to drain. Idempotent.
    pub async fn shutdown(&self) {
        if !self.inner.shutdown.trigger() {
            return;
        }

        let mut active = self.inner.active.subscribe();
        let drain = self.inner.params.shutdown_drain;
        let drained = tokio::time::timeout(drain, async {
            let _ = active.wait_for(|n| *n == 0).await;
        })
        .await
        .is_ok();

        if drained {
            tracing::info!("Server drained");
        } else {
            tracing::warn!(
                deadline = ?drain,
                remaining = *active.borrow(),
                "Server drain deadline exceeded"
            );
        }
    }
}

/// Client address for rate limiting and forwarding.
pub(crate) fn forwarded_for(headers: &HeaderMap, peer: SocketAddr) -> String {
    headers
        .get(X_FORWARDED_FOR)
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.trim().is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| peer.ip().to_string())
}

pub(crate) fn client_ip(forwarded_for: &str) -> &str {
    forwarded_for.split(',').next().unwrap_or_default().trim()
}

async fn rpc_handler(
    State(inner): State<Arc<ServerInner>>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    body: Body,
) -> Response {
    handle_rpc(inner, None, peer, headers, body).await
}

async fn rpc_handler_authed(
    State(inner): State<Arc<ServerInner>>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    Path(auth_key): Path<String>,
    headers: HeaderMap,
    body: Body,
) -> Response {
    handle_rpc(inner, Some(auth_key), peer, headers, body).await
}

async fn handle_rpc(
    inner: Arc<ServerInner>,
    auth_key: Option<String>,
    peer: SocketAddr,
    headers: HeaderMap,
    body: Body,
) -> Response {
    let request_id = headers
        .get("x-request-id")
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
        .unwrap_or_else(|| Uuid::new_v4().to_string());

    let alias = match inner.authenticate(auth_key.as_deref()) {
        Ok(alias) => alias.map(str::to_string),
        Err(()) => {
            tracing::debug!(request_id = %request_id, "Rejected unauthenticated request");
            return inner.error_response(RpcErrorKind::Unauthorized);
        }
    };

    let forwarded_for = forwarded_for(&headers, peer);
    if inner.over_rate_limit(client_ip(&forwarded_for), &headers) {
        tracing::debug!(request_id = %request_id, client = %client_ip(&forwarded_for), "Client over rate limit");
        return inner.error_response(RpcErrorKind::OverRateLimit);
    }

    let body = match axum::body::to_bytes(body, inner.params.max_body_size_bytes).await {
        Ok(body) => body,
        Err(_) => return inner.error_response(RpcErrorKind::RequestBodyTooLarge),
    };

    if inner.params.enable_request_log {
        let shown = body.len().min(inner.params.max_request_body_log_len);
        tracing::info!(
            request_id = %request_id,
            auth = alias.as_deref().unwrap_or("none"),
            body = %String::from_utf8_lossy(&body[..shown]),
            "Received RPC request"
        );
    }

    let ctx = ForwardContext {
        forwarded_for,
        request_id: Some(request_id.clone()),
    };
    let dispatcher = Dispatcher::new(&inner, &ctx);

    let reply = match inner.params.timeout {
        Some(limit) => match tokio::time::timeout(limit, dispatcher.handle(&body)).await {
            Ok(reply) => reply,
            Err(_) => {
                tracing::warn!(request_id = %request_id, timeout = ?limit, "Request timed out");
                return inner.error_response(RpcErrorKind::GatewayTimeout);
            }
        },
        None => dispatcher.handle(&body).await,
    };

    let mut response = match reply {
        Reply::Single(res, status) => (status, Json(res)).into_response(),
        Reply::Batch(responses) => (StatusCode::OK, Json(responses)).into_response(),
    };
    if let Ok(value) = header::HeaderValue::from_str(&request_id) {
        response.headers_mut().insert("x-request-id", value);
    }
    response
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params() -> ServerParams {
        ServerParams {
            backend_groups: BTreeMap::new(),
            ws_backend_group: None,
            ws_method_whitelist: HashSet::new(),
            rpc_method_mappings: HashMap::new(),
            max_body_size_bytes: 1024,
            authenticated_paths: HashMap::new(),
            timeout: None,
            max_upstream_batch_size: 10,
            cache: None,
            rate_limit: FrontendRateLimitConfig::default(),
            enable_request_log: false,
            max_request_body_log_len: 100,
            max_batch_size: 100,
            errors: Arc::new(ErrorCatalog::default()),
            shutdown_drain: Duration::from_secs(1),
        }
    }

    #[test]
    fn test_authenticate() {
        let open = Server::new(params());
        assert_eq!(open.inner.authenticate(None), Ok(None));
        assert!(open.inner.authenticate(Some("key")).is_err());

        let mut p = params();
        p.authenticated_paths.insert("secret".into(), "alice".into());
        let closed = Server::new(p);
        assert!(closed.inner.authenticate(None).is_err());
        assert!(closed.inner.authenticate(Some("wrong")).is_err());
        assert_eq!(closed.inner.authenticate(Some("secret")), Ok(Some("alice")));
    }

    #[test]
    fn test_forwarded_for() {
        let peer: SocketAddr = "10.1.1.1:5000".parse().unwrap();
        let mut headers = HeaderMap::new();
        assert_eq!(forwarded_for(&headers, peer), "10.1.1.1");

        headers.insert(X_FORWARDED_FOR, "1.2.3.4, 5.6.7.8".parse().unwrap());
        let xff = forwarded_for(&headers, peer);
        assert_eq!(xff, "1.2.3.4, 5.6.7.8");
        assert_eq!(client_ip(&xff), "1.2.3.4");
    }

    #[tokio::test(start_paused = true)]
    async fn test_frontend_rate_limit() {
        let mut p = params();
        p.rate_limit.base_rate = 2;
        p.rate_limit.exempt_user_agents = vec!["indexer".into()];
        let server = Server::new(p);

        let headers = HeaderMap::new();
        assert!(!server.inner.over_rate_limit("1.1.1.1", &headers));
        assert!(!server.inner.over_rate_limit("1.1.1.1", &headers));
        assert!(server.inner.over_rate_limit("1.1.1.1", &headers));
        assert!(!server.inner.over_rate_limit("2.2.2.2", &headers));

        let mut exempt = HeaderMap::new();
        exempt.insert(header::USER_AGENT, "indexer/1.0".parse().unwrap());
        assert!(!server.inner.over_rate_limit("1.1.1.1", &exempt));

        tokio::time::advance(Duration::from_secs(1)).await;
        assert!(!server.inner.over_rate_limit("1.1.1.1", &headers));
    }

    #[tokio::test]
    async fn test_shutdown_is_idempotent_and_refuses_new_listeners() {
        let server = Server::new(params());
        server.shutdown().await;
        server.shutdown().await;

        let err = server.listen_and_serve_rpc("127.0.0.1:0").await.unwrap_err();
        assert!(matches!(err, ServeError::Closed));
    }

    #[tokio::test]
    async fn test_shutdown_drains_running_listener() {
        let server = Server::new(params());
        let running = server.clone();
        let task = tokio::spawn(async move { running.listen_and_serve_rpc("127.0.0.1:0").await });
        tokio::time::sleep(Duration::from_millis(50)).await;

        server.shutdown().await;
        let result = tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .unwrap()
            .unwrap();
        assert!(result.is_ok());
    }
}
