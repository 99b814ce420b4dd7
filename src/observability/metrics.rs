//! Metrics collection and exposition.
//!
//! # Responsibilities
//! - Define gateway metrics (backend outcomes, rate limiting, cache, LVC)
//! - Expose Prometheus-compatible metrics endpoint
//! - Track per-backend and aggregate metrics
//!
//! # Metrics
//! - `rpc_gateway_backend_requests_total` (counter): upstream calls by backend, outcome
//! - `rpc_gateway_backend_request_duration_seconds` (histogram): upstream latency
//! - `rpc_gateway_backend_offline_total` (counter): circuit breaker trips
//! - `rpc_gateway_rate_limited_total` (counter): denied calls by backend, kind
//! - `rpc_gateway_ws_connections` (gauge): open upstream WebSocket connections
//! - `rpc_gateway_cache_lookups_total` (counter): response cache hits and misses
//! - `rpc_gateway_lvc_refresh_total` (counter): last-value refreshes by key, outcome
//! - `rpc_gateway_lvc_value` (gauge): last refreshed value by key
//! - `rpc_gateway_rpc_requests_total` (counter): client calls by method, status
//!
//! # Design Decisions
//! - One process-wide recorder; a second install is reported, not fatal
//! - The exposition listener runs on its own task and only logs failures

use std::net::SocketAddr;
use std::sync::OnceLock;
use std::time::Instant;

use axum::{routing::get, Router};
use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};
use tokio::net::TcpListener;
use tokio::sync::broadcast;

static HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Install the global Prometheus recorder, or return the one already installed.
pub fn install_recorder() -> Result<PrometheusHandle, BuildError> {
    if let Some(handle) = HANDLE.get() {
        return Ok(handle.clone());
    }
    let handle = PrometheusBuilder::new().install_recorder()?;
    Ok(HANDLE.get_or_init(|| handle).clone())
}

/// Serve `GET /metrics` until `shutdown` fires. Errors are logged only.
pub async fn serve_metrics(
    addr: SocketAddr,
    handle: PrometheusHandle,
    mut shutdown: broadcast::Receiver<()>,
) {
    let app = Router::new().route(
        "/metrics",
        get(move || {
            let handle = handle.clone();
            async move { handle.render() }
        }),
    );

    let listener = match TcpListener::bind(addr).await {
        Ok(listener) => listener,
        Err(e) => {
            tracing::error!(address = %addr, error = %e, "Error starting metrics server");
            return;
        }
    };

    tracing::info!(address = %addr, "Metrics server listening");
    let result = axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = shutdown.recv().await;
        })
        .await;
    if let Err(e) = result {
        tracing::error!(address = %addr, error = %e, "Metrics server failed");
    }
}

/// Record one upstream attempt.
pub fn record_backend_request(backend: &str, outcome: &'static str, start: Instant) {
    counter!(
        "rpc_gateway_backend_requests_total",
        "backend" => backend.to_string(),
        "outcome" => outcome
    )
    .increment(1);
    histogram!(
        "rpc_gateway_backend_request_duration_seconds",
        "backend" => backend.to_string()
    )
    .record(start.elapsed().as_secs_f64());
}

pub fn record_backend_offline(backend: &str) {
    counter!("rpc_gateway_backend_offline_total", "backend" => backend.to_string()).increment(1);
}

pub fn record_rate_limited(backend: &str, kind: &'static str) {
    counter!(
        "rpc_gateway_rate_limited_total",
        "backend" => backend.to_string(),
        "kind" => kind
    )
    .increment(1);
}

pub fn record_ws_connection(backend: &str, delta: f64) {
    gauge!("rpc_gateway_ws_connections", "backend" => backend.to_string()).increment(delta);
}

pub fn record_cache_lookup(method: &str, hit: bool) {
    counter!(
        "rpc_gateway_cache_lookups_total",
        "method" => method.to_string(),
        "outcome" => if hit { "hit" } else { "miss" }
    )
    .increment(1);
}

pub fn record_lvc_refresh(key: &str, ok: bool, value: Option<f64>) {
    counter!(
        "rpc_gateway_lvc_refresh_total",
        "key" => key.to_string(),
        "outcome" => if ok { "success" } else { "failure" }
    )
    .increment(1);
    if let Some(v) = value {
        gauge!("rpc_gateway_lvc_value", "key" => key.to_string()).set(v);
    }
}

pub fn record_rpc_request(method: &str, status: u16) {
    counter!(
        "rpc_gateway_rpc_requests_total",
        "method" => method.to_string(),
        "status" => status.to_string()
    )
    .increment(1);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_install_is_repeatable() {
        let first = install_recorder();
        let second = install_recorder();
        // Another test binary may own the global recorder; either way the
        // second call agrees with the first.
        assert_eq!(first.is_ok(), second.is_ok());
    }
}
