//! Backend quota enforcement.
//!
//! # Responsibilities
//! - Cap outbound calls per second for each backend
//! - Cap concurrent upstream WebSocket connections for each backend
//! - Reconcile WebSocket counters at shutdown
//!
//! # Design Decisions
//! - One object-safe trait; in-process and Redis variants are chosen at startup
//! - Store failures are returned, never treated as "allowed"; callers deny
//! - A WebSocket slot is released exactly once, by its `WsConnPermit`

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

use crate::observability::metrics;

/// Errors raised by a rate limiter's backing store.
#[derive(Debug, Error)]
pub enum RateLimitError {
    /// The shared store could not be reached.
    #[error("rate limit store unavailable: {0}")]
    Unavailable(String),

    /// The store answered with something unexpected.
    #[error("rate limit store error: {0}")]
    Store(String),
}

impl From<redis::RedisError> for RateLimitError {
    fn from(e: redis::RedisError) -> Self {
        if e.is_io_error() || e.is_connection_dropped() || e.is_connection_refusal() || e.is_timeout() {
            RateLimitError::Unavailable(e.to_string())
        } else {
            RateLimitError::Store(e.to_string())
        }
    }
}

/// Quota checks shared by every backend.
#[async_trait]
pub trait BackendRateLimiter: Send + Sync + fmt::Debug {
    /// Count one outbound call; `false` once `max_rps` is used up this window.
    async fn take_backend_rps(&self, name: &str, max_rps: u32) -> Result<bool, RateLimitError>;

    /// Claim a WebSocket slot; `false` when `max_conns` are already open.
    async fn take_ws_conn(&self, name: &str, max_conns: u32) -> Result<bool, RateLimitError>;

    /// Give back a slot claimed by `take_ws_conn`. Never drops below zero.
    async fn release_ws_conn(&self, name: &str) -> Result<(), RateLimitError>;

    /// Reset WebSocket counters for `names`.
    async fn flush_backend_ws_conns(&self, names: &[String]) -> Result<(), RateLimitError>;
}

/// Claim a WebSocket slot and wrap it in a permit.
pub async fn acquire_ws_conn(
    limiter: Arc<dyn BackendRateLimiter>,
    name: &str,
    max_conns: u32,
) -> Result<Option<WsConnPermit>, RateLimitError> {
    if !limiter.take_ws_conn(name, max_conns).await? {
        return Ok(None);
    }
    metrics::record_ws_connection(name, 1.0);
    Ok(Some(WsConnPermit {
        slot: Some((limiter, name.to_string())),
    }))
}

/// A claimed WebSocket slot.
///
/// Call [`WsConnPermit::release`] when the connection closes. A permit that
/// is dropped unreleased hands the release to the current runtime.
pub struct WsConnPermit {
    slot: Option<(Arc<dyn BackendRateLimiter>, String)>,
}

impl WsConnPermit {
    /// A permit for an uncapped backend; releasing it does nothing.
    pub fn unlimited() -> Self {
        Self { slot: None }
    }

    pub fn backend(&self) -> Option<&str> {
        self.slot.as_ref().map(|(_, name)| name.as_str())
    }

    pub async fn release(mut self) {
        if let Some((limiter, name)) = self.slot.take() {
            release_slot(limiter, name).await;
        }
    }
}

async fn release_slot(limiter: Arc<dyn BackendRateLimiter>, name: String) {
    metrics::record_ws_connection(&name, -1.0);
    if let Err(e) = limiter.release_ws_conn(&name).await {
        tracing::error!(backend = %name, error = %e, "Failed to release ws connection slot");
    }
}

impl Drop for WsConnPermit {
    fn drop(&mut self) {
        let Some((limiter, name)) = self.slot.take() else {
            return;
        };
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(release_slot(limiter, name));
            }
            Err(_) => {
                tracing::warn!(backend = %name, "ws connection slot leaked outside runtime; flush reconciles it");
            }
        }
    }
}

impl fmt::Debug for WsConnPermit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WsConnPermit")
            .field("backend", &self.backend())
            .finish()
    }
}
