//! Handle to a running gateway instance.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::backend::{Backend, BackendGroup};
use crate::cache::LastValueCache;
use crate::http::Server;
use crate::lifecycle::Shutdown;
use crate::security::BackendRateLimiter;

/// Everything `start` built. Owns the LVCs; the server only borrows backends.
#[derive(Debug)]
pub struct Gateway {
    pub(crate) backends: BTreeMap<String, Arc<Backend>>,
    pub(crate) groups: BTreeMap<String, Arc<BackendGroup>>,
    pub(crate) server: Server,
    pub(crate) limiter: Arc<dyn BackendRateLimiter>,
    pub(crate) lvcs: Vec<Arc<LastValueCache>>,
    /// Stops the metrics exposition listener.
    pub(crate) metrics_shutdown: Shutdown,
    pub(crate) closed: AtomicBool,
}

impl Gateway {
    pub fn backend_groups(&self) -> &BTreeMap<String, Arc<BackendGroup>> {
        &self.groups
    }

    pub fn backends(&self) -> &BTreeMap<String, Arc<Backend>> {
        &self.backends
    }

    pub fn server(&self) -> &Server {
        &self.server
    }

    /// The limiter shared by every backend.
    pub fn rate_limiter(&self) -> &Arc<dyn BackendRateLimiter> {
        &self.limiter
    }

    /// Last-value caches, empty when caching is off.
    pub fn last_value_caches(&self) -> &[Arc<LastValueCache>] {
        &self.lvcs
    }

    /// Tear down in order: LVC loops, server, WebSocket counters, metrics.
    ///
    /// Every step runs regardless of the previous one; failures are logged.
    /// Calls after the first return immediately.
    pub async fn shutdown(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            tracing::debug!("Gateway already shut down");
            return;
        }
        tracing::info!("Shutting down gateway");

        for lvc in &self.lvcs {
            lvc.stop().await;
        }

        self.server.shutdown().await;

        let names: Vec<String> = self.backends.keys().cloned().collect();
        if let Err(e) = self.limiter.flush_backend_ws_conns(&names).await {
            tracing::error!(error = %e, "Error flushing backend ws conns");
        }

        self.metrics_shutdown.trigger();
        tracing::info!("Gateway shutdown complete");
    }
}
