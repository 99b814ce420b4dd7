//! Last-value caches for volatile chain facts.
//!
//! # Responsibilities
//! - Poll the sync node on a fixed tick through a caller-supplied updater
//! - Serve the latest value without a network call
//! - Publish every refreshed value to the shared backing store
//!
//! # Design Decisions
//! - The refresh loop is the only writer; readers load an `ArcSwapOption`
//!   snapshot and never wait on a refresh
//! - A failed refresh keeps the last known value
//! - `stop` waits for the loop to exit, so no refresh runs after it returns

use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, SystemTime};

use arc_swap::ArcSwapOption;
use bytes::Bytes;
use futures_util::future::BoxFuture;
use thiserror::Error;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::cache::Cache;
use crate::observability::metrics;

pub const BLOCK_NUMBER_KEY: &str = "lvc:block_number";
pub const GAS_PRICE_KEY: &str = "lvc:gas_price";

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum LvcError {
    #[error("value unavailable for {0}")]
    Unavailable(String),

    #[error("malformed value for {key}: {value:?}")]
    Malformed { key: String, value: String },

    #[error("update failed: {0}")]
    Update(String),
}

/// Fetches a fresh value, rendered as a base-10 string.
pub type UpdateFn = Arc<dyn Fn() -> BoxFuture<'static, Result<String, LvcError>> + Send + Sync>;

#[derive(Debug)]
struct Snapshot {
    value: String,
    refreshed_at: SystemTime,
}

struct RefreshTask {
    cancel: oneshot::Sender<()>,
    handle: JoinHandle<()>,
}

pub struct LastValueCache {
    key: String,
    interval: Duration,
    updater: UpdateFn,
    cache: Arc<dyn Cache>,
    snapshot: Arc<ArcSwapOption<Snapshot>>,
    task: Mutex<Option<RefreshTask>>,
}

impl std::fmt::Debug for LastValueCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LastValueCache")
            .field("key", &self.key)
            .field("interval", &self.interval)
            .field("running", &self.is_running())
            .finish_non_exhaustive()
    }
}

impl LastValueCache {
    pub fn new(
        key: impl Into<String>,
        interval: Duration,
        cache: Arc<dyn Cache>,
        updater: UpdateFn,
    ) -> Self {
        Self {
            key: key.into(),
            interval,
            updater,
            cache,
            snapshot: Arc::new(ArcSwapOption::empty()),
            task: Mutex::new(None),
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn is_running(&self) -> bool {
        self.task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    /// Launch the refresh loop. The first refresh runs immediately.
    /// Calling this while a loop is running does nothing.
    pub fn start(&self) {
        let mut task = self.task.lock().unwrap_or_else(PoisonError::into_inner);
        if task.is_some() {
            return;
        }

        let (cancel, mut cancelled) = oneshot::channel();
        let key = self.key.clone();
        let interval = self.interval;
        let updater = self.updater.clone();
        let cache = self.cache.clone();
        let snapshot = self.snapshot.clone();

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    biased;
                    _ = &mut cancelled => break,
                    _ = ticker.tick() => refresh(&key, &updater, cache.as_ref(), &snapshot).await,
                }
            }
            tracing::debug!(key = %key, "LVC refresh loop stopped");
        });

        *task = Some(RefreshTask { cancel, handle });
    }

    /// Stop the refresh loop and wait for it to exit. Safe to call repeatedly.
    pub async fn stop(&self) {
        let task = self
            .task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        let Some(task) = task else {
            return;
        };

        let _ = task.cancel.send(());
        if let Err(e) = task.handle.await {
            if !e.is_cancelled() {
                tracing::error!(key = %self.key, error = %e, "LVC refresh loop panicked");
            }
        }
    }

    /// Latest value. Falls back to the backing store before the first refresh.
    pub async fn read(&self) -> Result<String, LvcError> {
        if let Some(snapshot) = self.snapshot.load_full() {
            return Ok(snapshot.value.clone());
        }

        let stored = self.cache.get(&self.key).await.map_err(|e| {
            tracing::debug!(key = %self.key, error = %e, "LVC backing store read failed");
            LvcError::Unavailable(self.key.clone())
        })?;

        match stored {
            Some(raw) if !raw.is_empty() => String::from_utf8(raw.to_vec()).map_err(|_| {
                LvcError::Malformed {
                    key: self.key.clone(),
                    value: String::from_utf8_lossy(&raw).into_owned(),
                }
            }),
            _ => Err(LvcError::Unavailable(self.key.clone())),
        }
    }

    /// Latest value parsed as an unsigned integer.
    pub async fn read_u64(&self) -> Result<u64, LvcError> {
        let value = self.read().await?;
        if value.is_empty() {
            return Err(LvcError::Unavailable(self.key.clone()));
        }
        value.trim().parse().map_err(|_| LvcError::Malformed {
            key: self.key.clone(),
            value,
        })
    }

    /// When the local snapshot was last refreshed.
    pub fn refreshed_at(&self) -> Option<SystemTime> {
        self.snapshot.load().as_ref().map(|s| s.refreshed_at)
    }
}

impl Drop for LastValueCache {
    fn drop(&mut self) {
        let task = self
            .task
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(task) = task {
            task.handle.abort();
        }
    }
}

async fn refresh(
    key: &str,
    updater: &UpdateFn,
    cache: &dyn Cache,
    snapshot: &ArcSwapOption<Snapshot>,
) {
    let value = match updater().await {
        Ok(value) => value,
        Err(e) => {
            tracing::warn!(key = %key, error = %e, "LVC refresh failed");
            metrics::record_lvc_refresh(key, false, None);
            return;
        }
    };

    if let Err(e) = cache.put(key, Bytes::from(value.clone())).await {
        tracing::warn!(key = %key, error = %e, "Failed to publish LVC value");
    }

    metrics::record_lvc_refresh(key, true, value.parse::<f64>().ok());
    snapshot.store(Some(Arc::new(Snapshot {
        value,
        refreshed_at: SystemTime::now(),
    })));
}
