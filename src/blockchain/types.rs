//! Sync client errors.

use thiserror::Error;

use crate::cache::LvcError;

/// Errors raised while polling the sync node.
#[derive(Debug, Error)]
pub enum SyncError {
    /// Invalid sync node URL.
    #[error("invalid sync node URL '{url}': {reason}")]
    InvalidUrl { url: String, reason: String },

    /// RPC connection or request failed.
    #[error("RPC error: {0}")]
    Rpc(String),

    /// RPC request timed out.
    #[error("RPC timeout after {0:?}")]
    Timeout(std::time::Duration),
}

impl From<SyncError> for LvcError {
    fn from(e: SyncError) -> Self {
        LvcError::Update(e.to_string())
    }
}

/// Result type for sync node calls.
pub type SyncResult<T> = Result<T, SyncError>;
