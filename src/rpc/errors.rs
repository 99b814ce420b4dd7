//! Client-facing JSON-RPC errors.
//!
//! Messages are resolved once into an `ErrorCatalog` when the gateway starts
//! and never change afterwards, so raising an error is a reference-count bump
//! rather than a string allocation.

use std::sync::Arc;

use axum::http::StatusCode;
use serde_json::Value;

use crate::config::ProxyConfig;
use crate::rpc::types::{RpcErrorObject, RpcResponse};

/// Every error the gateway itself can return to a client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RpcErrorKind {
    Parse,
    InvalidRequest,
    MethodNotWhitelisted,
    NoBackends,
    BackendOffline,
    OverCapacity,
    BadResponse,
    TooManyBatchRequests,
    GatewayTimeout,
    OverRateLimit,
    ResponseTooLarge,
    RequestBodyTooLarge,
    Unauthorized,
    Internal,
}

impl RpcErrorKind {
    pub const ALL: [RpcErrorKind; 14] = [
        RpcErrorKind::Parse,
        RpcErrorKind::InvalidRequest,
        RpcErrorKind::MethodNotWhitelisted,
        RpcErrorKind::NoBackends,
        RpcErrorKind::BackendOffline,
        RpcErrorKind::OverCapacity,
        RpcErrorKind::BadResponse,
        RpcErrorKind::TooManyBatchRequests,
        RpcErrorKind::GatewayTimeout,
        RpcErrorKind::OverRateLimit,
        RpcErrorKind::ResponseTooLarge,
        RpcErrorKind::RequestBodyTooLarge,
        RpcErrorKind::Unauthorized,
        RpcErrorKind::Internal,
    ];

    pub fn code(self) -> i64 {
        match self {
            RpcErrorKind::Parse => -32700,
            RpcErrorKind::InvalidRequest => -32600,
            RpcErrorKind::MethodNotWhitelisted => -32001,
            RpcErrorKind::NoBackends | RpcErrorKind::BackendOffline => -32011,
            RpcErrorKind::OverCapacity => -32012,
            RpcErrorKind::BadResponse => -32013,
            RpcErrorKind::TooManyBatchRequests => -32014,
            RpcErrorKind::GatewayTimeout => -32015,
            RpcErrorKind::OverRateLimit => -32016,
            RpcErrorKind::ResponseTooLarge => -32020,
            RpcErrorKind::RequestBodyTooLarge => -32021,
            RpcErrorKind::Unauthorized => -32005,
            RpcErrorKind::Internal => -32603,
        }
    }

    pub fn default_message(self) -> &'static str {
        match self {
            RpcErrorKind::Parse => "parse error",
            RpcErrorKind::InvalidRequest => "invalid request",
            RpcErrorKind::MethodNotWhitelisted => "rpc method is not whitelisted",
            RpcErrorKind::NoBackends => "no backends available for method",
            RpcErrorKind::BackendOffline => "backend offline",
            RpcErrorKind::OverCapacity => "backend is over capacity",
            RpcErrorKind::BadResponse => "backend returned an invalid response",
            RpcErrorKind::TooManyBatchRequests => "too many RPC calls in batch request",
            RpcErrorKind::GatewayTimeout => "gateway timeout",
            RpcErrorKind::OverRateLimit => "over rate limit",
            RpcErrorKind::ResponseTooLarge => "backend response too large",
            RpcErrorKind::RequestBodyTooLarge => "request body too large",
            RpcErrorKind::Unauthorized => "unauthorized",
            RpcErrorKind::Internal => "internal error",
        }
    }

    /// Status used when this error is the whole HTTP response.
    pub fn http_status(self) -> StatusCode {
        match self {
            RpcErrorKind::Parse | RpcErrorKind::InvalidRequest => StatusCode::BAD_REQUEST,
            RpcErrorKind::OverRateLimit => StatusCode::TOO_MANY_REQUESTS,
            RpcErrorKind::RequestBodyTooLarge => StatusCode::PAYLOAD_TOO_LARGE,
            RpcErrorKind::Unauthorized => StatusCode::UNAUTHORIZED,
            RpcErrorKind::NoBackends | RpcErrorKind::BackendOffline => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            RpcErrorKind::GatewayTimeout => StatusCode::GATEWAY_TIMEOUT,
            _ => StatusCode::OK,
        }
    }

    fn index(self) -> usize {
        self as usize
    }
}

/// Immutable table of error messages.
#[derive(Debug, Clone)]
pub struct ErrorCatalog {
    messages: [Arc<str>; RpcErrorKind::ALL.len()],
}

impl Default for ErrorCatalog {
    fn default() -> Self {
        Self {
            messages: RpcErrorKind::ALL.map(|kind| Arc::from(kind.default_message())),
        }
    }
}

impl ErrorCatalog {
    /// Defaults with the message overrides from configuration applied.
    pub fn from_config(config: &ProxyConfig) -> Self {
        let overrides = [
            (RpcErrorKind::OverRateLimit, &config.rate_limit.error_message),
            (
                RpcErrorKind::MethodNotWhitelisted,
                &config.whitelist_error_message,
            ),
            (RpcErrorKind::TooManyBatchRequests, &config.batch.error_message),
        ];

        overrides
            .into_iter()
            .fold(Self::default(), |catalog, (kind, message)| match message {
                Some(m) if !m.is_empty() => catalog.with_message(kind, m),
                _ => catalog,
            })
    }

    /// Replace one message. Only usable before the catalog is shared.
    pub fn with_message(mut self, kind: RpcErrorKind, message: &str) -> Self {
        self.messages[kind.index()] = Arc::from(message);
        self
    }

    pub fn message(&self, kind: RpcErrorKind) -> &str {
        &self.messages[kind.index()]
    }

    pub fn error(&self, kind: RpcErrorKind) -> RpcErrorObject {
        RpcErrorObject {
            code: kind.code(),
            message: Arc::clone(&self.messages[kind.index()]),
            data: None,
        }
    }

    pub fn response(&self, kind: RpcErrorKind, id: Value) -> RpcResponse {
        RpcResponse::error(id, self.error(kind))
    }
}
