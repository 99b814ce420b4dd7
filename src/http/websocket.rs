//! WebSocket proxy handling.
//!
//! # Responsibilities
//! - Pick an online WS-group backend with a free connection slot
//! - Complete upgrade handshake with client
//! - Bidirectional frame forwarding
//! - Answer non-whitelisted client calls locally
//!
//! # Data Flow
//! ```text
//! Client ←──── WebSocket frames ────→ Proxy ←──── WebSocket frames ────→ Backend
//! ```
//!
//! # Design Decisions
//! - Upstream is dialed before the upgrade so failures are plain HTTP errors
//! - Frame-level forwarding (no message buffering)
//! - Either side closing ends the session and releases the slot once

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    extract::ws::{Message, WebSocket, WebSocketUpgrade},
    extract::{ConnectInfo, Path, State},
    http::HeaderMap,
    response::Response,
};
use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use tokio_tungstenite::tungstenite::Message as UpstreamMessage;

use crate::backend::{Backend, UpstreamWs};
use crate::http::server::{client_ip, forwarded_for, ServerInner};
use crate::rpc::{RpcErrorKind, RpcRequest};
use crate::security::WsConnPermit;

pub(crate) async fn ws_handler(
    State(inner): State<Arc<ServerInner>>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    ws: WebSocketUpgrade,
) -> Response {
    upgrade(inner, None, peer, headers, ws).await
}

pub(crate) async fn ws_handler_authed(
    State(inner): State<Arc<ServerInner>>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    Path(auth_key): Path<String>,
    headers: HeaderMap,
    ws: WebSocketUpgrade,
) -> Response {
    upgrade(inner, Some(auth_key), peer, headers, ws).await
}

async fn upgrade(
    inner: Arc<ServerInner>,
    auth_key: Option<String>,
    peer: SocketAddr,
    headers: HeaderMap,
    ws: WebSocketUpgrade,
) -> Response {
    if inner.authenticate(auth_key.as_deref()).is_err() {
        return inner.error_response(RpcErrorKind::Unauthorized);
    }
    let forwarded_for = forwarded_for(&headers, peer);
    if inner.over_rate_limit(client_ip(&forwarded_for), &headers) {
        tracing::debug!(client = %client_ip(&forwarded_for), "Client over rate limit, refusing WebSocket");
        return inner.error_response(RpcErrorKind::OverRateLimit);
    }
    let Some(group) = inner.params.ws_backend_group.clone() else {
        return inner.error_response(RpcErrorKind::NoBackends);
    };

    for backend in group.backends() {
        if !backend.is_online() {
            continue;
        }
        let permit = match backend.acquire_ws_permit().await {
            Ok(permit) => permit,
            Err(e) => {
                tracing::warn!(backend = %backend.name(), error = %e, "No WebSocket slot");
                continue;
            }
        };
        match backend.dial_ws().await {
            Ok(upstream) => {
                tracing::info!(backend = %backend.name(), client = %peer, "WebSocket session opened");
                let backend = backend.clone();
                let inner = inner.clone();
                return ws.on_upgrade(move |socket| proxy(inner, backend, socket, upstream, permit));
            }
            Err(e) => {
                tracing::warn!(backend = %backend.name(), error = %e, "Failed to dial upstream WebSocket");
                permit.release().await;
            }
        }
    }

    inner.error_response(RpcErrorKind::NoBackends)
}

/// Local reply for a client frame that must not reach the backend.
fn screen(inner: &ServerInner, text: &str) -> Option<String> {
    let (kind, id) = match serde_json::from_str::<RpcRequest>(text) {
        Err(_) => (RpcErrorKind::Parse, Value::Null),
        Ok(req) if !req.is_valid() => (RpcErrorKind::InvalidRequest, req.id),
        Ok(req) if !inner.params.ws_method_whitelist.contains(&req.method) => {
            (RpcErrorKind::MethodNotWhitelisted, req.id)
        }
        Ok(_) => return None,
    };
    Some(serde_json::to_string(&inner.params.errors.response(kind, id)).unwrap_or_default())
}

async fn proxy(
    inner: Arc<ServerInner>,
    backend: Arc<Backend>,
    client: WebSocket,
    upstream: UpstreamWs,
    permit: WsConnPermit,
) {
    let mut shutdown = inner.shutdown.subscribe();

    let (mut client_tx, mut client_rx) = client.split();
    let (mut upstream_tx, mut upstream_rx) = upstream.split();

    loop {
        tokio::select! {
            _ = shutdown.recv() => break,
            msg = client_rx.next() => {
                let Some(Ok(msg)) = msg else { break };
                let forwarded = match msg {
                    Message::Text(text) => match screen(&inner, text.as_str()) {
                        Some(reply) => {
                            if client_tx.send(Message::Text(reply.into())).await.is_err() {
                                break;
                            }
                            continue;
                        }
                        None => UpstreamMessage::text(text.as_str().to_owned()),
                    },
                    Message::Binary(data) => UpstreamMessage::Binary(data),
                    Message::Ping(data) => UpstreamMessage::Ping(data),
                    Message::Pong(data) => UpstreamMessage::Pong(data),
                    Message::Close(_) => break,
                };
                if let Err(e) = upstream_tx.send(forwarded).await {
                    tracing::debug!(backend = %backend.name(), error = %e, "Upstream write failed");
                    break;
                }
            }
            msg = upstream_rx.next() => {
                let Some(Ok(msg)) = msg else { break };
                let forwarded = match msg {
                    UpstreamMessage::Text(text) => Message::Text(text.as_str().to_owned().into()),
                    UpstreamMessage::Binary(data) => Message::Binary(data),
                    UpstreamMessage::Ping(data) => Message::Ping(data),
                    UpstreamMessage::Pong(data) => Message::Pong(data),
                    UpstreamMessage::Close(_) => break,
                    UpstreamMessage::Frame(_) => continue,
                };
                if client_tx.send(forwarded).await.is_err() {
                    break;
                }
            }
        }
    }

    let _ = client_tx.send(Message::Close(None)).await;
    let _ = upstream_tx.close().await;
    permit.release().await;
    tracing::info!(backend = %backend.name(), "WebSocket session closed");
}
