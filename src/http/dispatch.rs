//! JSON-RPC dispatch.
//!
//! # Responsibilities
//! - Parse single and batch bodies, enforce the batch size
//! - Map each method to its backend group
//! - Serve from the response cache when possible
//! - Forward the rest in upstream batches and populate the cache
//!
//! # Design Decisions
//! - Responses keep request order regardless of how calls were grouped
//! - A failed upstream chunk fails only the calls it carried

use std::collections::BTreeMap;
use std::sync::Arc;

use axum::http::StatusCode;
use bytes::Bytes;
use serde_json::Value;

use crate::backend::{BackendError, BackendGroup, ForwardContext};
use crate::cache::is_cacheable;
use crate::http::server::ServerInner;
use crate::observability::metrics;
use crate::rpc::types::{id_of, RpcPayload};
use crate::rpc::{RpcErrorKind, RpcRequest, RpcResponse};

/// What goes back to the client.
#[derive(Debug)]
pub(crate) enum Reply {
    Single(RpcResponse, StatusCode),
    Batch(Vec<RpcResponse>),
}

type Slot = Option<(RpcResponse, StatusCode)>;

pub(crate) struct Dispatcher<'a> {
    inner: &'a ServerInner,
    ctx: &'a ForwardContext,
}

impl<'a> Dispatcher<'a> {
    pub(crate) fn new(inner: &'a Arc<ServerInner>, ctx: &'a ForwardContext) -> Self {
        Self {
            inner: inner.as_ref(),
            ctx,
        }
    }

    fn error(&self, kind: RpcErrorKind, id: Value) -> (RpcResponse, StatusCode) {
        (self.inner.params.errors.response(kind, id), kind.http_status())
    }

    pub(crate) async fn handle(&self, body: &[u8]) -> Reply {
        let payload = match RpcPayload::parse(body) {
            Ok(payload) => payload,
            Err(_) => {
                let (res, status) = self.error(RpcErrorKind::Parse, Value::Null);
                return Reply::Single(res, status);
            }
        };

        match payload {
            RpcPayload::Single(value) => {
                let (res, status) = match parse_request(value) {
                    Ok(req) => self
                        .serve(vec![req], false)
                        .await
                        .pop()
                        .unwrap_or_else(|| self.error(RpcErrorKind::Internal, Value::Null)),
                    Err((kind, id)) => self.error(kind, id),
                };
                Reply::Single(res, status)
            }
            RpcPayload::Batch(items) if items.is_empty() => {
                let (res, status) = self.error(RpcErrorKind::InvalidRequest, Value::Null);
                Reply::Single(res, status)
            }
            RpcPayload::Batch(items) if items.len() > self.inner.params.max_batch_size => {
                let (res, status) = self.error(RpcErrorKind::TooManyBatchRequests, Value::Null);
                Reply::Single(res, status)
            }
            RpcPayload::Batch(items) => {
                let mut out: Vec<Slot> = Vec::with_capacity(items.len());
                let mut valid = Vec::new();
                let mut positions = Vec::new();
                for (i, item) in items.into_iter().enumerate() {
                    match parse_request(item) {
                        Ok(req) => {
                            valid.push(req);
                            positions.push(i);
                            out.push(None);
                        }
                        Err((kind, id)) => out.push(Some(self.error(kind, id))),
                    }
                }

                for (i, res) in positions.into_iter().zip(self.serve(valid, true).await) {
                    out[i] = Some(res);
                }

                Reply::Batch(out.into_iter().flatten().map(|(res, _)| res).collect())
            }
        }
    }

    /// Answer every request, in order.
    async fn serve(&self, reqs: Vec<RpcRequest>, as_batch: bool) -> Vec<(RpcResponse, StatusCode)> {
        let params = &self.inner.params;
        let mut out: Vec<Slot> = vec![None; reqs.len()];
        let mut pending: BTreeMap<&str, Vec<usize>> = BTreeMap::new();

        for (i, req) in reqs.iter().enumerate() {
            let Some(group) = params.rpc_method_mappings.get(&req.method) else {
                tracing::debug!(method = %req.method, "Method not whitelisted");
                out[i] = Some(self.error(RpcErrorKind::MethodNotWhitelisted, req.id.clone()));
                continue;
            };

            if let Some(cache) = &params.cache {
                match cache.get(req).await {
                    Ok(Some(hit)) => {
                        out[i] = Some((hit, StatusCode::OK));
                        continue;
                    }
                    Ok(None) => {}
                    Err(e) => {
                        tracing::warn!(method = %req.method, error = %e, "Cache lookup failed");
                    }
                }
            }

            pending.entry(group.as_str()).or_default().push(i);
        }

        for (group_name, indexes) in pending {
            let Some(group) = params.backend_groups.get(group_name) else {
                for &i in &indexes {
                    out[i] = Some(self.error(RpcErrorKind::NoBackends, reqs[i].id.clone()));
                }
                continue;
            };

            for chunk in indexes.chunks(params.max_upstream_batch_size.max(1)) {
                let calls: Vec<&RpcRequest> = chunk.iter().map(|&i| &reqs[i]).collect();
                match self.forward(group, &calls, as_batch).await {
                    Ok(responses) => {
                        for (&i, res) in chunk.iter().zip(responses) {
                            self.populate_cache(&reqs[i], &res).await;
                            out[i] = Some((res, StatusCode::OK));
                        }
                    }
                    Err(e) => {
                        let kind = e.rpc_kind();
                        tracing::warn!(
                            group = %group.name(),
                            request_id = ?self.ctx.request_id,
                            error = %e,
                            "Error forwarding request"
                        );
                        for &i in chunk {
                            out[i] = Some(self.error(kind, reqs[i].id.clone()));
                        }
                    }
                }
            }
        }

        reqs.iter()
            .zip(out)
            .map(|(req, slot)| {
                let (res, status) =
                    slot.unwrap_or_else(|| self.error(RpcErrorKind::Internal, req.id.clone()));
                metrics::record_rpc_request(&req.method, status.as_u16());
                (res, status)
            })
            .collect()
    }

    async fn forward(
        &self,
        group: &BackendGroup,
        calls: &[&RpcRequest],
        as_batch: bool,
    ) -> Result<Vec<RpcResponse>, BackendError> {
        let body = match (as_batch, calls) {
            (false, [single]) => serde_json::to_vec(single),
            _ => serde_json::to_vec(calls),
        }
        .map_err(|e| BackendError::BadResponse(e.to_string()))?;

        let raw = group.forward(Bytes::from(body), self.ctx).await?;

        if !as_batch {
            let res: RpcResponse = serde_json::from_slice(&raw)
                .map_err(|e| BackendError::BadResponse(e.to_string()))?;
            return Ok(vec![res]);
        }

        let mut responses: Vec<RpcResponse> = serde_json::from_slice(&raw)
            .map_err(|e| BackendError::BadResponse(e.to_string()))?;
        calls
            .iter()
            .map(|call| {
                responses
                    .iter()
                    .position(|res| res.id == call.id)
                    .map(|pos| responses.swap_remove(pos))
                    .ok_or_else(|| {
                        BackendError::BadResponse(format!("missing response for id {}", call.id))
                    })
            })
            .collect()
    }

    async fn populate_cache(&self, req: &RpcRequest, res: &RpcResponse) {
        let Some(cache) = &self.inner.params.cache else {
            return;
        };
        if res.is_error() || !is_cacheable(req) {
            return;
        }
        let block = match cache.latest_block().await {
            Ok(block) => block,
            Err(e) => {
                tracing::debug!(method = %req.method, error = %e, "Not caching, chain height unknown");
                return;
            }
        };
        if let Err(e) = cache.put(req, res, block).await {
            tracing::warn!(method = %req.method, error = %e, "Failed to populate cache");
        }
    }
}

/// Shape-check one request value.
fn parse_request(value: Value) -> Result<RpcRequest, (RpcErrorKind, Value)> {
    let id = id_of(&value);
    let req: RpcRequest =
        serde_json::from_value(value).map_err(|_| (RpcErrorKind::Parse, id.clone()))?;
    if !req.is_valid() {
        return Err((RpcErrorKind::InvalidRequest, id));
    }
    Ok(req)
}
