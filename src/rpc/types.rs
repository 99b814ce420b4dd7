//! JSON-RPC 2.0 request and response types.

use std::sync::Arc;

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

pub const JSONRPC_VERSION: &str = "2.0";

/// A single JSON-RPC call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcRequest {
    #[serde(default)]
    pub jsonrpc: String,

    #[serde(default)]
    pub method: String,

    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub params: Value,

    #[serde(default)]
    pub id: Value,
}

impl RpcRequest {
    pub fn new(method: impl Into<String>, params: Value, id: Value) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            method: method.into(),
            params,
            id,
        }
    }

    /// Version tag and method present.
    pub fn is_valid(&self) -> bool {
        self.jsonrpc == JSONRPC_VERSION && !self.method.is_empty()
    }
}

/// Error member of a JSON-RPC response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcErrorObject {
    pub code: i64,
    pub message: Arc<str>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

/// A single JSON-RPC response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcResponse {
    #[serde(default)]
    pub jsonrpc: String,

    /// `Some(Value::Null)` for an explicit `"result": null`.
    #[serde(default, deserialize_with = "present", skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<RpcErrorObject>,

    #[serde(default)]
    pub id: Value,
}

fn present<'de, D>(deserializer: D) -> Result<Option<Value>, D::Error>
where
    D: Deserializer<'de>,
{
    Value::deserialize(deserializer).map(Some)
}

impl RpcResponse {
    pub fn result(id: Value, result: Value) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            result: Some(result),
            error: None,
            id,
        }
    }

    pub fn error(id: Value, error: RpcErrorObject) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            result: None,
            error: Some(error),
            id,
        }
    }

    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }
}

/// Body shape sent by a client.
#[derive(Debug, Clone)]
pub enum RpcPayload {
    Single(Value),
    Batch(Vec<Value>),
}

impl RpcPayload {
    /// Split a body into single or batch form.
    pub fn parse(body: &[u8]) -> Result<Self, serde_json::Error> {
        match serde_json::from_slice::<Value>(body)? {
            Value::Array(items) => Ok(RpcPayload::Batch(items)),
            other => Ok(RpcPayload::Single(other)),
        }
    }
}

/// Id of a request-shaped value, or null.
pub fn id_of(value: &Value) -> Value {
    value.get("id").cloned().unwrap_or(Value::Null)
}

/// Hex quantity encoding used by `eth_blockNumber` and `eth_gasPrice`.
pub fn to_quantity(value: u64) -> Value {
    Value::String(format!("0x{:x}", value))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_null_result_is_preserved() {
        let res: RpcResponse =
            serde_json::from_value(json!({"jsonrpc": "2.0", "result": null, "id": 1})).unwrap();
        assert_eq!(res.result, Some(Value::Null));
        let out = serde_json::to_value(&res).unwrap();
        assert_eq!(out, json!({"jsonrpc": "2.0", "result": null, "id": 1}));
    }

    #[test]
    fn test_error_response_omits_result() {
        let res = RpcResponse::error(
            json!(7),
            RpcErrorObject {
                code: -32016,
                message: "over rate limit".into(),
                data: None,
            },
        );
        let out = serde_json::to_value(&res).unwrap();
        assert!(out.get("result").is_none());
        assert_eq!(out["error"]["code"], -32016);
    }

    #[test]
    fn test_payload_shapes() {
        assert!(matches!(
            RpcPayload::parse(br#"{"jsonrpc":"2.0","method":"eth_call","id":1}"#).unwrap(),
            RpcPayload::Single(_)
        ));
        match RpcPayload::parse(br#"[{"id":1},{"id":2}]"#).unwrap() {
            RpcPayload::Batch(items) => assert_eq!(items.len(), 2),
            RpcPayload::Single(_) => panic!("expected batch"),
        }
        assert!(RpcPayload::parse(b"{not json").is_err());
    }

    #[test]
    fn test_request_validity() {
        assert!(RpcRequest::new("eth_call", Value::Null, json!(1)).is_valid());
        let req: RpcRequest = serde_json::from_value(json!({"method": "eth_call"})).unwrap();
        assert!(!req.is_valid());
    }

    #[test]
    fn test_quantity() {
        assert_eq!(to_quantity(255), json!("0xff"));
    }
}
