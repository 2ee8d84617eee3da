//! JSON-RPC 2.0 wire types and correlation-id allocation.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// JSON-RPC request ID (string, number or null).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RpcId {
    Number(u64),
    String(String),
    Null,
}

impl std::fmt::Display for RpcId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Number(n) => write!(f, "{n}"),
            Self::String(s) => write!(f, "{s}"),
            Self::Null => write!(f, "null"),
        }
    }
}

/// A single JSON-RPC parameter value.
pub type RpcParam = Value;

/// A method call without a correlation id.
///
/// Callers describe *what* to ask; the batch client assigns ids when the call
/// is put on the wire.
#[derive(Debug, Clone, PartialEq)]
pub struct RpcCall {
    pub method: String,
    pub params: Vec<RpcParam>,
}

impl RpcCall {
    pub fn new(method: impl Into<String>, params: Vec<RpcParam>) -> Self {
        Self {
            method: method.into(),
            params,
        }
    }

    /// `eth_blockNumber`, no parameters.
    pub fn block_number() -> Self {
        Self::new("eth_blockNumber", vec![])
    }
}

/// Process-wide monotonically increasing correlation ids.
///
/// One allocator is shared by every batch issued through a client, so no two
/// requests in flight (to any provider) ever carry the same id.
#[derive(Debug)]
pub struct IdAllocator {
    next: AtomicU64,
}

impl IdAllocator {
    pub fn new() -> Self {
        Self {
            next: AtomicU64::new(1),
        }
    }

    /// Reserve `n` consecutive ids and return the first.
    pub fn reserve(&self, n: usize) -> u64 {
        self.next.fetch_add(n as u64, Ordering::Relaxed)
    }

    /// Turn calls into wire requests carrying freshly allocated ids.
    pub fn assign(&self, calls: &[RpcCall]) -> Vec<JsonRpcRequest> {
        let first = self.reserve(calls.len());
        calls
            .iter()
            .enumerate()
            .map(|(i, c)| JsonRpcRequest::new(first + i as u64, c.method.clone(), c.params.clone()))
            .collect()
    }
}

impl Default for IdAllocator {
    fn default() -> Self {
        Self::new()
    }
}

/// A JSON-RPC 2.0 request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcRequest {
    pub jsonrpc: String,
    pub method: String,
    pub params: Vec<RpcParam>,
    pub id: RpcId,
}

impl JsonRpcRequest {
    /// Create a new JSON-RPC 2.0 request.
    pub fn new(id: u64, method: impl Into<String>, params: Vec<RpcParam>) -> Self {
        Self {
            jsonrpc: "2.0".into(),
            method: method.into(),
            params,
            id: RpcId::Number(id),
        }
    }
}

/// A JSON-RPC 2.0 error object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcError {
    pub code: i64,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl std::fmt::Display for JsonRpcError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "JSON-RPC error {}: {}", self.code, self.message)
    }
}

/// A JSON-RPC 2.0 response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcResponse {
    pub jsonrpc: String,
    pub id: RpcId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcError>,
}

impl JsonRpcResponse {
    /// Build a successful response (mostly useful for mock transports).
    pub fn success(id: RpcId, result: Value) -> Self {
        Self {
            jsonrpc: "2.0".into(),
            id,
            result: Some(result),
            error: None,
        }
    }

    /// Build an error response.
    pub fn failure(id: RpcId, code: i64, message: impl Into<String>) -> Self {
        Self {
            jsonrpc: "2.0".into(),
            id,
            result: None,
            error: Some(JsonRpcError {
                code,
                message: message.into(),
                data: None,
            }),
        }
    }

    /// Returns `true` if the node did not report an error for this request.
    ///
    /// A missing `result` is a legitimate `null` (e.g. an unknown receipt).
    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }

    /// Borrow the result value, treating an absent result as `null`.
    pub fn result_or_null(&self) -> &Value {
        static NULL: Value = Value::Null;
        self.result.as_ref().unwrap_or(&NULL)
    }

    /// Unwrap the result value or return an error.
    pub fn into_result(self) -> Result<Value, JsonRpcError> {
        if let Some(err) = self.error {
            Err(err)
        } else {
            Ok(self.result.unwrap_or(Value::Null))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_serialization() {
        let req = JsonRpcRequest::new(1, "eth_blockNumber", vec![]);
        let json = serde_json::to_string(&req).unwrap();
        assert!(json.contains("\"jsonrpc\":\"2.0\""));
        assert!(json.contains("\"method\":\"eth_blockNumber\""));
    }

    #[test]
    fn allocator_ids_never_repeat() {
        let ids = IdAllocator::new();
        let calls = vec![RpcCall::block_number(), RpcCall::block_number()];
        let a = ids.assign(&calls);
        let b = ids.assign(&calls);
        let all: Vec<_> = a.iter().chain(b.iter()).map(|r| r.id.clone()).collect();
        assert_eq!(
            all,
            vec![RpcId::Number(1), RpcId::Number(2), RpcId::Number(3), RpcId::Number(4)]
        );
    }

    #[test]
    fn null_result_is_ok() {
        let resp: JsonRpcResponse =
            serde_json::from_str(r#"{"jsonrpc":"2.0","id":7,"result":null}"#).unwrap();
        assert!(resp.is_ok());
        assert_eq!(resp.result_or_null(), &Value::Null);
    }

    #[test]
    fn response_into_result_error() {
        let resp = JsonRpcResponse::failure(RpcId::Number(1), -32000, "execution reverted");
        assert!(!resp.is_ok());
        let err = resp.into_result().unwrap_err();
        assert_eq!(err.code, -32000);
    }
}
