//! JSON-RPC 2.0 wire types.
//!
//! The inbound envelope is deserialized straight into a typed struct with
//! optional fields. Only `params` and `result` stay as raw JSON, since the
//! bridge passes them through untouched.

use crate::error::BridgeError;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::fmt;

pub const JSONRPC_VERSION: &str = "2.0";

/// A caller-supplied request id.
///
/// Numbers stay numbers and strings stay strings when echoed back.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RequestId {
    Number(serde_json::Number),
    String(String),
}

impl RequestId {
    /// Key distinguishing `1` from `"1"`, used for in-flight bookkeeping.
    pub fn key(&self) -> String {
        match self {
            RequestId::Number(n) => n.to_string(),
            RequestId::String(s) => format!("{:?}", s),
        }
    }

    /// Salvage an id from an arbitrary JSON value.
    pub fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Number(n) => Some(RequestId::Number(n.clone())),
            Value::String(s) => Some(RequestId::String(s.clone())),
            _ => None,
        }
    }
}

impl From<i64> for RequestId {
    fn from(id: i64) -> Self {
        RequestId::Number(id.into())
    }
}

impl From<&str> for RequestId {
    fn from(id: &str) -> Self {
        RequestId::String(id.to_string())
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.key())
    }
}

/// One parsed line of input.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub jsonrpc: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<RequestId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

/// A call that obligates exactly one response.
#[derive(Debug, Clone, PartialEq)]
pub struct Request {
    pub id: RequestId,
    pub method: String,
    pub params: Option<Value>,
    /// Hint for the coalescer; never affects the response.
    pub batchable: bool,
}

impl Request {
    pub fn new(id: impl Into<RequestId>, method: impl Into<String>, params: Option<Value>) -> Self {
        Self {
            id: id.into(),
            method: method.into(),
            params,
            batchable: false,
        }
    }

    /// Body forwarded to the remote service.
    pub fn to_forward_body(&self) -> Value {
        forward_body(Some(&self.id), &self.method, self.params.as_ref())
    }
}

/// A call with no response obligation.
#[derive(Debug, Clone, PartialEq)]
pub struct Notification {
    pub method: String,
    pub params: Option<Value>,
}

impl Notification {
    pub fn new(method: impl Into<String>, params: Option<Value>) -> Self {
        Self {
            method: method.into(),
            params,
        }
    }

    pub fn to_forward_body(&self) -> Value {
        forward_body(None, &self.method, self.params.as_ref())
    }
}

fn forward_body(id: Option<&RequestId>, method: &str, params: Option<&Value>) -> Value {
    let mut body = Map::new();
    body.insert("jsonrpc".to_string(), json!(JSONRPC_VERSION));
    if let Some(id) = id {
        body.insert("id".to_string(), json!(id));
    }
    body.insert("method".to_string(), json!(method));
    if let Some(params) = params {
        body.insert("params".to_string(), params.clone());
    }
    Value::Object(body)
}

/// JSON-RPC 2.0 error object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcError {
    pub code: i32,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

/// JSON-RPC 2.0 response written to the local transport.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcResponse {
    pub jsonrpc: String,
    /// Serialized as `null` when the id could not be recovered.
    pub id: Option<RequestId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<RpcError>,
}

impl RpcResponse {
    /// Create a success response.
    pub fn success(id: Option<RequestId>, result: Value) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id,
            result: Some(result),
            error: None,
        }
    }

    /// Create an error response.
    pub fn error(id: Option<RequestId>, code: i32, message: impl Into<String>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id,
            result: None,
            error: Some(RpcError {
                code,
                message: message.into(),
                data: None,
            }),
        }
    }

    /// Map a bridge error onto a JSON-RPC error response.
    pub fn from_error(id: Option<RequestId>, err: &BridgeError) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id,
            result: None,
            error: Some(RpcError {
                code: err.to_rpc_error_code(),
                message: err.to_string(),
                data: err.rpc_error_data(),
            }),
        }
    }

    /// Build the response for a finished call.
    pub fn from_outcome(id: RequestId, outcome: Result<Value, BridgeError>) -> Self {
        match outcome {
            Ok(result) => Self::success(Some(id), result),
            Err(err) => Self::from_error(Some(id), &err),
        }
    }

    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_id_preserves_json_type() {
        let numeric: Envelope = serde_json::from_str(r#"{"id":7,"method":"x"}"#).unwrap();
        let text: Envelope = serde_json::from_str(r#"{"id":"7","method":"x"}"#).unwrap();

        assert_eq!(numeric.id, Some(RequestId::from(7)));
        assert_eq!(text.id, Some(RequestId::from("7")));
        assert_ne!(numeric.id.as_ref().unwrap().key(), text.id.as_ref().unwrap().key());

        let echoed = RpcResponse::success(numeric.id, json!({}));
        assert_eq!(
            serde_json::to_string(&echoed).unwrap(),
            r#"{"jsonrpc":"2.0","id":7,"result":{}}"#
        );
        let echoed = RpcResponse::success(text.id, json!({}));
        assert_eq!(
            serde_json::to_string(&echoed).unwrap(),
            r#"{"jsonrpc":"2.0","id":"7","result":{}}"#
        );
    }

    #[test]
    fn test_null_id_is_absent() {
        let envelope: Envelope =
            serde_json::from_str(r#"{"jsonrpc":"2.0","id":null,"method":"x"}"#).unwrap();
        assert!(envelope.id.is_none());
    }

    #[test]
    fn test_error_response_serialization() {
        let resp = RpcResponse::error(None, -32603, "Internal error");
        let json = serde_json::to_string(&resp).unwrap();

        assert!(!json.contains("\"result\""));
        assert!(json.contains("\"id\":null"));
        assert!(json.contains("-32603"));
    }

    #[test]
    fn test_from_error_passes_remote_code_and_data() {
        let err = BridgeError::Remote {
            code: -32002,
            message: "Resource not found".into(),
            data: Some(json!({"uri": "file:///x"})),
        };
        let resp = RpcResponse::from_error(Some(RequestId::from(3)), &err);
        let error = resp.error.unwrap();
        assert_eq!(error.code, -32002);
        assert_eq!(error.message, "Resource not found");
        assert_eq!(error.data, Some(json!({"uri": "file:///x"})));
    }

    #[test]
    fn test_forward_body_shape() {
        let request = Request::new(1, "tools/call", Some(json!({"name": "echo"})));
        assert_eq!(
            request.to_forward_body(),
            json!({"jsonrpc": "2.0", "id": 1, "method": "tools/call", "params": {"name": "echo"}})
        );

        let notification = Notification::new("notifications/progress", None);
        assert_eq!(
            notification.to_forward_body(),
            json!({"jsonrpc": "2.0", "method": "notifications/progress"})
        );
    }
}
