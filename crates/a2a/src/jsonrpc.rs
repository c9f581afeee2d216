//! JSON-RPC 2.0 envelope types.
//!
//! `id` is any JSON value (number or string); a missing `id` makes the
//! request a notification. Streaming methods reuse the request `id` on every
//! response line.

use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const JSONRPC_VERSION: &str = "2.0";

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Request
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JsonRpcRequest {
    pub jsonrpc: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<Value>,
    pub method: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl JsonRpcRequest {
    pub fn new(id: impl Into<Value>, method: impl Into<String>, params: Option<Value>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.into(),
            id: Some(id.into()),
            method: method.into(),
            params,
        }
    }

    /// Notifications carry no `id` and expect no response.
    pub fn is_notification(&self) -> bool {
        self.id.is_none()
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Response
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JsonRpcResponse {
    pub jsonrpc: String,
    pub id: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcErrorObject>,
}

impl JsonRpcResponse {
    pub fn success(id: Value, result: Value) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.into(),
            id,
            result: Some(result),
            error: None,
        }
    }

    pub fn error(id: Value, error: JsonRpcErrorObject) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.into(),
            id,
            result: None,
            error: Some(error),
        }
    }

    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }

    pub fn into_result(self) -> Result<Value, JsonRpcErrorObject> {
        match self.error {
            Some(err) => Err(err),
            None => Ok(self.result.unwrap_or(Value::Null)),
        }
    }
}

/// A JSON-RPC 2.0 error object.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JsonRpcErrorObject {
    pub code: i64,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl std::fmt::Display for JsonRpcErrorObject {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "JSON-RPC error {}: {}", self.code, self.message)
    }
}

impl std::error::Error for JsonRpcErrorObject {}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn request_roundtrip_with_numeric_id() {
        let req = JsonRpcRequest::new(7, "message/send", Some(json!({"x": 1})));
        let raw = serde_json::to_string(&req).unwrap();
        assert!(raw.contains("\"jsonrpc\":\"2.0\""));
        let parsed: JsonRpcRequest = serde_json::from_str(&raw).unwrap();
        assert_eq!(req, parsed);
        assert!(!parsed.is_notification());
    }

    #[test]
    fn string_ids_are_preserved() {
        let raw = r#"{"jsonrpc":"2.0","id":"req-1","method":"tasks/get"}"#;
        let parsed: JsonRpcRequest = serde_json::from_str(raw).unwrap();
        assert_eq!(parsed.id, Some(json!("req-1")));
    }

    #[test]
    fn missing_id_is_a_notification() {
        let raw = r#"{"jsonrpc":"2.0","method":"tasks/get"}"#;
        let parsed: JsonRpcRequest = serde_json::from_str(raw).unwrap();
        assert!(parsed.is_notification());
    }

    #[test]
    fn error_response_roundtrip() {
        let resp = JsonRpcResponse::error(
            json!(3),
            JsonRpcErrorObject {
                code: -32600,
                message: "Request payload validation error".into(),
                data: Some(json!("jsonrpc must be '2.0'")),
            },
        );
        let raw = serde_json::to_string(&resp).unwrap();
        let parsed: JsonRpcResponse = serde_json::from_str(&raw).unwrap();
        assert!(parsed.is_error());
        let err = parsed.into_result().unwrap_err();
        assert_eq!(err.code, -32600);
    }

    #[test]
    fn success_into_result() {
        let resp = JsonRpcResponse::success(json!(1), json!({"ok": true}));
        assert_eq!(resp.into_result().unwrap(), json!({"ok": true}));
    }
}
