//! The wire-protocol error taxonomy, serializable into JSON-RPC error
//! objects. Variant detail strings travel in the error `data` field; the
//! `message` stays canonical per code.

use serde_json::Value;

use crate::jsonrpc::JsonRpcErrorObject;

#[derive(thiserror::Error, Debug)]
pub enum A2aError {
    #[error("invalid JSON payload: {0}")]
    Parse(String),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("method not found: {0}")]
    MethodNotFound(String),

    #[error("invalid params: {0}")]
    InvalidParams(String),

    #[error("internal error: {0}")]
    Internal(String),

    #[error("task not found: {0}")]
    TaskNotFound(String),

    #[error("task not cancelable: {0}")]
    TaskNotCancelable(String),

    #[error("push notifications not supported")]
    PushNotificationNotSupported,

    #[error("unsupported operation: {0}")]
    UnsupportedOperation(String),
}

impl A2aError {
    pub fn code(&self) -> i64 {
        match self {
            A2aError::Parse(_) => -32700,
            A2aError::InvalidRequest(_) => -32600,
            A2aError::MethodNotFound(_) => -32601,
            A2aError::InvalidParams(_) => -32602,
            A2aError::Internal(_) => -32603,
            A2aError::TaskNotFound(_) => -32001,
            A2aError::TaskNotCancelable(_) => -32002,
            A2aError::PushNotificationNotSupported => -32003,
            A2aError::UnsupportedOperation(_) => -32004,
        }
    }

    /// The canonical wire message for this code.
    fn canonical_message(&self) -> &'static str {
        match self {
            A2aError::Parse(_) => "Invalid JSON payload",
            A2aError::InvalidRequest(_) => "Request payload validation error",
            A2aError::MethodNotFound(_) => "Method not found",
            A2aError::InvalidParams(_) => "Invalid parameters",
            A2aError::Internal(_) => "Internal error",
            A2aError::TaskNotFound(_) => "Task not found",
            A2aError::TaskNotCancelable(_) => "Task cannot be canceled",
            A2aError::PushNotificationNotSupported => "Push Notification is not supported",
            A2aError::UnsupportedOperation(_) => "This operation is not supported",
        }
    }

    fn detail(&self) -> Option<Value> {
        let detail = match self {
            A2aError::PushNotificationNotSupported => return None,
            A2aError::Parse(d)
            | A2aError::InvalidRequest(d)
            | A2aError::MethodNotFound(d)
            | A2aError::InvalidParams(d)
            | A2aError::Internal(d)
            | A2aError::TaskNotFound(d)
            | A2aError::TaskNotCancelable(d)
            | A2aError::UnsupportedOperation(d) => d,
        };
        (!detail.is_empty()).then(|| Value::String(detail.clone()))
    }

    pub fn to_object(&self) -> JsonRpcErrorObject {
        JsonRpcErrorObject {
            code: self.code(),
            message: self.canonical_message().to_owned(),
            data: self.detail(),
        }
    }
}

impl From<serde_json::Error> for A2aError {
    fn from(err: serde_json::Error) -> Self {
        A2aError::Parse(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn codes_match_the_taxonomy() {
        assert_eq!(A2aError::Parse("x".into()).code(), -32700);
        assert_eq!(A2aError::InvalidRequest("x".into()).code(), -32600);
        assert_eq!(A2aError::MethodNotFound("x".into()).code(), -32601);
        assert_eq!(A2aError::InvalidParams("x".into()).code(), -32602);
        assert_eq!(A2aError::Internal("x".into()).code(), -32603);
        assert_eq!(A2aError::TaskNotFound("x".into()).code(), -32001);
        assert_eq!(A2aError::TaskNotCancelable("x".into()).code(), -32002);
        assert_eq!(A2aError::PushNotificationNotSupported.code(), -32003);
        assert_eq!(A2aError::UnsupportedOperation("x".into()).code(), -32004);
    }

    #[test]
    fn wrong_version_error_object_shape() {
        let obj = A2aError::InvalidRequest("jsonrpc must be '2.0'".into()).to_object();
        assert_eq!(obj.code, -32600);
        assert_eq!(obj.message, "Request payload validation error");
        assert_eq!(obj.data, Some(json!("jsonrpc must be '2.0'")));
    }

    #[test]
    fn task_not_found_message() {
        let obj = A2aError::TaskNotFound("T42".into()).to_object();
        assert_eq!(obj.message, "Task not found");
        assert_eq!(obj.data, Some(json!("T42")));
    }

    #[test]
    fn empty_detail_is_omitted() {
        let obj = A2aError::Internal(String::new()).to_object();
        assert!(obj.data.is_none());
    }
}
