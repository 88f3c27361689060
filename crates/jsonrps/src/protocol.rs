//! JSON-RPC 2.0 message types carried one per line on a session.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Protocol version written into every message.
pub const JSONRPC_VERSION: &str = "2.0";

/// Request identifier: a string or a number.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RequestId {
    /// Numeric identifier.
    Number(serde_json::Number),
    /// String identifier.
    String(String),
}

impl From<i64> for RequestId {
    fn from(value: i64) -> Self {
        Self::Number(value.into())
    }
}

impl From<u64> for RequestId {
    fn from(value: u64) -> Self {
        Self::Number(value.into())
    }
}

impl From<String> for RequestId {
    fn from(value: String) -> Self {
        Self::String(value)
    }
}

impl From<&str> for RequestId {
    fn from(value: &str) -> Self {
        Self::String(value.to_owned())
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Number(number) => write!(formatter, "{number}"),
            Self::String(string) => write!(formatter, "{string:?}"),
        }
    }
}

/// JSON-RPC request or notification.
///
/// A request without an `id` is a notification and expects no response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcRequest {
    /// Protocol version, `"2.0"`.
    pub jsonrpc: String,
    /// Name of the method to invoke.
    pub method: String,
    /// Parameters, passed to the method uninterpreted.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
    /// Correlation identifier; absent for notifications.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<RequestId>,
}

impl JsonRpcRequest {
    /// Builds a request expecting a response.
    pub fn new(method: impl Into<String>, params: Option<Value>, id: impl Into<RequestId>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_owned(),
            method: method.into(),
            params,
            id: Some(id.into()),
        }
    }

    /// Builds a notification.
    pub fn notification(method: impl Into<String>, params: Option<Value>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_owned(),
            method: method.into(),
            params,
            id: None,
        }
    }

    /// Returns true when the request carries no identifier.
    #[must_use]
    pub const fn is_notification(&self) -> bool {
        self.id.is_none()
    }
}

/// Error object embedded in a response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Error)]
#[error("JSON-RPC error {code}: {message}")]
pub struct JsonRpcError {
    /// Numeric error code.
    pub code: i64,
    /// Human-readable description.
    pub message: String,
    /// Additional data.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl JsonRpcError {
    /// The method does not exist.
    pub const METHOD_NOT_FOUND: i64 = -32_601;
    /// Invalid method parameters.
    pub const INVALID_PARAMS: i64 = -32_602;

    /// Builds an error without additional data.
    pub fn new(code: i64, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            data: None,
        }
    }
}

/// JSON-RPC response, or a server-pushed notification.
///
/// Responses carry the request `id` and exactly one of `result` or `error`.
/// Push notifications leave `id` empty and use `method` and `params`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcResponse {
    /// Protocol version, `"2.0"`.
    pub jsonrpc: String,
    /// Identifier echoed from the request.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<RequestId>,
    /// Successful result.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    /// Failure description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcError>,
    /// Method name for push notifications.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,
    /// Parameters for push notifications.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl JsonRpcResponse {
    /// Builds a successful response.
    #[must_use]
    pub fn success(id: Option<RequestId>, result: Value) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_owned(),
            id,
            result: Some(result),
            error: None,
            method: None,
            params: None,
        }
    }

    /// Builds an error response.
    #[must_use]
    pub fn failure(id: Option<RequestId>, error: JsonRpcError) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_owned(),
            id,
            result: None,
            error: Some(error),
            method: None,
            params: None,
        }
    }

    /// Builds a push notification.
    pub fn push(method: impl Into<String>, params: Option<Value>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_owned(),
            id: None,
            result: None,
            error: None,
            method: Some(method.into()),
            params,
        }
    }

    /// Returns true for server-pushed notifications.
    #[must_use]
    pub const fn is_push(&self) -> bool {
        self.id.is_none() && self.method.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn request_round_trips_through_a_line() {
        let request = JsonRpcRequest::new("subtract", Some(json!([42, 23])), "1");
        let line = serde_json::to_string(&request).expect("encode");
        assert!(!line.contains('\n'));

        let decoded: JsonRpcRequest = serde_json::from_str(&line).expect("decode");
        assert_eq!(decoded, request);
    }

    #[test]
    fn notification_omits_id() {
        let request = JsonRpcRequest::notification("update", Some(json!([1, 2])));
        let value = serde_json::to_value(&request).expect("encode");
        assert_eq!(
            value,
            json!({"jsonrpc": "2.0", "method": "update", "params": [1, 2]})
        );
        assert!(request.is_notification());
    }

    #[test]
    fn numeric_and_string_ids_decode() {
        let numeric: JsonRpcRequest =
            serde_json::from_str(r#"{"jsonrpc":"2.0","method":"m","id":7}"#).expect("numeric");
        assert_eq!(numeric.id, Some(RequestId::from(7_i64)));

        let string: JsonRpcRequest =
            serde_json::from_str(r#"{"jsonrpc":"2.0","method":"m","id":"abc"}"#).expect("string");
        assert_eq!(string.id, Some(RequestId::from("abc")));
        assert_eq!(string.params, None);
    }

    #[test]
    fn error_response_serialises_without_result() {
        let response = JsonRpcResponse::failure(
            Some(RequestId::from(1_i64)),
            JsonRpcError::new(JsonRpcError::METHOD_NOT_FOUND, "Method not found"),
        );
        let value = serde_json::to_value(&response).expect("encode");
        assert_eq!(
            value,
            json!({
                "jsonrpc": "2.0",
                "id": 1,
                "error": {"code": -32601, "message": "Method not found"}
            })
        );
    }

    #[test]
    fn push_notification_has_method_and_no_id() {
        let response = JsonRpcResponse::push("subscription", Some(json!({"topic": "news"})));
        let line = serde_json::to_string(&response).expect("encode");
        let decoded: JsonRpcResponse = serde_json::from_str(&line).expect("decode");
        assert!(decoded.is_push());
        assert_eq!(decoded.method.as_deref(), Some("subscription"));
    }

    #[test]
    fn malformed_request_is_rejected() {
        let result = serde_json::from_str::<JsonRpcRequest>(r#"{"jsonrpc":"2.0"}"#);
        assert!(result.is_err());
    }
}
