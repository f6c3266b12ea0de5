//! JSON-RPC framing for the app-server protocol.
//!
//! The app-server follows the JSON-RPC 2.0 message shapes but never sends or
//! expects the `"jsonrpc": "2.0"` field. Each frame is a single JSON value;
//! [`decode`] classifies it and [`encode`] produces the wire text.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Error, Result};

/// Standard JSON-RPC "method not found" code.
pub const METHOD_NOT_FOUND: i64 = -32601;

/// A JSON-RPC request/response identifier.
///
/// The client only issues integer ids, but the server may use strings for
/// its own requests.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RequestId {
    String(String),
    Integer(i64),
}

impl std::fmt::Display for RequestId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RequestId::String(s) => write!(f, "{}", s),
            RequestId::Integer(i) => write!(f, "{}", i),
        }
    }
}

/// A JSON-RPC request (client-to-server or server-to-client).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcRequest {
    pub id: RequestId,
    pub method: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

/// A JSON-RPC notification (no response expected).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcNotification {
    pub method: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

/// A JSON-RPC success response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcResponse {
    pub id: RequestId,
    pub result: Value,
}

/// The error payload within a JSON-RPC error response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcErrorData {
    pub code: i64,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl From<JsonRpcErrorData> for Error {
    fn from(err: JsonRpcErrorData) -> Self {
        Error::Protocol {
            code: Some(err.code),
            message: err.message,
            data: err.data,
        }
    }
}

/// A JSON-RPC error response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcError {
    pub error: JsonRpcErrorData,
    pub id: RequestId,
}

/// Any JSON-RPC message on the wire.
///
/// Deserialized via untagged serde. Variant order matters:
/// - Request has both `id` and `method`
/// - Response has `id` and `result`
/// - Error has `id` and `error`
/// - Notification has only `method` (no `id`)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum JsonRpcMessage {
    Request(JsonRpcRequest),
    Response(JsonRpcResponse),
    Error(JsonRpcError),
    Notification(JsonRpcNotification),
}

impl JsonRpcMessage {
    /// Short label for logs.
    pub fn kind(&self) -> &'static str {
        match self {
            JsonRpcMessage::Request(_) => "request",
            JsonRpcMessage::Response(_) => "response",
            JsonRpcMessage::Error(_) => "error",
            JsonRpcMessage::Notification(_) => "notification",
        }
    }
}

/// Decode one inbound frame.
///
/// A frame that is not JSON, or is JSON without a recognizable message
/// shape, is a [`Error::Protocol`] for that frame only.
pub fn decode(frame: &str) -> Result<JsonRpcMessage> {
    let value: Value = serde_json::from_str(frame).map_err(|e| Error::Protocol {
        code: None,
        message: format!("invalid JSON frame: {}", e),
        data: Some(Value::String(frame.to_string())),
    })?;

    serde_json::from_value(value.clone()).map_err(|_| Error::Protocol {
        code: None,
        message: "frame is not a request, response or notification".to_string(),
        data: Some(value),
    })
}

/// Encode an outbound message as a single-line JSON frame (no trailing newline).
pub fn encode<T: Serialize>(message: &T) -> Result<String> {
    Ok(serde_json::to_string(message)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_id_string() {
        let id: RequestId = serde_json::from_str(r#""req_1""#).unwrap();
        assert_eq!(id, RequestId::String("req_1".to_string()));
        assert_eq!(id.to_string(), "req_1");
    }

    #[test]
    fn test_request_id_integer() {
        let id: RequestId = serde_json::from_str("42").unwrap();
        assert_eq!(id, RequestId::Integer(42));
        assert_eq!(id.to_string(), "42");
    }

    #[test]
    fn test_request_no_params() {
        let json = r#"{"id":1,"method":"turn/interrupt"}"#;
        let req: JsonRpcRequest = serde_json::from_str(json).unwrap();
        assert!(req.params.is_none());

        let out = encode(&req).unwrap();
        assert!(!out.contains("params"));
    }

    #[test]
    fn test_decode_request() {
        let msg = decode(r#"{"id":"srv_1","method":"item/commandExecution/requestApproval","params":{}}"#).unwrap();
        assert!(matches!(msg, JsonRpcMessage::Request(ref r) if r.id == RequestId::String("srv_1".into())));
    }

    #[test]
    fn test_decode_response() {
        let msg = decode(r#"{"id":1,"result":{"thread":{"id":"th_1"}}}"#).unwrap();
        assert!(matches!(msg, JsonRpcMessage::Response(ref r) if r.id == RequestId::Integer(1)));
    }

    #[test]
    fn test_decode_null_result_is_response() {
        let msg = decode(r#"{"id":3,"result":null}"#).unwrap();
        assert!(matches!(msg, JsonRpcMessage::Response(_)));
    }

    #[test]
    fn test_decode_error() {
        let msg = decode(r#"{"id":1,"error":{"code":-32601,"message":"not found"}}"#).unwrap();
        match msg {
            JsonRpcMessage::Error(err) => {
                let err: Error = err.error.into();
                assert_eq!(err.code(), Some(METHOD_NOT_FOUND));
            }
            other => panic!("expected error, got {}", other.kind()),
        }
    }

    #[test]
    fn test_decode_notification() {
        let msg = decode(r#"{"method":"turn/started","params":{"threadId":"th_1"}}"#).unwrap();
        assert_eq!(msg.kind(), "notification");
    }

    #[test]
    fn test_decode_garbage_is_protocol_error() {
        let err = decode("not json at all").unwrap_err();
        assert!(matches!(err, Error::Protocol { code: None, .. }));
    }

    #[test]
    fn test_decode_unrecognized_shape() {
        // An id with neither result, error nor method.
        let err = decode(r#"{"id":7}"#).unwrap_err();
        assert!(matches!(err, Error::Protocol { data: Some(_), .. }));

        let err = decode(r#""hello""#).unwrap_err();
        assert!(matches!(err, Error::Protocol { .. }));
    }

    #[test]
    fn test_no_jsonrpc_field() {
        let req = JsonRpcRequest {
            id: RequestId::Integer(1),
            method: "test".to_string(),
            params: None,
        };
        let json = encode(&req).unwrap();
        assert!(!json.contains("jsonrpc"));
        assert!(!json.contains('\n'));
    }
}
