//! JSON-RPC 2.0 frame encoding and classification
//!
//! The codec stays oblivious to method semantics: responses carry their
//! `result` as an untouched `serde_json::Value` so the caller that issued the
//! request decodes it into the matching type.

use crate::error::{CodecError, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const PARSE_ERROR: i32 = -32700;
pub const INVALID_REQUEST: i32 = -32600;
pub const METHOD_NOT_FOUND: i32 = -32601;
pub const INVALID_PARAMS: i32 = -32602;
pub const INTERNAL_ERROR: i32 = -32603;
pub const AUTH_REQUIRED: i32 = -32000;
pub const RESOURCE_NOT_FOUND: i32 = -32002;

/// JSON-RPC id: integer or string, equal only within the same variant.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RequestId {
    Number(i64),
    String(String),
}

impl RequestId {
    fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Number(n) => n.as_i64().map(Self::Number),
            Value::String(s) => Some(Self::String(s.clone())),
            _ => None,
        }
    }
}

impl std::fmt::Display for RequestId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Number(n) => write!(f, "{}", n),
            Self::String(s) => write!(f, "{}", s),
        }
    }
}

impl From<u64> for RequestId {
    fn from(n: u64) -> Self {
        Self::String(n.to_string())
    }
}

/// JSON-RPC 2.0 request (or notification, when `id` is absent)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcRequest {
    pub jsonrpc: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<RequestId>,
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl JsonRpcRequest {
    pub fn new(id: impl Into<RequestId>, method: &str, params: Option<Value>) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            id: Some(id.into()),
            method: method.to_string(),
            params,
        }
    }

    pub fn notification(method: &str, params: Option<Value>) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            id: None,
            method: method.to_string(),
            params,
        }
    }
}

/// JSON-RPC 2.0 response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcResponse {
    pub jsonrpc: String,
    pub id: Option<RequestId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcError>,
}

impl JsonRpcResponse {
    pub fn success(id: RequestId, result: Value) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            id: Some(id),
            result: Some(result),
            error: None,
        }
    }

    pub fn error(id: RequestId, code: i32, message: &str) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            id: Some(id),
            result: None,
            error: Some(JsonRpcError {
                code,
                message: message.to_string(),
                data: None,
            }),
        }
    }
}

/// JSON-RPC 2.0 error object
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcError {
    pub code: i32,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

/// Classified inbound frame
#[derive(Debug, Clone)]
pub enum IncomingMessage {
    /// Success response to one of our requests; `result` is decoded by the
    /// original caller.
    Response { id: RequestId, result: Value },
    /// Error response; the id may be null on a peer-side parse failure.
    Error {
        id: Option<RequestId>,
        error: JsonRpcError,
    },
    /// Request initiated by the agent.
    Request {
        id: RequestId,
        method: String,
        params: Value,
    },
    /// Notification from the agent.
    Notification { method: String, params: Value },
}

/// Serialize one outbound frame. The transport appends the newline.
///
/// `serde_json` emits forward slashes unescaped, which some peers require.
pub fn encode_frame<T: Serialize>(frame: &T) -> Result<String> {
    Ok(serde_json::to_string(frame)?)
}

/// Classify an inbound frame by probing its discriminant fields.
///
/// Probe order: `error`, then `id`+`result`, then `id`+`method`, then bare
/// `method`. Anything else is a malformed frame; the raw payload is preserved
/// (truncated) for logging.
pub fn classify(value: &Value) -> Result<IncomingMessage> {
    let obj = match value.as_object() {
        Some(obj) => obj,
        None => return Err(CodecError::malformed(&value.to_string()).into()),
    };

    if let Some(raw_error) = obj.get("error") {
        let error: JsonRpcError = serde_json::from_value(raw_error.clone())
            .map_err(|_| CodecError::malformed(&value.to_string()))?;
        let id = obj.get("id").and_then(RequestId::from_value);
        return Ok(IncomingMessage::Error { id, error });
    }

    let raw_id = obj.get("id");
    let id = raw_id.and_then(RequestId::from_value);
    // An id that is neither an integer nor a string is never guessed at.
    if let Some(raw) = raw_id {
        if !raw.is_null() && id.is_none() {
            return Err(CodecError::malformed(&value.to_string()).into());
        }
    }
    let method = obj.get("method").and_then(Value::as_str);
    let params = obj.get("params").cloned().unwrap_or(Value::Null);

    match (id, method) {
        (Some(id), None) => match obj.get("result") {
            Some(result) => Ok(IncomingMessage::Response {
                id,
                result: result.clone(),
            }),
            None => Err(CodecError::malformed(&value.to_string()).into()),
        },
        (Some(id), Some(method)) => Ok(IncomingMessage::Request {
            id,
            method: method.to_string(),
            params,
        }),
        (None, Some(method)) => Ok(IncomingMessage::Notification {
            method: method.to_string(),
            params,
        }),
        (None, None) => Err(CodecError::malformed(&value.to_string()).into()),
    }
}
