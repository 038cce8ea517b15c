//! Wire frames

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::error::RpcError;

pub const JSONRPC_VERSION: &str = "2.0";

/// Error code used for every failed request
/// Longest line accepted from the peer, newline excluded
pub const MAX_FRAME_BYTES: usize = 1024 * 1024;

pub const APPLICATION_ERROR: i64 = -32050;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    Get,
    Put,
    Post,
    Delete,
}

impl Method {
    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Put => "PUT",
            Method::Post => "POST",
            Method::Delete => "DELETE",
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Method names are matched case-insensitively
impl FromStr for Method {
    type Err = RpcError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "GET" => Ok(Method::Get),
            "PUT" => Ok(Method::Put),
            "POST" => Ok(Method::Post),
            "DELETE" => Ok(Method::Delete),
            _ => Err(RpcError::InvalidFrame(format!("Unknown method {}", s))),
        }
    }
}

/// Named parameters of every request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestParams {
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<JsonValue>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestFrame {
    pub jsonrpc: String,
    pub id: u64,
    pub method: String,
    pub params: RequestParams,
}

impl RequestFrame {
    pub fn new(id: u64, method: Method, url: impl Into<String>, data: Option<JsonValue>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id,
            method: method.as_str().to_string(),
            params: RequestParams {
                url: url.into(),
                data,
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorObject {
    pub code: i64,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReplyFrame {
    pub jsonrpc: String,
    pub id: JsonValue,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<JsonValue>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorObject>,
}

impl ReplyFrame {
    pub fn result(id: JsonValue, result: JsonValue) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id,
            result: Some(result),
            error: None,
        }
    }

    pub fn error(id: JsonValue, message: impl Into<String>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id,
            result: None,
            error: Some(ErrorObject {
                code: APPLICATION_ERROR,
                message: message.into(),
            }),
        }
    }

    /// Outcome carried by a reply from the peer
    pub fn into_result(self) -> Result<JsonValue, RpcError> {
        match self.error {
            Some(err) => Err(RpcError::Remote {
                code: err.code,
                message: err.message,
            }),
            None => Ok(self.result.unwrap_or(JsonValue::Null)),
        }
    }
}

/// A decoded inbound line
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    /// Carries a `method` key
    Request(JsonValue),
    Reply(ReplyFrame),
}

/// Decode one line received from the peer
pub fn decode_line(line: &[u8]) -> Result<Inbound, RpcError> {
    let value: JsonValue =
        serde_json::from_slice(line).map_err(|e| RpcError::InvalidFrame(e.to_string()))?;
    if !value.is_object() {
        return Err(RpcError::InvalidFrame("frame is not an object".to_string()));
    }
    if value.get("method").is_some() {
        return Ok(Inbound::Request(value));
    }
    serde_json::from_value(value)
        .map(Inbound::Reply)
        .map_err(|e| RpcError::InvalidFrame(e.to_string()))
}

/// Encode a frame as one line
pub fn encode_line<T: Serialize>(frame: &T) -> Result<String, RpcError> {
    let mut line =
        serde_json::to_string(frame).map_err(|e| RpcError::InvalidFrame(e.to_string()))?;
    line.push('\n');
    Ok(line)
}
