//! RPC errors

use std::time::Duration;

use thiserror::Error;

pub type RpcResult<T> = Result<T, RpcError>;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum RpcError {
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Connection closed")]
    ConnectionClosed,

    #[error("Request timed out after {0:?}")]
    Timeout(Duration),

    /// The peer answered with an error object
    #[error("Remote error {code}: {message}")]
    Remote { code: i64, message: String },

    #[error("Invalid frame: {0}")]
    InvalidFrame(String),
}
