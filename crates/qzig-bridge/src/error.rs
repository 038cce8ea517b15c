//! Bridge errors

use qzig_core::RadioError;
use qzig_rpc::RpcError;
use thiserror::Error;

pub type BridgeResult<T> = Result<T, BridgeError>;

#[derive(Debug, Error)]
pub enum BridgeError {
    #[error("Radio error: {0}")]
    Radio(#[from] RadioError),

    #[error("RPC error: {0}")]
    Rpc(#[from] RpcError),
}
