//! Radio collaborator errors

use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum RadioError {
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Delivery failed: {0}")]
    DeliveryFailed(String),

    #[error("Timeout: {0}")]
    Timeout(String),

    #[error("Device not found: {0}")]
    DeviceNotFound(String),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Radio not supported: {0}")]
    Unsupported(String),
}

pub type RadioResult<T> = Result<T, RadioError>;
