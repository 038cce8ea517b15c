//! Error types for the device tree and its persistence

use std::path::PathBuf;

use thiserror::Error;

/// Result type for persistence operations
pub type StoreResult<T> = Result<T, StoreError>;

/// Result type for model operations
pub type ModelResult<T> = Result<T, ModelError>;

/// Errors raised while reading or writing the persisted tree
#[derive(Debug, Error)]
pub enum StoreError {
    /// Filesystem access failed
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A node file did not contain the expected JSON
    #[error("Malformed node file {path}: {source}")]
    Malformed {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

impl StoreError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

/// Errors raised while rebuilding model nodes from persisted records
#[derive(Debug, Error)]
pub enum ModelError {
    /// The payload of a node did not match its kind
    #[error("Invalid {kind} payload: {source}")]
    InvalidPayload {
        kind: &'static str,
        #[source]
        source: serde_json::Error,
    },

    /// The attributes of a node did not match its kind
    #[error("Invalid {kind} attributes: {source}")]
    InvalidAttributes {
        kind: &'static str,
        #[source]
        source: serde_json::Error,
    },

    /// No value kind is known for a persisted value
    #[error("Unknown value kind for cluster {cluster} index {index}")]
    UnknownValueKind { cluster: i32, index: u32 },
}
