//! Error types for replikv
//!
//! Provides a unified error type for all operations.

use std::net::SocketAddr;
use std::time::Duration;

use thiserror::Error;

/// Result type alias using ReplikvError
pub type Result<T> = std::result::Result<T, ReplikvError>;

/// Unified error type for replikv operations
#[derive(Debug, Error)]
pub enum ReplikvError {
    // -------------------------------------------------------------------------
    // I/O Errors
    // -------------------------------------------------------------------------
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // -------------------------------------------------------------------------
    // Store Errors
    // -------------------------------------------------------------------------
    #[error("Store error: {0}")]
    Store(#[from] redb::Error),

    #[error("Store file still locked after {0:?}")]
    StoreTimeout(Duration),

    // -------------------------------------------------------------------------
    // Serialization Errors
    // -------------------------------------------------------------------------
    #[error("Codec error: {0}")]
    Codec(#[from] serde_json::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] bincode::Error),

    #[error("Invalid {kind} value: {value:?}")]
    InvalidValue { kind: &'static str, value: String },

    // -------------------------------------------------------------------------
    // Snapshot Errors
    // -------------------------------------------------------------------------
    #[error("Snapshot corruption detected: {0}")]
    SnapshotCorruption(String),

    #[error("Snapshot compression mismatch: stream compressed = {stream}, node compression = {node}")]
    CompressionMismatch { stream: bool, node: bool },

    // -------------------------------------------------------------------------
    // Transport Errors
    // -------------------------------------------------------------------------
    #[error("Local bind address is not advertisable: {0}")]
    NotAdvertisable(SocketAddr),

    #[error("Advertise address {actual} is not an {expected} address")]
    AddressFamily {
        expected: &'static str,
        actual: SocketAddr,
    },

    #[error("Cannot resolve address: {0}")]
    AddressResolution(String),

    #[error("Transport closed")]
    TransportClosed,

    #[error("Protocol error: {0}")]
    Protocol(String),

    // -------------------------------------------------------------------------
    // Configuration Errors
    // -------------------------------------------------------------------------
    #[error("Configuration error: {0}")]
    Config(String),
}

impl ReplikvError {
    /// Shorthand for an explicit name-mapping failure
    pub fn invalid_value(kind: &'static str, value: impl Into<String>) -> Self {
        ReplikvError::InvalidValue {
            kind,
            value: value.into(),
        }
    }
}

// redb reports each stage with its own error type; fold them all into `Store`
// so `?` works directly on redb calls.
macro_rules! store_error_from {
    ($($ty:ty),* $(,)?) => {
        $(
            impl From<$ty> for ReplikvError {
                fn from(e: $ty) -> Self {
                    ReplikvError::Store(redb::Error::from(e))
                }
            }
        )*
    };
}

store_error_from!(
    redb::DatabaseError,
    redb::TransactionError,
    redb::TableError,
    redb::StorageError,
    redb::CommitError,
);
