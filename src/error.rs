//! Error types for the media store.

use thiserror::Error;

/// Main error type for store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Opening or migrating the store failed. Fatal to the calling
    /// operation; a later open may retry.
    #[error("Store unavailable: {0}")]
    Unavailable(String),

    #[error("Duplicate key in {collection}: {key}")]
    DuplicateKey {
        collection: &'static str,
        key: String,
    },

    #[error("Record not found in {collection}: {key}")]
    NotFound {
        collection: &'static str,
        key: String,
    },

    /// Required key field was empty after trimming.
    #[error("Invalid key: {0}")]
    InvalidKey(String),

    #[error("No index on {collection}.{field}")]
    UnknownIndex {
        collection: &'static str,
        field: String,
    },

    #[error("Unknown collection: {0}")]
    UnknownCollection(String),

    /// The journal aborted a unit of work. Propagated verbatim.
    #[error("Transaction aborted: {0}")]
    TransactionAborted(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Deserialization error: {0}")]
    Deserialization(String),

    #[error("Corruption detected: {0}")]
    Corruption(String),

    #[error("Invalid store format: {0}")]
    InvalidFormat(String),

    #[error("Checksum mismatch: expected {expected}, got {got}")]
    ChecksumMismatch { expected: u32, got: u32 },

    #[error("Invalid operation: {0}")]
    InvalidOperation(String),

    #[error("Store is locked by another process")]
    Locked,

    #[error("Store not initialized")]
    NotInitialized,
}

impl From<serde_json::Error> for StoreError {
    fn from(e: serde_json::Error) -> Self {
        StoreError::Serialization(e.to_string())
    }
}

impl From<rmp_serde::encode::Error> for StoreError {
    fn from(e: rmp_serde::encode::Error) -> Self {
        StoreError::Serialization(e.to_string())
    }
}

impl From<rmp_serde::decode::Error> for StoreError {
    fn from(e: rmp_serde::decode::Error) -> Self {
        StoreError::Deserialization(e.to_string())
    }
}

/// Result type for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;
