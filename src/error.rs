//! Error types for the feature store.

use crate::types::FeatureId;
use thiserror::Error;

/// Main error type for store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Feature type not found: {0}")]
    TypeNotFound(String),

    #[error("Feature not found: {0}")]
    FeatureNotFound(FeatureId),

    #[error("Feature already exists: {0}")]
    FeatureExists(FeatureId),

    #[error("Feature type already exists: {0}")]
    TypeExists(String),

    #[error("Feature type is read-only: {0}")]
    ReadOnly(String),

    #[error("Unsupported operation: {0}")]
    Unsupported(String),

    #[error("Invalid query: {0}")]
    InvalidQuery(String),

    #[error("Invalid schema: {0}")]
    InvalidSchema(String),

    #[error("Illegal value for attribute {attribute}: {reason}")]
    IllegalAttribute { attribute: String, reason: String },

    #[error("Feature {fid} of {type_name} is locked")]
    FeatureLocked { type_name: String, fid: FeatureId },

    #[error("Lock not found: {0}")]
    LockNotFound(String),

    #[error("Transaction error: {0}")]
    Transaction(String),

    #[error("Illegal state: {0}")]
    IllegalState(String),

    #[error("Writer exhausted: {0}")]
    WriterExhausted(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Deserialization error: {0}")]
    Deserialization(String),

    #[error("Invalid store format: {0}")]
    InvalidFormat(String),

    #[error("Checksum mismatch: expected {expected}, got {got}")]
    ChecksumMismatch { expected: u32, got: u32 },

    #[error("Store is locked by another process")]
    Locked,

    #[error("Closed: {0}")]
    Closed(String),
}

impl StoreError {
    /// Whether this error belongs to the I/O category (not-found, replay failures, raw I/O).
    pub fn is_io(&self) -> bool {
        matches!(
            self,
            StoreError::Io(_) | StoreError::TypeNotFound(_) | StoreError::WriterExhausted(_)
        )
    }
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
