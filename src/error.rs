//! Error types for EmberKV
//!
//! Provides a unified error type for all operations.

use thiserror::Error;

/// Result type alias using EmberError
pub type Result<T> = std::result::Result<T, EmberError>;

/// Unified error type for EmberKV operations
#[derive(Debug, Error)]
pub enum EmberError {
    // -------------------------------------------------------------------------
    // I/O Errors
    // -------------------------------------------------------------------------
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // -------------------------------------------------------------------------
    // Lookup Errors
    // -------------------------------------------------------------------------
    /// No live value for the key (absent, or shadowed by a tombstone)
    #[error("Key not found")]
    NotFound,

    // -------------------------------------------------------------------------
    // Storage Errors
    // -------------------------------------------------------------------------
    /// A file claiming to be an SSTable failed structural validation
    #[error("Invalid SSTable format: {0}")]
    Format(String),

    #[error("Storage error: {0}")]
    Storage(String),

    // -------------------------------------------------------------------------
    // Transaction Errors
    // -------------------------------------------------------------------------
    /// The key holds an uncommitted write of another open transaction
    #[error("Key {key:?} is locked by transaction '{tag}'")]
    Conflict { key: Vec<u8>, tag: String },

    /// Operation on a transaction that is already committed or aborted
    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Transaction '{0}' already exists")]
    AlreadyExists(String),

    #[error("Invalid transaction tag: {0:?}")]
    InvalidTag(String),
}

impl EmberError {
    /// True for [`EmberError::NotFound`]
    pub fn is_not_found(&self) -> bool {
        matches!(self, EmberError::NotFound)
    }

    /// True for [`EmberError::Conflict`]
    pub fn is_conflict(&self) -> bool {
        matches!(self, EmberError::Conflict { .. })
    }
}
