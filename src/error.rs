//! Error types for hashkv
//!
//! Provides a unified error type for all operations.
//!
//! Two classes of failure share this enum:
//! - recoverable statuses (I/O, corruption, missing keys, bad input) which a
//!   caller may handle and retry
//! - fatal conditions (`Invariant`, `UnwindFailed`) which mean a logic defect
//!   or a store whose disk and memory state may have diverged

use thiserror::Error;

use crate::unwind::UndoKind;

/// Result type alias using HashKvError
pub type Result<T> = std::result::Result<T, HashKvError>;

/// Unified error type for hashkv operations
#[derive(Debug, Error)]
pub enum HashKvError {
    // -------------------------------------------------------------------------
    // I/O Errors
    // -------------------------------------------------------------------------
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // -------------------------------------------------------------------------
    // Storage Errors
    // -------------------------------------------------------------------------
    #[error("Page corruption detected: {0}")]
    Corruption(String),

    #[error("Invalid page offset: {0}")]
    InvalidOffset(i64),

    #[error("Page manager error: {0}")]
    PageManager(String),

    #[error("Key too large: {len} bytes (max {max})")]
    KeyTooLarge { len: usize, max: usize },

    #[error("Value too large: {len} bytes (max {max})")]
    ValueTooLarge { len: usize, max: usize },

    #[error("Key must not be empty")]
    EmptyKey,

    #[error("Key not found")]
    KeyNotFound,

    // -------------------------------------------------------------------------
    // Serialization Errors
    // -------------------------------------------------------------------------
    #[error("Serialization error: {0}")]
    Serialization(String),

    // -------------------------------------------------------------------------
    // Index Errors
    // -------------------------------------------------------------------------
    #[error("Out of memory: {0}")]
    NoMemory(String),

    #[error("Internal invariant violated: {0}")]
    Invariant(String),

    // -------------------------------------------------------------------------
    // Undo Errors
    // -------------------------------------------------------------------------
    #[error("Failed to unwind {kind:?} at offset {offset}: {source}")]
    UnwindFailed {
        kind: UndoKind,
        offset: i64,
        #[source]
        source: Box<HashKvError>,
    },

    // -------------------------------------------------------------------------
    // Configuration Errors
    // -------------------------------------------------------------------------
    #[error("Configuration error: {0}")]
    Config(String),
}

impl HashKvError {
    /// Returns true for failures that indicate a bug or an unrecoverable
    /// divergence between disk and memory, as opposed to an ordinary status.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            HashKvError::Invariant(_) | HashKvError::UnwindFailed { .. }
        )
    }
}

impl From<bincode::Error> for HashKvError {
    fn from(err: bincode::Error) -> Self {
        HashKvError::Serialization(err.to_string())
    }
}
