//! Error types for AtlasDBM
//!
//! Provides a unified error type for all operations.

use std::path::PathBuf;

use thiserror::Error;

/// Result type alias using DbmError
pub type Result<T> = std::result::Result<T, DbmError>;

/// Unified error type for AtlasDBM operations
#[derive(Debug, Error)]
pub enum DbmError {
    // -------------------------------------------------------------------------
    // I/O Errors
    // -------------------------------------------------------------------------
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Cannot open database file {path:?}: {source}")]
    FileOpen {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // -------------------------------------------------------------------------
    // Lock Contention
    // -------------------------------------------------------------------------
    #[error("Cannot open {0:?} as a reader: locked by a writer")]
    CannotBeReader(PathBuf),

    #[error("Cannot open {0:?} as a writer: locked by another session")]
    CannotBeWriter(PathBuf),

    // -------------------------------------------------------------------------
    // Storage Errors
    // -------------------------------------------------------------------------
    #[error("Corrupt database: {0}")]
    Corrupt(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Internal consistency failure, routed through the file's fatal hook
    #[error("Fatal database error: {0}")]
    Fatal(String),

    // -------------------------------------------------------------------------
    // Session Errors
    // -------------------------------------------------------------------------
    #[error("Key not found")]
    KeyNotFound,

    #[error("Database handle is closed")]
    ClosedHandle,

    #[error("Database was opened read-only")]
    ReadOnly,

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),
}

impl DbmError {
    /// True for `CannotBeReader` / `CannotBeWriter`
    pub fn is_lock_contention(&self) -> bool {
        matches!(self, DbmError::CannotBeReader(_) | DbmError::CannotBeWriter(_))
    }

    /// True for errors raised through the fatal hook
    pub fn is_fatal(&self) -> bool {
        matches!(self, DbmError::Fatal(_))
    }
}

impl From<bincode::Error> for DbmError {
    fn from(err: bincode::Error) -> Self {
        DbmError::Serialization(err.to_string())
    }
}
