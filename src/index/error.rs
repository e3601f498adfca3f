//! Errors raised by symbol database operations

use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::index::document::DbId;

/// Errors that can occur while opening, writing or querying a symbol database
#[derive(Debug, Error)]
pub enum DatabaseError {
    #[error("Database not found: {path}")]
    NotFound { path: PathBuf },

    #[error("Database corrupted: {path} - {reason}")]
    Corrupted { path: PathBuf, reason: String },

    #[error("Database format version {found} incompatible with expected {expected}")]
    IncompatibleVersion { found: u32, expected: u32 },

    #[error("Database id mismatch: found {found}, expected {expected}")]
    IdMismatch { found: DbId, expected: DbId },

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl DatabaseError {
    /// Create a corrupted database error
    pub fn corrupted<P: AsRef<Path>>(path: P, reason: impl Into<String>) -> Self {
        Self::Corrupted {
            path: path.as_ref().to_path_buf(),
            reason: reason.into(),
        }
    }

    /// Create an incompatible version error
    pub fn incompatible_version(found: u32, expected: u32) -> Self {
        Self::IncompatibleVersion { found, expected }
    }

    /// Whether the error means the on-disk database is missing or unreadable
    pub fn is_open_failure(&self) -> bool {
        matches!(
            self,
            DatabaseError::NotFound { .. }
                | DatabaseError::Corrupted { .. }
                | DatabaseError::IncompatibleVersion { .. }
        )
    }
}
