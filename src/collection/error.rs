use std::path::PathBuf;
use thiserror::Error;

use crate::config::ConfigError;
use crate::index::{DatabaseError, IndexerError, QueryError};

/// Why a rebuild did not start
#[derive(Debug, Error)]
pub enum RebuildRefusal {
    #[error("collection '{active}' is already being rebuilt")]
    AlreadyActive { active: String },

    #[error("collection '{name}' has no targets")]
    NoTargets { name: String },

    #[error("cannot remove stale shadow directory {path}: {source}")]
    ShadowCleanup {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("cannot create shadow database: {0}")]
    Database(#[source] DatabaseError),

    #[error("cannot start indexer: {0}")]
    Indexer(#[source] IndexerError),
}

/// Step of the shadow-to-live promotion that failed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SwapStage {
    Commit,
    CopyManifest,
    MoveAside,
    Promote,
    RemoveOld,
}

impl std::fmt::Display for SwapStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let stage = match self {
            SwapStage::Commit => "commit",
            SwapStage::CopyManifest => "copy manifest",
            SwapStage::MoveAside => "move live database aside",
            SwapStage::Promote => "promote rebuilt database",
            SwapStage::RemoveOld => "remove old database",
        };
        f.write_str(stage)
    }
}

#[derive(Debug, Error)]
pub enum CollectionError {
    #[error("Invalid manifest {path}: {reason}")]
    ManifestInvalid { path: PathBuf, reason: String },

    #[error("Cannot open database of collection '{name}': {source}")]
    DatabaseOpenFailure {
        name: String,
        #[source]
        source: DatabaseError,
    },

    #[error("Rebuild refused: {0}")]
    RebuildRefused(#[from] RebuildRefusal),

    #[error("Swapping rebuilt database of '{name}' failed at '{stage}': {source}")]
    SwapFailure {
        name: String,
        stage: SwapStage,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    #[error("Rebuild of '{name}' failed: {source}")]
    RebuildFailed {
        name: String,
        #[source]
        source: IndexerError,
    },

    #[error("Search failed: {0}")]
    SearchFailure(#[source] DatabaseError),

    #[error("Collection not found: {0}")]
    NotFound(String),

    #[error("Cannot remove collection '{name}': {reason}")]
    RemovalRefused { name: String, reason: String },

    #[error("Collection '{name}' is being rebuilt")]
    Reindexing { name: String },

    #[error("No rebuild is active")]
    NoActiveRebuild,

    #[error("Target already present: {path}")]
    DuplicateTarget { path: PathBuf },

    #[error("Target index {index} out of range (collection has {len} targets)")]
    TargetOutOfRange { index: usize, len: usize },

    #[error("Invalid query: {0}")]
    InvalidQuery(#[from] QueryError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
}

impl CollectionError {
    pub fn manifest_invalid(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Self::ManifestInvalid {
            path: path.into(),
            reason: reason.into(),
        }
    }

    pub fn swap_failure(
        name: &str,
        stage: SwapStage,
        source: impl Into<Box<dyn std::error::Error + Send + Sync>>,
    ) -> Self {
        Self::SwapFailure {
            name: name.to_string(),
            stage,
            source: source.into(),
        }
    }
}
