//! Indexed collections
//!
//! A collection is one named set of source targets with its own on-disk
//! database. The [`manager::CollectionManager`] owns every collection, the
//! single rebuild slot and the combined index used for searching.

pub mod error;
pub mod manager;
pub mod manifest;
pub mod notification;

use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use uuid::Uuid;

use crate::index::DbId;
use crate::index::database::ro;
use manifest::Manifest;

pub use manager::CollectionManager;
pub use notification::{Notification, RebuildOutcome};

/// Collection status state machine
///
/// `Unknown --enable--> Ok --disable--> Unknown`, `Ok --rebuild--> Reindexing`,
/// `Reindexing --success--> Ok`, `Reindexing --failure--> Unknown`.
/// `Invalid` marks a collection whose manifest could not be re-read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CollectionStatus {
    Unknown,
    Ok,
    Invalid,
    Reindexing,
}

impl std::fmt::Display for CollectionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let status = match self {
            CollectionStatus::Unknown => "unknown",
            CollectionStatus::Ok => "ok",
            CollectionStatus::Invalid => "invalid",
            CollectionStatus::Reindexing => "reindexing",
        };
        f.write_str(status)
    }
}

/// In-memory state of one collection
#[derive(Debug)]
pub struct Collection {
    manifest: Manifest,
    db_id: DbId,
    status: CollectionStatus,
    /// Open read-only database; present exactly when enabled
    database: Option<Arc<ro::Database>>,
}

impl Collection {
    pub(crate) fn new(manifest: Manifest) -> Self {
        Self {
            db_id: crate::index::make_dbid(&manifest.uuid),
            manifest,
            status: CollectionStatus::Unknown,
            database: None,
        }
    }

    pub fn id(&self) -> Uuid {
        self.manifest.uuid
    }

    pub fn name(&self) -> &str {
        &self.manifest.name
    }

    pub fn comment(&self) -> &str {
        &self.manifest.comment
    }

    pub fn path(&self) -> &Path {
        &self.manifest.path
    }

    pub fn targets(&self) -> &[PathBuf] {
        &self.manifest.targets
    }

    pub fn db_id(&self) -> DbId {
        self.db_id
    }

    pub fn status(&self) -> CollectionStatus {
        self.status
    }

    pub fn is_enabled(&self) -> bool {
        self.database.is_some()
    }

    pub fn manifest(&self) -> &Manifest {
        &self.manifest
    }
}
