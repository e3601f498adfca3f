//! Per-collection manifest
//!
//! A small JSON file named `manifest` inside the collection directory. It is
//! the only persistent record of a collection's metadata and is rewritten
//! wholesale after every change.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use uuid::Uuid;

use crate::collection::error::CollectionError;

/// File name of the manifest inside a collection directory
pub const MANIFEST_FILE: &str = "manifest";

/// Suffix of the directory a rebuild writes into
pub const SHADOW_SUFFIX: &str = ".reindexing";

/// Suffix of the live directory while it is being replaced
pub const BACKUP_SUFFIX: &str = ".old";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Manifest {
    pub uuid: Uuid,
    pub name: String,
    #[serde(default)]
    pub comment: String,
    /// Database directory; also where this manifest lives
    pub path: PathBuf,
    #[serde(default)]
    pub targets: Vec<PathBuf>,
    /// Optional compile_commands.json providing per-file options
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub compile_commands: Option<PathBuf>,
}

impl Manifest {
    pub fn new(uuid: Uuid, name: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self {
            uuid,
            name: name.into(),
            comment: String::new(),
            path: path.into(),
            targets: Vec::new(),
            compile_commands: None,
        }
    }

    /// Read a manifest file and check that its database directory exists
    pub fn load(file: &Path) -> Result<Self, CollectionError> {
        let raw = std::fs::read_to_string(file)
            .map_err(|e| CollectionError::manifest_invalid(file, e.to_string()))?;
        let manifest: Manifest = serde_json::from_str(&raw)
            .map_err(|e| CollectionError::manifest_invalid(file, e.to_string()))?;

        if !manifest.path.is_dir() {
            return Err(CollectionError::manifest_invalid(
                file,
                format!("database directory {} is missing", manifest.path.display()),
            ));
        }

        Ok(manifest)
    }

    /// Write the manifest into its own collection directory
    pub fn save(&self) -> Result<(), CollectionError> {
        self.save_to(&self.path)
    }

    /// Write the manifest into `dir`, replacing any previous one atomically
    pub fn save_to(&self, dir: &Path) -> Result<(), CollectionError> {
        let raw = serde_json::to_string_pretty(self)
            .map_err(|e| CollectionError::manifest_invalid(dir.join(MANIFEST_FILE), e.to_string()))?;
        let temp = dir.join(format!("{MANIFEST_FILE}.tmp"));
        std::fs::write(&temp, raw)?;
        std::fs::rename(&temp, dir.join(MANIFEST_FILE))?;
        Ok(())
    }

    pub fn manifest_file(&self) -> PathBuf {
        self.path.join(MANIFEST_FILE)
    }

    /// `<path>.reindexing`
    pub fn shadow_path(&self) -> PathBuf {
        with_suffix(&self.path, SHADOW_SUFFIX)
    }

    /// `<path>.old`
    pub fn backup_path(&self) -> PathBuf {
        with_suffix(&self.path, BACKUP_SUFFIX)
    }
}

fn with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut raw = path.as_os_str().to_os_string();
    raw.push(suffix);
    PathBuf::from(raw)
}

/// Whether a directory name belongs to a rebuild in progress or a swap leftover
pub fn is_transient_dir(name: &str) -> bool {
    name.ends_with(SHADOW_SUFFIX) || name.ends_with(BACKUP_SUFFIX)
}
