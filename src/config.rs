//! Persistent settings
//!
//! Settings are an explicit value struct stored as `settings.json` in the
//! collections base directory, loaded and saved wholesale.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::debug;
use uuid::Uuid;

// ============================================================================
// Configuration Constants
// ============================================================================

/// File name of the settings file inside the base directory
pub const SETTINGS_FILE: &str = "settings.json";

/// Environment variable overriding the default base directory
pub const BASE_DIR_ENV: &str = "CPP_INDEX_HOME";

/// Application directory below the platform data directory
pub const APP_DIR_NAME: &str = "cpp-symbol-index";

/// Subdirectory holding one directory per collection
pub const COLLECTIONS_DIR_NAME: &str = "indexed-collections";

/// Default C/C++ front-end executable
pub const DEFAULT_CLANG_PATH: &str = "clang";

// ============================================================================
// Errors
// ============================================================================

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse settings file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Invalid path {path}: {reason}")]
    InvalidPath { path: PathBuf, reason: String },
}

// ============================================================================
// Settings
// ============================================================================

/// Options that change what the analyzer reports
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexingOptions {
    /// Report declarations local to function bodies
    pub index_locals: bool,
    /// Drop compiler-generated implicit declarations
    pub skip_implicits: bool,
}

impl Default for IndexingOptions {
    fn default() -> Self {
        Self {
            index_locals: false,
            skip_implicits: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Collections root; implied by where the file lives, never serialized
    #[serde(skip)]
    pub base_dir: PathBuf,

    /// Collections to enable at load time
    pub enabled: BTreeSet<Uuid>,

    /// Free-form compiler parameters, split on whitespace
    pub clang_params: String,

    /// System include directories
    pub system_dirs: Vec<PathBuf>,

    /// Session (project) include directories
    pub session_dirs: Vec<PathBuf>,

    /// Source extensions the indexer skips
    pub ignore_extensions: Vec<String>,

    pub indexing: IndexingOptions,

    /// C/C++ front-end executable used by the clang analyzer
    pub clang_path: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            base_dir: PathBuf::new(),
            enabled: BTreeSet::new(),
            clang_params: String::new(),
            system_dirs: Vec::new(),
            session_dirs: Vec::new(),
            ignore_extensions: Vec::new(),
            indexing: IndexingOptions::default(),
            clang_path: DEFAULT_CLANG_PATH.to_string(),
        }
    }
}

impl Settings {
    /// Load settings from `<base_dir>/settings.json`, or defaults if absent
    pub fn load(base_dir: &Path) -> Result<Self, ConfigError> {
        let path = base_dir.join(SETTINGS_FILE);
        let mut settings = if path.is_file() {
            let raw = std::fs::read_to_string(&path)?;
            serde_json::from_str::<Settings>(&raw).map_err(|source| ConfigError::Parse {
                path: path.clone(),
                source,
            })?
        } else {
            debug!("No settings file at {}, using defaults", path.display());
            Settings::default()
        };
        settings.base_dir = base_dir.to_path_buf();
        Ok(settings)
    }

    /// Write the settings file, creating the base directory if needed
    pub fn save(&self) -> Result<(), ConfigError> {
        std::fs::create_dir_all(&self.base_dir)?;
        let raw = serde_json::to_string_pretty(self).map_err(|source| ConfigError::Parse {
            path: self.settings_file(),
            source,
        })?;
        std::fs::write(self.settings_file(), raw)?;
        debug!("Saved settings to {}", self.settings_file().display());
        Ok(())
    }

    pub fn settings_file(&self) -> PathBuf {
        self.base_dir.join(SETTINGS_FILE)
    }

    /// Final compiler option vector handed to the analyzer
    pub fn compiler_options(&self) -> Vec<String> {
        self.system_dirs
            .iter()
            .chain(self.session_dirs.iter())
            .map(|dir| format!("-I{}", dir.display()))
            .chain(self.clang_params.split_whitespace().map(str::to_string))
            .collect()
    }

    pub fn is_enabled(&self, id: &Uuid) -> bool {
        self.enabled.contains(id)
    }

    /// Record whether a collection should be enabled at next load
    pub fn set_enabled(&mut self, id: Uuid, enabled: bool) -> bool {
        if enabled {
            self.enabled.insert(id)
        } else {
            self.enabled.remove(&id)
        }
    }
}

/// Resolve the collections base directory
///
/// An explicit path wins, then `CPP_INDEX_HOME`, then the platform data
/// directory.
pub fn resolve_base_dir(explicit: Option<PathBuf>) -> Result<PathBuf, ConfigError> {
    if let Some(path) = explicit {
        return absolutize(path);
    }
    if let Ok(path) = std::env::var(BASE_DIR_ENV)
        && !path.is_empty()
    {
        return absolutize(PathBuf::from(path));
    }
    dirs::data_local_dir()
        .map(|dir| dir.join(APP_DIR_NAME).join(COLLECTIONS_DIR_NAME))
        .ok_or_else(|| ConfigError::InvalidPath {
            path: PathBuf::new(),
            reason: "no local data directory on this platform".to_string(),
        })
}

fn absolutize(path: PathBuf) -> Result<PathBuf, ConfigError> {
    if path.as_os_str().is_empty() {
        return Err(ConfigError::InvalidPath {
            path,
            reason: "empty path".to_string(),
        });
    }
    if path.is_absolute() {
        Ok(path)
    } else {
        Ok(std::env::current_dir()?.join(path))
    }
}

// ============================================================================
// Builder
// ============================================================================

/// Builder for [`Settings`] with path validation
#[derive(Debug, Default)]
pub struct SettingsBuilder {
    settings: Settings,
}

impl SettingsBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn base_dir(mut self, path: impl Into<PathBuf>) -> Self {
        self.settings.base_dir = path.into();
        self
    }

    pub fn clang_params(mut self, params: impl Into<String>) -> Self {
        self.settings.clang_params = params.into();
        self
    }

    pub fn clang_path(mut self, path: impl Into<String>) -> Self {
        self.settings.clang_path = path.into();
        self
    }

    pub fn add_system_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.settings.system_dirs.push(dir.into());
        self
    }

    pub fn add_session_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.settings.session_dirs.push(dir.into());
        self
    }

    pub fn ignore_extension(mut self, ext: impl Into<String>) -> Self {
        self.settings.ignore_extensions.push(ext.into());
        self
    }

    pub fn index_locals(mut self, enabled: bool) -> Self {
        self.settings.indexing.index_locals = enabled;
        self
    }

    pub fn skip_implicits(mut self, enabled: bool) -> Self {
        self.settings.indexing.skip_implicits = enabled;
        self
    }

    pub fn build(mut self) -> Result<Settings, ConfigError> {
        self.settings.base_dir = absolutize(self.settings.base_dir)?;
        Ok(self.settings)
    }
}
