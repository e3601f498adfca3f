//! Source analyzer interface
//!
//! The indexer never parses C/C++ itself. It hands each file to a
//! [`SourceAnalyzer`] and consumes the resulting stream of events. Analyzers
//! are synchronous per file; the indexer runs them on its worker thread.

use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::index::document::{SymbolFlags, SymbolKind, TemplateKind};

/// Position in a source file as reported by an analyzer (1-based)
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SourceLocation {
    pub file: PathBuf,
    pub line: u32,
    pub column: u32,
}

impl SourceLocation {
    pub fn new(file: impl Into<PathBuf>, line: u32, column: u32) -> Self {
        Self {
            file: file.into(),
            line,
            column,
        }
    }
}

impl std::fmt::Display for SourceLocation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}:{}", self.file.display(), self.line, self.column)
    }
}

/// Severity of an analyzer diagnostic
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Debug,
    Info,
    Warning,
    Error,
}

impl Severity {
    /// Map a compiler-style severity word (`warning`, `fatal error`, ...)
    pub fn from_compiler(word: &str) -> Self {
        match word {
            "error" | "fatal error" | "fatal" => Severity::Error,
            "warning" => Severity::Warning,
            "note" | "remark" => Severity::Info,
            _ => Severity::Debug,
        }
    }
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            Severity::Debug => "debug",
            Severity::Info => "info",
            Severity::Warning => "warning",
            Severity::Error => "error",
        };
        f.write_str(label)
    }
}

/// One event produced while analyzing a file
#[derive(Debug, Clone, PartialEq)]
pub enum AnalyzerEvent {
    Declaration {
        name: String,
        kind: SymbolKind,
        template_kind: TemplateKind,
        location: SourceLocation,
        /// Location of the declaration owning this one semantically
        semantic_container: Option<SourceLocation>,
        /// Location of the declaration it textually appears in
        lexical_container: Option<SourceLocation>,
        flags: SymbolFlags,
    },
    Reference {
        name: String,
        kind: SymbolKind,
        /// Location of the referenced declaration
        target: SourceLocation,
        location: SourceLocation,
    },
    Diagnostic {
        location: Option<SourceLocation>,
        severity: Severity,
        text: String,
    },
}

/// Hard failure analyzing a single file
#[derive(Debug, Error)]
pub enum AnalyzerError {
    #[error("Failed to start analyzer: {0}")]
    Spawn(#[from] std::io::Error),

    #[error("Analyzer failed on {path}: {reason}")]
    Failed { path: PathBuf, reason: String },

    #[error("Could not parse analyzer output for {path}: {reason}")]
    Parse { path: PathBuf, reason: String },
}

impl AnalyzerError {
    pub fn failed(path: &Path, reason: impl Into<String>) -> Self {
        Self::Failed {
            path: path.to_path_buf(),
            reason: reason.into(),
        }
    }

    pub fn parse(path: &Path, reason: impl Into<String>) -> Self {
        Self::Parse {
            path: path.to_path_buf(),
            reason: reason.into(),
        }
    }
}

pub type EventStream = Box<dyn Iterator<Item = AnalyzerEvent> + Send>;

/// External C/C++ front-end
pub trait SourceAnalyzer: Send + Sync {
    /// Analyze one file with compiler-style options
    fn analyze(&self, file: &Path, options: &[String]) -> Result<EventStream, AnalyzerError>;

    /// Short human-readable name for logs
    fn name(&self) -> &str {
        "analyzer"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_severity_from_compiler() {
        assert_eq!(Severity::from_compiler("fatal error"), Severity::Error);
        assert_eq!(Severity::from_compiler("warning"), Severity::Warning);
        assert_eq!(Severity::from_compiler("note"), Severity::Info);
        assert_eq!(Severity::from_compiler("whatever"), Severity::Debug);
    }

    #[test]
    fn test_location_display() {
        let location = SourceLocation::new("/src/a.cpp", 4, 12);
        assert_eq!(location.to_string(), "/src/a.cpp:4:12");
    }

    #[test]
    fn test_error_messages() {
        let error = AnalyzerError::failed(Path::new("/src/a.cpp"), "exit status 1");
        assert_eq!(error.to_string(), "Analyzer failed on /src/a.cpp: exit status 1");
    }
}
