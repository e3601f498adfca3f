//! Notifications emitted by the collection manager
//!
//! Every report goes out on an unbounded channel and is mirrored to `tracing`
//! at a matching level, so a caller that never reads the channel still gets
//! them in the log.

use serde::Serialize;
use std::path::PathBuf;
use uuid::Uuid;

use crate::collection::CollectionStatus;
use crate::index::{IndexingStats, Severity, SourceLocation};

/// One diagnostic line, from the manager itself or forwarded from the analyzer
#[derive(Debug, Clone, PartialEq)]
pub struct DiagnosticRecord {
    pub severity: Severity,
    pub text: String,
    pub location: Option<SourceLocation>,
}

impl DiagnosticRecord {
    pub fn new(severity: Severity, text: impl Into<String>) -> Self {
        Self {
            severity,
            text: text.into(),
            location: None,
        }
    }

    pub fn with_location(mut self, location: Option<SourceLocation>) -> Self {
        self.location = location;
        self
    }
}

impl std::fmt::Display for DiagnosticRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.location {
            Some(location) => write!(f, "{}: {}: {}", location, self.severity, self.text),
            None => write!(f, "{}: {}", self.severity, self.text),
        }
    }
}

/// How a rebuild ended
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase", tag = "outcome")]
pub enum RebuildOutcome {
    Completed { stats: IndexingStats },
    Cancelled { stats: IndexingStats },
    Failed { reason: String },
}

impl RebuildOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, RebuildOutcome::Completed { .. })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Notification {
    Diagnostic(DiagnosticRecord),
    StatusChanged {
        id: Uuid,
        status: CollectionStatus,
    },
    CollectionRemoved {
        id: Uuid,
        name: String,
    },
    ReindexingStarted {
        id: Uuid,
        name: String,
    },
    IndexingFile {
        id: Uuid,
        path: PathBuf,
    },
    ReindexingFinished {
        id: Uuid,
        name: String,
        outcome: RebuildOutcome,
    },
}
