//! Background indexer
//!
//! An [`Indexer`] owns one writable database and at most one worker thread.
//! Its state machine is `Stopped -> Running -> Stopped`: [`Indexer::start`]
//! spawns the worker, [`Indexer::stop`] only requests cancellation, and the
//! end of a run is signalled asynchronously through [`IndexerEvent::Finished`].
//! After that the owner calls [`Indexer::join`] to get the database back and
//! decides whether to commit it.

use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::JoinHandle;
use thiserror::Error;
use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, info, warn};

use crate::config::IndexingOptions;
use crate::index::analyzer::{Severity, SourceAnalyzer, SourceLocation};
use crate::index::database::{IndexDatabase, rw};
use crate::index::error::DatabaseError;
use crate::index::worker::{Worker, WorkerConfig};
use crate::project::compilation_database::CompilationDatabase;

#[derive(Debug, Error)]
pub enum IndexerError {
    #[error("Indexer is already running")]
    AlreadyRunning,

    #[error("Indexer is not running")]
    NotRunning,

    #[error("Indexer worker thread panicked")]
    WorkerPanicked,

    #[error("Failed to spawn indexer worker thread: {0}")]
    ThreadSpawn(std::io::Error),

    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexerStatus {
    Stopped,
    Running,
}

/// Counters collected during one run
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct IndexingStats {
    pub files_indexed: usize,
    pub files_failed: usize,
    pub declarations: usize,
    pub references: usize,
    pub placeholders: usize,
    pub redeclarations: usize,
    pub diagnostics: usize,
}

/// Notifications sent by the worker while it runs
#[derive(Debug, Clone, PartialEq)]
pub enum IndexerEvent {
    /// A qualifying file was fully analyzed
    FileIndexed { path: PathBuf },
    /// An analyzer-reported problem or an absorbed per-file failure
    Diagnostic {
        location: Option<SourceLocation>,
        severity: Severity,
        text: String,
    },
    /// The worker is done; always the last event of a run
    Finished {
        cancelled: bool,
        stats: IndexingStats,
    },
}

/// Background indexing job bound to one writable database
pub struct Indexer {
    database: Option<rw::Database>,
    analyzer: Arc<dyn SourceAnalyzer>,
    targets: Vec<PathBuf>,
    compiler_options: Vec<String>,
    indexing_options: IndexingOptions,
    ignore_extensions: Vec<String>,
    compilation_database: Option<Arc<CompilationDatabase>>,
    events: Option<UnboundedSender<IndexerEvent>>,
    cancel: Arc<AtomicBool>,
    worker: Option<JoinHandle<Result<rw::Database, DatabaseError>>>,
}

impl Indexer {
    pub fn new(database: rw::Database, analyzer: Arc<dyn SourceAnalyzer>) -> Self {
        Self {
            database: Some(database),
            analyzer,
            targets: Vec::new(),
            compiler_options: Vec::new(),
            indexing_options: IndexingOptions::default(),
            ignore_extensions: Vec::new(),
            compilation_database: None,
            events: None,
            cancel: Arc::new(AtomicBool::new(false)),
            worker: None,
        }
    }

    /// Forward worker events to this channel
    pub fn with_event_sender(mut self, sender: UnboundedSender<IndexerEvent>) -> Self {
        self.events = Some(sender);
        self
    }

    /// Use per-file options from a compilation database where it has them
    pub fn with_compilation_database(mut self, database: CompilationDatabase) -> Self {
        self.compilation_database = Some(Arc::new(database));
        self
    }

    pub fn set_compiler_options(&mut self, options: Vec<String>) -> &mut Self {
        self.compiler_options = options;
        self
    }

    pub fn set_indexing_options(&mut self, options: IndexingOptions) -> &mut Self {
        self.indexing_options = options;
        self
    }

    pub fn set_ignore_extensions(&mut self, extensions: Vec<String>) -> &mut Self {
        self.ignore_extensions = extensions;
        self
    }

    /// Append a target; targets are processed in insertion order
    pub fn add_target(&mut self, target: impl Into<PathBuf>) -> &mut Self {
        self.targets.push(target.into());
        self
    }

    pub fn targets(&self) -> &[PathBuf] {
        &self.targets
    }

    pub fn status(&self) -> IndexerStatus {
        match &self.worker {
            Some(handle) if !handle.is_finished() => IndexerStatus::Running,
            _ => IndexerStatus::Stopped,
        }
    }

    /// Spawn the worker thread
    pub fn start(&mut self) -> Result<(), IndexerError> {
        if self.status() == IndexerStatus::Running {
            return Err(IndexerError::AlreadyRunning);
        }
        if self.worker.is_some() {
            // Previous run finished but was never joined
            self.join()?;
        }

        let database = self.database.take().ok_or(IndexerError::NotRunning)?;
        self.cancel.store(false, Ordering::Release);

        let worker = Worker::new(
            database,
            WorkerConfig {
                targets: self.targets.clone(),
                compiler_options: self.compiler_options.clone(),
                indexing_options: self.indexing_options.clone(),
                ignore_extensions: self.ignore_extensions.clone(),
                compilation_database: self.compilation_database.clone(),
            },
            Arc::clone(&self.analyzer),
            Arc::clone(&self.cancel),
            self.events.clone(),
        );

        let handle = std::thread::Builder::new()
            .name("cpp-index-worker".to_string())
            .spawn(move || worker.run())
            .map_err(IndexerError::ThreadSpawn)?;

        info!("Indexer started with {} target(s)", self.targets.len());
        self.worker = Some(handle);
        Ok(())
    }

    /// Request cancellation; returns immediately
    pub fn stop(&self) -> Result<(), IndexerError> {
        if self.status() != IndexerStatus::Running {
            return Err(IndexerError::NotRunning);
        }
        debug!("Indexer cancellation requested");
        self.cancel.store(true, Ordering::Release);
        Ok(())
    }

    pub fn is_cancel_requested(&self) -> bool {
        self.cancel.load(Ordering::Acquire)
    }

    /// Wait for the worker to exit and take the database back
    ///
    /// Only blocks for long if called before `Finished` was received.
    pub fn join(&mut self) -> Result<(), IndexerError> {
        let handle = self.worker.take().ok_or(IndexerError::NotRunning)?;
        match handle.join() {
            Ok(Ok(database)) => {
                self.database = Some(database);
                Ok(())
            }
            Ok(Err(e)) => Err(IndexerError::Database(e)),
            Err(_) => Err(IndexerError::WorkerPanicked),
        }
    }

    /// Commit everything the last run wrote
    pub fn commit(&mut self) -> Result<(), IndexerError> {
        let database = self.database.as_mut().ok_or(IndexerError::NotRunning)?;
        database.commit()?;
        Ok(())
    }

    /// The database, when no worker holds it
    pub fn database(&self) -> Option<&rw::Database> {
        self.database.as_ref()
    }

    pub fn into_database(mut self) -> Option<rw::Database> {
        self.database.take()
    }
}

impl Drop for Indexer {
    fn drop(&mut self) {
        if let Some(handle) = self.worker.take() {
            self.cancel.store(true, Ordering::Release);
            // The database must be closed before the caller touches its directory
            if handle.join().is_err() {
                warn!("Indexer worker panicked during shutdown");
            }
        }
    }
}

impl std::fmt::Debug for Indexer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Indexer")
            .field(
                "database",
                &self.database.as_ref().map(|db| db.path().to_path_buf()),
            )
            .field("analyzer", &self.analyzer.name())
            .field("targets", &self.targets)
            .field("status", &self.status())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::database::ro;
    use crate::index::search::SearchQuery;
    use crate::test_utils::{GatedAnalyzer, ScriptedAnalyzer};
    use std::fs;
    use tempfile::TempDir;
    use tokio::sync::mpsc;

    #[cfg(feature = "test-logging")]
    #[ctor::ctor]
    fn init_test_logging() {
        crate::test_utils::logging::init();
    }

    async fn wait_finished(rx: &mut mpsc::UnboundedReceiver<IndexerEvent>) -> (Vec<IndexerEvent>, bool) {
        let mut events = Vec::new();
        while let Some(event) = rx.recv().await {
            if let IndexerEvent::Finished { cancelled, .. } = &event {
                let cancelled = *cancelled;
                events.push(event);
                return (events, cancelled);
            }
            events.push(event);
        }
        panic!("Event channel closed without Finished");
    }

    #[tokio::test]
    async fn test_run_and_commit() {
        let temp_dir = TempDir::new().unwrap();
        let sources = temp_dir.path().join("src");
        fs::create_dir_all(&sources).unwrap();
        fs::write(sources.join("a.cpp"), "DECL function alpha\n").unwrap();
        let db_path = temp_dir.path().join("db");

        let (tx, mut rx) = mpsc::unbounded_channel();
        let database = rw::Database::open(5, &db_path).unwrap();
        let mut indexer = Indexer::new(database, Arc::new(ScriptedAnalyzer)).with_event_sender(tx);
        indexer.add_target(&sources);
        assert_eq!(indexer.status(), IndexerStatus::Stopped);

        indexer.start().unwrap();
        let (events, cancelled) = wait_finished(&mut rx).await;
        assert!(!cancelled);
        assert!(matches!(events[0], IndexerEvent::FileIndexed { .. }));

        indexer.join().unwrap();
        assert_eq!(indexer.status(), IndexerStatus::Stopped);
        indexer.commit().unwrap();
        drop(indexer);

        let db = ro::Database::open(&db_path).unwrap();
        assert_eq!(db.search(&SearchQuery::text("alpha")).unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_start_twice_is_refused() {
        let temp_dir = TempDir::new().unwrap();
        fs::write(temp_dir.path().join("a.cpp"), "DECL function alpha\n").unwrap();

        let analyzer = Arc::new(GatedAnalyzer::new(ScriptedAnalyzer));
        let (tx, mut rx) = mpsc::unbounded_channel();
        let database = rw::Database::open(5, &temp_dir.path().join("db")).unwrap();
        let mut indexer = Indexer::new(database, analyzer.clone()).with_event_sender(tx);
        indexer.add_target(temp_dir.path().join("a.cpp"));

        indexer.start().unwrap();
        assert_eq!(indexer.status(), IndexerStatus::Running);
        assert!(matches!(indexer.start(), Err(IndexerError::AlreadyRunning)));

        analyzer.release();
        wait_finished(&mut rx).await;
        indexer.join().unwrap();
        assert!(matches!(indexer.stop(), Err(IndexerError::NotRunning)));
    }

    #[tokio::test]
    async fn test_stop_cancels_without_commit() {
        let temp_dir = TempDir::new().unwrap();
        let sources = temp_dir.path().join("src");
        fs::create_dir_all(&sources).unwrap();
        for name in ["a.cpp", "b.cpp", "c.cpp"] {
            fs::write(sources.join(name), "DECL function f\n").unwrap();
        }
        let db_path = temp_dir.path().join("db");

        let analyzer = Arc::new(GatedAnalyzer::new(ScriptedAnalyzer));
        let (tx, mut rx) = mpsc::unbounded_channel();
        let database = rw::Database::open(5, &db_path).unwrap();
        let mut indexer = Indexer::new(database, analyzer.clone()).with_event_sender(tx);
        indexer.add_target(&sources);
        indexer.start().unwrap();

        // The worker is parked inside the first file
        analyzer.wait_until_entered();
        indexer.stop().unwrap();
        assert!(indexer.is_cancel_requested());
        analyzer.release();

        let (events, cancelled) = wait_finished(&mut rx).await;
        assert!(cancelled);
        let indexed = events
            .iter()
            .filter(|e| matches!(e, IndexerEvent::FileIndexed { .. }))
            .count();
        assert!(indexed <= 1);

        indexer.join().unwrap();
        drop(indexer);

        // Nothing was committed, so the database holds no documents
        let db = ro::Database::open(&db_path).unwrap();
        assert_eq!(db.document_count().unwrap(), 0);
    }

    #[test]
    fn test_join_without_start() {
        let temp_dir = TempDir::new().unwrap();
        let database = rw::Database::open(5, temp_dir.path()).unwrap();
        let mut indexer = Indexer::new(database, Arc::new(ScriptedAnalyzer));
        assert!(matches!(indexer.join(), Err(IndexerError::NotRunning)));
        assert!(indexer.database().is_some());
    }
}
