//! Indexing worker
//!
//! Runs on the indexer's background thread. Walks the configured targets,
//! feeds every C/C++ source to the analyzer and turns the resulting events
//! into documents of the writable database. Nothing is committed here; the
//! database is handed back to the owner through the thread's join handle.

use std::collections::{HashMap, HashSet};
use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;
use tokio::sync::mpsc::UnboundedSender;
use tracing::{Level, debug, info, trace, warn};
use walkdir::WalkDir;

use crate::config::IndexingOptions;
use crate::index::analyzer::{AnalyzerEvent, Severity, SourceAnalyzer, SourceLocation};
use crate::index::database::{IndexDatabase, rw};
use crate::index::document::{
    DeclarationLocation, DocRef, SymbolDocument, SymbolFlags, SymbolKind,
};
use crate::index::error::DatabaseError;
use crate::index::file_cache::FileIdCache;
use crate::index::indexer::{IndexerEvent, IndexingStats};
use crate::log_timing;
use crate::project::compilation_database::CompilationDatabase;

/// Extensions of files considered C/C++ sources (lowercase)
const CPP_EXTENSIONS: &[&str] = &[
    "c", "cc", "cpp", "cxx", "c++", "h", "hh", "hpp", "hxx", "h++", "inl", "tcc", "ipp",
];

/// Version control metadata directories never descended into
const VCS_DIRECTORIES: &[&str] = &[".git", ".svn", ".hg", ".bzr", "CVS"];

/// How many analyzer events are consumed between cancellation checks
const CANCEL_CHECK_INTERVAL: usize = 1024;

/// Everything the worker needs besides the database and the analyzer
#[derive(Debug, Default)]
pub(crate) struct WorkerConfig {
    pub targets: Vec<PathBuf>,
    pub compiler_options: Vec<String>,
    pub indexing_options: IndexingOptions,
    pub ignore_extensions: Vec<String>,
    pub compilation_database: Option<Arc<CompilationDatabase>>,
}

#[derive(Debug, Clone, Copy)]
struct SeenDeclaration {
    docref: DocRef,
    is_placeholder: bool,
}

pub(crate) struct Worker {
    database: rw::Database,
    config: WorkerConfig,
    analyzer: Arc<dyn SourceAnalyzer>,
    cancel: Arc<AtomicBool>,
    events: Option<UnboundedSender<IndexerEvent>>,
    ignored: HashSet<String>,
    /// Dedup cache: declaration site -> document written for it
    seen: HashMap<DeclarationLocation, SeenDeclaration>,
    stats: IndexingStats,
}

impl Worker {
    pub(crate) fn new(
        database: rw::Database,
        config: WorkerConfig,
        analyzer: Arc<dyn SourceAnalyzer>,
        cancel: Arc<AtomicBool>,
        events: Option<UnboundedSender<IndexerEvent>>,
    ) -> Self {
        let ignored = config
            .ignore_extensions
            .iter()
            .map(|ext| ext.trim_start_matches('.').to_ascii_lowercase())
            .collect();

        Self {
            database,
            config,
            analyzer,
            cancel,
            events,
            ignored,
            seen: HashMap::new(),
            stats: IndexingStats::default(),
        }
    }

    /// Process every target, then signal completion
    ///
    /// Returns the database with all writes still uncommitted. A database
    /// error aborts the run; the database is dropped and its writes discarded.
    pub(crate) fn run(mut self) -> Result<rw::Database, DatabaseError> {
        let started = Instant::now();
        info!(
            "Indexing {} target(s) into {} with {}",
            self.config.targets.len(),
            self.database.path().display(),
            self.analyzer.name()
        );

        let targets = std::mem::take(&mut self.config.targets);
        let result = self.process_targets(&targets);
        let cancelled = self.is_cancelled();

        log_timing!(Level::INFO, "indexing", started.elapsed());

        match result {
            Ok(()) => {
                info!(
                    "Indexing {} ({} files, {} declarations, {} references)",
                    if cancelled { "cancelled" } else { "finished" },
                    self.stats.files_indexed,
                    self.stats.declarations,
                    self.stats.references
                );
                self.emit(IndexerEvent::Finished {
                    cancelled,
                    stats: self.stats.clone(),
                });
                Ok(self.database)
            }
            Err(e) => {
                warn!("Indexing aborted by database error: {}", e);
                self.report(None, Severity::Error, format!("Indexing aborted: {e}"));
                self.emit(IndexerEvent::Finished {
                    cancelled,
                    stats: self.stats.clone(),
                });
                Err(e)
            }
        }
    }

    fn is_cancelled(&self) -> bool {
        self.cancel.load(Ordering::Acquire)
    }

    fn emit(&self, event: IndexerEvent) {
        if let Some(events) = &self.events
            && events.send(event).is_err()
        {
            trace!("Indexer event receiver is gone");
        }
    }

    fn report(&mut self, location: Option<SourceLocation>, severity: Severity, text: String) {
        self.stats.diagnostics += 1;
        self.emit(IndexerEvent::Diagnostic {
            location,
            severity,
            text,
        });
    }

    fn process_targets(&mut self, targets: &[PathBuf]) -> Result<(), DatabaseError> {
        for target in targets {
            if self.is_cancelled() {
                debug!("Cancellation observed before target {}", target.display());
                break;
            }
            self.dispatch_target(target)?;
        }
        Ok(())
    }

    fn dispatch_target(&mut self, target: &Path) -> Result<(), DatabaseError> {
        if target.is_file() {
            self.handle_file(target)
        } else if target.is_dir() {
            self.handle_directory(target)
        } else {
            warn!("Target does not exist: {}", target.display());
            self.report(
                None,
                Severity::Warning,
                format!("Target not found: {}", target.display()),
            );
            Ok(())
        }
    }

    fn handle_directory(&mut self, dir: &Path) -> Result<(), DatabaseError> {
        let walker = WalkDir::new(dir)
            .follow_links(false)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(|entry| !(entry.file_type().is_dir() && is_vcs_directory(entry.file_name())));

        for entry in walker {
            if self.is_cancelled() {
                return Ok(());
            }

            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    warn!("Error walking {}: {}", dir.display(), e);
                    continue;
                }
            };

            if entry.file_type().is_file() && self.looks_like_cpp_source(entry.path()) {
                self.handle_file(entry.path())?;
            }
        }

        Ok(())
    }

    fn looks_like_cpp_source(&self, path: &Path) -> bool {
        let Some(ext) = path.extension().and_then(OsStr::to_str) else {
            return false;
        };
        let ext = ext.to_ascii_lowercase();
        CPP_EXTENSIONS.contains(&ext.as_str()) && !self.ignored.contains(&ext)
    }

    fn options_for(&self, path: &Path) -> Vec<String> {
        self.config
            .compilation_database
            .as_ref()
            .and_then(|db| db.options_for(path))
            .unwrap_or_else(|| self.config.compiler_options.clone())
    }

    fn handle_file(&mut self, path: &Path) -> Result<(), DatabaseError> {
        if self.is_cancelled() {
            return Ok(());
        }

        debug!("Indexing {}", path.display());
        let options = self.options_for(path);

        let events = match self.analyzer.analyze(path, &options) {
            Ok(events) => events,
            Err(e) => {
                warn!("Skipping {}: {}", path.display(), e);
                self.stats.files_failed += 1;
                self.report(
                    Some(SourceLocation::new(path, 0, 0)),
                    Severity::Error,
                    e.to_string(),
                );
                return Ok(());
            }
        };

        for (count, event) in events.enumerate() {
            if count > 0 && count % CANCEL_CHECK_INTERVAL == 0 && self.is_cancelled() {
                debug!("Cancellation observed inside {}", path.display());
                return Ok(());
            }
            self.handle_event(event)?;
        }

        self.stats.files_indexed += 1;
        self.emit(IndexerEvent::FileIndexed {
            path: path.to_path_buf(),
        });
        Ok(())
    }

    fn handle_event(&mut self, event: AnalyzerEvent) -> Result<(), DatabaseError> {
        match event {
            AnalyzerEvent::Declaration {
                name,
                kind,
                template_kind,
                location,
                semantic_container,
                lexical_container,
                flags,
            } => {
                if flags.is_implicit && self.config.indexing_options.skip_implicits {
                    trace!("Skipping implicit declaration {} at {}", name, location);
                    return Ok(());
                }
                let semantic_container = semantic_container.and_then(|c| self.resolve_seen(&c));
                let lexical_container = lexical_container.and_then(|c| self.resolve_seen(&c));
                let mut doc = SymbolDocument::declaration(name, kind, self.intern_location(&location));
                doc.template_kind = template_kind;
                doc.semantic_container = semantic_container;
                doc.lexical_container = lexical_container;
                doc.flags = flags;
                self.on_declaration(doc)
            }
            AnalyzerEvent::Reference {
                name,
                kind,
                target,
                location,
            } => self.on_reference(name, kind, &target, &location),
            AnalyzerEvent::Diagnostic {
                location,
                severity,
                text,
            } => {
                self.report(location, severity, text);
                Ok(())
            }
        }
    }

    fn intern_location(&mut self, location: &SourceLocation) -> DeclarationLocation {
        let file_id = self
            .database
            .headers_map_mut()
            .intern(&location.file.to_string_lossy());
        DeclarationLocation::new(file_id, location.line, location.column)
    }

    /// Document already written for a declaration site, without interning
    fn resolve_seen(&self, location: &SourceLocation) -> Option<DocRef> {
        let file_id = self
            .database
            .headers_map()
            .lookup(&location.file.to_string_lossy());
        if file_id == FileIdCache::NOT_FOUND {
            return None;
        }
        self.seen
            .get(&DeclarationLocation::new(file_id, location.line, location.column))
            .map(|seen| seen.docref)
    }

    fn on_declaration(&mut self, doc: SymbolDocument) -> Result<(), DatabaseError> {
        let site = doc.location;

        match self.seen.get(&site).copied() {
            None => {
                trace!("Declaration {} ({}) at {:?}", doc.name, doc.kind, site);
                let docref = self.database.add_document(&doc)?;
                self.seen.insert(
                    site,
                    SeenDeclaration {
                        docref,
                        is_placeholder: false,
                    },
                );
                self.stats.declarations += 1;
            }
            Some(seen) if seen.is_placeholder => {
                trace!("Declaration {} replaces placeholder at {:?}", doc.name, site);
                self.database.replace_document(seen.docref, &doc)?;
                self.seen.insert(
                    site,
                    SeenDeclaration {
                        docref: seen.docref,
                        is_placeholder: false,
                    },
                );
                self.stats.declarations += 1;
            }
            Some(seen) => {
                // Same site seen again (e.g. a header included twice): fold into a reference
                let mut reference =
                    SymbolDocument::reference(doc.name, doc.kind, site, seen.docref);
                reference.template_kind = doc.template_kind;
                reference.semantic_container = doc.semantic_container;
                reference.lexical_container = doc.lexical_container;
                reference.flags = SymbolFlags {
                    is_redeclaration: true,
                    ..doc.flags
                };
                self.database.add_document(&reference)?;
                self.stats.redeclarations += 1;
            }
        }

        Ok(())
    }

    fn on_reference(
        &mut self,
        name: String,
        kind: SymbolKind,
        target: &SourceLocation,
        location: &SourceLocation,
    ) -> Result<(), DatabaseError> {
        let target_site = self.intern_location(target);
        let site = self.intern_location(location);

        let referenced = match self.seen.get(&target_site) {
            Some(seen) => seen.docref,
            None => {
                trace!("Placeholder for {} at {}", name, target);
                let mut placeholder = SymbolDocument::declaration(name.clone(), kind, target_site);
                placeholder.flags.is_placeholder = true;
                let docref = self.database.add_document(&placeholder)?;
                self.seen.insert(
                    target_site,
                    SeenDeclaration {
                        docref,
                        is_placeholder: true,
                    },
                );
                self.stats.placeholders += 1;
                docref
            }
        };

        let reference = SymbolDocument::reference(name, kind, site, referenced);
        self.database.add_document(&reference)?;
        self.stats.references += 1;
        Ok(())
    }
}

fn is_vcs_directory(name: &OsStr) -> bool {
    name.to_str()
        .is_some_and(|name| VCS_DIRECTORIES.contains(&name))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::database::ro;
    use crate::index::document::DocumentRole;
    use crate::index::search::SearchQuery;
    use crate::test_utils::ScriptedAnalyzer;
    use std::fs;
    use tempfile::TempDir;
    use tokio::sync::mpsc;

    struct Fixture {
        _temp_dir: TempDir,
        sources: PathBuf,
        db_path: PathBuf,
    }

    impl Fixture {
        fn new() -> Self {
            let temp_dir = TempDir::new().unwrap();
            let sources = temp_dir.path().join("src");
            let db_path = temp_dir.path().join("db");
            fs::create_dir_all(&sources).unwrap();
            Self {
                _temp_dir: temp_dir,
                sources,
                db_path,
            }
        }

        fn write(&self, relative: &str, script: &str) -> PathBuf {
            let path = self.sources.join(relative);
            fs::create_dir_all(path.parent().unwrap()).unwrap();
            fs::write(&path, script).unwrap();
            path
        }

        fn run(&self, config: WorkerConfig) -> (Vec<IndexerEvent>, ro::Database) {
            let (tx, mut rx) = mpsc::unbounded_channel();
            let database = rw::Database::open(11, &self.db_path).unwrap();
            let worker = Worker::new(
                database,
                config,
                Arc::new(ScriptedAnalyzer),
                Arc::new(AtomicBool::new(false)),
                Some(tx),
            );
            let mut database = worker.run().unwrap();
            database.commit().unwrap();
            drop(database);

            let mut events = Vec::new();
            while let Ok(event) = rx.try_recv() {
                events.push(event);
            }
            (events, ro::Database::open(&self.db_path).unwrap())
        }

        fn config(&self) -> WorkerConfig {
            WorkerConfig {
                targets: vec![self.sources.clone()],
                indexing_options: IndexingOptions::default(),
                ..Default::default()
            }
        }
    }

    fn indexed_files(events: &[IndexerEvent]) -> Vec<String> {
        events
            .iter()
            .filter_map(|event| match event {
                IndexerEvent::FileIndexed { path } => {
                    Some(path.file_name().unwrap().to_string_lossy().to_string())
                }
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_walk_filters_sources_and_skips_vcs() {
        let fixture = Fixture::new();
        fixture.write("b.cpp", "DECL function beta\n");
        fixture.write("a.h", "DECL struct Alpha\n");
        fixture.write("notes.txt", "DECL struct Ignored\n");
        fixture.write(".git/objects/c.cpp", "DECL struct Hidden\n");
        fixture.write("sub/c.hpp", "DECL class Gamma\n");

        let (events, db) = fixture.run(fixture.config());

        assert_eq!(indexed_files(&events), vec!["a.h", "b.cpp", "c.hpp"]);
        assert!(matches!(
            events.last(),
            Some(IndexerEvent::Finished { cancelled: false, .. })
        ));
        assert_eq!(db.document_count().unwrap(), 3);
        assert!(db.search(&SearchQuery::text("Hidden")).unwrap().is_empty());
    }

    #[test]
    fn test_ignore_extensions() {
        let fixture = Fixture::new();
        fixture.write("a.h", "DECL struct Alpha\n");
        fixture.write("b.cpp", "DECL function beta\n");

        let mut config = fixture.config();
        config.ignore_extensions = vec![".h".to_string()];
        let (events, _db) = fixture.run(config);

        assert_eq!(indexed_files(&events), vec!["b.cpp"]);
    }

    #[test]
    fn test_same_location_is_declared_once() {
        let fixture = Fixture::new();
        // The header is a target twice, like a header included from two sources
        let header = fixture.write("widget.h", "DECL class Widget\n");
        let mut config = fixture.config();
        config.targets = vec![header.clone(), header];

        let (_events, db) = fixture.run(config);

        let declarations = db.search(&SearchQuery::text("Widget")).unwrap();
        assert_eq!(declarations.len(), 1);

        let all = db.search(&SearchQuery::parse("refs Widget").unwrap()).unwrap();
        assert_eq!(all.len(), 2);
        let folded: Vec<_> = all.iter().filter(|r| r.role == DocumentRole::Reference).collect();
        assert_eq!(folded.len(), 1);
        assert!(folded[0].flags.is_redeclaration);
        assert_eq!((folded[0].line, folded[0].column), (declarations[0].line, declarations[0].column));
    }

    #[test]
    fn test_distinct_locations_are_distinct_declarations() {
        let fixture = Fixture::new();
        fixture.write("a.h", "DECL function frob\n");
        fixture.write("b.h", "DECL function frob\n");

        let (_events, db) = fixture.run(fixture.config());
        assert_eq!(db.search(&SearchQuery::text("frob")).unwrap().len(), 2);
    }

    #[test]
    fn test_reference_to_unknown_target_creates_placeholder() {
        let fixture = Fixture::new();
        // Line 1 references line 3, which is declared later in the same file
        fixture.write("a.cpp", "REF counter 3 1\n\nDECL variable counter\n");

        let (_events, db) = fixture.run(fixture.config());

        let declarations = db.search(&SearchQuery::text("counter")).unwrap();
        assert_eq!(declarations.len(), 1);
        assert_eq!(declarations[0].kind, SymbolKind::Variable);
        assert!(!declarations[0].flags.is_placeholder);
        assert_eq!(declarations[0].line, 3);
    }

    #[test]
    fn test_container_resolution() {
        let fixture = Fixture::new();
        fixture.write("a.h", "DECL namespace app\nDECL class Widget 1\n");

        let (_events, db) = fixture.run(fixture.config());

        let results = db.search(&SearchQuery::text("Widget")).unwrap();
        assert_eq!(results[0].container.as_deref(), Some("app"));
        assert_eq!(results[0].display_name(), "app::Widget");
    }

    #[test]
    fn test_analyzer_failure_is_not_fatal() {
        let fixture = Fixture::new();
        fixture.write("a.cpp", "FAIL cannot parse\n");
        fixture.write("b.cpp", "WARN unused variable\nDECL function ok\n");

        let (events, db) = fixture.run(fixture.config());

        assert_eq!(indexed_files(&events), vec!["b.cpp"]);
        let diagnostics: Vec<_> = events
            .iter()
            .filter_map(|event| match event {
                IndexerEvent::Diagnostic { severity, text, .. } => Some((*severity, text.clone())),
                _ => None,
            })
            .collect();
        assert_eq!(diagnostics.len(), 2);
        assert_eq!(diagnostics[0].0, Severity::Error);
        assert!(diagnostics[0].1.contains("cannot parse"));
        assert_eq!(diagnostics[1], (Severity::Warning, "unused variable".to_string()));

        match events.last() {
            Some(IndexerEvent::Finished { stats, .. }) => {
                assert_eq!(stats.files_failed, 1);
                assert_eq!(stats.files_indexed, 1);
            }
            other => panic!("Expected Finished, got {other:?}"),
        }
        assert_eq!(db.search(&SearchQuery::text("ok")).unwrap().len(), 1);
    }

    #[test]
    fn test_cancelled_before_start_indexes_nothing() {
        let fixture = Fixture::new();
        fixture.write("a.cpp", "DECL function alpha\n");

        let (tx, mut rx) = mpsc::unbounded_channel();
        let database = rw::Database::open(11, &fixture.db_path).unwrap();
        let worker = Worker::new(
            database,
            fixture.config(),
            Arc::new(ScriptedAnalyzer),
            Arc::new(AtomicBool::new(true)),
            Some(tx),
        );
        let database = worker.run().unwrap();
        assert_eq!(database.pending_writes(), 0);

        assert!(matches!(
            rx.try_recv(),
            Ok(IndexerEvent::Finished { cancelled: true, .. })
        ));
    }

    #[test]
    fn test_missing_target_is_reported() {
        let fixture = Fixture::new();
        let mut config = fixture.config();
        config.targets = vec![fixture.sources.join("missing")];

        let (events, _db) = fixture.run(config);
        assert!(events.iter().any(|event| matches!(
            event,
            IndexerEvent::Diagnostic { severity: Severity::Warning, .. }
        )));
    }
}
