//! Collection lifecycle manager
//!
//! Owns every collection, the combined index and the single rebuild slot.
//! All state lives on the caller's (control) thread; the only background
//! work is the active indexer's worker, whose events are consumed through
//! [`CollectionManager::pump_events`] or [`CollectionManager::wait_for_rebuild`].
//!
//! A rebuild writes into `<path>.reindexing` and is promoted only after the
//! worker finished without cancellation and the commit succeeded:
//! the live directory is renamed to `<path>.old`, the shadow renamed into its
//! place, then the old directory is deleted.

use serde::Serialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tracing::{Level, debug, error, info, warn};
use uuid::Uuid;
use walkdir::WalkDir;

use crate::collection::error::{CollectionError, RebuildRefusal, SwapStage};
use crate::collection::manifest::{MANIFEST_FILE, Manifest, is_transient_dir};
use crate::collection::notification::{DiagnosticRecord, Notification, RebuildOutcome};
use crate::collection::{Collection, CollectionStatus};
use crate::config::Settings;
use crate::index::database::{IndexDatabase, ro, rw};
use crate::index::{
    CombinedIndex, DatabaseError, DbId, Indexer, IndexerEvent, IndexerStatus, IndexingStats,
    SearchQuery, SearchResult, Severity, SourceAnalyzer,
};
use crate::log_timing;
use crate::project::compilation_database::CompilationDatabase;

/// How often `wait_for_rebuild` polls the indexer's event channel
const EVENT_POLL_INTERVAL: Duration = Duration::from_millis(20);

/// One search result together with the collection it came from
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SearchHit {
    pub collection: String,
    #[serde(flatten)]
    pub result: SearchResult,
}

/// The single rebuild allowed at any time
struct ActiveRebuild {
    collection: Uuid,
    indexer: Indexer,
    events: UnboundedReceiver<IndexerEvent>,
    started: Instant,
}

/// What the pump found on the event channel
enum PumpStep {
    Event(IndexerEvent),
    WorkerLost,
}

/// Why a finished rebuild was not promoted
enum RebuildEnd {
    Cancelled(IndexingStats),
    Failed(CollectionError),
}

pub struct CollectionManager {
    settings: Settings,
    collections: BTreeMap<Uuid, Collection>,
    combined: CombinedIndex,
    analyzer: Arc<dyn SourceAnalyzer>,
    active: Mutex<Option<ActiveRebuild>>,
    notifications: UnboundedSender<Notification>,
}

impl CollectionManager {
    /// Create a manager; nothing is read from disk until [`Self::load`]
    pub fn new(
        settings: Settings,
        analyzer: Arc<dyn SourceAnalyzer>,
    ) -> (Self, UnboundedReceiver<Notification>) {
        let (notifications, receiver) = mpsc::unbounded_channel();
        let manager = Self {
            settings,
            collections: BTreeMap::new(),
            combined: CombinedIndex::new(),
            analyzer,
            active: Mutex::new(None),
            notifications,
        };
        (manager, receiver)
    }

    // ========================================================================
    // Settings and reporting
    // ========================================================================

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn settings_mut(&mut self) -> &mut Settings {
        &mut self.settings
    }

    pub fn save_settings(&self) -> Result<(), CollectionError> {
        self.settings.save()?;
        Ok(())
    }

    fn persist_settings(&self) {
        if let Err(e) = self.settings.save() {
            warn!("Failed to save settings: {}", e);
            self.report(DiagnosticRecord::new(
                Severity::Warning,
                format!("Failed to save settings: {e}"),
            ));
        }
    }

    fn notify(&self, notification: Notification) {
        if self.notifications.send(notification).is_err() {
            debug!("Notification receiver is gone");
        }
    }

    fn report(&self, record: DiagnosticRecord) {
        match record.severity {
            Severity::Debug => debug!("{}", record),
            Severity::Info => info!("{}", record),
            Severity::Warning => warn!("{}", record),
            Severity::Error => error!("{}", record),
        }
        self.notify(Notification::Diagnostic(record));
    }

    fn report_error(&self, error: &CollectionError) {
        self.report(DiagnosticRecord::new(Severity::Error, error.to_string()));
    }

    /// Report an error and hand it back for returning
    fn fail(&self, error: CollectionError) -> CollectionError {
        self.report_error(&error);
        error
    }

    fn slot(&self) -> MutexGuard<'_, Option<ActiveRebuild>> {
        self.active
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn set_status(&mut self, id: Uuid, status: CollectionStatus) {
        if let Some(collection) = self.collections.get_mut(&id)
            && collection.status != status
        {
            info!("Collection '{}' is now {}", collection.name(), status);
            collection.status = status;
            self.notify(Notification::StatusChanged { id, status });
        }
    }

    // ========================================================================
    // Lookup
    // ========================================================================

    pub fn collection(&self, id: Uuid) -> Option<&Collection> {
        self.collections.get(&id)
    }

    fn get(&self, id: Uuid) -> Result<&Collection, CollectionError> {
        self.collections
            .get(&id)
            .ok_or_else(|| CollectionError::NotFound(id.to_string()))
    }

    fn get_mut(&mut self, id: Uuid) -> Result<&mut Collection, CollectionError> {
        self.collections
            .get_mut(&id)
            .ok_or_else(|| CollectionError::NotFound(id.to_string()))
    }

    /// All collections ordered by name
    pub fn collections(&self) -> Vec<&Collection> {
        let mut collections: Vec<_> = self.collections.values().collect();
        collections.sort_by(|a, b| a.name().cmp(b.name()).then(a.id().cmp(&b.id())));
        collections
    }

    /// Collection with this name, preferring an enabled one
    pub fn find_by_name(&self, name: &str) -> Option<&Collection> {
        let mut matches = self.collections.values().filter(|c| c.name() == name);
        let first = matches.next()?;
        if first.is_enabled() {
            return Some(first);
        }
        matches.find(|c| c.is_enabled()).or(Some(first))
    }

    pub fn find_by_db_id(&self, db_id: DbId) -> Option<&Collection> {
        self.collections.values().find(|c| c.db_id() == db_id)
    }

    /// Resolve a UUID or a collection name
    pub fn resolve(&self, key: &str) -> Result<Uuid, CollectionError> {
        if let Ok(id) = Uuid::parse_str(key)
            && self.collections.contains_key(&id)
        {
            return Ok(id);
        }
        self.find_by_name(key)
            .map(Collection::id)
            .ok_or_else(|| CollectionError::NotFound(key.to_string()))
    }

    /// Collection currently being rebuilt
    pub fn active_rebuild(&self) -> Option<Uuid> {
        self.slot().as_ref().map(|active| active.collection)
    }

    pub fn combined_index(&self) -> &CombinedIndex {
        &self.combined
    }

    // ========================================================================
    // Loading
    // ========================================================================

    /// Discover collections under the base directory and enable the ones
    /// recorded as enabled in the settings
    ///
    /// Invalid manifests are reported and skipped. Returns the number of
    /// collections loaded.
    pub fn load(&mut self) -> Result<usize, CollectionError> {
        let base_dir = self.settings.base_dir.clone();
        std::fs::create_dir_all(&base_dir)?;

        let walker = WalkDir::new(&base_dir)
            .min_depth(2)
            .max_depth(2)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(|entry| {
                !(entry.depth() == 1
                    && entry.file_name().to_str().is_some_and(is_transient_dir))
            });

        let mut loaded = 0;
        for entry in walker {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    warn!("Error walking {}: {}", base_dir.display(), e);
                    continue;
                }
            };
            if !entry.file_type().is_file() || entry.file_name() != MANIFEST_FILE {
                continue;
            }

            match Manifest::load(entry.path()) {
                Ok(manifest) if self.collections.contains_key(&manifest.uuid) => {
                    self.report(DiagnosticRecord::new(
                        Severity::Warning,
                        format!(
                            "Skipping {}: duplicate collection id {}",
                            entry.path().display(),
                            manifest.uuid
                        ),
                    ));
                }
                Ok(manifest) => {
                    info!("Loaded collection '{}' ({})", manifest.name, manifest.uuid);
                    self.collections
                        .insert(manifest.uuid, Collection::new(manifest));
                    loaded += 1;
                }
                Err(e) => self.report_error(&e),
            }
        }

        let to_enable: Vec<Uuid> = self
            .collections
            .keys()
            .filter(|id| self.settings.is_enabled(id))
            .copied()
            .collect();
        for id in to_enable {
            if self.open_collection(id).is_err() {
                debug!("Collection {} stays disabled", id);
            }
        }

        info!(
            "Loaded {} collection(s) from {}, {} enabled",
            loaded,
            base_dir.display(),
            self.combined.len()
        );
        Ok(loaded)
    }

    /// Drop all in-memory state and load again from disk
    pub fn reset(&mut self) -> Result<usize, CollectionError> {
        self.abort_active_rebuild();
        self.combined = CombinedIndex::new();
        self.collections.clear();
        self.load()
    }

    // ========================================================================
    // Collection metadata
    // ========================================================================

    /// Allocate a new collection with an empty manifest
    pub fn create_collection(&mut self, name: &str) -> Result<Uuid, CollectionError> {
        let id = Uuid::new_v4();
        let path = self.settings.base_dir.join(id.to_string());
        std::fs::create_dir_all(&path)?;

        let manifest = Manifest::new(id, name, path);
        manifest.save()?;

        info!("Created collection '{}' ({})", name, id);
        self.collections.insert(id, Collection::new(manifest));
        self.notify(Notification::StatusChanged {
            id,
            status: CollectionStatus::Unknown,
        });
        Ok(id)
    }

    /// Disable and delete a collection
    ///
    /// Refused while the collection is being rebuilt. Deleting the directory
    /// is best effort; failures are reported but the collection is gone.
    pub fn remove_collection(&mut self, id: Uuid) -> Result<(), CollectionError> {
        let collection = self.get(id)?;
        let name = collection.name().to_string();
        if collection.status() == CollectionStatus::Reindexing || self.active_rebuild() == Some(id)
        {
            return Err(self.fail(CollectionError::RemovalRefused {
                name,
                reason: "collection is being rebuilt".to_string(),
            }));
        }

        self.close_collection(id);
        let collection = self
            .collections
            .remove(&id)
            .ok_or_else(|| CollectionError::NotFound(id.to_string()))?;
        if self.settings.set_enabled(id, false) {
            self.persist_settings();
        }

        let manifest = collection.manifest();
        for dir in [
            manifest.path.clone(),
            manifest.shadow_path(),
            manifest.backup_path(),
        ] {
            if dir.exists()
                && let Err(e) = std::fs::remove_dir_all(&dir)
            {
                self.report(DiagnosticRecord::new(
                    Severity::Warning,
                    format!("Failed to delete {}: {}", dir.display(), e),
                ));
            }
        }

        info!("Removed collection '{}' ({})", name, id);
        self.notify(Notification::CollectionRemoved { id, name });
        Ok(())
    }

    /// Save a changed copy of the manifest and adopt it only once it is on disk
    fn update_manifest(
        &mut self,
        id: Uuid,
        change: impl FnOnce(&mut Manifest),
    ) -> Result<(), CollectionError> {
        let mut manifest = self.get(id)?.manifest().clone();
        change(&mut manifest);
        if let Err(e) = manifest.save() {
            return Err(self.fail(e));
        }
        self.get_mut(id)?.manifest = manifest;
        Ok(())
    }

    pub fn rename_collection(&mut self, id: Uuid, name: &str) -> Result<(), CollectionError> {
        self.update_manifest(id, |manifest| manifest.name = name.to_string())?;
        let status = self.get(id)?.status();
        info!("Renamed collection {} to '{}'", id, name);
        self.notify(Notification::StatusChanged { id, status });
        Ok(())
    }

    pub fn set_comment(&mut self, id: Uuid, comment: &str) -> Result<(), CollectionError> {
        self.update_manifest(id, |manifest| manifest.comment = comment.to_string())
    }

    /// Use a compile_commands.json for per-file options on the next rebuild
    pub fn set_compile_commands(
        &mut self,
        id: Uuid,
        path: Option<PathBuf>,
    ) -> Result<(), CollectionError> {
        self.update_manifest(id, |manifest| manifest.compile_commands = path)
    }

    pub fn add_target(&mut self, id: Uuid, target: PathBuf) -> Result<(), CollectionError> {
        if self.get(id)?.targets().contains(&target) {
            return Err(self.fail(CollectionError::DuplicateTarget { path: target }));
        }
        debug!("Adding target {} to '{}'", target.display(), self.get(id)?.name());
        self.update_manifest(id, |manifest| manifest.targets.push(target))
    }

    pub fn remove_target(&mut self, id: Uuid, index: usize) -> Result<PathBuf, CollectionError> {
        let len = self.get(id)?.targets().len();
        if index >= len {
            return Err(self.fail(CollectionError::TargetOutOfRange { index, len }));
        }
        let removed = self.get(id)?.targets()[index].clone();
        self.update_manifest(id, |manifest| {
            manifest.targets.remove(index);
        })?;
        Ok(removed)
    }

    // ========================================================================
    // Enable / disable
    // ========================================================================

    /// Open and register (or unregister and close) a collection's database
    pub fn enable(&mut self, id: Uuid, enabled: bool) -> Result<(), CollectionError> {
        let collection = self.get(id)?;
        if collection.status() == CollectionStatus::Reindexing {
            let name = collection.name().to_string();
            return Err(self.fail(CollectionError::Reindexing { name }));
        }

        if enabled {
            self.open_collection(id)
        } else {
            self.close_collection(id);
            self.set_status(id, CollectionStatus::Unknown);
            if self.settings.set_enabled(id, false) {
                self.persist_settings();
            }
            Ok(())
        }
    }

    fn open_collection(&mut self, id: Uuid) -> Result<(), CollectionError> {
        self.try_open_collection(id).map_err(|e| self.fail(e))
    }

    /// Open read-only and register; leaves status `Unknown` on failure
    fn try_open_collection(&mut self, id: Uuid) -> Result<(), CollectionError> {
        let collection = self.get(id)?;
        if collection.is_enabled() {
            return Ok(());
        }
        let name = collection.name().to_string();
        let expected = collection.db_id();

        let opened = ro::Database::open(collection.path()).and_then(|db| {
            if db.id() == expected {
                Ok(db)
            } else {
                Err(DatabaseError::IdMismatch {
                    found: db.id(),
                    expected,
                })
            }
        });

        match opened {
            Ok(database) => {
                let database = Arc::new(database);
                if let Some(replaced) = self.combined.add_index(Arc::clone(&database)) {
                    self.report(DiagnosticRecord::new(
                        Severity::Warning,
                        format!(
                            "Database id {} of '{}' collides with {}, which is no longer searched",
                            expected,
                            name,
                            replaced.path().display()
                        ),
                    ));
                }
                self.get_mut(id)?.database = Some(database);
                self.set_status(id, CollectionStatus::Ok);
                if self.settings.set_enabled(id, true) {
                    self.persist_settings();
                }
                info!("Enabled collection '{}'", name);
                Ok(())
            }
            Err(source) => {
                self.set_status(id, CollectionStatus::Unknown);
                Err(CollectionError::DatabaseOpenFailure { name, source })
            }
        }
    }

    /// Unregister and drop the read-only handle; status is left to the caller
    fn close_collection(&mut self, id: Uuid) {
        if let Some(collection) = self.collections.get_mut(&id)
            && collection.database.take().is_some()
        {
            self.combined.remove_index(collection.db_id);
            info!("Disabled collection '{}'", collection.name());
        }
    }

    // ========================================================================
    // Rebuild
    // ========================================================================

    /// Start rebuilding a collection into its shadow directory
    pub fn rebuild(&mut self, id: Uuid) -> Result<(), CollectionError> {
        if let Some(active) = self.active_rebuild() {
            let active = self
                .collections
                .get(&active)
                .map(|c| c.name().to_string())
                .unwrap_or_else(|| active.to_string());
            return Err(self.fail(RebuildRefusal::AlreadyActive { active }.into()));
        }

        let collection = self.get(id)?;
        let manifest = collection.manifest().clone();
        let db_id = collection.db_id();
        if manifest.targets.is_empty() {
            return Err(self.fail(
                RebuildRefusal::NoTargets {
                    name: manifest.name,
                }
                .into(),
            ));
        }

        let shadow = manifest.shadow_path();
        if shadow.exists()
            && let Err(source) = std::fs::remove_dir_all(&shadow)
        {
            return Err(self.fail(RebuildRefusal::ShadowCleanup { path: shadow, source }.into()));
        }

        let database = match rw::Database::open(db_id, &shadow) {
            Ok(database) => database,
            Err(e) => return Err(self.fail(RebuildRefusal::Database(e).into())),
        };

        let (sender, events) = mpsc::unbounded_channel();
        let mut indexer =
            Indexer::new(database, Arc::clone(&self.analyzer)).with_event_sender(sender);
        if let Some(path) = &manifest.compile_commands {
            match CompilationDatabase::new(path.clone()) {
                Ok(db) => {
                    info!(
                        "Using {} ({} entries) for per-file options",
                        db.path().display(),
                        db.entry_count()
                    );
                    indexer = indexer.with_compilation_database(db);
                }
                Err(e) => self.report(DiagnosticRecord::new(
                    Severity::Warning,
                    format!("Ignoring compilation database {}: {}", path.display(), e),
                )),
            }
        }
        indexer
            .set_compiler_options(self.settings.compiler_options())
            .set_indexing_options(self.settings.indexing.clone())
            .set_ignore_extensions(self.settings.ignore_extensions.clone());
        for target in &manifest.targets {
            indexer.add_target(target);
        }

        // Readers must not see the live database while it is being replaced
        self.close_collection(id);
        self.set_status(id, CollectionStatus::Reindexing);

        if let Err(e) = indexer.start() {
            drop(indexer);
            self.abandon_rebuild(id, &manifest);
            return Err(self.fail(RebuildRefusal::Indexer(e).into()));
        }

        info!("Reindexing started for '{}'", manifest.name);
        self.notify(Notification::ReindexingStarted {
            id,
            name: manifest.name.clone(),
        });
        *self.slot() = Some(ActiveRebuild {
            collection: id,
            indexer,
            events,
            started: Instant::now(),
        });
        Ok(())
    }

    /// Request cancellation of the active rebuild; completion is asynchronous
    pub fn stop_rebuild(&self) -> Result<(), CollectionError> {
        let slot = self.slot();
        let active = slot.as_ref().ok_or(CollectionError::NoActiveRebuild)?;
        if active.indexer.stop().is_err() {
            debug!("Worker already finished, nothing to stop");
        }
        info!("Stopping reindexing of {}", active.collection);
        Ok(())
    }

    /// Handle every pending indexer event without blocking
    ///
    /// Returns the outcome if the active rebuild finished during this call.
    pub fn pump_events(&mut self) -> Option<RebuildOutcome> {
        loop {
            let (id, step) = {
                let mut slot = self.slot();
                let active = slot.as_mut()?;
                let step = match active.events.try_recv() {
                    Ok(event) => PumpStep::Event(event),
                    // Finished is queued before the worker exits, so look once more
                    Err(_) if active.indexer.status() == IndexerStatus::Stopped => {
                        match active.events.try_recv() {
                            Ok(event) => PumpStep::Event(event),
                            Err(_) => PumpStep::WorkerLost,
                        }
                    }
                    Err(_) => return None,
                };
                (active.collection, step)
            };

            let outcome = match step {
                PumpStep::Event(event) => self.handle_indexer_event(id, event),
                PumpStep::WorkerLost => {
                    warn!("Indexer worker exited without finishing");
                    Some(self.finish_rebuild(None))
                }
            };
            if outcome.is_some() {
                return outcome;
            }
        }
    }

    /// Wait until the active rebuild finishes, handling its events
    ///
    /// Returns `None` immediately if no rebuild is active.
    pub async fn wait_for_rebuild(&mut self) -> Option<RebuildOutcome> {
        loop {
            if let Some(outcome) = self.pump_events() {
                return Some(outcome);
            }
            self.active_rebuild()?;
            tokio::time::sleep(EVENT_POLL_INTERVAL).await;
        }
    }

    fn handle_indexer_event(&mut self, id: Uuid, event: IndexerEvent) -> Option<RebuildOutcome> {
        match event {
            IndexerEvent::FileIndexed { path } => {
                debug!("indexing {}", path.display());
                self.notify(Notification::IndexingFile { id, path });
                None
            }
            IndexerEvent::Diagnostic {
                location,
                severity,
                text,
            } => {
                self.report(DiagnosticRecord::new(severity, text).with_location(location));
                None
            }
            IndexerEvent::Finished { cancelled, stats } => {
                Some(self.finish_rebuild(Some((cancelled, stats))))
            }
        }
    }

    fn finish_rebuild(&mut self, finished: Option<(bool, IndexingStats)>) -> RebuildOutcome {
        let Some(active) = self.slot().take() else {
            return RebuildOutcome::Failed {
                reason: "no active rebuild".to_string(),
            };
        };
        let id = active.collection;
        let started = active.started;

        let Some(manifest) = self.collections.get(&id).map(|c| c.manifest().clone()) else {
            return RebuildOutcome::Failed {
                reason: format!("collection {id} disappeared during rebuild"),
            };
        };

        let outcome = match self.complete_rebuild(id, &manifest, active.indexer, finished) {
            Ok(stats) => {
                info!("Reindexing of '{}' finished", manifest.name);
                RebuildOutcome::Completed { stats }
            }
            Err(RebuildEnd::Cancelled(stats)) => {
                info!("Reindexing of '{}' cancelled", manifest.name);
                RebuildOutcome::Cancelled { stats }
            }
            Err(RebuildEnd::Failed(error)) => {
                self.report_error(&error);
                RebuildOutcome::Failed {
                    reason: error.to_string(),
                }
            }
        };

        log_timing!(Level::INFO, "rebuild", started.elapsed());
        self.notify(Notification::ReindexingFinished {
            id,
            name: manifest.name,
            outcome: outcome.clone(),
        });
        outcome
    }

    /// Commit, promote and reopen; on any failure leave the status consistent
    fn complete_rebuild(
        &mut self,
        id: Uuid,
        manifest: &Manifest,
        mut indexer: Indexer,
        finished: Option<(bool, IndexingStats)>,
    ) -> Result<IndexingStats, RebuildEnd> {
        let joined = indexer.join();
        let (cancelled, stats) = finished.unwrap_or_default();

        if let Err(source) = joined {
            drop(indexer);
            self.abandon_rebuild(id, manifest);
            return Err(RebuildEnd::Failed(CollectionError::RebuildFailed {
                name: manifest.name.clone(),
                source,
            }));
        }

        if cancelled {
            drop(indexer);
            self.abandon_rebuild(id, manifest);
            return Err(RebuildEnd::Cancelled(stats));
        }

        if let Err(source) = indexer.commit() {
            drop(indexer);
            self.abandon_rebuild(id, manifest);
            return Err(RebuildEnd::Failed(CollectionError::swap_failure(
                &manifest.name,
                SwapStage::Commit,
                source,
            )));
        }

        // The writable database must be closed before its directory moves
        drop(indexer);

        if let Err(e) = self.swap(manifest) {
            self.mark_unavailable(id);
            return Err(RebuildEnd::Failed(e));
        }

        self.reload_manifest(id).map_err(RebuildEnd::Failed)?;
        self.try_open_collection(id).map_err(RebuildEnd::Failed)?;
        Ok(stats)
    }

    /// Promote the shadow directory over the live one
    fn swap(&self, manifest: &Manifest) -> Result<(), CollectionError> {
        let name = manifest.name.as_str();
        let live = &manifest.path;
        let shadow = manifest.shadow_path();
        let old = manifest.backup_path();

        manifest
            .save_to(&shadow)
            .map_err(|e| CollectionError::swap_failure(name, SwapStage::CopyManifest, e))?;

        if old.exists() {
            std::fs::remove_dir_all(&old)
                .map_err(|e| CollectionError::swap_failure(name, SwapStage::MoveAside, e))?;
        }

        let had_live = live.exists();
        if had_live {
            std::fs::rename(live, &old)
                .map_err(|e| CollectionError::swap_failure(name, SwapStage::MoveAside, e))?;
        }

        if let Err(e) = std::fs::rename(&shadow, live) {
            if had_live && let Err(restore) = std::fs::rename(&old, live) {
                error!(
                    "Failed to move {} back to {}: {}",
                    old.display(),
                    live.display(),
                    restore
                );
            }
            return Err(CollectionError::swap_failure(name, SwapStage::Promote, e));
        }

        if had_live && let Err(e) = std::fs::remove_dir_all(&old) {
            let error = CollectionError::swap_failure(name, SwapStage::RemoveOld, e);
            self.report(DiagnosticRecord::new(Severity::Warning, error.to_string()));
        }

        info!("Promoted rebuilt database of '{}'", name);
        Ok(())
    }

    /// Re-read the live manifest; an unreadable one marks the collection `Invalid`
    fn reload_manifest(&mut self, id: Uuid) -> Result<(), CollectionError> {
        let file = self.get(id)?.manifest().manifest_file();
        match Manifest::load(&file) {
            Ok(reloaded) => {
                self.get_mut(id)?.manifest = reloaded;
                Ok(())
            }
            Err(e) => {
                self.set_status(id, CollectionStatus::Invalid);
                Err(e)
            }
        }
    }

    fn discard_shadow(&self, manifest: &Manifest) {
        let shadow = manifest.shadow_path();
        if shadow.exists()
            && let Err(e) = std::fs::remove_dir_all(&shadow)
        {
            warn!("Failed to remove {}: {}", shadow.display(), e);
        }
    }

    /// Status `Unknown`, and not re-enabled by the next `load`
    fn mark_unavailable(&mut self, id: Uuid) {
        self.set_status(id, CollectionStatus::Unknown);
        if self.settings.set_enabled(id, false) {
            self.persist_settings();
        }
    }

    fn abandon_rebuild(&mut self, id: Uuid, manifest: &Manifest) {
        self.discard_shadow(manifest);
        self.mark_unavailable(id);
    }

    fn abort_active_rebuild(&mut self) {
        let active = self.slot().take();
        if let Some(active) = active {
            let id = active.collection;
            if active.indexer.stop().is_err() {
                debug!("Worker already finished");
            }
            // Dropping the indexer joins the worker and closes the database
            drop(active);
            if let Some(manifest) = self.collections.get(&id).map(|c| c.manifest().clone()) {
                self.abandon_rebuild(id, &manifest);
            }
        }
    }

    // ========================================================================
    // Search
    // ========================================================================

    /// Search all enabled collections
    pub fn search(&self, query: &SearchQuery) -> Result<Vec<SearchHit>, CollectionError> {
        let results = self
            .combined
            .search(query)
            .map_err(|e| self.fail(CollectionError::SearchFailure(e)))?;

        Ok(results
            .into_iter()
            .map(|result| SearchHit {
                collection: self
                    .find_by_db_id(result.db_id)
                    .map(|c| c.name().to_string())
                    .unwrap_or_default(),
                result,
            })
            .collect())
    }

    /// Parse a keyword query string and search
    pub fn search_text(
        &self,
        text: &str,
        limit: Option<usize>,
    ) -> Result<Vec<SearchHit>, CollectionError> {
        let mut query = SearchQuery::parse(text)?;
        if let Some(limit) = limit {
            query = query.with_limit(limit);
        }
        self.search(&query)
    }

    /// Base directory of a collection's live database
    pub fn collection_path(&self, id: Uuid) -> Option<&Path> {
        self.collections.get(&id).map(Collection::path)
    }
}

impl Drop for CollectionManager {
    fn drop(&mut self) {
        self.abort_active_rebuild();
    }
}
