//! Fan-out search over every registered read-only database

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;
use tracing::{Level, debug, warn};

use crate::index::database::{IndexDatabase, ro};
use crate::index::document::DbId;
use crate::index::error::DatabaseError;
use crate::index::search::{SearchQuery, SearchResult};
use crate::log_timing;

/// Set of read-only databases queried together
///
/// Members are shared with the collection manager, which decides their
/// lifetime. Membership changes only affect searches started afterwards.
#[derive(Debug, Default)]
pub struct CombinedIndex {
    members: BTreeMap<DbId, Arc<ro::Database>>,
}

impl CombinedIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a database, replacing any previous member with the same id
    ///
    /// Returns the replaced member, if any.
    pub fn add_index(&mut self, database: Arc<ro::Database>) -> Option<Arc<ro::Database>> {
        debug!(
            "Registering database {} ({})",
            database.id(),
            database.path().display()
        );
        let id = database.id();
        let path = database.path().to_path_buf();
        let replaced = self.members.insert(id, database);
        if let Some(previous) = &replaced
            && previous.path() != path
        {
            warn!(
                "Database id {} of {} collides with {}; the latter is no longer searched",
                id,
                path.display(),
                previous.path().display()
            );
        }
        replaced
    }

    /// Unregister a database; returns it if it was a member
    pub fn remove_index(&mut self, id: DbId) -> Option<Arc<ro::Database>> {
        let removed = self.members.remove(&id);
        if removed.is_some() {
            debug!("Unregistered database {}", id);
        }
        removed
    }

    pub fn contains(&self, id: DbId) -> bool {
        self.members.contains_key(&id)
    }

    pub fn ids(&self) -> Vec<DbId> {
        self.members.keys().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    /// Query every member and merge the results
    ///
    /// Any member failing aborts the whole call; no partial results are
    /// returned. Results are ordered by name, then database id, file id and
    /// position, the same key each member sorts by before applying the limit,
    /// so the truncated merge is the top of the full result.
    pub fn search(&self, query: &SearchQuery) -> Result<Vec<SearchResult>, DatabaseError> {
        let started = Instant::now();
        let mut results = Vec::new();

        for database in self.members.values() {
            results.extend(database.search(query)?);
        }

        results.sort_by(|a, b| {
            a.name
                .cmp(&b.name)
                .then(a.db_id.cmp(&b.db_id))
                .then(a.file_id.cmp(&b.file_id))
                .then(a.line.cmp(&b.line))
                .then(a.column.cmp(&b.column))
        });
        results.truncate(query.effective_limit());

        log_timing!(Level::DEBUG, "search", started.elapsed());
        Ok(results)
    }
}
