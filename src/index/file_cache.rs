//! Bidirectional file name interning
//!
//! Every location written to a symbol database refers to its file through a
//! small integer id. The mapping is kept per database and persisted alongside
//! the documents as a single serialized blob.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

use crate::index::document::FileId;

/// Serialized form of the cache: the full mapping plus the next-id counter
#[derive(Debug, Serialize, Deserialize)]
struct CacheSnapshot {
    next_id: FileId,
    files: Vec<CacheEntry>,
}

#[derive(Debug, Serialize, Deserialize)]
struct CacheEntry {
    id: FileId,
    filename: String,
}

/// Interning table mapping file names to ids and back
///
/// Ids are assigned monotonically and never reused for the lifetime of a
/// database. Both directions are unique.
#[derive(Debug, Clone, Default)]
pub struct FileIdCache {
    by_id: BTreeMap<FileId, String>,
    by_name: HashMap<String, FileId>,
    next_id: FileId,
    dirty: bool,
}

impl FileIdCache {
    /// Reserved id returned by [`FileIdCache::lookup`] for unknown names
    pub const NOT_FOUND: FileId = FileId::MAX;

    pub fn new() -> Self {
        Self::default()
    }

    /// Get the file name for an id, or an empty string if unknown
    pub fn resolve(&self, id: FileId) -> &str {
        self.by_id.get(&id).map(String::as_str).unwrap_or("")
    }

    /// Get the id of a file name without assigning one
    pub fn lookup(&self, filename: &str) -> FileId {
        self.by_name
            .get(filename)
            .copied()
            .unwrap_or(Self::NOT_FOUND)
    }

    /// Get the id of a file name, assigning the next free id if absent
    pub fn intern(&mut self, filename: &str) -> FileId {
        if let Some(id) = self.by_name.get(filename) {
            return *id;
        }

        let id = self.next_id;
        self.next_id += 1;
        self.by_name.insert(filename.to_string(), id);
        self.by_id.insert(id, filename.to_string());
        self.dirty = true;
        id
    }

    /// All known `(id, file name)` pairs in id order
    pub fn iter(&self) -> impl Iterator<Item = (FileId, &str)> {
        self.by_id.iter().map(|(id, name)| (*id, name.as_str()))
    }

    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }

    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    /// Whether the cache changed since it was last serialized or loaded
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Serialize the whole cache and clear the dirty flag
    pub fn store_to_string(&mut self) -> Result<String, serde_json::Error> {
        let snapshot = CacheSnapshot {
            next_id: self.next_id,
            files: self
                .by_id
                .iter()
                .map(|(id, filename)| CacheEntry {
                    id: *id,
                    filename: filename.clone(),
                })
                .collect(),
        };
        let raw = serde_json::to_string(&snapshot)?;
        self.dirty = false;
        Ok(raw)
    }

    /// Replace the current state with a previously serialized one
    pub fn load_from_str(&mut self, raw: &str) -> Result<(), serde_json::Error> {
        let snapshot: CacheSnapshot = serde_json::from_str(raw)?;

        let mut by_id = BTreeMap::new();
        let mut by_name = HashMap::new();
        for entry in snapshot.files {
            by_name.insert(entry.filename.clone(), entry.id);
            by_id.insert(entry.id, entry.filename);
        }

        // Never hand out an id that is already taken, even if the blob is inconsistent
        let next_after_max = by_id.keys().next_back().map(|id| id + 1).unwrap_or(0);

        self.by_id = by_id;
        self.by_name = by_name;
        self.next_id = snapshot.next_id.max(next_after_max);
        self.dirty = false;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_intern_is_idempotent() {
        let mut cache = FileIdCache::new();
        let first = cache.intern("/src/a.h");
        assert_eq!(cache.len(), 1);

        let second = cache.intern("/src/a.h");
        assert_eq!(first, second);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_ids_are_monotonic() {
        let mut cache = FileIdCache::new();
        let a = cache.intern("/src/a.h");
        let b = cache.intern("/src/b.h");
        let c = cache.intern("/src/c.cpp");
        assert!(a < b && b < c);
        assert_eq!(cache.resolve(b), "/src/b.h");
    }

    #[test]
    fn test_lookup_does_not_mutate() {
        let mut cache = FileIdCache::new();
        assert_eq!(cache.lookup("/src/missing.h"), FileIdCache::NOT_FOUND);
        assert!(cache.is_empty());
        assert!(!cache.is_dirty());

        let id = cache.intern("/src/present.h");
        assert_eq!(cache.lookup("/src/present.h"), id);
        assert_eq!(cache.resolve(12345), "");
    }

    #[test]
    fn test_dirty_flag_lifecycle() {
        let mut cache = FileIdCache::new();
        cache.intern("/src/a.h");
        assert!(cache.is_dirty());

        cache.store_to_string().unwrap();
        assert!(!cache.is_dirty());

        // Re-interning a known name is not a change
        cache.intern("/src/a.h");
        assert!(!cache.is_dirty());
    }

    #[test]
    fn test_load_replaces_state_and_keeps_counter() {
        let mut original = FileIdCache::new();
        original.intern("/src/a.h");
        original.intern("/src/b.h");
        let raw = original.store_to_string().unwrap();

        let mut restored = FileIdCache::new();
        restored.intern("/elsewhere/stale.h");
        restored.load_from_str(&raw).unwrap();

        assert_eq!(restored.len(), 2);
        assert_eq!(restored.lookup("/elsewhere/stale.h"), FileIdCache::NOT_FOUND);
        assert_eq!(restored.lookup("/src/b.h"), original.lookup("/src/b.h"));

        // The next id continues after the restored ones
        let c = restored.intern("/src/c.h");
        assert!(c > restored.lookup("/src/b.h"));
    }

    #[test]
    fn test_load_rejects_garbage() {
        let mut cache = FileIdCache::new();
        assert!(cache.load_from_str("not json").is_err());
    }
}
