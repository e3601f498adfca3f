//! On-disk symbol database
//!
//! A collection's database is a directory holding one SQLite file. It comes in
//! two capability flavours over the same format:
//! - [`rw::Database`]: opened by the indexer, bound to a database id, buffers
//!   writes in an open transaction until [`rw::Database::commit`]
//! - [`ro::Database`]: opened by the search path, never mutates on-disk state,
//!   safe to query from several threads
//!
//! Both carry the [`FileIdCache`] persisted in the `meta` table.

use rusqlite::types::Value;
use rusqlite::{Connection, OptionalExtension, params, params_from_iter};
use std::path::{Path, PathBuf};
use tracing::{debug, trace, warn};

use crate::index::document::{
    DbId, DeclarationLocation, DocRef, DocumentRole, SymbolDocument, SymbolFlags, SymbolKind,
    TemplateKind,
};
use crate::index::error::DatabaseError;
use crate::index::file_cache::FileIdCache;
use crate::index::search::{SearchQuery, SearchResult};

/// Name of the SQLite file inside a database directory
pub const DATABASE_FILE: &str = "symbols.db";

/// On-disk format version written into the `meta` table
pub const FORMAT_VERSION: u32 = 1;

mod meta_key {
    pub const FORMAT_VERSION: &str = "format_version";
    pub const DBID: &str = "dbid";
    pub const FILES: &str = "files";
    pub const CREATED_AT: &str = "created_at";
}

const SCHEMA: &str = r#"
    CREATE TABLE IF NOT EXISTS meta (
        key TEXT PRIMARY KEY,
        value TEXT NOT NULL
    );

    CREATE TABLE IF NOT EXISTS documents (
        id INTEGER PRIMARY KEY,
        dbid INTEGER NOT NULL,
        name TEXT NOT NULL,
        kind TEXT NOT NULL,
        template_kind INTEGER NOT NULL,
        role TEXT NOT NULL,
        file_id INTEGER NOT NULL,
        line INTEGER NOT NULL,
        col INTEGER NOT NULL,
        semantic_container INTEGER,
        lexical_container INTEGER,
        referenced INTEGER,
        flags INTEGER NOT NULL
    );

    CREATE INDEX IF NOT EXISTS idx_documents_name ON documents(name);
    CREATE INDEX IF NOT EXISTS idx_documents_location ON documents(file_id, line, col);
    CREATE INDEX IF NOT EXISTS idx_documents_referenced ON documents(referenced);
"#;

/// Capabilities shared by both database flavours
pub trait IndexDatabase {
    /// Short numeric id tagging every document of this database
    fn id(&self) -> DbId;

    /// Immutable access to the file name cache
    fn headers_map(&self) -> &FileIdCache;

    /// Database directory
    fn path(&self) -> &Path;
}

fn database_file(dir: &Path) -> PathBuf {
    dir.join(DATABASE_FILE)
}

fn role_to_str(role: DocumentRole) -> &'static str {
    match role {
        DocumentRole::Declaration => "declaration",
        DocumentRole::Reference => "reference",
    }
}

fn role_from_str(value: &str) -> DocumentRole {
    if value == "reference" {
        DocumentRole::Reference
    } else {
        DocumentRole::Declaration
    }
}

fn read_meta(conn: &Connection, key: &str) -> rusqlite::Result<Option<String>> {
    conn.query_row("SELECT value FROM meta WHERE key = ?1", params![key], |row| {
        row.get(0)
    })
    .optional()
}

fn write_meta(conn: &Connection, key: &str, value: &str) -> rusqlite::Result<()> {
    conn.execute(
        "INSERT OR REPLACE INTO meta (key, value) VALUES (?1, ?2)",
        params![key, value],
    )?;
    Ok(())
}

/// Validated header of an existing database
struct MetaHeader {
    dbid: DbId,
    files: FileIdCache,
}

/// Read and validate the `meta` table; any failure means the file is unusable
fn load_header(conn: &Connection, file: &Path) -> Result<Option<MetaHeader>, DatabaseError> {
    let corrupted = |e: rusqlite::Error| DatabaseError::corrupted(file, e.to_string());

    let has_meta: bool = conn
        .query_row(
            "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = 'meta'",
            [],
            |row| row.get::<_, i64>(0),
        )
        .map_err(corrupted)?
        > 0;
    if !has_meta {
        return Ok(None);
    }

    let version = read_meta(conn, meta_key::FORMAT_VERSION).map_err(corrupted)?;
    let Some(version) = version else {
        return Ok(None);
    };
    let version: u32 = version
        .parse()
        .map_err(|_| DatabaseError::corrupted(file, format!("invalid format version '{version}'")))?;
    if version != FORMAT_VERSION {
        return Err(DatabaseError::incompatible_version(version, FORMAT_VERSION));
    }

    let dbid = read_meta(conn, meta_key::DBID)
        .map_err(corrupted)?
        .ok_or_else(|| DatabaseError::corrupted(file, "missing database id"))?;
    let dbid: DbId = dbid
        .parse()
        .map_err(|_| DatabaseError::corrupted(file, format!("invalid database id '{dbid}'")))?;

    let mut files = FileIdCache::new();
    if let Some(raw) = read_meta(conn, meta_key::FILES).map_err(corrupted)? {
        files
            .load_from_str(&raw)
            .map_err(|e| DatabaseError::corrupted(file, format!("file id cache: {e}")))?;
    }

    Ok(Some(MetaHeader { dbid, files }))
}

/// Run a search against one open connection
fn query_documents(
    conn: &Connection,
    files: &FileIdCache,
    dbid: DbId,
    query: &SearchQuery,
) -> Result<Vec<SearchResult>, DatabaseError> {
    let mut sql = String::from(
        "SELECT d.name, d.kind, d.template_kind, d.role, d.file_id, d.line, d.col, d.flags, c.name \
         FROM documents d LEFT JOIN documents c ON c.id = d.semantic_container \
         WHERE d.dbid = ?",
    );
    let mut values: Vec<Value> = vec![Value::Integer(i64::from(dbid))];

    for term in &query.terms {
        sql.push_str(" AND instr(d.name, ?) > 0");
        values.push(Value::Text(term.clone()));
    }

    if !query.kinds.is_empty() {
        let placeholders = vec!["?"; query.kinds.len()].join(", ");
        sql.push_str(&format!(" AND d.kind IN ({placeholders})"));
        values.extend(
            query
                .kinds
                .iter()
                .map(|kind| Value::Text(kind.as_str().to_string())),
        );
    }

    if let Some(pattern) = &query.file {
        // The file table lives in the cache blob, so resolve matching ids here
        let ids: Vec<i64> = files
            .iter()
            .filter(|(_, name)| name.contains(pattern.as_str()))
            .map(|(id, _)| i64::from(id))
            .collect();
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let placeholders = vec!["?"; ids.len()].join(", ");
        sql.push_str(&format!(" AND d.file_id IN ({placeholders})"));
        values.extend(ids.into_iter().map(Value::Integer));
    }

    if query.only_static {
        let static_bit = SymbolFlags {
            is_static: true,
            ..Default::default()
        }
        .bits();
        sql.push_str(&format!(" AND (d.flags & {static_bit}) != 0"));
    }

    if !query.include_references {
        sql.push_str(" AND d.role = 'declaration'");
    }

    sql.push_str(" ORDER BY d.name, d.file_id, d.line, d.col, d.id LIMIT ?");
    values.push(Value::Integer(query.effective_limit() as i64));

    trace!("Search SQL: {}", sql);

    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(params_from_iter(values), |row| {
        Ok((
            row.get::<_, String>(0)?,
            row.get::<_, String>(1)?,
            row.get::<_, i64>(2)?,
            row.get::<_, String>(3)?,
            row.get::<_, i64>(4)?,
            row.get::<_, i64>(5)?,
            row.get::<_, i64>(6)?,
            row.get::<_, i64>(7)?,
            row.get::<_, Option<String>>(8)?,
        ))
    })?;

    let mut results = Vec::new();
    for row in rows {
        let (name, kind, template_kind, role, file_id, line, col, flags, container) = row?;
        let kind = kind.parse::<SymbolKind>().unwrap_or(SymbolKind::Unexposed);
        results.push(SearchResult {
            db_id: dbid,
            name,
            kind,
            template_kind: TemplateKind::from_i64(template_kind),
            role: role_from_str(&role),
            flags: SymbolFlags::from_bits(flags),
            file_id: file_id as u32,
            file: files.resolve(file_id as u32).to_string(),
            line: line as u32,
            column: col as u32,
            container,
        });
    }

    Ok(results)
}

/// Read/write access to a symbol database
pub mod rw {
    use super::*;

    /// Writable database bound to one database id
    ///
    /// All document writes go into an open transaction; they become visible
    /// only after [`Database::commit`]. Dropping the handle without committing
    /// discards them.
    pub struct Database {
        path: PathBuf,
        conn: Connection,
        id: DbId,
        files: FileIdCache,
        pending: usize,
    }

    impl Database {
        /// Open (creating if absent) the database in `path` for writing
        pub fn open(id: DbId, path: &Path) -> Result<Self, DatabaseError> {
            std::fs::create_dir_all(path)?;
            let file = database_file(path);
            let conn = Connection::open(&file)?;

            let files = match load_header(&conn, &file)? {
                Some(header) if header.dbid != id => {
                    return Err(DatabaseError::IdMismatch {
                        found: header.dbid,
                        expected: id,
                    });
                }
                Some(header) => header.files,
                None => {
                    conn.execute_batch(SCHEMA)?;
                    write_meta(&conn, meta_key::FORMAT_VERSION, &FORMAT_VERSION.to_string())?;
                    write_meta(&conn, meta_key::DBID, &id.to_string())?;
                    write_meta(&conn, meta_key::CREATED_AT, &chrono::Utc::now().to_rfc3339())?;
                    FileIdCache::new()
                }
            };

            conn.execute_batch("BEGIN")?;

            debug!("Opened writable database {} (dbid {})", path.display(), id);

            Ok(Self {
                path: path.to_path_buf(),
                conn,
                id,
                files,
                pending: 0,
            })
        }

        /// Mutable access to the file name cache
        pub fn headers_map_mut(&mut self) -> &mut FileIdCache {
            &mut self.files
        }

        /// Number of document writes since the last commit
        pub fn pending_writes(&self) -> usize {
            self.pending
        }

        /// Append a document, returning its reference
        pub fn add_document(&mut self, doc: &SymbolDocument) -> Result<DocRef, DatabaseError> {
            self.conn.execute(
                "INSERT INTO documents \
                 (dbid, name, kind, template_kind, role, file_id, line, col, \
                  semantic_container, lexical_container, referenced, flags) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
                params![
                    i64::from(self.id),
                    doc.name,
                    doc.kind.as_str(),
                    doc.template_kind.as_i64(),
                    role_to_str(doc.role),
                    i64::from(doc.location.file_id),
                    i64::from(doc.location.line),
                    i64::from(doc.location.column),
                    doc.semantic_container,
                    doc.lexical_container,
                    doc.referenced,
                    doc.flags.bits(),
                ],
            )?;
            self.pending += 1;
            Ok(self.conn.last_insert_rowid())
        }

        /// Overwrite an existing document in place
        pub fn replace_document(
            &mut self,
            docref: DocRef,
            doc: &SymbolDocument,
        ) -> Result<(), DatabaseError> {
            self.conn.execute(
                "UPDATE documents SET name = ?1, kind = ?2, template_kind = ?3, role = ?4, \
                 file_id = ?5, line = ?6, col = ?7, semantic_container = ?8, \
                 lexical_container = ?9, referenced = ?10, flags = ?11 WHERE id = ?12",
                params![
                    doc.name,
                    doc.kind.as_str(),
                    doc.template_kind.as_i64(),
                    role_to_str(doc.role),
                    i64::from(doc.location.file_id),
                    i64::from(doc.location.line),
                    i64::from(doc.location.column),
                    doc.semantic_container,
                    doc.lexical_container,
                    doc.referenced,
                    doc.flags.bits(),
                    docref,
                ],
            )?;
            self.pending += 1;
            Ok(())
        }

        /// Read back a document, including uncommitted writes
        pub fn document(&self, docref: DocRef) -> Result<Option<SymbolDocument>, DatabaseError> {
            let doc = self
                .conn
                .query_row(
                    "SELECT name, kind, template_kind, role, file_id, line, col, \
                     semantic_container, lexical_container, referenced, flags \
                     FROM documents WHERE id = ?1",
                    params![docref],
                    |row| {
                        Ok(SymbolDocument {
                            name: row.get(0)?,
                            kind: row
                                .get::<_, String>(1)?
                                .parse()
                                .unwrap_or(SymbolKind::Unexposed),
                            template_kind: TemplateKind::from_i64(row.get(2)?),
                            role: role_from_str(&row.get::<_, String>(3)?),
                            location: DeclarationLocation::new(
                                row.get::<_, i64>(4)? as u32,
                                row.get::<_, i64>(5)? as u32,
                                row.get::<_, i64>(6)? as u32,
                            ),
                            semantic_container: row.get(7)?,
                            lexical_container: row.get(8)?,
                            referenced: row.get(9)?,
                            flags: SymbolFlags::from_bits(row.get(10)?),
                        })
                    },
                )
                .optional()?;
            Ok(doc)
        }

        /// Make every write since the last commit durable, or none of them
        pub fn commit(&mut self) -> Result<(), DatabaseError> {
            let result = self.try_commit();
            if let Err(e) = &result {
                warn!("Commit of {} failed, rolling back: {}", self.path.display(), e);
                if let Err(rollback_err) = self.conn.execute_batch("ROLLBACK") {
                    warn!("Rollback failed: {}", rollback_err);
                }
                self.pending = 0;
            }
            // Always leave the connection inside a fresh transaction
            self.conn.execute_batch("BEGIN")?;
            result
        }

        fn try_commit(&mut self) -> Result<(), DatabaseError> {
            let blob = self.files.store_to_string()?;
            write_meta(&self.conn, meta_key::FILES, &blob)?;
            self.conn.execute_batch("COMMIT")?;
            debug!(
                "Committed {} document writes to {}",
                self.pending,
                self.path.display()
            );
            self.pending = 0;
            Ok(())
        }
    }

    impl IndexDatabase for Database {
        fn id(&self) -> DbId {
            self.id
        }

        fn headers_map(&self) -> &FileIdCache {
            &self.files
        }

        fn path(&self) -> &Path {
            &self.path
        }
    }

    impl std::fmt::Debug for Database {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            f.debug_struct("rw::Database")
                .field("path", &self.path)
                .field("id", &self.id)
                .field("pending", &self.pending)
                .finish()
        }
    }
}

/// Read-only access to a symbol database
pub mod ro {
    use super::*;
    use rusqlite::OpenFlags;
    use std::sync::Mutex;

    /// Read-only database handle, shareable between threads
    pub struct Database {
        path: PathBuf,
        conn: Mutex<Connection>,
        id: DbId,
        files: FileIdCache,
    }

    impl Database {
        /// Open an existing database; fails if it is missing or unreadable
        pub fn open(path: &Path) -> Result<Self, DatabaseError> {
            let file = database_file(path);
            if !path.is_dir() || !file.is_file() {
                return Err(DatabaseError::NotFound {
                    path: path.to_path_buf(),
                });
            }

            let conn = Connection::open_with_flags(
                &file,
                OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
            )
            .map_err(|e| DatabaseError::corrupted(&file, e.to_string()))?;

            let header = load_header(&conn, &file)?
                .ok_or_else(|| DatabaseError::corrupted(&file, "missing database header"))?;

            debug!(
                "Opened read-only database {} (dbid {}, {} files)",
                path.display(),
                header.dbid,
                header.files.len()
            );

            Ok(Self {
                path: path.to_path_buf(),
                conn: Mutex::new(conn),
                id: header.dbid,
                files: header.files,
            })
        }

        fn connection(&self) -> std::sync::MutexGuard<'_, Connection> {
            self.conn.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
        }

        /// Run a query against this database
        pub fn search(&self, query: &SearchQuery) -> Result<Vec<SearchResult>, DatabaseError> {
            let conn = self.connection();
            query_documents(&conn, &self.files, self.id, query)
        }

        /// Total number of documents stored
        pub fn document_count(&self) -> Result<u64, DatabaseError> {
            let conn = self.connection();
            let count: i64 = conn.query_row("SELECT COUNT(*) FROM documents", [], |row| row.get(0))?;
            Ok(count as u64)
        }
    }

    impl IndexDatabase for Database {
        fn id(&self) -> DbId {
            self.id
        }

        fn headers_map(&self) -> &FileIdCache {
            &self.files
        }

        fn path(&self) -> &Path {
            &self.path
        }
    }

    impl std::fmt::Debug for Database {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            f.debug_struct("ro::Database")
                .field("path", &self.path)
                .field("id", &self.id)
                .finish()
        }
    }
}
