//! Symbol index core
//!
//! On-disk symbol databases, the background indexer that fills them from a
//! source analyzer, and the combined index that searches several of them at
//! once.

pub mod analyzer;
pub mod combined;
pub mod database;
pub mod document;
pub mod error;
pub mod file_cache;
pub mod indexer;
pub mod search;
mod worker;

pub use analyzer::{AnalyzerError, AnalyzerEvent, Severity, SourceAnalyzer, SourceLocation};
pub use combined::CombinedIndex;
pub use document::{DbId, make_dbid};
pub use error::DatabaseError;
pub use indexer::{Indexer, IndexerError, IndexerEvent, IndexerStatus, IndexingStats};
pub use search::{QueryError, SearchQuery, SearchResult};
