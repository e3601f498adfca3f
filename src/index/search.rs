//! Search queries and results
//!
//! Queries are plain strings with optional keyword modifiers:
//! `kind:<kind>`, `file:<substring>`, `static` and `refs`. All remaining
//! words are case-sensitive name substrings that must all match.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::index::document::{DbId, DocumentRole, SymbolFlags, SymbolKind, TemplateKind};

/// Default number of results returned per database
pub const DEFAULT_SEARCH_LIMIT: usize = 200;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum QueryError {
    #[error("Empty search query")]
    Empty,

    #[error("Unknown symbol kind in query: {0}")]
    UnknownKind(String),
}

/// Structured search query
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SearchQuery {
    /// Name substrings, all of which must occur in a matching name
    pub terms: Vec<String>,
    /// Restrict to these kinds (any of)
    pub kinds: Vec<SymbolKind>,
    /// Restrict to files whose path contains this substring
    pub file: Option<String>,
    /// Only documents flagged static
    pub only_static: bool,
    /// Also return reference documents, not only declarations
    pub include_references: bool,
    /// Maximum results per database
    pub limit: Option<usize>,
}

impl SearchQuery {
    /// Create a simple name substring query
    pub fn text(text: &str) -> Self {
        Self {
            terms: vec![text.to_string()],
            ..Default::default()
        }
    }

    /// Parse a query string with keyword modifiers
    pub fn parse(input: &str) -> Result<Self, QueryError> {
        let mut query = SearchQuery::default();

        for word in input.split_whitespace() {
            if let Some(kind) = word.strip_prefix("kind:") {
                let kind = kind
                    .parse::<SymbolKind>()
                    .map_err(|_| QueryError::UnknownKind(kind.to_string()))?;
                query.kinds.push(kind);
            } else if let Some(file) = word.strip_prefix("file:") {
                query.file = Some(file.to_string());
            } else if word == "static" {
                query.only_static = true;
            } else if word == "refs" {
                query.include_references = true;
            } else {
                query.terms.push(word.to_string());
            }
        }

        if query.terms.is_empty() && query.kinds.is_empty() && query.file.is_none() {
            return Err(QueryError::Empty);
        }

        Ok(query)
    }

    /// Add a limit to the query
    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn effective_limit(&self) -> usize {
        self.limit.unwrap_or(DEFAULT_SEARCH_LIMIT)
    }
}

/// One matching document, tagged with the database it came from
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchResult {
    pub db_id: DbId,
    pub name: String,
    pub kind: SymbolKind,
    pub template_kind: TemplateKind,
    pub role: DocumentRole,
    pub flags: SymbolFlags,
    /// Id of `file` in its database's file cache; only meaningful per database
    #[serde(skip)]
    pub file_id: u32,
    pub file: String,
    pub line: u32,
    pub column: u32,
    /// Name of the semantic container (namespace, class, function)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub container: Option<String>,
}

impl SearchResult {
    /// Human-readable kind, e.g. `static template function`
    pub fn kind_label(&self) -> String {
        let mut label = String::new();
        if self.flags.is_static {
            label.push_str("static ");
        }
        label.push_str(self.template_kind.display_prefix());
        label.push_str(self.kind.as_str());
        label
    }

    /// Fully qualified-ish display name using the container
    pub fn display_name(&self) -> String {
        match &self.container {
            Some(container) => format!("{}::{}", container, self.name),
            None => self.name.clone(),
        }
    }
}
