//! Symbol documents stored in a collection database
//!
//! One document is written per declaration or reference event reported by the
//! source analyzer. Documents refer to each other (containers, referenced
//! declarations) through `DocRef` row ids, never through owning pointers.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Short numeric tag written into every document of one collection
pub type DbId = u32;

/// Small integer id of an interned file name
pub type FileId = u32;

/// Reference to a document inside one database (SQLite row id)
pub type DocRef = i64;

/// Derive the short database id of a collection from its UUID
///
/// Takes the first four bytes of SHA-256 over the UUID bytes, so the same
/// collection always gets the same id across rebuilds and restarts.
pub fn make_dbid(id: &Uuid) -> DbId {
    let digest = Sha256::digest(id.as_bytes());
    u32::from_be_bytes([digest[0], digest[1], digest[2], digest[3]])
}

/// Kind of an indexed C/C++ entity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SymbolKind {
    Unexposed,
    Typedef,
    Function,
    Variable,
    Field,
    EnumConstant,
    Enum,
    Struct,
    Union,
    Class,
    Namespace,
    NamespaceAlias,
    StaticVariable,
    StaticMethod,
    InstanceMethod,
    Constructor,
    Destructor,
    ConversionFunction,
    TypeAlias,
    Concept,
    Macro,
}

impl SymbolKind {
    pub const ALL: [SymbolKind; 21] = [
        SymbolKind::Unexposed,
        SymbolKind::Typedef,
        SymbolKind::Function,
        SymbolKind::Variable,
        SymbolKind::Field,
        SymbolKind::EnumConstant,
        SymbolKind::Enum,
        SymbolKind::Struct,
        SymbolKind::Union,
        SymbolKind::Class,
        SymbolKind::Namespace,
        SymbolKind::NamespaceAlias,
        SymbolKind::StaticVariable,
        SymbolKind::StaticMethod,
        SymbolKind::InstanceMethod,
        SymbolKind::Constructor,
        SymbolKind::Destructor,
        SymbolKind::ConversionFunction,
        SymbolKind::TypeAlias,
        SymbolKind::Concept,
        SymbolKind::Macro,
    ];

    /// Stable name used in the database and in `kind:` query modifiers
    pub fn as_str(&self) -> &'static str {
        match self {
            SymbolKind::Unexposed => "unexposed",
            SymbolKind::Typedef => "typedef",
            SymbolKind::Function => "function",
            SymbolKind::Variable => "variable",
            SymbolKind::Field => "field",
            SymbolKind::EnumConstant => "enum-constant",
            SymbolKind::Enum => "enum",
            SymbolKind::Struct => "struct",
            SymbolKind::Union => "union",
            SymbolKind::Class => "class",
            SymbolKind::Namespace => "namespace",
            SymbolKind::NamespaceAlias => "namespace-alias",
            SymbolKind::StaticVariable => "static-variable",
            SymbolKind::StaticMethod => "static-method",
            SymbolKind::InstanceMethod => "method",
            SymbolKind::Constructor => "constructor",
            SymbolKind::Destructor => "destructor",
            SymbolKind::ConversionFunction => "conversion-function",
            SymbolKind::TypeAlias => "type-alias",
            SymbolKind::Concept => "concept",
            SymbolKind::Macro => "macro",
        }
    }

    /// Whether documents of this kind may contain other declarations
    pub fn is_container(&self) -> bool {
        matches!(
            self,
            SymbolKind::Namespace
                | SymbolKind::Struct
                | SymbolKind::Class
                | SymbolKind::Union
                | SymbolKind::Enum
                | SymbolKind::Function
                | SymbolKind::StaticMethod
                | SymbolKind::InstanceMethod
                | SymbolKind::Constructor
                | SymbolKind::Destructor
                | SymbolKind::ConversionFunction
        )
    }
}

impl fmt::Display for SymbolKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SymbolKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        SymbolKind::ALL
            .iter()
            .find(|kind| kind.as_str() == s)
            .copied()
            .ok_or_else(|| format!("unknown symbol kind: {s}"))
    }
}

/// Template flavour of a declaration
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TemplateKind {
    #[default]
    NonTemplate,
    Template,
    PartialSpecialization,
    Specialization,
}

impl TemplateKind {
    pub fn as_i64(&self) -> i64 {
        match self {
            TemplateKind::NonTemplate => 0,
            TemplateKind::Template => 1,
            TemplateKind::PartialSpecialization => 2,
            TemplateKind::Specialization => 3,
        }
    }

    pub fn from_i64(value: i64) -> Self {
        match value {
            1 => TemplateKind::Template,
            2 => TemplateKind::PartialSpecialization,
            3 => TemplateKind::Specialization,
            _ => TemplateKind::NonTemplate,
        }
    }

    /// Prefix used when rendering a kind for humans
    pub fn display_prefix(&self) -> &'static str {
        match self {
            TemplateKind::NonTemplate => "",
            TemplateKind::Template => "template ",
            TemplateKind::PartialSpecialization => "partly specialized template ",
            TemplateKind::Specialization => "fully specialized template ",
        }
    }
}

/// Boolean attributes of a document, stored as a bit mask
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SymbolFlags {
    pub is_static: bool,
    pub is_deprecated: bool,
    pub is_definition: bool,
    pub is_implicit: bool,
    /// Declaration synthesized from a reference whose target was never seen
    pub is_placeholder: bool,
    /// Reference produced by a repeated declaration at an already seen location
    pub is_redeclaration: bool,
}

impl SymbolFlags {
    const STATIC: i64 = 1;
    const DEPRECATED: i64 = 1 << 1;
    const DEFINITION: i64 = 1 << 2;
    const IMPLICIT: i64 = 1 << 3;
    const PLACEHOLDER: i64 = 1 << 4;
    const REDECLARATION: i64 = 1 << 5;

    pub fn bits(&self) -> i64 {
        let mut bits = 0;
        if self.is_static {
            bits |= Self::STATIC;
        }
        if self.is_deprecated {
            bits |= Self::DEPRECATED;
        }
        if self.is_definition {
            bits |= Self::DEFINITION;
        }
        if self.is_implicit {
            bits |= Self::IMPLICIT;
        }
        if self.is_placeholder {
            bits |= Self::PLACEHOLDER;
        }
        if self.is_redeclaration {
            bits |= Self::REDECLARATION;
        }
        bits
    }

    pub fn from_bits(bits: i64) -> Self {
        Self {
            is_static: bits & Self::STATIC != 0,
            is_deprecated: bits & Self::DEPRECATED != 0,
            is_definition: bits & Self::DEFINITION != 0,
            is_implicit: bits & Self::IMPLICIT != 0,
            is_placeholder: bits & Self::PLACEHOLDER != 0,
            is_redeclaration: bits & Self::REDECLARATION != 0,
        }
    }
}

/// Source position of a declaration, keyed by interned file id
///
/// Used as the dedup key during one indexing run: a declaration site is
/// recorded at most once.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DeclarationLocation {
    pub file_id: FileId,
    pub line: u32,
    pub column: u32,
}

impl DeclarationLocation {
    pub fn new(file_id: FileId, line: u32, column: u32) -> Self {
        Self {
            file_id,
            line,
            column,
        }
    }
}

/// Whether a document records a declaration or a reference to one
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DocumentRole {
    Declaration,
    Reference,
}

/// One entry of a symbol database
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SymbolDocument {
    pub name: String,
    pub kind: SymbolKind,
    pub template_kind: TemplateKind,
    pub role: DocumentRole,
    pub location: DeclarationLocation,
    pub semantic_container: Option<DocRef>,
    pub lexical_container: Option<DocRef>,
    /// Declaration this document refers to (references only)
    pub referenced: Option<DocRef>,
    pub flags: SymbolFlags,
}

impl SymbolDocument {
    pub fn declaration(name: impl Into<String>, kind: SymbolKind, location: DeclarationLocation) -> Self {
        Self {
            name: name.into(),
            kind,
            template_kind: TemplateKind::NonTemplate,
            role: DocumentRole::Declaration,
            location,
            semantic_container: None,
            lexical_container: None,
            referenced: None,
            flags: SymbolFlags::default(),
        }
    }

    pub fn reference(
        name: impl Into<String>,
        kind: SymbolKind,
        location: DeclarationLocation,
        referenced: DocRef,
    ) -> Self {
        Self {
            name: name.into(),
            kind,
            template_kind: TemplateKind::NonTemplate,
            role: DocumentRole::Reference,
            location,
            semantic_container: None,
            lexical_container: None,
            referenced: Some(referenced),
            flags: SymbolFlags::default(),
        }
    }
}
