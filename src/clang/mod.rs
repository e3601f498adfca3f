//! Clang front-end
//!
//! The production [`crate::index::SourceAnalyzer`]: runs the clang driver on
//! each file and converts its JSON AST dump and stderr diagnostics into
//! analyzer events.

pub mod ast_analyzer;
pub mod diagnostics;
pub mod version;

pub use ast_analyzer::ClangAstAnalyzer;
pub use version::ClangVersion;
