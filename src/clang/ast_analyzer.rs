//! Source analyzer backed by clang's JSON AST dump
//!
//! Runs `clang -fsyntax-only -Xclang -ast-dump=json` on one file and walks
//! the resulting tree. Clang omits `file` and `line` from a location when they
//! equal the previously printed location, so the walk visits every location
//! in print order (`loc`, then `range.begin`, then `range.end`, spelling
//! before expansion for macro locations) to keep the current file and line.

use serde_json::Value;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::Command;
use tracing::{debug, trace};

use crate::clang::diagnostics::DiagnosticParser;
use crate::config::IndexingOptions;
use crate::index::analyzer::EventStream;
use crate::index::document::{SymbolFlags, SymbolKind, TemplateKind};
use crate::index::{AnalyzerError, AnalyzerEvent, SourceAnalyzer, SourceLocation};

/// Driver option naming the directory relative paths are resolved against
const WORKING_DIRECTORY_OPTION: &str = "-working-directory";

pub struct ClangAstAnalyzer {
    clang_path: PathBuf,
    indexing: IndexingOptions,
    diagnostics: DiagnosticParser,
}

impl ClangAstAnalyzer {
    pub fn new(
        clang_path: impl Into<PathBuf>,
        indexing: IndexingOptions,
    ) -> Result<Self, regex::Error> {
        Ok(Self {
            clang_path: clang_path.into(),
            indexing,
            diagnostics: DiagnosticParser::new()?,
        })
    }

    pub fn clang_path(&self) -> &Path {
        &self.clang_path
    }

    fn command(&self, file: &Path, options: &[String]) -> Command {
        let mut command = Command::new(&self.clang_path);
        command
            .args(["-fsyntax-only", "-Xclang", "-ast-dump=json"])
            .args(options)
            .arg(file);
        command
    }

    /// Turn clang's output into events
    fn events_from_output(
        &self,
        file: &Path,
        options: &[String],
        stdout: &[u8],
        stderr: &str,
        success: bool,
    ) -> Result<Vec<AnalyzerEvent>, AnalyzerError> {
        let base_dir = working_directory(options);
        let diagnostics = self.diagnostics.parse(stderr, base_dir.as_deref());

        if stdout.iter().all(u8::is_ascii_whitespace) {
            if success {
                return Ok(diagnostics);
            }
            let reason = stderr
                .lines()
                .find(|line| line.contains("error"))
                .unwrap_or("clang produced no AST")
                .to_string();
            return Err(AnalyzerError::failed(file, reason));
        }

        let ast: Value =
            serde_json::from_slice(stdout).map_err(|e| AnalyzerError::parse(file, e.to_string()))?;

        let mut walker = AstWalker::new(&self.indexing, base_dir);
        walker.visit(&ast, TemplateKind::NonTemplate);
        let mut events = walker.events;
        trace!("{} events from the AST of {}", events.len(), file.display());
        events.extend(diagnostics);
        Ok(events)
    }
}

impl SourceAnalyzer for ClangAstAnalyzer {
    fn analyze(&self, file: &Path, options: &[String]) -> Result<EventStream, AnalyzerError> {
        debug!("Running {} on {}", self.clang_path.display(), file.display());
        let output = self.command(file, options).output()?;
        let stderr = String::from_utf8_lossy(&output.stderr);
        let events = self.events_from_output(
            file,
            options,
            &output.stdout,
            &stderr,
            output.status.success(),
        )?;
        Ok(Box::new(events.into_iter()))
    }

    fn name(&self) -> &str {
        "clang"
    }
}

fn working_directory(options: &[String]) -> Option<PathBuf> {
    let position = options.iter().position(|o| o == WORKING_DIRECTORY_OPTION)?;
    options.get(position + 1).map(PathBuf::from)
}

/// Current file and line while reading clang's elided locations
#[derive(Debug, Default)]
struct LocationCursor {
    base_dir: Option<PathBuf>,
    file: Option<PathBuf>,
    line: u32,
}

impl LocationCursor {
    fn read(&mut self, location: &Value) -> Option<SourceLocation> {
        let object = location.as_object()?;
        if object.contains_key("spellingLoc") || object.contains_key("expansionLoc") {
            if let Some(spelling) = object.get("spellingLoc") {
                self.read(spelling);
            }
            return object.get("expansionLoc").and_then(|l| self.read(l));
        }

        if let Some(file) = object.get("file").and_then(Value::as_str) {
            let file = Path::new(file);
            self.file = Some(match &self.base_dir {
                Some(base) if file.is_relative() => base.join(file),
                _ => file.to_path_buf(),
            });
        }
        if let Some(line) = object.get("line").and_then(Value::as_u64) {
            self.line = line as u32;
        }

        let column = object.get("col").and_then(Value::as_u64)?;
        let file = self.file.clone()?;
        Some(SourceLocation::new(file, self.line, column as u32))
    }
}

/// Emitted declaration remembered for resolving references by clang node id
#[derive(Debug)]
struct SeenDeclaration {
    name: String,
    kind: SymbolKind,
    location: SourceLocation,
}

struct AstWalker<'a> {
    options: &'a IndexingOptions,
    cursor: LocationCursor,
    last_location: Option<SourceLocation>,
    seen: HashMap<String, SeenDeclaration>,
    /// Locations of the emitted containers enclosing the current node
    scopes: Vec<SourceLocation>,
    function_depth: usize,
    events: Vec<AnalyzerEvent>,
}

impl<'a> AstWalker<'a> {
    fn new(options: &'a IndexingOptions, base_dir: Option<PathBuf>) -> Self {
        Self {
            options,
            cursor: LocationCursor {
                base_dir,
                ..Default::default()
            },
            last_location: None,
            seen: HashMap::new(),
            scopes: Vec::new(),
            function_depth: 0,
            events: Vec::new(),
        }
    }

    fn visit(&mut self, node: &Value, template_kind: TemplateKind) {
        let Some(object) = node.as_object() else {
            return;
        };
        let clang_kind = object.get("kind").and_then(Value::as_str).unwrap_or_default();
        let location = self.read_locations(object, clang_kind);

        let children_template = if is_template_wrapper(clang_kind) {
            TemplateKind::Template
        } else {
            TemplateKind::NonTemplate
        };

        let mut scoped = false;
        if clang_kind.ends_with("Decl") {
            if !is_template_wrapper(clang_kind)
                && let Some(container) = self.declare(object, clang_kind, location, template_kind)
            {
                self.scopes.push(container);
                scoped = true;
            }
        } else {
            self.reference(object, clang_kind, location);
        }

        let is_function = is_function_kind(clang_kind);
        if is_function {
            self.function_depth += 1;
        }
        if let Some(inner) = object.get("inner").and_then(Value::as_array) {
            for child in inner {
                self.visit(child, children_template);
            }
        }
        if is_function {
            self.function_depth -= 1;
        }
        if scoped {
            self.scopes.pop();
        }
    }

    /// Consume every location of a node in print order; returns the node's own position
    fn read_locations(
        &mut self,
        object: &serde_json::Map<String, Value>,
        clang_kind: &str,
    ) -> Option<SourceLocation> {
        let loc = object.get("loc").and_then(|l| self.cursor.read(l));
        let (begin, end) = match object.get("range") {
            Some(range) => (
                range.get("begin").and_then(|l| self.cursor.read(l)),
                range.get("end").and_then(|l| self.cursor.read(l)),
            ),
            None => (None, None),
        };

        // A member access is reported at the member name, not the base expression
        let location = if clang_kind == "MemberExpr" {
            end.or(begin)
        } else {
            loc.or(begin)
        };
        if location.is_some() {
            self.last_location.clone_from(&location);
        }
        location
    }

    /// Emit a declaration; returns its location when it opens a container scope
    fn declare(
        &mut self,
        object: &serde_json::Map<String, Value>,
        clang_kind: &str,
        location: Option<SourceLocation>,
        template_kind: TemplateKind,
    ) -> Option<SourceLocation> {
        let kind = symbol_kind(clang_kind, object)?;
        let name = object
            .get("name")
            .and_then(Value::as_str)
            .filter(|name| !name.is_empty())?;
        let location = location?;

        let is_implicit = flag(object, "isImplicit");
        if is_implicit && self.options.skip_implicits {
            return None;
        }
        let is_local = self.function_depth > 0 || clang_kind == "ParmVarDecl";
        if is_local && !self.options.index_locals {
            return None;
        }

        let flags = SymbolFlags {
            is_static: storage_class(object) == Some("static"),
            is_deprecated: has_child_kind(object, "DeprecatedAttr"),
            is_definition: is_definition(clang_kind, object),
            is_implicit,
            ..Default::default()
        };
        let template_kind = match clang_kind {
            "ClassTemplateSpecializationDecl" => TemplateKind::Specialization,
            "ClassTemplatePartialSpecializationDecl" => TemplateKind::PartialSpecialization,
            _ => template_kind,
        };

        let lexical_container = self.scopes.last().cloned();
        // Out-of-line members name their semantic parent explicitly
        let semantic_container = object
            .get("parentDeclContextId")
            .and_then(Value::as_str)
            .and_then(|id| self.seen.get(id))
            .map(|parent| parent.location.clone())
            .or_else(|| lexical_container.clone());

        if let Some(id) = object.get("id").and_then(Value::as_str) {
            self.seen.insert(
                id.to_string(),
                SeenDeclaration {
                    name: name.to_string(),
                    kind,
                    location: location.clone(),
                },
            );
        }

        self.events.push(AnalyzerEvent::Declaration {
            name: name.to_string(),
            kind,
            template_kind,
            location: location.clone(),
            semantic_container,
            lexical_container,
            flags,
        });

        kind.is_container().then_some(location)
    }

    fn reference(
        &mut self,
        object: &serde_json::Map<String, Value>,
        clang_kind: &str,
        location: Option<SourceLocation>,
    ) {
        let target = match clang_kind {
            "DeclRefExpr" => object.get("referencedDecl").and_then(|d| d.get("id")),
            "MemberExpr" => object.get("referencedMemberDecl"),
            "RecordType" | "EnumType" | "TypedefType" | "InjectedClassNameType" => {
                object.get("decl").and_then(|d| d.get("id"))
            }
            _ => None,
        };
        let Some(target) = target
            .and_then(Value::as_str)
            .and_then(|id| self.seen.get(id))
        else {
            return;
        };
        // Type nodes carry no location; use the closest preceding one
        let Some(location) = location.or_else(|| self.last_location.clone()) else {
            return;
        };
        if location == target.location {
            return;
        }

        self.events.push(AnalyzerEvent::Reference {
            name: target.name.clone(),
            kind: target.kind,
            target: target.location.clone(),
            location,
        });
    }
}

fn flag(object: &serde_json::Map<String, Value>, key: &str) -> bool {
    object.get(key).and_then(Value::as_bool).unwrap_or(false)
}

fn storage_class(object: &serde_json::Map<String, Value>) -> Option<&str> {
    object.get("storageClass").and_then(Value::as_str)
}

fn has_child_kind(object: &serde_json::Map<String, Value>, kind: &str) -> bool {
    object
        .get("inner")
        .and_then(Value::as_array)
        .is_some_and(|inner| {
            inner
                .iter()
                .any(|child| child.get("kind").and_then(Value::as_str) == Some(kind))
        })
}

fn is_template_wrapper(clang_kind: &str) -> bool {
    matches!(
        clang_kind,
        "ClassTemplateDecl" | "FunctionTemplateDecl" | "VarTemplateDecl" | "TypeAliasTemplateDecl"
    )
}

fn is_function_kind(clang_kind: &str) -> bool {
    matches!(
        clang_kind,
        "FunctionDecl"
            | "CXXMethodDecl"
            | "CXXConstructorDecl"
            | "CXXDestructorDecl"
            | "CXXConversionDecl"
            | "CXXDeductionGuideDecl"
    )
}

fn is_definition(clang_kind: &str, object: &serde_json::Map<String, Value>) -> bool {
    match clang_kind {
        "CXXRecordDecl"
        | "RecordDecl"
        | "ClassTemplateSpecializationDecl"
        | "ClassTemplatePartialSpecializationDecl" => flag(object, "completeDefinition"),
        "EnumDecl" => has_child_kind(object, "EnumConstantDecl"),
        "VarDecl" => storage_class(object) != Some("extern"),
        kind if is_function_kind(kind) => {
            has_child_kind(object, "CompoundStmt") || has_child_kind(object, "CXXTryStmt")
        }
        "NamespaceDecl" | "FieldDecl" | "EnumConstantDecl" => true,
        _ => false,
    }
}

/// Map a clang declaration kind; `None` for declarations that are never indexed
fn symbol_kind(clang_kind: &str, object: &serde_json::Map<String, Value>) -> Option<SymbolKind> {
    let is_static = storage_class(object) == Some("static");
    let kind = match clang_kind {
        "FunctionDecl" => SymbolKind::Function,
        "CXXMethodDecl" if is_static => SymbolKind::StaticMethod,
        "CXXMethodDecl" => SymbolKind::InstanceMethod,
        "CXXConstructorDecl" => SymbolKind::Constructor,
        "CXXDestructorDecl" => SymbolKind::Destructor,
        "CXXConversionDecl" => SymbolKind::ConversionFunction,
        "VarDecl" if is_static => SymbolKind::StaticVariable,
        "VarDecl" | "ParmVarDecl" => SymbolKind::Variable,
        "FieldDecl" => SymbolKind::Field,
        "EnumConstantDecl" => SymbolKind::EnumConstant,
        "EnumDecl" => SymbolKind::Enum,
        "CXXRecordDecl"
        | "RecordDecl"
        | "ClassTemplateSpecializationDecl"
        | "ClassTemplatePartialSpecializationDecl" => {
            match object.get("tagUsed").and_then(Value::as_str) {
                Some("struct") => SymbolKind::Struct,
                Some("union") => SymbolKind::Union,
                _ => SymbolKind::Class,
            }
        }
        "NamespaceDecl" => SymbolKind::Namespace,
        "NamespaceAliasDecl" => SymbolKind::NamespaceAlias,
        "TypedefDecl" => SymbolKind::Typedef,
        "TypeAliasDecl" => SymbolKind::TypeAlias,
        "ConceptDecl" => SymbolKind::Concept,
        "TranslationUnitDecl"
        | "LinkageSpecDecl"
        | "UsingDirectiveDecl"
        | "AccessSpecDecl"
        | "TemplateTypeParmDecl"
        | "NonTypeTemplateParmDecl"
        | "TemplateTemplateParmDecl"
        | "StaticAssertDecl"
        | "FriendDecl"
        | "EmptyDecl" => return None,
        _ => SymbolKind::Unexposed,
    };
    Some(kind)
}

#[cfg(test)]
mod tests {
    use super::*;

    /// `-ast-dump=json` of:
    ///
    /// ```cpp
    /// namespace app {
    /// class Widget {
    /// public:
    ///     int size() const;
    ///     static Widget* create();
    /// };
    ///
    /// int run(Widget& w) {
    ///   int n = w.size();
    ///   Widget::create();
    /// }
    /// }
    /// ```
    const WIDGET_AST: &str = r#"{
  "id": "0x1", "kind": "TranslationUnitDecl", "loc": {}, "range": {"begin": {}, "end": {}},
  "inner": [
    {"id": "0x10", "kind": "NamespaceDecl",
     "loc": {"offset": 10, "file": "/src/widget.h", "line": 1, "col": 11, "tokLen": 3},
     "range": {"begin": {"offset": 0, "col": 1, "tokLen": 9}, "end": {"offset": 200, "line": 12, "col": 1, "tokLen": 1}},
     "name": "app",
     "inner": [
       {"id": "0x20", "kind": "CXXRecordDecl",
        "loc": {"offset": 30, "line": 2, "col": 7, "tokLen": 6},
        "range": {"begin": {"offset": 24, "col": 1, "tokLen": 5}, "end": {"offset": 90, "line": 6, "col": 1, "tokLen": 1}},
        "name": "Widget", "tagUsed": "class", "completeDefinition": true,
        "inner": [
          {"id": "0x21", "kind": "CXXRecordDecl",
           "loc": {"offset": 30, "line": 2, "col": 7, "tokLen": 6},
           "range": {"begin": {"offset": 24, "col": 1, "tokLen": 5}, "end": {"offset": 30, "col": 7, "tokLen": 6}},
           "isImplicit": true, "name": "Widget", "tagUsed": "class"},
          {"id": "0x22", "kind": "CXXMethodDecl",
           "loc": {"offset": 50, "line": 4, "col": 9, "tokLen": 4},
           "range": {"begin": {"offset": 46, "col": 5, "tokLen": 3}, "end": {"offset": 61, "col": 20, "tokLen": 5}},
           "name": "size", "type": {"qualType": "int () const"}},
          {"id": "0x23", "kind": "CXXMethodDecl",
           "loc": {"offset": 78, "line": 5, "col": 20, "tokLen": 6},
           "range": {"begin": {"offset": 63, "col": 5, "tokLen": 6}, "end": {"offset": 85, "col": 27, "tokLen": 1}},
           "name": "create", "storageClass": "static",
           "inner": [{"id": "0x24", "kind": "DeprecatedAttr", "range": {"begin": {"offset": 63, "col": 5, "tokLen": 6}, "end": {"offset": 63, "col": 5, "tokLen": 6}}}]}
        ]},
       {"id": "0x30", "kind": "FunctionDecl",
        "loc": {"offset": 100, "line": 8, "col": 5, "tokLen": 3},
        "range": {"begin": {"offset": 96, "col": 1, "tokLen": 3}, "end": {"offset": 150, "line": 11, "col": 1, "tokLen": 1}},
        "name": "run",
        "inner": [
          {"id": "0x31", "kind": "ParmVarDecl",
           "loc": {"offset": 112, "col": 17, "tokLen": 1},
           "range": {"begin": {"offset": 104, "col": 9, "tokLen": 6}, "end": {"offset": 112, "col": 17, "tokLen": 1}},
           "name": "w", "type": {"qualType": "Widget &"}},
          {"id": "0x32", "kind": "CompoundStmt",
           "range": {"begin": {"offset": 115, "col": 20, "tokLen": 1}, "end": {"offset": 150, "line": 11, "col": 1, "tokLen": 1}},
           "inner": [
             {"id": "0x33", "kind": "DeclStmt",
              "range": {"begin": {"offset": 120, "line": 9, "col": 3, "tokLen": 3}, "end": {"offset": 135, "col": 18, "tokLen": 1}},
              "inner": [
                {"id": "0x34", "kind": "VarDecl",
                 "loc": {"offset": 124, "col": 7, "tokLen": 1},
                 "range": {"begin": {"offset": 120, "col": 3, "tokLen": 3}, "end": {"offset": 134, "col": 17, "tokLen": 1}},
                 "name": "n",
                 "inner": [
                   {"id": "0x35", "kind": "CXXMemberCallExpr",
                    "range": {"begin": {"offset": 128, "col": 11, "tokLen": 1}, "end": {"offset": 134, "col": 17, "tokLen": 1}},
                    "inner": [
                      {"id": "0x36", "kind": "MemberExpr",
                       "range": {"begin": {"offset": 128, "col": 11, "tokLen": 1}, "end": {"offset": 130, "col": 13, "tokLen": 4}},
                       "name": "size", "isArrow": false, "referencedMemberDecl": "0x22",
                       "inner": [
                         {"id": "0x37", "kind": "DeclRefExpr",
                          "range": {"begin": {"offset": 128, "col": 11, "tokLen": 1}, "end": {"offset": 128, "col": 11, "tokLen": 1}},
                          "referencedDecl": {"id": "0x31", "kind": "ParmVarDecl", "name": "w"}}
                       ]}
                    ]}
                 ]}
              ]},
             {"id": "0x38", "kind": "CallExpr",
              "range": {"begin": {"offset": 140, "line": 10, "col": 3, "tokLen": 6}, "end": {"offset": 148, "col": 18, "tokLen": 1}},
              "inner": [
                {"id": "0x39", "kind": "DeclRefExpr",
                 "range": {"begin": {"offset": 140, "col": 3, "tokLen": 6}, "end": {"offset": 148, "col": 11, "tokLen": 6}},
                 "referencedDecl": {"id": "0x23", "kind": "CXXMethodDecl", "name": "create"}}
              ]}
           ]}
        ]}
     ]}
  ]
}"#;

    fn walk(options: &IndexingOptions) -> Vec<AnalyzerEvent> {
        let analyzer = ClangAstAnalyzer::new("clang", options.clone()).unwrap();
        analyzer
            .events_from_output(
                Path::new("/src/widget.h"),
                &[],
                WIDGET_AST.as_bytes(),
                "",
                true,
            )
            .unwrap()
    }

    fn declarations(events: &[AnalyzerEvent]) -> Vec<(String, SymbolKind, u32, u32)> {
        events
            .iter()
            .filter_map(|event| match event {
                AnalyzerEvent::Declaration {
                    name,
                    kind,
                    location,
                    ..
                } => Some((name.clone(), *kind, location.line, location.column)),
                _ => None,
            })
            .collect()
    }

    fn at(line: u32, column: u32) -> SourceLocation {
        SourceLocation::new("/src/widget.h", line, column)
    }

    #[test]
    fn test_declarations_with_elided_locations() {
        let events = walk(&IndexingOptions::default());
        assert_eq!(
            declarations(&events),
            vec![
                ("app".to_string(), SymbolKind::Namespace, 1, 11),
                ("Widget".to_string(), SymbolKind::Class, 2, 7),
                ("size".to_string(), SymbolKind::InstanceMethod, 4, 9),
                ("create".to_string(), SymbolKind::StaticMethod, 5, 20),
                ("run".to_string(), SymbolKind::Function, 8, 5),
            ]
        );
    }

    #[test]
    fn test_containers_and_flags() {
        let events = walk(&IndexingOptions::default());
        let create = events
            .iter()
            .find(|e| matches!(e, AnalyzerEvent::Declaration { name, .. } if name == "create"))
            .unwrap();
        match create {
            AnalyzerEvent::Declaration {
                semantic_container,
                lexical_container,
                flags,
                ..
            } => {
                assert_eq!(semantic_container.as_ref(), Some(&at(2, 7)));
                assert_eq!(lexical_container.as_ref(), Some(&at(2, 7)));
                assert!(flags.is_static);
                assert!(flags.is_deprecated);
                assert!(!flags.is_definition);
            }
            _ => unreachable!(),
        }

        let run = events
            .iter()
            .find(|e| matches!(e, AnalyzerEvent::Declaration { name, .. } if name == "run"))
            .unwrap();
        assert!(matches!(
            run,
            AnalyzerEvent::Declaration { semantic_container: Some(c), flags, .. }
                if *c == at(1, 11) && flags.is_definition
        ));
    }

    #[test]
    fn test_references_to_seen_declarations() {
        let events = walk(&IndexingOptions::default());
        let references: Vec<_> = events
            .iter()
            .filter_map(|event| match event {
                AnalyzerEvent::Reference {
                    name,
                    target,
                    location,
                    ..
                } => Some((name.as_str(), target.clone(), location.clone())),
                _ => None,
            })
            .collect();
        // The parameter `w` is local and not indexed, so its use is dropped
        assert_eq!(
            references,
            vec![
                ("size", at(4, 9), at(9, 13)),
                ("create", at(5, 20), at(10, 3)),
            ]
        );
    }

    #[test]
    fn test_index_locals_and_implicits() {
        let options = IndexingOptions {
            index_locals: true,
            skip_implicits: false,
        };
        let events = walk(&options);
        let names: Vec<_> = declarations(&events)
            .into_iter()
            .map(|(name, _, line, _)| (name, line))
            .collect();
        assert_eq!(
            names,
            vec![
                ("app".to_string(), 1),
                ("Widget".to_string(), 2),
                ("Widget".to_string(), 2),
                ("size".to_string(), 4),
                ("create".to_string(), 5),
                ("run".to_string(), 8),
                ("w".to_string(), 8),
                ("n".to_string(), 9),
            ]
        );

        let w_used = events.iter().any(|event| {
            matches!(event, AnalyzerEvent::Reference { name, location, .. }
                if name == "w" && *location == at(9, 11))
        });
        assert!(w_used);
    }

    #[test]
    fn test_macro_locations_use_expansion() {
        let mut cursor = LocationCursor::default();
        let location: Value = serde_json::from_str(
            r#"{
                "spellingLoc": {"offset": 5, "file": "/src/macros.h", "line": 3, "col": 9, "tokLen": 3},
                "expansionLoc": {"offset": 80, "file": "/src/a.cpp", "line": 12, "col": 1, "tokLen": 6}
            }"#,
        )
        .unwrap();
        assert_eq!(
            cursor.read(&location),
            Some(SourceLocation::new("/src/a.cpp", 12, 1))
        );

        // Elided file and line continue from the expansion location
        let next: Value = serde_json::from_str(r#"{"offset": 90, "col": 4, "tokLen": 1}"#).unwrap();
        assert_eq!(cursor.read(&next), Some(SourceLocation::new("/src/a.cpp", 12, 4)));
    }

    #[test]
    fn test_relative_files_use_working_directory() {
        let options = vec![
            WORKING_DIRECTORY_OPTION.to_string(),
            "/build".to_string(),
            "-DNDEBUG".to_string(),
        ];
        assert_eq!(working_directory(&options), Some(PathBuf::from("/build")));

        let mut cursor = LocationCursor {
            base_dir: working_directory(&options),
            ..Default::default()
        };
        let location: Value =
            serde_json::from_str(r#"{"file": "src/a.cpp", "line": 2, "col": 3}"#).unwrap();
        assert_eq!(
            cursor.read(&location),
            Some(SourceLocation::new("/build/src/a.cpp", 2, 3))
        );
    }

    #[test]
    fn test_output_failures() {
        let analyzer = ClangAstAnalyzer::new("clang", IndexingOptions::default()).unwrap();
        let file = Path::new("/src/gone.cpp");

        let failed = analyzer.events_from_output(
            file,
            &[],
            b"",
            "clang: error: no such file or directory: '/src/gone.cpp'\n",
            false,
        );
        assert!(matches!(
            failed,
            Err(AnalyzerError::Failed { reason, .. }) if reason.contains("no such file")
        ));

        let garbage = analyzer.events_from_output(file, &[], b"{not json", "", false);
        assert!(matches!(garbage, Err(AnalyzerError::Parse { .. })));

        // Errors in the source still produce an AST; diagnostics come after it
        let events = analyzer
            .events_from_output(
                file,
                &[],
                br#"{"id": "0x1", "kind": "TranslationUnitDecl", "loc": {}, "range": {"begin": {}, "end": {}}}"#,
                "/src/gone.cpp:1:1: error: expected expression\n",
                false,
            )
            .unwrap();
        assert_eq!(events.len(), 1);
        assert!(matches!(events[0], AnalyzerEvent::Diagnostic { .. }));
    }

    #[test]
    fn test_missing_binary_is_spawn_error() {
        let analyzer = ClangAstAnalyzer::new(
            "/nonexistent/bin/clang-does-not-exist",
            IndexingOptions::default(),
        )
        .unwrap();
        let result = analyzer.analyze(Path::new("/src/a.cpp"), &[]);
        assert!(matches!(result, Err(AnalyzerError::Spawn(_))));
    }

    #[cfg(feature = "clang-integration-tests")]
    #[test]
    fn test_real_clang() {
        let temp_dir = tempfile::TempDir::new().unwrap();
        let source = temp_dir.path().join("main.cpp");
        std::fs::write(
            &source,
            "namespace app {\nstruct Widget {\n  int size() const { return 1; }\n};\n}\n\
             int main() {\n  app::Widget w;\n  return w.size();\n}\n",
        )
        .unwrap();

        let analyzer = ClangAstAnalyzer::new(
            crate::test_utils::get_test_clang_path(),
            IndexingOptions::default(),
        )
        .unwrap();
        let events: Vec<_> = analyzer
            .analyze(&source, &["-std=c++17".to_string()])
            .unwrap()
            .collect();

        let declared = declarations(&events);
        assert!(declared.contains(&("Widget".to_string(), SymbolKind::Struct, 2, 8)));
        assert!(declared.contains(&("size".to_string(), SymbolKind::InstanceMethod, 3, 7)));
        assert!(events.iter().any(|event| matches!(
            event,
            AnalyzerEvent::Reference { name, location, .. } if name == "size" && location.line == 8
        )));
    }
}
