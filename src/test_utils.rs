//! Test utilities and global setup
//!
//! Provides centralized test logging configuration and scripted analyzers
//! that stand in for clang in unit tests.

/// Test logging utilities
#[cfg(all(test, feature = "test-logging"))]
pub mod logging {
    use std::sync::Once;
    use tracing_subscriber::{EnvFilter, fmt};

    static INIT: Once = Once::new();

    /// Initialize test logging globally - safe to call multiple times
    ///
    /// Respects `RUST_LOG` (default: `debug`) and writes through the test
    /// writer so output is captured per test.
    ///
    /// ```bash
    /// RUST_LOG=cpp_symbol_index::collection=trace cargo test --features test-logging
    /// ```
    pub fn init() {
        INIT.call_once(|| {
            let env_filter =
                EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("debug"));

            fmt()
                .with_env_filter(env_filter)
                .with_test_writer()
                .with_target(true)
                .with_thread_ids(true)
                .compact()
                .try_init()
                .ok();
        });
    }
}

/// Clang binary for integration tests
///
/// Checks the `CLANG_PATH` environment variable and falls back to `clang`.
#[cfg(all(test, feature = "clang-integration-tests"))]
pub fn get_test_clang_path() -> String {
    std::env::var("CLANG_PATH").unwrap_or_else(|_| "clang".to_string())
}

#[cfg(test)]
pub use scripted::{GatedAnalyzer, ScriptedAnalyzer};

/// Analyzers driven by the content of the "source" file itself
///
/// Each line of a scripted file is one instruction; line numbers of the
/// instructions become the reported source lines:
///
/// ```text
/// DECL <kind> <name> [container-line] [static|implicit|definition|deprecated]...
/// REF <name> <line> <column>
/// WARN <text>
/// FAIL <reason>
/// ```
///
/// Blank lines are skipped. Containers and reference targets always point
/// into the same file.
#[cfg(test)]
mod scripted {
    use std::path::Path;
    use std::sync::{Condvar, Mutex};

    use crate::index::analyzer::EventStream;
    use crate::index::document::{SymbolFlags, SymbolKind, TemplateKind};
    use crate::index::{AnalyzerError, AnalyzerEvent, Severity, SourceAnalyzer, SourceLocation};

    #[derive(Debug, Default)]
    pub struct ScriptedAnalyzer;

    impl ScriptedAnalyzer {
        fn parse_line(
            file: &Path,
            line_no: u32,
            line: &str,
        ) -> Result<Option<AnalyzerEvent>, AnalyzerError> {
            let here = SourceLocation::new(file, line_no, 1);
            let mut words = line.split_whitespace();
            let Some(command) = words.next() else {
                return Ok(None);
            };
            let malformed = || AnalyzerError::parse(file, format!("line {line_no}: {line}"));

            match command {
                "DECL" => {
                    let kind = words
                        .next()
                        .and_then(|k| k.parse::<SymbolKind>().ok())
                        .ok_or_else(malformed)?;
                    let name = words.next().ok_or_else(malformed)?;
                    let mut container = None;
                    let mut flags = SymbolFlags::default();
                    for word in words {
                        match word {
                            "static" => flags.is_static = true,
                            "implicit" => flags.is_implicit = true,
                            "definition" => flags.is_definition = true,
                            "deprecated" => flags.is_deprecated = true,
                            other => {
                                let line = other.parse::<u32>().map_err(|_| malformed())?;
                                container = Some(SourceLocation::new(file, line, 1));
                            }
                        }
                    }
                    Ok(Some(AnalyzerEvent::Declaration {
                        name: name.to_string(),
                        kind,
                        template_kind: TemplateKind::NonTemplate,
                        location: here,
                        semantic_container: container.clone(),
                        lexical_container: container,
                        flags,
                    }))
                }
                "REF" => {
                    let name = words.next().ok_or_else(malformed)?;
                    let mut numbers = words.map(str::parse::<u32>);
                    let (Some(Ok(line)), Some(Ok(column))) = (numbers.next(), numbers.next())
                    else {
                        return Err(malformed());
                    };
                    Ok(Some(AnalyzerEvent::Reference {
                        name: name.to_string(),
                        kind: SymbolKind::Unexposed,
                        target: SourceLocation::new(file, line, column),
                        location: here,
                    }))
                }
                "WARN" => Ok(Some(AnalyzerEvent::Diagnostic {
                    location: Some(here),
                    severity: Severity::Warning,
                    text: words.collect::<Vec<_>>().join(" "),
                })),
                "FAIL" => Err(AnalyzerError::failed(
                    file,
                    words.collect::<Vec<_>>().join(" "),
                )),
                _ => Err(malformed()),
            }
        }
    }

    impl SourceAnalyzer for ScriptedAnalyzer {
        fn analyze(&self, file: &Path, _options: &[String]) -> Result<EventStream, AnalyzerError> {
            let script = std::fs::read_to_string(file)?;
            let mut events = Vec::new();
            for (index, line) in script.lines().enumerate() {
                if let Some(event) = Self::parse_line(file, index as u32 + 1, line)? {
                    events.push(event);
                }
            }
            Ok(Box::new(events.into_iter()))
        }

        fn name(&self) -> &str {
            "scripted"
        }
    }

    #[derive(Debug, Default)]
    struct GateState {
        open: bool,
        entered: bool,
    }

    /// Blocks every `analyze` call until the gate is opened
    ///
    /// Starts closed. Lets tests hold the worker inside a file while they
    /// cancel or poke at the manager.
    #[derive(Debug)]
    pub struct GatedAnalyzer<A> {
        inner: A,
        state: Mutex<GateState>,
        changed: Condvar,
    }

    impl<A: SourceAnalyzer> GatedAnalyzer<A> {
        pub fn new(inner: A) -> Self {
            Self {
                inner,
                state: Mutex::new(GateState::default()),
                changed: Condvar::new(),
            }
        }

        /// Open the gate; blocked and future calls proceed
        pub fn release(&self) {
            let mut state = self.state.lock().unwrap();
            state.open = true;
            self.changed.notify_all();
        }

        /// Close the gate again and forget earlier entries
        pub fn close(&self) {
            let mut state = self.state.lock().unwrap();
            state.open = false;
            state.entered = false;
        }

        /// Block until some `analyze` call reached the gate
        pub fn wait_until_entered(&self) {
            let state = self.state.lock().unwrap();
            let _state = self.changed.wait_while(state, |s| !s.entered).unwrap();
        }
    }

    impl<A: SourceAnalyzer> SourceAnalyzer for GatedAnalyzer<A> {
        fn analyze(&self, file: &Path, options: &[String]) -> Result<EventStream, AnalyzerError> {
            {
                let mut state = self.state.lock().unwrap();
                state.entered = true;
                self.changed.notify_all();
                let _state = self.changed.wait_while(state, |s| !s.open).unwrap();
            }
            self.inner.analyze(file, options)
        }

        fn name(&self) -> &str {
            self.inner.name()
        }
    }

    mod tests {
        use super::*;
        use tempfile::TempDir;

        #[test]
        fn test_scripted_events() {
            let temp_dir = TempDir::new().unwrap();
            let file = temp_dir.path().join("a.h");
            std::fs::write(
                &file,
                "DECL namespace app\n\nDECL class Widget 1 definition\nREF Widget 3 1\nWARN odd thing\n",
            )
            .unwrap();

            let events: Vec<_> = ScriptedAnalyzer.analyze(&file, &[]).unwrap().collect();
            assert_eq!(events.len(), 4);
            match &events[1] {
                AnalyzerEvent::Declaration {
                    name,
                    kind,
                    location,
                    semantic_container,
                    flags,
                    ..
                } => {
                    assert_eq!(name, "Widget");
                    assert_eq!(*kind, SymbolKind::Class);
                    assert_eq!(location.line, 3);
                    assert_eq!(semantic_container.as_ref().unwrap().line, 1);
                    assert!(flags.is_definition);
                }
                other => panic!("Expected declaration, got {other:?}"),
            }
            assert!(matches!(
                &events[3],
                AnalyzerEvent::Diagnostic { text, .. } if text == "odd thing"
            ));
        }

        #[test]
        fn test_scripted_failures() {
            let temp_dir = TempDir::new().unwrap();
            let failing = temp_dir.path().join("fail.cpp");
            std::fs::write(&failing, "FAIL no luck\n").unwrap();
            assert!(matches!(
                ScriptedAnalyzer.analyze(&failing, &[]),
                Err(AnalyzerError::Failed { reason, .. }) if reason == "no luck"
            ));

            let garbage = temp_dir.path().join("garbage.cpp");
            std::fs::write(&garbage, "DECL nonsense x\n").unwrap();
            assert!(matches!(
                ScriptedAnalyzer.analyze(&garbage, &[]),
                Err(AnalyzerError::Parse { .. })
            ));
        }
    }
}
