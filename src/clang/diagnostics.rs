//! Clang stderr diagnostic parser
//!
//! Turns the compiler's textual diagnostics into analyzer events. Lines that
//! are not diagnostics (code snippets, carets, "N errors generated") are
//! ignored.

use regex::Regex;
use std::path::Path;

use crate::index::{AnalyzerEvent, Severity, SourceLocation};

#[derive(Debug, Clone)]
pub struct DiagnosticParser {
    located_regex: Regex,
    driver_regex: Regex,
}

impl DiagnosticParser {
    pub fn new() -> Result<Self, regex::Error> {
        Ok(Self {
            // /src/a.cpp:3:9: error: unknown type name 'Foo'
            located_regex: Regex::new(
                r"^(.+?):(\d+):(\d+): (fatal error|error|warning|note|remark): (.*)$",
            )?,

            // clang: error: no such file or directory: 'missing.cpp'
            driver_regex: Regex::new(
                r"^(?:[\w.+-]+: )?(fatal error|error|warning): (.*)$",
            )?,
        })
    }

    /// Parse one stderr line; relative file names are resolved against `base_dir`
    pub fn parse_line(&self, line: &str, base_dir: Option<&Path>) -> Option<AnalyzerEvent> {
        if let Some(captures) = self.located_regex.captures(line) {
            let file = Path::new(captures.get(1)?.as_str());
            let file = match base_dir {
                Some(base) if file.is_relative() => base.join(file),
                _ => file.to_path_buf(),
            };
            let line: u32 = captures.get(2)?.as_str().parse().ok()?;
            let column: u32 = captures.get(3)?.as_str().parse().ok()?;

            return Some(AnalyzerEvent::Diagnostic {
                location: Some(SourceLocation::new(file, line, column)),
                severity: Severity::from_compiler(captures.get(4)?.as_str()),
                text: captures.get(5)?.as_str().to_string(),
            });
        }

        if let Some(captures) = self.driver_regex.captures(line) {
            return Some(AnalyzerEvent::Diagnostic {
                location: None,
                severity: Severity::from_compiler(captures.get(1)?.as_str()),
                text: captures.get(2)?.as_str().to_string(),
            });
        }

        None
    }

    pub fn parse(&self, stderr: &str, base_dir: Option<&Path>) -> Vec<AnalyzerEvent> {
        stderr
            .lines()
            .filter_map(|line| self.parse_line(line, base_dir))
            .collect()
    }
}
