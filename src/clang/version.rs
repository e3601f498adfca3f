use std::path::Path;
use std::process::Command;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ClangVersionError {
    #[error("Failed to execute clang: {0}")]
    ExecutionFailed(String),
    #[error("Failed to parse clang version output")]
    ParseFailed,
    #[error("Invalid version format: {0}")]
    InvalidFormat(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClangVersion {
    pub major: u32,
    pub minor: u32,
    pub patch: u32,
    pub vendor: Option<String>,
}

impl ClangVersion {
    /// Detect clang version by running --version command
    pub fn detect(clang_path: &Path) -> Result<Self, ClangVersionError> {
        let output = Command::new(clang_path)
            .arg("--version")
            .output()
            .map_err(|e| ClangVersionError::ExecutionFailed(e.to_string()))?;

        if !output.status.success() {
            return Err(ClangVersionError::ExecutionFailed(
                "clang --version failed".to_string(),
            ));
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        Self::parse_version_output(&stdout)
    }

    fn parse_version_output(output: &str) -> Result<Self, ClangVersionError> {
        // "Ubuntu clang version 18.1.3 (1ubuntu1)"
        // "Apple clang version 15.0.0 (clang-1500.3.9.4)"
        // "clang version 20.1.8"
        let version_line = output
            .lines()
            .find(|line| line.contains("clang version "))
            .ok_or(ClangVersionError::ParseFailed)?;

        let marker = version_line
            .find("clang version ")
            .ok_or(ClangVersionError::ParseFailed)?;
        let vendor = version_line[..marker].trim();
        let vendor = (!vendor.is_empty()).then(|| vendor.to_string());

        let version_str = &version_line[marker + "clang version ".len()..];
        let version_part = version_str
            .split([' ', '-', '+'])
            .next()
            .ok_or(ClangVersionError::ParseFailed)?;

        let mut parts = version_part.splitn(3, '.');
        let mut component = |what: &str| {
            parts
                .next()
                .and_then(|s| s.parse::<u32>().ok())
                .ok_or_else(|| ClangVersionError::InvalidFormat(what.to_string()))
        };

        Ok(ClangVersion {
            major: component("major version")?,
            minor: component("minor version")?,
            patch: component("patch version")?,
            vendor,
        })
    }

    /// Whether `-ast-dump=json` is available (clang 9 and later)
    pub fn supports_json_ast(&self) -> bool {
        self.major >= 9
    }
}

impl std::fmt::Display for ClangVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if let Some(vendor) = &self.vendor {
            write!(f, "{vendor} ")?;
        }
        write!(f, "clang {}.{}.{}", self.major, self.minor, self.patch)
    }
}
