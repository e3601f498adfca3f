use std::env;
use std::fs::OpenOptions;
use std::io;
use std::path::{Path, PathBuf};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Log file path; logs go to stderr when unset
pub const LOG_FILE_ENV: &str = "CPP_INDEX_LOG_FILE";
/// When "true", the process id is inserted into the log file name
pub const LOG_UNIQUE_ENV: &str = "CPP_INDEX_LOG_UNIQUE";
/// When "true", logs are written as JSON lines
pub const LOG_JSON_ENV: &str = "CPP_INDEX_LOG_JSON";

/// Configuration for the logging system
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogConfig {
    /// Log level filter (e.g., "debug", "info", "warn", "error")
    pub level: String,
    /// Optional log file path. If None, logs only to stderr
    pub file_path: Option<PathBuf>,
    /// Whether to use structured JSON format for logs
    pub json_format: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            file_path: None,
            json_format: false,
        }
    }
}

impl LogConfig {
    /// Create LogConfig from environment variables
    pub fn from_env() -> Self {
        Self::from_vars(|name| env::var(name).ok())
    }

    fn from_vars(var: impl Fn(&str) -> Option<String>) -> Self {
        let level = var("RUST_LOG").unwrap_or_else(|| "info".to_string());

        let file_path = var(LOG_FILE_ENV).map(|path| {
            let path = PathBuf::from(path);
            if var(LOG_UNIQUE_ENV).as_deref() == Some("true") {
                with_pid(&path, std::process::id())
            } else {
                path
            }
        });

        let json_format = var(LOG_JSON_ENV).as_deref() == Some("true");

        Self {
            level,
            file_path,
            json_format,
        }
    }

    /// Override values from CLI arguments
    pub fn with_overrides(mut self, level: Option<String>, file_path: Option<PathBuf>) -> Self {
        if let Some(level) = level {
            self.level = level;
        }
        if let Some(file_path) = file_path {
            self.file_path = Some(file_path);
        }
        self
    }
}

/// `index.log` -> `index.<pid>.log`
fn with_pid(path: &Path, pid: u32) -> PathBuf {
    let Some(stem) = path.file_stem() else {
        return path.to_path_buf();
    };
    let unique = match path.extension().and_then(|ext| ext.to_str()) {
        Some(extension) => format!("{}.{}.{}", stem.to_string_lossy(), pid, extension),
        None => format!("{}.{}", stem.to_string_lossy(), pid),
    };
    path.with_file_name(unique)
}

/// Initialize the logging system based on configuration
pub fn init_logging(config: LogConfig) -> Result<(), Box<dyn std::error::Error>> {
    let env_filter = EnvFilter::try_new(&config.level).or_else(|_| EnvFilter::try_new("info"))?;

    let subscriber = tracing_subscriber::registry().with(env_filter);

    match (&config.file_path, config.json_format) {
        (Some(file_path), true) => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(file_path)?;

            let file_layer = fmt::layer().json().with_writer(file).with_ansi(false);

            subscriber.with(file_layer).init();
        }
        (Some(file_path), false) => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(file_path)?;

            let file_layer = fmt::layer()
                .with_writer(file)
                .with_ansi(false)
                .with_target(true)
                .with_thread_ids(true)
                .with_line_number(true);

            subscriber.with(file_layer).init();
        }
        (None, true) => {
            let stderr_layer = fmt::layer().json().with_writer(io::stderr).with_ansi(false);

            subscriber.with(stderr_layer).init();
        }
        (None, false) => {
            let stderr_layer = fmt::layer()
                .with_writer(io::stderr)
                .with_ansi(true)
                .with_target(true)
                .with_thread_ids(true)
                .with_line_number(true);

            subscriber.with(stderr_layer).init();
        }
    }

    Ok(())
}

/// Helper function to log performance timing
#[macro_export]
macro_rules! log_timing {
    ($level:expr, $operation:expr, $duration:expr) => {
        tracing::event!(
            $level,
            operation = $operation,
            duration_ms = $duration.as_millis(),
            pid = std::process::id(),
            "Performance timing"
        );
    };
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config_from(vars: &[(&str, &str)]) -> LogConfig {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        LogConfig::from_vars(|name| vars.get(name).cloned())
    }

    #[test]
    fn test_defaults() {
        assert_eq!(config_from(&[]), LogConfig::default());
    }

    #[test]
    fn test_from_vars() {
        let config = config_from(&[
            ("RUST_LOG", "cpp_symbol_index=debug"),
            (LOG_FILE_ENV, "/tmp/index.log"),
            (LOG_JSON_ENV, "true"),
        ]);
        assert_eq!(config.level, "cpp_symbol_index=debug");
        assert_eq!(config.file_path, Some(PathBuf::from("/tmp/index.log")));
        assert!(config.json_format);

        let unique = config_from(&[(LOG_FILE_ENV, "/tmp/index.log"), (LOG_UNIQUE_ENV, "true")]);
        assert_eq!(
            unique.file_path,
            Some(with_pid(Path::new("/tmp/index.log"), std::process::id()))
        );
    }

    #[test]
    fn test_with_pid() {
        assert_eq!(
            with_pid(Path::new("/var/log/index.log"), 42),
            PathBuf::from("/var/log/index.42.log")
        );
        assert_eq!(with_pid(Path::new("index"), 7), PathBuf::from("index.7"));
    }

    #[test]
    fn test_overrides() {
        let config = LogConfig::default()
            .with_overrides(Some("warn".to_string()), Some(PathBuf::from("out.log")));
        assert_eq!(config.level, "warn");
        assert_eq!(config.file_path, Some(PathBuf::from("out.log")));

        let untouched = LogConfig::default().with_overrides(None, None);
        assert_eq!(untouched, LogConfig::default());
    }
}
