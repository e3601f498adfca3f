use json_compilation_db::Entry;
use serde::{Serialize, Serializer};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CompilationDatabaseError {
    #[error("Compilation database file not found: {path}")]
    FileNotFound { path: String },
    #[error("Failed to read compilation database file: {error}")]
    ReadError { error: String },
    #[error("Failed to parse compilation database JSON: {error}")]
    ParseError { error: String },
    #[error("Compilation database is empty")]
    EmptyDatabase,
}

/// Per-file compiler options taken from a `compile_commands.json`
///
/// Only the path is serialized; the entries are an in-memory lookup table
/// keyed by the absolute source path.
#[derive(Debug)]
pub struct CompilationDatabase {
    /// Path to the compilation database file (compile_commands.json)
    pub path: PathBuf,
    entries: Vec<Entry>,
    by_file: HashMap<PathBuf, usize>,
}

impl CompilationDatabase {
    /// Load and parse the compilation database at the given path
    pub fn new(path: PathBuf) -> Result<Self, CompilationDatabaseError> {
        if !path.exists() {
            return Err(CompilationDatabaseError::FileNotFound {
                path: path.to_string_lossy().to_string(),
            });
        }

        let file = std::fs::File::open(&path).map_err(|e| CompilationDatabaseError::ReadError {
            error: e.to_string(),
        })?;

        let reader = std::io::BufReader::new(file);
        let entries: Vec<Entry> =
            serde_json::from_reader(reader).map_err(|e| CompilationDatabaseError::ParseError {
                error: e.to_string(),
            })?;

        if entries.is_empty() {
            return Err(CompilationDatabaseError::EmptyDatabase);
        }

        // Later entries for the same file win, like most build tools expect
        let by_file = entries
            .iter()
            .enumerate()
            .map(|(index, entry)| (absolute_source(entry), index))
            .collect();

        Ok(Self {
            path,
            entries,
            by_file,
        })
    }

    /// Get the number of entries in the compilation database
    pub fn entry_count(&self) -> usize {
        self.entries.len()
    }

    /// Get the path to the compilation database file
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Check if the database contains an entry for the specified source file
    pub fn contains_file(&self, file_path: &Path) -> bool {
        self.by_file.contains_key(file_path)
    }

    /// Compiler options for one source file, if the database lists it
    ///
    /// The compiler executable, `-c`, `-o <out>` and the source path itself are
    /// removed. The entry's directory is passed as `-working-directory` so
    /// relative include paths keep resolving.
    pub fn options_for(&self, file_path: &Path) -> Option<Vec<String>> {
        let entry = &self.entries[*self.by_file.get(file_path)?];

        let source_relative = entry.file.to_string_lossy();
        let source_absolute = absolute_source(entry);
        let source_absolute = source_absolute.to_string_lossy();

        let mut options = vec![
            "-working-directory".to_string(),
            entry.directory.to_string_lossy().to_string(),
        ];

        let mut args = entry.arguments.iter().skip(1);
        while let Some(arg) = args.next() {
            match arg.as_str() {
                "-c" => {}
                "-o" => {
                    args.next();
                }
                a if a.starts_with("-o") => {}
                a if a == source_relative || a == source_absolute => {}
                _ => options.push(arg.clone()),
            }
        }

        Some(options)
    }
}

fn absolute_source(entry: &Entry) -> PathBuf {
    if entry.file.is_absolute() {
        entry.file.clone()
    } else {
        entry.directory.join(&entry.file)
    }
}

/// Only the path is serialized, never the entries
impl Serialize for CompilationDatabase {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        self.path.serialize(serializer)
    }
}
