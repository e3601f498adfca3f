mod clang;
mod collection;
mod config;
mod index;
mod logging;
mod project;

#[cfg(test)]
mod test_utils;

use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::UnboundedReceiver;
use tracing::info;

use clang::{ClangAstAnalyzer, ClangVersion};
use collection::{CollectionManager, Notification, RebuildOutcome};
use config::{Settings, resolve_base_dir};
use logging::{LogConfig, init_logging};

/// How often the rebuild progress loop checks for events
const PROGRESS_INTERVAL: Duration = Duration::from_millis(50);

/// CLI arguments for the C/C++ symbol indexer
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Directory holding the indexed collections (overrides CPP_INDEX_HOME env var)
    #[arg(long, value_name = "DIR", global = true)]
    base_dir: Option<PathBuf>,

    /// Path to clang executable (overrides the configured one)
    #[arg(long, value_name = "PATH", global = true)]
    clang_path: Option<String>,

    /// Log level (overrides RUST_LOG env var)
    #[arg(long, value_name = "LEVEL", global = true)]
    log_level: Option<String>,

    /// Log file path (overrides CPP_INDEX_LOG_FILE env var)
    #[arg(long, value_name = "FILE", global = true)]
    log_file: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List collections with their status
    List {
        #[arg(long)]
        json: bool,
    },
    /// Create an empty collection
    Create {
        name: String,
        /// Source file or directory to index (repeatable)
        #[arg(long = "target", value_name = "PATH")]
        targets: Vec<PathBuf>,
        #[arg(long)]
        comment: Option<String>,
    },
    /// Delete a collection and its database
    Remove { collection: String },
    /// Rename a collection
    Rename { collection: String, name: String },
    /// Set the free-form comment of a collection
    Comment { collection: String, comment: String },
    /// Add a source file or directory to a collection
    AddTarget { collection: String, path: PathBuf },
    /// Remove a target by its position in `list` output
    RemoveTarget { collection: String, index: usize },
    /// Use a compile_commands.json for per-file options (omit PATH to clear)
    CompileCommands {
        collection: String,
        path: Option<PathBuf>,
    },
    /// Open a collection's database for searching
    Enable { collection: String },
    /// Close a collection's database
    Disable { collection: String },
    /// Rebuild a collection's database from its targets
    Rebuild { collection: String },
    /// Search all enabled collections
    ///
    /// Words are name substrings; `kind:<kind>`, `file:<text>`, `static` and
    /// `refs` narrow or widen the search.
    Search {
        #[arg(long)]
        json: bool,
        #[arg(long)]
        limit: Option<usize>,
        #[arg(required = true)]
        query: Vec<String>,
    },
    /// Show or change indexing settings
    Settings {
        #[command(subcommand)]
        action: Option<SettingsAction>,
    },
}

#[derive(Subcommand, Debug)]
enum SettingsAction {
    /// Print the current settings
    Show,
    /// Change one setting
    Set { key: SettingKey, value: String },
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum SettingKey {
    ClangPath,
    ClangParams,
    /// Comma separated include directories
    SystemDirs,
    /// Comma separated include directories
    SessionDirs,
    /// Comma separated file extensions
    IgnoreExtensions,
    IndexLocals,
    SkipImplicits,
}

fn split_list(value: &str) -> impl Iterator<Item = &str> {
    value.split(',').map(str::trim).filter(|item| !item.is_empty())
}

fn parse_bool(value: &str) -> Result<bool, String> {
    match value {
        "true" | "yes" | "on" | "1" => Ok(true),
        "false" | "no" | "off" | "0" => Ok(false),
        other => Err(format!("expected true or false, got '{other}'")),
    }
}

fn apply_setting(settings: &mut Settings, key: SettingKey, value: &str) -> Result<(), String> {
    match key {
        SettingKey::ClangPath => settings.clang_path = value.to_string(),
        SettingKey::ClangParams => settings.clang_params = value.to_string(),
        SettingKey::SystemDirs => settings.system_dirs = split_list(value).map(PathBuf::from).collect(),
        SettingKey::SessionDirs => {
            settings.session_dirs = split_list(value).map(PathBuf::from).collect()
        }
        SettingKey::IgnoreExtensions => {
            settings.ignore_extensions = split_list(value)
                .map(|ext| ext.trim_start_matches('.').to_string())
                .collect()
        }
        SettingKey::IndexLocals => settings.indexing.index_locals = parse_bool(value)?,
        SettingKey::SkipImplicits => settings.indexing.skip_implicits = parse_bool(value)?,
    }
    Ok(())
}

fn print_collections(manager: &CollectionManager, json: bool) -> Result<(), serde_json::Error> {
    let collections = manager.collections();
    if json {
        let list: Vec<_> = collections
            .iter()
            .map(|c| {
                serde_json::json!({
                    "id": c.id(),
                    "name": c.name(),
                    "comment": c.comment(),
                    "status": c.status(),
                    "enabled": c.is_enabled(),
                    "path": c.path(),
                    "targets": c.targets(),
                    "db_id": c.db_id(),
                })
            })
            .collect();
        println!("{}", serde_json::to_string_pretty(&list)?);
        return Ok(());
    }

    if collections.is_empty() {
        println!("No collections in {}", manager.settings().base_dir.display());
        return Ok(());
    }
    for collection in collections {
        let enabled = if collection.is_enabled() { "*" } else { " " };
        println!(
            "{} {:<10} {} ({})",
            enabled,
            collection.status(),
            collection.name(),
            collection.id()
        );
        if !collection.comment().is_empty() {
            println!("      {}", collection.comment());
        }
        for (index, target) in collection.targets().iter().enumerate() {
            println!("      [{}] {}", index, target.display());
        }
    }
    Ok(())
}

/// Print rebuild progress queued since the last call
fn print_progress(notifications: &mut UnboundedReceiver<Notification>) {
    while let Ok(notification) = notifications.try_recv() {
        match notification {
            Notification::IndexingFile { path, .. } => println!("indexing {}", path.display()),
            Notification::Diagnostic(record) => println!("{record}"),
            Notification::ReindexingStarted { name, .. } => println!("reindexing started: {name}"),
            Notification::ReindexingFinished { name, outcome, .. } => match outcome {
                RebuildOutcome::Completed { stats } => println!(
                    "reindexing finished: {} ({} files, {} declarations, {} references, {} failed)",
                    name,
                    stats.files_indexed,
                    stats.declarations,
                    stats.references,
                    stats.files_failed
                ),
                RebuildOutcome::Cancelled { .. } => println!("reindexing cancelled: {name}"),
                RebuildOutcome::Failed { reason } => println!("reindexing failed: {name}: {reason}"),
            },
            Notification::StatusChanged { .. } | Notification::CollectionRemoved { .. } => {}
        }
    }
}

async fn rebuild(
    manager: &mut CollectionManager,
    notifications: &mut UnboundedReceiver<Notification>,
    collection: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    let id = manager.resolve(collection)?;
    manager.rebuild(id)?;

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);
    let mut stopping = false;

    let outcome = loop {
        if let Some(outcome) = manager.pump_events() {
            break outcome;
        }
        print_progress(notifications);
        tokio::select! {
            result = &mut ctrl_c, if !stopping => {
                result?;
                eprintln!("Stopping, waiting for the current file to finish...");
                manager.stop_rebuild()?;
                stopping = true;
            }
            _ = tokio::time::sleep(PROGRESS_INTERVAL) => {}
        }
    };
    print_progress(notifications);

    match outcome {
        RebuildOutcome::Completed { .. } => Ok(()),
        RebuildOutcome::Cancelled { .. } => Err("rebuild cancelled".into()),
        RebuildOutcome::Failed { reason } => Err(reason.into()),
    }
}

async fn run(args: Args) -> Result<(), Box<dyn std::error::Error>> {
    let base_dir = resolve_base_dir(args.base_dir)?;
    let settings = Settings::load(&base_dir)?;
    let clang_path = args
        .clang_path
        .unwrap_or_else(|| settings.clang_path.clone());
    let analyzer = ClangAstAnalyzer::new(clang_path, settings.indexing.clone())?;

    let (mut manager, mut notifications) = CollectionManager::new(settings, Arc::new(analyzer));
    manager.load()?;

    match args.command {
        Command::List { json } => print_collections(&manager, json)?,
        Command::Create {
            name,
            targets,
            comment,
        } => {
            let id = manager.create_collection(&name)?;
            if let Some(comment) = comment {
                manager.set_comment(id, &comment)?;
            }
            for target in targets {
                manager.add_target(id, std::path::absolute(target)?)?;
            }
            println!("{id}");
        }
        Command::Remove { collection } => {
            let id = manager.resolve(&collection)?;
            manager.remove_collection(id)?;
        }
        Command::Rename { collection, name } => {
            let id = manager.resolve(&collection)?;
            manager.rename_collection(id, &name)?;
        }
        Command::Comment {
            collection,
            comment,
        } => {
            let id = manager.resolve(&collection)?;
            manager.set_comment(id, &comment)?;
        }
        Command::AddTarget { collection, path } => {
            let id = manager.resolve(&collection)?;
            manager.add_target(id, std::path::absolute(path)?)?;
        }
        Command::RemoveTarget { collection, index } => {
            let id = manager.resolve(&collection)?;
            let removed = manager.remove_target(id, index)?;
            println!("removed {}", removed.display());
        }
        Command::CompileCommands { collection, path } => {
            let id = manager.resolve(&collection)?;
            let path = path.map(std::path::absolute).transpose()?;
            manager.set_compile_commands(id, path)?;
        }
        Command::Enable { collection } => {
            let id = manager.resolve(&collection)?;
            manager.enable(id, true)?;
        }
        Command::Disable { collection } => {
            let id = manager.resolve(&collection)?;
            manager.enable(id, false)?;
        }
        Command::Rebuild { collection } => {
            rebuild(&mut manager, &mut notifications, &collection).await?;
        }
        Command::Search { json, limit, query } => {
            let hits = manager.search_text(&query.join(" "), limit)?;
            if json {
                println!("{}", serde_json::to_string_pretty(&hits)?);
            } else {
                for hit in &hits {
                    let result = &hit.result;
                    println!(
                        "{}:{}:{}: {} {} [{}]",
                        result.file,
                        result.line,
                        result.column,
                        result.kind_label(),
                        result.display_name(),
                        hit.collection
                    );
                }
                info!("{} result(s)", hits.len());
            }
        }
        Command::Settings { action } => match action.unwrap_or(SettingsAction::Show) {
            SettingsAction::Show => {
                let settings = manager.settings();
                println!("base directory: {}", settings.base_dir.display());
                match ClangVersion::detect(std::path::Path::new(&settings.clang_path)) {
                    Ok(version) => println!("clang: {version}"),
                    Err(e) => println!("clang: unavailable ({e})"),
                }
                println!("{}", serde_json::to_string_pretty(settings)?);
            }
            SettingsAction::Set { key, value } => {
                apply_setting(manager.settings_mut(), key, &value)?;
                manager.save_settings()?;
            }
        },
    }

    Ok(())
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    let log_config =
        LogConfig::from_env().with_overrides(args.log_level.clone(), args.log_file.clone());
    if let Err(e) = init_logging(log_config) {
        eprintln!("Failed to initialize logging: {e}");
        std::process::exit(1);
    }

    if let Err(e) = run(args).await {
        eprintln!("error: {e}");
        std::process::exit(1);
    }
}
