// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

//! AI File Organizer: index, plan and organize files with rules or a
//! language model, with every move journaled for undo.

use chrono::Utc;
use clap::{Parser, Subcommand};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWriteExt, BufReader, Lines, Stdin};
use tokio::signal;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use ai_file_organizer::ai::{self, LocalModel, OllamaClient};
use ai_file_organizer::categorizer::Categorizer;
use ai_file_organizer::config::{default_config_path, AiProvider, AppConfig, WatchedFolder, WatcherConfig};
use ai_file_organizer::db::{FileIndex, FileRecord};
use ai_file_organizer::fsops::{absolutize, cleanup_empty_folders, flatten_folder};
use ai_file_organizer::history::{History, UndoAction};
use ai_file_organizer::indexer::{export_file_list, ExportFormat, IndexOutcome, Indexer};
use ai_file_organizer::organizer::{ExecutionReport, Organizer, OrganizerEvent, Proposal};
use ai_file_organizer::packaging::{run_build, BuildOptions};
use ai_file_organizer::planner::AUTO_ORGANIZE_MARKER;
use ai_file_organizer::query::parse_query;
use ai_file_organizer::update::{self, VERSION};
use ai_file_organizer::watcher::AutoWatcher;
use ai_file_organizer::{OrganizerError, Result};

/// Rows read for an unfiltered export
const EXPORT_LIMIT: usize = 1_000_000;

/// AI File Organizer CLI
#[derive(Parser, Debug)]
#[command(name = "organizer")]
#[command(author = "Jonathan D. A. Jewell <hyperpolymath>")]
#[command(version)]
#[command(about = "Organize files with rules or an AI plan you approve", long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Path to configuration file (JSON format)
    #[arg(short, long, global = true, env = "ORGANIZER_CONFIG")]
    config: Option<PathBuf>,

    /// Enable verbose logging (debug level)
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Enable trace logging (most verbose)
    #[arg(long, global = true)]
    trace: bool,

    /// Output format for results
    #[arg(long, global = true, default_value = "text", value_parser = ["text", "json", "jsonl"])]
    format: String,

    /// Suppress non-essential output (quiet mode)
    #[arg(short, long, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Organize a folder with an AI plan (or rules)
    Organize {
        /// Folder to organize
        folder: PathBuf,

        /// What to do, e.g. "put invoices from 2023 in Finance"
        #[arg(short, long)]
        instruction: Option<String>,

        /// Apply the plan without asking
        #[arg(short, long)]
        yes: bool,

        /// Show the plan without moving anything
        #[arg(long)]
        dry_run: bool,

        /// Skip the AI and sort by file type
        #[arg(long)]
        rules: bool,

        /// Include files in subfolders
        #[arg(short, long)]
        recursive: bool,
    },

    /// Watch folders and organize new files as they arrive
    Watch {
        /// Extra folders to watch (in addition to the config)
        #[arg(short, long)]
        dir: Vec<PathBuf>,

        /// Instruction for the extra folders
        #[arg(short, long)]
        instruction: Option<String>,

        /// Organize files already in the folders on start
        #[arg(long)]
        organize_existing: bool,

        /// Only organize existing files changed since the watcher last ran
        #[arg(long)]
        catch_up: bool,
    },

    /// Add files or folders to the index
    Index {
        /// Files or folders to index
        #[arg(required = true)]
        paths: Vec<PathBuf>,

        /// Descend into subfolders
        #[arg(short, long)]
        recursive: bool,

        /// Re-index files even when unchanged
        #[arg(long)]
        force: bool,
    },

    /// Search the index, e.g. "pdfs from last week"
    Search {
        /// Query words
        #[arg(required = true)]
        query: Vec<String>,

        /// Maximum results
        #[arg(short, long, default_value = "20")]
        limit: usize,
    },

    /// Move every file in subfolders up to the folder itself
    Flatten {
        /// Folder to flatten
        folder: PathBuf,

        /// Skip confirmation prompt
        #[arg(short, long)]
        yes: bool,
    },

    /// File index operations
    Db {
        #[command(subcommand)]
        action: DbCommands,
    },

    /// Move journal and undo
    History {
        #[command(subcommand)]
        action: HistoryCommands,
    },

    /// Collect the distributable bundle and write the installer script
    Package {
        /// Output root for the bundle
        #[arg(long, default_value = "dist")]
        dist: PathBuf,

        /// Installer script path (overrides the config)
        #[arg(long)]
        script: Option<PathBuf>,

        /// Version written into the installer (default: package version)
        #[arg(id = "app_version", long = "app-version", value_name = "VERSION")]
        version: Option<String>,

        /// Run the Inno Setup compiler afterwards
        #[arg(long)]
        compile: bool,
    },

    /// Check for a newer release
    Update {
        /// Open the download page when an update exists
        #[arg(long)]
        open: bool,
    },

    /// Configuration management
    Config {
        #[command(subcommand)]
        action: ConfigCommands,
    },

    /// Show AI provider, index and watcher status
    Status,

    /// Create a default configuration
    Init {
        /// Force overwrite existing configuration
        #[arg(long)]
        force: bool,
    },
}

#[derive(Subcommand, Debug)]
enum DbCommands {
    /// Show index statistics
    Stats,

    /// Files per category
    Categories,

    /// Forget files (nothing is deleted from disk)
    Remove {
        /// File ids
        #[arg(required = true)]
        ids: Vec<i64>,
    },

    /// Add tags to files
    Tag {
        /// File ids, comma separated
        #[arg(long, required = true, value_delimiter = ',')]
        ids: Vec<i64>,

        /// Tags to add
        #[arg(required = true)]
        tags: Vec<String>,
    },

    /// Export the file list as CSV or text
    Export {
        /// Output file
        output: PathBuf,

        /// csv or txt (default: from the file extension)
        #[arg(long)]
        export_format: Option<ExportFormat>,

        /// Only export files matching this search
        #[arg(long)]
        query: Option<String>,
    },

    /// Vacuum database (reclaim space)
    Vacuum,
}

#[derive(Subcommand, Debug)]
enum HistoryCommands {
    /// List recent moves
    List {
        /// Number of entries to show
        #[arg(short = 'n', long, default_value = "10")]
        count: usize,
    },

    /// Move files back where they came from
    Undo {
        /// Number of moves to undo (0 = all)
        #[arg(short = 'n', long, default_value = "1")]
        count: usize,

        /// Dry run (show what would be undone)
        #[arg(long)]
        dry_run: bool,
    },

    /// Clear the journal
    Clear {
        /// Skip confirmation prompt
        #[arg(long)]
        force: bool,
    },
}

#[derive(Subcommand, Debug)]
enum ConfigCommands {
    /// Show current configuration
    Show,

    /// Generate default configuration file
    Generate {
        /// Output file path
        #[arg(short, long, default_value = "config.json")]
        output: PathBuf,
    },

    /// Validate configuration file
    Validate,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize tracing
    let filter = if cli.trace {
        "trace"
    } else if cli.verbose {
        "debug"
    } else if cli.quiet {
        "warn"
    } else {
        "info"
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    if !cli.quiet {
        info!("AI File Organizer v{}", VERSION);
    }

    let config_path = cli.config.clone().unwrap_or_else(default_config_path);
    debug!("Configuration: {:?}", config_path);

    if let Some(Commands::Init { force }) = cli.command {
        return run_init(&config_path, force);
    }

    let config = AppConfig::load(&config_path)?;
    let output = Output::new(&cli.format);

    match cli.command {
        Some(Commands::Organize { folder, instruction, yes, dry_run, rules, recursive }) => {
            run_organize(&config, &output, &absolutize(&folder), instruction, yes, dry_run, rules, recursive).await
        }
        Some(Commands::Watch { dir, instruction, organize_existing, catch_up }) => {
            let dir = dir.iter().map(|d| absolutize(d)).collect();
            run_watch(config, &config_path, dir, instruction, organize_existing, catch_up, cli.quiet).await
        }
        Some(Commands::Index { paths, recursive, force }) => {
            let paths: Vec<PathBuf> = paths.iter().map(|p| absolutize(p)).collect();
            run_index(&config, &paths, recursive, force).await
        }
        Some(Commands::Search { query, limit }) => {
            run_search(&config, &output, &query.join(" "), limit)
        }
        Some(Commands::Flatten { folder, yes }) => {
            run_flatten(&absolutize(&folder), yes).await
        }
        Some(Commands::Db { action }) => {
            run_db_command(&config, &output, action)
        }
        Some(Commands::History { action }) => {
            run_history_command(&config, &output, action).await
        }
        Some(Commands::Package { dist, script, version, compile }) => {
            run_package(&config, dist, script, version, compile)
        }
        Some(Commands::Update { open }) => {
            run_update(&config, open).await
        }
        Some(Commands::Config { action }) => {
            run_config_command(config, action, &config_path)
        }
        Some(Commands::Status) => {
            run_status(&config).await
        }
        Some(Commands::Init { .. }) => Ok(()),
        None => {
            if !starts_watching(&config.watcher) {
                println!("Nothing to do. Run `organizer --help` for commands, or enable watcher.auto_start.");
                return Ok(());
            }
            run_watch(config, &config_path, Vec::new(), None, false, true, cli.quiet).await
        }
    }
}

/// Running without a command starts the watcher when the config asks for it
fn starts_watching(watcher: &WatcherConfig) -> bool {
    watcher.auto_start && !watcher.folders.is_empty()
}

/// Text, JSON or JSON-lines output
struct Output {
    format: String,
}

impl Output {
    fn new(format: &str) -> Self {
        Self { format: format.to_string() }
    }

    fn is_text(&self) -> bool {
        self.format == "text"
    }

    /// Print items as JSON; returns false in text mode
    fn emit<T: Serialize>(&self, items: &[T]) -> Result<bool> {
        match self.format.as_str() {
            "json" => println!("{}", serde_json::to_string_pretty(items)?),
            "jsonl" => {
                for item in items {
                    println!("{}", serde_json::to_string(item)?);
                }
            }
            _ => return Ok(false),
        }
        Ok(true)
    }
}

fn open_index(config: &AppConfig) -> Result<FileIndex> {
    let index = FileIndex::open(&config.database.path)?;
    debug!("Index: {:?}", config.database.path);
    Ok(index)
}

fn build_indexer(config: &AppConfig, index: FileIndex) -> Result<Indexer> {
    let indexer = Indexer::new(index, Categorizer::new(&config.categories.custom));
    if !config.ai.vision {
        return Ok(indexer);
    }
    let client = OllamaClient::new(&config.ai.ollama_url, Duration::from_secs(config.ai.timeout_secs))?;
    Ok(indexer.with_vision(LocalModel::new(client, &config.ai.local_model, config.ai.retries)))
}

fn build_organizer(config: &AppConfig, index: FileIndex, use_ai: bool) -> Result<Organizer> {
    let model = if use_ai { ai::from_config(&config.ai)? } else { None };
    Ok(Organizer::new(
        index,
        History::new(config.history.path.clone()),
        Categorizer::new(&config.categories.custom),
        model,
    ))
}

/// Index the files of `folder` and return their records
async fn index_folder_records(indexer: &Indexer, folder: &Path, recursive: bool) -> Result<Vec<FileRecord>> {
    let max_depth = if recursive { usize::MAX } else { 1 };
    let mut records = Vec::new();
    for entry in walkdir::WalkDir::new(folder).min_depth(1).max_depth(max_depth).sort_by_file_name() {
        let entry = match entry {
            Ok(e) => e,
            Err(e) => {
                warn!("Skipping unreadable entry: {}", e);
                continue;
            }
        };
        if !entry.file_type().is_file() {
            continue;
        }
        match indexer.index_file(entry.path(), false).await {
            Ok(IndexOutcome::Indexed(id)) | Ok(IndexOutcome::Unchanged(id)) => {
                if let Some(record) = indexer.index().get_file(id)? {
                    records.push(record);
                }
            }
            Ok(_) => {}
            Err(e) => warn!("Failed to index {:?}: {}", entry.path(), e),
        }
    }
    Ok(records)
}

/// Answers are read through one reader per command so that buffered
/// lines are not lost between prompts
type Answers<R> = Lines<BufReader<R>>;

fn stdin_answers() -> Answers<Stdin> {
    BufReader::new(tokio::io::stdin()).lines()
}

async fn prompt_line<R>(answers: &mut Answers<R>, question: &str) -> Result<String>
where
    R: AsyncRead + Unpin,
{
    let mut stdout = tokio::io::stdout();
    stdout.write_all(question.as_bytes()).await?;
    stdout.flush().await?;

    Ok(answers.next_line().await?.unwrap_or_default().trim().to_string())
}

fn print_proposal(proposal: &Proposal) {
    let summary = &proposal.summary;
    println!(
        "\nProposed plan: {} folder(s), {} file(s), {:.2} MB",
        summary.total_folders, summary.total_files, summary.total_size_mb
    );
    for folder in &summary.folders {
        println!("  {}/  ({} files, {:.2} MB)", folder.name, folder.file_count, folder.size_mb);
    }

    if !proposal.is_valid() {
        println!("\nThe plan has problems:");
        for error in &proposal.errors {
            println!("  - {}", error);
        }
        return;
    }

    println!("\nMoves:");
    for m in &proposal.moves {
        println!("  {} -> {}", m.source.display(), m.destination.display());
    }
    let skips = &proposal.skips;
    if skips.total() > 0 {
        println!(
            "\nSkipped {} ({} missing, {} unknown, {} already in place, {} invalid)",
            skips.total(),
            skips.not_found,
            skips.no_info,
            skips.already_in_dest,
            skips.invalid
        );
    }
}

fn print_report(report: &ExecutionReport) {
    for record in &report.moved {
        println!("  {} -> {}", record.source.display(), record.destination.display());
    }
    println!("\nMoved {} file(s), {} failed", report.moved.len(), report.failed);
    if !report.moved.is_empty() {
        println!("Undo with: organizer history undo --count {}", report.moved.len());
    }
}

/// Run organize: plan, show, approve or refine, execute
#[allow(clippy::too_many_arguments)]
async fn run_organize(
    config: &AppConfig,
    output: &Output,
    folder: &Path,
    instruction: Option<String>,
    yes: bool,
    dry_run: bool,
    rules: bool,
    recursive: bool,
) -> Result<()> {
    if !folder.is_dir() {
        return Err(OrganizerError::Config(format!("Not a folder: {}", folder.display())));
    }

    let index = open_index(config)?;
    let organizer = build_organizer(config, index.clone(), !rules)?;

    if rules || organizer.model().is_none() {
        if !rules {
            warn!("No AI provider available, organizing by file type");
        }
        let moves = organizer.organize_rules(folder, recursive, dry_run)?;
        if !output.emit(&moves)? {
            for m in &moves {
                let verb = if dry_run { "Would move" } else { "Moved" };
                println!("{} {} -> {}", verb, m.source.display(), m.destination.display());
            }
            println!("\n{} file(s)", moves.len());
        }
        return Ok(());
    }

    let indexer = build_indexer(config, index)?;
    let records = index_folder_records(&indexer, folder, recursive).await?;
    if records.is_empty() {
        println!("No files to organize in {}", folder.display());
        return Ok(());
    }

    let instruction = instruction
        .or_else(|| config.instruction_for(folder))
        .unwrap_or_else(|| format!("{} Organize all of these files into sensible folders", AUTO_ORGANIZE_MARKER));
    info!("Instruction: {}", instruction);

    let Some(mut proposal) = organizer.propose(&records, folder, &instruction).await? else {
        error!("AI returned no usable plan");
        return Ok(());
    };

    let mut answers = stdin_answers();

    loop {
        if output.is_text() {
            print_proposal(&proposal);
        } else {
            output.emit(&proposal.moves)?;
        }

        if dry_run {
            println!("\nDry run: nothing was moved");
            return Ok(());
        }

        let answer = if yes && proposal.is_valid() {
            "y".to_string()
        } else if yes {
            return Err(OrganizerError::Plan(proposal.errors.join("; ")));
        } else if proposal.is_valid() {
            prompt_line(&mut answers, "\nApply this plan? [y]es / [n]o / or describe a change: ").await?
        } else {
            prompt_line(&mut answers, "\nDescribe a fix to ask for a new plan (empty to cancel): ").await?
        };

        match answer.to_lowercase().as_str() {
            "y" | "yes" if proposal.is_valid() => break,
            "" | "n" | "no" => {
                println!("Cancelled");
                return Ok(());
            }
            _ => {
                match organizer.refine(&proposal, &records, folder, &instruction, &answer).await? {
                    Some(next) => proposal = next,
                    None => error!("AI returned no usable refinement, keeping the previous plan"),
                }
            }
        }
    }

    let report = organizer.execute_moves(&proposal.moves);
    let removed = cleanup_empty_folders(folder);
    if removed > 0 {
        info!("Cleaned up {} empty folder(s)", removed);
    }
    if !output.emit(&report.moved)? {
        print_report(&report);
    }
    Ok(())
}

/// Run the watch mode until Ctrl+C
#[allow(clippy::too_many_arguments)]
async fn run_watch(
    mut config: AppConfig,
    config_path: &Path,
    extra_dirs: Vec<PathBuf>,
    instruction: Option<String>,
    organize_existing: bool,
    catch_up: bool,
    quiet: bool,
) -> Result<()> {
    for dir in extra_dirs {
        if !config.watcher.folders.iter().any(|f| f.path == dir) {
            config.watcher.folders.push(WatchedFolder {
                path: dir,
                instruction: instruction.clone().unwrap_or_default(),
            });
        }
    }
    if config.watcher.folders.is_empty() {
        return Err(OrganizerError::Config(
            "No folders to watch. Add some to the config or pass --dir".to_string(),
        ));
    }

    if config.update.check_on_start {
        let update = config.update.clone();
        tokio::spawn(async move {
            match update::check_for_updates(&update.check_url, &update.download_url, VERSION).await {
                Ok(Some(info)) => info!("Update available: v{} ({})", info.latest_version, info.download_url),
                Ok(None) => {}
                Err(e) => debug!("Update check failed: {}", e),
            }
        });
    }

    let index = open_index(&config)?;
    let organizer = build_organizer(&config, index.clone(), config.watcher.has_instructions())?;
    let indexer = build_indexer(&config, index)?;

    let mut events = organizer.subscribe();
    if !quiet {
        tokio::spawn(async move {
            while let Ok(event) = events.recv().await {
                match event {
                    OrganizerEvent::FileOrganized { source, destination, category } => {
                        println!("[{}] {} -> {}", category, source.display(), destination.display());
                    }
                    OrganizerEvent::Error { path, message } => eprintln!("Error: {}: {}", path.display(), message),
                    OrganizerEvent::Status(_) => {}
                }
            }
        });
    }

    let watcher = AutoWatcher::new(&config.watcher, organizer, indexer);
    let since = if catch_up { config.watcher.last_active } else { None };
    let organize_existing = organize_existing || (catch_up && since.is_some());

    // Setup graceful shutdown
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    tokio::spawn(async move {
        let ctrl_c = async {
            if let Err(e) = signal::ctrl_c().await {
                error!("Failed to install Ctrl+C handler: {}", e);
                std::future::pending::<()>().await;
            }
        };

        #[cfg(unix)]
        let terminate = async {
            match signal::unix::signal(signal::unix::SignalKind::terminate()) {
                Ok(mut sigterm) => {
                    sigterm.recv().await;
                }
                Err(e) => {
                    error!("Failed to install SIGTERM handler: {}", e);
                    std::future::pending::<()>().await;
                }
            }
        };

        #[cfg(not(unix))]
        let terminate = std::future::pending::<()>();

        tokio::select! {
            _ = ctrl_c => info!("Received Ctrl+C, shutting down..."),
            _ = terminate => info!("Received SIGTERM, shutting down..."),
        }

        let _ = shutdown_tx.send(true);
    });

    info!("Watcher active. Press Ctrl+C to stop.");
    watcher.run(shutdown_rx, organize_existing, since).await?;

    config.watcher.last_active = Some(Utc::now());
    if let Err(e) = config.save(config_path) {
        warn!("Could not record last active time: {}", e);
    }
    info!("Organizer stopped.");
    Ok(())
}

async fn run_index(config: &AppConfig, paths: &[PathBuf], recursive: bool, force: bool) -> Result<()> {
    let indexer = build_indexer(config, open_index(config)?)?;

    let mut files = Vec::new();
    for path in paths {
        if path.is_dir() {
            let stats = indexer.index_folder(path, recursive, force).await?;
            println!(
                "{}: {} indexed, {} unchanged, {} errors",
                path.display(),
                stats.updated,
                stats.unchanged,
                stats.errors
            );
        } else {
            files.push(path.clone());
        }
    }

    if !files.is_empty() {
        let stats = indexer
            .reindex(&files, force, |done, total| debug!("Indexed {}/{}", done, total))
            .await;
        println!(
            "Files: {} indexed, {} unchanged, {} not found, {} errors",
            stats.updated, stats.unchanged, stats.not_found, stats.errors
        );
    }
    Ok(())
}

fn run_search(config: &AppConfig, output: &Output, query: &str, limit: usize) -> Result<()> {
    let parsed = parse_query(query);
    let results = open_index(config)?.search(&parsed, limit)?;
    if output.emit(&results)? {
        return Ok(());
    }

    if let Some(filter) = &parsed.date_filter {
        println!("Date: {}", filter);
    }
    if let Some(filter) = &parsed.type_filter {
        println!("Type: {}", filter);
    }
    println!("Results for '{}' ({}):", query, results.len());
    for file in results {
        let label = file.label.as_deref().unwrap_or("-");
        println!("  {:>6}  {}  [{}]", file.id, file.file_path, label);
    }
    Ok(())
}

async fn run_flatten(folder: &Path, yes: bool) -> Result<()> {
    if !folder.is_dir() {
        return Err(OrganizerError::Config(format!("Not a folder: {}", folder.display())));
    }
    if !yes {
        let answer = prompt_line(&mut stdin_answers(), &format!(
            "Move every file under {} to its top level? [y/N] ",
            folder.display()
        ))
        .await?;
        if !matches!(answer.to_lowercase().as_str(), "y" | "yes") {
            println!("Cancelled");
            return Ok(());
        }
    }
    let moved = flatten_folder(folder)?;
    println!("Flattened {} file(s)", moved);
    Ok(())
}

/// Run database commands
fn run_db_command(config: &AppConfig, output: &Output, action: DbCommands) -> Result<()> {
    let index = open_index(config)?;

    match action {
        DbCommands::Stats => {
            let stats = index.get_stats()?;
            println!("Index Statistics:");
            println!("  Files: {}", stats.file_count);
            println!("  Categories: {}", stats.category_count);
            println!("  Total size: {:.2} MB", stats.total_bytes as f64 / (1024.0 * 1024.0));
        }
        DbCommands::Categories => {
            let categories = index.get_category_stats()?;
            if !output.emit(&categories)? {
                println!("Categories:");
                for (name, count) in categories {
                    println!("  {} ({} files)", name, count);
                }
            }
        }
        DbCommands::Remove { ids } => {
            let stats = index.remove_from_index(&ids)?;
            println!("Removed {} file(s) from the index ({} errors)", stats.removed, stats.errors);
        }
        DbCommands::Tag { ids, tags } => {
            let stats = index.batch_add_tags(&ids, &tags)?;
            println!("Tagged {} file(s) ({} errors)", stats.updated, stats.errors);
        }
        DbCommands::Export { output: path, export_format, query } => {
            let format = match export_format {
                Some(format) => format,
                None => match path.extension().and_then(|e| e.to_str()) {
                    Some(ext) if ext.eq_ignore_ascii_case("csv") => ExportFormat::Csv,
                    _ => ExportFormat::Txt,
                },
            };
            let records = match query {
                Some(q) => index.search(&parse_query(&q), EXPORT_LIMIT)?,
                None => index.recent(EXPORT_LIMIT)?,
            };
            export_file_list(&records, &path, format)?;
            println!("Exported {} files to {:?}", records.len(), path);
        }
        DbCommands::Vacuum => {
            index.vacuum()?;
            println!("Database vacuumed successfully");
        }
    }

    Ok(())
}

/// Run history commands
async fn run_history_command(config: &AppConfig, output: &Output, action: HistoryCommands) -> Result<()> {
    let history = History::new(config.history.path.clone());

    match action {
        HistoryCommands::List { count } => {
            let entries = history.get_recent(count)?;
            if output.emit(&entries)? {
                return Ok(());
            }
            println!("Recent moves ({} entries):", entries.len());
            for entry in entries {
                let status = if entry.undone { "[UNDONE]" } else { "" };
                println!("  {} {} -> {} {}",
                    entry.timestamp.format("%Y-%m-%d %H:%M"),
                    entry.source.display(),
                    entry.destination.display(),
                    status
                );
            }
        }
        HistoryCommands::Undo { count, dry_run } => {
            let report = history.undo(count, dry_run)?;
            if report.outcomes.is_empty() {
                println!("No moves to undo");
                return Ok(());
            }

            let index = open_index(config)?;
            for outcome in &report.outcomes {
                let record = &outcome.record;
                match &outcome.action {
                    UndoAction::Restored => {
                        if let Some(id) = record.file_id {
                            if let Err(e) = index.update_file_path(id, &record.source) {
                                warn!("Index not updated for {:?}: {}", record.source, e);
                            }
                        }
                        println!("Undone: {} -> {}", record.destination.display(), record.source.display());
                    }
                    UndoAction::WouldRestore => {
                        println!("Would undo: {} -> {}", record.destination.display(), record.source.display());
                    }
                    UndoAction::Missing => {
                        println!("Skipped (file no longer at {})", record.destination.display());
                    }
                    UndoAction::Occupied => {
                        println!("Skipped ({} already exists)", record.source.display());
                    }
                    UndoAction::Failed(e) => println!("Failed: {}: {}", record.destination.display(), e),
                }
            }
            if !dry_run {
                // Category folders emptied by the undo; non-empty ones stay
                for folder in report.outcomes.iter().filter_map(|o| o.record.destination.parent()) {
                    let _ = std::fs::remove_dir(folder);
                }
            }
            println!("\n{} restored, {} skipped", report.restored(), report.skipped());
        }
        HistoryCommands::Clear { force } => {
            if !force {
                eprintln!("Use --force to confirm clearing history");
                return Ok(());
            }
            history.clear()?;
            println!("History cleared");
        }
    }

    Ok(())
}

fn run_package(
    config: &AppConfig,
    dist: PathBuf,
    script: Option<PathBuf>,
    version: Option<String>,
    compile: bool,
) -> Result<()> {
    let options = BuildOptions {
        dist_root: dist,
        script_path: script,
        version: version.unwrap_or_else(|| VERSION.to_string()),
        compile,
    };

    println!("Building {}", config.packaging.bundle.name);
    let report = run_build(&config.packaging, &options)?;

    println!("\nBUILD SUCCESSFUL");
    println!("  Bundle: {}", report.bundle.bundle_dir.display());
    println!(
        "  Files: {} ({:.2} MB)",
        report.bundle.manifest.files.len(),
        report.bundle.total_bytes as f64 / (1024.0 * 1024.0)
    );
    if let Some(archive) = &report.bundle.archive {
        println!("  Archive: {}", archive.display());
    }
    for source in &report.bundle.unmatched_datas {
        println!("  Warning: '{}' matched no files", source);
    }
    println!("  Installer script: {}", report.script.display());
    if let Some(installer) = &report.installer {
        println!("  Installer: {}", installer.display());
    }

    println!("\nNext steps:");
    for (i, step) in report.next_steps.iter().enumerate() {
        println!("{}. {}", i + 1, step);
    }
    Ok(())
}

async fn run_update(config: &AppConfig, open: bool) -> Result<()> {
    match update::check_for_updates(&config.update.check_url, &config.update.download_url, VERSION).await? {
        Some(info) => {
            println!("Update available: v{} -> v{}", info.current_version, info.latest_version);
            if !info.release_notes.is_empty() {
                println!("\n{}", info.release_notes);
            }
            println!("\nDownload: {}", info.download_url);
            if open {
                update::open_download_page(&info.download_url)?;
            }
        }
        None => println!("AI File Organizer v{} is up to date", VERSION),
    }
    Ok(())
}

/// Run config commands
fn run_config_command(config: AppConfig, action: ConfigCommands, config_path: &Path) -> Result<()> {
    match action {
        ConfigCommands::Show => {
            let json = serde_json::to_string_pretty(&config)?;
            println!("{}", json);
        }
        ConfigCommands::Generate { output } => {
            AppConfig::default().save(&output)?;
            println!("Generated config at {:?}", output);
        }
        ConfigCommands::Validate => {
            config.validate()?;
            println!("Configuration at {:?} is valid", config_path);
            println!("  AI provider: {:?}", config.ai.provider);
            println!("  Watched folders: {}", config.watcher.folders.len());
            println!("  Index: {:?}", config.database.path);
            println!("  Journal: {:?}", config.history.path);
        }
    }

    Ok(())
}

/// Run status check
async fn run_status(config: &AppConfig) -> Result<()> {
    println!("AI File Organizer v{} Status", VERSION);
    println!("============================");

    match config.ai.provider {
        AiProvider::OpenAi => {
            let key = if config.ai.api_key().is_some() { "set" } else { "missing" };
            println!("AI: OpenAI ({}), API key {}", config.ai.openai_model, key);
        }
        AiProvider::Local => println!("AI: Ollama ({})", config.ai.local_model),
        AiProvider::None => println!("AI: disabled (rules only)"),
    }

    if config.ai.provider == AiProvider::Local || config.ai.vision {
        let client = OllamaClient::new(&config.ai.ollama_url, Duration::from_secs(5))?;
        match client.health_check().await {
            Ok(()) => {
                println!("Ollama: Running at {}", client.base_url());
                match client.model_available(&config.ai.local_model).await {
                    Ok(true) => println!("  Model '{}' available", config.ai.local_model),
                    Ok(false) => println!("  Model '{}' not pulled", config.ai.local_model),
                    Err(e) => println!("  Error listing models: {}", e),
                }
            }
            Err(e) => println!("Ollama: Error - {}", e),
        }
    }

    match open_index(config) {
        Ok(index) => {
            let stats = index.get_stats()?;
            println!("\nIndex ({:?}):", config.database.path);
            println!("  Files: {}", stats.file_count);
            println!("  Categories: {}", stats.category_count);
        }
        Err(e) => println!("\nIndex: Error - {}", e),
    }

    let history = History::new(config.history.path.clone());
    println!("\nJournal: {} undoable move(s)", history.get_undoable()?.len());

    println!("\nWatcher:");
    println!("  Auto start: {}", config.watcher.auto_start);
    if let Some(last) = config.watcher.last_active {
        println!("  Last active: {}", last.format("%Y-%m-%d %H:%M"));
    }
    for folder in &config.watcher.folders {
        let instruction = if folder.instruction.is_empty() { "-" } else { folder.instruction.as_str() };
        println!("  {}  ({})", folder.path.display(), instruction);
    }

    Ok(())
}

/// Write a default configuration
fn run_init(config_path: &Path, force: bool) -> Result<()> {
    if config_path.exists() && !force {
        return Err(OrganizerError::Config(format!(
            "{} already exists. Use --force to overwrite",
            config_path.display()
        )));
    }

    let config = AppConfig::default();
    config.save(config_path)?;

    println!("Configuration written to {:?}", config_path);
    println!("\nNext steps:");
    println!("  1. Set OPENAI_API_KEY, or set ai.provider to \"local\" and start Ollama");
    println!("  2. Organize a folder: organizer organize ~/Downloads");
    println!("  3. Watch folders: add them under watcher.folders, then run organizer watch");

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parsing() {
        let cli = Cli::try_parse_from(["organizer"]).unwrap();
        assert!(!cli.verbose);
        assert!(cli.command.is_none());
        assert_eq!(cli.format, "text");
    }

    #[test]
    fn test_cli_organize_command() {
        let cli = Cli::try_parse_from([
            "organizer", "organize", "/tmp/downloads", "-i", "group by project", "--dry-run"
        ]).unwrap();

        match cli.command {
            Some(Commands::Organize { folder, instruction, dry_run, yes, rules, .. }) => {
                assert_eq!(folder, PathBuf::from("/tmp/downloads"));
                assert_eq!(instruction.as_deref(), Some("group by project"));
                assert!(dry_run);
                assert!(!yes);
                assert!(!rules);
            }
            _ => panic!("Expected Organize command"),
        }
    }

    #[test]
    fn test_cli_watch_command() {
        let cli = Cli::try_parse_from([
            "organizer", "watch", "--dir", "/tmp/a", "--dir", "/tmp/b", "--catch-up"
        ]).unwrap();

        match cli.command {
            Some(Commands::Watch { dir, catch_up, organize_existing, .. }) => {
                assert_eq!(dir, vec![PathBuf::from("/tmp/a"), PathBuf::from("/tmp/b")]);
                assert!(catch_up);
                assert!(!organize_existing);
            }
            _ => panic!("Expected Watch command"),
        }
    }

    #[test]
    fn test_cli_db_tag_ids_are_comma_separated() {
        let cli = Cli::try_parse_from([
            "organizer", "db", "tag", "--ids", "1,2,3", "work", "2024"
        ]).unwrap();

        match cli.command {
            Some(Commands::Db { action: DbCommands::Tag { ids, tags } }) => {
                assert_eq!(ids, vec![1, 2, 3]);
                assert_eq!(tags, vec!["work".to_string(), "2024".to_string()]);
            }
            _ => panic!("Expected Db Tag command"),
        }
    }

    #[test]
    fn test_cli_export_format() {
        let cli = Cli::try_parse_from([
            "organizer", "db", "export", "out.txt", "--export-format", "csv"
        ]).unwrap();

        match cli.command {
            Some(Commands::Db { action: DbCommands::Export { export_format, .. } }) => {
                assert_eq!(export_format, Some(ExportFormat::Csv));
            }
            _ => panic!("Expected Db Export command"),
        }
    }

    #[test]
    fn test_cli_package_and_global_flags() {
        let cli = Cli::try_parse_from([
            "organizer", "package", "--compile", "--app-version", "1.2.0", "--config", "/tmp/c.json", "-q"
        ]).unwrap();

        assert_eq!(cli.config, Some(PathBuf::from("/tmp/c.json")));
        assert!(cli.quiet);
        match cli.command {
            Some(Commands::Package { compile, version, dist, .. }) => {
                assert!(compile);
                assert_eq!(version.as_deref(), Some("1.2.0"));
                assert_eq!(dist, PathBuf::from("dist"));
            }
            _ => panic!("Expected Package command"),
        }
    }

    #[test]
    fn test_cli_rejects_unknown_format() {
        assert!(Cli::try_parse_from(["organizer", "--format", "xml", "status"]).is_err());
    }

    #[test]
    fn test_cli_search_requires_query() {
        assert!(Cli::try_parse_from(["organizer", "search"]).is_err());
        let cli = Cli::try_parse_from(["organizer", "search", "pdfs", "last", "week"]).unwrap();
        match cli.command {
            Some(Commands::Search { query, limit }) => {
                assert_eq!(query.join(" "), "pdfs last week");
                assert_eq!(limit, 20);
            }
            _ => panic!("Expected Search command"),
        }
    }

    #[tokio::test]
    async fn test_prompts_share_buffered_answers() {
        let mut answers = BufReader::new(&b"make a Work folder\ny\n"[..]).lines();
        assert_eq!(prompt_line(&mut answers, "").await.unwrap(), "make a Work folder");
        assert_eq!(prompt_line(&mut answers, "").await.unwrap(), "y");
        assert_eq!(prompt_line(&mut answers, "").await.unwrap(), "");
    }

    #[test]
    fn test_auto_start_needs_folders() {
        let mut watcher = WatcherConfig::default();
        assert!(watcher.auto_start);
        assert!(!starts_watching(&watcher));

        watcher.folders.push(WatchedFolder {
            path: PathBuf::from("/tmp/inbox"),
            instruction: String::new(),
        });
        assert!(starts_watching(&watcher));

        watcher.auto_start = false;
        assert!(!starts_watching(&watcher));
    }

    #[test]
    fn test_cli_history_undo_count() {
        let cli = Cli::try_parse_from([
            "organizer", "-c", "/tmp/c.json", "history", "undo", "-n", "3", "--dry-run"
        ]).unwrap();
        assert_eq!(cli.config, Some(PathBuf::from("/tmp/c.json")));
        match cli.command {
            Some(Commands::History { action: HistoryCommands::Undo { count, dry_run } }) => {
                assert_eq!(count, 3);
                assert!(dry_run);
            }
            _ => panic!("Expected History Undo command"),
        }
    }
}
