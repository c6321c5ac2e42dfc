// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

//! Organizer Undo Utility
//!
//! Moves files back to where they were before the organizer touched them,
//! using the move journal.

use anyhow::{Context, Result};
use chrono::Local;
use clap::Parser;
use std::path::PathBuf;

use ai_file_organizer::config::{default_config_path, AppConfig};
use ai_file_organizer::history::{History, UndoAction};

#[derive(Parser, Debug)]
#[command(name = "organizer-undo")]
#[command(version)]
#[command(about = "Undo AI File Organizer moves")]
struct Args {
    /// Path to the move journal (default: from the config)
    #[arg(short = 'f', long)]
    history_file: Option<PathBuf>,

    /// Configuration file used to find the journal
    #[arg(long)]
    config: Option<PathBuf>,

    /// Number of moves to undo (default: 1, use 0 for all)
    #[arg(short, long, default_value = "1")]
    count: usize,

    /// Dry run - show what would be undone without doing it
    #[arg(long)]
    dry_run: bool,

    /// List all entries in the journal
    #[arg(long)]
    list: bool,
}

impl Args {
    fn journal_path(&self) -> Result<PathBuf> {
        if let Some(path) = &self.history_file {
            return Ok(path.clone());
        }
        let config_path = self.config.clone().unwrap_or_else(default_config_path);
        let config = AppConfig::load(&config_path)
            .with_context(|| format!("Failed to load config {:?}", config_path))?;
        Ok(config.history.path)
    }
}

fn main() -> Result<()> {
    let args = Args::parse();
    let history = History::new(args.journal_path()?);

    if !history.path().exists() {
        eprintln!("Journal not found: {:?}", history.path());
        eprintln!("No moves to undo.");
        return Ok(());
    }

    if args.list {
        let entries = history.get_recent(usize::MAX)?;
        println!("Move History ({} entries):", entries.len());
        println!("{:-<80}", "");
        for (i, entry) in entries.iter().enumerate() {
            println!(
                "{:3}. [{}] {} -> {}{}",
                i + 1,
                entry.timestamp.with_timezone(&Local).format("%Y-%m-%d %H:%M:%S"),
                entry.source.display(),
                entry.destination.display(),
                if entry.undone { " (undone)" } else { "" }
            );
            if let Some(category) = &entry.category {
                println!("     Folder: {}", category);
            }
        }
        return Ok(());
    }

    let pending = history.get_undoable()?.len();
    if pending == 0 {
        println!("No moves to undo.");
        return Ok(());
    }
    let count = if args.count == 0 { pending } else { args.count.min(pending) };

    println!(
        "{}Undoing {} move(s)...",
        if args.dry_run { "[DRY RUN] " } else { "" },
        count
    );

    let report = history
        .undo(count, args.dry_run)
        .context("Failed to undo moves")?;

    for outcome in &report.outcomes {
        let record = &outcome.record;
        match &outcome.action {
            UndoAction::Restored => {
                println!("  Undone: {} -> {}", record.destination.display(), record.source.display())
            }
            UndoAction::WouldRestore => {
                println!("  Would move: {} -> {}", record.destination.display(), record.source.display())
            }
            UndoAction::Missing => eprintln!(
                "  Skip: {} (file not found, may have been moved/deleted)",
                record.destination.display()
            ),
            UndoAction::Occupied => eprintln!(
                "  Skip: {} (original path already exists)",
                record.source.display()
            ),
            UndoAction::Failed(e) => eprintln!("  Failed: {} ({})", record.destination.display(), e),
        }
    }

    println!();
    if args.dry_run {
        println!("Dry run complete. {} move(s) would be undone.", report.restored());
    } else {
        println!("Done. {} undone, {} failed/skipped.", report.restored(), report.skipped());
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_explicit_journal_wins() {
        let args = Args::try_parse_from(["organizer-undo", "-f", "/tmp/moves.jsonl", "--count", "0"]).unwrap();
        assert_eq!(args.journal_path().unwrap(), PathBuf::from("/tmp/moves.jsonl"));
        assert_eq!(args.count, 0);
    }

    #[test]
    fn test_journal_from_config() {
        let dir = tempfile::TempDir::new().unwrap();
        let config_path = dir.path().join("config.json");
        let mut config = AppConfig::default();
        config.history.path = dir.path().join("journal.jsonl");
        config.save(&config_path).unwrap();

        let args = Args::try_parse_from(["organizer-undo", "--config", config_path.to_str().unwrap()]).unwrap();
        assert_eq!(args.journal_path().unwrap(), dir.path().join("journal.jsonl"));
    }
}
