// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

//! Move journal for undo support

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use crate::fsops::move_file;
use crate::Result;

/// A single file move in the journal
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MoveRecord {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub source: PathBuf,
    pub destination: PathBuf,
    pub category: Option<String>,
    #[serde(default)]
    pub file_id: Option<i64>,
    #[serde(default)]
    pub undone: bool,
}

impl MoveRecord {
    pub fn new(source: PathBuf, destination: PathBuf, category: Option<String>, file_id: Option<i64>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            timestamp: Utc::now(),
            source,
            destination,
            category,
            file_id,
            undone: false,
        }
    }
}

/// What happened to one record during undo
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum UndoAction {
    Restored,
    WouldRestore,
    /// Destination no longer exists
    Missing,
    /// Something already occupies the original location
    Occupied,
    Failed(String),
}

#[derive(Debug, Clone, Serialize)]
pub struct UndoOutcome {
    pub record: MoveRecord,
    pub action: UndoAction,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct UndoReport {
    pub outcomes: Vec<UndoOutcome>,
}

impl UndoReport {
    pub fn restored(&self) -> usize {
        self.count(|a| matches!(a, UndoAction::Restored | UndoAction::WouldRestore))
    }

    pub fn skipped(&self) -> usize {
        self.outcomes.len() - self.restored()
    }

    fn count(&self, pred: impl Fn(&UndoAction) -> bool) -> usize {
        self.outcomes.iter().filter(|o| pred(&o.action)).count()
    }
}

/// Append-only JSONL journal of file moves
#[derive(Debug, Clone)]
pub struct History {
    path: PathBuf,
}

impl History {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    /// Append a record, creating the journal directory on first use
    pub fn append(&self, record: &MoveRecord) -> Result<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;

        let json = serde_json::to_string(record)?;
        writeln!(file, "{}", json)?;

        Ok(())
    }

    /// Read all records, oldest first; unreadable lines are skipped
    pub fn read_all(&self) -> Result<Vec<MoveRecord>> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }

        let reader = BufReader::new(File::open(&self.path)?);

        let mut records = Vec::new();
        for line in reader.lines() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str(&line) {
                Ok(record) => records.push(record),
                Err(e) => warn!("Failed to parse journal entry: {}", e),
            }
        }

        Ok(records)
    }

    /// The most recent N records (newest first)
    pub fn get_recent(&self, count: usize) -> Result<Vec<MoveRecord>> {
        let mut records = self.read_all()?;
        records.reverse();
        records.truncate(count);
        Ok(records)
    }

    /// Records not yet undone (newest first)
    pub fn get_undoable(&self) -> Result<Vec<MoveRecord>> {
        let mut records: Vec<MoveRecord> = self.read_all()?.into_iter().filter(|r| !r.undone).collect();
        records.reverse();
        Ok(records)
    }

    /// Flag records as undone by id
    pub fn mark_undone(&self, ids: &[&str]) -> Result<()> {
        let ids: HashSet<&str> = ids.iter().copied().collect();
        if ids.is_empty() {
            return Ok(());
        }

        let records = self.read_all()?;
        let mut writer = BufWriter::new(File::create(&self.path)?);
        for mut record in records {
            if ids.contains(record.id.as_str()) {
                record.undone = true;
            }
            writeln!(writer, "{}", serde_json::to_string(&record)?)?;
        }
        writer.flush()?;
        Ok(())
    }

    pub fn clear(&self) -> Result<()> {
        if self.path.exists() {
            fs::remove_file(&self.path)?;
        }
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Move the newest `count` undoable files back (0 = all)
    pub fn undo(&self, count: usize, dry_run: bool) -> Result<UndoReport> {
        let undoable = self.get_undoable()?;
        let count = if count == 0 { undoable.len() } else { count.min(undoable.len()) };

        let mut report = UndoReport::default();
        let mut restored_ids = Vec::new();

        for record in undoable.into_iter().take(count) {
            let action = if !record.destination.exists() {
                UndoAction::Missing
            } else if record.source.exists() {
                UndoAction::Occupied
            } else if dry_run {
                UndoAction::WouldRestore
            } else {
                match move_file(&record.destination, &record.source) {
                    Ok(()) => {
                        info!("Undone: {:?} -> {:?}", record.destination, record.source);
                        restored_ids.push(record.id.clone());
                        UndoAction::Restored
                    }
                    Err(e) => {
                        warn!("Failed to undo {:?}: {}", record.destination, e);
                        UndoAction::Failed(e.to_string())
                    }
                }
            };
            report.outcomes.push(UndoOutcome { record, action });
        }

        let ids: Vec<&str> = restored_ids.iter().map(String::as_str).collect();
        self.mark_undone(&ids)?;
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn journal(dir: &TempDir) -> History {
        History::new(dir.path().join("moves").join("moves.jsonl"))
    }

    #[test]
    fn test_append_creates_directory() {
        let dir = TempDir::new().unwrap();
        let history = journal(&dir);
        history
            .append(&MoveRecord::new("a".into(), "b".into(), None, Some(1)))
            .unwrap();
        assert!(history.path().exists());
        assert_eq!(history.read_all().unwrap().len(), 1);
    }

    #[test]
    fn test_recent_is_newest_first() {
        let dir = TempDir::new().unwrap();
        let history = journal(&dir);
        for i in 0..3 {
            history
                .append(&MoveRecord::new(format!("s{}", i).into(), format!("d{}", i).into(), None, None))
                .unwrap();
        }
        let recent = history.get_recent(2).unwrap();
        assert_eq!(recent[0].source, PathBuf::from("s2"));
        assert_eq!(recent[1].source, PathBuf::from("s1"));
    }

    #[test]
    fn test_corrupt_lines_are_skipped() {
        let dir = TempDir::new().unwrap();
        let history = journal(&dir);
        history.append(&MoveRecord::new("a".into(), "b".into(), None, None)).unwrap();
        let mut file = OpenOptions::new().append(true).open(history.path()).unwrap();
        writeln!(file, "{{not json").unwrap();
        assert_eq!(history.read_all().unwrap().len(), 1);
    }

    #[test]
    fn test_undo_restores_and_marks() {
        let dir = TempDir::new().unwrap();
        let history = journal(&dir);
        let src = dir.path().join("a.txt");
        let dst = dir.path().join("Documents").join("a.txt");
        fs::create_dir_all(dst.parent().unwrap()).unwrap();
        fs::write(&dst, b"x").unwrap();
        history.append(&MoveRecord::new(src.clone(), dst.clone(), Some("Documents".into()), None)).unwrap();

        let dry = history.undo(1, true).unwrap();
        assert_eq!(dry.outcomes[0].action, UndoAction::WouldRestore);
        assert!(dst.exists());

        let report = history.undo(1, false).unwrap();
        assert_eq!(report.restored(), 1);
        assert!(src.exists());
        assert!(!dst.exists());
        assert!(history.get_undoable().unwrap().is_empty());
    }

    #[test]
    fn test_undo_skips_missing_and_occupied() {
        let dir = TempDir::new().unwrap();
        let history = journal(&dir);

        let gone = MoveRecord::new(dir.path().join("x"), dir.path().join("vanished"), None, None);
        history.append(&gone).unwrap();

        let src = dir.path().join("taken.txt");
        let dst = dir.path().join("moved.txt");
        fs::write(&src, b"new").unwrap();
        fs::write(&dst, b"old").unwrap();
        history.append(&MoveRecord::new(src, dst, None, None)).unwrap();

        let report = history.undo(0, false).unwrap();
        assert_eq!(report.outcomes[0].action, UndoAction::Occupied);
        assert_eq!(report.outcomes[1].action, UndoAction::Missing);
        assert_eq!(report.skipped(), 2);
        assert_eq!(history.get_undoable().unwrap().len(), 2);
    }
}
