// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

//! Auto-organize watcher
//!
//! New files in a watched folder are picked up by filesystem events and
//! by a periodic snapshot diff, held back until they stop changing, then
//! indexed and organized with the folder's instruction.

use chrono::{DateTime, Utc};
use notify::{Config, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, warn};
use walkdir::WalkDir;

use crate::config::{WatchedFolder, WatcherConfig};
use crate::db::FileRecord;
use crate::fsops::{absolutize, cleanup_empty_folders};
use crate::indexer::{IndexOutcome, Indexer};
use crate::organizer::{ExecutionReport, Organizer};
use crate::Result;

/// Wait between the two size samples of the stability check
const STABILITY_INTERVAL: Duration = Duration::from_millis(500);

/// True when the file exists and its size is unchanged over `interval`
pub async fn is_stable(path: &Path, interval: Duration) -> bool {
    let first = match tokio::fs::metadata(path).await {
        Ok(m) => m.len(),
        Err(_) => return false,
    };

    tokio::time::sleep(interval).await;

    match tokio::fs::metadata(path).await {
        Ok(m) if m.len() == first => true,
        Ok(m) => {
            debug!("File {:?} still being written, size: {}", path, m.len());
            false
        }
        Err(_) => false,
    }
}

fn scan_top_level(folder: &Path) -> HashSet<PathBuf> {
    match std::fs::read_dir(folder) {
        Ok(entries) => entries
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .filter(|p| p.is_file())
            .collect(),
        Err(e) => {
            warn!("Error scanning folder {:?}: {}", folder, e);
            HashSet::new()
        }
    }
}

fn scan_recursive(folder: &Path) -> Vec<PathBuf> {
    WalkDir::new(folder)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .map(|e| e.into_path())
        .collect()
}

fn lowercase(path: &Path) -> String {
    path.to_string_lossy().to_lowercase()
}

fn modified_after(path: &Path, since: DateTime<Utc>) -> bool {
    std::fs::metadata(path)
        .and_then(|m| m.modified())
        .map(|t| DateTime::<Utc>::from(t) > since)
        .unwrap_or(true)
}

/// Watches folders and organizes what lands in them
pub struct AutoWatcher {
    folders: Vec<WatchedFolder>,
    instruction: String,
    poll_interval: Duration,
    debounce: Duration,
    organizer: Organizer,
    indexer: Indexer,
    known: HashMap<PathBuf, HashSet<PathBuf>>,
    pending: HashMap<PathBuf, Instant>,
}

impl AutoWatcher {
    pub fn new(config: &WatcherConfig, organizer: Organizer, indexer: Indexer) -> Self {
        let mut watcher = Self {
            folders: Vec::new(),
            instruction: config.instruction.clone(),
            poll_interval: Duration::from_millis(config.poll_interval_ms.max(1)),
            debounce: Duration::from_millis(config.debounce_ms),
            organizer,
            indexer,
            known: HashMap::new(),
            pending: HashMap::new(),
        };
        for folder in &config.folders {
            watcher.add_folder(&folder.path, &folder.instruction);
        }
        watcher
    }

    /// Start watching a folder; false when it does not exist or is already watched
    pub fn add_folder(&mut self, path: &Path, instruction: &str) -> bool {
        let path = absolutize(path);
        let path = path.as_path();
        if !path.is_dir() {
            warn!("Cannot watch non-existent folder: {:?}", path);
            return false;
        }
        if self.folders.iter().any(|f| f.path == path) {
            return false;
        }

        let existing = scan_top_level(path);
        info!("Added watch folder: {:?} ({} existing files)", path, existing.len());
        self.known.insert(path.to_path_buf(), existing);
        self.folders.push(WatchedFolder {
            path: path.to_path_buf(),
            instruction: instruction.to_string(),
        });
        true
    }

    pub fn remove_folder(&mut self, path: &Path) -> bool {
        let before = self.folders.len();
        self.folders.retain(|f| f.path != path);
        self.known.remove(path);
        self.pending.retain(|p, _| !p.starts_with(path));
        before != self.folders.len()
    }

    pub fn folders(&self) -> &[WatchedFolder] {
        &self.folders
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// The folder's own instruction, else the global one
    pub fn instruction_for(&self, folder: &Path) -> Option<String> {
        self.folders
            .iter()
            .find(|f| f.path == folder)
            .map(|f| f.instruction.trim())
            .filter(|i| !i.is_empty())
            .or_else(|| Some(self.instruction.trim()).filter(|i| !i.is_empty()))
            .map(str::to_string)
    }

    pub fn has_instructions(&self) -> bool {
        !self.instruction.trim().is_empty() || self.folders.iter().any(|f| !f.instruction.trim().is_empty())
    }

    /// The watched folder containing `path`, compared case-insensitively
    pub fn find_parent_watched_folder(&self, path: &Path) -> Option<&Path> {
        let target = lowercase(path);
        self.folders
            .iter()
            .filter(|f| {
                let folder = lowercase(&f.path);
                target == folder
                    || target
                        .strip_prefix(&folder)
                        .is_some_and(|rest| rest.starts_with(['/', '\\']))
            })
            .max_by_key(|f| f.path.as_os_str().len())
            .or_else(|| self.folders.first())
            .map(|f| f.path.as_path())
    }

    /// Diff top-level snapshots and queue new files
    pub fn check_for_new_files(&mut self) {
        let now = Instant::now();
        for folder in &self.folders {
            if !folder.path.is_dir() {
                continue;
            }
            let current = scan_top_level(&folder.path);
            let known = self.known.entry(folder.path.clone()).or_default();
            for path in current.difference(known) {
                if !self.pending.contains_key(path) {
                    debug!("New file detected: {:?}", path);
                    self.pending.insert(path.clone(), now);
                }
            }
            *known = current;
        }
    }

    /// Queue a file reported by a filesystem event
    fn note_event(&mut self, event: Event) {
        if !matches!(event.kind, EventKind::Create(_) | EventKind::Modify(_)) {
            return;
        }
        for path in event.paths {
            let watched = path
                .parent()
                .is_some_and(|parent| self.folders.iter().any(|f| f.path == parent));
            if watched && path.is_file() {
                self.pending.entry(path).or_insert_with(Instant::now);
            }
        }
    }

    /// Pending files past the debounce time that have stopped changing
    async fn take_ready(&mut self) -> Vec<PathBuf> {
        let due: Vec<PathBuf> = self
            .pending
            .iter()
            .filter(|(_, seen)| seen.elapsed() >= self.debounce)
            .map(|(p, _)| p.clone())
            .collect();

        let mut ready = Vec::new();
        for path in due {
            if !path.exists() {
                self.pending.remove(&path);
                continue;
            }
            if !is_stable(&path, STABILITY_INTERVAL).await {
                continue;
            }
            self.pending.remove(&path);
            if self.organizer.categorizer().should_ignore(&path) {
                debug!("Ignoring file: {:?}", path);
                continue;
            }
            ready.push(path);
        }
        ready
    }

    async fn index_all(&self, paths: &[PathBuf]) -> Vec<FileRecord> {
        let mut records = Vec::new();
        for (i, path) in paths.iter().enumerate() {
            if i % 5 == 0 || i + 1 == paths.len() {
                self.organizer.status(format!("Processing {}/{} files...", i + 1, paths.len()));
            }
            let id = match self.indexer.index_file(path, false).await {
                Ok(IndexOutcome::Indexed(id)) | Ok(IndexOutcome::Unchanged(id)) => id,
                Ok(_) => continue,
                Err(e) => {
                    warn!("Failed to index {:?}: {}", path, e);
                    continue;
                }
            };
            match self.indexer.index().get_file(id) {
                Ok(Some(record)) => records.push(record),
                Ok(None) => {}
                Err(e) => warn!("Failed to read index entry {}: {}", id, e),
            }
        }
        records
    }

    fn group_by_folder(&self, records: Vec<FileRecord>) -> Vec<(PathBuf, Option<String>, Vec<FileRecord>)> {
        let mut groups: Vec<(PathBuf, Option<String>, Vec<FileRecord>)> = Vec::new();
        for record in records {
            let Some(folder) = self.find_parent_watched_folder(Path::new(&record.file_path)) else {
                continue;
            };
            match groups.iter_mut().find(|(f, _, _)| f == folder) {
                Some((_, _, list)) => list.push(record),
                None => {
                    let instruction = self.instruction_for(folder);
                    groups.push((folder.to_path_buf(), instruction, vec![record]));
                }
            }
        }
        groups
    }

    /// Organize files whose debounce and stability checks have passed
    pub async fn process_pending(&mut self) -> ExecutionReport {
        let ready = self.take_ready().await;
        if ready.is_empty() {
            return ExecutionReport::default();
        }

        let records = self.index_all(&ready).await;
        let groups = self.group_by_folder(records);
        self.organizer.organize_groups(groups).await
    }

    /// Organize what is already in folders that have an instruction
    ///
    /// With `since`, only files modified after it are touched.
    pub async fn organize_existing(&mut self, since: Option<DateTime<Utc>>) -> ExecutionReport {
        let mut report = ExecutionReport::default();
        let folders: Vec<PathBuf> = self.folders.iter().map(|f| f.path.clone()).collect();

        for folder in &folders {
            let Some(instruction) = self.instruction_for(folder) else {
                info!("Skipping {:?} - no instruction provided", folder);
                continue;
            };

            let files: Vec<PathBuf> = scan_recursive(folder)
                .into_iter()
                .filter(|p| !self.organizer.categorizer().should_ignore(p))
                .filter(|p| since.map_or(true, |s| modified_after(p, s)))
                .collect();

            if files.is_empty() {
                info!("No files to organize in {:?}", folder);
                continue;
            }

            self.organizer.status(format!("Organizing {} files in {:?}...", files.len(), folder));
            let records = self.index_all(&files).await;
            let batch = self.organizer.organize_with_instruction(&records, folder, &instruction).await;
            report.moved.extend(batch.moved);
            report.failed += batch.failed;
        }

        self.cleanup();
        info!("Finished organizing existing files");
        report
    }

    /// Remove empty subfolders left behind in every watched folder
    pub fn cleanup(&mut self) -> usize {
        let mut removed = 0;
        for folder in &self.folders {
            let count = cleanup_empty_folders(&folder.path);
            if count > 0 {
                self.organizer.status(format!("Cleaned up {} empty folder(s)", count));
            }
            removed += count;
        }
        for folder in &self.folders {
            self.known.insert(folder.path.clone(), scan_top_level(&folder.path));
        }
        removed
    }

    /// Watch until `shutdown` turns true
    pub async fn run(
        mut self,
        mut shutdown: watch::Receiver<bool>,
        organize_existing: bool,
        since: Option<DateTime<Utc>>,
    ) -> Result<()> {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let config = Config::default().with_poll_interval(self.poll_interval);
        let mut fs_watcher = RecommendedWatcher::new(
            move |res: notify::Result<Event>| {
                let _ = tx.send(res);
            },
            config,
        )?;
        for folder in &self.folders {
            fs_watcher.watch(&folder.path, RecursiveMode::NonRecursive)?;
            info!("Watching: {:?}", folder.path);
        }

        if organize_existing && self.has_instructions() {
            self.organizer.status("Organizing existing files in background...");
            self.organize_existing(since).await;
        }
        self.organizer.status(format!("Watching {} folder(s)...", self.folders.len()));

        let mut ticker = tokio::time::interval(self.poll_interval);
        loop {
            if *shutdown.borrow() {
                break;
            }
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
                Some(event) = rx.recv() => match event {
                    Ok(event) => self.note_event(event),
                    Err(e) => warn!("Watch error: {}", e),
                },
                _ = ticker.tick() => {
                    self.check_for_new_files();
                    let report = self.process_pending().await;
                    if report.failed > 0 {
                        error!("{} file(s) failed to move", report.failed);
                    }
                }
            }
        }

        drop(fs_watcher);
        self.organizer.status("Watcher stopped");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::categorizer::Categorizer;
    use crate::db::FileIndex;
    use crate::history::History;
    use std::fs;
    use tempfile::TempDir;

    fn watcher_for(dir: &TempDir, folders: Vec<WatchedFolder>, instruction: &str) -> AutoWatcher {
        let index = FileIndex::in_memory().unwrap();
        let history = History::new(dir.path().join("moves.jsonl"));
        let organizer = Organizer::new(index.clone(), history, Categorizer::default(), None);
        let indexer = Indexer::new(index, Categorizer::default());
        let config = WatcherConfig {
            folders,
            instruction: instruction.to_string(),
            debounce_ms: 0,
            poll_interval_ms: 50,
            ..WatcherConfig::default()
        };
        AutoWatcher::new(&config, organizer, indexer)
    }

    fn folder(path: PathBuf, instruction: &str) -> WatchedFolder {
        WatchedFolder { path, instruction: instruction.to_string() }
    }

    #[test]
    fn test_parent_folder_is_case_insensitive() {
        let dir = TempDir::new().unwrap();
        let a = dir.path().join("Downloads");
        let b = dir.path().join("Desktop");
        fs::create_dir_all(&a).unwrap();
        fs::create_dir_all(&b).unwrap();
        let w = watcher_for(&dir, vec![folder(a.clone(), ""), folder(b.clone(), "")], "");

        let upper = PathBuf::from(b.to_string_lossy().to_uppercase()).join("x.txt");
        assert_eq!(w.find_parent_watched_folder(&upper), Some(b.as_path()));
        assert_eq!(w.find_parent_watched_folder(&a.join("sub/y.txt")), Some(a.as_path()));
    }

    #[test]
    fn test_instruction_fallback() {
        let dir = TempDir::new().unwrap();
        let a = dir.path().join("a");
        let b = dir.path().join("b");
        fs::create_dir_all(&a).unwrap();
        fs::create_dir_all(&b).unwrap();
        let w = watcher_for(&dir, vec![folder(a.clone(), "by project"), folder(b.clone(), " ")], "by type");
        assert_eq!(w.instruction_for(&a).as_deref(), Some("by project"));
        assert_eq!(w.instruction_for(&b).as_deref(), Some("by type"));
        assert!(w.has_instructions());
    }

    #[test]
    fn test_add_folder_rejects_missing_and_duplicates() {
        let dir = TempDir::new().unwrap();
        let mut w = watcher_for(&dir, vec![], "");
        assert!(!w.add_folder(&dir.path().join("nope"), ""));
        assert!(w.add_folder(dir.path(), ""));
        assert!(!w.add_folder(dir.path(), ""));
        assert!(w.remove_folder(dir.path()));
        assert!(w.folders().is_empty());
    }

    #[test]
    fn test_relative_folder_is_watched_absolute() {
        let dir = TempDir::new().unwrap();
        let inbox = tempfile::Builder::new().prefix("watch-relative").tempdir_in(".").unwrap();
        let relative = PathBuf::from(inbox.path().file_name().unwrap());
        let mut w = watcher_for(&dir, vec![], "");

        assert!(w.add_folder(&relative, "by type"));
        assert!(w.folders()[0].path.is_absolute());
        let absolute = std::env::current_dir().unwrap().join(&relative);
        assert!(!w.add_folder(&absolute, ""));
        assert_eq!(w.instruction_for(&absolute).as_deref(), Some("by type"));
    }

    #[tokio::test]
    async fn test_new_file_is_organized_by_rules() {
        let dir = TempDir::new().unwrap();
        let watched = dir.path().join("inbox");
        fs::create_dir_all(&watched).unwrap();
        fs::write(watched.join("old.txt"), b"already here").unwrap();
        let mut w = watcher_for(&dir, vec![folder(watched.clone(), "")], "");

        fs::write(watched.join("photo.jpg"), b"jpeg").unwrap();
        w.check_for_new_files();
        assert_eq!(w.pending_count(), 1);

        let report = w.process_pending().await;
        assert_eq!(report.moved.len(), 1);
        assert!(watched.join("Images/photo.jpg").exists());
        assert!(watched.join("old.txt").exists());
        assert_eq!(w.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_catch_up_only_touches_newer_files() {
        let dir = TempDir::new().unwrap();
        let watched = dir.path().join("inbox");
        fs::create_dir_all(watched.join("nested")).unwrap();
        fs::write(watched.join("nested/old.pdf"), b"old").unwrap();
        let mut w = watcher_for(&dir, vec![folder(watched.clone(), "")], "by type");

        let future = Utc::now() + chrono::Duration::days(1);
        assert!(w.organize_existing(Some(future)).await.moved.is_empty());

        let report = w.organize_existing(None).await;
        assert_eq!(report.moved.len(), 1);
        assert!(watched.join("nested/Documents/old.pdf").exists());
    }

    #[tokio::test]
    async fn test_run_stops_on_shutdown() {
        let dir = TempDir::new().unwrap();
        let w = watcher_for(&dir, vec![folder(dir.path().to_path_buf(), "")], "");
        let (tx, rx) = watch::channel(false);

        let handle = tokio::spawn(w.run(rx, false, None));
        tokio::time::sleep(Duration::from_millis(100)).await;
        tx.send(true).unwrap();

        let result = tokio::time::timeout(Duration::from_secs(5), handle).await;
        assert!(result.unwrap().unwrap().is_ok());
    }
}
