// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

//! Executes organization: plans from the model, or rules when there is none

use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use tokio::sync::broadcast;
use tracing::{error, info, warn};
use walkdir::WalkDir;

use crate::ai::LanguageModel;
use crate::categorizer::Categorizer;
use crate::db::{FileIndex, FileRecord};
use crate::fsops::{absolutize, move_file, unique_destination_excluding};
use crate::history::{History, MoveRecord};
use crate::planner::{self, MoveSkips, OrganizationPlan, PlanSummary, PlannedMove};
use crate::Result;

/// Deepest folder a plan may create
pub const MAX_PLAN_DEPTH: usize = 2;

/// Progress notifications for the CLI and the watcher
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OrganizerEvent {
    FileOrganized {
        source: PathBuf,
        destination: PathBuf,
        category: String,
    },
    Error {
        path: PathBuf,
        message: String,
    },
    Status(String),
}

/// Result of executing a batch of moves
#[derive(Debug, Clone, Default, Serialize)]
pub struct ExecutionReport {
    pub moved: Vec<MoveRecord>,
    pub failed: usize,
}

impl ExecutionReport {
    fn merge(&mut self, other: ExecutionReport) {
        self.moved.extend(other.moved);
        self.failed += other.failed;
    }
}

/// A checked plan, ready to show the user
#[derive(Debug, Clone)]
pub struct Proposal {
    pub plan: OrganizationPlan,
    pub errors: Vec<String>,
    pub moves: Vec<PlannedMove>,
    pub skips: MoveSkips,
    pub summary: PlanSummary,
}

impl Proposal {
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }
}

/// A rule-based move, planned or done
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RuleMove {
    pub source: PathBuf,
    pub destination: PathBuf,
    pub category: String,
}

pub struct Organizer {
    index: FileIndex,
    history: History,
    categorizer: Categorizer,
    model: Option<Box<dyn LanguageModel>>,
    events: broadcast::Sender<OrganizerEvent>,
}

impl Organizer {
    pub fn new(
        index: FileIndex,
        history: History,
        categorizer: Categorizer,
        model: Option<Box<dyn LanguageModel>>,
    ) -> Self {
        let (events, _) = broadcast::channel(256);
        Self { index, history, categorizer, model, events }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<OrganizerEvent> {
        self.events.subscribe()
    }

    pub fn model(&self) -> Option<&dyn LanguageModel> {
        self.model.as_deref()
    }

    pub fn categorizer(&self) -> &Categorizer {
        &self.categorizer
    }

    pub fn index(&self) -> &FileIndex {
        &self.index
    }

    pub fn status(&self, message: impl Into<String>) {
        let message = message.into();
        info!("{}", message);
        // No subscribers is fine
        let _ = self.events.send(OrganizerEvent::Status(message));
    }

    /// Journal and index entries always carry absolute paths
    fn move_one(&self, source: &Path, destination: &Path, category: &str, file_id: Option<i64>) -> Option<MoveRecord> {
        let (source, destination) = (absolutize(source), absolutize(destination));
        let (source, destination) = (source.as_path(), destination.as_path());
        if let Err(e) = move_file(source, destination) {
            error!("Failed to move {:?}: {}", source, e);
            let _ = self.events.send(OrganizerEvent::Error {
                path: source.to_path_buf(),
                message: e.to_string(),
            });
            return None;
        }

        info!(
            "Organized: {} -> {}/",
            source.file_name().map(|n| n.to_string_lossy()).unwrap_or_default(),
            category
        );

        let record = MoveRecord::new(
            source.to_path_buf(),
            destination.to_path_buf(),
            Some(category.to_string()),
            file_id,
        );
        if let Err(e) = self.history.append(&record) {
            warn!("Failed to journal move of {:?}: {}", source, e);
        }

        let file_id = file_id.or_else(|| {
            self.index
                .get_file_by_path(&source.to_string_lossy())
                .ok()
                .flatten()
                .map(|r| r.id)
        });
        if let Some(id) = file_id {
            if let Err(e) = self.index.update_file_path(id, destination) {
                warn!("Failed to update index path for {:?}: {}", source, e);
            }
        }

        let _ = self.events.send(OrganizerEvent::FileOrganized {
            source: source.to_path_buf(),
            destination: destination.to_path_buf(),
            category: category.to_string(),
        });
        Some(record)
    }

    /// Perform planned moves, journaling each one
    pub fn execute_moves(&self, moves: &[PlannedMove]) -> ExecutionReport {
        let mut report = ExecutionReport::default();
        for m in moves {
            match self.move_one(&m.source, &m.destination, &m.folder, Some(m.file_id)) {
                Some(record) => report.moved.push(record),
                None => report.failed += 1,
            }
        }
        self.status(format!("Organized {} file(s)", report.moved.len()));
        report
    }

    /// Rule-based placement inside each file's own folder
    pub fn fallback_organize(&self, records: &[FileRecord]) -> ExecutionReport {
        let mut report = ExecutionReport::default();
        for record in records {
            let source = PathBuf::from(&record.file_path);
            if !source.exists() {
                continue;
            }
            let Some(parent) = source.parent() else { continue };
            let Some((dest, categorization)) = self.categorizer.destination_path(&source, parent) else {
                continue;
            };
            if dest.parent() == source.parent() {
                continue;
            }
            match self.move_one(&source, &dest, &categorization.category, Some(record.id)) {
                Some(moved) => report.moved.push(moved),
                None => report.failed += 1,
            }
        }
        report
    }

    /// Deduplicate, validate and resolve a plan against the files it may touch
    pub fn prepare(&self, plan: &OrganizationPlan, records: &[FileRecord], root: &Path) -> Proposal {
        let plan = plan.deduplicate();
        let by_id: HashMap<i64, FileRecord> = records.iter().map(|r| (r.id, r.clone())).collect();
        let valid_ids: HashSet<i64> = by_id.keys().copied().collect();

        let errors = plan.validate(&valid_ids, MAX_PLAN_DEPTH);
        let (moves, skips) = if errors.is_empty() {
            planner::plan_to_moves(&plan, &by_id, root)
        } else {
            (Vec::new(), MoveSkips::default())
        };
        let summary = planner::summarize(&plan, &by_id);

        Proposal { plan, errors, moves, skips, summary }
    }

    /// Ask the model for a plan and check it
    pub async fn propose(&self, records: &[FileRecord], root: &Path, instruction: &str) -> Result<Option<Proposal>> {
        let Some(model) = self.model() else {
            return Ok(None);
        };
        self.status(format!("Asking AI to organize {} file(s)...", records.len()));
        let plan = planner::request_plan(model, instruction, records).await?;
        Ok(plan.map(|p| self.prepare(&p, records, root)))
    }

    /// Revise a proposal with the user's feedback
    pub async fn refine(
        &self,
        proposal: &Proposal,
        records: &[FileRecord],
        root: &Path,
        instruction: &str,
        feedback: &str,
    ) -> Result<Option<Proposal>> {
        let Some(model) = self.model() else {
            return Ok(None);
        };
        let plan = planner::request_refinement(model, instruction, &proposal.plan, feedback, records).await?;
        Ok(plan.map(|p| self.prepare(&p, records, root)))
    }

    /// Plan with the model and execute, falling back to rules on any failure
    pub async fn organize_with_instruction(
        &self,
        records: &[FileRecord],
        folder: &Path,
        instruction: &str,
    ) -> ExecutionReport {
        let present: Vec<FileRecord> = records
            .iter()
            .filter(|r| Path::new(&r.file_path).exists())
            .cloned()
            .collect();
        if present.is_empty() {
            warn!("No valid files to organize");
            return ExecutionReport::default();
        }

        let proposal = match self.propose(&present, folder, instruction).await {
            Ok(Some(p)) => p,
            Ok(None) => {
                warn!("AI returned no plan, using fallback categorization");
                return self.fallback_organize(&present);
            }
            Err(e) => {
                error!("AI organization failed: {}", e);
                return self.fallback_organize(&present);
            }
        };

        if !proposal.is_valid() {
            warn!("Invalid AI plan: {:?}. Using fallback.", proposal.errors);
            return self.fallback_organize(&present);
        }

        self.execute_moves(&proposal.moves)
    }

    /// One rule-based pass over `folder`, into `folder/<category>/`
    ///
    /// With `recursive`, files in subfolders are gathered too; files already
    /// in their category folder stay put.
    pub fn organize_rules(&self, folder: &Path, recursive: bool, dry_run: bool) -> Result<Vec<RuleMove>> {
        let folder = absolutize(folder);
        let max_depth = if recursive { usize::MAX } else { 1 };
        let mut entries: Vec<PathBuf> = WalkDir::new(&folder)
            .min_depth(1)
            .max_depth(max_depth)
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file())
            .map(|e| e.into_path())
            .collect();
        entries.sort();

        let mut planned: HashSet<PathBuf> = HashSet::new();
        let mut results = Vec::new();
        for path in entries {
            if self.categorizer.should_ignore(&path) {
                continue;
            }
            let Some(name) = path.file_name().map(|n| n.to_string_lossy().to_string()) else {
                continue;
            };
            let category = self.categorizer.categorize(&path).category;
            let dest_dir = folder.join(&category);
            if path.parent() == Some(dest_dir.as_path()) {
                continue;
            }
            let dest = unique_destination_excluding(&dest_dir, &name, |p| planned.contains(p));
            planned.insert(dest.clone());

            if dry_run {
                results.push(RuleMove { source: path, destination: dest, category });
            } else if self.move_one(&path, &dest, &category, None).is_some() {
                results.push(RuleMove { source: path, destination: dest, category });
            }
        }

        info!(
            "{} {} file(s) in {:?}",
            if dry_run { "Would organize" } else { "Organized" },
            results.len(),
            folder
        );
        Ok(results)
    }

    /// Organize records grouped by watched folder, with per-folder instructions
    pub async fn organize_groups(
        &self,
        groups: Vec<(PathBuf, Option<String>, Vec<FileRecord>)>,
    ) -> ExecutionReport {
        let mut report = ExecutionReport::default();
        for (folder, instruction, records) in groups {
            let batch = match instruction.filter(|i| !i.trim().is_empty()) {
                Some(instruction) => self.organize_with_instruction(&records, &folder, &instruction).await,
                None => self.fallback_organize(&records),
            };
            report.merge(batch);
        }
        report
    }
}
