// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

//! AI organization plans
//!
//! The model only proposes a plan. The plan is validated here and turned
//! into concrete moves by deterministic code; the model never decides a
//! path on disk.

pub mod prompts;

use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::ai::{parse_json_reply, LanguageModel};
use crate::db::FileRecord;
use crate::fsops::unique_destination_excluding;
use crate::{OrganizerError, Result};

pub use prompts::{build_file_summary, AUTO_ORGANIZE_MARKER, SYSTEM_PROMPT};

const DANGEROUS_NAMES: &[&str] = &["system32", "windows", "program files", "programdata", "$recycle.bin"];

/// A file id as the model wrote it
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileRef {
    Id(i64),
    /// Anything that is not an integer, kept verbatim for reporting
    Invalid(String),
}

impl FileRef {
    fn from_value(value: &Value) -> Self {
        match value {
            Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    FileRef::Id(i)
                } else {
                    match n.as_f64() {
                        Some(f) if f.fract() == 0.0 && f.abs() < i64::MAX as f64 => FileRef::Id(f as i64),
                        _ => FileRef::Invalid(n.to_string()),
                    }
                }
            }
            Value::String(s) => match s.trim().parse::<i64>() {
                Ok(i) => FileRef::Id(i),
                Err(_) => FileRef::Invalid(s.clone()),
            },
            other => FileRef::Invalid(other.to_string()),
        }
    }

    pub fn id(&self) -> Option<i64> {
        match self {
            FileRef::Id(id) => Some(*id),
            FileRef::Invalid(_) => None,
        }
    }

    fn to_value(&self) -> Value {
        match self {
            FileRef::Id(id) => Value::from(*id),
            FileRef::Invalid(raw) => Value::String(raw.clone()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlanFolder {
    pub name: String,
    /// `None` when the model gave something other than a list
    pub files: Option<Vec<FileRef>>,
}

impl PlanFolder {
    pub fn ids(&self) -> impl Iterator<Item = i64> + '_ {
        self.files.iter().flatten().filter_map(FileRef::id)
    }

    pub fn len(&self) -> usize {
        self.files.as_ref().map_or(0, Vec::len)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// A proposed `{"folders": {name: [ids]}}` plan, in the model's folder order
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OrganizationPlan {
    pub folders: Vec<PlanFolder>,
}

impl OrganizationPlan {
    pub fn from_value(value: &Value) -> Result<Self> {
        let folders = value
            .get("folders")
            .and_then(Value::as_object)
            .ok_or_else(|| OrganizerError::Plan("Plan must contain 'folders' object".to_string()))?;

        Ok(Self {
            folders: folders
                .iter()
                .map(|(name, ids)| PlanFolder {
                    name: name.clone(),
                    files: ids
                        .as_array()
                        .map(|items| items.iter().map(FileRef::from_value).collect()),
                })
                .collect(),
        })
    }

    /// Parse a raw model reply
    pub fn from_reply(reply: &str) -> Option<Self> {
        let value = parse_json_reply(reply)?;
        match Self::from_value(&value) {
            Ok(plan) => Some(plan),
            Err(e) => {
                warn!("Model reply is not a plan: {}", e);
                None
            }
        }
    }

    pub fn to_value(&self) -> Value {
        let folders: Map<String, Value> = self
            .folders
            .iter()
            .map(|f| {
                let ids = match &f.files {
                    Some(files) => Value::Array(files.iter().map(FileRef::to_value).collect()),
                    None => Value::Null,
                };
                (f.name.clone(), ids)
            })
            .collect();
        serde_json::json!({ "folders": folders })
    }

    pub fn is_empty(&self) -> bool {
        self.folders.is_empty()
    }

    pub fn total_files(&self) -> usize {
        self.folders.iter().map(PlanFolder::len).sum()
    }

    /// Keep the first occurrence of each id and drop folders left empty
    ///
    /// Invalid references are kept so that validation reports them.
    pub fn deduplicate(&self) -> Self {
        let mut seen = HashSet::new();
        let mut removed = 0;

        let folders = self
            .folders
            .iter()
            .filter_map(|folder| {
                let files = folder.files.as_ref()?;
                let kept: Vec<FileRef> = files
                    .iter()
                    .filter(|r| match r {
                        FileRef::Id(id) if !seen.insert(*id) => {
                            debug!("Removed duplicate file_id {} from folder '{}'", id, folder.name);
                            removed += 1;
                            false
                        }
                        _ => true,
                    })
                    .cloned()
                    .collect();
                (!kept.is_empty()).then(|| PlanFolder {
                    name: folder.name.clone(),
                    files: Some(kept),
                })
            })
            .collect();

        if removed > 0 {
            warn!("Removed {} duplicate file_id(s) from AI plan", removed);
        }
        Self { folders }
    }

    /// Safety gate before anything touches the disk; empty means valid
    pub fn validate(&self, valid_ids: &HashSet<i64>, max_depth: usize) -> Vec<String> {
        let mut errors = Vec::new();

        if self.folders.is_empty() {
            errors.push("Plan is empty".to_string());
            return errors;
        }

        let mut seen = HashSet::new();
        for folder in &self.folders {
            let name = folder.name.as_str();

            if name.trim().is_empty() {
                errors.push(format!("Invalid folder name: '{}'", name));
                continue;
            }
            if name.contains("..") {
                errors.push(format!("Path traversal not allowed: {}", name));
                continue;
            }
            if name.starts_with('/') || name.starts_with('\\') {
                errors.push(format!("Absolute paths not allowed: {}", name));
                continue;
            }
            if name.contains(':') {
                errors.push(format!("Drive letters not allowed: {}", name));
                continue;
            }
            if DANGEROUS_NAMES.contains(&name.to_lowercase().as_str()) {
                errors.push(format!("System folder name not allowed: {}", name));
                continue;
            }

            let depth = folder_depth(name);
            if depth > max_depth {
                errors.push(format!("Folder too deep ({} > {}): {}", depth, max_depth, name));
            }

            let Some(files) = &folder.files else {
                errors.push(format!("Folder '{}' must have list of file IDs", name));
                continue;
            };

            for file in files {
                match file {
                    FileRef::Invalid(raw) => errors.push(format!("Invalid file_id type: {}", raw)),
                    FileRef::Id(id) => {
                        if !valid_ids.contains(id) {
                            errors.push(format!("Unknown file_id: {}", id));
                        } else if !seen.insert(*id) {
                            errors.push(format!("Duplicate file_id: {} (appears in multiple folders)", id));
                        }
                    }
                }
            }
        }

        errors
    }
}

fn folder_depth(name: &str) -> usize {
    name.replace('\\', "/").matches('/').count() + 1
}

/// Ask the model for a plan; `None` when there is nothing to plan or no usable reply
pub async fn request_plan(
    model: &dyn LanguageModel,
    instruction: &str,
    files: &[FileRecord],
) -> Result<Option<OrganizationPlan>> {
    if files.is_empty() {
        warn!("No files provided for organization");
        return Ok(None);
    }

    let message = prompts::plan_message(instruction, files);
    info!(
        "Sending to {} - instruction: '{}'",
        model.name(),
        instruction.chars().take(100).collect::<String>()
    );
    debug!("File summary being sent:\n{}", build_file_summary(files, 20));

    let reply = model.complete(SYSTEM_PROMPT, &message).await?;
    Ok(OrganizationPlan::from_reply(&reply))
}

/// Ask the model to revise `current` according to the user's feedback
pub async fn request_refinement(
    model: &dyn LanguageModel,
    instruction: &str,
    current: &OrganizationPlan,
    feedback: &str,
    files: &[FileRecord],
) -> Result<Option<OrganizationPlan>> {
    if current.is_empty() {
        warn!("No plan to refine");
        return Ok(None);
    }

    let current_json = serde_json::to_string_pretty(&current.to_value())?;
    let message = prompts::refinement_message(instruction, &current_json, feedback, files);
    let reply = model.complete(SYSTEM_PROMPT, &message).await?;
    Ok(OrganizationPlan::from_reply(&reply))
}

/// One concrete file move derived from a plan
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PlannedMove {
    pub file_id: i64,
    pub file_name: String,
    pub source: PathBuf,
    pub destination: PathBuf,
    pub folder: String,
    pub size: u64,
}

/// Why plan entries did not become moves
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MoveSkips {
    pub not_found: usize,
    pub no_info: usize,
    pub already_in_dest: usize,
    pub invalid: usize,
}

impl MoveSkips {
    pub fn total(&self) -> usize {
        self.not_found + self.no_info + self.already_in_dest + self.invalid
    }
}

fn same_location(a: &Path, b: &Path) -> bool {
    match (a.canonicalize(), b.canonicalize()) {
        (Ok(a), Ok(b)) => a == b,
        _ => a == b,
    }
}

/// Turn a validated plan into moves under `root`
pub fn plan_to_moves(
    plan: &OrganizationPlan,
    files_by_id: &HashMap<i64, FileRecord>,
    root: &Path,
) -> (Vec<PlannedMove>, MoveSkips) {
    let mut moves = Vec::new();
    let mut skips = MoveSkips::default();
    let mut claimed: HashSet<PathBuf> = HashSet::new();

    for folder in &plan.folders {
        let dest_folder = root.join(&folder.name);

        for file in folder.files.iter().flatten() {
            let Some(id) = file.id() else {
                warn!("Invalid file ID type: {:?}", file);
                skips.invalid += 1;
                continue;
            };

            let Some(info) = files_by_id.get(&id) else {
                debug!("No file info for ID {}", id);
                skips.no_info += 1;
                continue;
            };

            let source = PathBuf::from(&info.file_path);
            if !source.exists() {
                debug!("Source file doesn't exist: {:?}", source);
                skips.not_found += 1;
                continue;
            }

            let Some(name) = source.file_name().map(|n| n.to_string_lossy().to_string()) else {
                skips.invalid += 1;
                continue;
            };

            if source.parent().is_some_and(|p| same_location(p, &dest_folder)) {
                debug!("Skipping {} - already in destination folder {:?}", name, dest_folder);
                skips.already_in_dest += 1;
                continue;
            }

            let direct = dest_folder.join(&name);
            if direct.exists() && same_location(&source, &direct) {
                debug!("Skipping {} - source and destination are the same file", name);
                skips.already_in_dest += 1;
                continue;
            }

            let destination = unique_destination_excluding(&dest_folder, &name, |p| claimed.contains(p));
            claimed.insert(destination.clone());

            moves.push(PlannedMove {
                file_id: id,
                file_name: name,
                source,
                destination,
                folder: folder.name.clone(),
                size: info.file_size,
            });
        }
    }

    info!(
        "plan_to_moves: {} valid moves from {} files in plan. Skipped: {} not found, {} no info, {} already in destination",
        moves.len(),
        plan.total_files(),
        skips.not_found,
        skips.no_info,
        skips.already_in_dest
    );

    (moves, skips)
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FolderSummary {
    pub name: String,
    pub file_count: usize,
    pub size_bytes: u64,
    pub size_mb: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PlanSummary {
    pub total_folders: usize,
    pub total_files: usize,
    pub total_size_bytes: u64,
    pub total_size_mb: f64,
    pub folders: Vec<FolderSummary>,
}

fn to_mb(bytes: u64) -> f64 {
    (bytes as f64 / (1024.0 * 1024.0) * 100.0).round() / 100.0
}

/// Human-readable overview of a plan
pub fn summarize(plan: &OrganizationPlan, files_by_id: &HashMap<i64, FileRecord>) -> PlanSummary {
    let folders: Vec<FolderSummary> = plan
        .folders
        .iter()
        .map(|folder| {
            let size_bytes = folder
                .ids()
                .filter_map(|id| files_by_id.get(&id))
                .map(|f| f.file_size)
                .sum();
            FolderSummary {
                name: folder.name.clone(),
                file_count: folder.len(),
                size_bytes,
                size_mb: to_mb(size_bytes),
            }
        })
        .collect();

    let total_size_bytes = folders.iter().map(|f| f.size_bytes).sum();
    PlanSummary {
        total_folders: folders.len(),
        total_files: plan.total_files(),
        total_size_bytes,
        total_size_mb: to_mb(total_size_bytes),
        folders,
    }
}
