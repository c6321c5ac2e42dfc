// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

//! Indexes files on disk into the file index

use base64::{engine::general_purpose::STANDARD, Engine};
use chrono::{DateTime, Local, Utc};
use serde::Deserialize;
use std::fs::{self, File};
use std::io::{self, BufWriter, Write};
use std::path::Path;
use std::time::SystemTime;
use tracing::{debug, error, info, warn};

use crate::ai::{parse_json_reply, LocalModel};
use crate::categorizer::Categorizer;
use crate::db::{FileIndex, FileRecord, NewFile};
use crate::fsops::absolutize;
use crate::Result;

/// Images larger than this are not sent to the vision model
const MAX_VISION_BYTES: u64 = 20 * 1024 * 1024;

const VISION_PROMPT: &str = "Describe this image for a file search index. Respond with JSON only: \
{\"label\": \"<one or two word subject>\", \"tags\": [\"<tag>\", ...], \"caption\": \"<one sentence>\"}";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexOutcome {
    Indexed(i64),
    Unchanged(i64),
    NotFound,
    Ignored,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReindexStats {
    pub updated: usize,
    pub unchanged: usize,
    pub not_found: usize,
    pub errors: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportFormat {
    Csv,
    Txt,
}

impl std::str::FromStr for ExportFormat {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "csv" => Ok(ExportFormat::Csv),
            "txt" | "text" => Ok(ExportFormat::Txt),
            other => Err(format!("unknown export format '{}'", other)),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct VisionReply {
    label: Option<String>,
    #[serde(default)]
    tags: Vec<String>,
    caption: Option<String>,
}

/// blake3 digest of a file's contents, streamed
pub fn hash_file(path: &Path) -> Result<String> {
    let mut hasher = blake3::Hasher::new();
    let mut file = File::open(path)?;
    io::copy(&mut file, &mut hasher)?;
    Ok(hasher.finalize().to_hex().to_string())
}

fn to_utc(time: io::Result<SystemTime>) -> Option<DateTime<Utc>> {
    time.ok().map(DateTime::<Utc>::from)
}

pub struct Indexer {
    index: FileIndex,
    categorizer: Categorizer,
    vision: Option<LocalModel>,
}

impl Indexer {
    pub fn new(index: FileIndex, categorizer: Categorizer) -> Self {
        Self { index, categorizer, vision: None }
    }

    /// Label images with a local vision model
    pub fn with_vision(mut self, model: LocalModel) -> Self {
        self.vision = Some(model);
        self
    }

    pub fn index(&self) -> &FileIndex {
        &self.index
    }

    /// Index one file; unchanged files are left alone unless `force` is set
    ///
    /// Relative paths are stored joined onto the working directory.
    pub async fn index_file(&self, path: &Path, force: bool) -> Result<IndexOutcome> {
        let path = absolutize(path);
        let path = path.as_path();
        if !path.is_file() {
            return Ok(IndexOutcome::NotFound);
        }
        if self.categorizer.should_ignore(path) {
            return Ok(IndexOutcome::Ignored);
        }

        let metadata = fs::metadata(path)?;
        let hash = hash_file(path)?;
        let path_str = path.to_string_lossy().to_string();

        if !force {
            if let Some(existing) = self.index.get_file_by_path(&path_str)? {
                if existing.file_size == metadata.len() && existing.content_hash.as_deref() == Some(hash.as_str()) {
                    debug!("Unchanged: {:?}", path);
                    return Ok(IndexOutcome::Unchanged(existing.id));
                }
            }
        }

        let category = self.categorizer.categorize(path).category;
        let mut record = NewFile {
            file_path: path_str,
            file_name: path
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_default(),
            file_extension: path
                .extension()
                .map(|e| format!(".{}", e.to_string_lossy().to_lowercase()))
                .unwrap_or_default(),
            file_size: metadata.len(),
            category: Some(category.clone()),
            content_hash: Some(hash),
            created_date: to_utc(metadata.created()),
            modified_date: to_utc(metadata.modified()),
            ..NewFile::default()
        };

        if category == "Images" && metadata.len() <= MAX_VISION_BYTES {
            if let Some(model) = &self.vision {
                match self.describe_image(model, path).await {
                    Ok(Some(reply)) => {
                        record.label = reply.label;
                        record.tags = reply.tags;
                        record.caption = reply.caption;
                        record.ai_source = Some("ollama".to_string());
                    }
                    Ok(None) => debug!("No usable vision reply for {:?}", path),
                    Err(e) => debug!("Vision analysis failed for {:?}: {}", path, e),
                }
            }
        }

        let id = self.index.upsert_file(&record)?;
        Ok(IndexOutcome::Indexed(id))
    }

    async fn describe_image(&self, model: &LocalModel, path: &Path) -> Result<Option<VisionReply>> {
        let image = STANDARD.encode(fs::read(path)?);
        let reply = model
            .client()
            .generate_with_image(model.model(), VISION_PROMPT, &image)
            .await?;
        Ok(parse_json_reply(&reply).and_then(|v| serde_json::from_value(v).ok()))
    }

    /// Re-index paths; `progress(done, total)` fires every 5 files and on the last
    pub async fn reindex<P, F>(&self, paths: &[P], force: bool, mut progress: F) -> ReindexStats
    where
        P: AsRef<Path>,
        F: FnMut(usize, usize),
    {
        let mut stats = ReindexStats::default();
        let total = paths.len();

        for (i, path) in paths.iter().enumerate() {
            let path = path.as_ref();
            match self.index_file(path, force).await {
                Ok(IndexOutcome::Indexed(_)) => stats.updated += 1,
                Ok(IndexOutcome::Unchanged(_)) | Ok(IndexOutcome::Ignored) => stats.unchanged += 1,
                Ok(IndexOutcome::NotFound) => {
                    debug!("File not found for reindex: {:?}", path);
                    stats.not_found += 1;
                }
                Err(e) => {
                    error!("Error reindexing {:?}: {}", path, e);
                    stats.errors += 1;
                }
            }

            if i % 5 == 0 || i + 1 == total {
                progress(i + 1, total);
            }
        }

        info!(
            "Reindex complete: {} updated, {} not found, {} errors",
            stats.updated, stats.not_found, stats.errors
        );
        stats
    }

    /// Index every file under `root`
    pub async fn index_folder(&self, root: &Path, recursive: bool, force: bool) -> Result<ReindexStats> {
        let max_depth = if recursive { usize::MAX } else { 1 };
        let paths: Vec<_> = walkdir::WalkDir::new(root)
            .max_depth(max_depth)
            .into_iter()
            .filter_map(|e| match e {
                Ok(entry) => Some(entry),
                Err(err) => {
                    warn!("Skipping unreadable entry: {}", err);
                    None
                }
            })
            .filter(|e| e.file_type().is_file())
            .map(|e| e.into_path())
            .collect();

        Ok(self.reindex(&paths, force, |_, _| {}).await)
    }
}

fn csv_field(value: &str) -> String {
    if value.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}

fn fmt_date(date: &Option<DateTime<Utc>>) -> String {
    date.map(|d| d.to_rfc3339()).unwrap_or_default()
}

/// Write records as CSV or a readable text listing
pub fn export_file_list(records: &[FileRecord], path: &Path, format: ExportFormat) -> Result<()> {
    let mut out = BufWriter::new(File::create(path)?);

    match format {
        ExportFormat::Csv => {
            if !records.is_empty() {
                writeln!(
                    out,
                    "file_name,file_path,category,file_size,label,tags,caption,created_date,modified_date"
                )?;
            }
            for r in records {
                let row = [
                    csv_field(&r.file_name),
                    csv_field(&r.file_path),
                    csv_field(r.category.as_deref().unwrap_or("")),
                    r.file_size.to_string(),
                    csv_field(r.label.as_deref().unwrap_or("")),
                    csv_field(&r.tags.join(", ")),
                    csv_field(r.caption.as_deref().unwrap_or("")),
                    fmt_date(&r.created_date),
                    fmt_date(&r.modified_date),
                ];
                writeln!(out, "{}", row.join(","))?;
            }
        }
        ExportFormat::Txt => {
            writeln!(out, "Exported File List - {}", Local::now().format("%Y-%m-%d %H:%M:%S"))?;
            writeln!(out, "{}\n", "=".repeat(80))?;
            for r in records {
                writeln!(out, "Name: {}", r.file_name)?;
                writeln!(out, "Path: {}", r.file_path)?;
                writeln!(out, "Category: {}", r.category.as_deref().unwrap_or("Unknown"))?;
                if !r.tags.is_empty() {
                    writeln!(out, "Tags: {}", r.tags.join(", "))?;
                }
                if let Some(label) = r.label.as_deref().filter(|l| !l.is_empty()) {
                    writeln!(out, "Label: {}", label)?;
                }
                if let Some(caption) = r.caption.as_deref().filter(|c| !c.is_empty()) {
                    writeln!(out, "Caption: {}", caption)?;
                }
                writeln!(out, "{}\n", "-".repeat(40))?;
            }
        }
    }

    out.flush()?;
    info!("Exported {} files to {:?}", records.len(), path);
    Ok(())
}
