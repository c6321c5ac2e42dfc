// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

//! Bundle collection
//!
//! Copies the built executable, its data files and extra binaries into a
//! self-contained `dist/<collect_name>/` directory, writes a manifest and
//! optionally a portable zip archive.

use chrono::{DateTime, Utc};
use glob::Pattern;
use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::io;
use std::path::{Component, Path, PathBuf};
use std::process::Command;
use std::time::Duration;
use tracing::{debug, info, warn};
use walkdir::WalkDir;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

use crate::indexer::hash_file;
use crate::{OrganizerError, Result};

/// File name of the manifest written into every bundle
pub const MANIFEST_NAME: &str = "bundle-manifest.json";

const CLEAN_RETRY_DELAY: Duration = Duration::from_secs(1);

/// An auxiliary file (or glob of files) and where it lands in the bundle
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataFile {
    pub source: String,
    /// Directory relative to the bundle root
    pub dest: String,
}

impl DataFile {
    pub fn new(source: impl Into<String>, dest: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            dest: dest.into(),
        }
    }
}

/// Bundling descriptor
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BundleSpec {
    /// Output executable name, without extension
    #[serde(default = "default_name")]
    pub name: String,

    /// The built executable to package
    #[serde(default = "default_entry")]
    pub entry: PathBuf,

    #[serde(default)]
    pub binaries: Vec<PathBuf>,

    #[serde(default = "default_datas")]
    pub datas: Vec<DataFile>,

    /// Paths relative to the bundle root that must exist after collection
    #[serde(default)]
    pub required: Vec<String>,

    /// Programs run with the bundle directory as their only argument
    #[serde(default)]
    pub hooks: Vec<PathBuf>,

    /// Glob patterns of files never collected
    #[serde(default = "default_excludes")]
    pub excludes: Vec<String>,

    #[serde(default)]
    pub debug: bool,

    #[serde(default)]
    pub console: bool,

    #[serde(default)]
    pub compress: bool,

    #[serde(default = "default_icon")]
    pub icon: Option<PathBuf>,

    #[serde(default = "default_name")]
    pub collect_name: String,
}

fn default_name() -> String {
    "AI File Organizer".to_string()
}

fn default_entry() -> PathBuf {
    PathBuf::from(format!("target/release/organizer{}", std::env::consts::EXE_SUFFIX))
}

fn default_datas() -> Vec<DataFile> {
    vec![
        DataFile::new("resources", "resources"),
        DataFile::new("app/ui/styles.qss", "app/ui"),
        DataFile::new("app/ui/styles_light.qss", "app/ui"),
    ]
}

fn default_excludes() -> Vec<String> {
    vec!["*.pyc".to_string(), "__pycache__".to_string(), ".DS_Store".to_string()]
}

fn default_icon() -> Option<PathBuf> {
    Some(PathBuf::from("resources/icon.ico"))
}

impl Default for BundleSpec {
    fn default() -> Self {
        Self {
            name: default_name(),
            entry: default_entry(),
            binaries: Vec::new(),
            datas: default_datas(),
            required: Vec::new(),
            hooks: Vec::new(),
            excludes: default_excludes(),
            debug: false,
            console: false,
            compress: false,
            icon: default_icon(),
            collect_name: default_name(),
        }
    }
}

impl BundleSpec {
    /// Executable file name inside the bundle
    pub fn executable_name(&self) -> String {
        format!("{}{}", self.name, std::env::consts::EXE_SUFFIX)
    }

    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(OrganizerError::Config("Bundle name cannot be empty".to_string()));
        }
        if self.collect_name.trim().is_empty()
            || self.collect_name.contains(['/', '\\'])
            || self.collect_name == "."
            || self.collect_name.contains("..")
        {
            return Err(OrganizerError::Config(format!(
                "Invalid bundle directory name '{}'",
                self.collect_name
            )));
        }
        for data in &self.datas {
            if !is_relative_inside(Path::new(&data.dest)) {
                return Err(OrganizerError::Config(format!(
                    "Data destination '{}' must be relative to the bundle root",
                    data.dest
                )));
            }
        }
        for pattern in &self.excludes {
            Pattern::new(pattern)?;
        }
        Ok(())
    }
}

/// A relative path that cannot escape its base
fn is_relative_inside(path: &Path) -> bool {
    path.components()
        .all(|c| matches!(c, Component::Normal(_) | Component::CurDir))
}

/// Forward-slash form of a bundle-relative path
fn rel_string(path: &Path) -> String {
    path.components()
        .filter_map(|c| match c {
            Component::Normal(part) => Some(part.to_string_lossy()),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join("/")
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestEntry {
    pub path: String,
    pub size: u64,
    pub blake3: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BundleManifest {
    pub name: String,
    pub executable: String,
    pub console: bool,
    pub debug: bool,
    pub created_at: DateTime<Utc>,
    pub files: Vec<ManifestEntry>,
}

/// Result of a collection run
#[derive(Debug, Clone)]
pub struct BundleReport {
    pub bundle_dir: PathBuf,
    pub executable: PathBuf,
    pub manifest: BundleManifest,
    pub total_bytes: u64,
    /// Data sources that matched nothing
    pub unmatched_datas: Vec<String>,
    pub excluded: usize,
    pub archive: Option<PathBuf>,
}

struct Collector {
    root: PathBuf,
    excludes: Vec<Pattern>,
    excluded: usize,
}

impl Collector {
    fn is_excluded(&self, rel: &Path) -> bool {
        let rel_str = rel_string(rel);
        self.excludes.iter().any(|p| {
            p.matches(&rel_str)
                || rel
                    .components()
                    .any(|c| matches!(c, Component::Normal(part) if p.matches(&part.to_string_lossy())))
        })
    }

    /// Copy `src` to `rel` under the bundle root; false when excluded
    fn copy(&mut self, src: &Path, rel: &Path) -> Result<bool> {
        if self.is_excluded(rel) {
            debug!("Excluded: {}", rel.display());
            self.excluded += 1;
            return Ok(false);
        }
        let dest = self.root.join(rel);
        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::copy(src, &dest)?;
        debug!("Collected {} -> {}", src.display(), rel.display());
        Ok(true)
    }
}

fn resolve(base: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        base.join(path)
    }
}

/// Remove a previous bundle, retrying once after stopping a running copy
fn clean_output(bundle_dir: &Path, app_name: &str) -> Result<()> {
    if !bundle_dir.exists() {
        return Ok(());
    }
    info!("Cleaning previous bundle {}", bundle_dir.display());

    match fs::remove_dir_all(bundle_dir) {
        Ok(()) => Ok(()),
        Err(first) => {
            warn!("Previous bundle is in use ({}); retrying", first);
            stop_running_app(app_name);
            std::thread::sleep(CLEAN_RETRY_DELAY);
            fs::remove_dir_all(bundle_dir).map_err(|e| {
                OrganizerError::Packaging(format!(
                    "Could not remove previous bundle {}: {}. Close any running '{}' windows and try again",
                    bundle_dir.display(),
                    e,
                    app_name
                ))
            })
        }
    }
}

#[cfg(windows)]
fn stop_running_app(app_name: &str) {
    let image = format!("{}.exe", app_name);
    if let Err(e) = Command::new("taskkill").args(["/IM", &image, "/F"]).output() {
        debug!("taskkill failed: {}", e);
    }
}

#[cfg(not(windows))]
fn stop_running_app(_app_name: &str) {}

/// Copy every data source into the bundle; returns the sources that matched nothing
fn expand_datas(collector: &mut Collector, base: &Path, datas: &[DataFile]) -> Result<Vec<String>> {
    let mut unmatched = Vec::new();

    for data in datas {
        let pattern = resolve(base, Path::new(&data.source));
        let dest = Path::new(&data.dest);
        let mut matched = false;

        for entry in glob::glob(&pattern.to_string_lossy())? {
            let path = entry.map_err(glob::GlobError::into_error)?;
            matched = true;

            if path.is_dir() {
                for item in WalkDir::new(&path).min_depth(1).sort_by_file_name() {
                    let item = item?;
                    if !item.file_type().is_file() {
                        continue;
                    }
                    let Ok(rel) = item.path().strip_prefix(&path) else {
                        continue;
                    };
                    collector.copy(item.path(), &dest.join(rel))?;
                }
            } else if let Some(name) = path.file_name() {
                collector.copy(&path, &dest.join(name))?;
            }
        }

        if !matched {
            warn!("Data source '{}' matched no files", data.source);
            unmatched.push(data.source.clone());
        }
    }

    Ok(unmatched)
}

fn run_hooks(base: &Path, hooks: &[PathBuf], bundle_dir: &Path) -> Result<()> {
    for hook in hooks {
        let program = resolve(base, hook);
        info!("Running hook {}", program.display());
        let status = Command::new(&program)
            .arg(bundle_dir)
            .status()
            .map_err(|e| OrganizerError::Packaging(format!("Failed to run hook {}: {}", program.display(), e)))?;
        if !status.success() {
            return Err(OrganizerError::Packaging(format!(
                "Hook {} failed with {}",
                program.display(),
                status
            )));
        }
    }
    Ok(())
}

fn manifest_entries(bundle_dir: &Path) -> Result<Vec<ManifestEntry>> {
    let mut entries = Vec::new();
    for item in WalkDir::new(bundle_dir).min_depth(1).sort_by_file_name() {
        let item = item?;
        if !item.file_type().is_file() {
            continue;
        }
        let Ok(rel) = item.path().strip_prefix(bundle_dir) else {
            continue;
        };
        let rel = rel_string(rel);
        if rel == MANIFEST_NAME {
            continue;
        }
        entries.push(ManifestEntry {
            path: rel,
            size: item.metadata()?.len(),
            blake3: hash_file(item.path())?,
        });
    }
    Ok(entries)
}

/// Zip the bundle directory; entries are prefixed with the directory name
fn write_archive(bundle_dir: &Path, archive: &Path) -> Result<()> {
    let prefix = bundle_dir
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);
    let mut writer = ZipWriter::new(File::create(archive)?);

    for item in WalkDir::new(bundle_dir).min_depth(1).sort_by_file_name() {
        let item = item?;
        let Ok(rel) = item.path().strip_prefix(bundle_dir) else {
            continue;
        };
        let name = format!("{}/{}", prefix, rel_string(rel));
        if item.file_type().is_dir() {
            writer.add_directory(name, options)?;
        } else if item.file_type().is_file() {
            writer.start_file(name, options)?;
            io::copy(&mut File::open(item.path())?, &mut writer)?;
        }
    }

    writer.finish()?;
    Ok(())
}

/// Collect the bundle described by `spec` into `dist_root`, resolving
/// relative sources against the current directory
pub fn collect(spec: &BundleSpec, dist_root: &Path) -> Result<BundleReport> {
    let base = std::env::current_dir()?;
    collect_from(spec, &base, dist_root)
}

/// Collect with relative sources resolved against `base`
pub fn collect_from(spec: &BundleSpec, base: &Path, dist_root: &Path) -> Result<BundleReport> {
    spec.validate()?;

    let entry = resolve(base, &spec.entry);
    if !entry.is_file() {
        return Err(OrganizerError::Packaging(format!(
            "Entry executable not found: {} (build it first)",
            entry.display()
        )));
    }

    let bundle_dir = dist_root.join(&spec.collect_name);
    clean_output(&bundle_dir, &spec.name)?;
    fs::create_dir_all(&bundle_dir)?;
    info!("Collecting {} into {}", spec.name, bundle_dir.display());

    let excludes = spec
        .excludes
        .iter()
        .map(|p| Pattern::new(p))
        .collect::<std::result::Result<Vec<_>, _>>()?;
    let mut collector = Collector {
        root: bundle_dir.clone(),
        excludes,
        excluded: 0,
    };

    let executable_name = spec.executable_name();
    collector.copy(&entry, Path::new(&executable_name))?;

    for binary in &spec.binaries {
        let src = resolve(base, binary);
        let Some(name) = src.file_name() else {
            continue;
        };
        if !src.is_file() {
            return Err(OrganizerError::Packaging(format!("Binary not found: {}", src.display())));
        }
        collector.copy(&src, Path::new(name))?;
    }

    if let Some(icon) = &spec.icon {
        let src = resolve(base, icon);
        match src.file_name() {
            Some(name) if src.is_file() => {
                info!("Using icon: {}", src.display());
                collector.copy(&src, Path::new(name))?;
            }
            _ => info!("No icon found at {} - using default", src.display()),
        }
    }

    if spec.debug {
        let pdb = entry.with_extension("pdb");
        if pdb.is_file() {
            collector.copy(&pdb, Path::new(&format!("{}.pdb", spec.name)))?;
        } else {
            debug!("No debug symbols at {}", pdb.display());
        }
    }

    let unmatched_datas = expand_datas(&mut collector, base, &spec.datas)?;

    let missing: Vec<&str> = spec
        .required
        .iter()
        .filter(|r| !bundle_dir.join(r).exists())
        .map(String::as_str)
        .collect();
    if !missing.is_empty() {
        return Err(OrganizerError::Packaging(format!(
            "Required files missing from bundle: {}",
            missing.join(", ")
        )));
    }

    run_hooks(base, &spec.hooks, &bundle_dir)?;

    let files = manifest_entries(&bundle_dir)?;
    let total_bytes = files.iter().map(|f| f.size).sum();
    let manifest = BundleManifest {
        name: spec.name.clone(),
        executable: executable_name.clone(),
        console: spec.console,
        debug: spec.debug,
        created_at: Utc::now(),
        files,
    };
    fs::write(bundle_dir.join(MANIFEST_NAME), serde_json::to_string_pretty(&manifest)?)?;

    let archive = if spec.compress {
        let path = dist_root.join(format!("{}.zip", spec.collect_name));
        write_archive(&bundle_dir, &path)?;
        info!("Wrote archive {}", path.display());
        Some(path)
    } else {
        None
    };

    info!(
        "Bundle ready: {} files, {} bytes",
        manifest.files.len(),
        total_bytes
    );

    Ok(BundleReport {
        executable: bundle_dir.join(&executable_name),
        bundle_dir,
        manifest,
        total_bytes,
        unmatched_datas,
        excluded: collector.excluded,
        archive,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    /// A project tree with a fake entry binary and some resources
    fn project() -> (TempDir, BundleSpec) {
        let dir = TempDir::new().unwrap();
        let root = dir.path();
        fs::create_dir_all(root.join("target/release")).unwrap();
        fs::write(root.join("target/release/organizer"), b"binary").unwrap();
        fs::create_dir_all(root.join("resources/icons")).unwrap();
        fs::write(root.join("resources/icon.ico"), b"ico").unwrap();
        fs::write(root.join("resources/icons/folder.png"), b"png").unwrap();
        fs::write(root.join("resources/cache.pyc"), b"junk").unwrap();
        fs::create_dir_all(root.join("app/ui")).unwrap();
        fs::write(root.join("app/ui/styles.qss"), b"dark").unwrap();
        fs::write(root.join("app/ui/styles_light.qss"), b"light").unwrap();

        let spec = BundleSpec {
            entry: PathBuf::from("target/release/organizer"),
            ..BundleSpec::default()
        };
        (dir, spec)
    }

    #[test]
    fn test_validate_rejects_bad_names() {
        let mut spec = BundleSpec::default();
        assert!(spec.validate().is_ok());

        spec.collect_name = "../escape".to_string();
        assert!(spec.validate().is_err());

        spec.collect_name = "ok".to_string();
        spec.datas.push(DataFile::new("x", "/abs"));
        assert!(spec.validate().is_err());

        let spec = BundleSpec {
            name: " ".to_string(),
            ..BundleSpec::default()
        };
        assert!(spec.validate().is_err());
    }

    #[test]
    fn test_collect_lays_out_bundle() {
        let (dir, spec) = project();
        let dist = dir.path().join("dist");
        let report = collect_from(&spec, dir.path(), &dist).unwrap();

        let bundle = dist.join("AI File Organizer");
        assert_eq!(report.bundle_dir, bundle);
        assert!(report.executable.is_file());
        assert!(bundle.join("icon.ico").is_file());
        assert!(bundle.join("resources/icon.ico").is_file());
        assert!(bundle.join("resources/icons/folder.png").is_file());
        assert!(bundle.join("app/ui/styles.qss").is_file());
        assert!(bundle.join("app/ui/styles_light.qss").is_file());
        assert!(!bundle.join("resources/cache.pyc").exists());
        assert_eq!(report.excluded, 1);
        assert!(report.unmatched_datas.is_empty());
        assert!(report.archive.is_none());
    }

    #[test]
    fn test_manifest_lists_hashes_and_console_flag() {
        let (dir, spec) = project();
        let dist = dir.path().join("dist");
        let report = collect_from(&spec, dir.path(), &dist).unwrap();

        let raw = fs::read_to_string(report.bundle_dir.join(MANIFEST_NAME)).unwrap();
        let manifest: BundleManifest = serde_json::from_str(&raw).unwrap();
        assert!(!manifest.console);
        assert!(manifest.files.iter().all(|f| f.blake3.len() == 64));
        assert!(manifest.files.iter().any(|f| f.path == "app/ui/styles.qss" && f.size == 4));
        assert!(!manifest.files.iter().any(|f| f.path == MANIFEST_NAME));
    }

    #[test]
    fn test_recollect_replaces_previous_bundle() {
        let (dir, spec) = project();
        let dist = dir.path().join("dist");
        collect_from(&spec, dir.path(), &dist).unwrap();
        let stale = dist.join("AI File Organizer").join("stale.txt");
        fs::write(&stale, b"old").unwrap();

        collect_from(&spec, dir.path(), &dist).unwrap();
        assert!(!stale.exists());
    }

    #[test]
    fn test_missing_required_file_fails() {
        let (dir, mut spec) = project();
        spec.required = vec!["resources/icon.ico".to_string(), "libs/runtime.dll".to_string()];
        let err = collect_from(&spec, dir.path(), &dir.path().join("dist")).unwrap_err();
        assert!(err.to_string().contains("libs/runtime.dll"));
        assert!(!err.to_string().contains("icon.ico"));
    }

    #[test]
    fn test_missing_entry_fails() {
        let (dir, mut spec) = project();
        spec.entry = PathBuf::from("target/release/nothing");
        assert!(matches!(
            collect_from(&spec, dir.path(), &dir.path().join("dist")),
            Err(OrganizerError::Packaging(_))
        ));
    }

    #[test]
    fn test_unmatched_data_is_reported() {
        let (dir, mut spec) = project();
        spec.datas.push(DataFile::new("docs/*.md", "docs"));
        let report = collect_from(&spec, dir.path(), &dir.path().join("dist")).unwrap();
        assert_eq!(report.unmatched_datas, vec!["docs/*.md".to_string()]);
    }

    #[test]
    fn test_compress_writes_zip() {
        let (dir, mut spec) = project();
        spec.compress = true;
        let dist = dir.path().join("dist");
        let report = collect_from(&spec, dir.path(), &dist).unwrap();

        let archive = report.archive.unwrap();
        assert_eq!(archive, dist.join("AI File Organizer.zip"));
        let mut zip = zip::ZipArchive::new(File::open(&archive).unwrap()).unwrap();
        assert!(zip.by_name("AI File Organizer/app/ui/styles.qss").is_ok());
    }

    #[cfg(unix)]
    #[test]
    fn test_failing_hook_aborts() {
        use std::os::unix::fs::PermissionsExt;

        let (dir, mut spec) = project();
        let hook = dir.path().join("hook.sh");
        fs::write(&hook, "#!/bin/sh\ntest -f \"$1/AI File Organizer\" || exit 3\nexit 1\n").unwrap();
        fs::set_permissions(&hook, fs::Permissions::from_mode(0o755)).unwrap();
        spec.hooks = vec![hook];

        let err = collect_from(&spec, dir.path(), &dir.path().join("dist")).unwrap_err();
        assert!(err.to_string().contains("exit status: 1"));
    }
}
