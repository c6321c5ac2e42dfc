// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

//! Filesystem moves shared by the organizer and the watcher

use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::Result;

/// `path` joined onto the working directory when it is relative
///
/// Nothing is resolved on disk, so the path need not exist.
pub fn absolutize(path: &Path) -> PathBuf {
    if path.is_absolute() {
        return path.to_path_buf();
    }
    match std::env::current_dir() {
        Ok(cwd) => cwd.join(path),
        Err(_) => path.to_path_buf(),
    }
}

/// Split a file name into stem and extension (extension keeps its dot)
fn split_name(name: &str) -> (&str, &str) {
    match name.rfind('.') {
        Some(idx) if idx > 0 => (&name[..idx], &name[idx..]),
        _ => (name, ""),
    }
}

/// `dir/name`, or `dir/stem (n).ext` for the first free `n`
pub fn unique_destination(dir: &Path, name: &str) -> PathBuf {
    unique_destination_excluding(dir, name, |_| false)
}

/// Like [`unique_destination`], also treating `taken` paths as occupied
pub fn unique_destination_excluding<F>(dir: &Path, name: &str, taken: F) -> PathBuf
where
    F: Fn(&Path) -> bool,
{
    let candidate = dir.join(name);
    if !candidate.exists() && !taken(&candidate) {
        return candidate;
    }

    let (stem, ext) = split_name(name);
    let mut counter = 1;
    loop {
        let candidate = dir.join(format!("{} ({}){}", stem, counter, ext));
        if !candidate.exists() && !taken(&candidate) {
            return candidate;
        }
        counter += 1;
    }
}

/// Move a file, creating the destination directory
///
/// Falls back to copy + remove when a rename cannot cross filesystems.
pub fn move_file(source: &Path, dest: &Path) -> Result<()> {
    if let Some(parent) = dest.parent() {
        fs::create_dir_all(parent)?;
    }

    match fs::rename(source, dest) {
        Ok(()) => Ok(()),
        Err(rename_err) => {
            debug!("rename {:?} failed ({}), copying instead", source, rename_err);
            if !source.is_file() {
                return Err(rename_err.into());
            }
            fs::copy(source, dest).map_err(|_| rename_err)?;
            fs::remove_file(source)?;
            Ok(())
        }
    }
}

/// Move every file below `root` up into `root` itself
///
/// Returns the number of files moved. Empty subfolders are removed
/// afterwards.
pub fn flatten_folder(root: &Path) -> Result<usize> {
    if !root.is_dir() {
        return Ok(0);
    }

    let nested: Vec<PathBuf> = WalkDir::new(root)
        .min_depth(2)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .map(|e| e.into_path())
        .collect();

    let mut moved = 0;
    for path in nested {
        let name = match path.file_name() {
            Some(n) => n.to_string_lossy().to_string(),
            None => continue,
        };
        let dest = unique_destination(root, &name);
        match move_file(&path, &dest) {
            Ok(()) => {
                moved += 1;
                info!("Flattened: {} -> root", name);
            }
            Err(e) => warn!("Failed to flatten {:?}: {}", path, e),
        }
    }

    if moved > 0 {
        cleanup_empty_folders(root);
        info!("Flattened {} files in {:?}", moved, root);
    }

    Ok(moved)
}

/// Remove empty directories under `root`, deepest first; `root` stays
pub fn cleanup_empty_folders(root: &Path) -> usize {
    if !root.is_dir() {
        return 0;
    }

    let dirs: Vec<PathBuf> = WalkDir::new(root)
        .min_depth(1)
        .contents_first(true)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_dir())
        .map(|e| e.into_path())
        .collect();

    let mut removed = 0;
    for dir in dirs {
        let empty = fs::read_dir(&dir).map(|mut d| d.next().is_none()).unwrap_or(false);
        if empty {
            match fs::remove_dir(&dir) {
                Ok(()) => {
                    removed += 1;
                    info!("Deleted empty folder: {:?}", dir);
                }
                Err(e) => debug!("Could not delete folder {:?}: {}", dir, e),
            }
        }
    }
    removed
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_unique_destination_suffixes() {
        let dir = TempDir::new().unwrap();
        assert_eq!(unique_destination(dir.path(), "a.txt"), dir.path().join("a.txt"));

        fs::write(dir.path().join("a.txt"), b"1").unwrap();
        assert_eq!(unique_destination(dir.path(), "a.txt"), dir.path().join("a (1).txt"));

        fs::write(dir.path().join(".env"), b"1").unwrap();
        assert_eq!(unique_destination(dir.path(), ".env"), dir.path().join(".env (1)"));
    }

    #[test]
    fn test_unique_destination_respects_taken() {
        let dir = TempDir::new().unwrap();
        let first = dir.path().join("x.pdf");
        let got = unique_destination_excluding(dir.path(), "x.pdf", |p| p == first);
        assert_eq!(got, dir.path().join("x (1).pdf"));
    }

    #[test]
    fn test_move_file_creates_parents() {
        let dir = TempDir::new().unwrap();
        let src = dir.path().join("in.txt");
        fs::write(&src, b"data").unwrap();
        let dest = dir.path().join("deep").join("er").join("in.txt");

        move_file(&src, &dest).unwrap();
        assert!(!src.exists());
        assert_eq!(fs::read(&dest).unwrap(), b"data");
    }

    #[test]
    fn test_flatten_and_cleanup() {
        let dir = TempDir::new().unwrap();
        let root = dir.path();
        fs::create_dir_all(root.join("a/b")).unwrap();
        fs::create_dir_all(root.join("c")).unwrap();
        fs::write(root.join("top.txt"), b"0").unwrap();
        fs::write(root.join("a/b/top.txt"), b"1").unwrap();
        fs::write(root.join("c/other.md"), b"2").unwrap();

        let moved = flatten_folder(root).unwrap();
        assert_eq!(moved, 2);
        assert!(root.join("top (1).txt").exists());
        assert!(root.join("other.md").exists());
        assert!(!root.join("a").exists());
        assert!(!root.join("c").exists());
        assert!(root.exists());
    }

    #[test]
    fn test_cleanup_keeps_non_empty() {
        let dir = TempDir::new().unwrap();
        fs::create_dir_all(dir.path().join("keep")).unwrap();
        fs::create_dir_all(dir.path().join("drop/inner")).unwrap();
        fs::write(dir.path().join("keep/file"), b"x").unwrap();

        assert_eq!(cleanup_empty_folders(dir.path()), 2);
        assert!(dir.path().join("keep/file").exists());
        assert!(!dir.path().join("drop").exists());
    }
}
