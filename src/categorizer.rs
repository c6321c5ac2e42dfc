// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

//! Rule-based file categorization with optional AI assistance
//!
//! Priority: screenshot name patterns, then extension rules, then the
//! language model (when one is supplied), then `Other`.

use regex::{Regex, RegexBuilder};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::{Component, Path, PathBuf};
use tracing::{info, warn};

use crate::ai::LanguageModel;
use crate::fsops::unique_destination;

pub const SCREENSHOTS: &str = "Screenshots";
pub const OTHER: &str = "Other";

const DEFAULT_RULES: &[(&str, &str)] = &[
    // Images
    (".jpg", "Images"), (".jpeg", "Images"), (".png", "Images"), (".gif", "Images"),
    (".bmp", "Images"), (".webp", "Images"), (".svg", "Images"), (".ico", "Images"),
    (".tiff", "Images"), (".heic", "Images"),
    // Documents
    (".pdf", "Documents"), (".doc", "Documents"), (".docx", "Documents"), (".txt", "Documents"),
    (".rtf", "Documents"), (".odt", "Documents"), (".xls", "Documents"), (".xlsx", "Documents"),
    (".ppt", "Documents"), (".pptx", "Documents"), (".csv", "Documents"),
    // Videos
    (".mp4", "Videos"), (".mov", "Videos"), (".avi", "Videos"), (".mkv", "Videos"),
    (".wmv", "Videos"), (".flv", "Videos"), (".webm", "Videos"), (".m4v", "Videos"),
    // Audio
    (".mp3", "Audio"), (".wav", "Audio"), (".flac", "Audio"), (".aac", "Audio"),
    (".ogg", "Audio"), (".wma", "Audio"), (".m4a", "Audio"),
    // Archives
    (".zip", "Archives"), (".rar", "Archives"), (".7z", "Archives"), (".tar", "Archives"),
    (".gz", "Archives"),
    // Code
    (".py", "Code"), (".js", "Code"), (".ts", "Code"), (".html", "Code"), (".css", "Code"),
    (".java", "Code"), (".cpp", "Code"), (".c", "Code"), (".h", "Code"), (".json", "Code"),
    (".xml", "Code"), (".yaml", "Code"), (".yml", "Code"), (".rs", "Code"),
    // Executables/Installers
    (".exe", "Programs"), (".msi", "Programs"), (".dmg", "Programs"), (".app", "Programs"),
    // Fonts
    (".ttf", "Fonts"), (".otf", "Fonts"), (".woff", "Fonts"), (".woff2", "Fonts"),
];

const SCREENSHOT_PATTERNS: &[&str] = &[
    r"screenshot",
    r"screen.?shot",
    r"snip",
    r"capture",
    r"screen.?cap",
    r"^ss_",
    r"^sc_",
];

const IGNORE_PATTERNS: &[&str] = &[
    r"^\..*",
    r".*\.tmp$",
    r".*\.temp$",
    r"^~.*",
    r"^thumbs\.db$",
    r"^desktop\.ini$",
    r"^\.ds_store$",
    r"^ntuser\..*",
];

/// Browsers write these while a download is still in flight
const PARTIAL_SUFFIXES: &[&str] = &[".part", ".crdownload", ".partial", ".download"];

/// Folders that are never touched, wherever they appear in a path
pub const SYSTEM_FOLDERS: &[&str] = &[
    "Windows",
    "Program Files",
    "Program Files (x86)",
    "ProgramData",
    "$Recycle.Bin",
    "System Volume Information",
    "AppData",
];

/// How a category was decided
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CategorySource {
    Pattern,
    Rule,
    Ai,
    Fallback,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Categorization {
    pub category: String,
    pub source: CategorySource,
}

impl Categorization {
    fn new(category: impl Into<String>, source: CategorySource) -> Self {
        Self { category: category.into(), source }
    }
}

/// Categorizes files into folders by name patterns, extension rules and AI
#[derive(Debug, Clone)]
pub struct Categorizer {
    rules: HashMap<String, String>,
    screenshot_patterns: Vec<Regex>,
    ignore_patterns: Vec<Regex>,
}

fn compile(patterns: &[&str]) -> Vec<Regex> {
    patterns
        .iter()
        .filter_map(|p| RegexBuilder::new(p).case_insensitive(true).build().ok())
        .collect()
}

impl Default for Categorizer {
    fn default() -> Self {
        Self::new(&BTreeMap::new())
    }
}

impl Categorizer {
    /// Create a categorizer with custom extension rules layered on the defaults
    pub fn new(custom_rules: &BTreeMap<String, String>) -> Self {
        let mut rules: HashMap<String, String> = DEFAULT_RULES
            .iter()
            .map(|(ext, cat)| (ext.to_string(), cat.to_string()))
            .collect();

        for (ext, category) in custom_rules {
            let ext = ext.trim().to_lowercase();
            let ext = if ext.starts_with('.') { ext } else { format!(".{}", ext) };
            rules.insert(ext, category.clone());
        }

        Self {
            rules,
            screenshot_patterns: compile(SCREENSHOT_PATTERNS),
            ignore_patterns: compile(IGNORE_PATTERNS),
        }
    }

    /// Check if a file should be left alone
    pub fn should_ignore(&self, path: &Path) -> bool {
        let filename = match path.file_name().and_then(|n| n.to_str()) {
            Some(n) => n,
            None => return true,
        };

        if self.ignore_patterns.iter().any(|p| p.is_match(filename)) {
            return true;
        }

        let lower = filename.to_lowercase();
        if PARTIAL_SUFFIXES.iter().any(|s| lower.ends_with(s)) {
            return true;
        }

        path.components().any(|c| match c {
            Component::Normal(part) => part
                .to_str()
                .map(|p| SYSTEM_FOLDERS.contains(&p))
                .unwrap_or(false),
            _ => false,
        })
    }

    pub fn is_screenshot(&self, filename: &str) -> bool {
        let lower = filename.to_lowercase();
        self.screenshot_patterns.iter().any(|p| p.is_match(&lower))
    }

    /// Every category the rules can produce, plus the special ones
    pub fn available_categories(&self) -> Vec<String> {
        let mut set: BTreeSet<String> = self.rules.values().cloned().collect();
        set.insert(SCREENSHOTS.to_string());
        set.insert(OTHER.to_string());
        set.into_iter().collect()
    }

    /// Categorize by name patterns and extension only
    pub fn categorize(&self, path: &Path) -> Categorization {
        let filename = path.file_name().and_then(|n| n.to_str()).unwrap_or("");

        if self.is_screenshot(filename) {
            return Categorization::new(SCREENSHOTS, CategorySource::Pattern);
        }

        if let Some(category) = self.rule_for(path) {
            return Categorization::new(category, CategorySource::Rule);
        }

        Categorization::new(OTHER, CategorySource::Fallback)
    }

    /// Categorize, asking the model about files no rule covers
    pub async fn categorize_with_ai(
        &self,
        path: &Path,
        model: Option<&dyn LanguageModel>,
    ) -> Categorization {
        let result = self.categorize(path);
        if result.source != CategorySource::Fallback {
            return result;
        }

        match model {
            Some(model) => match self.ask_model(path, model).await {
                Some(category) => Categorization::new(category, CategorySource::Ai),
                None => result,
            },
            None => result,
        }
    }

    async fn ask_model(&self, path: &Path, model: &dyn LanguageModel) -> Option<String> {
        let filename = path.file_name()?.to_string_lossy().to_string();
        let available = self.available_categories();

        let system = format!(
            "You are a file categorization assistant.\n\
             Given a filename, determine the most appropriate category from this list:\n{}\n\n\
             Respond with ONLY the category name, nothing else.",
            available.join(", ")
        );
        let user = format!("Categorize this file: {}", filename);

        match model.complete(&system, &user).await {
            Ok(reply) => {
                let reply = reply.trim().trim_matches(|c| c == '"' || c == '\'' || c == '.');
                let chosen = available.iter().find(|c| c.eq_ignore_ascii_case(reply))?;
                info!("AI categorized {} as {}", filename, chosen);
                Some(chosen.clone())
            }
            Err(e) => {
                warn!("AI categorization failed for {:?}: {}", path, e);
                None
            }
        }
    }

    fn rule_for(&self, path: &Path) -> Option<&str> {
        let ext = path.extension().and_then(|e| e.to_str())?;
        self.rules
            .get(&format!(".{}", ext.to_lowercase()))
            .map(String::as_str)
    }

    /// Group non-ignored paths by rule-based category
    pub fn categorize_batch<'a, I>(&self, paths: I) -> BTreeMap<String, Vec<PathBuf>>
    where
        I: IntoIterator<Item = &'a Path>,
    {
        let mut groups: BTreeMap<String, Vec<PathBuf>> = BTreeMap::new();
        for path in paths {
            if self.should_ignore(path) {
                continue;
            }
            let category = self.categorize(path).category;
            groups.entry(category).or_default().push(path.to_path_buf());
        }
        groups
    }

    /// Destination inside `base/<category>/`, with a collision-free name
    pub fn destination_path(&self, path: &Path, base: &Path) -> Option<(PathBuf, Categorization)> {
        let name = path.file_name()?;
        let categorization = self.categorize(path);
        let dest = unique_destination(&base.join(&categorization.category), &name.to_string_lossy());
        Some((dest, categorization))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ai::testing::ScriptedModel;
    use tempfile::TempDir;

    #[test]
    fn test_extension_rules() {
        let c = Categorizer::default();
        assert_eq!(c.categorize(Path::new("/x/report.PDF")).category, "Documents");
        assert_eq!(c.categorize(Path::new("song.flac")).source, CategorySource::Rule);
        assert_eq!(c.categorize(Path::new("setup.msi")).category, "Programs");
    }

    #[test]
    fn test_screenshot_beats_extension() {
        let c = Categorizer::default();
        let result = c.categorize(Path::new("Screen Shot 2024-01-02.png"));
        assert_eq!(result, Categorization::new(SCREENSHOTS, CategorySource::Pattern));
        assert!(c.is_screenshot("ss_0001.jpg"));
        assert!(!c.is_screenshot("class_ss_notes.txt"));
    }

    #[test]
    fn test_unknown_extension_falls_back() {
        let c = Categorizer::default();
        assert_eq!(
            c.categorize(Path::new("mystery.xyz")),
            Categorization::new(OTHER, CategorySource::Fallback)
        );
        assert_eq!(c.categorize(Path::new("Makefile")).category, OTHER);
    }

    #[test]
    fn test_custom_rules_override() {
        let mut custom = BTreeMap::new();
        custom.insert("PDF".to_string(), "Papers".to_string());
        custom.insert(".blend".to_string(), "3D".to_string());
        let c = Categorizer::new(&custom);
        assert_eq!(c.categorize(Path::new("a.pdf")).category, "Papers");
        assert_eq!(c.categorize(Path::new("scene.blend")).category, "3D");
        assert!(c.available_categories().contains(&"3D".to_string()));
    }

    #[test]
    fn test_should_ignore() {
        let c = Categorizer::default();
        assert!(c.should_ignore(Path::new("/home/u/.bashrc")));
        assert!(c.should_ignore(Path::new("~$budget.xlsx")));
        assert!(c.should_ignore(Path::new("Thumbs.db")));
        assert!(c.should_ignore(Path::new("movie.mkv.part")));
        assert!(c.should_ignore(Path::new("C:/Users/me/AppData/Local/x.txt")));
        assert!(!c.should_ignore(Path::new("/home/u/Downloads/notes.txt")));
    }

    #[test]
    fn test_batch_groups_and_skips_ignored() {
        let c = Categorizer::default();
        let paths = [
            Path::new("a.jpg"),
            Path::new("b.png"),
            Path::new("c.pdf"),
            Path::new("d.tmp"),
        ];
        let groups = c.categorize_batch(paths.iter().copied());
        assert_eq!(groups["Images"].len(), 2);
        assert_eq!(groups["Documents"], vec![PathBuf::from("c.pdf")]);
        assert_eq!(groups.values().map(Vec::len).sum::<usize>(), 3);
    }

    #[test]
    fn test_destination_path_collision() {
        let dir = TempDir::new().unwrap();
        let images = dir.path().join("Images");
        std::fs::create_dir_all(&images).unwrap();
        std::fs::write(images.join("cat.jpg"), b"x").unwrap();
        std::fs::write(images.join("cat (1).jpg"), b"x").unwrap();

        let c = Categorizer::default();
        let (dest, cat) = c.destination_path(Path::new("/tmp/in/cat.jpg"), dir.path()).unwrap();
        assert_eq!(cat.category, "Images");
        assert_eq!(dest, images.join("cat (2).jpg"));
    }

    #[tokio::test]
    async fn test_ai_only_for_unmatched_files() {
        let c = Categorizer::default();
        let model = ScriptedModel::new(vec!["Fonts"]);

        let known = c.categorize_with_ai(Path::new("a.pdf"), Some(&model)).await;
        assert_eq!(known.source, CategorySource::Rule);
        assert_eq!(model.calls(), 0);

        let guessed = c.categorize_with_ai(Path::new("glyphs.bdf"), Some(&model)).await;
        assert_eq!(guessed, Categorization::new("Fonts", CategorySource::Ai));
    }

    #[tokio::test]
    async fn test_ai_reply_outside_list_is_discarded() {
        let c = Categorizer::default();
        let model = ScriptedModel::new(vec!["Spaceships"]);
        let result = c.categorize_with_ai(Path::new("thing.qqq"), Some(&model)).await;
        assert_eq!(result.source, CategorySource::Fallback);
    }
}
