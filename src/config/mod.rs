// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

//! Configuration management for the organizer

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::packaging::{BundleSpec, InstallerConfig};

/// Directory name used under the platform config directory
pub const APP_DIR_NAME: &str = "ai-file-organizer";

/// Environment variable consulted when no API key is configured
pub const OPENAI_KEY_ENV: &str = "OPENAI_API_KEY";

/// Main application configuration
#[derive(Debug, Deserialize, Serialize, Clone, Default)]
pub struct AppConfig {
    /// AI provider configuration
    #[serde(default)]
    pub ai: AiConfig,

    /// Extension overrides for the rule-based categorizer
    #[serde(default)]
    pub categories: CategoryConfig,

    /// Auto-organize watcher settings
    #[serde(default)]
    pub watcher: WatcherConfig,

    /// File index settings
    #[serde(default)]
    pub database: DatabaseConfig,

    /// Move journal settings
    #[serde(default)]
    pub history: HistoryConfig,

    /// Update check settings
    #[serde(default)]
    pub update: UpdateConfig,

    /// Bundle and installer descriptors
    #[serde(default)]
    pub packaging: PackagingConfig,
}

/// Which backend answers planning and categorization prompts
#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum AiProvider {
    #[default]
    OpenAi,
    /// Ollama running on this machine
    Local,
    None,
}

impl std::str::FromStr for AiProvider {
    type Err = crate::OrganizerError;

    fn from_str(s: &str) -> crate::Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "openai" => Ok(Self::OpenAi),
            "local" | "ollama" => Ok(Self::Local),
            "none" => Ok(Self::None),
            other => Err(crate::OrganizerError::Config(format!(
                "Unknown AI provider '{}' (expected openai, local or none)",
                other
            ))),
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct AiConfig {
    #[serde(default)]
    pub provider: AiProvider,
    #[serde(default = "default_openai_model")]
    pub openai_model: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub openai_api_key: Option<String>,
    #[serde(default = "default_openai_url")]
    pub openai_url: String,
    #[serde(default = "default_ollama_url")]
    pub ollama_url: String,
    /// Handles both text and vision prompts
    #[serde(default = "default_local_model")]
    pub local_model: String,
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
    #[serde(default = "default_retries")]
    pub retries: u32,
    /// Sampling temperature for OpenAI requests
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    /// Reply token cap for OpenAI requests
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    /// Label images through the local vision model while indexing
    #[serde(default)]
    pub vision: bool,
}

#[derive(Debug, Deserialize, Serialize, Clone, Default)]
pub struct CategoryConfig {
    /// Extension (with leading dot) to category folder
    #[serde(default)]
    pub custom: BTreeMap<String, String>,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq, Eq)]
pub struct WatchedFolder {
    pub path: PathBuf,
    #[serde(default)]
    pub instruction: String,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct WatcherConfig {
    #[serde(default)]
    pub folders: Vec<WatchedFolder>,
    /// Used for folders that have no instruction of their own
    #[serde(default)]
    pub instruction: String,
    #[serde(default = "default_true")]
    pub auto_start: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_active: Option<DateTime<Utc>>,
    #[serde(default = "default_poll_interval")]
    pub poll_interval_ms: u64,
    #[serde(default = "default_debounce")]
    pub debounce_ms: u64,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_path")]
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct HistoryConfig {
    #[serde(default = "default_history_path")]
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct UpdateConfig {
    #[serde(default = "default_update_url")]
    pub check_url: String,
    #[serde(default = "default_download_url")]
    pub download_url: String,
    #[serde(default = "default_true")]
    pub check_on_start: bool,
}

#[derive(Debug, Deserialize, Serialize, Clone, Default)]
pub struct PackagingConfig {
    #[serde(default)]
    pub bundle: BundleSpec,
    #[serde(default)]
    pub installer: InstallerConfig,
}

// Default value functions
fn default_openai_model() -> String { "gpt-4o-mini".to_string() }
fn default_openai_url() -> String { "https://api.openai.com/v1".to_string() }
fn default_ollama_url() -> String { "http://localhost:11434".to_string() }
fn default_local_model() -> String { "qwen2.5vl:3b".to_string() }
fn default_timeout() -> u64 { 180 }
fn default_retries() -> u32 { 2 }
fn default_temperature() -> f32 { 0.1 }
fn default_max_tokens() -> u32 { 4000 }
fn default_true() -> bool { true }
fn default_poll_interval() -> u64 { 2000 }
fn default_debounce() -> u64 { 3000 }
fn default_db_path() -> PathBuf { app_data_dir().join("index.db") }
fn default_history_path() -> PathBuf { app_data_dir().join("moves").join("moves.jsonl") }
fn default_update_url() -> String {
    "https://raw.githubusercontent.com/Itsme23476/App-interface/main/version.json".to_string()
}
fn default_download_url() -> String {
    "https://github.com/Itsme23476/App-interface/releases/latest".to_string()
}

/// Per-user application directory (`%APPDATA%` on Windows, `~/.config` elsewhere)
pub fn app_data_dir() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(APP_DIR_NAME)
}

/// Default location of the configuration file
pub fn default_config_path() -> PathBuf {
    app_data_dir().join("config.json")
}

impl Default for AiConfig {
    fn default() -> Self {
        Self {
            provider: AiProvider::default(),
            openai_model: default_openai_model(),
            openai_api_key: None,
            openai_url: default_openai_url(),
            ollama_url: default_ollama_url(),
            local_model: default_local_model(),
            timeout_secs: default_timeout(),
            retries: default_retries(),
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
            vision: false,
        }
    }
}

impl AiConfig {
    /// Configured key, falling back to `OPENAI_API_KEY`
    pub fn api_key(&self) -> Option<String> {
        self.openai_api_key
            .clone()
            .filter(|k| !k.trim().is_empty())
            .or_else(|| std::env::var(OPENAI_KEY_ENV).ok())
            .map(|k| k.trim().to_string())
            .filter(|k| !k.is_empty())
    }
}

impl Default for WatcherConfig {
    fn default() -> Self {
        Self {
            folders: Vec::new(),
            instruction: String::new(),
            auto_start: true,
            last_active: None,
            poll_interval_ms: default_poll_interval(),
            debounce_ms: default_debounce(),
        }
    }
}

impl WatcherConfig {
    /// True when any folder (or the global fallback) has an instruction
    pub fn has_instructions(&self) -> bool {
        !self.instruction.trim().is_empty()
            || self.folders.iter().any(|f| !f.instruction.trim().is_empty())
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self { path: default_db_path() }
    }
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self { path: default_history_path() }
    }
}

impl Default for UpdateConfig {
    fn default() -> Self {
        Self {
            check_url: default_update_url(),
            download_url: default_download_url(),
            check_on_start: true,
        }
    }
}

impl AppConfig {
    /// Load configuration from a JSON file
    pub fn load(path: &Path) -> crate::Result<Self> {
        if path.exists() {
            let content = std::fs::read_to_string(path)?;
            let config: Self = serde_json::from_str(&content)
                .map_err(|e| crate::OrganizerError::Config(format!("Failed to parse config: {}", e)))?;
            Ok(config)
        } else {
            tracing::info!("Config file not found at {:?}, using defaults", path);
            Ok(Self::default())
        }
    }

    /// Save configuration to a JSON file
    pub fn save(&self, path: &Path) -> crate::Result<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Check values that serde cannot
    pub fn validate(&self) -> crate::Result<()> {
        if self.watcher.poll_interval_ms == 0 {
            return Err(crate::OrganizerError::Config(
                "watcher.poll_interval_ms must be greater than zero".to_string(),
            ));
        }
        for url in [&self.ai.ollama_url, &self.ai.openai_url] {
            if !(url.starts_with("http://") || url.starts_with("https://")) {
                return Err(crate::OrganizerError::Config(format!("Invalid URL: {}", url)));
            }
        }
        if self.ai.provider == AiProvider::OpenAi && self.ai.api_key().is_none() {
            tracing::warn!("AI provider is openai but no API key is set ({})", OPENAI_KEY_ENV);
        }
        self.packaging.bundle.validate()?;
        Ok(())
    }

    /// Instruction for a watched folder, falling back to the global one
    pub fn instruction_for(&self, folder: &Path) -> Option<String> {
        self.watcher
            .folders
            .iter()
            .find(|f| f.path == folder)
            .map(|f| f.instruction.trim())
            .filter(|i| !i.is_empty())
            .or_else(|| Some(self.watcher.instruction.trim()).filter(|i| !i.is_empty()))
            .map(String::from)
    }
}
