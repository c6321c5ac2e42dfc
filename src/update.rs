// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

//! Version information and update checks

use reqwest::Client;
use semver::Version;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, info};

use crate::Result;

/// Version of this build
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

const CHECK_TIMEOUT: Duration = Duration::from_secs(5);

/// Shape of the published `version.json`
#[derive(Debug, Deserialize)]
struct VersionManifest {
    #[serde(default)]
    version: Option<String>,
    #[serde(default)]
    download_url: Option<String>,
    #[serde(default)]
    release_notes: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UpdateInfo {
    pub current_version: String,
    pub latest_version: String,
    pub download_url: String,
    pub release_notes: String,
}

/// Lenient version parsing: `v1.2` is 1.2.0, garbage is 0.0.0
pub fn parse_version(raw: &str) -> Version {
    let trimmed = raw.trim().trim_start_matches(['v', 'V']);
    if let Ok(version) = Version::parse(trimmed) {
        return version;
    }

    let parts: Option<Vec<u64>> = trimmed
        .split('.')
        .take(3)
        .map(|p| p.trim().parse().ok())
        .collect();
    match parts {
        Some(parts) if !parts.is_empty() => Version::new(
            parts[0],
            parts.get(1).copied().unwrap_or(0),
            parts.get(2).copied().unwrap_or(0),
        ),
        _ => Version::new(0, 0, 0),
    }
}

/// The update described by `body`, if it is newer than `current`
fn evaluate(body: &str, current: &str, fallback_url: &str) -> Option<UpdateInfo> {
    let manifest: VersionManifest = match serde_json::from_str(body) {
        Ok(m) => m,
        Err(e) => {
            debug!("Invalid update response: {}", e);
            return None;
        }
    };

    let latest = manifest.version.unwrap_or_else(|| "0.0.0".to_string());
    if parse_version(&latest) <= parse_version(current) {
        debug!("App is up to date (v{})", current);
        return None;
    }

    Some(UpdateInfo {
        current_version: current.to_string(),
        latest_version: latest,
        download_url: manifest.download_url.unwrap_or_else(|| fallback_url.to_string()),
        release_notes: manifest.release_notes.unwrap_or_default(),
    })
}

/// Fetch the version manifest; `None` when up to date or unreachable
pub async fn check_for_updates(check_url: &str, download_url: &str, current: &str) -> Result<Option<UpdateInfo>> {
    let client = Client::builder().timeout(CHECK_TIMEOUT).build()?;

    let response = match client.get(check_url).send().await {
        Ok(r) => r,
        Err(e) => {
            debug!("Update check failed: {}", e);
            return Ok(None);
        }
    };
    if !response.status().is_success() {
        debug!("Update check failed: HTTP {}", response.status());
        return Ok(None);
    }

    let body = response.text().await?;
    let info = evaluate(&body, current, download_url);
    if let Some(info) = &info {
        info!("Update available: v{} -> v{}", info.current_version, info.latest_version);
    }
    Ok(info)
}

/// Open a URL in the platform browser
pub fn open_download_page(url: &str) -> std::io::Result<()> {
    #[cfg(target_os = "linux")]
    {
        std::process::Command::new("xdg-open")
            .arg(url)
            .spawn()?;
    }
    #[cfg(target_os = "macos")]
    {
        std::process::Command::new("open")
            .arg(url)
            .spawn()?;
    }
    #[cfg(target_os = "windows")]
    {
        std::process::Command::new("cmd")
            .args(["/c", "start", "", url])
            .spawn()?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_version_lenient() {
        assert_eq!(parse_version("1.2.3"), Version::new(1, 2, 3));
        assert_eq!(parse_version("v2.0"), Version::new(2, 0, 0));
        assert_eq!(parse_version(" 3 "), Version::new(3, 0, 0));
        assert_eq!(parse_version("banana"), Version::new(0, 0, 0));
        assert_eq!(parse_version(""), Version::new(0, 0, 0));
    }

    #[test]
    fn test_newer_version_reported() {
        let body = r#"{"version": "1.1.0", "release_notes": "Faster"}"#;
        let info = evaluate(body, "1.0.0", "https://example.org/dl").unwrap();
        assert_eq!(info.latest_version, "1.1.0");
        assert_eq!(info.download_url, "https://example.org/dl");
        assert_eq!(info.release_notes, "Faster");
    }

    #[test]
    fn test_same_or_older_is_ignored() {
        assert!(evaluate(r#"{"version": "1.0.0"}"#, "1.0.0", "x").is_none());
        assert!(evaluate(r#"{"version": "0.9"}"#, "1.0.0", "x").is_none());
        assert!(evaluate("<html>", "1.0.0", "x").is_none());
    }

    #[test]
    fn test_unreachable_server_is_not_an_error() {
        let result = tokio_test::block_on(check_for_updates("http://127.0.0.1:9/version.json", "x", VERSION));
        assert!(result.unwrap().is_none());
    }
}
