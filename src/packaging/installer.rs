// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

//! Windows installer script (Inno Setup) generation

use minijinja::{context, Environment};
use serde::{Deserialize, Serialize};
use std::ffi::OsStr;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use tracing::{debug, info};
use uuid::Uuid;

use super::bundle::BundleSpec;
use crate::fsops::absolutize;
use crate::{OrganizerError, Result};

const COMPILER_NAMES: [&str; 2] = ["ISCC", "iscc"];

const INNO_SETUP_URL: &str = "https://jrsoftware.org/isinfo.php";

const TEMPLATE: &str = r#"; Inno Setup script for {{ setup.app_name }}
; Generated by ai-file-organizer {{ generator_version }}

[Setup]
AppId={{ app_id }}
AppName={{ setup.app_name }}
AppVersion={{ setup.app_version }}
VersionInfoVersion={{ version_quad }}
AppPublisher={{ setup.publisher }}
{% if setup.publisher_url %}
AppPublisherURL={{ setup.publisher_url }}
AppSupportURL={{ setup.publisher_url }}
{% endif %}
DefaultDirName={{ setup.default_dir_name }}
DefaultGroupName={{ setup.default_group_name }}
PrivilegesRequired={{ setup.privileges }}
OutputDir={{ setup.output_dir }}
OutputBaseFilename={{ setup.output_base_filename }}
{% if setup.setup_icon %}
SetupIconFile={{ setup.setup_icon }}
{% endif %}
Compression={{ setup.compression }}
SolidCompression={{ "yes" if setup.solid_compression else "no" }}
WizardStyle={{ setup.wizard_style }}

[Languages]
{% for lang in languages %}
Name: "{{ lang.name | q }}"; MessagesFile: "{{ lang.messages_file | q }}"
{% endfor %}

[Tasks]
{% for task in tasks %}
Name: "{{ task.name | q }}"; Description: "{{ task.description | q }}"; GroupDescription: "{{ task.group_description | q }}"{% if task.unchecked %}; Flags: unchecked{% endif %}{% if task.only_below_version %}; OnlyBelowVersion: {{ task.only_below_version }}{% endif %}

{% endfor %}

[Files]
{% for rule in files %}
Source: "{{ rule.source | q }}"; DestDir: "{{ rule.dest_dir | q }}"{% if rule.flags %}; Flags: {{ rule.flags | join(" ") }}{% endif %}

{% endfor %}

[Icons]
{% for icon in icons %}
Name: "{{ icon.name | q }}"; Filename: "{{ icon.filename | q }}"{% if icon.tasks %}; Tasks: {{ icon.tasks }}{% endif %}

{% endfor %}

[Run]
{% for entry in run %}
Filename: "{{ entry.filename | q }}"; Description: "{{ entry.description | q }}"{% if entry.flags %}; Flags: {{ entry.flags | join(" ") }}{% endif %}

{% endfor %}

[Code]
{% if code %}
{{ code }}
{% else %}
// Custom installation checks can be added here
{% endif %}
"#;

/// Privilege level requested by the installer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Privileges {
    /// Per-user install, no elevation
    #[default]
    Lowest,
    Admin,
}

impl fmt::Display for Privileges {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Lowest => write!(f, "lowest"),
            Self::Admin => write!(f, "admin"),
        }
    }
}

/// Installer settings persisted in the app config
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstallerConfig {
    #[serde(default = "default_publisher")]
    pub publisher: String,
    #[serde(default)]
    pub publisher_url: Option<String>,
    /// Fixed installer GUID; derived from the app name when unset
    #[serde(default)]
    pub app_id: Option<String>,
    #[serde(default)]
    pub privileges: Privileges,
    #[serde(default = "default_output_dir")]
    pub output_dir: String,
    #[serde(default = "default_output_base")]
    pub output_base_filename: String,
    #[serde(default = "default_script_path")]
    pub script_path: PathBuf,
    /// Raw `[Code]` section contents
    #[serde(default)]
    pub code: Option<String>,
}

fn default_publisher() -> String {
    "AI File Organizer".to_string()
}

fn default_output_dir() -> String {
    "Output".to_string()
}

fn default_output_base() -> String {
    "AI_File_Organizer_Setup".to_string()
}

fn default_script_path() -> PathBuf {
    PathBuf::from("installer.iss")
}

impl Default for InstallerConfig {
    fn default() -> Self {
        Self {
            publisher: default_publisher(),
            publisher_url: None,
            app_id: None,
            privileges: Privileges::default(),
            output_dir: default_output_dir(),
            output_base_filename: default_output_base(),
            script_path: default_script_path(),
            code: None,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SetupSection {
    /// Bare GUID, no braces
    pub app_id: String,
    pub app_name: String,
    pub app_version: String,
    pub publisher: String,
    pub publisher_url: Option<String>,
    pub default_dir_name: String,
    pub default_group_name: String,
    pub privileges: Privileges,
    pub output_dir: String,
    pub output_base_filename: String,
    pub setup_icon: Option<String>,
    pub compression: String,
    pub solid_compression: bool,
    pub wizard_style: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct Language {
    pub name: String,
    pub messages_file: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct Task {
    pub name: String,
    pub description: String,
    pub group_description: String,
    pub unchecked: bool,
    pub only_below_version: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct FileRule {
    pub source: String,
    pub dest_dir: String,
    pub flags: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct IconRule {
    pub name: String,
    pub filename: String,
    pub tasks: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RunEntry {
    pub filename: String,
    pub description: String,
    pub flags: Vec<String>,
}

/// A complete installer description, one field per script section
#[derive(Debug, Clone, Serialize)]
pub struct InstallerSpec {
    pub setup: SetupSection,
    pub languages: Vec<Language>,
    pub tasks: Vec<Task>,
    pub files: Vec<FileRule>,
    pub icons: Vec<IconRule>,
    pub run: Vec<RunEntry>,
    pub code: Option<String>,
}

/// Deterministic installer GUID for an application name
pub fn derive_app_id(app_name: &str) -> String {
    Uuid::new_v5(&Uuid::NAMESPACE_URL, app_name.as_bytes())
        .to_string()
        .to_uppercase()
}

/// Pad or truncate a version to four numeric parts
///
/// `1.2` becomes `1.2.0.0`, `1.2.3-beta` becomes `1.2.3.0`, and
/// `1.2.3.4.5` becomes `1.2.3.4`.
pub fn format_version_quad(version: &str) -> String {
    let core = version
        .trim()
        .trim_start_matches(['v', 'V'])
        .split(['-', '+'])
        .next()
        .unwrap_or_default();

    let mut parts: Vec<u64> = core
        .split('.')
        .take(4)
        .map(|part| {
            let digits: String = part.chars().take_while(|c| c.is_ascii_digit()).collect();
            digits.parse().unwrap_or(0)
        })
        .collect();
    parts.resize(4, 0);

    parts
        .iter()
        .map(u64::to_string)
        .collect::<Vec<_>>()
        .join(".")
}

fn to_inno(path: &Path) -> String {
    path.to_string_lossy().replace('/', "\\")
}

/// `path` as the script at `script` must spell it
///
/// Inno Setup resolves relative paths against the script directory, so a
/// path under that directory stays relative and anything else becomes
/// absolute.
fn path_for_script(path: &Path, script: &Path) -> PathBuf {
    let path = absolutize(path);
    let script_dir = absolutize(script.parent().unwrap_or(Path::new("")));
    match path.strip_prefix(&script_dir) {
        Ok(rel) if !rel.as_os_str().is_empty() => rel.to_path_buf(),
        _ => path,
    }
}

/// Inside a quoted Inno value a double quote is written twice
fn quote(value: String) -> String {
    value.replace('"', "\"\"")
}

impl InstallerSpec {
    /// Default installer for a collected bundle, to be written at `script`
    pub fn for_bundle(
        bundle: &BundleSpec,
        bundle_dir: &Path,
        script: &Path,
        version: &str,
        config: &InstallerConfig,
    ) -> Self {
        let name = bundle.name.clone();
        let exe = format!("{{app}}\\{}.exe", name);

        let app_id = config
            .app_id
            .as_deref()
            .map(|id| id.trim_matches(['{', '}']).to_uppercase())
            .unwrap_or_else(|| derive_app_id(&name));

        let setup_icon = bundle
            .icon
            .as_deref()
            .map(absolutize)
            .filter(|icon| icon.is_file())
            .map(|icon| to_inno(&path_for_script(&icon, script)));

        let setup = SetupSection {
            app_id,
            app_name: name.clone(),
            app_version: version.to_string(),
            publisher: config.publisher.clone(),
            publisher_url: config.publisher_url.clone(),
            default_dir_name: format!("{{autopf}}\\{}", name),
            default_group_name: name.clone(),
            privileges: config.privileges,
            output_dir: config.output_dir.clone(),
            output_base_filename: config.output_base_filename.clone(),
            setup_icon,
            compression: "lzma2".to_string(),
            solid_compression: true,
            wizard_style: "modern".to_string(),
        };

        let tasks = vec![
            Task {
                name: "desktopicon".to_string(),
                description: "{cm:CreateDesktopIcon}".to_string(),
                group_description: "{cm:AdditionalIcons}".to_string(),
                unchecked: false,
                only_below_version: None,
            },
            Task {
                name: "quicklaunchicon".to_string(),
                description: "{cm:CreateQuickLaunchIcon}".to_string(),
                group_description: "{cm:AdditionalIcons}".to_string(),
                unchecked: true,
                only_below_version: Some("6.1".to_string()),
            },
        ];

        let files = vec![FileRule {
            source: format!("{}\\*", to_inno(&path_for_script(bundle_dir, script))),
            dest_dir: "{app}".to_string(),
            flags: ["ignoreversion", "recursesubdirs", "createallsubdirs"]
                .iter()
                .map(|f| f.to_string())
                .collect(),
        }];

        let icons = vec![
            IconRule {
                name: format!("{{group}}\\{}", name),
                filename: exe.clone(),
                tasks: None,
            },
            IconRule {
                name: format!("{{group}}\\{{cm:UninstallProgram,{}}}", name),
                filename: "{uninstallexe}".to_string(),
                tasks: None,
            },
            IconRule {
                name: format!("{{autodesktop}}\\{}", name),
                filename: exe.clone(),
                tasks: Some("desktopicon".to_string()),
            },
            IconRule {
                name: format!("{{userappdata}}\\Microsoft\\Internet Explorer\\Quick Launch\\{}", name),
                filename: exe.clone(),
                tasks: Some("quicklaunchicon".to_string()),
            },
        ];

        let run = vec![RunEntry {
            filename: exe,
            description: format!("{{cm:LaunchProgram,{}}}", name),
            flags: ["nowait", "postinstall", "skipifsilent"]
                .iter()
                .map(|f| f.to_string())
                .collect(),
        }];

        Self {
            setup,
            languages: vec![Language {
                name: "english".to_string(),
                messages_file: "compiler:Default.isl".to_string(),
            }],
            tasks,
            files,
            icons,
            run,
            code: config.code.clone().filter(|c| !c.trim().is_empty()),
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.setup.app_name.trim().is_empty() {
            return Err(OrganizerError::Packaging("Installer app name cannot be empty".to_string()));
        }
        if self.setup.app_version.trim().is_empty() {
            return Err(OrganizerError::Packaging("Installer version cannot be empty".to_string()));
        }
        Uuid::parse_str(&self.setup.app_id)
            .map_err(|e| OrganizerError::Packaging(format!("Invalid AppId '{}': {}", self.setup.app_id, e)))?;
        if self.files.is_empty() {
            return Err(OrganizerError::Packaging("Installer has no [Files] entries".to_string()));
        }

        for icon in &self.icons {
            let Some(tasks) = &icon.tasks else {
                continue;
            };
            for task in tasks.split_whitespace() {
                if !self.tasks.iter().any(|t| t.name == task) {
                    return Err(OrganizerError::Packaging(format!(
                        "Icon '{}' references undeclared task '{}'",
                        icon.name, task
                    )));
                }
            }
        }
        Ok(())
    }

    /// Render the Inno Setup script
    pub fn render(&self) -> Result<String> {
        let mut env = Environment::new();
        env.set_trim_blocks(true);
        env.set_lstrip_blocks(true);
        env.set_keep_trailing_newline(true);
        env.add_filter("q", quote);
        env.add_template("installer.iss", TEMPLATE)?;

        let script = env.get_template("installer.iss")?.render(context! {
            setup => &self.setup,
            app_id => format!("{{{{{}}}", self.setup.app_id),
            version_quad => format_version_quad(&self.setup.app_version),
            generator_version => crate::update::VERSION,
            languages => &self.languages,
            tasks => &self.tasks,
            files => &self.files,
            icons => &self.icons,
            run => &self.run,
            code => &self.code,
        })?;
        Ok(script)
    }

    pub fn write(&self, path: &Path) -> Result<()> {
        self.validate()?;
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, self.render()?)?;
        info!("Wrote installer script {}", path.display());
        Ok(())
    }

    /// Where the compiler puts the setup executable for `script`
    pub fn output_path(&self, script: &Path) -> PathBuf {
        let script_dir = script.parent().unwrap_or(Path::new(""));
        script_dir
            .join(&self.setup.output_dir)
            .join(format!("{}.exe", self.setup.output_base_filename))
    }

    /// Run the installer compiler on `script`
    pub fn compile(&self, script: &Path) -> Result<PathBuf> {
        let compiler = locate_compiler()?;
        info!("Compiling {} with {}", script.display(), compiler.display());

        let status = Command::new(&compiler)
            .arg(script)
            .status()
            .map_err(|e| OrganizerError::Packaging(format!("Failed to run {}: {}", compiler.display(), e)))?;
        if !status.success() {
            return Err(OrganizerError::Packaging(format!("ISCC failed with {}", status)));
        }
        Ok(self.output_path(script))
    }
}

/// Find the Inno Setup command-line compiler
pub fn locate_compiler() -> Result<PathBuf> {
    if let Ok(path) = locate_compiler_in(std::env::var_os("PATH")) {
        return Ok(path);
    }

    #[cfg(windows)]
    {
        for dir in ["C:\\Program Files (x86)\\Inno Setup 6", "C:\\Program Files\\Inno Setup 6"] {
            let candidate = Path::new(dir).join("ISCC.exe");
            if candidate.is_file() {
                return Ok(candidate);
            }
        }
    }

    Err(compiler_missing())
}

fn locate_compiler_in<U: AsRef<OsStr>>(paths: Option<U>) -> Result<PathBuf> {
    let cwd = std::env::current_dir()?;
    for name in COMPILER_NAMES {
        match which::which_in(name, paths.as_ref(), &cwd) {
            Ok(path) => return Ok(path),
            Err(e) => debug!("{} not found: {}", name, e),
        }
    }
    Err(compiler_missing())
}

fn compiler_missing() -> OrganizerError {
    OrganizerError::Packaging(format!(
        "Inno Setup compiler (ISCC) not found on PATH. Install Inno Setup from {}",
        INNO_SETUP_URL
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn spec() -> InstallerSpec {
        InstallerSpec::for_bundle(
            &BundleSpec::default(),
            Path::new("dist/AI File Organizer"),
            Path::new("installer.iss"),
            "1.0.0",
            &InstallerConfig::default(),
        )
    }

    #[test]
    fn test_format_version_quad() {
        assert_eq!(format_version_quad("1"), "1.0.0.0");
        assert_eq!(format_version_quad("1.2"), "1.2.0.0");
        assert_eq!(format_version_quad("1.2.3"), "1.2.3.0");
        assert_eq!(format_version_quad("1.2.3.4.5"), "1.2.3.4");
        assert_eq!(format_version_quad("v2.0.1-beta.3"), "2.0.1.0");
        assert_eq!(format_version_quad(""), "0.0.0.0");
    }

    #[test]
    fn test_app_id_is_stable() {
        assert_eq!(derive_app_id("AI File Organizer"), derive_app_id("AI File Organizer"));
        assert_ne!(derive_app_id("AI File Organizer"), derive_app_id("Other"));
        assert_eq!(spec().setup.app_id, derive_app_id("AI File Organizer"));
    }

    #[test]
    fn test_configured_app_id_loses_braces() {
        let config = InstallerConfig {
            app_id: Some("{6f1c2a9e-0d4b-4a57-9b1e-3c8f5d2e7a10}".to_string()),
            ..InstallerConfig::default()
        };
        let spec = InstallerSpec::for_bundle(
            &BundleSpec::default(),
            Path::new("dist/x"),
            Path::new("installer.iss"),
            "1.0",
            &config,
        );
        assert_eq!(spec.setup.app_id, "6F1C2A9E-0D4B-4A57-9B1E-3C8F5D2E7A10");
        assert!(spec.validate().is_ok());
    }

    #[test]
    fn test_render_has_every_section() {
        let script = spec().render().unwrap();
        for section in ["[Setup]", "[Languages]", "[Tasks]", "[Files]", "[Icons]", "[Run]", "[Code]"] {
            assert!(script.contains(section), "missing {}", section);
        }
        assert!(script.contains(&format!("AppId={{{{{}}}\n", derive_app_id("AI File Organizer"))));
        assert!(script.contains("DefaultDirName={autopf}\\AI File Organizer\n"));
        assert!(script.contains("PrivilegesRequired=lowest\n"));
        assert!(script.contains("OutputBaseFilename=AI_File_Organizer_Setup\n"));
        assert!(script.contains("VersionInfoVersion=1.0.0.0\n"));
        assert!(script.contains(
            "Source: \"dist\\AI File Organizer\\*\"; DestDir: \"{app}\"; Flags: ignoreversion recursesubdirs createallsubdirs\n"
        ));
        assert!(script.contains("Tasks: desktopicon\n"));
        assert!(script.contains("Flags: unchecked; OnlyBelowVersion: 6.1\n"));
        assert!(script.contains("Flags: nowait postinstall skipifsilent\n"));
        assert!(!script.contains("AppPublisherURL"));
    }

    #[test]
    fn test_quotes_are_doubled() {
        let mut spec = spec();
        spec.icons[0].name = "{group}\\The \"Organizer\"".to_string();
        let script = spec.render().unwrap();
        assert!(script.contains("Name: \"{group}\\The \"\"Organizer\"\"\""));
    }

    #[test]
    fn test_custom_code_block() {
        let mut spec = spec();
        spec.code = Some("function InitializeSetup(): Boolean;\nbegin\n  Result := True;\nend;".to_string());
        let script = spec.render().unwrap();
        assert!(script.contains("[Code]\nfunction InitializeSetup(): Boolean;"));
        assert!(!script.contains("Custom installation checks"));
    }

    #[test]
    fn test_validate_catches_undeclared_task() {
        let mut spec = spec();
        assert!(spec.validate().is_ok());
        spec.icons[2].tasks = Some("startupicon".to_string());
        assert!(spec.validate().unwrap_err().to_string().contains("startupicon"));
    }

    #[test]
    fn test_validate_requires_files_and_version() {
        let mut spec = spec();
        spec.files.clear();
        assert!(spec.validate().is_err());

        let mut spec = self::spec();
        spec.setup.app_version = String::new();
        assert!(spec.validate().is_err());
    }

    #[test]
    fn test_write_creates_script() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("build").join("installer.iss");
        spec().write(&path).unwrap();
        assert!(fs::read_to_string(&path).unwrap().starts_with("; Inno Setup script"));
    }

    #[test]
    fn test_bundle_source_outside_script_dir_is_absolute() {
        let spec = InstallerSpec::for_bundle(
            &BundleSpec::default(),
            Path::new("dist/AI File Organizer"),
            Path::new("build/installer.iss"),
            "1.0.0",
            &InstallerConfig::default(),
        );
        let expected = std::env::current_dir().unwrap().join("dist/AI File Organizer");
        assert_eq!(spec.files[0].source, format!("{}\\*", to_inno(&expected)));
        assert!(Path::new(&spec.files[0].source.replace('\\', "/").trim_end_matches("/*")).is_absolute());
    }

    #[test]
    fn test_paths_under_script_dir_stay_relative() {
        let dir = TempDir::new().unwrap();
        let icon = dir.path().join("resources").join("icon.ico");
        fs::create_dir_all(icon.parent().unwrap()).unwrap();
        fs::write(&icon, b"ico").unwrap();
        let bundle = BundleSpec { icon: Some(icon), ..BundleSpec::default() };

        let spec = InstallerSpec::for_bundle(
            &bundle,
            &dir.path().join("dist").join("app"),
            &dir.path().join("installer.iss"),
            "1.0.0",
            &InstallerConfig::default(),
        );
        assert_eq!(spec.files[0].source, "dist\\app\\*");
        assert_eq!(spec.setup.setup_icon.as_deref(), Some("resources\\icon.ico"));
    }

    #[test]
    fn test_missing_icon_is_left_out() {
        let dir = TempDir::new().unwrap();
        let bundle = BundleSpec { icon: Some(dir.path().join("none.ico")), ..BundleSpec::default() };
        let spec = InstallerSpec::for_bundle(
            &bundle,
            Path::new("dist/x"),
            &dir.path().join("installer.iss"),
            "1.0.0",
            &InstallerConfig::default(),
        );
        assert!(spec.setup.setup_icon.is_none());
    }

    #[test]
    fn test_output_path_is_relative_to_script() {
        let out = spec().output_path(Path::new("/proj/installer.iss"));
        assert_eq!(out, PathBuf::from("/proj/Output/AI_File_Organizer_Setup.exe"));
    }

    #[test]
    fn test_missing_compiler_is_reported() {
        let empty = TempDir::new().unwrap();
        let err = locate_compiler_in(Some(empty.path())).unwrap_err();
        assert!(matches!(err, OrganizerError::Packaging(_)));
        assert!(err.to_string().contains("ISCC"));
    }
}
