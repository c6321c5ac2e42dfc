// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

//! Build pipeline: collect the bundle, then write and optionally compile
//! the installer script

use std::path::{Path, PathBuf};
use tracing::info;

use super::bundle::{collect, BundleReport};
use super::installer::InstallerSpec;
use crate::config::PackagingConfig;
use crate::Result;

#[derive(Debug, Clone)]
pub struct BuildOptions {
    pub dist_root: PathBuf,
    /// Overrides the configured script path
    pub script_path: Option<PathBuf>,
    pub version: String,
    /// Run ISCC after writing the script
    pub compile: bool,
}

impl Default for BuildOptions {
    fn default() -> Self {
        Self {
            dist_root: PathBuf::from("dist"),
            script_path: None,
            version: crate::update::VERSION.to_string(),
            compile: false,
        }
    }
}

#[derive(Debug, Clone)]
pub struct BuildReport {
    pub bundle: BundleReport,
    pub script: PathBuf,
    /// Setup executable, when compiled
    pub installer: Option<PathBuf>,
    pub next_steps: Vec<String>,
}

pub fn run_build(config: &PackagingConfig, options: &BuildOptions) -> Result<BuildReport> {
    let bundle = collect(&config.bundle, &options.dist_root)?;

    let script = options
        .script_path
        .clone()
        .unwrap_or_else(|| config.installer.script_path.clone());
    let installer = InstallerSpec::for_bundle(
        &config.bundle,
        &bundle.bundle_dir,
        &script,
        &options.version,
        &config.installer,
    );
    installer.write(&script)?;

    let compiled = if options.compile {
        let output = installer.compile(&script)?;
        info!("Installer created: {}", output.display());
        Some(output)
    } else {
        None
    };

    let next_steps = next_steps(&bundle.executable, &script, &installer.output_path(&script), compiled.is_some());

    Ok(BuildReport {
        bundle,
        script,
        installer: compiled,
        next_steps,
    })
}

fn next_steps(executable: &Path, script: &Path, output: &Path, compiled: bool) -> Vec<String> {
    let mut steps = vec![format!("Test the executable: {}", executable.display())];
    if compiled {
        steps.push(format!("Distribute the installer: {}", output.display()));
    } else {
        steps.push("Install Inno Setup from https://jrsoftware.org/isinfo.php".to_string());
        steps.push(format!(
            "Compile {} (open it in Inno Setup and click 'Compile', or run `organizer package --compile`)",
            script.display()
        ));
        steps.push(format!("This creates the final installer: {}", output.display()));
    }
    steps
}
