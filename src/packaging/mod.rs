// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

//! Packaging: bundle collection and installer generation

pub mod build;
pub mod bundle;
pub mod installer;

pub use build::{run_build, BuildOptions, BuildReport};
pub use bundle::{collect, collect_from, BundleManifest, BundleReport, BundleSpec, DataFile, ManifestEntry};
pub use installer::{format_version_quad, InstallerConfig, InstallerSpec, Privileges};
