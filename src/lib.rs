// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

//! AI File Organizer
//!
//! Indexes files, sorts them by rules or by an AI organization plan the
//! user approves, journals every move for undo and watches folders for
//! new arrivals. Also packages itself into a distributable bundle with a
//! Windows installer script.

pub mod ai;
pub mod categorizer;
pub mod config;
pub mod db;
pub mod error;
pub mod fsops;
pub mod history;
pub mod indexer;
pub mod organizer;
pub mod packaging;
pub mod planner;
pub mod query;
pub mod update;
pub mod watcher;

pub use config::AppConfig;
pub use error::{OrganizerError, Result};
