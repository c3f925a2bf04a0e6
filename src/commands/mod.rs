// SPDX-License-Identifier: AGPL-3.0-or-later
// SPDX-FileCopyrightText: 2025 Jonathan D.A. Jewell
//
//! Command implementations

pub mod apply;
pub mod check;
pub mod completions;
pub mod config;
pub mod environments;
pub mod graphviz;
pub mod init;
pub mod plan;
pub mod recipes;
pub mod status;

use crate::config::Settings;
use crate::environments::Environments;
use crate::recipes::RecipeStore;
use anyhow::{Context, Result};
use serde::Serialize;
use std::path::PathBuf;

/// Options shared by every command
#[derive(Debug, Clone)]
pub struct Globals {
    /// Effective settings
    pub settings: Settings,
    /// Print machine readable JSON instead of text
    pub json: bool,
}

impl Globals {
    /// Recipe directory from the command line or the settings
    #[must_use]
    pub fn recipes_dir(&self) -> PathBuf {
        self.settings.recipes_dir()
    }

    /// Load every recipe
    pub fn recipe_store(&self) -> Result<RecipeStore> {
        let dir = self.recipes_dir();
        RecipeStore::load(&dir).with_context(|| format!("Failed to load recipes from {}", dir.display()))
    }

    /// Load environment definitions
    pub fn environments(&self) -> Result<Environments> {
        Environments::load(&self.settings.environments_file())
    }
}

/// Print `value` as pretty JSON on stdout
pub fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<()> {
    let json = serde_json::to_string_pretty(value).context("Failed to serialize output")?;
    println!("{json}");
    Ok(())
}
