// SPDX-License-Identifier: AGPL-3.0-or-later
// SPDX-FileCopyrightText: 2025 Jonathan D.A. Jewell
//! Graphviz command - DOT export of the recipe graph

use super::Globals;
use crate::graph::RecipeGraph;
use crate::selector::PackageSelector;
use anyhow::{Context, Result};
use std::fs;
use std::path::PathBuf;
use tracing::info;

/// Print (or write) the DOT graph of the recipes matching `patterns`
pub fn run(
    globals: &Globals,
    patterns: &[String],
    with_external: bool,
    output: Option<PathBuf>,
) -> Result<()> {
    let store = globals.recipe_store()?;
    let graph = RecipeGraph::from_store(&store)?;
    let selector = PackageSelector::new(patterns)?;
    let dot = graph.to_dot(&store, &selector, with_external)?;

    match output {
        Some(path) => {
            fs::write(&path, &dot).with_context(|| format!("Failed to write {}", path.display()))?;
            info!("Graph written to {}", path.display());
        }
        None => print!("{dot}"),
    }
    Ok(())
}
