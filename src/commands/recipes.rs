// SPDX-License-Identifier: AGPL-3.0-or-later
// SPDX-FileCopyrightText: 2025 Jonathan D.A. Jewell
//! Recipes command - lists selected recipes in build order

use super::{print_json, Globals};
use crate::graph::RecipeGraph;
use crate::selector;
use crate::types::PackageType;
use anyhow::Result;
use owo_colors::{OwoColorize, Stream};
use serde::Serialize;

#[derive(Serialize)]
struct RecipeRow<'a> {
    name: &'a str,
    #[serde(rename = "type")]
    kind: PackageType,
    version: Option<&'a str>,
    #[serde(rename = "internal-dependencies")]
    internal_dependencies: &'a [String],
    components: &'a [String],
}

/// Run the recipes command
pub fn run(globals: &Globals, tokens: &[String]) -> Result<()> {
    let store = globals.recipe_store()?;
    let selection = selector::select(&store, tokens, &globals.settings.configured_packages)?;
    let graph = RecipeGraph::from_packages(&store, selection.iter().map(String::as_str))?;
    let order = graph.sorted()?;

    let mut rows = Vec::with_capacity(order.len());
    for name in &order {
        let recipe = store.read(name)?;
        rows.push(RecipeRow {
            name,
            kind: recipe.package_type(),
            version: recipe.package.version.as_deref(),
            internal_dependencies: recipe.internal_dependencies(),
            components: recipe.components(),
        });
    }

    if globals.json {
        return print_json(&rows);
    }

    for row in &rows {
        println!(
            "{} [{}]",
            row.name.if_supports_color(Stream::Stdout, |t| t.bold()),
            row.kind
        );
        if !row.internal_dependencies.is_empty() {
            println!("    depends on: {}", row.internal_dependencies.join(", "));
        }
        if !row.components.is_empty() {
            println!("    components: {}", row.components.join(", "));
        }
    }
    println!();
    println!("{} recipe(s) selected out of {}", rows.len(), store.len());
    Ok(())
}
