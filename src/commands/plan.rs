// SPDX-License-Identifier: AGPL-3.0-or-later
// SPDX-FileCopyrightText: 2025 Jonathan D.A. Jewell
//! Plan command - computes and writes the packaging plan of a build tree

use super::{print_json, Globals};
use crate::plan::{self, BuildReason, Plan, PlanOptions};
use crate::runner::SystemRunner;
use crate::state::BuildTree;
use crate::vcs::Git;
use anyhow::Result;
use owo_colors::{OwoColorize, Stream};
use std::path::Path;

/// Run the plan command
pub fn run(globals: &Globals, directory: &Path, options: &PlanOptions) -> Result<()> {
    let tree = BuildTree::open(directory)?;
    let store = globals.recipe_store()?;
    let runner = SystemRunner;
    let git = Git::new(&runner);

    let plan = plan::generate(&tree, &store, &git, options)?;

    if globals.json {
        return print_json(&plan);
    }
    print_plan(&tree, &plan);
    Ok(())
}

fn print_plan(tree: &BuildTree, plan: &Plan) {
    println!("Packaging plan #{} for {}", plan.build_number, tree.root().display());
    println!("{}", "-".repeat(60));
    for package in &plan.packages {
        let reason = match &package.reason {
            BuildReason::SourceChanged => "sources changed".to_string(),
            BuildReason::Virtual => "virtual package".to_string(),
            BuildReason::DependencyRebuilt(dependency) => format!("{dependency} is rebuilt"),
            BuildReason::Unchanged => "unchanged".to_string(),
        };
        if package.is_selected() {
            println!(
                "  {} {} {} ({})",
                "build".if_supports_color(Stream::Stdout, |t| t.green()),
                package.name.if_supports_color(Stream::Stdout, |t| t.bold()),
                package.version,
                reason
            );
        } else {
            println!(
                "  {} {} {}",
                "skip ".if_supports_color(Stream::Stdout, |t| t.dimmed()),
                package.name,
                package.version
            );
        }
        for error in &package.source_errors {
            println!("        {}", error.if_supports_color(Stream::Stdout, |t| t.yellow()));
        }
    }

    println!();
    println!("{}", "=".repeat(60));
    let selected = plan.selected().count();
    if selected == 0 {
        println!("Nothing to build");
    } else {
        println!("{} package(s) to build, {} action(s)", selected, plan.actions.len());
        println!("Plan written to {}", tree.actions_file().display());
    }
}
