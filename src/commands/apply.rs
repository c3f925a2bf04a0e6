// SPDX-License-Identifier: AGPL-3.0-or-later
// SPDX-FileCopyrightText: 2025 Jonathan D.A. Jewell
//! Apply command - replays the plan of a build tree

use super::{print_json, Globals};
use crate::apply::{self, ActionContext, ApplyOptions};
use crate::runner::SystemRunner;
use crate::state::BuildTree;
use crate::vcs::Git;
use anyhow::Result;
use std::path::Path;

/// Run the apply command
pub fn run(globals: &Globals, directory: &Path, options: ApplyOptions) -> Result<()> {
    let tree = BuildTree::open(directory)?;
    let runner = SystemRunner;
    let git = Git::new(&runner);
    let ctx = ActionContext {
        tree: &tree,
        runner: &runner,
        vcs: &git,
    };

    let report = apply::apply_plan(&ctx, options)?;

    if globals.json {
        return print_json(&report);
    }

    if options.dry_run {
        println!("Dry-run: actions that would be applied in {}", tree.root().display());
        println!();
        if report.pending.is_empty() {
            println!("  nothing to do");
        }
        for (i, description) in report.pending.iter().enumerate() {
            println!("  {}. {}", i + 1, description);
        }
        if report.skipped > 0 {
            println!();
            println!("{} action(s) already done", report.skipped);
        }
        return Ok(());
    }

    println!();
    println!("{}", "=".repeat(60));
    println!(
        "Plan applied: {} action(s) executed, {} already done",
        report.executed, report.skipped
    );
    Ok(())
}
