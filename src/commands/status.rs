// SPDX-License-Identifier: AGPL-3.0-or-later
// SPDX-FileCopyrightText: 2025 Jonathan D.A. Jewell
//! Status command - shows the progress of a plan

use super::{print_json, Globals};
use crate::apply::plan_status;
use crate::state::BuildTree;
use crate::types::ActionStatus;
use anyhow::Result;
use owo_colors::{OwoColorize, Stream};
use std::path::Path;

/// Run the status command
pub fn run(globals: &Globals, directory: &Path) -> Result<()> {
    let tree = BuildTree::open(directory)?;
    let actions = plan_status(&tree)?;

    if globals.json {
        return print_json(&actions);
    }

    let total = actions.len();
    for (i, action) in actions.iter().enumerate() {
        let status = match action.status {
            Some(ActionStatus::Success) => "done".if_supports_color(Stream::Stdout, |t| t.green()).to_string(),
            Some(ActionStatus::Failed) => "failed".if_supports_color(Stream::Stdout, |t| t.red()).to_string(),
            None => "pending".to_string(),
        };
        println!("  [{}/{}] {:<8} {}", i + 1, total, status, action.kind.description());
        if let Some(applied_at) = action.applied_at {
            println!("            at {}", applied_at.to_rfc3339());
        }
        if let Some(error) = &action.error {
            println!("            {error}");
        }
    }

    let done = actions.iter().filter(|a| a.is_done()).count();
    println!();
    println!("{done}/{total} action(s) done");
    Ok(())
}
