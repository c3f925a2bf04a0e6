// SPDX-License-Identifier: AGPL-3.0-or-later
// SPDX-FileCopyrightText: 2025 Jonathan D.A. Jewell
//! Check-build command - verifies the source build steps of a build tree

use super::{print_json, Globals};
use crate::state::BuildTree;
use crate::types::BuildInfo;
use anyhow::Result;
use serde_json::json;
use std::path::Path;

/// Run the check-build command
pub fn run(globals: &Globals, directory: &Path) -> Result<()> {
    let tree = BuildTree::open(directory)?;
    let build_info = BuildInfo::load(&tree.build_info_file())?;
    let result = build_info.check_steps();

    if globals.json {
        print_json(&json!({
            "ok": result.is_ok(),
            "error": result.as_ref().err().map(ToString::to_string),
            "steps": build_info.steps,
        }))?;
    } else if result.is_ok() {
        println!("Source build of {} is complete", tree.root().display());
    }
    result?;
    Ok(())
}
