// SPDX-License-Identifier: AGPL-3.0-or-later
// SPDX-FileCopyrightText: 2025 Jonathan D.A. Jewell
//! Init command - creates or reconfigures a build tree

use super::{print_json, Globals};
use crate::init::{InitOptions, Initializer};
use crate::runner::SystemRunner;
use crate::types::BuildInfo;
use crate::vcs::Git;
use anyhow::Result;

/// Run the init command
pub fn run(globals: &Globals, options: &InitOptions) -> Result<()> {
    let store = globals.recipe_store()?;
    let environments = globals.environments()?;
    let runner = SystemRunner;
    let git = Git::new(&runner);

    let tree = Initializer::new(&globals.settings, &store, &environments, &runner, &git).run(options)?;
    let build_info = BuildInfo::load(&tree.build_info_file())?;

    if globals.json {
        return print_json(&build_info);
    }

    println!("Build tree: {}", tree.root().display());
    println!("Environment: {}", build_info.environment);
    println!("Python: {}", build_info.options.python);
    println!("Packages ({}):", build_info.all_packages.len());
    for (name, summary) in &build_info.all_packages {
        println!("  {} [{}]", name, summary.kind);
    }
    println!();
    println!(
        "Next: pixi run --manifest-path {} bv_maker",
        tree.pixi_manifest().display()
    );
    Ok(())
}
