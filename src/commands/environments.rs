// SPDX-License-Identifier: AGPL-3.0-or-later
// SPDX-FileCopyrightText: 2025 Jonathan D.A. Jewell
//! Environments command - lists environments or shows a resolved one

use super::{print_json, Globals};
use anyhow::Result;

/// Run the environments command
pub fn run(globals: &Globals, name: Option<&str>) -> Result<()> {
    let environments = globals.environments()?;

    let Some(name) = name else {
        let names: Vec<&str> = environments.names().collect();
        if globals.json {
            return print_json(&names);
        }
        for name in names {
            println!("{name}");
        }
        return Ok(());
    };

    let environment = environments.resolve(name)?;
    if globals.json {
        return print_json(&environment);
    }

    println!("Environment {}", environment.name);
    if let Some(branch) = &environment.branch {
        println!("  branch: {branch}");
    }
    if let Some(branch) = &environment.default_branch {
        println!("  default branch: {branch}");
    }
    if !environment.default_packages.is_empty() {
        println!("  default packages: {}", environment.default_packages.join(", "));
    }
    if !environment.build_dependencies.is_empty() {
        println!("  build dependencies:");
        for (package, constraint) in &environment.build_dependencies {
            println!("    {} {}", package, constraint.as_deref().unwrap_or("*"));
        }
    }
    println!("  components:");
    for component in environment.components.keys() {
        match environment.component_source(component) {
            Ok((url, branch)) => println!("    {component} {url} {branch}"),
            Err(e) => println!("    {component} ({e})"),
        }
    }
    Ok(())
}
