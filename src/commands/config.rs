// SPDX-License-Identifier: AGPL-3.0-or-later
// SPDX-FileCopyrightText: 2025 Jonathan D.A. Jewell
//! Config command - shows the effective settings

use super::{print_json, Globals};
use crate::config::default_config_file;
use anyhow::{Context, Result};

/// Print the effective settings (`key` alone prints one value)
pub fn run(globals: &Globals, key: Option<&str>) -> Result<()> {
    let settings = serde_json::to_value(&globals.settings).context("Failed to serialize settings")?;

    if let Some(key) = key {
        let value = settings
            .get(key)
            .with_context(|| format!("Unknown setting {key}"))?;
        return match value {
            serde_json::Value::String(s) if !globals.json => {
                println!("{s}");
                Ok(())
            }
            _ => print_json(value),
        };
    }

    if globals.json {
        return print_json(&settings);
    }

    if let Some(file) = default_config_file() {
        println!("# default file: {}", file.display());
    }
    println!("recipes_dir = {}", globals.settings.recipes_dir().display());
    println!("environments_file = {}", globals.settings.environments_file().display());
    println!("configured_packages = [{}]", globals.settings.configured_packages.join(", "));
    println!("pixi_channels = [{}]", globals.settings.pixi_channels.join(", "));
    println!("default_python = {}", globals.settings.default_python);
    if let Some(level) = &globals.settings.log_level {
        println!("log_level = {level}");
    }
    Ok(())
}
