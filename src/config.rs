// SPDX-License-Identifier: AGPL-3.0-or-later
// SPDX-FileCopyrightText: 2025 Jonathan D.A. Jewell
//! Configuration management
//!
//! Settings are layered: built-in defaults, then an optional TOML file, then
//! `SOMA_FORGE_*` environment variables.

use anyhow::{Context, Result};
use config::{Config, Environment, File, FileFormat};
use serde::{Deserialize, Deserializer, Serialize};
use std::path::{Path, PathBuf};

/// Prefix of the environment variables overriding settings
pub const ENV_PREFIX: &str = "SOMA_FORGE";

/// Application configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Directory holding the recipes
    pub recipes_dir: Option<PathBuf>,
    /// Environment definitions file
    pub environments_file: Option<PathBuf>,
    /// Packages named by the `selected` metapackage
    #[serde(deserialize_with = "string_or_list")]
    pub configured_packages: Vec<String>,
    /// Channels given to `pixi init` and `rattler-build`
    #[serde(deserialize_with = "string_or_list")]
    pub pixi_channels: Vec<String>,
    /// Python version used by `init` when none is given
    pub default_python: String,
    /// Log filter (trace, debug, info, warn, error); overrides -v/-q
    pub log_level: Option<String>,
}

/// Lists may be given as TOML arrays or as comma separated environment values
fn string_or_list<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<String>, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum StringOrList {
        String(String),
        List(Vec<String>),
    }

    Ok(match StringOrList::deserialize(d)? {
        StringOrList::String(s) => s
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect(),
        StringOrList::List(list) => list,
    })
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            recipes_dir: None,
            environments_file: None,
            configured_packages: Vec::new(),
            pixi_channels: vec![
                "https://brainvisa.info/neuro-forge".into(),
                "nvidia".into(),
                "pytorch".into(),
                "conda-forge".into(),
            ],
            default_python: "3.11".into(),
            log_level: None,
        }
    }
}

impl Settings {
    /// Recipe directory, `recipes` when not configured
    #[must_use]
    pub fn recipes_dir(&self) -> PathBuf {
        self.recipes_dir
            .clone()
            .unwrap_or_else(|| PathBuf::from("recipes"))
    }

    /// Environments file, `environments.yaml` next to the recipe directory
    /// when not configured
    #[must_use]
    pub fn environments_file(&self) -> PathBuf {
        self.environments_file.clone().unwrap_or_else(|| {
            let recipes = self.recipes_dir();
            recipes
                .parent()
                .map_or_else(PathBuf::new, Path::to_path_buf)
                .join("environments.yaml")
        })
    }
}

/// Default configuration file location
#[must_use]
pub fn default_config_file() -> Option<PathBuf> {
    directories::ProjectDirs::from("info", "brainvisa", "soma-forge")
        .map(|d| d.config_dir().join("config.toml"))
}

/// Load configuration from disk or use defaults
pub fn load(file: Option<&Path>) -> Result<Settings> {
    load_with_prefix(file, ENV_PREFIX)
}

fn load_with_prefix(file: Option<&Path>, prefix: &str) -> Result<Settings> {
    let mut builder = Config::builder()
        .add_source(Config::try_from(&Settings::default()).context("Failed to build default settings")?);

    // An explicit file must exist, the default one is optional
    match file {
        Some(path) => {
            builder = builder.add_source(File::from(path).format(FileFormat::Toml).required(true));
        }
        None => {
            if let Some(path) = default_config_file() {
                builder = builder.add_source(File::from(path).format(FileFormat::Toml).required(false));
            }
        }
    }

    builder = builder.add_source(Environment::with_prefix(prefix));

    let settings = builder
        .build()
        .context("Failed to load configuration")?
        .try_deserialize()
        .context("Invalid configuration")?;
    Ok(settings)
}
