// SPDX-License-Identifier: AGPL-3.0-or-later
// SPDX-FileCopyrightText: 2025 Jonathan D.A. Jewell
//! Build tree state files
//!
//! A build tree is a directory initialised by `soma-forge init`. It holds the
//! build configuration in `conf/`, the sources in `src/` and everything the
//! planner produces in `plan/`. All writes go through a temporary file in the
//! target directory followed by a rename, so an interrupted run never leaves a
//! truncated state file behind.

use crate::types::{BuildInfo, History, PlanAction, StepInfo};
use anyhow::{Context, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::cmp::Ordering;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use thiserror::Error;

/// Source build steps, in the order they must have run
pub const BUILD_STEPS: [&str; 3] = ["configure", "build", "doc"];

/// Paths of the files making up a build tree
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildTree {
    root: PathBuf,
}

impl BuildTree {
    /// Build tree rooted at `root`
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Build tree rooted at `root` made absolute
    pub fn open(root: &Path) -> Result<Self> {
        if root.is_absolute() {
            return Ok(Self::new(root));
        }
        let cwd = std::env::current_dir().context("Failed to get current directory")?;
        Ok(Self::new(cwd.join(root)))
    }

    /// Root directory (also the pixi project directory)
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// `conf/`
    #[must_use]
    pub fn conf_dir(&self) -> PathBuf {
        self.root.join("conf")
    }

    /// `conf/build_info.json`
    #[must_use]
    pub fn build_info_file(&self) -> PathBuf {
        self.conf_dir().join("build_info.json")
    }

    /// `src/`
    #[must_use]
    pub fn src_dir(&self) -> PathBuf {
        self.root.join("src")
    }

    /// `build/`
    #[must_use]
    pub fn build_dir(&self) -> PathBuf {
        self.root.join("build")
    }

    /// `pixi.toml`
    #[must_use]
    pub fn pixi_manifest(&self) -> PathBuf {
        self.root.join("pixi.toml")
    }

    /// `plan/`
    #[must_use]
    pub fn plan_dir(&self) -> PathBuf {
        self.root.join("plan")
    }

    /// `plan/history.json`
    #[must_use]
    pub fn history_file(&self) -> PathBuf {
        self.plan_dir().join("history.json")
    }

    /// `plan/actions.yaml`
    #[must_use]
    pub fn actions_file(&self) -> PathBuf {
        self.plan_dir().join("actions.yaml")
    }

    /// `plan/recipes/<package>/`
    #[must_use]
    pub fn recipe_dir(&self, package: &str) -> PathBuf {
        self.plan_dir().join("recipes").join(package)
    }

    /// `plan/packages/`
    #[must_use]
    pub fn packages_dir(&self) -> PathBuf {
        self.plan_dir().join("packages")
    }
}

// =============================================================================
// File helpers
// =============================================================================

/// Write `contents` to `path` atomically, creating parent directories
pub fn write_atomic(path: &Path, contents: &[u8]) -> Result<()> {
    let dir = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    fs::create_dir_all(dir)
        .with_context(|| format!("Failed to create directory {}", dir.display()))?;

    let mut tmp = NamedTempFile::new_in(dir)
        .with_context(|| format!("Failed to create temporary file in {}", dir.display()))?;
    tmp.write_all(contents)
        .with_context(|| format!("Failed to write {}", path.display()))?;
    tmp.as_file()
        .sync_all()
        .with_context(|| format!("Failed to sync {}", path.display()))?;
    tmp.persist(path)
        .map_err(|e| e.error)
        .with_context(|| format!("Failed to write {}", path.display()))?;
    Ok(())
}

/// Read and parse a JSON file
pub fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    serde_json::from_str(&content).with_context(|| format!("Failed to parse {}", path.display()))
}

/// Serialize to pretty JSON and write atomically
pub fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let mut json = serde_json::to_string_pretty(value)
        .with_context(|| format!("Failed to serialize {}", path.display()))?;
    json.push('\n');
    write_atomic(path, json.as_bytes())
}

/// Read and parse a YAML file
pub fn read_yaml<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    serde_yaml::from_str(&content).with_context(|| format!("Failed to parse {}", path.display()))
}

/// Serialize to YAML and write atomically
pub fn write_yaml<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let yaml = serde_yaml::to_string(value)
        .with_context(|| format!("Failed to serialize {}", path.display()))?;
    write_atomic(path, yaml.as_bytes())
}

// =============================================================================
// Build info
// =============================================================================

/// Source build steps not completed in the expected order
#[derive(Debug, Error, PartialEq, Eq)]
pub enum BuildStatusError {
    /// No information recorded for a step
    #[error("no {0} step information in build info")]
    MissingStep(String),

    /// Step did not succeed
    #[error("{step} step not successful: {status}")]
    NotSucceeded {
        /// Step name
        step: String,
        /// Recorded status
        status: String,
    },

    /// A step has no start or stop time
    #[error("{step} step has no {field} time")]
    MissingTime {
        /// Step name
        step: String,
        /// `start` or `stop`
        field: &'static str,
    },

    /// A step started before the previous one ended
    #[error("{step} step started before the end of {previous}")]
    OutOfOrder {
        /// Step name
        step: String,
        /// Step that should have completed first
        previous: String,
    },
}

impl BuildInfo {
    /// Load `conf/build_info.json`
    pub fn load(path: &Path) -> Result<Self> {
        read_json(path)
    }

    /// Save `conf/build_info.json`
    pub fn save(&self, path: &Path) -> Result<()> {
        write_json(path, self)
    }

    /// Check that `configure`, `build` and `doc` all succeeded, in that order
    pub fn check_steps(&self) -> Result<(), BuildStatusError> {
        let mut previous: Option<(&str, &StepInfo)> = None;
        for name in BUILD_STEPS {
            let step = self
                .steps
                .get(name)
                .ok_or_else(|| BuildStatusError::MissingStep(name.to_string()))?;
            if step.status != "succeeded" {
                return Err(BuildStatusError::NotSucceeded {
                    step: name.to_string(),
                    status: step.status.clone(),
                });
            }
            if let Some((previous_name, previous_step)) = previous {
                let start = step.start.as_ref().ok_or_else(|| BuildStatusError::MissingTime {
                    step: name.to_string(),
                    field: "start",
                })?;
                let stop = previous_step.stop.as_ref().ok_or_else(|| BuildStatusError::MissingTime {
                    step: previous_name.to_string(),
                    field: "stop",
                })?;
                if start.compare(stop) != Ordering::Greater {
                    return Err(BuildStatusError::OutOfOrder {
                        step: name.to_string(),
                        previous: previous_name.to_string(),
                    });
                }
            }
            previous = Some((name, step));
        }
        Ok(())
    }
}

impl History {
    /// Load `plan/history.json`; a missing file is an empty history
    pub fn load(path: &Path) -> Result<Self> {
        if path.exists() {
            read_json(path)
        } else {
            Ok(Self::default())
        }
    }

    /// Save `plan/history.json`
    pub fn save(&self, path: &Path) -> Result<()> {
        write_json(path, self)
    }
}

/// Load `plan/actions.yaml`
pub fn load_actions(path: &Path) -> Result<Vec<PlanAction>> {
    read_yaml(path)
}

/// Save `plan/actions.yaml`
pub fn save_actions(path: &Path, actions: &[PlanAction]) -> Result<()> {
    write_yaml(path, &actions)
}
