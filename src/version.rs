// SPDX-License-Identifier: AGPL-3.0-or-later
// SPDX-FileCopyrightText: 2025 Jonathan D.A. Jewell
//! Component version detection
//!
//! A component source tree declares its version in one of three places,
//! checked in order: `pyproject.toml`, a Python `info.py` module, or a
//! `project_info.cmake` file.

use globset::{GlobBuilder, GlobSet, GlobSetBuilder};
use regex::Regex;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;
use walkdir::WalkDir;

/// Version detection failures
#[derive(Debug, Error)]
pub enum VersionError {
    /// No version file in the source tree
    #[error("cannot find a component version in {}", .0.display())]
    NotFound(PathBuf),

    /// Several `info.py` candidates
    #[error("cannot choose info.py among: {}", join_paths(.0))]
    Ambiguous(Vec<PathBuf>),

    /// A version file exists but does not define the full version
    #[error("incomplete version in {}: {reason}", .path.display())]
    Incomplete {
        /// File that was read
        path: PathBuf,
        /// What is missing
        reason: String,
    },

    /// A version file could not be read or parsed
    #[error("cannot read {}: {reason}", .path.display())]
    Unreadable {
        /// File that was read
        path: PathBuf,
        /// Underlying error message
        reason: String,
    },
}

fn join_paths(paths: &[PathBuf]) -> String {
    paths
        .iter()
        .map(|p| p.display().to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

fn read(path: &Path) -> Result<String, VersionError> {
    fs::read_to_string(path).map_err(|e| VersionError::Unreadable {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })
}

/// Version of the component whose sources are in `src`
pub fn component_version(src: &Path) -> Result<String, VersionError> {
    if !src.is_dir() {
        return Err(VersionError::NotFound(src.to_path_buf()));
    }
    let pyproject = src.join("pyproject.toml");
    if pyproject.is_file() {
        return pyproject_version(&pyproject);
    }

    let candidates = info_py_candidates(src)?;
    match candidates.len() {
        0 => {}
        1 => return info_py_version(&candidates[0]),
        _ => return Err(VersionError::Ambiguous(candidates)),
    }

    for cmake in [
        src.join("project_info.cmake"),
        src.join("cmake").join("project_info.cmake"),
    ] {
        if cmake.is_file() {
            return cmake_version(&cmake);
        }
    }

    Err(VersionError::NotFound(src.to_path_buf()))
}

fn pyproject_version(path: &Path) -> Result<String, VersionError> {
    let content = read(path)?;
    let document: toml::Table = content.parse().map_err(|e: toml::de::Error| VersionError::Unreadable {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })?;
    document
        .get("project")
        .and_then(|p| p.get("version"))
        .and_then(toml::Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| VersionError::Incomplete {
            path: path.to_path_buf(),
            reason: "no project.version".into(),
        })
}

fn info_py_patterns() -> GlobSet {
    let mut builder = GlobSetBuilder::new();
    for pattern in ["info.py", "*/info.py", "python/*/info.py"] {
        if let Ok(glob) = GlobBuilder::new(pattern).literal_separator(true).build() {
            builder.add(glob);
        }
    }
    builder.build().unwrap_or_else(|_| GlobSet::empty())
}

/// `info.py`, `*/info.py` and `python/*/info.py` under `src`, sorted
fn info_py_candidates(src: &Path) -> Result<Vec<PathBuf>, VersionError> {
    let patterns = info_py_patterns();
    let mut candidates = Vec::new();
    for entry in WalkDir::new(src).min_depth(1).max_depth(3) {
        let entry = entry.map_err(|e| VersionError::Unreadable {
            path: e.path().unwrap_or(src).to_path_buf(),
            reason: e.to_string(),
        })?;
        if entry.file_type().is_file()
            && entry.file_name() == "info.py"
            && entry
                .path()
                .strip_prefix(src)
                .is_ok_and(|relative| patterns.is_match(relative))
        {
            candidates.push(entry.into_path());
        }
    }
    candidates.sort();
    Ok(candidates)
}

fn info_py_version(path: &Path) -> Result<String, VersionError> {
    let content = read(path)?;
    let re = Regex::new(r"(?m)^\s*version_(major|minor|micro)\s*=\s*(\d+)")
        .map_err(|e| VersionError::Unreadable {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
    let mut parts: [Option<&str>; 3] = [None; 3];
    for capture in re.captures_iter(&content) {
        let slot = match &capture[1] {
            "major" => 0,
            "minor" => 1,
            _ => 2,
        };
        if let Some(value) = capture.get(2) {
            parts[slot] = Some(value.as_str());
        }
    }
    join_parts(path, parts, ["version_major", "version_minor", "version_micro"])
}

fn cmake_version(path: &Path) -> Result<String, VersionError> {
    let content = read(path)?;
    let re = Regex::new(r"(?m)^\s*set\(\s*BRAINVISA_PACKAGE_VERSION_(MAJOR|MINOR|PATCH)\s+(\S+?)\s*\)")
        .map_err(|e| VersionError::Unreadable {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
    let mut parts: [Option<&str>; 3] = [None; 3];
    for capture in re.captures_iter(&content) {
        let slot = match &capture[1] {
            "MAJOR" => 0,
            "MINOR" => 1,
            _ => 2,
        };
        if let Some(value) = capture.get(2) {
            parts[slot] = Some(value.as_str());
        }
    }
    join_parts(
        path,
        parts,
        [
            "BRAINVISA_PACKAGE_VERSION_MAJOR",
            "BRAINVISA_PACKAGE_VERSION_MINOR",
            "BRAINVISA_PACKAGE_VERSION_PATCH",
        ],
    )
}

fn join_parts(path: &Path, parts: [Option<&str>; 3], names: [&str; 3]) -> Result<String, VersionError> {
    let mut version = Vec::with_capacity(3);
    for (part, name) in parts.iter().zip(names) {
        match part {
            Some(value) => version.push(*value),
            None => {
                return Err(VersionError::Incomplete {
                    path: path.to_path_buf(),
                    reason: format!("{name} is not set"),
                })
            }
        }
    }
    Ok(version.join("."))
}
