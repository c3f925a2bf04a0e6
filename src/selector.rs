// SPDX-License-Identifier: AGPL-3.0-or-later
// SPDX-FileCopyrightText: 2025 Jonathan D.A. Jewell
//! Package selection
//!
//! A selection is a list of tokens applied in order to a running set:
//!
//! - `all`: every recipe
//! - `selected`: the configured package list (`all` when nothing is configured)
//! - a package name or a shell glob (`soma-*`)
//! - any of the above prefixed with `-` to remove packages from the set
//!
//! The selected packages are then completed with their internal dependencies.

use crate::recipes::RecipeStore;
use globset::{Glob, GlobSet, GlobSetBuilder};
use std::collections::{BTreeSet, HashSet, VecDeque};
use thiserror::Error;
use tracing::warn;

/// Metapackage naming every recipe
pub const ALL: &str = "all";
/// Metapackage naming the configured package list
pub const SELECTED: &str = "selected";

/// Selection failures
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SelectionError {
    /// A literal token names no recipe
    #[error("unknown package: {0}")]
    UnknownPackage(String),

    /// A recipe depends on a package that has no recipe
    #[error("package {package} depends on unknown package {dependency}")]
    UnknownDependency {
        /// Package declaring the dependency
        package: String,
        /// Missing dependency
        dependency: String,
    },

    /// A glob pattern does not compile
    #[error("invalid pattern {pattern}: {reason}")]
    InvalidPattern {
        /// The pattern
        pattern: String,
        /// Parser message
        reason: String,
    },
}

fn is_glob(token: &str) -> bool {
    token.contains(['*', '?', '['])
}

fn compile(pattern: &str) -> Result<globset::GlobMatcher, SelectionError> {
    Glob::new(pattern)
        .map(|g| g.compile_matcher())
        .map_err(|e| SelectionError::InvalidPattern {
            pattern: pattern.to_string(),
            reason: e.to_string(),
        })
}

/// Packages named by one token (without its `-` prefix)
fn expand(
    store: &RecipeStore,
    token: &str,
    configured: &[String],
) -> Result<BTreeSet<String>, SelectionError> {
    match token {
        ALL => Ok(store.names().map(str::to_string).collect()),
        SELECTED if configured.is_empty() => expand(store, ALL, configured),
        SELECTED => {
            let mut packages = BTreeSet::new();
            for item in configured {
                // a metapackage in the configured list means every recipe
                if item == ALL || item == SELECTED {
                    packages.extend(store.names().map(str::to_string));
                } else {
                    packages.extend(expand(store, item, &[])?);
                }
            }
            Ok(packages)
        }
        _ if is_glob(token) => {
            let matcher = compile(token)?;
            let packages: BTreeSet<String> = store
                .names()
                .filter(|name| matcher.is_match(name))
                .map(str::to_string)
                .collect();
            if packages.is_empty() {
                warn!("Pattern {} matches no package", token);
            }
            Ok(packages)
        }
        _ if store.contains(token) => Ok(BTreeSet::from([token.to_string()])),
        _ => Err(SelectionError::UnknownPackage(token.to_string())),
    }
}

/// Apply selection tokens in order; an empty token list means `all`
pub fn resolve_tokens(
    store: &RecipeStore,
    tokens: &[String],
    configured: &[String],
) -> Result<BTreeSet<String>, SelectionError> {
    if tokens.is_empty() {
        return expand(store, ALL, configured);
    }
    let mut selection = BTreeSet::new();
    for token in tokens {
        let token = token.trim();
        if let Some(excluded) = token.strip_prefix('-') {
            for package in expand(store, excluded.trim(), configured)? {
                selection.remove(&package);
            }
        } else {
            selection.extend(expand(store, token, configured)?);
        }
    }
    Ok(selection)
}

/// Selected packages and their transitive internal dependencies.
///
/// Packages are returned in breadth-first discovery order starting from the
/// selection in name order.
pub fn select(
    store: &RecipeStore,
    tokens: &[String],
    configured: &[String],
) -> Result<Vec<String>, SelectionError> {
    let selection = resolve_tokens(store, tokens, configured)?;
    closure(store, selection)
}

/// Transitive closure of `roots` over internal dependencies
pub fn closure(
    store: &RecipeStore,
    roots: impl IntoIterator<Item = String>,
) -> Result<Vec<String>, SelectionError> {
    let mut queue: VecDeque<String> = roots.into_iter().collect();
    let mut done = HashSet::new();
    let mut ordered = Vec::new();

    while let Some(package) = queue.pop_front() {
        if !done.insert(package.clone()) {
            continue;
        }
        let recipe = store
            .get(&package)
            .ok_or_else(|| SelectionError::UnknownPackage(package.clone()))?;
        for dependency in recipe.internal_dependencies() {
            if !store.contains(dependency) {
                return Err(SelectionError::UnknownDependency {
                    package: package.clone(),
                    dependency: dependency.clone(),
                });
            }
            if !done.contains(dependency) {
                queue.push_back(dependency.clone());
            }
        }
        ordered.push(package);
    }
    Ok(ordered)
}

/// Shell patterns filtering packages by name
#[derive(Debug, Clone)]
pub struct PackageSelector {
    patterns: Vec<String>,
    set: Option<GlobSet>,
}

impl PackageSelector {
    /// Selector matching any of `patterns`, or every package when empty
    pub fn new(patterns: &[String]) -> Result<Self, SelectionError> {
        if patterns.is_empty() {
            return Ok(Self::all());
        }
        let mut builder = GlobSetBuilder::new();
        for pattern in patterns {
            let glob = Glob::new(pattern).map_err(|e| SelectionError::InvalidPattern {
                pattern: pattern.clone(),
                reason: e.to_string(),
            })?;
            builder.add(glob);
        }
        let set = builder.build().map_err(|e| SelectionError::InvalidPattern {
            pattern: patterns.join(" "),
            reason: e.to_string(),
        })?;
        Ok(Self {
            patterns: patterns.to_vec(),
            set: Some(set),
        })
    }

    /// Selector matching every package
    #[must_use]
    pub fn all() -> Self {
        Self {
            patterns: vec!["*".into()],
            set: None,
        }
    }

    /// True when `name` matches one of the patterns
    #[must_use]
    pub fn is_match(&self, name: &str) -> bool {
        self.set.as_ref().map_or(true, |set| set.is_match(name))
    }

    /// Patterns of this selector
    #[must_use]
    pub fn patterns(&self) -> &[String] {
        &self.patterns
    }
}
