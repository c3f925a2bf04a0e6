// SPDX-License-Identifier: AGPL-3.0-or-later
// SPDX-FileCopyrightText: 2025 Jonathan D.A. Jewell
//! Build environments
//!
//! An environment names a consistent set of component branches and build
//! dependencies. Environments may inherit from a `base` environment; the
//! child's keys override the base's, recursively for mappings.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_yaml::{Mapping, Value};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use thiserror::Error;

/// Environment resolution failures
#[derive(Debug, Error, PartialEq, Eq)]
pub enum EnvironmentError {
    /// No environment of that name
    #[error("{name} is not a valid environment, possible values are: {}", .known.join(", "))]
    Unknown {
        /// Requested name
        name: String,
        /// Defined environments
        known: Vec<String>,
    },

    /// `base` chain loops back on itself
    #[error("environment inheritance cycle: {}", .0.join(" -> "))]
    InheritanceCycle(Vec<String>),

    /// Environment definition does not have the expected shape
    #[error("invalid definition of environment {name}: {reason}")]
    Invalid {
        /// Environment name
        name: String,
        /// Parser message
        reason: String,
    },

    /// Component not declared in the environment
    #[error("cannot find source for component {component} in environment {environment}")]
    UnknownComponent {
        /// Component name
        component: String,
        /// Environment name
        environment: String,
    },

    /// Neither the component nor the environment defines a branch
    #[error("no branch defined for component {component} in environment {environment}")]
    NoBranch {
        /// Component name
        component: String,
        /// Environment name
        environment: String,
    },
}

/// Git location of a component
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComponentSource {
    /// Repository URL
    pub url: String,
    /// Branch forced for this component
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub branch: Option<String>,
    /// Branch used when neither the component nor the environment forces one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_branch: Option<String>,
}

/// A resolved environment (inheritance applied)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Environment {
    /// Environment name
    #[serde(skip)]
    pub name: String,
    /// Branch forced for every component
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub branch: Option<String>,
    /// Fallback branch for every component
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_branch: Option<String>,
    /// Package selection used by `init` when none is given
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub default_packages: Vec<String>,
    /// Extra dependencies of the build environment, with optional constraint
    #[serde(rename = "build-dependencies", default)]
    pub build_dependencies: BTreeMap<String, Option<String>>,
    /// Component sources
    #[serde(default)]
    pub components: BTreeMap<String, ComponentSource>,
}

impl Environment {
    /// Git URL and branch of a component in this environment.
    ///
    /// Branch precedence: component `branch`, environment `branch`,
    /// component `default_branch`, environment `default_branch`.
    pub fn component_source(&self, component: &str) -> Result<(String, String), EnvironmentError> {
        let source = self
            .components
            .get(component)
            .ok_or_else(|| EnvironmentError::UnknownComponent {
                component: component.to_string(),
                environment: self.name.clone(),
            })?;
        let branch = source
            .branch
            .as_ref()
            .or(self.branch.as_ref())
            .or(source.default_branch.as_ref())
            .or(self.default_branch.as_ref())
            .ok_or_else(|| EnvironmentError::NoBranch {
                component: component.to_string(),
                environment: self.name.clone(),
            })?;
        Ok((source.url.clone(), branch.clone()))
    }
}

/// All environment definitions of an `environments.yaml` file
#[derive(Debug, Clone, Default)]
pub struct Environments {
    definitions: BTreeMap<String, Value>,
}

/// Mapping keys such as `6.0` are YAML numbers; environments are named by text
fn key_to_string(key: &Value) -> Option<String> {
    match key {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

/// Numbers become strings, so versions and constraints written without
/// quotes deserialize as text
fn stringify_scalars(value: Value) -> Value {
    match value {
        Value::Mapping(mapping) => Value::Mapping(
            mapping
                .into_iter()
                .map(|(k, v)| {
                    let key = key_to_string(&k).map_or(k, Value::String);
                    (key, stringify_scalars(v))
                })
                .collect(),
        ),
        Value::Sequence(items) => Value::Sequence(items.into_iter().map(stringify_scalars).collect()),
        Value::Number(n) => Value::String(n.to_string()),
        other => other,
    }
}

/// Recursive merge: mappings are merged key by key, anything else in
/// `overlay` replaces `base`
fn merge(base: Value, overlay: Value) -> Value {
    match (base, overlay) {
        (Value::Mapping(mut base), Value::Mapping(overlay)) => {
            for (key, value) in overlay {
                let merged = match base.remove(&key) {
                    Some(existing) => merge(existing, value),
                    None => value,
                };
                base.insert(key, merged);
            }
            Value::Mapping(base)
        }
        (_, overlay) => overlay,
    }
}

impl Environments {
    /// Load an `environments.yaml` file
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        Self::parse(&content).with_context(|| format!("Failed to parse {}", path.display()))
    }

    /// Parse environment definitions from YAML text
    pub fn parse(content: &str) -> Result<Self> {
        let root: Mapping = serde_yaml::from_str(content)?;
        let definitions = root
            .into_iter()
            .filter_map(|(k, v)| key_to_string(&k).map(|name| (name, v)))
            .collect();
        Ok(Self { definitions })
    }

    /// Names of all environments
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.definitions.keys().map(String::as_str)
    }

    /// Environment with its `base` chain merged in
    pub fn resolve(&self, name: &str) -> Result<Environment, EnvironmentError> {
        let mut chain = Vec::new();
        let value = self.resolve_value(name, &mut chain)?;
        let mut environment: Environment =
            serde_yaml::from_value(stringify_scalars(value)).map_err(|e| EnvironmentError::Invalid {
                name: name.to_string(),
                reason: e.to_string(),
            })?;
        environment.name = name.to_string();
        Ok(environment)
    }

    fn resolve_value(&self, name: &str, chain: &mut Vec<String>) -> Result<Value, EnvironmentError> {
        if chain.iter().any(|n| n == name) {
            chain.push(name.to_string());
            return Err(EnvironmentError::InheritanceCycle(chain.clone()));
        }
        chain.push(name.to_string());

        let definition = self
            .definitions
            .get(name)
            .ok_or_else(|| EnvironmentError::Unknown {
                name: name.to_string(),
                known: self.definitions.keys().cloned().collect(),
            })?
            .clone();
        let Value::Mapping(mut mapping) = definition else {
            return Err(EnvironmentError::Invalid {
                name: name.to_string(),
                reason: "expected a mapping".into(),
            });
        };

        match mapping.remove("base").as_ref().and_then(key_to_string) {
            Some(base) => {
                let base = self.resolve_value(&base, chain)?;
                Ok(merge(base, Value::Mapping(mapping)))
            }
            None => Ok(Value::Mapping(mapping)),
        }
    }
}
