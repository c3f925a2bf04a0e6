// SPDX-License-Identifier: AGPL-3.0-or-later
// SPDX-FileCopyrightText: 2025 Jonathan D.A. Jewell
//
//! soma-forge library - build planning for a conda package channel
//!
//! This crate reads declarative package recipes, resolves their internal
//! dependency graph, decides which packages must be rebuilt from source
//! changesets and release history, and writes an ordered action plan that is
//! replayed with per-action success tracking.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod apply;
pub mod commands;
pub mod config;
pub mod environments;
pub mod graph;
pub mod init;
pub mod plan;
pub mod publish;
pub mod recipes;
pub mod runner;
pub mod selector;
pub mod state;
pub mod vcs;
pub mod version;

/// Core data types shared by recipes, state files and plans
pub mod types {
    use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
    use serde::de::Error as _;
    use serde::{Deserialize, Deserializer, Serialize};
    use std::cmp::Ordering;
    use std::collections::BTreeMap;
    use std::fmt;
    use std::path::PathBuf;

    // =========================================================================
    // Package Types
    // =========================================================================

    /// How a package is produced from the build tree
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
    #[serde(rename_all = "lowercase")]
    pub enum PackageType {
        /// Native code installed from the compiled build tree
        Compiled,
        /// Pure Python (or other interpreted) code installed from the build tree
        Interpreted,
        /// Metapackage with no content of its own
        Virtual,
    }

    impl PackageType {
        /// Lowercase name as written in recipes
        #[must_use]
        pub fn as_str(&self) -> &'static str {
            match self {
                Self::Compiled => "compiled",
                Self::Interpreted => "interpreted",
                Self::Virtual => "virtual",
            }
        }

        /// Graphviz fill colour used by the DOT export
        #[must_use]
        pub fn dot_color(&self) -> &'static str {
            match self {
                Self::Compiled => "aquamarine",
                Self::Interpreted => "bisque",
                Self::Virtual => "darkolivegreen2",
            }
        }
    }

    impl fmt::Display for PackageType {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.write_str(self.as_str())
        }
    }

    // =========================================================================
    // Recipes
    // =========================================================================

    /// Accept a YAML scalar (string or number) as a string.
    ///
    /// Versions such as `6.0` are plain YAML floats unless quoted.
    fn scalar_string<'de, D: Deserializer<'de>>(d: D) -> Result<Option<String>, D::Error> {
        match Option::<serde_yaml::Value>::deserialize(d)? {
            None | Some(serde_yaml::Value::Null) => Ok(None),
            Some(serde_yaml::Value::String(s)) => Ok(Some(s)),
            Some(serde_yaml::Value::Number(n)) => Ok(Some(n.to_string())),
            Some(other) => Err(D::Error::custom(format!(
                "expected a string or a number, found {other:?}"
            ))),
        }
    }

    /// `package` section of a recipe
    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    pub struct PackageSection {
        /// Package name
        pub name: String,
        /// Package version (computed at planning time for built packages)
        #[serde(default, deserialize_with = "scalar_string", skip_serializing_if = "Option::is_none")]
        pub version: Option<String>,
        /// Keys this tool does not interpret
        #[serde(flatten)]
        pub extra: BTreeMap<String, serde_yaml::Value>,
    }

    /// `build` section of a recipe
    #[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
    pub struct BuildSection {
        /// Build number
        #[serde(default, skip_serializing_if = "Option::is_none")]
        pub number: Option<u64>,
        /// Build string
        #[serde(default, skip_serializing_if = "Option::is_none")]
        pub string: Option<String>,
        /// Build script (string or list of lines)
        #[serde(default, skip_serializing_if = "Option::is_none")]
        pub script: Option<serde_yaml::Value>,
        /// Keys this tool does not interpret
        #[serde(flatten)]
        pub extra: BTreeMap<String, serde_yaml::Value>,
    }

    /// `requirements` section of a recipe
    #[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
    pub struct Requirements {
        /// Build requirements
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        pub build: Vec<serde_yaml::Value>,
        /// Host requirements
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        pub host: Vec<serde_yaml::Value>,
        /// Run requirements
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        pub run: Vec<serde_yaml::Value>,
        /// Keys this tool does not interpret
        #[serde(flatten)]
        pub extra: BTreeMap<String, serde_yaml::Value>,
    }

    impl Requirements {
        /// True when no requirement of any kind is declared
        #[must_use]
        pub fn is_empty(&self) -> bool {
            self.build.is_empty() && self.host.is_empty() && self.run.is_empty() && self.extra.is_empty()
        }

        /// Plain string build requirements (conditional entries are skipped)
        pub fn build_specs(&self) -> impl Iterator<Item = &str> {
            self.build.iter().filter_map(serde_yaml::Value::as_str)
        }

        /// Plain string run requirements (conditional entries are skipped)
        pub fn run_specs(&self) -> impl Iterator<Item = &str> {
            self.run.iter().filter_map(serde_yaml::Value::as_str)
        }
    }

    /// Package name and version constraint of a requirement
    ///
    /// The name ends at the first blank or version operator:
    /// `numpy >=1.20` and `numpy>=1.20` both give `numpy`, `>=1.20`.
    #[must_use]
    pub fn split_requirement(requirement: &str) -> Option<(&str, Option<&str>)> {
        let requirement = requirement.trim();
        let end = requirement
            .find(|c: char| c.is_whitespace() || matches!(c, '=' | '<' | '>' | '!' | '~'))
            .unwrap_or(requirement.len());
        let (name, constraint) = requirement.split_at(end);
        if name.is_empty() {
            return None;
        }
        let constraint = Some(constraint.trim()).filter(|c| !c.is_empty());
        Some((name, constraint))
    }

    /// `soma-forge` section of a recipe, removed from rendered recipes
    #[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
    pub struct ForgeSection {
        /// Explicit package type; inferred when absent
        #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
        pub kind: Option<PackageType>,
        /// Names of other recipes this package depends on
        #[serde(rename = "internal-dependencies", default, skip_serializing_if = "Vec::is_empty")]
        pub internal_dependencies: Vec<String>,
        /// Source components (directories under `src/`) installed by this package
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        pub components: Vec<String>,
    }

    impl ForgeSection {
        /// True when the section carries no information
        #[must_use]
        pub fn is_empty(&self) -> bool {
            self.kind.is_none() && self.internal_dependencies.is_empty() && self.components.is_empty()
        }
    }

    /// A package recipe
    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    pub struct Recipe {
        /// Package name and version
        pub package: PackageSection,
        /// Build section
        #[serde(default, skip_serializing_if = "Option::is_none")]
        pub build: Option<BuildSection>,
        /// Requirements section
        #[serde(default, skip_serializing_if = "Requirements::is_empty")]
        pub requirements: Requirements,
        /// Forge metadata
        #[serde(rename = "soma-forge", default, skip_serializing_if = "ForgeSection::is_empty")]
        pub forge: ForgeSection,
        /// Other sections (about, source, tests, context, ...)
        #[serde(flatten)]
        pub extra: BTreeMap<String, serde_yaml::Value>,
    }

    impl Recipe {
        /// Package name
        #[must_use]
        pub fn name(&self) -> &str {
            &self.package.name
        }

        /// Declared package type, or the type inferred from the recipe content
        #[must_use]
        pub fn package_type(&self) -> PackageType {
            if let Some(kind) = self.forge.kind {
                return kind;
            }
            if self.forge.components.is_empty() {
                PackageType::Virtual
            } else if self
                .requirements
                .build_specs()
                .any(|r| r.starts_with("${{") && r.contains("compiler"))
            {
                PackageType::Compiled
            } else {
                PackageType::Interpreted
            }
        }

        /// Internal dependencies
        #[must_use]
        pub fn internal_dependencies(&self) -> &[String] {
            &self.forge.internal_dependencies
        }

        /// Source components
        #[must_use]
        pub fn components(&self) -> &[String] {
            &self.forge.components
        }

        /// Mutable build section, created on demand
        pub fn build_mut(&mut self) -> &mut BuildSection {
            self.build.get_or_insert_with(BuildSection::default)
        }
    }

    // =========================================================================
    // Build Tree State
    // =========================================================================

    /// Build options chosen at init time
    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    pub struct BuildOptions {
        /// Python version (`3.11`)
        pub python: String,
        /// Other options (qt, capsul, ...)
        #[serde(flatten)]
        pub extra: BTreeMap<String, serde_json::Value>,
    }

    impl Default for BuildOptions {
        fn default() -> Self {
            Self {
                python: "3.11".into(),
                extra: BTreeMap::new(),
            }
        }
    }

    /// Entry of `all_packages` in the build info
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
    pub struct PackageSummary {
        /// Package type
        #[serde(rename = "type")]
        pub kind: PackageType,
    }

    /// Time stamp of a source build step, kept as written by `bv_maker`
    ///
    /// RFC 3339 and naive ISO 8601 values (read as UTC) compare as instants,
    /// anything else compares as text.
    #[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
    #[serde(transparent)]
    pub struct StepTime(pub String);

    impl StepTime {
        /// Parsed instant, when the text is a known date format
        #[must_use]
        pub fn instant(&self) -> Option<DateTime<Utc>> {
            let text = self.0.trim();
            if let Ok(time) = DateTime::parse_from_rfc3339(text) {
                return Some(time.with_timezone(&Utc));
            }
            ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"]
                .iter()
                .find_map(|format| NaiveDateTime::parse_from_str(text, format).ok())
                .map(|naive| Utc.from_utc_datetime(&naive))
        }

        /// Chronological order when both sides parse, text order otherwise
        #[must_use]
        pub fn compare(&self, other: &Self) -> Ordering {
            match (self.instant(), other.instant()) {
                (Some(a), Some(b)) => a.cmp(&b),
                _ => self.0.cmp(&other.0),
            }
        }
    }

    impl From<DateTime<Utc>> for StepTime {
        fn from(time: DateTime<Utc>) -> Self {
            Self(time.to_rfc3339())
        }
    }

    /// One step of the source build (`configure`, `build`, `doc`)
    #[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
    pub struct StepInfo {
        /// Step status, `succeeded` when the step completed
        pub status: String,
        /// When the step started
        #[serde(default)]
        pub start: Option<StepTime>,
        /// When the step stopped
        #[serde(default)]
        pub stop: Option<StepTime>,
    }

    /// Content of `conf/build_info.json`
    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    pub struct BuildInfo {
        /// Environment the build tree was initialised for
        pub environment: String,
        /// Package selection given at init time
        #[serde(default)]
        pub packages: Vec<String>,
        /// Build options
        #[serde(default)]
        pub options: BuildOptions,
        /// Build string prefix (`py311`)
        #[serde(default)]
        pub build_string: String,
        /// Last build number handed out by the planner
        #[serde(default)]
        pub build_number: u64,
        /// Every package present in the build tree
        #[serde(default)]
        pub all_packages: BTreeMap<String, PackageSummary>,
        /// Source build steps
        #[serde(rename = "brainvisa-cmake", default, skip_serializing_if = "BTreeMap::is_empty")]
        pub steps: BTreeMap<String, StepInfo>,
        /// Keys this tool does not interpret
        #[serde(flatten)]
        pub extra: BTreeMap<String, serde_json::Value>,
    }

    /// Component name to commit hash
    pub type Changesets = BTreeMap<String, String>;

    /// Last build or release of one package
    #[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
    pub struct HistoryEntry {
        /// Released version
        #[serde(default, skip_serializing_if = "Option::is_none")]
        pub version: Option<String>,
        /// Released build string
        #[serde(default, skip_serializing_if = "Option::is_none")]
        pub build_string: Option<String>,
        /// Source changesets the package was built from
        #[serde(default, skip_serializing_if = "Option::is_none")]
        pub changesets: Option<Changesets>,
    }

    /// Package build and release history
    #[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
    #[serde(transparent)]
    pub struct History(pub BTreeMap<String, HistoryEntry>);

    impl History {
        /// History of one package
        #[must_use]
        pub fn get(&self, package: &str) -> Option<&HistoryEntry> {
            self.0.get(package)
        }

        /// Record a build of a package
        pub fn record(&mut self, package: &str, version: &str, build_string: &str, changesets: &Changesets) {
            let entry = self.0.entry(package.to_string()).or_default();
            entry.version = Some(version.to_string());
            entry.build_string = Some(build_string.to_string());
            if !changesets.is_empty() {
                entry.changesets = Some(changesets.clone());
            }
        }
    }

    // =========================================================================
    // Plans
    // =========================================================================

    fn default_true() -> bool {
        true
    }

    /// One operation of a plan
    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    #[serde(tag = "action", rename_all = "snake_case")]
    pub enum ActionKind {
        /// Build a package from its rendered recipe
        CreatePackage {
            /// Package name
            package: String,
            /// Run the recipe tests
            #[serde(default = "default_true")]
            test: bool,
        },
        /// Record a built package in the history file
        RecordBuild {
            /// Package name
            package: String,
            /// Built version
            version: String,
            /// Built build string
            build_string: String,
            /// Source changesets
            #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
            changesets: Changesets,
        },
        /// Publish built packages to a channel
        Publish {
            /// Environment name, used for the release history file name
            environment: String,
            /// Local directory or `host:/path`
            target: String,
            /// Directory holding built packages
            packages_dir: PathBuf,
            /// Packages to publish
            packages: Vec<String>,
            /// Release history written next to the packages
            release_history: History,
            /// Re-index the channel after copying
            #[serde(default)]
            index: bool,
            /// Overwrite existing package files
            #[serde(default)]
            force: bool,
        },
        /// Replace the content of a file
        ModifyFile {
            /// File to write
            file: PathBuf,
            /// New content
            contents: String,
        },
        /// Commit and push files of a source repository
        GitCommit {
            /// Repository directory
            repo: PathBuf,
            /// Files to add
            modified: Vec<PathBuf>,
            /// Commit message
            message: String,
        },
        /// Run the source build steps again
        Rebuild,
        /// Verify the source build steps succeeded in order
        CheckBuildStatus,
    }

    impl ActionKind {
        /// Get a human-readable description of this action
        #[must_use]
        pub fn description(&self) -> String {
            match self {
                Self::CreatePackage { package, test } => {
                    if *test {
                        format!("Create package {package}")
                    } else {
                        format!("Create package {package} (tests disabled)")
                    }
                }
                Self::RecordBuild { package, version, build_string, .. } => {
                    format!("Record build {package} {version} {build_string}")
                }
                Self::Publish { packages, target, .. } => {
                    format!("Publish {} package(s) to {target}", packages.len())
                }
                Self::ModifyFile { file, .. } => format!("Modify {}", file.display()),
                Self::GitCommit { repo, message, .. } => {
                    format!("Commit in {}: {message}", repo.display())
                }
                Self::Rebuild => "Rebuild source tree".into(),
                Self::CheckBuildStatus => "Check build status".into(),
            }
        }
    }

    /// Outcome of an applied action
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
    #[serde(rename_all = "lowercase")]
    pub enum ActionStatus {
        /// Completed; skipped on later runs
        Success,
        /// Failed on the last run; retried on the next one
        Failed,
    }

    /// An action with its replay bookkeeping
    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    pub struct PlanAction {
        /// What to do
        #[serde(flatten)]
        pub kind: ActionKind,
        /// Result of the last attempt
        #[serde(default, skip_serializing_if = "Option::is_none")]
        pub status: Option<ActionStatus>,
        /// When the action last completed or failed
        #[serde(default, skip_serializing_if = "Option::is_none")]
        pub applied_at: Option<DateTime<Utc>>,
        /// Error of the last failed attempt
        #[serde(default, skip_serializing_if = "Option::is_none")]
        pub error: Option<String>,
    }

    impl PlanAction {
        /// A pending action
        #[must_use]
        pub fn new(kind: ActionKind) -> Self {
            Self {
                kind,
                status: None,
                applied_at: None,
                error: None,
            }
        }

        /// True once the action has succeeded
        #[must_use]
        pub fn is_done(&self) -> bool {
            self.status == Some(ActionStatus::Success)
        }
    }
}
