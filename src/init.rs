// SPDX-License-Identifier: AGPL-3.0-or-later
// SPDX-FileCopyrightText: 2025 Jonathan D.A. Jewell
//! Build tree initialisation
//!
//! `init` creates (or reconfigures) a pixi project holding the sources and
//! the build directory of the selected packages:
//!
//! - `conf/build_info.json` with the environment, the package selection and
//!   the build options
//! - `conf/bv_maker.cfg` listing the git source of every component
//! - `pixi.toml` dependencies merged from the external requirements of the
//!   selected recipes and the build dependencies of the environment
//! - `src/brainvisa-cmake`, the build system sources

use crate::config::Settings;
use crate::environments::Environments;
use crate::recipes::RecipeStore;
use crate::runner::{CommandRunner, CommandSpec};
use crate::selector;
use crate::state::{self, BuildTree};
use crate::types::{split_requirement, BuildInfo, BuildOptions, PackageSummary};
use crate::vcs::SourceControl;
use anyhow::{bail, Context, Result};
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::PathBuf;
use tracing::{debug, info, warn};

/// Repository of the build system cloned in every build tree
pub const BRAINVISA_CMAKE_URL: &str = "https://github.com/brainvisa/brainvisa-cmake";

/// Options of `init`
#[derive(Debug, Clone, Default)]
pub struct InitOptions {
    /// Build tree directory
    pub directory: PathBuf,
    /// Environment name
    pub environment: String,
    /// Package selection tokens; the environment's default packages when empty
    pub packages: Vec<String>,
    /// Python version; the current or configured one when not given
    pub python: Option<String>,
    /// Overwrite an existing configuration
    pub force: bool,
}

/// External collaborators of `init`
pub struct Initializer<'a> {
    settings: &'a Settings,
    store: &'a RecipeStore,
    environments: &'a Environments,
    runner: &'a dyn CommandRunner,
    vcs: &'a dyn SourceControl,
}

/// `py` followed by the major and minor python version (`py311`)
#[must_use]
pub fn build_string(python: &str) -> String {
    let mut parts = python.split('.');
    let major = parts.next().unwrap_or_default();
    let minor = parts.next().unwrap_or_default();
    format!("py{major}{minor}")
}

/// Render `conf/bv_maker.cfg`
#[must_use]
pub fn bv_maker_cfg(components: &BTreeMap<String, Vec<(String, String, String)>>) -> String {
    let mut source = vec!["brainvisa brainvisa-cmake master".to_string()];
    let mut build = Vec::new();
    for (package, entries) in components {
        source.push(format!("# Components of package {package}"));
        build.push(format!("# Components of package {package}"));
        for (component, url, branch) in entries {
            source.push(format!("git {url} {branch} {component}"));
            build.push(format!("brainvisa {component} * $CASA_SRC"));
        }
    }

    let mut cfg = String::new();
    cfg.push_str("[ source $CASA_SRC ]\n");
    cfg.push_str("  default_source_dir = {component}\n");
    cfg.push_str("  ignore_git_failure=ON\n\n");
    cfg.push_str(&format!("    {}\n\n", source.join("\n    ")));
    cfg.push_str("[ build $CASA_BUILD ]\n");
    cfg.push_str("  default_steps = configure build doc\n");
    cfg.push_str("  make_options = -j$NCPU\n");
    cfg.push_str("  cmake_options += -DPIXI=$CASA\n");
    cfg.push_str("  build_type = Release\n");
    cfg.push_str("  packaging_thirdparty = OFF\n");
    cfg.push_str("  clean_config = ON\n");
    cfg.push_str("  clean_build = ON\n");
    cfg.push_str("  test_ref_data_dir = $CASA_TESTS/ref\n");
    cfg.push_str("  test_run_data_dir = $CASA_TESTS/test\n\n");
    cfg.push_str(&format!("    {}\n", build.join("\n    ")));
    cfg
}

/// Merge dependency constraints into a pixi `[dependencies]` table.
///
/// Constraints of a package are a comma separated set, `*` when empty.
/// Table entries (`{version = ..., channel = ...}`) are left alone. Returns
/// true when the table changed.
pub fn merge_dependencies(
    table: &mut toml::Table,
    dependencies: &BTreeMap<String, BTreeSet<String>>,
) -> bool {
    let mut modified = false;
    for (package, constraints) in dependencies {
        let mut merged = constraints.clone();
        match table.get(package) {
            Some(toml::Value::String(existing)) => {
                merged.extend(
                    existing
                        .split(',')
                        .map(str::trim)
                        .filter(|c| !c.is_empty() && *c != "*")
                        .map(str::to_string),
                );
            }
            Some(_) => continue,
            None => {}
        }
        let value = if merged.is_empty() {
            "*".to_string()
        } else {
            merged.into_iter().collect::<Vec<_>>().join(",")
        };
        if table.get(package).and_then(toml::Value::as_str) != Some(value.as_str()) {
            table.insert(package.clone(), toml::Value::String(value));
            modified = true;
        }
    }
    modified
}

impl<'a> Initializer<'a> {
    /// Initializer using the given recipes and environments
    pub fn new(
        settings: &'a Settings,
        store: &'a RecipeStore,
        environments: &'a Environments,
        runner: &'a dyn CommandRunner,
        vcs: &'a dyn SourceControl,
    ) -> Self {
        Self {
            settings,
            store,
            environments,
            runner,
            vcs,
        }
    }

    /// Create or reconfigure a build tree
    pub fn run(&self, options: &InitOptions) -> Result<BuildTree> {
        let environment = self.environments.resolve(&options.environment)?;
        let tree = BuildTree::open(&options.directory)?;

        if !tree.pixi_manifest().exists() {
            fs::create_dir_all(tree.root())
                .with_context(|| format!("Failed to create directory {}", tree.root().display()))?;
            let mut command = CommandSpec::new("pixi").arg("init");
            for channel in &self.settings.pixi_channels {
                command = command.args(["-c", channel.as_str()]);
            }
            self.runner.run_checked(&command.path_arg(tree.root()))?;
        }

        let packages = if !options.packages.is_empty() {
            options.packages.clone()
        } else if !environment.default_packages.is_empty() {
            environment.default_packages.clone()
        } else {
            vec![selector::ALL.to_string()]
        };

        let mut build_info = self.build_info(&tree, options, packages)?;
        let python = build_info.options.python.clone();

        // Selected recipes, their components and external requirements
        let selection = selector::select(self.store, &build_info.packages, &self.settings.configured_packages)?;
        let mut components: BTreeMap<String, Vec<(String, String, String)>> = BTreeMap::new();
        let mut dependencies: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
        build_info.all_packages.clear();
        for package in &selection {
            let recipe = self.store.read(package)?;
            let kind = recipe.package_type();
            info!("{} ({})", package, kind);
            build_info.all_packages.insert(package.clone(), PackageSummary { kind });
            for component in recipe.components() {
                let (url, branch) = environment.component_source(component)?;
                debug!("  {} {} {}", component, url, branch);
                components
                    .entry(package.clone())
                    .or_default()
                    .push((component.clone(), url, branch));
            }
            let requirements = recipe
                .requirements
                .run_specs()
                .chain(recipe.requirements.build_specs());
            for requirement in requirements {
                if requirement.starts_with('$') {
                    continue;
                }
                let Some((name, constraint)) = split_requirement(requirement) else {
                    continue;
                };
                if self.store.contains(name) {
                    continue;
                }
                let entry = dependencies.entry(name.to_string()).or_default();
                if let Some(constraint) = constraint {
                    entry.insert(constraint.to_string());
                }
            }
        }
        build_info.save(&tree.build_info_file())?;

        let cfg_file = tree.conf_dir().join("bv_maker.cfg");
        if cfg_file.exists() && !options.force {
            warn!("Overwriting {}", cfg_file.display());
        }
        state::write_atomic(&cfg_file, bv_maker_cfg(&components).as_bytes())?;

        for (name, constraint) in &environment.build_dependencies {
            let entry = dependencies.entry(name.clone()).or_default();
            if let Some(constraint) = constraint.as_deref().filter(|c| *c != "*") {
                entry.insert(constraint.to_string());
            }
        }
        dependencies.insert("python".into(), BTreeSet::from([format!("=={python}")]));
        self.update_pixi_manifest(&tree, &options.environment, &build_info.build_string, &dependencies)?;

        let cmake_src = tree.src_dir().join("brainvisa-cmake");
        if !cmake_src.exists() {
            fs::create_dir_all(tree.src_dir())
                .with_context(|| format!("Failed to create directory {}", tree.src_dir().display()))?;
            self.vcs.clone_repo(BRAINVISA_CMAKE_URL, None, &cmake_src)?;
        }

        info!(
            "Initialised {} for environment {} with {} package(s)",
            tree.root().display(),
            options.environment,
            selection.len()
        );
        Ok(tree)
    }

    /// Build info to write; an existing configuration is kept except for what
    /// the options change
    fn build_info(&self, tree: &BuildTree, options: &InitOptions, packages: Vec<String>) -> Result<BuildInfo> {
        let file = tree.build_info_file();
        let current = if file.exists() {
            Some(BuildInfo::load(&file)?)
        } else {
            None
        };

        let mut build_info = match &current {
            Some(current) if !options.force => current.clone(),
            _ => BuildInfo {
                environment: options.environment.clone(),
                packages: packages.clone(),
                options: BuildOptions {
                    python: self.settings.default_python.clone(),
                    extra: BTreeMap::new(),
                },
                build_string: String::new(),
                build_number: current.as_ref().map_or(0, |c| c.build_number),
                all_packages: BTreeMap::new(),
                steps: BTreeMap::new(),
                extra: BTreeMap::new(),
            },
        };
        build_info.environment.clone_from(&options.environment);
        if !options.packages.is_empty() {
            build_info.packages = packages;
        }
        if let Some(python) = &options.python {
            build_info.options.python.clone_from(python);
        }
        build_info.build_string = build_string(&build_info.options.python);

        if let Some(current) = &current {
            let differs = current.environment != build_info.environment
                || current.packages != build_info.packages
                || current.options != build_info.options;
            if differs && !options.force && tree.build_dir().exists() {
                bail!(
                    "Existing build options in {} differ from the selected ones \
                     (environment {} -> {}, packages [{}] -> [{}], python {} -> {}). \
                     Either remove the directory {} or use --force",
                    file.display(),
                    current.environment,
                    build_info.environment,
                    current.packages.join(", "),
                    build_info.packages.join(", "),
                    current.options.python,
                    build_info.options.python,
                    tree.build_dir().display()
                );
            }
        }
        Ok(build_info)
    }

    fn update_pixi_manifest(
        &self,
        tree: &BuildTree,
        environment: &str,
        build_string: &str,
        dependencies: &BTreeMap<String, BTreeSet<String>>,
    ) -> Result<()> {
        let manifest = tree.pixi_manifest();
        let content = fs::read_to_string(&manifest)
            .with_context(|| format!("Failed to read {}", manifest.display()))?;
        let mut config: toml::Table = content
            .parse()
            .with_context(|| format!("Failed to parse {}", manifest.display()))?;

        let mut modified = false;
        let project_name = format!("soma-build-{environment}-{build_string}");
        let section = if config.contains_key("workspace") { "workspace" } else { "project" };
        let project = config
            .entry(section)
            .or_insert_with(|| toml::Value::Table(toml::Table::new()));
        let Some(project) = project.as_table_mut() else {
            bail!("[{}] is not a table in {}", section, manifest.display());
        };
        if project.get("name").and_then(toml::Value::as_str) != Some(project_name.as_str()) {
            project.insert("name".into(), toml::Value::String(project_name));
            modified = true;
        }

        let table = config
            .entry("dependencies")
            .or_insert_with(|| toml::Value::Table(toml::Table::new()));
        let Some(table) = table.as_table_mut() else {
            bail!("[dependencies] is not a table in {}", manifest.display());
        };
        modified |= merge_dependencies(table, dependencies);

        if modified {
            let content = toml::to_string_pretty(&config)
                .with_context(|| format!("Failed to serialize {}", manifest.display()))?;
            state::write_atomic(&manifest, content.as_bytes())?;
        }
        Ok(())
    }
}
