// SPDX-License-Identifier: AGPL-3.0-or-later
// SPDX-FileCopyrightText: 2025 Jonathan D.A. Jewell
//! Packaging plan generation
//!
//! The planner walks every recipe of the build tree in dependency order and
//! decides which packages must be built:
//!
//! - a package with source components is rebuilt when the HEAD changesets of
//!   its components differ from the ones recorded in the history
//! - a virtual package is always rebuilt with its patch version bumped
//! - a compiled package is rebuilt when a compiled package it depends on is
//!   rebuilt (binary compatibility)
//!
//! Rebuilt packages get a rendered recipe with pinned internal dependencies
//! and a pair of `create_package` / `record_build` actions.

use crate::graph::RecipeGraph;
use crate::recipes::RecipeStore;
use crate::selector::PackageSelector;
use crate::state::{self, BuildTree};
use crate::types::{
    ActionKind, BuildInfo, Changesets, ForgeSection, History, PackageType, PlanAction, Recipe,
};
use crate::vcs::SourceControl;
use crate::version::component_version;
use anyhow::{bail, Context, Result};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::fs;
use tracing::{info, warn};

/// Planner options
#[derive(Debug, Clone, Default)]
pub struct PlanOptions {
    /// Shell patterns restricting the packages considered
    pub patterns: Vec<String>,
    /// Ignore build status checks and unclean source trees
    pub force: bool,
    /// Run recipe tests when building packages
    pub test: bool,
    /// Publish target appended to the plan
    pub publish: Option<String>,
    /// Re-index the channel after publishing
    pub publish_index: bool,
}

/// Why a package is (or is not) part of the plan
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "reason", content = "detail", rename_all = "snake_case")]
pub enum BuildReason {
    /// Component changesets differ from the history
    SourceChanged,
    /// Virtual packages are always rebuilt
    Virtual,
    /// A compiled dependency is rebuilt
    DependencyRebuilt(String),
    /// Nothing changed
    Unchanged,
}

/// Planning result for one package
#[derive(Debug, Clone, Serialize)]
pub struct PackagePlan {
    /// Package name
    pub name: String,
    /// Package type
    #[serde(rename = "type")]
    pub kind: PackageType,
    /// Version that would be built
    pub version: String,
    /// Build string that would be used
    pub build_string: String,
    /// Component changesets
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub changesets: Changesets,
    /// Problems with the source trees
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub source_errors: Vec<String>,
    /// Decision
    #[serde(flatten)]
    pub reason: BuildReason,
    /// Rendered recipe
    #[serde(skip)]
    pub recipe: Recipe,
}

impl PackagePlan {
    /// True when the package is rebuilt
    #[must_use]
    pub fn is_selected(&self) -> bool {
        self.reason != BuildReason::Unchanged
    }
}

/// A computed plan, not yet written
#[derive(Debug, Clone, Serialize)]
pub struct Plan {
    /// Build number of this plan
    pub build_number: u64,
    /// Every considered package, in build order
    pub packages: Vec<PackagePlan>,
    /// Actions to replay
    #[serde(skip)]
    pub actions: Vec<PlanAction>,
}

impl Plan {
    /// Packages that are rebuilt, in build order
    pub fn selected(&self) -> impl Iterator<Item = &PackagePlan> {
        self.packages.iter().filter(|p| p.is_selected())
    }
}

/// Shell script installing the components of a package from the build tree
fn install_script(tree: &BuildTree, components: &[String]) -> String {
    let root = tree.root().display();
    [
        format!("cd '{root}'"),
        format!("pixi run --manifest-path='{root}/pixi.toml' bash << END"),
        "cd \"\\$CASA_BUILD\"".to_string(),
        "export BRAINVISA_INSTALL_PREFIX=\"$PREFIX\"".to_string(),
        format!("for component in {}; do", components.join(" ")),
        "  make install-\\${component}".to_string(),
        "  make install-\\${component}-dev".to_string(),
        "  make install-\\${component}-usrdoc".to_string(),
        "  make install-\\${component}-devdoc".to_string(),
        "done".to_string(),
        "END".to_string(),
    ]
    .join("\n")
}

/// Next version of a virtual package: patch of the last version plus one,
/// or the environment padded to three components (`6.0.0`, `dev.0.0`) for a
/// first build
fn next_virtual_version(previous: Option<&str>, environment: &str) -> Result<String> {
    let Some(previous) = previous else {
        let mut parts: Vec<&str> = environment.split('.').collect();
        while parts.len() < 3 {
            parts.push("0");
        }
        return Ok(parts.join("."));
    };
    let mut parts: Vec<String> = previous.split('.').map(str::to_string).collect();
    // Short versions written by older plans bump their last component
    let index = parts.len().min(3) - 1;
    let patch: u64 = parts[index]
        .parse()
        .with_context(|| format!("Cannot increment version {previous}: {} is not a number", parts[index]))?;
    parts[index] = (patch + 1).to_string();
    Ok(parts.join("."))
}

/// Computes and writes packaging plans for a build tree
pub struct Planner<'a> {
    tree: &'a BuildTree,
    store: &'a RecipeStore,
    vcs: &'a dyn SourceControl,
}

impl<'a> Planner<'a> {
    /// Planner for `tree` using recipes from `store`
    pub fn new(tree: &'a BuildTree, store: &'a RecipeStore, vcs: &'a dyn SourceControl) -> Self {
        Self { tree, store, vcs }
    }

    /// Compute the plan without writing anything
    pub fn compute(&self, build_info: &BuildInfo, options: &PlanOptions) -> Result<Plan> {
        if !options.force {
            build_info
                .check_steps()
                .with_context(|| format!("Source build is not complete in {}", self.tree.root().display()))?;
        }

        let build_number = build_info.build_number + 1;
        let build_string = format!("{}_{}", build_info.build_string, build_number);
        let history = History::load(&self.tree.history_file())?;
        let selector = PackageSelector::new(&options.patterns)?;
        let order = RecipeGraph::from_store(self.store)?.sorted()?;

        let mut packages: Vec<PackagePlan> = Vec::new();
        for name in order {
            if !build_info.all_packages.contains_key(&name) {
                info!("Skip package {} (not in build tree)", name);
                continue;
            }
            if !selector.is_match(&name) {
                info!("Ignore package {} (excluded by parameters)", name);
                continue;
            }
            let recipe = self.store.read(&name)?;
            packages.push(self.inspect(recipe, build_info, &history, build_number, &build_string)?);
        }

        propagate_rebuilds(&mut packages, self.store);

        let mut plan = Plan {
            build_number,
            packages,
            actions: Vec::new(),
        };
        self.render(&mut plan, build_info, &history, options)?;
        Ok(plan)
    }

    /// Version, changesets and rebuild decision of one package
    fn inspect(
        &self,
        recipe: &Recipe,
        build_info: &BuildInfo,
        history: &History,
        build_number: u64,
        build_string: &str,
    ) -> Result<PackagePlan> {
        let name = recipe.name().to_string();
        let kind = recipe.package_type();
        let mut recipe = recipe.clone();
        let previous = history.get(&name);

        let (version, changesets, source_errors, reason) = if !recipe.components().is_empty() {
            let mut version = None;
            let mut changesets = Changesets::new();
            let mut source_errors = Vec::new();
            for component in recipe.components() {
                let src = self.tree.src_dir().join(component);
                if version.is_none() {
                    version = Some(
                        component_version(&src)
                            .with_context(|| format!("Cannot get version of package {name}"))?,
                    );
                }
                source_errors.extend(self.vcs.status(&src)?.errors(&src));
                changesets.insert(component.clone(), self.vcs.changeset(&src)?);
            }

            let reason = if previous.and_then(|h| h.changesets.as_ref()) == Some(&changesets) {
                info!("No change detected in package {}", name);
                BuildReason::Unchanged
            } else {
                info!("Select {} for building because sources changed", name);
                BuildReason::SourceChanged
            };

            let script = install_script(self.tree, recipe.components());
            recipe.build_mut().script = Some(script.into());
            (version.unwrap_or_default(), changesets, source_errors, reason)
        } else if kind == PackageType::Virtual {
            let version = next_virtual_version(
                previous.and_then(|h| h.version.as_deref()),
                &build_info.environment,
            )?;
            info!("Select virtual package {} {} for building", name, version);
            (version, Changesets::new(), Vec::new(), BuildReason::Virtual)
        } else {
            bail!("Invalid recipe for {name} (bad type or no component defined)");
        };

        let build = recipe.build_mut();
        build.number = Some(build_number);
        build.string = Some(build_string.to_string());
        recipe.package.version = Some(version.clone());

        Ok(PackagePlan {
            name,
            kind,
            version,
            build_string: build_string.to_string(),
            changesets,
            source_errors,
            reason,
            recipe,
        })
    }

    /// Pin dependencies of rebuilt packages and generate actions
    fn render(
        &self,
        plan: &mut Plan,
        build_info: &BuildInfo,
        history: &History,
        options: &PlanOptions,
    ) -> Result<()> {
        let planned: HashMap<String, (String, String, bool)> = plan
            .packages
            .iter()
            .map(|p| {
                (
                    p.name.clone(),
                    (p.version.clone(), p.build_string.clone(), p.is_selected()),
                )
            })
            .collect();

        let mut release_history = history.clone();
        let mut actions = Vec::new();
        for package in plan.packages.iter_mut().filter(|p| p.is_selected()) {
            if !options.force && !package.source_errors.is_empty() {
                bail!(
                    "Cannot build {} because {}",
                    package.name,
                    package.source_errors.join(", ")
                );
            }

            let mut pins = Vec::new();
            for dependency in package.recipe.internal_dependencies() {
                pins.push(self.pin(package.kind, dependency, &planned, history)?);
            }
            if package.name == "soma" || package.kind == PackageType::Interpreted {
                pins.push(format!("python=={}", build_info.options.python));
            }
            package
                .recipe
                .requirements
                .run
                .extend(pins.into_iter().map(serde_yaml::Value::from));
            package.recipe.forge = ForgeSection::default();

            release_history.record(
                &package.name,
                &package.version,
                &package.build_string,
                &package.changesets,
            );
            actions.push(PlanAction::new(ActionKind::CreatePackage {
                package: package.name.clone(),
                test: options.test,
            }));
            actions.push(PlanAction::new(ActionKind::RecordBuild {
                package: package.name.clone(),
                version: package.version.clone(),
                build_string: package.build_string.clone(),
                changesets: package.changesets.clone(),
            }));
        }

        if let Some(target) = &options.publish {
            let packages: Vec<String> = plan.selected().map(|p| p.name.clone()).collect();
            if !packages.is_empty() {
                actions.push(PlanAction::new(ActionKind::Publish {
                    environment: build_info.environment.clone(),
                    target: target.clone(),
                    packages_dir: self.tree.packages_dir(),
                    packages,
                    release_history,
                    index: options.publish_index,
                    force: false,
                }));
            }
        }

        plan.actions = actions;
        Ok(())
    }

    /// Run requirement pinning `dependency` for a package of type `kind`
    fn pin(
        &self,
        kind: PackageType,
        dependency: &str,
        planned: &HashMap<String, (String, String, bool)>,
        history: &History,
    ) -> Result<String> {
        let last = history.get(dependency);
        let (version, planned_build, rebuilt) = match planned.get(dependency) {
            Some((version, build_string, rebuilt)) => (version.clone(), Some(build_string.as_str()), *rebuilt),
            None => {
                let version = last
                    .and_then(|h| h.version.clone())
                    .with_context(|| format!("Cannot pin {dependency}: it is not planned and was never built"))?;
                (version, None, false)
            }
        };

        let dependency_kind = self.store.read(dependency)?.package_type();
        if kind != PackageType::Compiled || dependency_kind != PackageType::Compiled {
            return Ok(format!("{dependency}=={version}"));
        }

        // a dependency that is not rebuilt is pinned to its released build
        let last_build = last.and_then(|h| h.build_string.as_deref());
        let build_string = match (rebuilt, last_build, planned_build) {
            (false, Some(last_build), _) => last_build,
            (_, _, Some(planned_build)) => planned_build,
            _ => bail!("Cannot pin {dependency}: no build string known"),
        };
        Ok(format!("{dependency}=={version}={build_string}"))
    }

    /// Write rendered recipes and actions, then persist the build number
    pub fn write(&self, plan: &Plan, build_info: &mut BuildInfo) -> Result<()> {
        let actions_file = self.tree.actions_file();
        if actions_file.exists() {
            let previous = state::load_actions(&actions_file).unwrap_or_default();
            let pending = previous.iter().filter(|a| !a.is_done()).count();
            if pending > 0 {
                warn!("Replacing a plan with {} pending action(s)", pending);
            }
        }

        let recipes_dir = self.tree.plan_dir().join("recipes");
        if recipes_dir.exists() {
            fs::remove_dir_all(&recipes_dir)
                .with_context(|| format!("Failed to remove {}", recipes_dir.display()))?;
        }
        for package in plan.selected() {
            let file = self.tree.recipe_dir(&package.name).join("recipe.yaml");
            state::write_yaml(&file, &package.recipe)?;
        }
        state::save_actions(&actions_file, &plan.actions)?;

        build_info.build_number = plan.build_number;
        build_info.save(&self.tree.build_info_file())?;
        Ok(())
    }
}

/// Select compiled packages depending on a rebuilt compiled package, until
/// nothing changes
fn propagate_rebuilds(packages: &mut [PackagePlan], store: &RecipeStore) {
    let mut modified = true;
    while modified {
        modified = false;
        let kinds: HashMap<String, (PackageType, bool)> = packages
            .iter()
            .map(|p| (p.name.clone(), (p.kind, p.is_selected())))
            .collect();
        for package in packages.iter_mut() {
            if package.is_selected() || package.kind != PackageType::Compiled {
                continue;
            }
            let Some(recipe) = store.get(&package.name) else {
                continue;
            };
            let trigger = recipe.internal_dependencies().iter().find(|d| {
                kinds
                    .get(d.as_str())
                    .is_some_and(|(kind, selected)| *kind == PackageType::Compiled && *selected)
            });
            if let Some(dependency) = trigger {
                info!("Select {} for building because {} is selected", package.name, dependency);
                package.reason = BuildReason::DependencyRebuilt(dependency.clone());
                modified = true;
            }
        }
    }
}

/// Compute the plan of a build tree and write it
pub fn generate(
    tree: &BuildTree,
    store: &RecipeStore,
    vcs: &dyn SourceControl,
    options: &PlanOptions,
) -> Result<Plan> {
    let mut build_info = BuildInfo::load(&tree.build_info_file())?;
    let planner = Planner::new(tree, store, vcs);
    let plan = planner.compute(&build_info, options)?;
    planner.write(&plan, &mut build_info)?;
    Ok(plan)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{
        BuildOptions, HistoryEntry, PackageSection, PackageSummary, Requirements, StepInfo,
    };
    use crate::vcs::testing::FakeVcs;
    use chrono::{TimeZone, Utc};
    use tempfile::TempDir;

    fn make_recipe(name: &str, kind: PackageType, deps: &[&str], components: &[&str]) -> Recipe {
        Recipe {
            package: PackageSection {
                name: name.into(),
                version: None,
                extra: BTreeMap::new(),
            },
            build: None,
            requirements: Requirements {
                run: vec![serde_yaml::Value::from("numpy")],
                ..Requirements::default()
            },
            forge: ForgeSection {
                kind: Some(kind),
                internal_dependencies: deps.iter().map(|d| (*d).to_string()).collect(),
                components: components.iter().map(|c| (*c).to_string()).collect(),
            },
            extra: BTreeMap::new(),
        }
    }

    fn make_store() -> RecipeStore {
        RecipeStore::from_recipes([
            make_recipe("soma", PackageType::Interpreted, &[], &["soma-base"]),
            make_recipe("aims", PackageType::Compiled, &["soma"], &["aims-free"]),
            make_recipe("anatomist", PackageType::Compiled, &["aims"], &["anatomist-free"]),
            make_recipe("brainvisa", PackageType::Virtual, &["anatomist", "aims"], &[]),
            make_recipe("capsul", PackageType::Interpreted, &["soma"], &["capsul"]),
        ])
        .unwrap()
    }

    fn step(start: i64, stop: i64) -> StepInfo {
        StepInfo {
            status: "succeeded".into(),
            start: Some(Utc.timestamp_opt(start, 0).unwrap().into()),
            stop: Some(Utc.timestamp_opt(stop, 0).unwrap().into()),
        }
    }

    fn make_build_info(with_steps: bool) -> BuildInfo {
        let all_packages = [
            ("soma", PackageType::Interpreted),
            ("aims", PackageType::Compiled),
            ("anatomist", PackageType::Compiled),
            ("brainvisa", PackageType::Virtual),
        ]
        .into_iter()
        .map(|(n, kind)| (n.to_string(), PackageSummary { kind }))
        .collect();
        let steps = if with_steps {
            [("configure", step(0, 10)), ("build", step(11, 20)), ("doc", step(21, 30))]
                .into_iter()
                .map(|(n, s)| (n.to_string(), s))
                .collect()
        } else {
            BTreeMap::new()
        };
        BuildInfo {
            environment: "6.0".into(),
            packages: vec!["brainvisa".into()],
            options: BuildOptions::default(),
            build_string: "py311".into(),
            build_number: 4,
            all_packages,
            steps,
            extra: BTreeMap::new(),
        }
    }

    fn make_tree(dir: &TempDir) -> BuildTree {
        let tree = BuildTree::new(dir.path());
        for (component, version) in [
            ("soma-base", "6.0.4"),
            ("aims-free", "5.2.0"),
            ("anatomist-free", "5.2.1"),
        ] {
            let src = tree.src_dir().join(component);
            fs::create_dir_all(&src).unwrap();
            fs::write(
                src.join("pyproject.toml"),
                format!("[project]\nname = \"{component}\"\nversion = \"{version}\"\n"),
            )
            .unwrap();
        }
        make_build_info(true).save(&tree.build_info_file()).unwrap();
        tree
    }

    fn entry(version: &str, build_string: Option<&str>, changesets: &[(&str, &str)]) -> HistoryEntry {
        HistoryEntry {
            version: Some(version.into()),
            build_string: build_string.map(str::to_string),
            changesets: if changesets.is_empty() {
                None
            } else {
                Some(
                    changesets
                        .iter()
                        .map(|(c, h)| ((*c).to_string(), (*h).to_string()))
                        .collect(),
                )
            },
        }
    }

    fn save_history(tree: &BuildTree, entries: Vec<(&str, HistoryEntry)>) {
        let history = History(entries.into_iter().map(|(n, e)| (n.to_string(), e)).collect());
        history.save(&tree.history_file()).unwrap();
    }

    fn make_vcs() -> FakeVcs {
        FakeVcs::with(&[
            ("soma-base", "c1"),
            ("aims-free", "c2"),
            ("anatomist-free", "c3"),
        ])
    }

    fn options() -> PlanOptions {
        PlanOptions {
            test: true,
            ..PlanOptions::default()
        }
    }

    fn find<'p>(plan: &'p Plan, name: &str) -> &'p PackagePlan {
        plan.packages.iter().find(|p| p.name == name).unwrap()
    }

    fn run_requirements(package: &PackagePlan) -> Vec<String> {
        package
            .recipe
            .requirements
            .run_specs()
            .map(str::to_string)
            .collect()
    }

    #[test]
    fn test_first_plan_builds_everything() {
        let dir = TempDir::new().unwrap();
        let tree = make_tree(&dir);
        let store = make_store();
        let vcs = make_vcs();

        let plan = generate(&tree, &store, &vcs, &options()).unwrap();

        assert_eq!(plan.build_number, 5);
        let names: Vec<_> = plan.packages.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, vec!["soma", "aims", "anatomist", "brainvisa"]);
        assert!(plan.packages.iter().all(PackagePlan::is_selected));

        let soma = find(&plan, "soma");
        assert_eq!(soma.version, "6.0.4");
        assert_eq!(soma.build_string, "py311_5");
        assert_eq!(run_requirements(soma), vec!["numpy", "python==3.11"]);

        assert_eq!(run_requirements(find(&plan, "aims")), vec!["numpy", "soma==6.0.4"]);
        assert_eq!(
            run_requirements(find(&plan, "anatomist")),
            vec!["numpy", "aims==5.2.0=py311_5"]
        );

        let brainvisa = find(&plan, "brainvisa");
        assert_eq!(brainvisa.version, "6.0.0");
        assert_eq!(brainvisa.reason, BuildReason::Virtual);
        assert_eq!(
            run_requirements(brainvisa),
            vec!["numpy", "anatomist==5.2.1", "aims==5.2.0"]
        );

        assert_eq!(plan.actions.len(), 8);
        assert_eq!(
            plan.actions[0].kind,
            ActionKind::CreatePackage {
                package: "soma".into(),
                test: true
            }
        );
        assert!(matches!(
            &plan.actions[1].kind,
            ActionKind::RecordBuild { package, changesets, .. }
                if package == "soma" && changesets["soma-base"] == "c1"
        ));

        // written state
        let rendered = fs::read_to_string(tree.recipe_dir("aims").join("recipe.yaml")).unwrap();
        assert!(!rendered.contains("soma-forge"));
        assert!(rendered.contains("soma==6.0.4"));
        assert!(rendered.contains("py311_5"));
        assert!(rendered.contains("make install-"));
        assert_eq!(state::load_actions(&tree.actions_file()).unwrap(), plan.actions);
        assert_eq!(BuildInfo::load(&tree.build_info_file()).unwrap().build_number, 5);
    }

    #[test]
    fn test_compiled_dependents_are_rebuilt() {
        let dir = TempDir::new().unwrap();
        let tree = make_tree(&dir);
        save_history(
            &tree,
            vec![
                ("soma", entry("6.0.4", Some("py311_3"), &[("soma-base", "c1")])),
                ("aims", entry("5.2.0", Some("py311_3"), &[("aims-free", "old")])),
                ("anatomist", entry("5.2.1", Some("py311_3"), &[("anatomist-free", "c3")])),
                ("brainvisa", entry("6.0.3", Some("py311_3"), &[])),
            ],
        );

        let plan = generate(&tree, &make_store(), &make_vcs(), &options()).unwrap();

        assert_eq!(find(&plan, "soma").reason, BuildReason::Unchanged);
        assert_eq!(find(&plan, "aims").reason, BuildReason::SourceChanged);
        assert_eq!(
            find(&plan, "anatomist").reason,
            BuildReason::DependencyRebuilt("aims".into())
        );
        assert_eq!(find(&plan, "brainvisa").version, "6.0.4");
        assert_eq!(
            run_requirements(find(&plan, "anatomist")),
            vec!["numpy", "aims==5.2.0=py311_5"]
        );
        assert_eq!(plan.actions.len(), 6);
        assert!(!tree.recipe_dir("soma").exists());
    }

    #[test]
    fn test_unchanged_dependency_pinned_to_released_build() {
        let dir = TempDir::new().unwrap();
        let tree = make_tree(&dir);
        save_history(
            &tree,
            vec![
                ("soma", entry("6.0.4", Some("py311_2"), &[("soma-base", "c1")])),
                ("aims", entry("5.2.0", Some("py311_2"), &[("aims-free", "c2")])),
                ("anatomist", entry("5.2.0", Some("py311_2"), &[("anatomist-free", "old")])),
            ],
        );

        let plan = generate(&tree, &make_store(), &make_vcs(), &options()).unwrap();

        assert!(!find(&plan, "aims").is_selected());
        assert_eq!(
            run_requirements(find(&plan, "anatomist")),
            vec!["numpy", "aims==5.2.0=py311_2"]
        );
    }

    #[test]
    fn test_unclean_sources_need_force() {
        let dir = TempDir::new().unwrap();
        let tree = make_tree(&dir);
        let mut vcs = make_vcs();
        vcs.dirty.insert("aims-free".into());

        let err = generate(&tree, &make_store(), &vcs, &options()).unwrap_err();
        assert!(err.to_string().contains("Cannot build aims"));
        // nothing written on failure
        assert!(!tree.actions_file().exists());
        assert_eq!(BuildInfo::load(&tree.build_info_file()).unwrap().build_number, 4);

        let forced = PlanOptions {
            force: true,
            ..options()
        };
        let plan = generate(&tree, &make_store(), &vcs, &forced).unwrap();
        assert_eq!(find(&plan, "aims").source_errors.len(), 1);
    }

    #[test]
    fn test_incomplete_build_needs_force() {
        let dir = TempDir::new().unwrap();
        let tree = make_tree(&dir);
        make_build_info(false).save(&tree.build_info_file()).unwrap();

        let err = generate(&tree, &make_store(), &make_vcs(), &options()).unwrap_err();
        assert!(format!("{err:#}").contains("no configure step information"));

        let forced = PlanOptions {
            force: true,
            ..options()
        };
        assert!(generate(&tree, &make_store(), &make_vcs(), &forced).is_ok());
    }

    #[test]
    fn test_patterns_pin_from_history() {
        let dir = TempDir::new().unwrap();
        let tree = make_tree(&dir);
        let only_anatomist = PlanOptions {
            patterns: vec!["anatomist".into()],
            ..options()
        };

        let err = generate(&tree, &make_store(), &make_vcs(), &only_anatomist).unwrap_err();
        assert!(err.to_string().contains("Cannot pin aims"));

        save_history(
            &tree,
            vec![("aims", entry("5.1.9", Some("py311_1"), &[("aims-free", "c0")]))],
        );
        let plan = generate(&tree, &make_store(), &make_vcs(), &only_anatomist).unwrap();
        assert_eq!(plan.packages.len(), 1);
        assert_eq!(
            run_requirements(find(&plan, "anatomist")),
            vec!["numpy", "aims==5.1.9=py311_1"]
        );
    }

    #[test]
    fn test_publish_action() {
        let dir = TempDir::new().unwrap();
        let tree = make_tree(&dir);
        let publishing = PlanOptions {
            publish: Some("server:/srv/channel".into()),
            ..options()
        };

        let plan = generate(&tree, &make_store(), &make_vcs(), &publishing).unwrap();

        match &plan.actions.last().unwrap().kind {
            ActionKind::Publish {
                environment,
                target,
                packages,
                release_history,
                packages_dir,
                ..
            } => {
                assert_eq!(environment, "6.0");
                assert_eq!(target, "server:/srv/channel");
                assert_eq!(packages, &["soma", "aims", "anatomist", "brainvisa"]);
                assert_eq!(packages_dir, &tree.packages_dir());
                let aims = release_history.get("aims").unwrap();
                assert_eq!(aims.build_string.as_deref(), Some("py311_5"));
            }
            other => panic!("unexpected last action {other:?}"),
        }
    }

    #[test]
    fn test_next_virtual_version() {
        assert_eq!(next_virtual_version(None, "6.0").unwrap(), "6.0.0");
        assert_eq!(next_virtual_version(Some("6.0.9"), "6.0").unwrap(), "6.0.10");
        assert_eq!(next_virtual_version(None, "dev").unwrap(), "dev.0.0");
        assert_eq!(next_virtual_version(None, "7").unwrap(), "7.0.0");
        assert_eq!(next_virtual_version(Some("dev.0.0"), "dev").unwrap(), "dev.0.1");
        assert_eq!(next_virtual_version(Some("dev.0"), "dev").unwrap(), "dev.1");
        assert!(next_virtual_version(Some("6.0.x"), "6.0").is_err());
    }

    #[test]
    fn test_named_environment_plans_again() {
        let dir = TempDir::new().unwrap();
        let tree = make_tree(&dir);
        let mut build_info = make_build_info(true);
        build_info.environment = "dev".into();
        build_info.save(&tree.build_info_file()).unwrap();
        let store = make_store();
        let vcs = make_vcs();

        let first = generate(&tree, &store, &vcs, &options()).unwrap();
        assert_eq!(find(&first, "brainvisa").version, "dev.0.0");

        // what `apply` records for the first plan
        let mut history = History::load(&tree.history_file()).unwrap();
        for action in &first.actions {
            if let ActionKind::RecordBuild { package, version, build_string, changesets } = &action.kind {
                history.record(package, version, build_string, changesets);
            }
        }
        history.save(&tree.history_file()).unwrap();

        let second = generate(&tree, &store, &vcs, &options()).unwrap();
        assert_eq!(second.build_number, 6);
        assert_eq!(find(&second, "brainvisa").version, "dev.0.1");
        assert_eq!(find(&second, "aims").reason, BuildReason::Unchanged);
    }
}
