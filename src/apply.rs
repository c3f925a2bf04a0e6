// SPDX-License-Identifier: AGPL-3.0-or-later
// SPDX-FileCopyrightText: 2025 Jonathan D.A. Jewell
//! Plan application
//!
//! Actions of `plan/actions.yaml` are replayed in order. The file is
//! rewritten after every action, so an interrupted or failed run resumes at
//! the first action that did not succeed.

use crate::publish::{self, PublishRequest};
use crate::runner::{CommandRunner, CommandSpec};
use crate::state::{self, BuildTree};
use crate::types::{ActionKind, ActionStatus, BuildInfo, History, PlanAction};
use crate::vcs::SourceControl;
use anyhow::{Context, Result};
use chrono::Utc;
use serde::Serialize;
use std::fs;
use std::path::Path;
use tracing::{debug, error, info};

/// Options of `apply`
#[derive(Debug, Clone, Copy, Default)]
pub struct ApplyOptions {
    /// List pending actions without executing them
    pub dry_run: bool,
}

/// What a run did
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ApplyReport {
    /// Actions executed successfully during this run
    pub executed: usize,
    /// Actions already done by a previous run
    pub skipped: usize,
    /// Descriptions of the actions left to do
    pub pending: Vec<String>,
}

/// Everything an action may need
pub struct ActionContext<'a> {
    /// Build tree the plan belongs to
    pub tree: &'a BuildTree,
    /// External commands
    pub runner: &'a dyn CommandRunner,
    /// Source repositories
    pub vcs: &'a dyn SourceControl,
}

/// Replay the actions of the build tree's plan
pub fn apply_plan(ctx: &ActionContext<'_>, options: ApplyOptions) -> Result<ApplyReport> {
    let actions_file = ctx.tree.actions_file();
    let mut actions = state::load_actions(&actions_file)
        .with_context(|| format!("No plan to apply in {}", ctx.tree.root().display()))?;

    let mut report = ApplyReport::default();
    let total = actions.len();

    if options.dry_run {
        for action in &actions {
            if action.is_done() {
                report.skipped += 1;
            } else {
                report.pending.push(action.kind.description());
            }
        }
        return Ok(report);
    }

    for index in 0..total {
        if actions[index].is_done() {
            debug!("[{}/{}] {} (done)", index + 1, total, actions[index].kind.description());
            report.skipped += 1;
            continue;
        }
        info!("[{}/{}] {}", index + 1, total, actions[index].kind.description());

        let result = execute(ctx, &actions[index].kind);
        let action = &mut actions[index];
        action.applied_at = Some(Utc::now());
        match result {
            Ok(()) => {
                action.status = Some(ActionStatus::Success);
                action.error = None;
                state::save_actions(&actions_file, &actions)?;
                report.executed += 1;
            }
            Err(e) => {
                let description = action.kind.description();
                error!("{} failed: {:#}", description, e);
                action.status = Some(ActionStatus::Failed);
                action.error = Some(format!("{e:#}"));
                state::save_actions(&actions_file, &actions)?;
                return Err(e.context(format!("Action {}/{} failed: {}", index + 1, total, description)));
            }
        }
    }
    Ok(report)
}

/// Run one action
pub fn execute(ctx: &ActionContext<'_>, kind: &ActionKind) -> Result<()> {
    match kind {
        ActionKind::CreatePackage { package, test } => create_package(ctx, package, *test),
        ActionKind::RecordBuild {
            package,
            version,
            build_string,
            changesets,
        } => {
            let file = ctx.tree.history_file();
            let mut history = History::load(&file)?;
            history.record(package, version, build_string, changesets);
            history.save(&file)
        }
        ActionKind::Publish {
            environment,
            target,
            packages_dir,
            packages,
            release_history,
            index,
            force,
        } => {
            let request = PublishRequest {
                environment,
                target,
                packages_dir,
                packages,
                release_history,
                index: *index,
                force: *force,
            };
            publish::publish(ctx.runner, &request).map(|_| ())
        }
        ActionKind::ModifyFile { file, contents } => state::write_atomic(file, contents.as_bytes()),
        ActionKind::GitCommit { repo, modified, message } => {
            ctx.vcs.commit_and_push(repo, modified, message)
        }
        ActionKind::Rebuild => {
            let manifest = ctx.tree.pixi_manifest();
            ctx.runner.run_checked(
                &CommandSpec::new("pixi")
                    .args(["run", "--manifest-path"])
                    .path_arg(&manifest)
                    .args(["bv_maker", "configure", "build", "doc"])
                    .cwd(ctx.tree.root()),
            )?;
            Ok(())
        }
        ActionKind::CheckBuildStatus => {
            let build_info = BuildInfo::load(&ctx.tree.build_info_file())?;
            build_info.check_steps()?;
            Ok(())
        }
    }
}

/// Channels declared in `pixi.toml` (`project.channels`, or
/// `workspace.channels` for newer manifests)
pub fn pixi_channels(manifest: &Path) -> Result<Vec<String>> {
    let content = fs::read_to_string(manifest)
        .with_context(|| format!("Failed to read {}", manifest.display()))?;
    let table: toml::Table = content
        .parse()
        .with_context(|| format!("Failed to parse {}", manifest.display()))?;
    let channels = ["project", "workspace"]
        .iter()
        .find_map(|section| table.get(*section)?.get("channels")?.as_array())
        .map(|items| {
            items
                .iter()
                .filter_map(|c| c.as_str().map(str::to_string))
                .collect()
        })
        .unwrap_or_default();
    Ok(channels)
}

fn create_package(ctx: &ActionContext<'_>, package: &str, test: bool) -> Result<()> {
    let output = ctx.tree.packages_dir();
    let work_dir = output.join("bld").join(format!("rattler-build_{package}"));
    if work_dir.exists() {
        fs::remove_dir_all(&work_dir)
            .with_context(|| format!("Failed to remove {}", work_dir.display()))?;
    }

    let mut command = CommandSpec::new("rattler-build")
        .args(["build", "--experimental", "--no-build-id", "-r"])
        .path_arg(&ctx.tree.recipe_dir(package))
        .arg("--output-dir")
        .path_arg(&output);
    if !test {
        command = command.arg("--no-test");
    }
    for channel in pixi_channels(&ctx.tree.pixi_manifest())? {
        command = command.args(["-c", channel.as_str()]);
    }
    command = command.arg("-c").arg(format!("file://{}", output.display()));

    ctx.runner
        .run_checked(&command.cwd(ctx.tree.root()))
        .with_context(|| format!("Failed to build package {package}"))?;
    Ok(())
}

/// Plan actions with their status, for display
pub fn plan_status(tree: &BuildTree) -> Result<Vec<PlanAction>> {
    state::load_actions(&tree.actions_file())
        .with_context(|| format!("No plan in {}", tree.root().display()))
}
