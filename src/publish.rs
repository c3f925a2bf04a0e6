// SPDX-License-Identifier: AGPL-3.0-or-later
// SPDX-FileCopyrightText: 2025 Jonathan D.A. Jewell
//! Channel publication
//!
//! Built packages are copied into a channel directory together with the
//! release history of the environment (`soma-forge-<environment>.json`).
//!
//! A local channel is updated in place and rolled back on failure. A remote
//! channel (`host:/path`) is never modified in place: the channel is
//! hardlink-copied to a staging directory, the new files are synced into the
//! copy, and the copy replaces the channel with two renames.

use crate::runner::{CommandRunner, CommandSpec};
use crate::state::write_json;
use crate::types::History;
use anyhow::{bail, Context, Result};
use regex::Regex;
use sha2::{Digest, Sha256};
use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Subdirectories of a channel searched for package files
pub const PLATFORM_DIRS: [&str; 2] = ["linux-64", "noarch"];

/// Where packages are published
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Target {
    /// Directory on this machine
    Local(PathBuf),
    /// Directory on a host reachable with ssh and rsync
    Remote {
        /// ssh destination (`user@host` or `host`)
        host: String,
        /// Channel directory on the host
        path: String,
    },
}

impl Target {
    /// Parse `host:/path` (remote) or a plain path (local)
    #[must_use]
    pub fn parse(target: &str) -> Self {
        match target.split_once(':') {
            Some((host, path)) if !host.is_empty() && !host.contains('/') && !path.is_empty() => {
                Self::Remote {
                    host: host.to_string(),
                    path: path.to_string(),
                }
            }
            _ => Self::Local(PathBuf::from(target)),
        }
    }
}

/// What to publish
#[derive(Debug, Clone)]
pub struct PublishRequest<'a> {
    /// Environment name
    pub environment: &'a str,
    /// `host:/path` or a local directory
    pub target: &'a str,
    /// Directory holding built packages (`linux-64/`, `noarch/`)
    pub packages_dir: &'a Path,
    /// Packages to publish
    pub packages: &'a [String],
    /// Release history to write next to the packages
    pub release_history: &'a History,
    /// Run `conda index` on the channel
    pub index: bool,
    /// Overwrite existing package files whose content differs
    pub force: bool,
}

/// A file copied into the channel
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishedFile {
    /// Path relative to the channel root
    pub relative: PathBuf,
    /// SHA-256 of the content, hex encoded
    pub sha256: String,
}

/// Release history file name of an environment
#[must_use]
pub fn release_history_name(environment: &str) -> String {
    format!("soma-forge-{environment}.json")
}

/// The single `<package>-X.Y.Z-*.conda` file of each package
pub fn find_package_files(packages_dir: &Path, packages: &[String]) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for package in packages {
        let re = Regex::new(&format!(r"^{}-\d+\.\d+\.\d+-.+\.conda$", regex::escape(package)))
            .with_context(|| format!("Invalid package name {package}"))?;
        let mut candidates = Vec::new();
        for platform in PLATFORM_DIRS {
            let dir = packages_dir.join(platform);
            if !dir.is_dir() {
                continue;
            }
            for entry in fs::read_dir(&dir).with_context(|| format!("Failed to read {}", dir.display()))? {
                let entry = entry?;
                if re.is_match(&entry.file_name().to_string_lossy()) {
                    candidates.push(entry.path());
                }
            }
        }
        candidates.sort();
        match candidates.len() {
            0 => bail!("No package file found for {} in {}", package, packages_dir.display()),
            1 => files.append(&mut candidates),
            _ => bail!(
                "Several package files found for {}: {}",
                package,
                candidates
                    .iter()
                    .map(|p| p.display().to_string())
                    .collect::<Vec<_>>()
                    .join(", ")
            ),
        }
    }
    Ok(files)
}

/// SHA-256 of a file, hex encoded
pub fn sha256_file(path: &Path) -> Result<String> {
    let mut file = fs::File::open(path).with_context(|| format!("Failed to open {}", path.display()))?;
    let mut hasher = Sha256::new();
    let mut buffer = [0u8; 64 * 1024];
    loop {
        let read = file
            .read(&mut buffer)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        if read == 0 {
            break;
        }
        hasher.update(&buffer[..read]);
    }
    Ok(hex::encode(hasher.finalize()))
}

/// Publish packages to a channel
pub fn publish(runner: &dyn CommandRunner, request: &PublishRequest<'_>) -> Result<Vec<PublishedFile>> {
    let files = find_package_files(request.packages_dir, request.packages)?;
    let mut published = Vec::with_capacity(files.len());
    for file in &files {
        let relative = file
            .strip_prefix(request.packages_dir)
            .with_context(|| format!("{} is outside of {}", file.display(), request.packages_dir.display()))?
            .to_path_buf();
        let sha256 = sha256_file(file)?;
        info!("{} sha256:{}", relative.display(), sha256);
        published.push(PublishedFile { relative, sha256 });
    }

    match Target::parse(request.target) {
        Target::Local(dir) => publish_local(runner, &dir, request, &published)?,
        Target::Remote { host, path } => publish_remote(runner, &host, &path, request, &published)?,
    }
    Ok(published)
}

fn publish_local(
    runner: &dyn CommandRunner,
    channel: &Path,
    request: &PublishRequest<'_>,
    files: &[PublishedFile],
) -> Result<()> {
    let history_file = channel.join(release_history_name(request.environment));
    let backup_file = channel.join(format!("{}.backup", release_history_name(request.environment)));
    let mut copied = Vec::new();
    let mut backup = false;

    let result = copy_local(runner, channel, request, files, &history_file, &backup_file, &mut copied, &mut backup);

    if let Err(error) = result {
        for file in copied.iter().rev() {
            if let Err(e) = fs::remove_file(file) {
                warn!("Cannot remove {}: {}", file.display(), e);
            }
        }
        if backup {
            if let Err(e) = fs::rename(&backup_file, &history_file) {
                warn!("Cannot restore {}: {}", history_file.display(), e);
            }
        }
        return Err(error);
    }

    if backup {
        fs::remove_file(&backup_file)
            .with_context(|| format!("Failed to remove {}", backup_file.display()))?;
    }
    Ok(())
}

#[allow(clippy::too_many_arguments)]
fn copy_local(
    runner: &dyn CommandRunner,
    channel: &Path,
    request: &PublishRequest<'_>,
    files: &[PublishedFile],
    history_file: &Path,
    backup_file: &Path,
    copied: &mut Vec<PathBuf>,
    backup: &mut bool,
) -> Result<()> {
    for file in files {
        let src = request.packages_dir.join(&file.relative);
        let dest = channel.join(&file.relative);
        if dest.exists() {
            if sha256_file(&dest)? == file.sha256 {
                info!("{} is already published", dest.display());
                continue;
            }
            if !request.force {
                bail!("Destination file {} already exists with different content", dest.display());
            }
        }
        info!("{} -> {}", src.display(), dest.display());
        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directory {}", parent.display()))?;
        }
        copied.push(dest.clone());
        fs::copy(&src, &dest)
            .with_context(|| format!("Failed to copy {} to {}", src.display(), dest.display()))?;
    }

    if history_file.exists() {
        fs::rename(history_file, backup_file)
            .with_context(|| format!("Failed to back up {}", history_file.display()))?;
        *backup = true;
    }
    copied.push(history_file.to_path_buf());
    write_json(history_file, request.release_history)?;

    if request.index {
        runner.run_checked(&CommandSpec::new("conda").arg("index").path_arg(channel))?;
    }
    Ok(())
}

fn quote(path: &str) -> String {
    shell_words::quote(path).into_owned()
}

fn ssh(runner: &dyn CommandRunner, host: &str, script: &str) -> Result<()> {
    runner.run_checked(&CommandSpec::new("ssh").arg(host).arg(script))?;
    Ok(())
}

fn publish_remote(
    runner: &dyn CommandRunner,
    host: &str,
    channel: &str,
    request: &PublishRequest<'_>,
    files: &[PublishedFile],
) -> Result<()> {
    let channel = channel.trim_end_matches('/');
    let staging = format!("{channel}.staging");
    let old = format!("{channel}.old");

    let mut prepare = vec![
        format!("mkdir -p {}", quote(channel)),
        format!("rm -rf {}", quote(&staging)),
        format!("cp -al {} {}", quote(channel), quote(&staging)),
    ];
    for platform in PLATFORM_DIRS {
        prepare.push(format!("mkdir -p {}", quote(&format!("{staging}/{platform}"))));
    }
    ssh(runner, host, &prepare.join(" && "))?;

    if let Err(error) = fill_staging(runner, host, &staging, request, files) {
        if let Err(e) = ssh(runner, host, &format!("rm -rf {}", quote(&staging))) {
            warn!("Cannot remove {}:{}: {:#}", host, staging, e);
        }
        return Err(error);
    }

    let swap = [
        format!("rm -rf {}", quote(&old)),
        format!("mv {} {}", quote(channel), quote(&old)),
        format!("mv {} {}", quote(&staging), quote(channel)),
        format!("rm -rf {}", quote(&old)),
    ];
    ssh(runner, host, &swap.join(" && "))
        .with_context(|| format!("Failed to swap {host}:{channel} with its staging copy"))
}

fn fill_staging(
    runner: &dyn CommandRunner,
    host: &str,
    staging: &str,
    request: &PublishRequest<'_>,
    files: &[PublishedFile],
) -> Result<()> {
    for file in files {
        let remote = format!("{staging}/{}", file.relative.display());
        let existing = runner.run_checked(
            &CommandSpec::new("ssh")
                .arg(host)
                .arg(format!("if [ -e {0} ]; then sha256sum {0}; fi", quote(&remote)))
                .capture(),
        )?;
        if let Some(sha256) = existing.stdout.split_whitespace().next() {
            if sha256 == file.sha256 {
                info!("{}:{} is already published", host, remote);
                continue;
            }
            if !request.force {
                bail!("Destination file {host}:{remote} already exists with different content");
            }
        }
        info!("{} -> {}:{}", file.relative.display(), host, remote);
        runner.run_checked(
            &CommandSpec::new("rsync")
                .arg("-a")
                .path_arg(&request.packages_dir.join(&file.relative))
                .arg(format!("{host}:{remote}")),
        )?;
    }

    let tmp = tempfile::tempdir().context("Failed to create temporary directory")?;
    let history_name = release_history_name(request.environment);
    let local_history = tmp.path().join(&history_name);
    write_json(&local_history, request.release_history)?;
    runner.run_checked(
        &CommandSpec::new("rsync")
            .arg("-a")
            .path_arg(&local_history)
            .arg(format!("{host}:{staging}/{history_name}")),
    )?;

    if request.index {
        ssh(runner, host, &format!("conda index {}", quote(staging)))?;
    }
    Ok(())
}
