// SPDX-License-Identifier: AGPL-3.0-or-later
// SPDX-FileCopyrightText: 2025 Jonathan D.A. Jewell
//! Source control access for component repositories

use crate::runner::{CommandRunner, CommandSpec};
use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Local changes found in a working tree
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WorkingTreeStatus {
    /// Tracked files with uncommitted changes
    pub modified: Vec<String>,
    /// Files not known to git
    pub untracked: Vec<String>,
}

impl WorkingTreeStatus {
    /// Parse `git status --porcelain` output
    #[must_use]
    pub fn parse_porcelain(output: &str) -> Self {
        let mut status = Self::default();
        for line in output.lines() {
            if line.len() < 4 {
                continue;
            }
            let (code, path) = line.split_at(3);
            if code.starts_with("??") {
                status.untracked.push(path.to_string());
            } else {
                status.modified.push(path.to_string());
            }
        }
        status
    }

    /// True when there is nothing to commit
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.modified.is_empty() && self.untracked.is_empty()
    }

    /// Problems preventing a package build from `repo`, one message each
    #[must_use]
    pub fn errors(&self, repo: &Path) -> Vec<String> {
        let mut errors = Vec::new();
        if !self.modified.is_empty() {
            errors.push(format!("repository {} contains uncommitted files", repo.display()));
        }
        if !self.untracked.is_empty() {
            errors.push(format!("repository {} has untracked files", repo.display()));
        }
        errors
    }
}

/// Operations on component source repositories
pub trait SourceControl {
    /// Commit hash of HEAD
    fn changeset(&self, repo: &Path) -> Result<String>;

    /// Uncommitted and untracked files
    fn status(&self, repo: &Path) -> Result<WorkingTreeStatus>;

    /// Add `files`, commit them without hooks and push
    fn commit_and_push(&self, repo: &Path, files: &[PathBuf], message: &str) -> Result<()>;

    /// Clone `url` into `dest`, checking out `branch` when given
    fn clone_repo(&self, url: &str, branch: Option<&str>, dest: &Path) -> Result<()>;
}

/// Git implementation: reads with `gix`, writes with the `git` binary
pub struct Git<'a> {
    runner: &'a dyn CommandRunner,
}

impl<'a> Git<'a> {
    /// Git access running commands through `runner`
    pub fn new(runner: &'a dyn CommandRunner) -> Self {
        Self { runner }
    }

    fn git(repo: &Path) -> CommandSpec {
        CommandSpec::new("git").arg("-C").path_arg(repo)
    }
}

impl SourceControl for Git<'_> {
    fn changeset(&self, repo: &Path) -> Result<String> {
        let repository = gix::open(repo)
            .with_context(|| format!("Failed to open git repository {}", repo.display()))?;
        let head = repository
            .head_id()
            .with_context(|| format!("Failed to read HEAD of {}", repo.display()))?;
        let changeset = head.to_string();
        debug!("{} is at {}", repo.display(), changeset);
        Ok(changeset)
    }

    fn status(&self, repo: &Path) -> Result<WorkingTreeStatus> {
        let output = self
            .runner
            .run_checked(&Self::git(repo).args(["status", "--porcelain"]).capture())?;
        Ok(WorkingTreeStatus::parse_porcelain(&output.stdout))
    }

    fn commit_and_push(&self, repo: &Path, files: &[PathBuf], message: &str) -> Result<()> {
        let mut add = Self::git(repo).arg("add");
        for file in files {
            add = add.path_arg(file);
        }
        self.runner.run_checked(&add)?;
        self.runner
            .run_checked(&Self::git(repo).args(["commit", "-n", "-m", message]))?;
        self.runner.run_checked(&Self::git(repo).arg("push"))?;
        Ok(())
    }

    fn clone_repo(&self, url: &str, branch: Option<&str>, dest: &Path) -> Result<()> {
        let mut clone = CommandSpec::new("git").arg("clone");
        if let Some(branch) = branch {
            clone = clone.args(["--branch", branch]);
        }
        self.runner.run_checked(&clone.arg(url).path_arg(dest))?;
        Ok(())
    }
}

/// In-memory source control for unit tests
#[cfg(test)]
pub(crate) mod testing {
    use super::{SourceControl, WorkingTreeStatus};
    use anyhow::{bail, Result};
    use std::cell::RefCell;
    use std::collections::{HashMap, HashSet};
    use std::path::{Path, PathBuf};

    /// Repositories are identified by their directory name
    #[derive(Default)]
    pub struct FakeVcs {
        pub changesets: HashMap<String, String>,
        pub dirty: HashSet<String>,
        pub commits: RefCell<Vec<(PathBuf, Vec<PathBuf>, String)>>,
        pub clones: RefCell<Vec<(String, PathBuf)>>,
    }

    impl FakeVcs {
        pub fn with(changesets: &[(&str, &str)]) -> Self {
            Self {
                changesets: changesets
                    .iter()
                    .map(|(repo, commit)| ((*repo).to_string(), (*commit).to_string()))
                    .collect(),
                ..Self::default()
            }
        }

        fn key(repo: &Path) -> String {
            repo.file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default()
        }
    }

    impl SourceControl for FakeVcs {
        fn changeset(&self, repo: &Path) -> Result<String> {
            match self.changesets.get(&Self::key(repo)) {
                Some(commit) => Ok(commit.clone()),
                None => bail!("{} is not a git repository", repo.display()),
            }
        }

        fn status(&self, repo: &Path) -> Result<WorkingTreeStatus> {
            let mut status = WorkingTreeStatus::default();
            if self.dirty.contains(&Self::key(repo)) {
                status.modified.push("CMakeLists.txt".into());
            }
            Ok(status)
        }

        fn commit_and_push(&self, repo: &Path, files: &[PathBuf], message: &str) -> Result<()> {
            self.commits
                .borrow_mut()
                .push((repo.to_path_buf(), files.to_vec(), message.to_string()));
            Ok(())
        }

        fn clone_repo(&self, url: &str, _branch: Option<&str>, dest: &Path) -> Result<()> {
            self.clones.borrow_mut().push((url.to_string(), dest.to_path_buf()));
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runner::testing::RecordingRunner;
    use crate::runner::SystemRunner;
    use tempfile::TempDir;

    #[test]
    fn test_parse_porcelain() {
        let status = WorkingTreeStatus::parse_porcelain(" M src/lib.rs\n?? notes.txt\nA  new.rs\n");
        assert_eq!(status.modified, vec!["src/lib.rs", "new.rs"]);
        assert_eq!(status.untracked, vec!["notes.txt"]);
        assert!(!status.is_clean());
        assert_eq!(status.errors(Path::new("/src/soma")).len(), 2);
    }

    #[test]
    fn test_parse_porcelain_clean() {
        let status = WorkingTreeStatus::parse_porcelain("");
        assert!(status.is_clean());
        assert!(status.errors(Path::new("/src/soma")).is_empty());
    }

    #[test]
    fn test_commit_and_push_commands() {
        let runner = RecordingRunner::default();
        let git = Git::new(&runner);
        git.commit_and_push(
            Path::new("/src/soma"),
            &[PathBuf::from("info.py")],
            "bump version",
        )
        .unwrap();
        assert_eq!(
            runner.lines(),
            vec![
                "git -C /src/soma add info.py",
                "git -C /src/soma commit -n -m 'bump version'",
                "git -C /src/soma push",
            ]
        );
    }

    #[test]
    fn test_status_parses_git_output() {
        let runner = RecordingRunner::with_stdout(" M CMakeLists.txt\n?? build.log\n");
        let status = Git::new(&runner).status(Path::new("/src/aims-free")).unwrap();
        assert_eq!(status.modified, vec!["CMakeLists.txt"]);
        assert_eq!(status.untracked, vec!["build.log"]);
        assert_eq!(
            runner.lines(),
            vec!["git -C /src/aims-free status --porcelain"]
        );
        assert!(runner.calls.borrow()[0].capture);
    }

    #[test]
    fn test_changeset_reads_head() {
        let has_git = SystemRunner
            .run(&CommandSpec::new("git").arg("--version").capture())
            .is_ok_and(|o| o.success());
        if !has_git {
            return;
        }
        let dir = TempDir::new().unwrap();
        let repo = dir.path();
        let run = |args: &[&str]| {
            SystemRunner
                .run_checked(
                    &CommandSpec::new("git")
                        .arg("-C")
                        .path_arg(repo)
                        .args(args.iter().copied())
                        .capture(),
                )
                .unwrap()
        };
        run(&["init", "-q"]);
        std::fs::write(repo.join("file.txt"), "content").unwrap();
        run(&["add", "file.txt"]);
        run(&[
            "-c",
            "user.name=test",
            "-c",
            "user.email=test@example.org",
            "commit",
            "-q",
            "-m",
            "initial",
        ]);
        let expected = run(&["rev-parse", "HEAD"]).stdout.trim().to_string();

        let git = Git::new(&SystemRunner);
        assert_eq!(git.changeset(repo).unwrap(), expected);
        assert!(git.status(repo).unwrap().is_clean());

        std::fs::write(repo.join("other.txt"), "new").unwrap();
        assert_eq!(git.status(repo).unwrap().untracked, vec!["other.txt"]);
    }
}
