// SPDX-License-Identifier: AGPL-3.0-or-later
// SPDX-FileCopyrightText: 2025 Jonathan D.A. Jewell
//! External command execution
//!
//! Every external tool (`pixi`, `rattler-build`, `git`, `conda`, `rsync`,
//! `ssh`) is driven through [`CommandRunner`], so orchestration code can be
//! exercised with a recording runner in tests.

use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use thiserror::Error;
use tracing::{debug, info};

/// A command line to run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    /// Program name or path
    pub program: String,
    /// Arguments
    pub args: Vec<String>,
    /// Working directory
    pub cwd: Option<PathBuf>,
    /// Capture stdout/stderr instead of inheriting the terminal
    pub capture: bool,
}

impl CommandSpec {
    /// New command with no arguments; output is inherited
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            cwd: None,
            capture: false,
        }
    }

    /// Append one argument
    #[must_use]
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Append a path argument
    #[must_use]
    pub fn path_arg(self, path: &Path) -> Self {
        self.arg(path.display().to_string())
    }

    /// Append several arguments
    #[must_use]
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Run in `dir`
    #[must_use]
    pub fn cwd(mut self, dir: &Path) -> Self {
        self.cwd = Some(dir.to_path_buf());
        self
    }

    /// Capture output
    #[must_use]
    pub fn capture(mut self) -> Self {
        self.capture = true;
        self
    }

    /// Shell-quoted command line, for logs and error messages
    #[must_use]
    pub fn command_line(&self) -> String {
        let mut words = Vec::with_capacity(self.args.len() + 1);
        words.push(self.program.as_str());
        words.extend(self.args.iter().map(String::as_str));
        shell_words::join(words)
    }
}

/// Result of a finished command
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    /// Exit code (`None` when killed by a signal)
    pub code: Option<i32>,
    /// Captured stdout (empty when inherited)
    pub stdout: String,
    /// Captured stderr (empty when inherited)
    pub stderr: String,
}

impl CommandOutput {
    /// True when the command exited with code 0
    #[must_use]
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }
}

/// Command execution failures
#[derive(Debug, Error)]
pub enum CommandError {
    /// The program could not be started
    #[error("failed to run `{command}`: {source}")]
    Spawn {
        /// Rendered command line
        command: String,
        /// Underlying error
        #[source]
        source: std::io::Error,
    },

    /// The program exited with a non-zero code
    #[error("command `{command}` failed with {}{}", exit_description(.code), stderr_suffix(.stderr))]
    Failed {
        /// Rendered command line
        command: String,
        /// Exit code
        code: Option<i32>,
        /// Captured stderr
        stderr: String,
    },
}

fn exit_description(code: &Option<i32>) -> String {
    match *code {
        Some(c) => format!("exit code {c}"),
        None => "a signal".to_string(),
    }
}

fn stderr_suffix(stderr: &str) -> String {
    let stderr = stderr.trim();
    if stderr.is_empty() {
        String::new()
    } else {
        format!(": {stderr}")
    }
}

/// Something that can run external commands
pub trait CommandRunner {
    /// Run a command and return its output whatever the exit code
    fn run(&self, spec: &CommandSpec) -> Result<CommandOutput, CommandError>;

    /// Run a command and fail on a non-zero exit code
    fn run_checked(&self, spec: &CommandSpec) -> Result<CommandOutput, CommandError> {
        let output = self.run(spec)?;
        if output.success() {
            Ok(output)
        } else {
            Err(CommandError::Failed {
                command: spec.command_line(),
                code: output.code,
                stderr: output.stderr,
            })
        }
    }
}

/// Runs commands with `std::process::Command`
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemRunner;

impl CommandRunner for SystemRunner {
    fn run(&self, spec: &CommandSpec) -> Result<CommandOutput, CommandError> {
        let command_line = spec.command_line();
        if spec.capture {
            debug!("$ {}", command_line);
        } else {
            info!("$ {}", command_line);
        }

        let mut command = Command::new(&spec.program);
        command.args(&spec.args);
        if let Some(cwd) = &spec.cwd {
            command.current_dir(cwd);
        }

        let spawn_error = |source| CommandError::Spawn {
            command: command_line.clone(),
            source,
        };

        if spec.capture {
            let output = command
                .stdin(Stdio::null())
                .output()
                .map_err(spawn_error)?;
            Ok(CommandOutput {
                code: output.status.code(),
                stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
                stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            })
        } else {
            let status = command.status().map_err(spawn_error)?;
            Ok(CommandOutput {
                code: status.code(),
                ..CommandOutput::default()
            })
        }
    }
}


#[cfg(test)]
mod tests {
    use super::testing::RecordingRunner;
    use super::*;

    #[test]
    fn test_command_line_quoting() {
        let spec = CommandSpec::new("ssh")
            .arg("host")
            .arg("cp -al '/srv/channel' /srv/.staging");
        assert_eq!(
            spec.command_line(),
            r#"ssh host 'cp -al '\''/srv/channel'\'' /srv/.staging'"#
        );
    }

    #[test]
    fn test_run_checked_failure() {
        let runner = RecordingRunner::failing_on("false");
        let err = runner
            .run_checked(&CommandSpec::new("false").arg("x"))
            .unwrap_err();
        let message = err.to_string();
        assert!(message.contains("`false x`"));
        assert!(message.contains("exit code 1"));
        assert!(message.contains("boom"));
    }

    #[test]
    fn test_system_runner_captures() {
        let output = SystemRunner
            .run_checked(&CommandSpec::new("sh").args(["-c", "echo hello"]).capture())
            .unwrap();
        assert_eq!(output.stdout.trim(), "hello");
    }

    #[test]
    fn test_system_runner_exit_code() {
        let output = SystemRunner
            .run(&CommandSpec::new("sh").args(["-c", "exit 3"]).capture())
            .unwrap();
        assert_eq!(output.code, Some(3));
        assert!(!output.success());
    }

    #[test]
    fn test_system_runner_missing_program() {
        let err = SystemRunner
            .run(&CommandSpec::new("soma-forge-no-such-program").capture())
            .unwrap_err();
        assert!(matches!(err, CommandError::Spawn { .. }));
    }
}
