//! External program execution behind a trait so tests can script outcomes.
//!
//! Every interaction with AWS and the jumpbox goes through the system `aws`,
//! `ssh`, and `scp` binaries. [`CommandRunner`] is the seam: production code
//! uses [`ProcessCommandRunner`], tests use
//! [`ScriptedRunner`](crate::test_support::ScriptedRunner).

use std::ffi::OsString;
use std::process::{Command, Stdio};

use thiserror::Error;
use tracing::debug;

/// Result of running an external command.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct CommandOutput {
    /// Exit code reported by the process, if available.
    pub code: Option<i32>,
    /// Captured standard output.
    pub stdout: String,
    /// Captured standard error.
    pub stderr: String,
}

impl CommandOutput {
    /// Returns `true` when the exit code equals zero.
    #[must_use]
    pub const fn is_success(&self) -> bool {
        matches!(self.code, Some(0))
    }

    /// Renders the exit status for error messages.
    #[must_use]
    pub fn status_text(&self) -> String {
        self.code
            .map_or_else(|| String::from("unknown"), |code| code.to_string())
    }
}

/// Errors raised when a program cannot be executed at all.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum RunnerError {
    /// Raised when a command cannot be spawned.
    #[error("failed to spawn {program}: {message}")]
    Spawn {
        /// Command that failed to start.
        program: String,
        /// Operating system error string.
        message: String,
    },
}

/// Abstraction over command execution to support fakes in tests.
pub trait CommandRunner {
    /// Runs `program` with the given arguments, capturing stdout and stderr.
    ///
    /// # Errors
    ///
    /// Returns [`RunnerError::Spawn`] if the command cannot be started.
    fn run(&self, program: &str, args: &[OsString]) -> Result<CommandOutput, RunnerError>;

    /// Runs `program` attached to the current terminal and returns its exit
    /// code once it finishes.
    ///
    /// # Errors
    ///
    /// Returns [`RunnerError::Spawn`] if the command cannot be started.
    fn run_interactive(&self, program: &str, args: &[OsString])
    -> Result<Option<i32>, RunnerError>;
}

/// Real command runner that shells out to the host operating system.
///
/// Extra environment variables are layered over the inherited environment;
/// this is how explicit AWS credentials reach the `aws` child process.
#[derive(Clone, Debug, Default)]
pub struct ProcessCommandRunner {
    env: Vec<(String, String)>,
}

impl ProcessCommandRunner {
    /// Creates a runner that inherits the parent environment unchanged.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a runner that adds `env` to every child process.
    #[must_use]
    pub const fn with_env(env: Vec<(String, String)>) -> Self {
        Self { env }
    }

    fn command(&self, program: &str, args: &[OsString]) -> Command {
        let mut command = Command::new(program);
        command.args(args);
        for (key, value) in &self.env {
            command.env(key, value);
        }
        command
    }
}

impl CommandRunner for ProcessCommandRunner {
    fn run(&self, program: &str, args: &[OsString]) -> Result<CommandOutput, RunnerError> {
        debug!(program, args = ?args, "running command");
        let output = self
            .command(program, args)
            .stdin(Stdio::null())
            .output()
            .map_err(|err| RunnerError::Spawn {
                program: program.to_owned(),
                message: err.to_string(),
            })?;

        Ok(CommandOutput {
            code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }

    fn run_interactive(
        &self,
        program: &str,
        args: &[OsString],
    ) -> Result<Option<i32>, RunnerError> {
        debug!(program, args = ?args, "running interactive command");
        let status = self
            .command(program, args)
            .stdin(Stdio::inherit())
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit())
            .status()
            .map_err(|err| RunnerError::Spawn {
                program: program.to_owned(),
                message: err.to_string(),
            })?;
        Ok(status.code())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(Some(0), true)]
    #[case(Some(2), false)]
    #[case(None, false)]
    fn is_success_requires_zero_exit(#[case] code: Option<i32>, #[case] expected: bool) {
        let output = CommandOutput {
            code,
            stdout: String::new(),
            stderr: String::new(),
        };
        assert_eq!(output.is_success(), expected);
    }

    #[test]
    fn status_text_reports_unknown_without_code() {
        let output = CommandOutput {
            code: None,
            stdout: String::new(),
            stderr: String::new(),
        };
        assert_eq!(output.status_text(), "unknown");
    }

    #[test]
    fn run_reports_spawn_failure() {
        let runner = ProcessCommandRunner::new();
        let err = runner
            .run("/nonexistent/jumpbox-test-binary", &[])
            .expect_err("missing binary should fail to spawn");
        assert!(matches!(err, RunnerError::Spawn { .. }));
    }

    #[cfg(unix)]
    #[test]
    fn run_forwards_extra_environment() {
        let runner = ProcessCommandRunner::with_env(vec![(
            String::from("JUMPBOX_RUNNER_VALUE"),
            String::from("forwarded"),
        )]);
        let output = runner
            .run(
                "sh",
                &[
                    OsString::from("-c"),
                    OsString::from("printf %s \"$JUMPBOX_RUNNER_VALUE\""),
                ],
            )
            .expect("sh should run");
        assert!(output.is_success());
        assert_eq!(output.stdout, "forwarded");
    }
}
