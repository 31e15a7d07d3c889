//! SSH and SCP access to the jumpbox.
//!
//! All traffic goes through the system clients with batch mode on and an
//! explicit identity file, so no interactive prompt can stall a run.

mod config;

use std::ffi::OsString;

use camino::{Utf8Path, Utf8PathBuf};
use shell_escape::unix::escape;
use thiserror::Error;
use tracing::{debug, info};

use crate::process::{CommandOutput, CommandRunner, RunnerError};
use crate::wait::{Poll, WaitError, Waiter};

pub use config::RemoteConfig;

/// Marker echoed by the readiness check.
pub const READY_MARKER: &str = "up-and-running";

/// Errors raised while talking to the jumpbox.
#[derive(Debug, Error)]
pub enum RemoteError {
    /// Raised when `ssh` or `scp` cannot be started.
    #[error(transparent)]
    Runner(#[from] RunnerError),
    /// Raised when a remote command exits unsuccessfully.
    #[error("remote command `{command}` failed with status {status}: {stderr}")]
    CommandFailed {
        /// Command as sent to the host.
        command: String,
        /// Exit status text.
        status: String,
        /// Captured standard error.
        stderr: String,
    },
    /// Raised when an upload fails.
    #[error("upload of {source_dir} failed with status {status}: {stderr}")]
    UploadFailed {
        /// Local directory being copied.
        source_dir: Utf8PathBuf,
        /// Exit status text.
        status: String,
        /// Captured standard error.
        stderr: String,
    },
    /// Raised when the host never answers the readiness check.
    #[error(transparent)]
    NotReady(#[from] WaitError),
}

/// A reachable jumpbox.
#[derive(Clone, Debug)]
pub struct RemoteHost<R: CommandRunner> {
    config: RemoteConfig,
    runner: R,
    address: String,
    key_path: Utf8PathBuf,
}

impl<R: CommandRunner> RemoteHost<R> {
    /// Creates a handle for `address`, authenticating with `key_path`.
    #[must_use]
    pub fn new(
        config: RemoteConfig,
        runner: R,
        address: impl Into<String>,
        key_path: impl Into<Utf8PathBuf>,
    ) -> Self {
        Self {
            config,
            runner,
            address: address.into(),
            key_path: key_path.into(),
        }
    }

    /// `user@address` for the host.
    #[must_use]
    pub fn destination(&self) -> String {
        format!("{}@{}", self.config.ssh_user, self.address)
    }

    /// Copy-pasteable interactive login command.
    #[must_use]
    pub fn login_command(&self) -> String {
        let mut parts = vec![self.config.ssh_bin.clone()];
        parts.extend(
            self.client_options("-p")
                .iter()
                .map(|arg| escape(arg.to_string_lossy()).into_owned()),
        );
        parts.push(self.destination());
        parts.join(" ")
    }

    /// Options shared by `ssh` and `scp`; `port_flag` is `-p` or `-P`.
    fn client_options(&self, port_flag: &str) -> Vec<OsString> {
        let strict = if self.config.ssh_strict_host_key_checking {
            "yes"
        } else {
            "no"
        };
        vec![
            OsString::from("-i"),
            OsString::from(self.key_path.as_str()),
            OsString::from(port_flag),
            OsString::from(self.config.ssh_port.to_string()),
            OsString::from("-o"),
            OsString::from("BatchMode=yes"),
            OsString::from("-o"),
            OsString::from(format!("StrictHostKeyChecking={strict}")),
            OsString::from("-o"),
            OsString::from(format!(
                "UserKnownHostsFile={}",
                self.config.ssh_known_hosts_file
            )),
            OsString::from("-o"),
            OsString::from(format!(
                "ConnectTimeout={}",
                self.config.connect_timeout_secs
            )),
        ]
    }

    fn ssh_args(&self, command: &str, tty: bool) -> Vec<OsString> {
        let mut args = Vec::new();
        if tty {
            args.push(OsString::from("-t"));
        }
        args.extend(self.client_options("-p"));
        args.push(OsString::from(self.destination()));
        args.push(OsString::from("--"));
        args.push(OsString::from(command));
        args
    }

    /// Runs `command` through the remote login shell.
    ///
    /// # Errors
    ///
    /// Returns [`RemoteError::CommandFailed`] for a non-zero exit and
    /// [`RemoteError::Runner`] when `ssh` cannot be started.
    pub fn run(&self, command: &str) -> Result<CommandOutput, RemoteError> {
        debug!(host = %self.address, command, "running remote command");
        let output = self
            .runner
            .run(&self.config.ssh_bin, &self.ssh_args(command, false))?;
        if output.is_success() {
            return Ok(output);
        }
        Err(RemoteError::CommandFailed {
            command: command.to_owned(),
            status: output.status_text(),
            stderr: output.stderr.trim().to_owned(),
        })
    }

    /// Runs `command` in `directory` (created if missing).
    ///
    /// # Errors
    ///
    /// See [`RemoteHost::run`].
    pub fn run_in(&self, directory: &str, command: &str) -> Result<CommandOutput, RemoteError> {
        let dir = escape(directory.into());
        self.run(&format!("mkdir -p {dir} && cd {dir} && {command}"))
    }

    /// Replaces `remote_dir` with a copy of `local_dir`.
    ///
    /// # Errors
    ///
    /// Returns [`RemoteError::UploadFailed`] when `scp` fails, plus the errors
    /// of [`RemoteHost::run`] for the preparation step.
    pub fn upload(&self, local_dir: &Utf8Path, remote_dir: &str) -> Result<(), RemoteError> {
        let target = escape(remote_dir.into());
        self.run(&format!(
            "rm -rf {target} && mkdir -p \"$(dirname {target})\""
        ))?;

        info!(source = %local_dir, target = remote_dir, "uploading artifacts");
        let mut args = vec![OsString::from("-r")];
        args.extend(self.client_options("-P"));
        args.push(OsString::from(local_dir.as_str()));
        args.push(OsString::from(format!("{}:{remote_dir}", self.destination())));
        let output = self.runner.run(&self.config.scp_bin, &args)?;
        if output.is_success() {
            return Ok(());
        }
        Err(RemoteError::UploadFailed {
            source_dir: local_dir.to_path_buf(),
            status: output.status_text(),
            stderr: output.stderr.trim().to_owned(),
        })
    }

    /// Whether the host answers the readiness echo.
    ///
    /// # Errors
    ///
    /// Returns [`RemoteError`] when the check cannot run or fails.
    pub fn answers_echo(&self) -> Result<bool, RemoteError> {
        let output = self.run(&format!("echo {READY_MARKER}"))?;
        Ok(output.stdout.contains(READY_MARKER))
    }

    /// Checks until the host answers or the waiter gives up.
    ///
    /// # Errors
    ///
    /// Returns [`RemoteError::NotReady`] on timeout or cancellation.
    pub async fn wait_until_ready(&self, waiter: &Waiter) -> Result<(), RemoteError> {
        waiter
            .until("SSH on the jumpbox", || {
                self.answers_echo().map(|ready| {
                    if ready {
                        Poll::Ready(())
                    } else {
                        Poll::Pending(String::from("unexpected echo output"))
                    }
                })
            })
            .await?;
        info!(host = %self.address, "jumpbox reachable over SSH");
        Ok(())
    }

    /// Runs `command` on an interactive terminal and returns its exit code.
    ///
    /// # Errors
    ///
    /// Returns [`RemoteError::Runner`] when `ssh` cannot be started.
    pub fn launch_interactive(&self, command: &str) -> Result<Option<i32>, RemoteError> {
        info!(host = %self.address, command, "launching interactive session");
        Ok(self
            .runner
            .run_interactive(&self.config.ssh_bin, &self.ssh_args(command, true))?)
    }
}
