//! Remote bootstrap of the jumpbox.
//!
//! Once the host answers over SSH the artifacts are uploaded, installed,
//! session credentials and the connection summary are printed, and finally
//! the platform installer takes over the terminal.

mod config;

use std::io::{self, Write};

use camino::Utf8Path;
use shell_escape::unix::escape;
use thiserror::Error;
use tracing::info;

use crate::cloud::CloudApi;
use crate::credentials::{ConnectionSummary, CredentialsError, SessionCredentials};
use crate::process::CommandRunner;
use crate::remote::{RemoteError, RemoteHost};
use crate::wait::Waiter;

pub use config::BootstrapConfig;

/// Errors raised while bootstrapping the jumpbox.
#[derive(Debug, Error)]
pub enum BootstrapError {
    /// Raised when the host cannot be reached or a command fails.
    #[error(transparent)]
    Remote(#[from] RemoteError),
    /// Raised when session credentials cannot be issued.
    #[error(transparent)]
    Credentials(#[from] CredentialsError),
    /// Raised when the configured artifact directory does not exist.
    #[error("artifact directory {path} does not exist or is not a directory")]
    MissingArtifacts {
        /// Configured directory.
        path: String,
    },
    /// Raised when the summary cannot be written.
    #[error("failed to print connection details: {0}")]
    Output(String),
}

impl From<io::Error> for BootstrapError {
    fn from(value: io::Error) -> Self {
        Self::Output(value.to_string())
    }
}

/// How the bootstrap ended.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum BootstrapOutcome {
    /// Everything ran; no installer was launched.
    Ready,
    /// The installer ran and exited with this code, if it reported one.
    InstallerExited(Option<i32>),
}

/// Drives the bootstrap steps against one host.
pub struct Bootstrapper<'a, C: CloudApi, R: CommandRunner> {
    cloud: &'a C,
    remote: &'a RemoteHost<R>,
    config: &'a BootstrapConfig,
    waiter: &'a Waiter,
}

impl<'a, C: CloudApi, R: CommandRunner> Bootstrapper<'a, C, R> {
    /// Creates a bootstrapper.
    #[must_use]
    pub const fn new(
        cloud: &'a C,
        remote: &'a RemoteHost<R>,
        config: &'a BootstrapConfig,
        waiter: &'a Waiter,
    ) -> Self {
        Self {
            cloud,
            remote,
            config,
            waiter,
        }
    }

    /// Runs every configured step, writing credentials and the summary to
    /// `out`. The installer is skipped when `skip_installer` is set.
    ///
    /// # Errors
    ///
    /// Returns [`BootstrapError`] on the first failing step.
    pub async fn run<W: Write>(
        &self,
        region: &str,
        summary: &ConnectionSummary,
        out: &mut W,
        skip_installer: bool,
    ) -> Result<BootstrapOutcome, BootstrapError> {
        self.remote.wait_until_ready(self.waiter).await?;

        let remote_dir = self.config.remote_dir.trim();
        if let Some(artifacts) = self.config.artifact_dir.as_deref() {
            let path = Utf8Path::new(artifacts);
            if !path.is_dir() {
                return Err(BootstrapError::MissingArtifacts {
                    path: artifacts.to_owned(),
                });
            }
            self.remote.upload(path, remote_dir)?;
        }

        if let Some(command) = self.config.install_command.as_deref() {
            info!(command, "running install command");
            self.remote.run_in(remote_dir, command)?;
        }

        let credentials =
            SessionCredentials::request(self.cloud, self.config.session_duration_secs)?;
        writeln!(out, "# session credentials (expire {})", credentials.expiration)?;
        write!(out, "{}", credentials.export_lines(region))?;
        writeln!(out)?;
        write!(out, "{summary}")?;
        out.flush()?;

        let Some(installer) = self.config.installer_command.as_deref() else {
            return Ok(BootstrapOutcome::Ready);
        };
        if skip_installer {
            info!("installer launch skipped");
            return Ok(BootstrapOutcome::Ready);
        }
        let command = format!("cd {} && {installer}", escape(remote_dir.into()));
        let code = self.remote.launch_interactive(&command)?;
        info!(code = ?code, "installer exited");
        Ok(BootstrapOutcome::InstallerExited(code))
    }
}
