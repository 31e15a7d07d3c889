//! Orchestrates `jumpbox up`: network, host, then remote bootstrap.
//!
//! Every step is resumable. A failed run leaves its records behind and the
//! next run with the same tag reuses them, creating only what is missing.

use std::io::Write;

use thiserror::Error;
use tracing::info;

use crate::bootstrap::{BootstrapConfig, BootstrapError, BootstrapOutcome, Bootstrapper};
use crate::cloud::CloudApi;
use crate::context::InstallationContext;
use crate::credentials::ConnectionSummary;
use crate::jumpbox::{HostConfig, JumpboxError, JumpboxProvisioner};
use crate::network::{NetworkError, NetworkProvisioner};
use crate::process::CommandRunner;
use crate::provisioner::Provisioner;
use crate::remote::{RemoteConfig, RemoteHost};
use crate::topology::NetworkSettings;
use crate::wait::Waiter;

/// Errors surfaced by `jumpbox up`.
#[derive(Debug, Error)]
pub enum UpError {
    /// Raised when the network cannot be built.
    #[error("network provisioning failed: {0}")]
    Network(#[from] NetworkError),
    /// Raised when the jumpbox host cannot be created.
    #[error("jumpbox provisioning failed: {0}")]
    Jumpbox(#[from] JumpboxError),
    /// Raised when the host cannot be bootstrapped.
    #[error("bootstrap failed: {0}")]
    Bootstrap(#[from] BootstrapError),
}

/// Everything `up` needs besides the cloud and the runner.
#[derive(Clone, Debug)]
pub struct UpSettings {
    /// Network layout.
    pub network: NetworkSettings,
    /// Jumpbox host.
    pub host: HostConfig,
    /// SSH client options.
    pub remote: RemoteConfig,
    /// Bootstrap steps.
    pub bootstrap: BootstrapConfig,
}

/// Runs the `up` workflow.
pub struct UpOrchestrator<'a, C: CloudApi, R: CommandRunner + Clone> {
    cloud: &'a C,
    context: &'a InstallationContext,
    settings: &'a UpSettings,
    waiter: &'a Waiter,
    runner: R,
}

impl<'a, C: CloudApi, R: CommandRunner + Clone> UpOrchestrator<'a, C, R> {
    /// Creates an orchestrator; `runner` drives `ssh` and `scp`.
    #[must_use]
    pub const fn new(
        cloud: &'a C,
        context: &'a InstallationContext,
        settings: &'a UpSettings,
        waiter: &'a Waiter,
        runner: R,
    ) -> Self {
        Self {
            cloud,
            context,
            settings,
            waiter,
            runner,
        }
    }

    /// Ensures the network and the host, then bootstraps the host, writing
    /// credentials and the connection summary to `out`.
    ///
    /// # Errors
    ///
    /// Returns [`UpError`] for the first step that fails.
    pub async fn execute<W: Write>(
        &self,
        out: &mut W,
        skip_installer: bool,
    ) -> Result<BootstrapOutcome, UpError> {
        let provisioner = Provisioner::new(self.cloud, self.context);

        let network = NetworkProvisioner::new(&provisioner, &self.settings.network, self.waiter)
            .apply()
            .await?;
        info!(vpc = %network.vpc_id, "network ready");

        let jumpbox = JumpboxProvisioner::new(&provisioner, &self.settings.host, self.waiter)
            .apply(&network)
            .await?;

        let remote = RemoteHost::new(
            self.settings.remote.clone(),
            self.runner.clone(),
            jumpbox.public_ip.clone(),
            jumpbox.key_path.clone(),
        );
        let summary = ConnectionSummary {
            tag: self.context.tag().to_string(),
            region: self.context.region().to_owned(),
            vpc_id: network.vpc_id.clone(),
            private_subnet_ids: network.private_subnet_ids.clone(),
            transit_gateway_id: network.transit_gateway_id.clone(),
            jumpbox_address: jumpbox.public_ip.clone(),
            ssh_command: remote.login_command(),
        };

        let outcome = Bootstrapper::new(self.cloud, &remote, &self.settings.bootstrap, self.waiter)
            .run(self.context.region(), &summary, out, skip_installer)
            .await?;
        Ok(outcome)
    }
}
