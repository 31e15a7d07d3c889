//! Command-line interface definitions for the `jumpbox` binary.
//!
//! This module centralises the clap parser structures so both the main binary
//! and the build script can reuse them when generating the manual page.

use clap::{Args, Parser, Subcommand};

/// Top-level CLI for the `jumpbox` binary.
#[derive(Debug, Parser)]
#[command(
    name = "jumpbox",
    version,
    about = "Provision an AWS VPC with a transit gateway and a bootstrapped jumpbox host",
    arg_required_else_help = true
)]
pub(crate) struct Cli {
    /// Options shared by every subcommand.
    #[command(flatten)]
    pub(crate) global: GlobalArgs,
    /// Action to perform.
    #[command(subcommand)]
    pub(crate) command: Command,
}

/// Options shared by every subcommand.
#[derive(Debug, Args)]
pub(crate) struct GlobalArgs {
    /// Installation tag naming the state directory and every AWS resource.
    #[arg(long, global = true, value_name = "TAG")]
    pub(crate) tag: Option<String>,
    /// AWS region to operate in.
    #[arg(long, global = true, value_name = "REGION")]
    pub(crate) region: Option<String>,
    /// AWS CLI profile used when no explicit keys are configured.
    #[arg(long, global = true, value_name = "PROFILE")]
    pub(crate) profile: Option<String>,
    /// Never prompt; missing required input is an error.
    #[arg(long, global = true)]
    pub(crate) no_input: bool,
    /// Log debug detail to stderr.
    #[arg(short, long, global = true)]
    pub(crate) verbose: bool,
}

/// Subcommands of the `jumpbox` binary.
#[derive(Debug, Subcommand)]
pub(crate) enum Command {
    /// Create or resume the network and jumpbox, then bootstrap the host.
    #[command(name = "up")]
    Up(UpCommand),
    /// Delete every recorded resource in reverse dependency order.
    #[command(name = "down")]
    Down,
    /// List the recorded resources of an installation.
    #[command(name = "status")]
    Status,
}

/// Arguments for the `jumpbox up` subcommand.
#[derive(Debug, Args)]
pub(crate) struct UpCommand {
    /// Stop after printing the connection details instead of launching the
    /// installer.
    #[arg(long)]
    pub(crate) skip_installer: bool,
    /// Local directory uploaded to the jumpbox, overriding configuration.
    #[arg(long, value_name = "DIR")]
    pub(crate) artifacts: Option<String>,
}
