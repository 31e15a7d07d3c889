//! Binary entry point for the `jumpbox` CLI.

mod cli;

use std::io::{self, IsTerminal, Write};
use std::process;

use clap::Parser;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use jumpbox::config::DEFAULT_REGION;
use jumpbox::prompt::{resolve_credentials, resolve_region, resolve_tag};
use jumpbox::status::status_lines;
use jumpbox::{
    AwsCli, AwsConfig, BootstrapConfig, BootstrapOutcome, ConfigError, HostConfig,
    InstallationConfig, InstallationContext, NoPrompt, ProcessCommandRunner, PromptError,
    Prompter, RemoteConfig, StateError, StateStore, TeardownDriver, TeardownError,
    TerminalPrompter, UpError, UpOrchestrator, UpSettings, Waiter,
};

use cli::{Cli, Command, GlobalArgs, UpCommand};

#[derive(Debug, Error)]
enum CliError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
    #[error("input error: {0}")]
    Prompt(#[from] PromptError),
    #[error("state error: {0}")]
    State(#[from] StateError),
    #[error(transparent)]
    Up(#[from] UpError),
    #[error("teardown failed: {0}")]
    Teardown(#[from] TeardownError),
    #[error("teardown left {0} resource(s) behind; fix the cause and run `jumpbox down` again")]
    Incomplete(usize),
    #[error("failed to write output: {0}")]
    Output(#[from] io::Error),
}

/// Everything a subcommand needs once the operator's input is resolved.
struct Session {
    context: InstallationContext,
    aws: AwsConfig,
    installation: InstallationConfig,
    waiter: Waiter,
}

impl Session {
    fn cloud(&self) -> AwsCli<ProcessCommandRunner> {
        AwsCli::new(
            self.aws.aws_bin.clone(),
            self.context.region(),
            ProcessCommandRunner::with_env(self.aws.child_env()),
        )
        .with_profile(self.aws.effective_profile())
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_tracing(cli.global.verbose);

    let cancel = CancellationToken::new();
    spawn_interrupt_handler(cancel.clone());

    let exit_code = match dispatch(cli, cancel).await {
        Ok(code) => code,
        Err(err) => {
            report_error(&err);
            1
        }
    };

    process::exit(exit_code);
}

fn init_tracing(verbose: bool) {
    let mut filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("jumpbox=info"));
    if verbose && let Ok(directive) = "jumpbox=debug".parse() {
        filter = filter.add_directive(directive);
    }
    tracing_subscriber::fmt()
        .with_writer(io::stderr)
        .with_env_filter(filter)
        .init();
}

fn spawn_interrupt_handler(cancel: CancellationToken) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received; stopping at the next wait");
            cancel.cancel();
        }
    });
}

async fn dispatch(cli: Cli, cancel: CancellationToken) -> Result<i32, CliError> {
    match cli.command {
        Command::Up(args) => {
            let session = open_session(&cli.global, cancel, StoreMode::Create)?;
            run_up(&session, &args).await
        }
        Command::Down => {
            let session = open_session(&cli.global, cancel, StoreMode::Existing)?;
            run_down(&session).await
        }
        Command::Status => {
            let session = open_session(&cli.global, cancel, StoreMode::ReadOnly)?;
            run_status(&session)
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum StoreMode {
    Create,
    Existing,
    ReadOnly,
}

fn open_session(
    global: &GlobalArgs,
    cancel: CancellationToken,
    mode: StoreMode,
) -> Result<Session, CliError> {
    let interactive = !global.no_input && io::stdin().is_terminal();
    let prompter: Box<dyn Prompter> = if interactive {
        Box::new(TerminalPrompter::new())
    } else {
        Box::new(NoPrompt)
    };

    let installation = InstallationConfig::load_without_cli_args()?;
    let mut aws = AwsConfig::load_without_cli_args()?;
    if let Some(profile) = global.profile.as_deref() {
        aws.profile = Some(profile.to_owned());
    }

    let tag = resolve_tag(
        global.tag.as_deref(),
        installation.tag.as_deref(),
        prompter.as_ref(),
    )?;
    let region = if mode == StoreMode::ReadOnly {
        global
            .region
            .clone()
            .or_else(|| aws.region.clone())
            .unwrap_or_else(|| DEFAULT_REGION.to_owned())
    } else {
        let region = resolve_region(
            global.region.as_deref(),
            aws.region.as_deref(),
            prompter.as_ref(),
        )?;
        resolve_credentials(&mut aws, prompter.as_ref())?;
        region
    };
    aws.region = Some(region.clone());
    aws.validate()?;

    let state_dir = installation.state_dir_for(&tag);
    let store = match mode {
        StoreMode::Create => StateStore::open(&state_dir, &tag)?,
        StoreMode::Existing | StoreMode::ReadOnly => StateStore::open_existing(&state_dir, &tag)?,
    };
    info!(tag = %tag, region = %region, state = %state_dir, "installation selected");

    let waiter = Waiter::new(installation.wait_policy()?, cancel);
    Ok(Session {
        context: InstallationContext::new(region, store),
        aws,
        installation,
        waiter,
    })
}

async fn run_up(session: &Session, args: &UpCommand) -> Result<i32, CliError> {
    let host = HostConfig::load_without_cli_args()?;
    host.validate()?;
    let remote = RemoteConfig::load_without_cli_args()?;
    remote.validate()?;
    let mut bootstrap = BootstrapConfig::load_without_cli_args()?;
    if let Some(artifacts) = args.artifacts.as_deref() {
        bootstrap.artifact_dir = Some(artifacts.to_owned());
    }
    bootstrap.validate()?;

    let settings = UpSettings {
        network: session.installation.network_settings()?,
        host,
        remote,
        bootstrap,
    };
    let cloud = session.cloud();
    let orchestrator = UpOrchestrator::new(
        &cloud,
        &session.context,
        &settings,
        &session.waiter,
        ProcessCommandRunner::new(),
    );
    let mut stdout = io::stdout();
    match orchestrator.execute(&mut stdout, args.skip_installer).await? {
        BootstrapOutcome::Ready => Ok(0),
        BootstrapOutcome::InstallerExited(code) => Ok(code.unwrap_or(1)),
    }
}

async fn run_down(session: &Session) -> Result<i32, CliError> {
    let cloud = session.cloud();
    let summary = TeardownDriver::new(&cloud, &session.context, &session.waiter)
        .run()
        .await?;
    let mut stdout = io::stdout();
    writeln!(stdout, "{summary}")?;
    for failure in &summary.failed {
        writeln!(stdout, "  kept {}: {}", failure.key, failure.reason)?;
    }
    if summary.is_complete() {
        Ok(0)
    } else {
        Err(CliError::Incomplete(summary.failed.len()))
    }
}

fn run_status(session: &Session) -> Result<i32, CliError> {
    let mut stdout = io::stdout();
    for line in status_lines(session.context.store())? {
        writeln!(stdout, "{line}")?;
    }
    Ok(0)
}

fn report_error(err: &CliError) {
    write_error(io::stderr(), err);
}

fn write_error(mut target: impl Write, err: &CliError) {
    writeln!(target, "{err}").ok();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_error_writes_one_labelled_line() {
        let mut buf = Vec::new();
        write_error(&mut buf, &CliError::Incomplete(2));
        let rendered = String::from_utf8(buf).expect("utf8");
        assert_eq!(
            rendered,
            "teardown left 2 resource(s) behind; fix the cause and run `jumpbox down` again\n"
        );
    }

    #[test]
    fn cli_parses_global_flags_after_the_subcommand() {
        let cli = Cli::try_parse_from(["jumpbox", "up", "--tag", "demo", "--skip-installer", "-v"])
            .expect("parse");
        assert_eq!(cli.global.tag.as_deref(), Some("demo"));
        assert!(cli.global.verbose);
        assert!(matches!(
            cli.command,
            Command::Up(UpCommand {
                skip_installer: true,
                ..
            })
        ));
    }
}
