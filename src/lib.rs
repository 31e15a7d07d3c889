//! Core library for the `jumpbox` provisioning tool.
//!
//! The crate builds an AWS VPC with public and private subnets, internet,
//! NAT and transit gateways, and a jumpbox host, recording every created
//! resource in a per-installation state directory so runs are resumable and
//! idempotent. The host is then bootstrapped over SSH. Teardown deletes the
//! recorded resources in reverse dependency order.

pub mod bootstrap;
pub mod cloud;
pub mod config;
pub mod context;
pub mod credentials;
pub mod graph;
pub mod jumpbox;
pub mod lookup;
pub mod network;
pub mod process;
pub mod prompt;
pub mod provisioner;
pub mod remote;
pub mod state;
pub mod status;
pub mod tag;
pub mod teardown;
pub mod test_support;
pub mod topology;
pub mod up;
pub mod wait;

pub use bootstrap::{BootstrapConfig, BootstrapError, BootstrapOutcome, Bootstrapper};
pub use cloud::{ApiCall, AwsCli, CloudApi, CloudError};
pub use config::{AwsConfig, ConfigError, DEFAULT_REGION, InstallationConfig};
pub use context::InstallationContext;
pub use credentials::{ConnectionSummary, SessionCredentials};
pub use jumpbox::{HostConfig, Jumpbox, JumpboxError, JumpboxProvisioner};
pub use network::{NetworkError, NetworkIds, NetworkProvisioner};
pub use process::{CommandOutput, CommandRunner, ProcessCommandRunner, RunnerError};
pub use prompt::{NoPrompt, PromptError, Prompter, TerminalPrompter};
pub use provisioner::{ProvisionError, Provisioner};
pub use remote::{RemoteConfig, RemoteError, RemoteHost};
pub use state::{ResourceKey, ResourceKind, ResourceRecord, StateError, StateStore};
pub use tag::{InstallationTag, TagError};
pub use teardown::{TeardownDriver, TeardownError, TeardownSummary};
pub use topology::{NetworkSettings, Topology};
pub use up::{UpError, UpOrchestrator, UpSettings};
pub use wait::{WaitError, WaitPolicy, Waiter};
