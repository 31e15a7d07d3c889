//! SSH client settings.

use ortho_config::OrthoConfig;
use serde::Deserialize;

use crate::config::{ConfigError, FieldMetadata, loader_args, require_field};

/// SSH and SCP settings loaded via `ortho-config`.
#[derive(Clone, Debug, Deserialize, OrthoConfig, PartialEq, Eq)]
#[ortho_config(
    prefix = "JUMPBOX_SSH",
    discovery(
        app_name = "jumpbox",
        env_var = "JUMPBOX_CONFIG_PATH",
        config_file_name = "jumpbox.toml",
        dotfile_name = ".jumpbox.toml",
        project_file_name = "jumpbox.toml"
    )
)]
pub struct RemoteConfig {
    /// Path to the `ssh` executable.
    #[ortho_config(default = "ssh".to_owned())]
    pub ssh_bin: String,
    /// Path to the `scp` executable.
    #[ortho_config(default = "scp".to_owned())]
    pub scp_bin: String,
    /// Login user on the jumpbox image.
    #[ortho_config(default = "ubuntu".to_owned())]
    pub ssh_user: String,
    /// SSH port.
    #[ortho_config(default = 22)]
    pub ssh_port: u16,
    /// Whether to enforce host key checking; disabled by default because
    /// the jumpbox is new on every installation.
    #[ortho_config(default = false)]
    pub ssh_strict_host_key_checking: bool,
    /// Known hosts file override.
    #[ortho_config(default = "/dev/null".to_owned())]
    pub ssh_known_hosts_file: String,
    /// Seconds before an SSH connection attempt is abandoned.
    #[ortho_config(default = 10)]
    pub connect_timeout_secs: u64,
}

impl RemoteConfig {
    /// Loads configuration without attempting to parse CLI arguments.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] when the merge fails.
    pub fn load_without_cli_args() -> Result<Self, ConfigError> {
        Self::load_from_iter(loader_args()).map_err(|err| ConfigError::Parse(err.to_string()))
    }

    /// Ensures binaries, user and known-hosts file are named.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::MissingField`] when a value is empty.
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (value, metadata) in [
            (
                &self.ssh_bin,
                FieldMetadata::new("ssh binary", "JUMPBOX_SSH_SSH_BIN", "ssh_bin", "ssh"),
            ),
            (
                &self.scp_bin,
                FieldMetadata::new("scp binary", "JUMPBOX_SSH_SCP_BIN", "scp_bin", "ssh"),
            ),
            (
                &self.ssh_user,
                FieldMetadata::new("SSH user", "JUMPBOX_SSH_SSH_USER", "ssh_user", "ssh"),
            ),
            (
                &self.ssh_known_hosts_file,
                FieldMetadata::new(
                    "known hosts file",
                    "JUMPBOX_SSH_SSH_KNOWN_HOSTS_FILE",
                    "ssh_known_hosts_file",
                    "ssh",
                ),
            ),
        ] {
            require_field(value, &metadata)?;
        }
        if self.connect_timeout_secs == 0 {
            return Err(FieldMetadata::new(
                "SSH connect timeout",
                "JUMPBOX_SSH_CONNECT_TIMEOUT_SECS",
                "connect_timeout_secs",
                "ssh",
            )
            .invalid("must be at least 1 second"));
        }
        Ok(())
    }
}
