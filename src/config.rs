//! Configuration loading via `ortho-config`.
//!
//! Every struct merges defaults, `jumpbox.toml` (found through
//! `JUMPBOX_CONFIG_PATH`, `~/.jumpbox.toml`, or the project directory), and
//! environment variables. Command-line flags override the loaded values in
//! the binary.

use std::ffi::OsString;

use camino::Utf8PathBuf;
use ortho_config::OrthoConfig;
use serde::Deserialize;
use thiserror::Error;

use crate::tag::InstallationTag;
use crate::topology::{Ipv4Cidr, NetworkSettings};
use crate::wait::WaitPolicy;

/// Region used when none is configured and prompting is disabled.
pub const DEFAULT_REGION: &str = "us-east-1";

/// AWS access settings.
#[derive(Clone, Debug, Deserialize, OrthoConfig, PartialEq, Eq)]
#[ortho_config(
    prefix = "AWS",
    discovery(
        app_name = "jumpbox",
        env_var = "JUMPBOX_CONFIG_PATH",
        config_file_name = "jumpbox.toml",
        dotfile_name = ".jumpbox.toml",
        project_file_name = "jumpbox.toml"
    )
)]
pub struct AwsConfig {
    /// Region to provision into. Prompted for when absent.
    pub region: Option<String>,
    /// Explicit access key. Must be paired with `secret_access_key`.
    pub access_key_id: Option<String>,
    /// Explicit secret key.
    pub secret_access_key: Option<String>,
    /// Session token for temporary explicit credentials.
    pub session_token: Option<String>,
    /// Named CLI profile; used when no explicit keys are given.
    pub profile: Option<String>,
    /// Path to the `aws` executable.
    #[ortho_config(default = "aws".to_owned())]
    pub aws_bin: String,
}

/// Installation identity, state location, network shape and wait bounds.
#[derive(Clone, Debug, Deserialize, OrthoConfig, PartialEq, Eq)]
#[ortho_config(
    prefix = "JUMPBOX",
    discovery(
        app_name = "jumpbox",
        env_var = "JUMPBOX_CONFIG_PATH",
        config_file_name = "jumpbox.toml",
        dotfile_name = ".jumpbox.toml",
        project_file_name = "jumpbox.toml"
    )
)]
pub struct InstallationConfig {
    /// Installation tag. Prompted for when absent.
    pub tag: Option<String>,
    /// Directory holding one state directory per tag.
    #[ortho_config(default = ".jumpbox".to_owned())]
    pub state_root: String,
    /// Explicit state directory, overriding `<state_root>/<tag>`.
    pub state_dir: Option<String>,
    /// VPC block.
    #[ortho_config(default = "10.0.0.0/16".to_owned())]
    pub vpc_cidr: String,
    /// Supernet routed to the transit gateway.
    #[ortho_config(default = "172.16.0.0/12".to_owned())]
    pub internal_supernet: String,
    /// Upper bound on availability zones used.
    #[ortho_config(default = 3)]
    pub max_zones: usize,
    /// Public subnets per zone.
    #[ortho_config(default = 1)]
    pub public_subnets_per_zone: usize,
    /// Private subnets per zone.
    #[ortho_config(default = 1)]
    pub private_subnets_per_zone: usize,
    /// Seconds between readiness checks.
    #[ortho_config(default = 10)]
    pub poll_interval_secs: u64,
    /// Seconds before a readiness wait gives up.
    #[ortho_config(default = 1800)]
    pub wait_timeout_secs: u64,
}

/// Metadata for a configuration field, used to generate actionable error messages.
pub(crate) struct FieldMetadata {
    description: &'static str,
    env_var: &'static str,
    toml_key: &'static str,
    section: &'static str,
}

impl FieldMetadata {
    pub(crate) const fn new(
        description: &'static str,
        env_var: &'static str,
        toml_key: &'static str,
        section: &'static str,
    ) -> Self {
        Self {
            description,
            env_var,
            toml_key,
            section,
        }
    }

    pub(crate) fn missing(&self) -> ConfigError {
        ConfigError::MissingField(format!(
            "missing {}: set {} or add {} to [{}] in jumpbox.toml",
            self.description, self.env_var, self.toml_key, self.section
        ))
    }

    pub(crate) fn invalid(&self, message: impl std::fmt::Display) -> ConfigError {
        ConfigError::Invalid(format!(
            "invalid {} ({} / {}): {message}",
            self.description, self.env_var, self.toml_key
        ))
    }
}

pub(crate) fn require_field(value: &str, metadata: &FieldMetadata) -> Result<(), ConfigError> {
    if value.trim().is_empty() {
        return Err(metadata.missing());
    }
    Ok(())
}

pub(crate) fn require_optional(
    value: Option<&str>,
    metadata: &FieldMetadata,
) -> Result<(), ConfigError> {
    match value {
        None => Ok(()),
        Some(text) => require_field(text, metadata),
    }
}

/// Argument list handed to the loaders so the process arguments, which belong
/// to the binary's own parser, are never reinterpreted.
pub(crate) fn loader_args() -> [OsString; 1] {
    [OsString::from("jumpbox")]
}

const ACCESS_KEY: FieldMetadata = FieldMetadata::new(
    "AWS access key ID",
    "AWS_ACCESS_KEY_ID",
    "access_key_id",
    "aws",
);
const SECRET_KEY: FieldMetadata = FieldMetadata::new(
    "AWS secret access key",
    "AWS_SECRET_ACCESS_KEY",
    "secret_access_key",
    "aws",
);

impl AwsConfig {
    /// Loads configuration without attempting to parse CLI arguments.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] when the merge fails.
    pub fn load_without_cli_args() -> Result<Self, ConfigError> {
        Self::load_from_iter(loader_args()).map_err(|err| ConfigError::Parse(err.to_string()))
    }

    /// Checks that explicit keys come in pairs and the client is named.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::MissingField`] naming the absent half of a key
    /// pair or an empty `aws_bin`.
    pub fn validate(&self) -> Result<(), ConfigError> {
        require_field(
            &self.aws_bin,
            &FieldMetadata::new("AWS CLI binary", "AWS_AWS_BIN", "aws_bin", "aws"),
        )?;
        require_optional(
            self.region.as_deref(),
            &FieldMetadata::new("AWS region", "AWS_REGION", "region", "aws"),
        )?;
        match (
            non_blank(self.access_key_id.as_deref()),
            non_blank(self.secret_access_key.as_deref()),
        ) {
            (Some(_), None) => Err(SECRET_KEY.missing()),
            (None, Some(_)) => Err(ACCESS_KEY.missing()),
            _ => Ok(()),
        }
    }

    /// Whether explicit keys are configured.
    #[must_use]
    pub fn has_explicit_keys(&self) -> bool {
        non_blank(self.access_key_id.as_deref()).is_some()
            && non_blank(self.secret_access_key.as_deref()).is_some()
    }

    /// Environment forwarded to every `aws` child process.
    ///
    /// Explicit keys are exported so they take precedence over the ambient
    /// credential chain; the pager is always disabled.
    #[must_use]
    pub fn child_env(&self) -> Vec<(String, String)> {
        let mut env = vec![(String::from("AWS_PAGER"), String::new())];
        if self.has_explicit_keys() {
            let pairs = [
                ("AWS_ACCESS_KEY_ID", self.access_key_id.as_deref()),
                ("AWS_SECRET_ACCESS_KEY", self.secret_access_key.as_deref()),
                ("AWS_SESSION_TOKEN", self.session_token.as_deref()),
            ];
            env.extend(pairs.into_iter().filter_map(|(key, value)| {
                non_blank(value).map(|text| (key.to_owned(), text.to_owned()))
            }));
        }
        env
    }

    /// Profile passed to the client when no explicit keys are configured.
    #[must_use]
    pub fn effective_profile(&self) -> Option<String> {
        if self.has_explicit_keys() {
            return None;
        }
        non_blank(self.profile.as_deref()).map(str::to_owned)
    }
}

impl InstallationConfig {
    /// Loads configuration without attempting to parse CLI arguments.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] when the merge fails.
    pub fn load_without_cli_args() -> Result<Self, ConfigError> {
        Self::load_from_iter(loader_args()).map_err(|err| ConfigError::Parse(err.to_string()))
    }

    /// State directory for `tag`.
    #[must_use]
    pub fn state_dir_for(&self, tag: &InstallationTag) -> Utf8PathBuf {
        match non_blank(self.state_dir.as_deref()) {
            Some(dir) => Utf8PathBuf::from(dir),
            None => Utf8PathBuf::from(&self.state_root).join(tag.as_str()),
        }
    }

    /// Network settings parsed from the configured blocks and counts.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] for malformed CIDR blocks or a zero
    /// zone count.
    pub fn network_settings(&self) -> Result<NetworkSettings, ConfigError> {
        let vpc_cidr = parse_cidr(
            &self.vpc_cidr,
            &FieldMetadata::new("VPC CIDR block", "JUMPBOX_VPC_CIDR", "vpc_cidr", "jumpbox"),
        )?;
        let internal_supernet = parse_cidr(
            &self.internal_supernet,
            &FieldMetadata::new(
                "internal supernet",
                "JUMPBOX_INTERNAL_SUPERNET",
                "internal_supernet",
                "jumpbox",
            ),
        )?;
        if self.max_zones == 0 {
            return Err(FieldMetadata::new(
                "zone count",
                "JUMPBOX_MAX_ZONES",
                "max_zones",
                "jumpbox",
            )
            .invalid("must be at least 1"));
        }
        Ok(NetworkSettings {
            vpc_cidr,
            internal_supernet,
            max_zones: self.max_zones,
            public_subnets_per_zone: self.public_subnets_per_zone,
            private_subnets_per_zone: self.private_subnets_per_zone,
        })
    }

    /// Wait policy from the configured interval and timeout.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] when the interval is zero or longer
    /// than the timeout.
    pub fn wait_policy(&self) -> Result<WaitPolicy, ConfigError> {
        let metadata = FieldMetadata::new(
            "poll interval",
            "JUMPBOX_POLL_INTERVAL_SECS",
            "poll_interval_secs",
            "jumpbox",
        );
        if self.poll_interval_secs == 0 {
            return Err(metadata.invalid("must be at least 1 second"));
        }
        if self.poll_interval_secs > self.wait_timeout_secs {
            return Err(metadata.invalid(format!(
                "exceeds the wait timeout of {} seconds",
                self.wait_timeout_secs
            )));
        }
        Ok(WaitPolicy::from_secs(
            self.poll_interval_secs,
            self.wait_timeout_secs,
        ))
    }
}

fn parse_cidr(value: &str, metadata: &FieldMetadata) -> Result<Ipv4Cidr, ConfigError> {
    require_field(value, metadata)?;
    value.parse().map_err(|err| metadata.invalid(err))
}

pub(crate) fn non_blank(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|text| !text.is_empty())
}

/// Errors raised during configuration loading and validation.
#[derive(Debug, Error, Eq, PartialEq)]
pub enum ConfigError {
    /// Indicates a required configuration field is empty or missing.
    #[error("missing configuration field: {0}")]
    MissingField(String),
    /// Indicates a configured value cannot be used.
    #[error("{0}")]
    Invalid(String),
    /// Surfaces errors from the `ortho-config` loader.
    #[error("configuration parsing failed: {0}")]
    Parse(String),
}

impl From<ortho_config::OrthoError> for ConfigError {
    fn from(value: ortho_config::OrthoError) -> Self {
        Self::Parse(value.to_string())
    }
}
