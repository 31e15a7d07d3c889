//! Bootstrap settings.

use camino::{Utf8Component, Utf8Path};
use ortho_config::OrthoConfig;
use serde::Deserialize;

use crate::config::{ConfigError, FieldMetadata, loader_args, require_field, require_optional};
use crate::credentials::DEFAULT_SESSION_DURATION_SECS;

const MIN_SESSION_SECS: u64 = 900;
const MAX_SESSION_SECS: u64 = 129_600;

/// What to copy to the jumpbox, what to run there and how long the printed
/// session credentials stay valid.
#[derive(Clone, Debug, Deserialize, OrthoConfig, PartialEq, Eq)]
#[ortho_config(
    prefix = "JUMPBOX_BOOTSTRAP",
    discovery(
        app_name = "jumpbox",
        env_var = "JUMPBOX_CONFIG_PATH",
        config_file_name = "jumpbox.toml",
        dotfile_name = ".jumpbox.toml",
        project_file_name = "jumpbox.toml"
    )
)]
pub struct BootstrapConfig {
    /// Local directory of third-party binaries and scripts to upload.
    pub artifact_dir: Option<String>,
    /// Remote working directory, relative to the login user's home.
    /// Replaced on every upload.
    #[ortho_config(default = "jumpbox-bootstrap".to_owned())]
    pub remote_dir: String,
    /// Shell command installing the uploaded artifacts.
    pub install_command: Option<String>,
    /// Shell command launching the platform installer interactively.
    pub installer_command: Option<String>,
    /// Lifetime of the printed session credentials.
    #[ortho_config(default = 43_200)]
    pub session_duration_secs: u64,
}

impl BootstrapConfig {
    /// Loads configuration without attempting to parse CLI arguments.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] when the merge fails.
    pub fn load_without_cli_args() -> Result<Self, ConfigError> {
        Self::load_from_iter(loader_args()).map_err(|err| ConfigError::Parse(err.to_string()))
    }

    /// Performs semantic validation.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] for blank commands, a remote directory that
    /// would clobber the home or root directory, or a credential lifetime
    /// outside what STS accepts.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let remote_dir = FieldMetadata::new(
            "remote bootstrap directory",
            "JUMPBOX_BOOTSTRAP_REMOTE_DIR",
            "remote_dir",
            "bootstrap",
        );
        require_field(&self.remote_dir, &remote_dir)?;
        if !is_dedicated_subdirectory(self.remote_dir.trim()) {
            return Err(remote_dir.invalid(
                "must be a relative subdirectory of the login home, without `~`, `.` or `..`",
            ));
        }
        require_optional(
            self.artifact_dir.as_deref(),
            &FieldMetadata::new(
                "artifact directory",
                "JUMPBOX_BOOTSTRAP_ARTIFACT_DIR",
                "artifact_dir",
                "bootstrap",
            ),
        )?;
        require_optional(
            self.install_command.as_deref(),
            &FieldMetadata::new(
                "install command",
                "JUMPBOX_BOOTSTRAP_INSTALL_COMMAND",
                "install_command",
                "bootstrap",
            ),
        )?;
        require_optional(
            self.installer_command.as_deref(),
            &FieldMetadata::new(
                "installer command",
                "JUMPBOX_BOOTSTRAP_INSTALLER_COMMAND",
                "installer_command",
                "bootstrap",
            ),
        )?;
        if !(MIN_SESSION_SECS..=MAX_SESSION_SECS).contains(&self.session_duration_secs) {
            return Err(FieldMetadata::new(
                "session duration",
                "JUMPBOX_BOOTSTRAP_SESSION_DURATION_SECS",
                "session_duration_secs",
                "bootstrap",
            )
            .invalid(format!(
                "must be between {MIN_SESSION_SECS} and {MAX_SESSION_SECS} seconds (default {DEFAULT_SESSION_DURATION_SECS})"
            )));
        }
        Ok(())
    }
}

/// Whether `dir` names a subdirectory of the login home that is safe to
/// replace wholesale.
fn is_dedicated_subdirectory(dir: &str) -> bool {
    !dir.starts_with('~')
        && Utf8Path::new(dir)
            .components()
            .all(|component| matches!(component, Utf8Component::Normal(_)))
        && Utf8Path::new(dir).components().next().is_some()
}
