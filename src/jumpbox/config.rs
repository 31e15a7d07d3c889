//! Jumpbox host settings.

use ortho_config::OrthoConfig;
use serde::Deserialize;

use crate::config::{ConfigError, FieldMetadata, loader_args, non_blank, require_field};
use crate::topology::Ipv4Cidr;

/// SSM parameter resolving to the current Ubuntu 22.04 image.
pub const DEFAULT_IMAGE_PARAMETER: &str =
    "/aws/service/canonical/ubuntu/server/22.04/stable/current/amd64/hvm/ebs-gp2/ami-id";

/// Instance shape, image and SSH exposure of the jumpbox.
#[derive(Clone, Debug, Deserialize, OrthoConfig, PartialEq, Eq)]
#[ortho_config(
    prefix = "JUMPBOX_HOST",
    discovery(
        app_name = "jumpbox",
        env_var = "JUMPBOX_CONFIG_PATH",
        config_file_name = "jumpbox.toml",
        dotfile_name = ".jumpbox.toml",
        project_file_name = "jumpbox.toml"
    )
)]
pub struct HostConfig {
    /// EC2 instance type.
    #[ortho_config(default = "t3.medium".to_owned())]
    pub instance_type: String,
    /// Explicit image. When absent the image comes from `image_parameter`.
    pub image_id: Option<String>,
    /// Public SSM parameter naming the image.
    #[ortho_config(default = DEFAULT_IMAGE_PARAMETER.to_owned())]
    pub image_parameter: String,
    /// Source block allowed to reach SSH on the jumpbox.
    #[ortho_config(default = "0.0.0.0/0".to_owned())]
    pub ssh_ingress_cidr: String,
}

impl HostConfig {
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
    /// Returns [`ConfigError`] when the instance type is empty, no image
    /// source is configured, or the ingress block is malformed.
    pub fn validate(&self) -> Result<(), ConfigError> {
        require_field(
            &self.instance_type,
            &FieldMetadata::new(
                "instance type",
                "JUMPBOX_HOST_INSTANCE_TYPE",
                "instance_type",
                "host",
            ),
        )?;
        if non_blank(self.image_id.as_deref()).is_none() {
            require_field(
                &self.image_parameter,
                &FieldMetadata::new(
                    "image source",
                    "JUMPBOX_HOST_IMAGE_PARAMETER",
                    "image_parameter",
                    "host",
                ),
            )?;
        }
        let ingress = FieldMetadata::new(
            "SSH ingress block",
            "JUMPBOX_HOST_SSH_INGRESS_CIDR",
            "ssh_ingress_cidr",
            "host",
        );
        require_field(&self.ssh_ingress_cidr, &ingress)?;
        self.ssh_ingress_cidr
            .parse::<Ipv4Cidr>()
            .map(drop)
            .map_err(|err| ingress.invalid(err))
    }

    /// Explicit image, if configured.
    #[must_use]
    pub fn explicit_image(&self) -> Option<&str> {
        non_blank(self.image_id.as_deref())
    }
}
