//! Jumpbox host provisioning: key pair, security group, image and instance.

mod config;

use std::sync::OnceLock;

use camino::Utf8PathBuf;
use serde_json::Value;
use thiserror::Error;
use tracing::info;

use crate::cloud::{ApiCall, CloudApi, CloudError, tolerate_duplicate};
use crate::lookup::LookupPath;
use crate::network::NetworkIds;
use crate::provisioner::{ProvisionError, Provisioner};
use crate::state::{ResourceKey, ResourceKind, StateError};
use crate::wait::{Poll, WaitError, Waiter};

pub use config::{DEFAULT_IMAGE_PARAMETER, HostConfig};

/// Record name of the jumpbox resources.
pub const JUMPBOX: &str = "jumpbox";

const INSTANCE_STATE: &str = "Reservations[0].Instances[0].State.Name";
const INSTANCE_ADDRESS: &str = "Reservations[0].Instances[0].PublicIpAddress";

/// Errors raised while provisioning the jumpbox.
#[derive(Debug, Error)]
pub enum JumpboxError {
    /// Raised when a resource cannot be ensured.
    #[error(transparent)]
    Provision(#[from] ProvisionError),
    /// Raised when the private key file cannot be written.
    #[error(transparent)]
    State(#[from] StateError),
    /// Raised when the instance never becomes reachable.
    #[error(transparent)]
    Wait(#[from] WaitError),
    /// Raised when the SSH ingress rule cannot be added.
    #[error("failed to open SSH ingress: {0}")]
    Ingress(CloudError),
}

/// The provisioned host.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Jumpbox {
    /// Instance identifier.
    pub instance_id: String,
    /// Public IPv4 address.
    pub public_ip: String,
    /// Private key authorised on the host.
    pub key_path: Utf8PathBuf,
    /// Security group guarding the host.
    pub security_group_id: String,
}

/// Creates the jumpbox inside an existing network.
pub struct JumpboxProvisioner<'a, C: CloudApi> {
    provisioner: &'a Provisioner<'a, C>,
    host: &'a HostConfig,
    waiter: &'a Waiter,
    address: OnceLock<String>,
}

impl<'a, C: CloudApi> JumpboxProvisioner<'a, C> {
    /// Creates a jumpbox provisioner.
    #[must_use]
    pub const fn new(
        provisioner: &'a Provisioner<'a, C>,
        host: &'a HostConfig,
        waiter: &'a Waiter,
    ) -> Self {
        Self {
            provisioner,
            host,
            waiter,
            address: OnceLock::new(),
        }
    }

    /// Ensures the jumpbox exists and is running with a public address.
    ///
    /// # Errors
    ///
    /// Returns [`JumpboxError`] on the first failing step.
    pub async fn apply(&self, network: &NetworkIds) -> Result<Jumpbox, JumpboxError> {
        let key_path = self.ensure_key_pair()?;
        let security_group_id = self.ensure_security_group(&network.vpc_id)?;
        let instance_id = self.ensure_instance(&network.jumpbox_subnet_id, &security_group_id)?;
        let public_ip = self.public_address(&instance_id).await?;
        info!(instance = %instance_id, address = %public_ip, "jumpbox running");
        Ok(Jumpbox {
            instance_id,
            public_ip,
            key_path,
            security_group_id,
        })
    }

    /// Ensures the key pair and writes its private key next to the records.
    fn ensure_key_pair(&self) -> Result<Utf8PathBuf, JumpboxError> {
        let context = self.provisioner.context();
        let key = ResourceKey::new(ResourceKind::KeyPair, JUMPBOX);
        let key_name = context.name("key");
        let spec = context.tag_specification("key-pair", "key");
        self.provisioner.ensure(&key, |cloud| {
            cloud.invoke(
                &ApiCall::ec2("create-key-pair")
                    .arg("key-name", key_name)
                    .arg("key-type", "ed25519")
                    .arg("key-format", "pem")
                    .arg("tag-specifications", spec),
            )
        })?;
        let material = self.provisioner.lookup(&key, "KeyMaterial")?;
        let path = context
            .store()
            .write_secret(&context.key_file_name(), &format!("{material}\n"))?;
        Ok(path)
    }

    fn ensure_security_group(&self, vpc_id: &str) -> Result<String, JumpboxError> {
        let context = self.provisioner.context();
        let group_name = context.name("jumpbox");
        let description = format!("SSH access to the {} jumpbox", context.tag());
        let spec = context.tag_specification("security-group", "jumpbox");
        let group_id = self.provisioner.ensure(
            &ResourceKey::new(ResourceKind::SecurityGroup, JUMPBOX),
            |cloud| {
                cloud.invoke(
                    &ApiCall::ec2("create-security-group")
                        .arg("group-name", group_name)
                        .arg("description", description)
                        .arg("vpc-id", vpc_id)
                        .arg("tag-specifications", spec),
                )
            },
        )?;
        tolerate_duplicate(
            self.provisioner.cloud().invoke(
                &ApiCall::ec2("authorize-security-group-ingress")
                    .arg("group-id", group_id.clone())
                    .arg("protocol", "tcp")
                    .arg("port", "22")
                    .arg("cidr", self.host.ssh_ingress_cidr.clone()),
            ),
            Value::Null,
        )
        .map_err(JumpboxError::Ingress)?;
        Ok(group_id)
    }

    fn ensure_instance(&self, subnet_id: &str, group_id: &str) -> Result<String, JumpboxError> {
        let context = self.provisioner.context();
        let key_name = context.name("key");
        let spec = context.tag_specification("instance", "jumpbox");
        let instance_id = self.provisioner.ensure(
            &ResourceKey::new(ResourceKind::Instance, JUMPBOX),
            |cloud| {
                let image_id = self.resolve_image(cloud)?;
                info!(image = %image_id, instance_type = %self.host.instance_type, "launching jumpbox");
                cloud.invoke(
                    &ApiCall::ec2("run-instances")
                        .arg("image-id", image_id)
                        .arg("instance-type", self.host.instance_type.clone())
                        .arg("key-name", key_name)
                        .arg("security-group-ids", group_id)
                        .arg("subnet-id", subnet_id)
                        .arg("count", "1")
                        .arg("tag-specifications", spec),
                )
            },
        )?;
        Ok(instance_id)
    }

    fn resolve_image(&self, cloud: &C) -> Result<String, CloudError> {
        if let Some(image) = self.host.explicit_image() {
            return Ok(image.to_owned());
        }
        let response = cloud.invoke(
            &ApiCall::new("ssm", "get-parameter").arg("name", self.host.image_parameter.clone()),
        )?;
        LookupPath::parse("Parameter.Value")
            .and_then(|path| path.extract(&response))
            .map_err(|err| CloudError::Parse {
                operation: String::from("get-parameter"),
                message: err.to_string(),
            })
    }

    /// Waits until the instance runs with a public address and returns it.
    /// The address is resolved once per process.
    ///
    /// # Errors
    ///
    /// Returns [`JumpboxError::Wait`] when the instance does not come up in
    /// time or the run is cancelled.
    pub async fn public_address(&self, instance_id: &str) -> Result<String, JumpboxError> {
        if let Some(address) = self.address.get() {
            return Ok(address.clone());
        }
        let cloud = self.provisioner.cloud();
        let call = ApiCall::ec2("describe-instances").arg("instance-ids", instance_id);
        let waited = self
            .waiter
            .until("jumpbox instance", || {
                let response = cloud.invoke(&call).map_err(|err| err.to_string())?;
                Ok::<_, String>(instance_address(&response))
            })
            .await?;
        Ok(self.address.get_or_init(|| waited.value).clone())
    }
}

fn instance_address(response: &Value) -> Poll<String> {
    let scalar = |expression: &str| {
        LookupPath::parse(expression)
            .ok()
            .and_then(|path| path.extract(response).ok())
    };
    let state = scalar(INSTANCE_STATE).unwrap_or_else(|| String::from("unknown"));
    if state != "running" {
        return Poll::Pending(state);
    }
    scalar(INSTANCE_ADDRESS).map_or_else(
        || Poll::Pending(String::from("running without public address")),
        Poll::Ready,
    )
}
