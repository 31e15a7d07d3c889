//! Temporary session credentials and the operator-facing summary.

use std::fmt;

use serde_json::Value;
use thiserror::Error;
use tracing::info;

use crate::cloud::{ApiCall, CloudApi, CloudError};
use crate::lookup::{LookupError, LookupPath};

/// Default lifetime of the session credentials: twelve hours.
pub const DEFAULT_SESSION_DURATION_SECS: u64 = 43_200;

/// Errors raised while requesting session credentials.
#[derive(Debug, Error)]
pub enum CredentialsError {
    /// Raised when the STS call fails.
    #[error("failed to request session credentials: {0}")]
    Cloud(#[from] CloudError),
    /// Raised when the STS response lacks a field.
    #[error("session credentials response is incomplete: {0}")]
    Incomplete(#[from] LookupError),
}

/// Temporary credentials from `sts get-session-token`.
#[derive(Clone, Eq, PartialEq)]
pub struct SessionCredentials {
    /// Access key identifier.
    pub access_key_id: String,
    /// Secret access key.
    pub secret_access_key: String,
    /// Session token.
    pub session_token: String,
    /// Expiry timestamp as reported by STS.
    pub expiration: String,
}

impl SessionCredentials {
    /// Requests credentials valid for `duration_secs`.
    ///
    /// # Errors
    ///
    /// Returns [`CredentialsError`] when the call fails or the response is
    /// missing a field.
    pub fn request<C: CloudApi>(cloud: &C, duration_secs: u64) -> Result<Self, CredentialsError> {
        let response = cloud.invoke(
            &ApiCall::new("sts", "get-session-token")
                .arg("duration-seconds", duration_secs.to_string()),
        )?;
        let credentials = Self::from_response(&response)?;
        info!(expiration = %credentials.expiration, "issued session credentials");
        Ok(credentials)
    }

    fn from_response(response: &Value) -> Result<Self, LookupError> {
        let field = |name: &str| LookupPath::parse(&format!("Credentials.{name}"))?.extract(response);
        Ok(Self {
            access_key_id: field("AccessKeyId")?,
            secret_access_key: field("SecretAccessKey")?,
            session_token: field("SessionToken")?,
            expiration: field("Expiration")?,
        })
    }

    /// Shell `export` lines for the credentials and `region`.
    #[must_use]
    pub fn export_lines(&self, region: &str) -> String {
        [
            ("AWS_ACCESS_KEY_ID", self.access_key_id.as_str()),
            ("AWS_SECRET_ACCESS_KEY", self.secret_access_key.as_str()),
            ("AWS_SESSION_TOKEN", self.session_token.as_str()),
            ("AWS_REGION", region),
        ]
        .iter()
        .map(|(key, value)| format!("export {key}={}\n", shell_escape::unix::escape((*value).into())))
        .collect()
    }
}

impl fmt::Debug for SessionCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionCredentials")
            .field("access_key_id", &self.access_key_id)
            .field("secret_access_key", &"<redacted>")
            .field("session_token", &"<redacted>")
            .field("expiration", &self.expiration)
            .finish()
    }
}

/// What the operator needs to reach the installation.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ConnectionSummary {
    /// Installation tag.
    pub tag: String,
    /// AWS region.
    pub region: String,
    /// VPC identifier.
    pub vpc_id: String,
    /// Private subnets.
    pub private_subnet_ids: Vec<String>,
    /// Transit gateway.
    pub transit_gateway_id: String,
    /// Jumpbox public address.
    pub jumpbox_address: String,
    /// Ready-to-run SSH command.
    pub ssh_command: String,
}

impl fmt::Display for ConnectionSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "installation:     {}", self.tag)?;
        writeln!(f, "region:           {}", self.region)?;
        writeln!(f, "vpc:              {}", self.vpc_id)?;
        writeln!(f, "private subnets:  {}", self.private_subnet_ids.join(","))?;
        writeln!(f, "transit gateway:  {}", self.transit_gateway_id)?;
        writeln!(f, "jumpbox address:  {}", self.jumpbox_address)?;
        writeln!(f, "connect with:     {}", self.ssh_command)
    }
}
