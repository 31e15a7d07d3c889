//! [`CloudApi`] backed by the `aws` command-line client.

use std::ffi::OsString;

use serde_json::Value;
use tracing::debug;

use super::{ApiCall, CloudApi, CloudError};
use crate::process::{CommandOutput, CommandRunner};

/// Default name of the AWS CLI binary.
pub const DEFAULT_AWS_BIN: &str = "aws";

const ERROR_MARKER: &str = "An error occurred (";

/// Runs every call as `aws <service> <operation> --region <r> --output json`.
#[derive(Clone, Debug)]
pub struct AwsCli<R: CommandRunner> {
    bin: String,
    region: String,
    profile: Option<String>,
    runner: R,
}

impl<R: CommandRunner> AwsCli<R> {
    /// Creates a client for `region` using `runner` to execute `bin`.
    #[must_use]
    pub fn new(bin: impl Into<String>, region: impl Into<String>, runner: R) -> Self {
        Self {
            bin: bin.into(),
            region: region.into(),
            profile: None,
            runner,
        }
    }

    /// Selects a named profile for every call.
    #[must_use]
    pub fn with_profile(mut self, profile: Option<String>) -> Self {
        self.profile = profile;
        self
    }

    /// Region passed to every call.
    #[must_use]
    pub fn region(&self) -> &str {
        &self.region
    }

    fn build_args(&self, call: &ApiCall) -> Vec<OsString> {
        let mut args = vec![
            OsString::from(call.service()),
            OsString::from(call.operation()),
        ];
        args.extend(call.args().iter().map(OsString::from));
        args.push(OsString::from("--region"));
        args.push(OsString::from(&self.region));
        args.push(OsString::from("--output"));
        args.push(OsString::from("json"));
        if let Some(profile) = &self.profile {
            args.push(OsString::from("--profile"));
            args.push(OsString::from(profile));
        }
        args
    }

    fn check_output(call: &ApiCall, output: CommandOutput) -> Result<Value, CloudError> {
        if !output.is_success() {
            let stderr = output.stderr.trim();
            let message = if stderr.is_empty() {
                format!("exit status {}", output.status_text())
            } else {
                stderr.to_owned()
            };
            return Err(CloudError::Api {
                operation: call.operation().to_owned(),
                code: parse_error_code(stderr),
                message,
            });
        }

        let stdout = output.stdout.trim();
        if stdout.is_empty() {
            return Ok(Value::Null);
        }
        serde_json::from_str(stdout).map_err(|err| CloudError::Parse {
            operation: call.operation().to_owned(),
            message: err.to_string(),
        })
    }
}

impl<R: CommandRunner> CloudApi for AwsCli<R> {
    fn invoke(&self, call: &ApiCall) -> Result<Value, CloudError> {
        debug!(call = %call, region = %self.region, "invoking aws");
        let args = self.build_args(call);
        let output = self.runner.run(&self.bin, &args)?;
        Self::check_output(call, output)
    }
}

/// Extracts `Code` from `An error occurred (Code) when calling ...`.
fn parse_error_code(stderr: &str) -> Option<String> {
    let start = stderr.find(ERROR_MARKER)? + ERROR_MARKER.len();
    let rest = stderr.get(start..)?;
    let end = rest.find(')')?;
    let code = rest.get(..end)?.trim();
    (!code.is_empty()).then(|| code.to_owned())
}
