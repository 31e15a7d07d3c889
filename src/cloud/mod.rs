//! Cloud provider API seam.
//!
//! Provisioning code builds [`ApiCall`] values and hands them to a
//! [`CloudApi`]. The production implementation, [`AwsCli`], shells out to the
//! `aws` command-line client; tests use
//! [`ScriptedCloud`](crate::test_support::ScriptedCloud).

mod aws_cli;

use std::fmt;

use serde_json::Value;
use thiserror::Error;

use crate::process::RunnerError;

pub use aws_cli::{AwsCli, DEFAULT_AWS_BIN};

/// Operation prefixes that create or attach something in the account.
const CREATION_PREFIXES: [&str; 5] = ["create-", "run-", "allocate-", "associate-", "attach-"];

/// A single provider request: service, operation, and CLI-style arguments.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ApiCall {
    service: String,
    operation: String,
    args: Vec<String>,
}

impl ApiCall {
    /// Starts a call against `service` (for example `ec2`).
    #[must_use]
    pub fn new(service: impl Into<String>, operation: impl Into<String>) -> Self {
        Self {
            service: service.into(),
            operation: operation.into(),
            args: Vec::new(),
        }
    }

    /// Starts an EC2 call.
    #[must_use]
    pub fn ec2(operation: impl Into<String>) -> Self {
        Self::new("ec2", operation)
    }

    /// Appends `--flag value`.
    #[must_use]
    pub fn arg(mut self, flag: &str, value: impl Into<String>) -> Self {
        self.args.push(format!("--{flag}"));
        self.args.push(value.into());
        self
    }

    /// Appends `--flag` followed by several values.
    #[must_use]
    pub fn arg_list<I, S>(mut self, flag: &str, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.push(format!("--{flag}"));
        self.args.extend(values.into_iter().map(Into::into));
        self
    }

    /// Appends a bare `--flag`.
    #[must_use]
    pub fn flag(mut self, flag: &str) -> Self {
        self.args.push(format!("--{flag}"));
        self
    }

    /// Service name.
    #[must_use]
    pub fn service(&self) -> &str {
        &self.service
    }

    /// Operation name in CLI spelling (for example `create-vpc`).
    #[must_use]
    pub fn operation(&self) -> &str {
        &self.operation
    }

    /// Arguments in order.
    #[must_use]
    pub fn args(&self) -> &[String] {
        &self.args
    }

    /// Returns the value following `--flag`, if present.
    #[must_use]
    pub fn value_of(&self, flag: &str) -> Option<&str> {
        let wanted = format!("--{flag}");
        self.args
            .iter()
            .position(|arg| *arg == wanted)
            .and_then(|pos| self.args.get(pos + 1))
            .map(String::as_str)
    }

    /// Whether the call creates or attaches something in the account.
    #[must_use]
    pub fn is_creation(&self) -> bool {
        CREATION_PREFIXES
            .iter()
            .any(|prefix| self.operation.starts_with(prefix))
    }
}

impl fmt::Display for ApiCall {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.service, self.operation)
    }
}

/// Errors raised by cloud calls.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum CloudError {
    /// Raised when the client binary cannot be executed.
    #[error(transparent)]
    Runner(#[from] RunnerError),
    /// Raised when the provider rejects the request.
    #[error("{operation} failed{}: {message}", code.as_deref().map(|code| format!(" ({code})")).unwrap_or_default())]
    Api {
        /// Operation that failed.
        operation: String,
        /// Provider error code such as `InvalidVpcID.NotFound`.
        code: Option<String>,
        /// Provider error message or captured stderr.
        message: String,
    },
    /// Raised when the provider response is not valid JSON.
    #[error("failed to parse {operation} response: {message}")]
    Parse {
        /// Operation whose output was unreadable.
        operation: String,
        /// Parser error message.
        message: String,
    },
}

impl CloudError {
    /// Provider error code, when the provider reported one.
    #[must_use]
    pub fn code(&self) -> Option<&str> {
        match self {
            Self::Api { code, .. } => code.as_deref(),
            Self::Runner(_) | Self::Parse { .. } => None,
        }
    }

    /// Whether the provider reports that the resource or permission already
    /// exists. Such errors are expected on re-runs and are ignored.
    #[must_use]
    pub fn is_duplicate(&self) -> bool {
        self.code().is_some_and(|code| {
            code.ends_with(".Duplicate")
                || code.contains("AlreadyExists")
                || code == "Resource.AlreadyAssociated"
        })
    }

    /// Whether the provider reports that the target no longer exists.
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        self.code()
            .is_some_and(|code| code.ends_with("NotFound") || code == "Gateway.NotAttached")
    }
}

/// Minimal interface to the cloud provider.
pub trait CloudApi {
    /// Executes `call` and returns the parsed JSON response. Operations that
    /// print nothing on success yield `Value::Null`.
    ///
    /// # Errors
    ///
    /// Returns [`CloudError`] when the call cannot be made, is rejected, or
    /// returns unreadable output.
    fn invoke(&self, call: &ApiCall) -> Result<Value, CloudError>;
}

impl<T: CloudApi + ?Sized> CloudApi for &T {
    fn invoke(&self, call: &ApiCall) -> Result<Value, CloudError> {
        (**self).invoke(call)
    }
}

/// Converts a duplicate error into `fallback`; other results pass through.
///
/// # Errors
///
/// Returns the original error when it is not a duplicate.
pub fn tolerate_duplicate(
    result: Result<Value, CloudError>,
    fallback: Value,
) -> Result<Value, CloudError> {
    match result {
        Err(err) if err.is_duplicate() => {
            tracing::warn!(error = %err, "ignoring duplicate resource error");
            Ok(fallback)
        }
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn api_error(code: &str) -> CloudError {
        CloudError::Api {
            operation: String::from("op"),
            code: Some(code.to_owned()),
            message: String::from("boom"),
        }
    }

    #[rstest]
    #[case("create-vpc", true)]
    #[case("run-instances", true)]
    #[case("authorize-security-group-ingress", false)]
    #[case("describe-vpcs", false)]
    #[case("modify-vpc-attribute", false)]
    #[case("delete-vpc", false)]
    fn is_creation_matches_mutating_prefixes(#[case] operation: &str, #[case] expected: bool) {
        assert_eq!(ApiCall::ec2(operation).is_creation(), expected);
    }

    #[test]
    fn value_of_returns_flag_argument() {
        let call = ApiCall::ec2("create-subnet")
            .arg("vpc-id", "vpc-1")
            .arg("cidr-block", "10.0.0.0/24");
        assert_eq!(call.value_of("cidr-block"), Some("10.0.0.0/24"));
        assert_eq!(call.value_of("missing"), None);
    }

    #[rstest]
    #[case("InvalidPermission.Duplicate", true, false)]
    #[case("RouteAlreadyExists", true, false)]
    #[case("Resource.AlreadyAssociated", true, false)]
    #[case("InvalidVpcID.NotFound", false, true)]
    #[case("Gateway.NotAttached", false, true)]
    #[case("DependencyViolation", false, false)]
    fn classifies_provider_codes(
        #[case] code: &str,
        #[case] duplicate: bool,
        #[case] not_found: bool,
    ) {
        let err = api_error(code);
        assert_eq!(err.is_duplicate(), duplicate);
        assert_eq!(err.is_not_found(), not_found);
    }

    #[test]
    fn tolerate_duplicate_swallows_only_duplicates() {
        let fallback = serde_json::json!({"ok": true});
        let tolerated =
            tolerate_duplicate(Err(api_error("InvalidPermission.Duplicate")), fallback.clone());
        assert_eq!(tolerated, Ok(fallback.clone()));

        let surfaced = tolerate_duplicate(Err(api_error("UnauthorizedOperation")), fallback);
        assert!(surfaced.is_err());
    }

    #[test]
    fn api_error_display_includes_code() {
        assert_eq!(
            api_error("DependencyViolation").to_string(),
            "op failed (DependencyViolation): boom"
        );
    }
}
