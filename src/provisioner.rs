//! Idempotent resource provisioning.
//!
//! [`Provisioner::ensure`] is the only way resources get created: a record
//! already in the state store short-circuits the creation call, otherwise the
//! creation action runs once and its raw response is persisted before the
//! identifier is extracted. Failed calls leave no record and are not retried.

use serde_json::Value;
use thiserror::Error;
use tracing::{debug, info};

use crate::cloud::{CloudApi, CloudError};
use crate::context::InstallationContext;
use crate::lookup::LookupError;
use crate::state::{ResourceKey, ResourceRecord, StateError};

/// Errors raised while ensuring a resource.
#[derive(Debug, Error)]
pub enum ProvisionError {
    /// Raised when the state store fails.
    #[error(transparent)]
    State(#[from] StateError),
    /// Raised when the creation call fails.
    #[error("failed to create {key}: {source}")]
    Cloud {
        /// Resource being created.
        key: ResourceKey,
        /// Underlying provider error.
        source: CloudError,
    },
    /// Raised when the identifier cannot be read from the record.
    #[error("cannot extract identifier of {key}: {source}")]
    Extraction {
        /// Resource whose record is unusable.
        key: ResourceKey,
        /// Lookup failure.
        source: LookupError,
    },
    /// Raised when a dependent lookup on an existing record fails.
    #[error("cannot read {expression} from {key}: {source}")]
    Lookup {
        /// Record being read.
        key: ResourceKey,
        /// Expression evaluated.
        expression: String,
        /// Lookup failure.
        source: LookupError,
    },
}

/// Creates resources at most once per installation.
#[derive(Debug)]
pub struct Provisioner<'a, C: CloudApi> {
    cloud: &'a C,
    context: &'a InstallationContext,
}

impl<'a, C: CloudApi> Provisioner<'a, C> {
    /// Creates a provisioner issuing calls through `cloud`.
    #[must_use]
    pub const fn new(cloud: &'a C, context: &'a InstallationContext) -> Self {
        Self { cloud, context }
    }

    /// Cloud client.
    #[must_use]
    pub const fn cloud(&self) -> &'a C {
        self.cloud
    }

    /// Installation context.
    #[must_use]
    pub const fn context(&self) -> &'a InstallationContext {
        self.context
    }

    /// Returns the record for `key`, running `create` only when no non-empty
    /// record exists yet.
    ///
    /// # Errors
    ///
    /// Returns [`ProvisionError::Cloud`] when `create` fails (nothing is
    /// persisted) and [`ProvisionError::State`] on store failures.
    pub fn ensure_record<F>(&self, key: &ResourceKey, create: F) -> Result<ResourceRecord, ProvisionError>
    where
        F: FnOnce(&C) -> Result<Value, CloudError>,
    {
        let store = self.context.store();
        if let Some(record) = store.load(key)?
            && !record.is_empty()
        {
            debug!(resource = %key, "reusing recorded resource");
            return Ok(record);
        }

        info!(resource = %key, "creating resource");
        let response = create(self.cloud).map_err(|source| ProvisionError::Cloud {
            key: key.clone(),
            source,
        })?;
        let record = ResourceRecord::new(key, response);
        store.save(&record)?;
        Ok(record)
    }

    /// Ensures the resource exists and returns its identifier.
    ///
    /// # Errors
    ///
    /// Returns the errors of [`Provisioner::ensure_record`] plus
    /// [`ProvisionError::Extraction`] when the response carries no usable
    /// identifier.
    pub fn ensure<F>(&self, key: &ResourceKey, create: F) -> Result<String, ProvisionError>
    where
        F: FnOnce(&C) -> Result<Value, CloudError>,
    {
        let record = self.ensure_record(key, create)?;
        let id = extract(key, &record)?;
        info!(resource = %key, id = %id, "resource ready");
        Ok(id)
    }

    /// Identifier of a resource that must already have been provisioned.
    ///
    /// # Errors
    ///
    /// Returns [`StateError::Required`] (wrapped) when the record is absent
    /// and [`ProvisionError::Extraction`] when it is unusable.
    pub fn identifier(&self, key: &ResourceKey) -> Result<String, ProvisionError> {
        let record = self.context.store().require(key)?;
        extract(key, &record)
    }

    /// Reads `expression` from an existing record.
    ///
    /// # Errors
    ///
    /// Returns [`ProvisionError::Lookup`] when the value is missing and
    /// [`StateError::Required`] (wrapped) when the record is absent.
    pub fn lookup(&self, key: &ResourceKey, expression: &str) -> Result<String, ProvisionError> {
        let record = self.context.store().require(key)?;
        record
            .lookup(expression)
            .map_err(|source| ProvisionError::Lookup {
                key: key.clone(),
                expression: expression.to_owned(),
                source,
            })
    }
}

fn extract(key: &ResourceKey, record: &ResourceRecord) -> Result<String, ProvisionError> {
    record
        .identifier()
        .map_err(|source| ProvisionError::Extraction {
            key: key.clone(),
            source,
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cloud::ApiCall;
    use crate::state::{ResourceKind, StateStore};
    use crate::tag::InstallationTag;
    use crate::test_support::ScriptedCloud;
    use camino::Utf8PathBuf;
    use rstest::{fixture, rstest};
    use serde_json::json;
    use tempfile::TempDir;

    struct Harness {
        _tmp: TempDir,
        context: InstallationContext,
        cloud: ScriptedCloud,
    }

    #[fixture]
    fn harness() -> Harness {
        let tmp = TempDir::new().expect("tempdir");
        let path = Utf8PathBuf::from_path_buf(tmp.path().join("demo")).expect("utf8 path");
        let tag = InstallationTag::new("demo").expect("tag");
        let store = StateStore::open(&path, &tag).expect("store");
        Harness {
            _tmp: tmp,
            context: InstallationContext::new("eu-west-1", store),
            cloud: ScriptedCloud::new(),
        }
    }

    fn vpc_key() -> ResourceKey {
        ResourceKey::new(ResourceKind::Vpc, "main")
    }

    fn create_vpc(cloud: &ScriptedCloud) -> Result<Value, CloudError> {
        cloud.invoke(&ApiCall::ec2("create-vpc").arg("cidr-block", "10.0.0.0/16"))
    }

    #[rstest]
    fn ensure_creates_once_and_reuses_record(harness: Harness) {
        harness
            .cloud
            .push("create-vpc", json!({"Vpc": {"VpcId": "vpc-123"}}));
        let provisioner = Provisioner::new(&harness.cloud, &harness.context);

        let first = provisioner.ensure(&vpc_key(), create_vpc).expect("first ensure");
        let second = provisioner
            .ensure(&vpc_key(), create_vpc)
            .expect("second ensure");

        assert_eq!(first, "vpc-123");
        assert_eq!(second, "vpc-123");
        assert_eq!(harness.cloud.calls_to("create-vpc").len(), 1);
    }

    #[rstest]
    fn failed_creation_leaves_no_record(harness: Harness) {
        harness.cloud.push_error("create-vpc", "VpcLimitExceeded");
        let provisioner = Provisioner::new(&harness.cloud, &harness.context);

        let err = provisioner
            .ensure(&vpc_key(), create_vpc)
            .expect_err("creation should fail");

        assert!(matches!(err, ProvisionError::Cloud { .. }), "got {err:?}");
        assert_eq!(
            harness.context.store().load(&vpc_key()).expect("load"),
            None
        );
    }

    #[rstest]
    fn response_without_identifier_is_fatal(harness: Harness) {
        harness
            .cloud
            .push("create-vpc", json!({"Vpc": {"VpcId": "  "}}));
        let provisioner = Provisioner::new(&harness.cloud, &harness.context);

        let err = provisioner
            .ensure(&vpc_key(), create_vpc)
            .expect_err("empty identifier should fail");

        assert!(
            matches!(
                err,
                ProvisionError::Extraction {
                    source: LookupError::Empty { .. },
                    ..
                }
            ),
            "got {err:?}"
        );
    }

    #[rstest]
    fn empty_record_triggers_creation(harness: Harness) {
        harness
            .context
            .store()
            .save(&ResourceRecord::new(&vpc_key(), Value::Null))
            .expect("seed empty record");
        harness
            .cloud
            .push("create-vpc", json!({"Vpc": {"VpcId": "vpc-9"}}));
        let provisioner = Provisioner::new(&harness.cloud, &harness.context);

        let id = provisioner.ensure(&vpc_key(), create_vpc).expect("ensure");

        assert_eq!(id, "vpc-9");
        assert_eq!(harness.cloud.calls_to("create-vpc").len(), 1);
    }

    #[rstest]
    fn identifier_requires_existing_record(harness: Harness) {
        let provisioner = Provisioner::new(&harness.cloud, &harness.context);

        let err = provisioner
            .identifier(&vpc_key())
            .expect_err("missing record");

        assert!(
            matches!(err, ProvisionError::State(StateError::Required { .. })),
            "got {err:?}"
        );
        assert!(harness.cloud.calls().is_empty());
    }
}
