//! Best-effort teardown of everything recorded for an installation.
//!
//! Records are visited in reverse dependency order. Each gets exactly one
//! delete call; success or a not-found answer removes the record, any other
//! failure is logged and the record kept so the next run retries it.
//! Deletions that complete asynchronously are awaited before dependencies
//! are attempted.

use std::fmt;

use thiserror::Error;
use tracing::{info, warn};

use crate::cloud::{ApiCall, CloudApi};
use crate::context::InstallationContext;
use crate::graph::{GraphError, ResourceGraph};
use crate::state::{ResourceKey, ResourceKind, ResourceRecord, StateError};
use crate::wait::{WaitError, Waiter};

/// Errors that abort the teardown as a whole.
#[derive(Debug, Error)]
pub enum TeardownError {
    /// Raised when the state store cannot be read or updated.
    #[error(transparent)]
    State(#[from] StateError),
    /// Raised when the dependency graph is invalid.
    #[error(transparent)]
    Graph(#[from] GraphError),
    /// Raised when the run is cancelled during a deletion wait.
    #[error(transparent)]
    Cancelled(WaitError),
}

/// One resource that could not be deleted.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct TeardownFailure {
    /// Record kept in the store.
    pub key: ResourceKey,
    /// Why the delete failed.
    pub reason: String,
}

/// Outcome of a teardown run.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct TeardownSummary {
    /// Records removed after a successful or not-found delete.
    pub deleted: Vec<ResourceKey>,
    /// Records kept because their delete failed.
    pub failed: Vec<TeardownFailure>,
    /// Kinds with no record.
    pub skipped: Vec<ResourceKind>,
}

impl TeardownSummary {
    /// Whether every recorded resource is gone.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }
}

impl fmt::Display for TeardownSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "deleted {}, failed {}, skipped {} kinds",
            self.deleted.len(),
            self.failed.len(),
            self.skipped.len()
        )
    }
}

/// A delete call plus the state to await once it is accepted.
struct Deletion {
    call: ApiCall,
    settle: Option<Settle>,
}

struct Settle {
    describe: ApiCall,
    expression: &'static str,
    expected: &'static str,
}

/// Deletes recorded resources in reverse dependency order.
pub struct TeardownDriver<'a, C: CloudApi> {
    cloud: &'a C,
    context: &'a InstallationContext,
    waiter: &'a Waiter,
}

impl<'a, C: CloudApi> TeardownDriver<'a, C> {
    /// Creates a teardown driver.
    #[must_use]
    pub const fn new(cloud: &'a C, context: &'a InstallationContext, waiter: &'a Waiter) -> Self {
        Self {
            cloud,
            context,
            waiter,
        }
    }

    /// Deletes every recorded resource.
    ///
    /// # Errors
    ///
    /// Returns [`TeardownError`] for store failures, an invalid graph, or
    /// cancellation. Individual delete failures are reported in the summary.
    pub async fn run(&self) -> Result<TeardownSummary, TeardownError> {
        let store = self.context.store();
        let records = store.records()?;
        let mut summary = TeardownSummary::default();

        for kind in ResourceGraph::new().teardown_order()? {
            let mut of_kind: Vec<&ResourceRecord> =
                records.iter().filter(|record| record.kind == kind).collect();
            if of_kind.is_empty() {
                summary.skipped.push(kind);
                continue;
            }
            of_kind.reverse();
            if !kind.is_cloud_resource() {
                continue;
            }
            for record in of_kind {
                self.delete(record, &mut summary).await?;
            }
        }

        if summary.is_complete() {
            for record in records.iter().filter(|record| !record.kind.is_cloud_resource()) {
                store.remove(&record.key())?;
            }
        }
        info!(summary = %summary, "teardown finished");
        Ok(summary)
    }

    async fn delete(
        &self,
        record: &ResourceRecord,
        summary: &mut TeardownSummary,
    ) -> Result<(), TeardownError> {
        let key = record.key();
        let deletion = match deletion_for(record) {
            Ok(deletion) => deletion,
            Err(reason) => {
                warn!(resource = %key, reason = %reason, "cannot delete unreadable record");
                summary.failed.push(TeardownFailure { key, reason });
                return Ok(());
            }
        };

        info!(resource = %key, "deleting");
        match self.cloud.invoke(&deletion.call) {
            Ok(_) => {
                if let Some(settle) = deletion.settle {
                    let what = format!("{key} deletion");
                    match self
                        .waiter
                        .for_state(
                            self.cloud,
                            &what,
                            &settle.describe,
                            settle.expression,
                            settle.expected,
                        )
                        .await
                    {
                        Ok(_) => {}
                        Err(err @ WaitError::Cancelled { .. }) => {
                            return Err(TeardownError::Cancelled(err));
                        }
                        Err(err) => {
                            warn!(resource = %key, error = %err, "deletion did not settle");
                            summary.failed.push(TeardownFailure {
                                key,
                                reason: err.to_string(),
                            });
                            return Ok(());
                        }
                    }
                }
            }
            Err(err) if err.is_not_found() => {
                info!(resource = %key, "already gone");
            }
            Err(err) => {
                warn!(resource = %key, error = %err, "delete failed; record kept");
                summary.failed.push(TeardownFailure {
                    key,
                    reason: err.to_string(),
                });
                return Ok(());
            }
        }

        self.forget(record)?;
        summary.deleted.push(key);
        Ok(())
    }

    fn forget(&self, record: &ResourceRecord) -> Result<(), TeardownError> {
        let store = self.context.store();
        store.remove(&record.key())?;
        if record.kind == ResourceKind::KeyPair {
            store.remove_file(&self.context.key_file_name())?;
        }
        Ok(())
    }
}

fn deletion_for(record: &ResourceRecord) -> Result<Deletion, String> {
    let id = record.identifier().map_err(|err| err.to_string())?;
    let field = |expression: &str| record.lookup(expression).map_err(|err| err.to_string());
    let immediate = |call: ApiCall| Deletion { call, settle: None };

    let deletion = match record.kind {
        ResourceKind::Instance => Deletion {
            call: ApiCall::ec2("terminate-instances").arg("instance-ids", id.clone()),
            settle: Some(Settle {
                describe: ApiCall::ec2("describe-instances").arg("instance-ids", id),
                expression: "Reservations[0].Instances[0].State.Name",
                expected: "terminated",
            }),
        },
        ResourceKind::SecurityGroup => {
            immediate(ApiCall::ec2("delete-security-group").arg("group-id", id))
        }
        ResourceKind::KeyPair => immediate(ApiCall::ec2("delete-key-pair").arg("key-name", id)),
        ResourceKind::RouteTableAssociation => {
            immediate(ApiCall::ec2("disassociate-route-table").arg("association-id", id))
        }
        ResourceKind::Route => immediate(
            ApiCall::ec2("delete-route")
                .arg("route-table-id", field("RouteTableId")?)
                .arg("destination-cidr-block", id),
        ),
        ResourceKind::RouteTable => {
            immediate(ApiCall::ec2("delete-route-table").arg("route-table-id", id))
        }
        ResourceKind::TransitGatewayAttachment => Deletion {
            call: ApiCall::ec2("delete-transit-gateway-vpc-attachment")
                .arg("transit-gateway-attachment-id", id.clone()),
            settle: Some(Settle {
                describe: ApiCall::ec2("describe-transit-gateway-vpc-attachments")
                    .arg("transit-gateway-attachment-ids", id),
                expression: "TransitGatewayVpcAttachments[0].State",
                expected: "deleted",
            }),
        },
        ResourceKind::TransitGateway => {
            immediate(ApiCall::ec2("delete-transit-gateway").arg("transit-gateway-id", id))
        }
        ResourceKind::NatGateway => Deletion {
            call: ApiCall::ec2("delete-nat-gateway").arg("nat-gateway-id", id.clone()),
            settle: Some(Settle {
                describe: ApiCall::ec2("describe-nat-gateways").arg("nat-gateway-ids", id),
                expression: "NatGateways[0].State",
                expected: "deleted",
            }),
        },
        ResourceKind::ElasticIp => {
            immediate(ApiCall::ec2("release-address").arg("allocation-id", id))
        }
        ResourceKind::GatewayAttachment => immediate(
            ApiCall::ec2("detach-internet-gateway")
                .arg("internet-gateway-id", id)
                .arg("vpc-id", field("VpcId")?),
        ),
        ResourceKind::InternetGateway => {
            immediate(ApiCall::ec2("delete-internet-gateway").arg("internet-gateway-id", id))
        }
        ResourceKind::Subnet => immediate(ApiCall::ec2("delete-subnet").arg("subnet-id", id)),
        ResourceKind::Vpc => immediate(ApiCall::ec2("delete-vpc").arg("vpc-id", id)),
        ResourceKind::AvailabilityZones => {
            return Err(String::from("availability zones are not deletable"));
        }
    };
    Ok(deletion)
}
