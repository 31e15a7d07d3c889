//! Applies a [`Topology`] through the resource provisioner.
//!
//! Steps run in dependency order and every creation goes through
//! [`Provisioner::ensure`], so a re-run only issues describe calls for
//! resources that already exist. Readiness waits run on every pass: a run
//! interrupted mid-wait resumes waiting on the recorded resource.

use serde_json::{Value, json};
use thiserror::Error;
use tracing::info;

use crate::cloud::{ApiCall, CloudApi, CloudError, tolerate_duplicate};
use crate::provisioner::{ProvisionError, Provisioner};
use crate::state::{ResourceKey, ResourceKind};
use crate::topology::{
    NetworkSettings, RoutePlan, RouteTablePlan, RouteTarget, SubnetTier, Topology, TopologyError,
};
use crate::wait::{WaitError, Waiter};

/// Record name shared by singleton resources.
pub const MAIN: &str = "main";

/// Errors raised while building the network.
#[derive(Debug, Error)]
pub enum NetworkError {
    /// Raised when a resource cannot be ensured.
    #[error(transparent)]
    Provision(#[from] ProvisionError),
    /// Raised when the plan is invalid.
    #[error(transparent)]
    Topology(#[from] TopologyError),
    /// Raised when a readiness wait fails.
    #[error(transparent)]
    Wait(#[from] WaitError),
    /// Raised when a configuration call on an existing resource fails.
    #[error("failed to {action}: {source}")]
    Configure {
        /// What was being configured.
        action: String,
        /// Provider error.
        source: CloudError,
    },
    /// Raised when the availability zone record lists no usable zone.
    #[error("availability zone record lists no zone names")]
    NoZoneNames,
}

/// Identifiers of the provisioned network.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct NetworkIds {
    /// VPC.
    pub vpc_id: String,
    /// Public subnets in plan order.
    pub public_subnet_ids: Vec<String>,
    /// Private subnets in plan order.
    pub private_subnet_ids: Vec<String>,
    /// First private subnet of each zone, carrying the transit gateway
    /// attachment.
    pub attachment_subnet_ids: Vec<String>,
    /// Public subnet hosting the NAT gateway and the jumpbox.
    pub jumpbox_subnet_id: String,
    /// Internet gateway.
    pub internet_gateway_id: String,
    /// NAT gateway.
    pub nat_gateway_id: String,
    /// Transit gateway.
    pub transit_gateway_id: String,
    /// Transit gateway VPC attachment.
    pub transit_gateway_attachment_id: String,
}

/// Builds the VPC and everything around it.
pub struct NetworkProvisioner<'a, C: CloudApi> {
    provisioner: &'a Provisioner<'a, C>,
    settings: &'a NetworkSettings,
    waiter: &'a Waiter,
}

impl<'a, C: CloudApi> NetworkProvisioner<'a, C> {
    /// Creates a network provisioner.
    #[must_use]
    pub const fn new(
        provisioner: &'a Provisioner<'a, C>,
        settings: &'a NetworkSettings,
        waiter: &'a Waiter,
    ) -> Self {
        Self {
            provisioner,
            settings,
            waiter,
        }
    }

    /// Ensures every resource of the topology exists and is ready.
    ///
    /// # Errors
    ///
    /// Returns [`NetworkError`] on the first failing step. Resources created
    /// before the failure stay recorded and are reused by the next run.
    pub async fn apply(&self) -> Result<NetworkIds, NetworkError> {
        let zones = self.availability_zones()?;
        let topology = Topology::plan(self.settings, &zones)?;
        info!(
            zones = ?topology.zones,
            subnets = topology.subnets.len(),
            "planned network topology"
        );

        let vpc_id = self.ensure_vpc(&topology)?;
        let mut ids = NetworkIds {
            vpc_id: vpc_id.clone(),
            ..NetworkIds::default()
        };
        let attachment_names: Vec<&str> = topology
            .attachment_subnets()
            .map(|subnet| subnet.name.as_str())
            .collect();
        for subnet in &topology.subnets {
            let key = ResourceKey::new(ResourceKind::Subnet, subnet.name.clone());
            let spec = self.context_tag("subnet", &subnet.name);
            let subnet_id = self.provisioner.ensure(&key, |cloud| {
                cloud.invoke(
                    &ApiCall::ec2("create-subnet")
                        .arg("vpc-id", vpc_id.clone())
                        .arg("cidr-block", subnet.cidr.to_string())
                        .arg("availability-zone", subnet.zone.clone())
                        .arg("tag-specifications", spec),
                )
            })?;
            match subnet.tier {
                SubnetTier::Public => {
                    self.configure(
                        "enable public addresses on public subnet",
                        &ApiCall::ec2("modify-subnet-attribute")
                            .arg("subnet-id", subnet_id.clone())
                            .flag("map-public-ip-on-launch"),
                    )?;
                    ids.public_subnet_ids.push(subnet_id);
                }
                SubnetTier::Private => {
                    if attachment_names.contains(&subnet.name.as_str()) {
                        ids.attachment_subnet_ids.push(subnet_id.clone());
                    }
                    ids.private_subnet_ids.push(subnet_id);
                }
            }
        }
        ids.jumpbox_subnet_id = ids
            .public_subnet_ids
            .first()
            .cloned()
            .unwrap_or_default();

        ids.internet_gateway_id = self.ensure_internet_gateway(&vpc_id)?;
        ids.nat_gateway_id = self.ensure_nat_gateway(&ids.jumpbox_subnet_id).await?;
        ids.transit_gateway_id = self.ensure_transit_gateway().await?;
        ids.transit_gateway_attachment_id = self
            .ensure_transit_gateway_attachment(&ids)
            .await?;

        for table in &topology.route_tables {
            self.ensure_route_table(table, &ids)?;
        }

        info!(vpc = %ids.vpc_id, "network ready");
        Ok(ids)
    }

    /// Cached zone names for the region, in provider order.
    ///
    /// # Errors
    ///
    /// Returns [`NetworkError::NoZoneNames`] when the record lists none.
    pub fn availability_zones(&self) -> Result<Vec<String>, NetworkError> {
        let region = self.provisioner.context().region().to_owned();
        let key = ResourceKey::new(ResourceKind::AvailabilityZones, region);
        let record = self.provisioner.ensure_record(&key, |cloud| {
            cloud.invoke(
                &ApiCall::ec2("describe-availability-zones")
                    .arg("filters", "Name=state,Values=available"),
            )
        })?;
        let zones: Vec<String> = record
            .response
            .get("AvailabilityZones")
            .and_then(Value::as_array)
            .map(|items| {
                items
                    .iter()
                    .filter_map(|item| item.get("ZoneName").and_then(Value::as_str))
                    .map(str::to_owned)
                    .collect()
            })
            .unwrap_or_default();
        if zones.is_empty() {
            return Err(NetworkError::NoZoneNames);
        }
        Ok(zones)
    }

    fn ensure_vpc(&self, topology: &Topology) -> Result<String, NetworkError> {
        let key = ResourceKey::new(ResourceKind::Vpc, MAIN);
        let spec = self.context_tag("vpc", "vpc");
        let vpc_id = self.provisioner.ensure(&key, |cloud| {
            cloud.invoke(
                &ApiCall::ec2("create-vpc")
                    .arg("cidr-block", topology.vpc_cidr.to_string())
                    .arg("tag-specifications", spec),
            )
        })?;
        self.configure(
            "enable DNS hostnames on the VPC",
            &ApiCall::ec2("modify-vpc-attribute")
                .arg("vpc-id", vpc_id.clone())
                .arg("enable-dns-hostnames", r#"{"Value":true}"#),
        )?;
        Ok(vpc_id)
    }

    fn ensure_internet_gateway(&self, vpc_id: &str) -> Result<String, NetworkError> {
        let spec = self.context_tag("internet-gateway", "igw");
        let igw_id = self.provisioner.ensure(
            &ResourceKey::new(ResourceKind::InternetGateway, MAIN),
            |cloud| {
                cloud.invoke(
                    &ApiCall::ec2("create-internet-gateway").arg("tag-specifications", spec),
                )
            },
        )?;
        self.provisioner.ensure(
            &ResourceKey::new(ResourceKind::GatewayAttachment, MAIN),
            |cloud| {
                tolerate_duplicate(
                    cloud.invoke(
                        &ApiCall::ec2("attach-internet-gateway")
                            .arg("internet-gateway-id", igw_id.clone())
                            .arg("vpc-id", vpc_id),
                    ),
                    Value::Null,
                )?;
                Ok(json!({"InternetGatewayId": igw_id, "VpcId": vpc_id}))
            },
        )?;
        Ok(igw_id)
    }

    async fn ensure_nat_gateway(&self, subnet_id: &str) -> Result<String, NetworkError> {
        let eip_spec = self.context_tag("elastic-ip", "nat-eip");
        let allocation_id = self.provisioner.ensure(
            &ResourceKey::new(ResourceKind::ElasticIp, "nat"),
            |cloud| {
                cloud.invoke(
                    &ApiCall::ec2("allocate-address")
                        .arg("domain", "vpc")
                        .arg("tag-specifications", eip_spec),
                )
            },
        )?;
        let nat_spec = self.context_tag("natgateway", "nat");
        let nat_id = self.provisioner.ensure(
            &ResourceKey::new(ResourceKind::NatGateway, MAIN),
            |cloud| {
                cloud.invoke(
                    &ApiCall::ec2("create-nat-gateway")
                        .arg("subnet-id", subnet_id)
                        .arg("allocation-id", allocation_id)
                        .arg("tag-specifications", nat_spec),
                )
            },
        )?;
        self.waiter
            .for_state(
                self.provisioner.cloud(),
                "NAT gateway",
                &ApiCall::ec2("describe-nat-gateways").arg("nat-gateway-ids", nat_id.clone()),
                "NatGateways[0].State",
                "available",
            )
            .await?;
        Ok(nat_id)
    }

    async fn ensure_transit_gateway(&self) -> Result<String, NetworkError> {
        let spec = self.context_tag("transit-gateway", "tgw");
        let description = format!(
            "{} transit gateway",
            self.provisioner.context().tag()
        );
        let tgw_id = self.provisioner.ensure(
            &ResourceKey::new(ResourceKind::TransitGateway, MAIN),
            |cloud| {
                cloud.invoke(
                    &ApiCall::ec2("create-transit-gateway")
                        .arg("description", description)
                        .arg("tag-specifications", spec),
                )
            },
        )?;
        self.waiter
            .for_state(
                self.provisioner.cloud(),
                "transit gateway",
                &ApiCall::ec2("describe-transit-gateways")
                    .arg("transit-gateway-ids", tgw_id.clone()),
                "TransitGateways[0].State",
                "available",
            )
            .await?;
        Ok(tgw_id)
    }

    async fn ensure_transit_gateway_attachment(
        &self,
        ids: &NetworkIds,
    ) -> Result<String, NetworkError> {
        let spec = self.context_tag("transit-gateway-attachment", "tgw-attachment");
        let attachment_id = self.provisioner.ensure(
            &ResourceKey::new(ResourceKind::TransitGatewayAttachment, MAIN),
            |cloud| {
                cloud.invoke(
                    &ApiCall::ec2("create-transit-gateway-vpc-attachment")
                        .arg("transit-gateway-id", ids.transit_gateway_id.clone())
                        .arg("vpc-id", ids.vpc_id.clone())
                        .arg_list("subnet-ids", ids.attachment_subnet_ids.iter().cloned())
                        .arg("tag-specifications", spec),
                )
            },
        )?;
        self.waiter
            .for_state(
                self.provisioner.cloud(),
                "transit gateway attachment",
                &ApiCall::ec2("describe-transit-gateway-vpc-attachments")
                    .arg("transit-gateway-attachment-ids", attachment_id.clone()),
                "TransitGatewayVpcAttachments[0].State",
                "available",
            )
            .await?;
        Ok(attachment_id)
    }

    fn ensure_route_table(&self, table: &RouteTablePlan, ids: &NetworkIds) -> Result<(), NetworkError> {
        let spec = self.context_tag("route-table", &format!("{}-rt", table.name()));
        let table_id = self.provisioner.ensure(
            &ResourceKey::new(ResourceKind::RouteTable, table.name()),
            |cloud| {
                cloud.invoke(
                    &ApiCall::ec2("create-route-table")
                        .arg("vpc-id", ids.vpc_id.clone())
                        .arg("tag-specifications", spec),
                )
            },
        )?;

        for route in &table.routes {
            self.ensure_route(&table_id, route, ids)?;
        }

        let subnet_ids = match table.tier {
            SubnetTier::Public => &ids.public_subnet_ids,
            SubnetTier::Private => &ids.private_subnet_ids,
        };
        for (index, subnet_id) in subnet_ids.iter().enumerate() {
            let key = ResourceKey::new(
                ResourceKind::RouteTableAssociation,
                format!("{}-{index}", table.name()),
            );
            self.provisioner.ensure(&key, |cloud| {
                cloud.invoke(
                    &ApiCall::ec2("associate-route-table")
                        .arg("route-table-id", table_id.clone())
                        .arg("subnet-id", subnet_id.clone()),
                )
            })?;
        }
        Ok(())
    }

    fn ensure_route(
        &self,
        table_id: &str,
        route: &RoutePlan,
        ids: &NetworkIds,
    ) -> Result<(), NetworkError> {
        let (flag, target_id) = match route.target {
            RouteTarget::InternetGateway => ("gateway-id", &ids.internet_gateway_id),
            RouteTarget::NatGateway => ("nat-gateway-id", &ids.nat_gateway_id),
            RouteTarget::TransitGateway => ("transit-gateway-id", &ids.transit_gateway_id),
        };
        self.provisioner.ensure(
            &ResourceKey::new(ResourceKind::Route, route.name.clone()),
            |cloud| {
                tolerate_duplicate(
                    cloud.invoke(
                        &ApiCall::ec2("create-route")
                            .arg("route-table-id", table_id)
                            .arg("destination-cidr-block", route.destination.clone())
                            .arg(flag, target_id.clone()),
                    ),
                    Value::Null,
                )?;
                Ok(json!({
                    "RouteTableId": table_id,
                    "DestinationCidrBlock": route.destination,
                }))
            },
        )?;
        Ok(())
    }

    fn configure(&self, action: &str, call: &ApiCall) -> Result<(), NetworkError> {
        self.provisioner
            .cloud()
            .invoke(call)
            .map(drop)
            .map_err(|source| NetworkError::Configure {
                action: action.to_owned(),
                source,
            })
    }

    fn context_tag(&self, resource_type: &str, suffix: &str) -> String {
        self.provisioner
            .context()
            .tag_specification(resource_type, suffix)
    }
}

#[cfg(test)]
mod tests;
