//! Resource kinds and record keys.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Every kind of record the state store can hold.
#[derive(Clone, Copy, Debug, Deserialize, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ResourceKind {
    /// Cached `describe-availability-zones` result; not a cloud resource.
    AvailabilityZones,
    /// The VPC.
    Vpc,
    /// A public or private subnet.
    Subnet,
    /// The internet gateway.
    InternetGateway,
    /// Attachment of the internet gateway to the VPC.
    GatewayAttachment,
    /// Elastic IP backing the NAT gateway.
    ElasticIp,
    /// The NAT gateway.
    NatGateway,
    /// The transit gateway.
    TransitGateway,
    /// Attachment of the transit gateway to the private subnets.
    TransitGatewayAttachment,
    /// A route table.
    RouteTable,
    /// A single route inside a route table.
    Route,
    /// Association of a route table with a subnet.
    RouteTableAssociation,
    /// The SSH key pair for the jumpbox.
    KeyPair,
    /// The jumpbox security group.
    SecurityGroup,
    /// The jumpbox instance.
    Instance,
}

impl ResourceKind {
    /// All kinds in creation order.
    pub const ALL: [Self; 15] = [
        Self::AvailabilityZones,
        Self::Vpc,
        Self::Subnet,
        Self::InternetGateway,
        Self::GatewayAttachment,
        Self::ElasticIp,
        Self::NatGateway,
        Self::TransitGateway,
        Self::TransitGatewayAttachment,
        Self::RouteTable,
        Self::Route,
        Self::RouteTableAssociation,
        Self::KeyPair,
        Self::SecurityGroup,
        Self::Instance,
    ];

    /// Stable lowercase name used in file names and logs.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::AvailabilityZones => "availability-zones",
            Self::Vpc => "vpc",
            Self::Subnet => "subnet",
            Self::InternetGateway => "internet-gateway",
            Self::GatewayAttachment => "gateway-attachment",
            Self::ElasticIp => "elastic-ip",
            Self::NatGateway => "nat-gateway",
            Self::TransitGateway => "transit-gateway",
            Self::TransitGatewayAttachment => "transit-gateway-attachment",
            Self::RouteTable => "route-table",
            Self::Route => "route",
            Self::RouteTableAssociation => "route-table-association",
            Self::KeyPair => "key-pair",
            Self::SecurityGroup => "security-group",
            Self::Instance => "instance",
        }
    }

    /// Lookup expression locating the identifier inside a record's response.
    #[must_use]
    pub const fn id_lookup(self) -> &'static str {
        match self {
            Self::AvailabilityZones => "AvailabilityZones[0].ZoneName",
            Self::Vpc => "Vpc.VpcId",
            Self::Subnet => "Subnet.SubnetId",
            Self::InternetGateway => "InternetGateway.InternetGatewayId",
            Self::GatewayAttachment => "InternetGatewayId",
            Self::ElasticIp => "AllocationId",
            Self::NatGateway => "NatGateway.NatGatewayId",
            Self::TransitGateway => "TransitGateway.TransitGatewayId",
            Self::TransitGatewayAttachment => {
                "TransitGatewayVpcAttachment.TransitGatewayAttachmentId"
            }
            Self::RouteTable => "RouteTable.RouteTableId",
            Self::Route => "DestinationCidrBlock",
            Self::RouteTableAssociation => "AssociationId",
            Self::KeyPair => "KeyName",
            Self::SecurityGroup => "GroupId",
            Self::Instance => "Instances[0].InstanceId",
        }
    }

    /// Whether the record stands for something that exists in AWS and must
    /// be deleted on teardown.
    #[must_use]
    pub const fn is_cloud_resource(self) -> bool {
        !matches!(self, Self::AvailabilityZones)
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identifies one record: a kind plus a name unique within that kind.
#[derive(Clone, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct ResourceKey {
    kind: ResourceKind,
    name: String,
}

impl ResourceKey {
    /// Creates a key. Names are validated when the key reaches the store.
    #[must_use]
    pub fn new(kind: ResourceKind, name: impl Into<String>) -> Self {
        Self {
            kind,
            name: name.into(),
        }
    }

    /// The record kind.
    #[must_use]
    pub const fn kind(&self) -> ResourceKind {
        self.kind
    }

    /// The record name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// File name of the record inside the state directory.
    #[must_use]
    pub fn file_name(&self) -> String {
        format!("{}.{}.json", self.kind.as_str(), self.name)
    }

    pub(crate) fn is_valid_name(&self) -> bool {
        !self.name.is_empty()
            && self
                .name
                .chars()
                .all(|ch| ch.is_ascii_alphanumeric() || ch == '-')
    }
}

impl fmt::Display for ResourceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.kind, self.name)
    }
}
