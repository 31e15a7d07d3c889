//! Declarative network plan.
//!
//! [`Topology::plan`] turns the network settings and the available zones into
//! the full list of subnets, route tables and routes before any call is made.
//! The network provisioner then applies the plan resource by resource.

use std::fmt;
use std::net::Ipv4Addr;
use std::str::FromStr;

use thiserror::Error;

const SUBNET_PREFIX: u8 = 24;
const SUBNET_SIZE: u32 = 256;
/// Destination of the default routes.
pub const DEFAULT_ROUTE: &str = "0.0.0.0/0";

/// Errors raised while planning the topology.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum TopologyError {
    /// Raised when a CIDR block cannot be parsed.
    #[error("invalid CIDR block '{value}'")]
    InvalidCidr {
        /// Offending text.
        value: String,
    },
    /// Raised when the VPC block is too small to hold `/24` subnets.
    #[error("VPC block {cidr} must have a prefix of /24 or shorter")]
    PrefixTooLong {
        /// VPC block.
        cidr: Ipv4Cidr,
    },
    /// Raised when more subnets are needed than the VPC block holds.
    #[error("VPC block {cidr} holds {available} /24 subnets but {requested} are required")]
    Exhausted {
        /// VPC block.
        cidr: Ipv4Cidr,
        /// Subnets required by the plan.
        requested: u32,
        /// Subnets that fit.
        available: u32,
    },
    /// Raised when the internal supernet overlaps the VPC block.
    #[error("internal supernet {supernet} overlaps VPC block {cidr}")]
    Overlap {
        /// VPC block.
        cidr: Ipv4Cidr,
        /// Internal supernet.
        supernet: Ipv4Cidr,
    },
    /// Raised when no availability zone can be used.
    #[error("no availability zones are available in the region")]
    NoZones,
    /// Raised when a tier would have no subnets at all.
    #[error("at least one {tier} subnet per zone is required")]
    EmptyTier {
        /// Tier without subnets.
        tier: SubnetTier,
    },
}

/// An IPv4 block in CIDR notation, normalised to its network address.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub struct Ipv4Cidr {
    network: Ipv4Addr,
    prefix: u8,
}

impl Ipv4Cidr {
    /// Creates a block, masking host bits off `address`.
    ///
    /// # Errors
    ///
    /// Returns [`TopologyError::InvalidCidr`] when `prefix` exceeds 32.
    pub fn new(address: Ipv4Addr, prefix: u8) -> Result<Self, TopologyError> {
        if prefix > 32 {
            return Err(TopologyError::InvalidCidr {
                value: format!("{address}/{prefix}"),
            });
        }
        let network = Ipv4Addr::from(u32::from(address) & mask(prefix));
        Ok(Self { network, prefix })
    }

    /// Network address.
    #[must_use]
    pub const fn network(&self) -> Ipv4Addr {
        self.network
    }

    /// Prefix length.
    #[must_use]
    pub const fn prefix(&self) -> u8 {
        self.prefix
    }

    /// Whether the two blocks share any address.
    #[must_use]
    pub fn overlaps(&self, other: &Self) -> bool {
        let shared = mask(self.prefix.min(other.prefix));
        u32::from(self.network) & shared == u32::from(other.network) & shared
    }

    /// Number of `/24` blocks inside this block.
    fn subnet_capacity(&self) -> Result<u32, TopologyError> {
        let spare = SUBNET_PREFIX
            .checked_sub(self.prefix)
            .ok_or(TopologyError::PrefixTooLong { cidr: *self })?;
        Ok(1_u32 << spare)
    }

    /// The `index`-th `/24` block inside this block.
    fn subnet(&self, index: u32) -> Option<Self> {
        let offset = index.checked_mul(SUBNET_SIZE)?;
        let address = u32::from(self.network).checked_add(offset)?;
        Some(Self {
            network: Ipv4Addr::from(address),
            prefix: SUBNET_PREFIX,
        })
    }
}

fn mask(prefix: u8) -> u32 {
    u32::MAX
        .checked_shl(u32::from(32 - prefix.min(32)))
        .unwrap_or(0)
}

impl FromStr for Ipv4Cidr {
    type Err = TopologyError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let invalid = || TopologyError::InvalidCidr {
            value: value.to_owned(),
        };
        let (address, prefix) = value.trim().split_once('/').ok_or_else(invalid)?;
        let parsed_address = Ipv4Addr::from_str(address).map_err(|_| invalid())?;
        let parsed_prefix = prefix.parse::<u8>().map_err(|_| invalid())?;
        Self::new(parsed_address, parsed_prefix).map_err(|_| invalid())
    }
}

impl fmt::Display for Ipv4Cidr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.network, self.prefix)
    }
}

/// Inputs to the plan.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct NetworkSettings {
    /// VPC block.
    pub vpc_cidr: Ipv4Cidr,
    /// Supernet routed to the transit gateway.
    pub internal_supernet: Ipv4Cidr,
    /// Upper bound on zones used.
    pub max_zones: usize,
    /// Public subnets created in each zone.
    pub public_subnets_per_zone: usize,
    /// Private subnets created in each zone.
    pub private_subnets_per_zone: usize,
}

/// Whether a subnet routes through the internet gateway or the NAT gateway.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum SubnetTier {
    /// Default route via the internet gateway.
    Public,
    /// Default route via the NAT gateway.
    Private,
}

impl SubnetTier {
    /// Lowercase label used in record and resource names.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Public => "public",
            Self::Private => "private",
        }
    }
}

impl fmt::Display for SubnetTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One planned subnet.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct SubnetPlan {
    /// Record name, such as `public-0`.
    pub name: String,
    /// Routing tier.
    pub tier: SubnetTier,
    /// Availability zone.
    pub zone: String,
    /// Allocated `/24` block.
    pub cidr: Ipv4Cidr,
}

/// Gateway a route points at.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum RouteTarget {
    /// The internet gateway.
    InternetGateway,
    /// The NAT gateway.
    NatGateway,
    /// The transit gateway.
    TransitGateway,
}

/// One planned route.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct RoutePlan {
    /// Record name, unique across route tables.
    pub name: String,
    /// Destination block.
    pub destination: String,
    /// Gateway used.
    pub target: RouteTarget,
}

/// One planned route table with its routes.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct RouteTablePlan {
    /// Tier whose subnets are associated with the table.
    pub tier: SubnetTier,
    /// Routes added to the table.
    pub routes: Vec<RoutePlan>,
}

impl RouteTablePlan {
    fn for_tier(tier: SubnetTier, internal_supernet: Ipv4Cidr) -> Self {
        let default_target = match tier {
            SubnetTier::Public => RouteTarget::InternetGateway,
            SubnetTier::Private => RouteTarget::NatGateway,
        };
        Self {
            tier,
            routes: vec![
                RoutePlan {
                    name: format!("{tier}-default"),
                    destination: String::from(DEFAULT_ROUTE),
                    target: default_target,
                },
                RoutePlan {
                    name: format!("{tier}-internal"),
                    destination: internal_supernet.to_string(),
                    target: RouteTarget::TransitGateway,
                },
            ],
        }
    }

    /// Record name of the table.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        self.tier.as_str()
    }
}

/// Complete network plan.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Topology {
    /// VPC block.
    pub vpc_cidr: Ipv4Cidr,
    /// Zones in use, in order.
    pub zones: Vec<String>,
    /// Subnets in zone order, public before private within a zone.
    pub subnets: Vec<SubnetPlan>,
    /// Public and private route tables.
    pub route_tables: Vec<RouteTablePlan>,
}

impl Topology {
    /// Plans the network for `zones`, using at most `settings.max_zones`.
    ///
    /// # Errors
    ///
    /// Returns [`TopologyError`] when no zone is usable, a tier would be
    /// empty, the supernet overlaps the VPC, or the VPC block cannot hold
    /// every `/24`.
    pub fn plan(settings: &NetworkSettings, zones: &[String]) -> Result<Self, TopologyError> {
        if settings.public_subnets_per_zone == 0 {
            return Err(TopologyError::EmptyTier {
                tier: SubnetTier::Public,
            });
        }
        if settings.private_subnets_per_zone == 0 {
            return Err(TopologyError::EmptyTier {
                tier: SubnetTier::Private,
            });
        }
        if settings.vpc_cidr.overlaps(&settings.internal_supernet) {
            return Err(TopologyError::Overlap {
                cidr: settings.vpc_cidr,
                supernet: settings.internal_supernet,
            });
        }
        let selected: Vec<String> = zones.iter().take(settings.max_zones).cloned().collect();
        if selected.is_empty() {
            return Err(TopologyError::NoZones);
        }

        let available = settings.vpc_cidr.subnet_capacity()?;
        let per_zone = settings
            .public_subnets_per_zone
            .saturating_add(settings.private_subnets_per_zone);
        let requested = u32::try_from(per_zone.saturating_mul(selected.len())).unwrap_or(u32::MAX);
        if requested > available {
            return Err(TopologyError::Exhausted {
                cidr: settings.vpc_cidr,
                requested,
                available,
            });
        }

        let mut allocator = BlockAllocator::new(settings.vpc_cidr, available);
        let mut subnets = Vec::with_capacity(per_zone.saturating_mul(selected.len()));
        let mut public_index = 0_usize;
        let mut private_index = 0_usize;
        for zone in &selected {
            for _ in 0..settings.public_subnets_per_zone {
                subnets.push(SubnetPlan {
                    name: format!("public-{public_index}"),
                    tier: SubnetTier::Public,
                    zone: zone.clone(),
                    cidr: allocator.next_block()?,
                });
                public_index += 1;
            }
            for _ in 0..settings.private_subnets_per_zone {
                subnets.push(SubnetPlan {
                    name: format!("private-{private_index}"),
                    tier: SubnetTier::Private,
                    zone: zone.clone(),
                    cidr: allocator.next_block()?,
                });
                private_index += 1;
            }
        }

        Ok(Self {
            vpc_cidr: settings.vpc_cidr,
            zones: selected,
            subnets,
            route_tables: vec![
                RouteTablePlan::for_tier(SubnetTier::Public, settings.internal_supernet),
                RouteTablePlan::for_tier(SubnetTier::Private, settings.internal_supernet),
            ],
        })
    }

    /// Subnets of `tier`, in plan order.
    pub fn subnets_in(&self, tier: SubnetTier) -> impl Iterator<Item = &SubnetPlan> {
        self.subnets.iter().filter(move |subnet| subnet.tier == tier)
    }

    /// First private subnet of each zone, in zone order. A transit gateway
    /// attachment accepts at most one subnet per zone.
    pub fn attachment_subnets(&self) -> impl Iterator<Item = &SubnetPlan> {
        self.zones.iter().filter_map(move |zone| {
            self.subnets_in(SubnetTier::Private)
                .find(|subnet| subnet.zone == *zone)
        })
    }

    /// Subnet hosting the NAT gateway and the jumpbox: the first public one.
    #[must_use]
    pub fn nat_subnet(&self) -> Option<&SubnetPlan> {
        self.subnets_in(SubnetTier::Public).next()
    }
}

/// Hands out consecutive `/24` blocks.
struct BlockAllocator {
    cidr: Ipv4Cidr,
    available: u32,
    next: u32,
}

impl BlockAllocator {
    const fn new(cidr: Ipv4Cidr, available: u32) -> Self {
        Self {
            cidr,
            available,
            next: 0,
        }
    }

    fn next_block(&mut self) -> Result<Ipv4Cidr, TopologyError> {
        let exhausted = TopologyError::Exhausted {
            cidr: self.cidr,
            requested: self.next.saturating_add(1),
            available: self.available,
        };
        if self.next >= self.available {
            return Err(exhausted);
        }
        let block = self.cidr.subnet(self.next).ok_or(exhausted)?;
        self.next += 1;
        Ok(block)
    }
}
