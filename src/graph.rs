//! Dependency graph over resource kinds.
//!
//! Edges run from a dependency to its dependents, so a topological sort is a
//! valid creation order and its reverse a valid deletion order.

use std::collections::HashMap;

use petgraph::algo::toposort;
use petgraph::graph::{DiGraph, NodeIndex};
use thiserror::Error;

use crate::state::ResourceKind;

/// Errors raised while ordering the graph.
#[derive(Clone, Copy, Debug, Error, Eq, PartialEq)]
pub enum GraphError {
    /// Raised when the declared dependencies form a cycle.
    #[error("resource dependencies contain a cycle through {0}")]
    CycleDetected(ResourceKind),
    /// Raised when a cycle is reported on a node missing from the graph.
    #[error("resource dependencies contain a cycle")]
    Cyclic,
}

/// Kinds each kind must be created after.
#[must_use]
pub const fn dependencies(kind: ResourceKind) -> &'static [ResourceKind] {
    use ResourceKind as K;
    match kind {
        K::AvailabilityZones
        | K::Vpc
        | K::InternetGateway
        | K::ElasticIp
        | K::TransitGateway
        | K::KeyPair => &[],
        K::Subnet => &[K::Vpc, K::AvailabilityZones],
        K::GatewayAttachment => &[K::InternetGateway, K::Vpc],
        K::NatGateway => &[K::Subnet, K::ElasticIp, K::GatewayAttachment],
        K::TransitGatewayAttachment => &[K::TransitGateway, K::Subnet],
        K::RouteTable => &[K::Vpc],
        K::Route => &[
            K::RouteTable,
            K::GatewayAttachment,
            K::NatGateway,
            K::TransitGatewayAttachment,
        ],
        K::RouteTableAssociation => &[K::RouteTable, K::Subnet],
        K::SecurityGroup => &[K::Vpc],
        K::Instance => &[K::KeyPair, K::SecurityGroup, K::Subnet, K::GatewayAttachment],
    }
}

/// The resource dependency graph.
#[derive(Debug)]
pub struct ResourceGraph {
    graph: DiGraph<ResourceKind, ()>,
}

impl ResourceGraph {
    /// Builds the graph from [`dependencies`].
    #[must_use]
    pub fn new() -> Self {
        Self::from_dependencies(dependencies)
    }

    fn from_dependencies(deps: impl Fn(ResourceKind) -> &'static [ResourceKind]) -> Self {
        let mut graph = DiGraph::new();
        let nodes: HashMap<ResourceKind, NodeIndex> = ResourceKind::ALL
            .iter()
            .map(|kind| (*kind, graph.add_node(*kind)))
            .collect();
        for kind in ResourceKind::ALL {
            for dependency in deps(kind) {
                if let (Some(from), Some(to)) = (nodes.get(dependency), nodes.get(&kind)) {
                    graph.add_edge(*from, *to, ());
                }
            }
        }
        Self { graph }
    }

    /// Kinds in a valid creation order.
    ///
    /// # Errors
    ///
    /// Returns [`GraphError::CycleDetected`] when the graph is cyclic.
    pub fn creation_order(&self) -> Result<Vec<ResourceKind>, GraphError> {
        let sorted = toposort(&self.graph, None).map_err(|cycle| {
            self.graph
                .node_weight(cycle.node_id())
                .copied()
                .map_or(GraphError::Cyclic, GraphError::CycleDetected)
        })?;
        Ok(sorted
            .into_iter()
            .filter_map(|idx| self.graph.node_weight(idx).copied())
            .collect())
    }

    /// Kinds in a valid deletion order: dependents before dependencies.
    ///
    /// # Errors
    ///
    /// Returns [`GraphError::CycleDetected`] when the graph is cyclic.
    pub fn teardown_order(&self) -> Result<Vec<ResourceKind>, GraphError> {
        let mut order = self.creation_order()?;
        order.reverse();
        Ok(order)
    }
}

impl Default for ResourceGraph {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn position(order: &[ResourceKind], kind: ResourceKind) -> usize {
        order
            .iter()
            .position(|candidate| *candidate == kind)
            .expect("kind present")
    }

    #[test]
    fn teardown_order_deletes_dependents_first() {
        let order = ResourceGraph::new().teardown_order().expect("acyclic");

        assert_eq!(order.len(), ResourceKind::ALL.len());
        for kind in ResourceKind::ALL {
            for dependency in dependencies(kind) {
                assert!(
                    position(&order, kind) < position(&order, *dependency),
                    "{kind} must be deleted before {dependency}"
                );
            }
        }
    }

    #[test]
    fn instance_goes_before_its_network() {
        let order = ResourceGraph::new().teardown_order().expect("acyclic");
        assert!(position(&order, ResourceKind::Instance) < position(&order, ResourceKind::SecurityGroup));
        assert!(position(&order, ResourceKind::NatGateway) < position(&order, ResourceKind::ElasticIp));
        assert!(position(&order, ResourceKind::Subnet) < position(&order, ResourceKind::Vpc));
    }

    #[test]
    fn instance_is_terminated_before_the_internet_gateway_detaches() {
        assert!(dependencies(ResourceKind::Instance).contains(&ResourceKind::GatewayAttachment));

        let order = ResourceGraph::new().teardown_order().expect("acyclic");

        assert!(
            position(&order, ResourceKind::Instance)
                < position(&order, ResourceKind::GatewayAttachment)
        );
        assert!(
            position(&order, ResourceKind::GatewayAttachment)
                < position(&order, ResourceKind::InternetGateway)
        );
    }

    #[test]
    fn cycles_are_reported() {
        fn cyclic(kind: ResourceKind) -> &'static [ResourceKind] {
            match kind {
                ResourceKind::Vpc => &[ResourceKind::Subnet],
                other => dependencies(other),
            }
        }

        let err = ResourceGraph::from_dependencies(cyclic)
            .creation_order()
            .expect_err("cycle");
        assert!(
            matches!(
                err,
                GraphError::CycleDetected(ResourceKind::Vpc | ResourceKind::Subnet)
            ),
            "cycle should name one of its members, got {err:?}"
        );
    }
}
