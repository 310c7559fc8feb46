//
// Copyright (c) The Arbor Contributors
//
// SPDX-License-Identifier: MIT
//

use std::fmt::Write;
use std::net::Ipv4Addr;

use ipnetwork::Ipv4Network;
use itertools::Itertools;

use crate::router::Router;
use crate::subnet::SubnetSite;
use crate::tree::{NetworkTree, NodeType};

// Bipartite graph linking inferred routers to measured subnets.
#[derive(Debug, Default)]
pub struct BipartiteGraph {
    // Router IDs are 1-based positions in this list.
    pub routers: Vec<Router>,
    pub subnets: Vec<Ipv4Network>,
    pub edges: Vec<BipartiteEdge>,
}

// One router-subnet edge. Edges contributed by a load-balanced
// neighborhood carry the ingress label that produced them.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct BipartiteEdge {
    pub router: usize,
    pub subnet: Ipv4Network,
    pub label: Option<Ipv4Addr>,
}

// ===== impl BipartiteGraph =====

impl BipartiteGraph {
    // Assembles the graph from a tree with resolved neighborhoods.
    pub fn build(tree: &NetworkTree) -> BipartiteGraph {
        let mut graph = BipartiteGraph {
            subnets: tree.sites().iter().map(|site| site.prefix).collect(),
            ..Default::default()
        };

        for idx in tree.internal_indices() {
            let node = tree.node(idx);
            let base = graph.routers.len();
            graph.routers.extend(node.routers.iter().cloned());

            // An interface inside a measured subnet ties its router to
            // that subnet.
            for (i, router) in node.routers.iter().enumerate() {
                for iface in router.interfaces() {
                    if let Some(site) = tree.subnet_containing(iface.addr) {
                        graph.push_edge(base + i + 1, site.prefix, None);
                    }
                }
            }

            // The ingress router of a neighborhood connects to every
            // subnet below it, one edge per load-balanced label.
            let hedera = node.node_type == NodeType::Hedera;
            for label in &node.labels {
                if label.is_unspecified() {
                    continue;
                }
                let Some(i) = node
                    .routers
                    .iter()
                    .position(|router| router.has_interface(*label))
                else {
                    continue;
                };
                for site in tree.child_subnets(idx) {
                    graph.push_edge(
                        base + i + 1,
                        site.prefix,
                        hedera.then_some(*label),
                    );
                }
            }
        }
        graph
    }

    fn push_edge(
        &mut self,
        router: usize,
        subnet: Ipv4Network,
        label: Option<Ipv4Addr>,
    ) {
        let edge = BipartiteEdge {
            router,
            subnet,
            label,
        };
        if !self.edges.contains(&edge) {
            self.edges.push(edge);
        }
    }
}

impl std::fmt::Display for BipartiteGraph {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "routers:")?;
        for id in 1..=self.routers.len() {
            writeln!(f, "R{id}")?;
        }
        writeln!(f, "subnets:")?;
        for subnet in &self.subnets {
            writeln!(f, "{subnet}")?;
        }
        writeln!(f, "edges:")?;
        for edge in &self.edges {
            match edge.label {
                Some(label) => {
                    writeln!(f, "R{} {} {}", edge.router, edge.subnet, label)?
                }
                None => writeln!(f, "R{} {}", edge.router, edge.subnet)?,
            }
        }
        Ok(())
    }
}

// ===== global functions =====

// Renders subnets in the measurement snapshot format, one block per
// subnet.
pub fn subnet_list<'a>(
    sites: impl IntoIterator<Item = &'a SubnetSite>,
) -> String {
    let mut out = String::new();
    for (i, site) in sites.into_iter().enumerate() {
        if i > 0 {
            out.push('\n');
        }
        let _ = writeln!(out, "{site}");
        if !site.interfaces().is_empty() {
            let _ = write!(out, "interfaces:");
            for iface in site.interfaces() {
                let _ = write!(out, " {}:{}", iface.addr, iface.ttl);
            }
            out.push('\n');
        }
        if !site.route.is_empty() {
            let _ = write!(out, "route:");
            for hop in &site.route {
                let _ = write!(out, " {hop}");
            }
            out.push('\n');
        }
    }
    out
}

// Renders the inferred routers, one per line, with the methods that
// grouped their interfaces.
pub fn alias_list(tree: &NetworkTree) -> String {
    let mut out = String::new();
    let mut id = 0;
    for idx in tree.internal_indices() {
        for router in &tree.node(idx).routers {
            id += 1;
            let methods = router.methods().iter().join(", ");
            let _ = writeln!(out, "R{id}: {router} ({methods})");
        }
    }
    out
}

// Renders the bipartite graph in its text format.
pub fn bipartite(tree: &NetworkTree) -> String {
    BipartiteGraph::build(tree).to_string()
}
