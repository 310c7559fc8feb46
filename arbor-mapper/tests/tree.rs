//
// Copyright (c) The Arbor Contributors
//
// SPDX-License-Identifier: MIT
//

use std::net::Ipv4Addr;

use arbor_mapper::collections::SubnetSiteSet;
use arbor_mapper::subnet::{
    MISSING_HOP, SubnetInterface, SubnetSite, SubnetStatus,
};
use arbor_mapper::tree::{NetworkTree, NodeType};
use const_addrs::{ip4, net4};

fn site(prefix: &str, pivot: Ipv4Addr, route: &[Ipv4Addr]) -> SubnetSite {
    let ttl = route.len() as u8 + 1;
    SubnetSite::new(
        prefix.parse().unwrap(),
        SubnetStatus::Accurate,
        pivot,
        ttl,
        vec![SubnetInterface::new(pivot, ttl)],
        route.to_vec(),
    )
    .unwrap()
}

// Every inserted subnet is reachable by following its route from the
// root; at each depth the traversed node carries the route hop or the
// missing marker.
#[test]
fn test_insertion_reachability() {
    let mut tree = NetworkTree::new();
    let sites = [
        site("10.0.0.0/24", ip4!("10.0.0.1"), &[ip4!("9.0.0.1")]),
        site(
            "10.0.1.0/24",
            ip4!("10.0.1.1"),
            &[ip4!("9.0.0.1"), ip4!("9.0.1.1")],
        ),
        site(
            "10.0.2.0/24",
            ip4!("10.0.2.1"),
            &[ip4!("9.0.0.1"), ip4!("9.0.2.1")],
        ),
    ];
    for ss in sites.clone() {
        tree.insert(ss);
    }

    for ss in &sites {
        let mut cur = tree.root();
        for hop in &ss.route {
            let next = tree
                .node(cur)
                .children
                .iter()
                .copied()
                .find(|child| {
                    let node = tree.node(*child);
                    node.is_internal()
                        && (node.has_label(*hop)
                            || node.has_label(MISSING_HOP))
                })
                .unwrap_or_else(|| panic!("no node for hop {hop}"));
            cur = next;
        }
        assert!(
            tree.node(cur)
                .children
                .iter()
                .any(|child| tree.node(*child)
                    .subnet
                    .as_ref()
                    .map(|s| s.prefix == ss.prefix)
                    .unwrap_or(false)),
            "subnet {} not below its last hop",
            ss.prefix
        );
    }
}

// Load-balanced routes diverging at one depth and converging at the
// next are fused into a single HEDERA node.
#[test]
fn test_hedera_fusion() {
    let mut tree = NetworkTree::new();
    let a = ip4!("9.0.0.1");
    let b = ip4!("9.0.1.1");
    let c = ip4!("9.0.1.2");
    let x = ip4!("9.0.2.1");

    tree.insert(site("10.0.0.0/24", ip4!("10.0.0.1"), &[a, b, x]));
    tree.insert(site("10.0.1.0/24", ip4!("10.0.1.1"), &[a, c, x]));

    // Root has one child, labeled A.
    let root_children = &tree.node(tree.root()).children;
    assert_eq!(root_children.len(), 1);
    let node_a = tree.node(root_children[0]);
    assert_eq!(node_a.node_type, NodeType::Internal);
    assert_eq!(node_a.labels.as_slice(), [a]);

    // A has one HEDERA child with label set {B, C}.
    assert_eq!(node_a.children.len(), 1);
    let hedera = tree.node(node_a.children[0]);
    assert_eq!(hedera.node_type, NodeType::Hedera);
    assert!(hedera.has_label(b) && hedera.has_label(c));
    assert_eq!(hedera.labels.len(), 2);

    // Below the fused hop, the shared last hop holds one leaf per
    // inserted subnet.
    assert_eq!(hedera.children.len(), 1);
    let node_x = tree.node(hedera.children[0]);
    assert!(node_x.has_label(x));
    let leaves: Vec<_> = node_x
        .children
        .iter()
        .filter_map(|child| tree.node(*child).subnet.as_ref())
        .collect();
    assert_eq!(leaves.len(), 2);
}

// A missing hop descends into the existing internal child and is
// repaired from its label afterwards.
#[test]
fn test_route_repair() {
    let mut tree = NetworkTree::new();
    let a = ip4!("9.0.0.1");
    let b = ip4!("9.0.1.1");
    let d = ip4!("9.0.2.1");

    tree.insert(site("10.0.0.0/24", ip4!("10.0.0.1"), &[a, b, d]));
    tree.insert(site("10.0.1.0/24", ip4!("10.0.1.1"), &[a, MISSING_HOP, d]));

    let repaired = tree.repair_routes();
    assert_eq!(repaired, 1);

    let repaired_site = tree
        .sites()
        .into_iter()
        .find(|s| s.prefix == net4!("10.0.1.0/24"))
        .unwrap()
        .clone();
    assert_eq!(repaired_site.route, vec![a, b, d]);

    // A second pass has nothing left to fix.
    assert_eq!(tree.repair_routes(), 0);
}

// Transplantation: a route whose head disagrees with the trunk is
// grafted onto it.
#[test]
fn test_transplantation() {
    let mut tree = NetworkTree::new();
    let a = ip4!("9.0.0.1");
    let a_alt = ip4!("8.0.0.1");
    let b = ip4!("9.0.1.1");
    let c = ip4!("9.0.2.1");
    let x = ip4!("9.0.3.1");

    tree.insert(site("10.0.0.0/24", ip4!("10.0.0.1"), &[a, b, c]));

    let mut set = SubnetSiteSet::default();
    let grafted = site("10.1.0.0/24", ip4!("10.1.0.1"), &[a_alt, b, c, x]);
    assert!(!tree.fitting_route(&grafted));
    set.add_site(grafted);

    let probe = set.iter().next().unwrap().clone();
    let (old, new) = tree.find_transplantation(&probe).unwrap();
    assert_eq!(old, vec![a_alt]);
    assert_eq!(new, vec![a]);

    assert_eq!(set.adapt_routes(&old, &new), 1);
    let adapted = set.get_valid_subnet(true).unwrap();
    assert_eq!(adapted.route, vec![a, b, c, x]);
    assert!(tree.fitting_route(&adapted));
    tree.insert(adapted);

    // The grafted subnet now sits below the trunk.
    let trunk = tree.trunk();
    assert_eq!(trunk.len(), 3);
    assert_eq!(trunk[0].as_slice(), [a]);
}

// Detaching a leaf prunes the internal nodes it leaves empty.
#[test]
fn test_detach_and_prune() {
    let mut tree = NetworkTree::new();
    let a = ip4!("9.0.0.1");
    let b1 = ip4!("9.0.1.1");
    let b2 = ip4!("9.0.1.2");

    tree.insert(site("10.0.0.0/24", ip4!("10.0.0.1"), &[a, b1]));
    tree.insert(site("10.0.1.0/24", ip4!("10.0.1.1"), &[a, b2]));

    let detached = tree.detach_subnet(ip4!("10.0.0.1")).unwrap();
    assert_eq!(detached.prefix, net4!("10.0.0.0/24"));
    assert!(tree.subnet_containing(ip4!("10.0.0.1")).is_none());

    // The B1 branch is gone; A survives because B2 still hangs off
    // it.
    let node_a = tree.node(tree.node(tree.root()).children[0]);
    assert_eq!(node_a.labels.as_slice(), [a]);
    assert_eq!(node_a.children.len(), 1);
    assert!(tree.node(node_a.children[0]).has_label(b2));

    // Detaching the second subnet empties the tree down to the root.
    tree.detach_subnet(ip4!("10.0.1.1")).unwrap();
    assert!(tree.node(tree.root()).children.is_empty());
    assert!(tree.internal_indices().is_empty());
}

#[test]
fn test_nullify_leaves() {
    let mut tree = NetworkTree::new();
    tree.insert(site("10.0.0.0/24", ip4!("10.0.0.1"), &[ip4!("9.0.0.1")]));
    tree.insert(site("10.0.1.0/24", ip4!("10.0.1.1"), &[ip4!("9.0.0.1")]));

    let mut set = SubnetSiteSet::default();
    tree.nullify_leaves(&mut set);
    assert_eq!(set.len(), 2);
    assert!(tree.sites().is_empty());
    assert!(tree.internal_indices().is_empty());
}

#[test]
fn test_statistics() {
    let mut tree = NetworkTree::new();
    let a = ip4!("10.0.0.254");
    let b = ip4!("10.0.1.254");

    // One top neighborhood with a subnet child and one deeper
    // neighborhood whose ingress B is an interface of that subnet.
    let mut top = site("10.0.1.0/24", ip4!("10.0.1.1"), &[a]);
    top.add_interface(SubnetInterface::new(b, 1));
    tree.insert(top);
    tree.insert(site("10.0.2.0/24", ip4!("10.0.2.1"), &[a, b]));

    let stats = tree.statistics();
    assert_eq!(stats.internals, 2);
    // Only the B neighborhood has exclusively subnet children.
    assert_eq!(stats.only_subnet_children, 1);
    // B's label appears in A's child subnet: complete linkage for A;
    // B has no internal children and is trivially complete.
    assert_eq!(stats.complete_linkage, 2);
    assert_eq!(stats.partial_linkage, 2);
    // A's label 10.0.0.254 lies in no measured subnet; B's does.
    assert_eq!(stats.covered_labels, 1);
}
