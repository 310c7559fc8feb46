//
// Copyright (c) The Arbor Contributors
//
// SPDX-License-Identifier: MIT
//

use std::net::Ipv4Addr;

use arbor_mapper::output;
use arbor_mapper::output::BipartiteGraph;
use arbor_mapper::parse;
use arbor_mapper::router::{AliasMethod, Router, RouterInterface};
use arbor_mapper::subnet::{
    MISSING_HOP, SubnetInterface, SubnetSite, SubnetStatus,
};
use arbor_mapper::tree::NetworkTree;
use const_addrs::{ip4, net4};

fn site(
    prefix: &str,
    status: SubnetStatus,
    pivot: Ipv4Addr,
    pivot_ttl: u8,
    interfaces: &[(Ipv4Addr, u8)],
    route: &[Ipv4Addr],
) -> SubnetSite {
    let interfaces = interfaces
        .iter()
        .map(|(addr, ttl)| SubnetInterface::new(*addr, *ttl))
        .collect();
    SubnetSite::new(
        prefix.parse().unwrap(),
        status,
        pivot,
        pivot_ttl,
        interfaces,
        route.to_vec(),
    )
    .unwrap()
}

// A rendered snapshot parses back into the same subnets.
#[test]
fn test_snapshot_round_trip() {
    let sites = vec![
        site(
            "10.0.0.0/24",
            SubnetStatus::Accurate,
            ip4!("10.0.0.1"),
            5,
            &[(ip4!("10.0.0.1"), 5), (ip4!("10.0.0.254"), 4)],
            &[ip4!("9.0.0.1"), MISSING_HOP, ip4!("9.0.2.1")],
        ),
        site(
            "10.0.1.0/24",
            SubnetStatus::Shadow,
            ip4!("10.0.1.1"),
            6,
            &[(ip4!("10.0.1.1"), 6)],
            &[ip4!("9.0.0.1")],
        ),
    ];

    let rendered = output::subnet_list(&sites);
    let parsed = parse::parse_subnet_records(&rendered).unwrap();

    assert_eq!(parsed.len(), sites.len());
    for (a, b) in sites.iter().zip(&parsed) {
        assert_eq!(a.prefix, b.prefix);
        assert_eq!(a.status, b.status);
        assert_eq!(a.pivot_ttl, b.pivot_ttl);
        assert_eq!(a.interfaces(), b.interfaces());
        assert_eq!(a.route, b.route);
    }
}

#[test]
fn test_snapshot_format() {
    let rendered = output::subnet_list(&[site(
        "10.0.0.0/24",
        SubnetStatus::Accurate,
        ip4!("10.0.0.1"),
        5,
        &[(ip4!("10.0.0.1"), 5)],
        &[ip4!("9.0.0.1"), MISSING_HOP],
    )]);
    assert_eq!(
        rendered,
        "10.0.0.0/24 ACCURATE 5\n\
         interfaces: 10.0.0.1:5\n\
         route: 9.0.0.1 0.0.0.0\n"
    );
}

#[test]
fn test_malformed_input() {
    assert!(parse::parse_subnet_records("10.0.0.0/24 BOGUS 5").is_err());
    assert!(parse::parse_subnet_records("not-a-prefix ACCURATE 5").is_err());
    assert!(
        parse::parse_subnet_records(
            "10.0.0.0/24 ACCURATE 5\ninterfaces: 10.0.9.1:5"
        )
        .is_err()
    );
}

// Builds a resolved two-subnet neighborhood and checks the alias and
// bipartite outputs.
fn resolved_tree() -> NetworkTree {
    let label = ip4!("10.0.0.254");
    let mut tree = NetworkTree::new();
    for (prefix, pivot) in [
        ("10.0.0.0/24", ip4!("10.0.0.1")),
        ("10.0.1.0/24", ip4!("10.0.1.1")),
    ] {
        tree.insert(site(
            prefix,
            SubnetStatus::Accurate,
            pivot,
            2,
            &[(pivot, 2)],
            &[label],
        ));
    }

    let mut router = Router::new();
    router.add_interface(RouterInterface::new(
        label,
        AliasMethod::UdpPortUnreachable,
    ));
    router.add_interface(RouterInterface::new(
        ip4!("10.0.1.254"),
        AliasMethod::IpIdBased,
    ));
    let idx = tree.internal_indices()[0];
    tree.attach_routers(idx, vec![router]);
    tree
}

#[test]
fn test_alias_output() {
    let tree = resolved_tree();
    assert_eq!(
        output::alias_list(&tree),
        "R1: 10.0.0.254 10.0.1.254 (UDP_PORT_UNREACHABLE, IP_ID_BASED)\n"
    );
}

#[test]
fn test_bipartite_output() {
    let tree = resolved_tree();
    let graph = BipartiteGraph::build(&tree);

    assert_eq!(graph.routers.len(), 1);
    assert_eq!(
        graph.subnets,
        vec![net4!("10.0.0.0/24"), net4!("10.0.1.0/24")]
    );

    // Interface containment ties R1 to both subnets; the ingress rule
    // adds no new pair.
    let pairs: Vec<(usize, _)> = graph
        .edges
        .iter()
        .map(|edge| (edge.router, edge.subnet))
        .collect();
    assert!(pairs.contains(&(1, net4!("10.0.0.0/24"))));
    assert!(pairs.contains(&(1, net4!("10.0.1.0/24"))));
    assert_eq!(graph.edges.len(), 2);
    assert!(graph.edges.iter().all(|edge| edge.label.is_none()));

    let rendered = graph.to_string();
    assert!(rendered.starts_with("routers:\nR1\nsubnets:\n"));
    assert!(rendered.contains("edges:\n"));
}

// A load-balanced neighborhood emits one ingress edge per label.
#[test]
fn test_bipartite_per_label_edges() {
    let a = ip4!("9.0.0.1");
    let b = ip4!("9.0.1.1");
    let c = ip4!("9.0.1.2");
    let x = ip4!("10.0.0.254");

    let mut tree = NetworkTree::new();
    tree.insert(site(
        "10.0.0.0/24",
        SubnetStatus::Accurate,
        ip4!("10.0.0.1"),
        4,
        &[(ip4!("10.0.0.1"), 4)],
        &[a, b, x],
    ));
    tree.insert(site(
        "10.0.1.0/24",
        SubnetStatus::Accurate,
        ip4!("10.0.1.1"),
        4,
        &[(ip4!("10.0.1.1"), 4)],
        &[a, c, x],
    ));

    // A third subnet whose route ends at the fused hop hangs directly
    // off the HEDERA.
    tree.insert(site(
        "10.0.2.0/24",
        SubnetStatus::Accurate,
        ip4!("10.0.2.1"),
        3,
        &[(ip4!("10.0.2.1"), 3)],
        &[a, b],
    ));

    // The HEDERA {B, C} gets one router per label.
    let hedera = tree
        .internal_indices()
        .into_iter()
        .find(|idx| tree.node(*idx).labels.len() == 2)
        .unwrap();
    let mut router_b = Router::new();
    router_b
        .add_interface(RouterInterface::new(b, AliasMethod::GroupReserved));
    let mut router_c = Router::new();
    router_c
        .add_interface(RouterInterface::new(c, AliasMethod::GroupReserved));
    tree.attach_routers(hedera, vec![router_b, router_c]);

    // Each load-balanced label contributes its own ingress edge
    // towards the subnet below the HEDERA, tagged with the label.
    let graph = BipartiteGraph::build(&tree);
    let labeled: Vec<_> = graph
        .edges
        .iter()
        .filter(|edge| edge.label.is_some())
        .collect();
    assert_eq!(labeled.len(), 2);
    for edge in &labeled {
        assert_eq!(edge.subnet, net4!("10.0.2.0/24"));
    }
    let labels: Vec<Ipv4Addr> =
        labeled.iter().filter_map(|edge| edge.label).collect();
    assert!(labels.contains(&b) && labels.contains(&c));
}
