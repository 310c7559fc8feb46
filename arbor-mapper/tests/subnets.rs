//
// Copyright (c) The Arbor Contributors
//
// SPDX-License-Identifier: MIT
//

use std::net::Ipv4Addr;

use arbor_mapper::collections::{InsertionResult, SubnetSiteSet};
use arbor_mapper::subnet::{
    MISSING_HOP, SubnetInterface, SubnetSite, SubnetStatus,
};
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

// Containment absorption: a larger prefix absorbs the smaller one and
// carries its interfaces.
#[test]
fn test_containment_absorption() {
    let mut set = SubnetSiteSet::default();

    let small = site(
        "10.0.0.0/24",
        SubnetStatus::Accurate,
        ip4!("10.0.0.1"),
        5,
        &[(ip4!("10.0.0.1"), 5)],
        &[ip4!("9.0.0.1")],
    );
    let big = site(
        "10.0.0.0/23",
        SubnetStatus::Accurate,
        ip4!("10.0.0.129"),
        5,
        &[(ip4!("10.0.0.129"), 5)],
        &[ip4!("9.0.0.1")],
    );

    assert_eq!(set.add_site(small), InsertionResult::NewSubnet);
    assert_eq!(set.add_site(big), InsertionResult::BiggerSubnet);

    assert_eq!(set.len(), 1);
    let survivor = set.iter().next().unwrap();
    assert_eq!(survivor.prefix, net4!("10.0.0.0/23"));
    let addrs: Vec<Ipv4Addr> = survivor
        .interfaces()
        .iter()
        .map(|iface| iface.addr)
        .collect();
    assert_eq!(addrs, vec![ip4!("10.0.0.1"), ip4!("10.0.0.129")]);
}

// The reverse order: the smaller subnet is absorbed on insertion.
#[test]
fn test_smaller_subnet_absorbed() {
    let mut set = SubnetSiteSet::default();

    let big = site(
        "10.0.0.0/23",
        SubnetStatus::Accurate,
        ip4!("10.0.0.129"),
        5,
        &[(ip4!("10.0.0.129"), 5)],
        &[],
    );
    let small = site(
        "10.0.0.0/24",
        SubnetStatus::Accurate,
        ip4!("10.0.0.1"),
        5,
        &[(ip4!("10.0.0.1"), 5)],
        &[],
    );

    assert_eq!(set.add_site(big), InsertionResult::NewSubnet);
    assert_eq!(set.add_site(small), InsertionResult::SmallerSubnet);

    assert_eq!(set.len(), 1);
    let survivor = set.iter().next().unwrap();
    assert_eq!(survivor.prefix, net4!("10.0.0.0/23"));
    assert!(survivor
        .interfaces()
        .iter()
        .any(|iface| iface.addr == ip4!("10.0.0.1")));
}

// Exact duplicate insertion.
#[test]
fn test_known_subnet() {
    let mut set = SubnetSiteSet::default();

    let host = site(
        "192.168.1.1/32",
        SubnetStatus::Accurate,
        ip4!("192.168.1.1"),
        3,
        &[(ip4!("192.168.1.1"), 3)],
        &[],
    );

    assert_eq!(set.add_site(host.clone()), InsertionResult::NewSubnet);
    assert_eq!(set.add_site(host), InsertionResult::KnownSubnet);
    assert_eq!(set.len(), 1);
}

// No two final sites overlap, and absorbed interfaces survive.
#[test]
fn test_no_final_overlap() {
    let mut set = SubnetSiteSet::default();
    let prefixes = [
        "10.0.0.0/24",
        "10.0.1.0/24",
        "10.0.0.0/22",
        "10.0.2.0/24",
        "172.16.0.0/24",
        "10.0.0.64/26",
    ];
    for (i, prefix) in prefixes.iter().enumerate() {
        let net: ipnetwork::Ipv4Network = prefix.parse().unwrap();
        let pivot = Ipv4Addr::from(u32::from(net.ip()) + 1);
        set.add_site(site(
            prefix,
            SubnetStatus::Accurate,
            pivot,
            i as u8 + 2,
            &[(pivot, i as u8 + 2)],
            &[],
        ));
    }

    let sites: Vec<&SubnetSite> = set.iter().collect();
    for (i, a) in sites.iter().enumerate() {
        for b in sites.iter().skip(i + 1) {
            let a_first = u32::from(a.prefix.network());
            let a_last = u32::from(a.prefix.broadcast());
            let b_first = u32::from(b.prefix.network());
            let b_last = u32::from(b.prefix.broadcast());
            assert!(
                a_last < b_first || b_last < a_first,
                "{} overlaps {}",
                a.prefix,
                b.prefix
            );
        }
    }

    // 10.0.0.0/22 absorbed the three /24s and the /26.
    let survivor = set.get_subnet_containing(ip4!("10.0.1.1")).unwrap();
    assert_eq!(survivor.prefix, net4!("10.0.0.0/22"));
    assert!(survivor
        .interfaces()
        .iter()
        .any(|iface| iface.addr == ip4!("10.0.2.1")));
}

#[test]
fn test_containing_lookups() {
    let mut set = SubnetSiteSet::default();
    set.add_site(site(
        "10.0.0.0/24",
        SubnetStatus::Accurate,
        ip4!("10.0.0.1"),
        5,
        &[(ip4!("10.0.0.1"), 5)],
        &[],
    ));

    assert!(set.get_subnet_containing(ip4!("10.0.0.77")).is_some());
    assert!(set.get_subnet_containing(ip4!("10.0.1.77")).is_none());
    assert!(
        set.get_subnet_containing_with_ttl(ip4!("10.0.0.77"), 5)
            .is_some()
    );
    assert!(
        set.get_subnet_containing_with_ttl(ip4!("10.0.0.77"), 6)
            .is_none()
    );
}

#[test]
fn test_compatibility_window() {
    let mut set = SubnetSiteSet::default();
    set.add_site(site(
        "10.0.0.0/24",
        SubnetStatus::Accurate,
        ip4!("10.0.0.1"),
        5,
        &[(ip4!("10.0.0.1"), 5)],
        &[],
    ));

    // Same distance: compatible.
    assert!(set.is_compatible(
        ip4!("10.0.0.0"),
        ip4!("10.0.1.255"),
        5,
        false,
        false
    ));
    // One hop away: only with the adjacent-TTL allowance.
    assert!(!set.is_compatible(
        ip4!("10.0.0.0"),
        ip4!("10.0.1.255"),
        6,
        false,
        false
    ));
    assert!(set.is_compatible(
        ip4!("10.0.0.0"),
        ip4!("10.0.1.255"),
        6,
        true,
        false
    ));
    // Shadow expansion never grows over measured subnets.
    assert!(!set.is_compatible(
        ip4!("10.0.0.0"),
        ip4!("10.0.1.255"),
        5,
        false,
        true
    ));
    // Disjoint ranges are always compatible.
    assert!(set.is_compatible(
        ip4!("172.16.0.0"),
        ip4!("172.16.0.255"),
        9,
        false,
        true
    ));
}

#[test]
fn test_valid_and_shadow_extraction() {
    let mut set = SubnetSiteSet::default();
    set.add_site(site(
        "10.0.0.0/24",
        SubnetStatus::Accurate,
        ip4!("10.0.0.1"),
        5,
        &[(ip4!("10.0.0.1"), 5)],
        &[ip4!("9.0.0.1"), MISSING_HOP],
    ));
    set.add_site(site(
        "10.0.1.0/24",
        SubnetStatus::Shadow,
        ip4!("10.0.1.1"),
        5,
        &[(ip4!("10.0.1.1"), 5)],
        &[ip4!("9.0.0.1"), ip4!("9.0.0.2")],
    ));
    set.add_site(site(
        "10.0.2.0/24",
        SubnetStatus::Undefined,
        ip4!("10.0.2.1"),
        5,
        &[(ip4!("10.0.2.1"), 5)],
        &[ip4!("9.0.0.1")],
    ));

    // Only the shadow subnet has a complete route.
    let complete = set.get_valid_subnet(true).unwrap();
    assert_eq!(complete.prefix, net4!("10.0.1.0/24"));

    // The accurate subnet follows once incomplete routes are allowed;
    // the undefined one is never eligible.
    let partial = set.get_valid_subnet(false).unwrap();
    assert_eq!(partial.prefix, net4!("10.0.0.0/24"));
    assert!(set.get_valid_subnet(false).is_none());
    assert!(set.get_shadow_subnet().is_none());
    assert_eq!(set.len(), 1);
}

#[test]
fn test_route_ordering_and_distance() {
    let mut set = SubnetSiteSet::default();
    set.add_site(site(
        "10.0.1.0/24",
        SubnetStatus::Accurate,
        ip4!("10.0.1.1"),
        7,
        &[(ip4!("10.0.1.1"), 7)],
        &[ip4!("9.0.0.1"), ip4!("9.0.0.2"), ip4!("9.0.0.3")],
    ));
    set.add_site(site(
        "10.0.0.0/24",
        SubnetStatus::Accurate,
        ip4!("10.0.0.1"),
        5,
        &[(ip4!("10.0.0.1"), 5)],
        &[ip4!("9.0.0.1")],
    ));

    set.sort_by_route();
    let routes: Vec<usize> =
        set.iter().map(|site| site.route.len()).collect();
    assert_eq!(routes, vec![1, 3]);
    assert_eq!(set.get_maximum_distance(), 7);
}

// Route adaptation rewrites matching prefixes exactly once.
#[test]
fn test_adapt_routes_idempotence() {
    let mut set = SubnetSiteSet::default();
    for (prefix, pivot) in
        [("10.0.0.0/24", ip4!("10.0.0.1")), ("10.0.1.0/24", ip4!("10.0.1.1"))]
    {
        set.add_site(site(
            prefix,
            SubnetStatus::Accurate,
            pivot,
            5,
            &[(pivot, 5)],
            &[ip4!("8.0.0.1"), ip4!("9.0.0.2"), ip4!("9.0.0.3")],
        ));
    }

    let old = [ip4!("8.0.0.1")];
    let new = [ip4!("9.0.0.1")];
    assert_eq!(set.adapt_routes(&old, &new), 2);
    for site in set.iter() {
        assert_eq!(
            site.route,
            vec![ip4!("9.0.0.1"), ip4!("9.0.0.2"), ip4!("9.0.0.3")]
        );
    }
    assert_eq!(set.adapt_routes(&old, &new), 0);
}

// Interfaces outside the prefix range are rejected at construction.
#[test]
fn test_interface_out_of_range() {
    let result = SubnetSite::new(
        "10.0.0.0/24".parse().unwrap(),
        SubnetStatus::Accurate,
        ip4!("10.0.0.1"),
        5,
        vec![SubnetInterface::new(ip4!("10.0.9.1"), 5)],
        Vec::new(),
    );
    assert!(result.is_err());
}
