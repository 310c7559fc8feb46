//
// Copyright (c) The Arbor Contributors
//
// SPDX-License-Identifier: MIT
//

use std::collections::BTreeMap;
use std::net::Ipv4Addr;

use arbor_utils::ip::Ipv4AddrExt;
use chrono::{DateTime, Utc};

use crate::collections::NodeIndex;
use crate::consts::{
    MAX_IPID_PROJECTION_GAP, TS_FINGERPRINT_TOLERANCE_MS,
    VELOCITY_RATIO_TOLERANCE,
};
use crate::debug::Debug;
use crate::ip_table::{IpIdCounter, IpTable, IpTableEntry};
use crate::router::{AliasMethod, Router, RouterInterface};
use crate::tree::NetworkTree;

// Groups the interfaces of a neighborhood into routers, using the
// hints collected in the IP table.
#[derive(Debug)]
pub struct AliasResolver<'a> {
    table: &'a IpTable,
}

// ===== impl AliasResolver =====

impl<'a> AliasResolver<'a> {
    pub fn new(table: &'a IpTable) -> AliasResolver<'a> {
        AliasResolver { table }
    }

    // Partitions the labels and child-subnet ingress interfaces of the
    // given internal node into disjoint routers and attaches them to
    // the node.
    pub fn resolve(&self, tree: &mut NetworkTree, idx: NodeIndex) {
        let labels: Vec<Ipv4Addr> = tree
            .node(idx)
            .labels
            .iter()
            .copied()
            .filter(|label| !label.is_unspecified())
            .collect();
        let mut candidates = tree.neighborhood_interfaces(idx);
        candidates.sort();
        candidates.dedup();

        let routers = self.group(&candidates, &labels);
        Debug::NeighborhoodResolved(&labels, routers.len()).log();
        tree.attach_routers(idx, routers);
    }

    // Runs the grouping criteria in order of confidence; an interface
    // keeps the method that first grouped it.
    fn group(
        &self,
        candidates: &[Ipv4Addr],
        labels: &[Ipv4Addr],
    ) -> Vec<Router> {
        let mut routers: Vec<Router> = Vec::new();
        let mut assigned: Vec<Ipv4Addr> = Vec::new();

        // UDP reply-source matching. Candidates answered from the same
        // source sit on one device; a source that differs from the
        // probed address is itself an interface of that device.
        let mut by_src: BTreeMap<Ipv4Addr, Vec<Ipv4Addr>> = BTreeMap::new();
        for &addr in candidates {
            if let Some(entry) = self.table.get(&addr)
                && let Some(src) = entry.udp_reply_src
            {
                by_src.entry(src).or_default().push(addr);
            }
        }
        let mut udp_groups: Vec<Vec<Ipv4Addr>> = Vec::new();
        for (src, members) in by_src {
            // A reply from the probed address itself carries no alias
            // information.
            if members.len() == 1 && members[0] == src {
                continue;
            }
            let mut set = members;
            if !set.contains(&src) {
                set.push(src);
            }
            // Reply-source chains may overlap; union the groups they
            // touch so no interface lands on two devices.
            while let Some(pos) = udp_groups
                .iter()
                .position(|group| group.iter().any(|addr| set.contains(addr)))
            {
                for addr in udp_groups.remove(pos) {
                    if !set.contains(&addr) {
                        set.push(addr);
                    }
                }
            }
            udp_groups.push(set);
        }
        for group in udp_groups {
            let mut router = Router::new();
            for addr in group {
                router.add_interface(RouterInterface::new(
                    addr,
                    AliasMethod::UdpPortUnreachable,
                ));
                if candidates.contains(&addr) {
                    assigned.push(addr);
                }
            }
            routers.push(router);
        }

        // Healthy IP-ID counters with compatible velocity and offset.
        let healthy: Vec<Ipv4Addr> = candidates
            .iter()
            .copied()
            .filter(|addr| !assigned.contains(addr))
            .filter(|addr| {
                self.table
                    .get(addr)
                    .map(|entry| entry.counter == IpIdCounter::Healthy)
                    .unwrap_or(false)
            })
            .collect();
        let mut ipid_groups: Vec<Vec<Ipv4Addr>> = Vec::new();
        for addr in healthy {
            let mut placed = false;
            for group in &mut ipid_groups {
                if group
                    .iter()
                    .all(|other| self.ip_id_compatible(addr, *other))
                {
                    group.push(addr);
                    placed = true;
                    break;
                }
            }
            if !placed {
                ipid_groups.push(vec![addr]);
            }
        }
        for group in ipid_groups {
            if group.len() < 2 {
                continue;
            }
            let mut router = Router::new();
            for addr in group {
                router.add_interface(RouterInterface::new(
                    addr,
                    AliasMethod::IpIdBased,
                ));
                assigned.push(addr);
            }
            routers.push(router);
        }

        // Reverse DNS: same domain and host names differing only in
        // their numbering.
        let named: Vec<(Ipv4Addr, String)> = candidates
            .iter()
            .copied()
            .filter(|addr| !assigned.contains(addr))
            .filter_map(|addr| {
                self.table
                    .get(&addr)
                    .and_then(|entry| entry.hostname.clone())
                    .map(|hostname| (addr, hostname))
            })
            .collect();
        let mut dns_groups: Vec<Vec<(Ipv4Addr, String)>> = Vec::new();
        for (addr, hostname) in named {
            let mut placed = false;
            for group in &mut dns_groups {
                if hostnames_similar(&group[0].1, &hostname) {
                    group.push((addr, hostname.clone()));
                    placed = true;
                    break;
                }
            }
            if !placed {
                dns_groups.push(vec![(addr, hostname)]);
            }
        }
        for group in dns_groups {
            if group.len() < 2 {
                continue;
            }
            let mut router = Router::new();
            for (addr, _) in group {
                router.add_interface(RouterInterface::new(
                    addr,
                    AliasMethod::ReverseDns,
                ));
                assigned.push(addr);
            }
            routers.push(router);
        }

        // Fallback per-neighborhood groups: interfaces with the same
        // degenerate counter behavior are attributed to one device.
        for (counter, method) in [
            (IpIdCounter::Echo, AliasMethod::GroupEcho),
            (IpIdCounter::Random, AliasMethod::GroupRandom),
        ] {
            let group: Vec<Ipv4Addr> = candidates
                .iter()
                .copied()
                .filter(|addr| !assigned.contains(addr))
                .filter(|addr| {
                    self.table
                        .get(addr)
                        .map(|entry| entry.counter == counter)
                        .unwrap_or(false)
                })
                .collect();
            if group.len() >= 2
                || (group.len() == 1 && labels.contains(&group[0]))
            {
                let mut router = Router::new();
                for addr in group {
                    router.add_interface(RouterInterface::new(addr, method));
                    assigned.push(addr);
                }
                routers.push(router);
            }
        }

        // Addresses from reserved blocks answering in one neighborhood
        // are assumed to sit on the same box.
        let reserved: Vec<Ipv4Addr> = candidates
            .iter()
            .copied()
            .filter(|addr| !assigned.contains(addr) && addr.is_reserved())
            .collect();
        if reserved.len() >= 2 {
            let mut router = Router::new();
            for addr in reserved {
                router.add_interface(RouterInterface::new(
                    addr,
                    AliasMethod::GroupReserved,
                ));
                assigned.push(addr);
            }
            routers.push(router);
        }

        // Every label must land in a router: the ingress of the
        // neighborhood exists even when nothing could be aliased to
        // it.
        for &label in labels {
            if !assigned.contains(&label) {
                let mut router = Router::new();
                router.add_interface(RouterInterface::new(
                    label,
                    AliasMethod::GroupReserved,
                ));
                assigned.push(label);
                routers.push(router);
            }
        }

        self.merge_anchored(&mut routers);
        routers
    }

    // Merges router candidates that describe the same device: a router
    // anchored by a port-unreachable pivot absorbs any router holding
    // an interface whose counter is compatible with that pivot.
    fn merge_anchored(&self, routers: &mut Vec<Router>) {
        let mut i = 0;
        while i < routers.len() {
            let Some(pivot) = routers[i].get_merging_pivot(self.table)
            else {
                i += 1;
                continue;
            };
            let mut j = i + 1;
            while j < routers.len() {
                let compatible = routers[j].interfaces().iter().any(
                    |iface| self.ip_id_compatible(pivot, iface.addr),
                );
                if compatible {
                    let absorbed = routers.remove(j);
                    for iface in absorbed.interfaces() {
                        routers[i].add_interface(*iface);
                    }
                } else {
                    j += 1;
                }
            }
            i += 1;
        }
    }

    // Two healthy counters are compatible when their velocities agree
    // and their projections to a common instant stay close. Exposed
    // timestamp fingerprints act as a veto.
    fn ip_id_compatible(&self, a: Ipv4Addr, b: Ipv4Addr) -> bool {
        let (Some(ea), Some(eb)) = (self.table.get(&a), self.table.get(&b))
        else {
            return false;
        };
        if ea.counter != IpIdCounter::Healthy
            || eb.counter != IpIdCounter::Healthy
        {
            return false;
        }
        if let (Some(fa), Some(fb)) = (ea.ts_fingerprint, eb.ts_fingerprint)
            && (fa - fb).abs() > TS_FINGERPRINT_TOLERANCE_MS
        {
            return false;
        }
        let (Some(va), Some(vb)) = (ea.velocity(), eb.velocity()) else {
            return false;
        };
        let (low, high) = if va < vb { (va, vb) } else { (vb, va) };
        if low > 0.0 && high / low > 1.0 + VELOCITY_RATIO_TOLERANCE {
            return false;
        }
        let when = reference_instant(ea, eb);
        let (Some(pa), Some(pb)) =
            (ea.project_ip_id(when), eb.project_ip_id(when))
        else {
            return false;
        };
        let gap = (pa - pb).abs().rem_euclid(65536.0);
        gap.min(65536.0 - gap) <= MAX_IPID_PROJECTION_GAP
    }
}

// ===== global functions =====

// Later of the two entries' last sample times, used as the common
// projection instant.
fn reference_instant(a: &IpTableEntry, b: &IpTableEntry) -> DateTime<Utc> {
    let ta = a.samples.last().map(|sample| sample.time);
    let tb = b.samples.last().map(|sample| sample.time);
    ta.into_iter().chain(tb).max().unwrap_or_else(Utc::now)
}

// Hostnames alias the same device when they share the domain part and
// their host parts differ only by numbering.
fn hostnames_similar(a: &str, b: &str) -> bool {
    match (a.split_once('.'), b.split_once('.')) {
        (Some((host_a, domain_a)), Some((host_b, domain_b))) => {
            domain_a.eq_ignore_ascii_case(domain_b)
                && strip_digits(host_a)
                    .eq_ignore_ascii_case(&strip_digits(host_b))
        }
        _ => false,
    }
}

fn strip_digits(s: &str) -> String {
    s.chars().filter(|c| !c.is_ascii_digit()).collect()
}
