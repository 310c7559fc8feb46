//
// Copyright (c) The Arbor Contributors
//
// SPDX-License-Identifier: MIT
//

use std::net::Ipv4Addr;

use arbor_utils::ip::Ipv4NetworkExt;
use derive_new::new;
use ipnetwork::Ipv4Network;
use serde::{Deserialize, Serialize};

use crate::error::Error;

// Marker stored in measured routes when a hop did not respond.
pub const MISSING_HOP: Ipv4Addr = Ipv4Addr::UNSPECIFIED;

// A traceroute-style route towards a subnet, one hop per TTL.
pub type Route = Vec<Ipv4Addr>;

// Measurement status of a subnet.
//
// ACCURATE subnets have a confirmed contra-pivot; ODD subnets respond
// in an unexpected but usable way; SHADOW subnets are known only
// through a partial interface list.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub enum SubnetStatus {
    Accurate,
    Odd,
    Shadow,
    Undefined,
}

// One interface observed inside a subnet, with its hop distance.
#[derive(Clone, Copy, Debug, Eq, Ord, PartialEq, PartialOrd)]
#[derive(Deserialize, Serialize)]
#[derive(new)]
pub struct SubnetInterface {
    pub addr: Ipv4Addr,
    pub ttl: u8,
}

// A measured subnet: prefix, pivot interface, distance, the interfaces
// discovered inside the prefix and the route used to reach it.
#[derive(Clone, Debug, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub struct SubnetSite {
    pub prefix: Ipv4Network,
    pub status: SubnetStatus,
    pub pivot: Ipv4Addr,
    pub pivot_ttl: u8,
    // Kept sorted by address, unique per address.
    interfaces: Vec<SubnetInterface>,
    pub route: Route,
}

// ===== impl SubnetStatus =====

impl std::fmt::Display for SubnetStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SubnetStatus::Accurate => write!(f, "ACCURATE"),
            SubnetStatus::Odd => write!(f, "ODD"),
            SubnetStatus::Shadow => write!(f, "SHADOW"),
            SubnetStatus::Undefined => write!(f, "UNDEFINED"),
        }
    }
}

impl std::str::FromStr for SubnetStatus {
    type Err = ();

    fn from_str(s: &str) -> Result<SubnetStatus, Self::Err> {
        match s {
            "ACCURATE" => Ok(SubnetStatus::Accurate),
            "ODD" => Ok(SubnetStatus::Odd),
            "SHADOW" => Ok(SubnetStatus::Shadow),
            "UNDEFINED" => Ok(SubnetStatus::Undefined),
            _ => Err(()),
        }
    }
}

// ===== impl SubnetSite =====

impl SubnetSite {
    // Builds a new subnet, enforcing that every interface lies within
    // the prefix range.
    pub fn new(
        prefix: Ipv4Network,
        status: SubnetStatus,
        pivot: Ipv4Addr,
        pivot_ttl: u8,
        mut interfaces: Vec<SubnetInterface>,
        route: Route,
    ) -> Result<SubnetSite, Error> {
        let prefix = Ipv4NetworkExt::apply_mask(&prefix);
        for iface in &interfaces {
            if !prefix.contains(iface.addr) {
                return Err(Error::InterfaceOutOfRange(prefix, iface.addr));
            }
        }
        if !prefix.contains(pivot) {
            return Err(Error::InterfaceOutOfRange(prefix, pivot));
        }
        interfaces.sort();
        interfaces.dedup_by_key(|iface| iface.addr);
        Ok(SubnetSite {
            prefix,
            status,
            pivot,
            pivot_ttl,
            interfaces,
            route,
        })
    }

    pub fn contains(&self, addr: Ipv4Addr) -> bool {
        self.prefix.contains(addr)
    }

    pub fn interfaces(&self) -> &[SubnetInterface] {
        &self.interfaces
    }

    // Records an interface, keeping the list sorted and unique per
    // address. Returns false if the address was already known.
    pub fn add_interface(&mut self, iface: SubnetInterface) -> bool {
        match self
            .interfaces
            .binary_search_by_key(&iface.addr, |entry| entry.addr)
        {
            Ok(_) => false,
            Err(pos) => {
                self.interfaces.insert(pos, iface);
                true
            }
        }
    }

    // Unions the interfaces of another subnet into this one, skipping
    // addresses that fall outside this prefix.
    pub fn merge_interfaces(&mut self, other: &SubnetSite) {
        for iface in &other.interfaces {
            if self.prefix.contains(iface.addr) {
                self.add_interface(*iface);
            }
        }
    }

    pub fn has_complete_route(&self) -> bool {
        !self.route.is_empty()
            && self.route.iter().all(|hop| !hop.is_unspecified())
    }

    pub fn last_hop(&self) -> Option<Ipv4Addr> {
        self.route.last().copied()
    }

    // Interfaces one hop closer than the pivot, i.e. the candidate
    // ingress interfaces of the subnet's neighborhood.
    pub fn ingress_interfaces(&self) -> impl Iterator<Item = Ipv4Addr> {
        self.interfaces
            .iter()
            .filter(|iface| self.pivot_ttl > 0 && iface.ttl == self.pivot_ttl - 1)
            .map(|iface| iface.addr)
    }

    pub fn route_starts_with(&self, prefix: &[Ipv4Addr]) -> bool {
        self.route.len() >= prefix.len() && self.route[..prefix.len()] == *prefix
    }

    // Replaces the leading hops of the route when they exactly match
    // `old`. Returns true if the route was modified.
    pub fn replace_route_prefix(
        &mut self,
        old: &[Ipv4Addr],
        new: &[Ipv4Addr],
    ) -> bool {
        if old == new || !self.route_starts_with(old) {
            return false;
        }
        self.route.splice(..old.len(), new.iter().copied());
        true
    }
}

impl std::fmt::Display for SubnetSite {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {} {}", self.prefix, self.status, self.pivot_ttl)
    }
}
