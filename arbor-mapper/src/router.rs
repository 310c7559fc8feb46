//
// Copyright (c) The Arbor Contributors
//
// SPDX-License-Identifier: MIT
//

use std::net::Ipv4Addr;

use derive_new::new;
use serde::{Deserialize, Serialize};

use crate::ip_table::{IpIdCounter, IpTable};

// Probing technique that established that two interfaces belong to the
// same router.
#[derive(Clone, Copy, Debug, Eq, Ord, PartialEq, PartialOrd)]
#[derive(Deserialize, Serialize)]
pub enum AliasMethod {
    IpIdBased,
    UdpPortUnreachable,
    ReverseDns,
    GroupEcho,
    GroupRandom,
    GroupReserved,
}

// One interface of an inferred router. Ordered by address first, so
// sorted interface lists read in address order.
#[derive(Clone, Copy, Debug, Eq, Ord, PartialEq, PartialOrd)]
#[derive(Deserialize, Serialize)]
#[derive(new)]
pub struct RouterInterface {
    pub addr: Ipv4Addr,
    pub method: AliasMethod,
}

// A set of interfaces believed to sit on the same device. The list is
// kept sorted by address.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub struct Router {
    interfaces: Vec<RouterInterface>,
}

// ===== impl AliasMethod =====

impl std::fmt::Display for AliasMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AliasMethod::IpIdBased => write!(f, "IP_ID_BASED"),
            AliasMethod::UdpPortUnreachable => {
                write!(f, "UDP_PORT_UNREACHABLE")
            }
            AliasMethod::ReverseDns => write!(f, "REVERSE_DNS"),
            AliasMethod::GroupEcho => write!(f, "GROUP_ECHO"),
            AliasMethod::GroupRandom => write!(f, "GROUP_RANDOM"),
            AliasMethod::GroupReserved => write!(f, "GROUP_RESERVED"),
        }
    }
}

// ===== impl Router =====

impl Router {
    pub fn new() -> Router {
        Router::default()
    }

    // Records an interface, keeping the list sorted by address. The
    // method of an already known address is left untouched, so an
    // interface keeps the method that first grouped it.
    pub fn add_interface(&mut self, iface: RouterInterface) -> bool {
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

    pub fn has_interface(&self, addr: Ipv4Addr) -> bool {
        self.interfaces.iter().any(|iface| iface.addr == addr)
    }

    pub fn interfaces(&self) -> &[RouterInterface] {
        &self.interfaces
    }

    pub fn len(&self) -> usize {
        self.interfaces.len()
    }

    pub fn is_empty(&self) -> bool {
        self.interfaces.is_empty()
    }

    // A router is credible with two or more interfaces, or with a
    // single interface whose port-unreachable reply came from another
    // address.
    pub fn is_valid(&self, table: &IpTable) -> bool {
        match self.interfaces.len() {
            0 => false,
            1 => {
                let iface = &self.interfaces[0];
                iface.method == AliasMethod::UdpPortUnreachable
                    && table
                        .get(&iface.addr)
                        .map(|entry| entry.udp_reply_mismatch())
                        .unwrap_or(false)
            }
            _ => true,
        }
    }

    // First interface usable as an anchor when merging two router
    // candidates: associated via port-unreachable replies and backed
    // by a healthy IP-ID counter.
    pub fn get_merging_pivot(&self, table: &IpTable) -> Option<Ipv4Addr> {
        self.interfaces
            .iter()
            .filter(|iface| iface.method == AliasMethod::UdpPortUnreachable)
            .find(|iface| {
                table
                    .get(&iface.addr)
                    .map(|entry| entry.counter == IpIdCounter::Healthy)
                    .unwrap_or(false)
            })
            .map(|iface| iface.addr)
    }

    // Distinct alias methods used by this router's interfaces, in
    // interface order.
    pub fn methods(&self) -> Vec<AliasMethod> {
        let mut methods = Vec::new();
        for iface in &self.interfaces {
            if !methods.contains(&iface.method) {
                methods.push(iface.method);
            }
        }
        methods
    }
}

impl std::fmt::Display for Router {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut first = true;
        for iface in &self.interfaces {
            if !first {
                write!(f, " ")?;
            }
            write!(f, "{}", iface.addr)?;
            first = false;
        }
        Ok(())
    }
}
