//
// Copyright (c) The Arbor Contributors
//
// SPDX-License-Identifier: MIT
//

use std::net::Ipv4Addr;

use ipnetwork::Ipv4Network;
use tracing::{debug, debug_span};

use crate::collections::InsertionResult;
use crate::collector::CollectionPhase;

// Arbor debug messages.
#[derive(Debug)]
pub enum Debug<'a> {
    // Subnet set
    SubnetRegistered(&'a Ipv4Network, InsertionResult),
    // Network tree
    SubnetInserted(&'a Ipv4Network, usize),
    SubnetDetached(&'a Ipv4Network),
    NodeFusion(&'a [Ipv4Addr], Ipv4Addr),
    RouteRepaired(&'a Ipv4Network, usize, Ipv4Addr),
    RouteTransplanted(&'a Ipv4Network, &'a [Ipv4Addr], &'a [Ipv4Addr]),
    // Alias hint collection
    PhaseStarted(CollectionPhase, usize),
    PhaseFinished(CollectionPhase),
    // Alias resolution
    NeighborhoodResolved(&'a [Ipv4Addr], usize),
}

// ===== impl Debug =====

impl Debug<'_> {
    // Log debug message using the tracing API.
    pub(crate) fn log(&self) {
        match self {
            Debug::SubnetRegistered(prefix, result) => {
                debug!(%prefix, ?result, "{}", self);
            }
            Debug::SubnetInserted(prefix, depth) => {
                debug!(%prefix, %depth, "{}", self);
            }
            Debug::SubnetDetached(prefix) => {
                debug!(%prefix, "{}", self);
            }
            Debug::NodeFusion(labels, new_label) => {
                debug!(?labels, %new_label, "{}", self);
            }
            Debug::RouteRepaired(prefix, depth, label) => {
                debug!(%prefix, %depth, %label, "{}", self);
            }
            Debug::RouteTransplanted(prefix, old, new) => {
                debug!(%prefix, ?old, ?new, "{}", self);
            }
            Debug::PhaseStarted(phase, nb_ips) => {
                debug_span!("collector", %phase).in_scope(|| {
                    debug!(%nb_ips, "{}", self);
                })
            }
            Debug::PhaseFinished(phase) => {
                debug_span!("collector", %phase).in_scope(|| {
                    debug!("{}", self);
                })
            }
            Debug::NeighborhoodResolved(labels, nb_routers) => {
                debug!(?labels, %nb_routers, "{}", self);
            }
        }
    }
}

impl std::fmt::Display for Debug<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Debug::SubnetRegistered(..) => {
                write!(f, "subnet registered")
            }
            Debug::SubnetInserted(..) => {
                write!(f, "subnet inserted into the network tree")
            }
            Debug::SubnetDetached(..) => {
                write!(f, "subnet detached from the network tree")
            }
            Debug::NodeFusion(..) => {
                write!(f, "load-balanced hops fused into a single node")
            }
            Debug::RouteRepaired(..) => {
                write!(f, "missing route hop repaired")
            }
            Debug::RouteTransplanted(..) => {
                write!(f, "route grafted onto the main trunk")
            }
            Debug::PhaseStarted(..) => {
                write!(f, "probing phase started")
            }
            Debug::PhaseFinished(..) => {
                write!(f, "probing phase finished")
            }
            Debug::NeighborhoodResolved(..) => {
                write!(f, "neighborhood interfaces grouped into routers")
            }
        }
    }
}
