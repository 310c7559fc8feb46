//
// Copyright (c) The Arbor Contributors
//
// SPDX-License-Identifier: MIT
//

use std::net::Ipv4Addr;

use arbor_utils::ip::Ipv4NetworkExt;
use generational_arena::Index;
use serde::{Deserialize, Serialize};

use crate::subnet::{SubnetSite, SubnetStatus};

pub type NodeIndex = Index;

#[derive(Debug)]
pub struct Arena<T>(generational_arena::Arena<T>);

// Outcome of a subnet insertion into the set.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub enum InsertionResult {
    // The exact same subnet was already known.
    KnownSubnet,
    // An existing subnet contains the new one, which was absorbed.
    SmallerSubnet,
    // The new subnet absorbed one or more existing subnets.
    BiggerSubnet,
    NewSubnet,
}

// Collection of measured subnets, sorted by (prefix, prefix length),
// with no subnet strictly contained in another.
#[derive(Debug, Default)]
pub struct SubnetSiteSet {
    sites: Vec<SubnetSite>,
}

// ===== impl Arena =====

impl<T> Arena<T> {
    pub(crate) fn insert(&mut self, value: T) -> Index {
        self.0.insert(value)
    }

    pub(crate) fn remove(&mut self, index: Index) -> Option<T> {
        self.0.remove(index)
    }
}

impl<T> Default for Arena<T> {
    fn default() -> Arena<T> {
        Arena(Default::default())
    }
}

impl<T> std::ops::Index<Index> for Arena<T> {
    type Output = T;

    fn index(&self, index: Index) -> &Self::Output {
        &self.0[index]
    }
}

impl<T> std::ops::IndexMut<Index> for Arena<T> {
    fn index_mut(&mut self, index: Index) -> &mut Self::Output {
        &mut self.0[index]
    }
}

// ===== impl SubnetSiteSet =====

impl SubnetSiteSet {
    // Registers a subnet, merging it with existing subnets whenever
    // one contains the other.
    pub fn add_site(&mut self, mut ss: SubnetSite) -> InsertionResult {
        let pos = self.insertion_point(&ss);

        // Exact duplicate: absorb the new interface list.
        if pos < self.sites.len() && self.sites[pos].prefix == ss.prefix {
            let existing = &mut self.sites[pos];
            existing.merge_interfaces(&ss);
            return InsertionResult::KnownSubnet;
        }

        // A containing subnet sorts before the insertion point; scan
        // the immediate neighbors first and extend outward.
        for i in (0..pos).rev() {
            if self.sites[i].prefix.strictly_contains(&ss.prefix) {
                self.sites[i].merge_interfaces(&ss);
                return InsertionResult::SmallerSubnet;
            }
        }

        // Contained subnets sort after the insertion point, within the
        // address range of the new prefix.
        let last = Ipv4NetworkExt::last(&ss.prefix);
        let mut absorbed = false;
        let mut i = pos;
        while i < self.sites.len()
            && self.sites[i].prefix.network() <= last
        {
            if ss.prefix.strictly_contains(&self.sites[i].prefix) {
                let contained = self.sites.remove(i);
                ss.merge_interfaces(&contained);
                absorbed = true;
                continue;
            }
            i += 1;
        }

        let pos = self.insertion_point(&ss);
        self.sites.insert(pos, ss);
        if absorbed {
            InsertionResult::BiggerSubnet
        } else {
            InsertionResult::NewSubnet
        }
    }

    // First subnet whose prefix range covers the given address.
    pub fn get_subnet_containing(
        &self,
        addr: Ipv4Addr,
    ) -> Option<&SubnetSite> {
        self.sites.iter().find(|site| site.contains(addr))
    }

    // As above, additionally requiring the subnet's pivot distance to
    // match.
    pub fn get_subnet_containing_with_ttl(
        &self,
        addr: Ipv4Addr,
        ttl: u8,
    ) -> Option<&SubnetSite> {
        self.sites
            .iter()
            .find(|site| site.contains(addr) && site.pivot_ttl == ttl)
    }

    // Returns true if every subnet overlapping [lower, upper] sits at
    // the given distance (within one hop when `check_adjacent_ttl`).
    // When `shadow_expansion` is set, any overlapping ACCURATE or ODD
    // subnet is a blocker regardless of distance.
    pub fn is_compatible(
        &self,
        lower: Ipv4Addr,
        upper: Ipv4Addr,
        ttl: u8,
        check_adjacent_ttl: bool,
        shadow_expansion: bool,
    ) -> bool {
        for site in &self.sites {
            let first = site.prefix.network();
            let last = Ipv4NetworkExt::last(&site.prefix);
            if last < lower || first > upper {
                continue;
            }
            if shadow_expansion
                && matches!(
                    site.status,
                    SubnetStatus::Accurate | SubnetStatus::Odd
                )
            {
                return false;
            }
            let distance = ttl.abs_diff(site.pivot_ttl);
            let max_distance = if check_adjacent_ttl { 1 } else { 0 };
            if distance > max_distance {
                return false;
            }
        }
        true
    }

    // Removes and returns the first subnet usable for tree insertion:
    // measured status and, when `complete_route` is set, a route with
    // no missing hop.
    pub fn get_valid_subnet(
        &mut self,
        complete_route: bool,
    ) -> Option<SubnetSite> {
        let pos = self.sites.iter().position(|site| {
            matches!(
                site.status,
                SubnetStatus::Accurate
                    | SubnetStatus::Odd
                    | SubnetStatus::Shadow
            ) && !site.route.is_empty()
                && (!complete_route || site.has_complete_route())
        })?;
        Some(self.sites.remove(pos))
    }

    // Removes and returns the first shadow subnet.
    pub fn get_shadow_subnet(&mut self) -> Option<SubnetSite> {
        let pos = self
            .sites
            .iter()
            .position(|site| site.status == SubnetStatus::Shadow)?;
        Some(self.sites.remove(pos))
    }

    // Reorders the set by route length, shortest first.
    pub fn sort_by_route(&mut self) {
        self.sites.sort_by(|a, b| {
            a.route
                .len()
                .cmp(&b.route.len())
                .then_with(|| a.prefix.cmp(&b.prefix))
        });
    }

    // Longest pivot distance across the set.
    pub fn get_maximum_distance(&self) -> u8 {
        self.sites
            .iter()
            .map(|site| site.pivot_ttl)
            .max()
            .unwrap_or(0)
    }

    // Rewrites the leading hops of every route starting with
    // `old_prefix`, returning the number of modified subnets.
    pub fn adapt_routes(
        &mut self,
        old_prefix: &[Ipv4Addr],
        new_prefix: &[Ipv4Addr],
    ) -> usize {
        let mut modified = 0;
        for site in self.sites.iter_mut() {
            if site.replace_route_prefix(old_prefix, new_prefix) {
                modified += 1;
            }
        }
        modified
    }

    pub fn iter(&self) -> impl Iterator<Item = &SubnetSite> {
        self.sites.iter()
    }

    pub fn len(&self) -> usize {
        self.sites.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sites.is_empty()
    }

    // Position where the given subnet sorts in the set.
    fn insertion_point(&self, ss: &SubnetSite) -> usize {
        self.sites
            .partition_point(|site| site.prefix < ss.prefix)
    }
}
