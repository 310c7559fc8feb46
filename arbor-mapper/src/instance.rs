//
// Copyright (c) The Arbor Contributors
//
// SPDX-License-Identifier: MIT
//

use std::sync::{Arc, Mutex};

use tracing::info;

use crate::collections::SubnetSiteSet;
use crate::collector::{AliasHintCollector, CollectorConfig};
use crate::debug::Debug;
use crate::error::Error;
use crate::ip_table::{IpTable, SharedIpTable};
use crate::output;
use crate::parse;
use crate::probe::Prober;
use crate::resolver::AliasResolver;
use crate::subnet::SubnetSite;
use crate::tree::{NetworkTree, TreeStatistics};

// Top-level mapper instance: owns the subnet set, the network tree,
// the IP table and the collector, and drives the inference pipeline
// end to end.
#[derive(Debug)]
pub struct Mapper {
    pub set: SubnetSiteSet,
    pub tree: NetworkTree,
    table: SharedIpTable,
    collector: AliasHintCollector,
}

// ===== impl Mapper =====

impl Mapper {
    pub fn new(config: CollectorConfig) -> Result<Mapper, Error> {
        config.validate()?;
        let prober =
            Arc::new(Prober::new(config.timeout).map_err(Error::IoError)?);
        let table: SharedIpTable = Arc::new(Mutex::new(IpTable::default()));
        let collector =
            AliasHintCollector::new(table.clone(), prober, config);
        Ok(Mapper {
            set: SubnetSiteSet::default(),
            tree: NetworkTree::new(),
            table,
            collector,
        })
    }

    #[cfg(feature = "testing")]
    pub fn prober(&self) -> Arc<Prober> {
        self.collector.prober()
    }

    // Feeds measured subnets from a snapshot file into the set.
    pub fn load_subnets(&mut self, input: &str) -> Result<(), Error> {
        for site in parse::parse_subnet_records(input)? {
            let prefix = site.prefix;
            let result = self.set.add_site(site);
            Debug::SubnetRegistered(&prefix, result).log();
        }
        info!(subnets = %self.set.len(), "subnet set assembled");
        Ok(())
    }

    // Moves the usable subnets of the set into the network tree.
    // Complete routes go first so they pin the trunk down before
    // incomplete routes are fitted, then missing hops are repaired
    // from the tree labels.
    pub fn grow_tree(&mut self) {
        self.set.sort_by_route();
        // Sites are pulled one at a time so that a transplantation
        // triggered by one insertion rewrites the kindred routes still
        // waiting in the set.
        while let Some(site) = self.set.get_valid_subnet(true) {
            self.insert_site(site);
        }
        while let Some(site) = self.set.get_valid_subnet(false) {
            self.insert_site(site);
        }
        let repaired = self.tree.repair_routes();
        if repaired > 0 {
            info!(%repaired, "repaired missing route hops");
        }
    }

    fn insert_site(&mut self, mut site: SubnetSite) {
        if self.tree.fitting_route(&site) {
            self.tree.insert(site);
            return;
        }
        if let Some((old, new)) = self.tree.find_transplantation(&site) {
            Debug::RouteTransplanted(&site.prefix, &old, &new).log();
            site.replace_route_prefix(&old, &new);
            // Kindred routes still waiting in the set get the same
            // rewrite.
            self.set.adapt_routes(&old, &new);
            self.tree.insert(site);
            return;
        }
        Error::InconsistentRoute(site.prefix).log();
    }

    // Probes each neighborhood and groups its interfaces into
    // routers, deepest neighborhoods first.
    pub async fn resolve_aliases(&mut self) {
        let mut internals = self.tree.internal_indices();
        internals.reverse();
        for idx in internals {
            let candidates = self.tree.neighborhood_interfaces(idx);
            if candidates.is_empty() {
                continue;
            }
            let ttl = self.tree.node(idx).depth as u8;
            self.collector.enqueue(candidates);
            self.collector.collect(ttl).await;

            let table = self.table.lock().unwrap();
            AliasResolver::new(&table).resolve(&mut self.tree, idx);
        }
    }

    // Full pipeline over a subnet snapshot.
    pub async fn run(&mut self, input: &str) -> Result<(), Error> {
        self.load_subnets(input)?;
        self.grow_tree();
        self.resolve_aliases().await;
        Ok(())
    }

    pub fn statistics(&self) -> TreeStatistics {
        self.tree.statistics()
    }

    pub fn subnet_report(&self) -> String {
        output::subnet_list(self.tree.sites())
    }

    pub fn alias_report(&self) -> String {
        output::alias_list(&self.tree)
    }

    pub fn bipartite_report(&self) -> String {
        output::bipartite(&self.tree)
    }
}
