//
// Copyright (c) The Arbor Contributors
//
// SPDX-License-Identifier: MIT
//

use std::collections::HashMap;
use std::net::Ipv4Addr;

use arbor_utils::ip::{Ipv4AddrExt, Ipv4NetworkExt};
use ipnetwork::Ipv4Network;
use smallvec::{SmallVec, smallvec};

use crate::collections::{Arena, NodeIndex, SubnetSiteSet};
use crate::debug::Debug;
use crate::router::Router;
use crate::subnet::SubnetSite;

// Label set of an internal node. Most nodes carry a single label;
// load balancing grows the set.
pub type LabelSet = SmallVec<[Ipv4Addr; 2]>;

// Network tree node types. HEDERA marks an internal node whose
// incoming routes disagree at its depth because of load balancing.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum NodeType {
    Root,
    Internal,
    Hedera,
    Subnet,
}

// One node of the network tree.
#[derive(Debug)]
pub struct NetworkTreeNode {
    pub node_type: NodeType,
    // Responding hop addresses at this node's depth.
    pub labels: LabelSet,
    pub depth: usize,
    pub parent: Option<NodeIndex>,
    pub children: Vec<NodeIndex>,
    // Set on SUBNET leaves only.
    pub subnet: Option<SubnetSite>,
    // Routers inferred for this neighborhood by the alias resolver.
    pub routers: Vec<Router>,
}

// Tree of measured subnets keyed by their routes. Internal nodes
// represent neighborhoods; leaves carry subnets.
#[derive(Debug)]
pub struct NetworkTree {
    arena: Arena<NetworkTreeNode>,
    root: NodeIndex,
    // All non-root nodes, indexed by depth.
    depth_map: Vec<Vec<NodeIndex>>,
    // Subnet leaves, bucketed by the top 20 bits of every address
    // their prefix covers.
    subnet_map: HashMap<u32, Vec<NodeIndex>>,
}

// Per-tree statistics over the internal nodes.
#[derive(Debug, Default, Eq, PartialEq)]
pub struct TreeStatistics {
    pub internals: u32,
    pub only_subnet_children: u32,
    pub complete_linkage: u32,
    pub partial_linkage: u32,
    pub covered_labels: u32,
}

// ===== impl NetworkTreeNode =====

impl NetworkTreeNode {
    fn internal(label: Ipv4Addr, depth: usize, parent: NodeIndex) -> Self {
        NetworkTreeNode {
            node_type: NodeType::Internal,
            labels: smallvec![label],
            depth,
            parent: Some(parent),
            children: Vec::new(),
            subnet: None,
            routers: Vec::new(),
        }
    }

    fn leaf(subnet: SubnetSite, depth: usize, parent: NodeIndex) -> Self {
        NetworkTreeNode {
            node_type: NodeType::Subnet,
            labels: LabelSet::new(),
            depth,
            parent: Some(parent),
            children: Vec::new(),
            subnet: Some(subnet),
            routers: Vec::new(),
        }
    }

    pub fn is_internal(&self) -> bool {
        matches!(self.node_type, NodeType::Internal | NodeType::Hedera)
    }

    pub fn is_leaf(&self) -> bool {
        self.node_type == NodeType::Subnet
    }

    pub fn has_label(&self, addr: Ipv4Addr) -> bool {
        self.labels.contains(&addr)
    }

    pub fn primary_label(&self) -> Option<Ipv4Addr> {
        self.labels.first().copied()
    }
}

// ===== impl NetworkTree =====

impl NetworkTree {
    pub fn new() -> NetworkTree {
        let mut arena = Arena::default();
        let root = arena.insert(NetworkTreeNode {
            node_type: NodeType::Root,
            labels: LabelSet::new(),
            depth: 0,
            parent: None,
            children: Vec::new(),
            subnet: None,
            routers: Vec::new(),
        });
        NetworkTree {
            arena,
            root,
            depth_map: Vec::new(),
            subnet_map: HashMap::new(),
        }
    }

    pub fn root(&self) -> NodeIndex {
        self.root
    }

    pub fn node(&self, idx: NodeIndex) -> &NetworkTreeNode {
        &self.arena[idx]
    }

    pub fn max_depth(&self) -> usize {
        self.depth_map.len()
    }

    pub fn depth_nodes(&self, depth: usize) -> &[NodeIndex] {
        self.depth_map
            .get(depth.wrapping_sub(1))
            .map(|nodes| nodes.as_slice())
            .unwrap_or(&[])
    }

    // Indices of the internal (and HEDERA) nodes, shallowest first.
    pub fn internal_indices(&self) -> Vec<NodeIndex> {
        self.depth_map
            .iter()
            .flatten()
            .copied()
            .filter(|idx| self.arena[*idx].is_internal())
            .collect()
    }

    // Indices of the subnet leaves, shallowest first.
    pub fn subnet_leaves(&self) -> Vec<NodeIndex> {
        self.depth_map
            .iter()
            .flatten()
            .copied()
            .filter(|idx| self.arena[*idx].is_leaf())
            .collect()
    }

    // Subnets present in the tree, sorted by prefix.
    pub fn sites(&self) -> Vec<&SubnetSite> {
        let mut sites: Vec<&SubnetSite> = self
            .subnet_leaves()
            .into_iter()
            .filter_map(|idx| self.arena[idx].subnet.as_ref())
            .collect();
        sites.sort_by_key(|site| site.prefix);
        sites
    }

    // Inserts a subnet at the position given by its route, creating
    // or fusing internal nodes along the way.
    pub fn insert(&mut self, ss: SubnetSite) {
        let route = ss.route.clone();
        let mut cur = self.root;
        for (i, hop) in route.iter().enumerate() {
            let next_hop = route.get(i + 1).copied();
            cur = self.select_child(cur, i + 1, *hop, next_hop);
        }

        let depth = route.len() + 1;
        let prefix = ss.prefix;
        let leaf = self.arena.insert(NetworkTreeNode::leaf(ss, depth, cur));
        self.arena[cur].children.push(leaf);
        self.register(leaf, depth);
        self.register_subnet(leaf, &prefix);
        Debug::SubnetInserted(&prefix, depth).log();
    }

    // Picks (or creates) the child of `cur` matching the route hop at
    // the given depth.
    fn select_child(
        &mut self,
        cur: NodeIndex,
        depth: usize,
        hop: Ipv4Addr,
        next_hop: Option<Ipv4Addr>,
    ) -> NodeIndex {
        // Missing hop: reuse any internal child at this depth. The
        // label is repaired later, once the surrounding routes pin it
        // down.
        if hop.is_unspecified() {
            if let Some(child) = self.internal_children(cur).into_iter().next()
            {
                return child;
            }
            return self.new_internal(cur, depth, hop);
        }

        let matches: Vec<NodeIndex> = self
            .internal_children(cur)
            .into_iter()
            .filter(|child| self.arena[*child].has_label(hop))
            .collect();
        match matches.len() {
            1 => return matches[0],
            0 => (),
            // The hop matches several children: earlier insertions saw
            // their labels as distinct; fuse them into one node.
            _ => return self.fuse_children(&matches),
        }

        // Lookahead: when the next hop already exists one level below
        // a sibling, this hop is a load-balanced alternative of that
        // sibling's labels.
        if let Some(next_hop) = next_hop
            && !next_hop.is_unspecified()
            && let Some(sibling) =
                self.internal_children(cur).into_iter().find(|child| {
                    self.arena[*child].children.iter().any(|gc| {
                        self.arena[*gc].is_internal()
                            && self.arena[*gc].has_label(next_hop)
                    })
                })
        {
            let node = &mut self.arena[sibling];
            Debug::NodeFusion(&node.labels, hop).log();
            node.labels.push(hop);
            node.node_type = NodeType::Hedera;
            return sibling;
        }

        self.new_internal(cur, depth, hop)
    }

    // Merges label-sharing siblings into the first of them, which
    // becomes a HEDERA carrying the union of the label sets.
    fn fuse_children(&mut self, matches: &[NodeIndex]) -> NodeIndex {
        let target = matches[0];
        for &other in &matches[1..] {
            let node = &self.arena[other];
            let parent = node.parent.unwrap();
            let labels = node.labels.clone();
            let children = node.children.clone();
            let depth = node.depth;
            Debug::NodeFusion(&self.arena[target].labels, labels[0]).log();

            for label in labels {
                if !self.arena[target].has_label(label) {
                    self.arena[target].labels.push(label);
                }
            }
            for child in children {
                self.arena[child].parent = Some(target);
                self.arena[target].children.push(child);
            }
            self.arena[parent].children.retain(|child| *child != other);
            self.unregister(other, depth);
            self.arena.remove(other);
        }
        let node = &mut self.arena[target];
        if node.labels.len() > 1 {
            node.node_type = NodeType::Hedera;
        }
        target
    }

    fn internal_children(&self, idx: NodeIndex) -> Vec<NodeIndex> {
        self.arena[idx]
            .children
            .iter()
            .copied()
            .filter(|child| self.arena[*child].is_internal())
            .collect()
    }

    fn new_internal(
        &mut self,
        parent: NodeIndex,
        depth: usize,
        label: Ipv4Addr,
    ) -> NodeIndex {
        let node = NetworkTreeNode::internal(label, depth, parent);
        let idx = self.arena.insert(node);
        self.arena[parent].children.push(idx);
        self.register(idx, depth);
        idx
    }

    fn register(&mut self, idx: NodeIndex, depth: usize) {
        if self.depth_map.len() < depth {
            self.depth_map.resize_with(depth, Vec::new);
        }
        self.depth_map[depth - 1].push(idx);
    }

    fn unregister(&mut self, idx: NodeIndex, depth: usize) {
        if let Some(nodes) = self.depth_map.get_mut(depth - 1) {
            nodes.retain(|node| *node != idx);
        }
    }

    // Registers a subnet leaf under every bucket its prefix covers.
    fn register_subnet(&mut self, leaf: NodeIndex, prefix: &Ipv4Network) {
        let first = prefix.network().bucket();
        let last = Ipv4NetworkExt::last(prefix).bucket();
        for bucket in first..=last {
            self.subnet_map.entry(bucket).or_default().push(leaf);
        }
    }

    fn unregister_subnet(&mut self, leaf: NodeIndex, prefix: &Ipv4Network) {
        let first = prefix.network().bucket();
        let last = Ipv4NetworkExt::last(prefix).bucket();
        for bucket in first..=last {
            if let Some(leaves) = self.subnet_map.get_mut(&bucket) {
                leaves.retain(|idx| *idx != leaf);
            }
        }
    }

    // Subnet present in the tree covering the given address, if any.
    pub fn subnet_containing(&self, addr: Ipv4Addr) -> Option<&SubnetSite> {
        let leaves = self.subnet_map.get(&addr.bucket())?;
        leaves
            .iter()
            .filter_map(|idx| self.arena[*idx].subnet.as_ref())
            .find(|site| site.contains(addr))
    }

    // Detaches the leaf carrying the subnet whose pivot matches the
    // given address and returns its site, pruning any internal nodes
    // the removal leaves empty.
    pub fn detach_subnet(&mut self, pivot: Ipv4Addr) -> Option<SubnetSite> {
        let leaf = self
            .subnet_map
            .get(&pivot.bucket())?
            .iter()
            .copied()
            .find(|idx| {
                self.arena[*idx]
                    .subnet
                    .as_ref()
                    .map(|site| site.pivot == pivot)
                    .unwrap_or(false)
            })?;

        let parent = self.arena[leaf].parent.unwrap();
        let depth = self.arena[leaf].depth;
        let site = self.arena[leaf].subnet.take().unwrap();

        self.arena[parent].children.retain(|child| *child != leaf);
        self.unregister(leaf, depth);
        self.unregister_subnet(leaf, &site.prefix);
        self.arena.remove(leaf);
        self.prune_upward(parent);
        Debug::SubnetDetached(&site.prefix).log();
        Some(site)
    }

    // Detaches every subnet leaf, handing the sites back to the given
    // set.
    pub fn nullify_leaves(&mut self, set: &mut SubnetSiteSet) {
        let pivots: Vec<Ipv4Addr> = self
            .subnet_leaves()
            .into_iter()
            .filter_map(|idx| self.arena[idx].subnet.as_ref())
            .map(|site| site.pivot)
            .collect();
        for pivot in pivots {
            if let Some(site) = self.detach_subnet(pivot) {
                set.add_site(site);
            }
        }
    }

    // Walks upward removing nodes emptied by a leaf removal. Stops at
    // the first ancestor that still holds children, a subnet, or
    // inferred routers.
    fn prune_upward(&mut self, start: NodeIndex) {
        let mut idx = start;
        while idx != self.root {
            let node = &self.arena[idx];
            if !node.children.is_empty()
                || node.subnet.is_some()
                || !node.routers.is_empty()
            {
                break;
            }
            let parent = node.parent.unwrap();
            let depth = node.depth;
            self.arena[parent].children.retain(|child| *child != idx);
            self.unregister(idx, depth);
            self.arena.remove(idx);
            idx = parent;
        }
    }

    // Fills missing route hops of every subnet from the labels of the
    // internal nodes on its path, when those labels are unambiguous.
    // Returns the number of repaired hops.
    pub fn repair_routes(&mut self) -> usize {
        let mut repaired = 0;
        for leaf in self.subnet_leaves() {
            // Ancestor path of the leaf, indexed by depth (root
            // excluded).
            let mut path = Vec::new();
            let mut cur = self.arena[leaf].parent;
            while let Some(idx) = cur
                && idx != self.root
            {
                path.push(idx);
                cur = self.arena[idx].parent;
            }
            path.reverse();

            let labels: Vec<Option<Ipv4Addr>> = path
                .iter()
                .map(|idx| {
                    let node = &self.arena[*idx];
                    match node.labels.as_slice() {
                        [label] if !label.is_unspecified() => Some(*label),
                        _ => None,
                    }
                })
                .collect();

            let site = self.arena[leaf].subnet.as_mut().unwrap();
            let prefix = site.prefix;
            for (d, hop) in site.route.iter_mut().enumerate() {
                if hop.is_unspecified()
                    && let Some(Some(label)) = labels.get(d)
                {
                    *hop = *label;
                    repaired += 1;
                    Debug::RouteRepaired(&prefix, d + 1, *label).log();
                }
            }
        }
        repaired
    }

    // Label sets of the main trunk: the prefix path from the root
    // along nodes with a single child.
    pub fn trunk(&self) -> Vec<LabelSet> {
        let mut labels = Vec::new();
        let mut cur = self.root;
        loop {
            let node = &self.arena[cur];
            if node.children.len() != 1 {
                break;
            }
            let child = node.children[0];
            if !self.arena[child].is_internal() {
                break;
            }
            labels.push(self.arena[child].labels.clone());
            cur = child;
        }
        labels
    }

    // Returns true if the subnet's route is consistent with the trunk
    // labels.
    pub fn fitting_route(&self, ss: &SubnetSite) -> bool {
        let trunk = self.trunk();
        let overlap = trunk.len().min(ss.route.len());
        (0..overlap).all(|d| {
            let hop = ss.route[d];
            hop.is_unspecified() || trunk[d].contains(&hop)
        })
    }

    // Looks for a graft point on the trunk: the longest run of hops
    // matching the trunk labels at the same depths, preceded by a
    // head that does not fit. Returns the head to rewrite and the
    // trunk labels replacing it.
    pub fn find_transplantation(
        &self,
        ss: &SubnetSite,
    ) -> Option<(Vec<Ipv4Addr>, Vec<Ipv4Addr>)> {
        let trunk = self.trunk();
        let overlap = trunk.len().min(ss.route.len());
        let mut start = overlap;
        while start > 0 {
            let hop = ss.route[start - 1];
            if !hop.is_unspecified() && trunk[start - 1].contains(&hop) {
                start -= 1;
            } else {
                break;
            }
        }
        // start == 0 means the route already fits; start == overlap
        // means nothing matches.
        if start == 0 || start == overlap {
            return None;
        }
        let old_prefix = ss.route[..start].to_vec();
        let new_prefix = trunk[..start]
            .iter()
            .map(|labels| labels[0])
            .collect();
        Some((old_prefix, new_prefix))
    }

    // Alias-resolution candidates of an internal node: its labels plus
    // the ingress interfaces of its child subnets. Duplicates are
    // kept; the collector dedups after sorting.
    pub fn neighborhood_interfaces(&self, idx: NodeIndex) -> Vec<Ipv4Addr> {
        let node = &self.arena[idx];
        let mut out: Vec<Ipv4Addr> = node
            .labels
            .iter()
            .copied()
            .filter(|label| !label.is_unspecified())
            .collect();
        for child in &node.children {
            if let Some(site) = &self.arena[*child].subnet {
                out.extend(site.ingress_interfaces());
            }
        }
        out
    }

    // Child subnets of an internal node.
    pub fn child_subnets(&self, idx: NodeIndex) -> Vec<&SubnetSite> {
        self.arena[idx]
            .children
            .iter()
            .filter_map(|child| self.arena[*child].subnet.as_ref())
            .collect()
    }

    pub fn attach_routers(&mut self, idx: NodeIndex, routers: Vec<Router>) {
        self.arena[idx].routers = routers;
    }

    pub fn statistics(&self) -> TreeStatistics {
        let mut stats = TreeStatistics::default();
        for idx in self.internal_indices() {
            let node = &self.arena[idx];
            stats.internals += 1;

            let child_internals = self.internal_children(idx);
            let child_subnets = self.child_subnets(idx);
            if child_internals.is_empty() {
                stats.only_subnet_children += 1;
            }

            // A child neighborhood is linked when its ingress label is
            // an interface of one of the subnets at this level.
            let linked = child_internals
                .iter()
                .filter(|child| {
                    self.arena[**child].labels.iter().any(|label| {
                        child_subnets.iter().any(|site| {
                            site.interfaces()
                                .iter()
                                .any(|iface| iface.addr == *label)
                        })
                    })
                })
                .count();
            if linked == child_internals.len() {
                stats.complete_linkage += 1;
            }
            if linked + 2 >= child_internals.len() {
                stats.partial_linkage += 1;
            }

            if node.labels.iter().all(|label| {
                !label.is_unspecified()
                    && self.subnet_containing(*label).is_some()
            }) {
                stats.covered_labels += 1;
            }
        }
        stats
    }
}

impl Default for NetworkTree {
    fn default() -> NetworkTree {
        NetworkTree::new()
    }
}
