//
// Copyright (c) The Arbor Contributors
//
// SPDX-License-Identifier: MIT
//

use std::net::Ipv4Addr;

use ipnetwork::{IpNetworkError, Ipv4Network};

// Number of most significant bits used to bucket subnets in the
// network tree's subnet map.
pub const SUBNET_BUCKET_BITS: u32 = 20;

// Extension methods for Ipv4Addr.
pub trait Ipv4AddrExt {
    const LENGTH: usize;

    // Returns true if this is an usable address.
    fn is_usable(&self) -> bool;

    // Returns true if this address belongs to a block that is not
    // publicly routable (loopback, multicast, 240.0.0.0/4, etc).
    fn is_reserved(&self) -> bool;

    // Returns the bucket formed by the 20 most significant bits.
    fn bucket(&self) -> u32;

    // Converts this IPv4 address into a host prefix network.
    fn to_host_prefix(&self) -> Ipv4Network;
}

// Extension methods for Ipv4Network.
pub trait Ipv4NetworkExt {
    const MAX_PREFIXLEN: u8;

    // Apply mask to prefix.
    #[must_use]
    fn apply_mask(&self) -> Ipv4Network;

    // Returns true if this is a host prefix.
    fn is_host_prefix(&self) -> bool;

    // Returns the last address covered by this prefix.
    fn last(&self) -> Ipv4Addr;

    // Returns true if this network contains `other` without being
    // equal to it.
    fn strictly_contains(&self, other: &Ipv4Network) -> bool;

    // Builds a prefix from an address and a length, normalizing the
    // host bits away.
    fn from_parts(
        addr: Ipv4Addr,
        prefixlen: u8,
    ) -> Result<Ipv4Network, IpNetworkError>;
}

// ===== impl Ipv4Addr =====

impl Ipv4AddrExt for Ipv4Addr {
    const LENGTH: usize = 4;

    fn is_usable(&self) -> bool {
        !(self.is_loopback()
            || self.is_broadcast()
            || self.is_multicast()
            || self.is_unspecified())
    }

    fn is_reserved(&self) -> bool {
        self.is_unspecified()
            || self.is_loopback()
            || self.is_broadcast()
            || self.is_multicast()
            // 240.0.0.0/4 is reserved for future use.
            || self.octets()[0] >= 240
    }

    fn bucket(&self) -> u32 {
        u32::from(*self) >> (32 - SUBNET_BUCKET_BITS)
    }

    fn to_host_prefix(&self) -> Ipv4Network {
        Ipv4Network::new(*self, Ipv4Network::MAX_PREFIXLEN).unwrap()
    }
}

// ===== impl Ipv4Network =====

impl Ipv4NetworkExt for Ipv4Network {
    const MAX_PREFIXLEN: u8 = 32;

    fn apply_mask(&self) -> Ipv4Network {
        Ipv4Network::new(self.network(), self.prefix()).unwrap()
    }

    fn is_host_prefix(&self) -> bool {
        self.prefix() == Self::MAX_PREFIXLEN
    }

    fn last(&self) -> Ipv4Addr {
        let size = 1u64 << (32 - self.prefix() as u64);
        let first = u32::from(self.network()) as u64;
        Ipv4Addr::from((first + size - 1) as u32)
    }

    fn strictly_contains(&self, other: &Ipv4Network) -> bool {
        self.prefix() < other.prefix()
            && self.contains(other.network())
            && self.contains(Ipv4NetworkExt::last(other))
    }

    fn from_parts(
        addr: Ipv4Addr,
        prefixlen: u8,
    ) -> Result<Ipv4Network, IpNetworkError> {
        let prefix = Ipv4Network::new(addr, prefixlen)?;
        Ok(Ipv4NetworkExt::apply_mask(&prefix))
    }
}
