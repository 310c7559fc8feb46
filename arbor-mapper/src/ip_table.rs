//
// Copyright (c) The Arbor Contributors
//
// SPDX-License-Identifier: MIT
//

use std::collections::BTreeMap;
use std::net::Ipv4Addr;
use std::sync::{Arc, Mutex};

use bitflags::bitflags;
use chrono::{DateTime, Utc};
use derive_new::new;
use serde::{Deserialize, Serialize};

use crate::consts::{MAX_FAST_VELOCITY, MAX_HEALTHY_VELOCITY};

// Classification of the IP-ID counter of a probed interface.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub enum IpIdCounter {
    #[default]
    Unknown,
    // Increments at a rate low enough for alias inference.
    Healthy,
    // Jumps around with no usable pattern.
    Random,
    // Echoes back the IP-ID of the probe.
    Echo,
    // Increments monotonically but too fast for alias inference.
    Fast,
}

// One IP-ID sample, tagged with the probe token of the worker that
// collected it.
#[derive(Clone, Copy, Debug)]
#[derive(Deserialize, Serialize)]
#[derive(new)]
pub struct IpIdSample {
    pub token: u64,
    pub time: DateTime<Utc>,
    pub ip_id: u16,
    pub echoed: bool,
}

bitflags! {
    // Reply flags recorded by the probing phases.
    #[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
    #[derive(Deserialize, Serialize)]
    #[serde(transparent)]
    pub struct EntryFlags: u8 {
        const TIMESTAMP_REPLY = 0x01;
        const UDP_REPLY = 0x02;
    }
}

// Probing state of one interface.
//
// Entries are created on first mention and are never deleted during a
// run; each probing phase fills in its own fields.
#[derive(Clone, Debug)]
#[derive(Deserialize, Serialize)]
pub struct IpTableEntry {
    pub addr: Ipv4Addr,
    pub ttl: u8,
    pub samples: Vec<IpIdSample>,
    pub counter: IpIdCounter,
    pub hostname: Option<String>,
    pub flags: EntryFlags,
    // Source address of the ICMP port-unreachable reply, when one was
    // received.
    pub udp_reply_src: Option<Ipv4Addr>,
    // Remote clock offset in milliseconds, from the ICMP timestamp
    // reply.
    pub ts_fingerprint: Option<i64>,
}

// Table of probing state, keyed by interface address.
#[derive(Debug, Default)]
#[derive(Deserialize, Serialize)]
pub struct IpTable(BTreeMap<Ipv4Addr, IpTableEntry>);

// Shared handle used by the collector workers.
pub type SharedIpTable = Arc<Mutex<IpTable>>;

// ===== impl IpTableEntry =====

impl IpTableEntry {
    pub(crate) fn new(addr: Ipv4Addr, ttl: u8) -> IpTableEntry {
        IpTableEntry {
            addr,
            ttl,
            samples: Vec::new(),
            counter: IpIdCounter::Unknown,
            hostname: None,
            flags: EntryFlags::empty(),
            udp_reply_src: None,
            ts_fingerprint: None,
        }
    }

    // Returns true if the port-unreachable reply came from an address
    // other than the probed one.
    pub fn udp_reply_mismatch(&self) -> bool {
        self.udp_reply_src
            .map(|src| src != self.addr)
            .unwrap_or(false)
    }

    // Average IP-ID increment rate across the collected samples, in
    // identifiers per second.
    pub fn velocity(&self) -> Option<f64> {
        if self.samples.len() < 2 {
            return None;
        }
        let mut total_delta = 0u64;
        let mut total_time = 0i64;
        for pair in self.samples.windows(2) {
            let delta = pair[1].ip_id.wrapping_sub(pair[0].ip_id);
            total_delta += delta as u64;
            total_time += (pair[1].time - pair[0].time).num_milliseconds();
        }
        if total_time <= 0 {
            return None;
        }
        Some(total_delta as f64 * 1000.0 / total_time as f64)
    }

    // Projects the IP-ID counter to the given instant, assuming the
    // measured velocity holds.
    pub fn project_ip_id(&self, when: DateTime<Utc>) -> Option<f64> {
        let velocity = self.velocity()?;
        let last = self.samples.last()?;
        let elapsed = (when - last.time).num_milliseconds() as f64 / 1000.0;
        Some(last.ip_id as f64 + velocity * elapsed)
    }

    // Classifies the IP-ID counter from the collected samples. Runs
    // once, at the end of the IP-ID collection phase.
    pub(crate) fn classify_counter(&mut self) {
        if !self.samples.is_empty()
            && self.samples.iter().all(|sample| sample.echoed)
        {
            self.counter = IpIdCounter::Echo;
            return;
        }
        let Some(velocity) = self.velocity() else {
            self.counter = IpIdCounter::Unknown;
            return;
        };
        self.counter = if velocity <= MAX_HEALTHY_VELOCITY {
            IpIdCounter::Healthy
        } else if velocity <= MAX_FAST_VELOCITY {
            IpIdCounter::Fast
        } else {
            IpIdCounter::Random
        };
    }
}

// ===== impl IpTable =====

impl IpTable {
    // Returns the entry for the given address, creating it with the
    // provided TTL on first mention.
    pub fn ensure(&mut self, addr: Ipv4Addr, ttl: u8) -> &mut IpTableEntry {
        self.0
            .entry(addr)
            .or_insert_with(|| IpTableEntry::new(addr, ttl))
    }

    pub fn get(&self, addr: &Ipv4Addr) -> Option<&IpTableEntry> {
        self.0.get(addr)
    }

    pub fn get_mut(&mut self, addr: &Ipv4Addr) -> Option<&mut IpTableEntry> {
        self.0.get_mut(addr)
    }

    pub fn contains(&self, addr: &Ipv4Addr) -> bool {
        self.0.contains_key(addr)
    }

    pub fn iter(&self) -> impl Iterator<Item = &IpTableEntry> {
        self.0.values()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}
