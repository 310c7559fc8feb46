//
// Copyright (c) The Arbor Contributors
//
// SPDX-License-Identifier: MIT
//

use std::net::Ipv4Addr;
use std::sync::Arc;
use std::time::Duration;

use arbor_utils::task::Task;
use chrono::Utc;
use futures::future::join_all;
use tokio::sync::Semaphore;
use tokio::time::sleep;

use crate::consts::{
    DFLT_BASE_SRC_PORT, DFLT_MAX_THREADS, DFLT_NB_IPIDS, DFLT_PROBE_TIMEOUT,
    DFLT_SRC_PORT_SPAN, DISPATCH_DELAY_LONG, DISPATCH_DELAY_SHORT,
    IPID_SAMPLE_SPACING,
};
use crate::debug::Debug;
use crate::error::Error;
use crate::ip_table::{EntryFlags, IpIdSample, SharedIpTable};
use crate::probe::Prober;

// Probing phases of the alias hint collector, in execution order.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum CollectionPhase {
    IpId,
    UdpUnreachable,
    IcmpTimestamp,
    ReverseDns,
}

// Sizing and pacing of the collector.
#[derive(Clone, Debug)]
pub struct CollectorConfig {
    pub max_threads: u16,
    pub nb_ip_ids: u8,
    pub timeout: Duration,
    pub base_src_port: u16,
    pub src_port_span: u16,
}

// Four-phase concurrent prober filling the IP table with alias hints.
//
// The orchestrator is the only mutator of the probe list and of the
// token counter; each worker writes to its own table entry. Phases are
// separated by a full join of the in-flight workers.
#[derive(Debug)]
pub struct AliasHintCollector {
    table: SharedIpTable,
    prober: Arc<Prober>,
    config: CollectorConfig,
    ips_to_probe: Vec<Ipv4Addr>,
    next_token: u64,
}

// ===== impl CollectionPhase =====

impl std::fmt::Display for CollectionPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CollectionPhase::IpId => write!(f, "ip-id"),
            CollectionPhase::UdpUnreachable => write!(f, "udp-unreachable"),
            CollectionPhase::IcmpTimestamp => write!(f, "icmp-timestamp"),
            CollectionPhase::ReverseDns => write!(f, "reverse-dns"),
        }
    }
}

// ===== impl CollectorConfig =====

impl CollectorConfig {
    // With fewer threads than samples-per-IP plus one, the IP-ID
    // phase cannot host a single worker.
    pub fn validate(&self) -> Result<(), Error> {
        if self.max_threads < self.nb_ip_ids as u16 + 1 {
            return Err(Error::InvalidCollectorSizing(
                self.max_threads,
                self.nb_ip_ids,
            ));
        }
        Ok(())
    }
}

impl Default for CollectorConfig {
    fn default() -> CollectorConfig {
        CollectorConfig {
            max_threads: DFLT_MAX_THREADS,
            nb_ip_ids: DFLT_NB_IPIDS,
            timeout: DFLT_PROBE_TIMEOUT,
            base_src_port: DFLT_BASE_SRC_PORT,
            src_port_span: DFLT_SRC_PORT_SPAN,
        }
    }
}

// ===== impl AliasHintCollector =====

impl AliasHintCollector {
    pub fn new(
        table: SharedIpTable,
        prober: Arc<Prober>,
        config: CollectorConfig,
    ) -> AliasHintCollector {
        AliasHintCollector {
            table,
            prober,
            config,
            ips_to_probe: Vec::new(),
            next_token: 0,
        }
    }

    // Queues addresses for the next collection run. Duplicates are
    // tolerated and removed at dispatch time.
    pub fn enqueue(&mut self, addrs: impl IntoIterator<Item = Ipv4Addr>) {
        self.ips_to_probe.extend(addrs);
    }

    // Number of probe tokens handed out so far.
    pub fn issued_tokens(&self) -> u64 {
        self.next_token
    }

    #[cfg(feature = "testing")]
    pub fn prober(&self) -> Arc<Prober> {
        self.prober.clone()
    }

    // Tokens are handed out by the orchestrator alone, strictly
    // increasing and contiguous from 1.
    fn get_probe_token(&mut self) -> u64 {
        self.next_token += 1;
        self.next_token
    }

    // Runs the four probing phases over the queued addresses. Each
    // phase drains its workers before the next one starts.
    pub async fn collect(&mut self, neighborhood_ttl: u8) {
        self.ips_to_probe.sort();
        self.ips_to_probe.dedup();
        let ips = std::mem::take(&mut self.ips_to_probe);
        if ips.is_empty() {
            return;
        }

        // Table entries exist before any worker runs, so workers only
        // ever touch their own, already stable entry.
        {
            let mut table = self.table.lock().unwrap();
            for addr in &ips {
                table.ensure(*addr, neighborhood_ttl);
            }
        }

        self.phase_ip_id(&ips).await;

        // Counter classification runs under the orchestrator, at the
        // phase barrier.
        {
            let mut table = self.table.lock().unwrap();
            for addr in &ips {
                if let Some(entry) = table.get_mut(addr) {
                    entry.classify_counter();
                }
            }
        }

        self.phase_udp(&ips).await;
        self.phase_timestamp(&ips).await;
        self.phase_dns(&ips).await;
    }

    // Phase 1: IP-ID collection. Each worker gathers `nb_ip_ids`
    // samples from one address; a worker occupies its slot for the
    // whole sample run, hence the reduced concurrency bound.
    async fn phase_ip_id(&mut self, ips: &[Ipv4Addr]) {
        Debug::PhaseStarted(CollectionPhase::IpId, ips.len()).log();
        let max_collectors =
            self.config.max_threads / (self.config.nb_ip_ids as u16 + 1);
        let semaphore = Arc::new(Semaphore::new(max_collectors as usize));
        let mut workers = Vec::with_capacity(ips.len());
        for addr in ips {
            let permit =
                semaphore.clone().acquire_owned().await.unwrap();
            let token = self.get_probe_token();
            let table = self.table.clone();
            let prober = self.prober.clone();
            let nb_ip_ids = self.config.nb_ip_ids;
            let addr = *addr;
            workers.push(Task::spawn(async move {
                let _permit = permit;
                for seq in 0..nb_ip_ids as u16 {
                    if let Some(reply) =
                        prober.ip_id_probe(addr, token, seq).await
                    {
                        let sample = IpIdSample::new(
                            token,
                            Utc::now(),
                            reply.ip_id,
                            reply.echoed,
                        );
                        let mut table = table.lock().unwrap();
                        if let Some(entry) = table.get_mut(&addr) {
                            entry.samples.push(sample);
                        }
                    }
                    sleep(IPID_SAMPLE_SPACING).await;
                }
            }));
            sleep(DISPATCH_DELAY_SHORT).await;
        }
        join_all(workers).await;
        Debug::PhaseFinished(CollectionPhase::IpId).log();
    }

    // Phase 2: UDP unreachable port. One worker per address, each on
    // its own source-port band.
    async fn phase_udp(&mut self, ips: &[Ipv4Addr]) {
        Debug::PhaseStarted(CollectionPhase::UdpUnreachable, ips.len())
            .log();
        let semaphore =
            Arc::new(Semaphore::new(self.config.max_threads as usize));
        let mut workers = Vec::with_capacity(ips.len());
        for (i, addr) in ips.iter().enumerate() {
            let permit =
                semaphore.clone().acquire_owned().await.unwrap();
            let src_port = self.src_port_band(i);
            let table = self.table.clone();
            let prober = self.prober.clone();
            let addr = *addr;
            workers.push(Task::spawn(async move {
                let _permit = permit;
                if let Some(reply) = prober.udp_probe(addr, src_port).await {
                    let mut table = table.lock().unwrap();
                    if let Some(entry) = table.get_mut(&addr) {
                        entry.flags.insert(EntryFlags::UDP_REPLY);
                        entry.udp_reply_src = Some(reply.src);
                    }
                }
            }));
            sleep(DISPATCH_DELAY_LONG).await;
        }
        join_all(workers).await;
        Debug::PhaseFinished(CollectionPhase::UdpUnreachable).log();
    }

    // Phase 3: ICMP timestamp request. The source-port band doubles as
    // the ICMP identifier, keeping concurrent workers distinguishable.
    async fn phase_timestamp(&mut self, ips: &[Ipv4Addr]) {
        Debug::PhaseStarted(CollectionPhase::IcmpTimestamp, ips.len())
            .log();
        let semaphore =
            Arc::new(Semaphore::new(self.config.max_threads as usize));
        let mut workers = Vec::with_capacity(ips.len());
        for (i, addr) in ips.iter().enumerate() {
            let permit =
                semaphore.clone().acquire_owned().await.unwrap();
            let ident = self.src_port_band(i);
            let table = self.table.clone();
            let prober = self.prober.clone();
            let addr = *addr;
            workers.push(Task::spawn(async move {
                let _permit = permit;
                if let Some(reply) =
                    prober.timestamp_probe(addr, ident, 0).await
                {
                    let mut table = table.lock().unwrap();
                    if let Some(entry) = table.get_mut(&addr) {
                        entry.flags.insert(EntryFlags::TIMESTAMP_REPLY);
                        entry.ts_fingerprint = Some(reply.offset_ms);
                    }
                }
            }));
            sleep(DISPATCH_DELAY_LONG).await;
        }
        join_all(workers).await;
        Debug::PhaseFinished(CollectionPhase::IcmpTimestamp).log();
    }

    // Phase 4: reverse DNS.
    async fn phase_dns(&mut self, ips: &[Ipv4Addr]) {
        Debug::PhaseStarted(CollectionPhase::ReverseDns, ips.len()).log();
        let semaphore =
            Arc::new(Semaphore::new(self.config.max_threads as usize));
        let mut workers = Vec::with_capacity(ips.len());
        for addr in ips {
            let permit =
                semaphore.clone().acquire_owned().await.unwrap();
            let table = self.table.clone();
            let prober = self.prober.clone();
            let addr = *addr;
            workers.push(Task::spawn(async move {
                let _permit = permit;
                if let Some(hostname) = prober.reverse_dns(addr).await {
                    let mut table = table.lock().unwrap();
                    if let Some(entry) = table.get_mut(&addr) {
                        entry.hostname = Some(hostname);
                    }
                }
            }));
            sleep(DISPATCH_DELAY_SHORT).await;
        }
        join_all(workers).await;
        Debug::PhaseFinished(CollectionPhase::ReverseDns).log();
    }

    // Contiguous source-port band of the i-th worker of a phase.
    // Concurrent workers never exceed `max_threads`, so reducing the
    // index modulo the band count keeps in-flight bands disjoint.
    fn src_port_band(&self, i: usize) -> u16 {
        let bands = self.config.max_threads as u32;
        let span = self.config.src_port_span.max(1) as u32;
        let width = (span / bands).max(1);
        let offset = (i as u32 % bands) * width % span;
        self.config.base_src_port.wrapping_add(offset as u16)
    }
}
