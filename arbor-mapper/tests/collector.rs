//
// Copyright (c) The Arbor Contributors
//
// SPDX-License-Identifier: MIT
//

use std::sync::{Arc, Mutex};
use std::time::Duration;

use arbor_mapper::collector::{AliasHintCollector, CollectorConfig};
use arbor_mapper::ip_table::{EntryFlags, IpTable, SharedIpTable};
use arbor_mapper::probe::{MockProfile, ProbeKind, Prober};
use const_addrs::ip4;

fn test_config() -> CollectorConfig {
    CollectorConfig {
        max_threads: 10,
        nb_ip_ids: 4,
        timeout: Duration::from_millis(100),
        base_src_port: 39360,
        src_port_span: 1024,
    }
}

fn test_prober() -> Arc<Prober> {
    Arc::new(Prober::new(Duration::from_millis(100)).unwrap())
}

// A configuration whose thread budget cannot host a single IP-ID
// worker is rejected.
#[test]
fn test_invalid_sizing() {
    let config = CollectorConfig {
        max_threads: 2,
        nb_ip_ids: 4,
        ..test_config()
    };
    assert!(config.validate().is_err());
    assert!(test_config().validate().is_ok());
}

// Phase barrier: every IP-ID probe of phase 1 happens strictly before
// the first UDP probe of phase 2, and so on down the pipeline.
#[tokio::test]
async fn test_phase_ordering() {
    let table: SharedIpTable = Arc::new(Mutex::new(IpTable::default()));
    let prober = test_prober();
    let first = ip4!("10.0.0.1");
    let second = ip4!("10.0.0.2");
    prober.set_profile(first, MockProfile::default());
    prober.set_profile(
        second,
        MockProfile {
            udp_reply_src: Some(ip4!("10.0.9.9")),
            hostname: Some("r1.example.net".to_owned()),
            ..Default::default()
        },
    );

    let mut collector =
        AliasHintCollector::new(table.clone(), prober.clone(), test_config());
    collector.enqueue([first, second, second]);
    collector.collect(3).await;

    // Both IPs carry their full sample run before any UDP reply is
    // recorded.
    {
        let table = table.lock().unwrap();
        for addr in [first, second] {
            let entry = table.get(&addr).unwrap();
            assert_eq!(entry.samples.len(), 4);
            assert_eq!(entry.ttl, 3);
        }
        let entry = table.get(&second).unwrap();
        assert!(entry.flags.contains(EntryFlags::UDP_REPLY));
        assert_eq!(entry.udp_reply_src, Some(ip4!("10.0.9.9")));
        assert_eq!(entry.hostname.as_deref(), Some("r1.example.net"));
    }

    let journal = prober.journal();
    let phase_rank = |kind: ProbeKind| match kind {
        ProbeKind::IpId => 0,
        ProbeKind::UdpUnreachable => 1,
        ProbeKind::IcmpTimestamp => 2,
        ProbeKind::ReverseDns => 3,
    };
    let ranks: Vec<u8> =
        journal.iter().map(|event| phase_rank(event.kind)).collect();
    let mut sorted = ranks.clone();
    sorted.sort();
    assert_eq!(ranks, sorted, "probes crossed a phase barrier");

    // The duplicate enqueue entry was dropped: 8 IP-ID probes, then
    // one probe per IP in each later phase.
    assert_eq!(ranks.iter().filter(|rank| **rank == 0).count(), 8);
    assert_eq!(ranks.iter().filter(|rank| **rank == 1).count(), 2);
}

// Probe tokens are strictly increasing and contiguous from 1, one per
// phase-1 worker.
#[tokio::test]
async fn test_probe_tokens() {
    let table: SharedIpTable = Arc::new(Mutex::new(IpTable::default()));
    let prober = test_prober();
    let targets =
        [ip4!("10.0.0.1"), ip4!("10.0.0.2"), ip4!("10.0.0.3")];
    for addr in targets {
        prober.set_profile(addr, MockProfile::default());
    }

    let mut collector =
        AliasHintCollector::new(table.clone(), prober, test_config());
    collector.enqueue(targets);
    collector.collect(2).await;

    assert_eq!(collector.issued_tokens(), 3);
    let table = table.lock().unwrap();
    let mut tokens: Vec<u64> = table
        .iter()
        .flat_map(|entry| entry.samples.iter().map(|sample| sample.token))
        .collect();
    tokens.sort();
    tokens.dedup();
    assert_eq!(tokens, vec![1, 2, 3]);

    // Within one entry all samples share the worker's token.
    for entry in table.iter() {
        assert!(
            entry
                .samples
                .iter()
                .all(|sample| sample.token == entry.samples[0].token)
        );
    }
}

// Silent addresses still get a table entry, with empty hints.
#[tokio::test]
async fn test_silent_target() {
    let table: SharedIpTable = Arc::new(Mutex::new(IpTable::default()));
    let prober = test_prober();
    let silent = ip4!("10.0.0.7");
    prober.set_profile(
        silent,
        MockProfile {
            silent: true,
            ..Default::default()
        },
    );

    let mut collector =
        AliasHintCollector::new(table.clone(), prober, test_config());
    collector.enqueue([silent]);
    collector.collect(5).await;

    let table = table.lock().unwrap();
    let entry = table.get(&silent).unwrap();
    assert!(entry.samples.is_empty());
    assert!(entry.flags.is_empty());
    assert!(entry.hostname.is_none());
    assert_eq!(entry.ttl, 5);
}
