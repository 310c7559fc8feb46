//
// Copyright (c) The Arbor Contributors
//
// SPDX-License-Identifier: MIT
//

use std::time::Duration;

// Delay between worker dispatches during the IP-ID collection and
// reverse DNS phases.
pub const DISPATCH_DELAY_SHORT: Duration = Duration::from_millis(10);

// Delay between worker dispatches during the UDP unreachable and ICMP
// timestamp phases, which funnel through a common upstream router.
pub const DISPATCH_DELAY_LONG: Duration = Duration::from_millis(100);

// Default wait budget of a single probe.
pub const DFLT_PROBE_TIMEOUT: Duration = Duration::from_millis(2500);

// Default number of IP-ID samples collected per interface.
pub const DFLT_NB_IPIDS: u8 = 4;

// Default maximum amount of concurrent probing workers.
pub const DFLT_MAX_THREADS: u16 = 256;

// Default source-port range partitioned into per-worker bands during
// the UDP unreachable and ICMP timestamp phases.
pub const DFLT_BASE_SRC_PORT: u16 = 39360;
pub const DFLT_SRC_PORT_SPAN: u16 = 16384;

// Destination port targeted by the UDP unreachable probes, outside
// any well-known service range.
pub const UDP_PROBE_DST_PORT: u16 = 33434;

pub const IP_HDR_MIN_LENGTH: usize = 20;
pub const ICMP_HDR_LENGTH: usize = 8;
pub const ICMP_TS_PKT_LENGTH: usize = 20;

// TTL of outgoing probe packets.
pub const PROBE_TTL: u8 = 64;

// Maximum size of a received probe reply.
pub const RECV_BUF_SIZE: usize = 1500;

// Spacing between the IP-ID samples of one worker, so consecutive
// samples observe a measurable counter drift.
pub const IPID_SAMPLE_SPACING: Duration = Duration::from_millis(20);

// IP-ID counter velocity bounds, in identifiers per second.
pub const MAX_HEALTHY_VELOCITY: f64 = 1000.0;
pub const MAX_FAST_VELOCITY: f64 = 30000.0;

// Tolerances applied by the alias resolver when comparing two healthy
// IP-ID counters.
pub const VELOCITY_RATIO_TOLERANCE: f64 = 0.35;
pub const MAX_IPID_PROJECTION_GAP: f64 = 128.0;

// Two ICMP timestamp fingerprints closer than this are considered to
// come from the same clock.
pub const TS_FINGERPRINT_TOLERANCE_MS: i64 = 250;
