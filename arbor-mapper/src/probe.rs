//
// Copyright (c) The Arbor Contributors
//
// SPDX-License-Identifier: MIT
//

#[cfg(feature = "testing")]
use std::collections::HashMap;
use std::net::Ipv4Addr;
#[cfg(not(feature = "testing"))]
use std::net::SocketAddrV4;
#[cfg(not(feature = "testing"))]
use std::os::unix::io::AsRawFd;
#[cfg(feature = "testing")]
use std::sync::Mutex;
use std::time::Duration;

#[cfg(not(feature = "testing"))]
use arbor_utils::task::Task;
#[cfg(not(feature = "testing"))]
use bytes::{BufMut, BytesMut};
#[cfg(not(feature = "testing"))]
use chrono::Timelike;
#[cfg(not(feature = "testing"))]
use internet_checksum::Checksum;
#[cfg(not(feature = "testing"))]
use nix::sys::socket::{MsgFlags, SockaddrIn, recv, sendto};
#[cfg(not(feature = "testing"))]
use tokio::io::Interest;
use crate::consts::{
    ICMP_HDR_LENGTH, ICMP_TS_PKT_LENGTH, IP_HDR_MIN_LENGTH, PROBE_TTL,
    RECV_BUF_SIZE, UDP_PROBE_DST_PORT,
};
use crate::error::IoError;
#[cfg(not(feature = "testing"))]
use crate::network::{self, AsyncFd, Socket, UdpSocket};

// Reply to an IP-ID probe.
#[derive(Clone, Copy, Debug)]
pub struct IpIdReply {
    pub ip_id: u16,
    // True when the reply carried the same IP-ID as the probe.
    pub echoed: bool,
}

// Reply to a UDP high-port probe: the source of the ICMP
// port-unreachable message.
#[derive(Clone, Copy, Debug)]
pub struct UdpReply {
    pub src: Ipv4Addr,
}

// Reply to an ICMP timestamp probe: the offset of the remote clock
// relative to the probe's originate timestamp, in milliseconds.
#[derive(Clone, Copy, Debug)]
pub struct TsReply {
    pub offset_ms: i64,
}

// Kind of probe, as recorded by the mock prober's journal.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ProbeKind {
    IpId,
    UdpUnreachable,
    IcmpTimestamp,
    ReverseDns,
}

// One journaled probe.
#[derive(Clone, Copy, Debug)]
pub struct ProbeEvent {
    pub kind: ProbeKind,
    pub target: Ipv4Addr,
}

// The probing primitives used by the alias hint collector. Every
// primitive absorbs timeouts and transient failures into `None`.
#[cfg(not(feature = "testing"))]
#[derive(Debug)]
pub struct Prober {
    timeout: Duration,
}

#[cfg(feature = "testing")]
#[derive(Debug, Default)]
pub struct Prober {
    timeout: Duration,
    profiles: Mutex<HashMap<Ipv4Addr, MockProfile>>,
    journal: Mutex<Vec<ProbeEvent>>,
}

// Scripted behavior of one probed address in test builds.
#[cfg(feature = "testing")]
#[derive(Clone, Debug)]
pub struct MockProfile {
    pub ip_id_next: u16,
    pub ip_id_step: u16,
    pub echo: bool,
    pub silent: bool,
    pub udp_reply_src: Option<Ipv4Addr>,
    pub ts_offset_ms: Option<i64>,
    pub hostname: Option<String>,
}

// ===== impl Prober =====

#[cfg(not(feature = "testing"))]
impl Prober {
    // Verifies at startup that raw sockets can be created; failure
    // here means the probing primitives are unavailable for the whole
    // run.
    pub fn new(timeout: Duration) -> Result<Prober, IoError> {
        network::icmp_socket(false).map_err(IoError::SocketError)?;
        Ok(Prober { timeout })
    }

    // Sends one ICMP echo request whose IP identifier derives from the
    // probe token, and reads the identifier of the reply.
    pub async fn ip_id_probe(
        &self,
        target: Ipv4Addr,
        token: u64,
        seq: u16,
    ) -> Option<IpIdReply> {
        let socket = match network::icmp_socket(true) {
            Ok(socket) => socket,
            Err(error) => {
                IoError::SocketError(error).log();
                return None;
            }
        };
        let probe_id = (token % 0xfffe) as u16 + 1;
        let ident = token as u16;
        let packet = encode_echo(probe_id, ident, seq, target);
        send_raw(&socket, &packet, target).await?;
        recv_matching(&socket, self.timeout, |buf| {
            decode_echo_reply(buf, ident, seq)
        })
        .await
        .map(|ip_id| IpIdReply {
            ip_id,
            echoed: ip_id == probe_id,
        })
    }

    // Sends a UDP datagram to an improbable port from the worker's own
    // source port and waits for the ICMP port-unreachable reply.
    pub async fn udp_probe(
        &self,
        target: Ipv4Addr,
        src_port: u16,
    ) -> Option<UdpReply> {
        let icmp = match network::icmp_socket(false) {
            Ok(socket) => socket,
            Err(error) => {
                IoError::SocketError(error).log();
                return None;
            }
        };
        let local = SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, src_port);
        let udp = match UdpSocket::bind(local).await {
            Ok(socket) => socket,
            Err(error) => {
                IoError::SocketError(error).log();
                return None;
            }
        };
        let remote = SocketAddrV4::new(target, UDP_PROBE_DST_PORT);
        if let Err(error) = udp.send_to(b"arbor", remote).await {
            IoError::SendError(error).log();
            return None;
        }
        recv_matching(&icmp, self.timeout, |buf| {
            decode_port_unreachable(buf, target, src_port)
        })
        .await
        .map(|src| UdpReply { src })
    }

    // Sends one ICMP timestamp request and derives the remote clock
    // offset from the reply.
    pub async fn timestamp_probe(
        &self,
        target: Ipv4Addr,
        ident: u16,
        seq: u16,
    ) -> Option<TsReply> {
        let socket = match network::icmp_socket(false) {
            Ok(socket) => socket,
            Err(error) => {
                IoError::SocketError(error).log();
                return None;
            }
        };
        let originate = ms_since_midnight();
        let packet = encode_timestamp(ident, seq, originate);
        send_raw(&socket, &packet, target).await?;
        recv_matching(&socket, self.timeout, |buf| {
            decode_timestamp_reply(buf, ident, seq)
        })
        .await
        .map(|receive| TsReply {
            offset_ms: receive as i64 - originate as i64,
        })
    }

    // Resolves the hostname of the target, on a blocking worker
    // thread.
    pub async fn reverse_dns(&self, target: Ipv4Addr) -> Option<String> {
        let task = Task::spawn_blocking(move || {
            dns_lookup::lookup_addr(&target.into()).ok()
        });
        let hostname = tokio::time::timeout(self.timeout, task)
            .await
            .ok()?
            .ok()??;
        // A PTR record pointing back at the address itself carries no
        // alias information.
        (hostname != target.to_string()).then_some(hostname)
    }
}

#[cfg(feature = "testing")]
impl Prober {
    pub fn new(timeout: Duration) -> Result<Prober, IoError> {
        Ok(Prober {
            timeout,
            ..Default::default()
        })
    }

    pub fn set_profile(&self, addr: Ipv4Addr, profile: MockProfile) {
        self.profiles.lock().unwrap().insert(addr, profile);
    }

    pub fn journal(&self) -> Vec<ProbeEvent> {
        self.journal.lock().unwrap().clone()
    }

    fn record(&self, kind: ProbeKind, target: Ipv4Addr) {
        self.journal
            .lock()
            .unwrap()
            .push(ProbeEvent { kind, target });
    }

    pub async fn ip_id_probe(
        &self,
        target: Ipv4Addr,
        _token: u64,
        _seq: u16,
    ) -> Option<IpIdReply> {
        self.record(ProbeKind::IpId, target);
        tokio::time::sleep(Duration::from_millis(1)).await;
        let mut profiles = self.profiles.lock().unwrap();
        let profile = profiles.get_mut(&target)?;
        if profile.silent {
            return None;
        }
        let ip_id = profile.ip_id_next;
        profile.ip_id_next = ip_id.wrapping_add(profile.ip_id_step);
        Some(IpIdReply {
            ip_id,
            echoed: profile.echo,
        })
    }

    pub async fn udp_probe(
        &self,
        target: Ipv4Addr,
        _src_port: u16,
    ) -> Option<UdpReply> {
        self.record(ProbeKind::UdpUnreachable, target);
        tokio::time::sleep(Duration::from_millis(1)).await;
        let profiles = self.profiles.lock().unwrap();
        let profile = profiles.get(&target)?;
        profile.udp_reply_src.map(|src| UdpReply { src })
    }

    pub async fn timestamp_probe(
        &self,
        target: Ipv4Addr,
        _ident: u16,
        _seq: u16,
    ) -> Option<TsReply> {
        self.record(ProbeKind::IcmpTimestamp, target);
        tokio::time::sleep(Duration::from_millis(1)).await;
        let profiles = self.profiles.lock().unwrap();
        let profile = profiles.get(&target)?;
        profile.ts_offset_ms.map(|offset_ms| TsReply { offset_ms })
    }

    pub async fn reverse_dns(&self, target: Ipv4Addr) -> Option<String> {
        self.record(ProbeKind::ReverseDns, target);
        tokio::time::sleep(Duration::from_millis(1)).await;
        let profiles = self.profiles.lock().unwrap();
        profiles.get(&target)?.hostname.clone()
    }
}

#[cfg(feature = "testing")]
impl Default for MockProfile {
    fn default() -> MockProfile {
        MockProfile {
            ip_id_next: 1000,
            ip_id_step: 3,
            echo: false,
            silent: false,
            udp_reply_src: None,
            ts_offset_ms: None,
            hostname: None,
        }
    }
}

// ===== global functions =====

#[cfg(not(feature = "testing"))]
async fn send_raw(
    socket: &AsyncFd<Socket>,
    packet: &[u8],
    target: Ipv4Addr,
) -> Option<()> {
    let dest = SockaddrIn::from(SocketAddrV4::new(target, 0));
    let result = socket
        .async_io(Interest::WRITABLE, |socket| {
            sendto(socket.as_raw_fd(), packet, &dest, MsgFlags::empty())
                .map_err(std::io::Error::from)
        })
        .await;
    match result {
        Ok(_) => Some(()),
        Err(error) => {
            IoError::SendError(error).log();
            None
        }
    }
}

// Reads packets off the socket until the filter accepts one or the
// wait budget runs out.
#[cfg(not(feature = "testing"))]
async fn recv_matching<T>(
    socket: &AsyncFd<Socket>,
    timeout: Duration,
    mut filter: impl FnMut(&[u8]) -> Option<T>,
) -> Option<T> {
    let mut buf = [0u8; RECV_BUF_SIZE];
    tokio::time::timeout(timeout, async {
        loop {
            let result = socket
                .async_io(Interest::READABLE, |socket| {
                    recv(socket.as_raw_fd(), &mut buf, MsgFlags::empty())
                        .map_err(std::io::Error::from)
                })
                .await;
            match result {
                Ok(len) => {
                    if let Some(value) = filter(&buf[..len]) {
                        break Some(value);
                    }
                }
                Err(error) => {
                    IoError::RecvError(error).log();
                    break None;
                }
            }
        }
    })
    .await
    .ok()
    .flatten()
}

// Builds an ICMP echo request with a caller-chosen IP identifier. The
// kernel fills in the source address and the IP header checksum.
#[cfg(not(feature = "testing"))]
fn encode_echo(
    ip_id: u16,
    ident: u16,
    seq: u16,
    target: Ipv4Addr,
) -> BytesMut {
    let mut buf =
        BytesMut::with_capacity(IP_HDR_MIN_LENGTH + ICMP_HDR_LENGTH);
    buf.put_u8(0x45);
    buf.put_u8(0);
    buf.put_u16((IP_HDR_MIN_LENGTH + ICMP_HDR_LENGTH) as u16);
    buf.put_u16(ip_id);
    buf.put_u16(0);
    buf.put_u8(PROBE_TTL);
    buf.put_u8(libc::IPPROTO_ICMP as u8);
    buf.put_u16(0);
    buf.put_slice(&Ipv4Addr::UNSPECIFIED.octets());
    buf.put_slice(&target.octets());

    let start = buf.len();
    buf.put_u8(8);
    buf.put_u8(0);
    buf.put_u16(0);
    buf.put_u16(ident);
    buf.put_u16(seq);
    update_cksum(&mut buf, start);
    buf
}

#[cfg(not(feature = "testing"))]
fn encode_timestamp(ident: u16, seq: u16, originate: u32) -> BytesMut {
    let mut buf = BytesMut::with_capacity(ICMP_TS_PKT_LENGTH);
    buf.put_u8(13);
    buf.put_u8(0);
    buf.put_u16(0);
    buf.put_u16(ident);
    buf.put_u16(seq);
    buf.put_u32(originate);
    buf.put_u32(0);
    buf.put_u32(0);
    update_cksum(&mut buf, 0);
    buf
}

#[cfg(not(feature = "testing"))]
fn update_cksum(buf: &mut BytesMut, start: usize) {
    let mut cksum = Checksum::new();
    cksum.add_bytes(&buf[start..]);
    buf[start + 2..start + 4].copy_from_slice(&cksum.checksum());
}

// Splits a received IPv4 packet into (IP-ID, source, protocol,
// payload).
#[cfg(not(feature = "testing"))]
fn ipv4_payload(buf: &[u8]) -> Option<(u16, Ipv4Addr, u8, &[u8])> {
    if buf.len() < IP_HDR_MIN_LENGTH || buf[0] >> 4 != 4 {
        return None;
    }
    let ihl = ((buf[0] & 0x0f) as usize) * 4;
    if ihl < IP_HDR_MIN_LENGTH || buf.len() < ihl {
        return None;
    }
    let ip_id = u16::from_be_bytes([buf[4], buf[5]]);
    let proto = buf[9];
    let src = Ipv4Addr::new(buf[12], buf[13], buf[14], buf[15]);
    Some((ip_id, src, proto, &buf[ihl..]))
}

#[cfg(not(feature = "testing"))]
fn decode_echo_reply(buf: &[u8], ident: u16, seq: u16) -> Option<u16> {
    let (ip_id, _, proto, icmp) = ipv4_payload(buf)?;
    if proto != libc::IPPROTO_ICMP as u8
        || icmp.len() < ICMP_HDR_LENGTH
        || icmp[0] != 0
        || icmp[1] != 0
        || u16::from_be_bytes([icmp[4], icmp[5]]) != ident
        || u16::from_be_bytes([icmp[6], icmp[7]]) != seq
    {
        return None;
    }
    Some(ip_id)
}

#[cfg(not(feature = "testing"))]
fn decode_port_unreachable(
    buf: &[u8],
    target: Ipv4Addr,
    src_port: u16,
) -> Option<Ipv4Addr> {
    let (_, outer_src, proto, icmp) = ipv4_payload(buf)?;
    if proto != libc::IPPROTO_ICMP as u8
        || icmp.len() < ICMP_HDR_LENGTH
        || icmp[0] != 3
        || icmp[1] != 3
    {
        return None;
    }
    // The ICMP payload quotes the offending datagram: IP header plus
    // at least the UDP ports.
    let inner = &icmp[ICMP_HDR_LENGTH..];
    if inner.len() < IP_HDR_MIN_LENGTH + 4 || inner[0] >> 4 != 4 {
        return None;
    }
    let ihl = ((inner[0] & 0x0f) as usize) * 4;
    if inner.len() < ihl + 4
        || inner[9] != libc::IPPROTO_UDP as u8
        || Ipv4Addr::new(inner[16], inner[17], inner[18], inner[19]) != target
    {
        return None;
    }
    let udp = &inner[ihl..];
    if u16::from_be_bytes([udp[0], udp[1]]) != src_port {
        return None;
    }
    Some(outer_src)
}

#[cfg(not(feature = "testing"))]
fn decode_timestamp_reply(buf: &[u8], ident: u16, seq: u16) -> Option<u32> {
    let (_, _, proto, icmp) = ipv4_payload(buf)?;
    if proto != libc::IPPROTO_ICMP as u8
        || icmp.len() < ICMP_TS_PKT_LENGTH
        || icmp[0] != 14
        || icmp[1] != 0
        || u16::from_be_bytes([icmp[4], icmp[5]]) != ident
        || u16::from_be_bytes([icmp[6], icmp[7]]) != seq
    {
        return None;
    }
    Some(u32::from_be_bytes([icmp[12], icmp[13], icmp[14], icmp[15]]))
}

// Milliseconds since midnight UTC, the unit of ICMP timestamps.
#[cfg(not(feature = "testing"))]
fn ms_since_midnight() -> u32 {
    let now = chrono::Utc::now();
    now.num_seconds_from_midnight() * 1000 + now.timestamp_subsec_millis()
}
