//
// Copyright (c) The Arbor Contributors
//
// SPDX-License-Identifier: MIT
//

#[cfg(not(feature = "testing"))]
use capctl::caps::CapState;
#[cfg(not(feature = "testing"))]
use socket2::{Domain, Protocol, Type};
#[cfg(not(feature = "testing"))]
use tracing::error;
// Normal build: re-export standard socket types.
#[cfg(not(feature = "testing"))]
pub use {socket2::Socket, tokio::io::unix::AsyncFd, tokio::net::UdpSocket};

// Test build: export mock sockets.
#[cfg(feature = "testing")]
pub use crate::network::mock::{AsyncFd, Socket, UdpSocket};

// Runs the provided closure with elevated capabilities. Raw-socket
// creation is the only operation that needs them.
#[cfg(not(feature = "testing"))]
fn raise_capabilities<F, R>(cb: F) -> R
where
    F: FnOnce() -> R,
{
    let mut caps = CapState::get_current().unwrap();
    caps.effective = caps.permitted;
    if let Err(error) = caps.set_current() {
        error!("failed to update current capabilities: {}", error);
    }

    let ret = cb();

    caps.effective.clear();
    if let Err(error) = caps.set_current() {
        error!("failed to update current capabilities: {}", error);
    }

    ret
}

// Creates a non-blocking raw ICMP socket. With `header_included`, the
// caller provides the IPv4 header of outgoing packets, which is how
// the IP-ID probes control the identifier field.
#[cfg(not(feature = "testing"))]
pub(crate) fn icmp_socket(
    header_included: bool,
) -> Result<AsyncFd<Socket>, std::io::Error> {
    let socket = raise_capabilities(|| {
        Socket::new(Domain::IPV4, Type::RAW, Some(Protocol::ICMPV4))
    })?;
    socket.set_nonblocking(true)?;
    if header_included {
        socket.set_header_included_v4(true)?;
    }
    AsyncFd::new(socket)
}

// ===== Mock sockets =====

#[cfg(feature = "testing")]
pub mod mock {
    #[derive(Debug, Default)]
    pub struct AsyncFd<T>(T);

    #[derive(Debug, Default)]
    pub struct Socket();

    #[derive(Debug, Default)]
    pub struct UdpSocket();

    impl<T> AsyncFd<T> {
        pub fn new(inner: T) -> std::io::Result<Self> {
            Ok(Self(inner))
        }

        pub fn get_ref(&self) -> &T {
            &self.0
        }
    }
}
