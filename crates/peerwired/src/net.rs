//! Socket setup.

use std::net::{IpAddr, SocketAddr};

use anyhow::{Context, Result};
use socket2::{Domain, Protocol, Socket, Type};
use tokio::net::UdpSocket;

use peerwire_core::PeerAddress;

const RECV_BUFFER: usize = 1 << 20;

/// Bind the node's UDP socket.
pub fn bind_udp(addr: SocketAddr) -> Result<UdpSocket> {
    let domain = if addr.is_ipv4() { Domain::IPV4 } else { Domain::IPV6 };
    let socket = Socket::new(domain, Type::DGRAM, Some(Protocol::UDP)).context("socket()")?;

    socket.set_reuse_address(true).context("SO_REUSEADDR")?;
    if let Err(e) = socket.set_recv_buffer_size(RECV_BUFFER) {
        tracing::debug!(error = %e, "could not raise SO_RCVBUF");
    }
    socket.set_nonblocking(true).context("set_nonblocking")?;
    socket
        .bind(&addr.into())
        .with_context(|| format!("bind({addr})"))?;

    UdpSocket::from_std(socket.into()).context("failed to convert to tokio UdpSocket")
}

/// The address we tell other peers to use. An explicit bind address wins;
/// otherwise ask the routing table which local address reaches the outside.
pub fn advertised_address(bind: IpAddr, port: u16) -> Result<PeerAddress> {
    if !bind.is_unspecified() {
        return Ok(PeerAddress::new(bind, port));
    }
    // UDP connect sends nothing, it only picks a route.
    let sock = std::net::UdpSocket::bind("0.0.0.0:0").context("route bind")?;
    sock.connect("192.0.2.1:9").context("route connect")?;
    let local = sock.local_addr().context("route local_addr")?;
    Ok(PeerAddress::new(local.ip(), port))
}
